//! 声明式构建
//!
//! 用嵌套的字面量描述标签、属性和子节点，再递归地降级为树节点。
//! 构建时由调用方提供一条源位置，所有生成的节点都会打上这条位置。

use crate::dom::{Child, Document, NodeId, SourcePos};
use crate::epub::error::Result;

/// 待构建的节点描述
#[derive(Debug, Clone)]
pub enum Template {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Template>,
    },
    Text(String),
    /// 展开为多个兄弟节点
    Fragment(Vec<Template>),
    /// 拼接一个已存在的节点
    Node(NodeId),
}

impl Template {
    pub fn element(tag: &str, attrs: &[(&str, &str)], children: Vec<Template>) -> Self {
        Template::Element {
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children,
        }
    }
}

impl From<&str> for Template {
    fn from(text: &str) -> Self {
        Template::Text(text.to_string())
    }
}

impl From<String> for Template {
    fn from(text: String) -> Self {
        Template::Text(text)
    }
}

impl From<&String> for Template {
    fn from(text: &String) -> Self {
        Template::Text(text.clone())
    }
}

impl From<NodeId> for Template {
    fn from(id: NodeId) -> Self {
        Template::Node(id)
    }
}

impl From<Vec<Template>> for Template {
    fn from(children: Vec<Template>) -> Self {
        Template::Fragment(children)
    }
}

/// 以字面量形式书写模板：
///
/// ```
/// use bookforge::tpl;
/// let head = tpl!("h:head" {} [
///     tpl!("h:title" {} ["第一章"]),
///     tpl!("h:link" { "rel" => "stylesheet", "href" => "style.css" } []),
/// ]);
/// # let _ = head;
/// ```
#[macro_export]
macro_rules! tpl {
    ($tag:literal { $($key:literal => $value:expr),* $(,)? } [ $($child:expr),* $(,)? ]) => {
        $crate::dom::Template::Element {
            tag: $tag.to_string(),
            attrs: vec![$(($key.to_string(), ($value).to_string())),*],
            children: vec![$($crate::dom::Template::from($child)),*],
        }
    };
}

impl Document {
    /// 把模板递归降级为节点，所有新节点都使用同一个源位置
    ///
    /// # 返回值
    /// * `Result<Vec<NodeId>>` - 顶层生成的节点（片段会展开成多个）
    pub fn build(&mut self, template: &Template, pos: Option<SourcePos>) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        self.build_into(template, &pos, &mut out)?;
        Ok(out)
    }

    fn build_into(
        &mut self,
        template: &Template,
        pos: &Option<SourcePos>,
        out: &mut Vec<NodeId>,
    ) -> Result<()> {
        match template {
            Template::Element {
                tag,
                attrs,
                children,
            } => {
                let mut built = Vec::new();
                for child in children {
                    self.build_into(child, pos, &mut built)?;
                }
                let attrs: Vec<(&str, &str)> = attrs
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let children = built.into_iter().map(Child::Node).collect();
                out.push(self.create(tag, &attrs, children, pos.clone())?);
            }
            Template::Text(text) => out.push(self.create_text(text.clone(), pos.clone())),
            Template::Fragment(items) => {
                for item in items {
                    self.build_into(item, pos, out)?;
                }
            }
            Template::Node(id) => out.push(*id),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Ns;

    #[test]
    fn test_build_nested_template_stamps_every_node() {
        let mut doc = Document::new();
        let pos = SourcePos::new("/book/page.xhtml", 3, 4);
        let items: Vec<Template> = ["a", "b"]
            .iter()
            .map(|t| tpl!("h:li" {} [*t]))
            .collect();
        let template = tpl!("h:ol" { "class" => "list" } [items, "tail"]);

        let built = doc.build(&template, Some(pos.clone())).unwrap();
        assert_eq!(built.len(), 1);
        let ol = built[0];

        assert!(doc.name(ol).unwrap().is(Ns::Xhtml, "ol"));
        assert_eq!(doc.attr(ol, "class").unwrap(), Some("list"));
        assert_eq!(doc.children(ol).len(), 3);
        assert_eq!(doc.text(ol), "abtail");
        for id in doc.descendants(ol) {
            assert_eq!(doc.pos(id), Some(&pos));
        }
    }

    #[test]
    fn test_replace_with_template_inherits_position() {
        let mut doc = Document::new();
        let pos = SourcePos::new("/book/page.xhtml", 7, 2);
        let old = doc.create("h:span", &[], vec![], Some(pos.clone())).unwrap();
        let parent = doc.create("h:p", &[], vec![old.into()], None).unwrap();

        let new = doc
            .replace_with_template(old, &tpl!("h:em" {} ["x"]))
            .unwrap();
        assert_eq!(doc.children(parent), &[new]);
        assert_eq!(doc.pos(new), Some(&pos));
    }
}
