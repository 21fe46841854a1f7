//! 命名空间感知的XML树模块
//!
//! 以arena方式保存整个文档，节点之间用 [`NodeId`] 索引相连。
//! 每个节点都可以携带一条源位置记录（[`SourcePos`]），
//! 序列化时据此生成source map，使输出的每个字节都能追溯到原始创作文件。

pub mod reader;
pub mod sourcemap;
pub mod template;
pub mod writer;
pub mod xpath;

use crate::epub::error::{EpubError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub use reader::{parse_xml, read_xml, read_xml_with_sourcemap};
pub use template::Template;
pub use writer::{serialize, write_xml_with_sourcemap, Serialized};

/// 源位置记录：文件、从1开始的行号、从0开始的列号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub source: Rc<PathBuf>,
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub fn new(source: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            source: Rc::new(source.into()),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source.display(), self.line, self.column)
    }
}

/// 流水线使用的固定命名空间表（前缀 → URI），编译期已知且封闭
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ns {
    Xhtml,
    MathMl,
    Epub,
    Opf,
    Ncx,
    Container,
    Books,
    Dc,
    Md,
    Col,
    Xml,
}

impl Ns {
    pub const ALL: [Ns; 11] = [
        Ns::Xhtml,
        Ns::MathMl,
        Ns::Epub,
        Ns::Opf,
        Ns::Ncx,
        Ns::Container,
        Ns::Books,
        Ns::Dc,
        Ns::Md,
        Ns::Col,
        Ns::Xml,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Ns::Xhtml => "h",
            Ns::MathMl => "m",
            Ns::Epub => "epub",
            Ns::Opf => "opf",
            Ns::Ncx => "ncx",
            Ns::Container => "cont",
            Ns::Books => "bk",
            Ns::Dc => "dc",
            Ns::Md => "md",
            Ns::Col => "col",
            Ns::Xml => "xml",
        }
    }

    pub fn uri(self) -> &'static str {
        match self {
            Ns::Xhtml => "http://www.w3.org/1999/xhtml",
            Ns::MathMl => "http://www.w3.org/1998/Math/MathML",
            Ns::Epub => "http://www.idpf.org/2007/ops",
            Ns::Opf => "http://www.idpf.org/2007/opf",
            Ns::Ncx => "http://www.daisy.org/z3986/2005/ncx/",
            Ns::Container => "urn:oasis:names:tc:opendocument:xmlns:container",
            Ns::Books => "https://openstax.org/namespaces/book-container",
            Ns::Dc => "http://purl.org/dc/elements/1.1/",
            Ns::Md => "http://cnx.rice.edu/mdml",
            Ns::Col => "http://cnx.rice.edu/collxml",
            Ns::Xml => "http://www.w3.org/XML/1998/namespace",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Ns> {
        Ns::ALL.into_iter().find(|ns| ns.prefix() == prefix)
    }

    pub fn from_uri(uri: &str) -> Option<Ns> {
        Ns::ALL.into_iter().find(|ns| ns.uri() == uri)
    }

    /// 这些词汇表中的元素以默认命名空间形式（不带前缀）输出
    fn is_default_style(self) -> bool {
        matches!(
            self,
            Ns::Xhtml | Ns::MathMl | Ns::Opf | Ns::Ncx | Ns::Container | Ns::Books
        )
    }

    /// 宽松空白的命名空间：序列化时在元素边界插入换行和缩进
    pub fn is_loose(uri: &str) -> bool {
        uri == Ns::Container.uri() || uri == Ns::Ncx.uri() || uri == Ns::Opf.uri()
    }
}

/// 带命名空间的名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub ns: Option<String>,
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    /// 不属于任何命名空间的名称
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            ns: None,
            prefix: None,
            local: local.into(),
        }
    }

    pub fn in_ns(ns: Ns, local: impl Into<String>) -> Self {
        Self {
            ns: Some(ns.uri().to_string()),
            prefix: if ns.is_default_style() {
                None
            } else {
                Some(ns.prefix().to_string())
            },
            local: local.into(),
        }
    }

    /// 解析 `prefix:local` 形式的名称，前缀通过固定命名空间表查找
    ///
    /// 没有前缀的名称不属于任何命名空间。
    pub fn parse(name: &str) -> Result<QName> {
        match name.split_once(':') {
            Some((prefix, local)) => {
                let ns = Ns::from_prefix(prefix)
                    .ok_or_else(|| EpubError::UnknownPrefix(prefix.to_string()))?;
                Ok(QName::in_ns(ns, local))
            }
            None => Ok(QName::local(name)),
        }
    }

    /// 属性名称总是保留前缀（属性没有默认命名空间）
    pub fn parse_attribute(name: &str) -> Result<QName> {
        let mut qname = QName::parse(name)?;
        if let Some(ns) = qname.ns.as_deref().and_then(Ns::from_uri) {
            qname.prefix = Some(ns.prefix().to_string());
        }
        Ok(qname)
    }

    pub fn matches(&self, other: &QName) -> bool {
        self.ns == other.ns && self.local == other.local
    }

    pub fn is(&self, ns: Ns, local: &str) -> bool {
        self.ns.as_deref() == Some(ns.uri()) && self.local == local
    }

    /// 输出用的限定名
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }
}

/// 元素属性
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
    pub pos: Option<SourcePos>,
}

/// 节点种类
#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element { name: QName, attrs: Vec<Attribute> },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pos: Option<SourcePos>,
}

/// arena中节点的索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// `set_children` 等操作接受的子节点：已有节点或字面文本
#[derive(Debug, Clone)]
pub enum Child {
    Node(NodeId),
    Text(String),
}

impl From<NodeId> for Child {
    fn from(id: NodeId) -> Self {
        Child::Node(id)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Text(text.to_string())
    }
}

impl From<String> for Child {
    fn from(text: String) -> Self {
        Child::Text(text)
    }
}

/// 内存中的XML文档
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    document: NodeId,
    /// 已知的原始文件内容，写入source map的 `sourcesContent`
    contents: HashMap<PathBuf, String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            document: NodeId(0),
            contents: HashMap::new(),
        };
        doc.document = doc.alloc(NodeKind::Document, None);
        doc
    }

    fn alloc(&mut self, kind: NodeKind, pos: Option<SourcePos>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
            pos,
        });
        id
    }

    /// 文档节点（所有内容的根）
    pub fn document(&self) -> NodeId {
        self.document
    }

    /// 文档的根元素
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.document)
            .iter()
            .copied()
            .find(|&id| self.is_element(id))
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn pos(&self, id: NodeId) -> Option<&SourcePos> {
        self.nodes[id.0].pos.as_ref()
    }

    pub fn set_pos(&mut self, id: NodeId, pos: Option<SourcePos>) {
        self.nodes[id.0].pos = pos;
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Element { .. })
    }

    pub fn name(&self, id: NodeId) -> Option<&QName> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    /// 修改元素的名称（例如把元素移到另一个命名空间）
    pub fn set_name(&mut self, id: NodeId, new_name: QName) {
        if let NodeKind::Element { name, .. } = &mut self.nodes[id.0].kind {
            *name = new_name;
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    fn attributes_mut(&mut self, id: NodeId) -> Option<&mut Vec<Attribute>> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    /// 读取属性值
    ///
    /// # 参数
    /// * `id` - 元素节点
    /// * `name` - `prefix:local` 或无前缀的属性名；带前缀时只匹配该命名空间下的属性
    ///
    /// # 返回值
    /// * `Result<Option<&str>>` - 属性值，不存在时为 `None`
    pub fn attr(&self, id: NodeId, name: &str) -> Result<Option<&str>> {
        let qname = QName::parse_attribute(name)?;
        Ok(self
            .attributes(id)
            .iter()
            .find(|a| a.name.matches(&qname))
            .map(|a| a.value.as_str()))
    }

    /// 设置属性值，已有同名（同命名空间）属性时原地覆盖
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) -> Result<()> {
        let qname = QName::parse_attribute(name)?;
        let pos = self.nodes[id.0].pos.clone();
        let attrs = self
            .attributes_mut(id)
            .ok_or_else(|| EpubError::bug(format!("在非元素节点上设置属性 `{}`", name)))?;
        let value = value.into();
        match attrs.iter_mut().find(|a| a.name.matches(&qname)) {
            Some(existing) => existing.value = value,
            None => attrs.push(Attribute {
                name: qname,
                value,
                pos,
            }),
        }
        Ok(())
    }

    /// 删除属性，返回是否确实删除了
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<bool> {
        let qname = QName::parse_attribute(name)?;
        let Some(attrs) = self.attributes_mut(id) else {
            return Ok(false);
        };
        let before = attrs.len();
        attrs.retain(|a| !a.name.matches(&qname));
        Ok(attrs.len() != before)
    }

    /// 节点及其所有后代的文本内容
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            _ => {
                for &child in &self.nodes[id.0].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// 按文档顺序列出节点的所有后代（不含自身）
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// 从文档节点开始的先序序号，游离节点不在其中
    pub(crate) fn document_order(&self) -> HashMap<NodeId, usize> {
        let mut order = HashMap::new();
        order.insert(self.document, 0);
        for (i, id) in self.descendants(self.document).into_iter().enumerate() {
            order.insert(id, i + 1);
        }
        order
    }

    /// 创建一个游离的文本节点
    pub fn create_text(&mut self, text: impl Into<String>, pos: Option<SourcePos>) -> NodeId {
        self.alloc(NodeKind::Text(text.into()), pos)
    }

    pub fn create_comment(&mut self, text: impl Into<String>, pos: Option<SourcePos>) -> NodeId {
        self.alloc(NodeKind::Comment(text.into()), pos)
    }

    /// 创建一个游离的元素并打上源位置
    ///
    /// # 参数
    /// * `tag` - `prefix:local` 形式的标签名
    /// * `attrs` - 属性列表，属性名同样使用前缀形式
    /// * `children` - 子节点，可以混合元素与字面文本
    /// * `pos` - 源位置；为 `None` 时序列化会输出占位源
    pub fn create(
        &mut self,
        tag: &str,
        attrs: &[(&str, &str)],
        children: Vec<Child>,
        pos: Option<SourcePos>,
    ) -> Result<NodeId> {
        let name = QName::parse(tag)?;
        let mut attributes = Vec::with_capacity(attrs.len());
        for (key, value) in attrs {
            attributes.push(Attribute {
                name: QName::parse_attribute(key)?,
                value: value.to_string(),
                pos: pos.clone(),
            });
        }
        let id = self.alloc(
            NodeKind::Element {
                name,
                attrs: attributes,
            },
            pos,
        );
        self.append_children(id, children);
        Ok(id)
    }

    /// 把节点追加为 `parent` 的最后一个子节点（必要时先从原位置摘下）
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.remove(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    fn append_children(&mut self, parent: NodeId, children: Vec<Child>) {
        for child in children {
            let id = match child {
                Child::Node(id) => id,
                Child::Text(text) => {
                    let pos = self.nodes[parent.0].pos.clone();
                    self.create_text(text, pos)
                }
            };
            self.append(parent, id);
        }
    }

    /// 清空所有现有子节点（元素与文本），再依次追加新的子节点
    pub fn set_children(&mut self, id: NodeId, children: Vec<Child>) {
        let old = std::mem::take(&mut self.nodes[id.0].children);
        for child in old {
            self.nodes[child.0].parent = None;
        }
        self.append_children(id, children);
    }

    /// 把节点从父节点上摘下
    pub fn remove(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// 用新节点原地替换，返回替换后的节点
    pub fn replace_with(&mut self, id: NodeId, replacement: NodeId) -> Result<NodeId> {
        if id == replacement {
            return Ok(id);
        }
        let Some(parent) = self.nodes[id.0].parent else {
            return Ok(replacement);
        };
        self.remove(replacement);
        let index = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == id)
            .ok_or_else(|| EpubError::bug("被替换的节点不在父节点的子节点列表中"))?;
        self.nodes[parent.0].children[index] = replacement;
        self.nodes[replacement.0].parent = Some(parent);
        self.nodes[id.0].parent = None;
        Ok(replacement)
    }

    /// 用模板构建的新节点原地替换，新节点继承被替换节点的源位置
    pub fn replace_with_template(&mut self, id: NodeId, template: &Template) -> Result<NodeId> {
        let pos = self.pos(id).cloned();
        let built = self.build(template, pos)?;
        let replacement = match built.as_slice() {
            [single] => *single,
            _ => {
                return Err(EpubError::bug(
                    "replace_with 需要一个只产生单个节点的模板",
                ));
            }
        };
        self.replace_with(id, replacement)
    }

    /// 记录某个源文件的内容，供source map嵌入
    pub fn add_source_content(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.contents.insert(path.into(), content.into());
    }

    pub fn source_content(&self, path: &Path) -> Option<&str> {
        self.contents.get(path).map(String::as_str)
    }

    pub(crate) fn for_each_pos_mut(&mut self, mut f: impl FnMut(&mut Option<SourcePos>)) {
        for node in &mut self.nodes {
            f(&mut node.pos);
            if let NodeKind::Element { attrs, .. } = &mut node.kind {
                for attr in attrs {
                    f(&mut attr.pos);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_namespaces_do_not_collide() {
        let mut doc = Document::new();
        let el = doc.create("h:a", &[("type", "plain")], vec![], None).unwrap();
        doc.set_attr(el, "epub:type", "noteref").unwrap();

        assert_eq!(doc.attr(el, "type").unwrap(), Some("plain"));
        assert_eq!(doc.attr(el, "epub:type").unwrap(), Some("noteref"));

        assert!(doc.remove_attr(el, "epub:type").unwrap());
        assert_eq!(doc.attr(el, "epub:type").unwrap(), None);
        assert_eq!(doc.attr(el, "type").unwrap(), Some("plain"));
    }

    #[test]
    fn test_unknown_prefix_is_rejected() {
        let mut doc = Document::new();
        assert!(matches!(
            doc.create("zz:a", &[], vec![], None),
            Err(EpubError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn test_set_children_clears_elements_and_text() {
        let mut doc = Document::new();
        let span = doc.create("h:span", &[], vec![], None).unwrap();
        let p = doc
            .create("h:p", &[], vec!["before".into(), span.into()], None)
            .unwrap();
        assert_eq!(doc.children(p).len(), 2);

        let b = doc.create("h:b", &[], vec!["bold".into()], None).unwrap();
        doc.set_children(p, vec!["new ".into(), b.into()]);

        assert_eq!(doc.children(p).len(), 2);
        assert_eq!(doc.text(p), "new bold");
        assert_eq!(doc.parent(span), None);
    }

    #[test]
    fn test_replace_with_keeps_position_in_parent() {
        let mut doc = Document::new();
        let a = doc.create("h:a", &[], vec![], None).unwrap();
        let b = doc.create("h:b", &[], vec![], None).unwrap();
        let c = doc.create("h:c", &[], vec![], None).unwrap();
        let root = doc
            .create("h:div", &[], vec![a.into(), b.into(), c.into()], None)
            .unwrap();

        let x = doc.create("h:x", &[], vec![], None).unwrap();
        let replaced = doc.replace_with(b, x).unwrap();

        assert_eq!(replaced, x);
        assert_eq!(doc.children(root), &[a, x, c]);
        assert_eq!(doc.parent(b), None);
    }

    #[test]
    fn test_replace_with_itself_is_a_no_op() {
        let mut doc = Document::new();
        let a = doc.create("h:a", &[], vec![], None).unwrap();
        let b = doc.create("h:b", &[], vec![], None).unwrap();
        let root = doc.create("h:div", &[], vec![a.into(), b.into()], None).unwrap();

        assert_eq!(doc.replace_with(a, a).unwrap(), a);
        assert_eq!(doc.children(root), &[a, b]);
        assert_eq!(doc.parent(a), Some(root));

        // 用兄弟节点替换：兄弟先被摘下，再占据原位置
        assert_eq!(doc.replace_with(a, b).unwrap(), b);
        assert_eq!(doc.children(root), &[b]);
        assert_eq!(doc.parent(a), None);
    }

    #[test]
    fn test_default_style_namespaces_are_unprefixed() {
        let html = QName::parse("h:p").unwrap();
        assert_eq!(html.prefix, None);
        assert_eq!(html.qualified(), "p");

        let title = QName::parse("dc:title").unwrap();
        assert_eq!(title.qualified(), "dc:title");
        assert_eq!(title.ns.as_deref(), Some(Ns::Dc.uri()));
    }
}
