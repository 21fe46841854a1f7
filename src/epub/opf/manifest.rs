//! 清单模块
//!
//! 提供EPUB包中文件清单项的结构定义及其XML形式。

use crate::dom::Template;

/// 清单项信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// 项目ID
    pub id: String,
    /// 文件路径(相对于OPF文件)
    pub href: String,
    /// 媒体类型
    pub media_type: String,
    /// 属性(如nav、cover-image等)
    pub properties: Option<String>,
}

impl ManifestItem {
    /// 创建新的清单项
    pub fn new(id: impl Into<String>, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: None,
        }
    }

    /// 追加一个属性
    pub fn with_property(mut self, property: &str) -> Self {
        self.properties = Some(match self.properties.take() {
            Some(existing) => format!("{} {}", existing, property),
            None => property.to_string(),
        });
        self
    }

    /// 检查是否包含指定属性
    pub fn has_property(&self, property: &str) -> bool {
        if let Some(properties) = &self.properties {
            properties.split_whitespace().any(|p| p == property)
        } else {
            false
        }
    }

    /// 检查是否为导航文档
    pub fn is_nav(&self) -> bool {
        self.has_property("nav")
    }

    /// 检查是否为封面图片
    pub fn is_cover_image(&self) -> bool {
        self.has_property("cover-image")
    }

    /// `opf:item` 元素
    pub fn to_template(&self) -> Template {
        let mut attrs = vec![
            ("id", self.id.as_str()),
            ("href", self.href.as_str()),
            ("media-type", self.media_type.as_str()),
        ];
        if let Some(properties) = &self.properties {
            attrs.push(("properties", properties.as_str()));
        }
        Template::element("opf:item", &attrs, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_accumulate() {
        let item = ManifestItem::new("page-1", "p1.xhtml", "application/xhtml+xml")
            .with_property("mathml")
            .with_property("remote-resources");
        assert_eq!(item.properties.as_deref(), Some("mathml remote-resources"));
        assert!(item.has_property("mathml"));
        assert!(!item.is_nav());
    }

    #[test]
    fn test_template_omits_absent_properties() {
        let item = ManifestItem::new("r", "a.png", "image/png");
        match item.to_template() {
            Template::Element { tag, attrs, .. } => {
                assert_eq!(tag, "opf:item");
                assert!(attrs.iter().all(|(k, _)| k != "properties"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(
            ManifestItem::new("c", "c.jpg", "image/jpeg")
                .with_property("cover-image")
                .is_cover_image()
        );
    }
}
