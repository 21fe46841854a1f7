//! 书籍元数据
//!
//! 从 `<slug>.toc-metadata.json` 读取标题、修订时间、slug、许可证和语言，
//! 作者信息来自可选的 `<slug>.collection.xml`。

use crate::dom::read_xml;
use crate::epub::error::{EpubError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// 输出到 `dcterms:modified` 的时间格式
const MODIFIED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// 包文件需要的书籍元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    /// 已规范化为UTC、以 `Z` 结尾的修订时间
    pub revised: String,
    pub slug: String,
    pub license_url: String,
    pub language: String,
    pub authors: String,
}

impl BookMetadata {
    /// 读取元数据JSON，缺少任何必需键都会报错
    ///
    /// # 参数
    /// * `path` - 元数据文件路径
    /// * `authors` - 作者的初始值（通常是配置中的默认作者）
    pub fn from_sidecar(path: &Path, authors: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        let get = |pointer: &str, key: &str| {
            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| EpubError::MissingMetadata {
                    file: path.to_path_buf(),
                    key: key.to_string(),
                })
        };

        Ok(Self {
            title: get("/title", "title")?,
            revised: normalize_revised(&get("/revised", "revised")?)?,
            slug: get("/slug", "slug")?,
            license_url: get("/license/url", "license.url")?,
            language: get("/language", "language")?,
            authors: authors.to_string(),
        })
    }
}

/// 把RFC 3339时间转换为UTC并以 `Z` 结尾
pub fn normalize_revised(value: &str) -> Result<String> {
    let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|_| EpubError::InvalidDate {
        value: value.to_string(),
    })?;
    Ok(parsed.with_timezone(&Utc).format(MODIFIED_FORMAT).to_string())
}

/// 从集合元数据中读取作者，多个作者用 `, ` 连接；没有作者时返回 `None`
pub fn read_authors(collection: &Path) -> Result<Option<String>> {
    let doc = read_xml(collection)?;
    let authors: Vec<String> = doc
        .map(doc.document(), "//md:author", |id| doc.text(id).trim().to_string())?
        .into_iter()
        .filter(|name| !name.is_empty())
        .collect();
    Ok((!authors.is_empty()).then(|| authors.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SIDECAR: &str = r#"{
        "title": "College Physics",
        "revised": "2021-06-01T17:40:09.123+00:00",
        "slug": "college-physics",
        "license": {"url": "http://creativecommons.org/licenses/by/4.0/"},
        "language": "en"
    }"#;

    #[test]
    fn test_sidecar_is_read_and_date_normalized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("college-physics.toc-metadata.json");
        fs::write(&path, SIDECAR).unwrap();

        let metadata = BookMetadata::from_sidecar(&path, "OpenStax").unwrap();
        assert_eq!(metadata.title, "College Physics");
        assert_eq!(metadata.revised, "2021-06-01T17:40:09Z");
        assert_eq!(metadata.license_url, "http://creativecommons.org/licenses/by/4.0/");
        assert_eq!(metadata.authors, "OpenStax");
    }

    #[test]
    fn test_missing_key_is_reported_by_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.toc-metadata.json");
        fs::write(&path, r#"{"title": "T", "revised": "2020-01-01T00:00:00Z", "slug": "b", "language": "en"}"#).unwrap();

        match BookMetadata::from_sidecar(&path, "x") {
            Err(EpubError::MissingMetadata { key, .. }) => assert_eq!(key, "license.url"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_offsets_are_converted_to_utc() {
        assert_eq!(
            normalize_revised("2020-03-04T10:00:00-05:00").unwrap(),
            "2020-03-04T15:00:00Z"
        );
        assert!(matches!(
            normalize_revised("yesterday"),
            Err(EpubError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_authors_are_joined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.collection.xml");
        fs::write(
            &path,
            r#"<col:collection xmlns:col="http://cnx.rice.edu/collxml" xmlns:md="http://cnx.rice.edu/mdml"><col:metadata><md:author> Ada </md:author><md:author>Grace</md:author></col:metadata></col:collection>"#,
        )
        .unwrap();
        assert_eq!(read_authors(&path).unwrap().as_deref(), Some("Ada, Grace"));
    }
}
