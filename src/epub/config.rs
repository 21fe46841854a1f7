//! 引擎配置模块
//!
//! 提供转换流水线的配置管理功能，支持从YAML文件加载配置。

use crate::epub::error::{EpubError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 转换引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 存放 `<slug>.toc.xhtml` 的目录名
    pub linked_dir: String,
    /// 资源元数据（`<name>.json`）所在的目录，相对于输入根目录
    pub resources_dir: String,
    /// 写入页面head的样式表href
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<String>,
    /// 找不到作者信息时使用的默认值
    pub default_authors: String,
    /// 书籍唯一标识符的前缀
    pub identifier_prefix: String,
    /// 页面中需要删除的属性（阅读器校验不接受这些属性）
    pub removed_attributes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            linked_dir: "IO_DISASSEMBLE_LINKED".to_string(),
            resources_dir: "IO_RESOURCES".to_string(),
            stylesheet: Some("the-style-epub.css".to_string()),
            default_authors: "OpenStax".to_string(),
            identifier_prefix: "dummy-openstax.org-id.".to_string(),
            removed_attributes: [
                "itemprop",
                "valign",
                "group-by",
                "use-subtitle",
                "cellpadding",
                "cellspacing",
                "summary",
                "frameborder",
                "align",
                "border",
                "width",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl EngineConfig {
    /// 从YAML配置文件加载
    ///
    /// 文件中缺少的字段使用默认值。
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    /// * `Result<Self>` - 加载成功返回配置实例，失败返回错误
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| EpubError::ConfigError(format!("无法读取配置文件: {}", e)))?;

        serde_yml::from_str(&content)
            .map_err(|e| EpubError::ConfigError(format!("配置文件格式错误: {}", e)))
    }

    /// 生成默认配置文件
    pub fn generate_default_config(path: impl AsRef<Path>) -> Result<()> {
        let yaml_content = serde_yml::to_string(&Self::default())
            .map_err(|e| EpubError::ConfigError(format!("序列化配置失败: {}", e)))?;

        let content_with_header = format!(
            "# bookforge 转换引擎配置文件\n# 未列出的字段使用默认值\n\n{}",
            yaml_content
        );

        fs::write(path.as_ref(), content_with_header)
            .map_err(|e| EpubError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }

    /// 有路径时从文件加载，否则使用默认配置
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookforge.yaml");
        fs::write(&path, "linked_dir: linked\nstylesheet: null\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.linked_dir, "linked");
        assert_eq!(config.stylesheet, None);
        assert_eq!(config.resources_dir, "IO_RESOURCES");
        assert!(config.removed_attributes.iter().any(|a| a == "itemprop"));
    }

    #[test]
    fn test_generated_default_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookforge.yaml");
        EngineConfig::generate_default_config(&path).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.default_authors, "OpenStax");
        assert_eq!(config.stylesheet.as_deref(), Some("the-style-epub.css"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            EngineConfig::from_file("/definitely/not/here.yaml"),
            Err(EpubError::ConfigError(_))
        ));
    }
}
