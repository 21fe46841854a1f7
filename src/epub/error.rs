use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EpubError>;

/// 文档图引擎的错误类型
///
/// 分为三类：输入格式错误（XML语法、缺失元数据、目录结构错误）、
/// 程序不变量被破坏（`Bug`），以及底层I/O错误。
/// 尽力而为的解析失败（例如链接目标不存在）不会成为错误，只会记录警告。
#[derive(Error, Debug)]
pub enum EpubError {
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("Zip文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML语法错误 {file}:{line}:{column}: {message}")]
    XmlSyntax {
        file: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("XPath表达式错误 `{expr}`: {message}")]
    XPath { expr: String, message: String },

    #[error("XPath `{expr}` 期望恰好匹配1个节点, 实际匹配 {count} 个")]
    MatchCount { expr: String, count: usize },

    #[error("未知的命名空间前缀: {0}")]
    UnknownPrefix(String),

    #[error("元数据文件 {file} 缺少必需的键 `{key}`")]
    MissingMetadata { file: PathBuf, key: String },

    #[error("无效的修订时间: {value}")]
    InvalidDate { value: String },

    #[error("目录结构错误 {file}:{line}:{column}: {message}")]
    TocStructure {
        file: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("无法确定资源的MIME类型: {0}")]
    UnresolvedMime(PathBuf),

    #[error("目标文件已存在, 拒绝覆盖: {0}")]
    DestinationExists(PathBuf),

    #[error("{0}")]
    Bug(String),

    #[error("配置文件错误: {0}")]
    ConfigError(String),
}

impl EpubError {
    /// 构造一个程序不变量错误，消息统一以 `BUG:` 开头
    pub fn bug(message: impl AsRef<str>) -> Self {
        EpubError::Bug(format!("BUG: {}", message.as_ref()))
    }
}
