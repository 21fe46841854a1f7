pub mod dom;
pub mod epub;

// === 核心API重新导出 ===

/// 转换上下文与流水线入口（主要接口）
pub use epub::{convert_books, BookOutput, Context, ConvertOptions, EngineConfig};

/// 错误处理
pub use epub::{EpubError, Result};

// === 文档图节点 ===

/// 节点生命周期
pub use epub::{BookNode, FileState, XmlNode};

/// 各类节点
pub use epub::{Container, Navigation, Package, Page, Resource};

/// 目录树
pub use epub::TocTree;

// === 底层组件（高级用法） ===

/// XML树、源位置与序列化
pub use dom::{Document, NodeId, Ns, QName, SourcePos, Template};

// === 库信息 ===

/// BookForge库的版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// BookForge库的描述
pub const DESCRIPTION: &str = "一个将结构化书籍源文件转换为EPUB的文档图引擎";

// === 便捷函数 ===

/// 使用给定配置转换一个 `books.xml` 中的所有书籍
///
/// 输入根目录取 `books.xml` 所在书籍目录的上一级（`<根目录>/<书籍目录>/META-INF/books.xml`）。
///
/// # 参数
/// * `manifest` - `books.xml` 路径
/// * `options` - 输出目录和打包选项
/// * `config` - 引擎配置
///
/// # 示例
///
/// ```no_run
/// use bookforge::{ConvertOptions, EngineConfig};
///
/// let options = ConvertOptions { output: "out".into(), zip: true };
/// let books = bookforge::convert("input/book/META-INF/books.xml", &options, EngineConfig::default())?;
/// for book in books {
///     println!("{} → {}", book.slug, book.root.display());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn convert<P: AsRef<std::path::Path>>(
    manifest: P,
    options: &ConvertOptions,
    config: EngineConfig,
) -> Result<Vec<BookOutput>> {
    let manifest = epub::paths::normalize(std::path::absolute(manifest.as_ref())?);
    let base = manifest
        .parent()
        .and_then(std::path::Path::parent)
        .and_then(std::path::Path::parent)
        .unwrap_or(std::path::Path::new("/"))
        .to_path_buf();
    let ctx = Context::new(base, config);
    convert_books(&ctx, &manifest, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_description() {
        assert!(!DESCRIPTION.is_empty());
    }
}
