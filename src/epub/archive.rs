//! EPUB打包
//!
//! 把写好的EPUB目录压缩为 `.epub` 文件。

use crate::epub::error::Result;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const MIMETYPE: &str = "application/epub+zip";

/// 在EPUB根目录写入 `mimetype` 文件
pub fn write_mimetype(root: &Path) -> Result<()> {
    fs::create_dir_all(root)?;
    fs::write(root.join("mimetype"), MIMETYPE)?;
    Ok(())
}

/// 压缩目录
///
/// `mimetype` 作为第一个条目且不压缩，其余文件按路径排序后deflate压缩；
/// `.map` 文件只用于溯源，不打包。
///
/// # 参数
/// * `dir` - EPUB根目录
/// * `output` - 输出的 `.epub` 文件路径
pub fn zip_epub(dir: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(output)?);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE.as_bytes())?;

    let mut count = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "map") {
            continue;
        }
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if name == "mimetype" {
            continue;
        }
        zip.start_file(name, deflated)?;
        io::copy(&mut File::open(path)?, &mut zip)?;
        count += 1;
    }
    zip.finish()?;
    tracing::info!("打包 {} ({} 个文件)", output.display(), count + 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn test_mimetype_first_and_maps_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("book");
        fs::create_dir_all(root.join("META-INF")).unwrap();
        fs::create_dir_all(root.join("contents")).unwrap();
        write_mimetype(&root).unwrap();
        fs::write(root.join("META-INF/container.xml"), "<container/>").unwrap();
        fs::write(root.join("contents/a.xhtml"), "<html/>").unwrap();
        fs::write(root.join("contents/a.xhtml.map"), "{}").unwrap();

        let output = dir.path().join("book.epub");
        zip_epub(&root, &output).unwrap();

        let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
        {
            let mut first = archive.by_index(0).unwrap();
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), CompressionMethod::Stored);
            let mut content = String::new();
            first.read_to_string(&mut content).unwrap();
            assert_eq!(content, MIMETYPE);
        }
        assert!(archive.by_name("contents/a.xhtml").is_ok());
        assert!(archive.by_name("contents/a.xhtml.map").is_err());
    }
}
