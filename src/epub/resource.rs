//! 资源节点
//!
//! 图片、字体等二进制文件。MIME类型优先由扩展名决定，
//! 扩展名未知时读取资源目录下的 `<文件名>.json` 元数据。

use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::node::{BookNode, FileState};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

static MIME_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("svg", "image/svg+xml"),
        ("webp", "image/webp"),
        ("pdf", "application/pdf"),
        ("mp4", "video/mp4"),
        ("mp3", "audio/mpeg"),
        ("css", "text/css"),
        ("js", "text/javascript"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("otf", "font/otf"),
        ("xhtml", "application/xhtml+xml"),
        ("json", "application/json"),
    ])
});

/// 按扩展名（不区分大小写）查MIME类型
pub fn mime_from_extension(extension: &str) -> Option<&'static str> {
    MIME_TYPES.get(extension.to_ascii_lowercase().as_str()).copied()
}

/// 资源元数据文件
#[derive(Debug, Deserialize)]
struct ResourceSidecar {
    original_name: Option<String>,
    mime_type: Option<String>,
}

/// 解析后的资源信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    pub mime_type: String,
    /// 输出文件使用的扩展名（不含点）
    pub extension: Option<String>,
}

#[derive(Debug)]
pub struct Resource {
    state: FileState,
    data: OnceCell<ResourceData>,
}

impl Resource {
    pub fn new(read_path: PathBuf) -> Self {
        Self {
            state: FileState::new(read_path),
            data: OnceCell::new(),
        }
    }

    /// 解析后的数据；尚未解析时返回BUG错误
    pub fn data(&self) -> Result<&ResourceData> {
        self.data.get().ok_or_else(|| {
            EpubError::bug(format!("资源 {} 尚未解析", self.read_path().display()))
        })
    }

    pub fn mime_type(&self) -> Result<&str> {
        Ok(&self.data()?.mime_type)
    }

    fn resolve(&self, ctx: &Context) -> Result<ResourceData> {
        let path = self.read_path();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        if let Some(mime) = extension.as_deref().and_then(mime_from_extension) {
            return Ok(ResourceData {
                mime_type: mime.to_string(),
                extension,
            });
        }

        let name = path
            .file_name()
            .ok_or_else(|| EpubError::UnresolvedMime(path.to_path_buf()))?;
        let mut sidecar_name = name.to_os_string();
        sidecar_name.push(".json");
        let sidecar = ctx.resources_dir().join(sidecar_name);
        let content = match fs::read_to_string(&sidecar) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EpubError::UnresolvedMime(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar: ResourceSidecar = serde_json::from_str(&content)?;
        match (sidecar.original_name, sidecar.mime_type) {
            (Some(original_name), Some(mime_type)) => Ok(ResourceData {
                mime_type,
                extension: original_name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_string()),
            }),
            _ => Err(EpubError::UnresolvedMime(path.to_path_buf())),
        }
    }
}

impl BookNode for Resource {
    fn state(&self) -> &FileState {
        &self.state
    }

    fn parse(&self, ctx: &Context) -> Result<()> {
        if self.data.get().is_some() {
            return Ok(());
        }
        let data = self.resolve(ctx)?;
        tracing::debug!("资源 {} → {}", self.read_path().display(), data.mime_type);
        let _ = self.data.set(data);
        Ok(())
    }

    /// 独占复制：目标已存在时失败，且不改动已有文件
    fn write(&self, _ctx: &Context) -> Result<()> {
        let output = self.write_path();
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut target = match OpenOptions::new().write(true).create_new(true).open(&output) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(EpubError::DestinationExists(output));
            }
            Err(e) => return Err(e.into()),
        };
        let mut source = fs::File::open(self.read_path())?;
        io::copy(&mut source, &mut target)?;
        Ok(())
    }
}

/// 是否为字体文件
pub fn is_font(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_from_extension)
        .is_some_and(|mime| mime.starts_with("font/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::config::EngineConfig;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        Context::new(dir.path(), EngineConfig::default())
    }

    #[test]
    fn test_known_extension_needs_no_sidecar() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let resource = ctx.resources.get_or_add("resources/doc.pdf", None);
        resource.parse(&ctx).unwrap();
        assert_eq!(resource.mime_type().unwrap(), "application/pdf");
    }

    #[test]
    fn test_unknown_extension_uses_sidecar() {
        let dir = TempDir::new().unwrap();
        let sidecars = dir.path().join("IO_RESOURCES");
        fs::create_dir_all(&sidecars).unwrap();
        fs::write(
            sidecars.join("clip.xyz.json"),
            r#"{"original_name": "lecture.mp4", "mime_type": "video/mp4"}"#,
        )
        .unwrap();

        let ctx = context(&dir);
        let resource = ctx.resources.get_or_add("resources/clip.xyz", None);
        resource.parse(&ctx).unwrap();
        let data = resource.data().unwrap();
        assert_eq!(data.mime_type, "video/mp4");
        assert_eq!(data.extension.as_deref(), Some("mp4"));
    }

    #[test]
    fn test_unknown_extension_without_sidecar_is_unresolved() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let resource = ctx.resources.get_or_add("resources/blob.xyz", None);
        assert!(matches!(
            resource.parse(&ctx),
            Err(EpubError::UnresolvedMime(_))
        ));
        assert!(resource.data().is_err());
    }

    #[test]
    fn test_sidecar_missing_mime_type_is_unresolved() {
        let dir = TempDir::new().unwrap();
        let sidecars = dir.path().join("IO_RESOURCES");
        fs::create_dir_all(&sidecars).unwrap();
        fs::write(sidecars.join("blob.xyz.json"), r#"{"original_name": "a.bin"}"#).unwrap();

        let ctx = context(&dir);
        let resource = ctx.resources.get_or_add("resources/blob.xyz", None);
        assert!(matches!(
            resource.parse(&ctx),
            Err(EpubError::UnresolvedMime(_))
        ));
    }

    #[test]
    fn test_exclusive_copy_refuses_existing_destination() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("resources/a.png");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"new bytes").unwrap();
        let output = dir.path().join("out/a.png");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, b"old bytes").unwrap();

        let ctx = context(&dir);
        let resource = ctx.resources.get_or_add(&input, None);
        resource.rename(&output, None);
        assert!(matches!(
            resource.write(&ctx),
            Err(EpubError::DestinationExists(_))
        ));
        assert_eq!(fs::read(&output).unwrap(), b"old bytes");
    }

    #[test]
    fn test_copy_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, b"png").unwrap();

        let ctx = context(&dir);
        let resource = ctx.resources.get_or_add(&input, None);
        resource.rename("out/nested/a.png", Some(dir.path().join("x").as_path()));
        resource.write(&ctx).unwrap();
        assert_eq!(fs::read(dir.path().join("out/nested/a.png")).unwrap(), b"png");
    }

    #[test]
    fn test_is_font() {
        assert!(is_font(Path::new("/x/Roboto.WOFF2")));
        assert!(!is_font(Path::new("/x/a.png")));
    }
}
