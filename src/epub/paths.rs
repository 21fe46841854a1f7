//! 路径工具
//!
//! 节点缓存以规范化的绝对路径为键。链接目标可能并不存在，
//! 所以这里只做词法上的规范化，不访问文件系统。

use std::path::{Component, Path, PathBuf};

/// 词法规范化：去掉 `.`，折叠 `..`
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// 把 `relative` 解析为绝对路径
///
/// # 参数
/// * `base` - 没有 `relative_to` 时使用的基准目录
/// * `relative` - 待解析的路径（已是绝对路径时直接规范化）
/// * `relative_to` - 可选的参照文件，按它所在的目录解析
pub fn resolve(base: &Path, relative: impl AsRef<Path>, relative_to: Option<&Path>) -> PathBuf {
    let relative = relative.as_ref();
    if relative.is_absolute() {
        return normalize(relative);
    }
    let dir = match relative_to {
        Some(file) => file.parent().unwrap_or(base).to_path_buf(),
        None => base.to_path_buf(),
    };
    normalize(dir.join(relative))
}

/// 计算从目录 `from_dir` 到 `to` 的相对路径
pub fn relative(from_dir: &Path, to: &Path) -> PathBuf {
    let from_dir = normalize(from_dir);
    let from: Vec<Component> = from_dir.components().collect();
    let target = normalize(to);
    let to_parts: Vec<Component> = target.components().collect();
    let common = from
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for part in &to_parts[common..] {
        out.push(part.as_os_str());
    }
    out
}

/// 用于href的相对路径（总是使用 `/` 分隔）
pub fn href(from_file: &Path, to: &Path) -> String {
    relative_href(from_file.parent().unwrap_or(Path::new("")), to)
}

/// 从目录出发的 `/` 分隔相对路径
pub fn relative_href(from_dir: &Path, to: &Path) -> String {
    relative(from_dir, to)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 拆分 `path#fragment`
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    }
}

/// 是否为远程（带协议）的链接
pub fn is_remote(href: &str) -> bool {
    href.starts_with("http:")
        || href.starts_with("https:")
        || href.starts_with("data:")
        || href.starts_with("mailto:")
        || href.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_parent_segments() {
        assert_eq!(
            normalize("/book/linked/../resources/./img.png"),
            PathBuf::from("/book/resources/img.png")
        );
    }

    #[test]
    fn test_resolve_relative_to_file() {
        let base = Path::new("/base");
        assert_eq!(
            resolve(base, "../resources/a.png", Some(Path::new("/book/linked/p.xhtml"))),
            PathBuf::from("/book/resources/a.png")
        );
        assert_eq!(resolve(base, "x.xhtml", None), PathBuf::from("/base/x.xhtml"));
        assert_eq!(resolve(base, "/abs/y.xhtml", None), PathBuf::from("/abs/y.xhtml"));
    }

    #[test]
    fn test_href_between_files() {
        assert_eq!(
            href(Path::new("/out/contents/p1.xhtml"), Path::new("/out/resources/a.png")),
            "../resources/a.png"
        );
        assert_eq!(
            href(Path::new("/out/p1.xhtml"), Path::new("/out/p2.xhtml")),
            "p2.xhtml"
        );
    }

    #[test]
    fn test_relative_normalizes_both_sides() {
        assert_eq!(
            relative(Path::new("/out/a/./b/.."), Path::new("/out/c/../d/e.xhtml")),
            PathBuf::from("../d/e.xhtml")
        );
        assert_eq!(relative(Path::new("/out"), Path::new("/out/x.css")), PathBuf::from("x.css"));
    }

    #[test]
    fn test_split_fragment() {
        assert_eq!(split_fragment("p.xhtml#sec"), ("p.xhtml", Some("sec")));
        assert_eq!(split_fragment("p.xhtml"), ("p.xhtml", None));
    }
}
