//! 转换流水线
//!
//! 对容器中登记的每本书依次执行 parse → rename → write，
//! 每本书输出到 `<输出目录>/<slug>/`，处理完后清空该书的页面和资源。

use crate::epub::archive;
use crate::epub::container::{BookEntry, Container};
use crate::epub::context::Context;
use crate::epub::error::Result;
use crate::epub::node::BookNode;
use crate::epub::opf::Package;
use crate::epub::paths;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// 流水线选项
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// 输出根目录
    pub output: PathBuf,
    /// 是否额外打包为 `<slug>.epub`
    pub zip: bool,
}

/// 一本书的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookOutput {
    pub slug: String,
    /// EPUB目录
    pub root: PathBuf,
    /// 打包后的文件
    pub epub: Option<PathBuf>,
}

/// 转换 `manifest`（`books.xml`）中登记的所有书籍
pub fn convert_books(
    ctx: &Context,
    manifest: &Path,
    options: &ConvertOptions,
) -> Result<Vec<BookOutput>> {
    let container = ctx.containers.get_or_add(manifest, None);
    container.parse(ctx)?;
    let books = container.books()?.to_vec();
    let options = ConvertOptions {
        output: paths::normalize(std::path::absolute(&options.output)?),
        zip: options.zip,
    };

    let packages: Vec<Rc<Package>> = books
        .iter()
        .map(|entry| container.package(ctx, entry))
        .collect();

    let mut outputs = Vec::with_capacity(books.len());
    for (entry, package) in books.iter().zip(&packages) {
        // 容器只列出缓存中的包，写这本书时暂时移出其他书的包
        let others: Vec<&Rc<Package>> = packages
            .iter()
            .filter(|other| !Rc::ptr_eq(other, package))
            .collect();
        for other in &others {
            ctx.packages.remove(other.read_path());
        }
        let output = convert_book(ctx, &container, entry, &options);
        for other in others {
            ctx.packages.insert(other.read_path(), Rc::clone(other));
        }
        ctx.clear_book();
        outputs.push(output?);
    }
    Ok(outputs)
}

fn convert_book(
    ctx: &Context,
    container: &Container,
    entry: &BookEntry,
    options: &ConvertOptions,
) -> Result<BookOutput> {
    let root = options.output.join(&entry.slug);
    let contents = root.join("contents");
    tracing::info!("转换 {} → {}", entry.slug, root.display());
    if root.exists() {
        tracing::debug!("清理旧的输出目录 {}", root.display());
        fs::remove_dir_all(&root)?;
    }

    let package = container.package(ctx, entry);
    package.parse(ctx)?;
    let navigation = ctx.navigations.get_or_add(package.read_path(), None);
    navigation.parse(ctx)?;

    let stylesheet = copy_stylesheet(ctx, container, &package, &contents)?;

    package.rename(contents.join(format!("{}.opf", entry.slug)), None);
    navigation.rename(contents.join(format!("{}.ncx", entry.slug)), None);
    container.rename(root.join("META-INF/container.xml"), None);
    for page in ctx.pages.all() {
        if let Some(name) = page.read_path().file_name() {
            page.rename(contents.join(name), None);
        }
    }
    let fonts = package.fonts();
    for resource in ctx.resources.all() {
        let read_path = resource.read_path().to_path_buf();
        let font_css = stylesheet.as_ref().filter(|_| fonts.contains(&read_path));
        if let Some((source_css, _)) = font_css {
            let css_dir = source_css.parent().unwrap_or(Path::new("/"));
            resource.rename(contents.join(paths::relative(css_dir, &read_path)), None);
            continue;
        }
        let stem = read_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match &resource.data()?.extension {
            Some(extension) => format!("{}.{}", stem, extension),
            None => stem,
        };
        resource.rename(root.join("resources").join(name), None);
    }

    archive::write_mimetype(&root)?;
    for resource in ctx.resources.all() {
        resource.write(ctx)?;
    }
    for page in ctx.pages.all() {
        page.write(ctx)?;
    }
    package.write(ctx)?;
    navigation.write(ctx)?;
    container.write(ctx)?;

    let epub = if options.zip {
        let file = options.output.join(format!("{}.epub", entry.slug));
        archive::zip_epub(&root, &file)?;
        Some(file)
    } else {
        None
    };
    Ok(BookOutput {
        slug: entry.slug.clone(),
        root,
        epub,
    })
}

/// 把书籍目录下的样式表复制到输出，并登记其中引用的字体
///
/// # 返回值
/// * `Result<Option<(PathBuf, PathBuf)>>` - （源样式表, 输出样式表）；没有样式表时为 `None`
fn copy_stylesheet(
    ctx: &Context,
    container: &Container,
    package: &Package,
    contents: &Path,
) -> Result<Option<(PathBuf, PathBuf)>> {
    let Some(name) = &ctx.config().stylesheet else {
        return Ok(None);
    };
    // books.xml位于 `<书籍目录>/META-INF/`
    let book_dir = container
        .read_path()
        .parent()
        .and_then(Path::parent)
        .unwrap_or(ctx.base());
    let source = book_dir.join(name);
    if !source.is_file() {
        tracing::debug!("没有样式表 {}", source.display());
        return Ok(None);
    }
    let fonts = package.discover_fonts(ctx, &source)?;
    tracing::debug!("样式表 {} 引用了 {} 个字体", source.display(), fonts.len());
    let target = contents.join(name);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&source, &target)?;
    Ok(Some((source, target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::read_xml;
    use crate::epub::config::EngineConfig;
    use tempfile::TempDir;

    const BOOKS: &str = r#"<container xmlns="https://openstax.org/namespaces/book-container" version="1">
  <book slug="a"/>
  <book slug="b"/>
</container>"#;

    fn book(linked: &Path, slug: &str) {
        fs::write(
            linked.join(format!("{}.toc.xhtml", slug)),
            format!(
                r#"<html xmlns="http://www.w3.org/1999/xhtml"><head/><body><nav><ol><li><a href="{0}1.xhtml">One</a></li></ol></nav></body></html>"#,
                slug
            ),
        )
        .unwrap();
        fs::write(
            linked.join(format!("{}.toc-metadata.json", slug)),
            format!(
                r#"{{"title": "{0}", "revised": "2020-01-01T00:00:00Z", "slug": "{0}", "license": {{"url": "http://l"}}, "language": "en"}}"#,
                slug
            ),
        )
        .unwrap();
        fs::write(
            linked.join(format!("{}1.xhtml", slug)),
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><head/><body><p>x</p></body></html>"#,
        )
        .unwrap();
    }

    #[test]
    fn test_packages_keep_one_instance_across_books() {
        let dir = TempDir::new().unwrap();
        let linked = dir.path().join("IO_DISASSEMBLE_LINKED");
        fs::create_dir_all(&linked).unwrap();
        fs::create_dir_all(dir.path().join("book/META-INF")).unwrap();
        fs::write(dir.path().join("book/META-INF/books.xml"), BOOKS).unwrap();
        book(&linked, "a");
        book(&linked, "b");

        let ctx = Context::new(dir.path(), EngineConfig::default());
        let manifest = dir.path().join("book/META-INF/books.xml");
        let container = ctx.containers.get_or_add(&manifest, None);
        container.parse(&ctx).unwrap();
        let a = ctx.packages.get(linked.join("a.toc.xhtml"), None).unwrap();
        let b = ctx.packages.get(linked.join("b.toc.xhtml"), None).unwrap();

        let options = ConvertOptions {
            output: dir.path().join("out"),
            zip: false,
        };
        let outputs = convert_books(&ctx, &manifest, &options).unwrap();
        assert_eq!(outputs.len(), 2);

        assert_eq!(ctx.packages.size(), 2);
        assert!(Rc::ptr_eq(&a, &ctx.packages.get(linked.join("a.toc.xhtml"), None).unwrap()));
        assert!(Rc::ptr_eq(&b, &ctx.packages.get(linked.join("b.toc.xhtml"), None).unwrap()));
        assert!(a.is_parsed() && b.is_parsed());
        assert_eq!(ctx.pages.size(), 0);

        for slug in ["a", "b"] {
            let doc = read_xml(dir.path().join(format!("out/{}/META-INF/container.xml", slug))).unwrap();
            let rootfiles = doc.find(doc.document(), "//cont:rootfile").unwrap();
            assert_eq!(rootfiles.len(), 1);
            assert_eq!(
                doc.attr(rootfiles[0], "full-path").unwrap(),
                Some(format!("contents/{}.opf", slug).as_str())
            );
        }
    }
}
