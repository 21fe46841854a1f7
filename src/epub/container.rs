//! 容器节点
//!
//! 读取 `META-INF/books.xml` 中登记的书籍，写出OCF `container.xml`。

use crate::dom::{read_xml_with_sourcemap, Document, SourcePos, Template};
use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::node::{BookNode, FileState, XmlNode};
use crate::epub::opf::Package;
use crate::epub::paths;
use crate::tpl;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Container.xml中的rootfile信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFile {
    /// 相对于EPUB根目录的路径
    pub full_path: String,
    pub media_type: String,
}

/// `books.xml` 中登记的一本书
#[derive(Debug, Clone)]
pub struct BookEntry {
    pub slug: String,
    /// 包节点（目录文件）的规范路径
    pub package: PathBuf,
    pub pos: Option<SourcePos>,
}

#[derive(Debug)]
pub struct Container {
    state: FileState,
    books: OnceCell<Vec<BookEntry>>,
}

impl Container {
    pub fn new(read_path: PathBuf) -> Self {
        Self {
            state: FileState::new(read_path),
            books: OnceCell::new(),
        }
    }

    pub fn books(&self) -> Result<&[BookEntry]> {
        self.books.get().map(Vec::as_slice).ok_or_else(|| {
            EpubError::bug(format!("容器 {} 尚未解析", self.read_path().display()))
        })
    }

    /// 取得某本书的包节点（不存在时创建，不解析）
    pub fn package(&self, ctx: &Context, entry: &BookEntry) -> Rc<Package> {
        ctx.packages.get_or_add(&entry.package, None)
    }

    /// EPUB根目录：容器写入目录（`META-INF`）的上一级
    pub fn epub_root(&self) -> PathBuf {
        let write_path = self.write_path();
        write_path
            .parent()
            .and_then(Path::parent)
            .unwrap_or(Path::new("/"))
            .to_path_buf()
    }

    /// 当前仍在缓存中的包节点对应的rootfile
    pub fn rootfiles(&self, ctx: &Context) -> Result<Vec<(RootFile, Option<SourcePos>)>> {
        let root = self.epub_root();
        Ok(self
            .books()?
            .iter()
            .filter_map(|entry| {
                let package = ctx.packages.get(&entry.package, None)?;
                Some((
                    RootFile {
                        full_path: paths::relative_href(&root, &package.write_path()),
                        media_type: PACKAGE_MEDIA_TYPE.to_string(),
                    },
                    entry.pos.clone(),
                ))
            })
            .collect())
    }
}

impl BookNode for Container {
    fn state(&self) -> &FileState {
        &self.state
    }

    fn parse(&self, ctx: &Context) -> Result<()> {
        if self.books.get().is_some() {
            return Ok(());
        }
        let read_path = self.read_path();
        let doc = read_xml_with_sourcemap(read_path)?;
        let mut books = Vec::new();
        for id in doc.find(doc.document(), "//bk:book")? {
            let slug = doc
                .attr(id, "slug")?
                .ok_or_else(|| EpubError::MissingMetadata {
                    file: read_path.to_path_buf(),
                    key: "slug".to_string(),
                })?
                .to_string();
            let relative = format!("../../{}/{}.toc.xhtml", ctx.config().linked_dir, slug);
            let package = ctx.packages.get_or_add(&relative, Some(read_path));
            books.push(BookEntry {
                slug,
                package: package.read_path().to_path_buf(),
                pos: doc.pos(id).cloned(),
            });
        }
        tracing::info!("{} 登记了 {} 本书", read_path.display(), books.len());
        let _ = self.books.set(books);
        Ok(())
    }

    fn write(&self, ctx: &Context) -> Result<()> {
        self.write_xml(ctx)
    }
}

impl XmlNode for Container {
    fn convert(&self, ctx: &Context, doc: &mut Document) -> Result<()> {
        let old_root = doc
            .root_element()
            .ok_or_else(|| EpubError::bug("books.xml 没有根元素"))?;
        let pos = doc.pos(old_root).cloned();
        let built = doc.build(
            &tpl!("cont:container" { "version" => "1.0" } [tpl!("cont:rootfiles" {} [])]),
            pos,
        )?;
        let [container] = built.as_slice() else {
            return Err(EpubError::bug("container 模板应只生成一个节点"));
        };
        let container = *container;
        let rootfiles = doc.find_one(container, "cont:rootfiles")?;
        for (rootfile, pos) in self.rootfiles(ctx)? {
            let template = Template::element(
                "cont:rootfile",
                &[
                    ("full-path", rootfile.full_path.as_str()),
                    ("media-type", rootfile.media_type.as_str()),
                ],
                vec![],
            );
            for id in doc.build(&template, pos)? {
                doc.append(rootfiles, id);
            }
        }
        doc.replace_with(old_root, container)?;
        Ok(())
    }
}
