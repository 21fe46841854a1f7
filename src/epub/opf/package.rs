//! 包节点
//!
//! 读取路径是 `<slug>.toc.xhtml`。解析时读取书籍元数据、目录树，并遍历目录可达的全部页面和资源；
//! 写入时输出OPF包文件，并在同目录输出EPUB3导航文档（改写链接后的目录）。

use crate::dom::{
    read_xml_with_sourcemap, write_xml_with_sourcemap, Child, Document, SourcePos, Template,
};
use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::ncx::{parse_toc, TocTree};
use crate::epub::node::{BookNode, FileState, XmlNode};
use crate::epub::opf::manifest::ManifestItem;
use crate::epub::opf::metadata::{read_authors, BookMetadata};
use crate::epub::opf::spine::{spine_order, SpineItem};
use crate::epub::paths;
use crate::epub::resource::is_font;
use crate::tpl;
use regex::Regex;
use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

const TOC_SUFFIX: &str = ".toc.xhtml";
const CSS_URL: &str = r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#;

/// 包解析的结果
#[derive(Debug, Clone)]
pub struct PackageData {
    pub metadata: BookMetadata,
    pub toc: Vec<TocTree>,
    /// 封面图片的规范读取路径
    pub cover: Option<PathBuf>,
    /// 遍历到的所有页面
    pub pages: BTreeSet<PathBuf>,
    /// 页面引用的所有资源（不含封面和字体）
    pub resources: BTreeSet<PathBuf>,
}

#[derive(Debug)]
pub struct Package {
    state: FileState,
    data: OnceCell<PackageData>,
    fonts: RefCell<BTreeSet<PathBuf>>,
}

impl Package {
    pub fn new(read_path: PathBuf) -> Self {
        Self {
            state: FileState::new(read_path),
            data: OnceCell::new(),
            fonts: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn data(&self) -> Result<&PackageData> {
        self.data.get().ok_or_else(|| {
            EpubError::bug(format!("包 {} 尚未解析", self.read_path().display()))
        })
    }

    pub fn is_parsed(&self) -> bool {
        self.data.get().is_some()
    }

    /// 目录文件名去掉 `.toc.xhtml` 后的部分，伴随文件都以它命名
    pub fn book_stem(&self) -> String {
        let name = self
            .read_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.strip_suffix(TOC_SUFFIX) {
            Some(stem) => stem.to_string(),
            None => self
                .read_path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(name),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let dir = self.read_path().parent().unwrap_or(Path::new(""));
        dir.join(format!("{}{}", self.book_stem(), suffix))
    }

    /// 书籍的唯一标识符
    pub fn identifier(&self, ctx: &Context) -> Result<String> {
        Ok(format!(
            "{}{}",
            ctx.config().identifier_prefix,
            self.data()?.metadata.slug
        ))
    }

    /// EPUB3导航文档的写入路径
    pub fn nav_path(&self) -> PathBuf {
        self.write_path().with_extension("xhtml")
    }

    /// 登记一个字体文件，它会出现在清单中
    pub fn register_font(&self, ctx: &Context, path: &Path) -> Result<()> {
        let font = ctx.resources.get_or_add(path, None);
        font.parse(ctx)?;
        self.fonts.borrow_mut().insert(font.read_path().to_path_buf());
        Ok(())
    }

    /// 扫描样式表中的 `url(...)`，登记其中存在的字体文件
    ///
    /// # 返回值
    /// * `Result<Vec<PathBuf>>` - 登记的字体路径
    pub fn discover_fonts(&self, ctx: &Context, css_path: &Path) -> Result<Vec<PathBuf>> {
        let css = fs::read_to_string(css_path)?;
        let pattern = Regex::new(CSS_URL).map_err(|e| EpubError::bug(e.to_string()))?;
        let mut found = Vec::new();
        for capture in pattern.captures_iter(&css) {
            let url = capture[1].trim();
            if paths::is_remote(url) {
                continue;
            }
            let (target, _) = paths::split_fragment(url);
            let target = ctx.resources.resolve(target, Some(css_path));
            if !is_font(&target) {
                continue;
            }
            if !target.is_file() {
                tracing::warn!("{}: 字体文件不存在, 已忽略: {}", css_path.display(), url);
                continue;
            }
            self.register_font(ctx, &target)?;
            if !found.contains(&target) {
                found.push(target);
            }
        }
        Ok(found)
    }

    pub fn fonts(&self) -> Vec<PathBuf> {
        self.fonts.borrow().iter().cloned().collect()
    }

    /// 页面的阅读顺序
    pub fn spine(&self, ctx: &Context) -> Result<Vec<PathBuf>> {
        spine_order(ctx, &self.data()?.toc)
    }

    /// 从目录出发，解析所有可达页面和它们引用的资源
    fn traverse(
        &self,
        ctx: &Context,
        toc: &[TocTree],
    ) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
        let mut visited = HashSet::new();
        let mut pages = BTreeSet::new();
        let mut resources = BTreeSet::new();
        let mut pending: VecDeque<PathBuf> = crate::epub::ncx::flatten(toc).into();

        while let Some(path) = pending.pop_front() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let page = ctx.pages.get_or_add(&path, None);
            page.parse(ctx)?;
            let data = page.data()?;
            for resource in &data.resources {
                ctx.resources.get_or_add(resource, None).parse(ctx)?;
                resources.insert(resource.clone());
            }
            for link in &data.pages {
                if !visited.contains(link) {
                    pending.push_back(link.clone());
                }
            }
            pages.insert(path);
        }
        Ok((pages, resources))
    }

    /// 清单项，href相对于OPF写入路径
    pub fn manifest(&self, ctx: &Context) -> Result<Vec<ManifestItem>> {
        let data = self.data()?;
        let opf = self.write_path();
        let mut items = Vec::new();

        if let Some(cover) = &data.cover {
            let resource = resource_node(ctx, cover)?;
            items.push(
                ManifestItem::new(
                    "cover-image",
                    paths::href(&opf, &resource.write_path()),
                    resource.mime_type()?,
                )
                .with_property("cover-image"),
            );
        }

        items.push(
            ManifestItem::new(
                "nav",
                paths::href(&opf, &self.nav_path()),
                "application/xhtml+xml",
            )
            .with_property("nav"),
        );
        if let Some(navigation) = ctx.navigations.get(self.read_path(), None) {
            items.push(ManifestItem::new(
                "ncx",
                paths::href(&opf, &navigation.write_path()),
                "application/x-dtbncx+xml",
            ));
        }
        if let Some(stylesheet) = &ctx.config().stylesheet {
            let path = paths::resolve(Path::new("/"), stylesheet, Some(&opf));
            if path.is_file() {
                items.push(ManifestItem::new(
                    "stylesheet",
                    paths::href(&opf, &path),
                    "text/css",
                ));
            }
        }

        for (i, path) in self.spine(ctx)?.iter().enumerate() {
            let page = ctx
                .pages
                .get(path, None)
                .ok_or_else(|| EpubError::bug(format!("页面不在缓存中: {}", path.display())))?;
            let flags = page.data()?;
            let mut item = ManifestItem::new(
                page_id(i),
                paths::href(&opf, &page.write_path()),
                "application/xhtml+xml",
            );
            if flags.has_math {
                item = item.with_property("mathml");
            }
            if flags.has_remote_resources {
                item = item.with_property("remote-resources");
            }
            items.push(item);
        }

        let resources = data
            .resources
            .iter()
            .filter(|r| data.cover.as_ref() != Some(*r))
            .map(|r| ("resource", r.clone()));
        let fonts = self.fonts().into_iter().map(|f| ("font", f));
        let mut counters: HashMap<&str, usize> = HashMap::new();
        for (kind, path) in resources.chain(fonts) {
            let resource = resource_node(ctx, &path)?;
            let n = counters.entry(kind).or_insert(0);
            *n += 1;
            items.push(ManifestItem::new(
                format!("{}-{}", kind, n),
                paths::href(&opf, &resource.write_path()),
                resource.mime_type()?,
            ));
        }
        Ok(items)
    }

    fn metadata_template(&self, ctx: &Context) -> Result<Template> {
        let data = self.data()?;
        let metadata = &data.metadata;
        let mut children = vec![
            tpl!("dc:title" {} [metadata.title.as_str()]),
            tpl!("dc:language" {} [metadata.language.as_str()]),
            tpl!("dc:identifier" { "id" => "uid" } [self.identifier(ctx)?]),
            tpl!("dc:creator" {} [metadata.authors.as_str()]),
            tpl!("opf:meta" { "property" => "dcterms:modified" } [metadata.revised.as_str()]),
            tpl!("opf:meta" { "property" => "dcterms:license" } [metadata.license_url.as_str()]),
        ];
        if data.cover.is_some() {
            children.push(tpl!("opf:meta" { "name" => "cover", "content" => "cover-image" } []));
        }
        Ok(Template::element("opf:metadata", &[], children))
    }

    /// 改写目录文档，得到EPUB3导航文档
    pub fn convert_nav(&self, ctx: &Context, doc: &mut Document) -> Result<()> {
        let data = self.data()?;
        let toc_path = self.read_path().to_path_buf();
        let nav_path = self.nav_path();
        let root = doc.document();

        doc.for_each(root, "//h:nav", |doc, nav| doc.set_attr(nav, "epub:type", "toc"))?;
        doc.for_each(root, "//h:nav//h:a[@href]", |doc, link| {
            let Some(href) = doc.attr(link, "href")?.map(str::to_string) else {
                return Ok(());
            };
            let (target, fragment) = paths::split_fragment(&href);
            if target.is_empty() || paths::is_remote(target) {
                return Ok(());
            }
            let Some(page) = ctx.pages.get(target, Some(&toc_path)) else {
                return Ok(());
            };
            let mut new_href = paths::href(&nav_path, &page.write_path());
            if let Some(fragment) = fragment {
                new_href.push('#');
                new_href.push_str(fragment);
            }
            doc.set_attr(link, "href", new_href)
        })?;

        if let Some(&head) = doc.find(root, "//h:head")?.first() {
            let mut children = vec![tpl!("h:title" {} [data.metadata.title.as_str()])];
            if let Some(stylesheet) = &ctx.config().stylesheet {
                children.push(tpl!("h:link" {
                    "rel" => "stylesheet",
                    "type" => "text/css",
                    "href" => stylesheet,
                } []));
            }
            let pos = doc.pos(head).cloned();
            let built = doc.build(&Template::Fragment(children), pos)?;
            doc.set_children(head, built.into_iter().map(Child::Node).collect());
        }
        Ok(())
    }
}

fn page_id(index: usize) -> String {
    format!("page-{}", index + 1)
}

fn resource_node(
    ctx: &Context,
    path: &Path,
) -> Result<std::rc::Rc<crate::epub::resource::Resource>> {
    ctx.resources
        .get(path, None)
        .ok_or_else(|| EpubError::bug(format!("资源不在缓存中: {}", path.display())))
}

/// 目录叶子所在的源位置，供spine引用使用
fn leaf_positions(toc: &[TocTree], out: &mut HashMap<PathBuf, SourcePos>) {
    for tree in toc {
        match tree {
            TocTree::Leaf { page, pos, .. } => {
                if let Some(pos) = pos {
                    out.entry(page.clone()).or_insert_with(|| pos.clone());
                }
            }
            TocTree::Inner { children, .. } => leaf_positions(children, out),
        }
    }
}

impl BookNode for Package {
    fn state(&self) -> &FileState {
        &self.state
    }

    fn parse(&self, ctx: &Context) -> Result<()> {
        if self.is_parsed() {
            return Ok(());
        }
        let toc_path = self.read_path().to_path_buf();
        tracing::debug!("解析包 {}", toc_path.display());

        let mut metadata = BookMetadata::from_sidecar(
            &self.sibling(".toc-metadata.json"),
            &ctx.config().default_authors,
        )?;
        let collection = self.sibling(".collection.xml");
        if collection.is_file() {
            if let Some(authors) = read_authors(&collection)? {
                metadata.authors = authors;
            }
        }

        let cover_path = self.sibling("-cover.jpg");
        let cover = if cover_path.is_file() {
            let resource = ctx.resources.get_or_add(&cover_path, None);
            resource.parse(ctx)?;
            Some(resource.read_path().to_path_buf())
        } else {
            None
        };

        let doc = read_xml_with_sourcemap(&toc_path)?;
        let toc = parse_toc(&doc, ctx, &toc_path)?;
        let (pages, resources) = self.traverse(ctx, &toc)?;
        tracing::info!(
            "书籍 {}: {} 个页面, {} 个资源",
            metadata.slug,
            pages.len(),
            resources.len()
        );

        let _ = self.data.set(PackageData {
            metadata,
            toc,
            cover,
            pages,
            resources,
        });
        Ok(())
    }

    /// 写出OPF和导航文档
    fn write(&self, ctx: &Context) -> Result<()> {
        self.write_xml(ctx)?;
        let mut doc = read_xml_with_sourcemap(self.read_path())?;
        self.convert_nav(ctx, &mut doc)?;
        write_xml_with_sourcemap(self.nav_path(), &doc)
    }
}

impl XmlNode for Package {
    /// 用生成的 `package` 根元素替换目录文档的根元素
    fn convert(&self, ctx: &Context, doc: &mut Document) -> Result<()> {
        let data = self.data()?;
        let old_root = doc
            .root_element()
            .ok_or_else(|| EpubError::bug("目录文档没有根元素"))?;
        let pos = doc.pos(old_root).cloned();

        let manifest: Vec<Template> = self
            .manifest(ctx)?
            .iter()
            .map(ManifestItem::to_template)
            .collect();
        let mut spine_attrs = Vec::new();
        if ctx.navigations.get(self.read_path(), None).is_some() {
            spine_attrs.push(("toc", "ncx"));
        }

        let template = tpl!("opf:package" {
            "version" => "3.0",
            "unique-identifier" => "uid",
            "xml:lang" => data.metadata.language,
        } [
            self.metadata_template(ctx)?,
            Template::element("opf:manifest", &[], manifest),
        ]);
        let built = doc.build(&template, pos.clone())?;
        let [package] = built.as_slice() else {
            return Err(EpubError::bug("package 模板应只生成一个节点"));
        };
        let package = *package;

        let spine = doc.create("opf:spine", &spine_attrs, vec![], pos.clone())?;
        let mut positions = HashMap::new();
        leaf_positions(&data.toc, &mut positions);
        for (i, path) in self.spine(ctx)?.iter().enumerate() {
            let item_pos = positions.get(path).cloned().or_else(|| pos.clone());
            let built = doc.build(&SpineItem::new(page_id(i)).to_template(), item_pos)?;
            for id in built {
                doc.append(spine, id);
            }
        }
        doc.append(package, spine);
        doc.replace_with(old_root, package)?;
        Ok(())
    }
}
