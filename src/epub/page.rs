//! 页面节点
//!
//! 解析阶段发现页面之间的链接和页面引用的资源，计算标题和内容标记；
//! 转换阶段把链接改写到新的写入位置，并清理阅读器不接受的标记。

use crate::dom::{read_xml_with_sourcemap, Child, Document, NodeId, Ns, QName, Template};
use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::node::{BookNode, FileState, XmlNode};
use crate::epub::paths;
use crate::tpl;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};

/// 没有任何可识别标题时使用的标题
pub const UNTITLED: &str = "untitled";

/// 指向其他页面的链接：排除页内锚点、外部链接和资源目录
const PAGE_LINKS: &str = r##"//h:a[@href and not(starts-with(@href, "#") or starts-with(@href, "http:") or starts-with(@href, "https:") or starts-with(@href, "mailto:") or starts-with(@href, "../resources/"))]"##;

/// 资源引用：（选择器, 保存路径的属性）
const RESOURCE_LINKS: [(&str, &str); 4] = [
    ("//h:img[@src]", "src"),
    (r#"//h:a[starts-with(@href, "../resources/")]"#, "href"),
    ("//h:object[@data]", "data"),
    ("//h:embed[@src]", "src"),
];

/// 依次尝试的标题位置
const TITLE_SELECTORS: [&str; 3] = [
    r#"//h:h1[@data-type="document-title"]"#,
    r#"//h:h2[@data-type="document-title"]"#,
    r#"//h:div[@data-type="composite-page"]/h:h3[@data-type="title"]"#,
];

const MATH: &str = "//h:math | //m:math";
const REMOTE_RESOURCES: &str = "//h:iframe | //h:object/h:embed";
const LINKED_IFRAMES: &str =
    r#"//*[contains(@class, "os-has-iframe") and contains(@class, "os-has-link")]//h:iframe"#;

/// 页面解析的结果
#[derive(Debug, Clone, Default)]
pub struct PageData {
    pub title: String,
    /// 页面包含MathML
    pub has_math: bool,
    /// 页面嵌入了远程内容
    pub has_remote_resources: bool,
    /// 链接到的其他页面（按出现顺序，去重）
    pub pages: Vec<PathBuf>,
    /// 引用的资源（按出现顺序，去重）
    pub resources: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct Page {
    state: FileState,
    data: OnceCell<PageData>,
}

fn describe(doc: &Document, id: NodeId, fallback: &Path) -> String {
    match doc.pos(id) {
        Some(pos) => pos.to_string(),
        None => fallback.display().to_string(),
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) {
    if !list.contains(&path) {
        list.push(path);
    }
}

impl Page {
    pub fn new(read_path: PathBuf) -> Self {
        Self {
            state: FileState::new(read_path),
            data: OnceCell::new(),
        }
    }

    pub fn data(&self) -> Result<&PageData> {
        self.data.get().ok_or_else(|| {
            EpubError::bug(format!("页面 {} 尚未解析", self.read_path().display()))
        })
    }

    pub fn is_parsed(&self) -> bool {
        self.data.get().is_some()
    }

    fn title(doc: &Document) -> Result<String> {
        for selector in TITLE_SELECTORS {
            if let Some(&id) = doc.find(doc.document(), selector)?.first() {
                let title = doc.text(id).split_whitespace().collect::<Vec<_>>().join(" ");
                if !title.is_empty() {
                    return Ok(title);
                }
            }
        }
        Ok(UNTITLED.to_string())
    }

    fn discover(&self, ctx: &Context, doc: &Document) -> Result<PageData> {
        let read_path = self.read_path();
        let root = doc.document();
        let mut data = PageData {
            title: Self::title(doc)?,
            has_math: doc.has(root, MATH)?,
            has_remote_resources: doc.has(root, REMOTE_RESOURCES)?,
            ..PageData::default()
        };

        for id in doc.find(root, PAGE_LINKS)? {
            let Some(href) = doc.attr(id, "href")? else {
                continue;
            };
            let (target, _) = paths::split_fragment(href);
            if target.is_empty() || paths::is_remote(target) {
                continue;
            }
            let target = ctx.pages.resolve(target, Some(read_path));
            if target == read_path {
                continue;
            }
            if !target.is_file() {
                tracing::warn!(
                    "{}: 链接的页面不存在, 已忽略: {}",
                    describe(doc, id, read_path),
                    href
                );
                continue;
            }
            ctx.pages.get_or_add(&target, None);
            push_unique(&mut data.pages, target);
        }

        for (selector, attr) in RESOURCE_LINKS {
            for id in doc.find(root, selector)? {
                let Some(href) = doc.attr(id, attr)? else {
                    continue;
                };
                let (target, _) = paths::split_fragment(href);
                if target.is_empty() || paths::is_remote(target) {
                    continue;
                }
                let target = ctx.resources.resolve(target, Some(read_path));
                if !target.is_file() {
                    tracing::warn!(
                        "{}: 引用的资源不存在, 已忽略: {}",
                        describe(doc, id, read_path),
                        href
                    );
                    continue;
                }
                ctx.resources.get_or_add(&target, None);
                push_unique(&mut data.resources, target);
            }
        }
        Ok(data)
    }

    /// 把 `attr` 中的路径改写为从本页写入位置到目标写入位置的相对路径，保留锚点
    fn relink(
        doc: &mut Document,
        id: NodeId,
        attr: &str,
        write_path: &Path,
        target_write_path: impl Fn(&str) -> Option<PathBuf>,
    ) -> Result<()> {
        let Some(href) = doc.attr(id, attr)?.map(str::to_string) else {
            return Ok(());
        };
        let (target, fragment) = paths::split_fragment(&href);
        if target.is_empty() || paths::is_remote(target) {
            return Ok(());
        }
        let Some(destination) = target_write_path(target) else {
            return Ok(());
        };
        let mut new_href = paths::href(write_path, &destination);
        if let Some(fragment) = fragment {
            new_href.push('#');
            new_href.push_str(fragment);
        }
        doc.set_attr(id, attr, new_href)
    }
}

impl BookNode for Page {
    fn state(&self) -> &FileState {
        &self.state
    }

    fn parse(&self, ctx: &Context) -> Result<()> {
        if self.is_parsed() {
            return Ok(());
        }
        tracing::debug!("解析页面 {}", self.read_path().display());
        let doc = read_xml_with_sourcemap(self.read_path())?;
        let data = self.discover(ctx, &doc)?;
        let _ = self.data.set(data);
        Ok(())
    }

    fn write(&self, ctx: &Context) -> Result<()> {
        self.write_xml(ctx)
    }
}

impl XmlNode for Page {
    fn convert(&self, ctx: &Context, doc: &mut Document) -> Result<()> {
        let data = self.data()?;
        let read_path = self.read_path().to_path_buf();
        let write_path = self.write_path();
        let root = doc.document();

        for (selector, attr) in RESOURCE_LINKS {
            doc.for_each(root, selector, |doc, id| {
                Self::relink(doc, id, attr, &write_path, |target| {
                    ctx.resources
                        .get(target, Some(&read_path))
                        .map(|r| r.write_path())
                })
            })?;
        }

        if let Some(&head) = doc.find(root, "//h:head")?.first() {
            let mut children = vec![tpl!("h:title" {} [data.title.as_str()])];
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

        // 作为XHTML元素写出的MathML整体移入MathML命名空间
        for id in doc.find(root, "//h:math | //h:math//*")? {
            if let Some(name) = doc.name(id) {
                if name.ns.as_deref() == Some(Ns::Xhtml.uri()) {
                    let local = name.local.clone();
                    doc.set_name(id, QName::in_ns(Ns::MathMl, local));
                }
            }
        }
        doc.for_each(root, "//m:annotation-xml", |doc, id| {
            doc.remove(id);
            Ok(())
        })?;

        for attr in &ctx.config().removed_attributes {
            doc.for_each(root, &format!("//*[@{}]", attr), |doc, id| {
                doc.remove_attr(id, attr).map(|_| ())
            })?;
        }

        doc.for_each(root, "//h:script | //h:style", |doc, id| {
            doc.remove(id);
            Ok(())
        })?;
        doc.for_each(root, LINKED_IFRAMES, |doc, id| {
            if doc.attr(id, "src")?.is_some_and(paths::is_remote) {
                doc.remove(id);
            }
            Ok(())
        })?;

        doc.for_each(root, PAGE_LINKS, |doc, id| {
            Self::relink(doc, id, "href", &write_path, |target| {
                ctx.pages
                    .get(target, Some(&read_path))
                    .map(|p| p.write_path())
            })
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::read_xml;
    use crate::epub::config::EngineConfig;
    use std::fs;
    use tempfile::TempDir;

    const P1: &str = r##"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>old</title><script>x()</script></head><body>
<h1 data-type="document-title">Chapter <em>One</em></h1>
<a href="p2.xhtml#sec">next</a>
<a href="missing.xhtml">gone</a>
<a href="#top">top</a>
<a href="https://example.org">ext</a>
<img src="../resources/fig.png" width="10" align="left"/>
<style>p{}</style>
<math><semantics><mi>x</mi><annotation-xml encoding="MathML-Content"><ci>x</ci></annotation-xml></semantics></math>
<div class="os-has-iframe os-has-link"><iframe src="https://example.org/embed"/></div>
</body></html>"##;

    const P2: &str = r#"<html xmlns="http://www.w3.org/1999/xhtml"><head/><body><p>plain</p><a href="p1.xhtml">back</a></body></html>"#;

    fn book() -> (TempDir, Context) {
        let dir = TempDir::new().unwrap();
        let linked = dir.path().join("linked");
        fs::create_dir_all(&linked).unwrap();
        fs::create_dir_all(dir.path().join("resources")).unwrap();
        fs::write(linked.join("p1.xhtml"), P1).unwrap();
        fs::write(linked.join("p2.xhtml"), P2).unwrap();
        fs::write(dir.path().join("resources/fig.png"), b"png").unwrap();
        let ctx = Context::new(dir.path(), EngineConfig::default());
        (dir, ctx)
    }

    #[test]
    fn test_parse_discovers_links_title_and_flags() {
        let (dir, ctx) = book();
        let page = ctx.pages.get_or_add("linked/p1.xhtml", None);
        page.parse(&ctx).unwrap();
        let data = page.data().unwrap();

        assert_eq!(data.title, "Chapter One");
        assert!(data.has_math);
        assert!(data.has_remote_resources);
        assert_eq!(data.pages, vec![dir.path().join("linked/p2.xhtml")]);
        assert_eq!(data.resources, vec![dir.path().join("resources/fig.png")]);
        // 不存在的链接目标不会进入缓存
        assert!(ctx.pages.get("linked/missing.xhtml", None).is_none());
        assert_eq!(ctx.pages.size(), 2);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let (_dir, ctx) = book();
        let page = ctx.pages.get_or_add("linked/p1.xhtml", None);
        page.parse(&ctx).unwrap();
        let first = page.data().unwrap() as *const PageData;
        let sizes = (ctx.pages.size(), ctx.resources.size());

        page.parse(&ctx).unwrap();
        assert_eq!(page.data().unwrap() as *const PageData, first);
        assert_eq!((ctx.pages.size(), ctx.resources.size()), sizes);
    }

    #[test]
    fn test_title_falls_back_to_untitled() {
        let (_dir, ctx) = book();
        let page = ctx.pages.get_or_add("linked/p2.xhtml", None);
        page.parse(&ctx).unwrap();
        let data = page.data().unwrap();
        assert_eq!(data.title, UNTITLED);
        assert!(!data.has_math);
        assert!(!data.has_remote_resources);
    }

    #[test]
    fn test_composite_page_title() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.xhtml");
        fs::write(
            &path,
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body><div data-type="composite-page"><h3 data-type="title">Review</h3></div></body></html>"#,
        )
        .unwrap();
        let ctx = Context::new(dir.path(), EngineConfig::default());
        let page = ctx.pages.get_or_add(&path, None);
        page.parse(&ctx).unwrap();
        assert_eq!(page.data().unwrap().title, "Review");
    }

    #[test]
    fn test_write_rewrites_and_cleans_markup() {
        let (dir, ctx) = book();
        let out = dir.path().join("out");
        let p1 = ctx.pages.get_or_add("linked/p1.xhtml", None);
        p1.parse(&ctx).unwrap();
        let p2 = ctx.pages.get("linked/p2.xhtml", None).unwrap();
        let fig = ctx.resources.get("resources/fig.png", None).unwrap();
        fig.parse(&ctx).unwrap();

        p1.rename(out.join("contents/p1.xhtml"), None);
        p2.rename(out.join("contents/chapter-2.xhtml"), None);
        fig.rename(out.join("resources/fig.png"), None);
        p1.write(&ctx).unwrap();

        let doc = read_xml(out.join("contents/p1.xhtml")).unwrap();
        let root = doc.document();
        let title = doc.find_one(root, "//h:head/h:title").unwrap();
        assert_eq!(doc.text(title), "Chapter One");
        let link = doc.find_one(root, "//h:head/h:link").unwrap();
        assert_eq!(doc.attr(link, "href").unwrap(), Some("the-style-epub.css"));
        assert!(!doc.has(root, "//h:script | //h:style").unwrap());

        let next = doc.find(root, "//h:a").unwrap()[0];
        assert_eq!(doc.attr(next, "href").unwrap(), Some("chapter-2.xhtml#sec"));
        let img = doc.find_one(root, "//h:img").unwrap();
        assert_eq!(doc.attr(img, "src").unwrap(), Some("../resources/fig.png"));
        assert_eq!(doc.attr(img, "width").unwrap(), None);
        assert_eq!(doc.attr(img, "align").unwrap(), None);

        assert!(doc.has(root, "//m:math/m:semantics/m:mi").unwrap());
        assert!(!doc.has(root, "//h:math").unwrap());
        assert!(!doc.has(root, "//m:annotation-xml").unwrap());
        assert!(!doc.has(root, "//h:iframe").unwrap());

        let text = fs::read_to_string(out.join("contents/p1.xhtml")).unwrap();
        assert!(text.ends_with("<!-- # sourceMappingURL=p1.xhtml.map -->"));
        assert!(out.join("contents/p1.xhtml.map").is_file());
    }

    #[test]
    fn test_convert_requires_parse() {
        let (_dir, ctx) = book();
        let page = ctx.pages.get_or_add("linked/p2.xhtml", None);
        match page.write(&ctx) {
            Err(EpubError::Bug(message)) => assert!(message.starts_with("BUG:")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
