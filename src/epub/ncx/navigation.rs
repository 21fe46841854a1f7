//! NCX导航
//!
//! 把目录树降级为旧式阅读器使用的嵌套 `navPoint` 结构。
//! 导航节点的读取路径就是目录文件，它依赖同一路径上的包节点提供目录树和书籍元数据。

use crate::dom::{Document, NodeId, SourcePos};
use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::ncx::toc_tree::TocTree;
use crate::epub::node::{BookNode, FileState, XmlNode};
use crate::epub::opf::Package;
use crate::epub::paths;
use crate::tpl;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// NCX头部的 `dtb:*` 元数据
#[derive(Debug, Clone, Default)]
pub struct NcxMetadata {
    /// 唯一标识符（dtb:uid）
    pub uid: String,
    /// 导航深度（dtb:depth）
    pub depth: usize,
    /// 总页数（dtb:totalPageCount）
    pub total_page_count: u32,
    /// 最大页码（dtb:maxPageNumber）
    pub max_page_number: u32,
}

/// 文档标题
#[derive(Debug, Clone)]
pub struct DocTitle {
    pub text: String,
}

/// 导航标签
#[derive(Debug, Clone)]
pub struct NavLabel {
    pub text: String,
}

/// 导航内容引用
#[derive(Debug, Clone)]
pub struct NavContent {
    /// 相对于NCX文件的路径
    pub src: String,
}

/// 导航点
#[derive(Debug, Clone)]
pub struct NavPoint {
    pub id: String,
    /// 播放顺序，从1开始按先序递增
    pub play_order: u32,
    pub nav_label: NavLabel,
    pub content: NavContent,
    pub children: Vec<NavPoint>,
    /// 对应目录条目的源位置
    pub pos: Option<SourcePos>,
}

impl NavPoint {
    /// 获取导航深度
    pub fn get_depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(NavPoint::get_depth)
            .max()
            .unwrap_or(0)
    }

    /// 降级为 `navPoint` 元素，每个导航点使用自己的源位置
    fn lower(&self, doc: &mut Document) -> Result<NodeId> {
        let order = self.play_order.to_string();
        let template = tpl!("ncx:navPoint" { "id" => self.id, "playOrder" => order } [
            tpl!("ncx:navLabel" {} [tpl!("ncx:text" {} [self.nav_label.text.as_str()])]),
            tpl!("ncx:content" { "src" => self.content.src } []),
        ]);
        let built = doc.build(&template, self.pos.clone())?;
        let [point] = built.as_slice() else {
            return Err(EpubError::bug("navPoint 模板应只生成一个节点"));
        };
        for child in &self.children {
            let child = child.lower(doc)?;
            doc.append(*point, child);
        }
        Ok(*point)
    }
}

/// 导航地图
#[derive(Debug, Clone, Default)]
pub struct NavMap {
    pub nav_points: Vec<NavPoint>,
}

impl NavMap {
    /// 从目录树构建，链接改写为相对于 `ncx_path` 的页面写入路径
    pub fn from_toc(ctx: &Context, toc: &[TocTree], ncx_path: &Path) -> Result<Self> {
        let mut play_order = 0;
        let nav_points = toc
            .iter()
            .map(|tree| nav_point(ctx, tree, ncx_path, &mut play_order))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { nav_points })
    }

    /// 获取导航深度
    pub fn get_depth(&self) -> usize {
        self.nav_points
            .iter()
            .map(NavPoint::get_depth)
            .max()
            .unwrap_or(0)
    }
}

fn nav_point(ctx: &Context, tree: &TocTree, ncx_path: &Path, play_order: &mut u32) -> Result<NavPoint> {
    *play_order += 1;
    let order = *play_order;
    let target = tree.target()?;
    let page = ctx.pages.get(target, None).ok_or_else(|| {
        EpubError::bug(format!("目录引用的页面不在缓存中: {}", target.display()))
    })?;
    let children = match tree {
        TocTree::Inner { children, .. } => children
            .iter()
            .map(|child| nav_point(ctx, child, ncx_path, play_order))
            .collect::<Result<Vec<_>>>()?,
        TocTree::Leaf { .. } => Vec::new(),
    };
    Ok(NavPoint {
        id: format!("nav-{}", order),
        play_order: order,
        nav_label: NavLabel {
            text: tree.title().to_string(),
        },
        content: NavContent {
            src: paths::href(ncx_path, &page.write_path()),
        },
        children,
        pos: tree.pos().cloned(),
    })
}

/// NCX导航节点
#[derive(Debug)]
pub struct Navigation {
    state: FileState,
}

impl Navigation {
    pub fn new(read_path: PathBuf) -> Self {
        Self {
            state: FileState::new(read_path),
        }
    }

    fn package(&self, ctx: &Context) -> Result<Rc<Package>> {
        ctx.packages.get(self.read_path(), None).ok_or_else(|| {
            EpubError::bug(format!(
                "导航 {} 没有对应的包节点",
                self.read_path().display()
            ))
        })
    }

    pub fn nav_map(&self, ctx: &Context) -> Result<NavMap> {
        let package = self.package(ctx)?;
        NavMap::from_toc(ctx, &package.data()?.toc, &self.write_path())
    }
}

impl BookNode for Navigation {
    fn state(&self) -> &FileState {
        &self.state
    }

    /// 导航没有自己的数据，确保包节点已经解析即可
    fn parse(&self, ctx: &Context) -> Result<()> {
        self.package(ctx)?.parse(ctx)
    }

    fn write(&self, ctx: &Context) -> Result<()> {
        self.write_xml(ctx)
    }
}

impl XmlNode for Navigation {
    /// 用生成的 `ncx` 根元素替换目录文档的根元素
    fn convert(&self, ctx: &Context, doc: &mut Document) -> Result<()> {
        let package = self.package(ctx)?;
        let data = package.data()?;
        let nav_map = self.nav_map(ctx)?;
        let metadata = NcxMetadata {
            uid: package.identifier(ctx)?,
            depth: nav_map.get_depth(),
            total_page_count: 0,
            max_page_number: 0,
        };
        let title = DocTitle {
            text: data.metadata.title.clone(),
        };

        let old_root = doc
            .root_element()
            .ok_or_else(|| EpubError::bug("目录文档没有根元素"))?;
        let pos = doc.pos(old_root).cloned();
        let meta = |name: &str, content: String| {
            tpl!("ncx:meta" { "name" => name, "content" => content } [])
        };
        let template = tpl!("ncx:ncx" {
            "version" => "2005-1",
            "xml:lang" => data.metadata.language,
        } [
            tpl!("ncx:head" {} [
                meta("dtb:uid", metadata.uid.clone()),
                meta("dtb:depth", metadata.depth.to_string()),
                meta("dtb:totalPageCount", metadata.total_page_count.to_string()),
                meta("dtb:maxPageNumber", metadata.max_page_number.to_string()),
            ]),
            tpl!("ncx:docTitle" {} [tpl!("ncx:text" {} [title.text.as_str()])]),
            tpl!("ncx:navMap" {} []),
        ]);
        let built = doc.build(&template, pos)?;
        let [root] = built.as_slice() else {
            return Err(EpubError::bug("ncx 模板应只生成一个节点"));
        };
        let map = doc.find_one(*root, "ncx:navMap")?;
        for point in &nav_map.nav_points {
            let point = point.lower(doc)?;
            doc.append(map, point);
        }
        doc.replace_with(old_root, *root)?;
        Ok(())
    }
}
