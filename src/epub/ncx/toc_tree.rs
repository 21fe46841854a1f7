//! 目录树
//!
//! 从 `<slug>.toc.xhtml` 中的 `nav > ol > li` 嵌套列表构建。
//! 带嵌套列表的条目是章节（[`TocTree::Inner`]），只含一个链接的条目是页面（[`TocTree::Leaf`]），
//! 其他形状都是结构错误。

use crate::dom::{Document, NodeId, SourcePos};
use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::node::BookNode;
use crate::epub::paths;
use std::path::{Path, PathBuf};

/// 目录节点
#[derive(Debug, Clone, PartialEq)]
pub enum TocTree {
    Inner {
        title: String,
        children: Vec<TocTree>,
        pos: Option<SourcePos>,
    },
    Leaf {
        title: String,
        /// 页面的规范读取路径
        page: PathBuf,
        pos: Option<SourcePos>,
    },
}

impl TocTree {
    pub fn title(&self) -> &str {
        match self {
            TocTree::Inner { title, .. } | TocTree::Leaf { title, .. } => title,
        }
    }

    pub fn pos(&self) -> Option<&SourcePos> {
        match self {
            TocTree::Inner { pos, .. } | TocTree::Leaf { pos, .. } => pos.as_ref(),
        }
    }

    /// 深度优先找到的第一个页面
    pub fn first_leaf(&self) -> Option<&Path> {
        match self {
            TocTree::Leaf { page, .. } => Some(page),
            TocTree::Inner { children, .. } => children.iter().find_map(TocTree::first_leaf),
        }
    }

    /// 第一个页面，找不到时返回带位置的结构错误
    pub fn target(&self) -> Result<&Path> {
        self.first_leaf()
            .ok_or_else(|| structure_error(self.pos(), Path::new(""), "章节下没有任何页面"))
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            TocTree::Leaf { page, .. } => out.push(page),
            TocTree::Inner { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

/// 从左到右展开所有页面，重复出现的页面只保留第一次
pub fn flatten(toc: &[TocTree]) -> Vec<PathBuf> {
    let mut leaves = Vec::new();
    for tree in toc {
        tree.collect_leaves(&mut leaves);
    }
    let mut out: Vec<PathBuf> = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        if !out.iter().any(|p| p == leaf) {
            out.push(leaf.to_path_buf());
        }
    }
    out
}

fn structure_error(pos: Option<&SourcePos>, file: &Path, message: &str) -> EpubError {
    match pos {
        Some(pos) => EpubError::TocStructure {
            file: pos.source.as_ref().clone(),
            line: pos.line,
            column: pos.column,
            message: message.to_string(),
        },
        None => EpubError::TocStructure {
            file: file.to_path_buf(),
            line: 0,
            column: 0,
            message: message.to_string(),
        },
    }
}

fn label(doc: &Document, id: NodeId) -> String {
    doc.text(id).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 解析目录文档；页面节点在缓存中创建（不解析）
///
/// # 参数
/// * `doc` - 目录文档
/// * `ctx` - 转换上下文
/// * `toc_path` - 目录文件路径，链接相对于它解析
pub fn parse_toc(doc: &Document, ctx: &Context, toc_path: &Path) -> Result<Vec<TocTree>> {
    let items = doc.find(doc.document(), "//h:nav/h:ol/h:li")?;
    if items.is_empty() {
        return Err(structure_error(None, toc_path, "找不到 nav > ol > li 形式的目录"));
    }
    items
        .into_iter()
        .map(|item| parse_item(doc, ctx, toc_path, item))
        .collect()
}

fn parse_item(doc: &Document, ctx: &Context, toc_path: &Path, item: NodeId) -> Result<TocTree> {
    let pos = doc.pos(item).cloned();

    if let Some(&list) = doc.find(item, "h:ol")?.first() {
        let title = doc
            .find(item, "h:a | h:span")?
            .first()
            .map(|&id| label(doc, id))
            .unwrap_or_default();
        let children = doc
            .find(list, "h:li")?
            .into_iter()
            .map(|child| parse_item(doc, ctx, toc_path, child))
            .collect::<Result<Vec<_>>>()?;
        if children.is_empty() {
            return Err(structure_error(pos.as_ref(), toc_path, "章节的嵌套列表为空"));
        }
        return Ok(TocTree::Inner {
            title,
            children,
            pos,
        });
    }

    match doc.find(item, "h:a[@href]")?.as_slice() {
        [link] => {
            let href = doc.attr(*link, "href")?.unwrap_or_default();
            let (target, _) = paths::split_fragment(href);
            if target.is_empty() || paths::is_remote(target) {
                return Err(structure_error(pos.as_ref(), toc_path, "目录链接必须指向本地页面"));
            }
            let page = ctx.pages.get_or_add(target, Some(toc_path));
            Ok(TocTree::Leaf {
                title: label(doc, *link),
                page: page.read_path().to_path_buf(),
                pos,
            })
        }
        _ => Err(structure_error(
            pos.as_ref(),
            toc_path,
            "目录条目既没有嵌套列表, 也不是单个链接",
        )),
    }
}
