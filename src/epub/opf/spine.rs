//! 脊柱模块
//!
//! 阅读顺序：先按目录从左到右，再依次追加从已有页面链接可达、尚未出现的页面，直到不再变化。

use crate::dom::Template;
use crate::epub::context::Context;
use crate::epub::error::{EpubError, Result};
use crate::epub::ncx::{flatten, TocTree};
use std::collections::HashSet;
use std::path::PathBuf;

/// 脊柱项信息(阅读顺序)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// 引用的清单项ID
    pub idref: String,
}

impl SpineItem {
    /// 创建新的脊柱项
    pub fn new(idref: impl Into<String>) -> Self {
        Self {
            idref: idref.into(),
        }
    }

    /// `opf:itemref` 元素；所有页面都是线性的，省略 `linear` 属性
    pub fn to_template(&self) -> Template {
        Template::element("opf:itemref", &[("idref", self.idref.as_str())], vec![])
    }
}

/// 计算页面的阅读顺序（规范读取路径）
///
/// 所有页面必须已经解析。
pub fn spine_order(ctx: &Context, toc: &[TocTree]) -> Result<Vec<PathBuf>> {
    let mut order = flatten(toc);
    let mut seen: HashSet<PathBuf> = order.iter().cloned().collect();
    let mut i = 0;
    while i < order.len() {
        let page = ctx.pages.get(&order[i], None).ok_or_else(|| {
            EpubError::bug(format!("页面不在缓存中: {}", order[i].display()))
        })?;
        for link in &page.data()?.pages {
            if seen.insert(link.clone()) {
                order.push(link.clone());
            }
        }
        i += 1;
    }
    Ok(order)
}
