//! NCX（Navigation Control file for XML）模块
//!
//! 目录树的解析，以及由目录树生成的NCX导航文件。

pub mod navigation;
pub mod toc_tree;

pub use navigation::{DocTitle, NavContent, NavLabel, NavMap, NavPoint, Navigation, NcxMetadata};
pub use toc_tree::{flatten, parse_toc, TocTree};
