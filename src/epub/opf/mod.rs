//! OPF（Open Packaging Format）模块
//!
//! 包节点负责书籍级的元数据、清单和阅读顺序。

mod manifest;
mod metadata;
mod package;
mod spine;

pub use manifest::ManifestItem;
pub use metadata::{normalize_revised, read_authors, BookMetadata};
pub use package::{Package, PackageData};
pub use spine::{spine_order, SpineItem};
