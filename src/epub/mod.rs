pub mod archive;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod factory;
pub mod ncx;
pub mod node;
pub mod opf;
pub mod page;
pub mod paths;
pub mod pipeline;
pub mod resource;

// 重新导出错误处理
pub use error::{EpubError, Result};

// 重新导出引擎核心
pub use config::EngineConfig;
pub use context::Context;
pub use factory::Factory;
pub use node::{BookNode, FileState, XmlNode};
pub use pipeline::{convert_books, BookOutput, ConvertOptions};

// 重新导出节点
pub use container::{BookEntry, Container, RootFile};
pub use page::{Page, PageData};
pub use resource::{Resource, ResourceData};

// 重新导出OPF相关
pub use opf::{BookMetadata, ManifestItem, Package, PackageData, SpineItem};

// 重新导出NCX相关
pub use ncx::{DocTitle, NavContent, NavLabel, NavMap, NavPoint, Navigation, NcxMetadata, TocTree};
