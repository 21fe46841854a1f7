//! 转换上下文
//!
//! 持有配置和每种节点的缓存。所有节点操作都显式接收上下文，
//! 页面和资源属于单本书，处理完一本书后调用 [`Context::clear_book`] 清空；
//! 容器、包和导航节点在整个运行期间保持唯一实例。

use crate::epub::config::EngineConfig;
use crate::epub::container::Container;
use crate::epub::factory::Factory;
use crate::epub::ncx::Navigation;
use crate::epub::opf::Package;
use crate::epub::page::Page;
use crate::epub::resource::Resource;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Context {
    base: PathBuf,
    config: EngineConfig,
    pub containers: Factory<Container>,
    pub packages: Factory<Package>,
    pub navigations: Factory<Navigation>,
    pub pages: Factory<Page>,
    pub resources: Factory<Resource>,
}

impl Context {
    /// # 参数
    /// * `base` - 输入根目录，相对路径和资源元数据目录都以它为基准
    /// * `config` - 引擎配置
    pub fn new(base: impl AsRef<Path>, config: EngineConfig) -> Self {
        let base = crate::epub::paths::normalize(base);
        Self {
            containers: Factory::new(&base, Container::new),
            packages: Factory::new(&base, Package::new),
            navigations: Factory::new(&base, Navigation::new),
            pages: Factory::new(&base, Page::new),
            resources: Factory::new(&base, Resource::new),
            base,
            config,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 资源元数据目录
    pub fn resources_dir(&self) -> PathBuf {
        self.base.join(&self.config.resources_dir)
    }

    /// 清空一本书的页面和资源；容器、包和导航节点保留
    pub fn clear_book(&self) {
        tracing::debug!(
            "清空缓存: {} 个页面, {} 个资源",
            self.pages.size(),
            self.resources.size()
        );
        self.pages.clear();
        self.resources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_clear_book_keeps_containers_and_packages() {
        let ctx = Context::new("/input", EngineConfig::default());
        let container = ctx.containers.get_or_add("book/META-INF/books.xml", None);
        let package = ctx.packages.get_or_add("linked/b.toc.xhtml", None);
        let navigation = ctx.navigations.get_or_add("linked/b.toc.xhtml", None);
        ctx.pages.get_or_add("linked/a.xhtml", None);
        ctx.resources.get_or_add("resources/a.png", None);

        ctx.clear_book();

        assert_eq!(ctx.pages.size(), 0);
        assert_eq!(ctx.resources.size(), 0);
        let again = ctx.containers.get_or_add("/input/book/META-INF/books.xml", None);
        assert!(Rc::ptr_eq(&container, &again));
        let package_again = ctx.packages.get_or_add("/input/linked/b.toc.xhtml", None);
        assert!(Rc::ptr_eq(&package, &package_again));
        assert!(Rc::ptr_eq(
            &navigation,
            &ctx.navigations.get_or_add("linked/b.toc.xhtml", None)
        ));
    }

    #[test]
    fn test_resources_dir_is_under_base() {
        let ctx = Context::new("/input/./x/..", EngineConfig::default());
        assert_eq!(ctx.base(), Path::new("/input"));
        assert_eq!(ctx.resources_dir(), PathBuf::from("/input/IO_RESOURCES"));
    }
}
