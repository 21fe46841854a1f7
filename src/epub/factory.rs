//! 节点缓存
//!
//! 把路径规范化为绝对路径后，返回该路径对应的唯一节点实例，首次请求时才构造。

use crate::epub::paths;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// 同一种节点的缓存：每个规范路径至多一个实例
pub struct Factory<N> {
    base: PathBuf,
    builder: Box<dyn Fn(PathBuf) -> N>,
    nodes: RefCell<HashMap<PathBuf, Rc<N>>>,
}

impl<N> fmt::Debug for Factory<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("base", &self.base)
            .field("size", &self.size())
            .finish()
    }
}

impl<N> Factory<N> {
    /// # 参数
    /// * `base` - 没有参照文件时解析相对路径所用的目录
    /// * `builder` - 用规范路径构造新节点
    pub fn new(base: impl Into<PathBuf>, builder: impl Fn(PathBuf) -> N + 'static) -> Self {
        Self {
            base: base.into(),
            builder: Box::new(builder),
            nodes: RefCell::new(HashMap::new()),
        }
    }

    /// 计算规范路径：有 `relative_to` 时相对于它所在的目录，否则相对于基准目录
    pub fn resolve(&self, relative: impl AsRef<Path>, relative_to: Option<&Path>) -> PathBuf {
        paths::resolve(&self.base, relative, relative_to)
    }

    /// 取出缓存的节点，不存在时构造并缓存
    pub fn get_or_add(&self, relative: impl AsRef<Path>, relative_to: Option<&Path>) -> Rc<N> {
        let key = self.resolve(relative, relative_to);
        let mut nodes = self.nodes.borrow_mut();
        nodes
            .entry(key)
            .or_insert_with_key(|key| {
                tracing::trace!("创建节点 {}", key.display());
                Rc::new((self.builder)(key.clone()))
            })
            .clone()
    }

    /// 与 `get_or_add` 相同的解析方式，但不会构造新节点
    pub fn get(&self, relative: impl AsRef<Path>, relative_to: Option<&Path>) -> Option<Rc<N>> {
        let key = self.resolve(relative, relative_to);
        self.nodes.borrow().get(&key).cloned()
    }

    /// 把之前移出的实例放回缓存，返回原来占用该路径的节点
    pub fn insert(&self, path: impl AsRef<Path>, node: Rc<N>) -> Option<Rc<N>> {
        let key = self.resolve(path, None);
        self.nodes.borrow_mut().insert(key, node)
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Rc<N>> {
        let key = self.resolve(path, None);
        self.nodes.borrow_mut().remove(&key)
    }

    pub fn clear(&self) {
        self.nodes.borrow_mut().clear();
    }

    pub fn size(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// 当前所有节点的快照，顺序不固定
    pub fn all(&self) -> Vec<Rc<N>> {
        self.nodes.borrow().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy(PathBuf);

    fn factory() -> Factory<Dummy> {
        Factory::new("/book", Dummy)
    }

    #[test]
    fn test_same_canonical_path_returns_same_instance() {
        let f = factory();
        let a = f.get_or_add("linked/p1.xhtml", None);
        let b = f.get_or_add("p1.xhtml", Some(Path::new("/book/linked/p2.xhtml")));
        let c = f.get_or_add("/book/linked/../linked/./p1.xhtml", None);

        assert!(Rc::ptr_eq(&a, &b));
        assert!(Rc::ptr_eq(&a, &c));
        assert_eq!(a.0, PathBuf::from("/book/linked/p1.xhtml"));
        assert_eq!(f.size(), 1);
    }

    #[test]
    fn test_get_does_not_construct() {
        let f = factory();
        assert!(f.get("x.xhtml", None).is_none());
        assert_eq!(f.size(), 0);
        f.get_or_add("x.xhtml", None);
        assert!(f.get("x.xhtml", None).is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let f = factory();
        f.get_or_add("a", None);
        f.get_or_add("b", None);
        assert!(f.remove("/book/a").is_some());
        assert_eq!(f.size(), 1);
        assert_eq!(f.all().len(), 1);
        f.clear();
        assert_eq!(f.size(), 0);
    }

    #[test]
    fn test_insert_restores_removed_instance() {
        let f = factory();
        let a = f.get_or_add("a", None);
        let removed = f.remove("a").unwrap();
        assert!(f.get("a", None).is_none());

        assert!(f.insert("/book/a", removed).is_none());
        assert!(Rc::ptr_eq(&a, &f.get_or_add("a", None)));
        assert_eq!(f.size(), 1);
    }
}
