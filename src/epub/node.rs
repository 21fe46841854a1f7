//! 节点生命周期
//!
//! 每个节点对应一个输入文件，依次经历 parse → rename → convert → write。
//! 解析结果只计算一次；写入路径在 rename 之前等于读取路径。

use crate::dom::{read_xml_with_sourcemap, write_xml_with_sourcemap, Document};
use crate::epub::context::Context;
use crate::epub::error::Result;
use crate::epub::paths;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// 节点的读取路径和（可修改的）写入路径
#[derive(Debug)]
pub struct FileState {
    read_path: PathBuf,
    write_path: RefCell<PathBuf>,
}

impl FileState {
    pub fn new(read_path: PathBuf) -> Self {
        Self {
            write_path: RefCell::new(read_path.clone()),
            read_path,
        }
    }

    pub fn read_path(&self) -> &Path {
        &self.read_path
    }

    pub fn write_path(&self) -> PathBuf {
        self.write_path.borrow().clone()
    }

    /// 修改写入路径
    ///
    /// # 参数
    /// * `new_path` - 新路径；为相对路径时按 `relative_to` 所在目录解析
    /// * `relative_to` - 参照文件（通常是另一个节点的写入路径），缺省时使用当前写入路径
    pub fn rename(&self, new_path: impl AsRef<Path>, relative_to: Option<&Path>) {
        let current = self.write_path();
        let anchor = relative_to.unwrap_or(&current);
        let resolved = paths::resolve(Path::new("/"), new_path, Some(anchor));
        tracing::trace!("{} → {}", self.read_path.display(), resolved.display());
        *self.write_path.borrow_mut() = resolved;
    }
}

/// 书籍中的一个文件节点
pub trait BookNode {
    fn state(&self) -> &FileState;

    fn read_path(&self) -> &Path {
        self.state().read_path()
    }

    fn write_path(&self) -> PathBuf {
        self.state().write_path()
    }

    fn rename(&self, new_path: impl AsRef<Path>, relative_to: Option<&Path>)
    where
        Self: Sized,
    {
        self.state().rename(new_path, relative_to)
    }

    /// 读取并记住节点的数据；重复调用不会产生新的效果
    fn parse(&self, ctx: &Context) -> Result<()>;

    /// 把转换结果写到写入路径
    fn write(&self, ctx: &Context) -> Result<()>;
}

/// 以XML文档为内容的节点：写入时重新读取源文件，转换后带source map输出
pub trait XmlNode: BookNode {
    fn convert(&self, ctx: &Context, doc: &mut Document) -> Result<()>;

    fn write_xml(&self, ctx: &Context) -> Result<()> {
        let mut doc = read_xml_with_sourcemap(self.read_path())?;
        self.convert(ctx, &mut doc)?;
        let output = self.write_path();
        tracing::debug!("写入 {}", output.display());
        write_xml_with_sourcemap(output, &doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_path_defaults_to_read_path() {
        let state = FileState::new(PathBuf::from("/in/linked/a.xhtml"));
        assert_eq!(state.write_path(), PathBuf::from("/in/linked/a.xhtml"));
    }

    #[test]
    fn test_rename_relative_to_another_node() {
        let state = FileState::new(PathBuf::from("/in/linked/a.xhtml"));
        state.rename("/out/contents/a.xhtml", None);
        assert_eq!(state.write_path(), PathBuf::from("/out/contents/a.xhtml"));

        state.rename("../resources/x.png", Some(Path::new("/out/contents/book.opf")));
        assert_eq!(state.write_path(), PathBuf::from("/out/resources/x.png"));

        // 没有参照时相对于当前写入路径
        state.rename("y.png", None);
        assert_eq!(state.write_path(), PathBuf::from("/out/resources/y.png"));
        assert_eq!(state.read_path(), Path::new("/in/linked/a.xhtml"));
    }
}
