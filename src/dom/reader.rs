//! XML加载
//!
//! 使用quick-xml读取文档，为每个节点打上指向该文件的源位置。
//! 如果文件末尾带有 `sourceMappingURL=` 注释，则加载对应的source map，
//! 把所有位置改写为原始创作文件中的位置，让多个流水线阶段的溯源信息可以叠加。

use crate::dom::sourcemap::{SourceMap, FROM_INSIDE_THE_CODE};
use crate::dom::{Attribute, Document, NodeId, NodeKind, QName, SourcePos};
use crate::epub::error::{EpubError, Result};
use crate::epub::paths;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const SOURCE_MAPPING_URL: &str = "sourceMappingURL=";

/// 字节偏移到（行, 列）的换算表
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, starts }
    }

    /// 返回从0开始的行号和以字符计的列号
    fn locate(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.starts[line];
        let column = self
            .text
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - start);
        (line, column)
    }
}

fn resolved_uri(ns: ResolveResult) -> std::result::Result<Option<String>, String> {
    match ns {
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.as_ref()).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(format!(
            "未声明的命名空间前缀 `{}`",
            String::from_utf8_lossy(&prefix)
        )),
    }
}

struct Loader<'a> {
    source: Rc<PathBuf>,
    lines: LineIndex<'a>,
}

impl Loader<'_> {
    fn pos(&self, offset: usize) -> SourcePos {
        let (line, column) = self.lines.locate(offset);
        SourcePos {
            source: self.source.clone(),
            line: line + 1,
            column,
        }
    }

    fn syntax(&self, offset: usize, message: impl Into<String>) -> EpubError {
        let (line, column) = self.lines.locate(offset);
        EpubError::XmlSyntax {
            file: self.source.as_ref().clone(),
            line,
            column,
            message: message.into(),
        }
    }

    fn element(
        &self,
        doc: &mut Document,
        reader: &NsReader<&[u8]>,
        start: &BytesStart,
        ns: Option<String>,
        offset: usize,
    ) -> Result<NodeId> {
        let pos = self.pos(offset);
        let name = QName {
            ns,
            prefix: start
                .name()
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
            local: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        };
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.syntax(offset, e.to_string()))?;
            // 命名空间声明由序列化器重新生成
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let (attr_ns, local) = reader.resolve_attribute(attr.key);
            let attr_ns = resolved_uri(attr_ns).map_err(|m| self.syntax(offset, m))?;
            let value = attr
                .unescape_value()
                .map_err(|e| self.syntax(offset, e.to_string()))?;
            attrs.push(Attribute {
                name: QName {
                    ns: attr_ns,
                    prefix: attr
                        .key
                        .prefix()
                        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
                    local: String::from_utf8_lossy(local.as_ref()).into_owned(),
                },
                value: value.into_owned(),
                pos: Some(pos.clone()),
            });
        }
        Ok(doc.alloc(NodeKind::Element { name, attrs }, Some(pos)))
    }
}

/// 把XML文本解析为文档，所有节点的源位置都指向 `source`
///
/// # 参数
/// * `text` - XML内容
/// * `source` - 用于源位置和错误信息的文件路径
///
/// # 返回值
/// * `Result<Document>` - 语法错误时返回带0起始行列号的 `XmlSyntax`
pub fn parse_xml(text: &str, source: impl AsRef<Path>) -> Result<Document> {
    let loader = Loader {
        source: Rc::new(source.as_ref().to_path_buf()),
        lines: LineIndex::new(text),
    };
    let mut reader = NsReader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut doc = Document::new();
    let mut stack = vec![doc.document()];

    loop {
        let offset = reader.buffer_position() as usize;
        let (ns, event) = match reader.read_resolved_event() {
            Ok(result) => result,
            Err(e) => {
                let at = reader.error_position() as usize;
                return Err(loader.syntax(at, e.to_string()));
            }
        };
        let ns = resolved_uri(ns).map_err(|m| loader.syntax(offset, m))?;
        let parent = *stack.last().ok_or_else(|| EpubError::bug("解析栈为空"))?;
        match event {
            Event::Start(start) => {
                let id = loader.element(&mut doc, &reader, &start, ns, offset)?;
                doc.append(parent, id);
                stack.push(id);
            }
            Event::Empty(start) => {
                let id = loader.element(&mut doc, &reader, &start, ns, offset)?;
                doc.append(parent, id);
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| loader.syntax(offset, e.to_string()))?;
                if parent != doc.document() || !text.trim().is_empty() {
                    let id = doc.create_text(text.into_owned(), Some(loader.pos(offset)));
                    doc.append(parent, id);
                }
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                let id = doc.create_text(text, Some(loader.pos(offset)));
                doc.append(parent, id);
            }
            Event::Comment(comment) => {
                let text = String::from_utf8_lossy(&comment).into_owned();
                let id = doc.create_comment(text, Some(loader.pos(offset)));
                doc.append(parent, id);
            }
            Event::Eof => break,
            // XML声明、DOCTYPE和处理指令不参与转换
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(loader.syntax(text.len(), "文档在元素闭合之前结束"));
    }
    if doc.root_element().is_none() {
        return Err(loader.syntax(0, "文档没有根元素"));
    }
    Ok(doc)
}

/// 读取并解析文件，同时记录文件内容供后续source map嵌入
pub fn read_xml(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut doc = parse_xml(&text, path)?;
    doc.add_source_content(path, text);
    Ok(doc)
}

/// 文档末尾指向source map的注释节点及其URL
fn trailing_sourcemap(doc: &Document) -> Option<(NodeId, String)> {
    let last = *doc.children(doc.document()).last()?;
    let NodeKind::Comment(text) = doc.kind(last) else {
        return None;
    };
    let (_, rest) = text.split_once(SOURCE_MAPPING_URL)?;
    let url = rest.split_whitespace().next()?;
    Some((last, url.to_string()))
}

/// 读取文件；若其末尾引用了source map，则把所有节点的位置穿过该map改写到原始文件
pub fn read_xml_with_sourcemap(path: impl AsRef<Path>) -> Result<Document> {
    let path = paths::normalize(path.as_ref());
    let mut doc = read_xml(&path)?;
    let Some((comment, url)) = trailing_sourcemap(&doc) else {
        return Ok(doc);
    };
    let map_path = paths::resolve(Path::new(""), &url, Some(&path));
    let map = SourceMap::parse(&fs::read_to_string(&map_path)?)?;
    let map_dir = map_path.parent().unwrap_or(Path::new("")).to_path_buf();
    tracing::debug!("通过 {} 还原 {} 的源位置", map_path.display(), path.display());

    let sources: Vec<Option<Rc<PathBuf>>> = map
        .sources
        .iter()
        .map(|s| {
            (s != FROM_INSIDE_THE_CODE).then(|| Rc::new(paths::resolve(&map_dir, s, None)))
        })
        .collect();
    for (source, content) in sources.iter().zip(map.sources_content.iter()) {
        if let (Some(source), Some(content)) = (source, content) {
            doc.add_source_content(source.as_ref().clone(), content.clone());
        }
    }

    doc.remove(comment);
    let mut failure = None;
    doc.for_each_pos_mut(|slot| {
        let Some(pos) = slot.as_ref() else {
            return;
        };
        if *pos.source != path {
            return;
        }
        let Some(mapping) = map.lookup(pos.line - 1, pos.column) else {
            return;
        };
        match sources.get(mapping.source) {
            Some(Some(original)) => {
                *slot = Some(SourcePos {
                    source: original.clone(),
                    line: mapping.original_line + 1,
                    column: mapping.original_column,
                });
            }
            Some(None) => *slot = None,
            None => {
                failure.get_or_insert_with(|| {
                    EpubError::bug(format!(
                        "{} 引用了不存在的源下标 {}",
                        map_path.display(),
                        mapping.source
                    ))
                });
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(doc),
    }
}
