//! 带位置跟踪的序列化器
//!
//! 深度优先遍历文档，输出文本的同时记录source map：每写出一块文本，
//! 就把当前生成位置映射到该块来源节点的原始位置。

use crate::dom::sourcemap::{Mapping, SourceMapBuilder, SourceMapJson, FROM_INSIDE_THE_CODE};
use crate::dom::{Document, NodeId, NodeKind, Ns, QName, SourcePos};
use crate::epub::error::{EpubError, Result};
use crate::epub::paths;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// XHTML5中的空元素
const VOID_ELEMENTS: [&str; 15] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

/// 序列化结果：文本与对应的source map
#[derive(Debug)]
pub struct Serialized {
    pub code: String,
    pub map: SourceMapJson,
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\t' | '\n' | '\r' => out.push_str(&format!("&#{};", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// 当前作用域内声明过的前缀
#[derive(Debug, Clone, Default)]
struct Scope {
    prefixes: Vec<(String, String)>,
}

impl Scope {
    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }
}

struct XmlWriter<'d> {
    doc: &'d Document,
    out: String,
    line: usize,
    column: usize,
    map: SourceMapBuilder,
    map_dir: PathBuf,
}

impl<'d> XmlWriter<'d> {
    fn source_index(&mut self, pos: Option<&SourcePos>) -> (usize, usize, usize) {
        match pos {
            Some(pos) => {
                let name = paths::relative_href(&self.map_dir, &pos.source);
                let content = self.doc.source_content(&pos.source);
                let index = self.map.add_source(&name, content);
                (index, pos.line.saturating_sub(1), pos.column)
            }
            None => (self.map.add_source(FROM_INSIDE_THE_CODE, None), 0, 0),
        }
    }

    /// 写出一块带映射的文本
    fn chunk(&mut self, text: &str, pos: Option<&SourcePos>) {
        let (source, original_line, original_column) = self.source_index(pos);
        self.map.add_mapping(Mapping {
            generated_line: self.line,
            generated_column: self.column,
            source,
            original_line,
            original_column,
        });
        self.raw(text);
    }

    /// 写出不需要映射的文本（例如插入的缩进）
    fn raw(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        self.out.push_str(text);
    }

    fn indent(&mut self, depth: usize) {
        self.raw("\n");
        self.raw(&"  ".repeat(depth));
    }

    fn node(&mut self, id: NodeId, default_ns: Option<&str>, scope: &Scope, depth: usize) -> Result<()> {
        let doc = self.doc;
        let pos = doc.pos(id);
        match doc.kind(id) {
            NodeKind::Document => {
                for &child in doc.children(id) {
                    self.node(child, default_ns, scope, depth)?;
                }
            }
            NodeKind::Text(text) => self.chunk(&escape_text(text), pos),
            NodeKind::Comment(text) => self.chunk(&format!("<!--{}-->", text), pos),
            NodeKind::Element { name, attrs } => {
                let qualified = name.qualified();
                let mut scope = scope.clone();
                let mut declarations: Vec<(String, String)> = Vec::new();
                let mut child_default = default_ns.map(str::to_string);

                let explicit_default = attrs
                    .iter()
                    .find(|a| a.name.ns.is_none() && a.name.prefix.is_none() && a.name.local == "xmlns");
                match &name.prefix {
                    None => match explicit_default {
                        Some(attr) => child_default = Some(attr.value.clone()),
                        None if name.ns.as_deref() != default_ns => {
                            let uri = name.ns.clone().unwrap_or_default();
                            declarations.push(("xmlns".to_string(), uri));
                            child_default = name.ns.clone();
                        }
                        None => {}
                    },
                    Some(prefix) => {
                        let uri = name.ns.clone().unwrap_or_default();
                        if scope.lookup(prefix) != Some(uri.as_str()) {
                            declarations.push((format!("xmlns:{}", prefix), uri.clone()));
                            scope.prefixes.push((prefix.clone(), uri));
                        }
                    }
                }

                let mut declared_here: HashSet<String> = HashSet::new();
                for attr in attrs {
                    let Some(uri) = attr.name.ns.as_deref() else {
                        continue;
                    };
                    if uri == Ns::Xml.uri() {
                        continue;
                    }
                    let prefix = attribute_prefix(&attr.name);
                    if scope.lookup(&prefix) == Some(uri) || declared_here.contains(&prefix) {
                        continue;
                    }
                    declared_here.insert(prefix.clone());
                    declarations.push((format!("xmlns:{}", prefix), uri.to_string()));
                    scope.prefixes.push((prefix, uri.to_string()));
                }

                self.chunk(&format!("<{}", qualified), pos);
                for (key, uri) in &declarations {
                    self.chunk(&format!(" {}=\"{}\"", key, escape_attr(uri)), pos);
                }
                for attr in attrs {
                    let key = match attr.name.ns.as_deref() {
                        Some(uri) if uri == Ns::Xml.uri() => format!("xml:{}", attr.name.local),
                        Some(_) => format!("{}:{}", attribute_prefix(&attr.name), attr.name.local),
                        None => attr.name.local.clone(),
                    };
                    let attr_pos = attr.pos.as_ref().or(pos);
                    self.chunk(&format!(" {}=\"{}\"", key, escape_attr(&attr.value)), attr_pos);
                }

                let children = doc.children(id);
                let is_void = name.ns.as_deref() == Some(Ns::Xhtml.uri())
                    && VOID_ELEMENTS.contains(&name.local.as_str());
                if is_void && !children.is_empty() {
                    return Err(EpubError::bug(format!(
                        "空元素 <{}> 带有子节点, 无法自闭合",
                        qualified
                    )));
                }
                if children.is_empty() {
                    self.chunk("/>", pos);
                    return Ok(());
                }

                self.chunk(">", pos);
                let loose = name.ns.as_deref().is_some_and(Ns::is_loose);
                let mut wrote_element = false;
                for &child in children {
                    let is_blank_text =
                        matches!(doc.kind(child), NodeKind::Text(t) if t.trim().is_empty());
                    if loose && is_blank_text {
                        continue;
                    }
                    if loose && doc.is_element(child) {
                        self.indent(depth + 1);
                        wrote_element = true;
                    }
                    self.node(child, child_default.as_deref(), &scope, depth + 1)?;
                }
                if loose && wrote_element {
                    self.indent(depth);
                }
                self.chunk(&format!("</{}>", qualified), pos);
            }
        }
        Ok(())
    }
}

/// 属性前缀：优先使用节点上的前缀，否则使用命名空间表中的前缀
fn attribute_prefix(name: &QName) -> String {
    name.prefix
        .clone()
        .or_else(|| {
            name.ns
                .as_deref()
                .and_then(Ns::from_uri)
                .map(|ns| ns.prefix().to_string())
        })
        .unwrap_or_else(|| "ns0".to_string())
}

/// 序列化节点
///
/// # 参数
/// * `doc` - 文档
/// * `node` - 起始节点（通常是文档节点）
/// * `output` - 输出文件路径，source map中的源路径相对于它所在的目录
pub fn serialize(doc: &Document, node: NodeId, output: &Path) -> Result<Serialized> {
    let map_dir = output.parent().unwrap_or(Path::new("")).to_path_buf();
    let mut writer = XmlWriter {
        doc,
        out: String::new(),
        line: 0,
        column: 0,
        map: SourceMapBuilder::new(),
        map_dir,
    };
    writer.node(node, None, &Scope::default(), 0)?;
    let file = output
        .file_name()
        .map(|f| f.to_string_lossy().into_owned());
    Ok(Serialized {
        map: writer.map.build(file),
        code: writer.out,
    })
}

/// 序列化整个文档并写入磁盘，同时写出 `<output>.map`
///
/// 输出文件末尾追加指向source map的注释。
pub fn write_xml_with_sourcemap(output: impl AsRef<Path>, doc: &Document) -> Result<()> {
    let output = output.as_ref();
    let Serialized { code, map } = serialize(doc, doc.document(), output)?;
    let file_name = output
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .ok_or_else(|| EpubError::bug(format!("输出路径没有文件名: {}", output.display())))?;
    let map_name = format!("{}.map", file_name);

    if let Some(dir) = output.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(
        output,
        format!("{}\n<!-- # sourceMappingURL={} -->", code, map_name),
    )?;
    fs::write(output.with_file_name(&map_name), serde_json::to_string(&map)?)?;
    tracing::debug!("已写出 {}", output.display());
    Ok(())
}
