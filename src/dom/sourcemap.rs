//! Source Map v3 的读写
//!
//! 序列化器逐块记录映射，加载器按行列查找原始位置。

use crate::epub::error::{EpubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 没有源位置的节点（由流水线新建）使用的占位源
pub const FROM_INSIDE_THE_CODE: &str = "(frominsidethecode)";

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// source map文件的JSON结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapJson {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(default)]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

/// 一条映射，所有行列都从0开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: usize,
    pub generated_column: usize,
    pub source: usize,
    pub original_line: usize,
    pub original_column: usize,
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = (vlq & 0b1_1111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b10_0000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn decode_segment(segment: &str) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    let mut value: i64 = 0;
    let mut shift = 0;
    for byte in segment.bytes() {
        let digit = BASE64
            .iter()
            .position(|&b| b == byte)
            .ok_or_else(|| EpubError::bug(format!("source map中有无效的VLQ字符 `{}`", byte as char)))?
            as i64;
        if shift > 60 {
            return Err(EpubError::bug(format!("source map中的VLQ值过长: `{}`", segment)));
        }
        value += (digit & 0b1_1111) << shift;
        if digit & 0b10_0000 != 0 {
            shift += 5;
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            values.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
        }
    }
    if shift != 0 {
        return Err(EpubError::bug(format!("source map中的VLQ值不完整: `{}`", segment)));
    }
    Ok(values)
}

/// 按写出顺序累积映射，最后编码成JSON
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    index: HashMap<String, usize>,
    contents: Vec<Option<String>>,
    mappings: Vec<Mapping>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个源，返回其下标；重复注册返回已有下标
    pub fn add_source(&mut self, name: &str, content: Option<&str>) -> usize {
        if let Some(&i) = self.index.get(name) {
            if self.contents[i].is_none() {
                self.contents[i] = content.map(str::to_string);
            }
            return i;
        }
        let i = self.sources.len();
        self.sources.push(name.to_string());
        self.contents.push(content.map(str::to_string));
        self.index.insert(name.to_string(), i);
        i
    }

    pub fn add_mapping(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
    }

    fn encode_mappings(&self) -> String {
        let mut out = String::new();
        let mut line = 0;
        let mut prev_column = 0i64;
        let mut prev_source = 0i64;
        let mut prev_orig_line = 0i64;
        let mut prev_orig_column = 0i64;
        let mut first_in_line = true;
        for m in &self.mappings {
            while line < m.generated_line {
                out.push(';');
                line += 1;
                prev_column = 0;
                first_in_line = true;
            }
            if !first_in_line {
                out.push(',');
            }
            first_in_line = false;
            encode_vlq(&mut out, m.generated_column as i64 - prev_column);
            encode_vlq(&mut out, m.source as i64 - prev_source);
            encode_vlq(&mut out, m.original_line as i64 - prev_orig_line);
            encode_vlq(&mut out, m.original_column as i64 - prev_orig_column);
            prev_column = m.generated_column as i64;
            prev_source = m.source as i64;
            prev_orig_line = m.original_line as i64;
            prev_orig_column = m.original_column as i64;
        }
        out
    }

    pub fn build(&self, file: Option<String>) -> SourceMapJson {
        SourceMapJson {
            version: 3,
            file,
            source_root: None,
            sources: self.sources.clone(),
            sources_content: self.contents.clone(),
            names: Vec::new(),
            mappings: self.encode_mappings(),
        }
    }
}

/// 已解码、可按生成位置查询的source map
#[derive(Debug, Clone)]
pub struct SourceMap {
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
    lines: Vec<Vec<Mapping>>,
}

impl SourceMap {
    pub fn parse(json: &str) -> Result<SourceMap> {
        let raw: SourceMapJson = serde_json::from_str(json)?;
        Self::from_json(raw)
    }

    pub fn from_json(raw: SourceMapJson) -> Result<SourceMap> {
        let sources = match &raw.source_root {
            Some(root) if !root.is_empty() => raw
                .sources
                .iter()
                .map(|s| {
                    if s == FROM_INSIDE_THE_CODE {
                        s.clone()
                    } else {
                        format!("{}/{}", root.trim_end_matches('/'), s)
                    }
                })
                .collect(),
            _ => raw.sources.clone(),
        };
        let mut lines = Vec::new();
        let mut source = 0i64;
        let mut orig_line = 0i64;
        let mut orig_column = 0i64;
        for (generated_line, text) in raw.mappings.split(';').enumerate() {
            let mut column = 0i64;
            let mut segments = Vec::new();
            for segment in text.split(',').filter(|s| !s.is_empty()) {
                let fields = decode_segment(segment)?;
                let Some(&delta) = fields.first() else {
                    return Err(EpubError::bug(format!("source map中有空的映射段 `{}`", segment)));
                };
                column += delta;
                if fields.len() < 4 {
                    continue;
                }
                source += fields[1];
                orig_line += fields[2];
                orig_column += fields[3];
                segments.push(Mapping {
                    generated_line,
                    generated_column: column as usize,
                    source: source as usize,
                    original_line: orig_line as usize,
                    original_column: orig_column as usize,
                });
            }
            segments.sort_by_key(|m| m.generated_column);
            lines.push(segments);
        }
        Ok(SourceMap {
            sources,
            sources_content: raw.sources_content,
            lines,
        })
    }

    /// 查找生成位置（从0开始的行、列）对应的映射：取该行中列号不大于给定列的最后一段
    pub fn lookup(&self, line: usize, column: usize) -> Option<&Mapping> {
        self.lines
            .get(line)?
            .iter()
            .take_while(|m| m.generated_column <= column)
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq_known_values() {
        let mut out = String::new();
        encode_vlq(&mut out, 0);
        encode_vlq(&mut out, 1);
        encode_vlq(&mut out, -1);
        encode_vlq(&mut out, 16);
        assert_eq!(out, "ACDgB");
        assert_eq!(decode_segment("gB").unwrap(), vec![16]);
        assert_eq!(decode_segment("ACD").unwrap(), vec![0, 1, -1]);
    }

    #[test]
    fn test_truncated_mappings_are_errors() {
        assert!(matches!(decode_segment("g"), Err(EpubError::Bug(_))));
        assert!(matches!(decode_segment("gggggggggggggggg"), Err(EpubError::Bug(_))));

        let err = SourceMap::parse(r#"{"version":3,"sources":["a.xhtml"],"mappings":"g"}"#)
            .unwrap_err();
        assert!(err.to_string().starts_with("BUG:"));
        let err = SourceMap::parse(r#"{"version":3,"sources":["a.xhtml"],"mappings":"AAAA;AAAg"}"#)
            .unwrap_err();
        assert!(matches!(err, EpubError::Bug(_)));
    }

    #[test]
    fn test_lookup_picks_preceding_segment() {
        let mut builder = SourceMapBuilder::new();
        let a = builder.add_source("a.xhtml", Some("<p/>"));
        for (col, orig_col) in [(0, 5), (10, 20)] {
            builder.add_mapping(Mapping {
                generated_line: 1,
                generated_column: col,
                source: a,
                original_line: 3,
                original_column: orig_col,
            });
        }
        let json = serde_json::to_string(&builder.build(None)).unwrap();
        let map = SourceMap::parse(&json).unwrap();

        assert!(map.lookup(0, 0).is_none());
        assert_eq!(map.lookup(1, 4).unwrap().original_column, 5);
        assert_eq!(map.lookup(1, 10).unwrap().original_column, 20);
        assert_eq!(map.lookup(1, 99).unwrap().original_line, 3);
        assert_eq!(map.sources_content[0].as_deref(), Some("<p/>"));
    }
}
