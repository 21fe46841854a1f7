//! XPath子集
//!
//! 只实现流水线需要的部分：`/`、`//`、名称测试、`text()`、并集，
//! 以及谓词中的属性比较、`contains()`、`starts-with()`、`not()`、`and`/`or`
//! 和位置下标（`//x[n]` 中的下标按父节点分别计数）。名称前缀通过固定命名空间表解析，无前缀的名称只匹配无命名空间的元素。

use crate::dom::{Document, NodeId, NodeKind, QName};
use crate::epub::error::{EpubError, Result};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Pipe,
    Eq,
    Ne,
    Comma,
    Dot,
    DotDot,
    Star,
    Name(String),
    Literal(String),
    Number(usize),
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let err = |message: &str| EpubError::XPath {
        expr: expr.to_string(),
        message: message.to_string(),
    };
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| err("字符串字面量没有结束"))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            d if d.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse().map_err(|_| err("无效的数字"))?;
                tokens.push(Token::Number(n));
            }
            n if n.is_alphabetic() || n == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                let mut name: String = chars[start..i].iter().collect();
                // 前缀形式 `p:local` 或 `p:*`
                if chars.get(i) == Some(&':') {
                    if chars.get(i + 1) == Some(&'*') {
                        name.push_str(":*");
                        i += 2;
                    } else {
                        name.push(':');
                        i += 1;
                        while i < chars.len()
                            && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                        {
                            name.push(chars[i]);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Name(name));
            }
            _ => return Err(err(&format!("无法识别的字符 `{}`", c))),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Axis {
    Child,
    Descendant,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone)]
enum NodeTest {
    Name(QName),
    AnyInNs(String),
    AnyElement,
    Text,
    AnyNode,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
enum Value {
    Attr(QName),
    Path(LocationPath),
    Context,
}

#[derive(Debug, Clone)]
enum Predicate {
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
    Not(Box<Predicate>),
    Exists(Value),
    Equals(Value, String),
    NotEquals(Value, String),
    Contains(Value, String),
    StartsWith(Value, String),
    Position(usize),
}

/// 编译后的XPath表达式
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    union: Vec<LocationPath>,
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    at: usize,
}

impl<'a> Parser<'a> {
    fn err(&self, message: impl Into<String>) -> EpubError {
        EpubError::XPath {
            expr: self.expr.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        self.at += 1;
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(self.err(format!("期望 {:?}, 得到 {:?}", token, other))),
        }
    }

    fn union(&mut self) -> Result<Vec<LocationPath>> {
        let mut paths = vec![self.path()?];
        while self.peek() == Some(&Token::Pipe) {
            self.next();
            paths.push(self.path()?);
        }
        Ok(paths)
    }

    fn path(&mut self) -> Result<LocationPath> {
        let mut steps = Vec::new();
        let mut absolute = false;
        let mut axis = Axis::Child;
        match self.peek() {
            Some(Token::Slash) => {
                self.next();
                absolute = true;
            }
            Some(Token::DoubleSlash) => {
                self.next();
                absolute = true;
                axis = Axis::Descendant;
            }
            _ => {}
        }
        loop {
            steps.push(self.step(axis)?);
            match self.peek() {
                Some(Token::Slash) => {
                    self.next();
                    axis = Axis::Child;
                }
                Some(Token::DoubleSlash) => {
                    self.next();
                    axis = Axis::Descendant;
                }
                _ => break,
            }
        }
        Ok(LocationPath { absolute, steps })
    }

    fn step(&mut self, axis: Axis) -> Result<Step> {
        let (axis, test) = match self.next() {
            Some(Token::Dot) => (Axis::SelfNode, NodeTest::AnyNode),
            Some(Token::DotDot) => (Axis::Parent, NodeTest::AnyNode),
            Some(Token::Star) => (axis, NodeTest::AnyElement),
            Some(Token::Name(name)) if name == "text" && self.peek() == Some(&Token::LParen) => {
                self.expect(Token::LParen)?;
                self.expect(Token::RParen)?;
                (axis, NodeTest::Text)
            }
            Some(Token::Name(name)) => match name.strip_suffix(":*") {
                Some(prefix) => {
                    let ns = QName::parse(&format!("{}:x", prefix))?
                        .ns
                        .ok_or_else(|| self.err("前缀没有命名空间"))?;
                    (axis, NodeTest::AnyInNs(ns))
                }
                None => (axis, NodeTest::Name(QName::parse(&name)?)),
            },
            other => return Err(self.err(format!("期望路径步骤, 得到 {:?}", other))),
        };
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.next();
            predicates.push(self.or_expr()?);
            self.expect(Token::RBracket)?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn or_expr(&mut self) -> Result<Predicate> {
        let mut items = vec![self.and_expr()?];
        while matches!(self.peek(), Some(Token::Name(n)) if n == "or") {
            self.next();
            items.push(self.and_expr()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::Or(items)
        })
    }

    fn and_expr(&mut self) -> Result<Predicate> {
        let mut items = vec![self.unary()?];
        while matches!(self.peek(), Some(Token::Name(n)) if n == "and") {
            self.next();
            items.push(self.unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::And(items)
        })
    }

    fn unary(&mut self) -> Result<Predicate> {
        let is_call = self.tokens.get(self.at + 1) == Some(&Token::LParen);
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.next();
                Ok(Predicate::Position(n))
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) if is_call && name == "not" => {
                self.next();
                self.expect(Token::LParen)?;
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(Predicate::Not(Box::new(inner)))
            }
            Some(Token::Name(name)) if is_call && (name == "contains" || name == "starts-with") => {
                self.next();
                self.expect(Token::LParen)?;
                let value = self.value()?;
                self.expect(Token::Comma)?;
                let literal = self.literal()?;
                self.expect(Token::RParen)?;
                Ok(if name == "contains" {
                    Predicate::Contains(value, literal)
                } else {
                    Predicate::StartsWith(value, literal)
                })
            }
            _ => {
                let value = self.value()?;
                match self.peek() {
                    Some(Token::Eq) => {
                        self.next();
                        Ok(Predicate::Equals(value, self.literal()?))
                    }
                    Some(Token::Ne) => {
                        self.next();
                        Ok(Predicate::NotEquals(value, self.literal()?))
                    }
                    _ => Ok(Predicate::Exists(value)),
                }
            }
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek() {
            Some(Token::At) => {
                self.next();
                match self.next() {
                    Some(Token::Name(name)) => Ok(Value::Attr(QName::parse_attribute(&name)?)),
                    other => Err(self.err(format!("期望属性名, 得到 {:?}", other))),
                }
            }
            Some(Token::Dot) if !matches!(self.tokens.get(self.at + 1), Some(Token::Slash | Token::DoubleSlash)) => {
                self.next();
                Ok(Value::Context)
            }
            _ => Ok(Value::Path(self.path()?)),
        }
    }

    fn literal(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Literal(s)) => Ok(s),
            other => Err(self.err(format!("期望字符串字面量, 得到 {:?}", other))),
        }
    }
}

impl XPath {
    /// 编译表达式
    pub fn parse(expr: &str) -> Result<XPath> {
        let mut parser = Parser {
            expr,
            tokens: tokenize(expr)?,
            at: 0,
        };
        let union = parser.union()?;
        if parser.at != parser.tokens.len() {
            return Err(parser.err("表达式末尾有多余内容"));
        }
        Ok(XPath {
            source: expr.to_string(),
            union,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 以 `context` 为上下文节点求值，结果按文档顺序排列且不重复
    pub fn evaluate(&self, doc: &Document, context: NodeId) -> Vec<NodeId> {
        if let [single] = self.union.as_slice() {
            return eval_path(doc, context, single);
        }
        let mut seen = HashSet::new();
        let mut out: Vec<NodeId> = self
            .union
            .iter()
            .flat_map(|p| eval_path(doc, context, p))
            .filter(|id| seen.insert(*id))
            .collect();
        let order = doc.document_order();
        out.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
        out
    }
}

fn eval_path(doc: &Document, context: NodeId, path: &LocationPath) -> Vec<NodeId> {
    let mut current = vec![if path.absolute { doc.document() } else { context }];
    for step in &path.steps {
        let mut seen = HashSet::new();
        let mut next = Vec::new();
        for &node in &current {
            let matched = match step.axis {
                Axis::Child => filter_step(doc, doc.children(node).to_vec(), step),
                Axis::Descendant => {
                    // `//x` 即 `descendant-or-self::node()/x`，位置下标按父节点分别计数
                    let descendants = doc.descendants(node);
                    let mut kept = HashSet::new();
                    for &parent in std::iter::once(&node).chain(&descendants) {
                        kept.extend(filter_step(doc, doc.children(parent).to_vec(), step));
                    }
                    descendants.into_iter().filter(|id| kept.contains(id)).collect()
                }
                Axis::SelfNode => filter_step(doc, vec![node], step),
                Axis::Parent => filter_step(doc, doc.parent(node).into_iter().collect(), step),
            };
            next.extend(matched.into_iter().filter(|id| seen.insert(*id)));
        }
        current = next;
    }
    current
}

fn filter_step(doc: &Document, candidates: Vec<NodeId>, step: &Step) -> Vec<NodeId> {
    let mut matched: Vec<NodeId> = candidates
        .into_iter()
        .filter(|&id| test_matches(doc, id, &step.test))
        .collect();
    for predicate in &step.predicates {
        matched = matched
            .iter()
            .enumerate()
            .filter(|(i, id)| predicate_matches(doc, **id, *i + 1, predicate))
            .map(|(_, id)| *id)
            .collect();
    }
    matched
}

fn test_matches(doc: &Document, id: NodeId, test: &NodeTest) -> bool {
    match (test, doc.kind(id)) {
        (NodeTest::AnyNode, _) => true,
        (NodeTest::Text, NodeKind::Text(_)) => true,
        (NodeTest::AnyElement, NodeKind::Element { .. }) => true,
        (NodeTest::AnyInNs(ns), NodeKind::Element { name, .. }) => {
            name.ns.as_deref() == Some(ns.as_str())
        }
        (NodeTest::Name(want), NodeKind::Element { name, .. }) => name.matches(want),
        _ => false,
    }
}

fn string_value(doc: &Document, id: NodeId, value: &Value) -> Option<String> {
    match value {
        Value::Attr(name) => doc
            .attributes(id)
            .iter()
            .find(|a| a.name.matches(name))
            .map(|a| a.value.clone()),
        Value::Path(path) => eval_path(doc, id, path).first().map(|&n| doc.text(n)),
        Value::Context => Some(doc.text(id)),
    }
}

fn predicate_matches(doc: &Document, id: NodeId, position: usize, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Or(items) => items.iter().any(|p| predicate_matches(doc, id, position, p)),
        Predicate::And(items) => items.iter().all(|p| predicate_matches(doc, id, position, p)),
        Predicate::Not(inner) => !predicate_matches(doc, id, position, inner),
        Predicate::Exists(Value::Path(path)) => !eval_path(doc, id, path).is_empty(),
        Predicate::Exists(value) => string_value(doc, id, value).is_some(),
        Predicate::Equals(value, lit) => string_value(doc, id, value).as_deref() == Some(lit),
        Predicate::NotEquals(value, lit) => {
            string_value(doc, id, value).is_some_and(|v| v != *lit)
        }
        Predicate::Contains(value, lit) => {
            string_value(doc, id, value).is_some_and(|v| v.contains(lit.as_str()))
        }
        Predicate::StartsWith(value, lit) => {
            string_value(doc, id, value).is_some_and(|v| v.starts_with(lit.as_str()))
        }
        Predicate::Position(n) => position == *n,
    }
}

impl Document {
    /// 查询所有匹配的节点
    ///
    /// # 参数
    /// * `context` - 相对路径的上下文节点
    /// * `expr` - XPath表达式
    pub fn find(&self, context: NodeId, expr: &str) -> Result<Vec<NodeId>> {
        Ok(XPath::parse(expr)?.evaluate(self, context))
    }

    /// 查询恰好一个节点，匹配数不为1时报错
    pub fn find_one(&self, context: NodeId, expr: &str) -> Result<NodeId> {
        let found = self.find(context, expr)?;
        match found.as_slice() {
            [single] => Ok(*single),
            _ => Err(EpubError::MatchCount {
                expr: expr.to_string(),
                count: found.len(),
            }),
        }
    }

    pub fn has(&self, context: NodeId, expr: &str) -> Result<bool> {
        Ok(!self.find(context, expr)?.is_empty())
    }

    pub fn map<T>(
        &self,
        context: NodeId,
        expr: &str,
        f: impl FnMut(NodeId) -> T,
    ) -> Result<Vec<T>> {
        Ok(self.find(context, expr)?.into_iter().map(f).collect())
    }

    /// 对每个匹配节点执行可修改文档的操作（先收集结果，再逐个处理）
    pub fn for_each(
        &mut self,
        context: NodeId,
        expr: &str,
        mut f: impl FnMut(&mut Document, NodeId) -> Result<()>,
    ) -> Result<()> {
        for id in self.find(context, expr)? {
            f(self, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_xml;

    const PAGE: &str = r##"<html xmlns="http://www.w3.org/1999/xhtml"><body>
<h1 data-type="document-title">Title</h1>
<a href="other.xhtml#frag">x</a>
<a href="#local">y</a>
<a href="https://example.org">z</a>
<div class="os-has-iframe os-has-link"><iframe src="https://example.org/embed"/></div>
<math><mi>x</mi></math>
</body></html>"##;

    fn doc() -> Document {
        parse_xml(PAGE, "/book/page.xhtml").unwrap()
    }

    #[test]
    fn test_descendant_with_attribute_predicate() {
        let doc = doc();
        let root = doc.document();
        let title = doc
            .find_one(root, r#"//h:h1[@data-type="document-title"]"#)
            .unwrap();
        assert_eq!(doc.text(title), "Title");
    }

    #[test]
    fn test_not_or_starts_with() {
        let doc = doc();
        let links = doc
            .find(
                doc.document(),
                r##"//h:a[not(starts-with(@href, "#") or starts-with(@href, "http:") or starts-with(@href, "https:"))]"##,
            )
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(doc.attr(links[0], "href").unwrap(), Some("other.xhtml#frag"));
    }

    #[test]
    fn test_contains_and_nested_descendant() {
        let doc = doc();
        let frames = doc
            .find(
                doc.document(),
                r#"//h:*[contains(@class, "os-has-iframe") and contains(@class, "os-has-link")]//h:iframe"#,
            )
            .unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_union_in_document_order() {
        let doc = doc();
        let found = doc.find(doc.document(), "//h:math//*|//h:math").unwrap();
        assert_eq!(found.len(), 2);
        assert!(doc.name(found[0]).unwrap().local == "math");
        assert!(doc.name(found[1]).unwrap().local == "mi");
    }

    #[test]
    fn test_position_and_relative_path() {
        let doc = doc();
        let body = doc.find_one(doc.document(), "/h:html/h:body").unwrap();
        let second = doc.find_one(body, "h:a[2]").unwrap();
        assert_eq!(doc.attr(second, "href").unwrap(), Some("#local"));
        assert!(doc.has(body, "h:div[h:iframe]").unwrap());
        assert!(!doc.has(body, "h:div[h:span]").unwrap());
    }

    #[test]
    fn test_descendant_position_counts_per_parent() {
        let doc = parse_xml(
            r#"<ol xmlns="http://www.w3.org/1999/xhtml"><li><a href="1"/><a href="2"/></li><li><a href="3"/><ol><li><a href="4"/></li></ol></li></ol>"#,
            "/book/toc.xhtml",
        )
        .unwrap();
        let hrefs = |expr: &str| -> Vec<String> {
            doc.find(doc.document(), expr)
                .unwrap()
                .into_iter()
                .map(|id| doc.attr(id, "href").unwrap().unwrap_or_default().to_string())
                .collect()
        };
        assert_eq!(hrefs("//h:a[1]"), vec!["1", "3", "4"]);
        assert_eq!(hrefs("//h:a[2]"), vec!["2"]);
        assert_eq!(hrefs("//h:li[2]/h:a"), vec!["3"]);
        assert_eq!(hrefs("//h:a"), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_unprefixed_name_matches_no_namespace_only() {
        let doc = doc();
        assert!(!doc.has(doc.document(), "//a").unwrap());
    }

    #[test]
    fn test_find_one_reports_count() {
        let doc = doc();
        match doc.find_one(doc.document(), "//h:a") {
            Err(EpubError::MatchCount { count, .. }) => assert_eq!(count, 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(XPath::parse("//h:a["), Err(EpubError::XPath { .. })));
        assert!(matches!(XPath::parse("//zz:a"), Err(EpubError::UnknownPrefix(_))));
    }
}
