//! Canonical policy documents.
//!
//! The canonical JSON form is read twice: once into a small document tree that
//! remembers where every node came from, and once through serde into the typed
//! model. Condition rules are then parsed, and any failure is reported at the
//! line and column of the rule inside the original document.
//!
//! Accepted top-level shapes:
//! - an envelope `{ "policies": [...], "app": "..." }`
//! - a bare array of policies
//! - a single policy object

use std::ops::Range;

use tracing::debug;

use crate::condition::Expr;
use crate::error::{ParseError, ParseErrorKind, PolicyError};
use crate::types::{Policies, Policy};

/// Pre-computed line starts for mapping byte offsets to 1-based line/column pairs.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        LineIndex { text, starts }
    }

    /// 1-based `(line, column)` for a byte offset. Columns count characters.
    pub fn position(&self, offset: usize) -> (usize, usize) {
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
        (line + 1, column + 1)
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}

/// A JSON node together with the byte range it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Null,
    Bool(bool),
    Number(String),
    /// The decoded string; `span` covers the quotes.
    String(String),
    Array(Vec<Node>),
    Object(Vec<(Key, Node)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub name: String,
    pub span: Range<usize>,
}

/// One step in a path through a document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

impl Node {
    /// Look up a direct child by object key.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.kind {
            NodeKind::Object(members) => members.iter().find(|(k, _)| k.name == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&Node> {
        match &self.kind {
            NodeKind::Array(items) => items.get(i),
            _ => None,
        }
    }

    pub fn find(&self, path: &[PathSegment<'_>]) -> Option<&Node> {
        path.iter().try_fold(self, |node, seg| match seg {
            PathSegment::Key(k) => node.get(k),
            PathSegment::Index(i) => node.index(*i),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Parse JSON text into a positioned document tree.
pub fn parse_document(text: &str) -> Result<Node, PolicyError> {
    let mut p = JsonScanner { text, pos: 0 };
    p.skip_ws();
    let node = p.value(0)?;
    p.skip_ws();
    if p.pos < text.len() {
        return Err(p.error(ParseErrorKind::InvalidJson, "trailing characters after document"));
    }
    Ok(node)
}

const MAX_DEPTH: usize = 128;

struct JsonScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl JsonScanner<'_> {
    fn error(&self, kind: ParseErrorKind, message: impl Into<String>) -> PolicyError {
        PolicyError::Document(ParseError::at(kind, self.text, self.pos, message))
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, want: char) -> Result<(), PolicyError> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(
                ParseErrorKind::UnexpectedToken,
                format!("expected '{want}', found '{c}'"),
            )),
            None => Err(self.error(
                ParseErrorKind::IncompleteExpression,
                format!("expected '{want}', found end of document"),
            )),
        }
    }

    fn value(&mut self, depth: usize) -> Result<Node, PolicyError> {
        if depth > MAX_DEPTH {
            return Err(self.error(ParseErrorKind::InvalidJson, "document nested too deeply"));
        }
        let start = self.pos;
        let kind = match self.peek() {
            None => {
                return Err(self.error(ParseErrorKind::IncompleteExpression, "unexpected end of document"));
            }
            Some('{') => self.object(depth)?,
            Some('[') => self.array(depth)?,
            Some('"') => NodeKind::String(self.string()?),
            Some('t') => self.keyword("true", NodeKind::Bool(true))?,
            Some('f') => self.keyword("false", NodeKind::Bool(false))?,
            Some('n') => self.keyword("null", NodeKind::Null)?,
            Some(c) if c == '-' || c.is_ascii_digit() => self.number()?,
            Some(c) => {
                return Err(self.error(ParseErrorKind::UnexpectedToken, format!("unexpected character '{c}'")));
            }
        };
        Ok(Node {
            kind,
            span: start..self.pos,
        })
    }

    fn keyword(&mut self, word: &str, kind: NodeKind) -> Result<NodeKind, PolicyError> {
        if self.text[self.pos..].starts_with(word) {
            self.pos += word.len();
            Ok(kind)
        } else {
            Err(self.error(ParseErrorKind::UnexpectedToken, format!("expected '{word}'")))
        }
    }

    fn number(&mut self) -> Result<NodeKind, PolicyError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let lexeme = &self.text[start..self.pos];
        if lexeme.parse::<f64>().is_err() {
            self.pos = start;
            return Err(self.error(ParseErrorKind::InvalidValue, format!("malformed number '{lexeme}'")));
        }
        Ok(NodeKind::Number(lexeme.to_string()))
    }

    fn string(&mut self) -> Result<String, PolicyError> {
        let start = self.pos;
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = start;
                    return Err(self.error(ParseErrorKind::UnterminatedString, "unterminated string"));
                }
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => self.unicode_escape()?,
                        _ => return Err(self.error(ParseErrorKind::InvalidJson, "invalid escape sequence")),
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char, PolicyError> {
        let hex4 = |s: &mut Self| -> Result<u32, PolicyError> {
            let digits = s.text.get(s.pos..s.pos + 4).unwrap_or("");
            let v = u32::from_str_radix(digits, 16)
                .map_err(|_| s.error(ParseErrorKind::InvalidJson, "invalid unicode escape"))?;
            s.pos += 4;
            Ok(v)
        };
        let high = hex4(self)?;
        let code = if (0xD800..0xDC00).contains(&high) && self.text[self.pos..].starts_with("\\u") {
            self.pos += 2;
            let low = hex4(self)?;
            0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF)
        } else {
            high
        };
        char::from_u32(code).ok_or_else(|| self.error(ParseErrorKind::InvalidJson, "invalid unicode scalar"))
    }

    fn array(&mut self, depth: usize) -> Result<NodeKind, PolicyError> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(NodeKind::Array(items));
        }
        loop {
            self.skip_ws();
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(NodeKind::Array(items));
                }
                None => return Err(self.error(ParseErrorKind::UnbalancedBracket, "array is not closed")),
                Some(c) => {
                    return Err(self.error(ParseErrorKind::UnexpectedToken, format!("expected ',' or ']', found '{c}'")));
                }
            }
        }
    }

    fn object(&mut self, depth: usize) -> Result<NodeKind, PolicyError> {
        self.expect('{')?;
        let mut members = Vec::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(NodeKind::Object(members));
        }
        loop {
            self.skip_ws();
            let key_start = self.pos;
            let name = self.string()?;
            let key = Key {
                name,
                span: key_start..self.pos,
            };
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value(depth + 1)?;
            members.push((key, value));
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(NodeKind::Object(members));
                }
                None => return Err(self.error(ParseErrorKind::UnbalancedBracket, "object is not closed")),
                Some(c) => {
                    return Err(self.error(ParseErrorKind::UnexpectedToken, format!("expected ',' or '}}', found '{c}'")));
                }
            }
        }
    }
}

/// A parsed canonical document: the typed policies, their parsed conditions, and
/// the positioned tree they came from.
#[derive(Debug, Clone)]
pub struct PolicyDocument<'a> {
    text: &'a str,
    root: Node,
    policies: Policies,
    conditions: Vec<Option<Expr>>,
}

impl<'a> PolicyDocument<'a> {
    pub fn parse(text: &'a str) -> Result<Self, PolicyError> {
        let root = parse_document(text)?;
        let policies = match &root.kind {
            NodeKind::Array(_) => serde_json::from_str::<Vec<Policy>>(text).map(Policies::new),
            NodeKind::Object(_) if root.get("policies").is_some() => {
                serde_json::from_str::<Policies>(text)
            }
            _ => serde_json::from_str::<Policy>(text).map(|p| Policies::new(vec![p])),
        }
        .map_err(|e| Self::shape_error(text, &root, e))?;

        let index = LineIndex::new(text);
        let mut conditions = Vec::with_capacity(policies.policies.len());
        for (i, policy) in policies.policies.iter().enumerate() {
            let Some(condition) = &policy.condition else {
                conditions.push(None);
                continue;
            };
            match condition.parse_rule() {
                Ok(expr) => conditions.push(Some(expr)),
                Err(PolicyError::ConditionParse(err)) => {
                    let rebased = match Self::rule_node(&root, i) {
                        Some(node) => err.rebase(&index, rule_content_offset(text, node)),
                        None => err,
                    };
                    return Err(PolicyError::ConditionParse(rebased));
                }
                Err(other) => return Err(other),
            }
        }

        debug!(
            event = "Document",
            phase = "Parsed",
            policies = policies.policies.len(),
            lines = index.line_count()
        );

        Ok(PolicyDocument {
            text,
            root,
            policies,
            conditions,
        })
    }

    fn shape_error(text: &str, root: &Node, err: serde_json::Error) -> PolicyError {
        let shape = match &root.kind {
            NodeKind::Object(_) | NodeKind::Array(_) => "policy document",
            _ => "policy document (expected an object or array)",
        };
        let index = LineIndex::new(text);
        let offset = index
            .starts
            .get(err.line().saturating_sub(1))
            .map(|s| s + err.column().saturating_sub(1))
            .unwrap_or(0);
        PolicyError::Document(ParseError {
            kind: ParseErrorKind::InvalidJson,
            offset,
            line: err.line(),
            column: err.column(),
            message: format!("invalid {shape}: {err}"),
        })
    }

    /// Locate the `condition.rule` string node for the i-th policy, whichever
    /// top-level shape the document used.
    fn rule_node(root: &Node, i: usize) -> Option<&Node> {
        let rule_path = [PathSegment::Key("condition"), PathSegment::Key("rule")];
        let policy = match &root.kind {
            NodeKind::Array(_) => root.index(i)?,
            NodeKind::Object(_) => match root.get("policies") {
                Some(list) => list.index(i)?,
                None => root,
            },
            _ => return None,
        };
        policy.find(&rule_path)
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn into_policies(self) -> Policies {
        self.policies
    }

    /// Parsed condition of the i-th policy.
    pub fn condition(&self, i: usize) -> Option<&Expr> {
        self.conditions.get(i).and_then(|c| c.as_ref())
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// 1-based line/column of the i-th policy in the source text.
    pub fn policy_position(&self, i: usize) -> Option<(usize, usize)> {
        let node = match &self.root.kind {
            NodeKind::Array(_) => self.root.index(i)?,
            NodeKind::Object(_) => match self.root.get("policies") {
                Some(list) => list.index(i)?,
                None if i == 0 => &self.root,
                None => return None,
            },
            _ => return None,
        };
        Some(LineIndex::new(self.text).position(node.span.start))
    }
}

/// Byte offset of the first content character of a string node. Rules without
/// escapes map one to one onto the source; rules with escapes are approximated.
fn rule_content_offset(text: &str, node: &Node) -> usize {
    match text.get(node.span.clone()) {
        Some(raw) if raw.starts_with('"') => node.span.start + 1,
        _ => node.span.start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_positions() {
        let text = "ab\ncde\n\nf";
        let index = LineIndex::new(text);
        assert_eq!(index.position(0), (1, 1));
        assert_eq!(index.position(1), (1, 2));
        assert_eq!(index.position(3), (2, 1));
        assert_eq!(index.position(5), (2, 3));
        assert_eq!(index.position(7), (3, 1));
        assert_eq!(index.position(8), (4, 1));
        assert_eq!(index.line_count(), 4);
    }

    #[test]
    fn test_line_index_counts_characters() {
        let text = "é=1";
        let index = LineIndex::new(text);
        assert_eq!(index.position(2), (1, 2));
    }

    #[test]
    fn test_parse_document_spans() {
        let text = r#"{"a": [1, "x"], "b": null}"#;
        let root = parse_document(text).unwrap();
        let a = root.get("a").unwrap();
        assert_eq!(&text[a.span.clone()], r#"[1, "x"]"#);
        let x = root.find(&[PathSegment::Key("a"), PathSegment::Index(1)]).unwrap();
        assert_eq!(x.as_str(), Some("x"));
        assert_eq!(&text[x.span.clone()], r#""x""#);
        assert_eq!(root.get("b").unwrap().kind, NodeKind::Null);
    }

    #[test]
    fn test_parse_document_escapes() {
        let root = parse_document(r#"["a\"bé\n"]"#).unwrap();
        assert_eq!(root.index(0).unwrap().as_str(), Some("a\"bé\n"));
    }

    #[test]
    fn test_parse_document_errors_have_positions() {
        let err = parse_document("{\n  \"a\": tru\n}").unwrap_err();
        let pe = err.parse_error().unwrap();
        assert_eq!(pe.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!((pe.line, pe.column), (2, 8));

        let err = parse_document("[1, 2").unwrap_err();
        assert_eq!(err.parse_error().unwrap().kind, ParseErrorKind::UnbalancedBracket);

        let err = parse_document("\"abc").unwrap_err();
        assert_eq!(err.parse_error().unwrap().kind, ParseErrorKind::UnterminatedString);

        let err = parse_document("{} x").unwrap_err();
        assert_eq!(err.parse_error().unwrap().kind, ParseErrorKind::InvalidJson);
    }

    const ENVELOPE: &str = r#"{
  "app": "photos",
  "extra": true,
  "policies": [
    {
      "meta": {"version": "0.7"},
      "subjects": ["User:alice"],
      "actions": ["view"],
      "object": "Photo:vacation.jpg",
      "condition": {"rule": "resource.owner eq \"alice\"", "action": "allow"}
    },
    {
      "meta": {"version": "0.7"},
      "subjects": ["any"],
      "actions": ["list"],
      "object": "Album:"
    }
  ]
}"#;

    #[test]
    fn test_policy_document_envelope() {
        let doc = PolicyDocument::parse(ENVELOPE).unwrap();
        assert_eq!(doc.policies().app.as_deref(), Some("photos"));
        assert_eq!(doc.policies().policies.len(), 2);
        assert!(doc.condition(0).is_some());
        assert!(doc.condition(1).is_none());
        assert_eq!(doc.policy_position(1), Some((12, 5)));
    }

    #[test]
    fn test_policy_document_bare_array_and_single() {
        let list = r#"[{"meta":{"version":"0.7"},"subjects":["any"],"actions":[],"object":""}]"#;
        assert_eq!(PolicyDocument::parse(list).unwrap().policies().policies.len(), 1);

        let single = r#"{"meta":{"version":"0.7"},"subjects":["any"],"actions":["a"],"object":"x"}"#;
        let doc = PolicyDocument::parse(single).unwrap();
        assert_eq!(doc.policies().policies[0].actions, vec!["a".to_string()]);
        assert_eq!(doc.policy_position(0), Some((1, 1)));
    }

    #[test]
    fn test_policy_document_rule_error_points_into_document() {
        let text = "[\n  {\"meta\": {\"version\": \"0.7\"}, \"subjects\": [\"any\"], \"actions\": [], \"object\": \"\",\n   \"condition\": {\"rule\": \"a eq 1 b eq 2\"}}\n]";
        let err = PolicyDocument::parse(text).unwrap_err();
        let pe = err.parse_error().unwrap();
        assert_eq!(pe.kind, ParseErrorKind::MissingLogicalOperator);
        assert_eq!(pe.line, 3);
        // the rule starts at column 27; `a eq 1 ` is 7 more characters.
        assert_eq!(pe.column, 34);
    }

    #[test]
    fn test_policy_document_shape_error() {
        let err = PolicyDocument::parse(r#"{"policies": [{"subjects": 5}]}"#).unwrap_err();
        assert!(matches!(err, PolicyError::Document(_)));
    }
}
