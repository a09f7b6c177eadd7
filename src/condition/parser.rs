//! Recursive-descent parser for condition rules.
//!
//! `and` and `or` are left-associative with equal precedence; explicit
//! parentheses are kept as `Precedence` nodes.

use crate::error::{ParseError, ParseErrorKind, PolicyError};
use crate::types::Value;

use super::ast::{CompareOp, Expr, LogicalOp};

const MAX_DEPTH: usize = 128;

pub fn parse(input: &str) -> Result<Expr, PolicyError> {
    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Err(parser.error(ParseErrorKind::IncompleteExpression, 0, "empty expression"));
    }
    let expr = parser.filter(false)?;
    parser.skip_ws();
    match parser.peek() {
        None => Ok(expr),
        Some(')') => Err(parser.error(
            ParseErrorKind::UnbalancedParen,
            parser.pos,
            "unmatched ')'",
        )),
        Some(']') => Err(parser.error(
            ParseErrorKind::UnbalancedBracket,
            parser.pos,
            "unmatched ']'",
        )),
        Some(_) => Err(parser.error(
            ParseErrorKind::UnexpectedToken,
            parser.pos,
            "unexpected input",
        )),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, kind: ParseErrorKind, offset: usize, message: impl Into<String>) -> PolicyError {
        PolicyError::ConditionParse(ParseError::at(kind, self.input, offset, message))
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn incomplete(&self) -> PolicyError {
        self.error(
            ParseErrorKind::IncompleteExpression,
            self.input.len(),
            "expression ends unexpectedly",
        )
    }

    /// End offset of a double-quoted string starting at `start`.
    fn scan_quoted(&self, start: usize) -> Result<usize, PolicyError> {
        let mut escaped = false;
        for (i, c) in self.input[start + 1..].char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => return Ok(start + 1 + i + 1),
                _ => {}
            }
        }
        Err(self.error(
            ParseErrorKind::UnterminatedString,
            start,
            "unterminated string",
        ))
    }

    /// End offset of a bare token starting at `start`. Quoted segments inside a
    /// token, as in `User::"alice"`, are part of the token.
    fn scan_bare(&self, start: usize) -> Result<usize, PolicyError> {
        let mut end = start;
        while let Some(c) = self.input[end..].chars().next() {
            match c {
                c if c.is_whitespace() => break,
                '(' | ')' | '[' | ']' | ',' => break,
                '"' => end = self.scan_quoted(end)?,
                c => end += c.len_utf8(),
            }
        }
        Ok(end)
    }

    fn take_bare(&mut self) -> Result<&'a str, PolicyError> {
        let start = self.pos;
        let end = self.scan_bare(start)?;
        self.pos = end;
        Ok(&self.input[start..end])
    }

    fn filter(&mut self, in_brackets: bool) -> Result<Expr, PolicyError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(
                ParseErrorKind::UnexpectedToken,
                self.pos,
                "expression nested too deeply",
            ));
        }
        let mut left = self.term(in_brackets)?;
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some(')') | Some(']') => break,
                _ => {}
            }
            let start = self.pos;
            let end = self.scan_bare(start)?;
            let word = &self.input[start..end];
            let op = match word.parse::<LogicalOp>() {
                Ok(op) if !word.is_empty() => op,
                _ => {
                    return Err(self.error(
                        ParseErrorKind::MissingLogicalOperator,
                        start,
                        format!("expected 'and' or 'or' before '{}'", preview(&self.input[start..])),
                    ));
                }
            };
            self.pos = end;
            self.skip_ws();
            if self.at_end() {
                return Err(self.incomplete());
            }
            let right = self.term(in_brackets)?;
            left = Expr::logical(op, left, right);
        }
        self.depth -= 1;
        Ok(left)
    }

    fn term(&mut self, in_brackets: bool) -> Result<Expr, PolicyError> {
        self.skip_ws();
        let start = self.pos;
        let end = self.scan_bare(start)?;
        let word = &self.input[start..end];
        if word.eq_ignore_ascii_case("not") {
            match self.input[end..].chars().next() {
                Some('(') => {
                    // `not(...)` keeps no grouping of its own
                    self.pos = end;
                    let open = self.pos;
                    self.pos += 1;
                    let inner = self.filter(in_brackets)?;
                    self.expect_close(')', open)?;
                    return Ok(Expr::negate(inner));
                }
                Some(c) if c.is_whitespace() => {
                    self.pos = end;
                    self.skip_ws();
                    if self.at_end() {
                        return Err(self.incomplete());
                    }
                    return Ok(Expr::negate(self.factor(in_brackets)?));
                }
                _ => {}
            }
        }
        self.factor(in_brackets)
    }

    fn expect_close(&mut self, close: char, open: usize) -> Result<(), PolicyError> {
        self.skip_ws();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(());
        }
        Err(match close {
            ')' => self.error(ParseErrorKind::UnbalancedParen, open, "unclosed '('"),
            _ => self.error(ParseErrorKind::UnbalancedBracket, open, "unclosed '['"),
        })
    }

    fn factor(&mut self, in_brackets: bool) -> Result<Expr, PolicyError> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            None => return Err(self.incomplete()),
            Some('(') => {
                self.pos += 1;
                let inner = self.filter(in_brackets)?;
                self.expect_close(')', start)?;
                return Ok(Expr::group(inner));
            }
            Some(c @ (')' | ']' | '[' | ',')) => {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    start,
                    format!("unexpected '{c}'"),
                ));
            }
            _ => {}
        }

        let path = self.take_bare()?;
        if self.peek() == Some('[') {
            return self.value_path(path, in_brackets);
        }

        self.skip_ws();
        if self.at_end() {
            return Err(self.incomplete());
        }
        let op_start = self.pos;
        let op = self.operator()?.ok_or_else(|| {
            self.error(
                ParseErrorKind::UnsupportedOperator,
                op_start,
                format!("unsupported operator '{}'", preview(&self.input[op_start..])),
            )
        })?;
        let value = self.operand(op)?;
        Ok(Expr::attr(path, op, value))
    }

    /// Consume a comparison operator, or leave the position untouched.
    fn operator(&mut self) -> Result<Option<CompareOp>, PolicyError> {
        let start = self.pos;
        let end = self.scan_bare(start)?;
        match self.input[start..end].parse::<CompareOp>() {
            Ok(op) if end > start => {
                self.pos = end;
                Ok(Some(op))
            }
            _ => Ok(None),
        }
    }

    fn operand(&mut self, op: CompareOp) -> Result<Value, PolicyError> {
        if op == CompareOp::Pr {
            return Ok(Value::Empty);
        }
        self.skip_ws();
        if self.at_end() {
            return Err(self.incomplete());
        }
        self.value()
    }

    fn value_path(&mut self, attr: &str, in_brackets: bool) -> Result<Expr, PolicyError> {
        let open = self.pos;
        if in_brackets {
            return Err(self.error(
                ParseErrorKind::InvalidNestedValuePath,
                open,
                "value paths cannot be nested",
            ));
        }
        self.pos += 1;
        let filter = self.filter(true)?;
        self.expect_close(']', open)?;

        let sub_attr = if self.peek() == Some('.') {
            self.pos += 1;
            let sub_start = self.pos;
            let sub = self.take_bare()?;
            if sub.is_empty() {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    sub_start,
                    "expected an attribute after '.'",
                ));
            }
            Some(sub.to_string())
        } else {
            None
        };

        let before_op = self.pos;
        self.skip_ws();
        let (op, value) = match self.operator()? {
            Some(op) => (Some(op), Some(self.operand(op)?)),
            None => {
                self.pos = before_op;
                (None, None)
            }
        };

        Ok(Expr::ValuePath {
            attr: attr.to_string(),
            filter: Box::new(filter),
            sub_attr,
            op,
            value,
        })
    }

    fn value(&mut self) -> Result<Value, PolicyError> {
        let start = self.pos;
        match self.peek() {
            Some('"') => {
                let end = self.scan_quoted(start)?;
                self.pos = end;
                Value::from_quoted(&self.input[start..end])
                    .map_err(|e| self.error(ParseErrorKind::InvalidValue, start, e.to_string()))
            }
            Some('[') => self.array(),
            Some(c @ ('(' | ')' | ']' | ',')) => Err(self.error(
                ParseErrorKind::UnexpectedToken,
                start,
                format!("expected a value, found '{c}'"),
            )),
            _ => {
                let token = self.take_bare()?;
                Value::from_bare(token)
                    .map_err(|e| self.error(ParseErrorKind::InvalidValue, start, e.to_string()))
            }
        }
    }

    fn array(&mut self) -> Result<Value, PolicyError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(
                ParseErrorKind::UnexpectedToken,
                self.pos,
                "array nested too deeply",
            ));
        }
        let array = self.array_items()?;
        self.depth -= 1;
        Ok(array)
    }

    fn array_items(&mut self) -> Result<Value, PolicyError> {
        let open = self.pos;
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => {
                    return Err(self.error(
                        ParseErrorKind::UnbalancedBracket,
                        open,
                        "unclosed '['",
                    ));
                }
                Some(']') if items.is_empty() => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                _ => {}
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                None => {
                    return Err(self.error(
                        ParseErrorKind::UnbalancedBracket,
                        open,
                        "unclosed '['",
                    ));
                }
                Some(c) => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedToken,
                        self.pos,
                        format!("expected ',' or ']', found '{c}'"),
                    ));
                }
            }
        }
    }
}

fn preview(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use insta::assert_json_snapshot;
    use yare::parameterized;

    #[parameterized(
        not_and_precedence = { r#"name pr and not (first eq "test") and another ne "test""# },
        tight_not = { "not(a eq 1)" },
        not_logical = { "not(a eq 1 or b eq 2)" },
        left_assoc = { "a eq 1 and b eq 2 or c eq 3" },
        grouped_right = { "a eq 1 and (b eq 2 or c eq 3)" },
        nested_groups = { "((a pr))" },
        value_path = { r#"emails[type eq "work" and value co "@example.com"]"# },
        value_path_sub = { r#"emails[type eq "work"].value ew "@example.com""# },
        value_path_in_logical = { r#"emails[primary eq true] and name pr"# },
        cedar_uid_value = { r#"principal in Group::"admins""# },
        quoted_key = { r#"resource."literal id" eq 5"# },
        array_value = { r#"resource.tags in ["a", "b", 3]"# },
        empty_array = { "resource.tags in []" },
        exponent = { "x.rate lt 1.23e-5" },
        spaced_string = { r#"dept eq "w o(rk)""# },
        date = { "context.time gt 2024-03-01T10:00:00+00:00" },
        is_type = { "principal is User" },
        booleans = { "context.mfa eq true or context.sso ne false" },
    )]
    fn test_parse_serialize_round_trip(rule: &str) {
        let expr = parse(rule).unwrap();
        assert_eq!(expr.to_string(), rule);
    }

    #[parameterized(
        uppercase_keywords = { "a EQ 1 AND NOT b PR", "a eq 1 and not(b pr)" },
        extra_space = { "  a   eq   1  ", "a eq 1" },
        spaced_not = { "not a pr", "not(a pr)" },
        value_path_space_before_op = { "emails[primary eq true].value   sw x", "emails[primary eq true].value sw x" },
        entity_with_brackets = { r#"principal in "User[Group:a]""#, r#"principal in "User[Group:a]""# },
    )]
    fn test_parse_normalizes(rule: &str, expected: &str) {
        assert_eq!(parse(rule).unwrap().to_string(), expected);
    }

    #[test]
    fn test_parse_structure() {
        let expr = parse("a eq 1 and b eq 2 or c pr").unwrap();
        assert_json_snapshot!(expr, @r#"
        {
          "Logical": {
            "op": "or",
            "left": {
              "Logical": {
                "op": "and",
                "left": {
                  "Attribute": {
                    "path": "a",
                    "op": "eq",
                    "value": {
                      "type": "Number",
                      "value": 1.0
                    }
                  }
                },
                "right": {
                  "Attribute": {
                    "path": "b",
                    "op": "eq",
                    "value": {
                      "type": "Number",
                      "value": 2.0
                    }
                  }
                }
              }
            },
            "right": {
              "Attribute": {
                "path": "c",
                "op": "pr",
                "value": {
                  "type": "Empty"
                }
              }
            }
          }
        }
        "#);
    }

    #[test]
    fn test_not_spacing_sets_grouping() {
        assert!(matches!(
            parse("not (a pr)").unwrap(),
            Expr::Not(inner) if matches!(*inner, Expr::Precedence(_))
        ));
        assert!(matches!(
            parse("not(a pr)").unwrap(),
            Expr::Not(inner) if matches!(*inner, Expr::Attribute { .. })
        ));
    }

    #[test]
    fn test_value_path_parts() {
        let expr = parse(r#"emails[type eq "work"].value sw "a""#).unwrap();
        let Expr::ValuePath {
            attr,
            sub_attr,
            op,
            value,
            ..
        } = expr
        else {
            panic!("expected a value path");
        };
        assert_eq!(attr, "emails");
        assert_eq!(sub_attr.as_deref(), Some("value"));
        assert_eq!(op, Some(CompareOp::Sw));
        assert_eq!(value, Some(Value::String("a".into())));
    }

    #[parameterized(
        empty = { "", ParseErrorKind::IncompleteExpression, 0 },
        missing_logical = { "a eq 1 b eq 2", ParseErrorKind::MissingLogicalOperator, 7 },
        unsupported_op = { "name xx 5", ParseErrorKind::UnsupportedOperator, 5 },
        unclosed_paren = { "a pr and (b pr", ParseErrorKind::UnbalancedParen, 9 },
        stray_paren = { "a pr)", ParseErrorKind::UnbalancedParen, 4 },
        unclosed_bracket = { "emails[type pr", ParseErrorKind::UnbalancedBracket, 6 },
        stray_bracket = { "a pr]", ParseErrorKind::UnbalancedBracket, 4 },
        nested_value_path = { "a[b[c pr]]", ParseErrorKind::InvalidNestedValuePath, 3 },
        dangling_and = { "a pr and", ParseErrorKind::IncompleteExpression, 8 },
        missing_value = { "a eq", ParseErrorKind::IncompleteExpression, 4 },
        missing_op = { "a", ParseErrorKind::IncompleteExpression, 1 },
        unterminated = { r#"a eq "abc"#, ParseErrorKind::UnterminatedString, 5 },
        bad_number = { "a eq 1.2.3", ParseErrorKind::InvalidValue, 5 },
        bad_date = { "a eq 2024-13-01T00:00:00Z", ParseErrorKind::InvalidValue, 5 },
        unclosed_array = { "a in [1, 2", ParseErrorKind::UnbalancedBracket, 5 },
    )]
    fn test_parse_errors(rule: &str, kind: ParseErrorKind, offset: usize) {
        let err = parse(rule).unwrap_err();
        let pe = err.parse_error().unwrap();
        assert_eq!(pe.kind, kind, "{err}");
        assert_eq!(pe.offset, offset, "{err}");
        assert_eq!(pe.column, offset + 1);
        assert!(matches!(err, PolicyError::ConditionParse(_)));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let rule = format!("{}a pr{}", "(".repeat(200), ")".repeat(200));
        assert!(parse(&rule).is_err());
    }

    #[test]
    fn test_deep_array_nesting_is_rejected() {
        let rule = format!("a in {}1{}", "[".repeat(50_000), "]".repeat(50_000));
        let err = parse(&rule).unwrap_err();
        let parse_error = err.parse_error().unwrap();
        assert_eq!(parse_error.kind, ParseErrorKind::UnexpectedToken);
        assert!(parse_error.message.contains("nested too deeply"));

        let shallow = format!("a in {}1{}", "[".repeat(10), "]".repeat(10));
        assert!(parse(&shallow).is_ok());
    }
}
