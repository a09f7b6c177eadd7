//! Operand values used on the right-hand side of condition comparisons.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, FixedOffset};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("valid regex"));

/// Anything that starts like a number and only uses number characters.
static NUMBER_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\.?\d[\d.eE+-]*$").expect("valid regex"));

static DATE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt]").expect("valid regex"));

static BARE_SAFE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[^\s()\[\],"]+$"#).expect("valid regex"));

/// A tagged condition operand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// An unquoted literal that is not a number, boolean or date, e.g. `User:alice`.
    Entity(String),
    Empty,
}

impl Value {
    /// Coerce a bare (unquoted) literal into the most specific value it denotes.
    pub fn from_bare(token: &str) -> Result<Value, PolicyError> {
        if token.is_empty() {
            return Ok(Value::Empty);
        }
        match token {
            "true" => return Ok(Value::Boolean(true)),
            "false" => return Ok(Value::Boolean(false)),
            _ => {}
        }
        if DATE_LIKE.is_match(token) {
            return DateTime::parse_from_rfc3339(token)
                .map(Value::Date)
                .map_err(|e| PolicyError::InvalidValue(format!("malformed date '{token}': {e}")));
        }
        if NUMBER.is_match(token) {
            let n = token
                .parse::<f64>()
                .map_err(|e| PolicyError::InvalidValue(format!("malformed number '{token}': {e}")))?;
            if !n.is_finite() {
                return Err(PolicyError::InvalidValue(format!(
                    "number '{token}' is out of range"
                )));
            }
            return Ok(Value::Number(n));
        }
        if NUMBER_LIKE.is_match(token) {
            return Err(PolicyError::InvalidValue(format!("malformed number '{token}'")));
        }
        Ok(Value::Entity(token.to_string()))
    }

    /// Decode a double-quoted literal, including the quotes.
    pub fn from_quoted(literal: &str) -> Result<Value, PolicyError> {
        let inner = literal
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| PolicyError::InvalidValue(format!("not a quoted string: {literal}")))?;
        Ok(Value::String(unescape(inner)?))
    }

    /// Convert a JSON value. Strings that look like RFC3339 timestamps become dates.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Empty,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(d) if DATE_LIKE.is_match(s) => Value::Date(d),
                _ => Value::String(s.clone()),
            },
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) | Value::Entity(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Empty => serde_json::Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// The text of a string-like value without quoting.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Entity(s) => Some(s),
            _ => None,
        }
    }

    /// The integral value of a number, if it has no fractional part.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Entity(_) => "entity",
            Value::Empty => "empty",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Empty, Value::Empty) => true,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) | (Value::Entity(a), Value::Entity(b)) => {
                a.partial_cmp(b)
            }
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.partial_cmp(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                a.len().partial_cmp(&b.len())
            }
            (Value::Empty, Value::Empty) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

/// Render a number the way it was most likely written: integers without a
/// fraction, very small or very large magnitudes in exponent form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1.0e15 {
        return format!("{}", n as i64);
    }
    let magnitude = n.abs();
    if magnitude != 0.0 && !(1.0e-4..1.0e15).contains(&magnitude) {
        return format!("{n:e}");
    }
    format!("{n}")
}

/// Quote and escape a string for the condition grammar.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Undo [`quote`] escaping for the contents of a quoted string.
pub fn unescape(s: &str) -> Result<String, PolicyError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(c @ ('"' | '\\' | '\'' | '/' | '*')) => out.push(c),
            Some(other) => {
                return Err(PolicyError::InvalidValue(format!(
                    "unknown escape sequence '\\{other}'"
                )));
            }
            None => return Err(PolicyError::InvalidValue("dangling escape".to_string())),
        }
    }
    Ok(out)
}

/// Whether a string can be written without quotes in a condition.
pub fn is_bare_safe(s: &str) -> bool {
    BARE_SAFE.is_match(s)
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Value::String(s) => write!(f, "{}", quote(s)),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Array(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Object(map) => write!(
                f,
                "{{{}}}",
                map.iter().map(|(k, v)| format!("{}: {v}", quote(k))).join(", ")
            ),
            Value::Entity(s) if is_bare_safe(s) || balanced_embedded_quotes(s) => write!(f, "{s}"),
            Value::Entity(s) => write!(f, "{}", quote(s)),
            Value::Empty => Ok(()),
        }
    }
}

/// `User::"alice"` style tokens carry their own quotes and stay bare.
fn balanced_embedded_quotes(s: &str) -> bool {
    let quotes = s.matches('"').count();
    quotes > 0
        && quotes % 2 == 0
        && !s.starts_with('"')
        && !s.contains(char::is_whitespace)
        && !s.contains(['(', ')', '[', ']', ','])
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        integer = { "42", 42.0 },
        signed = { "-7", -7.0 },
        plus = { "+3", 3.0 },
        fraction = { "1.5", 1.5 },
        trailing_dot = { "2.", 2.0 },
        leading_dot = { ".25", 0.25 },
        exponent = { "1.23e-5", 1.23e-5 },
        upper_exponent = { "6E3", 6000.0 },
    )]
    fn test_number_grammar(token: &str, expected: f64) {
        assert_eq!(Value::from_bare(token).unwrap(), Value::Number(expected));
    }

    #[parameterized(
        integer = { 42.0, "42" },
        negative = { -7.0, "-7" },
        fraction = { 1.5, "1.5" },
        small = { 1.23e-5, "1.23e-5" },
        large = { 2.5e20, "2.5e20" },
        zero = { 0.0, "0" },
    )]
    fn test_format_number(n: f64, expected: &str) {
        assert_eq!(format_number(n), expected);
    }

    #[test]
    fn test_exponent_survives_render() {
        let v = Value::from_bare("1.23e-5").unwrap();
        assert_eq!(v.to_string(), "1.23e-5");
    }

    #[test]
    fn test_booleans_are_lowercase_only() {
        assert_eq!(Value::from_bare("true").unwrap(), Value::Boolean(true));
        assert_eq!(Value::from_bare("false").unwrap(), Value::Boolean(false));
        assert_eq!(Value::from_bare("TRUE").unwrap(), Value::Entity("TRUE".into()));
    }

    #[test]
    fn test_dates() {
        let v = Value::from_bare("2024-03-01T10:00:00Z").unwrap();
        assert!(matches!(v, Value::Date(_)));
        assert_eq!(v.to_string(), "2024-03-01T10:00:00+00:00");

        let err = Value::from_bare("2024-13-01T10:00:00Z").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidValue(_)));
    }

    #[test]
    fn test_malformed_number() {
        assert!(matches!(
            Value::from_bare("1.2.3"),
            Err(PolicyError::InvalidValue(_))
        ));
        assert!(matches!(
            Value::from_bare("12e"),
            Err(PolicyError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_out_of_range_number() {
        let err = Value::from_bare("1e400").unwrap_err();
        assert_eq!(err.to_string(), "invalid value: number '1e400' is out of range");
        assert!(matches!(
            crate::condition::parse("a lt -1e400"),
            Err(PolicyError::ConditionParse(_))
        ));
    }

    #[test]
    fn test_bare_entities() {
        assert_eq!(Value::from_bare("User:alice").unwrap(), Value::Entity("User:alice".into()));
        assert_eq!(
            Value::from_bare(r#"User::"alice""#).unwrap().to_string(),
            r#"User::"alice""#
        );
        assert_eq!(Value::from_bare("").unwrap(), Value::Empty);
    }

    #[test]
    fn test_quoted_strings() {
        let v = Value::from_quoted(r#""w o(rk)""#).unwrap();
        assert_eq!(v, Value::String("w o(rk)".into()));
        assert_eq!(v.to_string(), r#""w o(rk)""#);

        let v = Value::from_quoted(r#""say \"hi\"\n""#).unwrap();
        assert_eq!(v.as_text(), Some("say \"hi\"\n"));
        assert_eq!(v.to_string(), r#""say \"hi\"\n""#);

        assert!(Value::from_quoted("noquotes").is_err());
        assert!(Value::from_quoted(r#""bad \q""#).is_err());
    }

    #[test]
    fn test_entity_with_spaces_is_quoted() {
        assert_eq!(Value::Entity("a b".into()).to_string(), r#""a b""#);
        assert_eq!(Value::Entity("a(b)".into()).to_string(), r#""a(b)""#);
    }

    #[test]
    fn test_array_and_object_render() {
        let v = Value::Array(vec![Value::Number(1.0), Value::String("x".into()), Value::Boolean(false)]);
        assert_eq!(v.to_string(), r#"[1, "x", false]"#);

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Value::Number(2.0));
        assert_eq!(Value::Object(map).to_string(), r#"{"k": 2}"#);
    }

    #[test]
    fn test_ordering_within_variants() {
        assert!(Value::Number(1.0) < Value::Number(2.0));
        assert!(Value::String("a".into()) < Value::String("b".into()));
        assert!(Value::Boolean(false) < Value::Boolean(true));
        let early = Value::from_bare("2024-01-01T00:00:00Z").unwrap();
        let late = Value::from_bare("2024-01-01T00:00:00-05:00").unwrap();
        assert!(early < late);
        assert!(
            Value::Array(vec![Value::Number(1.0)])
                < Value::Array(vec![Value::Number(1.0), Value::Number(0.0)])
        );
    }

    #[test]
    fn test_ordering_across_variants_is_undefined() {
        assert_eq!(Value::Number(1.0).partial_cmp(&Value::String("1".into())), None);
        assert_ne!(Value::Entity("x".into()), Value::String("x".into()));
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"n": 1, "s": "x", "d": "2024-01-01T00:00:00Z", "l": [true, null]});
        let v = Value::from_json(&json);
        let Value::Object(map) = &v else { panic!("expected object") };
        assert_eq!(map["n"], Value::Number(1.0));
        assert!(matches!(map["d"], Value::Date(_)));
        assert_eq!(map["l"], Value::Array(vec![Value::Boolean(true), Value::Empty]));
        assert_eq!(v.to_json()["s"], "x");
    }

    #[test]
    fn test_integer_view() {
        assert_eq!(Value::Number(3.0).as_integer(), Some(3));
        assert_eq!(Value::Number(3.5).as_integer(), None);
        assert_eq!(Value::String("3".into()).as_integer(), None);
    }
}
