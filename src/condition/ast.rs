use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::error::PolicyError;
use crate::types::Value;

/// Attribute comparison operators. Parsing is case-insensitive, rendering is lowercase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Sw,
    Ew,
    Co,
    In,
    Pr,
    Is,
}

impl CompareOp {
    /// The operator with its operands swapped: `5 lt a` is `a gt 5`.
    pub fn mirrored(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            op => op,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogicalOp {
    And,
    Or,
}

/// A parsed condition rule.
///
/// `Precedence` records explicit parentheses from the source text so that a
/// rule serializes back with the grouping it was written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Attribute {
        path: String,
        op: CompareOp,
        value: Value,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Precedence(Box<Expr>),
    /// `attr[filter]`, optionally followed by `.sub_attr` and a comparison.
    ValuePath {
        attr: String,
        filter: Box<Expr>,
        sub_attr: Option<String>,
        op: Option<CompareOp>,
        value: Option<Value>,
    },
}

impl Expr {
    pub fn attr(path: impl Into<String>, op: CompareOp, value: Value) -> Expr {
        Expr::Attribute {
            path: path.into(),
            op,
            value,
        }
    }

    pub fn present(path: impl Into<String>) -> Expr {
        Expr::attr(path, CompareOp::Pr, Value::Empty)
    }

    pub fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
        Expr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::logical(LogicalOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::logical(LogicalOp::Or, left, right)
    }

    pub fn negate(inner: Expr) -> Expr {
        Expr::Not(Box::new(inner))
    }

    pub fn group(inner: Expr) -> Expr {
        Expr::Precedence(Box::new(inner))
    }

    /// Attributes and value paths.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Expr::Attribute { .. } | Expr::ValuePath { .. })
    }

    /// This expression with any enclosing `Precedence` nodes removed.
    pub fn strip_precedence(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Precedence(inner) = expr {
            expr = inner;
        }
        expr
    }

    pub fn logical_op(&self) -> Option<LogicalOp> {
        match self {
            Expr::Logical { op, .. } => Some(*op),
            _ => None,
        }
    }
}

impl FromStr for Expr {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        super::parse(s)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Expr::Attribute { path, op, value } => {
                if value.is_empty() {
                    write!(f, "{path} {op}")
                } else {
                    write!(f, "{path} {op} {value}")
                }
            }
            Expr::Logical { op, left, right } => {
                write!(f, "{left} {op} ")?;
                match right.logical_op() {
                    Some(inner) if inner != *op => write!(f, "({right})"),
                    _ => write!(f, "{right}"),
                }
            }
            Expr::Not(inner) => match inner.as_ref() {
                Expr::Precedence(_) => write!(f, "not {inner}"),
                _ => write!(f, "not({inner})"),
            },
            Expr::Precedence(inner) => write!(f, "({inner})"),
            Expr::ValuePath {
                attr,
                filter,
                sub_attr,
                op,
                value,
            } => {
                write!(f, "{attr}[{filter}]")?;
                if let Some(sub) = sub_attr {
                    write!(f, ".{sub}")?;
                }
                if let Some(op) = op {
                    write!(f, " {op}")?;
                }
                match value {
                    Some(value) if !value.is_empty() => write!(f, " {value}"),
                    _ => Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        lower = { "eq", CompareOp::Eq },
        upper = { "EQ", CompareOp::Eq },
        mixed = { "Sw", CompareOp::Sw },
        present = { "pr", CompareOp::Pr },
        is = { "IS", CompareOp::Is },
    )]
    fn test_compare_op_case_insensitive(token: &str, expected: CompareOp) {
        assert_eq!(token.parse::<CompareOp>().unwrap(), expected);
        assert_eq!(expected.to_string(), token.to_lowercase());
    }

    #[test]
    fn test_unknown_operator() {
        assert!("xx".parse::<CompareOp>().is_err());
        assert!("and".parse::<CompareOp>().is_err());
    }

    #[test]
    fn test_mirrored() {
        assert_eq!(CompareOp::Lt.mirrored(), CompareOp::Gt);
        assert_eq!(CompareOp::Ge.mirrored(), CompareOp::Le);
        assert_eq!(CompareOp::Eq.mirrored(), CompareOp::Eq);
    }

    #[test]
    fn test_right_child_with_other_operator_is_wrapped() {
        let expr = Expr::and(
            Expr::present("a"),
            Expr::or(Expr::present("b"), Expr::present("c")),
        );
        assert_eq!(expr.to_string(), "a pr and (b pr or c pr)");

        let same = Expr::and(
            Expr::present("a"),
            Expr::and(Expr::present("b"), Expr::present("c")),
        );
        assert_eq!(same.to_string(), "a pr and b pr and c pr");

        let left = Expr::and(
            Expr::or(Expr::present("a"), Expr::present("b")),
            Expr::present("c"),
        );
        assert_eq!(left.to_string(), "a pr or b pr and c pr");
    }

    #[test]
    fn test_not_rendering() {
        let leaf = Expr::negate(Expr::attr("a", CompareOp::Eq, Value::Number(1.0)));
        assert_eq!(leaf.to_string(), "not(a eq 1)");

        let grouped = Expr::negate(Expr::group(Expr::attr(
            "a",
            CompareOp::Eq,
            Value::Number(1.0),
        )));
        assert_eq!(grouped.to_string(), "not (a eq 1)");

        let logical = Expr::negate(Expr::or(Expr::present("a"), Expr::present("b")));
        assert_eq!(logical.to_string(), "not(a pr or b pr)");
    }

    #[test]
    fn test_value_path_rendering() {
        let expr = Expr::ValuePath {
            attr: "emails".into(),
            filter: Box::new(Expr::attr("type", CompareOp::Eq, Value::String("work".into()))),
            sub_attr: Some("value".into()),
            op: Some(CompareOp::Ew),
            value: Some(Value::String("@example.com".into())),
        };
        assert_eq!(
            expr.to_string(),
            r#"emails[type eq "work"].value ew "@example.com""#
        );
    }

    #[test]
    fn test_strip_precedence() {
        let expr = Expr::group(Expr::group(Expr::present("a")));
        assert_eq!(expr.strip_precedence(), &Expr::present("a"));
        assert!(expr.strip_precedence().is_leaf());
    }
}
