//! Canonical conditions to and from CEL expressions.

use cel_parser::{Atom, Expression, Member, RelationOp, UnaryOp};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::attribute_map::AttributeMap;
use crate::condition::{
    CompareOp, Expr, LogicalOp, group_for, path_segment, split_path, unquote_segment,
};
use crate::error::PolicyError;
use crate::traits::ConditionMapper;
use crate::types::{Condition, ConditionAction, Value};

use super::parser::CelParser;
use super::unparse::unparse;

/// Maps canonical conditions to CEL source text and back.
#[derive(Debug, Clone, Default)]
pub struct CelConditionMapper {
    attributes: AttributeMap,
    parser: CelParser,
}

impl CelConditionMapper {
    pub fn new(attributes: AttributeMap) -> Self {
        CelConditionMapper {
            attributes,
            parser: CelParser::new(),
        }
    }

    pub fn with_parser(mut self, parser: CelParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn parser(&self) -> &CelParser {
        &self.parser
    }

    pub fn expr_to_cel(&self, expr: &Expr) -> Result<Expression, PolicyError> {
        match expr {
            Expr::Attribute { path, op, value } => self.attribute_to_cel(path, *op, value),
            Expr::Logical { op, left, right } => {
                let left = Box::new(self.expr_to_cel(left)?);
                let right = Box::new(self.expr_to_cel(right)?);
                Ok(match op {
                    LogicalOp::And => Expression::And(left, right),
                    LogicalOp::Or => Expression::Or(left, right),
                })
            }
            Expr::Not(inner) => Ok(Expression::Unary(
                UnaryOp::Not,
                Box::new(self.expr_to_cel(inner)?),
            )),
            Expr::Precedence(inner) => self.expr_to_cel(inner),
            Expr::ValuePath { .. } => Err(PolicyError::UnsupportedByCel(format!(
                "value path '{expr}'"
            ))),
        }
    }

    fn attribute_to_cel(
        &self,
        path: &str,
        op: CompareOp,
        value: &Value,
    ) -> Result<Expression, PolicyError> {
        let segments = split_path(&self.attributes.to_provider(path));
        let left = || path_to_cel(&segments);
        let relation = |op: RelationOp| -> Result<Expression, PolicyError> {
            Ok(Expression::Relation(
                Box::new(left()?),
                op,
                Box::new(value_to_cel(value)?),
            ))
        };
        let method = |name: &str| -> Result<Expression, PolicyError> {
            Ok(call(name, Some(left()?), vec![value_to_cel(value)?]))
        };
        match op {
            CompareOp::Eq => relation(RelationOp::Equals),
            CompareOp::Ne => relation(RelationOp::NotEquals),
            CompareOp::Lt => relation(RelationOp::LessThan),
            CompareOp::Le => relation(RelationOp::LessThanEq),
            CompareOp::Gt => relation(RelationOp::GreaterThan),
            CompareOp::Ge => relation(RelationOp::GreaterThanEq),
            CompareOp::In => relation(RelationOp::In),
            CompareOp::Sw => method("startsWith"),
            CompareOp::Ew => method("endsWith"),
            CompareOp::Co => method("contains"),
            CompareOp::Pr => {
                let Some((last, parent)) = segments.split_last().filter(|(_, p)| !p.is_empty())
                else {
                    return Err(PolicyError::UnsupportedByCel(format!(
                        "presence test on '{path}' needs a field selection"
                    )));
                };
                let selection = select(path_to_cel(parent)?, field_name(last)?);
                Ok(call("has", None, vec![selection]))
            }
            CompareOp::Is => Err(PolicyError::UnsupportedByCel(format!(
                "type test on '{path}'"
            ))),
        }
    }

    pub fn cel_to_expr(&self, cel: &Expression) -> Result<Expr, PolicyError> {
        match cel {
            Expression::And(left, right) => self.logical(LogicalOp::And, left, right),
            Expression::Or(left, right) => self.logical(LogicalOp::Or, left, right),
            Expression::Unary(UnaryOp::Not, inner) => {
                let inner = self.cel_to_expr(inner)?;
                if inner.is_leaf() {
                    Ok(Expr::negate(inner))
                } else {
                    Ok(Expr::negate(Expr::group(inner)))
                }
            }
            Expression::Unary(UnaryOp::DoubleNot, inner) => self.cel_to_expr(inner),
            Expression::Relation(left, op, right) => self.relation(cel, left, op, right),
            Expression::FunctionCall(function, target, args) => {
                self.call_to_expr(cel, function, target.as_deref(), args)
            }
            Expression::Ident(_) | Expression::Member(..) if is_path(cel) => Ok(Expr::attr(
                self.path(cel)?,
                CompareOp::Eq,
                Value::Boolean(true),
            )),
            other => Err(unsupported(other)),
        }
    }

    fn logical(
        &self,
        op: LogicalOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<Expr, PolicyError> {
        Ok(Expr::logical(
            op,
            group_for(op, self.cel_to_expr(left)?),
            group_for(op, self.cel_to_expr(right)?),
        ))
    }

    fn relation(
        &self,
        whole: &Expression,
        left: &Expression,
        op: &RelationOp,
        right: &Expression,
    ) -> Result<Expr, PolicyError> {
        let op = match op {
            RelationOp::Equals => CompareOp::Eq,
            RelationOp::NotEquals => CompareOp::Ne,
            RelationOp::LessThan => CompareOp::Lt,
            RelationOp::LessThanEq => CompareOp::Le,
            RelationOp::GreaterThan => CompareOp::Gt,
            RelationOp::GreaterThanEq => CompareOp::Ge,
            RelationOp::In => CompareOp::In,
        };
        if is_path(left) {
            return Ok(Expr::attr(self.path(left)?, op, cel_to_value(right)?));
        }
        if is_path(right) && op != CompareOp::In {
            return Ok(Expr::attr(self.path(right)?, op.mirrored(), cel_to_value(left)?));
        }
        Err(PolicyError::UnsupportedByCel(format!(
            "comparison without an attribute operand: {}",
            unparse(whole)
        )))
    }

    /// `has(a.b)` and the string methods; every other call is rejected.
    fn call_to_expr(
        &self,
        whole: &Expression,
        function: &Expression,
        target: Option<&Expression>,
        args: &[Expression],
    ) -> Result<Expr, PolicyError> {
        let Expression::Ident(name) = function else {
            return Err(unsupported(whole));
        };
        match (name.as_str(), target, args) {
            ("has", None, [Expression::Member(operand, member)]) => {
                let Member::Attribute(field) = member.as_ref() else {
                    return Err(unsupported(whole));
                };
                Ok(Expr::present(self.attributes.to_canonical(&format!(
                    "{}.{}",
                    raw_path(operand)?,
                    path_segment(field)
                ))))
            }
            (method, Some(target), [arg]) => {
                let op = match method {
                    "startsWith" => CompareOp::Sw,
                    "endsWith" => CompareOp::Ew,
                    "contains" => CompareOp::Co,
                    _ => return Err(unsupported(whole)),
                };
                Ok(Expr::attr(self.path(target)?, op, cel_to_value(arg)?))
            }
            _ => Err(unsupported(whole)),
        }
    }

    fn path(&self, cel: &Expression) -> Result<String, PolicyError> {
        Ok(self.attributes.to_canonical(&raw_path(cel)?))
    }

    /// Map a rule to a CEL expression tree.
    pub fn condition_to_cel(&self, condition: &Condition) -> Result<Expression, PolicyError> {
        if condition.action != ConditionAction::Allow {
            return Err(PolicyError::UnsupportedByCel(format!(
                "condition action '{}'",
                condition.action
            )));
        }
        self.expr_to_cel(&condition.parse_rule()?)
    }
}

impl ConditionMapper for CelConditionMapper {
    type Dialect = String;

    fn to_dialect(&self, condition: &Condition) -> Result<String, PolicyError> {
        let cel = unparse(&self.condition_to_cel(condition)?);
        debug!(event = "CelCondition", phase = "to_dialect", expression = %cel);
        Ok(cel)
    }

    fn to_canonical(&self, source: &String) -> Result<Option<Condition>, PolicyError> {
        if source.trim().is_empty() {
            return Ok(None);
        }
        let cel = self.parser.parse(source)?;
        let expr = self.cel_to_expr(&cel)?;
        debug!(event = "CelCondition", phase = "to_canonical", rule = %expr);
        Ok(Some(Condition::from_expr(&expr, ConditionAction::Allow)))
    }
}

fn unsupported(cel: &Expression) -> PolicyError {
    PolicyError::UnsupportedByCel(unparse(cel))
}

fn ident(name: impl Into<String>) -> Expression {
    Expression::Ident(name.into().into())
}

fn string(s: impl Into<String>) -> Expression {
    Expression::Atom(Atom::String(s.into().into()))
}

fn select(operand: Expression, field: String) -> Expression {
    Expression::Member(Box::new(operand), Box::new(Member::Attribute(field.into())))
}

fn index(operand: Expression, key: String) -> Expression {
    Expression::Member(
        Box::new(operand),
        Box::new(Member::Index(Box::new(string(key)))),
    )
}

fn call(function: &str, target: Option<Expression>, args: Vec<Expression>) -> Expression {
    Expression::FunctionCall(Box::new(ident(function)), target.map(Box::new), args)
}

fn is_path(cel: &Expression) -> bool {
    match cel {
        Expression::Ident(_) => true,
        Expression::Member(operand, member) => match member.as_ref() {
            Member::Attribute(_) => is_path(operand),
            Member::Index(key) => {
                matches!(key.as_ref(), Expression::Atom(Atom::String(_))) && is_path(operand)
            }
            Member::Fields(_) => false,
        },
        _ => false,
    }
}

/// `a.b["c d"]` reads as the canonical path `a.b."c d"`.
fn raw_path(cel: &Expression) -> Result<String, PolicyError> {
    match cel {
        Expression::Ident(name) => Ok(name.to_string()),
        Expression::Member(operand, member) => match member.as_ref() {
            Member::Attribute(field) => Ok(format!("{}.{}", raw_path(operand)?, path_segment(field))),
            Member::Index(key) => match key.as_ref() {
                Expression::Atom(Atom::String(key)) => {
                    Ok(format!("{}.{}", raw_path(operand)?, path_segment(key)))
                }
                _ => Err(unsupported(cel)),
            },
            Member::Fields(_) => Err(unsupported(cel)),
        },
        other => Err(PolicyError::UnsupportedByCel(format!(
            "expected an attribute path, found {}",
            unparse(other)
        ))),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn field_name(segment: &str) -> Result<String, PolicyError> {
    let name = unquote_segment(segment);
    if is_identifier(&name) {
        Ok(name)
    } else {
        Err(PolicyError::UnsupportedByCel(format!(
            "'{name}' is not a CEL field name"
        )))
    }
}

/// A canonical path as a CEL select chain; segments that are not identifiers
/// become index lookups.
fn path_to_cel(segments: &[String]) -> Result<Expression, PolicyError> {
    let Some((first, rest)) = segments.split_first() else {
        return Err(PolicyError::UnsupportedByCel("empty attribute path".into()));
    };
    let root = unquote_segment(first);
    if !is_identifier(&root) {
        return Err(PolicyError::UnsupportedByCel(format!(
            "'{root}' is not a CEL identifier"
        )));
    }
    let mut expr = ident(root);
    for segment in rest {
        let name = unquote_segment(segment);
        expr = if is_identifier(&name) {
            select(expr, name)
        } else {
            index(expr, name)
        };
    }
    Ok(expr)
}

fn value_to_cel(value: &Value) -> Result<Expression, PolicyError> {
    Ok(match value {
        Value::String(s) | Value::Entity(s) => string(s.clone()),
        Value::Number(n) => match value.as_integer() {
            Some(i) => Expression::Atom(Atom::Int(i)),
            None => Expression::Atom(Atom::Float(*n)),
        },
        Value::Boolean(b) => Expression::Atom(Atom::Bool(*b)),
        Value::Date(d) => call(
            "timestamp",
            None,
            vec![string(
                d.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )],
        ),
        Value::Array(items) => Expression::List(
            items
                .iter()
                .map(value_to_cel)
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(_) => {
            return Err(PolicyError::UnsupportedByCel(format!(
                "object value {value}"
            )));
        }
        Value::Empty => {
            return Err(PolicyError::UnsupportedByCel("comparison without a value".into()));
        }
    })
}

/// A literal operand. Map and message initialisers are rejected.
fn cel_to_value(cel: &Expression) -> Result<Value, PolicyError> {
    match cel {
        Expression::Atom(atom) => match atom {
            Atom::Bool(b) => Ok(Value::Boolean(*b)),
            Atom::Int(i) => Ok(Value::Number(*i as f64)),
            Atom::UInt(u) => Ok(Value::Number(*u as f64)),
            Atom::Float(f) => Ok(Value::Number(*f)),
            Atom::String(s) => Ok(Value::String(s.to_string())),
            Atom::Null | Atom::Bytes(_) => Err(unsupported(cel)),
        },
        Expression::Unary(UnaryOp::Minus, operand) => match cel_to_value(operand)? {
            Value::Number(n) => Ok(Value::Number(-n)),
            _ => Err(unsupported(cel)),
        },
        Expression::List(items) => Ok(Value::Array(
            items.iter().map(cel_to_value).collect::<Result<_, _>>()?,
        )),
        Expression::FunctionCall(function, None, args)
            if matches!(function.as_ref(), Expression::Ident(name) if name.as_str() == "timestamp") =>
        {
            match args.as_slice() {
                [Expression::Atom(Atom::String(text))] => DateTime::parse_from_rfc3339(text)
                    .map(Value::Date)
                    .map_err(|e| {
                        PolicyError::InvalidValue(format!("malformed timestamp '{text}': {e}"))
                    }),
                _ => Err(unsupported(cel)),
            }
        }
        other => Err(unsupported(other)),
    }
}
