//! Canonical conditions to and from Cedar `when` / `unless` clauses.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use tracing::debug;

use crate::attribute_map::AttributeMap;
use crate::condition::{
    CompareOp, Expr, LogicalOp, MultiLogical, flatten, group_for, join, path_segment, split_path,
    unquote_segment,
};
use crate::error::PolicyError;
use crate::traits::ConditionMapper;
use crate::types::{Condition, ConditionAction, Entity, Value, format_number};

use super::est::{BinaryOp, CedarExpr, CedarUid, Clause, ClauseKind, LikePattern, PatternElem, Var};

const ROOTS: &[&str] = &["principal", "action", "resource", "context"];

/// Maps canonical conditions to Cedar clauses and back.
#[derive(Debug, Clone, Default)]
pub struct CedarConditionMapper {
    attributes: AttributeMap,
}

impl CedarConditionMapper {
    pub fn new(attributes: AttributeMap) -> Self {
        CedarConditionMapper { attributes }
    }

    /// Map a canonical expression to a single Cedar expression.
    pub fn expr_to_cedar(&self, expr: &Expr) -> Result<CedarExpr, PolicyError> {
        match expr {
            Expr::Attribute { path, op, value } => self.attribute_to_cedar(path, *op, value),
            Expr::Logical { op, left, right } => {
                let op = match op {
                    LogicalOp::And => BinaryOp::And,
                    LogicalOp::Or => BinaryOp::Or,
                };
                Ok(CedarExpr::binary(
                    op,
                    self.expr_to_cedar(left)?,
                    self.expr_to_cedar(right)?,
                ))
            }
            Expr::Not(inner) => Ok(CedarExpr::not(self.expr_to_cedar(inner)?)),
            Expr::Precedence(inner) => self.expr_to_cedar(inner),
            Expr::ValuePath { .. } => Err(PolicyError::UnsupportedCedarConstruct(format!(
                "value path '{expr}' has no Cedar equivalent"
            ))),
        }
    }

    fn attribute_to_cedar(
        &self,
        path: &str,
        op: CompareOp,
        value: &Value,
    ) -> Result<CedarExpr, PolicyError> {
        let path = self.attributes.to_provider(path);
        let segments = rooted(split_path(&path));
        let left = || path_expr(&segments);
        let expr = match op {
            CompareOp::Eq => CedarExpr::binary(BinaryOp::Eq, left()?, value_to_cedar(value)?),
            CompareOp::Ne => CedarExpr::binary(BinaryOp::NotEq, left()?, value_to_cedar(value)?),
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                ordering_to_cedar(op, left()?, value)?
            }
            CompareOp::Sw => like(left()?, vec![
                PatternElem::Literal(pattern_text(value)?),
                PatternElem::Wildcard,
            ]),
            CompareOp::Ew => like(left()?, vec![
                PatternElem::Wildcard,
                PatternElem::Literal(pattern_text(value)?),
            ]),
            CompareOp::Co => {
                CedarExpr::binary(BinaryOp::Contains, left()?, value_to_cedar(value)?)
            }
            CompareOp::In => match value {
                Value::Array(items) if !items.iter().all(is_entity_ref) => {
                    CedarExpr::binary(BinaryOp::Contains, value_to_cedar(value)?, left()?)
                }
                _ => CedarExpr::binary(BinaryOp::In, left()?, entity_operand(value)?),
            },
            CompareOp::Pr => {
                let (last, parent) = segments.split_last().ok_or_else(|| {
                    PolicyError::UnsupportedCedarConstruct("empty attribute path".into())
                })?;
                if parent.is_empty() {
                    return Err(PolicyError::UnsupportedCedarConstruct(format!(
                        "'{path} pr' names no attribute"
                    )));
                }
                CedarExpr::has(path_expr(parent)?, unquote_segment(last))
            }
            CompareOp::Is => CedarExpr::Is {
                left: Box::new(left()?),
                entity_type: type_name(value)?,
                in_expr: None,
            },
        };
        Ok(expr)
    }

    /// Map a Cedar expression to a canonical expression.
    pub fn expr_to_canonical(&self, expr: &CedarExpr) -> Result<Expr, PolicyError> {
        if let Some((op, left, right)) = expr.as_binary() {
            return self.binary_to_canonical(op, left, right, expr);
        }
        match expr {
            CedarExpr::Not { arg } => Ok(Expr::negate(self.expr_to_canonical(arg)?)),
            CedarExpr::Has { left, attr } => {
                let parent = self.raw_path(left)?;
                Ok(Expr::present(self.attributes.to_canonical(&format!(
                    "{parent}.{}",
                    path_segment(attr)
                ))))
            }
            CedarExpr::Like { left, pattern } => self.like_to_canonical(left, pattern),
            CedarExpr::Is {
                left,
                entity_type,
                in_expr,
            } => {
                let path = self.path(left)?;
                let is = Expr::attr(
                    path.clone(),
                    CompareOp::Is,
                    Value::Entity(entity_type.clone()),
                );
                match in_expr {
                    None => Ok(is),
                    Some(target) => Ok(Expr::and(
                        is,
                        Expr::attr(path, CompareOp::In, cedar_to_value(target)?),
                    )),
                }
            }
            CedarExpr::Var(_) | CedarExpr::GetAttr { .. } => Ok(Expr::attr(
                self.path(expr)?,
                CompareOp::Eq,
                Value::Boolean(true),
            )),
            CedarExpr::ExtFn(_) => self.call_to_canonical(expr),
            other => Err(unsupported(other)),
        }
    }

    fn binary_to_canonical(
        &self,
        op: BinaryOp,
        left: &CedarExpr,
        right: &CedarExpr,
        whole: &CedarExpr,
    ) -> Result<Expr, PolicyError> {
        let logical = match op {
            BinaryOp::And => Some(LogicalOp::And),
            BinaryOp::Or => Some(LogicalOp::Or),
            _ => None,
        };
        if let Some(logical) = logical {
            let left = group_for(logical, self.expr_to_canonical(left)?);
            let right = group_for(logical, self.expr_to_canonical(right)?);
            return Ok(Expr::logical(logical, left, right));
        }
        let op = match op {
            BinaryOp::Eq => CompareOp::Eq,
            BinaryOp::NotEq => CompareOp::Ne,
            BinaryOp::Less => CompareOp::Lt,
            BinaryOp::LessEq => CompareOp::Le,
            BinaryOp::Greater => CompareOp::Gt,
            BinaryOp::GreaterEq => CompareOp::Ge,
            BinaryOp::In => CompareOp::In,
            BinaryOp::Contains => CompareOp::Co,
            _ => return Err(unsupported(whole)),
        };
        self.comparison(op, left, right)
    }

    /// `path op literal`, accepting the literal on either side.
    fn comparison(
        &self,
        op: CompareOp,
        left: &CedarExpr,
        right: &CedarExpr,
    ) -> Result<Expr, PolicyError> {
        if is_path(left) {
            return Ok(Expr::attr(self.path(left)?, op, cedar_to_value(right)?));
        }
        if is_path(right) && !matches!(op, CompareOp::In | CompareOp::Co) {
            return Ok(Expr::attr(
                self.path(right)?,
                op.mirrored(),
                cedar_to_value(left)?,
            ));
        }
        if op == CompareOp::Co && is_path(right) {
            // `[..].contains(path)` reads as `path in [..]`
            return Ok(Expr::attr(
                self.path(right)?,
                CompareOp::In,
                cedar_to_value(left)?,
            ));
        }
        Err(PolicyError::UnsupportedCedarConstruct(format!(
            "comparison without an attribute operand: {left} {op} {right}"
        )))
    }

    fn like_to_canonical(
        &self,
        left: &CedarExpr,
        pattern: &LikePattern,
    ) -> Result<Expr, PolicyError> {
        let path = self.path(left)?;
        let (op, text) = match pattern.elems().as_slice() {
            [PatternElem::Literal(text), PatternElem::Wildcard] => (CompareOp::Sw, text.clone()),
            [PatternElem::Wildcard, PatternElem::Literal(text)] => (CompareOp::Ew, text.clone()),
            [PatternElem::Wildcard, PatternElem::Literal(text), PatternElem::Wildcard] => {
                (CompareOp::Co, text.clone())
            }
            [PatternElem::Literal(text)] => (CompareOp::Eq, text.clone()),
            _ => {
                return Err(PolicyError::UnsupportedCedarConstruct(format!(
                    "like pattern on '{path}' has no canonical operator"
                )));
            }
        };
        Ok(Expr::attr(path, op, Value::String(text)))
    }

    fn call_to_canonical(&self, expr: &CedarExpr) -> Result<Expr, PolicyError> {
        let Some((name, args)) = expr.as_call() else {
            return Err(unsupported(expr));
        };
        let op = match name {
            "lessThan" => CompareOp::Lt,
            "lessThanOrEqual" => CompareOp::Le,
            "greaterThan" => CompareOp::Gt,
            "greaterThanOrEqual" => CompareOp::Ge,
            _ => return Err(unsupported(expr)),
        };
        match args {
            [left, right] => self.comparison(op, left, right),
            _ => Err(unsupported(expr)),
        }
    }

    fn raw_path(&self, expr: &CedarExpr) -> Result<String, PolicyError> {
        match expr {
            CedarExpr::Var(var) => Ok(var.to_string()),
            CedarExpr::GetAttr { left, attr } => {
                Ok(format!("{}.{}", self.raw_path(left)?, path_segment(attr)))
            }
            other => Err(PolicyError::UnsupportedCedarConstruct(format!(
                "expected an attribute path, found {other}"
            ))),
        }
    }

    fn path(&self, expr: &CedarExpr) -> Result<String, PolicyError> {
        Ok(self.attributes.to_canonical(&self.raw_path(expr)?))
    }

    /// Map a condition to clauses without going through the rule text.
    pub fn expr_to_clauses(
        &self,
        expr: &Expr,
        action: ConditionAction,
    ) -> Result<Vec<Clause>, PolicyError> {
        if action == ConditionAction::Deny {
            return Ok(vec![Clause::unless(self.expr_to_cedar(expr)?)]);
        }
        match flatten(expr) {
            MultiLogical::And(items) => items
                .into_iter()
                .map(|item| self.expr_to_cedar(item).map(Clause::when))
                .collect(),
            MultiLogical::Or(_) | MultiLogical::Single(_) => {
                Ok(vec![Clause::when(self.expr_to_cedar(expr)?)])
            }
        }
    }

    /// Map clauses to a canonical expression and action. `None` when there are no clauses.
    pub fn clauses_to_expr(
        &self,
        clauses: &[Clause],
    ) -> Result<Option<(Expr, ConditionAction)>, PolicyError> {
        if let [only] = clauses {
            if only.kind == ClauseKind::Unless {
                return Ok(Some((self.expr_to_canonical(&only.body)?, ConditionAction::Deny)));
            }
        }
        let parts = clauses
            .iter()
            .map(|clause| {
                let expr = self.expr_to_canonical(&clause.body)?;
                Ok(match clause.kind {
                    ClauseKind::When => expr,
                    ClauseKind::Unless if expr.is_leaf() => Expr::negate(expr),
                    ClauseKind::Unless => Expr::negate(Expr::group(expr)),
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(join(LogicalOp::And, parts).map(|expr| (expr, ConditionAction::Allow)))
    }
}

impl ConditionMapper for CedarConditionMapper {
    type Dialect = Vec<Clause>;

    fn to_dialect(&self, condition: &Condition) -> Result<Vec<Clause>, PolicyError> {
        let expr = condition.parse_rule()?;
        let clauses = self.expr_to_clauses(&expr, condition.action)?;
        debug!(
            event = "CedarCondition",
            phase = "to_dialect",
            clauses = clauses.len(),
            action = %condition.action,
        );
        Ok(clauses)
    }

    fn to_canonical(&self, clauses: &Vec<Clause>) -> Result<Option<Condition>, PolicyError> {
        let mapped = self.clauses_to_expr(clauses)?;
        debug!(
            event = "CedarCondition",
            phase = "to_canonical",
            clauses = clauses.len(),
            mapped = mapped.is_some(),
        );
        Ok(mapped.map(|(expr, action)| Condition::from_expr(&expr, action)))
    }
}

fn unsupported(expr: &CedarExpr) -> PolicyError {
    PolicyError::UnsupportedCedarConstruct(expr.to_string())
}

fn is_path(expr: &CedarExpr) -> bool {
    matches!(expr, CedarExpr::Var(_) | CedarExpr::GetAttr { .. })
}

/// Paths without a Cedar root are read from `context`.
fn rooted(mut segments: Vec<String>) -> Vec<String> {
    match segments.first() {
        Some(first) if ROOTS.contains(&first.as_str()) => segments,
        Some(_) => {
            segments.insert(0, "context".to_string());
            segments
        }
        None => segments,
    }
}

/// The Cedar expression for a rooted path.
fn path_expr(segments: &[String]) -> Result<CedarExpr, PolicyError> {
    let Some((root, attrs)) = segments.split_first() else {
        return Err(PolicyError::UnsupportedCedarConstruct(
            "empty attribute path".into(),
        ));
    };
    let var = Var::from_str(root)
        .map_err(|_| PolicyError::UnsupportedCedarConstruct(format!("unknown variable {root}")))?;
    let mut expr = CedarExpr::var(var);
    for attr in attrs {
        if attr.is_empty() {
            return Err(PolicyError::UnsupportedCedarConstruct(format!(
                "empty segment in '{}'",
                segments.join(".")
            )));
        }
        expr = CedarExpr::get_attr(expr, unquote_segment(attr));
    }
    Ok(expr)
}

fn like(left: CedarExpr, pattern: Vec<PatternElem>) -> CedarExpr {
    CedarExpr::Like {
        left: Box::new(left),
        pattern: LikePattern::Elems(pattern),
    }
}

fn pattern_text(value: &Value) -> Result<String, PolicyError> {
    match value {
        Value::String(s) | Value::Entity(s) => Ok(s.clone()),
        Value::Number(n) => Ok(format_number(*n)),
        other => Err(PolicyError::UnsupportedCedarConstruct(format!(
            "cannot match a {} value as a pattern",
            other.type_name()
        ))),
    }
}

fn ordering_to_cedar(op: CompareOp, left: CedarExpr, value: &Value) -> Result<CedarExpr, PolicyError> {
    if let (Value::Number(n), None) = (value, value.as_integer()) {
        let method = match op {
            CompareOp::Lt => "lessThan",
            CompareOp::Le => "lessThanOrEqual",
            CompareOp::Gt => "greaterThan",
            _ => "greaterThanOrEqual",
        };
        return Ok(CedarExpr::call(method, vec![left, decimal(*n)?]));
    }
    let op = match op {
        CompareOp::Lt => BinaryOp::Less,
        CompareOp::Le => BinaryOp::LessEq,
        CompareOp::Gt => BinaryOp::Greater,
        _ => BinaryOp::GreaterEq,
    };
    Ok(CedarExpr::binary(op, left, value_to_cedar(value)?))
}

const DECIMAL_DIGITS: usize = 4;

/// A `decimal(..)` call. Cedar decimals carry one to four fractional digits
/// and must fit an `i64` once scaled by 10^4.
fn decimal(n: f64) -> Result<CedarExpr, PolicyError> {
    let text = n.to_string();
    let fits = text.split_once('.').is_some_and(|(whole, fraction)| {
        (1..=DECIMAL_DIGITS).contains(&fraction.len())
            && format!("{whole}{fraction:0<width$}", width = DECIMAL_DIGITS)
                .parse::<i64>()
                .is_ok()
    });
    if !fits {
        return Err(PolicyError::UnsupportedCedarConstruct(format!(
            "{} does not fit a Cedar decimal",
            format_number(n)
        )));
    }
    Ok(CedarExpr::call("decimal", vec![CedarExpr::value(text)]))
}

fn datetime(date: &DateTime<FixedOffset>) -> CedarExpr {
    let text = date
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true);
    CedarExpr::call("datetime", vec![CedarExpr::value(text)])
}

/// A canonical entity reference in Cedar uid form, if it names a typed entity.
fn entity_uid(text: &str) -> Option<CedarUid> {
    match Entity::from_str(text).ok()? {
        Entity::Equals { types, id, .. } if !types.is_empty() => {
            Some(CedarUid::new(types.join("::"), id))
        }
        _ => None,
    }
}

fn value_to_cedar(value: &Value) -> Result<CedarExpr, PolicyError> {
    Ok(match value {
        Value::String(s) => CedarExpr::value(s.clone()),
        Value::Number(n) => match value.as_integer() {
            Some(i) => CedarExpr::value(i),
            None => decimal(*n)?,
        },
        Value::Boolean(b) => CedarExpr::value(*b),
        Value::Date(d) => datetime(d),
        Value::Entity(s) => match entity_uid(s) {
            Some(uid) => CedarExpr::entity(&uid),
            None => CedarExpr::value(s.clone()),
        },
        Value::Array(items) => CedarExpr::Set(
            items
                .iter()
                .map(value_to_cedar)
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => CedarExpr::Record(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), value_to_cedar(v)?)))
                .collect::<Result<BTreeMap<_, _>, PolicyError>>()?,
        ),
        Value::Empty => {
            return Err(PolicyError::UnsupportedCedarConstruct(
                "comparison without a value".into(),
            ));
        }
    })
}

fn is_entity_ref(value: &Value) -> bool {
    match value {
        Value::String(s) | Value::Entity(s) => entity_uid(s).is_some(),
        _ => false,
    }
}

/// Right-hand side of `in`: an entity or a set of entities.
fn entity_operand(value: &Value) -> Result<CedarExpr, PolicyError> {
    match value {
        Value::String(s) | Value::Entity(s) => entity_uid(s)
            .map(|uid| CedarExpr::entity(&uid))
            .ok_or_else(|| {
                PolicyError::UnsupportedCedarConstruct(format!("'{s}' is not an entity reference"))
            }),
        Value::Array(items) => Ok(CedarExpr::Set(
            items.iter().map(entity_operand).collect::<Result<_, _>>()?,
        )),
        other => Err(PolicyError::UnsupportedCedarConstruct(format!(
            "'in' needs an entity, found a {} value",
            other.type_name()
        ))),
    }
}

fn type_name(value: &Value) -> Result<String, PolicyError> {
    match value {
        Value::String(s) | Value::Entity(s) => {
            let types = s.trim_end_matches(':');
            let sep = if types.contains("::") { "::" } else { ":" };
            Ok(types.split(sep).collect::<Vec<_>>().join("::"))
        }
        other => Err(PolicyError::UnsupportedCedarConstruct(format!(
            "'is' needs a type name, found a {} value",
            other.type_name()
        ))),
    }
}

/// Cedar literal to canonical value.
fn cedar_to_value(expr: &CedarExpr) -> Result<Value, PolicyError> {
    match expr {
        CedarExpr::Value(json) => json_to_value(json),
        CedarExpr::Neg { arg } => match cedar_to_value(arg)? {
            Value::Number(n) => Ok(Value::Number(-n)),
            _ => Err(unsupported(expr)),
        },
        CedarExpr::Set(items) => Ok(Value::Array(
            items.iter().map(cedar_to_value).collect::<Result<_, _>>()?,
        )),
        CedarExpr::ExtFn(_) => match expr.as_call() {
            Some((name, [arg])) => {
                let text = match cedar_to_value(arg)? {
                    Value::String(s) => s,
                    _ => return Err(unsupported(expr)),
                };
                extension_value(name, &text).ok_or_else(|| unsupported(expr))
            }
            _ => Err(unsupported(expr)),
        },
        other => Err(unsupported(other)),
    }
}

fn extension_value(name: &str, text: &str) -> Option<Value> {
    match name {
        "decimal" => text.parse().ok().map(Value::Number),
        "ip" | "duration" => Some(Value::String(text.to_string())),
        "datetime" => parse_cedar_datetime(text).map(Value::Date),
        _ => None,
    }
}

fn parse_cedar_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

fn json_to_value(json: &serde_json::Value) -> Result<Value, PolicyError> {
    if let Some(uid) = CedarUid::from_literal(json) {
        return Ok(Value::Entity(uid.to_uid_string()));
    }
    if let Some(extn) = json.get("__extn") {
        let name = extn.get("fn").and_then(|v| v.as_str()).unwrap_or_default();
        let arg = extn.get("arg").and_then(|v| v.as_str()).unwrap_or_default();
        return extension_value(name, arg).ok_or_else(|| {
            PolicyError::UnsupportedCedarConstruct(format!("extension value {name}({arg})"))
        });
    }
    match json {
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) => Ok(Value::Array(
            items.iter().map(json_to_value).collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Object(_) => Err(PolicyError::UnsupportedCedarConstruct(
            "record literal".into(),
        )),
        other => Ok(Value::from_json(other)),
    }
}
