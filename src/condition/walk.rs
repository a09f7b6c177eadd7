//! Tree walking helpers shared by the dialect mappers.

use crate::types::{quote, unescape};

use super::ast::{Expr, LogicalOp};

/// A run of operands joined by one logical operator.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiLogical<'a> {
    And(Vec<&'a Expr>),
    Or(Vec<&'a Expr>),
    Single(&'a Expr),
}

impl<'a> MultiLogical<'a> {
    pub fn operands(&self) -> Vec<&'a Expr> {
        match self {
            MultiLogical::And(items) | MultiLogical::Or(items) => items.clone(),
            MultiLogical::Single(expr) => vec![*expr],
        }
    }
}

/// Collapse chains of the same logical operator into a single list. Grouping
/// parentheses are looked through when they hold the same operator.
pub fn flatten(expr: &Expr) -> MultiLogical<'_> {
    let root = expr.strip_precedence();
    match root.logical_op() {
        Some(op) => {
            let mut items = Vec::new();
            collect(root, op, &mut items);
            match op {
                LogicalOp::And => MultiLogical::And(items),
                LogicalOp::Or => MultiLogical::Or(items),
            }
        }
        None => MultiLogical::Single(root),
    }
}

fn collect<'a>(expr: &'a Expr, op: LogicalOp, items: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Logical {
            op: inner,
            left,
            right,
        } if *inner == op => {
            collect(left, op, items);
            collect(right, op, items);
        }
        Expr::Precedence(inner) if inner.strip_precedence().logical_op() == Some(op) => {
            collect(inner.strip_precedence(), op, items);
        }
        other => items.push(other),
    }
}

/// Join operands left to right with `op`. Operands that are themselves logical
/// expressions with a different operator are grouped so that the result
/// serializes with the intended meaning.
pub fn join(op: LogicalOp, operands: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    operands
        .into_iter()
        .map(|operand| group_for(op, operand))
        .reduce(|left, right| Expr::logical(op, left, right))
}

/// Wrap `child` in `Precedence` when it is a logical expression whose operator
/// differs from `parent`.
pub fn group_for(parent: LogicalOp, child: Expr) -> Expr {
    match child.logical_op() {
        Some(op) if op != parent => Expr::group(child),
        _ => child,
    }
}

/// Pre-order, left to right.
pub struct Walk<'a> {
    stack: Vec<&'a Expr>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Expr;

    fn next(&mut self) -> Option<Self::Item> {
        let expr = self.stack.pop()?;
        match expr {
            Expr::Logical { left, right, .. } => {
                self.stack.push(right);
                self.stack.push(left);
            }
            Expr::Not(inner) | Expr::Precedence(inner) => self.stack.push(inner),
            Expr::ValuePath { filter, .. } => self.stack.push(filter),
            Expr::Attribute { .. } => {}
        }
        Some(expr)
    }
}

impl Expr {
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Attribute paths compared anywhere in the tree. Paths inside value path
    /// filters are relative to the value path and are not included.
    pub fn attribute_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Attribute { path, .. } => paths.push(path.as_str()),
                Expr::ValuePath { attr, .. } => paths.push(attr.as_str()),
                Expr::Logical { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                Expr::Not(inner) | Expr::Precedence(inner) => stack.push(inner),
            }
        }
        paths
    }

    /// Rebuild the tree with every top-level attribute path passed through `rename`.
    pub fn map_paths(&self, rename: &impl Fn(&str) -> String) -> Expr {
        match self {
            Expr::Attribute { path, op, value } => Expr::attr(rename(path), *op, value.clone()),
            Expr::Logical { op, left, right } => {
                Expr::logical(*op, left.map_paths(rename), right.map_paths(rename))
            }
            Expr::Not(inner) => Expr::negate(inner.map_paths(rename)),
            Expr::Precedence(inner) => Expr::group(inner.map_paths(rename)),
            Expr::ValuePath {
                attr,
                filter,
                sub_attr,
                op,
                value,
            } => Expr::ValuePath {
                attr: rename(attr),
                filter: filter.clone(),
                sub_attr: sub_attr.clone(),
                op: *op,
                value: value.clone(),
            },
        }
    }
}

/// Split an attribute path on dots, keeping quoted segments such as
/// `resource."literal id"` whole.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in path.chars() {
        match c {
            _ if escaped => {
                escaped = false;
                current.push(c);
            }
            '\\' if in_quotes => {
                escaped = true;
                current.push(c);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '.' if !in_quotes => segments.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    segments.push(current);
    segments
}

/// The plain name of a path segment, without quotes or escapes.
pub fn unquote_segment(segment: &str) -> String {
    segment
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(|inner| unescape(inner).unwrap_or_else(|_| inner.to_string()))
        .unwrap_or_else(|| segment.to_string())
}

/// Render a dialect attribute name as a path segment, quoting it when needed.
pub fn path_segment(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        name.to_string()
    } else {
        quote(name)
    }
}
