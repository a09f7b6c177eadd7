use cel_parser::{Expression, Member};
use tracing::debug;

use crate::error::{ParseError, ParseErrorKind, PolicyError};

const DEFAULT_MAX_DEPTH: usize = 128;

/// Parses CEL source text and bounds the depth of the resulting tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CelParser {
    max_depth: usize,
}

impl Default for CelParser {
    fn default() -> Self {
        CelParser {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CelParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn parse(&self, input: &str) -> Result<Expression, PolicyError> {
        let expr = cel_parser::parse(input).map_err(|e| {
            PolicyError::CelParse(ParseError::at(
                ParseErrorKind::UnexpectedToken,
                input,
                0,
                e.to_string(),
            ))
        })?;
        let depth = depth(&expr);
        if depth > self.max_depth {
            return Err(PolicyError::CelParse(ParseError::at(
                ParseErrorKind::UnexpectedToken,
                input,
                0,
                format!(
                    "expression nested {depth} levels deep, the limit is {}",
                    self.max_depth
                ),
            )));
        }
        debug!(event = "CelParse", phase = "parsed", depth);
        Ok(expr)
    }
}

/// Depth of an expression tree, walked without recursion.
fn depth(root: &Expression) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(root, 1)];
    while let Some((expr, level)) = stack.pop() {
        deepest = deepest.max(level);
        let next = level + 1;
        match expr {
            Expression::Arithmetic(left, _, right) | Expression::Relation(left, _, right) => {
                stack.extend([(left.as_ref(), next), (right.as_ref(), next)]);
            }
            Expression::Or(left, right) | Expression::And(left, right) => {
                stack.extend([(left.as_ref(), next), (right.as_ref(), next)]);
            }
            Expression::Ternary(cond, then, otherwise) => {
                stack.extend([
                    (cond.as_ref(), next),
                    (then.as_ref(), next),
                    (otherwise.as_ref(), next),
                ]);
            }
            Expression::Unary(_, operand) => stack.push((operand.as_ref(), next)),
            Expression::Member(operand, member) => {
                stack.push((operand.as_ref(), next));
                match member.as_ref() {
                    Member::Attribute(_) => {}
                    Member::Index(index) => stack.push((index.as_ref(), next)),
                    Member::Fields(fields) => {
                        stack.extend(fields.iter().map(|(_, value)| (value, next)));
                    }
                }
            }
            Expression::FunctionCall(function, target, args) => {
                stack.push((function.as_ref(), next));
                if let Some(target) = target {
                    stack.push((target.as_ref(), next));
                }
                stack.extend(args.iter().map(|arg| (arg, next)));
            }
            Expression::List(items) => stack.extend(items.iter().map(|item| (item, next))),
            Expression::Map(entries) => {
                for (key, value) in entries {
                    stack.extend([(key, next), (value, next)]);
                }
            }
            Expression::Atom(_) | Expression::Ident(_) => {}
        }
    }
    deepest
}
