//! Structural equality of conditions modulo operand order and grouping.
//!
//! Each tree is reduced to a multiset of fingerprints: leaves contribute their
//! rendered text, logical nodes their operator, `not` over a leaf contributes
//! `not(<leaf>)` and grouping contributes nothing. Two trees are equivalent
//! when the sorted, lowercased multisets match. This can report equivalent
//! trees as different (`a lt 5` and `not(a ge 5)`), never the reverse.

use itertools::Itertools;

use super::ast::Expr;

/// Lazy stream of fingerprints for one tree.
pub struct Fingerprints<'a> {
    stack: Vec<&'a Expr>,
}

impl<'a> Fingerprints<'a> {
    pub fn new(expr: &'a Expr) -> Self {
        Fingerprints { stack: vec![expr] }
    }
}

impl Iterator for Fingerprints<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let expr = self.stack.pop()?;
            match expr {
                Expr::Attribute { .. } | Expr::ValuePath { .. } => return Some(expr.to_string()),
                Expr::Logical { op, left, right } => {
                    self.stack.push(right);
                    self.stack.push(left);
                    return Some(op.to_string());
                }
                Expr::Precedence(inner) => self.stack.push(inner),
                Expr::Not(inner) => {
                    let target = inner.strip_precedence();
                    if target.is_leaf() {
                        return Some(format!("not({target})"));
                    }
                    self.stack.push(target);
                    return Some("not".to_string());
                }
            }
        }
    }
}

/// Sorted, lowercased fingerprints of `expr`.
pub fn fingerprints(expr: &Expr) -> Vec<String> {
    Fingerprints::new(expr)
        .map(|f| f.to_lowercase())
        .sorted()
        .collect()
}

pub fn equiv(a: &Expr, b: &Expr) -> bool {
    fingerprints(a) == fingerprints(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::parse;
    use yare::parameterized;

    #[parameterized(
        identical = { r#"name pr and not (first eq "test") and another ne "test""#, r#"name pr and not (first eq "test") and another ne "test""# },
        commuted = { "a eq 1 and b eq 2", "b eq 2 and a eq 1" },
        regrouped = { "a eq 1 and (b eq 2 or c eq 3)", "(c eq 3 or b eq 2) and a eq 1" },
        redundant_group = { "(a eq 1)", "a eq 1" },
        not_spacing = { "not (a eq 1)", "not(a eq 1)" },
        case = { "A EQ 1", "a eq 1" },
        value_path = { r#"emails[type eq "work"] and a pr"#, r#"a pr and emails[type eq "work"]"# },
    )]
    fn test_equivalent(a: &str, b: &str) {
        assert!(equiv(&parse(a).unwrap(), &parse(b).unwrap()));
    }

    #[parameterized(
        different_value = { "a eq 1", "a eq 2" },
        different_operator = { "a eq 1 and b eq 2", "a eq 1 or b eq 2" },
        negated = { "a lt 5", "not(a ge 5)" },
        extra_clause = { "a eq 1", "a eq 1 and a eq 1" },
        not_placement = { "not(a pr and b pr)", "not(a pr) and b pr" },
    )]
    fn test_not_equivalent(a: &str, b: &str) {
        assert!(!equiv(&parse(a).unwrap(), &parse(b).unwrap()));
    }

    #[test]
    fn test_fingerprints() {
        let expr = parse("a pr and not(b eq 1 or c pr)").unwrap();
        assert_eq!(
            fingerprints(&expr),
            vec!["a pr", "and", "b eq 1", "c pr", "not", "or"]
        );
        let expr = parse("not ((x pr))").unwrap();
        assert_eq!(fingerprints(&expr), vec!["not(x pr)"]);
    }
}
