//! Cedar text rendering of the JSON policy model.

use std::fmt::{Display, Formatter, Result as FmtResult, Write};

use itertools::Itertools;

use super::est::{
    ActionScope, BinaryOp, CedarExpr, CedarPolicy, CedarUid, LikePattern, PatternElem, Scope,
    ScopeTarget,
};

/// Extension functions written as calls; every other extension function is a method.
const CONSTRUCTORS: &[&str] = &["decimal", "ip", "datetime", "duration"];

// Binding strength, loosest first.
const IF: u8 = 0;
const OR: u8 = 1;
const AND: u8 = 2;
const RELATION: u8 = 3;
const ADD: u8 = 4;
const MUL: u8 = 5;
const UNARY: u8 = 6;
const MEMBER: u8 = 7;
const PRIMARY: u8 = 8;

/// Quote a string as a Cedar string literal.
pub fn cedar_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    push_escaped(&mut out, s, false);
    out.push('"');
    out
}

fn push_escaped(out: &mut String, s: &str, in_pattern: bool) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '*' if in_pattern => out.push_str("\\*"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn uid(uid: &CedarUid) -> String {
    uid.to_uid_string()
}

fn precedence(expr: &CedarExpr) -> u8 {
    match expr {
        CedarExpr::IfThenElse { .. } => IF,
        CedarExpr::Or { .. } => OR,
        CedarExpr::And { .. } => AND,
        CedarExpr::Eq { .. }
        | CedarExpr::NotEq { .. }
        | CedarExpr::Less { .. }
        | CedarExpr::LessEq { .. }
        | CedarExpr::Greater { .. }
        | CedarExpr::GreaterEq { .. }
        | CedarExpr::In { .. }
        | CedarExpr::Has { .. }
        | CedarExpr::Like { .. }
        | CedarExpr::Is { .. } => RELATION,
        CedarExpr::Add { .. } | CedarExpr::Sub { .. } => ADD,
        CedarExpr::Mul { .. } => MUL,
        CedarExpr::Not { .. } | CedarExpr::Neg { .. } => UNARY,
        CedarExpr::Contains { .. }
        | CedarExpr::ContainsAll { .. }
        | CedarExpr::ContainsAny { .. }
        | CedarExpr::GetTag { .. }
        | CedarExpr::HasTag { .. }
        | CedarExpr::IsEmpty { .. }
        | CedarExpr::GetAttr { .. } => MEMBER,
        CedarExpr::ExtFn(_) => match expr.as_call() {
            Some((name, _)) if CONSTRUCTORS.contains(&name) => PRIMARY,
            _ => MEMBER,
        },
        CedarExpr::Value(serde_json::Value::Number(n)) if n.as_i64().is_some_and(|i| i < 0) => {
            UNARY
        }
        _ => PRIMARY,
    }
}

struct Printer<'a> {
    out: &'a mut String,
}

impl Printer<'_> {
    fn expr(&mut self, expr: &CedarExpr, min: u8) {
        let wrap = precedence(expr) < min;
        if wrap {
            self.out.push('(');
        }
        self.inner(expr);
        if wrap {
            self.out.push(')');
        }
    }

    fn inner(&mut self, expr: &CedarExpr) {
        if let Some((op, left, right)) = expr.as_binary() {
            return self.binary(op, left, right);
        }
        match expr {
            CedarExpr::Value(value) => self.value(value),
            CedarExpr::Var(var) => self.out.push_str(&var.to_string()),
            CedarExpr::Slot(slot) => self.out.push_str(slot),
            CedarExpr::Not { arg } => {
                self.out.push('!');
                self.expr(arg, UNARY);
            }
            CedarExpr::Neg { arg } => {
                self.out.push('-');
                self.expr(arg, UNARY);
            }
            CedarExpr::IsEmpty { arg } => {
                self.expr(arg, MEMBER);
                self.out.push_str(".isEmpty()");
            }
            CedarExpr::GetAttr { left, attr } => {
                self.expr(left, MEMBER);
                if is_identifier(attr) {
                    self.out.push('.');
                    self.out.push_str(attr);
                } else {
                    self.out.push('[');
                    self.out.push_str(&cedar_string(attr));
                    self.out.push(']');
                }
            }
            CedarExpr::Has { left, attr } => {
                self.expr(left, ADD);
                self.out.push_str(" has ");
                if is_identifier(attr) {
                    self.out.push_str(attr);
                } else {
                    self.out.push_str(&cedar_string(attr));
                }
            }
            CedarExpr::Like { left, pattern } => {
                self.expr(left, ADD);
                self.out.push_str(" like ");
                self.pattern(pattern);
            }
            CedarExpr::Is {
                left,
                entity_type,
                in_expr,
            } => {
                self.expr(left, ADD);
                self.out.push_str(" is ");
                self.out.push_str(entity_type);
                if let Some(target) = in_expr {
                    self.out.push_str(" in ");
                    self.expr(target, ADD);
                }
            }
            CedarExpr::IfThenElse {
                cond,
                then,
                otherwise,
            } => {
                self.out.push_str("if ");
                self.expr(cond, IF);
                self.out.push_str(" then ");
                self.expr(then, IF);
                self.out.push_str(" else ");
                self.expr(otherwise, IF);
            }
            CedarExpr::Set(items) => {
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(item, IF);
                }
                self.out.push(']');
            }
            CedarExpr::Record(fields) => {
                self.out.push('{');
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push_str(&cedar_string(key));
                    self.out.push_str(": ");
                    self.expr(value, IF);
                }
                self.out.push('}');
            }
            CedarExpr::ExtFn(calls) => {
                for (name, args) in calls {
                    self.call(name, args);
                }
            }
            _ => {}
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &CedarExpr, right: &CedarExpr) {
        let (lhs, rhs) = match op {
            BinaryOp::Or => (OR, AND),
            BinaryOp::And => (AND, RELATION),
            BinaryOp::Add | BinaryOp::Sub => (ADD, MUL),
            BinaryOp::Mul => (MUL, UNARY),
            BinaryOp::Contains
            | BinaryOp::ContainsAll
            | BinaryOp::ContainsAny
            | BinaryOp::GetTag
            | BinaryOp::HasTag => {
                self.expr(left, MEMBER);
                self.out.push('.');
                self.out.push_str(&op.to_string());
                self.out.push('(');
                self.expr(right, IF);
                self.out.push(')');
                return;
            }
            _ => (ADD, ADD),
        };
        self.expr(left, lhs);
        self.out.push(' ');
        self.out.push_str(&op.to_string());
        self.out.push(' ');
        self.expr(right, rhs);
    }

    fn call(&mut self, name: &str, args: &[CedarExpr]) {
        let (receiver, args) = match args.split_first() {
            Some((first, rest)) if !CONSTRUCTORS.contains(&name) => (Some(first), rest),
            _ => (None, args),
        };
        if let Some(receiver) = receiver {
            self.expr(receiver, MEMBER);
            self.out.push('.');
        }
        self.out.push_str(name);
        self.out.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(arg, IF);
        }
        self.out.push(')');
    }

    fn pattern(&mut self, pattern: &LikePattern) {
        self.out.push('"');
        for elem in pattern.elems() {
            match elem {
                PatternElem::Wildcard => self.out.push('*'),
                PatternElem::Literal(text) => push_escaped(self.out, &text, true),
            }
        }
        self.out.push('"');
    }

    fn value(&mut self, value: &serde_json::Value) {
        match value {
            serde_json::Value::Null => self.out.push_str("null"),
            serde_json::Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            serde_json::Value::Number(n) => self.out.push_str(&n.to_string()),
            serde_json::Value::String(s) => self.out.push_str(&cedar_string(s)),
            serde_json::Value::Array(items) => {
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.value(item);
                }
                self.out.push(']');
            }
            serde_json::Value::Object(map) => {
                if let Some(entity) = CedarUid::from_literal(value) {
                    self.out.push_str(&uid(&entity));
                } else if let Some(extn) = map.get("__extn") {
                    let name = extn.get("fn").and_then(|f| f.as_str()).unwrap_or_default();
                    self.out.push_str(name);
                    self.out.push('(');
                    if let Some(arg) = extn.get("arg") {
                        self.value(arg);
                    }
                    self.out.push(')');
                } else {
                    self.out.push('{');
                    for (i, (key, item)) in map.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.out.push_str(&cedar_string(key));
                        self.out.push_str(": ");
                        self.value(item);
                    }
                    self.out.push('}');
                }
            }
        }
    }
}

impl Display for CedarExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut out = String::new();
        Printer { out: &mut out }.expr(self, IF);
        f.write_str(&out)
    }
}

fn scope_target(target: &ScopeTarget) -> String {
    match (&target.entity, &target.slot) {
        (Some(entity), _) => uid(entity),
        (None, Some(slot)) => slot.clone(),
        (None, None) => String::new(),
    }
}

fn scope(var: &str, scope: &Scope) -> String {
    match scope {
        Scope::All => var.to_string(),
        Scope::Eq(target) => format!("{var} == {}", scope_target(target)),
        Scope::In(target) => format!("{var} in {}", scope_target(target)),
        Scope::Is {
            entity_type,
            in_target: None,
        } => format!("{var} is {entity_type}"),
        Scope::Is {
            entity_type,
            in_target: Some(target),
        } => format!("{var} is {entity_type} in {}", scope_target(target)),
    }
}

fn action_scope(scope: &ActionScope) -> String {
    match scope {
        ActionScope::All => "action".to_string(),
        ActionScope::Eq { entity } => format!("action == {}", uid(entity)),
        ActionScope::In {
            entity: Some(entity),
            ..
        } => format!("action in {}", uid(entity)),
        ActionScope::In {
            entities: Some(entities),
            ..
        } => format!("action in [{}]", entities.iter().map(uid).join(", ")),
        ActionScope::In { .. } => "action in []".to_string(),
    }
}

impl Display for CedarPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in &self.annotations {
            match value {
                Some(value) => writeln!(f, "@{key}({})", cedar_string(value))?,
                None => writeln!(f, "@{key}")?,
            }
        }
        writeln!(f, "{} (", self.effect)?;
        writeln!(f, "  {},", scope("principal", &self.principal))?;
        writeln!(f, "  {},", action_scope(&self.action))?;
        writeln!(f, "  {}", scope("resource", &self.resource))?;
        write!(f, ")")?;
        for clause in &self.conditions {
            write!(f, "\n{} {{ {} }}", clause.kind, clause.body)?;
        }
        write!(f, ";")
    }
}
