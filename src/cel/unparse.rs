//! CEL source text for a `cel_parser` expression tree.

use std::fmt::Write;

use cel_parser::{ArithmeticOp, Atom, Expression, Member, RelationOp, UnaryOp};

// Higher binds tighter.
const TERNARY: u8 = 1;
const OR: u8 = 2;
const AND: u8 = 3;
const RELATION: u8 = 4;
const ADD: u8 = 5;
const MUL: u8 = 6;
const UNARY: u8 = 7;
const MEMBER: u8 = 8;
const PRIMARY: u8 = 9;

fn precedence(expr: &Expression) -> u8 {
    match expr {
        Expression::Ternary(..) => TERNARY,
        Expression::Or(..) => OR,
        Expression::And(..) => AND,
        Expression::Relation(..) => RELATION,
        Expression::Arithmetic(_, ArithmeticOp::Add | ArithmeticOp::Subtract, _) => ADD,
        Expression::Arithmetic(..) => MUL,
        Expression::Unary(..) => UNARY,
        Expression::Member(..) | Expression::FunctionCall(_, Some(_), _) => MEMBER,
        Expression::Atom(Atom::Int(i)) if *i < 0 => UNARY,
        Expression::Atom(Atom::Float(f)) if f.is_sign_negative() => UNARY,
        _ => PRIMARY,
    }
}

fn relation_symbol(op: &RelationOp) -> &'static str {
    match op {
        RelationOp::LessThan => "<",
        RelationOp::LessThanEq => "<=",
        RelationOp::GreaterThan => ">",
        RelationOp::GreaterThanEq => ">=",
        RelationOp::Equals => "==",
        RelationOp::NotEquals => "!=",
        RelationOp::In => "in",
    }
}

fn arithmetic_symbol(op: &ArithmeticOp) -> &'static str {
    match op {
        ArithmeticOp::Add => "+",
        ArithmeticOp::Subtract => "-",
        ArithmeticOp::Multiply => "*",
        ArithmeticOp::Divide => "/",
        ArithmeticOp::Modulus => "%",
    }
}

fn unary_symbol(op: &UnaryOp) -> &'static str {
    match op {
        UnaryOp::Not => "!",
        UnaryOp::DoubleNot => "!!",
        UnaryOp::Minus => "-",
        UnaryOp::DoubleMinus => "--",
    }
}

/// Print an expression as CEL source, with the parentheses its shape needs.
pub fn unparse(expr: &Expression) -> String {
    let mut out = String::new();
    Unparser { out: &mut out }.expr(expr);
    out
}

fn push_atom(out: &mut String, atom: &Atom) {
    match atom {
        Atom::Null => out.push_str("null"),
        Atom::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Atom::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Atom::UInt(u) => {
            let _ = write!(out, "{u}u");
        }
        Atom::Float(f) => {
            let text = f.to_string();
            out.push_str(&text);
            if text.chars().all(|c| c.is_ascii_digit() || c == '-') {
                out.push_str(".0");
            }
        }
        Atom::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c if c.is_control() => {
                        let _ = write!(out, "\\u{:04x}", c as u32);
                    }
                    c => out.push(c),
                }
            }
            out.push('"');
        }
        Atom::Bytes(bytes) => {
            out.push_str("b\"");
            for b in bytes.iter() {
                match b {
                    b'"' => out.push_str("\\\""),
                    b'\\' => out.push_str("\\\\"),
                    0x20..=0x7e => out.push(char::from(*b)),
                    b => {
                        let _ = write!(out, "\\x{b:02x}");
                    }
                }
            }
            out.push('"');
        }
    }
}

struct Unparser<'a> {
    out: &'a mut String,
}

impl Unparser<'_> {
    fn nested(&mut self, expr: &Expression, paren: bool) {
        if paren {
            self.out.push('(');
            self.expr(expr);
            self.out.push(')');
        } else {
            self.expr(expr);
        }
    }

    fn list<'e>(&mut self, items: impl IntoIterator<Item = &'e Expression>) {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(item);
        }
    }

    /// `left op right`; `&&` and `||` are associative, everything else groups to the left.
    fn infix(&mut self, prec: u8, left: &Expression, symbol: &str, right: &Expression, associative: bool) {
        self.nested(left, precedence(left) < prec);
        self.out.push(' ');
        self.out.push_str(symbol);
        self.out.push(' ');
        let right_prec = precedence(right);
        self.nested(right, right_prec < prec || (right_prec == prec && !associative));
    }

    fn expr(&mut self, expr: &Expression) {
        let prec = precedence(expr);
        match expr {
            Expression::Atom(atom) => push_atom(self.out, atom),
            Expression::Ident(name) => self.out.push_str(name.as_str()),
            Expression::Or(left, right) => self.infix(prec, left, "||", right, true),
            Expression::And(left, right) => self.infix(prec, left, "&&", right, true),
            Expression::Relation(left, op, right) => {
                self.infix(prec, left, relation_symbol(op), right, false)
            }
            Expression::Arithmetic(left, op, right) => {
                self.infix(prec, left, arithmetic_symbol(op), right, false)
            }
            Expression::Unary(op, operand) => {
                self.out.push_str(unary_symbol(op));
                self.nested(operand, precedence(operand) < UNARY);
            }
            Expression::Ternary(cond, then, otherwise) => {
                self.nested(cond, precedence(cond) <= TERNARY);
                self.out.push_str(" ? ");
                self.nested(then, precedence(then) <= TERNARY);
                self.out.push_str(" : ");
                self.expr(otherwise);
            }
            Expression::Member(operand, member) => {
                self.nested(operand, precedence(operand) < MEMBER);
                match member.as_ref() {
                    Member::Attribute(field) => {
                        self.out.push('.');
                        self.out.push_str(field.as_str());
                    }
                    Member::Index(index) => {
                        self.out.push('[');
                        self.expr(index);
                        self.out.push(']');
                    }
                    Member::Fields(fields) => {
                        self.out.push('{');
                        for (i, (name, value)) in fields.iter().enumerate() {
                            if i > 0 {
                                self.out.push_str(", ");
                            }
                            self.out.push_str(name.as_str());
                            self.out.push_str(": ");
                            self.expr(value);
                        }
                        self.out.push('}');
                    }
                }
            }
            Expression::FunctionCall(function, target, args) => {
                if let Some(target) = target {
                    self.nested(target, precedence(target) < MEMBER);
                    self.out.push('.');
                }
                self.expr(function);
                self.out.push('(');
                self.list(args);
                self.out.push(')');
            }
            Expression::List(items) => {
                self.out.push('[');
                self.list(items);
                self.out.push(']');
            }
            Expression::Map(entries) => {
                self.out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(key);
                    self.out.push_str(": ");
                    self.expr(value);
                }
                self.out.push('}');
            }
        }
    }
}
