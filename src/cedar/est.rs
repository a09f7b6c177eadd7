//! Serde model of Cedar's JSON policy format.
//!
//! `cedar_policy` parses Cedar text and hands every policy over as JSON
//! (`Policy::to_json`); this module gives that JSON a typed shape to map from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::PolicyError;
use crate::types::cedar_uid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Effect {
    #[default]
    Permit,
    Forbid,
}

/// An entity uid as `{"type": ..., "id": ...}`, also accepted in the
/// escaped `{"__entity": {...}}` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "EntityUidRepr")]
pub struct CedarUid {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntityUidRepr {
    Escaped {
        __entity: TypeAndId,
    },
    Plain(TypeAndId),
}

#[derive(Deserialize)]
struct TypeAndId {
    #[serde(rename = "type")]
    type_name: String,
    id: String,
}

impl From<EntityUidRepr> for CedarUid {
    fn from(repr: EntityUidRepr) -> Self {
        let (EntityUidRepr::Escaped { __entity: inner } | EntityUidRepr::Plain(inner)) = repr;
        CedarUid {
            type_name: inner.type_name,
            id: inner.id,
        }
    }
}

impl CedarUid {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        CedarUid {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    pub fn type_path(&self) -> Vec<String> {
        self.type_name.split("::").map(str::to_string).collect()
    }

    /// `Type::"id"`
    pub fn to_uid_string(&self) -> String {
        cedar_uid(&self.type_path(), &self.id)
    }

    /// The uid as an expression literal.
    pub fn to_literal(&self) -> serde_json::Value {
        serde_json::json!({"__entity": {"type": self.type_name, "id": self.id}})
    }

    pub fn from_literal(value: &serde_json::Value) -> Option<CedarUid> {
        let inner = value.get("__entity")?;
        Some(CedarUid::new(
            inner.get("type")?.as_str()?,
            inner.get("id")?.as_str()?,
        ))
    }
}

/// The target of a `==` or `in` scope constraint: a concrete entity or a template slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<CedarUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

impl ScopeTarget {
    pub fn entity(uid: CedarUid) -> Self {
        ScopeTarget {
            entity: Some(uid),
            slot: None,
        }
    }

    pub fn slot(name: impl Into<String>) -> Self {
        ScopeTarget {
            entity: None,
            slot: Some(name.into()),
        }
    }
}

/// Principal and resource scope constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Scope {
    All,
    #[serde(rename = "==")]
    Eq(ScopeTarget),
    #[serde(rename = "in")]
    In(ScopeTarget),
    #[serde(rename = "is")]
    Is {
        entity_type: String,
        #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
        in_target: Option<ScopeTarget>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ActionScope {
    All,
    #[serde(rename = "==")]
    Eq { entity: CedarUid },
    #[serde(rename = "in")]
    In {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity: Option<CedarUid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entities: Option<Vec<CedarUid>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClauseKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub kind: ClauseKind,
    pub body: CedarExpr,
}

impl Clause {
    pub fn when(body: CedarExpr) -> Self {
        Clause {
            kind: ClauseKind::When,
            body,
        }
    }

    pub fn unless(body: CedarExpr) -> Self {
        Clause {
            kind: ClauseKind::Unless,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternElem {
    Wildcard,
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LikePattern {
    Elems(Vec<PatternElem>),
    Text(String),
}

impl LikePattern {
    /// Pattern elements with adjacent literals merged.
    pub fn elems(&self) -> Vec<PatternElem> {
        let raw = match self {
            LikePattern::Elems(elems) => elems.clone(),
            LikePattern::Text(text) => parse_pattern_text(text),
        };
        let mut merged: Vec<PatternElem> = Vec::with_capacity(raw.len());
        for elem in raw {
            if let (Some(PatternElem::Literal(prev)), PatternElem::Literal(next)) =
                (merged.last_mut(), &elem)
            {
                prev.push_str(next);
                continue;
            }
            merged.push(elem);
        }
        merged
    }
}

fn parse_pattern_text(text: &str) -> Vec<PatternElem> {
    let mut elems = Vec::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => elems.push(PatternElem::Wildcard),
            '\\' => {
                if let Some(next) = chars.next() {
                    elems.push(PatternElem::Literal(next.to_string()));
                }
            }
            c => elems.push(PatternElem::Literal(c.to_string())),
        }
    }
    elems
}

/// Binary operators that share the `{"left": ..., "right": ...}` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "contains")]
    Contains,
    #[strum(serialize = "containsAll")]
    ContainsAll,
    #[strum(serialize = "containsAny")]
    ContainsAny,
    #[strum(serialize = "getTag")]
    GetTag,
    #[strum(serialize = "hasTag")]
    HasTag,
}

type Operand = Box<CedarExpr>;

/// A Cedar expression in JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CedarExpr {
    Value(serde_json::Value),
    Var(Var),
    Slot(String),
    #[serde(rename = "!")]
    Not { arg: Operand },
    #[serde(rename = "neg")]
    Neg { arg: Operand },
    #[serde(rename = "==")]
    Eq { left: Operand, right: Operand },
    #[serde(rename = "!=")]
    NotEq { left: Operand, right: Operand },
    #[serde(rename = "<")]
    Less { left: Operand, right: Operand },
    #[serde(rename = "<=")]
    LessEq { left: Operand, right: Operand },
    #[serde(rename = ">")]
    Greater { left: Operand, right: Operand },
    #[serde(rename = ">=")]
    GreaterEq { left: Operand, right: Operand },
    #[serde(rename = "&&")]
    And { left: Operand, right: Operand },
    #[serde(rename = "||")]
    Or { left: Operand, right: Operand },
    #[serde(rename = "in")]
    In { left: Operand, right: Operand },
    #[serde(rename = "+")]
    Add { left: Operand, right: Operand },
    #[serde(rename = "-")]
    Sub { left: Operand, right: Operand },
    #[serde(rename = "*")]
    Mul { left: Operand, right: Operand },
    #[serde(rename = "contains")]
    Contains { left: Operand, right: Operand },
    #[serde(rename = "containsAll")]
    ContainsAll { left: Operand, right: Operand },
    #[serde(rename = "containsAny")]
    ContainsAny { left: Operand, right: Operand },
    #[serde(rename = "getTag")]
    GetTag { left: Operand, right: Operand },
    #[serde(rename = "hasTag")]
    HasTag { left: Operand, right: Operand },
    #[serde(rename = "isEmpty")]
    IsEmpty { arg: Operand },
    #[serde(rename = ".")]
    GetAttr { left: Operand, attr: String },
    #[serde(rename = "has")]
    Has { left: Operand, attr: String },
    #[serde(rename = "like")]
    Like { left: Operand, pattern: LikePattern },
    #[serde(rename = "is")]
    Is {
        left: Operand,
        entity_type: String,
        #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
        in_expr: Option<Operand>,
    },
    #[serde(rename = "if-then-else")]
    IfThenElse {
        #[serde(rename = "if")]
        cond: Operand,
        then: Operand,
        #[serde(rename = "else")]
        otherwise: Operand,
    },
    Set(Vec<CedarExpr>),
    Record(BTreeMap<String, CedarExpr>),
    /// Extension function calls, `{"decimal": [...]}` or `{"lessThan": [...]}`.
    #[serde(untagged)]
    ExtFn(BTreeMap<String, Vec<CedarExpr>>),
}

impl CedarExpr {
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        CedarExpr::Value(value.into())
    }

    pub fn var(var: Var) -> Self {
        CedarExpr::Var(var)
    }

    pub fn entity(uid: &CedarUid) -> Self {
        CedarExpr::Value(uid.to_literal())
    }

    pub fn get_attr(left: CedarExpr, attr: impl Into<String>) -> Self {
        CedarExpr::GetAttr {
            left: Box::new(left),
            attr: attr.into(),
        }
    }

    pub fn has(left: CedarExpr, attr: impl Into<String>) -> Self {
        CedarExpr::Has {
            left: Box::new(left),
            attr: attr.into(),
        }
    }

    pub fn not(arg: CedarExpr) -> Self {
        CedarExpr::Not { arg: Box::new(arg) }
    }

    pub fn call(name: impl Into<String>, args: Vec<CedarExpr>) -> Self {
        CedarExpr::ExtFn(BTreeMap::from([(name.into(), args)]))
    }

    pub fn binary(op: BinaryOp, left: CedarExpr, right: CedarExpr) -> Self {
        let (left, right) = (Box::new(left), Box::new(right));
        match op {
            BinaryOp::Eq => CedarExpr::Eq { left, right },
            BinaryOp::NotEq => CedarExpr::NotEq { left, right },
            BinaryOp::Less => CedarExpr::Less { left, right },
            BinaryOp::LessEq => CedarExpr::LessEq { left, right },
            BinaryOp::Greater => CedarExpr::Greater { left, right },
            BinaryOp::GreaterEq => CedarExpr::GreaterEq { left, right },
            BinaryOp::And => CedarExpr::And { left, right },
            BinaryOp::Or => CedarExpr::Or { left, right },
            BinaryOp::In => CedarExpr::In { left, right },
            BinaryOp::Add => CedarExpr::Add { left, right },
            BinaryOp::Sub => CedarExpr::Sub { left, right },
            BinaryOp::Mul => CedarExpr::Mul { left, right },
            BinaryOp::Contains => CedarExpr::Contains { left, right },
            BinaryOp::ContainsAll => CedarExpr::ContainsAll { left, right },
            BinaryOp::ContainsAny => CedarExpr::ContainsAny { left, right },
            BinaryOp::GetTag => CedarExpr::GetTag { left, right },
            BinaryOp::HasTag => CedarExpr::HasTag { left, right },
        }
    }

    /// The operator and operands of a binary expression.
    pub fn as_binary(&self) -> Option<(BinaryOp, &CedarExpr, &CedarExpr)> {
        let (op, left, right) = match self {
            CedarExpr::Eq { left, right } => (BinaryOp::Eq, left, right),
            CedarExpr::NotEq { left, right } => (BinaryOp::NotEq, left, right),
            CedarExpr::Less { left, right } => (BinaryOp::Less, left, right),
            CedarExpr::LessEq { left, right } => (BinaryOp::LessEq, left, right),
            CedarExpr::Greater { left, right } => (BinaryOp::Greater, left, right),
            CedarExpr::GreaterEq { left, right } => (BinaryOp::GreaterEq, left, right),
            CedarExpr::And { left, right } => (BinaryOp::And, left, right),
            CedarExpr::Or { left, right } => (BinaryOp::Or, left, right),
            CedarExpr::In { left, right } => (BinaryOp::In, left, right),
            CedarExpr::Add { left, right } => (BinaryOp::Add, left, right),
            CedarExpr::Sub { left, right } => (BinaryOp::Sub, left, right),
            CedarExpr::Mul { left, right } => (BinaryOp::Mul, left, right),
            CedarExpr::Contains { left, right } => (BinaryOp::Contains, left, right),
            CedarExpr::ContainsAll { left, right } => (BinaryOp::ContainsAll, left, right),
            CedarExpr::ContainsAny { left, right } => (BinaryOp::ContainsAny, left, right),
            CedarExpr::GetTag { left, right } => (BinaryOp::GetTag, left, right),
            CedarExpr::HasTag { left, right } => (BinaryOp::HasTag, left, right),
            _ => return None,
        };
        Some((op, left.as_ref(), right.as_ref()))
    }

    /// The single extension call in an `ExtFn` node.
    pub fn as_call(&self) -> Option<(&str, &[CedarExpr])> {
        match self {
            CedarExpr::ExtFn(calls) if calls.len() == 1 => calls
                .iter()
                .next()
                .map(|(name, args)| (name.as_str(), args.as_slice())),
            _ => None,
        }
    }
}

/// One Cedar policy or template in JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CedarPolicy {
    pub effect: Effect,
    pub principal: Scope,
    pub action: ActionScope,
    pub resource: Scope,
    #[serde(default)]
    pub conditions: Vec<Clause>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Option<String>>,
}

impl CedarPolicy {
    pub fn from_json(json: serde_json::Value) -> Result<Self, PolicyError> {
        serde_json::from_value(json).map_err(|e| PolicyError::UnsupportedCedarConstruct(e.to_string()))
    }

    pub fn to_json(&self) -> Result<serde_json::Value, PolicyError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether a scope refers to a template slot.
    pub fn is_template(&self) -> bool {
        let slotted = |scope: &Scope| match scope {
            Scope::Eq(target) | Scope::In(target) => target.slot.is_some(),
            Scope::Is {
                in_target: Some(target),
                ..
            } => target.slot.is_some(),
            _ => false,
        };
        slotted(&self.principal) || slotted(&self.resource)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).and_then(|v| v.as_deref())
    }
}
