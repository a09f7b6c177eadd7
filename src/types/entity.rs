//! Entity references in their short string form.
//!
//! Supported forms:
//! - `any`, `anyAuthenticated`
//! - `User:alice`, `PhotoApp:User:alice` (short) and `PhotoApp::User::"alice"` (Cedar)
//! - `User:` (type only)
//! - `[Group:admins, Employee:admins]` (membership)
//! - `User[Group:admins]` (type within membership), or the Cedar scoped
//!   forms `Group::"admins".(User)` and `[Group::"admins"].(User)`
//! - the empty string

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PolicyError;

use super::value::{quote, unescape};

/// How an entity was written, so that it can be written back the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Notation {
    /// Colon separated, `User:alice`, `User[Group:admins]`.
    #[default]
    Short,
    /// Cedar uid syntax, `User::"alice"`, `Group::"admins".(User)`.
    Cedar,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Any,
    AnyAuthenticated,
    Equals {
        types: Vec<String>,
        id: String,
        notation: Notation,
    },
    Is {
        types: Vec<String>,
    },
    In {
        members: Vec<Entity>,
    },
    IsIn {
        types: Vec<String>,
        members: Vec<Entity>,
        notation: Notation,
    },
    Empty,
}

impl Entity {
    pub fn equals(types: &[&str], id: impl Into<String>) -> Self {
        Entity::Equals {
            types: types.iter().map(|t| t.to_string()).collect(),
            id: id.into(),
            notation: Notation::Short,
        }
    }

    pub fn cedar(types: &[&str], id: impl Into<String>) -> Self {
        Entity::Equals {
            types: types.iter().map(|t| t.to_string()).collect(),
            id: id.into(),
            notation: Notation::Cedar,
        }
    }

    pub fn types(&self) -> &[String] {
        match self {
            Entity::Equals { types, .. } | Entity::Is { types } | Entity::IsIn { types, .. } => {
                types
            }
            _ => &[],
        }
    }

    /// The namespace this entity lives in: the first type segment when there are
    /// at least two, otherwise `default`.
    pub fn namespace<'a>(&'a self, default: &'a str) -> &'a str {
        match self.types() {
            [ns, _, ..] => ns.as_str(),
            _ => default,
        }
    }

    /// The innermost type name, e.g. `User` for `PhotoApp:User:alice`.
    pub fn entity_type(&self) -> Option<&str> {
        self.types().last().map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Entity::Equals { id, .. } => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn members(&self) -> &[Entity] {
        match self {
            Entity::In { members } | Entity::IsIn { members, .. } => members,
            _ => &[],
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Entity::Any | Entity::AnyAuthenticated | Entity::Empty)
    }

    /// Render an `Equals` entity as a Cedar uid, `NS::Type::"id"`, using
    /// `default_type` when the reference carries no type.
    pub fn to_cedar_uid(&self, default_type: &str) -> Option<String> {
        match self {
            Entity::Equals { types, id, .. } if types.is_empty() => {
                Some(cedar_uid(&[default_type.to_string()], id))
            }
            Entity::Equals { types, id, .. } => Some(cedar_uid(types, id)),
            _ => None,
        }
    }
}

/// Format a Cedar entity uid from its type path and id.
pub fn cedar_uid(types: &[String], id: &str) -> String {
    format!("{}::{}", types.join("::"), quote(id))
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Entity::Any => write!(f, "any"),
            Entity::AnyAuthenticated => write!(f, "anyAuthenticated"),
            Entity::Equals {
                types,
                id,
                notation: Notation::Cedar,
            } => write!(f, "{}", cedar_uid(types, id)),
            Entity::Equals { types, id, .. } if types.is_empty() => write!(f, "{id}"),
            Entity::Equals { types, id, .. } => write!(f, "{}:{id}", types.join(":")),
            Entity::Is { types } => write!(f, "{}:", types.join(":")),
            Entity::In { members } => write!(f, "[{}]", members.iter().join(", ")),
            Entity::IsIn {
                types,
                members,
                notation: Notation::Cedar,
            } => write!(f, "{}.({})", members.iter().join(", "), types.join("::")),
            Entity::IsIn { types, members, .. } => {
                write!(f, "{}[{}]", types.join(":"), members.iter().join(", "))
            }
            Entity::Empty => Ok(()),
        }
    }
}

impl FromStr for Entity {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => return Ok(Entity::Empty),
            "any" => return Ok(Entity::Any),
            "anyAuthenticated" => return Ok(Entity::AnyAuthenticated),
            _ => {}
        }

        // `<member>.(Type)`
        if let Some(idx) = find_top_level(s, ".(").filter(|_| s.ends_with(')')) {
            let types = split_types(&s[idx + 2..s.len() - 1])?;
            let member: Entity = s[..idx].parse()?;
            if matches!(member, Entity::Empty) {
                return Err(invalid(s, "scoped entity without a member"));
            }
            return Ok(Entity::IsIn {
                types,
                members: vec![member],
                notation: Notation::Cedar,
            });
        }

        if let Some(open) = find_top_level(s, "[") {
            let close = matching_bracket(s, open).ok_or_else(|| invalid(s, "unbalanced '['"))?;
            if close != s.len() - 1 {
                return Err(invalid(s, "unexpected text after ']'"));
            }
            let members = split_top_level(&s[open + 1..close])
                .into_iter()
                .filter(|m| !m.trim().is_empty())
                .map(Entity::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            if open == 0 {
                return Ok(Entity::In { members });
            }
            return Ok(Entity::IsIn {
                types: split_types(&s[..open])?,
                members,
                notation: Notation::Short,
            });
        }
        if s.contains(']') {
            return Err(invalid(s, "unbalanced ']'"));
        }

        if let Some(idx) = find_top_level(s, "::") {
            let rest = &s[idx + 2..];
            // walk forward over further `::` separated type segments
            let mut types = vec![s[..idx].to_string()];
            let mut rest = rest;
            while !rest.starts_with('"') {
                let Some(next) = rest.find("::") else { break };
                types.push(rest[..next].to_string());
                rest = &rest[next + 2..];
            }
            let id = if rest.starts_with('"') {
                let inner = rest
                    .strip_prefix('"')
                    .and_then(|r| r.strip_suffix('"'))
                    .ok_or_else(|| invalid(s, "unterminated quoted id"))?;
                unescape(inner).map_err(|e| invalid(s, &e.to_string()))?
            } else {
                rest.to_string()
            };
            if types.iter().any(|t| t.is_empty()) {
                return Err(invalid(s, "empty type segment"));
            }
            return Ok(Entity::Equals {
                types,
                id,
                notation: Notation::Cedar,
            });
        }

        if let Some(prefix) = s.strip_suffix(':') {
            return Ok(Entity::Is {
                types: split_types(prefix)?,
            });
        }

        let mut types = Vec::new();
        let mut rest = s;
        while let Some(idx) = rest.find(':') {
            let segment = &rest[..idx];
            if segment.is_empty() || !segment.chars().all(is_type_char) {
                break;
            }
            types.push(segment.to_string());
            rest = &rest[idx + 1..];
        }
        Ok(Entity::Equals {
            types,
            id: rest.to_string(),
            notation: Notation::Short,
        })
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn invalid(s: &str, reason: &str) -> PolicyError {
    PolicyError::InvalidEntity(format!("{reason} in '{s}'"))
}

fn is_type_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn split_types(s: &str) -> Result<Vec<String>, PolicyError> {
    let sep = if s.contains("::") { "::" } else { ":" };
    let types: Vec<String> = s.split(sep).map(|t| t.trim().to_string()).collect();
    if types.iter().any(|t| t.is_empty()) {
        return Err(invalid(s, "empty type segment"));
    }
    Ok(types)
}

/// Byte offset of the first occurrence of `needle` outside quotes and brackets.
fn find_top_level(s: &str, needle: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        if depth == 0 && s[i..].starts_with(needle) {
            return Some(i);
        }
        match c {
            '"' => in_quotes = true,
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

fn matching_bracket(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s[open..].char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(idx) = find_top_level(rest, ",") {
        parts.push(&rest[..idx]);
        rest = &rest[idx + 1..];
    }
    parts.push(rest);
    parts
}
