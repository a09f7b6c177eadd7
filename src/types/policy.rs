//! The canonical policy model and its JSON form.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

use crate::condition::{self, Expr};
use crate::error::PolicyError;

use super::entity::Entity;

/// Version tag written on policies created by this crate.
pub const DEFAULT_VERSION: &str = "0.7";

/// Source data key holding dialect annotations.
pub const SOURCE_ANNOTATIONS: &str = "annotations";
/// Source data key marking a policy as a template.
pub const SOURCE_TEMPLATE: &str = "template";
/// Source data key holding a non-default dialect effect.
pub const SOURCE_EFFECT: &str = "effect";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pap_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Default for Meta {
    fn default() -> Self {
        Meta {
            version: DEFAULT_VERSION.to_string(),
            created: None,
            modified: None,
            description: None,
            policy_id: None,
            pap_id: None,
            source_data: None,
            etag: None,
        }
    }
}

/// What a matching condition means for the request.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConditionAction {
    #[default]
    Allow,
    Deny,
    Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Condition {
    pub rule: String,
    #[serde(default)]
    pub action: ConditionAction,
}

impl Condition {
    pub fn new(rule: impl Into<String>, action: ConditionAction) -> Self {
        Condition {
            rule: rule.into(),
            action,
        }
    }

    /// Build a condition from an expression, serializing it to rule text.
    pub fn from_expr(expr: &Expr, action: ConditionAction) -> Self {
        Condition::new(expr.to_string(), action)
    }

    pub fn parse_rule(&self) -> Result<Expr, PolicyError> {
        condition::parse(&self.rule)
    }

    /// The sorted equivalence fingerprints of the rule. An unparseable rule
    /// fingerprints as its lowercased text.
    fn fingerprints(&self) -> Vec<String> {
        match self.parse_rule() {
            Ok(expr) => condition::fingerprints(&expr),
            Err(_) => vec![self.rule.trim().to_lowercase()],
        }
    }

    /// Same action and equivalent rules.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.action == other.action && self.fingerprints() == other.fingerprints()
    }
}

/// A policy field that differs between two policies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffDetail {
    Subject,
    Action,
    Object,
    Condition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Policy {
    pub meta: Meta,
    pub subjects: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Policy {
    pub fn new<S: Into<String>, A: Into<String>>(
        subjects: impl IntoIterator<Item = S>,
        actions: impl IntoIterator<Item = A>,
        object: impl Into<String>,
    ) -> Self {
        Policy {
            meta: Meta::default(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            actions: actions.into_iter().map(Into::into).collect(),
            object: object.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, rule: impl Into<String>, action: ConditionAction) -> Self {
        self.condition = Some(Condition::new(rule, action));
        self
    }

    pub fn with_policy_id(mut self, id: impl Into<String>) -> Self {
        self.meta.policy_id = Some(id.into());
        self
    }

    pub fn policy_id(&self) -> Option<&str> {
        self.meta.policy_id.as_deref()
    }

    pub fn subject_entities(&self) -> Result<Vec<Entity>, PolicyError> {
        self.subjects.iter().map(|s| s.parse()).collect()
    }

    pub fn object_entity(&self) -> Result<Entity, PolicyError> {
        self.object.parse()
    }

    /// The parsed condition rule, if the policy has one.
    pub fn condition_expr(&self) -> Result<Option<Expr>, PolicyError> {
        self.condition.as_ref().map(Condition::parse_rule).transpose()
    }

    pub fn source_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.source_data.as_ref().and_then(|data| data.get(key))
    }

    pub fn set_source_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.meta
            .source_data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
    }

    pub fn is_template(&self) -> bool {
        self.source_value(SOURCE_TEMPLATE)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// A weak etag over the semantic fields. Subjects and actions are hashed as
    /// sets and the condition by its equivalence class.
    pub fn calculate_etag(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"subjects\0");
        for subject in self.subjects.iter().sorted().dedup() {
            hasher.update(subject.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"actions\0");
        for action in self.actions.iter().sorted().dedup() {
            hasher.update(action.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"object\0");
        hasher.update(self.object.as_bytes());
        if let Some(condition) = &self.condition {
            hasher.update(b"\0condition\0");
            hasher.update(condition.action.to_string().as_bytes());
            for fingerprint in condition.fingerprints() {
                hasher.update(b"\0");
                hasher.update(fingerprint.as_bytes());
            }
        }
        format!("W/\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Store the computed etag in `meta.etag` and return it.
    pub fn update_etag(&mut self) -> &str {
        self.meta.etag.insert(self.calculate_etag())
    }

    /// Field-by-field comparison of the semantic parts of two policies.
    pub fn compare(&self, other: &Policy) -> Vec<DiffDetail> {
        let mut details = Vec::new();
        if !same_set(&self.subjects, &other.subjects) {
            details.push(DiffDetail::Subject);
        }
        if !same_set(&self.actions, &other.actions) {
            details.push(DiffDetail::Action);
        }
        if self.object != other.object {
            details.push(DiffDetail::Object);
        }
        let condition_equal = match (&self.condition, &other.condition) {
            (None, None) => true,
            (Some(a), Some(b)) => a.equivalent(b),
            _ => false,
        };
        if !condition_equal {
            details.push(DiffDetail::Condition);
        }
        details
    }

    pub fn equals(&self, other: &Policy) -> bool {
        self.compare(other).is_empty()
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.iter().sorted().dedup().eq(b.iter().sorted().dedup())
}

/// The envelope form of a canonical document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Policies {
    pub policies: Vec<Policy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

impl Policies {
    pub fn new(policies: Vec<Policy>) -> Self {
        Policies { policies, app: None }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl From<Vec<Policy>> for Policies {
    fn from(policies: Vec<Policy>) -> Self {
        Policies::new(policies)
    }
}

impl IntoIterator for Policies {
    type Item = Policy;
    type IntoIter = std::vec::IntoIter<Policy>;

    fn into_iter(self) -> Self::IntoIter {
        self.policies.into_iter()
    }
}
