//! Checks canonical policies against a schema.
//!
//! Validation never fails as a whole. Every policy is checked and each failed
//! check becomes one [`ValidationError`] in the returned list.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::debug;

use crate::cedar::ROLE_PREFIX;
use crate::condition::{split_path, unquote_segment};
use crate::types::{Entity, Policy};

use super::model::{ActionType, Namespaces, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    #[strum(serialize = "invalid subject namespace")]
    InvalidSubjectNamespace,
    #[strum(serialize = "invalid subject entity type")]
    InvalidSubjectEntityType,
    #[strum(serialize = "invalid object namespace")]
    InvalidObjectNamespace,
    #[strum(serialize = "invalid object entity type")]
    InvalidObjectEntityType,
    #[strum(serialize = "invalid action")]
    InvalidAction,
    #[strum(serialize = "invalid principal type")]
    InvalidPrincipalType,
    #[strum(serialize = "invalid resource type")]
    InvalidResourceType,
    #[strum(serialize = "invalid condition attribute")]
    InvalidConditionAttribute,
    #[strum(serialize = "invalid entity reference")]
    InvalidEntity,
    #[strum(serialize = "invalid condition")]
    InvalidCondition,
}

/// The part of a policy a validation error points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Element {
    Subject,
    Action,
    Object,
    Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("policy {policy}: {kind} in {element} '{value}'")]
pub struct ValidationError {
    /// The policy id, or `#<index>` for policies without one.
    pub policy: String,
    pub element: Element,
    pub value: String,
    pub kind: ValidationErrorKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

// A subject or object reference that names a type in a known namespace.
struct TypedRef<'p, 's> {
    value: &'p str,
    schema: &'s Schema,
    entity_type: String,
}

struct FoundAction<'s> {
    id: String,
    schema: &'s Schema,
    action: &'s ActionType,
}

struct Report<'p> {
    policy: String,
    source: &'p Policy,
    errors: Vec<ValidationError>,
}

impl Report<'_> {
    fn push(
        &mut self,
        element: Element,
        value: impl Into<String>,
        kind: ValidationErrorKind,
        causes: Vec<String>,
    ) {
        self.errors.push(ValidationError {
            policy: self.policy.clone(),
            element,
            value: value.into(),
            kind,
            causes,
        });
    }
}

/// Validates policies against a set of namespaces. References without a
/// namespace segment resolve in `default_namespace`.
#[derive(Debug, Clone)]
pub struct Validator<'s> {
    namespaces: &'s Namespaces,
    default_namespace: String,
}

impl<'s> Validator<'s> {
    pub fn new(namespaces: &'s Namespaces, default_namespace: impl Into<String>) -> Self {
        Validator {
            namespaces,
            default_namespace: default_namespace.into(),
        }
    }

    pub fn validate(&self, policies: &[Policy]) -> Vec<ValidationError> {
        let errors: Vec<ValidationError> = policies
            .iter()
            .enumerate()
            .flat_map(|(index, policy)| self.validate_policy(index, policy))
            .collect();
        debug!(
            event = "Validate",
            phase = "complete",
            policies = policies.len(),
            errors = errors.len(),
        );
        errors
    }

    pub fn validate_policy(&self, index: usize, policy: &Policy) -> Vec<ValidationError> {
        let mut report = Report {
            policy: policy
                .policy_id()
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{index}")),
            source: policy,
            errors: Vec::new(),
        };

        let subjects = self.check_subjects(&mut report);
        let objects = self.check_object(&mut report);
        let actions = self.check_actions(&mut report);

        for found in &actions {
            if let Some(allowed) = found.action.principal_types() {
                for subject in subjects.iter().filter(|s| !type_allowed(allowed, s)) {
                    report.push(
                        Element::Subject,
                        subject.value,
                        ValidationErrorKind::InvalidPrincipalType,
                        vec![format!(
                            "action '{}' applies to principal types [{}]",
                            found.id,
                            allowed.iter().join(", ")
                        )],
                    );
                }
            }
            if let Some(allowed) = found.action.resource_types() {
                for object in objects.iter().filter(|o| !type_allowed(allowed, o)) {
                    report.push(
                        Element::Object,
                        object.value,
                        ValidationErrorKind::InvalidResourceType,
                        vec![format!(
                            "action '{}' applies to resource types [{}]",
                            found.id,
                            allowed.iter().join(", ")
                        )],
                    );
                }
            }
        }

        self.check_condition(&mut report, &subjects, &objects, &actions);

        debug!(
            event = "Validate",
            phase = "policy",
            policy = %report.policy,
            errors = report.errors.len(),
        );
        report.errors
    }

    fn check_subjects<'p>(&self, report: &mut Report<'p>) -> Vec<TypedRef<'p, 's>> {
        let mut typed = Vec::new();
        let policy = report.source;
        for subject in &policy.subjects {
            match subject.parse::<Entity>() {
                Ok(entity) => {
                    self.check_entity(report, Element::Subject, subject, &entity, true, &mut typed)
                }
                Err(e) => report.push(
                    Element::Subject,
                    subject.as_str(),
                    ValidationErrorKind::InvalidEntity,
                    vec![e.to_string()],
                ),
            }
        }
        typed
    }

    fn check_object<'p>(&self, report: &mut Report<'p>) -> Vec<TypedRef<'p, 's>> {
        let mut typed = Vec::new();
        let policy = report.source;
        let object = policy.object.as_str();
        if object.is_empty() || object == self.default_namespace {
            return typed;
        }
        match object.parse::<Entity>() {
            Ok(entity) => {
                self.check_entity(report, Element::Object, object, &entity, true, &mut typed)
            }
            Err(e) => report.push(
                Element::Object,
                object,
                ValidationErrorKind::InvalidEntity,
                vec![e.to_string()],
            ),
        }
        typed
    }

    /// Check that the entity's types exist. Types of the reference itself are
    /// collected into `typed`; group members are checked but not collected.
    fn check_entity<'p>(
        &self,
        report: &mut Report<'p>,
        element: Element,
        value: &'p str,
        entity: &Entity,
        collect: bool,
        typed: &mut Vec<TypedRef<'p, 's>>,
    ) {
        for member in entity.members() {
            self.check_entity(report, element, value, member, false, typed);
        }
        let Some(entity_type) = entity.entity_type() else {
            return;
        };
        let namespace = entity.namespace(&self.default_namespace);
        let Some(schema) = self.namespaces.get(namespace) else {
            let kind = match element {
                Element::Subject => ValidationErrorKind::InvalidSubjectNamespace,
                _ => ValidationErrorKind::InvalidObjectNamespace,
            };
            let cause = format!("namespace '{namespace}' is not defined");
            report.push(element, value, kind, vec![cause]);
            return;
        };
        if !schema.entity_types.contains_key(entity_type) {
            let kind = match element {
                Element::Subject => ValidationErrorKind::InvalidSubjectEntityType,
                _ => ValidationErrorKind::InvalidObjectEntityType,
            };
            let cause = format!("entity type '{entity_type}' is not defined in namespace '{namespace}'");
            report.push(element, value, kind, vec![cause]);
        }
        if collect {
            typed.push(TypedRef {
                value,
                schema,
                entity_type: entity_type.to_string(),
            });
        }
    }

    fn check_actions(&self, report: &mut Report<'_>) -> Vec<FoundAction<'s>> {
        let mut found = Vec::new();
        let policy = report.source;
        for action in &policy.actions {
            let name = action.strip_prefix(ROLE_PREFIX).unwrap_or(action);
            let entity = match name.parse::<Entity>() {
                Ok(entity) => entity,
                Err(e) => {
                    report.push(
                        Element::Action,
                        action.as_str(),
                        ValidationErrorKind::InvalidEntity,
                        vec![e.to_string()],
                    );
                    continue;
                }
            };
            if entity.is_unrestricted() {
                continue;
            }
            let Some(id) = entity.id() else {
                report.push(
                    Element::Action,
                    action.as_str(),
                    ValidationErrorKind::InvalidAction,
                    vec!["an action must name a single action".to_string()],
                );
                continue;
            };
            let namespace = entity.namespace(&self.default_namespace);
            let cause = match self.namespaces.get(namespace) {
                Some(schema) => match schema.actions.get(id) {
                    Some(action_type) => {
                        found.push(FoundAction {
                            id: id.to_string(),
                            schema,
                            action: action_type,
                        });
                        continue;
                    }
                    None => format!("action '{id}' is not defined in namespace '{namespace}'"),
                },
                None => format!("namespace '{namespace}' is not defined"),
            };
            report.push(
                Element::Action,
                action.as_str(),
                ValidationErrorKind::InvalidAction,
                vec![cause],
            );
        }
        found
    }

    fn check_condition(
        &self,
        report: &mut Report<'_>,
        subjects: &[TypedRef<'_, 's>],
        objects: &[TypedRef<'_, 's>],
        actions: &[FoundAction<'s>],
    ) {
        let expr = match report.source.condition_expr() {
            Ok(Some(expr)) => expr,
            Ok(None) => return,
            Err(e) => {
                let rule = report
                    .source
                    .condition
                    .as_ref()
                    .map(|c| c.rule.clone())
                    .unwrap_or_default();
                report.push(
                    Element::Condition,
                    rule,
                    ValidationErrorKind::InvalidCondition,
                    vec![e.to_string()],
                );
                return;
            }
        };

        for path in expr.attribute_paths().into_iter().unique() {
            let segments = split_path(path);
            let Some((root, rest)) = segments.split_first() else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let rest = rest.join(".");
            let causes = match unquote_segment(root).as_str() {
                "principal" | "subject" => entity_misses(subjects, &rest),
                "resource" | "object" => entity_misses(objects, &rest),
                "context" => context_misses(actions, &rest),
                _ => None,
            };
            if let Some(causes) = causes {
                report.push(
                    Element::Condition,
                    path,
                    ValidationErrorKind::InvalidConditionAttribute,
                    causes,
                );
            }
        }
    }
}

/// Validate `policies` against `namespaces` with `default_namespace` for
/// unqualified references.
pub fn validate(
    policies: &[Policy],
    namespaces: &Namespaces,
    default_namespace: &str,
) -> Vec<ValidationError> {
    Validator::new(namespaces, default_namespace).validate(policies)
}

fn type_allowed(allowed: &[String], typed: &TypedRef<'_, '_>) -> bool {
    allowed.iter().any(|t| {
        t == &typed.entity_type || t.rsplit("::").next() == Some(typed.entity_type.as_str())
    })
}

// `None` when the path resolves on at least one candidate, or when there is
// nothing known to resolve it against.
fn entity_misses(candidates: &[TypedRef<'_, '_>], path: &str) -> Option<Vec<String>> {
    let known: Vec<&TypedRef<'_, '_>> = candidates
        .iter()
        .filter(|c| c.schema.entity_types.contains_key(&c.entity_type))
        .collect();
    if known.is_empty()
        || known
            .iter()
            .any(|c| c.schema.find_attribute(&c.entity_type, path).is_some())
    {
        return None;
    }
    Some(
        known
            .iter()
            .map(|c| format!("'{path}' is not an attribute of '{}'", c.entity_type))
            .unique()
            .collect(),
    )
}

fn context_misses(actions: &[FoundAction<'_>], path: &str) -> Option<Vec<String>> {
    if actions.is_empty()
        || actions
            .iter()
            .any(|a| a.action.find_context_attribute(a.schema, path).is_some())
    {
        return None;
    }
    Some(
        actions
            .iter()
            .map(|a| format!("'{path}' is not in the context of action '{}'", a.id))
            .collect(),
    )
}
