//! Canonical policies to and from Cedar policies.

use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::attribute_map::AttributeMap;
use crate::error::PolicyError;
use crate::loader::{compile_policy, load_cedar_policies};
use crate::options::MapperOptions;
use crate::traits::{ConditionMapper, PolicyMapper};
use crate::types::{
    Entity, Notation, Policy, SOURCE_ANNOTATIONS, SOURCE_EFFECT, SOURCE_TEMPLATE,
};

use super::condition::CedarConditionMapper;
use super::est::{
    ActionScope, BinaryOp, CedarExpr, CedarPolicy, CedarUid, Clause, ClauseKind, Effect, Scope,
    ScopeTarget, Var,
};

const DEFAULT_PRINCIPAL_TYPE: &str = "User";
const DEFAULT_ACTION_TYPE: &str = "Action";
const DEFAULT_RESOURCE_TYPE: &str = "Resource";
pub(crate) const ROLE_PREFIX: &str = "Role:";
const ID_ANNOTATION: &str = "id";
/// Marks the `context.authenticated` clause emitted for `anyAuthenticated`.
const GUARD_ANNOTATION: &str = "guard";

/// Maps canonical policies to Cedar policies and back.
#[derive(Debug, Clone, Default)]
pub struct CedarPolicyMapper {
    conditions: CedarConditionMapper,
}

impl CedarPolicyMapper {
    pub fn new(attributes: AttributeMap) -> Self {
        CedarPolicyMapper {
            conditions: CedarConditionMapper::new(attributes),
        }
    }

    pub fn from_options(options: &MapperOptions) -> Self {
        Self::new(options.attribute_map.clone())
    }

    pub fn conditions(&self) -> &CedarConditionMapper {
        &self.conditions
    }

    /// Render canonical policies as Cedar text. The text is compiled before it
    /// is returned.
    pub fn to_text(&self, policies: &[Policy]) -> Result<String, PolicyError> {
        let text = self
            .to_dialect(policies)?
            .iter()
            .map(ToString::to_string)
            .join("\n\n");
        compile_policy(&text)?;
        Ok(text)
    }

    /// Parse Cedar text into canonical policies.
    pub fn from_text(&self, text: &str) -> Result<Vec<Policy>, PolicyError> {
        self.to_canonical(&load_cedar_policies(text)?)
    }

    /// One Cedar policy per subject.
    pub fn policy_to_cedar(&self, policy: &Policy) -> Result<Vec<CedarPolicy>, PolicyError> {
        let action = action_scope(&policy.actions)?;
        let resource = resource_scope(&policy.object_entity()?)?;
        let conditions = match &policy.condition {
            Some(condition) => self.conditions.to_dialect(condition)?,
            None => Vec::new(),
        };
        let effect = match policy.source_value(SOURCE_EFFECT).and_then(|v| v.as_str()) {
            Some(effect) => effect
                .parse()
                .map_err(|_| PolicyError::InvalidValue(format!("unknown Cedar effect '{effect}'")))?,
            None => Effect::Permit,
        };
        let annotations = annotations_of(policy)?;

        let mut subjects = policy.subject_entities()?;
        if subjects.is_empty() {
            subjects.push(Entity::Any);
        }
        let mut mapped = Vec::new();
        for subject in &subjects {
            for (principal, authenticated) in principal_scopes(subject)? {
                let mut clauses = Vec::with_capacity(conditions.len() + 1);
                let mut annotations = annotations.clone();
                if authenticated {
                    clauses.push(Clause::when(authenticated_guard()));
                    annotations.insert(
                        GUARD_ANNOTATION.to_string(),
                        Some(Entity::AnyAuthenticated.to_string()),
                    );
                }
                clauses.extend(conditions.iter().cloned());
                mapped.push(CedarPolicy {
                    effect,
                    principal,
                    action: action.clone(),
                    resource: resource.clone(),
                    conditions: clauses,
                    annotations,
                });
            }
        }
        debug!(
            event = "CedarPolicy",
            phase = "to_dialect",
            policy_id = policy.policy_id().unwrap_or_default(),
            subjects = subjects.len(),
            policies = mapped.len(),
        );
        Ok(mapped)
    }

    pub fn cedar_to_policy(&self, cedar: &CedarPolicy) -> Result<Policy, PolicyError> {
        let mut clauses = cedar.conditions.as_slice();
        let guarded = cedar.annotation(GUARD_ANNOTATION)
            == Some(Entity::AnyAuthenticated.to_string().as_str());
        let subject = match &cedar.principal {
            Scope::All => match clauses.split_first() {
                Some((first, rest))
                    if guarded
                        && first.kind == ClauseKind::When
                        && first.body == authenticated_guard() =>
                {
                    clauses = rest;
                    Entity::AnyAuthenticated
                }
                _ => Entity::Any,
            },
            scope => scope_entity(scope, ScopeOwner::Principal),
        };
        let object = match &cedar.resource {
            Scope::All => Entity::Empty,
            scope => scope_entity(scope, ScopeOwner::Resource),
        };

        let mut policy = Policy::new([subject.to_string()], actions_of(&cedar.action), object.to_string());
        policy.condition = self.conditions.to_canonical(&clauses.to_vec())?;

        let annotations: serde_json::Map<String, serde_json::Value> = cedar
            .annotations
            .iter()
            .filter(|(k, _)| k.as_str() != GUARD_ANNOTATION)
            .map(|(k, v)| (k.clone(), v.clone().map_or(serde_json::Value::Null, Into::into)))
            .collect();
        if !annotations.is_empty() {
            policy.set_source_value(SOURCE_ANNOTATIONS, serde_json::Value::Object(annotations));
        }
        if let Some(id) = cedar.annotation(ID_ANNOTATION) {
            policy.meta.policy_id = Some(id.to_string());
        }
        if cedar.effect == Effect::Forbid {
            policy.set_source_value(SOURCE_EFFECT, cedar.effect.to_string().into());
        }
        if cedar.is_template() {
            policy.set_source_value(SOURCE_TEMPLATE, true.into());
        }
        Ok(policy)
    }
}

impl PolicyMapper for CedarPolicyMapper {
    type Dialect = Vec<CedarPolicy>;

    fn to_dialect(&self, policies: &[Policy]) -> Result<Vec<CedarPolicy>, PolicyError> {
        let mut mapped = Vec::new();
        for policy in policies {
            mapped.extend(self.policy_to_cedar(policy)?);
        }
        Ok(mapped)
    }

    /// Policies that differ only in their principal are merged into one policy
    /// with several subjects, in first-seen order.
    fn to_canonical(&self, cedar: &Vec<CedarPolicy>) -> Result<Vec<Policy>, PolicyError> {
        let mut merged: Vec<Policy> = Vec::new();
        for policy in cedar {
            let policy = self.cedar_to_policy(policy)?;
            let peer = merged.iter_mut().find(|existing| same_but_subjects(existing, &policy));
            let Some(peer) = peer else {
                merged.push(policy);
                continue;
            };
            for subject in policy.subjects {
                if !peer.subjects.contains(&subject) {
                    peer.subjects.push(subject);
                }
            }
        }
        if merged.len() < cedar.len() {
            warn!(
                event = "CedarPolicy",
                phase = "merge",
                cedar_policies = cedar.len(),
                policies = merged.len(),
            );
        }
        debug!(event = "CedarPolicy", phase = "to_canonical", policies = merged.len());
        Ok(merged)
    }
}

fn same_but_subjects(a: &Policy, b: &Policy) -> bool {
    a.actions == b.actions && a.object == b.object && a.condition == b.condition && a.meta == b.meta
}

fn authenticated_guard() -> CedarExpr {
    CedarExpr::binary(
        BinaryOp::Eq,
        CedarExpr::get_attr(CedarExpr::var(Var::Context), "authenticated"),
        CedarExpr::value(true),
    )
}

fn annotations_of(policy: &Policy) -> Result<BTreeMap<String, Option<String>>, PolicyError> {
    let mut annotations = BTreeMap::new();
    if let Some(value) = policy.source_value(SOURCE_ANNOTATIONS) {
        let Some(map) = value.as_object() else {
            return Err(PolicyError::InvalidValue(
                "source_data.annotations must be an object".into(),
            ));
        };
        for (key, value) in map.iter().filter(|(k, _)| k.as_str() != GUARD_ANNOTATION) {
            let value = match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            annotations.insert(key.clone(), value);
        }
    }
    if let Some(id) = policy.policy_id() {
        annotations
            .entry(ID_ANNOTATION.to_string())
            .or_insert_with(|| Some(id.to_string()));
    }
    Ok(annotations)
}

fn uid_of(types: &[String], id: &str, default_type: &str) -> CedarUid {
    let type_name = if types.is_empty() {
        default_type.to_string()
    } else {
        types.join("::")
    };
    CedarUid::new(type_name, id)
}

/// A concrete entity or `?slot` as a scope target.
fn target(entity: &Entity, default_type: &str) -> Result<ScopeTarget, PolicyError> {
    match entity {
        Entity::Equals { types, id, .. } if types.is_empty() && id.starts_with('?') => {
            Ok(ScopeTarget::slot(id.clone()))
        }
        Entity::Equals { types, id, .. } => {
            Ok(ScopeTarget::entity(uid_of(types, id, default_type)))
        }
        other => Err(PolicyError::InvalidEntity(format!(
            "'{other}' cannot be used as a Cedar scope entity"
        ))),
    }
}

/// Members of a scoped entity, looking through a nested `[..]`.
fn scoped_members(members: &[Entity]) -> Vec<&Entity> {
    members
        .iter()
        .flat_map(|member| match member {
            Entity::In { members } => members.iter().collect(),
            other => vec![other],
        })
        .collect()
}

/// Principal scopes for one subject, each flagged when it needs the
/// authenticated guard.
fn principal_scopes(subject: &Entity) -> Result<Vec<(Scope, bool)>, PolicyError> {
    let scopes = match subject {
        Entity::Any | Entity::Empty => vec![(Scope::All, false)],
        Entity::AnyAuthenticated => vec![(Scope::All, true)],
        Entity::Equals {
            types, notation, ..
        } => {
            let target = target(subject, DEFAULT_PRINCIPAL_TYPE)?;
            let is_group = types.last().is_some_and(|t| t.ends_with("Group"));
            if *notation == Notation::Short && is_group {
                vec![(Scope::In(target), false)]
            } else {
                vec![(Scope::Eq(target), false)]
            }
        }
        Entity::Is { types } => vec![(
            Scope::Is {
                entity_type: types.join("::"),
                in_target: None,
            },
            false,
        )],
        Entity::In { members } => members
            .iter()
            .map(|member| Ok((Scope::In(target(member, DEFAULT_PRINCIPAL_TYPE)?), false)))
            .collect::<Result<_, PolicyError>>()?,
        Entity::IsIn { types, members, .. } => scoped_members(members)
            .into_iter()
            .map(|member| {
                Ok((
                    Scope::Is {
                        entity_type: types.join("::"),
                        in_target: Some(target(member, DEFAULT_PRINCIPAL_TYPE)?),
                    },
                    false,
                ))
            })
            .collect::<Result<_, PolicyError>>()?,
    };
    Ok(scopes)
}

fn resource_scope(object: &Entity) -> Result<Scope, PolicyError> {
    let single = |members: Vec<&Entity>| match members.as_slice() {
        [member] => target(member, DEFAULT_RESOURCE_TYPE),
        _ => Err(PolicyError::InvalidEntity(format!(
            "a Cedar resource scope takes a single entity, found '{object}'"
        ))),
    };
    Ok(match object {
        Entity::Any | Entity::AnyAuthenticated | Entity::Empty => Scope::All,
        Entity::Equals { .. } => Scope::Eq(target(object, DEFAULT_RESOURCE_TYPE)?),
        Entity::Is { types } => Scope::Is {
            entity_type: types.join("::"),
            in_target: None,
        },
        Entity::In { members } => Scope::In(single(members.iter().collect())?),
        Entity::IsIn { types, members, .. } => Scope::Is {
            entity_type: types.join("::"),
            in_target: Some(single(scoped_members(members))?),
        },
    })
}

fn action_uid(action: &str) -> Result<CedarUid, PolicyError> {
    match action.parse::<Entity>()? {
        Entity::Equals { types, id, .. } => Ok(uid_of(&types, &id, DEFAULT_ACTION_TYPE)),
        other => Err(PolicyError::InvalidEntity(format!(
            "action '{other}' is not a single entity"
        ))),
    }
}

fn action_scope(actions: &[String]) -> Result<ActionScope, PolicyError> {
    if let [only] = actions {
        if let Some(role) = only.strip_prefix(ROLE_PREFIX) {
            return Ok(ActionScope::In {
                entity: Some(action_uid(role)?),
                entities: None,
            });
        }
    }
    if actions.len() > 1 && actions.iter().any(|a| a.starts_with(ROLE_PREFIX)) {
        return Err(PolicyError::InvalidEntity(format!(
            "a role action cannot be combined with other actions: {}",
            actions.join(", ")
        )));
    }
    let mut uids = actions
        .iter()
        .map(|a| action_uid(a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match uids.len() {
        0 => ActionScope::All,
        1 => ActionScope::Eq {
            entity: uids.remove(0),
        },
        _ => ActionScope::In {
            entity: None,
            entities: Some(uids),
        },
    })
}

/// `Action::"read"` reads back as `read`; other types keep the uid form.
fn action_name(uid: &CedarUid) -> String {
    if uid.type_name == DEFAULT_ACTION_TYPE {
        let bare = Entity::Equals {
            types: Vec::new(),
            id: uid.id.clone(),
            notation: Notation::Short,
        };
        if uid.id.parse::<Entity>().ok().as_ref() == Some(&bare) {
            return uid.id.clone();
        }
    }
    uid.to_uid_string()
}

fn actions_of(scope: &ActionScope) -> Vec<String> {
    match scope {
        ActionScope::All => Vec::new(),
        ActionScope::Eq { entity } => vec![action_name(entity)],
        ActionScope::In {
            entity: Some(entity),
            ..
        } => vec![format!("{ROLE_PREFIX}{}", action_name(entity))],
        ActionScope::In { entities, .. } => entities
            .iter()
            .flatten()
            .map(action_name)
            .collect(),
    }
}

#[derive(Clone, Copy)]
enum ScopeOwner {
    Principal,
    Resource,
}

fn target_entity(target: &ScopeTarget) -> Entity {
    match (&target.entity, &target.slot) {
        (Some(uid), _) => Entity::Equals {
            types: uid.type_path(),
            id: uid.id.clone(),
            notation: Notation::Cedar,
        },
        (None, slot) => Entity::Equals {
            types: Vec::new(),
            id: slot.clone().unwrap_or_default(),
            notation: Notation::Short,
        },
    }
}

fn scope_entity(scope: &Scope, owner: ScopeOwner) -> Entity {
    match scope {
        Scope::All => Entity::Any,
        Scope::Eq(target) => target_entity(target),
        Scope::In(target) => Entity::In {
            members: vec![target_entity(target)],
        },
        Scope::Is {
            entity_type,
            in_target: None,
        } => Entity::Is {
            types: entity_type.split("::").map(str::to_string).collect(),
        },
        Scope::Is {
            entity_type,
            in_target: Some(target),
        } => {
            let member = match owner {
                ScopeOwner::Principal => target_entity(target),
                ScopeOwner::Resource => Entity::In {
                    members: vec![target_entity(target)],
                },
            };
            Entity::IsIn {
                types: vec![entity_type.clone()],
                members: vec![member],
                notation: Notation::Cedar,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConditionAction;
    use insta::assert_snapshot;

    fn mapper() -> CedarPolicyMapper {
        CedarPolicyMapper::default()
    }

    #[test]
    fn test_is_in_principal_to_canonical() {
        let policies = mapper()
            .from_text(
                r#"permit ( principal is User in UserGroup::"AVTeam",
                         action in [PhotoOp::"view", PhotoOp::"edit"],
                         resource == Photo::"VacationPhoto.jpg" );"#,
            )
            .unwrap();
        assert_eq!(policies.len(), 1);
        let policy = &policies[0];
        assert_eq!(policy.subjects, vec![r#"UserGroup::"AVTeam".(User)"#]);
        assert_eq!(policy.actions, vec![r#"PhotoOp::"view""#, r#"PhotoOp::"edit""#]);
        assert_eq!(policy.object, r#"Photo::"VacationPhoto.jpg""#);
        assert!(policy.condition.is_none());
    }

    #[test]
    fn test_subjects_split_into_policies() {
        let policy = Policy::new(
            ["User:alice", "Group:admins", "User:", "[Team:a, Team:b]"],
            ["read"],
            "Photo:vacation.jpg",
        );
        let text = mapper().to_text(&[policy]).unwrap();
        assert_snapshot!(text, @r#"
        permit (
          principal == User::"alice",
          action == Action::"read",
          resource == Photo::"vacation.jpg"
        );

        permit (
          principal in Group::"admins",
          action == Action::"read",
          resource == Photo::"vacation.jpg"
        );

        permit (
          principal is User,
          action == Action::"read",
          resource == Photo::"vacation.jpg"
        );

        permit (
          principal in Team::"a",
          action == Action::"read",
          resource == Photo::"vacation.jpg"
        );

        permit (
          principal in Team::"b",
          action == Action::"read",
          resource == Photo::"vacation.jpg"
        );
        "#);
    }

    #[test]
    fn test_any_is_unrestricted() {
        let policy = Policy::new(["any"], ["read", "write"], "");
        let cedar = mapper().policy_to_cedar(&policy).unwrap();
        assert_eq!(cedar.len(), 1);
        assert_eq!(cedar[0].principal, Scope::All);
        assert_eq!(cedar[0].resource, Scope::All);
        assert!(cedar[0].conditions.is_empty());
        assert!(matches!(cedar[0].action, ActionScope::In { entities: Some(ref e), .. } if e.len() == 2));
    }

    #[test]
    fn test_any_authenticated_guard_round_trip() {
        let policy = Policy::new(["anyAuthenticated"], ["read"], "")
            .with_condition(r#"context.level gt 3"#, ConditionAction::Allow);
        let text = mapper().to_text(std::slice::from_ref(&policy)).unwrap();
        assert!(text.contains("when { context.authenticated == true }"), "{text}");
        assert!(text.contains(r#"@guard("anyAuthenticated")"#), "{text}");
        let back = mapper().from_text(&text).unwrap();
        assert_eq!(back[0].subjects, vec!["anyAuthenticated"]);
        assert_eq!(back[0].condition.as_ref().unwrap().rule, "context.level gt 3");
        assert!(back[0].source_value(SOURCE_ANNOTATIONS).is_none());
    }

    #[test]
    fn test_authenticated_condition_is_not_a_guard() {
        let policy = Policy::new(["any"], ["read"], "").with_condition(
            "context.authenticated eq true and context.x pr",
            ConditionAction::Allow,
        );
        let text = mapper().to_text(std::slice::from_ref(&policy)).unwrap();
        assert!(!text.contains("@guard"), "{text}");
        let back = mapper().from_text(&text).unwrap();
        assert_eq!(back[0].subjects, vec!["any"]);
        assert_eq!(
            back[0].condition.as_ref().unwrap().rule,
            "context.authenticated eq true and context.x pr"
        );

        let unmarked = mapper()
            .from_text("permit (principal, action, resource) when { context.authenticated == true };")
            .unwrap();
        assert_eq!(unmarked[0].subjects, vec!["any"]);
        assert_eq!(
            unmarked[0].condition.as_ref().unwrap().rule,
            "context.authenticated eq true"
        );
    }

    #[test]
    fn test_guard_splits_and_merges_with_other_subjects() {
        let policy = Policy::new(["anyAuthenticated", "User:alice"], ["read"], "Photo:a.jpg")
            .with_policy_id("mixed");
        let cedar = mapper().policy_to_cedar(&policy).unwrap();
        assert_eq!(cedar[0].annotation("guard"), Some("anyAuthenticated"));
        assert_eq!(cedar[1].annotation("guard"), None);
        let back = mapper().to_canonical(&cedar).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].subjects, vec!["anyAuthenticated", r#"User::"alice""#]);
    }

    #[test]
    fn test_role_action() {
        let policy = Policy::new(["User:alice"], ["Role:editor"], "");
        let cedar = mapper().policy_to_cedar(&policy).unwrap();
        assert_eq!(
            cedar[0].action,
            ActionScope::In {
                entity: Some(CedarUid::new("Action", "editor")),
                entities: None
            }
        );
        let back = mapper().to_canonical(&cedar).unwrap();
        assert_eq!(back[0].actions, vec!["Role:editor"]);

        let mixed = Policy::new(["User:alice"], ["Role:editor", "read"], "");
        assert!(matches!(
            mapper().policy_to_cedar(&mixed),
            Err(PolicyError::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_resource_scopes() {
        let cases = [
            ("Photo:", r#"resource is Photo"#),
            (r#"[Album::"trips"]"#, r#"resource in Album::"trips""#),
            (r#"[Album::"trips"].(Photo)"#, r#"resource is Photo in Album::"trips""#),
            ("Photo:a.jpg", r#"resource == Photo::"a.jpg""#),
            ("a.jpg", r#"resource == Resource::"a.jpg""#),
        ];
        for (object, expected) in cases {
            let policy = Policy::new(["any"], Vec::<String>::new(), object);
            let text = mapper().to_text(&[policy]).unwrap();
            assert!(text.contains(expected), "{object}: {text}");
        }
        let too_many = Policy::new(["any"], Vec::<String>::new(), "[Album:a, Album:b]");
        assert!(matches!(
            mapper().policy_to_cedar(&too_many),
            Err(PolicyError::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_resource_scopes_read_back() {
        let policies = mapper()
            .from_text(
                r#"permit (principal, action, resource is Photo in Album::"trips");
                permit (principal, action, resource in Album::"trips");
                permit (principal, action, resource is NS::Photo);"#,
            )
            .unwrap();
        let objects: Vec<_> = policies.iter().map(|p| p.object.as_str()).collect();
        assert_eq!(
            objects,
            vec![r#"[Album::"trips"].(Photo)"#, r#"[Album::"trips"]"#, "NS:Photo:"]
        );
        assert!(policies.iter().all(|p| p.subjects == vec!["any"] && p.actions.is_empty()));
    }

    #[test]
    fn test_forbid_and_annotations_round_trip() {
        let text = r#"@id("deny-guests")
        @advice("ask an admin")
        forbid (principal in Group::"guests", action == Action::"delete", resource)
        unless { context.mfa };"#;
        let policies = mapper().from_text(text).unwrap();
        let policy = &policies[0];
        assert_eq!(policy.policy_id(), Some("deny-guests"));
        assert_eq!(policy.source_value(SOURCE_EFFECT), Some(&"forbid".into()));
        assert_eq!(
            policy.source_value(SOURCE_ANNOTATIONS),
            Some(&serde_json::json!({"id": "deny-guests", "advice": "ask an admin"}))
        );
        let condition = policy.condition.as_ref().unwrap();
        assert_eq!(condition.action, ConditionAction::Deny);
        assert_eq!(condition.rule, "context.mfa eq true");

        let rendered = mapper().to_text(&policies).unwrap();
        assert_snapshot!(rendered, @r#"
        @advice("ask an admin")
        @id("deny-guests")
        forbid (
          principal in Group::"guests",
          action == Action::"delete",
          resource
        )
        unless { context.mfa == true };
        "#);
    }

    #[test]
    fn test_policy_id_adds_id_annotation() {
        let policy = Policy::new(["User:bob"], ["read"], "").with_policy_id("p-7");
        let cedar = mapper().policy_to_cedar(&policy).unwrap();
        assert_eq!(cedar[0].annotation("id"), Some("p-7"));
    }

    #[test]
    fn test_templates() {
        let policies = mapper()
            .from_text(r#"permit (principal == ?principal, action == Action::"view", resource in ?resource);"#)
            .unwrap();
        let policy = &policies[0];
        assert!(policy.is_template());
        assert_eq!(policy.subjects, vec!["?principal"]);
        assert_eq!(policy.object, "[?resource]");

        let text = mapper().to_text(&policies).unwrap();
        assert!(text.contains("principal == ?principal"), "{text}");
        assert!(text.contains("resource in ?resource"), "{text}");
    }

    #[test]
    fn test_merge_policies_differing_in_principal() {
        let policy = Policy::new(
            [r#"User::"alice""#, r#"[Group::"admins"]"#, "User:"],
            ["read"],
            r#"Photo::"a.jpg""#,
        )
        .with_condition("resource.public eq true", ConditionAction::Allow)
        .with_policy_id("shared");
        let cedar = mapper().to_dialect(std::slice::from_ref(&policy)).unwrap();
        assert_eq!(cedar.len(), 3);

        let back = mapper().to_canonical(&cedar).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].subjects, policy.subjects);
        assert!(back[0].equals(&policy));
    }

    #[test]
    fn test_unsupported_condition_fails_whole_set() {
        let err = mapper()
            .from_text(r#"permit (principal, action, resource) when { if context.a then true else false };"#)
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnsupportedCedarConstruct(_)));
    }
}
