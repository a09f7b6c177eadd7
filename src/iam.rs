//! IAM role bindings.
//!
//! A [`BindAssignment`] attaches role bindings to one resource. Each binding
//! becomes one canonical policy: members are the subjects, the role is the
//! single action, and the CEL condition is mapped through
//! [`CelConditionMapper`].

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::attribute_map::AttributeMap;
use crate::cel::CelConditionMapper;
use crate::error::PolicyError;
use crate::options::MapperOptions;
use crate::traits::{ConditionMapper, PolicyMapper};
use crate::types::{Condition, ConditionAction, Policy};

/// A CEL condition with its display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IamCondition {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<IamCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BindAssignment {
    #[serde(
        default,
        alias = "resourceId",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_id: Option<String>,
    pub bindings: Vec<Binding>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BindingsDocument {
    Assignments(Vec<BindAssignment>),
    Assignment(BindAssignment),
    Binding(Binding),
}

/// Read an assignment, a bare binding, or a list of assignments.
pub fn parse_bindings(text: &str) -> Result<Vec<BindAssignment>, PolicyError> {
    let document: BindingsDocument = serde_json::from_str(text).map_err(|e| {
        PolicyError::InvalidFormat(format!(
            "expected a binding assignment, a binding or a list of assignments: {e}"
        ))
    })?;
    Ok(match document {
        BindingsDocument::Assignments(assignments) => assignments,
        BindingsDocument::Assignment(assignment) => vec![assignment],
        BindingsDocument::Binding(binding) => vec![BindAssignment {
            resource_id: None,
            bindings: vec![binding],
        }],
    })
}

/// Maps canonical policies to IAM binding assignments and back.
#[derive(Debug, Clone, Default)]
pub struct IamPolicyMapper {
    conditions: CelConditionMapper,
}

impl IamPolicyMapper {
    pub fn new(attributes: AttributeMap) -> Self {
        IamPolicyMapper {
            conditions: CelConditionMapper::new(attributes),
        }
    }

    pub fn from_options(options: &MapperOptions) -> Self {
        Self::new(options.attribute_map.clone())
    }

    pub fn conditions(&self) -> &CelConditionMapper {
        &self.conditions
    }

    pub fn binding_to_policy(
        &self,
        resource_id: Option<&str>,
        binding: &Binding,
    ) -> Result<Policy, PolicyError> {
        let mut policy = Policy::new(
            binding.members.iter().cloned(),
            [binding.role.clone()],
            resource_id.unwrap_or_default(),
        );
        if let Some(condition) = &binding.condition {
            policy.condition = self.conditions.to_canonical(&condition.expression)?;
            policy.meta.description = condition.title.clone();
        }
        Ok(policy)
    }

    fn iam_condition(&self, policy: &Policy) -> Result<Option<IamCondition>, PolicyError> {
        let Some(condition) = &policy.condition else {
            return Ok(None);
        };
        if condition.action != ConditionAction::Allow {
            return Err(PolicyError::UnsupportedByIam(format!(
                "condition action '{}' on policy {}",
                condition.action,
                policy.policy_id().unwrap_or("without id")
            )));
        }
        Ok(Some(IamCondition {
            expression: self.conditions.to_dialect(condition)?,
            title: policy.meta.description.clone(),
            description: None,
        }))
    }
}

struct Group<'a> {
    object: &'a str,
    condition: Option<&'a Condition>,
    assignment: BindAssignment,
}

impl PolicyMapper for IamPolicyMapper {
    type Dialect = Vec<BindAssignment>;

    /// Policies sharing an object and an equivalent condition become one
    /// assignment, with one binding per role.
    fn to_dialect(&self, policies: &[Policy]) -> Result<Vec<BindAssignment>, PolicyError> {
        let mut groups: Vec<Group<'_>> = Vec::new();
        for policy in policies {
            let condition = self.iam_condition(policy)?;
            let index = groups.iter().position(|group| {
                group.object == policy.object
                    && match (group.condition, &policy.condition) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.equivalent(b),
                        _ => false,
                    }
            });
            let index = match index {
                Some(index) => index,
                None => {
                    groups.push(Group {
                        object: &policy.object,
                        condition: policy.condition.as_ref(),
                        assignment: BindAssignment {
                            resource_id: Some(policy.object.clone()).filter(|o| !o.is_empty()),
                            bindings: Vec::new(),
                        },
                    });
                    groups.len() - 1
                }
            };
            let bindings = &mut groups[index].assignment.bindings;
            for role in &policy.actions {
                match bindings.iter_mut().find(|b| &b.role == role) {
                    Some(binding) => {
                        for member in &policy.subjects {
                            if !binding.members.contains(member) {
                                binding.members.push(member.clone());
                            }
                        }
                    }
                    None => bindings.push(Binding {
                        role: role.clone(),
                        members: policy.subjects.clone(),
                        condition: condition.clone(),
                    }),
                }
            }
        }
        debug!(
            event = "IamPolicy",
            phase = "to_dialect",
            policies = policies.len(),
            assignments = groups.len(),
        );
        Ok(groups.into_iter().map(|group| group.assignment).collect())
    }

    fn to_canonical(&self, assignments: &Vec<BindAssignment>) -> Result<Vec<Policy>, PolicyError> {
        let mut policies = Vec::new();
        for assignment in assignments {
            for binding in &assignment.bindings {
                policies.push(self.binding_to_policy(assignment.resource_id.as_deref(), binding)?);
            }
        }
        debug!(
            event = "IamPolicy",
            phase = "to_canonical",
            assignments = assignments.len(),
            policies = policies.len(),
        );
        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    fn mapper() -> IamPolicyMapper {
        IamPolicyMapper::default()
    }

    #[test]
    fn test_policies_sharing_object_and_condition_group() {
        let policies = vec![
            Policy::new(["user:alice@example.com"], ["roles/viewer"], "projects/p1")
                .with_condition(r#"request.host eq "a.example.com""#, ConditionAction::Allow),
            Policy::new(["user:bob@example.com"], ["roles/viewer", "roles/editor"], "projects/p1")
                .with_condition(r#"request.host eq "a.example.com""#, ConditionAction::Allow),
            Policy::new(["group:ops@example.com"], ["roles/owner"], "projects/p1"),
        ];
        let assignments = mapper().to_dialect(&policies).unwrap();
        assert_json_snapshot!(assignments, @r#"
        [
          {
            "resource_id": "projects/p1",
            "bindings": [
              {
                "role": "roles/viewer",
                "members": [
                  "user:alice@example.com",
                  "user:bob@example.com"
                ],
                "condition": {
                  "expression": "request.host == \"a.example.com\""
                }
              },
              {
                "role": "roles/editor",
                "members": [
                  "user:bob@example.com"
                ],
                "condition": {
                  "expression": "request.host == \"a.example.com\""
                }
              }
            ]
          },
          {
            "resource_id": "projects/p1",
            "bindings": [
              {
                "role": "roles/owner",
                "members": [
                  "group:ops@example.com"
                ]
              }
            ]
          }
        ]
        "#);
    }

    #[test]
    fn test_deny_is_unsupported() {
        let policy = Policy::new(["user:a"], ["roles/viewer"], "projects/p1")
            .with_condition("request.time pr", ConditionAction::Deny);
        assert!(matches!(
            mapper().to_dialect(&[policy]),
            Err(PolicyError::UnsupportedByIam(_))
        ));
    }

    #[test]
    fn test_title_maps_to_description() {
        let assignments = parse_bindings(
            r#"{
                "resourceId": "projects/p1",
                "bindings": [{
                    "role": "roles/viewer",
                    "members": ["user:a@example.com"],
                    "condition": {"expression": "request.path.startsWith(\"/docs\")", "title": "docs only"}
                }]
            }"#,
        )
        .unwrap();
        let policies = mapper().to_canonical(&assignments).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].meta.description.as_deref(), Some("docs only"));
        assert_eq!(policies[0].object, "projects/p1");
        assert_eq!(policies[0].condition.as_ref().unwrap().rule, r#"request.path sw "/docs""#);

        let back = mapper().to_dialect(&policies).unwrap();
        assert_eq!(back, assignments);
    }

    #[test]
    fn test_parse_bindings_shapes() {
        let bare = parse_bindings(r#"{"role": "roles/viewer", "members": ["user:a"]}"#).unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].resource_id, None);
        assert_eq!(bare[0].bindings[0].role, "roles/viewer");

        let list = parse_bindings(
            r#"[{"resource_id": "r1", "bindings": []}, {"resource_id": "r2", "bindings": []}]"#,
        )
        .unwrap();
        assert_eq!(list.len(), 2);

        let err = parse_bindings(r#"{"members": ["user:a"]}"#).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidFormat(_)));
    }

    #[test]
    fn test_missing_resource_is_empty_object() {
        let assignments = parse_bindings(r#"{"role": "roles/viewer", "members": ["user:a"]}"#).unwrap();
        let policies = mapper().to_canonical(&assignments).unwrap();
        assert_eq!(policies[0].object, "");
        let back = mapper().to_dialect(&policies).unwrap();
        assert_eq!(back[0].resource_id, None);
    }
}
