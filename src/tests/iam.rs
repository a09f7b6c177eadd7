use super::*;
use crate::condition::{equiv, parse};
use crate::iam::{IamPolicyMapper, parse_bindings};
use crate::traits::PolicyMapper;
use crate::types::ConditionAction;

fn mapper() -> IamPolicyMapper {
    IamPolicyMapper::default()
}

#[test]
fn test_distinct_objects_and_conditions_map_to_separate_assignments() {
    let policies = vec![
        Policy::new(["user:alice@example.com"], ["roles/viewer"], "projects/p1"),
        Policy::new(["user:bob@example.com", "group:ops@example.com"], ["roles/editor"], "projects/p1")
            .with_condition(r#"request.host eq "a.example.com""#, ConditionAction::Allow),
        Policy::new(["serviceAccount:ci@example.com"], ["roles/deployer"], "projects/p2")
            .with_condition(
                r#"request.path sw "/admin" or request.auth.claims.admin eq true"#,
                ConditionAction::Allow,
            ),
        Policy::new(["user:carol@example.com"], ["roles/viewer"], "projects/p3").with_condition(
            r#"resource.name co "prod" and not (request.auth.mfa eq false)"#,
            ConditionAction::Allow,
        ),
    ];

    let assignments = mapper().to_dialect(&policies).unwrap();
    assert_eq!(assignments.len(), 4);
    assert!(assignments.iter().all(|a| a.bindings.len() == 1));

    let back = mapper().to_canonical(&assignments).unwrap();
    assert_same_policies(&policies, &back);
}

#[test]
fn test_bindings_fixture_round_trips() {
    let assignments = parse_bindings(BINDINGS_JSON).unwrap();
    let policies = mapper().to_canonical(&assignments).unwrap();
    assert_eq!(policies.len(), 4);
    assert_eq!(policies[1].meta.description.as_deref(), Some("a only"));
    let rule = policies[3].condition.as_ref().unwrap().parse_rule().unwrap();
    let expected = parse(r#"resource.name co "prod" and not (request.auth.mfa eq false)"#).unwrap();
    assert!(equiv(&rule, &expected), "{rule}");

    let back = mapper().to_dialect(&policies).unwrap();
    assert_eq!(back, assignments);
}
