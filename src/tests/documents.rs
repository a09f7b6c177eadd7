use super::*;
use crate::error::{ParseErrorKind, PolicyError};
use crate::types::Policies;

#[test]
fn test_fixture_document_loads() {
    let document = PolicyDocument::parse(POLICIES_JSON).unwrap();
    let policies = document.policies();
    assert_eq!(policies.app.as_deref(), Some("photos"));
    assert_eq!(policies.len(), 4);
    assert!(document.condition(1).is_none());
    assert!(document.condition(0).is_some());
}

#[test]
fn test_envelope_rewrites_to_the_same_policies() {
    let policies = fixture_policies();
    let text = Policies::new(policies.clone())
        .with_app("photos")
        .to_json_pretty()
        .unwrap();
    let reread = PolicyDocument::parse(&text).unwrap().into_policies();
    assert_eq!(reread.policies, policies);
}

#[test]
fn test_bad_rule_in_fixture_points_at_its_line() {
    let broken = POLICIES_JSON.replace(
        r#""rule": "principal.jobLevel ge 3 and"#,
        r#""rule": "principal.jobLevel ge 3 and and"#,
    );
    let err = PolicyDocument::parse(&broken).unwrap_err();
    let PolicyError::ConditionParse(parse_error) = &err else {
        panic!("expected a condition parse error, got {err:?}");
    };
    let line = broken
        .lines()
        .position(|l| l.contains("jobLevel ge 3 and and"))
        .unwrap()
        + 1;
    assert_eq!(parse_error.line, line);
    assert_ne!(parse_error.kind, ParseErrorKind::InvalidJson);
}
