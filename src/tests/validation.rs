use super::*;
use crate::schema::{ValidationErrorKind, validate};

#[test]
fn test_fixture_policies_are_schema_valid() {
    let schema = fixture_schema();
    assert_eq!(validate(&fixture_policies(), &schema, "PhotoApp"), vec![]);
}

#[test]
fn test_cedar_fixture_against_schema() {
    use crate::cedar::CedarPolicyMapper;

    let schema = fixture_schema();
    let policies = CedarPolicyMapper::default().from_text(PHOTO_CEDAR).unwrap();
    let errors = validate(&policies, &schema, "PhotoApp");
    let found: Vec<_> = errors
        .iter()
        .map(|e| (e.policy.as_str(), e.kind, e.value.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![
            ("vacation-team", ValidationErrorKind::InvalidAction, r#"PhotoOp::"view""#),
            ("vacation-team", ValidationErrorKind::InvalidAction, r#"PhotoOp::"edit""#),
            ("no-guests", ValidationErrorKind::InvalidAction, "deletePhoto"),
        ]
    );
}
