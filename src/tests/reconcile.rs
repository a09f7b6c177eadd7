use super::*;
use crate::reconcile::{DiffKind, reconcile};
use crate::types::DiffDetail;

#[test]
fn test_reconcile_is_stable() {
    let policies = fixture_policies();
    assert!(reconcile(&policies, &policies, true).is_empty());
    assert!(
        reconcile(&policies, &policies, false)
            .iter()
            .all(|d| d.kind == DiffKind::Equal)
    );
}

#[test]
fn test_added_policy_is_new_and_removed_policy_is_deleted() {
    let base = fixture_policies();
    let extra = Policy::new([r#"User::"dave""#], ["viewPhoto"], r#"Photo::"dave.jpg""#);
    let mut extended = base.clone();
    extended.push(extra.clone());

    let added = reconcile(&base, &extended, true);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].kind, DiffKind::New);
    assert_eq!(added[0].incoming_ref.as_ref(), Some(&extra));

    let removed = reconcile(&extended, &base, true);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].kind, DiffKind::Delete);
    assert_eq!(removed[0].existing_refs, vec![extra]);
}

#[test]
fn test_reconcile_after_cedar_round_trip_is_stable() {
    use crate::cedar::CedarPolicyMapper;
    use crate::traits::PolicyMapper;

    let policies = fixture_policies();
    let mapper = CedarPolicyMapper::default();
    let back = mapper.to_canonical(&mapper.to_dialect(&policies).unwrap()).unwrap();
    assert!(reconcile(&policies, &back, true).is_empty());
}

#[test]
fn test_changed_condition_is_an_update() {
    let existing = fixture_policies();
    let mut incoming = existing.clone();
    incoming[3].condition.as_mut().unwrap().rule =
        r#"principal.jobLevel ge 4 and resource.tags.label co "public""#.to_string();

    let diffs = reconcile(&existing, &incoming, true);
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].kind, DiffKind::Update);
    assert_eq!(diffs[0].detail_kinds, vec![DiffDetail::Condition]);
    assert_eq!(diffs[0].report(), "update: policy 'scoped-edit' (CONDITION)");
}
