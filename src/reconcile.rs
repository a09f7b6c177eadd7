//! Typed differences between an existing and an incoming policy set.
//!
//! Policies are paired first by `meta.policy_id`, when both sides carry one,
//! and otherwise by etag. Reconciliation only reports; it cannot fail.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::info;

use crate::types::{DiffDetail, Policy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum DiffKind {
    New,
    Update,
    Delete,
    Equal,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail_kinds: Vec<DiffDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing_refs: Vec<Policy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_ref: Option<Policy>,
}

impl Diff {
    fn delete(existing: &Policy) -> Self {
        Diff {
            kind: DiffKind::Delete,
            detail_kinds: Vec::new(),
            existing_refs: vec![existing.clone()],
            incoming_ref: None,
        }
    }

    /// A one-line, human readable description of this difference.
    pub fn report(&self) -> String {
        let subject = self
            .incoming_ref
            .as_ref()
            .or_else(|| self.existing_refs.first())
            .map(describe)
            .unwrap_or_default();
        match self.kind {
            DiffKind::New => format!("new: {subject}"),
            DiffKind::Update => format!(
                "update: {subject} ({})",
                self.detail_kinds.iter().join(", ")
            ),
            DiffKind::Delete => format!("delete: {subject}"),
            DiffKind::Equal => format!("equal: {subject}"),
            DiffKind::Ignore => format!("ignore: {subject} (template)"),
        }
    }
}

fn describe(policy: &Policy) -> String {
    match policy.policy_id() {
        Some(id) => format!("policy '{id}'"),
        None => format!(
            "[{}] may [{}] on '{}'",
            policy.subjects.join(", "),
            policy.actions.join(", "),
            policy.object
        ),
    }
}

/// Compare `incoming` against `existing`. Diffs follow the order of
/// `incoming`, followed by a `Delete` for every unmatched existing policy.
/// With `diffs_only`, `Equal` entries are left out.
pub fn reconcile(existing: &[Policy], incoming: &[Policy], diffs_only: bool) -> Vec<Diff> {
    let mut by_id: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut by_etag: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, policy) in existing.iter().enumerate() {
        if let Some(id) = policy.policy_id() {
            by_id.entry(id).or_default().push(index);
        }
        by_etag.entry(policy.calculate_etag()).or_default().push(index);
    }
    let mut matched = vec![false; existing.len()];

    let mut diffs = Vec::new();
    for policy in incoming {
        let candidates = policy
            .policy_id()
            .and_then(|id| by_id.get(id))
            .or_else(|| by_etag.get(&policy.calculate_etag()));
        let peers: Vec<usize> = candidates
            .into_iter()
            .flatten()
            .copied()
            .filter(|&index| !matched[index])
            .collect();

        let Some(&first) = peers.first() else {
            let kind = if policy.is_template() {
                DiffKind::Ignore
            } else {
                DiffKind::New
            };
            diffs.push(Diff {
                kind,
                detail_kinds: Vec::new(),
                existing_refs: Vec::new(),
                incoming_ref: Some(policy.clone()),
            });
            continue;
        };

        for &index in &peers {
            matched[index] = true;
        }
        let details = existing[first].compare(policy);
        if details.is_empty() && diffs_only {
            continue;
        }
        diffs.push(Diff {
            kind: if details.is_empty() {
                DiffKind::Equal
            } else {
                DiffKind::Update
            },
            detail_kinds: details,
            existing_refs: peers.iter().map(|&index| existing[index].clone()).collect(),
            incoming_ref: Some(policy.clone()),
        });
    }

    diffs.extend(
        existing
            .iter()
            .zip(&matched)
            .filter(|(_, matched)| !**matched)
            .map(|(policy, _)| Diff::delete(policy)),
    );

    let counts = diffs.iter().counts_by(|diff| diff.kind);
    info!(
        event = "Reconcile",
        phase = "complete",
        existing = existing.len(),
        incoming = incoming.len(),
        new = counts.get(&DiffKind::New).copied().unwrap_or(0),
        update = counts.get(&DiffKind::Update).copied().unwrap_or(0),
        delete = counts.get(&DiffKind::Delete).copied().unwrap_or(0),
        equal = counts.get(&DiffKind::Equal).copied().unwrap_or(0),
        ignore = counts.get(&DiffKind::Ignore).copied().unwrap_or(0),
    );
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConditionAction, SOURCE_TEMPLATE};

    fn existing() -> Vec<Policy> {
        vec![
            Policy::new(["User:alice"], ["read"], "Doc:1").with_policy_id("p0"),
            Policy::new(["User:bob"], ["write"], "Doc:1").with_policy_id("p1"),
            Policy::new(["Group:ops"], ["read", "write"], "Doc:2")
                .with_policy_id("p2")
                .with_condition(r#"context.ip eq "10.0.0.1""#, ConditionAction::Allow),
            Policy::new(["any"], ["list"], "Doc:").with_policy_id("p3"),
        ]
    }

    fn summary(diffs: &[Diff]) -> Vec<String> {
        diffs.iter().map(Diff::report).collect()
    }

    #[test]
    fn test_reconcile_equal_update_delete() {
        let existing = existing();
        let mut changed = existing[2].clone();
        changed.subjects.push("Group:admins".to_string());
        let incoming = vec![existing[0].clone(), changed, existing[3].clone()];

        let diffs = reconcile(&existing, &incoming, false);
        assert_eq!(
            summary(&diffs),
            vec![
                "equal: policy 'p0'",
                "update: policy 'p2' (SUBJECT)",
                "equal: policy 'p3'",
                "delete: policy 'p1'",
            ]
        );
        assert_eq!(diffs[1].detail_kinds, vec![DiffDetail::Subject]);
        assert_eq!(diffs[1].existing_refs, vec![existing[2].clone()]);

        let diffs = reconcile(&existing, &incoming, true);
        assert_eq!(
            summary(&diffs),
            vec!["update: policy 'p2' (SUBJECT)", "delete: policy 'p1'"]
        );
    }

    #[test]
    fn test_reconcile_matches_by_etag_without_ids() {
        let existing = vec![
            Policy::new(["User:a", "User:b"], ["read"], "Doc:1")
                .with_condition("x eq 1 and y eq 2", ConditionAction::Allow),
        ];
        let incoming = vec![
            Policy::new(["User:b", "User:a"], ["read"], "Doc:1")
                .with_condition("y eq 2 and x eq 1", ConditionAction::Allow),
        ];
        assert!(reconcile(&existing, &incoming, true).is_empty());
        assert_eq!(reconcile(&existing, &incoming, false)[0].kind, DiffKind::Equal);
    }

    #[test]
    fn test_reconcile_new_and_ignored_template() {
        let mut template = Policy::new(["?principal"], ["read"], "Doc:1");
        template.set_source_value(SOURCE_TEMPLATE, serde_json::Value::Bool(true));
        let fresh = Policy::new(["User:carol"], ["read"], "Doc:3");

        let diffs = reconcile(&[], &[template, fresh], true);
        assert_eq!(
            summary(&diffs),
            vec![
                "ignore: [?principal] may [read] on 'Doc:1' (template)",
                "new: [User:carol] may [read] on 'Doc:3'",
            ]
        );
    }

    #[test]
    fn test_duplicate_existing_collapse_into_one_match() {
        let policy = Policy::new(["User:a"], ["read"], "Doc:1");
        let diffs = reconcile(&[policy.clone(), policy.clone()], &[policy], false);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DiffKind::Equal);
        assert_eq!(diffs[0].existing_refs.len(), 2);
    }
}
