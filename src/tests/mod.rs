//! Scenarios that cross module boundaries, run against the fixtures in `testdata/`.

use crate::schema::Namespaces;
use crate::types::Policy;
use crate::PolicyDocument;

mod documents;
mod iam;
mod reconcile;
mod validation;

const PHOTO_CEDAR: &str = include_str!("../../testdata/photo.cedar");
const POLICIES_JSON: &str = include_str!("../../testdata/policies.json");
const SCHEMA_JSON: &str = include_str!("../../testdata/schema.json");
const BINDINGS_JSON: &str = include_str!("../../testdata/bindings.json");

fn fixture_policies() -> Vec<Policy> {
    PolicyDocument::parse(POLICIES_JSON)
        .unwrap()
        .into_policies()
        .policies
}

fn fixture_schema() -> Namespaces {
    Namespaces::from_json_str(SCHEMA_JSON).unwrap()
}

/// Assert that two policy lists agree on their semantic fields, pairwise.
#[track_caller]
fn assert_same_policies(left: &[Policy], right: &[Policy]) {
    assert_eq!(left.len(), right.len(), "{left:#?}\n{right:#?}");
    for (a, b) in left.iter().zip(right) {
        assert!(a.equals(b), "{:?} differ:\n{a:#?}\n{b:#?}", a.compare(b));
    }
}
