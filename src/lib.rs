// src/lib.rs
pub use attribute_map::AttributeMap;
pub use cedar::{CedarConditionMapper, CedarPolicyMapper};
pub use cel::{CelConditionMapper, CelParser};
pub use document::{LineIndex, PolicyDocument, parse_document};
pub use error::{ParseError, ParseErrorKind, PolicyError};
pub use iam::{BindAssignment, Binding, IamCondition, IamPolicyMapper, parse_bindings};
pub use loader::{compile_policy, load_cedar_policies};
pub use options::{HttpClientOptions, MapperOptions};
pub use reconcile::{Diff, DiffKind, reconcile};
pub use schema::{Namespaces, ValidationError, ValidationErrorKind, Validator, validate};
pub use traits::{ConditionMapper, PolicyMapper};
pub use types::{
    Condition, ConditionAction, DiffDetail, Entity, Meta, Policies, Policy, Value,
};

pub mod attribute_map;
pub mod cedar;
pub mod cel;
pub mod condition;
pub mod document;
mod error;
pub mod iam;
mod loader;
mod options;
pub mod reconcile;
pub mod schema;
mod traits;
pub mod types;

#[cfg(test)]
mod tests;
