//! The policy information model: namespaces of entity types, actions and
//! attribute shapes, and the validator that checks canonical policies
//! against them.

mod model;
mod validator;

pub use model::{
    ActionRef, ActionType, AppliesTo, AttrKind, AttrType, EntityType, Namespaces, Schema,
};
pub use validator::{Element, ValidationError, ValidationErrorKind, Validator, validate};
