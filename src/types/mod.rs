//! The canonical data model.
//!
//! - [`Value`]: the tagged operand values used in condition comparisons
//! - [`Entity`]: subject, action and object references in their short string form
//! - [`Policy`]: the canonical policy and its JSON envelope

mod entity;
mod policy;
mod value;

pub use entity::{Entity, Notation, cedar_uid};
pub use policy::{
    Condition, ConditionAction, DEFAULT_VERSION, DiffDetail, Meta, Policies, Policy,
    SOURCE_ANNOTATIONS, SOURCE_EFFECT, SOURCE_TEMPLATE,
};
pub use value::{Value, format_number, is_bare_safe, quote, unescape};
