//! The canonical condition language: AST, parser, serializer and equivalence.
//!
//! Serialization is the `Display` implementation of [`Expr`]; parsing is
//! [`parse`] (or `str::parse::<Expr>`).

mod ast;
mod equiv;
mod parser;
mod walk;

pub use ast::{CompareOp, Expr, LogicalOp};
pub use equiv::{Fingerprints, equiv, fingerprints};
pub use parser::parse;
pub use walk::{
    MultiLogical, Walk, flatten, group_for, join, path_segment, split_path, unquote_segment,
};
