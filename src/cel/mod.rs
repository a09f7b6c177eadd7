//! The CEL dialect used by IAM binding conditions.
//!
//! CEL text is parsed with the `cel-parser` crate; mapped conditions are
//! printed back from the same expression tree ([`unparse`]).

mod condition;
mod parser;
mod unparse;

pub use cel_parser::Expression as CelExpr;
pub use condition::CelConditionMapper;
pub use parser::CelParser;
pub use unparse::unparse;
