//! The Cedar dialect.
//!
//! Cedar text is parsed by `cedar_policy` and read back through its JSON
//! form ([`est`]); mapped policies are printed as Cedar text ([`display`])
//! and compiled again before they are handed out.

mod condition;
mod display;
mod est;
mod policy;

pub use condition::CedarConditionMapper;
pub use display::cedar_string;
pub use est::{
    ActionScope, BinaryOp, CedarExpr, CedarPolicy, CedarUid, Clause, ClauseKind, Effect,
    LikePattern, PatternElem, Scope, ScopeTarget, Var,
};
pub use policy::CedarPolicyMapper;
pub(crate) use policy::ROLE_PREFIX;
