use crate::error::PolicyError;
use crate::types::{Condition, Policy};

/// Translates a canonical condition to and from a dialect's condition form.
pub trait ConditionMapper {
    /// The dialect representation of a condition, e.g. Cedar clauses or a CEL string.
    type Dialect;

    /// Map a canonical condition into the dialect.
    fn to_dialect(&self, condition: &Condition) -> Result<Self::Dialect, PolicyError>;

    /// Map a dialect condition back. `None` means the dialect form imposes no
    /// condition at all.
    fn to_canonical(&self, dialect: &Self::Dialect) -> Result<Option<Condition>, PolicyError>;
}

/// Translates whole policy sets to and from a dialect.
pub trait PolicyMapper {
    /// The dialect representation of a policy set.
    type Dialect;

    /// Map canonical policies into the dialect. Fails on the first policy that
    /// cannot be expressed.
    fn to_dialect(&self, policies: &[Policy]) -> Result<Self::Dialect, PolicyError>;

    /// Map a dialect policy set back into canonical policies.
    fn to_canonical(&self, dialect: &Self::Dialect) -> Result<Vec<Policy>, PolicyError>;
}
