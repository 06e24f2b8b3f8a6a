//! Set operations combining selections of one entity.
//!
//! Every branch keeps its own predicates; only the head's ORDER BY applies,
//! after the last branch.

use crate::select::SelectionSpec;

/// Type of set operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpType {
    /// UNION - combines results, removes duplicates
    Union,
    /// UNION ALL - combines results, keeps duplicates
    UnionAll,
    /// INTERSECT - rows present in both
    Intersect,
    /// EXCEPT - rows of the left side missing from the right
    Except,
}

impl SetOpType {
    /// Get the SQL keyword for this set operation.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            SetOpType::Union => "UNION",
            SetOpType::UnionAll => "UNION ALL",
            SetOpType::Intersect => "INTERSECT",
            SetOpType::Except => "EXCEPT",
        }
    }
}

/// A branch appended to a selection.
#[derive(Debug, Clone)]
pub struct SetOperation {
    pub op_type: SetOpType,
    pub selection: SelectionSpec,
}
