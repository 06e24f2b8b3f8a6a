//! Explicit JOIN declarations.

use tsqlmodel_core::{AttributeRef, JoinType};

/// One explicit join key pair.
///
/// Both sides are attribute paths of the root entity's definition; the side
/// that lives outside the root table names the joined location. Consecutive
/// pairs that reach the same location render as a single `ON a = b AND c = d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub join_type: JoinType,
    pub left: AttributeRef,
    pub right: AttributeRef,
}

impl Join {
    pub fn inner(left: impl Into<AttributeRef>, right: impl Into<AttributeRef>) -> Self {
        Self {
            join_type: JoinType::Inner,
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn left(left: impl Into<AttributeRef>, right: impl Into<AttributeRef>) -> Self {
        Self {
            join_type: JoinType::Left,
            left: left.into(),
            right: right.into(),
        }
    }
}
