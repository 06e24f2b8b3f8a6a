//! Filter predicates.
//!
//! Predicates in a selection are AND-combined in declaration order. Values
//! always bind as parameters; NULL equality renders `IS NULL` instead.

use tsqlmodel_core::{AttributeRef, Value};

use crate::select::SelectionSpec;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }
}

/// A single filter condition.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `attr <op> value`; text equality renders `LIKE`.
    Compare {
        attribute: AttributeRef,
        op: ComparisonOp,
        value: Value,
    },
    /// `attr BETWEEN low AND high`; a NULL bound leaves that side open.
    Between {
        attribute: AttributeRef,
        low: Value,
        high: Value,
    },
    /// `attr IN (...)`, or `NOT IN` when negated.
    Include {
        attribute: AttributeRef,
        values: Vec<Value>,
        negated: bool,
    },
    /// Correlated `EXISTS` over another entity.
    Exists {
        subquery: Box<SelectionSpec>,
        /// `(outer attribute, inner attribute)` pairs
        correlation: Vec<(AttributeRef, AttributeRef)>,
        negated: bool,
    },
}

impl Predicate {
    pub fn compare(attribute: impl Into<AttributeRef>, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Eq, value)
    }

    pub fn ne(attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Ne, value)
    }

    pub fn between(
        attribute: impl Into<AttributeRef>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Predicate::Between {
            attribute: attribute.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn include<V: Into<Value>>(
        attribute: impl Into<AttributeRef>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::Include {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn exclude<V: Into<Value>>(
        attribute: impl Into<AttributeRef>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::Include {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// Attributes of the enclosing entity this predicate references.
    pub fn attributes(&self) -> Vec<&AttributeRef> {
        match self {
            Predicate::Compare { attribute, .. }
            | Predicate::Between { attribute, .. }
            | Predicate::Include { attribute, .. } => vec![attribute],
            Predicate::Exists { correlation, .. } => {
                correlation.iter().map(|(outer, _)| outer).collect()
            }
        }
    }
}
