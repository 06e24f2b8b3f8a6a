//! The selection builder.
//!
//! A [`Selection<E>`] is an owned plan: every builder method consumes it and
//! returns the extended plan. Rendering happens separately in
//! [`TransactSqlAdapter`](crate::TransactSqlAdapter).

use std::fmt;
use std::marker::PhantomData;

use tsqlmodel_core::{AttributeRef, Entity, EntityDescriptor, Value};

use crate::clause::{OrderBy, Page};
use crate::join::Join;
use crate::predicate::{ComparisonOp, Predicate};
use crate::set_ops::{SetOpType, SetOperation};

/// The untyped plan behind a [`Selection`].
#[derive(Debug, Clone)]
pub struct SelectionSpec {
    pub descriptor: &'static EntityDescriptor,
    /// Explicit projection; empty selects the full definition
    pub projection: Vec<AttributeRef>,
    /// Explicit joins; empty uses the definition's relations
    pub joins: Vec<Join>,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub page: Option<Page>,
    /// Custom selection for the page CTE
    pub page_seek: Option<Box<SelectionSpec>>,
    pub set_operations: Vec<SetOperation>,
}

impl SelectionSpec {
    pub fn new(descriptor: &'static EntityDescriptor) -> Self {
        Self {
            descriptor,
            projection: Vec::new(),
            joins: Vec::new(),
            predicates: Vec::new(),
            order: Vec::new(),
            page: None,
            page_seek: None,
            set_operations: Vec::new(),
        }
    }
}

/// A typed selection of `E` rows.
///
/// # Example
///
/// ```ignore
/// let selection = Selection::<FieldRow>::new()
///     .equal_to(FieldRow::CATEGORY.then(&CategoryRow::NAME), "Dates")
///     .greater_than(FieldRow::FIELD_ID, 10)
///     .order_by_descending(FieldRow::NAME)
///     .page(Page::new(25, 1));
/// ```
pub struct Selection<E> {
    spec: SelectionSpec,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Selection<E> {
    pub fn new() -> Self {
        Self {
            spec: SelectionSpec::new(E::descriptor()),
            _entity: PhantomData,
        }
    }

    pub fn spec(&self) -> &SelectionSpec {
        &self.spec
    }

    pub fn into_spec(self) -> SelectionSpec {
        self.spec
    }

    /// Restrict the projection to these attributes.
    #[must_use]
    pub fn select<A: Into<AttributeRef>>(mut self, attributes: impl IntoIterator<Item = A>) -> Self {
        self.spec
            .projection
            .extend(attributes.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn inner_join(mut self, left: impl Into<AttributeRef>, right: impl Into<AttributeRef>) -> Self {
        self.spec.joins.push(Join::inner(left, right));
        self
    }

    #[must_use]
    pub fn left_join(mut self, left: impl Into<AttributeRef>, right: impl Into<AttributeRef>) -> Self {
        self.spec.joins.push(Join::left(left, right));
        self
    }

    /// Add an arbitrary predicate.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.spec.predicates.push(predicate);
        self
    }

    #[must_use]
    pub fn equal_to(self, attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::compare(attribute, ComparisonOp::Eq, value))
    }

    #[must_use]
    pub fn not_equal_to(self, attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::compare(attribute, ComparisonOp::Ne, value))
    }

    #[must_use]
    pub fn greater_than(self, attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::compare(attribute, ComparisonOp::Gt, value))
    }

    #[must_use]
    pub fn greater_than_or_equal_to(
        self,
        attribute: impl Into<AttributeRef>,
        value: impl Into<Value>,
    ) -> Self {
        self.filter(Predicate::compare(attribute, ComparisonOp::Ge, value))
    }

    #[must_use]
    pub fn less_than(self, attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::compare(attribute, ComparisonOp::Lt, value))
    }

    #[must_use]
    pub fn less_than_or_equal_to(
        self,
        attribute: impl Into<AttributeRef>,
        value: impl Into<Value>,
    ) -> Self {
        self.filter(Predicate::compare(attribute, ComparisonOp::Le, value))
    }

    #[must_use]
    pub fn between(
        self,
        attribute: impl Into<AttributeRef>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.filter(Predicate::between(attribute, low, high))
    }

    /// `attr IN (...)`; an empty set matches nothing.
    #[must_use]
    pub fn include<V: Into<Value>>(
        self,
        attribute: impl Into<AttributeRef>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Predicate::include(attribute, values))
    }

    /// `attr NOT IN (...)`; an empty set matches everything.
    #[must_use]
    pub fn exclude<V: Into<Value>>(
        self,
        attribute: impl Into<AttributeRef>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Predicate::exclude(attribute, values))
    }

    /// Keep rows for which `subquery` finds a correlated row. `correlation`
    /// pairs an attribute of `E` with an attribute of `S`.
    #[must_use]
    pub fn exists_in<S: Entity>(
        self,
        subquery: Selection<S>,
        correlation: impl IntoIterator<Item = (AttributeRef, AttributeRef)>,
    ) -> Self {
        self.filter(Predicate::Exists {
            subquery: Box::new(subquery.spec),
            correlation: correlation.into_iter().collect(),
            negated: false,
        })
    }

    #[must_use]
    pub fn not_exists_in<S: Entity>(
        self,
        subquery: Selection<S>,
        correlation: impl IntoIterator<Item = (AttributeRef, AttributeRef)>,
    ) -> Self {
        self.filter(Predicate::Exists {
            subquery: Box::new(subquery.spec),
            correlation: correlation.into_iter().collect(),
            negated: true,
        })
    }

    /// Equality on each primary key attribute of `item`.
    #[must_use]
    pub fn by_key(self, item: &E) -> Self {
        item.key_values()
            .into_iter()
            .fold(self, |selection, (property, value)| {
                selection.equal_to(AttributeRef::from_static(property), value)
            })
    }

    #[must_use]
    pub fn order_by(mut self, attribute: impl Into<AttributeRef>) -> Self {
        self.spec.order.push(OrderBy::asc(attribute));
        self
    }

    #[must_use]
    pub fn order_by_descending(mut self, attribute: impl Into<AttributeRef>) -> Self {
        self.spec.order.push(OrderBy::desc(attribute));
        self
    }

    /// Page the results through a key CTE.
    #[must_use]
    pub fn page(mut self, page: Page) -> Self {
        self.spec.page = Some(page);
        self
    }

    /// Customize the page CTE's predicates and order. The closure starts
    /// from an empty selection of `E`.
    #[must_use]
    pub fn seek(mut self, configure: impl FnOnce(Selection<E>) -> Selection<E>) -> Self {
        let seek = configure(Selection::new());
        self.spec.page_seek = Some(Box::new(seek.spec));
        self
    }

    #[must_use]
    pub fn union(self, other: Selection<E>) -> Self {
        self.set_operation(SetOpType::Union, other)
    }

    #[must_use]
    pub fn union_all(self, other: Selection<E>) -> Self {
        self.set_operation(SetOpType::UnionAll, other)
    }

    #[must_use]
    pub fn intersect(self, other: Selection<E>) -> Self {
        self.set_operation(SetOpType::Intersect, other)
    }

    #[must_use]
    pub fn except(self, other: Selection<E>) -> Self {
        self.set_operation(SetOpType::Except, other)
    }

    fn set_operation(mut self, op_type: SetOpType, other: Selection<E>) -> Self {
        self.spec.set_operations.push(SetOperation {
            op_type,
            selection: other.spec,
        });
        self
    }
}

impl<E: Entity> Default for Selection<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Selection<E> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Selection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("entity", &self.spec.descriptor.entity_name)
            .field("spec", &self.spec)
            .finish()
    }
}
