//! Update value sets.

use std::fmt;
use std::marker::PhantomData;

use tsqlmodel_core::{AttributeRef, Entity, Value};

/// Attribute assignments for an UPDATE of `E`.
///
/// Assignments keep insertion order; setting the same attribute twice keeps
/// the first position and the last value.
pub struct UpdateSet<E> {
    values: Vec<(AttributeRef, Value)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> UpdateSet<E> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn set(mut self, attribute: impl Into<AttributeRef>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        let value = value.into();
        match self.values.iter_mut().find(|(a, _)| *a == attribute) {
            Some(existing) => existing.1 = value,
            None => self.values.push((attribute, value)),
        }
        self
    }

    /// Take the listed attributes' values from `item`.
    #[must_use]
    pub fn from_item<A: Into<AttributeRef>>(
        item: &E,
        attributes: impl IntoIterator<Item = A>,
    ) -> Self {
        let row = item.to_row();
        attributes
            .into_iter()
            .map(Into::into)
            .fold(Self::new(), |set, attribute| {
                let value = row
                    .iter()
                    .find(|(property, _)| *property == attribute.path())
                    .map_or(Value::Null, |(_, v)| v.clone());
                set.set(attribute, value)
            })
    }

    /// Every direct attribute of `item` except the primary key.
    #[must_use]
    pub fn from_item_all(item: &E) -> Self {
        let descriptor = E::descriptor();
        item.to_row()
            .into_iter()
            .filter(|(property, _)| {
                descriptor
                    .attribute(property)
                    .is_some_and(|a| !a.primary_key && !a.identity)
            })
            .fold(Self::new(), |set, (property, value)| {
                set.set(AttributeRef::from_static(property), value)
            })
    }

    /// Attributes whose values differ between `original` and `current`,
    /// with the current values. Key and identity attributes are never set.
    #[must_use]
    pub fn from_differences(original: &E, current: &E) -> Self {
        let descriptor = E::descriptor();
        let before = original.to_row();
        current
            .to_row()
            .into_iter()
            .filter(|(property, value)| {
                let changed = before
                    .iter()
                    .find(|(p, _)| p == property)
                    .is_none_or(|(_, old)| old != value);
                changed
                    && descriptor
                        .attribute(property)
                        .is_some_and(|a| !a.primary_key && !a.identity)
            })
            .fold(Self::new(), |set, (property, value)| {
                set.set(AttributeRef::from_static(property), value)
            })
    }

    pub fn values(&self) -> &[(AttributeRef, Value)] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<E: Entity> Default for UpdateSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for UpdateSet<E> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for UpdateSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}
