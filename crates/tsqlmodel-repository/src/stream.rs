//! Lazily decoded result sets.

use std::fmt;
use std::marker::PhantomData;
use std::vec;

use tsqlmodel_core::{Entity, Result, Row};

/// Iterator that decodes one entity per row as it is consumed.
///
/// Decoding errors surface per item; later rows are still decodable.
pub struct EntityStream<E> {
    rows: vec::IntoIter<Row>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityStream<E> {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
            _entity: PhantomData,
        }
    }

    /// Rows not yet decoded.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl<E: Entity> Iterator for EntityStream<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| E::from_row(&row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<E: Entity> ExactSizeIterator for EntityStream<E> {}

impl<E> fmt::Debug for EntityStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStream")
            .field("remaining", &self.rows.len())
            .finish()
    }
}
