//! Statement text caching.
//!
//! Insertion text depends only on the entity, so the adapter renders it once
//! per descriptor and reuses it. Entries are evicted least-recently-used.

use std::collections::HashMap;

/// A cached statement text.
#[derive(Debug, Clone)]
pub struct CachedStatement {
    pub sql: String,
    /// Access tick of the most recent use
    pub last_used: u64,
    /// Number of times this text has been served
    pub hit_count: u64,
}

/// LRU cache of statement texts keyed by entity descriptor identity.
#[derive(Debug)]
pub struct StatementCache {
    cache: HashMap<usize, CachedStatement>,
    max_size: usize,
    tick: u64,
}

impl StatementCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(256)),
            max_size: max_size.max(1),
            tick: 0,
        }
    }

    /// Get a cached text or render and insert it.
    ///
    /// `render` runs only on a miss; a failed render caches nothing.
    #[allow(clippy::result_large_err)]
    pub fn get_or_try_insert<E>(
        &mut self,
        key: usize,
        render: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        self.tick += 1;
        if let Some(entry) = self.cache.get_mut(&key) {
            entry.last_used = self.tick;
            entry.hit_count += 1;
            return Ok(entry.sql.clone());
        }

        let sql = render()?;
        if self.cache.len() >= self.max_size {
            self.evict_lru();
        }
        self.cache.insert(
            key,
            CachedStatement {
                sql: sql.clone(),
                last_used: self.tick,
                hit_count: 0,
            },
        );
        Ok(sql)
    }

    pub fn contains(&self, key: usize) -> bool {
        self.cache.contains_key(&key)
    }

    pub fn hits(&self, key: usize) -> Option<u64> {
        self.cache.get(&key).map(|entry| entry.hit_count)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn evict_lru(&mut self) {
        if let Some((&lru_key, _)) = self.cache.iter().min_by_key(|(_, entry)| entry.last_used) {
            self.cache.remove(&lru_key);
        }
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
