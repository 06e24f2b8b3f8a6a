//! Repository configuration.

use serde::{Deserialize, Serialize};
use tsqlmodel_core::Result;
use tsqlmodel_query::TransactSqlAdapter;

/// Settings shared by a repository and the transactions it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Schema for entities that do not name one.
    pub default_schema: String,
    /// Capacity of the adapter's insert statement cache.
    pub statement_cache_capacity: usize,
    /// Log rendered SQL at debug level instead of trace.
    pub log_statements: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_schema: "dbo".to_string(),
            statement_cache_capacity: 1024,
            log_statements: false,
        }
    }
}

impl RepositoryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    #[must_use]
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn log_statements(mut self, value: bool) -> Self {
        self.log_statements = value;
        self
    }

    /// Read a configuration from JSON; missing keys take their defaults.
    #[allow(clippy::result_large_err)]
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// An adapter using this configuration's schema and cache capacity.
    pub fn adapter(&self) -> TransactSqlAdapter {
        TransactSqlAdapter::for_schema(&self.default_schema)
            .with_cache_capacity(self.statement_cache_capacity)
    }
}
