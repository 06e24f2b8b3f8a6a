//! Transact-SQL identifier quoting and name qualification.

use crate::definition::{EntityAttributeDefinition, EntityLocation};

/// Quote a SQL Server identifier with square brackets.
///
/// Embedded closing brackets are escaped by doubling them (`]` → `]]`).
///
/// # Examples
///
/// ```
/// use tsqlmodel_core::quote_bracket;
///
/// assert_eq!(quote_bracket("Field"), "[Field]");
/// assert_eq!(quote_bracket("odd]name"), "[odd]]name]");
/// ```
#[inline]
pub fn quote_bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Renders qualified names for statements.
pub trait NameQualifier: Send + Sync {
    /// Schema used when a descriptor does not name one.
    fn default_schema(&self) -> &str;

    /// Escape one identifier.
    fn escape(&self, name: &str) -> String;

    /// `[schema].[table]`, used in FROM/JOIN/UPDATE/DELETE targets.
    fn qualify_table(&self, location: &EntityLocation) -> String {
        format!(
            "{}.{}",
            self.escape(&location.schema),
            self.escape(&location.table)
        )
    }

    /// The table source clause: `[schema].[table]` or `[schema].[table] AS [alias]`.
    fn table_source(&self, location: &EntityLocation) -> String {
        match &location.alias {
            Some(alias) => format!("{} AS {}", self.qualify_table(location), self.escape(alias)),
            None => self.qualify_table(location),
        }
    }

    /// How other clauses reference a location: the alias when present.
    fn qualify_location(&self, location: &EntityLocation) -> String {
        match &location.alias {
            Some(alias) => self.escape(alias),
            None => self.qualify_table(location),
        }
    }

    /// A column on a location.
    fn qualify_column(&self, location: &EntityLocation, column: &str) -> String {
        format!("{}.{}", self.qualify_location(location), self.escape(column))
    }

    fn qualify_attribute(&self, attribute: &EntityAttributeDefinition) -> String {
        self.qualify_column(&attribute.location, attribute.column)
    }

    /// A projected column with its result alias where one is needed.
    fn select_column(&self, attribute: &EntityAttributeDefinition) -> String {
        match attribute.alias() {
            Some(alias) => format!("{} AS {}", self.qualify_attribute(attribute), self.escape(&alias)),
            None => self.qualify_attribute(attribute),
        }
    }

    /// Positional parameter placeholder.
    fn parameter(&self, index: usize) -> String {
        format!("@{}", index)
    }
}

/// The Transact-SQL name qualifier.
#[derive(Debug, Clone)]
pub struct TransactSqlQualifier {
    default_schema: String,
}

impl TransactSqlQualifier {
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
        }
    }
}

impl Default for TransactSqlQualifier {
    fn default() -> Self {
        Self::new("dbo")
    }
}

impl NameQualifier for TransactSqlQualifier {
    fn default_schema(&self) -> &str {
        &self.default_schema
    }

    fn escape(&self, name: &str) -> String {
        quote_bracket(name)
    }
}
