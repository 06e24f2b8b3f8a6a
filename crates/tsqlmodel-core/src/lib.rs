//! Core types and traits for tsqlmodel.
//!
//! This crate provides the foundations the query builder and repository
//! build on:
//!
//! - `Value` and `Row` for parameters and results
//! - `Entity` and `EntityDescriptor` for static row-type metadata
//! - `DefinitionProvider` for flattening relations into selectable definitions
//! - `NameQualifier` for Transact-SQL quoting
//! - `Connection` trait for SQL Server connections
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod definition;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, ConnectionConfig, Encrypt, IsolationLevel, TransactionOps};
pub use definition::{
    DefinitionProvider, EntityAttributeDefinition, EntityDefinition, EntityLocation,
    EntityRelationDefinition, StaticDefinitionProvider,
};
pub use entity::{
    AttributeInfo, AttributeRef, Entity, EntityDescriptor, JoinType, RelationInfo, RelationKey,
};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    SchemaError, SchemaErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
pub use identifiers::{NameQualifier, TransactSqlQualifier, quote_bracket};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::{SqlType, TypeInfo};
pub use value::{TableValue, Value};
