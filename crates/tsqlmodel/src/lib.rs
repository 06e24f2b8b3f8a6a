//! tsqlmodel - typed selections, Transact-SQL statements and table-valued
//! merges for SQL Server.
//!
//! tsqlmodel maps row types to SQL Server tables and renders parameterized
//! T-SQL from typed plans:
//!
//! - `#[derive(Entity)]` describes a row type, its columns and the related
//!   entities pulled into its default selection
//! - [`Selection`] builds reads with predicates, joins, paging and unions
//! - [`TransactSqlAdapter`] renders SELECT, COUNT, EXISTS, UPDATE, DELETE and
//!   identity-capturing INSERT statements
//! - [`StructuredMergeCommand`] merges a table-valued parameter into one or
//!   more tables and reads generated keys back
//! - [`RepositoryProvider`] executes all of it over a [`Connection`]
//!
//! # Quick Start
//!
//! ```ignore
//! use tsqlmodel::prelude::*;
//!
//! #[derive(Entity, Debug)]
//! struct CategoryRow {
//!     #[entity(identity)]
//!     category_id: i32,
//!     name: String,
//! }
//!
//! #[derive(Entity, Debug)]
//! struct FieldRow {
//!     #[entity(identity)]
//!     field_id: i32,
//!     name: String,
//!     category_id: i32,
//!     #[entity(relation(on = "CategoryId = CategoryId"))]
//!     category: CategoryRow,
//! }
//!
//! async fn dates(cx: &Cx, repository: &RepositoryProvider<impl Connection>) {
//!     let selection = Selection::<FieldRow>::new()
//!         .equal_to(FieldRow::CATEGORY.then(&CategoryRow::NAME), "Dates")
//!         .order_by(FieldRow::NAME);
//!     let fields = repository.select_entities(cx, &selection).await;
//! }
//! ```
//!
//! # Features
//!
//! - **Structured concurrency**: every operation takes a `Cx` and returns an
//!   asupersync `Outcome`
//! - **No driver lock-in**: execution goes through the [`Connection`] trait
//! - **Stable text**: the same plan always renders the same SQL, so insert
//!   text is cached per entity

pub use tsqlmodel_core::{
    // asupersync re-exports
    Budget,
    Cx,
    Outcome,
    RegionId,
    TaskId,
    // Entities
    AttributeInfo,
    AttributeRef,
    Entity,
    EntityDescriptor,
    JoinType,
    RelationInfo,
    RelationKey,
    // Definitions and naming
    DefinitionProvider,
    EntityAttributeDefinition,
    EntityDefinition,
    EntityLocation,
    EntityRelationDefinition,
    NameQualifier,
    StaticDefinitionProvider,
    TransactSqlQualifier,
    // Connections
    Connection,
    ConnectionConfig,
    Encrypt,
    IsolationLevel,
    TransactionOps,
    // Values
    ColumnInfo,
    FromValue,
    Row,
    SqlType,
    TableValue,
    TypeInfo,
    Value,
    // Errors
    Error,
    QueryError,
    QueryErrorKind,
    Result,
    SchemaError,
    SchemaErrorKind,
};

pub use tsqlmodel_macros::Entity;

pub use tsqlmodel_query::{
    ComparisonOp, DerivedSource, Join, MergeInto, MergeOutput, OrderBy, OrderDirection, Page,
    Predicate, Selection, SelectionSpec, SetOpType, SetOperation, Statement, StatementCache,
    StructuredMergeCommand, TransactSqlAdapter, UpdateSet, validate_parameter_name,
};

pub use tsqlmodel_repository::{
    EntityRepository, EntityStream, RepositoryConfig, RepositoryProvider, RepositoryTransaction,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tsqlmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AttributeRef, Connection, Cx, DerivedSource, Entity, EntityRepository, Error,
        IsolationLevel, MergeOutput, Outcome, Page, RepositoryConfig, RepositoryProvider,
        RepositoryTransaction, Result, Row, Selection, StructuredMergeCommand, TransactSqlAdapter,
        UpdateSet, Value,
    };
}
