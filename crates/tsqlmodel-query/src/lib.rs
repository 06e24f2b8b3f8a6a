//! Selection builder, merge commands and the Transact-SQL adapter.
//!
//! `tsqlmodel-query` turns typed plans into parameterized T-SQL:
//!
//! - [`Selection`] describes which rows of an entity to read, with joins,
//!   predicates, ordering, paging and set operations
//! - [`UpdateSet`] describes the assignments of an UPDATE
//! - [`StructuredMergeCommand`] merges a table-valued parameter into tables
//! - [`TransactSqlAdapter`] renders all of them into [`Statement`]s
//!
//! Nothing here talks to a server; execution belongs to the repository.

pub mod builder;
pub mod cache;
pub mod clause;
pub mod join;
pub mod merge;
pub mod predicate;
pub mod select;
pub mod set_ops;
pub mod statement;
pub mod tsql;

pub use builder::UpdateSet;
pub use cache::StatementCache;
pub use clause::{OrderBy, OrderDirection, Page};
pub use join::Join;
pub use merge::{DerivedSource, MergeInto, MergeOutput, StructuredMergeCommand, validate_parameter_name};
pub use predicate::{ComparisonOp, Predicate};
pub use select::{Selection, SelectionSpec};
pub use set_ops::{SetOpType, SetOperation};
pub use statement::Statement;
pub use tsql::TransactSqlAdapter;
