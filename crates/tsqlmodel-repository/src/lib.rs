//! Entity repositories for tsqlmodel.
//!
//! `tsqlmodel-repository` executes the statements `tsqlmodel-query` renders.
//! [`EntityRepository`] provides every entity operation on top of two
//! primitives, `fetch` (rows) and `run` (affected count). Two types
//! implement it:
//!
//! - [`RepositoryProvider`] owns a [`Connection`] and runs each statement on
//!   its own
//! - [`RepositoryTransaction`] runs statements inside a transaction opened by
//!   the provider and ends with `commit` or `rollback`
//!
//! ```ignore
//! let repository = RepositoryProvider::new(connection);
//! let mut tx = repository.begin_transaction(&cx).await?;
//! tx.save(&cx, &mut submission).await?;
//! let elements = tx.merge(&cx, &command).await?;
//! tx.commit(&cx).await?;
//! ```

pub mod config;
pub mod stream;

pub use config::RepositoryConfig;
pub use stream::EntityStream;

use std::future::Future;

use asupersync::{Cx, Outcome};
use tsqlmodel_core::{
    Connection, Entity, Error, IsolationLevel, QueryError, QueryErrorKind, Result, Row,
    TransactionError, TransactionErrorKind, TransactionOps, TypeError, Value,
};
use tsqlmodel_query::{Selection, Statement, StructuredMergeCommand, TransactSqlAdapter, UpdateSet};

macro_rules! try_outcome {
    ($outcome:expr) => {
        match $outcome {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

fn lift<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(e) => Outcome::Err(e),
    }
}

fn first_value(rows: &[Row]) -> Option<&Value> {
    rows.first().and_then(|row| row.get(0))
}

/// The `COUNT(1)` scalar of a count statement.
#[allow(clippy::result_large_err)]
fn count_value(rows: &[Row], statement: &Statement) -> Result<u64> {
    let Some(value) = first_value(rows) else {
        return Err(Error::Query(QueryError {
            kind: QueryErrorKind::NotFound,
            sql: Some(statement.sql.clone()),
            number: None,
            message: "count statement returned no value".to_string(),
            source: None,
        }));
    };
    value
        .as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            Error::Type(TypeError {
                expected: "non-negative integer count",
                actual: format!("{:?}", value),
                column: None,
                rust_type: Some("u64"),
            })
        })
}

/// Selection of `item` by its primary key.
///
/// Entities without a key are refused: an empty key would match every row.
#[allow(clippy::result_large_err)]
fn keyed_selection<E: Entity>(item: &E, operation: &str) -> Result<Selection<E>> {
    let descriptor = E::descriptor();
    if descriptor.primary_key().next().is_none() {
        return Err(Error::build(format!(
            "{} of {} requires a primary key",
            operation, descriptor.entity_name
        )));
    }
    Ok(Selection::new().by_key(item))
}

/// Attach the failing statement to a server error and classify it by its
/// error number when the driver left it unclassified.
fn annotated<T>(outcome: Outcome<T, Error>, statement: &Statement) -> Outcome<T, Error> {
    match outcome {
        Outcome::Err(Error::Query(mut error)) => {
            if error.sql.is_none() {
                error.sql = Some(statement.sql.clone());
            }
            if let (QueryErrorKind::Database, Some(number)) = (error.kind, error.number) {
                error.kind = QueryErrorKind::from_number(number);
            }
            tracing::debug!(number = ?error.number, kind = ?error.kind, "Statement failed");
            Outcome::Err(Error::Query(error))
        }
        other => other,
    }
}

fn log_statement(config: &RepositoryConfig, kind: &'static str, statement: &Statement) {
    if config.log_statements {
        tracing::debug!(kind, params = statement.params.len(), sql = %statement.sql, "Executing statement");
    } else {
        tracing::trace!(kind, params = statement.params.len(), sql = %statement.sql, "Executing statement");
    }
}

/// Entity operations over a statement executor.
///
/// Implementors supply [`fetch`](Self::fetch) and [`run`](Self::run); every
/// other operation renders its statement with [`adapter`](Self::adapter) and
/// delegates to one of them.
pub trait EntityRepository: Send + Sync {
    fn adapter(&self) -> &TransactSqlAdapter;

    fn config(&self) -> &RepositoryConfig;

    /// Execute `statement` and return the rows of its last result set.
    fn fetch(
        &self,
        cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute `statement` and return the number of rows affected.
    fn run(&self, cx: &Cx, statement: &Statement)
    -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// The first matching entity, or `None` when nothing matches.
    fn first_or_default<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<Option<E>, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().select_statement(selection)));
            let rows = try_outcome!(self.fetch(cx, &statement).await);
            match rows.first() {
                Some(row) => lift(E::from_row(row).map(Some)),
                None => Outcome::Ok(None),
            }
        }
    }

    /// Whether any row matches.
    fn contains<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().exists_statement(selection)));
            let rows = try_outcome!(self.fetch(cx, &statement).await);
            Outcome::Ok(first_value(&rows).and_then(Value::as_i64) == Some(1))
        }
    }

    fn count<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().count_statement(selection)));
            let rows = try_outcome!(self.fetch(cx, &statement).await);
            lift(count_value(&rows, &statement))
        }
    }

    fn select_entities<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<Vec<E>, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().select_statement(selection)));
            let rows = try_outcome!(self.fetch(cx, &statement).await);
            tracing::debug!(entity = E::descriptor().entity_name, rows = rows.len(), "Selected entities");
            lift(rows.iter().map(E::from_row).collect())
        }
    }

    /// Matching rows without decoding; columns carry the result aliases.
    fn dynamic_select<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().select_statement(selection)));
            self.fetch(cx, &statement).await
        }
    }

    /// Matching rows decoded one at a time as the stream is consumed.
    fn stream_entities<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<EntityStream<E>, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().select_statement(selection)));
            let rows = try_outcome!(self.fetch(cx, &statement).await);
            Outcome::Ok(EntityStream::new(rows))
        }
    }

    /// Insert `item`. An identity value generated by the server is stored
    /// back into `item`.
    fn insert<E: Entity>(
        &self,
        cx: &Cx,
        item: &mut E,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().insert_statement(&*item)));
            if E::descriptor().identity().is_none() {
                try_outcome!(self.run(cx, &statement).await);
                return Outcome::Ok(());
            }

            let rows = try_outcome!(self.fetch(cx, &statement).await);
            match first_value(&rows) {
                Some(value) => lift(item.set_identity(value)),
                None => Outcome::Err(Error::Query(QueryError {
                    kind: QueryErrorKind::NotFound,
                    sql: Some(statement.sql),
                    number: None,
                    message: format!(
                        "insert of {} returned no identity value",
                        E::descriptor().entity_name
                    ),
                    source: None,
                })),
            }
        }
    }

    /// Apply `values` to the rows matched by `selection`.
    fn update<E: Entity>(
        &self,
        cx: &Cx,
        values: &UpdateSet<E>,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().update_statement(values, selection)));
            self.run(cx, &statement).await
        }
    }

    /// Write every non-key attribute of `item` to the row with its key.
    fn update_item<E: Entity>(
        &self,
        cx: &Cx,
        item: &E,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let selection = try_outcome!(lift(keyed_selection(item, "update")));
            self.update(cx, &UpdateSet::from_item_all(item), &selection).await
        }
    }

    /// Update `item` when a row with its key exists, insert it otherwise.
    fn save<E: Entity>(
        &self,
        cx: &Cx,
        item: &mut E,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            let selection = try_outcome!(lift(keyed_selection(&*item, "save")));
            if try_outcome!(self.contains(cx, &selection).await) {
                try_outcome!(self.update_item(cx, &*item).await);
                Outcome::Ok(())
            } else {
                self.insert(cx, item).await
            }
        }
    }

    fn delete<E: Entity>(
        &self,
        cx: &Cx,
        selection: &Selection<E>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(self.adapter().delete_statement(selection)));
            self.run(cx, &statement).await
        }
    }

    fn delete_item<E: Entity>(
        &self,
        cx: &Cx,
        item: &E,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let selection = try_outcome!(lift(keyed_selection(item, "delete")));
            self.delete(cx, &selection).await
        }
    }

    /// Execute a merge command and decode its output rows.
    ///
    /// Commands without an output merge return an empty list.
    fn merge<S: Entity>(
        &self,
        cx: &Cx,
        command: &StructuredMergeCommand<S>,
    ) -> impl Future<Output = Outcome<Vec<S>, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(command.build(self.adapter())));
            if !command.returns_rows() {
                try_outcome!(self.run(cx, &statement).await);
                return Outcome::Ok(Vec::new());
            }
            let rows = try_outcome!(self.fetch(cx, &statement).await);
            tracing::debug!(items = command.items().len(), rows = rows.len(), "Merged structured rows");
            lift(command.hydrate(self.adapter(), &rows))
        }
    }

    /// Execute a merge command and return the affected row count.
    fn merge_count<S: Entity>(
        &self,
        cx: &Cx,
        command: &StructuredMergeCommand<S>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let statement = try_outcome!(lift(command.build(self.adapter())));
            self.run(cx, &statement).await
        }
    }
}

// ==================== Provider ====================

/// A repository over one connection.
pub struct RepositoryProvider<C: Connection> {
    connection: C,
    adapter: TransactSqlAdapter,
    config: RepositoryConfig,
}

impl<C: Connection> RepositoryProvider<C> {
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, RepositoryConfig::default())
    }

    pub fn with_config(connection: C, config: RepositoryConfig) -> Self {
        let adapter = config.adapter();
        Self {
            connection,
            adapter,
            config,
        }
    }

    /// Use a preconfigured adapter, e.g. one with a custom definition provider.
    pub fn with_adapter(connection: C, adapter: TransactSqlAdapter, config: RepositoryConfig) -> Self {
        Self {
            connection,
            adapter,
            config,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn into_inner(self) -> C {
        self.connection
    }

    /// Begin a READ COMMITTED transaction.
    pub async fn begin_transaction(&self, cx: &Cx) -> Outcome<RepositoryTransaction<'_, C>, Error> {
        self.begin_transaction_with(cx, IsolationLevel::default()).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn begin_transaction_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> Outcome<RepositoryTransaction<'_, C>, Error> {
        let tx = try_outcome!(self.connection.begin_with(cx, isolation).await);
        tracing::debug!("Transaction started");
        Outcome::Ok(RepositoryTransaction {
            state: TransactionState::Open(tx),
            adapter: &self.adapter,
            config: &self.config,
        })
    }

    #[allow(clippy::result_large_err)]
    pub async fn close(self, cx: &Cx) -> Result<()> {
        self.connection.close(cx).await
    }
}

impl<C: Connection> EntityRepository for RepositoryProvider<C> {
    fn adapter(&self) -> &TransactSqlAdapter {
        &self.adapter
    }

    fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn fetch(
        &self,
        cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            log_statement(&self.config, "fetch", statement);
            let outcome = self.connection.query(cx, &statement.sql, &statement.params).await;
            annotated(outcome, statement)
        }
    }

    fn run(&self, cx: &Cx, statement: &Statement) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            log_statement(&self.config, "run", statement);
            let outcome = self.connection.execute(cx, &statement.sql, &statement.params).await;
            annotated(outcome, statement)
        }
    }
}

impl<C: Connection> std::fmt::Debug for RepositoryProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryProvider")
            .field("adapter", &self.adapter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ==================== Transaction ====================

/// A repository bound to an open transaction.
///
/// Dropping it without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) leaves the rollback to the driver. Once
/// either has run, every further call fails with the matching
/// [`TransactionErrorKind`].
pub struct RepositoryTransaction<'a, C: Connection + 'a> {
    state: TransactionState<C::Tx<'a>>,
    adapter: &'a TransactSqlAdapter,
    config: &'a RepositoryConfig,
}

impl<'a, C: Connection + 'a> std::fmt::Debug for RepositoryTransaction<'a, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryTransaction")
            .field("adapter", &self.adapter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum TransactionState<T> {
    Open(T),
    Committed,
    RolledBack,
}

impl<T> TransactionState<T> {
    #[allow(clippy::result_large_err)]
    fn open(&self) -> Result<&T> {
        match self {
            TransactionState::Open(tx) => Ok(tx),
            TransactionState::Committed => Err(finished_transaction(TransactionErrorKind::AlreadyCommitted)),
            TransactionState::RolledBack => {
                Err(finished_transaction(TransactionErrorKind::AlreadyRolledBack))
            }
        }
    }
}

fn finished_transaction(kind: TransactionErrorKind) -> Error {
    let message = match kind {
        TransactionErrorKind::AlreadyRolledBack => "transaction already rolled back",
        _ => "transaction already committed",
    };
    Error::Transaction(TransactionError {
        kind,
        message: message.to_string(),
    })
}

impl<'a, C: Connection + 'a> RepositoryTransaction<'a, C> {
    pub fn is_active(&self) -> bool {
        matches!(self.state, TransactionState::Open(_))
    }

    /// `SAVE TRANSACTION name`
    pub async fn savepoint(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        let tx = try_outcome!(lift(self.state.open()));
        tx.savepoint(cx, name).await
    }

    /// Roll back to a savepoint; the transaction stays open.
    pub async fn rollback_to(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        let tx = try_outcome!(lift(self.state.open()));
        tx.rollback_to(cx, name).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match std::mem::replace(&mut self.state, TransactionState::Committed) {
            TransactionState::Open(tx) => tx.commit(cx).await,
            TransactionState::Committed => {
                Outcome::Err(finished_transaction(TransactionErrorKind::AlreadyCommitted))
            }
            TransactionState::RolledBack => {
                self.state = TransactionState::RolledBack;
                Outcome::Err(finished_transaction(TransactionErrorKind::AlreadyRolledBack))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match std::mem::replace(&mut self.state, TransactionState::RolledBack) {
            TransactionState::Open(tx) => tx.rollback(cx).await,
            TransactionState::RolledBack => {
                Outcome::Err(finished_transaction(TransactionErrorKind::AlreadyRolledBack))
            }
            TransactionState::Committed => {
                self.state = TransactionState::Committed;
                Outcome::Err(finished_transaction(TransactionErrorKind::AlreadyCommitted))
            }
        }
    }
}

impl<'a, C: Connection + 'a> EntityRepository for RepositoryTransaction<'a, C> {
    fn adapter(&self) -> &TransactSqlAdapter {
        self.adapter
    }

    fn config(&self) -> &RepositoryConfig {
        self.config
    }

    fn fetch(
        &self,
        cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            let tx = try_outcome!(lift(self.state.open()));
            log_statement(self.config, "fetch", statement);
            annotated(tx.query(cx, &statement.sql, &statement.params).await, statement)
        }
    }

    fn run(&self, cx: &Cx, statement: &Statement) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let tx = try_outcome!(lift(self.state.open()));
            log_statement(self.config, "run", statement);
            annotated(tx.execute(cx, &statement.sql, &statement.params).await, statement)
        }
    }
}

impl<'a, C: Connection + 'a> Drop for RepositoryTransaction<'a, C> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::warn!("Repository transaction dropped without commit or rollback");
        }
    }
}
