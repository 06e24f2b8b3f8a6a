//! Connection traits and SQL Server connection configuration.
//!
//! - [`Connection`] executes statements and opens transactions
//! - [`TransactionOps`] is the transactional subset with savepoints
//! - [`ConnectionConfig`] describes how to reach a server
//!
//! All operations integrate with asupersync's structured concurrency via `Cx`
//! for cancellation and timeout handling. No wire driver ships in this
//! workspace; drivers (and test fakes) implement these traits.

use std::future::Future;
use std::time::Duration;

use crate::error::{ConfigError, Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// SQL Server's default.
    #[default]
    ReadCommitted,
    RepeatableRead,
    /// Row versioning; requires ALLOW_SNAPSHOT_ISOLATION on the database.
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// The statement that applies this level to the session.
    #[must_use]
    pub fn set_statement(&self) -> String {
        format!("SET TRANSACTION ISOLATION LEVEL {}", self.as_sql())
    }
}

/// A database connection capable of executing statements.
///
/// Table-valued parameters ([`Value::Table`]) bind by their own parameter
/// name; every other parameter binds positionally as `@0`, `@1`, ...
pub trait Connection: Send + Sync {
    /// The transaction type returned by this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// Execute a statement and return all rows of its last result set.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a statement and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        async move {
            match self.query(cx, sql, params).await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Execute a statement (UPDATE, DELETE, MERGE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Begin a transaction with the default isolation level (READ COMMITTED).
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        self.begin_with(cx, IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send;

    /// Check if the connection is still valid by sending a ping.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Check if the connection is still valid (alias for ping that returns bool).
    fn is_valid(&self, cx: &Cx) -> impl Future<Output = bool> + Send {
        async {
            match self.ping(cx).await {
                Outcome::Ok(()) => true,
                Outcome::Err(_) | Outcome::Cancelled(_) | Outcome::Panicked(_) => false,
            }
        }
    }

    /// Close the connection gracefully.
    fn close(self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}

/// Operations available inside a transaction.
///
/// Transactions end with [`commit`](TransactionOps::commit) or
/// [`rollback`](TransactionOps::rollback); a driver rolls back a transaction
/// that is dropped without either.
pub trait TransactionOps: Send + Sync {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// `SAVE TRANSACTION name`
    fn savepoint(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// `ROLLBACK TRANSACTION name`; the transaction stays open.
    fn rollback_to(&self, cx: &Cx, name: &str)
    -> impl Future<Output = Outcome<(), Error>> + Send;

    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// TLS mode for the TDS connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encrypt {
    /// Encrypt the login packet only
    Off,
    /// Encrypt the whole session
    #[default]
    On,
    /// TDS 8.0 strict encryption
    Strict,
}

/// Configuration for SQL Server connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Named instance (`host\instance`)
    pub instance: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub application_name: Option<String>,
    pub encrypt: Encrypt,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            instance: None,
            database: None,
            user: None,
            password: None,
            application_name: None,
            encrypt: Encrypt::default(),
            trust_server_certificate: false,
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn encrypt(mut self, mode: Encrypt) -> Self {
        self.encrypt = mode;
        self
    }

    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Parse an ADO.NET style connection string:
    /// `Server=tcp:db.local,1433;Database=Forms;User Id=app;Password=...;Encrypt=True`.
    ///
    /// Keys are case-insensitive; unknown keys are ignored with a debug log.
    #[allow(clippy::result_large_err)]
    pub fn from_connection_string(input: &str) -> Result<Self> {
        let mut config = Self::default();
        for part in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| config_error(format!("malformed segment '{}'", part)))?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "server" | "data source" | "address" | "addr" => config.apply_server(value)?,
                "database" | "initial catalog" => config.database = Some(value.to_string()),
                "user id" | "uid" | "user" => config.user = Some(value.to_string()),
                "password" | "pwd" => config.password = Some(value.to_string()),
                "application name" | "app" => config.application_name = Some(value.to_string()),
                "encrypt" => {
                    config.encrypt = match value.to_ascii_lowercase().as_str() {
                        "true" | "yes" | "mandatory" => Encrypt::On,
                        "false" | "no" | "optional" => Encrypt::Off,
                        "strict" => Encrypt::Strict,
                        other => return Err(config_error(format!("invalid Encrypt value '{}'", other))),
                    }
                }
                "trustservercertificate" | "trust server certificate" => {
                    config.trust_server_certificate = parse_bool(value)?;
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    config.connect_timeout = Duration::from_secs(parse_seconds(value)?);
                }
                "command timeout" => {
                    config.command_timeout = Duration::from_secs(parse_seconds(value)?);
                }
                other => tracing::debug!(key = other, "Ignoring connection string key"),
            }
        }
        Ok(config)
    }

    #[allow(clippy::result_large_err)]
    fn apply_server(&mut self, value: &str) -> Result<()> {
        let value = value.strip_prefix("tcp:").unwrap_or(value);
        let (host, port) = match value.split_once(',') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| config_error(format!("invalid port '{}'", port)))?;
                (host, Some(port))
            }
            None => (value, None),
        };
        match host.split_once('\\') {
            Some((host, instance)) => {
                self.host = host.to_string();
                self.instance = Some(instance.to_string());
            }
            None => self.host = host.to_string(),
        }
        if let Some(port) = port {
            self.port = port;
        }
        Ok(())
    }
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}

#[allow(clippy::result_large_err)]
fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        other => Err(config_error(format!("invalid boolean '{}'", other))),
    }
}

#[allow(clippy::result_large_err)]
fn parse_seconds(value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| config_error(format!("invalid timeout '{}'", value)))
}
