//! Connection (component F): owns the live database handle, runs statements,
//! manages transactions and pretend mode, and feeds query counters.
//!
//! Generic over [`DbClient`] so the grammar/query-builder/migrator/model
//! layers above never talk to a concrete driver. One concrete adapter ships
//! — [`PostgresDbClient`] — the rest type-check against the same trait with
//! [`PretendDbClient`] standing in where a driver isn't wired (see
//! [`client`] module docs).

pub mod client;
pub mod config;

pub use client::{DbClient, PostgresDbClient, PretendDbClient};
pub use config::{load_toml_connections, CommonConfig, ConfigValue, ConnectionConfig, RawConfig};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{OrmError, OrmResult};
use crate::ident::Dialect;
use crate::value::Value;

/// One `(sql, bindings)` pair captured in pretend mode, or logged for
/// inspection.
#[derive(Debug, Clone)]
pub struct LoggedQuery {
    pub sql: String,
    pub bindings: Vec<String>,
    pub elapsed: Duration,
}

/// Rows returned by `select`; kept as the driver's native row type so
/// callers can still map them with [`crate::row::FromRow`].
pub type Row = tokio_postgres::Row;

struct Counters {
    queries_run: AtomicU64,
    total_elapsed: Mutex<Duration>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            queries_run: AtomicU64::new(0),
            total_elapsed: Mutex::new(Duration::ZERO),
        }
    }
}

/// A reconnect callback: given the connection's name, produces a fresh
/// `DbClient`. Installed via [`Connection::set_reconnector`] by the
/// connection manager.
pub type Reconnector = Arc<dyn Fn(&str) -> OrmResult<Arc<dyn DbClient>> + Send + Sync>;

enum Mode {
    Live(Arc<dyn DbClient>),
    /// Captures statements instead of running them; installed by `pretend`.
    Pretend(Mutex<Vec<LoggedQuery>>),
}

/// Owns one database handle plus everything `select`/`insert`/transactions/
/// pretend mode need. Cheap to clone (`Arc`-backed); the manager hands out
/// clones from its cache.
pub struct Connection {
    name: String,
    dialect: Dialect,
    prefix: String,
    timezone: Option<String>,
    mode: Mutex<Mode>,
    transaction_level: Mutex<u32>,
    reconnector: Mutex<Option<Reconnector>>,
    counters: Counters,
}

impl Connection {
    pub fn new(name: impl Into<String>, dialect: Dialect, client: Arc<dyn DbClient>) -> Self {
        Self {
            name: name.into(),
            dialect,
            prefix: String::new(),
            timezone: None,
            mode: Mutex::new(Mode::Live(client)),
            transaction_level: Mutex::new(0),
            reconnector: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The configured display zone (`qt_timezone`), if any. Driver session
    /// timezone is a separate, driver-level concern; this is the zone
    /// result rows are normalized *into* on the way out, per §4.4.
    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub async fn set_reconnector(&self, f: Reconnector) {
        *self.reconnector.lock().await = Some(f);
    }

    pub fn queries_run(&self) -> u64 {
        self.counters.queries_run.load(Ordering::Relaxed)
    }

    pub async fn total_elapsed(&self) -> Duration {
        *self.counters.total_elapsed.lock().await
    }

    pub async fn in_transaction(&self) -> bool {
        *self.transaction_level.lock().await > 0
    }

    /// Captures `(sql, bindings)` pairs from every statement method for the
    /// duration of `f` instead of touching the database; returns what was
    /// captured. Used by the migrator's pretend mode and by tests.
    pub async fn pretend<F, Fut, T>(&self, f: F) -> OrmResult<Vec<LoggedQuery>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = OrmResult<T>>,
    {
        let live = {
            let mut mode = self.mode.lock().await;
            std::mem::replace(&mut *mode, Mode::Pretend(Mutex::new(Vec::new())))
        };
        let result = f().await;
        let mut mode = self.mode.lock().await;
        let captured = match std::mem::replace(&mut *mode, live) {
            Mode::Pretend(log) => log.into_inner(),
            Mode::Live(_) => Vec::new(),
        };
        result?;
        Ok(captured)
    }

    fn non_raw_bindings(bindings: &[Value]) -> Vec<&Value> {
        bindings.iter().filter(|v| !v.is_raw()).collect()
    }

    fn bound_refs<'a>(bindings: &'a [&'a Value]) -> Vec<&'a (dyn tokio_postgres::types::ToSql + Sync)> {
        bindings
            .iter()
            .filter_map(|v| match v {
                Value::Bound(b) => Some(b.as_ref()),
                Value::Raw(_) => None,
            })
            .collect()
    }

    async fn record(&self, sql: &str, bindings: &[Value], elapsed: Duration) {
        self.counters.queries_run.fetch_add(1, Ordering::Relaxed);
        *self.counters.total_elapsed.lock().await += elapsed;
        let _ = (sql, bindings);
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "ironorm::connection", sql, elapsed_ms = elapsed.as_millis() as u64, "query");
    }

    /// Core statement runner shared by `select`/`insert`/`update`/`remove`/
    /// `statement`/`unprepared`. Filters raw bindings before handing the
    /// list to the driver, retries once on a lost-connection classification
    /// outside a transaction, and records counters.
    async fn run_query(&self, sql: &str, bindings: &[Value]) -> OrmResult<Vec<Row>> {
        let started = Instant::now();
        let owned: Vec<&Value> = Self::non_raw_bindings(bindings);
        let params = Self::bound_refs(&owned);

        let mode = self.mode.lock().await;
        match &*mode {
            Mode::Pretend(log) => {
                log.lock().await.push(LoggedQuery {
                    sql: sql.to_string(),
                    bindings: owned.iter().map(|_| "?".to_string()).collect(),
                    elapsed: Duration::ZERO,
                });
                Ok(Vec::new())
            }
            Mode::Live(client) => {
                let client = client.clone();
                drop(mode);
                let result = client.query_raw(sql, &params).await;
                let result = match result {
                    Err(e) if e.is_lost_connection() && !self.in_transaction().await => {
                        self.attempt_reconnect().await?;
                        let mode = self.mode.lock().await;
                        if let Mode::Live(client) = &*mode {
                            client.query_raw(sql, &params).await
                        } else {
                            Err(e)
                        }
                    }
                    other => other,
                };
                self.record(sql, bindings, started.elapsed()).await;
                result
            }
        }
    }

    async fn run_execute(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        let started = Instant::now();
        let owned: Vec<&Value> = Self::non_raw_bindings(bindings);
        let params = Self::bound_refs(&owned);

        let mode = self.mode.lock().await;
        match &*mode {
            Mode::Pretend(log) => {
                log.lock().await.push(LoggedQuery {
                    sql: sql.to_string(),
                    bindings: owned.iter().map(|_| "?".to_string()).collect(),
                    elapsed: Duration::ZERO,
                });
                Ok(0)
            }
            Mode::Live(client) => {
                let client = client.clone();
                drop(mode);
                let result = client.execute_raw(sql, &params).await;
                let result = match result {
                    Err(e) if e.is_lost_connection() && !self.in_transaction().await => {
                        self.attempt_reconnect().await?;
                        let mode = self.mode.lock().await;
                        if let Mode::Live(client) = &*mode {
                            client.execute_raw(sql, &params).await
                        } else {
                            Err(e)
                        }
                    }
                    other => other,
                };
                self.record(sql, bindings, started.elapsed()).await;
                result
            }
        }
    }

    async fn attempt_reconnect(&self) -> OrmResult<()> {
        let reconnector = self.reconnector.lock().await.clone();
        let Some(reconnector) = reconnector else {
            return Err(OrmError::LostConnection(format!(
                "connection `{}` lost and no reconnector is installed",
                self.name
            )));
        };
        let fresh = reconnector(&self.name)?;
        *self.mode.lock().await = Mode::Live(fresh);
        Ok(())
    }

    /// Runs a SELECT and returns all matching rows.
    pub async fn select(&self, sql: &str, bindings: &[Value]) -> OrmResult<Vec<Row>> {
        self.run_query(sql, bindings).await
    }

    /// Runs a SELECT and returns the first row, if any.
    pub async fn select_one(&self, sql: &str, bindings: &[Value]) -> OrmResult<Option<Row>> {
        Ok(self.run_query(sql, bindings).await?.into_iter().next())
    }

    /// Runs an INSERT and returns the affected row count.
    pub async fn insert(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        self.run_execute(sql, bindings).await
    }

    /// Runs an UPDATE and returns the affected row count.
    pub async fn update(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        self.run_execute(sql, bindings).await
    }

    /// Runs a DELETE and returns the affected row count.
    pub async fn remove(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        self.run_execute(sql, bindings).await
    }

    /// Runs an arbitrary DDL/DML statement, ignoring the affected count.
    pub async fn statement(&self, sql: &str, bindings: &[Value]) -> OrmResult<()> {
        self.run_execute(sql, bindings).await.map(|_| ())
    }

    /// Runs a statement outside the prepared-statement cache (DDL that some
    /// drivers refuse to prepare, e.g. multi-statement migrations).
    pub async fn unprepared(&self, sql: &str) -> OrmResult<()> {
        self.run_execute(sql, &[]).await.map(|_| ())
    }

    /// Begins a transaction, or — if one is already open — opens a named
    /// savepoint. Returns the new nesting level.
    pub async fn begin_transaction(&self) -> OrmResult<u32> {
        let mut level = self.transaction_level.lock().await;
        if *level == 0 {
            self.statement("begin", &[]).await?;
        } else {
            self.statement(&format!("savepoint SAVEPOINT_{}", *level), &[])
                .await?;
        }
        *level += 1;
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "ironorm::connection", name = %self.name, level = *level, "begin_transaction");
        Ok(*level)
    }

    /// Commits at level 1; at a deeper level, simply decrements (savepoints
    /// coalesce into the outer transaction rather than each issuing their
    /// own commit).
    pub async fn commit(&self) -> OrmResult<()> {
        let mut level = self.transaction_level.lock().await;
        if *level == 0 {
            return Err(OrmError::Transaction("no transaction is open".into()));
        }
        if *level == 1 {
            drop(level);
            self.statement("commit", &[]).await?;
            *self.transaction_level.lock().await = 0;
        } else {
            *level -= 1;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "ironorm::connection", name = %self.name, "commit");
        Ok(())
    }

    /// Rolls back to `to_level` (defaulting to the outermost level, i.e.
    /// full rollback). A level above 0 issues `ROLLBACK TO SAVEPOINT_n`.
    pub async fn roll_back(&self, to_level: Option<u32>) -> OrmResult<()> {
        let mut level = self.transaction_level.lock().await;
        if *level == 0 {
            return Err(OrmError::Transaction("no transaction is open".into()));
        }
        let target = to_level.unwrap_or(0);
        if target == 0 {
            drop(level);
            self.statement("rollback", &[]).await?;
            *self.transaction_level.lock().await = 0;
        } else {
            drop(level);
            self.statement(&format!("rollback to savepoint SAVEPOINT_{}", target), &[])
                .await?;
            *self.transaction_level.lock().await = target;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "ironorm::connection", name = %self.name, to_level = target, "roll_back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pretend_connection() -> Connection {
        Connection::new("default", Dialect::Pgsql, Arc::new(PretendDbClient))
    }

    #[tokio::test]
    async fn pretend_captures_statements_without_running_them() {
        let conn = pretend_connection();
        let captured = conn
            .pretend(|| async {
                conn.select("select * from t where id = ?", &[Value::bound(1_i64)])
                    .await?;
                conn.insert("insert into t (a) values (?)", &[Value::bound(2_i64)])
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(conn.queries_run(), 0);
    }

    #[tokio::test]
    async fn transaction_levels_track_nesting() {
        let conn = pretend_connection();
        assert_eq!(conn.begin_transaction().await.unwrap(), 1);
        assert_eq!(conn.begin_transaction().await.unwrap(), 2);
        conn.commit().await.unwrap();
        assert!(conn.in_transaction().await);
        conn.commit().await.unwrap();
        assert!(!conn.in_transaction().await);
    }

    #[tokio::test]
    async fn rollback_without_transaction_errors() {
        let conn = pretend_connection();
        let err = conn.roll_back(None).await.unwrap_err();
        assert!(matches!(err, OrmError::Transaction(_)));
    }
}
