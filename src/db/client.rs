//! Transactional Postgres client.
//!
//! [`Client`] wraps a shared `sqlx::PgPool` and, inside
//! [`Client::with_tx`], an active transaction. Derived clients are plain
//! values: they share the pool and configuration, carry their own
//! [`Logger`], and start with an empty after-commit queue.
//!
//! ```text
//! root Client ──copy()/with_logger()──▶ request Client
//!                                          │ with_tx(f)
//!                                          ▼
//!                                   tx-bound Client ──after_commit(h)──▶ queue
//!                                          │ commit ok
//!                                          ▼
//!                                   spawn h(detached Client) for each h
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::json;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use super::args::{self, SqlArg};
use super::error::{BoxError, DbError};
use super::query_log::{PendingQuery, QueryLog};
use crate::config::DatabaseConfig;
use crate::logging::Logger;

type TxSlot = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

type AfterCommitHook = Box<dyn FnOnce(Client) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Runs `$body` against the active transaction if there is one, else the pool.
macro_rules! on_executor {
    ($client:expr, $exec:ident => $body:expr) => {
        match &$client.tx {
            Some(slot) => {
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                let $exec = &mut **tx;
                $body.await.map_err(DbError::from)
            }
            None => {
                let $exec = &$client.pool;
                $body.await.map_err(DbError::from)
            }
        }
    };
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

/// Drops a still-open transaction when `with_tx` unwinds or is cancelled.
///
/// Dropping a `sqlx` transaction queues a rollback on its connection before
/// the connection returns to the pool.
struct RollbackGuard {
    slot: TxSlot,
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.try_lock()
            && slot.take().is_some()
        {
            tracing::warn!("transaction abandoned before commit; rolled back");
        }
    }
}

/// Pooled database client with optional transaction binding.
pub struct Client {
    pool: PgPool,
    config: Arc<DatabaseConfig>,
    tx: Option<TxSlot>,
    logger: Logger,
    hooks: Arc<parking_lot::Mutex<Vec<AfterCommitHook>>>,
    last_query: Arc<parking_lot::Mutex<Option<QueryLog>>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("trace_id", &self.logger.trace_id())
            .field("in_transaction", &self.in_transaction())
            .field("pending_hooks", &self.hooks.lock().len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Opens the connection pool described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pool cannot reach the server.
    pub async fn connect(config: DatabaseConfig, logger: Logger) -> Result<Self, DbError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .application_name(&config.app_name);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_idle_connections)
            .max_lifetime(config.conn_max_lifetime)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "database pool established"
        );
        Ok(Self::from_pool(pool, config, logger))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, config: DatabaseConfig, logger: Logger) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            tx: None,
            logger,
            hooks: Arc::new(parking_lot::Mutex::new(Vec::new())),
            last_query: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Applies the embedded migrations in `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if any script fails.
    pub async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))
    }

    /// Closes the shared pool. Call once, on the root client, at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The shared pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The static configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The logger every query of this client is reported through.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Correlation id of this client's logger.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        self.logger.trace_id()
    }

    /// Whether this client is bound to a transaction that is still open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        match &self.tx {
            // A held lock means a statement is running, so the tx is live.
            Some(slot) => slot.try_lock().map_or(true, |tx| tx.is_some()),
            None => false,
        }
    }

    /// The most recent call's record, if any call was made on this client.
    #[must_use]
    pub fn last_query(&self) -> Option<QueryLog> {
        self.last_query.lock().clone()
    }

    /// Shallow clone sharing pool, configuration, transaction binding and
    /// logger, with an empty after-commit queue.
    ///
    /// Hooks registered on a copy are never run by an enclosing
    /// [`Client::with_tx`]; register them on the client passed to the body.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: Arc::clone(&self.config),
            tx: self.tx.clone(),
            logger: self.logger.clone(),
            hooks: Arc::new(parking_lot::Mutex::new(Vec::new())),
            last_query: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// [`Client::copy`] with a different logger.
    #[must_use]
    pub fn with_logger(&self, logger: Logger) -> Self {
        let mut client = self.copy();
        client.logger = logger;
        client
    }

    /// [`Client::copy`] whose logger carries `trace_id`.
    #[must_use]
    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        self.with_logger(self.logger.with_trace_id(trace_id))
    }

    /// Copy bound to the pool only.
    fn detached(&self) -> Self {
        let mut client = self.copy();
        client.tx = None;
        client
    }

    /// Executes a statement that returns no rows.
    ///
    /// Always records a [`QueryLog`], whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on driver failure or timeout.
    pub async fn exec(&self, query: &str, args: &[SqlArg]) -> Result<PgQueryResult, DbError> {
        let pending = PendingQuery::start(self.trace_id(), query, args);
        let result = self
            .bounded(async {
                let arguments = args::encode(args)?;
                on_executor!(self, exec => sqlx::query_with(query, arguments).execute(exec))
            })
            .await;
        self.record(pending, result.as_ref().err());
        result
    }

    /// Fetches every row, mapped into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on driver failure, decode failure or timeout.
    pub async fn query<T>(&self, query: &str, args: &[SqlArg]) -> Result<Vec<T>, DbError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let pending = PendingQuery::start(self.trace_id(), query, args);
        let result = self
            .bounded(async {
                let arguments = args::encode(args)?;
                on_executor!(self, exec => sqlx::query_as_with::<Postgres, T, _>(query, arguments).fetch_all(exec))
            })
            .await;
        self.record(pending, result.as_ref().err());
        result
    }

    /// Fetches exactly one row, mapped into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoRows`] when the query matches nothing, and
    /// [`DbError`] otherwise on failure or timeout.
    pub async fn query_row<T>(&self, query: &str, args: &[SqlArg]) -> Result<T, DbError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let pending = PendingQuery::start(self.trace_id(), query, args);
        let result = self
            .bounded(async {
                let arguments = args::encode(args)?;
                let row: Option<T> = on_executor!(
                    self,
                    exec => sqlx::query_as_with::<Postgres, T, _>(query, arguments).fetch_optional(exec)
                )?;
                row.ok_or(DbError::NoRows)
            })
            .await;
        self.record(pending, result.as_ref().err());
        result
    }

    /// Runs `f` inside a transaction.
    ///
    /// `f` receives a transaction-bound client. If `f` fails the transaction
    /// is rolled back and queued hooks are discarded; if the rollback fails
    /// too, the returned error is a [`DbError::Rollback`] carrying both. If
    /// `f` succeeds the transaction is committed and, only once the commit
    /// has returned, every hook queued with [`Client::after_commit`] is
    /// spawned on its own task. Hook failures are logged, never returned.
    ///
    /// Begin, statements and rollback are bounded by the query timeout;
    /// `COMMIT` is not, since abandoning it midway would leave the outcome
    /// unknown. It is still subject to the connection's own timeouts.
    ///
    /// Calling `with_tx` on a transaction-bound client opens an independent
    /// transaction on another pooled connection.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a [`DbError`] converted into `E` when begin,
    /// commit or rollback fails.
    pub async fn with_tx<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError> + std::error::Error + Send + Sync + 'static,
    {
        let tx = self
            .bounded(async { self.pool.begin().await.map_err(DbError::from) })
            .await?;
        let slot: TxSlot = Arc::new(Mutex::new(Some(tx)));
        let guard = RollbackGuard {
            slot: Arc::clone(&slot),
        };
        let hooks = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut scoped = self.copy();
        scoped.tx = Some(Arc::clone(&slot));
        scoped.hooks = Arc::clone(&hooks);

        let outcome = f(scoped).await;

        match outcome {
            Err(cause) => {
                hooks.lock().clear();
                let rolled_back = self.finish(&slot, Finish::Rollback).await;
                drop(guard);
                match rolled_back {
                    Ok(()) => Err(cause),
                    Err(rollback) => {
                        self.logger.error(
                            "transaction rollback failed",
                            Some(&json!({
                                "error": cause.to_string(),
                                "rollback_error": rollback.to_string(),
                            })),
                        );
                        Err(E::from(DbError::Rollback {
                            cause: Box::new(cause),
                            rollback: rollback.to_string(),
                        }))
                    }
                }
            }
            Ok(value) => {
                let committed = self.finish(&slot, Finish::Commit).await;
                drop(guard);
                if let Err(err) = committed {
                    hooks.lock().clear();
                    return Err(E::from(err));
                }
                let queued = std::mem::take(&mut *hooks.lock());
                self.spawn_hooks(queued);
                Ok(value)
            }
        }
    }

    /// Queues `hook` to run after the enclosing transaction commits.
    ///
    /// Ignored outside a transaction. Hooks start in registration order but
    /// run concurrently, each with a pool-bound copy of this client.
    pub fn after_commit<F, Fut>(&self, hook: F)
    where
        F: FnOnce(Client) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if !self.in_transaction() {
            tracing::debug!(trace_id = %self.trace_id(), "after_commit outside a transaction ignored");
            return;
        }
        self.hooks
            .lock()
            .push(Box::new(move |client: Client| hook(client).boxed()));
    }

    fn spawn_hooks(&self, hooks: Vec<AfterCommitHook>) {
        for hook in hooks {
            let client = self.detached();
            let logger = client.logger.clone();
            drop(tokio::spawn(async move {
                if let Err(err) = run_hook(hook, client).await {
                    logger.error("after-commit hook failed", Some(&json!({ "error": err })));
                }
            }));
        }
    }

    /// Commits or rolls back; a no-op once the slot is empty.
    async fn finish(&self, slot: &TxSlot, how: Finish) -> Result<(), DbError> {
        let Some(tx) = slot.lock().await.take() else {
            return Ok(());
        };
        match how {
            Finish::Commit => tx.commit().await.map_err(DbError::from),
            Finish::Rollback => {
                self.bounded(async { tx.rollback().await.map_err(DbError::from) })
                    .await
            }
        }
    }

    async fn bounded<T, Fut>(&self, fut: Fut) -> Result<T, DbError>
    where
        Fut: Future<Output = Result<T, DbError>>,
    {
        let limit = self.config.query_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(DbError::Timeout(limit)))
    }

    fn record(&self, pending: PendingQuery, error: Option<&DbError>) {
        let log = pending.finish(error.map(ToString::to_string));
        if self.config.logging_enabled {
            let metadata = log.to_metadata(self.logger.redactor());
            match error {
                Some(err) if !err.is_no_rows() => {
                    self.logger.error("query failed", Some(&metadata));
                }
                _ => self.logger.debug("query executed", Some(&metadata)),
            }
        }
        *self.last_query.lock() = Some(log);
    }
}

/// Runs one hook to completion, turning a panic into an error.
async fn run_hook(hook: AfterCommitHook, client: Client) -> Result<(), String> {
    match AssertUnwindSafe(hook(client)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(format!("hook panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::logging::Redactor;
    use std::time::Duration;

    /// A client whose pool points at a closed port: every call fails fast.
    fn unreachable_client() -> Client {
        unreachable_client_with(Duration::from_millis(200), Duration::from_secs(2))
    }

    /// The pool keeps retrying the closed port until `acquire` elapses.
    fn unreachable_client_with(acquire: Duration, query_timeout: Duration) -> Client {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: acquire,
            query_timeout,
            ..DatabaseConfig::default()
        };
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.name);
        let pool = PgPoolOptions::new()
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(options);
        Client::from_pool(pool, config, Logger::new(Redactor::new(["password"])))
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let client = unreachable_client_with(Duration::from_secs(5), Duration::from_millis(50))
            .with_trace_id("trace-slow");
        let result = client.exec("SELECT pg_sleep(1)", &[]).await;
        assert!(matches!(result, Err(DbError::Timeout(limit)) if limit == Duration::from_millis(50)));

        let Some(log) = client.last_query() else {
            panic!("query log must be recorded");
        };
        assert!(log.is_error());
        assert_eq!(log.trace_id, "trace-slow");
        assert!(log.error_message.is_some_and(|m| m.contains("timed out")));

        let tx_result: Result<(), DbError> = client.with_tx(|_tx| async { Ok(()) }).await;
        assert!(matches!(tx_result, Err(DbError::Timeout(_))));
    }

    #[tokio::test]
    async fn hook_failures_and_panics_become_errors() {
        let ok: AfterCommitHook = Box::new(|_c: Client| async { Ok::<(), BoxError>(()) }.boxed());
        assert_eq!(run_hook(ok, unreachable_client()).await, Ok(()));

        let failing: AfterCommitHook = Box::new(|_c: Client| {
            async { Err::<(), BoxError>("mail server down".into()) }.boxed()
        });
        assert_eq!(
            run_hook(failing, unreachable_client()).await,
            Err("mail server down".to_string())
        );

        let panicking: AfterCommitHook = Box::new(|_c: Client| {
            async {
                let reason = "index out of range";
                if !reason.is_empty() {
                    panic!("{reason}");
                }
                Ok::<(), BoxError>(())
            }
            .boxed()
        });
        let Err(message) = run_hook(panicking, unreachable_client()).await else {
            panic!("a panicking hook must be reported");
        };
        assert_eq!(message, "hook panicked: index out of range");
    }

    #[tokio::test]
    async fn failing_exec_still_records_query_log() {
        let client = unreachable_client().with_trace_id("trace-exec");
        let result = client
            .exec("UPDATE users SET name = $1", &crate::args!["x"])
            .await;
        assert!(result.is_err());

        let Some(log) = client.last_query() else {
            panic!("query log must be recorded");
        };
        assert!(log.error_message.as_deref().is_some_and(|m| !m.is_empty()));
        assert!(log.finished_at >= log.started_at);
        assert_eq!(log.trace_id, "trace-exec");
        assert_eq!(log.query, "UPDATE users SET name = $1");
    }

    #[tokio::test]
    async fn only_latest_query_is_kept() {
        let client = unreachable_client();
        let _ = client.exec("SELECT 1", &[]).await;
        let _ = client.query::<(i32,)>("SELECT 2", &[]).await;
        let Some(log) = client.last_query() else {
            panic!("query log must be recorded");
        };
        assert_eq!(log.query, "SELECT 2");
    }

    #[tokio::test]
    async fn with_tx_surfaces_begin_failure() {
        let client = unreachable_client();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result: Result<(), DbError> = client
            .with_tx(|_tx| async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn after_commit_outside_transaction_is_ignored() {
        let client = unreachable_client();
        client.after_commit(|_c| async { Ok::<(), BoxError>(()) });
        assert_eq!(client.hooks.lock().len(), 0);
    }

    #[tokio::test]
    async fn copy_shares_identity_but_not_hooks() {
        let client = unreachable_client().with_trace_id("t-1");
        client
            .hooks
            .lock()
            .push(Box::new(|_c: Client| async { Ok::<(), BoxError>(()) }.boxed()));

        let copy = client.copy();
        assert_eq!(copy.trace_id(), "t-1");
        assert_eq!(copy.hooks.lock().len(), 0);
        assert_eq!(client.hooks.lock().len(), 1);
        assert!(copy.last_query().is_none());

        let relabelled = client.with_trace_id("t-2");
        assert_eq!(relabelled.trace_id(), "t-2");
        assert_eq!(client.trace_id(), "t-1");
    }

    #[tokio::test]
    async fn finished_transaction_is_a_noop_to_finish_again() {
        let client = unreachable_client();
        let slot: TxSlot = Arc::new(Mutex::new(None));
        assert!(client.finish(&slot, Finish::Commit).await.is_ok());
        assert!(client.finish(&slot, Finish::Rollback).await.is_ok());
    }

    #[tokio::test]
    async fn statements_on_a_finished_transaction_fail_cleanly() {
        let mut client = unreachable_client();
        client.tx = Some(Arc::new(Mutex::new(None)));
        assert!(!client.in_transaction());
        let result = client.exec("SELECT 1", &[]).await;
        assert!(matches!(result, Err(DbError::TransactionClosed)));
        assert!(client.last_query().is_some_and(|l| l.is_error()));

        client.after_commit(|_c| async { Ok::<(), BoxError>(()) });
        assert_eq!(client.hooks.lock().len(), 0);
    }
}
