//! Node Store backed by SQLx
//!
//! Provides a single store type that works with SQLite and PostgreSQL using
//! runtime dispatch based on the connection URL.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::AnyPool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::node::{Node, NodeId};
use crate::queries;
use crate::transaction::NodeTx;

/// Boxed future returned by [`NodeStore::transaction`] bodies.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pool size used when the configuration does not say otherwise.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// A write statement as the first statement upgrades SQLite's deferred BEGIN
// to a write transaction before any snapshot is taken, like BEGIN IMMEDIATE.
#[cfg(feature = "sqlite")]
const CLAIM_SQLITE_WRITER: &str =
    "UPDATE filesystem_writer SET generation = generation + 1 WHERE id = 1";

/// Advisory lock key held by every PostgreSQL write transaction.
#[cfg(feature = "postgres")]
const POSTGRES_WRITER_LOCK: i64 = 0x5349_4d46_5300;

/// Split a migration script into executable statements.
///
/// `--` comments are dropped and the rest is split on `;`. Statements are
/// sent one at a time because the `Any` driver runs a single statement per
/// call.
fn migration_statements(script: &str) -> Vec<String> {
    let stripped: String = script
        .lines()
        .map(|line| line.split("--").next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");
    stripped
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration for the Node Store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// SQLite: file path or ":memory:"
    #[cfg(feature = "sqlite")]
    Sqlite(String),

    /// PostgreSQL: connection URL
    #[cfg(feature = "postgres")]
    Postgres(String),
}

impl StoreConfig {
    /// Pick a backend from a database URL.
    ///
    /// `postgres://` and `postgresql://` select PostgreSQL. `sqlite:` URLs,
    /// `:memory:` and bare paths select SQLite.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StoreError::Config("empty database URL".to_string()));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::postgres_url(url)
        } else {
            Self::sqlite_url(url)
        }
    }

    #[cfg(feature = "postgres")]
    fn postgres_url(url: &str) -> StoreResult<Self> {
        Ok(StoreConfig::Postgres(url.to_string()))
    }

    #[cfg(not(feature = "postgres"))]
    fn postgres_url(url: &str) -> StoreResult<Self> {
        Err(StoreError::Config(format!(
            "{url:?} needs the `postgres` feature"
        )))
    }

    #[cfg(feature = "sqlite")]
    fn sqlite_url(url: &str) -> StoreResult<Self> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() {
            return Err(StoreError::Config(format!("no SQLite path in {url:?}")));
        }
        Ok(StoreConfig::Sqlite(path.to_string()))
    }

    #[cfg(not(feature = "sqlite"))]
    fn sqlite_url(url: &str) -> StoreResult<Self> {
        Err(StoreError::Config(format!("unsupported database URL {url:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendType {
    #[cfg(feature = "sqlite")]
    Sqlite,
    #[cfg(feature = "postgres")]
    Postgres,
}

/// Durable node storage.
///
/// Cloning is cheap; clones share the pool and the writer lock. Write
/// transactions are serialized, within the process by the lock and across
/// processes by the database, so that check-then-write sequences (existence
/// checks, the move cycle guard) observe a state no concurrent writer can
/// invalidate before commit.
#[derive(Clone)]
pub struct NodeStore {
    pool: AnyPool,
    backend_type: BackendType,
    writer: Arc<Mutex<()>>,
}

impl NodeStore {
    /// Connect, then run migrations.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use simfs::{NodeStore, StoreConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let store = NodeStore::new(StoreConfig::Sqlite("fs.db".into())).await?;
    ///     let root = store.find_root().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        Self::connect(config, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect(config: StoreConfig, max_connections: u32) -> StoreResult<Self> {
        install_default_drivers();

        let (url, backend_type, is_memory) = match config {
            #[cfg(feature = "sqlite")]
            StoreConfig::Sqlite(path) => {
                let is_memory = path == ":memory:";
                let url = if is_memory {
                    // Private in-memory database; lives as long as its one connection
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite:{}?mode=rwc", path)
                };
                (url, BackendType::Sqlite, is_memory)
            }
            #[cfg(feature = "postgres")]
            StoreConfig::Postgres(url) => (url, BackendType::Postgres, false),
        };

        let pool = if is_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(&url)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?
        } else {
            AnyPoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect(&url)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?
        };

        let store = Self {
            pool,
            backend_type,
            writer: Arc::new(Mutex::new(())),
        };

        store.migrate(is_memory).await?;
        info!(backend = ?store.backend_type, "node store ready");

        Ok(store)
    }

    /// Convenience constructor for SQLite
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(path: impl Into<String>) -> StoreResult<Self> {
        Self::new(StoreConfig::Sqlite(path.into())).await
    }

    /// Private in-memory SQLite store, mostly for tests.
    #[cfg(feature = "sqlite")]
    pub async fn in_memory() -> StoreResult<Self> {
        Self::sqlite(":memory:").await
    }

    /// Convenience constructor for PostgreSQL
    #[cfg(feature = "postgres")]
    pub async fn postgres(url: impl Into<String>) -> StoreResult<Self> {
        Self::new(StoreConfig::Postgres(url.into())).await
    }

    /// Run database migrations
    async fn migrate(&self, is_memory: bool) -> StoreResult<()> {
        let sql = match self.backend_type {
            #[cfg(feature = "sqlite")]
            BackendType::Sqlite => include_str!("../migrations/sqlite.sql"),
            #[cfg(feature = "postgres")]
            BackendType::Postgres => include_str!("../migrations/postgres.sql"),
        };

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        #[cfg(feature = "sqlite")]
        if self.backend_type == BackendType::Sqlite && !is_memory {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Migration(format!("journal_mode: {e}")))?;
        }
        #[cfg(not(feature = "sqlite"))]
        let _ = is_memory;

        let mut executed = 0;
        for statement in migration_statements(sql) {
            sqlx::query(&statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Migration(format!("{e}\n{statement}")))?;
            executed += 1;
        }

        info!(statements = executed, "schema migrations applied");
        Ok(())
    }

    /// Open a write transaction.
    ///
    /// Waits for any other writer to finish first, in this process and in
    /// any other process sharing the database. The database-level lock is
    /// taken before the first read, so everything the transaction reads
    /// already includes the previous writer's commit.
    pub async fn begin(&self) -> StoreResult<NodeTx> {
        let guard = self.writer.clone().lock_owned().await;
        let mut tx = self.pool.begin().await?;
        match self.backend_type {
            #[cfg(feature = "sqlite")]
            BackendType::Sqlite => {
                sqlx::query(CLAIM_SQLITE_WRITER).execute(&mut *tx).await?;
            }
            #[cfg(feature = "postgres")]
            BackendType::Postgres => {
                // Select a constant so the Any driver never sees the void result
                sqlx::query("SELECT 1 AS locked FROM pg_advisory_xact_lock($1)")
                    .bind(POSTGRES_WRITER_LOCK)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        debug!("write transaction started");
        Ok(NodeTx::new(tx, Some(guard)))
    }

    /// Open a read transaction. Several readers may run at once.
    pub async fn begin_read(&self) -> StoreResult<NodeTx> {
        let tx = self.pool.begin().await?;
        Ok(NodeTx::new(tx, None))
    }

    /// Run `body` inside a write transaction.
    ///
    /// Commits when `body` returns `Ok` and rolls back when it returns `Err`.
    ///
    /// ```ignore
    /// let node = store
    ///     .transaction(move |tx| Box::pin(async move {
    ///         let root = tx.find_root().await?;
    ///         Ok::<_, StoreError>(root)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut NodeTx) -> BoxFuture<'t, Result<T, E>>,
        E: From<StoreError>,
    {
        let mut tx = self.begin().await?;
        match body(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    pub async fn find_by_id(&self, id: NodeId) -> StoreResult<Option<Node>> {
        let mut conn = self.pool.acquire().await?;
        queries::find_by_id(&mut conn, id).await
    }

    pub async fn find_root(&self) -> StoreResult<Option<Node>> {
        let mut conn = self.pool.acquire().await?;
        queries::find_root(&mut conn).await
    }

    pub async fn find_by_parent_and_name(
        &self,
        parent_id: NodeId,
        name: &str,
    ) -> StoreResult<Option<Node>> {
        let mut conn = self.pool.acquire().await?;
        queries::find_by_parent_and_name(&mut conn, parent_id, name).await
    }

    pub async fn find_children(&self, parent_id: NodeId) -> StoreResult<Vec<Node>> {
        let mut conn = self.pool.acquire().await?;
        queries::find_children(&mut conn, parent_id).await
    }

    pub async fn exists(&self, parent_id: Option<NodeId>, name: &str) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        queries::exists(&mut conn, parent_id, name).await
    }

    pub async fn is_descendant(&self, ancestor: NodeId, candidate: NodeId) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        queries::is_descendant(&mut conn, ancestor, candidate).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
