// db/mod.rs - The Store: durable SQLite cache with SQLx integration

pub mod content;
pub mod issues;
pub mod projects;
pub mod schema;
pub mod time;
pub mod workspace;

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::Result;

/// The cache database.
///
/// Owns the connection pool exclusively; the sync worker and repository hold
/// non-owning references and reach rows only through the typed operations on
/// this type. WAL mode lets refresh tasks read while the worker writes.
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the cache database at `path`.
    ///
    /// The only self-healing case: when the existing file's schema no longer
    /// matches the code (a probe fails with "no such column" or similar), the
    /// database file and its WAL/SHM side cars are deleted and provisioning
    /// runs once more against a fresh file. Everything resyncs afterwards.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::try_open(path).await {
            Ok(store) => Ok(store),
            Err(e) if e.is_schema_mismatch() => {
                tracing::warn!("Cache schema out of date ({}), recreating database", e);
                Self::remove_database_files(path)?;
                Self::try_open(path).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // Write-Ahead Logging for concurrent readers during sync writes
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        if let Err(e) = Self::provision(&pool).await {
            pool.close().await;
            return Err(e);
        }

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    async fn provision(pool: &SqlitePool) -> Result<()> {
        schema::init(pool).await?;
        schema::probe(pool).await
    }

    /// Delete the database file and its `-wal`/`-shm` side cars.
    fn remove_database_files(path: &Path) -> Result<()> {
        let mut name = path.as_os_str().to_os_string();
        for suffix in ["", "-wal", "-shm"] {
            name.push(suffix);
            let file = PathBuf::from(&name);
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
            name = path.as_os_str().to_os_string();
        }
        Ok(())
    }

    /// Path this store was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute a health check query
    pub async fn health_check(&self) -> Result<bool> {
        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(result.0 == 1)
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`
    /// (or on drop, if the task unwinds mid-scope).
    pub async fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut sqlx::SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// Close the pool. Outstanding query results stay valid; they are owned
    /// values.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
