use std::path::Path;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{PlanoraError, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;";

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Shared handle over the SQLite pool. Cloning is cheap; every store holds one.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        tracing::info!(sqlite_path, "Opened planora database");
        Ok(Self { pool })
    }

    pub async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        apply_pragmas_async(&mut conn).await?;
        Ok(conn)
    }

    /// Round-trips `SELECT 1` through the pool.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel_async::RunQueryDsl::execute(diesel::sql_query("SELECT 1"), &mut conn)
            .await
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        Ok(())
    }
}

pub fn open_connection_sync(database_url: &str) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
    diesel::connection::SimpleConnection::batch_execute(&mut conn, CONNECTION_PRAGMAS)
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
    Ok(conn)
}

async fn apply_pragmas_async(conn: &mut SqliteAsyncConn) -> Result<()> {
    diesel_async::RunQueryDsl::execute(diesel::sql_query("PRAGMA busy_timeout = 5000"), conn)
        .await
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
    diesel_async::RunQueryDsl::execute(diesel::sql_query("PRAGMA foreign_keys = ON"), conn)
        .await
        .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
    Ok(())
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        }
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = open_connection_sync(&database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        Ok::<_, PlanoraError>(())
    })
    .await
    .map_err(|e| PlanoraError::Runtime(e.to_string()))??;
    Ok(())
}
