use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn init() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    connect(&database_url).await
}

/// Connection settings shared by the server, the CLI and the tests: foreign keys enforced
/// (grant rows cascade with their referents), WAL so readers never block the writer, and a
/// busy timeout so queued writers wait instead of failing.
pub fn tune(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Opens a pool and runs the embedded migrations.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?;

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(tune(options))
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

/// A write transaction opened with `BEGIN IMMEDIATE`.
///
/// SQLite will not upgrade a deferred transaction from reading to writing while another
/// connection writes, and it fails that upgrade at once instead of waiting out the busy
/// timeout. Taking the write lock at `BEGIN` makes writers queue on the timeout. Dropping the
/// transaction without [`WriteTx::commit`] rolls it back before the connection is reused.
pub struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn conn(&mut self) -> Result<&mut SqliteConnection, sqlx::Error> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| sqlx::Error::Protocol("write transaction already finished".into()))
    }

    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(err) => {
                rollback_in_background(conn);
                Err(err)
            }
        }
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            rollback_in_background(conn);
        }
    }
}

fn rollback_in_background(mut conn: PoolConnection<Sqlite>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(error = %err, "rollback failed; discarding connection");
                    drop(conn.detach());
                }
            });
        }
        // Closing the connection rolls the transaction back.
        Err(_) => drop(conn.detach()),
    }
}
