use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

pub type DbPool = Pool<Sqlite>;

/// Initialize the metrics database with WAL mode for concurrent access
pub async fn init_database(database_path: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
#[cfg(test)]
pub async fn init_test_database() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create database schema
async fn create_schema(pool: &DbPool) -> Result<()> {
    // Insert-only metric history; rows are never updated or deleted here
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exchange_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange TEXT NOT NULL,
            pair TEXT NOT NULL,
            current_price REAL NOT NULL,
            last_vol_24h REAL NOT NULL,
            mm_depth_plus_2 REAL NOT NULL DEFAULT 0,
            mm_depth_minus_2 REAL NOT NULL DEFAULT 0,
            organic_depth_plus_2 REAL NOT NULL DEFAULT 0,
            organic_depth_minus_2 REAL NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metrics_exchange_pair
         ON exchange_metrics(exchange, pair)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metrics_created_at
         ON exchange_metrics(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
