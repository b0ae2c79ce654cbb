use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS reservations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        phone TEXT NOT NULL,
        reservation_date TEXT NOT NULL,
        service_type TEXT NOT NULL,
        additional_info TEXT,
        created_at TEXT NOT NULL,
        reminder_sent INTEGER NOT NULL DEFAULT 0,
        send_reminder INTEGER NOT NULL DEFAULT 1
    )
    "#,
    // one booking per (instant, service); the insert itself fails on a race
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS reservations_slot
        ON reservations (reservation_date, service_type)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admin (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS photos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        caption TEXT,
        photo_url TEXT NOT NULL,
        photo_type TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
];

pub async fn get_db_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Scheduled tasks can run before the schema exists on a cold start.
pub fn is_missing_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("no such table"),
        _ => false,
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool_without_schema() -> SqlitePool {
    // a single connection that never recycles keeps the in-memory db alive
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = memory_pool_without_schema().await;
    init_schema(&pool).await.expect("schema");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = memory_pool().await;
        init_schema(&pool).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        assert!(names.contains(&"reservations".to_string()));
        assert!(names.contains(&"admin".to_string()));
        assert!(names.contains(&"photos".to_string()));
    }

    #[tokio::test]
    async fn missing_table_is_recognised() {
        let pool = memory_pool_without_schema().await;
        let Err(err) = sqlx::query("SELECT id FROM reservations").fetch_all(&pool).await else {
            panic!("reservations should not exist before the schema");
        };
        assert!(is_missing_table(&err));
        assert!(!is_unique_violation(&err));
    }
}
