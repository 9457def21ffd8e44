//! Database initialization.
//!
//! The playback core owns its sqlite schema: queue snapshots, song rows,
//! per-track format metadata, playback events and a settings key/value
//! table.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::error::Result;

/// Open (creating if needed) the database at `path` and ensure the schema.
pub async fn connect(path: &str) -> Result<Pool<Sqlite>> {
    let options: SqliteConnectOptions = path.parse::<SqliteConnectOptions>()?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests. A single connection keeps every query on
/// the same memory store.
pub async fn memory() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables if they do not exist yet.
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'primary',
            parent_id TEXT,
            tracks TEXT NOT NULL,
            shuffled INTEGER NOT NULL DEFAULT 0,
            queue_pos INTEGER NOT NULL DEFAULT 0,
            sort_index INTEGER NOT NULL DEFAULT 0,
            playlist_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS song (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            artists TEXT NOT NULL DEFAULT '[]',
            album TEXT,
            duration_secs INTEGER NOT NULL DEFAULT -1,
            is_local INTEGER NOT NULL DEFAULT 0,
            liked INTEGER NOT NULL DEFAULT 0,
            in_library INTEGER NOT NULL DEFAULT 0,
            play_count INTEGER NOT NULL DEFAULT 0,
            total_play_time_ms INTEGER NOT NULL DEFAULT 0,
            downloaded_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS format (
            id TEXT PRIMARY KEY,
            itag INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            codecs TEXT NOT NULL,
            bitrate INTEGER NOT NULL,
            sample_rate INTEGER,
            content_length INTEGER NOT NULL,
            loudness_db REAL,
            playback_tracking_url TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playback_event (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            song_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            play_time_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["format", "playback_event", "queue", "settings", "song"] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }
}
