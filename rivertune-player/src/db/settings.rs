//! Settings key/value store: last playback position, repeat mode, volume.

use rivertune_common::events::RepeatMode;
use sqlx::{Pool, Sqlite};

use crate::error::Result;

const LAST_POSITION_MS: &str = "last_position_ms";
const REPEAT_MODE: &str = "repeat_mode";
const PLAYER_VOLUME: &str = "player_volume";

pub async fn get_setting(pool: &Pool<Sqlite>, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0))
}

pub async fn set_setting(pool: &Pool<Sqlite>, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_setting(pool: &Pool<Sqlite>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

/// Last playback position saved at shutdown, if any.
pub async fn last_position_ms(pool: &Pool<Sqlite>) -> Result<Option<u64>> {
    Ok(get_setting(pool, LAST_POSITION_MS)
        .await?
        .and_then(|v| v.parse().ok()))
}

pub async fn set_last_position_ms(pool: &Pool<Sqlite>, position_ms: u64) -> Result<()> {
    set_setting(pool, LAST_POSITION_MS, &position_ms.to_string()).await
}

/// Consumed once on restore so a stale position is never reused.
pub async fn clear_last_position(pool: &Pool<Sqlite>) -> Result<()> {
    delete_setting(pool, LAST_POSITION_MS).await
}

pub async fn repeat_mode(pool: &Pool<Sqlite>) -> Result<RepeatMode> {
    Ok(get_setting(pool, REPEAT_MODE)
        .await?
        .and_then(|v| v.parse::<i64>().ok())
        .map(RepeatMode::from_i64)
        .unwrap_or_default())
}

pub async fn set_repeat_mode(pool: &Pool<Sqlite>, mode: RepeatMode) -> Result<()> {
    set_setting(pool, REPEAT_MODE, &mode.as_i64().to_string()).await
}

/// Player volume in [0.0, 1.0]; defaults to full volume.
pub async fn player_volume(pool: &Pool<Sqlite>) -> Result<f32> {
    Ok(get_setting(pool, PLAYER_VOLUME)
        .await?
        .and_then(|v| v.parse::<f32>().ok())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(1.0))
}

pub async fn set_player_volume(pool: &Pool<Sqlite>, volume: f32) -> Result<()> {
    set_setting(pool, PLAYER_VOLUME, &volume.clamp(0.0, 1.0).to_string()).await
}
