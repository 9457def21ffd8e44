//! Song rows: library/like flags, play accounting, download stamps.

use chrono::{DateTime, Utc};
use rivertune_common::model::TrackMetadata;
use sqlx::{Pool, Sqlite};

use crate::error::Result;

/// A persisted song row.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_secs: i64,
    pub is_local: bool,
    pub liked: bool,
    pub in_library: bool,
    pub play_count: i64,
    pub total_play_time_ms: i64,
    pub downloaded_at: Option<DateTime<Utc>>,
}

type SongTuple = (
    String,
    String,
    String,
    Option<String>,
    i64,
    bool,
    bool,
    bool,
    i64,
    i64,
    Option<String>,
);

fn row_from_tuple(t: SongTuple) -> SongRow {
    SongRow {
        id: t.0,
        title: t.1,
        artists: serde_json::from_str(&t.2).unwrap_or_default(),
        album: t.3,
        duration_secs: t.4,
        is_local: t.5,
        liked: t.6,
        in_library: t.7,
        play_count: t.8,
        total_play_time_ms: t.9,
        downloaded_at: t
            .10
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// Fetch a song row by id.
pub async fn song(pool: &Pool<Sqlite>, id: &str) -> Result<Option<SongRow>> {
    let row: Option<SongTuple> = sqlx::query_as(
        r#"
        SELECT id, title, artists, album, duration_secs, is_local, liked, in_library,
               play_count, total_play_time_ms, downloaded_at
        FROM song
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_from_tuple))
}

/// Insert the song if missing; an existing row only gains a duration when
/// it had none. Counters and flags are never touched.
pub async fn upsert_track(pool: &Pool<Sqlite>, track: &TrackMetadata) -> Result<()> {
    let artists = serde_json::to_string(&track.artists)?;
    sqlx::query(
        r#"
        INSERT INTO song (id, title, artists, album, duration_secs, is_local)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            duration_secs = CASE
                WHEN song.duration_secs < 0 THEN excluded.duration_secs
                ELSE song.duration_secs
            END
        "#,
    )
    .bind(&track.id)
    .bind(&track.title)
    .bind(artists)
    .bind(&track.album)
    .bind(track.duration_secs)
    .bind(track.is_local)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flip the liked flag. Returns the new state, or None when the song is
/// unknown.
pub async fn toggle_liked(pool: &Pool<Sqlite>, id: &str) -> Result<Option<bool>> {
    let updated = sqlx::query("UPDATE song SET liked = NOT liked WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(None);
    }
    let (liked,): (bool,) = sqlx::query_as("SELECT liked FROM song WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(Some(liked))
}

/// Flip the in-library flag. Returns the new state, or None when the song
/// is unknown.
pub async fn toggle_library(pool: &Pool<Sqlite>, id: &str) -> Result<Option<bool>> {
    let updated = sqlx::query("UPDATE song SET in_library = NOT in_library WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(None);
    }
    let (in_library,): (bool,) = sqlx::query_as("SELECT in_library FROM song WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(Some(in_library))
}

pub async fn increment_play_count(pool: &Pool<Sqlite>, id: &str) -> Result<()> {
    sqlx::query("UPDATE song SET play_count = play_count + 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn increment_total_play_time(pool: &Pool<Sqlite>, id: &str, ms: i64) -> Result<()> {
    sqlx::query("UPDATE song SET total_play_time_ms = total_play_time_ms + ? WHERE id = ?")
        .bind(ms)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record one qualifying play.
pub async fn insert_playback_event(
    pool: &Pool<Sqlite>,
    id: &str,
    timestamp: DateTime<Utc>,
    play_time_ms: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO playback_event (song_id, timestamp, play_time_ms) VALUES (?, ?, ?)")
        .bind(id)
        .bind(timestamp.to_rfc3339())
        .bind(play_time_ms)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stamp (or clear) the download-completed time.
pub async fn update_download_status(
    pool: &Pool<Sqlite>,
    id: &str,
    downloaded_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE song SET downloaded_at = ? WHERE id = ?")
        .bind(downloaded_at.map(|dt| dt.to_rfc3339()))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
