//! Per-track format metadata, refreshed on every stream resolution.

use rivertune_common::model::FormatInfo;
use sqlx::{Pool, Sqlite};

use crate::error::Result;

/// Fetch the stored format for a track.
pub async fn format(pool: &Pool<Sqlite>, id: &str) -> Result<Option<FormatInfo>> {
    let row: Option<(
        String,
        i64,
        String,
        String,
        i64,
        Option<i64>,
        i64,
        Option<f64>,
        Option<String>,
    )> = sqlx::query_as(
        r#"
        SELECT id, itag, mime_type, codecs, bitrate, sample_rate, content_length,
               loudness_db, playback_tracking_url
        FROM format
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| FormatInfo {
        id: r.0,
        itag: r.1,
        mime_type: r.2,
        codecs: r.3,
        bitrate: r.4,
        sample_rate: r.5,
        content_length: r.6,
        loudness_db: r.7,
        playback_tracking_url: r.8,
    }))
}

/// Insert or replace the format row for a track. Idempotent per id.
pub async fn upsert_format(pool: &Pool<Sqlite>, info: &FormatInfo) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO format
            (id, itag, mime_type, codecs, bitrate, sample_rate, content_length,
             loudness_db, playback_tracking_url)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&info.id)
    .bind(info.itag)
    .bind(&info.mime_type)
    .bind(&info.codecs)
    .bind(info.bitrate)
    .bind(info.sample_rate)
    .bind(info.content_length)
    .bind(info.loudness_db)
    .bind(&info.playback_tracking_url)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;

    fn info(id: &str, bitrate: i64) -> FormatInfo {
        FormatInfo {
            id: id.to_string(),
            itag: 251,
            mime_type: "audio/webm".to_string(),
            codecs: "opus".to_string(),
            bitrate,
            sample_rate: Some(48_000),
            content_length: 1_000_000,
            loudness_db: Some(-1.5),
            playback_tracking_url: Some("https://stats.example/x".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let pool = init::memory().await.unwrap();
        upsert_format(&pool, &info("t1", 128_000)).await.unwrap();
        upsert_format(&pool, &info("t1", 141_000)).await.unwrap();

        let stored = format(&pool, "t1").await.unwrap().unwrap();
        assert_eq!(stored.bitrate, 141_000);
        assert_eq!(stored.loudness_db, Some(-1.5));
        assert!(format(&pool, "t2").await.unwrap().is_none());
    }
}
