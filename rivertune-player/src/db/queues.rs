//! Queue snapshot persistence.
//!
//! One row per queue: metadata plus the track list (with each track's
//! shuffle index) serialized as JSON. Master-list ordering lives in
//! `sort_index`.

use rivertune_common::model::{QueueKind, TrackMetadata};
use sqlx::{Pool, Sqlite};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::playback::queue_board::MultiQueue;

fn kind_columns(kind: &QueueKind) -> (&'static str, Option<String>) {
    match kind {
        QueueKind::Primary => ("primary", None),
        QueueKind::Extension { parent } => ("extension", Some(parent.to_string())),
    }
}

fn kind_from_columns(kind: &str, parent_id: Option<&str>) -> QueueKind {
    match (kind, parent_id.and_then(|p| Uuid::parse_str(p).ok())) {
        ("extension", Some(parent)) => QueueKind::Extension { parent },
        _ => QueueKind::Primary,
    }
}

/// Read all persisted queues in master-list order.
pub async fn read_queues(pool: &Pool<Sqlite>) -> Result<Vec<MultiQueue>> {
    let rows: Vec<(
        String,
        String,
        String,
        Option<String>,
        String,
        bool,
        i64,
        i64,
        Option<String>,
    )> = sqlx::query_as(
        r#"
        SELECT id, title, kind, parent_id, tracks, shuffled, queue_pos, sort_index, playlist_id
        FROM queue
        ORDER BY sort_index ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut queues = Vec::with_capacity(rows.len());
    for (id, title, kind, parent_id, tracks, shuffled, queue_pos, sort_index, playlist_id) in rows {
        let id = Uuid::parse_str(&id)
            .map_err(|e| crate::error::Error::Queue(format!("invalid queue id: {e}")))?;
        let tracks: Vec<TrackMetadata> = serde_json::from_str(&tracks)?;
        let queue_pos = (queue_pos.max(0) as usize).min(tracks.len().saturating_sub(1));
        queues.push(MultiQueue {
            id,
            title,
            kind: kind_from_columns(&kind, parent_id.as_deref()),
            queue: tracks,
            shuffled,
            queue_pos,
            index: sort_index.max(0) as usize,
            playlist_id,
        });
    }
    debug!("Loaded {} queue(s) from database", queues.len());
    Ok(queues)
}

/// Write a queue's full row (contents + metadata).
pub async fn rewrite_queue(pool: &Pool<Sqlite>, q: &MultiQueue) -> Result<()> {
    let (kind, parent_id) = kind_columns(&q.kind);
    let tracks = serde_json::to_string(&q.queue)?;
    sqlx::query(
        r#"
        INSERT INTO queue (id, title, kind, parent_id, tracks, shuffled, queue_pos, sort_index, playlist_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            kind = excluded.kind,
            parent_id = excluded.parent_id,
            tracks = excluded.tracks,
            shuffled = excluded.shuffled,
            queue_pos = excluded.queue_pos,
            sort_index = excluded.sort_index,
            playlist_id = excluded.playlist_id
        "#,
    )
    .bind(q.id.to_string())
    .bind(&q.title)
    .bind(kind)
    .bind(parent_id)
    .bind(tracks)
    .bind(q.shuffled)
    .bind(q.queue_pos as i64)
    .bind(q.index as i64)
    .bind(&q.playlist_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Update a queue's metadata, leaving the stored track list alone.
pub async fn update_queue(pool: &Pool<Sqlite>, q: &MultiQueue) -> Result<()> {
    let (kind, parent_id) = kind_columns(&q.kind);
    sqlx::query(
        r#"
        UPDATE queue
        SET title = ?, kind = ?, parent_id = ?, shuffled = ?, queue_pos = ?, sort_index = ?, playlist_id = ?
        WHERE id = ?
        "#,
    )
    .bind(&q.title)
    .bind(kind)
    .bind(parent_id)
    .bind(q.shuffled)
    .bind(q.queue_pos as i64)
    .bind(q.index as i64)
    .bind(&q.playlist_id)
    .bind(q.id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Update every queue's metadata (used after master-list reorders).
pub async fn update_all_queues(pool: &Pool<Sqlite>, queues: &[MultiQueue]) -> Result<()> {
    for q in queues {
        update_queue(pool, q).await?;
    }
    Ok(())
}

/// Replace the whole queue table with the given snapshot, atomically.
pub async fn rewrite_all_queues(pool: &Pool<Sqlite>, queues: &[MultiQueue]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM queue").execute(&mut *tx).await?;
    for q in queues {
        let (kind, parent_id) = kind_columns(&q.kind);
        let tracks = serde_json::to_string(&q.queue)?;
        sqlx::query(
            r#"
            INSERT INTO queue (id, title, kind, parent_id, tracks, shuffled, queue_pos, sort_index, playlist_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(q.id.to_string())
        .bind(&q.title)
        .bind(kind)
        .bind(parent_id)
        .bind(tracks)
        .bind(q.shuffled)
        .bind(q.queue_pos as i64)
        .bind(q.index as i64)
        .bind(&q.playlist_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Delete a queue row.
pub async fn delete_queue(pool: &Pool<Sqlite>, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM queue WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;

    fn sample_queue(title: &str) -> MultiQueue {
        let mut tracks = vec![
            TrackMetadata::new("t1", "Song One"),
            TrackMetadata::new("t2", "Song Two"),
            TrackMetadata::new("t3", "Song Three"),
        ];
        // a shuffled traversal order distinct from storage order
        tracks[0].shuffle_index = 2;
        tracks[1].shuffle_index = 0;
        tracks[2].shuffle_index = 1;
        MultiQueue {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind: QueueKind::Primary,
            queue: tracks,
            shuffled: true,
            queue_pos: 1,
            index: 0,
            playlist_id: Some("t3".to_string()),
        }
    }

    #[tokio::test]
    async fn queue_round_trip_preserves_everything() {
        let pool = init::memory().await.unwrap();
        let q = sample_queue("Road Trip");
        rewrite_queue(&pool, &q).await.unwrap();

        let loaded = read_queues(&pool).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let l = &loaded[0];
        assert_eq!(l.id, q.id);
        assert_eq!(l.title, q.title);
        assert_eq!(l.queue, q.queue);
        assert_eq!(l.queue_pos, q.queue_pos);
        assert_eq!(l.shuffled, q.shuffled);
        assert_eq!(l.playlist_id, q.playlist_id);
    }

    #[tokio::test]
    async fn extension_kind_round_trips() {
        let pool = init::memory().await.unwrap();
        let parent = Uuid::new_v4();
        let mut q = sample_queue("Road Trip");
        q.kind = QueueKind::Extension { parent };
        rewrite_queue(&pool, &q).await.unwrap();

        let loaded = read_queues(&pool).await.unwrap();
        assert_eq!(loaded[0].kind, QueueKind::Extension { parent });
    }

    #[tokio::test]
    async fn read_orders_by_sort_index() {
        let pool = init::memory().await.unwrap();
        let mut a = sample_queue("A");
        a.index = 1;
        let mut b = sample_queue("B");
        b.index = 0;
        rewrite_queue(&pool, &a).await.unwrap();
        rewrite_queue(&pool, &b).await.unwrap();

        let loaded = read_queues(&pool).await.unwrap();
        let titles: Vec<&str> = loaded.iter().map(|q| q.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn meta_update_keeps_tracks() {
        let pool = init::memory().await.unwrap();
        let mut q = sample_queue("A");
        rewrite_queue(&pool, &q).await.unwrap();

        q.queue_pos = 2;
        q.shuffled = false;
        q.queue.clear(); // must not be written by the meta update
        update_queue(&pool, &q).await.unwrap();

        let loaded = read_queues(&pool).await.unwrap();
        assert_eq!(loaded[0].queue.len(), 3);
        assert_eq!(loaded[0].queue_pos, 2);
        assert!(!loaded[0].shuffled);
    }

    #[tokio::test]
    async fn rewrite_all_replaces_table() {
        let pool = init::memory().await.unwrap();
        rewrite_queue(&pool, &sample_queue("old")).await.unwrap();

        let fresh = vec![sample_queue("new1"), sample_queue("new2")];
        rewrite_all_queues(&pool, &fresh).await.unwrap();

        let loaded = read_queues(&pool).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|q| q.title.starts_with("new")));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let pool = init::memory().await.unwrap();
        let q = sample_queue("A");
        rewrite_queue(&pool, &q).await.unwrap();
        delete_queue(&pool, q.id).await.unwrap();
        assert!(read_queues(&pool).await.unwrap().is_empty());
    }
}
