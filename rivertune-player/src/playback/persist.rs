//! Coalesced queue persistence.
//!
//! Queue mutations happen far faster than they are worth writing (repeated
//! shuffles, drag-reorders), so saves go through a single coalescing
//! channel: the dispatcher keeps only the most recent job per logical
//! target and flushes after a stretch of idle time. A superseded job is
//! dropped wholesale, never partially applied. Persistence failures are
//! logged and dropped; queue snapshots are best-effort by design.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::{Pool, Sqlite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};
use uuid::Uuid;

use crate::db;
use crate::playback::queue_board::MultiQueue;

/// Idle time before pending saves are written out.
pub const SAVE_IDLE_DELAY: Duration = Duration::from_secs(5);

/// A pending persistence request, carrying its own data snapshot so the
/// dispatcher never reaches back into live queue state.
#[derive(Debug, Clone)]
pub enum SaveJob {
    /// Rewrite a queue's full row (tracks + metadata)
    QueueContents(MultiQueue),
    /// Update a queue's metadata only
    QueueMeta(MultiQueue),
    /// Update every queue's metadata (master-list reorder)
    AllQueues(Vec<MultiQueue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SaveKey {
    Contents(Uuid),
    Meta(Uuid),
    All,
}

impl SaveJob {
    fn key(&self) -> SaveKey {
        match self {
            SaveJob::QueueContents(q) => SaveKey::Contents(q.id),
            SaveJob::QueueMeta(q) => SaveKey::Meta(q.id),
            SaveJob::AllQueues(_) => SaveKey::All,
        }
    }
}

enum Msg {
    Job(SaveJob),
    Delete(Uuid),
    Flush(oneshot::Sender<()>),
    Discard,
}

/// Handle to the save dispatcher task.
///
/// Cheap to clone. A disabled scheduler (persistent queues turned off)
/// accepts and drops everything.
#[derive(Clone)]
pub struct SaveScheduler {
    tx: Option<mpsc::UnboundedSender<Msg>>,
}

impl SaveScheduler {
    /// Spawn the dispatcher. With `enabled` false no task is spawned and
    /// every request is a no-op.
    pub fn spawn(pool: Pool<Sqlite>, enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher(pool, rx));
        Self { tx: Some(tx) }
    }

    /// A scheduler that drops everything; used when persistent queues are
    /// disabled and in queue-board unit tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    fn send(&self, msg: Msg) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(msg);
        }
    }

    /// Enqueue a save; only the most recent job per target survives.
    pub fn schedule(&self, job: SaveJob) {
        self.send(Msg::Job(job));
    }

    /// Delete a queue row immediately and drop its pending saves.
    pub fn delete_queue(&self, id: Uuid) {
        self.send(Msg::Delete(id));
    }

    /// Drop all pending saves without writing them.
    pub fn discard_pending(&self) {
        self.send(Msg::Discard);
    }

    /// Write out all pending saves now and wait for completion.
    pub async fn flush(&self) {
        if self.tx.is_none() {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Msg::Flush(ack_tx));
        let _ = ack_rx.await;
    }
}

async fn dispatcher(pool: Pool<Sqlite>, mut rx: mpsc::UnboundedReceiver<Msg>) {
    let mut pending: HashMap<SaveKey, SaveJob> = HashMap::new();

    loop {
        let msg = if pending.is_empty() {
            rx.recv().await
        } else {
            // a new request restarts the idle window
            tokio::select! {
                msg = rx.recv() => msg,
                _ = tokio::time::sleep(SAVE_IDLE_DELAY) => {
                    run_jobs(&pool, &mut pending).await;
                    continue;
                }
            }
        };

        match msg {
            Some(Msg::Job(job)) => {
                pending.insert(job.key(), job);
            }
            Some(Msg::Delete(id)) => {
                pending.retain(|key, _| {
                    !matches!(key, SaveKey::Contents(qid) | SaveKey::Meta(qid) if *qid == id)
                });
                if let Err(e) = db::queues::delete_queue(&pool, id).await {
                    error!("Failed to delete queue {}: {}", id, e);
                }
            }
            Some(Msg::Flush(ack)) => {
                run_jobs(&pool, &mut pending).await;
                let _ = ack.send(());
            }
            Some(Msg::Discard) => {
                pending.clear();
            }
            None => {
                run_jobs(&pool, &mut pending).await;
                break;
            }
        }
    }
    debug!("Save dispatcher exiting");
}

async fn run_jobs(pool: &Pool<Sqlite>, pending: &mut HashMap<SaveKey, SaveJob>) {
    if pending.is_empty() {
        return;
    }
    debug!("Running {} queue save job(s)", pending.len());
    for (_, job) in pending.drain() {
        let result = match &job {
            SaveJob::QueueContents(q) => db::queues::rewrite_queue(pool, q).await,
            SaveJob::QueueMeta(q) => db::queues::update_queue(pool, q).await,
            SaveJob::AllQueues(all) => db::queues::update_all_queues(pool, all).await,
        };
        if let Err(e) = result {
            // best-effort: losing a snapshot must never disturb playback
            error!("Queue save failed: {}", e);
        }
    }
}
