//! End-to-end flow through the orchestrator's event loop: player events
//! drive resolution, queue tracking, accounting and network recovery.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{tracks, FakeCatalog};
use rivertune_common::error::CODE_NO_INTERNET;
use rivertune_player::config::Config;
use rivertune_player::context::{NetworkState, SessionContext};
use rivertune_player::db;
use rivertune_player::playback::player::{MediaPlayer, StubPlayer};
use rivertune_player::{PlaybackOrchestrator, QueueRequest};
use tokio::sync::watch;

struct Session {
    orchestrator: Arc<PlaybackOrchestrator>,
    stub: Arc<StubPlayer>,
    catalog: Arc<FakeCatalog>,
    network_tx: watch::Sender<NetworkState>,
}

async fn running_session() -> Session {
    let pool = db::init::memory().await.unwrap();
    let (ctx, network_tx) = SessionContext::new(Config::default(), pool);
    let (stub, player_events) = StubPlayer::new();
    let stub = Arc::new(stub);
    let catalog = FakeCatalog::new();
    let orchestrator = PlaybackOrchestrator::new(
        ctx,
        Arc::clone(&stub) as Arc<dyn MediaPlayer>,
        Arc::clone(&catalog) as Arc<dyn rivertune_player::catalog::CatalogClient>,
    );
    tokio::spawn(Arc::clone(&orchestrator).run(player_events));
    Session {
        orchestrator,
        stub,
        catalog,
        network_tx,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn transitions_resolve_each_current_track() {
    let s = running_session().await;
    s.orchestrator
        .play_queue(
            QueueRequest::List {
                title: "Flow".to_string(),
                tracks: tracks(&["t1", "t2", "t3"]),
                start_index: 0,
                start_shuffled: false,
            },
            true,
            false,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;
    assert!(s.stub.stream_url("t1").is_some());

    s.stub.advance_auto();
    settle().await;
    assert_eq!(s.stub.current_item().unwrap().id, "t2");
    assert!(s.stub.stream_url("t2").is_some(), "new current item resolved");

    // the second play of the same track reuses the cached URL
    let calls = s.catalog.playback_calls.load(Ordering::SeqCst);
    s.stub.seek_to(0, None);
    settle().await;
    assert_eq!(
        s.catalog.playback_calls.load(Ordering::SeqCst),
        calls,
        "cached URL reused for an unexpired track"
    );
}

#[tokio::test]
async fn qualifying_play_is_recorded() {
    let s = running_session().await;
    s.orchestrator
        .play_queue(
            QueueRequest::List {
                title: "Flow".to_string(),
                tracks: tracks(&["t1", "t2"]),
                start_index: 0,
                start_shuffled: false,
            },
            true,
            false,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    s.stub.report_stats("t1", 150_000);
    settle().await;

    let row = db::songs::song(&s.orchestrator.context().db, "t1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.play_count, 1);
    assert_eq!(row.total_play_time_ms, 150_000);
}

#[tokio::test]
async fn network_loss_suspends_and_reconnect_resumes() {
    let s = running_session().await;
    s.orchestrator
        .play_queue(
            QueueRequest::List {
                title: "Flow".to_string(),
                tracks: tracks(&["t1"]),
                start_index: 0,
                start_shuffled: false,
            },
            true,
            false,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;

    s.network_tx
        .send(NetworkState {
            connected: false,
            metered: false,
        })
        .unwrap();
    s.stub.fail(CODE_NO_INTERNET, "connection failed");
    settle().await;
    assert!(s.orchestrator.is_waiting_for_network());

    s.stub.take_ops();
    s.network_tx
        .send(NetworkState {
            connected: true,
            metered: false,
        })
        .unwrap();
    settle().await;
    assert!(!s.orchestrator.is_waiting_for_network());
    assert!(s.stub.play_when_ready(), "playback resumes with connectivity");
}

#[tokio::test]
async fn session_layout_mirrors_queue_truth() {
    let s = running_session().await;
    let layout = s.orchestrator.session_layout();
    assert!(!layout.borrow().radio.enabled, "no track, no radio");

    s.orchestrator
        .play_queue(
            QueueRequest::List {
                title: "Flow".to_string(),
                tracks: tracks(&["t1", "t2", "t3"]),
                start_index: 0,
                start_shuffled: false,
            },
            true,
            false,
            false,
            None,
        )
        .await
        .unwrap();
    settle().await;
    assert!(layout.borrow().radio.enabled);
    assert_eq!(layout.borrow().shuffle.label, "Enable shuffle");

    s.orchestrator.trigger_shuffle().await;
    settle().await;
    assert_eq!(layout.borrow().shuffle.label, "Disable shuffle");
}
