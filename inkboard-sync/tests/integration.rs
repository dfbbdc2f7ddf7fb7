//! End-to-end tests for the save pipeline against a scripted transport.
//!
//! All tests run on a paused clock: sleeps and scripted response delays
//! advance virtual time, so timer behaviour is deterministic.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join, join3};
use inkboard_core::{DiffKind, DiffOp, Stroke, SyncStatus};
use inkboard_render::{GuardedSurface, HeadlessBackend, RenderSurface, WindowResult};
use inkboard_sync::{
    BoardSession, CoordinatorConfig, FailureClass, MemoryTransport, Protocol, SaveCoordinator,
    SaveError, SaveRequest, ScriptedResponse, SessionConfig, SessionHandle, TimerKind,
};
use serde_json::json;

type Session = BoardSession<MemoryTransport, GuardedSurface<HeadlessBackend>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn save_request(marker: &str) -> SaveRequest {
    let stroke = Stroke::new(marker);
    SaveRequest {
        session_id: "sess".into(),
        revision_token: Some("W/\"rev:1\"".into()),
        sequence_number: 1,
        ops: vec![DiffOp::add(DiffKind::Stroke, "page-1", &stroke).unwrap()],
        state: json!({"pages": [], "currentPageIndex": 0}),
        extra_draws: 0,
    }
}

fn fresh_session(transport: &Arc<MemoryTransport>) -> Session {
    let surface = Arc::new(GuardedSurface::new(HeadlessBackend::new(16, 16)));
    BoardSession::new(SessionConfig::default(), transport.clone(), surface)
}

fn new_session(transport: &Arc<MemoryTransport>) -> Session {
    let mut session = fresh_session(transport);
    session
        .hydrate("sess", "Board", &json!({"pages": []}), None, 0)
        .unwrap();
    session
}

// ── Single flight ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_second_save_queues_behind_first() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(
        ScriptedResponse::ok()
            .etag("W/\"rev:2\"")
            .delay(Duration::from_millis(200)),
    );
    transport.push(ScriptedResponse::ok().etag("W/\"rev:3\""));
    let coord = SaveCoordinator::new(transport.clone(), CoordinatorConfig::default());

    let (first, second) = join(coord.save(save_request("s1")), coord.save(save_request("s2"))).await;

    assert_eq!(transport.request_count(), 2);
    assert_eq!(first.unwrap().revision_token.as_deref(), Some("W/\"rev:2\""));
    assert_eq!(second.unwrap().revision_token.as_deref(), Some("W/\"rev:3\""));

    let sent = transport.requests();
    assert_eq!(sent[1].json().unwrap()["ops"][0]["id"], "s2");
    assert!(!coord.is_in_flight());
}

#[tokio::test(start_paused = true)]
async fn test_latest_queued_request_wins() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::ok().etag("\"a\"").delay(Duration::from_millis(200)));
    transport.push(ScriptedResponse::ok().etag("\"b\""));
    let coord = SaveCoordinator::new(transport.clone(), CoordinatorConfig::default());

    let (_, second, third) = join3(
        coord.save(save_request("s1")),
        coord.save(save_request("s2")),
        coord.save(save_request("s3")),
    )
    .await;

    assert_eq!(transport.request_count(), 2);
    let sent = transport.requests();
    assert_eq!(sent[1].json().unwrap()["ops"][0]["id"], "s3");
    assert_eq!(second.unwrap(), third.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_queued_save_runs_after_failure() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::network_error("reset").delay(Duration::from_millis(100)));
    transport.push(ScriptedResponse::ok());
    let coord = SaveCoordinator::new(transport.clone(), CoordinatorConfig::default());

    let (first, second) = join(coord.save(save_request("s1")), coord.save(save_request("s2"))).await;
    assert!(matches!(first, Err(SaveError::Transport(_))));
    assert!(second.is_ok());
    assert_eq!(transport.request_count(), 2);
}

// ── Conflicts ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_conflict_retries_at_most_once() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::status(412));
    transport.push(ScriptedResponse::ok().etag("W/\"rev:4\"").json(json!({"state": {}})));
    transport.push(ScriptedResponse::status(412));
    let coord = SaveCoordinator::new(transport.clone(), CoordinatorConfig::default());

    let err = coord.save(save_request("s1")).await.unwrap_err();
    assert!(matches!(err, SaveError::Conflict { status: 412, .. }));
    assert_eq!(err.class(), FailureClass::Terminal);

    let sent = transport.requests();
    assert_eq!(sent.len(), 3);
    let resyncs = sent.iter().filter(|r| r.method == http::Method::GET).count();
    assert_eq!(resyncs, 1);
}

// ── Routing ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_routing_by_payload_size() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    let coord = SaveCoordinator::new(transport.clone(), CoordinatorConfig::default());

    let mut small = save_request("s1");
    small.ops[0].value = Some(json!({"id": "s1", "points": "x".repeat(400 * 1024)}));
    let receipt = coord.save(small).await.unwrap();
    assert_eq!(receipt.protocol, Protocol::Diff);

    let mut huge = save_request("s2");
    huge.ops[0].value = Some(json!({"id": "s2", "points": "x".repeat(3 * 1024 * 1024)}));
    huge.state = json!({"pages": [{"id": "p", "name": "P", "strokes": [{"id": "s2", "points": "x".repeat(3 * 1024 * 1024)}]}]});
    let err = coord.save(huge).await.unwrap_err();
    assert!(matches!(err, SaveError::PayloadTooLarge { .. }));
    assert_eq!(transport.request_count(), 1);
}

// ── Scheduling through the session loop ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_pointer_gate_then_single_idle_save() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    let session = new_session(&transport);
    let (handle, rx) = SessionHandle::channel(16);
    let task = tokio::spawn(session.run(rx));

    handle.pointer_active(true).await.unwrap();
    handle.add_stroke(Stroke::new("s1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.status().await.unwrap();
    assert_eq!(transport.request_count(), 0);

    handle.pointer_active(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(9_900)).await;
    assert_eq!(transport.request_count(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.request_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(transport.request_count(), 1);
    assert!(!status.is_dirty);
    assert_eq!(status.status, SyncStatus::Saved);

    handle.page_exit().await.unwrap();
    let session = task.await.unwrap();
    assert_eq!(transport.beacons().len(), 1);
    assert!(session.surface().is_drawing_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_debounced_save_fires_once_after_burst() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    let (handle, rx) = SessionHandle::channel(16);
    let task = tokio::spawn(new_session(&transport).run(rx));

    for i in 0..5 {
        handle.add_stroke(Stroke::new(format!("s{i}"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    handle.status().await.unwrap();
    assert_eq!(transport.request_count(), 1);
    let body = transport.requests()[0].json().unwrap();
    assert_eq!(body["ops"].as_array().unwrap().len(), 5);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_saves_raise_delay_to_cap() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    let mut session = new_session(&transport);
    assert_eq!(session.scheduler().current_delay(), Duration::from_millis(3000));

    for _ in 0..6 {
        transport.push(ScriptedResponse::ok().delay(Duration::from_millis(450)));
    }

    session.add_stroke(Stroke::new("s0"));
    let receipt = session.manual_save().await.unwrap().unwrap();
    assert!(receipt.rtt >= Duration::from_millis(450));
    assert_eq!(session.scheduler().current_delay(), Duration::from_millis(3500));

    for i in 1..6 {
        session.add_stroke(Stroke::new(format!("s{i}")));
        session.manual_save().await.unwrap();
    }
    assert_eq!(session.scheduler().current_delay(), Duration::from_millis(5000));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_schedules_backoff_retry() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::status(429).json(json!({"error": "rate_limited", "backoff_ms": 2000})));
    let mut session = new_session(&transport);
    session.add_stroke(Stroke::new("s1"));

    let err = session.manual_save().await.unwrap_err();
    assert_eq!(err.class(), FailureClass::RetryAfter(Duration::from_millis(2000)));
    assert_eq!(session.scheduler().armed_timer(), Some(TimerKind::Backoff));
    assert!(session.tick().await.is_none());

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let outcome = session.tick().await.unwrap();
    assert!(outcome.unwrap().is_some());
    assert_eq!(transport.request_count(), 2);
    assert!(!session.board().is_dirty());
}

#[tokio::test(start_paused = true)]
async fn test_render_guard_released_on_failed_save() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::status(422).json(json!({"error": "invalid_ops"})));
    let mut session = new_session(&transport);
    session.add_stroke(Stroke::new("s1"));

    let err = session.manual_save().await.unwrap_err();
    assert!(matches!(err, SaveError::InvalidOperations { .. }));
    assert!(session.surface().is_drawing_enabled());

    let guard = session.isolation().guard();
    assert_eq!(guard.activations(), 1);
    assert_eq!(guard.releases(), 1);
    let window = session.isolation().metrics().windows().last().unwrap();
    assert_eq!(window.result, Some(WindowResult::Error));
    assert_eq!(session.board().pending_ops().len(), 1);
    assert_eq!(session.scheduler().armed_timer(), None);
}

#[tokio::test(start_paused = true)]
async fn test_undo_waits_for_open_save_window() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::ok().delay(Duration::from_millis(300)));
    let mut session = new_session(&transport);
    session.add_stroke(Stroke::new("s1"));
    let (handle, rx) = SessionHandle::channel(16);
    let task = tokio::spawn(session.run(rx));

    let save = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.manual_save().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.undo().await.unwrap();

    let outcome = save.await.unwrap().unwrap();
    assert!(outcome.unwrap().is_some());
    let status = handle.status().await.unwrap();
    assert!(status.is_dirty);
    assert!(status.can_redo);

    drop(handle);
    let session = task.await.unwrap();
    assert!(session.board().current_strokes().is_empty());
    assert_eq!(session.isolation().metrics().windows().count(), 1);
}

// ── Session lifecycle ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_manual_save_creates_session_for_new_board() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(
        ScriptedResponse::status(201)
            .etag("W/\"rev:1\"")
            .json(json!({"id": "new-1", "name": "Untitled"})),
    );
    let mut session = fresh_session(&transport);
    session.add_stroke(Stroke::new("s1"));

    let receipt = session.manual_save().await.unwrap().unwrap();
    assert_eq!(receipt.revision_token.as_deref(), Some("W/\"rev:1\""));

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, http::Method::POST);
    assert_eq!(sent[0].path, "/api/v1/solo/sessions/");
    assert_eq!(sent[0].json().unwrap()["state"]["pages"][0]["strokes"][0]["id"], "s1");

    let board = session.board();
    assert_eq!(board.session_id(), Some("new-1"));
    assert!(!board.is_dirty());
    assert!(board.pending_ops().is_empty());
    assert_eq!(board.sync().revision_token(), Some("W/\"rev:1\""));
    assert_eq!(board.sync().sequence_number(), 1);
    assert!(session.surface().is_drawing_enabled());

    session.add_stroke(Stroke::new("s2"));
    session.manual_save().await.unwrap();
    let sent = transport.requests();
    assert_eq!(sent[1].path, "/api/v1/solo/sessions/new-1/diff/");
    assert_eq!(sent[1].header("if-match"), Some("W/\"rev:1\""));
}

#[tokio::test(start_paused = true)]
async fn test_autosave_creates_session_for_new_board() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::status(201).json(json!({"id": "new-2"})));
    let (handle, rx) = SessionHandle::channel(16);
    let task = tokio::spawn(fresh_session(&transport).run(rx));

    handle.add_stroke(Stroke::new("s1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.requests()[0].path, "/api/v1/solo/sessions/");
    assert!(!status.is_dirty);
    assert_eq!(status.status, SyncStatus::Saved);

    handle.page_exit().await.unwrap();
    let session = task.await.unwrap();
    assert_eq!(session.board().session_id(), Some("new-2"));
    assert_eq!(transport.beacons()[0].0, "/api/v1/solo/sessions/new-2/beacon/");
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_keeps_board_dirty() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    transport.push(ScriptedResponse::network_error("offline"));
    let mut session = fresh_session(&transport);
    session.add_stroke(Stroke::new("s1"));

    assert!(session.manual_save().await.is_err());
    assert_eq!(session.board().session_id(), None);
    assert!(session.board().is_dirty());
    assert_eq!(session.board().pending_ops().len(), 1);
    assert_eq!(session.scheduler().armed_timer(), Some(TimerKind::Debounce));
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_debounce_sends_nothing() {
    init_logging();
    let transport = Arc::new(MemoryTransport::new());
    let (handle, rx) = SessionHandle::channel(16);
    let task = tokio::spawn(new_session(&transport).run(rx));

    handle.add_stroke(Stroke::new("s1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    handle.reset().await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;

    let status = handle.status().await.unwrap();
    assert_eq!(transport.request_count(), 0);
    assert!(!status.is_dirty);
    assert!(!status.can_undo);
    assert_eq!(status.sequence_number, 0);
    assert_eq!(status.revision_token, None);

    drop(handle);
    let session = task.await.unwrap();
    assert_eq!(session.board().session_id(), None);
    assert!(session.board().current_strokes().is_empty());
    assert!(transport.beacons().is_empty());
}
