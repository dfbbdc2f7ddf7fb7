//! Board session: the document, its autosave scheduler, the coordinator and
//! render isolation, driven from one task.
//!
//! ```text
//!  SessionHandle ──mpsc──► BoardSession::run()
//!                              │ select!
//!                              ├── command      ──► Board mutation ──► scheduler.mark_dirty()
//!                              ├── timer fired  ──► run_save()
//!                              └── fade ends    ──► overlay.poll()
//!
//!  run_save():  take pending ops ─► freeze surface ─► coordinator.save() ─► thaw ─► apply result
//! ```
//!
//! Commands arriving while a save is in flight wait in the channel, so no
//! mutation (undo/redo included) ever lands inside an open save window.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use inkboard_core::{Asset, Board, BoardError, Stroke, SyncState, SyncStatus};
use inkboard_render::{RenderIsolation, RenderSurface, SaveWindowMetrics, WindowResult};

use crate::config::SessionConfig;
use crate::coordinator::{SaveCoordinator, SaveReceipt, SaveRequest};
use crate::error::SaveError;
use crate::scheduler::{AutosaveScheduler, SchedulerState, TimerKind};
use crate::transport::Transport;

pub type SaveOutcome = Result<Option<SaveReceipt>, SaveError>;

/// Save-window label for a board whose session is being created.
const NEW_SESSION: &str = "(new)";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Board session has shut down")]
pub struct SessionClosed;

/// Point-in-time view of the session for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub status: SyncStatus,
    pub is_dirty: bool,
    pub sequence_number: u64,
    pub revision_token: Option<String>,
    pub last_error: Option<String>,
    pub scheduler: SchedulerState,
    pub autosave_delay: std::time::Duration,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug)]
pub enum SessionCommand {
    AddStroke(Stroke),
    UpdateStroke(Stroke),
    DeleteStroke(String),
    AddAsset(Asset),
    AddImageAsset {
        src: String,
        width: f64,
        height: f64,
        reply: oneshot::Sender<String>,
    },
    UpdateAsset(Asset),
    DeleteAsset(String),
    ClearBoard,
    Undo,
    Redo,
    GoToPage(usize),
    AddPage,
    DeletePage(usize),
    RenamePage(usize, String),
    PointerActive(bool),
    TextEditing(bool),
    SetExporting(bool),
    /// Discard the board and all pending save state.
    Reset,
    ManualSave(oneshot::Sender<SaveOutcome>),
    Status(oneshot::Sender<SessionStatus>),
    /// Page is going away: send the heartbeat and stop.
    PageExit,
}

pub struct BoardSession<T, S> {
    board: Board,
    scheduler: AutosaveScheduler,
    coordinator: Arc<SaveCoordinator<T>>,
    isolation: RenderIsolation,
    surface: Arc<S>,
    last_extra_draws: u64,
    last_error: Option<SaveError>,
}

impl<T, S> BoardSession<T, S>
where
    T: Transport + 'static,
    S: RenderSurface + Send + Sync + 'static,
{
    pub fn new(config: SessionConfig, transport: Arc<T>, surface: Arc<S>) -> Self {
        let coordinator = SaveCoordinator::new(transport, config.coordinator.clone())
            .with_rate_limit_default(config.autosave.default_backoff());
        Self {
            board: Board::new(config.history_limit),
            scheduler: AutosaveScheduler::new(config.autosave.clone()),
            coordinator: Arc::new(coordinator),
            isolation: RenderIsolation::new(
                config.overlay_fade(),
                SaveWindowMetrics::new(config.metrics_capacity),
            ),
            surface,
            last_extra_draws: 0,
            last_error: None,
        }
    }

    // ── Loading ──────────────────────────────────────────────────────

    pub fn hydrate(
        &mut self,
        session_id: &str,
        name: &str,
        state: &Value,
        revision_token: Option<String>,
        sequence_number: u64,
    ) -> Result<(), BoardError> {
        self.scheduler.cancel();
        self.board.hydrate(
            session_id,
            name,
            state,
            SyncState::loaded(revision_token, sequence_number),
        )
    }

    /// Fetch the session from the remote store and hydrate the board.
    pub async fn load(&mut self, session_id: &str, name: &str) -> Result<(), SaveError> {
        let remote = self.coordinator.resync_session(session_id).await?;
        self.hydrate(
            session_id,
            name,
            &remote.state,
            remote.revision_token,
            remote.sequence_number.unwrap_or(0),
        )
        .map_err(|e| SaveError::Serialization(e.to_string()))
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn scheduler(&self) -> &AutosaveScheduler {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &Arc<SaveCoordinator<T>> {
        &self.coordinator
    }

    pub fn isolation(&self) -> &RenderIsolation {
        &self.isolation
    }

    pub fn isolation_mut(&mut self) -> &mut RenderIsolation {
        &mut self.isolation
    }

    pub fn surface(&self) -> &Arc<S> {
        &self.surface
    }

    pub fn last_error(&self) -> Option<&SaveError> {
        self.last_error.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        let sync = self.board.sync();
        SessionStatus {
            status: sync.status(),
            is_dirty: sync.is_dirty(),
            sequence_number: sync.sequence_number(),
            revision_token: sync.revision_token().map(str::to_string),
            last_error: sync.last_error().map(str::to_string),
            scheduler: self.scheduler.state(),
            autosave_delay: self.scheduler.current_delay(),
            can_undo: self.board.can_undo(),
            can_redo: self.board.can_redo(),
        }
    }

    // ── Edits ────────────────────────────────────────────────────────

    pub fn add_stroke(&mut self, stroke: Stroke) -> bool {
        let changed = self.board.add_stroke(stroke);
        self.changed(changed)
    }

    pub fn update_stroke(&mut self, stroke: Stroke) -> bool {
        let changed = self.board.update_stroke(stroke);
        self.changed(changed)
    }

    pub fn delete_stroke(&mut self, id: &str) -> bool {
        let changed = self.board.delete_stroke(id);
        self.changed(changed)
    }

    pub fn add_asset(&mut self, asset: Asset) -> bool {
        let changed = self.board.add_asset(asset);
        self.changed(changed)
    }

    pub fn add_image_asset(&mut self, src: &str, width: f64, height: f64) -> String {
        let id = self.board.add_image_asset(src, width, height);
        self.changed(true);
        id
    }

    pub fn update_asset(&mut self, asset: Asset) -> bool {
        let changed = self.board.update_asset(asset);
        self.changed(changed)
    }

    pub fn delete_asset(&mut self, id: &str) -> bool {
        let changed = self.board.delete_asset(id);
        self.changed(changed)
    }

    pub fn clear_board(&mut self) -> bool {
        let changed = self.board.clear_board();
        self.changed(changed)
    }

    /// Cancels pending timers before touching the document.
    pub fn undo(&mut self) -> bool {
        self.scheduler.cancel();
        let changed = self.board.undo();
        self.rearm_after_replay(changed)
    }

    pub fn redo(&mut self) -> bool {
        self.scheduler.cancel();
        let changed = self.board.redo();
        self.rearm_after_replay(changed)
    }

    pub fn go_to_page(&mut self, index: usize) -> bool {
        self.board.go_to_page(index)
    }

    pub fn add_page(&mut self) -> usize {
        let index = self.board.add_page();
        self.changed(true);
        index
    }

    pub fn delete_page(&mut self, index: usize) -> bool {
        let changed = self.board.delete_page(index);
        self.changed(changed)
    }

    pub fn rename_page(&mut self, index: usize, name: &str) -> bool {
        let changed = self.board.rename_page(index, name);
        self.changed(changed)
    }

    pub fn set_pointer_active(&mut self, active: bool) {
        if active {
            self.isolation
                .metrics_mut()
                .record_pointer_event(Instant::now().into_std());
        }
        self.scheduler.set_pointer_active(active, Instant::now());
    }

    /// Host callback after a frame reaches the screen.
    pub fn record_frame_flush(&mut self) {
        self.isolation
            .metrics_mut()
            .record_frame_flush(Instant::now().into_std());
    }

    pub fn record_main_thread_block(&mut self, blocked: std::time::Duration) {
        self.isolation.metrics_mut().record_main_thread_block(blocked);
    }

    pub fn set_text_editing(&mut self, active: bool) {
        self.scheduler.set_text_editing(active, Instant::now());
    }

    /// Saves are held while an export renders the board.
    pub fn set_exporting(&mut self, exporting: bool) {
        self.board.set_exporting(exporting);
        if !exporting && self.board.is_dirty() {
            self.scheduler.mark_dirty(Instant::now());
        }
    }

    /// Discard the board. Pending timers, the owed save, the overlay and
    /// the sync state all go with it, so nothing is sent afterwards.
    pub fn reset(&mut self) {
        self.scheduler = AutosaveScheduler::new(self.scheduler.config().clone());
        self.board.reset();
        self.isolation.overlay_mut().hide_immediate();
        self.last_extra_draws = 0;
        self.last_error = None;
    }

    fn changed(&mut self, changed: bool) -> bool {
        if changed {
            self.scheduler.mark_dirty(Instant::now());
        }
        changed
    }

    fn rearm_after_replay(&mut self, changed: bool) -> bool {
        if changed || self.board.is_dirty() {
            self.scheduler.mark_dirty(Instant::now());
        }
        changed
    }

    // ── Saving ───────────────────────────────────────────────────────

    /// Run a save if the scheduler says one is due.
    pub async fn tick(&mut self) -> Option<SaveOutcome> {
        let fired = self.scheduler.poll(Instant::now())?;
        log::debug!("Autosave timer fired: {fired:?}");
        if fired == TimerKind::Backoff {
            log::info!("Retrying save after rate-limit backoff");
        }
        Some(self.run_save().await)
    }

    /// Explicit user save. Skips the debounce but still goes through the
    /// coordinator's single-flight queue.
    pub async fn manual_save(&mut self) -> SaveOutcome {
        self.run_save().await
    }

    /// Page-exit heartbeat carrying the last local revision.
    pub fn on_page_exit(&self) -> bool {
        match self.board.session_id() {
            Some(session_id) => self
                .coordinator
                .send_heartbeat(session_id, self.board.sync().sequence_number()),
            None => false,
        }
    }

    async fn run_save(&mut self) -> SaveOutcome {
        if self.board.is_exporting() {
            log::debug!("Export in progress, deferring save");
            return Ok(None);
        }
        let pending_empty =
            self.board.pending_ops().is_empty() && !self.board.pending_ops().is_full_save_forced();
        if !self.board.is_dirty() && pending_empty {
            log::debug!("Nothing to save");
            return Ok(None);
        }

        self.scheduler.begin_manual_save();
        let pending = self.board.take_pending();
        let started_at = self.board.generation();
        let state = match self.board.document().to_value() {
            Ok(state) => state,
            Err(e) => {
                self.board.restore_pending(pending);
                return Err(self.fail(SaveError::Serialization(e.to_string())));
            }
        };

        let session_id = self.board.session_id().map(str::to_string);
        let name = self.board.name().to_string();
        let sync = self.board.sync();
        let sequence_number = sync.sequence_number();
        let revision_token = sync.revision_token().map(str::to_string);
        self.board.mark_syncing();

        let coordinator = self.coordinator.clone();
        let mut window = self.isolation.begin_save(
            &*self.surface,
            session_id.as_deref().unwrap_or(NEW_SESSION),
            sequence_number,
            Instant::now().into_std(),
        );
        let result = match &session_id {
            Some(session_id) => {
                let request = SaveRequest {
                    session_id: session_id.clone(),
                    revision_token,
                    sequence_number,
                    ops: pending.ops.clone(),
                    state,
                    extra_draws: self.last_extra_draws,
                };
                coordinator.save(request).await.map(|receipt| (receipt, None))
            }
            None => {
                log::info!("Board has no session yet, creating one");
                coordinator
                    .create_session(&name, &state)
                    .await
                    .map(|created| (created.receipt, Some((created.session_id, created.name))))
            }
        };
        if let Ok((receipt, _)) = &result {
            window.record_save_rtt(receipt.rtt);
        }
        let window_result = match &result {
            Ok(_) => WindowResult::Success,
            Err(_) => WindowResult::Error,
        };
        let closed = window.finish(window_result, Instant::now().into_std());
        self.last_extra_draws = closed.map_or(0, |w| w.extra_draws);

        let done = Instant::now();
        match result {
            Ok((receipt, created)) => {
                if let Some((session_id, name)) = created {
                    self.board.adopt_session(session_id, name);
                }
                self.board.mark_saved(receipt.to_ack(), started_at);
                self.scheduler.on_save_success(receipt.rtt, done);
                self.last_error = None;
                Ok(Some(receipt))
            }
            Err(e) => {
                self.board.restore_pending(pending);
                Err(self.fail(e))
            }
        }
    }

    fn fail(&mut self, error: SaveError) -> SaveError {
        match &error {
            SaveError::SessionExpired { .. } => log::error!("Session expired, sign-in required"),
            SaveError::PayloadTooLarge { size, limit, .. } => {
                log::error!("Board too large to save ({size} > {limit} bytes)")
            }
            other => log::warn!("Save failed: {other}"),
        }
        self.board.mark_save_failed(error.to_string());
        self.scheduler.on_save_failure(error.class(), Instant::now());
        self.last_error = Some(error.clone());
        error
    }

    // ── Actor loop ───────────────────────────────────────────────────

    /// Drive the session from `commands` until the channel closes or a
    /// [`SessionCommand::PageExit`] arrives. Returns the session.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Self {
        log::info!("Board session loop started for {:?}", self.board.session_id());
        loop {
            let save_at = self.scheduler.next_deadline();
            let fade_at = self
                .isolation
                .overlay()
                .fade_deadline()
                .map(Instant::from_std);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::PageExit) | None => {
                        self.on_page_exit();
                        break;
                    }
                    Some(command) => self.handle(command).await,
                },
                _ = sleep_until(save_at.unwrap_or_else(Instant::now)), if save_at.is_some() => {
                    self.tick().await;
                }
                _ = sleep_until(fade_at.unwrap_or_else(Instant::now)), if fade_at.is_some() => {
                    self.isolation.overlay_mut().poll(Instant::now().into_std());
                }
            }
        }
        log::info!("Board session loop stopped");
        self
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::AddStroke(stroke) => {
                self.add_stroke(stroke);
            }
            SessionCommand::UpdateStroke(stroke) => {
                self.update_stroke(stroke);
            }
            SessionCommand::DeleteStroke(id) => {
                self.delete_stroke(&id);
            }
            SessionCommand::AddAsset(asset) => {
                self.add_asset(asset);
            }
            SessionCommand::AddImageAsset {
                src,
                width,
                height,
                reply,
            } => {
                let id = self.add_image_asset(&src, width, height);
                let _ = reply.send(id);
            }
            SessionCommand::UpdateAsset(asset) => {
                self.update_asset(asset);
            }
            SessionCommand::DeleteAsset(id) => {
                self.delete_asset(&id);
            }
            SessionCommand::ClearBoard => {
                self.clear_board();
            }
            SessionCommand::Undo => {
                self.undo();
            }
            SessionCommand::Redo => {
                self.redo();
            }
            SessionCommand::GoToPage(index) => {
                self.go_to_page(index);
            }
            SessionCommand::AddPage => {
                self.add_page();
            }
            SessionCommand::DeletePage(index) => {
                self.delete_page(index);
            }
            SessionCommand::RenamePage(index, name) => {
                self.rename_page(index, &name);
            }
            SessionCommand::PointerActive(active) => self.set_pointer_active(active),
            SessionCommand::TextEditing(active) => self.set_text_editing(active),
            SessionCommand::SetExporting(exporting) => self.set_exporting(exporting),
            SessionCommand::Reset => self.reset(),
            SessionCommand::ManualSave(reply) => {
                let outcome = self.manual_save().await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            SessionCommand::PageExit => {}
        }
    }
}

/// Cloneable sender side of a running [`BoardSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.tx.send(command).await.map_err(|_| SessionClosed)
    }

    pub async fn add_stroke(&self, stroke: Stroke) -> Result<(), SessionClosed> {
        self.send(SessionCommand::AddStroke(stroke)).await
    }

    pub async fn undo(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Undo).await
    }

    pub async fn redo(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Redo).await
    }

    pub async fn reset(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Reset).await
    }

    pub async fn pointer_active(&self, active: bool) -> Result<(), SessionClosed> {
        self.send(SessionCommand::PointerActive(active)).await
    }

    pub async fn add_image_asset(
        &self,
        src: impl Into<String>,
        width: f64,
        height: f64,
    ) -> Result<String, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::AddImageAsset {
            src: src.into(),
            width,
            height,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn manual_save(&self) -> Result<SaveOutcome, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::ManualSave(reply)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Status(reply)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn page_exit(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::PageExit).await
    }
}
