// Preview Manager
// Owns the single preview session: teardown-before-start, classified errors, stale event filtering

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::services::client_context::ClientContext;
use crate::services::events::{
    emit_event, EventSink, Notice, PREVIEW_ERROR, PREVIEW_ERROR_CLEARED, PREVIEW_STATE,
};
use crate::services::playback::{
    AdaptiveEngine, EngineErrorInfo, PlaybackErrorKind, PlaybackEvent,
    PlaybackPlatform, PreviewFailure, SessionEvent, SessionEvents, SessionToken,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewPhase {
    Idle,
    Loading,
    Playing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackMode {
    Adaptive,
    Native,
}

struct Session {
    token: SessionToken,
    url: String,
    mode: PlaybackMode,
    engine: Option<Box<dyn AdaptiveEngine>>,
}

struct PreviewState {
    phase: PreviewPhase,
    session: Option<Session>,
    /// Standing inline error, cleared by the next teardown or a dismiss
    error: Option<String>,
}

pub struct PreviewManager {
    context: Arc<ClientContext>,
    platform: Arc<dyn PlaybackPlatform>,
    sink: Arc<dyn EventSink>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    state: Mutex<PreviewState>,
}

impl PreviewManager {
    /// Create the manager and the receiver its sessions report into; feed the receiver to `run`
    pub fn new(
        context: Arc<ClientContext>,
        platform: Arc<dyn PlaybackPlatform>,
        sink: Arc<dyn EventSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            context,
            platform,
            sink,
            events_tx,
            state: Mutex::new(PreviewState {
                phase: PreviewPhase::Idle,
                session: None,
                error: None,
            }),
        };
        (manager, events_rx)
    }

    pub async fn phase(&self) -> PreviewPhase {
        self.state.lock().await.phase
    }

    /// Source of the live session, if any
    pub async fn current_url(&self) -> Option<String> {
        self.state.lock().await.session.as_ref().map(|s| s.url.clone())
    }

    pub async fn error(&self) -> Option<String> {
        self.state.lock().await.error.clone()
    }

    /// Replace whatever is playing with a preview of `url`
    pub async fn select_previewable(&self, url: &str) -> Result<SessionToken, PreviewFailure> {
        let (token, media) = {
            let mut state = self.state.lock().await;
            self.teardown_locked(&mut state);

            let mode = if self.platform.supports_adaptive() {
                PlaybackMode::Adaptive
            } else if self.platform.supports_native() {
                PlaybackMode::Native
            } else {
                log::warn!("No preview playback available for {url}");
                self.set_phase(&mut state, PreviewPhase::Idle);
                self.show_error(&mut state, &PreviewFailure::Unsupported);
                return Err(PreviewFailure::Unsupported);
            };

            let token = self.context.begin_preview_session();
            let events = SessionEvents::new(token, self.events_tx.clone());
            let media = self.platform.media_sink();
            log::info!("Starting preview {token} ({mode:?}) for {url}");

            let engine = match mode {
                PlaybackMode::Adaptive => Some(self.platform.create_engine(events)),
                PlaybackMode::Native => {
                    media.set_source(url);
                    media.watch_errors(events);
                    None
                }
            };
            state.session = Some(Session {
                token,
                url: url.to_string(),
                mode,
                engine,
            });
            self.set_phase(&mut state, PreviewPhase::Loading);

            if let Some(engine) = state.session.as_mut().and_then(|s| s.engine.as_mut()) {
                let setup = engine
                    .load_source(url)
                    .and_then(|_| engine.attach_media(media.as_ref()));
                if let Err(e) = setup {
                    log::warn!("Preview engine setup failed for {token}: {e}");
                    let failure = PreviewFailure::Engine(PlaybackErrorKind::Other);
                    self.fail_locked(&mut state, token, &failure);
                    return Err(failure);
                }
            }

            (token, media)
        };

        // lock released: a newer selection may supersede this session while play is pending
        let played = media.play().await;

        let mut state = self.state.lock().await;
        if !self.context.is_current_preview(token) {
            log::debug!("Discarding play result for superseded preview {token}");
            return Err(PreviewFailure::Superseded);
        }
        match played {
            Ok(()) => {
                self.set_phase(&mut state, PreviewPhase::Playing);
                Ok(token)
            }
            Err(e) => {
                log::warn!("Preview {token} failed to start playback: {e}");
                let failure = PreviewFailure::Play(e);
                self.fail_locked(&mut state, token, &failure);
                Err(failure)
            }
        }
    }

    /// Custom inputs have no preview
    pub async fn select_custom(&self) {
        self.teardown().await;
    }

    /// Stop any session and clear the standing error. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        self.teardown_locked(&mut state);
        self.set_phase(&mut state, PreviewPhase::Idle);
    }

    /// Remove the inline error without touching playback
    pub async fn dismiss_error(&self) {
        let mut state = self.state.lock().await;
        self.clear_error(&mut state);
    }

    /// Engine error for a session. Non-fatal errors leave playback running.
    pub async fn on_engine_error(&self, token: SessionToken, info: EngineErrorInfo) {
        if !info.fatal {
            log::debug!("Recoverable {:?} error in preview {token}: {}", info.kind, info.details);
            return;
        }
        let mut state = self.state.lock().await;
        if !self.context.is_current_preview(token) {
            log::debug!("Ignoring error from superseded preview {token}");
            return;
        }
        log::warn!("Fatal {:?} error in preview {token}: {}", info.kind, info.details);
        self.fail_locked(&mut state, token, &PreviewFailure::Engine(info.kind));
    }

    pub async fn handle_event(&self, event: SessionEvent) {
        let token = event.token;
        match event.event {
            PlaybackEvent::EngineError(info) => self.on_engine_error(token, info).await,
            PlaybackEvent::SinkError(details) => {
                let mut state = self.state.lock().await;
                let native = state
                    .session
                    .as_ref()
                    .is_some_and(|s| s.token == token && s.mode == PlaybackMode::Native);
                if !native || !self.context.is_current_preview(token) {
                    log::debug!("Ignoring sink error for preview {token}: {details}");
                    return;
                }
                log::warn!("Native playback error in preview {token}: {details}");
                self.fail_locked(&mut state, token, &PreviewFailure::Native(details));
            }
            PlaybackEvent::Ended => {
                let mut state = self.state.lock().await;
                if self.context.is_current_preview(token) {
                    log::info!("Preview {token} ended");
                    self.teardown_locked(&mut state);
                    self.set_phase(&mut state, PreviewPhase::Idle);
                }
            }
        }
    }

    /// Consume session events until the manager is dropped
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Error → teardown → exactly one notice → Idle
    fn fail_locked(&self, state: &mut PreviewState, token: SessionToken, failure: &PreviewFailure) {
        if !self.context.is_current_preview(token) {
            return;
        }
        self.set_phase(state, PreviewPhase::Error);
        self.teardown_locked(state);
        self.show_error(state, failure);
        self.set_phase(state, PreviewPhase::Idle);
    }

    fn teardown_locked(&self, state: &mut PreviewState) {
        self.clear_error(state);
        if let Some(mut session) = state.session.take() {
            if let Some(mut engine) = session.engine.take() {
                engine.destroy();
            }
            self.context.end_preview_session(session.token);
            log::debug!("Preview {} torn down", session.token);
        }
        self.platform.media_sink().release();
    }

    fn set_phase(&self, state: &mut PreviewState, phase: PreviewPhase) {
        if state.phase != phase {
            state.phase = phase;
            self.sink.emit(PREVIEW_STATE, json!({ "phase": phase }));
        }
    }

    fn show_error(&self, state: &mut PreviewState, failure: &PreviewFailure) {
        let message = failure.to_string();
        state.error = Some(message.clone());
        emit_event(self.sink.as_ref(), PREVIEW_ERROR, &Notice::inline(message));
    }

    fn clear_error(&self, state: &mut PreviewState) {
        if state.error.take().is_some() {
            self.sink.emit(PREVIEW_ERROR_CLEARED, json!({}));
        }
    }
}
