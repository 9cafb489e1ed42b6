// Playback Contracts
// Capability probes, engine lifecycle and session-scoped events for preview rendering

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one preview session; events from older tokens are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Classification of a playback failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackErrorKind {
    Network,
    Media,
    Other,
}

impl PlaybackErrorKind {
    /// Operator-facing message for a fatal error of this kind
    pub fn message(self) -> &'static str {
        match self {
            Self::Network => "Network error - stream may be unavailable",
            Self::Media => "Media error - stream format issue",
            Self::Other => "Stream playback error occurred",
        }
    }
}

/// Error reported by an adaptive engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineErrorInfo {
    pub fatal: bool,
    pub kind: PlaybackErrorKind,
    pub details: String,
}

impl EngineErrorInfo {
    pub fn fatal(kind: PlaybackErrorKind, details: impl Into<String>) -> Self {
        Self {
            fatal: true,
            kind,
            details: details.into(),
        }
    }

    pub fn recoverable(kind: PlaybackErrorKind, details: impl Into<String>) -> Self {
        Self {
            fatal: false,
            kind,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    EngineError(EngineErrorInfo),
    /// Error raised by the media sink during native playback
    SinkError(String),
    /// Source finished normally
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub token: SessionToken,
    pub event: PlaybackEvent,
}

/// Event handle bound to one session; everything sent through it carries that session's token
#[derive(Debug, Clone)]
pub struct SessionEvents {
    token: SessionToken,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(token: SessionToken, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn send(&self, event: PlaybackEvent) {
        let _ = self.tx.send(SessionEvent {
            token: self.token,
            event,
        });
    }
}

/// Operator-visible preview failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreviewFailure {
    #[error("HLS playback not supported")]
    Unsupported,

    #[error("{}", .0.message())]
    Engine(PlaybackErrorKind),

    #[error("Failed to start video playback")]
    Play(String),

    #[error("Playback error occurred")]
    Native(String),

    #[error("Preview session was replaced")]
    Superseded,
}

/// The single output surface previews render into
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Point the sink at a source for native playback
    fn set_source(&self, url: &str);

    /// Route native playback errors to a session
    fn watch_errors(&self, events: SessionEvents);

    async fn play(&self) -> Result<(), String>;

    /// Drop the current source and stop rendering
    fn release(&self);
}

/// Programmatic adaptive-streaming engine, one instance per session
pub trait AdaptiveEngine: Send {
    fn load_source(&mut self, url: &str) -> Result<(), String>;

    fn attach_media(&mut self, sink: &dyn MediaSink) -> Result<(), String>;

    /// Release everything the engine holds. Must be safe to call twice.
    fn destroy(&mut self);
}

pub trait PlaybackPlatform: Send + Sync {
    fn supports_adaptive(&self) -> bool;

    fn supports_native(&self) -> bool;

    /// New engine whose errors are reported through `events`
    fn create_engine(&self, events: SessionEvents) -> Box<dyn AdaptiveEngine>;

    fn media_sink(&self) -> Arc<dyn MediaSink>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_messages() {
        assert_eq!(
            PreviewFailure::Engine(PlaybackErrorKind::Network).to_string(),
            "Network error - stream may be unavailable"
        );
        assert_eq!(
            PreviewFailure::Engine(PlaybackErrorKind::Media).to_string(),
            "Media error - stream format issue"
        );
        assert_eq!(
            PreviewFailure::Engine(PlaybackErrorKind::Other).to_string(),
            "Stream playback error occurred"
        );
        assert_eq!(
            PreviewFailure::Play("NotAllowedError".to_string()).to_string(),
            "Failed to start video playback"
        );
    }

    #[test]
    fn test_session_events_carry_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = SessionEvents::new(SessionToken::new(4), tx);
        events.send(PlaybackEvent::Ended);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.token, SessionToken::new(4));
        assert_eq!(received.event, PlaybackEvent::Ended);
        assert_eq!(events.token().to_string(), "#4");
    }
}
