// Realtime Channel
// Bidirectional message channel to the relay backend

use async_trait::async_trait;
use serde_json::Value;

/// Start a stream (fire-and-forget)
pub const START_STREAM: &str = "start_stream";
/// Stop a stream (acknowledged)
pub const STOP_STREAM: &str = "stop_stream";
/// Query the full stream set (acknowledged)
pub const GET_STREAM_STATUS: &str = "get_stream_status";
/// Unsolicited full stream set from the backend
pub const STREAM_STATUS_UPDATE: &str = "stream_status_update";

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors raised by the realtime channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Timed out waiting for acknowledgement of '{0}'")]
    AckTimeout(String),

    #[error("Connection closed before acknowledgement")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Inbound payload stamped with its position in the channel's receive order
#[derive(Debug, Clone, PartialEq)]
pub struct Received<T> {
    pub seq: u64,
    pub payload: T,
}

/// Connection lifecycle and unsolicited messages
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Push { event: String, message: Received<Value> },
}

/// Transport used by the synchronization engine
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Send an event without waiting for any response
    async fn emit(&self, event: &str, payload: Value) -> ChannelResult<()>;

    /// Send an event and wait for the backend's acknowledgement payload
    async fn request(&self, event: &str, payload: Value) -> ChannelResult<Received<Value>>;

    fn is_connected(&self) -> bool;
}
