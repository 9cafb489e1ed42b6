// Status Synchronization Engine
// Keeps the local stream set equal to the relay's latest full snapshot

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::models::{CredentialPolicy, StartRequest, StreamRow, StreamSet, ValidationError};
use crate::services::client_context::ClientContext;
use crate::services::events::{emit_event, EventSink, Notice, STREAMS_UPDATED, UI_NOTICE};
use crate::services::realtime_channel::{
    ChannelError, ChannelEvent, Received, GET_STREAM_STATUS, START_STREAM, STOP_STREAM,
    STREAM_STATUS_UPDATE,
};

/// Shown when a start request is missing required fields
pub const VALIDATION_NOTICE: &str = "Please fill in all required fields.";
/// Shown when a stop fails without a server message
pub const STOP_FAILED_NOTICE: &str = "Failed to stop stream";

/// Start command handed to the channel; the outcome arrives later as a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub stream_name: String,
}

/// Positive stop acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopAck {
    pub stream_name: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StopError {
    #[error("{0}")]
    Rejected(String),

    #[error("Stop already in progress for '{0}'")]
    InProgress(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Default, Deserialize)]
struct StopReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

impl StopReply {
    fn parse(payload: Value) -> Self {
        serde_json::from_value(payload).unwrap_or_else(|e| {
            log::warn!("Unreadable stop acknowledgement: {e}");
            Self::default()
        })
    }
}

/// Project a stream set into table rows, disabling stop for pending stops
pub fn render(streams: &StreamSet, stopping: &HashSet<String>) -> Vec<StreamRow> {
    streams
        .iter()
        .map(|record| StreamRow::from_record(record, stopping.contains(&record.name)))
        .collect()
}

pub struct SyncEngine {
    context: Arc<ClientContext>,
    sink: Arc<dyn EventSink>,
    policy: CredentialPolicy,
    stopping: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(context: Arc<ClientContext>, sink: Arc<dyn EventSink>, policy: CredentialPolicy) -> Self {
        Self {
            context,
            sink,
            policy,
            stopping: Mutex::new(HashSet::new()),
        }
    }

    /// Ask the relay for the full set and apply it. Returns whether the reply was applied.
    pub async fn request_snapshot(&self) -> Result<bool, ChannelError> {
        let reply = self
            .context
            .channel()
            .request(GET_STREAM_STATUS, json!({}))
            .await?;
        Ok(self.apply_snapshot(reply).await)
    }

    /// Apply an unsolicited snapshot
    pub async fn on_push(&self, message: Received<Value>) -> bool {
        self.apply_snapshot(message).await
    }

    async fn apply_snapshot(&self, message: Received<Value>) -> bool {
        let streams = match StreamSet::from_value(message.payload) {
            Ok(streams) => streams,
            Err(e) => {
                log::warn!("Ignoring malformed stream snapshot #{}: {e}", message.seq);
                return false;
            }
        };
        let count = streams.len();

        let applied = self.context.cache().write().await.apply(message.seq, streams);
        if !applied {
            log::debug!("Discarding stale stream snapshot #{}", message.seq);
            return false;
        }

        log::debug!("Applied stream snapshot #{} ({count} streams)", message.seq);
        self.publish().await;
        true
    }

    /// Current table rows
    pub async fn rows(&self) -> Vec<StreamRow> {
        let stopping = self.stopping.lock().await.clone();
        let cache = self.context.cache().read().await;
        render(cache.streams(), &stopping)
    }

    async fn publish(&self) {
        let rows = self.rows().await;
        emit_event(self.sink.as_ref(), STREAMS_UPDATED, &rows);
    }

    fn notify(&self, message: &str) {
        emit_event(self.sink.as_ref(), UI_NOTICE, &Notice::blocking(message));
    }

    /// Validate and submit a start command. No local state changes until the relay pushes.
    pub async fn start_stream(&self, request: &StartRequest) -> Result<Submitted, StartError> {
        let command = match request.validate(&self.policy) {
            Ok(command) => command,
            Err(e) => {
                log::info!("Start request rejected locally: {e}");
                self.notify(VALIDATION_NOTICE);
                return Err(e.into());
            }
        };

        let payload = serde_json::to_value(&command)
            .map_err(|e| ChannelError::Protocol(format!("failed to encode start command: {e}")))?;

        log::info!(
            "Starting stream '{}' from '{}'",
            command.stream_name,
            command.source_name
        );
        if let Err(e) = self.context.channel().emit(START_STREAM, payload).await {
            log::warn!("Failed to send start for '{}': {e}", command.stream_name);
            self.notify(&e.to_string());
            return Err(e.into());
        }

        Ok(Submitted {
            stream_name: command.stream_name,
        })
    }

    /// Ask the relay to stop a stream and wait for its verdict
    pub async fn stop_stream(&self, name: &str) -> Result<StopAck, StopError> {
        let name = name.trim().to_string();
        if !self.stopping.lock().await.insert(name.clone()) {
            log::debug!("Stop for '{name}' is already pending");
            return Err(StopError::InProgress(name));
        }
        self.publish().await;

        log::info!("Stopping stream '{name}'");
        let result = self
            .context
            .channel()
            .request(STOP_STREAM, json!({ "stream_name": name }))
            .await;

        let failure = match result {
            Ok(reply) => {
                let reply = StopReply::parse(reply.payload);
                if reply.success {
                    // control stays disabled until the resync lands
                    if let Err(e) = self.request_snapshot().await {
                        log::warn!("Resync after stopping '{name}' failed: {e}");
                    }
                    self.stopping.lock().await.remove(&name);
                    self.publish().await;
                    log::info!("Stream '{name}' stopped");
                    return Ok(StopAck {
                        stream_name: name,
                        message: reply.message,
                    });
                }
                let message = reply
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| STOP_FAILED_NOTICE.to_string());
                StopError::Rejected(message)
            }
            Err(e) => StopError::Channel(e),
        };

        log::warn!("Stop for '{name}' failed: {failure}");
        self.stopping.lock().await.remove(&name);
        self.publish().await;
        match &failure {
            StopError::Rejected(message) => self.notify(message),
            _ => self.notify(STOP_FAILED_NOTICE),
        }
        Err(failure)
    }

    /// React to one channel lifecycle or push event
    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                log::info!("Relay connected, resynchronizing");
                if let Err(e) = self.request_snapshot().await {
                    log::warn!("Resync after connect failed: {e}");
                }
            }
            ChannelEvent::Disconnected { reason } => {
                log::warn!("Relay connection lost ({reason}), keeping last known state");
            }
            ChannelEvent::Push { event, message } if event == STREAM_STATUS_UPDATE => {
                self.on_push(message).await;
            }
            ChannelEvent::Push { event, .. } => {
                log::debug!("Ignoring relay event '{event}'");
            }
        }
    }

    /// Consume channel events until the channel side is dropped
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                // resync runs alongside so pushes keep flowing while the ack is pending
                ChannelEvent::Connected => {
                    let engine = self.clone();
                    tokio::spawn(async move {
                        engine.handle_channel_event(ChannelEvent::Connected).await;
                    });
                }
                other => self.handle_channel_event(other).await,
            }
        }
        log::debug!("Synchronization engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DestinationChoice, InputChoice};
    use crate::services::events::testing::RecordingSink;
    use crate::services::realtime_channel::{ChannelResult, RealtimeChannel};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeChannel {
        seq: AtomicU64,
        emitted: StdMutex<Vec<(String, Value)>>,
        requested: StdMutex<Vec<(String, Value)>>,
        status_reply: StdMutex<Value>,
        stop_reply: StdMutex<ChannelResult<Value>>,
    }

    impl FakeChannel {
        fn new() -> Self {
            Self {
                seq: AtomicU64::new(0),
                emitted: StdMutex::new(Vec::new()),
                requested: StdMutex::new(Vec::new()),
                status_reply: StdMutex::new(json!({})),
                stop_reply: StdMutex::new(Ok(json!({"success": true}))),
            }
        }

        fn set_status(&self, value: Value) {
            *self.status_reply.lock().unwrap() = value;
        }

        fn set_stop(&self, reply: ChannelResult<Value>) {
            *self.stop_reply.lock().unwrap() = reply;
        }

        fn next_seq(&self) -> u64 {
            self.seq.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn requested_events(&self) -> Vec<String> {
            self.requested.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
        }
    }

    #[async_trait]
    impl RealtimeChannel for FakeChannel {
        async fn emit(&self, event: &str, payload: Value) -> ChannelResult<()> {
            self.emitted.lock().unwrap().push((event.to_string(), payload));
            Ok(())
        }

        async fn request(&self, event: &str, payload: Value) -> ChannelResult<Received<Value>> {
            self.requested.lock().unwrap().push((event.to_string(), payload));
            let payload = match event {
                GET_STREAM_STATUS => self.status_reply.lock().unwrap().clone(),
                STOP_STREAM => self.stop_reply.lock().unwrap().clone()?,
                _ => Value::Null,
            };
            Ok(Received { seq: self.next_seq(), payload })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn setup() -> (Arc<FakeChannel>, Arc<RecordingSink>, SyncEngine) {
        let channel = Arc::new(FakeChannel::new());
        let sink = Arc::new(RecordingSink::default());
        let context = Arc::new(ClientContext::new(channel.clone()));
        let engine = SyncEngine::new(context, sink.clone(), CredentialPolicy::default());
        (channel, sink, engine)
    }

    fn names(rows: &[StreamRow]) -> Vec<String> {
        rows.iter().map(|r| r.name.clone()).collect()
    }

    fn morning_show() -> Value {
        json!({
            "morning-show": {
                "input": "rtmp://ingest/live/a",
                "destination": "youtube",
                "stream_key": "secret",
                "status": "active",
                "owner": "alice"
            }
        })
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let (channel, sink, engine) = setup();
        channel.set_status(morning_show());

        assert_eq!(engine.request_snapshot().await, Ok(true));
        let once = engine.rows().await;
        assert_eq!(engine.request_snapshot().await, Ok(true));
        let twice = engine.rows().await;

        assert_eq!(once, twice);
        let published = sink.named(STREAMS_UPDATED);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], published[1]);
        // the secret never reaches the rendered rows
        assert!(!published[0].to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_push_replaces_whole_set() {
        let (_channel, _sink, engine) = setup();
        engine
            .on_push(Received { seq: 1, payload: json!({"a": {}, "b": {}}) })
            .await;
        engine.on_push(Received { seq: 2, payload: json!({"c": {}}) }).await;

        assert_eq!(names(&engine.rows().await), vec!["c"]);

        engine.on_push(Received { seq: 3, payload: json!({}) }).await;
        assert!(engine.rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_older_snapshot_is_refused() {
        let (_channel, sink, engine) = setup();
        assert!(engine.on_push(Received { seq: 5, payload: json!({"new": {}}) }).await);
        assert!(!engine.on_push(Received { seq: 3, payload: json!({"old": {}}) }).await);

        assert_eq!(names(&engine.rows().await), vec!["new"]);
        assert_eq!(sink.named(STREAMS_UPDATED).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_keeps_state() {
        let (_channel, _sink, engine) = setup();
        engine.on_push(Received { seq: 1, payload: json!({"a": {}}) }).await;
        assert!(!engine.on_push(Received { seq: 2, payload: json!([1, 2]) }).await);
        assert_eq!(names(&engine.rows().await), vec!["a"]);
    }

    #[tokio::test]
    async fn test_invalid_start_emits_nothing() {
        let (channel, sink, engine) = setup();
        let request = StartRequest {
            name: "morning-show".to_string(),
            input: InputChoice::Custom { locator: String::new() },
            destination: DestinationChoice::Custom { url: String::new() },
            stream_key: String::new(),
        };

        let result = engine.start_stream(&request).await;
        assert_eq!(result, Err(StartError::Validation(ValidationError::MissingInput)));

        let request = StartRequest {
            name: "news".to_string(),
            input: InputChoice::Custom { locator: "rtmp://ingest/live/b".to_string() },
            destination: DestinationChoice::Platform("youtube".to_string()),
            stream_key: "  ".to_string(),
        };
        assert!(matches!(
            engine.start_stream(&request).await,
            Err(StartError::Validation(ValidationError::MissingStreamKey(_)))
        ));

        assert!(channel.emitted.lock().unwrap().is_empty());
        let notices = sink.notices(UI_NOTICE);
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0], Notice::blocking(VALIDATION_NOTICE));
    }

    #[tokio::test]
    async fn test_valid_start_is_fire_and_forget() {
        let (channel, sink, engine) = setup();
        let request = StartRequest {
            name: "morning-show".to_string(),
            input: InputChoice::Custom { locator: "rtmp://ingest/live/a".to_string() },
            destination: DestinationChoice::Custom { url: "rtmp://cdn/app".to_string() },
            stream_key: String::new(),
        };

        let submitted = engine.start_stream(&request).await.unwrap();
        assert_eq!(submitted.stream_name, "morning-show");

        let emitted = channel.emitted.lock().unwrap().clone();
        assert_eq!(
            emitted,
            vec![(
                START_STREAM.to_string(),
                json!({
                    "stream_name": "morning-show",
                    "input": "rtmp://ingest/live/a",
                    "destination": "rtmp://cdn/app",
                    "stream_key": "",
                    "source_name": "Custom RTMP"
                })
            )]
        );
        // nothing is added locally until the relay pushes it
        assert!(engine.rows().await.is_empty());
        assert!(sink.named(STREAMS_UPDATED).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_stop_rolls_back() {
        let (channel, sink, engine) = setup();
        channel.set_status(morning_show());
        engine.request_snapshot().await.unwrap();
        channel.set_stop(Ok(json!({"success": false, "message": "Permission denied"})));

        let result = engine.stop_stream("morning-show").await;
        assert_eq!(result, Err(StopError::Rejected("Permission denied".to_string())));

        let rows = engine.rows().await;
        assert_eq!(names(&rows), vec!["morning-show"]);
        assert!(rows[0].stop_enabled);

        let published = sink.named(STREAMS_UPDATED);
        assert_eq!(published[1][0]["stopEnabled"], json!(false));
        assert_eq!(published.last().unwrap()[0]["stopEnabled"], json!(true));
        assert_eq!(sink.notices(UI_NOTICE), vec![Notice::blocking("Permission denied")]);
    }

    #[tokio::test]
    async fn test_stop_failure_without_message_uses_default() {
        let (channel, sink, engine) = setup();
        channel.set_stop(Ok(json!({"success": false})));
        assert!(engine.stop_stream("a").await.is_err());

        channel.set_stop(Err(ChannelError::AckTimeout(STOP_STREAM.to_string())));
        assert!(matches!(engine.stop_stream("a").await, Err(StopError::Channel(_))));

        assert_eq!(
            sink.notices(UI_NOTICE),
            vec![Notice::blocking(STOP_FAILED_NOTICE), Notice::blocking(STOP_FAILED_NOTICE)]
        );
    }

    #[tokio::test]
    async fn test_successful_stop_resyncs_instead_of_deleting() {
        let (channel, sink, engine) = setup();
        channel.set_status(morning_show());
        engine.request_snapshot().await.unwrap();

        channel.set_status(json!({}));
        let ack = engine.stop_stream("morning-show").await.unwrap();
        assert_eq!(ack.stream_name, "morning-show");

        assert_eq!(
            channel.requested_events(),
            vec![GET_STREAM_STATUS, STOP_STREAM, GET_STREAM_STATUS]
        );

        // every render before the resync still shows the stream
        let published = sink.named(STREAMS_UPDATED);
        assert_eq!(published.len(), 4);
        assert_eq!(published[1][0]["name"], json!("morning-show"));
        assert_eq!(published[1][0]["stopEnabled"], json!(false));
        assert_eq!(published[2], json!([]));
        assert!(engine.rows().await.is_empty());
        assert!(sink.notices(UI_NOTICE).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_stop_is_ignored_while_pending() {
        let (_channel, _sink, engine) = setup();
        engine.stopping.lock().await.insert("a".to_string());
        assert_eq!(
            engine.stop_stream("a").await,
            Err(StopError::InProgress("a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_reconnect_resyncs_and_disconnect_keeps_state() {
        let (channel, sink, engine) = setup();
        channel.set_status(morning_show());

        engine.handle_channel_event(ChannelEvent::Connected).await;
        assert_eq!(names(&engine.rows().await), vec!["morning-show"]);

        engine
            .handle_channel_event(ChannelEvent::Disconnected { reason: "ping timeout".to_string() })
            .await;
        assert_eq!(names(&engine.rows().await), vec!["morning-show"]);
        assert!(sink.notices(UI_NOTICE).is_empty());

        engine
            .handle_channel_event(ChannelEvent::Push {
                event: STREAM_STATUS_UPDATE.to_string(),
                message: Received { seq: 100, payload: json!({"late-news": {}}) },
            })
            .await;
        assert_eq!(names(&engine.rows().await), vec!["late-news"]);
    }

    #[test]
    fn test_render_falls_back_for_unknown_values() {
        let streams = StreamSet::from_value(json!({
            "a": {"status": "paused", "destination": "twitch"}
        }))
        .unwrap();
        let rows = render(&streams, &HashSet::new());
        assert_eq!(rows[0].status_class, "status-active");
        assert_eq!(rows[0].destination, "twitch");
        assert!(rows[0].stop_enabled);
    }
}
