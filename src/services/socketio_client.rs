// Socket.IO Channel
// Websocket connection to the relay backend with reconnect and acknowledgements

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message};

use crate::models::ClientSettings;
use crate::services::realtime_channel::{
    ChannelError, ChannelEvent, ChannelResult, RealtimeChannel, Received,
};
use crate::services::socketio::{websocket_url, EnginePacket, SocketPacket};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub server_url: String,
    pub session_cookie: Option<String>,
    pub ack_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl ChannelConfig {
    pub fn from_settings(settings: &ClientSettings, session_cookie: Option<String>) -> Self {
        Self {
            server_url: settings.server_url.clone(),
            session_cookie,
            ack_timeout: Duration::from_secs(settings.ack_timeout_secs.max(1)),
            reconnect_initial: Duration::from_millis(settings.reconnect_initial_ms.max(50)),
            reconnect_max: Duration::from_millis(
                settings.reconnect_max_ms.max(settings.reconnect_initial_ms),
            ),
        }
    }
}

/// State shared between the handle and the connection task
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    next_ack_id: AtomicU64,
    receive_seq: AtomicU64,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Received<Value>>>>,
    outbound: StdMutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.receive_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop the writer and fail every outstanding acknowledgement
    fn reset(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = None;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        was_connected
    }
}

/// Socket.IO client implementing the realtime channel
pub struct SocketIoChannel {
    shared: Arc<Shared>,
    ack_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl SocketIoChannel {
    /// Start the connection supervisor. Lifecycle and push events are delivered on `events`.
    pub fn spawn(config: ChannelConfig, events: mpsc::UnboundedSender<ChannelEvent>) -> Arc<Self> {
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ack_timeout = config.ack_timeout;

        tokio::spawn(supervise(config, shared.clone(), events, shutdown_rx));

        Arc::new(Self {
            shared,
            ack_timeout,
            shutdown_tx,
        })
    }

    /// Close the connection and stop reconnecting
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn send_frame(&self, frame: String) -> ChannelResult<()> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let outbound = self
            .shared
            .outbound
            .lock()
            .map_err(|_| ChannelError::Send("outbound lock poisoned".to_string()))?;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| ChannelError::Send("connection writer stopped".to_string())),
            None => Err(ChannelError::NotConnected),
        }
    }

    fn forget_pending(&self, id: u64) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.remove(&id);
        }
    }
}

#[async_trait]
impl RealtimeChannel for SocketIoChannel {
    async fn emit(&self, event: &str, payload: Value) -> ChannelResult<()> {
        self.send_frame(SocketPacket::event(event, payload, None).into_frame())
    }

    async fn request(&self, event: &str, payload: Value) -> ChannelResult<Received<Value>> {
        let id = self.shared.next_ack_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .map_err(|_| ChannelError::Send("pending lock poisoned".to_string()))?
            .insert(id, tx);

        if let Err(e) = self.send_frame(SocketPacket::event(event, payload, Some(id)).into_frame()) {
            self.forget_pending(id);
            return Err(e);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(received)) => Ok(received),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.forget_pending(id);
                Err(ChannelError::AckTimeout(event.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn supervise(
    config: ChannelConfig,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut delay = config.reconnect_initial;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let result = run_connection(&config, &shared, &events, &mut shutdown_rx).await;
        let reason = match result {
            Ok(reason) => {
                delay = config.reconnect_initial;
                reason
            }
            Err(e) => {
                log::warn!("Relay connection attempt failed: {e}");
                e.to_string()
            }
        };

        if shared.reset() {
            log::info!("Disconnected from relay: {reason}");
            let _ = events.send(ChannelEvent::Disconnected { reason });
        }

        if *shutdown_rx.borrow() {
            break;
        }

        log::debug!("Reconnecting to relay in {}ms", delay.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
        delay = (delay * 2).min(config.reconnect_max);
    }

    log::debug!("Relay connection supervisor stopped");
}

/// One connection attempt. Returns the disconnect reason once an
/// established connection ends, or an error if the handshake failed.
async fn run_connection(
    config: &ChannelConfig,
    shared: &Shared,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<String, ChannelError> {
    let url = websocket_url(&config.server_url);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ChannelError::Protocol(format!("invalid relay url {url}: {e}")))?;
    if let Some(cookie) = config.session_cookie.as_deref().filter(|c| !c.is_empty()) {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| ChannelError::Protocol(format!("invalid session cookie: {e}")))?;
        request.headers_mut().insert("Cookie", value);
    }

    log::debug!("Connecting to relay at {url}");
    let (ws_stream, _) = connect_async(request)
        .await
        .map_err(|e| ChannelError::Send(format!("websocket connection failed: {e}")))?;
    let (mut write, mut read) = ws_stream.split();

    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, next_text(&mut read))
        .await
        .map_err(|_| ChannelError::Protocol("timed out waiting for open packet".to_string()))??;
    let open = match EnginePacket::decode(&first)? {
        EnginePacket::Open(open) => open,
        other => {
            return Err(ChannelError::Protocol(format!(
                "expected open packet, got {other:?}"
            )))
        }
    };

    write
        .send(Message::Text(SocketPacket::connect().into_frame()))
        .await
        .map_err(|e| ChannelError::Send(format!("failed to join namespace: {e}")))?;

    tokio::time::timeout(HANDSHAKE_TIMEOUT, join_namespace(&mut write, &mut read))
        .await
        .map_err(|_| ChannelError::Protocol("timed out waiting for namespace connect".to_string()))??;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    if let Ok(mut outbound) = shared.outbound.lock() {
        *outbound = Some(out_tx);
    }
    shared.connected.store(true, Ordering::SeqCst);
    log::info!("Connected to relay at {} (sid {})", config.server_url, open.sid);
    let _ = events.send(ChannelEvent::Connected);

    let idle_limit = Duration::from_millis(open.ping_interval + open.ping_timeout);
    // only inbound frames push the deadline back
    let idle = tokio::time::sleep(idle_limit);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else {
                    break "writer closed".to_string();
                };
                if let Err(e) = write.send(Message::Text(frame)).await {
                    break format!("write failed: {e}");
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = write.send(Message::Text(EnginePacket::Close.encode())).await;
                let _ = write.send(Message::Close(None)).await;
                break "client shutdown".to_string();
            }
            _ = &mut idle => break "ping timeout".to_string(),
            next = read.next() => {
                if matches!(next, Some(Ok(_))) {
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_limit);
                }
                match next {
                    None => break "stream ended".to_string(),
                    Some(Err(e)) => break format!("read error: {e}"),
                    Some(Ok(Message::Text(text))) => match dispatch_text(&text, shared, events) {
                        Inbound::Handled => {}
                        Inbound::Reply(frame) => {
                            if let Err(e) = write.send(Message::Text(frame)).await {
                                break format!("write failed: {e}");
                            }
                        }
                        Inbound::Close(reason) => break reason,
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            log::warn!("Failed to answer websocket ping: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) => break "closed by relay".to_string(),
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    Ok(reason)
}

/// Wait for the namespace connect reply, answering pings meanwhile
async fn join_namespace<W, S>(write: &mut W, read: &mut S) -> Result<(), ChannelError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let text = next_text(read).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Ping(data) => {
                write
                    .send(Message::Text(EnginePacket::Pong(data).encode()))
                    .await
                    .map_err(|e| ChannelError::Send(format!("failed to answer ping: {e}")))?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect { .. } => return Ok(()),
                SocketPacket::ConnectError { data, .. } => {
                    return Err(ChannelError::Protocol(format!(
                        "relay refused connection: {}",
                        data.unwrap_or(Value::Null)
                    )))
                }
                other => log::debug!("Ignoring packet before namespace connect: {other:?}"),
            },
            EnginePacket::Close => {
                return Err(ChannelError::Protocol("closed during handshake".to_string()))
            }
            _ => {}
        }
    }
}

async fn next_text<S>(read: &mut S) -> Result<String, ChannelError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame.map_err(|e| ChannelError::Protocol(format!("read error: {e}")))? {
            Message::Text(text) => return Ok(text),
            Message::Close(_) => return Err(ChannelError::Closed),
            _ => continue,
        }
    }
    Err(ChannelError::Closed)
}

/// Outcome of one inbound text frame
#[derive(Debug, PartialEq)]
enum Inbound {
    Handled,
    Reply(String),
    Close(String),
}

fn dispatch_text(text: &str, shared: &Shared, events: &mpsc::UnboundedSender<ChannelEvent>) -> Inbound {
    let packet = match EnginePacket::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            log::warn!("Dropping malformed frame from relay: {e}");
            return Inbound::Handled;
        }
    };

    let body = match packet {
        EnginePacket::Ping(data) => return Inbound::Reply(EnginePacket::Pong(data).encode()),
        EnginePacket::Close => return Inbound::Close("closed by relay".to_string()),
        EnginePacket::Message(body) => body,
        _ => return Inbound::Handled,
    };

    match SocketPacket::decode(&body) {
        Ok(SocketPacket::Event { name, mut args, .. }) => {
            let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };
            let message = Received {
                seq: shared.next_seq(),
                payload,
            };
            let _ = events.send(ChannelEvent::Push { event: name, message });
            Inbound::Handled
        }
        Ok(SocketPacket::Ack { id, mut args, .. }) => {
            let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };
            let seq = shared.next_seq();
            let waiter = shared.pending.lock().ok().and_then(|mut p| p.remove(&id));
            match waiter {
                Some(tx) => {
                    let _ = tx.send(Received { seq, payload });
                }
                None => log::debug!("Acknowledgement {id} arrived after its request gave up"),
            }
            Inbound::Handled
        }
        Ok(SocketPacket::Disconnect { .. }) => Inbound::Close("disconnected by relay".to_string()),
        Ok(other) => {
            log::debug!("Ignoring relay packet: {other:?}");
            Inbound::Handled
        }
        Err(e) => {
            log::warn!("Dropping malformed packet from relay: {e}");
            Inbound::Handled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::realtime_channel::{GET_STREAM_STATUS, STREAM_STATUS_UPDATE};
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

    const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":300,"pingTimeout":200}"#;

    async fn relay_handshake(ws: &mut WebSocketStream<TcpStream>) -> String {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        let join = next_text(ws).await.unwrap();
        ws.send(Message::Text(r#"40{"sid":"n1"}"#.to_string())).await.unwrap();
        join
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no channel event in time")
            .expect("event channel closed")
    }

    #[test]
    fn test_ping_gets_pong() {
        let shared = Shared::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(dispatch_text("2", &shared, &tx), Inbound::Reply("3".to_string()));
    }

    #[test]
    fn test_push_and_ack_share_receive_order() {
        let shared = Shared::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(7, ack_tx);

        dispatch_text(r#"42["stream_status_update",{"a":{}}]"#, &shared, &tx);
        dispatch_text(r#"437[{"b":{}}]"#, &shared, &tx);

        match rx.try_recv().unwrap() {
            ChannelEvent::Push { event, message } => {
                assert_eq!(event, "stream_status_update");
                assert_eq!(message.seq, 1);
                assert_eq!(message.payload, json!({"a": {}}));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let ack = ack_rx.try_recv().unwrap();
        assert_eq!(ack.seq, 2);
        assert_eq!(ack.payload, json!({"b": {}}));
        assert!(shared.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_ack_and_garbage_are_ignored() {
        let shared = Shared::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(dispatch_text(r#"4399[{}]"#, &shared, &tx), Inbound::Handled);
        assert_eq!(dispatch_text("4{not json", &shared, &tx), Inbound::Handled);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_server_disconnect_closes() {
        let shared = Shared::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(dispatch_text("41", &shared, &tx), Inbound::Close(_)));
        assert!(matches!(dispatch_text("1", &shared, &tx), Inbound::Close(_)));
    }

    #[test]
    fn test_reset_fails_pending_requests() {
        let shared = Shared::default();
        shared.connected.store(true, Ordering::SeqCst);
        let (ack_tx, mut ack_rx) = oneshot::channel::<Received<Value>>();
        shared.pending.lock().unwrap().insert(1, ack_tx);

        assert!(shared.reset());
        assert!(ack_rx.try_recv().is_err());
        assert!(!shared.reset());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = SocketIoChannel::spawn(
            ChannelConfig {
                server_url: "http://127.0.0.1:9".to_string(),
                session_cookie: None,
                ack_timeout: Duration::from_millis(50),
                reconnect_initial: Duration::from_secs(60),
                reconnect_max: Duration::from_secs(60),
            },
            tx,
        );
        assert_eq!(
            channel.emit("start_stream", json!({})).await,
            Err(ChannelError::NotConnected)
        );
        assert_eq!(
            channel.request("get_stream_status", json!({})).await,
            Err(ChannelError::NotConnected)
        );
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_connection_lifecycle_against_loopback_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            // first connection: ping, one push, answer one request, then drop
            let (tcp, _) = listener.accept().await.unwrap();
            let cookie_tx = seen_tx.clone();
            let mut ws = accept_hdr_async(tcp, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let cookie = req
                    .headers()
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let _ = cookie_tx.send(cookie);
                Ok(resp)
            })
            .await
            .unwrap();
            seen_tx.send(relay_handshake(&mut ws).await).unwrap();

            ws.send(Message::Text("2".to_string())).await.unwrap();
            seen_tx.send(next_text(&mut ws).await.unwrap()).unwrap();

            ws.send(Message::Text(r#"42["stream_status_update",{"a":{}}]"#.to_string()))
                .await
                .unwrap();

            let request = next_text(&mut ws).await.unwrap();
            let id = match EnginePacket::decode(&request).unwrap() {
                EnginePacket::Message(body) => match SocketPacket::decode(&body).unwrap() {
                    SocketPacket::Event { id: Some(id), .. } => id,
                    other => panic!("expected acknowledged event, got {other:?}"),
                },
                other => panic!("expected message, got {other:?}"),
            };
            seen_tx.send(request).unwrap();
            let ack = SocketPacket::Ack {
                namespace: "/".to_string(),
                id,
                args: vec![json!({"b": {}})],
            };
            ws.send(Message::Text(ack.into_frame())).await.unwrap();
            drop(ws);

            // second connection: join, then never send another frame
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            relay_handshake(&mut ws).await;
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SocketIoChannel::spawn(
            ChannelConfig {
                server_url: format!("http://{addr}"),
                session_cookie: Some("session=abc".to_string()),
                ack_timeout: Duration::from_millis(200),
                reconnect_initial: Duration::from_millis(20),
                reconnect_max: Duration::from_millis(100),
            },
            tx,
        );

        assert_eq!(next_event(&mut rx).await, ChannelEvent::Connected);
        assert!(channel.is_connected());
        assert_eq!(seen_rx.recv().await.unwrap(), "session=abc");
        assert_eq!(seen_rx.recv().await.unwrap(), "40");
        assert_eq!(seen_rx.recv().await.unwrap(), "3");

        match next_event(&mut rx).await {
            ChannelEvent::Push { event, message } => {
                assert_eq!(event, STREAM_STATUS_UPDATE);
                assert_eq!(message.seq, 1);
                assert_eq!(message.payload, json!({"a": {}}));
            }
            other => panic!("expected push, got {other:?}"),
        }

        let ack = channel.request(GET_STREAM_STATUS, json!({})).await.unwrap();
        assert_eq!(ack.seq, 2);
        assert_eq!(ack.payload, json!({"b": {}}));
        assert!(seen_rx
            .recv()
            .await
            .unwrap()
            .starts_with(r#"420["get_stream_status""#));

        // relay dropped the socket: disconnect, then reconnect
        assert!(matches!(next_event(&mut rx).await, ChannelEvent::Disconnected { .. }));
        assert_eq!(next_event(&mut rx).await, ChannelEvent::Connected);
        let connected_at = Instant::now();

        assert_eq!(
            channel.request(GET_STREAM_STATUS, json!({})).await,
            Err(ChannelError::AckTimeout(GET_STREAM_STATUS.to_string()))
        );

        // outbound traffic must not keep a silent connection alive
        let writer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                for _ in 0..30 {
                    let _ = channel.emit("start_stream", json!({})).await;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
        };

        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Disconnected {
                reason: "ping timeout".to_string()
            }
        );
        assert!(connected_at.elapsed() < Duration::from_millis(1500));
        assert!(!channel.is_connected());

        writer.abort();
        channel.shutdown();
    }
}
