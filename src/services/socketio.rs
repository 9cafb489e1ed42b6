// Socket.IO Codec
// Engine.IO v4 / Socket.IO v4 text packet framing for the websocket transport

use serde::Deserialize;
use serde_json::Value;

use super::realtime_channel::ChannelError;

const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO open handshake
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChannelError::Protocol("empty engine packet".to_string()))?;
        let body = chars.as_str();

        match kind {
            '0' => serde_json::from_str(body)
                .map(Self::Open)
                .map_err(|e| ChannelError::Protocol(format!("invalid open packet: {e}"))),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ChannelError::Protocol(format!("unknown engine packet type '{other}'"))),
        }
    }

    /// Encode a client-originated packet
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn event(name: &str, payload: Value, id: Option<u64>) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChannelError::Protocol("empty socket packet".to_string()))?;
        let mut rest = chars.as_str();

        // Namespace: "/name," prefix, absent for the default namespace
        let namespace = if rest.starts_with('/') {
            let (ns, tail) = match rest.find(',') {
                Some(pos) => (&rest[..pos], &rest[pos + 1..]),
                None => (rest, ""),
            };
            rest = tail;
            ns.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        // Ack id: leading digits before the JSON body
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ChannelError::Protocol(format!("invalid ack id: {e}")))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let body: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|e| ChannelError::Protocol(format!("invalid packet body: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data: body }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut args = into_args(body)?;
                if args.is_empty() {
                    return Err(ChannelError::Protocol("event without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ChannelError::Protocol(format!("event name is not a string: {other}")))
                    }
                };
                Ok(Self::Event { namespace, id, name, args })
            }
            '3' => {
                let id = id.ok_or_else(|| ChannelError::Protocol("ack without an id".to_string()))?;
                Ok(Self::Ack { namespace, id, args: into_args(body)? })
            }
            '4' => Ok(Self::ConnectError { namespace, data: body }),
            '5' | '6' => Err(ChannelError::Protocol("binary packets are not supported".to_string())),
            other => Err(ChannelError::Protocol(format!("unknown socket packet type '{other}'"))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Connect { namespace, data } => {
                let mut out = format!("0{}", namespace_prefix(namespace));
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
            Self::Disconnect { namespace } => format!("1{}", namespace_prefix(namespace)),
            Self::Event { namespace, id, name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!(
                    "2{}{}{}",
                    namespace_prefix(namespace),
                    id.map(|id| id.to_string()).unwrap_or_default(),
                    Value::Array(array)
                )
            }
            Self::Ack { namespace, id, args } => format!(
                "3{}{}{}",
                namespace_prefix(namespace),
                id,
                Value::Array(args.clone())
            ),
            Self::ConnectError { namespace, data } => {
                let mut out = format!("4{}", namespace_prefix(namespace));
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
        }
    }

    /// Wrap into the Engine.IO message frame sent over the websocket
    pub fn into_frame(self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{namespace},")
    }
}

fn into_args(body: Option<Value>) -> Result<Vec<Value>, ChannelError> {
    match body {
        None => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args),
        Some(other) => Err(ChannelError::Protocol(format!("expected argument array, got {other}"))),
    }
}

/// Websocket endpoint for a relay base URL (`http://host:port` → `ws://host:port/socket.io/...`)
pub fn websocket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    format!("{base}/socket.io/?EIO=4&transport=websocket")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            EnginePacket::Open(open) => {
                assert_eq!(open.sid, "abc");
                assert_eq!(open.ping_interval, 25_000);
                assert_eq!(open.ping_timeout, 5_000);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn test_ping_and_message_frames() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(
            EnginePacket::decode("40").unwrap(),
            EnginePacket::Message("0".to_string())
        );
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
    }

    #[test]
    fn test_decode_push_event() {
        let packet =
            SocketPacket::decode(r#"2["stream_status_update",{"a":{"status":"active"}}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/".to_string(),
                id: None,
                name: "stream_status_update".to_string(),
                args: vec![json!({"a": {"status": "active"}})],
            }
        );
    }

    #[test]
    fn test_decode_ack_with_namespace() {
        let packet = SocketPacket::decode(r#"3/admin,12[{"success":false,"message":"Permission denied"}]"#)
            .unwrap();
        assert_eq!(
            packet,
            SocketPacket::Ack {
                namespace: "/admin".to_string(),
                id: 12,
                args: vec![json!({"success": false, "message": "Permission denied"})],
            }
        );
    }

    #[test]
    fn test_decode_connect_reply() {
        let packet = SocketPacket::decode(r#"0{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Connect {
                namespace: "/".to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );
    }

    #[test]
    fn test_encode_event_with_ack_id() {
        let frame = SocketPacket::event("stop_stream", json!({"stream_name": "morning-show"}), Some(3))
            .into_frame();
        assert_eq!(frame, r#"423["stop_stream",{"stream_name":"morning-show"}]"#);

        let frame = SocketPacket::event("get_stream_status", json!({}), None).into_frame();
        assert_eq!(frame, r#"42["get_stream_status",{}]"#);
        assert_eq!(SocketPacket::connect().into_frame(), "40");
    }

    #[test]
    fn test_binary_packets_rejected() {
        assert!(SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#).is_err());
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://relay.local:5000/"),
            "ws://relay.local:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("https://relay.example.com"),
            "wss://relay.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }
}
