// StreamRecord Model
// Server-owned stream state as received in status snapshots

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Publish target of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Youtube,
    Facebook,
    Instagram,
    X,
    Custom,
    /// Anything the client does not know, usually a custom RTMP URL
    Other(String),
}

impl Destination {
    /// Wire identifier sent to and received from the backend
    pub fn as_str(&self) -> &str {
        match self {
            Self::Youtube => "youtube",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::X => "x",
            Self::Custom => "custom",
            Self::Other(raw) => raw,
        }
    }

    /// Display label for the stream table
    pub fn label(&self) -> &str {
        match self {
            Self::Youtube => "YouTube",
            Self::Facebook => "Facebook",
            Self::Instagram => "Instagram",
            Self::X => "X Live",
            Self::Custom => "Custom",
            Self::Other(raw) if raw.trim().is_empty() => "Unknown",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        match value {
            "youtube" => Self::Youtube,
            "facebook" => Self::Facebook,
            "instagram" => Self::Instagram,
            "x" => Self::X,
            "custom" => Self::Custom,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from(lenient_string(deserializer)?.as_str()))
    }
}

/// Stream status as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Warning,
    Failed,
    Restarting,
    Unknown(String),
}

impl StreamStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Warning => "warning",
            Self::Failed => "failed",
            Self::Restarting => "restarting",
            Self::Unknown(raw) => raw,
        }
    }

    /// Badge class for the status column. Restarting and unknown statuses
    /// share the active badge.
    pub fn badge_class(&self) -> &'static str {
        match self {
            Self::Active | Self::Restarting | Self::Unknown(_) => "status-active",
            Self::Warning => "status-warning",
            Self::Failed => "status-failed",
        }
    }
}

impl From<&str> for StreamStatus {
    fn from(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "warning" => Self::Warning,
            "failed" => Self::Failed,
            "restarting" => Self::Restarting,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl Serialize for StreamStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StreamStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from(lenient_string(deserializer)?.as_str()))
    }
}

/// Accept strings, null and scalars so an odd value never rejects a snapshot
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Numbers may arrive as null or as numeric strings
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = lenient_f64(deserializer)?;
    Ok(if value.is_finite() && value > 0.0 {
        value.min(u32::MAX as f64) as u32
    } else {
        0
    })
}

/// Health metrics computed by the backend. Opaque to the client apart from display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamHealth {
    #[serde(deserialize_with = "lenient_f64")]
    pub fps: f64,
    /// Bitrate as printed by the relay, e.g. "2500.1kbits/s"
    pub bitrate: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub last_health_check: Option<String>,
    pub last_restart: Option<String>,
}

/// One stream in the live set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRecord {
    /// Filled from the snapshot key
    #[serde(skip)]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub input: String,
    pub source_name: Option<String>,
    pub destination: Destination,
    #[serde(skip_serializing)]
    pub stream_key: Option<String>,
    pub status: StreamStatus,
    #[serde(deserialize_with = "lenient_string")]
    pub owner: String,
    pub start_time: Option<String>,
    pub health: Option<StreamHealth>,
}

/// Full point-in-time set of streams, keyed and ordered by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSet {
    records: BTreeMap<String, StreamRecord>,
}

impl StreamSet {
    /// Decode a snapshot payload (mapping of stream name to record)
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, StreamRecord> = serde_json::from_value(value)?;
        let records = raw
            .into_iter()
            .map(|(name, mut record)| {
                record.name = name.clone();
                (name, record)
            })
            .collect();
        Ok(Self { records })
    }

    pub fn get(&self, name: &str) -> Option<&StreamRecord> {
        self.records.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
