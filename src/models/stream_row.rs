// StreamRow Model
// Display projection of a stream record

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::stream_record::{StreamHealth, StreamRecord};

/// Longest error excerpt shown in the health column
const ERROR_EXCERPT_CHARS: usize = 30;

/// Health column contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HealthView {
    /// Neutral placeholder when the backend sent no health record
    NoData,
    #[serde(rename_all = "camelCase")]
    Metrics {
        fps: f64,
        bitrate: String,
        restarts: u32,
        last_error: Option<String>,
        last_check: String,
    },
}

impl HealthView {
    fn from_health(health: Option<&StreamHealth>) -> Self {
        let Some(health) = health else {
            return Self::NoData;
        };

        Self::Metrics {
            fps: health.fps,
            bitrate: health
                .bitrate
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "0 kb/s".to_string()),
            restarts: health.restart_count,
            last_error: health
                .last_error
                .as_deref()
                .filter(|e| !e.is_empty())
                .map(error_excerpt),
            last_check: local_time(health.last_health_check.as_deref()),
        }
    }
}

/// One row of the active-streams table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRow {
    pub name: String,
    pub source: String,
    pub destination: String,
    pub status: String,
    pub status_class: String,
    pub owner: String,
    pub started: String,
    pub health: HealthView,
    /// False while a stop command for this stream is in flight
    pub stop_enabled: bool,
}

impl StreamRow {
    pub fn from_record(record: &StreamRecord, stopping: bool) -> Self {
        let source = match record.source_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => infer_source_label(&record.input).to_string(),
        };

        Self {
            name: record.name.clone(),
            source,
            destination: record.destination.label().to_string(),
            status: record.status.as_str().to_string(),
            status_class: record.status.badge_class().to_string(),
            owner: record.owner.clone(),
            started: local_time(record.start_time.as_deref()),
            health: HealthView::from_health(record.health.as_ref()),
            stop_enabled: !stopping,
        }
    }
}

/// Label for records that arrived without a source name
pub fn infer_source_label(input: &str) -> &'static str {
    if input.trim().is_empty() {
        "Unknown"
    } else if input.starts_with("rtmp://") || input.starts_with("rtmps://") {
        "Custom RTMP"
    } else if input.contains(".m3u8") || input.contains("playlist") {
        "Live Stream"
    } else {
        "Custom Source"
    }
}

fn error_excerpt(error: &str) -> String {
    let excerpt: String = error.chars().take(ERROR_EXCERPT_CHARS).collect();
    format!("{excerpt}...")
}

fn local_time(timestamp: Option<&str>) -> String {
    timestamp
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Destination, StreamStatus};

    fn record(name: &str) -> StreamRecord {
        StreamRecord {
            name: name.to_string(),
            input: "rtmp://ingest/live/a".to_string(),
            destination: Destination::Youtube,
            status: StreamStatus::Active,
            owner: "alice".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_health_renders_placeholder() {
        let row = StreamRow::from_record(&record("a"), false);
        assert_eq!(row.health, HealthView::NoData);
        assert_eq!(row.source, "Custom RTMP");
        assert_eq!(row.destination, "YouTube");
        assert_eq!(row.started, "N/A");
        assert!(row.stop_enabled);
    }

    #[test]
    fn test_health_metrics_defaults_and_truncation() {
        let mut rec = record("a");
        rec.source_name = Some("Plex 2".to_string());
        rec.health = Some(StreamHealth {
            fps: 29.0,
            last_error: Some("Connection refused by upstream server at 10.0.0.1".to_string()),
            last_health_check: Some("not a timestamp".to_string()),
            ..Default::default()
        });

        let row = StreamRow::from_record(&rec, true);
        assert_eq!(row.source, "Plex 2");
        assert!(!row.stop_enabled);
        match row.health {
            HealthView::Metrics { fps, bitrate, restarts, last_error, last_check } => {
                assert_eq!(fps, 29.0);
                assert_eq!(bitrate, "0 kb/s");
                assert_eq!(restarts, 0);
                assert_eq!(last_error.unwrap(), "Connection refused by upstream...");
                assert_eq!(last_check, "N/A");
            }
            HealthView::NoData => panic!("expected metrics"),
        }
    }

    #[test]
    fn test_source_label_inference() {
        assert_eq!(infer_source_label("rtmps://x/app"), "Custom RTMP");
        assert_eq!(infer_source_label("http://cdn/live/stream.m3u8"), "Live Stream");
        assert_eq!(infer_source_label("srt://host:9000"), "Custom Source");
        assert_eq!(infer_source_label(""), "Unknown");
    }
}
