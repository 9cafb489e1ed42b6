use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rendered stream table (`Vec<StreamRow>`)
pub const STREAMS_UPDATED: &str = "streams://updated";
/// Operator notice (`Notice`)
pub const UI_NOTICE: &str = "ui://notice";
/// Preview phase change (`PreviewPhase`)
pub const PREVIEW_STATE: &str = "preview://state";
/// Inline preview error (`Notice`)
pub const PREVIEW_ERROR: &str = "preview://error";
/// Inline preview error removed
pub const PREVIEW_ERROR_CLEARED: &str = "preview://error_cleared";

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    if let Ok(value) = serde_json::to_value(payload) {
        sink.emit(event, value);
    }
}

/// How a notice is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Must be acknowledged before continuing
    Blocking,
    /// Dismissible banner next to the preview
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn blocking(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Blocking,
            message: message.into(),
        }
    }

    pub fn inline(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Inline,
            message: message.into(),
        }
    }
}
