// Client Context
// Shared state handed to the synchronization engine and the preview manager

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::StreamSet;
use crate::services::playback::SessionToken;
use crate::services::realtime_channel::RealtimeChannel;

/// Last applied full snapshot and its receipt sequence
#[derive(Debug, Default)]
pub struct StreamCache {
    streams: StreamSet,
    applied_seq: Option<u64>,
}

impl StreamCache {
    /// Replace the whole set. Returns false when the snapshot was received
    /// before the one currently applied.
    pub fn apply(&mut self, seq: u64, streams: StreamSet) -> bool {
        if let Some(applied) = self.applied_seq {
            if seq < applied {
                return false;
            }
        }
        self.streams = streams;
        self.applied_seq = Some(seq);
        true
    }

    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    pub fn applied_seq(&self) -> Option<u64> {
        self.applied_seq
    }
}

pub struct ClientContext {
    channel: Arc<dyn RealtimeChannel>,
    cache: RwLock<StreamCache>,
    next_token: AtomicU64,
    /// 0 when no preview session is live
    preview_token: AtomicU64,
}

impl ClientContext {
    pub fn new(channel: Arc<dyn RealtimeChannel>) -> Self {
        Self {
            channel,
            cache: RwLock::new(StreamCache::default()),
            next_token: AtomicU64::new(1),
            preview_token: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> &Arc<dyn RealtimeChannel> {
        &self.channel
    }

    pub fn cache(&self) -> &RwLock<StreamCache> {
        &self.cache
    }

    /// Allocate a fresh token and make it the live preview session
    pub fn begin_preview_session(&self) -> SessionToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.preview_token.store(token, Ordering::SeqCst);
        SessionToken::new(token)
    }

    /// Clear the live session if it is still `token`
    pub fn end_preview_session(&self, token: SessionToken) {
        let _ = self.preview_token.compare_exchange(
            token.value(),
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn is_current_preview(&self, token: SessionToken) -> bool {
        self.preview_token.load(Ordering::SeqCst) == token.value()
    }

    pub fn current_preview(&self) -> Option<SessionToken> {
        match self.preview_token.load(Ordering::SeqCst) {
            0 => None,
            token => Some(SessionToken::new(token)),
        }
    }
}
