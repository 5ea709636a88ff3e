//! Transport abstraction between a sync manager and the sync server.
//!
//! A transport fetches the authoritative state, appends events, uploads full
//! snapshots, and opens a server-push channel. Push channels are polled, the
//! same way the application polls for input.

mod memory;
mod sse;

#[cfg(feature = "http")]
mod http;

pub use memory::{MemoryServer, MemorySubscription, MemoryTransport};
pub use sse::SseDecoder;

#[cfg(feature = "http")]
pub use http::HttpTransport;

use crate::canvas::CanvasSnapshot;
use crate::history::HistoryRecord;
use crate::sync::protocol::{FullDataResponse, PushMessage, RemoteEvent};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Channel closed")]
    Closed,
    #[error("Transport error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Malformed(e.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Authoritative state: the last full snapshot plus every event after it.
#[derive(Debug, Clone, Default)]
pub struct FullState {
    pub snapshot: Option<CanvasSnapshot>,
    pub events: Vec<RemoteEvent>,
    /// Highest seq the server had assigned when the state was read.
    pub seq: u64,
}

impl FullState {
    /// Decode a full-data response. The embedded canvas must be a snapshot
    /// produced by `Canvas::export`.
    pub fn from_response(response: FullDataResponse) -> TransportResult<Self> {
        let snapshot = match response.canvas_json {
            Some(value) if !value.is_null() => Some(serde_json::from_value(value)?),
            _ => None,
        };
        let seq = response
            .events
            .iter()
            .map(|e| e.seq)
            .fold(response.seq_counter, u64::max);
        Ok(Self {
            snapshot,
            events: response.events,
            seq,
        })
    }
}

/// Server acknowledgement of an appended event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    pub seq: u64,
    /// Server log length after the append.
    pub queue_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullSyncReceipt {
    pub success: bool,
}

/// An open server-push channel.
pub trait Subscription {
    /// Drain messages received since the last poll (non-blocking).
    fn poll_events(&mut self) -> Vec<PushMessage>;

    /// Stop receiving. Further polls return nothing.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Trait for sync transports.
///
/// Note: On native platforms, implementations must be Send + Sync.
/// On WASM, these bounds are relaxed since it's single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub trait Transport: Send + Sync {
    /// Fetch the stored snapshot and the events recorded after it.
    fn fetch_full_state(&self) -> BoxFuture<'_, TransportResult<FullState>>;

    /// Append a history record as a `client:change` event.
    fn push_event(&self, record: &HistoryRecord, client_id: &str) -> BoxFuture<'_, TransportResult<PushReceipt>>;

    /// Replace the server snapshot, truncating its event log.
    fn push_full_state(
        &self,
        snapshot: &CanvasSnapshot,
        client_id: &str,
    ) -> BoxFuture<'_, TransportResult<FullSyncReceipt>>;

    /// Open the server-push channel for `client_id`. Resolves once the
    /// server has confirmed the channel, so every event appended afterwards
    /// is delivered on it.
    fn subscribe(&self, client_id: &str) -> BoxFuture<'_, TransportResult<Box<dyn Subscription>>>;
}

/// Trait for sync transports (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait Transport {
    /// Fetch the stored snapshot and the events recorded after it.
    fn fetch_full_state(&self) -> BoxFuture<'_, TransportResult<FullState>>;

    /// Append a history record as a `client:change` event.
    fn push_event(&self, record: &HistoryRecord, client_id: &str) -> BoxFuture<'_, TransportResult<PushReceipt>>;

    /// Replace the server snapshot, truncating its event log.
    fn push_full_state(
        &self,
        snapshot: &CanvasSnapshot,
        client_id: &str,
    ) -> BoxFuture<'_, TransportResult<FullSyncReceipt>>;

    /// Open the server-push channel for `client_id`. Resolves once the
    /// server has confirmed the channel, so every event appended afterwards
    /// is delivered on it.
    fn subscribe(&self, client_id: &str) -> BoxFuture<'_, TransportResult<Box<dyn Subscription>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_state_without_snapshot() {
        let state = FullState::from_response(FullDataResponse::default()).unwrap();
        assert!(state.snapshot.is_none());
        assert!(state.events.is_empty());
        assert_eq!(state.seq, 0);
    }

    #[test]
    fn test_full_state_seq_covers_truncated_events() {
        let response = FullDataResponse {
            canvas_json: Some(serde_json::to_value(CanvasSnapshot::default()).unwrap()),
            events: Vec::new(),
            seq_counter: 11,
        };
        assert_eq!(FullState::from_response(response).unwrap().seq, 11);

        let event = RemoteEvent {
            seq: 4,
            event_type: "client:change".to_string(),
            data: json!({}),
        };
        let response = FullDataResponse {
            events: vec![event],
            ..FullDataResponse::default()
        };
        assert_eq!(FullState::from_response(response).unwrap().seq, 4);
    }

    #[test]
    fn test_full_state_rejects_foreign_canvas() {
        let response = FullDataResponse {
            canvas_json: Some(json!({ "shapes": "nope" })),
            ..FullDataResponse::default()
        };
        assert!(matches!(
            FullState::from_response(response),
            Err(TransportError::Malformed(_))
        ));
    }
}
