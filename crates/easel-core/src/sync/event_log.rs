//! Server-side event log.
//!
//! Holds the sequence counter, the events appended since the last full sync,
//! and the stored canvas snapshot. Both the HTTP server and the in-memory
//! transport keep one of these behind a lock.

use super::protocol::{DebugStatus, FullDataResponse, RemoteEvent};
use serde_json::Value;

/// Number of events included in a debug status.
pub const DEBUG_RECENT_EVENTS: usize = 10;

#[derive(Debug, Default)]
pub struct EventLog {
    seq_counter: u64,
    events: Vec<RemoteEvent>,
    canvas: Option<Value>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number and append.
    pub fn append(&mut self, event_type: impl Into<String>, data: Value) -> RemoteEvent {
        self.seq_counter += 1;
        let event = RemoteEvent {
            seq: self.seq_counter,
            event_type: event_type.into(),
            data,
        };
        self.events.push(event.clone());
        event
    }

    /// Store a new full snapshot and drop every event it supersedes.
    /// The sequence counter keeps counting.
    pub fn replace_snapshot(&mut self, canvas: Value) {
        self.canvas = Some(canvas);
        self.events.clear();
    }

    /// Snapshot plus the events recorded after it.
    pub fn full_data(&self) -> FullDataResponse {
        FullDataResponse {
            canvas_json: self.canvas.clone(),
            events: self.events.clone(),
            seq_counter: self.seq_counter,
        }
    }

    /// Forget everything, including the sequence counter.
    pub fn reset(&mut self) {
        self.seq_counter = 0;
        self.events.clear();
        self.canvas = None;
    }

    pub fn seq_counter(&self) -> u64 {
        self.seq_counter
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn has_snapshot(&self) -> bool {
        self.canvas.is_some()
    }

    pub fn snapshot(&self) -> Option<&Value> {
        self.canvas.as_ref()
    }

    /// The last `n` events, oldest first.
    pub fn recent(&self, n: usize) -> &[RemoteEvent] {
        &self.events[self.events.len().saturating_sub(n)..]
    }

    pub fn debug_status(&self, connected_clients: Vec<String>) -> DebugStatus {
        DebugStatus {
            seq_counter: self.seq_counter,
            events_count: self.events.len(),
            events: self.recent(DEBUG_RECENT_EVENTS).to_vec(),
            has_canvas_json: self.has_snapshot(),
            connected_clients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_assigns_increasing_seq() {
        let mut log = EventLog::new();
        let a = log.append("client:change", json!({}));
        let b = log.append("client:change", json!({}));
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_replace_snapshot_truncates_but_keeps_counter() {
        let mut log = EventLog::new();
        log.append("client:change", json!({}));
        log.append("client:change", json!({}));
        log.replace_snapshot(json!({ "objects": [] }));

        assert!(log.is_empty());
        assert!(log.has_snapshot());
        assert_eq!(log.append("client:change", json!({})).seq, 3);

        let data = log.full_data();
        assert_eq!(data.events.len(), 1);
        assert_eq!(data.canvas_json, Some(json!({ "objects": [] })));
        assert_eq!(data.seq_counter, 3);
    }

    #[test]
    fn test_reset() {
        let mut log = EventLog::new();
        log.append("client:change", json!({}));
        log.replace_snapshot(json!({}));
        log.reset();
        assert_eq!(log.seq_counter(), 0);
        assert!(!log.has_snapshot());
        assert_eq!(log.append("client:change", json!({})).seq, 1);
    }

    #[test]
    fn test_debug_status_limits_events() {
        let mut log = EventLog::new();
        for _ in 0..15 {
            log.append("client:change", json!({}));
        }
        let status = log.debug_status(vec!["a".to_string()]);
        assert_eq!(status.events_count, 15);
        assert_eq!(status.events.len(), DEBUG_RECENT_EVENTS);
        assert_eq!(status.events[0].seq, 6);
        assert_eq!(status.connected_clients, vec!["a".to_string()]);
    }
}
