//! Shared server state: the event log and the connected push channels.

use crate::config::ServerConfig;
use crate::error::{ApiError, ApiResult};
use dashmap::DashMap;
use easel_core::sync::EventLog;
use easel_core::sync::protocol::{DebugStatus, FullDataResponse, PushMessage, RemoteEvent};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

/// One open push channel.
struct Client {
    connection: Uuid,
    tx: UnboundedSender<PushMessage>,
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    /// Appends and broadcasts happen under this lock, so every channel sees
    /// events in seq order and a full sync never interleaves with an append.
    log: Mutex<EventLog>,
    clients: DashMap<String, Client>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            log: Mutex::new(EventLog::new()),
            clients: DashMap::new(),
        })
    }

    fn log(&self) -> ApiResult<MutexGuard<'_, EventLog>> {
        self.log
            .lock()
            .map_err(|e| ApiError::Internal(format!("Event log lock poisoned: {}", e)))
    }

    /// Register a push channel. A client reconnecting under the same id
    /// replaces its previous channel.
    pub fn connect(self: &Arc<Self>, client_id: &str) -> ClientChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Uuid::new_v4();
        // Receiver is alive, so this cannot fail.
        let _ = tx.send(PushMessage::Connected {
            client_id: client_id.to_string(),
        });
        self.clients.insert(client_id.to_string(), Client { connection, tx });
        info!("Client connected: {} ({} connected)", client_id, self.clients.len());
        ClientChannel {
            rx,
            _guard: ConnectionGuard {
                state: Arc::clone(self),
                client_id: client_id.to_string(),
                connection,
            },
        }
    }

    fn disconnect(&self, client_id: &str, connection: Uuid) {
        if self.clients.remove_if(client_id, |_, c| c.connection == connection).is_some() {
            info!("Client disconnected: {} ({} connected)", client_id, self.clients.len());
        }
    }

    pub fn connected_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Sequence, store and broadcast an event. Returns the event and the log
    /// length after the append.
    pub fn append(&self, event_type: &str, data: Value) -> ApiResult<(RemoteEvent, usize)> {
        let mut log = self.log()?;
        let event = log.append(event_type, data);
        info!("Event {} ({}) appended, log length {}", event.seq, event.event_type, log.len());
        self.broadcast(&event);
        Ok((event, log.len()))
    }

    fn broadcast(&self, event: &RemoteEvent) {
        let message = PushMessage::SyncEvent { data: event.clone() };
        let mut closed = Vec::new();
        for client in self.clients.iter() {
            if client.tx.send(message.clone()).is_err() {
                closed.push((client.key().clone(), client.connection));
            }
        }
        for (client_id, connection) in closed {
            self.disconnect(&client_id, connection);
        }
        debug!(
            "Broadcast event {} ({}) to {} clients",
            event.seq,
            event.event_type,
            self.clients.len()
        );
    }

    /// Replace the stored snapshot and truncate the log.
    pub fn replace_snapshot(&self, client_id: &str, canvas: Value) -> ApiResult<()> {
        let mut log = self.log()?;
        let dropped = log.len();
        log.replace_snapshot(canvas);
        info!(
            "Full sync from {}: snapshot replaced, {} events dropped, seq stays at {}",
            client_id,
            dropped,
            log.seq_counter()
        );
        Ok(())
    }

    pub fn full_data(&self) -> ApiResult<FullDataResponse> {
        let data = self.log()?.full_data();
        info!(
            "Full data requested: {} events, snapshot {}",
            data.events.len(),
            data.canvas_json.is_some()
        );
        Ok(data)
    }

    pub fn debug_status(&self) -> ApiResult<DebugStatus> {
        Ok(self.log()?.debug_status(self.connected_clients()))
    }

    pub fn reset(&self) -> ApiResult<()> {
        self.log()?.reset();
        info!("Event log reset");
        Ok(())
    }
}

/// Removes a push channel when its response stream is dropped, unless a
/// newer connection for the same client replaced it.
struct ConnectionGuard {
    state: Arc<AppState>,
    client_id: String,
    connection: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.disconnect(&self.client_id, self.connection);
    }
}

/// Receiving side of a push channel, tied to its registration.
pub struct ClientChannel {
    rx: UnboundedReceiver<PushMessage>,
    _guard: ConnectionGuard,
}

impl ClientChannel {
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Arc<AppState> {
        AppState::new(ServerConfig::default())
    }

    #[tokio::test]
    async fn test_connect_sends_connected_first() {
        let state = state();
        let mut channel = state.connect("A");
        assert_eq!(
            channel.recv().await,
            Some(PushMessage::Connected {
                client_id: "A".to_string()
            })
        );
        assert_eq!(state.connected_clients(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_append_broadcasts_to_everyone() {
        let state = state();
        let mut a = state.connect("A");
        let mut b = state.connect("B");
        a.recv().await;
        b.recv().await;

        let (event, len) = state.append("client:change", json!({ "clientId": "A" })).unwrap();
        assert_eq!((event.seq, len), (1, 1));

        for channel in [&mut a, &mut b] {
            match channel.recv().await {
                Some(PushMessage::SyncEvent { data }) => assert_eq!(data, event),
                other => panic!("Wrong message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_channel_disconnects() {
        let state = state();
        let channel = state.connect("A");
        drop(channel);
        assert!(state.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_channel() {
        let state = state();
        let old = state.connect("A");
        let mut new = state.connect("A");
        // The old stream ending must not unregister the new one.
        drop(old);
        assert_eq!(state.connected_clients(), vec!["A".to_string()]);

        new.recv().await;
        state.append("client:change", json!({})).unwrap();
        assert!(matches!(new.recv().await, Some(PushMessage::SyncEvent { .. })));
    }

    #[tokio::test]
    async fn test_full_sync_keeps_seq_counting() {
        let state = state();
        state.append("client:change", json!({})).unwrap();
        state.append("client:change", json!({})).unwrap();
        state.replace_snapshot("A", json!({ "version": 1, "objects": [] })).unwrap();

        let data = state.full_data().unwrap();
        assert!(data.events.is_empty());
        assert!(data.canvas_json.is_some());

        let (event, len) = state.append("client:change", json!({})).unwrap();
        assert_eq!((event.seq, len), (3, 1));

        state.reset().unwrap();
        let status = state.debug_status().unwrap();
        assert_eq!(status.seq_counter, 0);
        assert!(!status.has_canvas_json);
    }
}
