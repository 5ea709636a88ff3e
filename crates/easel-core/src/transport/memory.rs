//! In-process sync server and transport for tests and local sessions.

use super::{
    BoxFuture, FullState, FullSyncReceipt, PushReceipt, Subscription, Transport, TransportError, TransportResult,
};
use crate::canvas::CanvasSnapshot;
use crate::history::HistoryRecord;
use crate::sync::event_log::EventLog;
use crate::sync::protocol::{AddImageData, PushEventRequest, PushMessage, RemoteEvent, SERVER_ADD_IMAGE};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Hub {
    log: EventLog,
    subscribers: Vec<(String, Sender<PushMessage>)>,
    offline: bool,
    full_syncs: usize,
}

impl Hub {
    fn append(&mut self, event_type: &str, data: serde_json::Value) -> RemoteEvent {
        let event = self.log.append(event_type, data);
        self.broadcast(&event);
        event
    }

    fn broadcast(&mut self, event: &RemoteEvent) {
        let message = PushMessage::SyncEvent { data: event.clone() };
        self.subscribers.retain(|(client_id, tx)| {
            let alive = tx.send(message.clone()).is_ok();
            if !alive {
                log::debug!("Dropping closed subscriber {}", client_id);
            }
            alive
        });
    }
}

/// The shared state of an in-process sync server. Clones share the hub.
#[derive(Clone, Default)]
pub struct MemoryServer {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport talking to this server.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { server: self.clone() }
    }

    /// Make every request fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut hub) = self.hub.lock() {
            hub.offline = offline;
        }
    }

    /// Append a `server:add_image` event and broadcast it.
    pub fn inject_images(&self, urls: Vec<String>) -> TransportResult<RemoteEvent> {
        let data = serde_json::to_value(AddImageData { urls })?;
        let mut hub = self.lock()?;
        Ok(hub.append(SERVER_ADD_IMAGE, data))
    }

    /// Events stored since the last full sync.
    pub fn event_count(&self) -> usize {
        self.hub.lock().map(|hub| hub.log.len()).unwrap_or_default()
    }

    pub fn seq_counter(&self) -> u64 {
        self.hub.lock().map(|hub| hub.log.seq_counter()).unwrap_or_default()
    }

    /// Number of full snapshots uploaded so far.
    pub fn full_sync_count(&self) -> usize {
        self.hub.lock().map(|hub| hub.full_syncs).unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.lock().map(|hub| hub.subscribers.len()).unwrap_or_default()
    }

    /// Drop the push channel of `client_id`, as a server restart would.
    pub fn disconnect(&self, client_id: &str) {
        if let Ok(mut hub) = self.hub.lock() {
            hub.subscribers.retain(|(id, _)| id != client_id);
        }
    }

    pub fn reset(&self) {
        if let Ok(mut hub) = self.hub.lock() {
            hub.log.reset();
        }
    }

    fn lock(&self) -> TransportResult<MutexGuard<'_, Hub>> {
        self.hub
            .lock()
            .map_err(|e| TransportError::Other(format!("Lock error: {}", e)))
    }

    fn online(&self) -> TransportResult<MutexGuard<'_, Hub>> {
        let hub = self.lock()?;
        if hub.offline {
            return Err(TransportError::Network("Server unreachable".to_string()));
        }
        Ok(hub)
    }
}

/// Transport bound to a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryTransport {
    server: MemoryServer,
}

impl MemoryTransport {
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

impl Transport for MemoryTransport {
    fn fetch_full_state(&self) -> BoxFuture<'_, TransportResult<FullState>> {
        Box::pin(async move {
            let response = self.server.online()?.log.full_data();
            FullState::from_response(response)
        })
    }

    fn push_event(&self, record: &HistoryRecord, client_id: &str) -> BoxFuture<'_, TransportResult<PushReceipt>> {
        let request = PushEventRequest::client_change(client_id, record);
        Box::pin(async move {
            let request = request?;
            let mut hub = self.server.online()?;
            let event = hub.append(&request.event_type, request.data);
            Ok(PushReceipt {
                seq: event.seq,
                queue_length: hub.log.len(),
            })
        })
    }

    fn push_full_state(
        &self,
        snapshot: &CanvasSnapshot,
        client_id: &str,
    ) -> BoxFuture<'_, TransportResult<FullSyncReceipt>> {
        let canvas = serde_json::to_value(snapshot);
        let client_id = client_id.to_string();
        Box::pin(async move {
            let canvas = canvas?;
            let mut hub = self.server.online()?;
            hub.log.replace_snapshot(canvas);
            hub.full_syncs += 1;
            log::debug!("Full snapshot stored from {}", client_id);
            Ok(FullSyncReceipt { success: true })
        })
    }

    fn subscribe(&self, client_id: &str) -> BoxFuture<'_, TransportResult<Box<dyn Subscription>>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let mut hub = self.server.online()?;
            let (tx, rx) = channel();
            tx.send(PushMessage::Connected {
                client_id: client_id.clone(),
            })
            .map_err(|_| TransportError::Closed)?;
            // A reconnecting client replaces its previous channel.
            hub.subscribers.retain(|(id, _)| *id != client_id);
            hub.subscribers.push((client_id, tx));
            Ok(Box::new(MemorySubscription { rx: Some(rx) }) as Box<dyn Subscription>)
        })
    }
}

/// Receiving end of a [`MemoryServer`] push channel.
pub struct MemorySubscription {
    rx: Option<Receiver<PushMessage>>,
}

impl Subscription for MemorySubscription {
    fn poll_events(&mut self) -> Vec<PushMessage> {
        let mut messages = Vec::new();
        let Some(rx) = &self.rx else {
            return messages;
        };
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected {
            self.rx = None;
        }
        messages
    }

    fn close(&mut self) {
        self.rx = None;
    }

    fn is_closed(&self) -> bool {
        self.rx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ObjectSnapshot;
    use pollster::block_on;
    use serde_json::json;

    fn record(id: &str) -> HistoryRecord {
        HistoryRecord::add(
            "rectangle",
            vec![ObjectSnapshot {
                id: id.to_string(),
                data: json!({}),
            }],
            true,
        )
    }

    #[test]
    fn test_push_assigns_seq_and_broadcasts() {
        let server = MemoryServer::new();
        let transport = server.transport();
        let mut sub = block_on(transport.subscribe("B")).unwrap();

        let receipt = block_on(transport.push_event(&record("r1"), "A")).unwrap();
        assert_eq!(receipt, PushReceipt { seq: 1, queue_length: 1 });

        let messages = sub.poll_events();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], PushMessage::Connected { .. }));
        match &messages[1] {
            PushMessage::SyncEvent { data } => assert_eq!(data.seq, 1),
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_full_state_truncates_log() {
        let server = MemoryServer::new();
        let transport = server.transport();
        block_on(transport.push_event(&record("r1"), "A")).unwrap();
        block_on(transport.push_full_state(&CanvasSnapshot::default(), "A")).unwrap();

        let state = block_on(transport.fetch_full_state()).unwrap();
        assert_eq!(state.snapshot, Some(CanvasSnapshot::default()));
        assert!(state.events.is_empty());
        assert_eq!(server.full_sync_count(), 1);

        let receipt = block_on(transport.push_event(&record("r2"), "A")).unwrap();
        assert_eq!(receipt, PushReceipt { seq: 2, queue_length: 1 });
    }

    #[test]
    fn test_offline_server_fails_requests() {
        let server = MemoryServer::new();
        let transport = server.transport();
        server.set_offline(true);
        assert!(matches!(
            block_on(transport.fetch_full_state()),
            Err(TransportError::Network(_))
        ));
        assert!(block_on(transport.subscribe("A")).is_err());
        server.set_offline(false);
        assert!(block_on(transport.fetch_full_state()).is_ok());
    }

    #[test]
    fn test_closed_subscription_is_dropped() {
        let server = MemoryServer::new();
        let transport = server.transport();
        let mut sub = block_on(transport.subscribe("A")).unwrap();
        sub.close();
        assert!(sub.is_closed());
        assert!(sub.poll_events().is_empty());

        server.inject_images(vec!["u".to_string()]).unwrap();
        assert_eq!(server.subscriber_count(), 0);
    }

    #[test]
    fn test_server_side_disconnect_closes_subscription() {
        let server = MemoryServer::new();
        let transport = server.transport();
        let mut sub = block_on(transport.subscribe("A")).unwrap();
        server.disconnect("A");

        // Buffered frames are still delivered before the close shows.
        assert_eq!(sub.poll_events().len(), 1);
        assert!(sub.is_closed());
    }
}
