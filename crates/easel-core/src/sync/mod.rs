//! Multi-client sync.
//!
//! A [`SyncManager`] joins an editing session to a shared event log:
//! it rebuilds the canvas from the server's snapshot and events, pushes the
//! ledger's outgoing records, applies other clients' events through the redo
//! path, and uploads a fresh snapshot when the server log grows too long.
//!
//! Sequence numbers are gapless, so a skipped seq or a dropped push channel
//! means events were missed; the manager then rebuilds the canvas from the
//! server on the next [`SyncManager::flush`] or [`SyncManager::resync`].
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Live --destroy--> Destroyed
//!       ^                             |
//!       +------------failed-----------+
//! ```

pub mod config;
pub mod event_log;
pub mod protocol;

pub use config::{DEFAULT_BASE_URL, DEFAULT_FULL_SYNC_THRESHOLD, SyncConfig};
pub use event_log::EventLog;

use crate::canvas::{Canvas, CanvasSnapshot};
use crate::handlers::SnapshotError;
use crate::history::HistoryRecord;
use crate::objects::{CanvasObject, Category, Image, ObjectId};
use crate::transport::{FullState, PushReceipt, Subscription, Transport, TransportError};
use kurbo::Point;
use protocol::{EventPayload, PushMessage, RemoteEvent};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Offset between consecutive images of one `server:add_image` event.
pub const SERVER_IMAGE_CASCADE: f64 = 40.0;

/// Lifecycle of a [`SyncManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Initializing,
    Live,
    Destroyed,
}

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync manager is {actual:?}, expected {expected:?}")]
    InvalidState { expected: SyncState, actual: SyncState },
    #[error("Initialization failed: {0}")]
    Initialization(#[source] TransportError),
    #[error("Failed to push event: {0}")]
    Push(#[source] TransportError),
    #[error("Full sync failed: {0}")]
    FullSync(#[source] TransportError),
    #[error("Resync failed: {0}")]
    Resync(#[source] TransportError),
    #[error("Full sync rejected by server")]
    FullSyncRejected,
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// What happened to one remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Applied to the canvas.
    Applied,
    /// Our own event coming back; already applied locally.
    Echo,
    /// Sequence number already seen.
    Stale,
    /// Malformed, unknown, or no handler could apply it.
    Skipped,
    /// Earlier events were missed; not applied until a resync.
    Gap,
    /// The push channel closed. Reported once, after the last event it
    /// delivered.
    Disconnected,
}

/// Identity of one client for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    client_id: String,
}

impl SyncSession {
    /// A session with a fresh random client id.
    pub fn new() -> Self {
        Self::with_client_id(Uuid::new_v4().to_string())
    }

    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

/// A pushed record whose echo has not arrived yet.
#[derive(Debug)]
struct InFlight {
    seq: u64,
    object_ids: Vec<ObjectId>,
}

/// Whether this client has written `id` in a record the server has not
/// echoed back yet, either still queued or already pushed.
fn has_local_writes(in_flight: &[InFlight], canvas: &Canvas, id: &str) -> bool {
    in_flight.iter().any(|f| f.object_ids.iter().any(|o| o == id))
        || canvas
            .history()
            .outgoing_records()
            .any(|r| r.object_ids.iter().any(|o| o == id))
}

/// Keeps one [`Canvas`] in step with the shared event log.
///
/// The manager never owns the canvas; every operation borrows it. Local edits
/// are picked up from the ledger's outgoing queue by [`SyncManager::flush`],
/// and remote events are drained by [`SyncManager::poll`].
pub struct SyncManager<T: Transport + ?Sized> {
    transport: Arc<T>,
    session: SyncSession,
    config: SyncConfig,
    state: SyncState,
    last_applied_seq: u64,
    pending_queue_length: usize,
    subscription: Option<Box<dyn Subscription>>,
    needs_resync: bool,
    /// Only tracked while a push channel is open to deliver the echoes.
    in_flight: Vec<InFlight>,
    /// Objects a remote edit overwrote while a local write to them was
    /// pending. The local write is reapplied when its echo arrives, so the
    /// higher seq wins on every client.
    overwritten: HashSet<ObjectId>,
}

impl<T: Transport + ?Sized> SyncManager<T> {
    pub fn new(transport: Arc<T>, session: SyncSession, config: SyncConfig) -> Self {
        Self {
            transport,
            session,
            config,
            state: SyncState::Uninitialized,
            last_applied_seq: 0,
            pending_queue_length: 0,
            subscription: None,
            needs_resync: false,
            in_flight: Vec::new(),
            overwritten: HashSet::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        self.session.client_id()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Highest seq applied or skipped so far.
    pub fn last_applied_seq(&self) -> u64 {
        self.last_applied_seq
    }

    /// Last known length of the server's event log.
    pub fn pending_queue_length(&self) -> usize {
        self.pending_queue_length
    }

    pub fn is_live(&self) -> bool {
        self.state == SyncState::Live
    }

    /// Whether a push channel is open.
    pub fn is_connected(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Whether events were missed and the canvas must be rebuilt.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    fn expect_state(&self, expected: SyncState) -> SyncResult<()> {
        if self.state != expected {
            return Err(SyncError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Rebuild `canvas` from the server and go live.
    ///
    /// The push channel is confirmed open before the fetch, so nothing
    /// broadcast in between is missed; its messages are only drained by
    /// [`SyncManager::poll`], and those already replayed are dropped as
    /// stale. The server is authoritative: without a stored snapshot the
    /// canvas starts empty before the events are replayed. On failure the
    /// manager returns to `Uninitialized` and the canvas is left untouched.
    pub async fn initialize(&mut self, canvas: &mut Canvas) -> SyncResult<()> {
        self.expect_state(SyncState::Uninitialized)?;
        self.state = SyncState::Initializing;
        log::info!("Initializing sync for client {}", self.session.client_id);

        match self.bootstrap(canvas).await {
            Ok(replayed) => {
                canvas.history_mut().attach_sync();
                self.state = SyncState::Live;
                log::info!(
                    "Sync live: replayed {} events, last seq {}",
                    replayed,
                    self.last_applied_seq
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Sync initialization failed: {}", e);
                if let Some(mut subscription) = self.subscription.take() {
                    subscription.close();
                }
                self.state = SyncState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn bootstrap(&mut self, canvas: &mut Canvas) -> SyncResult<usize> {
        if self.config.subscribe_on_init {
            let subscription = self
                .transport
                .subscribe(&self.session.client_id)
                .await
                .map_err(SyncError::Initialization)?;
            self.subscription = Some(subscription);
        }

        let full = self
            .transport
            .fetch_full_state()
            .await
            .map_err(SyncError::Initialization)?;
        self.rebuild(canvas, full)
    }

    /// Reset `canvas` to the server state, then reapply local records still
    /// waiting to be pushed. Nothing is touched if the snapshot is malformed.
    fn rebuild(&mut self, canvas: &mut Canvas, full: FullState) -> SyncResult<usize> {
        let empty = CanvasSnapshot::default();
        canvas.import(full.snapshot.as_ref().unwrap_or(&empty))?;

        let mut events = full.events;
        events.sort_by_key(|e| e.seq);
        self.last_applied_seq = 0;
        self.in_flight.clear();
        self.overwritten.clear();
        for event in &events {
            self.apply_event(canvas, event, false);
        }
        // Events truncated by a full sync are part of the snapshot.
        self.last_applied_seq = self.last_applied_seq.max(full.seq);

        let unsent: Vec<HistoryRecord> = canvas.history().outgoing_records().cloned().collect();
        for record in &unsent {
            canvas.apply_forward(record);
        }
        // Replay never leaves anything to undo.
        canvas.clear_history();
        self.pending_queue_length = events.len();
        self.needs_resync = false;
        Ok(events.len())
    }

    /// Rebuild the canvas from the server after missed events, reopening
    /// the push channel first if it was lost. Local edits not yet pushed
    /// stay queued and are reapplied on top.
    pub async fn resync(&mut self, canvas: &mut Canvas) -> SyncResult<()> {
        self.expect_state(SyncState::Live)?;
        log::info!("Resyncing client {} from seq {}", self.session.client_id, self.last_applied_seq);
        if self.config.subscribe_on_init && !self.is_connected() {
            let subscription = self
                .transport
                .subscribe(&self.session.client_id)
                .await
                .map_err(SyncError::Resync)?;
            self.subscription = Some(subscription);
        }
        let full = self.transport.fetch_full_state().await.map_err(SyncError::Resync)?;
        let replayed = self.rebuild(canvas, full)?;
        log::info!("Resync complete: replayed {} events, last seq {}", replayed, self.last_applied_seq);
        Ok(())
    }

    /// Push every queued local record, oldest first, then upload a full
    /// snapshot if the server log has grown past the threshold.
    ///
    /// Missed events are caught up first. If a push fails, it and every
    /// later record go back to the front of the queue for the next flush.
    pub async fn flush(&mut self, canvas: &mut Canvas) -> SyncResult<Vec<PushReceipt>> {
        self.expect_state(SyncState::Live)?;
        if self.needs_resync {
            self.resync(canvas).await?;
        }
        let transport = Arc::clone(&self.transport);
        let mut receipts = Vec::new();
        let mut queue = canvas.history_mut().take_outgoing().into_iter();

        while let Some(record) = queue.next() {
            match transport.push_event(&record, &self.session.client_id).await {
                Ok(receipt) => {
                    log::debug!(
                        "Pushed {} record {} as seq {} (server queue {})",
                        record.category_handler_id,
                        record.id,
                        receipt.seq,
                        receipt.queue_length
                    );
                    if self.subscription.is_some() {
                        self.in_flight.push(InFlight {
                            seq: receipt.seq,
                            object_ids: record.object_ids,
                        });
                    }
                    self.pending_queue_length = receipt.queue_length;
                    receipts.push(receipt);
                }
                Err(e) => {
                    log::warn!("Failed to push record {}: {}", record.id, e);
                    let mut unsent = vec![record];
                    unsent.extend(queue);
                    canvas.history_mut().requeue_outgoing(unsent);
                    return Err(SyncError::Push(e));
                }
            }
        }

        if self.pending_queue_length > self.config.full_sync_threshold {
            log::info!(
                "Server queue at {} (threshold {}), uploading full snapshot",
                self.pending_queue_length,
                self.config.full_sync_threshold
            );
            self.full_sync(canvas).await?;
        }
        Ok(receipts)
    }

    /// Replace the server snapshot with the local canvas, truncating its log.
    pub async fn full_sync(&mut self, canvas: &mut Canvas) -> SyncResult<()> {
        self.expect_state(SyncState::Live)?;
        // Anything already delivered belongs in the snapshot, and a canvas
        // that missed events must not replace the server's.
        self.poll(canvas);
        if self.needs_resync {
            self.resync(canvas).await?;
        }
        let snapshot = canvas.export()?;
        let receipt = self
            .transport
            .push_full_state(&snapshot, &self.session.client_id)
            .await
            .map_err(SyncError::FullSync)?;
        if !receipt.success {
            return Err(SyncError::FullSyncRejected);
        }
        self.pending_queue_length = 0;
        log::info!("Full sync complete ({} objects)", snapshot.objects.len());
        Ok(())
    }

    /// Apply every event received on the push channel since the last poll.
    /// Returns one outcome per sync event, plus
    /// [`EventOutcome::Disconnected`] if the channel has closed.
    pub fn poll(&mut self, canvas: &mut Canvas) -> Vec<EventOutcome> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Vec::new();
        };
        let messages = subscription.poll_events();
        let closed = subscription.is_closed();
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            match message {
                PushMessage::Connected { client_id } => {
                    log::debug!("Push channel confirmed for {}", client_id);
                }
                PushMessage::SyncEvent { data } => outcomes.push(self.handle_remote_event(canvas, &data)),
            }
        }
        if closed {
            log::warn!("Push channel for {} lost, resync needed", self.session.client_id);
            self.subscription = None;
            // No echo will arrive for these any more.
            self.in_flight.clear();
            self.overwritten.clear();
            self.needs_resync = true;
            outcomes.push(EventOutcome::Disconnected);
        }
        outcomes
    }

    /// Apply one remote event received while live.
    pub fn handle_remote_event(&mut self, canvas: &mut Canvas, event: &RemoteEvent) -> EventOutcome {
        if self.state != SyncState::Live {
            log::warn!("Ignoring event {} while {:?}", event.seq, self.state);
            return EventOutcome::Skipped;
        }
        self.apply_event(canvas, event, true)
    }

    /// Close the push channel and stop queueing local edits. Idempotent.
    pub fn destroy(&mut self, canvas: &mut Canvas) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        canvas.history_mut().detach_sync();
        self.in_flight.clear();
        self.overwritten.clear();
        if self.state != SyncState::Destroyed {
            log::info!("Sync destroyed for client {}", self.session.client_id);
        }
        self.state = SyncState::Destroyed;
    }

    fn apply_event(&mut self, canvas: &mut Canvas, event: &RemoteEvent, live: bool) -> EventOutcome {
        if event.seq <= self.last_applied_seq {
            log::debug!("Dropping stale event {} (last {})", event.seq, self.last_applied_seq);
            return EventOutcome::Stale;
        }
        if live && event.seq > self.last_applied_seq + 1 {
            if !self.needs_resync {
                log::warn!(
                    "Missed events {}..{}, resync needed",
                    self.last_applied_seq + 1,
                    event.seq - 1
                );
            }
            self.needs_resync = true;
            return EventOutcome::Gap;
        }
        self.last_applied_seq = event.seq;

        let payload = match event.payload() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Malformed {} event {}: {}", event.event_type, event.seq, e);
                return EventOutcome::Skipped;
            }
        };
        match payload {
            EventPayload::ClientChange(change) => {
                if live && change.client_id == self.session.client_id {
                    return self.handle_echo(canvas, event.seq, &change.snapshot);
                }
                self.apply_record(canvas, &change.snapshot)
            }
            EventPayload::AddImage(data) => match server_images(canvas, event.seq, &data.urls) {
                Ok(record) => self.apply_record(canvas, &record),
                Err(e) => {
                    log::warn!("Cannot add server images from event {}: {}", event.seq, e);
                    EventOutcome::Skipped
                }
            },
            EventPayload::Unknown(event_type) => {
                log::warn!("Skipping event {} of unknown type {}", event.seq, event_type);
                EventOutcome::Skipped
            }
        }
    }

    fn apply_record(&mut self, canvas: &mut Canvas, record: &HistoryRecord) -> EventOutcome {
        if let Err(e) = record.validate() {
            log::warn!("Skipping invalid remote record: {}", e);
            return EventOutcome::Skipped;
        }
        for id in &record.object_ids {
            if has_local_writes(&self.in_flight, canvas, id) {
                self.overwritten.insert(id.clone());
            }
        }
        if canvas.apply_remote(record) {
            EventOutcome::Applied
        } else {
            EventOutcome::Skipped
        }
    }

    fn handle_echo(&mut self, canvas: &mut Canvas, seq: u64, record: &HistoryRecord) -> EventOutcome {
        log::debug!("Skipping echo of own event {}", seq);
        self.in_flight.retain(|f| f.seq != seq);

        // Objects a lower-seq remote edit clobbered get this write back,
        // unless an even later local write to them is still pending.
        let in_flight = &self.in_flight;
        let overwritten = &self.overwritten;
        let reapply = record.restricted_to(|id| {
            overwritten.contains(id) && !has_local_writes(in_flight, canvas, id)
        });
        if let Some(reapply) = reapply {
            log::debug!("Reapplying {} objects of own event {}", reapply.object_ids.len(), seq);
            canvas.apply_forward(&reapply);
        }

        let in_flight = &self.in_flight;
        self.overwritten
            .retain(|id| !record.object_ids.contains(id) || has_local_writes(in_flight, canvas, id));
        EventOutcome::Echo
    }
}

impl<T: Transport + ?Sized> Drop for SyncManager<T> {
    fn drop(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

/// Build the add record for a `server:add_image` event. Ids depend only on
/// the event, so every client creates the same objects.
fn server_images(canvas: &Canvas, seq: u64, urls: &[String]) -> Result<HistoryRecord, SnapshotError> {
    let handler = canvas
        .handlers()
        .get(Category::Image)
        .ok_or_else(|| SnapshotError::UnknownHandler(Category::Image.handler_id().to_string()))?;
    let mut snapshots = Vec::with_capacity(urls.len());
    for (index, url) in urls.iter().enumerate() {
        let offset = SERVER_IMAGE_CASCADE * index as f64;
        let image = Image::new(url.clone(), Point::new(offset, offset)).with_id(format!("server-image-{}-{}", seq, index));
        snapshots.push(handler.create_snapshot(&CanvasObject::Image(image))?);
    }
    Ok(HistoryRecord::add(handler.handler_id(), snapshots, false))
}
