//! Wire protocol shared by the sync client and the sync server.
//!
//! All payloads are JSON with camelCase keys.
//!
//! ```text
//! POST /api/canvas/sync/event      { eventType, data }        -> { seq, eventArrayLength }
//! POST /api/canvas/sync/full       { clientId, canvasJSON }   -> { success }
//! GET  /api/canvas/sync/full_data                             -> { canvasJSON, events, seqCounter }
//! GET  /api/canvas/sync/sse?clientId=..                       -> text/event-stream of PushMessage
//! ```

use crate::history::HistoryRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client pushed a history record.
pub const CLIENT_CHANGE: &str = "client:change";
/// The server asked every client to add images.
pub const SERVER_ADD_IMAGE: &str = "server:add_image";

/// Event types the server accepts on the append endpoint.
pub const KNOWN_EVENT_TYPES: [&str; 2] = [CLIENT_CHANGE, SERVER_ADD_IMAGE];

pub const EVENT_PATH: &str = "/api/canvas/sync/event";
pub const FULL_SYNC_PATH: &str = "/api/canvas/sync/full";
pub const FULL_DATA_PATH: &str = "/api/canvas/sync/full_data";
pub const SSE_PATH: &str = "/api/canvas/sync/sse";
pub const DEBUG_PATH: &str = "/api/canvas/sync/debug";
pub const RESET_PATH: &str = "/api/canvas/sync/reset";
pub const INJECT_IMAGE_PATH: &str = "/api/canvas/sync/inject_image";
pub const UPLOAD_IMAGE_PATH: &str = "/api/upload/image";

/// A sequenced event as stored and broadcast by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    /// Server-assigned, strictly increasing.
    pub seq: u64,
    pub event_type: String,
    pub data: Value,
}

/// Decoded body of a [`RemoteEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ClientChange(ClientChange),
    AddImage(AddImageData),
    Unknown(String),
}

impl RemoteEvent {
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        Ok(match self.event_type.as_str() {
            CLIENT_CHANGE => EventPayload::ClientChange(serde_json::from_value(self.data.clone())?),
            SERVER_ADD_IMAGE => EventPayload::AddImage(serde_json::from_value(self.data.clone())?),
            other => EventPayload::Unknown(other.to_string()),
        })
    }
}

/// Data of a `client:change` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientChange {
    pub client_id: String,
    pub snapshot: HistoryRecord,
}

/// Data of a `server:add_image` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddImageData {
    pub urls: Vec<String>,
}

/// Body of the append endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventRequest {
    pub event_type: String,
    pub data: Value,
}

impl PushEventRequest {
    pub fn client_change(client_id: &str, record: &HistoryRecord) -> Result<Self, serde_json::Error> {
        let data = ClientChange {
            client_id: client_id.to_string(),
            snapshot: record.clone(),
        };
        Ok(Self {
            event_type: CLIENT_CHANGE.to_string(),
            data: serde_json::to_value(data)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventResponse {
    pub seq: u64,
    /// Server log length after the append.
    pub event_array_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncRequest {
    pub client_id: String,
    #[serde(rename = "canvasJSON")]
    pub canvas_json: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullDataResponse {
    #[serde(rename = "canvasJSON")]
    pub canvas_json: Option<Value>,
    pub events: Vec<RemoteEvent>,
    /// Highest seq assigned so far; covers events truncated by a full sync.
    #[serde(rename = "seqCounter", default)]
    pub seq_counter: u64,
}

/// Frames on the server-push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    SyncEvent {
        data: RemoteEvent,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStatus {
    pub seq_counter: u64,
    pub events_count: usize,
    /// The most recent events.
    pub events: Vec<RemoteEvent>,
    #[serde(rename = "hasCanvasJSON")]
    pub has_canvas_json: bool,
    pub connected_clients: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectImageRequest {
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectImageResponse {
    pub success: bool,
    pub seq: u64,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub filename: String,
    pub original_name: String,
    pub size: usize,
}
