//! HTTP handlers for the sync protocol, debug tools and image uploads.

use crate::config::{INJECT_EXTENSIONS, SSE_HEARTBEAT_SECS, UPLOAD_EXTENSIONS, allowed_extension};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use easel_core::sync::protocol::{
    AddImageData, DebugStatus, FullDataResponse, FullSyncRequest, InjectImageRequest, InjectImageResponse,
    KNOWN_EVENT_TYPES, PushEventRequest, PushEventResponse, SERVER_ADD_IMAGE, SuccessResponse, UploadResponse,
};
use futures_util::stream::{self, Stream};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Index page
pub async fn index() -> &'static str {
    "Easel sync server - subscribe at /api/canvas/sync/sse?clientId=<id>"
}

/// Health check
pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct SseParams {
    #[serde(rename = "clientId")]
    client_id: String,
}

/// Server-push channel. The first frame confirms the client id; every
/// appended event follows in seq order.
pub async fn sse(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let channel = state.connect(&params.client_id);
    let stream = stream::unfold(channel, |mut channel| async move {
        let message = channel.recv().await?;
        Some((Event::default().json_data(&message), channel))
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_HEARTBEAT_SECS))
            .text("heartbeat"),
    )
}

/// Append an event and broadcast it.
pub async fn push_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PushEventRequest>,
) -> ApiResult<Json<PushEventResponse>> {
    if !KNOWN_EVENT_TYPES.contains(&request.event_type.as_str()) {
        warn!("Rejected event of unknown type {}", request.event_type);
        return Err(ApiError::UnknownEventType(request.event_type));
    }
    let (event, length) = state.append(&request.event_type, request.data)?;
    Ok(Json(PushEventResponse {
        seq: event.seq,
        event_array_length: length,
    }))
}

/// Replace the stored snapshot and truncate the event log.
pub async fn full_sync(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FullSyncRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    state.replace_snapshot(&request.client_id, request.canvas_json)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Stored snapshot plus every event after it.
pub async fn full_data(State(state): State<Arc<AppState>>) -> ApiResult<Json<FullDataResponse>> {
    Ok(Json(state.full_data()?))
}

pub async fn debug(State(state): State<Arc<AppState>>) -> ApiResult<Json<DebugStatus>> {
    Ok(Json(state.debug_status()?))
}

pub async fn reset(State(state): State<Arc<AppState>>) -> ApiResult<Json<SuccessResponse>> {
    state.reset()?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Broadcast a `server:add_image` event. Without urls in the body, a random
/// uploaded image is used.
pub async fn inject_image(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Json<InjectImageResponse>> {
    let request: InjectImageRequest = if body.is_empty() {
        InjectImageRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid body: {}", e)))?
    };
    let urls = match request.urls {
        Some(urls) if !urls.is_empty() => urls,
        _ => vec![random_upload_url(&state).await?],
    };

    let data = serde_json::to_value(AddImageData { urls: urls.clone() })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let (event, _) = state.append(SERVER_ADD_IMAGE, data)?;
    info!("Injected {} image(s) as event {}", urls.len(), event.seq);
    Ok(Json(InjectImageResponse {
        success: true,
        seq: event.seq,
        urls,
    }))
}

async fn random_upload_url(state: &AppState) -> ApiResult<String> {
    let mut candidates = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(&state.config.upload_dir).await {
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if allowed_extension(&name, &INJECT_EXTENSIONS).is_some() {
                candidates.push(name);
            }
        }
    }
    let pick = candidates.choose(&mut rand::thread_rng()).cloned();
    pick.map(|name| state.config.upload_url(&name))
        .ok_or_else(|| ApiError::BadRequest("No images found in upload directory".to_string()))
}

/// Store an uploaded image under a unique name.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let original_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Missing file name".to_string()))?;
        let ext = allowed_extension(&original_name, &UPLOAD_EXTENSIONS).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unsupported file type, allowed: {}",
                UPLOAD_EXTENSIONS.join(", ")
            ))
        })?;
        let data = field.bytes().await?;
        if data.len() > state.config.max_upload_bytes {
            return Err(ApiError::BadRequest(format!(
                "File too large, limit is {} bytes",
                state.config.max_upload_bytes
            )));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        tokio::fs::write(state.config.upload_dir.join(&filename), &data).await?;
        info!("Stored upload {} as {} ({} bytes)", original_name, filename, data.len());

        return Ok(Json(UploadResponse {
            success: true,
            url: state.config.upload_url(&filename),
            filename,
            original_name,
            size: data.len(),
        }));
    }
    Err(ApiError::BadRequest("Missing `image` field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use easel_core::sync::protocol::CLIENT_CHANGE;
    use serde_json::json;

    fn state_in(dir: &std::path::Path) -> Arc<AppState> {
        AppState::new(ServerConfig {
            upload_dir: dir.to_path_buf(),
            ..ServerConfig::default()
        })
    }

    fn change() -> PushEventRequest {
        PushEventRequest {
            event_type: CLIENT_CHANGE.to_string(),
            data: json!({ "clientId": "A", "snapshot": {} }),
        }
    }

    #[tokio::test]
    async fn test_push_event_assigns_seq() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        let Json(first) = push_event(State(state.clone()), Json(change())).await.unwrap();
        let Json(second) = push_event(State(state.clone()), Json(change())).await.unwrap();
        assert_eq!((first.seq, first.event_array_length), (1, 1));
        assert_eq!((second.seq, second.event_array_length), (2, 2));

        let Json(data) = full_data(State(state)).await.unwrap();
        assert_eq!(data.events.len(), 2);
        assert!(data.canvas_json.is_none());
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let request = PushEventRequest {
            event_type: "client:cursor".to_string(),
            data: json!({}),
        };
        assert!(matches!(
            push_event(State(state.clone()), Json(request)).await,
            Err(ApiError::UnknownEventType(_))
        ));
        assert_eq!(state.debug_status().unwrap().seq_counter, 0);
    }

    #[tokio::test]
    async fn test_full_sync_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        push_event(State(state.clone()), Json(change())).await.unwrap();

        let request = FullSyncRequest {
            client_id: "A".to_string(),
            canvas_json: json!({ "version": 1, "objects": [] }),
        };
        full_sync(State(state.clone()), Json(request)).await.unwrap();

        let Json(status) = debug(State(state)).await.unwrap();
        assert_eq!(status.events_count, 0);
        assert_eq!(status.seq_counter, 1);
        assert!(status.has_canvas_json);
    }

    #[tokio::test]
    async fn test_inject_with_urls() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let mut channel = state.connect("B");
        channel.recv().await;

        let body = Bytes::from(r#"{"urls":["http://img/1.png"]}"#);
        let Json(response) = inject_image(State(state.clone()), body).await.unwrap();
        assert_eq!(response.urls, vec!["http://img/1.png".to_string()]);

        match channel.recv().await {
            Some(easel_core::sync::protocol::PushMessage::SyncEvent { data }) => {
                assert_eq!(data.seq, response.seq);
                assert_eq!(data.event_type, SERVER_ADD_IMAGE);
                assert_eq!(data.data, json!({ "urls": ["http://img/1.png"] }));
            }
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inject_picks_uploaded_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"png").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"txt").unwrap();
        std::fs::write(dir.path().join("logo.svg"), b"svg").unwrap();
        let state = state_in(dir.path());

        let Json(response) = inject_image(State(state), Bytes::new()).await.unwrap();
        assert_eq!(response.urls, vec!["http://localhost:3001/uploads/cat.png".to_string()]);
    }

    #[tokio::test]
    async fn test_inject_without_images_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir.path().join("missing"));
        assert!(matches!(
            inject_image(State(state.clone()), Bytes::from("{}")).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            inject_image(State(state), Bytes::from("not json")).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
