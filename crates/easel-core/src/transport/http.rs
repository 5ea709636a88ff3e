//! HTTP transport: JSON requests through `reqwest`, server push over SSE.
//!
//! On native targets the async requests need a tokio runtime (reqwest's
//! connector); the push channel runs on its own thread.

use super::{BoxFuture, FullState, FullSyncReceipt, PushReceipt, Subscription, Transport, TransportError, TransportResult};
use crate::canvas::CanvasSnapshot;
use crate::history::HistoryRecord;
use crate::sync::SyncConfig;
use crate::sync::protocol::{
    EVENT_PATH, FULL_DATA_PATH, FULL_SYNC_PATH, FullDataResponse, FullSyncRequest, PushEventRequest,
    PushEventResponse, SSE_PATH, SuccessResponse,
};
use serde::de::DeserializeOwned;
use url::Url;

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Malformed(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Transport talking to an `easel-server` instance.
#[derive(Clone)]
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for a server base URL such as `http://localhost:3001`.
    pub fn new(base_url: &str) -> TransportResult<Self> {
        let base = Url::parse(base_url).map_err(|e| TransportError::Other(format!("Invalid URL: {}", e)))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(TransportError::Other(format!("Invalid HTTP URL scheme: {}", base.scheme())));
        }
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    /// Create a transport for the server named in `config`.
    pub fn from_config(config: &SyncConfig) -> TransportResult<Self> {
        Self::new(&config.base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> TransportResult<Url> {
        self.base
            .join(path)
            .map_err(|e| TransportError::Other(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn subscription_url(&self, client_id: &str) -> TransportResult<Url> {
        let mut url = self.endpoint(SSE_PATH)?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        Ok(url)
    }
}

async fn read_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> TransportResult<T> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(TransportError::Http {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json::<T>().await?)
}

impl Transport for HttpTransport {
    fn fetch_full_state(&self) -> BoxFuture<'_, TransportResult<FullState>> {
        Box::pin(async move {
            let url = self.endpoint(FULL_DATA_PATH)?;
            let response: FullDataResponse = read_json(self.client.get(url)).await?;
            log::info!("Fetched full state with {} events", response.events.len());
            FullState::from_response(response)
        })
    }

    fn push_event(&self, record: &HistoryRecord, client_id: &str) -> BoxFuture<'_, TransportResult<PushReceipt>> {
        let request = PushEventRequest::client_change(client_id, record);
        Box::pin(async move {
            let request = request?;
            let url = self.endpoint(EVENT_PATH)?;
            let response: PushEventResponse = read_json(self.client.post(url).json(&request)).await?;
            Ok(PushReceipt {
                seq: response.seq,
                queue_length: response.event_array_length,
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
            let request = FullSyncRequest {
                client_id,
                canvas_json: canvas?,
            };
            let url = self.endpoint(FULL_SYNC_PATH)?;
            let response: SuccessResponse = read_json(self.client.post(url).json(&request)).await?;
            Ok(FullSyncReceipt {
                success: response.success,
            })
        })
    }

    fn subscribe(&self, client_id: &str) -> BoxFuture<'_, TransportResult<Box<dyn Subscription>>> {
        let url = self.subscription_url(client_id);
        Box::pin(async move {
            let url = url?;
            log::info!("Opening push channel {}", url);
            let stream = EventStream::open(url).await?;
            Ok(Box::new(stream) as Box<dyn Subscription>)
        })
    }
}

// ============================================================================
// Native push channel
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_stream {
    use super::super::SseDecoder;
    use super::*;
    use crate::sync::protocol::PushMessage;
    use futures::channel::oneshot;
    use std::io::{BufRead, BufReader};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    type Ready = Option<oneshot::Sender<TransportResult<()>>>;

    /// SSE reader on a background thread.
    ///
    /// Messages are collected and must be polled via `poll_events()`.
    pub struct EventStream {
        rx: Option<Receiver<PushMessage>>,
        stop: Arc<AtomicBool>,
        _thread: Option<JoinHandle<()>>,
    }

    impl EventStream {
        /// Start the reader and wait for the server's `connected` frame.
        pub async fn open(url: Url) -> TransportResult<Self> {
            let (tx, rx) = channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name("easel-sse".to_string())
                .spawn(move || read_stream(url, tx, Some(ready_tx), thread_stop))
                .map_err(|e| TransportError::Other(format!("Failed to spawn SSE thread: {}", e)))?;
            let stream = Self {
                rx: Some(rx),
                stop,
                _thread: Some(handle),
            };
            // A reader that exits before confirming drops the sender.
            ready_rx.await.map_err(|_| TransportError::Closed)??;
            Ok(stream)
        }
    }

    fn report(ready: &mut Ready, result: TransportResult<()>) {
        if let Some(ready) = ready.take() {
            let _ = ready.send(result);
        }
    }

    fn read_stream(url: Url, tx: Sender<PushMessage>, mut ready: Ready, stop: Arc<AtomicBool>) {
        let client = match reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                log::error!("Failed to build SSE client: {}", e);
                report(&mut ready, Err(e.into()));
                return;
            }
        };
        let response = match client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                log::error!("Push channel refused with {}", response.status());
                report(
                    &mut ready,
                    Err(TransportError::Http {
                        status: response.status().as_u16(),
                        message: "Push channel refused".to_string(),
                    }),
                );
                return;
            }
            Err(e) => {
                log::error!("Push channel connection failed: {}", e);
                report(&mut ready, Err(e.into()));
                return;
            }
        };

        log::info!("Push channel connected: {}", url);
        let mut decoder = SseDecoder::new();
        for line in BufReader::new(response).lines() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Push channel read error: {}", e);
                    break;
                }
            };
            let Some(payload) = decoder.push_line(&line) else {
                continue;
            };
            match serde_json::from_str::<PushMessage>(&payload) {
                Ok(message) => {
                    let confirmed = matches!(message, PushMessage::Connected { .. });
                    if tx.send(message).is_err() {
                        break;
                    }
                    if confirmed {
                        report(&mut ready, Ok(()));
                    }
                }
                Err(e) => log::warn!("Failed to parse push message: {}", e),
            }
        }
        log::info!("Push channel thread exiting");
    }

    impl Subscription for EventStream {
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
                log::warn!("Push channel closed by server");
                self.rx = None;
            }
            messages
        }

        fn close(&mut self) {
            // The thread notices on its next line (at the latest the next heartbeat).
            self.stop.store(true, Ordering::Relaxed);
            self.rx = None;
            self._thread = None;
        }

        fn is_closed(&self) -> bool {
            self.rx.is_none()
        }
    }

    impl Drop for EventStream {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
use native_stream::EventStream;

// ============================================================================
// WASM push channel
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_stream {
    use super::*;
    use crate::sync::protocol::PushMessage;
    use futures::channel::oneshot;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::{Event, EventSource, MessageEvent};

    type Ready = Rc<RefCell<Option<oneshot::Sender<TransportResult<()>>>>>;

    /// `EventSource` wrapper.
    ///
    /// Messages are collected and must be polled via `poll_events()`.
    pub struct EventStream {
        source: Option<EventSource>,
        messages: Rc<RefCell<Vec<PushMessage>>>,
        /// Set when the browser gives up reconnecting.
        closed: Rc<Cell<bool>>,
        // Store closures to prevent them from being dropped
        _on_message: Option<Closure<dyn Fn(MessageEvent)>>,
        _on_error: Option<Closure<dyn Fn(Event)>>,
    }

    impl EventStream {
        /// Open the `EventSource` and wait for the server's `connected` frame.
        pub async fn open(url: Url) -> TransportResult<Self> {
            let source = EventSource::new(url.as_str())
                .map_err(|e| TransportError::Network(format!("Failed to create EventSource: {:?}", e)))?;
            let messages = Rc::new(RefCell::new(Vec::new()));
            let closed = Rc::new(Cell::new(false));
            let (ready_tx, ready_rx) = oneshot::channel();
            let ready: Ready = Rc::new(RefCell::new(Some(ready_tx)));

            let messages_in = messages.clone();
            let ready_in = ready.clone();
            let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
                let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() else {
                    return;
                };
                let payload: String = txt.into();
                match serde_json::from_str::<PushMessage>(&payload) {
                    Ok(message) => {
                        let confirmed = matches!(message, PushMessage::Connected { .. });
                        messages_in.borrow_mut().push(message);
                        if confirmed {
                            if let Some(ready) = ready_in.borrow_mut().take() {
                                let _ = ready.send(Ok(()));
                            }
                        }
                    }
                    Err(e) => log::warn!("Failed to parse push message: {}", e),
                }
            }) as Box<dyn Fn(MessageEvent)>);
            source.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

            let source_in = source.clone();
            let closed_in = closed.clone();
            let on_error = Closure::wrap(Box::new(move |_e: Event| {
                if let Some(ready) = ready.borrow_mut().take() {
                    let _ = ready.send(Err(TransportError::Network("Push channel failed to open".to_string())));
                    return;
                }
                if source_in.ready_state() == EventSource::CLOSED {
                    log::error!("Push channel closed");
                    closed_in.set(true);
                } else {
                    // EventSource reconnects by itself; just note it.
                    log::warn!("Push channel error, browser will retry");
                }
            }) as Box<dyn Fn(Event)>);
            source.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            let stream = Self {
                source: Some(source),
                messages,
                closed,
                _on_message: Some(on_message),
                _on_error: Some(on_error),
            };
            ready_rx.await.map_err(|_| TransportError::Closed)??;
            Ok(stream)
        }
    }

    impl Subscription for EventStream {
        fn poll_events(&mut self) -> Vec<PushMessage> {
            std::mem::take(&mut *self.messages.borrow_mut())
        }

        fn close(&mut self) {
            if let Some(source) = self.source.take() {
                source.close();
            }
            self.messages.borrow_mut().clear();
            self._on_message = None;
            self._on_error = None;
        }

        fn is_closed(&self) -> bool {
            self.source.is_none() || self.closed.get()
        }
    }

    impl Drop for EventStream {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(target_arch = "wasm32")]
use wasm_stream::EventStream;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(HttpTransport::new("ws://localhost:3001").is_err());
        assert!(HttpTransport::new("not a url").is_err());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_subscribe_fails_without_server() {
        // Nothing listens on the discard port.
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        assert!(pollster::block_on(transport.subscribe("A")).is_err());
    }

    #[test]
    fn test_from_config() {
        let transport = HttpTransport::from_config(&SyncConfig::default()).unwrap();
        assert_eq!(transport.base_url().as_str(), "http://localhost:3001/");

        let config = SyncConfig::default().with_base_url("ftp://example.com");
        assert!(HttpTransport::from_config(&config).is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let transport = HttpTransport::new("http://localhost:3001").unwrap();
        assert_eq!(
            transport.endpoint(EVENT_PATH).unwrap().as_str(),
            "http://localhost:3001/api/canvas/sync/event"
        );
        assert_eq!(
            transport.subscription_url("client 1").unwrap().as_str(),
            "http://localhost:3001/api/canvas/sync/sse?clientId=client+1"
        );
    }
}
