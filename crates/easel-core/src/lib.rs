//! Easel Core Library
//!
//! Undo/redo history and multi-client sync for the Easel canvas editor:
//! canvas objects and their category handlers, the history ledger, the
//! editing session, and the sync manager with its transports.

pub mod canvas;
pub mod handlers;
pub mod history;
pub mod objects;
pub mod sync;
pub mod transport;

pub use canvas::{Canvas, CanvasChange, CanvasDocument, CanvasSnapshot};
pub use handlers::{CategoryHandler, HandlerRegistry, SnapshotError};
pub use history::{HistoryLedger, HistoryRecord, ObjectSnapshot, RecordKind};
pub use objects::{CanvasObject, Category, Image, ObjectId, PointMarker, Rectangle, Region};
pub use sync::{EventOutcome, SyncConfig, SyncError, SyncManager, SyncSession, SyncState};
pub use transport::{MemoryServer, MemoryTransport, Transport, TransportError};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
