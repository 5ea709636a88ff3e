//! Category handlers.
//!
//! Each object category has one handler that knows how to snapshot its
//! objects and how to make live objects match a snapshot again. The history
//! ledger and the sync manager never look inside snapshot payloads; they
//! dispatch to the handler named by a record's `categoryHandlerId`.

mod image;
mod point;
mod rectangle;
mod region;

pub use image::ImageHandler;
pub use point::PointHandler;
pub use rectangle::RectangleHandler;
pub use region::RegionHandler;

use crate::canvas::CanvasDocument;
use crate::history::{HistoryLedger, HistoryRecord, ObjectSnapshot, RecordKind};
use crate::objects::{CanvasObject, Category, ObjectId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use thiserror::Error;

/// Snapshot encode/decode errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Expected a {expected} object, found {found}")]
    CategoryMismatch { expected: Category, found: Category },
    #[error("No handler registered for {0}")]
    UnknownHandler(String),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Typed payload codec for one object category.
///
/// The object type itself is the payload: its serde representation omits the
/// id, which travels in [`ObjectSnapshot::id`].
pub trait SnapshotCodec: Serialize + DeserializeOwned + Sized {
    const CATEGORY: Category;

    fn from_object(object: &CanvasObject) -> Option<&Self>;

    fn from_object_mut(object: &mut CanvasObject) -> Option<&mut Self>;

    fn set_id(&mut self, id: ObjectId);

    fn into_object(self) -> CanvasObject;
}

/// An object snapshot whose payload type is known.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedSnapshot<T> {
    pub id: ObjectId,
    pub data: T,
}

impl<T: SnapshotCodec> TypedSnapshot<T> {
    /// Encode into the opaque form stored in history records.
    pub fn encode(&self) -> SnapshotResult<ObjectSnapshot> {
        Ok(ObjectSnapshot {
            id: self.id.clone(),
            data: serde_json::to_value(&self.data)?,
        })
    }

    /// Decode an opaque snapshot produced by the same category.
    pub fn decode(snapshot: &ObjectSnapshot) -> SnapshotResult<Self> {
        let mut data: T = serde_json::from_value(snapshot.data.clone())?;
        data.set_id(snapshot.id.clone());
        Ok(Self {
            id: snapshot.id.clone(),
            data,
        })
    }
}

/// Contract every category handler satisfies.
pub trait CategoryHandler {
    fn category(&self) -> Category;

    /// Whether records produced by this handler are synced unless the edit
    /// says otherwise.
    fn syncs_by_default(&self) -> bool {
        true
    }

    /// Capture everything needed to recreate `object`. Side-effect free.
    fn create_snapshot(&self, object: &CanvasObject) -> SnapshotResult<ObjectSnapshot>;

    /// Build a new live object from a snapshot.
    fn restore(&self, snapshot: &ObjectSnapshot) -> SnapshotResult<CanvasObject>;

    /// Overwrite an existing live object in place.
    fn overwrite(&self, object: &mut CanvasObject, snapshot: &ObjectSnapshot) -> SnapshotResult<()>;

    fn handler_id(&self) -> &'static str {
        self.category().handler_id()
    }

    fn record_add(&self, ledger: &mut HistoryLedger, after: Vec<ObjectSnapshot>, need_sync: Option<bool>) -> bool {
        let need_sync = need_sync.unwrap_or_else(|| self.syncs_by_default());
        ledger.add_record(HistoryRecord::add(self.handler_id(), after, need_sync))
    }

    fn record_remove(&self, ledger: &mut HistoryLedger, before: Vec<ObjectSnapshot>, need_sync: Option<bool>) -> bool {
        let need_sync = need_sync.unwrap_or_else(|| self.syncs_by_default());
        ledger.add_record(HistoryRecord::remove(self.handler_id(), before, need_sync))
    }

    fn record_modify(
        &self,
        ledger: &mut HistoryLedger,
        before: Vec<ObjectSnapshot>,
        after: Vec<ObjectSnapshot>,
        need_sync: Option<bool>,
    ) -> bool {
        let need_sync = need_sync.unwrap_or_else(|| self.syncs_by_default());
        ledger.add_record(HistoryRecord::modify(self.handler_id(), before, after, need_sync))
    }

    /// Make live objects match `record.before`.
    fn apply_undo(&self, document: &mut CanvasDocument, record: &HistoryRecord) {
        match record.kind {
            RecordKind::Add => remove_all(document, &record.object_ids),
            RecordKind::Remove => recreate_all(self, document, record.before()),
            RecordKind::Modify => overwrite_all(self, document, record.before()),
        }
    }

    /// Make live objects match `record.after`.
    fn apply_redo(&self, document: &mut CanvasDocument, record: &HistoryRecord) {
        match record.kind {
            RecordKind::Add => recreate_all(self, document, record.after()),
            RecordKind::Remove => remove_all(document, &record.object_ids),
            RecordKind::Modify => overwrite_all(self, document, record.after()),
        }
    }
}

fn remove_all(document: &mut CanvasDocument, ids: &[ObjectId]) {
    for id in ids {
        if document.remove(id).is_none() {
            log::debug!("Object {} already gone, nothing to remove", id);
        }
    }
}

fn recreate_all<H: CategoryHandler + ?Sized>(handler: &H, document: &mut CanvasDocument, snapshots: &[ObjectSnapshot]) {
    for snapshot in snapshots {
        match handler.restore(snapshot) {
            Ok(object) => document.insert(object),
            Err(e) => log::warn!("Failed to recreate {} {}: {}", handler.category(), snapshot.id, e),
        }
    }
}

fn overwrite_all<H: CategoryHandler + ?Sized>(handler: &H, document: &mut CanvasDocument, snapshots: &[ObjectSnapshot]) {
    for snapshot in snapshots {
        let mut failure = None;
        let found = document.update(&snapshot.id, |object| {
            failure = handler.overwrite(object, snapshot).err();
        });
        if !found {
            log::debug!("Object {} not on canvas, skipping modify", snapshot.id);
        } else if let Some(e) = failure {
            log::warn!("Failed to restore {} {}: {}", handler.category(), snapshot.id, e);
        }
    }
}

/// Handler implementation shared by every category, parameterized by the
/// category's payload type.
pub struct ObjectHandler<T> {
    syncs_by_default: bool,
    _codec: PhantomData<fn() -> T>,
}

impl<T> ObjectHandler<T> {
    pub fn new() -> Self {
        Self {
            syncs_by_default: true,
            _codec: PhantomData,
        }
    }

    /// Handler whose records stay local unless an edit asks for sync.
    pub fn local_only() -> Self {
        Self {
            syncs_by_default: false,
            _codec: PhantomData,
        }
    }
}

impl<T> Default for ObjectHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SnapshotCodec + Clone> ObjectHandler<T> {
    /// Snapshot with the payload type preserved.
    pub fn typed_snapshot(&self, object: &CanvasObject) -> SnapshotResult<TypedSnapshot<T>> {
        let data = T::from_object(object).ok_or(SnapshotError::CategoryMismatch {
            expected: T::CATEGORY,
            found: object.category(),
        })?;
        Ok(TypedSnapshot {
            id: object.id().to_string(),
            data: data.clone(),
        })
    }
}

impl<T: SnapshotCodec + Clone> CategoryHandler for ObjectHandler<T> {
    fn category(&self) -> Category {
        T::CATEGORY
    }

    fn syncs_by_default(&self) -> bool {
        self.syncs_by_default
    }

    fn create_snapshot(&self, object: &CanvasObject) -> SnapshotResult<ObjectSnapshot> {
        self.typed_snapshot(object)?.encode()
    }

    fn restore(&self, snapshot: &ObjectSnapshot) -> SnapshotResult<CanvasObject> {
        Ok(TypedSnapshot::<T>::decode(snapshot)?.data.into_object())
    }

    fn overwrite(&self, object: &mut CanvasObject, snapshot: &ObjectSnapshot) -> SnapshotResult<()> {
        let found = object.category();
        let slot = T::from_object_mut(object).ok_or(SnapshotError::CategoryMismatch {
            expected: T::CATEGORY,
            found,
        })?;
        *slot = TypedSnapshot::<T>::decode(snapshot)?.data;
        Ok(())
    }
}

/// Handlers keyed by category, resolved from the string id stored in
/// records only when a record is applied.
pub struct HandlerRegistry {
    handlers: HashMap<Category, Box<dyn CategoryHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the rectangle, image, point and region handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RectangleHandler::new()));
        registry.register(Box::new(ImageHandler::new()));
        registry.register(Box::new(PointHandler::new()));
        registry.register(Box::new(RegionHandler::new()));
        registry
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(&mut self, handler: Box<dyn CategoryHandler>) -> Option<Box<dyn CategoryHandler>> {
        self.handlers.insert(handler.category(), handler)
    }

    pub fn unregister(&mut self, category: Category) -> Option<Box<dyn CategoryHandler>> {
        self.handlers.remove(&category)
    }

    pub fn get(&self, category: Category) -> Option<&dyn CategoryHandler> {
        self.handlers.get(&category).map(|h| h.as_ref())
    }

    /// Look up the handler named in a serialized record.
    pub fn resolve(&self, handler_id: &str) -> Option<&dyn CategoryHandler> {
        let category = handler_id.parse::<Category>().ok()?;
        self.get(category)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
