//! Canvas document and editing session.

use crate::handlers::{HandlerRegistry, SnapshotError, SnapshotResult};
use crate::history::{ApplyDirection, HistoryLedger, HistoryRecord, ObjectSnapshot, RecordApplier, RecordKind};
use crate::objects::{CanvasObject, Category, ObjectId};
use kurbo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Current version of the exported canvas format.
pub const CANVAS_FORMAT_VERSION: u32 = 1;

/// A mutation of the live object set, as reported by the drawing surface.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasChange {
    Added(ObjectId),
    Removed(CanvasObject),
    Modified { before: CanvasObject },
}

/// The live object set.
///
/// Every mutation is journalled so that the editing session can turn it into
/// history records, whether it came from a user edit or from applying a
/// record.
#[derive(Debug, Clone)]
pub struct CanvasDocument {
    /// Unique document identifier.
    pub id: String,
    /// Document name.
    pub name: String,
    objects: HashMap<ObjectId, CanvasObject>,
    /// Z-order of objects (back to front).
    z_order: Vec<ObjectId>,
    changes: Vec<CanvasChange>,
}

impl Default for CanvasDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "Untitled".to_string(),
            objects: HashMap::new(),
            z_order: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Add an object on top, or replace an object with the same id in place.
    pub fn insert(&mut self, object: CanvasObject) {
        let id = object.id().to_string();
        match self.objects.insert(id.clone(), object) {
            Some(before) => self.changes.push(CanvasChange::Modified { before }),
            None => {
                self.z_order.push(id.clone());
                self.changes.push(CanvasChange::Added(id.clone()));
            }
        }
        self.refresh_geometry(&id);
    }

    /// Remove an object.
    pub fn remove(&mut self, id: &str) -> Option<CanvasObject> {
        let removed = self.objects.remove(id)?;
        self.z_order.retain(|object_id| object_id != id);
        self.changes.push(CanvasChange::Removed(removed.clone()));
        self.refresh_geometry(id);
        Some(removed)
    }

    /// Mutate an object in place. Returns false if the id is unknown.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut CanvasObject)) -> bool {
        let Some(object) = self.objects.get_mut(id) else {
            return false;
        };
        let before = object.clone();
        f(object);
        self.changes.push(CanvasChange::Modified { before });
        self.refresh_geometry(id);
        true
    }

    /// Get an object by ID.
    pub fn get(&self, id: &str) -> Option<&CanvasObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// Get objects in z-order (back to front).
    pub fn objects_ordered(&self) -> impl Iterator<Item = &CanvasObject> {
        self.z_order.iter().filter_map(|id| self.objects.get(id))
    }

    /// Object ids in z-order.
    pub fn z_order(&self) -> &[ObjectId] {
        &self.z_order
    }

    /// Get the bounding box of all objects.
    pub fn bounds(&self) -> Option<Rect> {
        self.objects_ordered()
            .map(|o| o.bounds())
            .reduce(|acc, b| acc.union(b))
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Replace the whole object set without journalling.
    fn reset(&mut self, objects: Vec<CanvasObject>) {
        self.objects.clear();
        self.z_order.clear();
        self.changes.clear();
        for object in objects {
            let id = object.id().to_string();
            if self.objects.insert(id.clone(), object).is_none() {
                self.z_order.push(id);
            }
        }
        let ids = self.z_order.clone();
        for id in &ids {
            self.refresh_geometry(id);
        }
    }

    pub(crate) fn take_changes(&mut self) -> Vec<CanvasChange> {
        std::mem::take(&mut self.changes)
    }

    /// Recompute cached geometry for `id` and anything anchored to it.
    fn refresh_geometry(&mut self, id: &str) {
        let dependents: Vec<ObjectId> = match self.objects.get(id) {
            Some(CanvasObject::Region(region)) => vec![region.id().to_string()],
            Some(CanvasObject::Image(_)) | None => self
                .objects
                .values()
                .filter_map(|o| match o {
                    CanvasObject::Region(r) if r.parent == id => Some(r.id().to_string()),
                    _ => None,
                })
                .collect(),
            Some(_) => Vec::new(),
        };
        for region_id in dependents {
            let parent = match self.objects.get(&region_id) {
                Some(CanvasObject::Region(r)) => self.objects.get(&r.parent).and_then(|p| p.as_image()).cloned(),
                _ => continue,
            };
            if let Some(region) = self.objects.get_mut(&region_id).and_then(|o| o.as_region_mut()) {
                region.refresh(parent.as_ref());
            }
        }
    }
}

/// Plain serializable form of a whole canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    pub version: u32,
    /// Objects in z-order (back to front).
    pub objects: Vec<StoredObject>,
}

impl Default for CanvasSnapshot {
    fn default() -> Self {
        Self {
            version: CANVAS_FORMAT_VERSION,
            objects: Vec::new(),
        }
    }
}

/// One object inside a [`CanvasSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub category_handler_id: String,
    #[serde(flatten)]
    pub snapshot: ObjectSnapshot,
}

/// Edits waiting to become one history record.
struct PendingBatch {
    kind: RecordKind,
    category: Category,
    before: Vec<ObjectSnapshot>,
    after: Vec<ObjectSnapshot>,
}

/// Turn journalled document changes into history records.
///
/// Consecutive changes of the same kind and category form one batch record.
/// Failures are logged and dropped so tracking never blocks the edit.
fn track_changes(
    document: &mut CanvasDocument,
    handlers: &HandlerRegistry,
    ledger: &mut HistoryLedger,
    need_sync: Option<bool>,
) {
    let changes = document.take_changes();
    if changes.is_empty() {
        return;
    }

    let mut batches: Vec<PendingBatch> = Vec::new();
    let mut modified: HashSet<ObjectId> = HashSet::new();
    for change in changes {
        let (kind, category, before, after) = match change {
            CanvasChange::Added(id) => {
                let Some(object) = document.get(&id) else {
                    continue;
                };
                // Later tweaks in the same commit are part of the add.
                modified.insert(id);
                (RecordKind::Add, object.category(), None, Some(object))
            }
            CanvasChange::Removed(object) => {
                let category = object.category();
                (RecordKind::Remove, category, Some(object), None)
            }
            CanvasChange::Modified { before } => {
                if !modified.insert(before.id().to_string()) {
                    continue;
                }
                let Some(after) = document.get(before.id()) else {
                    continue;
                };
                (RecordKind::Modify, before.category(), Some(before), Some(after))
            }
        };

        let Some(handler) = handlers.get(category) else {
            log::warn!("No handler for {}, change not recorded", category);
            continue;
        };
        let snapshot = |object: Option<&CanvasObject>| object.map(|o| handler.create_snapshot(o)).transpose();
        let (before, after) = match (snapshot(before.as_ref()), snapshot(after)) {
            (Ok(before), Ok(after)) => (before, after),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Failed to snapshot {} change: {}", category, e);
                continue;
            }
        };
        if kind == RecordKind::Modify && before == after {
            continue;
        }

        let joins_last = batches
            .last()
            .is_some_and(|last| last.kind == kind && last.category == category);
        if !joins_last {
            batches.push(PendingBatch {
                kind,
                category,
                before: Vec::new(),
                after: Vec::new(),
            });
        }
        if let Some(batch) = batches.last_mut() {
            batch.before.extend(before);
            batch.after.extend(after);
        }
    }

    for batch in batches {
        let Some(handler) = handlers.get(batch.category) else {
            continue;
        };
        match batch.kind {
            RecordKind::Add => handler.record_add(ledger, batch.after, need_sync),
            RecordKind::Remove => handler.record_remove(ledger, batch.before, need_sync),
            RecordKind::Modify => handler.record_modify(ledger, batch.before, batch.after, need_sync),
        };
    }
}

/// Applies records to a document through the registered handlers.
struct DocumentApplier<'a> {
    document: &'a mut CanvasDocument,
    handlers: &'a HandlerRegistry,
}

impl RecordApplier for DocumentApplier<'_> {
    fn apply(&mut self, record: &HistoryRecord, direction: ApplyDirection, ledger: &mut HistoryLedger) -> bool {
        let Some(handler) = self.handlers.resolve(&record.category_handler_id) else {
            log::warn!(
                "No handler registered for {}, skipping record {}",
                record.category_handler_id,
                record.id
            );
            return false;
        };
        match direction {
            ApplyDirection::Undo => handler.apply_undo(self.document, record),
            ApplyDirection::Redo => handler.apply_redo(self.document, record),
        }
        // Same path a live edit takes; the ledger is paused here.
        track_changes(self.document, self.handlers, ledger, None);
        true
    }
}

/// An editing session: the live document, its history, and the handlers
/// that connect the two.
pub struct Canvas {
    pub document: CanvasDocument,
    history: HistoryLedger,
    handlers: HandlerRegistry,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    /// Create a session with the default category handlers.
    pub fn new() -> Self {
        Self::with_handlers(HandlerRegistry::with_defaults())
    }

    pub fn with_handlers(handlers: HandlerRegistry) -> Self {
        Self {
            document: CanvasDocument::new(),
            history: HistoryLedger::new(),
            handlers,
        }
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryLedger {
        &mut self.history
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// Add an object and record it.
    pub fn add_object(&mut self, object: impl Into<CanvasObject>) -> ObjectId {
        let object = object.into();
        let id = object.id().to_string();
        self.document.insert(object);
        self.commit(None);
        id
    }

    /// Add several objects as one undo step.
    pub fn add_objects(&mut self, objects: Vec<CanvasObject>) -> Vec<ObjectId> {
        let ids = objects.iter().map(|o| o.id().to_string()).collect();
        for object in objects {
            self.document.insert(object);
        }
        self.commit(None);
        ids
    }

    /// Remove objects as one undo step. Returns how many existed.
    pub fn remove_objects(&mut self, ids: &[ObjectId]) -> usize {
        let removed = ids.iter().filter(|id| self.document.remove(id).is_some()).count();
        self.commit(None);
        removed
    }

    /// Mutate objects as one committed, synced undo step (e.g. a multi-select
    /// drag on release). Returns how many objects were found.
    pub fn modify_objects(&mut self, ids: &[ObjectId], mut f: impl FnMut(&mut CanvasObject)) -> usize {
        let found = ids.iter().filter(|id| self.document.update(id, &mut f)).count();
        self.commit(None);
        found
    }

    /// Like [`Canvas::modify_objects`], but the record stays local
    /// (transient preview edits are undoable but never broadcast).
    pub fn preview_modify(&mut self, ids: &[ObjectId], mut f: impl FnMut(&mut CanvasObject)) -> usize {
        let found = ids.iter().filter(|id| self.document.update(id, &mut f)).count();
        self.commit(Some(false));
        found
    }

    /// Record any journalled document changes made directly on
    /// [`Canvas::document`].
    pub fn commit(&mut self, need_sync: Option<bool>) {
        track_changes(&mut self.document, &self.handlers, &mut self.history, need_sync);
    }

    /// Undo the last change.
    /// Returns true if undo was performed, false if nothing to undo.
    pub fn undo(&mut self) -> bool {
        let mut applier = DocumentApplier {
            document: &mut self.document,
            handlers: &self.handlers,
        };
        self.history.undo(&mut applier)
    }

    /// Redo the last undone change.
    /// Returns true if redo was performed, false if nothing to redo.
    pub fn redo(&mut self) -> bool {
        let mut applier = DocumentApplier {
            document: &mut self.document,
            handlers: &self.handlers,
        };
        self.history.redo(&mut applier)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Sync-worthy records not yet acknowledged by the server.
    pub fn pending_sync_len(&self) -> usize {
        self.history.outgoing_len()
    }

    /// Apply a record produced elsewhere through the redo path, without
    /// recording it. Returns false if no handler could apply it.
    pub fn apply_forward(&mut self, record: &HistoryRecord) -> bool {
        let mut applier = DocumentApplier {
            document: &mut self.document,
            handlers: &self.handlers,
        };
        self.history.pause();
        let applied = applier.apply(record, ApplyDirection::Redo, &mut self.history);
        self.history.resume();
        applied
    }

    /// Apply a remote edit and drop local history, whose `before` snapshots
    /// no longer describe the shared state.
    pub fn apply_remote(&mut self, record: &HistoryRecord) -> bool {
        let applied = self.apply_forward(record);
        self.history.clear();
        applied
    }

    /// Export every object, back to front.
    pub fn export(&self) -> SnapshotResult<CanvasSnapshot> {
        let mut objects = Vec::with_capacity(self.document.len());
        for object in self.document.objects_ordered() {
            let category = object.category();
            let handler = self
                .handlers
                .get(category)
                .ok_or_else(|| SnapshotError::UnknownHandler(category.handler_id().to_string()))?;
            objects.push(StoredObject {
                category_handler_id: handler.handler_id().to_string(),
                snapshot: handler.create_snapshot(object)?,
            });
        }
        Ok(CanvasSnapshot {
            version: CANVAS_FORMAT_VERSION,
            objects,
        })
    }

    /// Replace the canvas with an exported snapshot and drop history.
    ///
    /// Every object is decoded before the document is touched, so a
    /// malformed snapshot leaves the canvas unchanged.
    pub fn import(&mut self, snapshot: &CanvasSnapshot) -> SnapshotResult<()> {
        let mut objects = Vec::with_capacity(snapshot.objects.len());
        for stored in &snapshot.objects {
            let Some(handler) = self.handlers.resolve(&stored.category_handler_id) else {
                log::warn!(
                    "No handler registered for {}, dropping object {}",
                    stored.category_handler_id,
                    stored.snapshot.id
                );
                continue;
            };
            objects.push(handler.restore(&stored.snapshot)?);
        }
        self.document.reset(objects);
        self.history.clear();
        Ok(())
    }
}
