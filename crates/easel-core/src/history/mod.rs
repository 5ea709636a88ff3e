//! Undo/redo history.
//!
//! A [`HistoryRecord`] describes one reversible edit against a set of object
//! ids. Records are category-agnostic: the snapshot payloads are opaque JSON
//! values that only the owning category handler interprets.

mod ledger;

pub use ledger::{ApplyDirection, HistoryLedger, RecordApplier};

use crate::objects::ObjectId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Kind of edit a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Add,
    Remove,
    Modify,
}

/// Opaque, category-defined state of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub data: serde_json::Value,
}

/// A record that breaks the before/after shape rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRecord {
    #[error("{kind:?} record {record} must not carry `{field}` snapshots")]
    UnexpectedSnapshots {
        record: String,
        kind: RecordKind,
        field: &'static str,
    },
    #[error("{kind:?} record {record} is missing `{field}` snapshots")]
    MissingSnapshots {
        record: String,
        kind: RecordKind,
        field: &'static str,
    },
    #[error("record {record}: `{field}` has {actual} snapshots for {expected} object ids")]
    Misaligned {
        record: String,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("record {record}: snapshot {position} is for {actual}, expected {expected}")]
    IdMismatch {
        record: String,
        position: usize,
        expected: ObjectId,
        actual: ObjectId,
    },
}

/// One reversible edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub category_handler_id: String,
    pub object_ids: Vec<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<ObjectSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<ObjectSnapshot>>,
    #[serde(default = "default_need_sync")]
    pub need_sync: bool,
}

fn default_need_sync() -> bool {
    true
}

fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

impl HistoryRecord {
    /// Objects were created; `after` holds their initial state.
    pub fn add(handler_id: impl Into<String>, after: Vec<ObjectSnapshot>, need_sync: bool) -> Self {
        Self {
            id: new_record_id(),
            kind: RecordKind::Add,
            category_handler_id: handler_id.into(),
            object_ids: after.iter().map(|s| s.id.clone()).collect(),
            before: None,
            after: Some(after),
            need_sync,
        }
    }

    /// Objects were deleted; `before` holds their last state.
    pub fn remove(handler_id: impl Into<String>, before: Vec<ObjectSnapshot>, need_sync: bool) -> Self {
        Self {
            id: new_record_id(),
            kind: RecordKind::Remove,
            category_handler_id: handler_id.into(),
            object_ids: before.iter().map(|s| s.id.clone()).collect(),
            before: Some(before),
            after: None,
            need_sync,
        }
    }

    /// Objects changed in place. `before` and `after` are index-aligned.
    pub fn modify(
        handler_id: impl Into<String>,
        before: Vec<ObjectSnapshot>,
        after: Vec<ObjectSnapshot>,
        need_sync: bool,
    ) -> Self {
        Self {
            id: new_record_id(),
            kind: RecordKind::Modify,
            category_handler_id: handler_id.into(),
            object_ids: after.iter().map(|s| s.id.clone()).collect(),
            before: Some(before),
            after: Some(after),
            need_sync,
        }
    }

    /// A copy of this record under a fresh id, for re-sending a redo.
    pub(crate) fn reissued(&self) -> Self {
        Self {
            id: new_record_id(),
            ..self.clone()
        }
    }

    /// The part of this record touching objects accepted by `keep`, or
    /// `None` if no object is kept.
    pub(crate) fn restricted_to(&self, keep: impl Fn(&str) -> bool) -> Option<Self> {
        let object_ids: Vec<ObjectId> = self.object_ids.iter().filter(|id| keep(id.as_str())).cloned().collect();
        if object_ids.is_empty() {
            return None;
        }
        let filter = |snapshots: &Option<Vec<ObjectSnapshot>>| {
            snapshots
                .as_ref()
                .map(|list| list.iter().filter(|s| keep(s.id.as_str())).cloned().collect::<Vec<_>>())
        };
        Some(Self {
            object_ids,
            before: filter(&self.before),
            after: filter(&self.after),
            ..self.clone()
        })
    }

    pub fn before(&self) -> &[ObjectSnapshot] {
        self.before.as_deref().unwrap_or(&[])
    }

    pub fn after(&self) -> &[ObjectSnapshot] {
        self.after.as_deref().unwrap_or(&[])
    }

    /// The forward edit that undoes this one.
    ///
    /// Undo is broadcast as an ordinary edit: an add becomes a remove, a
    /// remove becomes an add, and a modify swaps its snapshots.
    pub fn inverted(&self) -> Self {
        let kind = match self.kind {
            RecordKind::Add => RecordKind::Remove,
            RecordKind::Remove => RecordKind::Add,
            RecordKind::Modify => RecordKind::Modify,
        };
        Self {
            id: new_record_id(),
            kind,
            category_handler_id: self.category_handler_id.clone(),
            object_ids: self.object_ids.clone(),
            before: self.after.clone(),
            after: self.before.clone(),
            need_sync: self.need_sync,
        }
    }

    /// Check the shape rules: `add` has `after` only, `remove` has `before`
    /// only, `modify` has both, and every snapshot list is index-aligned with
    /// `object_ids`.
    pub fn validate(&self) -> Result<(), InvalidRecord> {
        let (needs_before, needs_after) = match self.kind {
            RecordKind::Add => (false, true),
            RecordKind::Remove => (true, false),
            RecordKind::Modify => (true, true),
        };
        for (field, present, needed) in [
            ("before", self.before.as_ref(), needs_before),
            ("after", self.after.as_ref(), needs_after),
        ] {
            match (present, needed) {
                (Some(_), false) => {
                    return Err(InvalidRecord::UnexpectedSnapshots {
                        record: self.id.clone(),
                        kind: self.kind,
                        field,
                    });
                }
                (None, true) => {
                    return Err(InvalidRecord::MissingSnapshots {
                        record: self.id.clone(),
                        kind: self.kind,
                        field,
                    });
                }
                (Some(snapshots), true) => self.check_aligned(field, snapshots)?,
                (None, false) => {}
            }
        }
        Ok(())
    }

    fn check_aligned(&self, field: &'static str, snapshots: &[ObjectSnapshot]) -> Result<(), InvalidRecord> {
        if snapshots.len() != self.object_ids.len() {
            return Err(InvalidRecord::Misaligned {
                record: self.id.clone(),
                field,
                expected: self.object_ids.len(),
                actual: snapshots.len(),
            });
        }
        for (position, (snapshot, id)) in snapshots.iter().zip(&self.object_ids).enumerate() {
            if &snapshot.id != id {
                return Err(InvalidRecord::IdMismatch {
                    record: self.id.clone(),
                    position,
                    expected: id.clone(),
                    actual: snapshot.id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(id: &str, x: f64) -> ObjectSnapshot {
        ObjectSnapshot {
            id: id.to_string(),
            data: json!({ "x": x }),
        }
    }

    #[test]
    fn test_record_wire_shape() {
        let record = HistoryRecord::add("image", vec![snap("img1", 1.0)], true);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "add");
        assert_eq!(value["categoryHandlerId"], "image");
        assert_eq!(value["objectIds"], json!(["img1"]));
        assert_eq!(value["needSync"], true);
        assert!(value.get("before").is_none());
    }

    #[test]
    fn test_need_sync_defaults_to_true() {
        let value = json!({
            "id": "r1",
            "type": "remove",
            "categoryHandlerId": "rectangle",
            "objectIds": ["a"],
            "before": [{ "id": "a", "data": {} }]
        });
        let record: HistoryRecord = serde_json::from_value(value).unwrap();
        assert!(record.need_sync);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_inverted_swaps_snapshots() {
        let record = HistoryRecord::modify("rectangle", vec![snap("a", 1.0)], vec![snap("a", 2.0)], true);
        let inverse = record.inverted();
        assert_eq!(inverse.kind, RecordKind::Modify);
        assert_eq!(inverse.before(), record.after());
        assert_eq!(inverse.after(), record.before());
        assert_ne!(inverse.id, record.id);

        let add = HistoryRecord::add("image", vec![snap("img1", 1.0)], true);
        let remove = add.inverted();
        assert_eq!(remove.kind, RecordKind::Remove);
        assert!(remove.after.is_none());
        assert_eq!(remove.before(), add.after());
        assert!(remove.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let mut record = HistoryRecord::add("image", vec![snap("img1", 1.0)], true);
        record.before = Some(vec![]);
        assert!(matches!(
            record.validate(),
            Err(InvalidRecord::UnexpectedSnapshots { field: "before", .. })
        ));

        let mut record = HistoryRecord::modify("rectangle", vec![snap("a", 1.0)], vec![snap("a", 2.0)], true);
        record.object_ids.push("b".to_string());
        assert!(matches!(record.validate(), Err(InvalidRecord::Misaligned { .. })));

        let mut record = HistoryRecord::remove("point", vec![snap("a", 1.0)], true);
        record.object_ids = vec!["z".to_string()];
        assert!(matches!(record.validate(), Err(InvalidRecord::IdMismatch { .. })));
    }

    #[test]
    fn test_restricted_to_keeps_alignment() {
        let record = HistoryRecord::modify(
            "rectangle",
            vec![snap("a", 1.0), snap("b", 1.0)],
            vec![snap("a", 2.0), snap("b", 2.0)],
            true,
        );
        let part = record.restricted_to(|id| id == "b").unwrap();
        assert_eq!(part.object_ids, vec!["b".to_string()]);
        assert_eq!(part.after(), &[snap("b", 2.0)]);
        assert_eq!(part.id, record.id);
        assert!(part.validate().is_ok());
        assert!(record.restricted_to(|_| false).is_none());
    }
}
