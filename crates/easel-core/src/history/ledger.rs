//! The history ledger: undo/redo stacks plus the outgoing sync queue.

use super::HistoryRecord;
use std::collections::VecDeque;

/// Which side of a record to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDirection {
    /// Restore `before`.
    Undo,
    /// Restore `after`.
    Redo,
}

/// Applies records to live objects on behalf of the ledger.
///
/// The ledger is handed back in paused state so that change tracking
/// triggered by the apply can run without producing new records.
pub trait RecordApplier {
    /// Returns `false` if the record could not be dispatched (for example,
    /// its category handler is no longer registered).
    fn apply(&mut self, record: &HistoryRecord, direction: ApplyDirection, ledger: &mut HistoryLedger) -> bool;
}

/// Ordered undo/redo stacks of history records.
///
/// While a sync hook is attached, every sync-worthy change the user makes
/// (including undo and redo, expressed as ordinary forward edits) is also
/// queued for transmission.
#[derive(Debug, Default)]
pub struct HistoryLedger {
    undo_stack: Vec<HistoryRecord>,
    redo_stack: Vec<HistoryRecord>,
    /// Reference-counted pause; records are dropped while non-zero.
    pause_depth: usize,
    sync_attached: bool,
    outgoing: VecDeque<HistoryRecord>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new user edit. Clears the redo stack.
    ///
    /// Returns `false` if the ledger is paused and the record was dropped.
    pub fn add_record(&mut self, record: HistoryRecord) -> bool {
        if self.is_paused() {
            log::trace!("History paused, dropping {:?} record {}", record.kind, record.id);
            return false;
        }
        if self.sync_attached && record.need_sync {
            self.outgoing.push_back(record.clone());
        }
        self.undo_stack.push(record);
        self.redo_stack.clear();
        true
    }

    /// Undo the most recent record.
    /// Returns true if a record was popped, false if there was nothing to undo.
    pub fn undo(&mut self, applier: &mut dyn RecordApplier) -> bool {
        let Some(record) = self.undo_stack.pop() else {
            return false;
        };
        self.pause();
        let applied = applier.apply(&record, ApplyDirection::Undo, self);
        self.resume();
        if applied && self.sync_attached && record.need_sync {
            self.outgoing.push_back(record.inverted());
        }
        self.redo_stack.push(record);
        true
    }

    /// Redo the most recently undone record.
    /// Returns true if a record was popped, false if there was nothing to redo.
    pub fn redo(&mut self, applier: &mut dyn RecordApplier) -> bool {
        let Some(record) = self.redo_stack.pop() else {
            return false;
        };
        self.pause();
        let applied = applier.apply(&record, ApplyDirection::Redo, self);
        self.resume();
        if applied && self.sync_attached && record.need_sync {
            self.outgoing.push_back(record.reissued());
        }
        self.undo_stack.push(record);
        true
    }

    pub fn pause(&mut self) {
        self.pause_depth += 1;
    }

    pub fn resume(&mut self) {
        if self.pause_depth == 0 {
            log::warn!("History resumed without a matching pause");
            return;
        }
        self.pause_depth -= 1;
    }

    pub fn is_paused(&self) -> bool {
        self.pause_depth > 0
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Records on the undo stack, oldest first.
    pub fn undo_records(&self) -> &[HistoryRecord] {
        &self.undo_stack
    }

    /// Drop both stacks. Queued outgoing records are kept: they describe
    /// edits that are already applied locally.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Start queueing sync-worthy changes for transmission.
    pub fn attach_sync(&mut self) {
        self.sync_attached = true;
    }

    /// Stop queueing and discard anything not yet sent.
    pub fn detach_sync(&mut self) {
        self.sync_attached = false;
        self.outgoing.clear();
    }

    pub fn is_sync_attached(&self) -> bool {
        self.sync_attached
    }

    /// Take queued outgoing records, oldest first.
    pub fn take_outgoing(&mut self) -> Vec<HistoryRecord> {
        self.outgoing.drain(..).collect()
    }

    /// Put unsent records back at the front of the queue, preserving order.
    pub fn requeue_outgoing(&mut self, records: Vec<HistoryRecord>) {
        for record in records.into_iter().rev() {
            self.outgoing.push_front(record);
        }
    }

    /// Queued outgoing records, oldest first.
    pub fn outgoing_records(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.outgoing.iter()
    }

    /// Number of sync-worthy records not yet acknowledged by the server.
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ObjectSnapshot, RecordKind};
    use serde_json::json;

    fn add(id: &str) -> HistoryRecord {
        HistoryRecord::add(
            "rectangle",
            vec![ObjectSnapshot {
                id: id.to_string(),
                data: json!({}),
            }],
            true,
        )
    }

    /// Applier that behaves like a live "object modified" listener: every
    /// apply tries to record a new edit.
    #[derive(Default)]
    struct ListeningApplier {
        calls: Vec<(String, ApplyDirection)>,
        accepted: usize,
        known: bool,
    }

    impl RecordApplier for ListeningApplier {
        fn apply(&mut self, record: &HistoryRecord, direction: ApplyDirection, ledger: &mut HistoryLedger) -> bool {
            self.calls.push((record.id.clone(), direction));
            if ledger.add_record(add("echo")) {
                self.accepted += 1;
            }
            self.known
        }
    }

    #[test]
    fn test_add_record_clears_redo() {
        let mut ledger = HistoryLedger::new();
        let mut applier = ListeningApplier {
            known: true,
            ..Default::default()
        };
        ledger.add_record(add("a"));
        assert!(ledger.undo(&mut applier));
        assert!(ledger.can_redo());

        ledger.add_record(add("b"));
        assert!(!ledger.can_redo());
        assert_eq!(ledger.undo_len(), 1);
    }

    #[test]
    fn test_undo_redo_move_between_stacks() {
        let mut ledger = HistoryLedger::new();
        let mut applier = ListeningApplier {
            known: true,
            ..Default::default()
        };
        let record = add("a");
        let id = record.id.clone();
        ledger.add_record(record);

        assert!(ledger.undo(&mut applier));
        assert_eq!((ledger.undo_len(), ledger.redo_len()), (0, 1));
        assert!(ledger.redo(&mut applier));
        assert_eq!((ledger.undo_len(), ledger.redo_len()), (1, 0));
        assert_eq!(
            applier.calls,
            vec![(id.clone(), ApplyDirection::Undo), (id, ApplyDirection::Redo)]
        );
    }

    #[test]
    fn test_apply_does_not_reenter_ledger() {
        let mut ledger = HistoryLedger::new();
        let mut applier = ListeningApplier {
            known: true,
            ..Default::default()
        };
        ledger.add_record(add("a"));
        ledger.undo(&mut applier);
        ledger.redo(&mut applier);

        assert_eq!(applier.calls.len(), 2);
        assert_eq!(applier.accepted, 0);
        assert!(!ledger.is_paused());
        assert_eq!(ledger.undo_len(), 1);
    }

    #[test]
    fn test_empty_stacks_are_noops() {
        let mut ledger = HistoryLedger::new();
        let mut applier = ListeningApplier::default();
        assert!(!ledger.undo(&mut applier));
        assert!(!ledger.redo(&mut applier));
        assert!(applier.calls.is_empty());
    }

    #[test]
    fn test_pause_is_reference_counted() {
        let mut ledger = HistoryLedger::new();
        ledger.pause();
        ledger.pause();
        ledger.resume();
        assert!(!ledger.add_record(add("a")));
        ledger.resume();
        assert!(ledger.add_record(add("b")));
        ledger.resume();
        assert!(!ledger.is_paused());
    }

    #[test]
    fn test_outgoing_only_when_attached() {
        let mut ledger = HistoryLedger::new();
        ledger.add_record(add("a"));
        assert_eq!(ledger.outgoing_len(), 0);

        ledger.attach_sync();
        ledger.add_record(add("b"));
        let mut local = add("c");
        local.need_sync = false;
        ledger.add_record(local);
        assert_eq!(ledger.outgoing_len(), 1);

        ledger.detach_sync();
        assert_eq!(ledger.outgoing_len(), 0);
    }

    #[test]
    fn test_undo_queues_inverse_as_forward_edit() {
        let mut ledger = HistoryLedger::new();
        let mut applier = ListeningApplier {
            known: true,
            ..Default::default()
        };
        ledger.attach_sync();
        ledger.add_record(add("a"));
        ledger.undo(&mut applier);
        ledger.redo(&mut applier);

        let sent = ledger.take_outgoing();
        let kinds: Vec<_> = sent.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RecordKind::Add, RecordKind::Remove, RecordKind::Add]);
        assert_eq!(sent[1].before(), sent[0].after());
        assert_ne!(sent[2].id, sent[0].id);
    }

    #[test]
    fn test_unknown_handler_still_moves_record() {
        let mut ledger = HistoryLedger::new();
        let mut applier = ListeningApplier::default();
        ledger.attach_sync();
        ledger.add_record(add("a"));
        ledger.take_outgoing();

        assert!(ledger.undo(&mut applier));
        assert_eq!(ledger.redo_len(), 1);
        assert_eq!(ledger.outgoing_len(), 0);
    }

    #[test]
    fn test_requeue_preserves_order() {
        let mut ledger = HistoryLedger::new();
        ledger.attach_sync();
        ledger.add_record(add("c"));
        let first = add("a");
        let second = add("b");
        let ids = vec![first.id.clone(), second.id.clone()];
        ledger.requeue_outgoing(vec![first, second]);

        let sent: Vec<_> = ledger.take_outgoing().into_iter().map(|r| r.id).collect();
        assert_eq!(&sent[..2], &ids[..]);
        assert_eq!(sent.len(), 3);
    }
}
