use std::collections::BTreeMap;
use std::ops::Range;

use super::record::{ImageId, ImageRecord};

/// Id-ascending set of image records.
///
/// Two writers share it: the poll loop, which replaces everything with the latest remote
/// snapshot, and user edits, which land one record at a time after the backend confirms them.
/// Every confirmed edit is stamped with a fresh epoch. A snapshot reconciled through
/// [`ImageCollection::reconcile_since`] carries the epoch read when its fetch was issued, and
/// edits stamped after that epoch are replayed over the snapshot instead of being reverted by it.
#[derive(Debug, Clone, Default)]
pub struct ImageCollection {
    records: Vec<ImageRecord>,
    epoch: u64,
    confirmed: BTreeMap<ImageId, ConfirmedWrite>,
}

#[derive(Debug, Clone)]
struct ConfirmedWrite {
    epoch: u64,
    change: ConfirmedChange,
}

#[derive(Debug, Clone)]
enum ConfirmedChange {
    Upserted(ImageRecord),
    Removed,
}

impl ImageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ImageRecord>) -> Self {
        let mut collection = Self::new();
        collection.reconcile(records);
        collection
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageRecord> {
        self.position(id).map(|idx| &self.records[idx])
    }

    pub fn position(&self, id: ImageId) -> Option<usize> {
        self.records
            .binary_search_by_key(&id, |record| record.id)
            .ok()
    }

    /// Records inside `range`, truncated to the collection bounds.
    pub fn window(&self, range: Range<usize>) -> &[ImageRecord] {
        let end = range.end.min(self.records.len());
        let start = range.start.min(end);
        &self.records[start..end]
    }

    pub fn diff_size_against(&self, baseline: usize) -> usize {
        self.records.len().saturating_sub(baseline)
    }

    /// Replaces the whole set with a snapshot that is at least as fresh as every local edit.
    pub fn reconcile(&mut self, remote: Vec<ImageRecord>) {
        self.reconcile_since(remote, self.epoch);
    }

    /// Replaces the whole set with a snapshot whose fetch was issued at `fetched_at`.
    ///
    /// Remote data wins for every record except those with a confirmed local edit newer than
    /// the fetch. Applying the same snapshot with the same epoch twice is a no-op.
    pub fn reconcile_since(&mut self, remote: Vec<ImageRecord>, fetched_at: u64) {
        self.confirmed.retain(|_, write| write.epoch > fetched_at);

        let mut by_id: BTreeMap<ImageId, ImageRecord> = BTreeMap::new();
        for record in remote {
            by_id.insert(record.id, record);
        }
        for (id, write) in &self.confirmed {
            match &write.change {
                ConfirmedChange::Upserted(record) => {
                    by_id.insert(*id, record.clone());
                }
                ConfirmedChange::Removed => {
                    by_id.remove(id);
                }
            }
        }
        self.records = by_id.into_values().collect();
    }

    /// Stores a backend-confirmed record. Returns `true` when the id was not present before.
    pub fn upsert(&mut self, record: ImageRecord) -> bool {
        let id = record.id;
        let stamp = self.next_epoch();
        self.confirmed.insert(
            id,
            ConfirmedWrite {
                epoch: stamp,
                change: ConfirmedChange::Upserted(record.clone()),
            },
        );
        match self.records.binary_search_by_key(&id, |existing| existing.id) {
            Ok(idx) => {
                self.records[idx] = record;
                false
            }
            Err(idx) => {
                self.records.insert(idx, record);
                true
            }
        }
    }

    /// Drops a record whose deletion the backend confirmed.
    pub fn remove(&mut self, id: ImageId) -> Option<ImageRecord> {
        let stamp = self.next_epoch();
        self.confirmed.insert(
            id,
            ConfirmedWrite {
                epoch: stamp,
                change: ConfirmedChange::Removed,
            },
        );
        let idx = self.position(id)?;
        Some(self.records.remove(idx))
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}
