//! FILENAME: core/pivot-matrix/src/store.rs
//! Record Store - The data the matrix READS.
//!
//! Records live in a single owned arena and are addressed by `RecordId`.
//! Results hold id lists instead of record copies, so one record can belong
//! to many cells (its own cell, every ancestor group and the grand totals)
//! without aliasing.
//!
//! Every mutation returns a `StoreChange` describing what happened. The local
//! matrix consumes these to decide between a cheap recalculation and a full
//! reprocess.

use crate::error::{PivotError, Result};
use crate::value::{Record, Value};

/// Stable index of a record inside the store. Removed ids are never reused.
pub type RecordId = u32;

/// A mutation notification produced by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// New records were appended.
    Add(Vec<RecordId>),
    /// Existing records changed the listed fields.
    Update {
        ids: Vec<RecordId>,
        modified_fields: Vec<String>,
    },
    /// Records were removed. Their ids are tombstoned.
    Remove(Vec<RecordId>),
    /// The whole record set was replaced.
    Refresh,
    /// Every record was removed.
    Clear,
}

/// Owned arena of source records.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    slots: Vec<Option<Record>>,
    live: usize,
}

impl RecordStore {
    pub fn new() -> Self {
        RecordStore::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
        let live = slots.len();
        RecordStore { slots, live }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.slots.get(id as usize).and_then(|slot| slot.as_ref())
    }

    fn get_mut(&mut self, id: RecordId) -> Result<&mut Record> {
        self.slots
            .get_mut(id as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(PivotError::RecordNotFound(id))
    }

    /// Ids of all live records, in insertion order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Record)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|r| (i as RecordId, r)))
    }

    /// Appends a record without producing a change notification.
    pub fn push(&mut self, record: Record) -> RecordId {
        let id = self.slots.len() as RecordId;
        self.slots.push(Some(record));
        self.live += 1;
        id
    }

    pub fn add(&mut self, records: impl IntoIterator<Item = Record>) -> StoreChange {
        let ids = records.into_iter().map(|r| self.push(r)).collect();
        StoreChange::Add(ids)
    }

    /// Sets one field on one record.
    pub fn update(
        &mut self,
        id: RecordId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<StoreChange> {
        let record = self.get_mut(id)?;
        let changed = record.set(field, value);
        let modified_fields = if changed { vec![field.to_string()] } else { Vec::new() };
        Ok(StoreChange::Update { ids: vec![id], modified_fields })
    }

    /// Replaces a whole record, reporting the fields that differ.
    pub fn update_record(&mut self, id: RecordId, record: Record) -> Result<StoreChange> {
        let slot = self.get_mut(id)?;
        let modified_fields = slot.diff(&record);
        *slot = record;
        Ok(StoreChange::Update { ids: vec![id], modified_fields })
    }

    pub fn remove(&mut self, ids: &[RecordId]) -> Result<StoreChange> {
        for &id in ids {
            if self.get(id).is_none() {
                return Err(PivotError::RecordNotFound(id));
            }
        }
        for &id in ids {
            if let Some(slot) = self.slots.get_mut(id as usize) {
                if slot.take().is_some() {
                    self.live -= 1;
                }
            }
        }
        Ok(StoreChange::Remove(ids.to_vec()))
    }

    pub fn clear(&mut self) -> StoreChange {
        self.slots.clear();
        self.live = 0;
        StoreChange::Clear
    }

    pub fn replace_all(&mut self, records: impl IntoIterator<Item = Record>) -> StoreChange {
        *self = RecordStore::from_records(records);
        StoreChange::Refresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RecordStore {
        RecordStore::from_records(vec![
            Record::new().with("person", "John").with("value", 10.0),
            Record::new().with("person", "Mary").with("value", 7.0),
        ])
    }

    #[test]
    fn test_ids_stay_stable_after_remove() {
        let mut store = store();
        let change = store.remove(&[0]).unwrap();
        assert_eq!(change, StoreChange::Remove(vec![0]));
        assert_eq!(store.len(), 1);
        assert!(store.get(0).is_none());
        assert_eq!(store.get(1).unwrap().get("person"), &Value::text("Mary"));

        let change = store.add(vec![Record::new().with("person", "Ann")]);
        assert_eq!(change, StoreChange::Add(vec![2]));
        assert_eq!(store.ids(), vec![1, 2]);
    }

    #[test]
    fn test_update_reports_modified_fields() {
        let mut store = store();
        let change = store.update(0, "value", 11.0).unwrap();
        assert_eq!(
            change,
            StoreChange::Update { ids: vec![0], modified_fields: vec!["value".to_string()] }
        );

        let unchanged = store.update(0, "value", 11.0).unwrap();
        assert_eq!(unchanged, StoreChange::Update { ids: vec![0], modified_fields: vec![] });

        let change = store
            .update_record(1, Record::new().with("person", "Mary").with("value", 8.0))
            .unwrap();
        assert_eq!(
            change,
            StoreChange::Update { ids: vec![1], modified_fields: vec!["value".to_string()] }
        );
    }

    #[test]
    fn test_missing_record_errors() {
        let mut store = store();
        assert!(matches!(store.update(9, "value", 1.0), Err(PivotError::RecordNotFound(9))));
        assert!(store.remove(&[1, 9]).is_err());
        // nothing removed when any id is unknown
        assert_eq!(store.len(), 2);
    }
}
