//! FILENAME: core/pivot-matrix/src/result.rs
//! Result Collection - the sparse (row-group, column-group) table.
//!
//! A `MatrixResult` exists for a key pair only when at least one record maps
//! to it. Locally, results hold the ids of their contributing records and
//! compute `values` from them. Remotely, `values` are loaded as received and
//! `records` stays empty.
//!
//! Lookup is a nested map `left_key -> top_key -> slot` plus a column index,
//! so whole rows and whole columns can be walked without scanning every cell.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use crate::aggregator::{AggregateInput, AggregateScope, AggregatorRegistry};
use crate::dimension::Dimension;
use crate::error::Result;
use crate::store::{RecordId, RecordStore};
use crate::value::{Record, Value};

/// One cell of the matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixResult {
    pub left_key: String,
    pub top_key: String,
    /// Aggregate dimension id -> computed value.
    pub values: FxHashMap<String, Value>,
    pub records: Vec<RecordId>,
}

impl MatrixResult {
    pub fn new(left_key: &str, top_key: &str) -> Self {
        MatrixResult {
            left_key: left_key.to_string(),
            top_key: top_key.to_string(),
            values: FxHashMap::default(),
            records: Vec::new(),
        }
    }

    pub fn value(&self, aggregate_id: &str) -> Option<&Value> {
        self.values.get(aggregate_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultCollection {
    items: Vec<MatrixResult>,
    index: FxHashMap<String, FxHashMap<String, usize>>,
    by_top: FxHashMap<String, SmallVec<[usize; 8]>>,
}

/// True when `key` is `root` or one of its descendants.
fn is_under(key: &str, root: &str, separator: &str) -> bool {
    key == root
        || (key.len() > root.len()
            && key.starts_with(root)
            && key[root.len()..].starts_with(separator))
}

impl ResultCollection {
    pub fn new() -> Self {
        ResultCollection::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.by_top.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatrixResult> {
        self.items.iter()
    }

    fn slot(&self, left_key: &str, top_key: &str) -> Option<usize> {
        self.index.get(left_key).and_then(|row| row.get(top_key)).copied()
    }

    pub fn get(&self, left_key: &str, top_key: &str) -> Option<&MatrixResult> {
        self.slot(left_key, top_key).map(|i| &self.items[i])
    }

    pub fn get_mut(&mut self, left_key: &str, top_key: &str) -> Option<&mut MatrixResult> {
        let i = self.slot(left_key, top_key)?;
        Some(&mut self.items[i])
    }

    /// Value of one aggregate at one cell.
    pub fn value(&self, left_key: &str, top_key: &str, aggregate_id: &str) -> Option<&Value> {
        self.get(left_key, top_key).and_then(|r| r.value(aggregate_id))
    }

    pub fn get_or_create(&mut self, left_key: &str, top_key: &str) -> &mut MatrixResult {
        let slot = match self.slot(left_key, top_key) {
            Some(i) => i,
            None => {
                let i = self.items.len();
                self.items.push(MatrixResult::new(left_key, top_key));
                self.index
                    .entry(left_key.to_string())
                    .or_default()
                    .insert(top_key.to_string(), i);
                self.by_top.entry(top_key.to_string()).or_default().push(i);
                i
            }
        };
        &mut self.items[slot]
    }

    pub fn add_record(&mut self, left_key: &str, top_key: &str, id: RecordId) {
        self.get_or_create(left_key, top_key).records.push(id);
    }

    /// Replaces the values of a cell, creating it when needed.
    pub fn load_values(&mut self, left_key: &str, top_key: &str, values: FxHashMap<String, Value>) {
        self.get_or_create(left_key, top_key).values = values;
    }

    pub fn by_left_key(&self, left_key: &str) -> Vec<&MatrixResult> {
        self.index
            .get(left_key)
            .map(|row| row.values().map(|&i| &self.items[i]).collect())
            .unwrap_or_default()
    }

    pub fn by_top_key(&self, top_key: &str) -> Vec<&MatrixResult> {
        self.by_top
            .get(top_key)
            .map(|col| col.iter().map(|&i| &self.items[i]).collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // REMOVAL
    // ========================================================================

    pub fn remove_by_key(&mut self, left_key: &str, top_key: &str) -> Option<MatrixResult> {
        let slot = self.slot(left_key, top_key)?;
        let removed = self.items[slot].clone();
        self.retain_slots(|i, _| i != slot);
        Some(removed)
    }

    /// Removes every result whose row key is `left_key` or below it.
    pub fn remove_rows_under(&mut self, left_key: &str, separator: &str) -> usize {
        let before = self.items.len();
        self.retain(|r| !is_under(&r.left_key, left_key, separator));
        before - self.items.len()
    }

    /// Removes every result whose column key is `top_key` or below it.
    pub fn remove_columns_under(&mut self, top_key: &str, separator: &str) -> usize {
        let before = self.items.len();
        self.retain(|r| !is_under(&r.top_key, top_key, separator));
        before - self.items.len()
    }

    /// Detaches records from every cell of one row.
    pub fn remove_records_in_row(&mut self, left_key: &str, ids: &FxHashSet<RecordId>) {
        let slots: Vec<usize> = self
            .index
            .get(left_key)
            .map(|row| row.values().copied().collect())
            .unwrap_or_default();
        for i in slots {
            self.items[i].records.retain(|id| !ids.contains(id));
        }
    }

    /// Detaches records from every cell of one column.
    pub fn remove_records_in_column(&mut self, top_key: &str, ids: &FxHashSet<RecordId>) {
        let slots: Vec<usize> = self
            .by_top
            .get(top_key)
            .map(|col| col.to_vec())
            .unwrap_or_default();
        for i in slots {
            self.items[i].records.retain(|id| !ids.contains(id));
        }
    }

    /// Detaches one record from every cell it belongs to.
    pub fn detach_record(&mut self, id: RecordId) {
        for result in &mut self.items {
            result.records.retain(|&r| r != id);
        }
    }

    /// Keeps only results for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&MatrixResult) -> bool) {
        self.retain_slots(|_, r| keep(r));
    }

    /// Drops results that no longer have any record attached.
    pub fn remove_empty(&mut self) -> usize {
        let before = self.items.len();
        self.retain(|r| !r.records.is_empty());
        before - self.items.len()
    }

    fn retain_slots(&mut self, mut keep: impl FnMut(usize, &MatrixResult) -> bool) {
        let items = std::mem::take(&mut self.items);
        let kept: Vec<MatrixResult> = items
            .into_iter()
            .enumerate()
            .filter(|(i, r)| keep(*i, r))
            .map(|(_, r)| r)
            .collect();
        self.reindex(kept);
    }

    fn reindex(&mut self, items: Vec<MatrixResult>) {
        self.index.clear();
        self.by_top.clear();
        for (i, r) in items.iter().enumerate() {
            self.index
                .entry(r.left_key.clone())
                .or_default()
                .insert(r.top_key.clone(), i);
            self.by_top.entry(r.top_key.clone()).or_default().push(i);
        }
        self.items = items;
    }

    // ========================================================================
    // CALCULATION
    // ========================================================================

    /// Recomputes every aggregate value of every result from its records.
    /// All values are computed before any is written, so aggregators that
    /// look at other cells always see record lists, never half-updated values.
    pub fn calculate(
        &mut self,
        aggregates: &[Dimension],
        registry: &AggregatorRegistry,
        store: &RecordStore,
        keys_separator: &str,
        grand_total_key: &str,
    ) -> Result<()> {
        let scope = LocalScope {
            results: self,
            store,
            keys_separator,
            grand_total_key,
        };

        let mut computed = Vec::with_capacity(self.items.len());
        for result in &self.items {
            let records: Vec<&Record> =
                result.records.iter().filter_map(|&id| store.get(id)).collect();
            let mut values = FxHashMap::default();
            for dimension in aggregates {
                let input = AggregateInput {
                    records: &records,
                    measure: dimension.data_index(),
                    scope: &scope,
                    left_key: &result.left_key,
                    top_key: &result.top_key,
                };
                let value = registry.apply(dimension.aggregator(), &input)?;
                values.insert(dimension.id().to_string(), value);
            }
            computed.push(values);
        }

        for (result, values) in self.items.iter_mut().zip(computed) {
            result.values = values;
        }
        Ok(())
    }
}

/// Aggregation context over a local result collection.
struct LocalScope<'a> {
    results: &'a ResultCollection,
    store: &'a RecordStore,
    keys_separator: &'a str,
    grand_total_key: &'a str,
}

impl AggregateScope for LocalScope<'_> {
    fn keys_separator(&self) -> &str {
        self.keys_separator
    }

    fn grand_total_key(&self) -> &str {
        self.grand_total_key
    }

    fn records_at(&self, left_key: &str, top_key: &str) -> Vec<&Record> {
        self.results
            .get(left_key, top_key)
            .map(|r| r.records.iter().filter_map(|&id| self.store.get(id)).collect())
            .unwrap_or_default()
    }
}
