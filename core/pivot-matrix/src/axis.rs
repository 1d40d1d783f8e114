//! FILENAME: core/pivot-matrix/src/axis.rs
//! Axis - one hierarchy of group items (rows or columns).
//!
//! Records are classified into a path of `AxisTuple`s, one per dimension.
//! Each distinct path prefix becomes an `AxisItem` in a flat keyed arena.
//! `build_tree` links the items into a tree, sorts every sibling group with
//! its dimension's comparator and, for locally calculated matrices,
//! `filter_tree` prunes groups rejected by value filters.
//!
//! Keys are opaque: each distinct raw value gets an id from the matrix-wide
//! `KeyMap`, and an item's key is its ancestors' ids joined by the separator.
//! Raw values never appear in keys, so they can contain any character.

use std::cmp::Ordering;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use crate::aggregator::parent_key;
use crate::dimension::Dimension;
use crate::error::{PivotError, Result};
use crate::result::ResultCollection;
use crate::store::RecordId;
use crate::value::{Record, Value};
use crate::{log_debug, log_info};

/// Index of an item inside its axis arena.
pub type ItemId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    Left,
    Top,
}

// ============================================================================
// KEY MAP
// ============================================================================

/// Matrix-wide map from raw group values to opaque key fragments.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    ids: FxHashMap<Value, String>,
}

impl KeyMap {
    pub fn new() -> Self {
        KeyMap::default()
    }

    /// Fragment for a value, minted on first sight.
    pub fn key_for(&mut self, value: &Value) -> String {
        if let Some(key) = self.ids.get(value) {
            return key.clone();
        }
        let key = format!("k{}", self.ids.len() + 1);
        self.ids.insert(value.clone(), key.clone());
        key
    }

    pub fn get(&self, value: &Value) -> Option<&str> {
        self.ids.get(value).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

// ============================================================================
// ITEMS
// ============================================================================

/// One level of a classified record.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTuple {
    pub key: String,
    pub value: Value,
    pub sort_value: Value,
    pub dimension_id: String,
}

/// A record's position on one axis, from the first dimension down.
pub type AxisPath = SmallVec<[AxisTuple; 4]>;

/// Input to `Axis::add_item`. Also the item shape of a remote response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisItemConfig {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dimension_id: String,
}

impl From<&AxisTuple> for AxisItemConfig {
    fn from(tuple: &AxisTuple) -> Self {
        AxisItemConfig {
            key: tuple.key.clone(),
            value: tuple.value.clone(),
            sort_value: Some(tuple.sort_value.clone()),
            name: None,
            dimension_id: tuple.dimension_id.clone(),
        }
    }
}

/// A node of the group tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisItem {
    pub key: String,
    pub value: Value,
    pub sort_value: Value,
    /// Display label.
    pub name: String,
    pub dimension_id: String,
    /// Depth in the tree (0 = root level).
    pub level: usize,
    pub expanded: bool,
    /// None for leaves.
    pub children: Option<Vec<ItemId>>,
    pub parent: Option<ItemId>,
    /// Dimension id -> name for this item and all its ancestors.
    pub data: FxHashMap<String, String>,
}

impl AxisItem {
    pub fn is_leaf(&self) -> bool {
        self.children.as_ref().map_or(true, |c| c.is_empty())
    }
}

/// Attribute used by `find_tree_element`.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemMatch {
    Key(String),
    Name(String),
    Value(Value),
    DimensionId(String),
}

impl ItemMatch {
    fn matches(&self, item: &AxisItem) -> bool {
        match self {
            ItemMatch::Key(key) => item.key == *key,
            ItemMatch::Name(name) => item.name == *name,
            ItemMatch::Value(value) => item.value == *value,
            ItemMatch::DimensionId(id) => item.dimension_id == *id,
        }
    }
}

/// Result of `find_tree_element`. `level` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeElement {
    pub level: usize,
    pub id: ItemId,
}

// ============================================================================
// AXIS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Axis {
    kind: AxisKind,
    dimensions: Vec<Dimension>,
    items: Vec<Option<AxisItem>>,
    by_key: FxHashMap<String, ItemId>,
    tree: Vec<ItemId>,
    levels: usize,
    keys_separator: String,
    grand_total_key: String,
    start_collapsed: bool,
}

impl Axis {
    pub fn new(
        kind: AxisKind,
        dimensions: Vec<Dimension>,
        keys_separator: &str,
        grand_total_key: &str,
        start_collapsed: bool,
    ) -> Self {
        Axis {
            kind,
            dimensions,
            items: Vec::new(),
            by_key: FxHashMap::default(),
            tree: Vec::new(),
            levels: 0,
            keys_separator: keys_separator.to_string(),
            grand_total_key: grand_total_key.to_string(),
            start_collapsed,
        }
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id() == id)
    }

    pub fn dimension_mut(&mut self, id: &str) -> Option<&mut Dimension> {
        self.dimensions.iter_mut().find(|d| d.id() == id)
    }

    fn dimension_position(&self, id: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.id() == id)
    }

    pub fn has_value_filter(&self) -> bool {
        self.dimensions.iter().any(|d| d.has_value_filter())
    }

    /// Number of tree levels after `build_tree`.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Root items in display order.
    pub fn tree(&self) -> &[ItemId] {
        &self.tree
    }

    pub fn item(&self, id: ItemId) -> Option<&AxisItem> {
        self.items.get(id).and_then(|slot| slot.as_ref())
    }

    fn item_mut(&mut self, id: ItemId) -> Option<&mut AxisItem> {
        self.items.get_mut(id).and_then(|slot| slot.as_mut())
    }

    pub fn item_by_key(&self, key: &str) -> Option<&AxisItem> {
        self.by_key.get(key).and_then(|&id| self.item(id))
    }

    pub fn id_of(&self, key: &str) -> Option<ItemId> {
        self.by_key.get(key).copied()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Live items in insertion order.
    pub fn items(&self) -> impl Iterator<Item = (ItemId, &AxisItem)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|item| (id, item)))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn children_of(&self, id: ItemId) -> &[ItemId] {
        self.item(id)
            .and_then(|item| item.children.as_deref())
            .unwrap_or(&[])
    }

    /// Drops every item. Observed dimension values are forgotten too.
    pub fn clear(&mut self) {
        self.items.clear();
        self.by_key.clear();
        self.tree.clear();
        self.levels = 0;
        for dimension in &mut self.dimensions {
            dimension.clear_values();
        }
    }

    // ========================================================================
    // CLASSIFICATION
    // ========================================================================

    /// Classifies a record into one tuple per dimension. Returns None when a
    /// label filter rejects any level.
    pub fn process_record(&self, record: &Record, keys: &mut KeyMap) -> Option<AxisPath> {
        let mut path = AxisPath::new();
        let mut key = String::new();

        for dimension in &self.dimensions {
            let value = dimension.group_value(record);
            if let Some(filter) = dimension.filter() {
                if filter.is_label() && !filter.is_match(&value) {
                    return None;
                }
            }

            let fragment = keys.key_for(&value);
            if key.is_empty() {
                key = fragment;
            } else {
                key.push_str(&self.keys_separator);
                key.push_str(&fragment);
            }

            path.push(AxisTuple {
                key: key.clone(),
                sort_value: dimension.sort_value(record),
                value,
                dimension_id: dimension.id().to_string(),
            });
        }

        Some(path)
    }

    /// Registers an item. Adding a key twice returns the existing item.
    pub fn add_item(&mut self, config: AxisItemConfig) -> Result<ItemId> {
        if let Some(&id) = self.by_key.get(&config.key) {
            return Ok(id);
        }

        let level = self
            .dimension_position(&config.dimension_id)
            .ok_or_else(|| PivotError::DimensionNotFound(config.dimension_id.clone()))?;
        let dimension = &mut self.dimensions[level];

        let name = config.name.unwrap_or_else(|| dimension.label(&config.value));
        dimension.add_value(&config.value, &name);

        let id = self.items.len();
        self.items.push(Some(AxisItem {
            sort_value: config.sort_value.unwrap_or_else(|| config.value.clone()),
            key: config.key.clone(),
            value: config.value,
            name,
            dimension_id: config.dimension_id,
            level,
            expanded: !self.start_collapsed,
            children: None,
            parent: None,
            data: FxHashMap::default(),
        }));
        self.by_key.insert(config.key, id);
        Ok(id)
    }

    /// Registers every level of a classified path.
    pub fn add_path(&mut self, path: &[AxisTuple]) -> Result<()> {
        for tuple in path {
            self.add_item(AxisItemConfig::from(tuple))?;
        }
        Ok(())
    }

    // ========================================================================
    // TREE
    // ========================================================================

    /// Links the flat items into a tree and sorts it.
    pub fn build_tree(&mut self) {
        self.tree.clear();
        self.levels = 0;

        let mut order: Vec<(usize, ItemId)> = self
            .items()
            .map(|(id, item)| (item.key.matches(self.keys_separator.as_str()).count(), id))
            .collect();
        order.sort_unstable();

        for (_, id) in order {
            let Some(item) = self.item_mut(id) else { continue };
            item.children = None;
            item.parent = None;
            let key = item.key.clone();

            let parent = if key.contains(self.keys_separator.as_str()) {
                let pk = parent_key(&key, &self.keys_separator, &self.grand_total_key);
                self.by_key.get(&pk).copied()
            } else {
                None
            };

            let data = match parent.and_then(|p| self.item(p)) {
                Some(p) => p.data.clone(),
                None => FxHashMap::default(),
            };

            let Some(item) = self.item_mut(id) else { continue };
            let mut data = data;
            data.insert(item.dimension_id.clone(), item.name.clone());
            item.data = data;
            item.parent = parent;
            let depth = item.level + 1;

            match parent {
                Some(p) => {
                    if let Some(parent_item) = self.item_mut(p) {
                        parent_item.children.get_or_insert_with(Vec::new).push(id);
                    }
                }
                None => self.tree.push(id),
            }
            self.levels = self.levels.max(depth);
        }

        self.sort_tree();
    }

    /// Sorts every sibling group with its own dimension's comparator.
    pub fn sort_tree(&mut self) {
        self.reorder_groups(|axis, ids| {
            let Some(dimension) = ids
                .first()
                .and_then(|&id| axis.item(id))
                .and_then(|item| axis.dimension(&item.dimension_id))
            else {
                return;
            };
            if !dimension.is_sortable() {
                return;
            }
            ids.sort_by(|&a, &b| match (axis.item(a), axis.item(b)) {
                (Some(x), Some(y)) => dimension.compare(&x.sort_value, &y.sort_value),
                _ => Ordering::Equal,
            });
        });
    }

    /// Reorders every sibling group with `cmp`.
    pub fn sort_siblings_by(&mut self, mut cmp: impl FnMut(&AxisItem, &AxisItem) -> Ordering) {
        self.reorder_groups(|axis, ids| {
            ids.sort_by(|&a, &b| match (axis.item(a), axis.item(b)) {
                (Some(x), Some(y)) => cmp(x, y),
                _ => Ordering::Equal,
            });
        });
    }

    /// Hands each sibling group (roots first) to `order`, then writes the
    /// reordered groups back.
    fn reorder_groups(&mut self, mut order: impl FnMut(&Axis, &mut Vec<ItemId>)) {
        let mut groups: Vec<(Option<ItemId>, Vec<ItemId>)> = vec![(None, self.tree.clone())];
        groups.extend(
            self.items()
                .filter_map(|(id, item)| item.children.clone().map(|c| (Some(id), c))),
        );

        for (_, ids) in &mut groups {
            order(self, ids);
        }

        for (parent, ids) in groups {
            match parent {
                None => self.tree = ids,
                Some(p) => {
                    if let Some(item) = self.item_mut(p) {
                        item.children = Some(ids);
                    }
                }
            }
        }
    }

    /// Depth-first search for the first item matching `m`.
    pub fn find_tree_element(&self, m: &ItemMatch) -> Option<TreeElement> {
        let mut stack: Vec<ItemId> = self.tree.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(item) = self.item(id) else { continue };
            if m.matches(item) {
                return Some(TreeElement { level: item.level + 1, id });
            }
            if let Some(children) = &item.children {
                stack.extend(children.iter().rev().copied());
            }
        }
        None
    }

    /// Key of the item reached by following raw group values from the root.
    /// Blank values resolve through each dimension's blank text.
    pub fn key_for_path(&self, values: &[Value]) -> Option<String> {
        let mut siblings: &[ItemId] = &self.tree;
        let mut key = None;

        for (level, value) in values.iter().enumerate() {
            let dimension = self.dimensions.get(level)?;
            let wanted = if value.is_empty() {
                dimension.group_value(&Record::new())
            } else {
                value.clone()
            };
            let id = siblings
                .iter()
                .copied()
                .find(|&id| self.item(id).is_some_and(|item| item.value == wanted))?;
            key = self.item(id).map(|item| item.key.clone());
            siblings = self.children_of(id);
        }

        key
    }

    // ========================================================================
    // EXPAND / COLLAPSE
    // ========================================================================

    pub fn expand(&mut self, key: &str) -> Result<()> {
        self.set_expanded(key, true)
    }

    pub fn collapse(&mut self, key: &str) -> Result<()> {
        self.set_expanded(key, false)
    }

    fn set_expanded(&mut self, key: &str, expanded: bool) -> Result<()> {
        let id = self
            .id_of(key)
            .ok_or_else(|| PivotError::ItemNotFound(key.to_string()))?;
        if let Some(item) = self.item_mut(id) {
            item.expanded = expanded;
        }
        Ok(())
    }

    pub fn expand_all(&mut self) {
        for item in self.items.iter_mut().flatten() {
            item.expanded = true;
        }
    }

    pub fn collapse_all(&mut self) {
        for item in self.items.iter_mut().flatten() {
            item.expanded = false;
        }
    }

    // ========================================================================
    // VALUE FILTERS
    // ========================================================================

    /// Grand-total cell for a group on this axis.
    fn total_cell<'a>(&'a self, key: &'a str) -> (&'a str, &'a str) {
        match self.kind {
            AxisKind::Left => (key, self.grand_total_key.as_str()),
            AxisKind::Top => (self.grand_total_key.as_str(), key),
        }
    }

    fn total_value(&self, results: &ResultCollection, key: &str, aggregate_id: &str) -> Option<f64> {
        let (left, top) = self.total_cell(key);
        results
            .value(left, top, aggregate_id)
            .map(|v| v.as_f64().unwrap_or(0.0))
    }

    /// Prunes groups rejected by value filters, level by level from the
    /// root. Records of removed groups are detached from every ancestor and
    /// grand-total result. Returns true when anything was removed.
    pub fn filter_tree(&mut self, results: &mut ResultCollection) -> bool {
        let mut pruned = false;

        for level in 0..self.dimensions.len() {
            let Some(filter) = self.dimensions[level].filter().filter(|f| f.is_value()).cloned()
            else {
                continue;
            };
            let Some(aggregate_id) = filter.dimension_id().map(str::to_string) else {
                continue;
            };

            // sibling groups at this level, keyed by parent
            let mut groups: Vec<(Option<ItemId>, Vec<ItemId>)> = Vec::new();
            if level == 0 {
                groups.push((None, self.tree.clone()));
            } else {
                for (id, item) in self.items() {
                    if item.level + 1 == level {
                        groups.push((Some(id), item.children.clone().unwrap_or_default()));
                    }
                }
            }

            for (parent, ids) in groups {
                let mut removed: Vec<ItemId> = Vec::new();

                if filter.is_top10() {
                    let candidates: Vec<(ItemId, f64)> = ids
                        .iter()
                        .filter_map(|&id| self.item(id).map(|item| (id, item)))
                        .map(|(id, item)| {
                            (id, self.total_value(results, &item.key, &aggregate_id).unwrap_or(0.0))
                        })
                        .collect();
                    let parent_key = parent
                        .and_then(|p| self.item(p))
                        .map(|p| p.key.clone())
                        .unwrap_or_else(|| self.grand_total_key.clone());
                    let parent_total = self
                        .total_value(results, &parent_key, &aggregate_id)
                        .unwrap_or(0.0);

                    let kept = filter.select_top(&candidates, parent_total);
                    let kept_set: FxHashSet<ItemId> = kept.iter().copied().collect();
                    removed.extend(ids.iter().copied().filter(|id| !kept_set.contains(id)));

                    if filter.top_sort() {
                        match parent {
                            None => self.tree = kept,
                            Some(p) => {
                                if let Some(item) = self.item_mut(p) {
                                    item.children = Some(kept);
                                }
                            }
                        }
                    }
                } else {
                    for &id in &ids {
                        let Some(item) = self.item(id) else { continue };
                        let (left, top) = self.total_cell(&item.key);
                        // groups without a result are kept
                        if let Some(value) = results.value(left, top, &aggregate_id) {
                            if !filter.is_match(value) {
                                removed.push(id);
                            }
                        }
                    }
                }

                for id in removed {
                    self.remove_item(id, results);
                    pruned = true;
                }
            }
        }

        if pruned {
            results.remove_empty();
            self.refresh_levels();
            log_info!(
                "AXIS",
                "{:?} value filters pruned tree to {} items",
                self.kind,
                self.len()
            );
        }
        pruned
    }

    /// Drops groups left without a grand-total result after the other axis
    /// was pruned. Returns the number of groups removed.
    pub fn prune_empty_groups(&mut self, results: &mut ResultCollection) -> usize {
        let empty: Vec<ItemId> = self
            .items()
            .filter(|(_, item)| {
                let (left, top) = self.total_cell(&item.key);
                results.get(left, top).is_none()
            })
            .map(|(id, _)| id)
            .collect();

        let before = self.len();
        for id in empty {
            self.remove_item(id, results);
        }
        let removed = before - self.len();
        if removed > 0 {
            self.refresh_levels();
            log_debug!("AXIS", "{:?} dropped {} empty groups", self.kind, removed);
        }
        removed
    }

    fn refresh_levels(&mut self) {
        self.levels = self.items().map(|(_, item)| item.level + 1).max().unwrap_or(0);
    }

    /// Removes an item and its subtree, detaching its records from every
    /// ancestor result. A parent left without children is removed as well.
    fn remove_item(&mut self, id: ItemId, results: &mut ResultCollection) {
        let Some(item) = self.item(id) else { return };
        let key = item.key.clone();
        let parent = item.parent;

        let (left, top) = self.total_cell(&key);
        let records: FxHashSet<RecordId> = results
            .get(left, top)
            .map(|r| r.records.iter().copied().collect())
            .unwrap_or_default();

        // the group's own cells and everything below it
        match self.kind {
            AxisKind::Left => results.remove_rows_under(&key, &self.keys_separator),
            AxisKind::Top => results.remove_columns_under(&key, &self.keys_separator),
        };

        // every ancestor up to and including the grand total
        let mut ancestor = key.clone();
        loop {
            ancestor = parent_key(&ancestor, &self.keys_separator, &self.grand_total_key);
            match self.kind {
                AxisKind::Left => results.remove_records_in_row(&ancestor, &records),
                AxisKind::Top => results.remove_records_in_column(&ancestor, &records),
            }
            if ancestor == self.grand_total_key {
                break;
            }
        }

        self.drop_subtree(id);
        log_debug!("AXIS", "removed group {} ({} records)", key, records.len());

        match parent {
            Some(p) => {
                let now_empty = match self.item_mut(p) {
                    Some(parent_item) => {
                        if let Some(children) = parent_item.children.as_mut() {
                            children.retain(|&c| c != id);
                        }
                        parent_item.children.as_ref().is_some_and(|c| c.is_empty())
                    }
                    None => false,
                };
                if now_empty {
                    self.remove_item(p, results);
                }
            }
            None => self.tree.retain(|&r| r != id),
        }
    }

    fn drop_subtree(&mut self, id: ItemId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(item) = self.items.get_mut(current).and_then(Option::take) {
                self.by_key.remove(&item.key);
                if let Some(children) = item.children {
                    stack.extend(children);
                }
            }
        }
    }
}
