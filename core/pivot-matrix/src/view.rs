//! FILENAME: core/pivot-matrix/src/view.rs
//! Matrix View - the derived projection consumers display.
//!
//! Regenerated as a whole snapshot whenever dimensions, either axis tree or
//! the results change; it is never patched in place. It contains:
//! - `model`: the flat field list (internal flags, row labels, one `cN`
//!   field per aggregate column)
//! - `columns`: the nested header tree built from the top axis
//! - `rows`: the left axis flattened with expand state and subtotals applied
//! - `totals`: grand-total pseudo-rows

use rustc_hash::FxHashMap;
use serde::Serialize;
use crate::axis::{Axis, ItemId};
use crate::definition::{MatrixConfig, TotalsPosition, ViewLayout};
use crate::dimension::Dimension;
use crate::result::ResultCollection;
use crate::value::Value;

/// Field holding every row label in the compact layout.
pub const COMPACT_VIEW_FIELD: &str = "_compactview_";

pub const INTERNAL_FIELDS: [&str; 5] = [
    "id",
    "isRowGroupHeader",
    "isRowGroupTotal",
    "isRowGrandTotal",
    "leftAxisKey",
];

// ============================================================================
// MODEL AND COLUMNS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum FieldKind {
    Internal,
    /// Row label column for one left dimension (or the compact column).
    LeftDimension {
        #[serde(rename = "dimensionId")]
        dimension_id: Option<String>,
    },
    /// One aggregate at one top-axis key.
    Aggregate {
        #[serde(rename = "topKey")]
        top_key: String,
        #[serde(rename = "aggregateId")]
        aggregate_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelField {
    pub name: String,
    pub kind: FieldKind,
}

/// A header cell. Leaves carry a `data_index` naming their model field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnNode {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_axis_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_id: Option<String>,
    pub sub_total: bool,
    pub grand_total: bool,
    pub expandable: bool,
    pub collapsed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ColumnNode>,
}

impl ColumnNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ColumnNode>) {
        if self.is_leaf() {
            out.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }
}

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RowKind {
    GroupHeader,
    Data,
    GroupTotal,
    GrandTotal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRow {
    pub kind: RowKind,
    pub left_key: String,
    /// Depth in the left tree (0 = root level).
    pub level: usize,
    pub text: String,
    pub expanded: bool,
    /// Label field name -> label.
    pub labels: FxHashMap<String, String>,
    /// Aggregate field name (`cN`) -> value. Missing cells are absent.
    pub values: FxHashMap<String, Value>,
}

/// A grand-total pseudo-row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalRow {
    pub title: String,
    pub left_key: String,
    pub values: FxHashMap<String, Value>,
}

// ============================================================================
// VIEW
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixView {
    pub model: Vec<ModelField>,
    pub columns: Vec<ColumnNode>,
    pub rows: Vec<ViewRow>,
    pub totals: Vec<TotalRow>,
}

impl MatrixView {
    pub fn generate(
        config: &MatrixConfig,
        left: &Axis,
        top: &Axis,
        aggregates: &[Dimension],
        results: &ResultCollection,
    ) -> Self {
        let mut builder = ViewBuilder {
            config,
            left,
            top,
            aggregates,
            results,
            model: Vec::new(),
            next_field: 1,
        };

        for name in INTERNAL_FIELDS {
            builder.model.push(ModelField { name: name.to_string(), kind: FieldKind::Internal });
        }
        let mut columns = builder.left_columns();
        columns.extend(builder.top_columns());

        let rows = builder.rows();
        let totals = vec![TotalRow {
            title: config.text_grand_total_tpl.clone(),
            left_key: config.grand_total_key.clone(),
            values: builder.row_values(&config.grand_total_key),
        }];

        MatrixView { model: builder.model, columns, rows, totals }
    }

    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.model.iter().find(|f| f.name == name)
    }

    /// Name of the model field holding `aggregate_id` at `top_key`.
    pub fn field_for(&self, top_key: &str, aggregate_id: &str) -> Option<&str> {
        self.model.iter().find_map(|f| match &f.kind {
            FieldKind::Aggregate { top_key: t, aggregate_id: a }
                if t == top_key && a == aggregate_id =>
            {
                Some(f.name.as_str())
            }
            _ => None,
        })
    }

    /// Header leaves in display order.
    pub fn leaf_columns(&self) -> Vec<&ColumnNode> {
        let mut out = Vec::new();
        for column in &self.columns {
            column.collect_leaves(&mut out);
        }
        out
    }

    pub fn row_by_key(&self, left_key: &str, kind: RowKind) -> Option<&ViewRow> {
        self.rows.iter().find(|r| r.left_key == left_key && r.kind == kind)
    }
}

struct ViewBuilder<'a> {
    config: &'a MatrixConfig,
    left: &'a Axis,
    top: &'a Axis,
    aggregates: &'a [Dimension],
    results: &'a ResultCollection,
    model: Vec<ModelField>,
    next_field: usize,
}

impl ViewBuilder<'_> {
    fn aggregate_field(&mut self, top_key: &str, aggregate_id: &str) -> String {
        let name = format!("c{}", self.next_field);
        self.next_field += 1;
        self.model.push(ModelField {
            name: name.clone(),
            kind: FieldKind::Aggregate {
                top_key: top_key.to_string(),
                aggregate_id: aggregate_id.to_string(),
            },
        });
        name
    }

    // ------------------------------------------------------------------------
    // Columns
    // ------------------------------------------------------------------------

    fn left_columns(&mut self) -> Vec<ColumnNode> {
        if self.config.view_layout_type == ViewLayout::Compact {
            let text = self
                .left
                .dimensions()
                .iter()
                .map(|d| d.header())
                .collect::<Vec<_>>()
                .join(" / ");
            self.model.push(ModelField {
                name: COMPACT_VIEW_FIELD.to_string(),
                kind: FieldKind::LeftDimension { dimension_id: None },
            });
            return vec![ColumnNode {
                text,
                data_index: Some(COMPACT_VIEW_FIELD.to_string()),
                ..ColumnNode::default()
            }];
        }

        let mut columns = Vec::new();
        for dimension in self.left.dimensions() {
            self.model.push(ModelField {
                name: dimension.id().to_string(),
                kind: FieldKind::LeftDimension { dimension_id: Some(dimension.id().to_string()) },
            });
            columns.push(ColumnNode {
                text: dimension.header().to_string(),
                data_index: Some(dimension.id().to_string()),
                dimension_id: Some(dimension.id().to_string()),
                ..ColumnNode::default()
            });
        }
        columns
    }

    fn top_columns(&mut self) -> Vec<ColumnNode> {
        let gt = self.config.grand_total_key.clone();
        let mut columns = Vec::new();

        if self.top.tree().is_empty() {
            // no column groups: one column per aggregate
            for (id, header) in self.aggregate_headers() {
                let name = self.aggregate_field(&gt, &id);
                columns.push(ColumnNode {
                    text: header,
                    data_index: Some(name),
                    top_axis_key: Some(gt.clone()),
                    aggregate_id: Some(id),
                    ..ColumnNode::default()
                });
            }
            return columns;
        }

        let position = self.config.col_grand_totals_position;
        if position == TotalsPosition::First {
            columns.extend(self.grand_total_columns());
        }
        for &id in self.top.tree() {
            columns.extend(self.item_columns(id));
        }
        if position == TotalsPosition::Last {
            columns.extend(self.grand_total_columns());
        }
        columns
    }

    fn item_columns(&mut self, id: ItemId) -> Vec<ColumnNode> {
        let Some(item) = self.top.item(id) else { return Vec::new() };
        let (key, name, expanded) = (item.key.clone(), item.name.clone(), item.expanded);
        let dimension_id = Some(item.dimension_id.clone());

        if item.is_leaf() {
            return vec![self.aggregate_columns(&key, &name, dimension_id, false, false)];
        }
        if !expanded {
            let mut node = self.aggregate_columns(&key, &name, dimension_id, false, false);
            node.expandable = true;
            node.collapsed = true;
            return vec![node];
        }

        let children_ids = self.top.children_of(id).to_vec();
        let position = self.config.col_sub_totals_position;
        let total_text = self.config.total_text(&name);

        let mut children = Vec::new();
        if position == TotalsPosition::First {
            children.push(self.aggregate_columns(&key, &total_text, dimension_id.clone(), true, false));
        }
        for child in children_ids {
            children.extend(self.item_columns(child));
        }
        if position == TotalsPosition::Last {
            children.push(self.aggregate_columns(&key, &total_text, dimension_id.clone(), true, false));
        }

        vec![ColumnNode {
            text: name,
            top_axis_key: Some(key),
            dimension_id,
            expandable: true,
            collapsed: false,
            children,
            ..ColumnNode::default()
        }]
    }

    /// One leaf per aggregate at `top_key`, grouped under `text` when there
    /// is more than one aggregate.
    fn aggregate_columns(
        &mut self,
        top_key: &str,
        text: &str,
        dimension_id: Option<String>,
        sub_total: bool,
        grand_total: bool,
    ) -> ColumnNode {
        let single = self.aggregates.len() == 1;
        let mut leaves = Vec::new();
        for (id, header) in self.aggregate_headers() {
            let name = self.aggregate_field(top_key, &id);
            leaves.push(ColumnNode {
                text: if single { text.to_string() } else { header },
                data_index: Some(name),
                top_axis_key: Some(top_key.to_string()),
                aggregate_id: Some(id),
                dimension_id: dimension_id.clone(),
                sub_total,
                grand_total,
                ..ColumnNode::default()
            });
        }

        if single {
            if let Some(leaf) = leaves.pop() {
                return leaf;
            }
        }
        ColumnNode {
            text: text.to_string(),
            top_axis_key: Some(top_key.to_string()),
            dimension_id,
            sub_total,
            grand_total,
            children: leaves,
            ..ColumnNode::default()
        }
    }

    fn grand_total_columns(&mut self) -> Vec<ColumnNode> {
        let gt = self.config.grand_total_key.clone();
        let text = self.config.text_grand_total_tpl.clone();
        vec![self.aggregate_columns(&gt, &text, None, false, true)]
    }

    // ------------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------------

    /// (id, header) of every aggregate, in configuration order.
    fn aggregate_headers(&self) -> Vec<(String, String)> {
        self.aggregates
            .iter()
            .map(|a| (a.id().to_string(), a.header().to_string()))
            .collect()
    }

    fn aggregate_fields(&self) -> Vec<(&str, &str, &str)> {
        self.model
            .iter()
            .filter_map(|f| match &f.kind {
                FieldKind::Aggregate { top_key, aggregate_id } => {
                    Some((f.name.as_str(), top_key.as_str(), aggregate_id.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    fn row_values(&self, left_key: &str) -> FxHashMap<String, Value> {
        let mut values = FxHashMap::default();
        for (name, top_key, aggregate_id) in self.aggregate_fields() {
            if let Some(value) = self.results.value(left_key, top_key, aggregate_id) {
                values.insert(name.to_string(), value.clone());
            }
        }
        values
    }

    fn rows(&self) -> Vec<ViewRow> {
        let gt = self.config.grand_total_key.as_str();
        let mut rows = Vec::new();

        let grand_total = || ViewRow {
            kind: RowKind::GrandTotal,
            left_key: gt.to_string(),
            level: 0,
            text: self.config.text_grand_total_tpl.clone(),
            expanded: true,
            labels: self.grand_total_labels(),
            values: self.row_values(gt),
        };

        let position = self.config.row_grand_totals_position;
        if position == TotalsPosition::First {
            rows.push(grand_total());
        }
        if self.left.tree().is_empty() {
            // no row groups: the grand total is the only data row
            if position == TotalsPosition::None {
                rows.push(grand_total());
            }
        } else {
            for &id in self.left.tree() {
                self.flatten(id, &mut rows);
            }
        }
        if position == TotalsPosition::Last {
            rows.push(grand_total());
        }
        rows
    }

    fn grand_total_labels(&self) -> FxHashMap<String, String> {
        let mut labels = FxHashMap::default();
        let field = match self.config.view_layout_type {
            ViewLayout::Compact => Some(COMPACT_VIEW_FIELD.to_string()),
            _ => self.left.dimensions().first().map(|d| d.id().to_string()),
        };
        if let Some(field) = field {
            labels.insert(field, self.config.text_grand_total_tpl.clone());
        }
        labels
    }

    fn labels_for(&self, id: ItemId, text: &str) -> FxHashMap<String, String> {
        let mut labels = FxHashMap::default();
        let Some(item) = self.left.item(id) else { return labels };
        match self.config.view_layout_type {
            ViewLayout::Compact => {
                labels.insert(COMPACT_VIEW_FIELD.to_string(), text.to_string());
            }
            ViewLayout::Outline => {
                labels.insert(item.dimension_id.clone(), text.to_string());
            }
            ViewLayout::Tabular => {
                for (dimension_id, name) in &item.data {
                    labels.insert(dimension_id.clone(), name.clone());
                }
                labels.insert(item.dimension_id.clone(), text.to_string());
            }
        }
        labels
    }

    fn row(&self, kind: RowKind, id: ItemId, text: String, with_values: bool) -> Option<ViewRow> {
        let item = self.left.item(id)?;
        Some(ViewRow {
            kind,
            left_key: item.key.clone(),
            level: item.level,
            labels: self.labels_for(id, &text),
            text,
            expanded: item.expanded,
            values: if with_values { self.row_values(&item.key) } else { FxHashMap::default() },
        })
    }

    fn flatten(&self, id: ItemId, rows: &mut Vec<ViewRow>) {
        let Some(item) = self.left.item(id) else { return };
        let name = item.name.clone();

        if item.is_leaf() {
            rows.extend(self.row(RowKind::Data, id, name, true));
            return;
        }
        if !item.expanded {
            // a collapsed group shows its totals on the header row
            rows.extend(self.row(RowKind::GroupHeader, id, name, true));
            return;
        }

        let position = self.config.row_sub_totals_position;
        let tabular = self.config.view_layout_type == ViewLayout::Tabular;
        let total_text = self.config.total_text(&name);

        match (tabular, position) {
            (false, TotalsPosition::First) => {
                rows.extend(self.row(RowKind::GroupHeader, id, name, true));
            }
            (false, _) => {
                rows.extend(self.row(RowKind::GroupHeader, id, name, false));
            }
            (true, TotalsPosition::First) => {
                rows.extend(self.row(RowKind::GroupTotal, id, total_text.clone(), true));
            }
            (true, _) => {}
        }

        for &child in self.left.children_of(id) {
            self.flatten(child, rows);
        }

        if position == TotalsPosition::Last {
            rows.extend(self.row(RowKind::GroupTotal, id, total_text, true));
        }
    }
}
