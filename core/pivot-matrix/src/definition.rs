//! FILENAME: core/pivot-matrix/src/definition.rs
//! Matrix Definition - The serializable configuration.
//!
//! This module contains the types needed to DESCRIBE a matrix:
//! which fields group the rows and columns, which fields are aggregated,
//! how keys are built and how the derived projection is laid out.
//! These structures are designed to be:
//! - Serializable (loaded from JSON, sent to a remote aggregation server)
//! - Free of closures (renderers and custom functions live on `Dimension`)
//! - Immutable snapshots of user intent

use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::filter::FilterConfig;
use crate::locale::LocaleSettings;

// ============================================================================
// SORTING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

// ============================================================================
// DIMENSION CONFIG
// ============================================================================

/// Describes one grouping or aggregated field.
/// Also the per-dimension shape of the remote request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionConfig {
    /// Unique id within the matrix. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name (defaults to `data_index`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Source field name. Required.
    #[serde(default)]
    pub data_index: String,

    /// Field used to order groups (defaults to `data_index`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<String>,

    #[serde(default = "default_true")]
    pub sortable: bool,

    #[serde(default)]
    pub direction: SortDirection,

    #[serde(default = "default_true")]
    pub case_sensitive_sort: bool,

    /// Label used for groups whose value is blank.
    #[serde(default = "default_blank_text")]
    pub blank_text: String,

    /// Aggregator name, only meaningful for aggregate dimensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
}

fn default_true() -> bool {
    true
}

fn default_blank_text() -> String {
    "(empty)".to_string()
}

impl DimensionConfig {
    pub fn new(data_index: impl Into<String>) -> Self {
        DimensionConfig {
            id: None,
            header: None,
            data_index: data_index.into(),
            sort_index: None,
            sortable: true,
            direction: SortDirection::Asc,
            case_sensitive_sort: true,
            blank_text: default_blank_text(),
            aggregator: None,
            filter: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_aggregator(mut self, aggregator: impl Into<String>) -> Self {
        self.aggregator = Some(aggregator.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_sort_index(mut self, sort_index: impl Into<String>) -> Self {
        self.sort_index = Some(sort_index.into());
        self
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

/// How row groups are laid out in the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewLayout {
    /// All row levels share one indented column.
    Compact,
    /// One column per row level, group headers on their own rows.
    #[default]
    Outline,
    /// One column per row level, labels repeated on every data row.
    Tabular,
}

/// Where subtotals or grand totals are placed relative to their group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalsPosition {
    First,
    #[default]
    Last,
    None,
}

// ============================================================================
// MATRIX CONFIG
// ============================================================================

/// Complete matrix configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatrixConfig {
    pub keys_separator: String,
    pub grand_total_key: String,

    /// Records classified per cooperative job.
    pub records_per_job: usize,
    /// Pause between jobs, in milliseconds. Zero means yield only.
    pub time_between_jobs: u64,

    pub left_axis: Vec<DimensionConfig>,
    pub top_axis: Vec<DimensionConfig>,
    pub aggregate: Vec<DimensionConfig>,

    pub view_layout_type: ViewLayout,
    pub row_sub_totals_position: TotalsPosition,
    pub col_sub_totals_position: TotalsPosition,
    pub row_grand_totals_position: TotalsPosition,
    pub col_grand_totals_position: TotalsPosition,

    pub start_row_groups_collapsed: bool,
    pub start_col_groups_collapsed: bool,

    /// `{name}` is replaced with the group label.
    pub text_total_tpl: String,
    pub text_grand_total_tpl: String,

    pub locale: LocaleSettings,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        MatrixConfig {
            keys_separator: "#_#".to_string(),
            grand_total_key: "grandtotal".to_string(),
            records_per_job: 1000,
            time_between_jobs: 2,
            left_axis: Vec::new(),
            top_axis: Vec::new(),
            aggregate: Vec::new(),
            view_layout_type: ViewLayout::Outline,
            row_sub_totals_position: TotalsPosition::Last,
            col_sub_totals_position: TotalsPosition::Last,
            row_grand_totals_position: TotalsPosition::Last,
            col_grand_totals_position: TotalsPosition::Last,
            start_row_groups_collapsed: true,
            start_col_groups_collapsed: true,
            text_total_tpl: "Total ({name})".to_string(),
            text_grand_total_tpl: "Grand total".to_string(),
            locale: LocaleSettings::default(),
        }
    }
}

impl MatrixConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn job_interval(&self) -> Duration {
        Duration::from_millis(self.time_between_jobs)
    }

    /// Renders the subtotal label for a group.
    pub fn total_text(&self, name: &str) -> String {
        self.text_total_tpl.replace("{name}", name)
    }
}
