//! FILENAME: core/pivot-matrix/src/lib.rs
//! Pivot Matrix - an in-memory aggregation engine for cross-tabulations.
//!
//! The engine turns a flat collection of records into two hierarchical group
//! trees (row axis and column axis) and a sparse table of aggregated results
//! keyed by (row-group, column-group) pairs. Groups can be filtered by label,
//! by aggregated value or by Top-N rules, and results are recomputed
//! incrementally when the source records change.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the matrix IS)
//! - `store`: Record arena and change notifications (the data we READ)
//! - `dimension`, `aggregator`, `filter`, `axis`, `result`: The core model
//! - `matrix`: Generic driver with local and remote strategies (HOW we calculate)
//! - `view`: Derived model/columns/totals projection (WHAT consumers display)

pub mod logging;
pub mod error;
pub mod value;
pub mod locale;
pub mod sort;
pub mod store;
pub mod definition;
pub mod aggregator;
pub mod filter;
pub mod dimension;
pub mod axis;
pub mod result;
pub mod view;
pub mod matrix;

pub use error::{PivotError, Result};
pub use value::{OrderedFloat, Record, Value};
pub use locale::LocaleSettings;
pub use sort::natural_cmp;
pub use store::{RecordId, RecordStore, StoreChange};
pub use definition::{
    DimensionConfig, MatrixConfig, SortDirection, TotalsPosition, ViewLayout,
};
pub use aggregator::{
    AggregateInput, AggregateScope, Aggregator, AggregatorKind, AggregatorRegistry,
};
pub use filter::{
    Filter, FilterConfig, FilterOperand, LabelFilterConfig, Operator, TopOrder, TopType,
    ValueFilterConfig,
};
pub use dimension::{Dimension, DimensionValue};
pub use axis::{
    Axis, AxisItem, AxisItemConfig, AxisKind, AxisPath, AxisTuple, ItemId, ItemMatch, KeyMap,
    TreeElement,
};
pub use result::{MatrixResult, ResultCollection};
pub use view::{ColumnNode, FieldKind, MatrixView, ModelField, RowKind, TotalRow, ViewRow};
pub use matrix::{
    AggregationTask, CycleState, CycleTicket, JobStatus, LocalMatrix, LocalStrategy, Matrix,
    MatrixCore, MatrixListener, MatrixStrategy, RemoteMatrix, RemoteRequest, RemoteResponse, RemoteResult,
    RemoteStrategy, ResponseOutcome, Transport, UpdateOutcome,
};
