//! FILENAME: core/pivot-matrix/src/matrix/mod.rs
//! Matrix - the orchestrator.
//!
//! `Matrix<S>` owns both axes, the aggregate dimensions, the result table and
//! the derived view. How records become results is delegated to a
//! `MatrixStrategy`:
//! - `LocalStrategy` classifies an in-memory record store in cooperative
//!   jobs and aggregates every cell itself.
//! - `RemoteStrategy` sends the configuration to a server and loads the
//!   axis items and cell values it answers with.
//!
//! Every aggregation cycle runs `Idle -> Collecting -> Aggregating ->
//! TreeBuilding -> Done`. Only one cycle is live at a time: starting a new
//! one cancels the previous cycle's token and bumps the generation, so
//! late jobs and late responses of the old cycle are ignored.

mod local;
mod remote;

pub use local::{AggregationTask, JobStatus, LocalStrategy, UpdateOutcome};
pub use remote::{
    RemoteRequest, RemoteResponse, RemoteResult, RemoteStrategy, ResponseOutcome, Transport,
};

use std::fmt;
use std::time::Instant;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::aggregator::{AggregateInput, AggregatorRegistry};
use crate::axis::{Axis, AxisKind, AxisTuple, KeyMap};
use crate::definition::{DimensionConfig, MatrixConfig, SortDirection};
use crate::dimension::Dimension;
use crate::error::{PivotError, Result};
use crate::filter::{Filter, FilterConfig};
use crate::logging::elapsed_ms;
use crate::result::{MatrixResult, ResultCollection};
use crate::store::RecordId;
use crate::value::{Record, Value};
use crate::view::MatrixView;
use crate::{log_debug, log_error, log_info};

pub type LocalMatrix = Matrix<LocalStrategy>;
pub type RemoteMatrix = Matrix<RemoteStrategy>;

// ============================================================================
// CYCLE STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleState {
    Idle,
    Collecting,
    Aggregating,
    TreeBuilding,
    Done,
    Failed,
}

/// Identifies one aggregation cycle. Work carrying an old ticket is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleTicket {
    generation: u64,
}

impl CycleTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Notifications emitted at the matrix boundary. All methods default to
/// doing nothing.
pub trait MatrixListener: Send {
    fn on_start(&mut self, _generation: u64) {}
    fn on_progress(&mut self, _processed: usize, _total: usize) {}
    fn on_done(&mut self, _generation: u64) {}
    fn on_error(&mut self, _error: &PivotError) {}
    fn on_expand(&mut self, _axis: AxisKind, _key: &str) {}
    fn on_collapse(&mut self, _axis: AxisKind, _key: &str) {}
}

// ============================================================================
// STRATEGY
// ============================================================================

/// The variant-specific steps of an aggregation cycle.
pub trait MatrixStrategy {
    /// Unit of input handed to `classify`.
    type Batch;

    /// Registers axis items and populates results from one batch.
    fn classify(&mut self, core: &mut MatrixCore, batch: Self::Batch) -> Result<()>;

    /// Computes result values.
    fn aggregate(&mut self, core: &mut MatrixCore) -> Result<()>;

    /// Builds both axis trees. Returns true when value filters removed
    /// records, which requires a second aggregation pass.
    fn build_tree(&mut self, core: &mut MatrixCore) -> Result<bool>;
}

// ============================================================================
// CORE STATE
// ============================================================================

/// State shared by every strategy.
pub struct MatrixCore {
    pub(crate) config: MatrixConfig,
    pub(crate) left: Axis,
    pub(crate) top: Axis,
    pub(crate) aggregates: Vec<Dimension>,
    pub(crate) results: ResultCollection,
    pub(crate) keys: KeyMap,
    pub(crate) registry: AggregatorRegistry,
    view: MatrixView,
    state: CycleState,
    generation: u64,
    token: CancellationToken,
    listeners: Vec<Box<dyn MatrixListener>>,
}

impl MatrixCore {
    fn new(config: MatrixConfig) -> Result<Self> {
        let locale = config.locale.clone();
        let build = |configs: &[DimensionConfig], aggregate: bool| -> Result<Vec<Dimension>> {
            configs
                .iter()
                .map(|c| Dimension::from_config(c, aggregate, &locale))
                .collect()
        };
        let left_dims = build(&config.left_axis, false)?;
        let top_dims = build(&config.top_axis, false)?;
        let aggregates = build(&config.aggregate, true)?;

        let mut seen = FxHashSet::default();
        for dimension in left_dims.iter().chain(&top_dims).chain(&aggregates) {
            if !seen.insert(dimension.id().to_string()) {
                return Err(PivotError::DuplicateDimension(dimension.id().to_string()));
            }
        }

        let aggregate_ids: Vec<String> = aggregates.iter().map(|d| d.id().to_string()).collect();
        for dimension in left_dims.iter().chain(&top_dims) {
            if let Some(filter) = dimension.filter() {
                filter.validate(dimension.id(), &aggregate_ids)?;
            }
        }

        let left = Axis::new(
            AxisKind::Left,
            left_dims,
            &config.keys_separator,
            &config.grand_total_key,
            config.start_row_groups_collapsed,
        );
        let top = Axis::new(
            AxisKind::Top,
            top_dims,
            &config.keys_separator,
            &config.grand_total_key,
            config.start_col_groups_collapsed,
        );

        Ok(MatrixCore {
            config,
            left,
            top,
            aggregates,
            results: ResultCollection::new(),
            keys: KeyMap::new(),
            registry: AggregatorRegistry::new(),
            view: MatrixView::default(),
            state: CycleState::Idle,
            generation: 0,
            token: CancellationToken::new(),
            listeners: Vec::new(),
        })
    }

    pub(crate) fn grand_total_key(&self) -> &str {
        &self.config.grand_total_key
    }

    pub(crate) fn axis(&self, kind: AxisKind) -> &Axis {
        match kind {
            AxisKind::Left => &self.left,
            AxisKind::Top => &self.top,
        }
    }

    pub(crate) fn axis_mut(&mut self, kind: AxisKind) -> &mut Axis {
        match kind {
            AxisKind::Left => &mut self.left,
            AxisKind::Top => &mut self.top,
        }
    }

    pub(crate) fn is_current(&self, ticket: CycleTicket) -> bool {
        ticket.generation == self.generation && !self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn has_value_filters(&self) -> bool {
        self.left.has_value_filter() || self.top.has_value_filter()
    }

    /// Drops every item, result and key. Dimensions are kept.
    pub(crate) fn clear_data(&mut self) {
        self.results.clear();
        self.left.clear();
        self.top.clear();
        self.keys.clear();
        self.view = MatrixView::default();
    }

    /// Classifies one record on both axes and attaches it to every cell it
    /// contributes to. Returns false when a label filter rejected it.
    pub(crate) fn process_record(&mut self, id: RecordId, record: &Record) -> Result<bool> {
        let Some(row) = self.left.process_record(record, &mut self.keys) else {
            return Ok(false);
        };
        let Some(col) = self.top.process_record(record, &mut self.keys) else {
            return Ok(false);
        };
        self.left.add_path(&row)?;
        self.top.add_path(&col)?;
        self.attach(id, &row, &col);
        Ok(true)
    }

    /// Adds a record to the grand totals, to each of its column groups and
    /// row groups, and to every row group x column group crossing.
    pub(crate) fn attach(&mut self, id: RecordId, row: &[AxisTuple], col: &[AxisTuple]) {
        let gt = self.config.grand_total_key.clone();
        self.results.add_record(&gt, &gt, id);
        for c in col {
            self.results.add_record(&gt, &c.key, id);
        }
        for r in row {
            self.results.add_record(&r.key, &gt, id);
            for c in col {
                self.results.add_record(&r.key, &c.key, id);
            }
        }
    }

    /// True when an axis item no longer has a grand-total result, meaning no
    /// record supports it.
    pub(crate) fn has_orphans(&self) -> bool {
        let gt = self.grand_total_key();
        self.left.items().any(|(_, item)| self.results.get(&item.key, gt).is_none())
            || self.top.items().any(|(_, item)| self.results.get(gt, &item.key).is_none())
    }

    pub(crate) fn refresh_view(&mut self) {
        self.view = MatrixView::generate(
            &self.config,
            &self.left,
            &self.top,
            &self.aggregates,
            &self.results,
        );
    }

    pub(crate) fn set_state(&mut self, state: CycleState) {
        self.state = state;
    }

    fn notify(&mut self, mut event: impl FnMut(&mut dyn MatrixListener)) {
        for listener in &mut self.listeners {
            event(listener.as_mut());
        }
    }

    pub(crate) fn notify_progress(&mut self, processed: usize, total: usize) {
        self.notify(|l| l.on_progress(processed, total));
    }

    pub(crate) fn notify_done(&mut self) {
        let generation = self.generation;
        self.notify(|l| l.on_done(generation));
    }
}

impl fmt::Debug for MatrixCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixCore")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("left_items", &self.left.len())
            .field("top_items", &self.top.len())
            .field("results", &self.results.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// MATRIX
// ============================================================================

/// The generic driver. See `LocalMatrix` and `RemoteMatrix`.
#[derive(Debug)]
pub struct Matrix<S: MatrixStrategy> {
    core: MatrixCore,
    strategy: S,
}

impl<S: MatrixStrategy> Matrix<S> {
    /// Builds a matrix. Fails on a dimension without `dataIndex`, duplicate
    /// dimension ids, or a value filter that does not name an aggregate.
    pub fn new(config: MatrixConfig, strategy: S) -> Result<Self> {
        Ok(Matrix { core: MatrixCore::new(config)?, strategy })
    }

    // ========================================================================
    // CYCLE
    // ========================================================================

    /// Starts a new cycle, invalidating any cycle in flight.
    pub fn begin_cycle(&mut self) -> CycleTicket {
        self.core.token.cancel();
        self.core.token = CancellationToken::new();
        self.core.generation += 1;
        self.core.clear_data();
        self.core.state = CycleState::Collecting;

        let generation = self.core.generation;
        log_debug!("MATRIX", "cycle {} started", generation);
        self.core.notify(|l| l.on_start(generation));
        CycleTicket { generation }
    }

    /// Cancels the cycle in flight, if any.
    pub fn cancel(&mut self) {
        self.core.token.cancel();
        if self.core.state != CycleState::Done {
            self.core.state = CycleState::Idle;
        }
    }

    pub fn is_current(&self, ticket: CycleTicket) -> bool {
        self.core.is_current(ticket)
    }

    /// Hands one batch to the strategy. Stale tickets are ignored.
    pub fn feed(&mut self, ticket: CycleTicket, batch: S::Batch) -> Result<()> {
        if !self.core.is_current(ticket) {
            log_debug!("MATRIX", "dropping batch of stale cycle {}", ticket.generation);
            return Ok(());
        }
        match self.strategy.classify(&mut self.core, batch) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Aggregates, builds trees (re-aggregating after pruning) and
    /// regenerates the view.
    pub fn finish(&mut self, ticket: CycleTicket) -> Result<()> {
        if !self.core.is_current(ticket) {
            return Ok(());
        }
        let start = Instant::now();

        if let Err(e) = self.complete() {
            return Err(self.fail(e));
        }

        log_info!(
            "MATRIX",
            "cycle {} done: {} left items, {} top items, {} results in {}ms",
            ticket.generation,
            self.core.left.len(),
            self.core.top.len(),
            self.core.results.len(),
            elapsed_ms(start)
        );
        self.core.notify_done();
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        self.core.state = CycleState::Aggregating;
        self.strategy.aggregate(&mut self.core)?;

        self.core.state = CycleState::TreeBuilding;
        let pruned = self.strategy.build_tree(&mut self.core)?;
        if pruned {
            self.core.state = CycleState::Aggregating;
            self.strategy.aggregate(&mut self.core)?;
        }

        self.core.refresh_view();
        self.core.state = CycleState::Done;
        Ok(())
    }

    /// Resets the matrix to empty, reports the error and hands it back.
    pub(crate) fn fail(&mut self, error: PivotError) -> PivotError {
        self.core.token.cancel();
        self.core.clear_data();
        self.core.state = CycleState::Failed;
        log_error!("MATRIX", "cycle {} failed: {}", self.core.generation, error);
        self.core.notify(|l| l.on_error(&error));
        error
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &MatrixConfig {
        &self.core.config
    }

    pub fn state(&self) -> CycleState {
        self.core.state
    }

    pub fn generation(&self) -> u64 {
        self.core.generation
    }

    pub fn left_axis(&self) -> &Axis {
        &self.core.left
    }

    pub fn top_axis(&self) -> &Axis {
        &self.core.top
    }

    pub fn axis(&self, kind: AxisKind) -> &Axis {
        self.core.axis(kind)
    }

    pub fn aggregates(&self) -> &[Dimension] {
        &self.core.aggregates
    }

    pub fn results(&self) -> &ResultCollection {
        &self.core.results
    }

    pub fn view(&self) -> &MatrixView {
        &self.core.view
    }

    pub fn grand_total_key(&self) -> &str {
        self.core.grand_total_key()
    }

    pub fn keys_separator(&self) -> &str {
        &self.core.config.keys_separator
    }

    pub fn result(&self, left_key: &str, top_key: &str) -> Option<&MatrixResult> {
        self.core.results.get(left_key, top_key)
    }

    pub fn value(&self, left_key: &str, top_key: &str, aggregate_id: &str) -> Option<&Value> {
        self.core.results.value(left_key, top_key, aggregate_id)
    }

    /// Cell value rendered by its aggregate dimension.
    pub fn formatted_value(&self, left_key: &str, top_key: &str, aggregate_id: &str) -> Option<String> {
        let dimension = self.core.aggregates.iter().find(|d| d.id() == aggregate_id)?;
        self.value(left_key, top_key, aggregate_id).map(|v| dimension.format(v))
    }

    /// Resolves a cell from raw group values. An empty path means the grand
    /// total of that axis.
    pub fn result_by_path(&self, row: &[Value], col: &[Value]) -> Option<&MatrixResult> {
        let gt = self.core.grand_total_key().to_string();
        let left_key = if row.is_empty() { gt.clone() } else { self.core.left.key_for_path(row)? };
        let top_key = if col.is_empty() { gt } else { self.core.top.key_for_path(col)? };
        self.core.results.get(&left_key, &top_key)
    }

    // ========================================================================
    // CONFIGURATION AT RUNTIME
    // ========================================================================

    pub fn add_listener(&mut self, listener: Box<dyn MatrixListener>) {
        self.core.listeners.push(listener);
    }

    /// Registers a custom aggregator resolvable by name.
    pub fn register_aggregator<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&AggregateInput<'_>) -> Value + Send + Sync + 'static,
    {
        self.core.registry.register(name, func);
    }

    /// Any dimension (axis or aggregate) by id, to attach closures.
    pub fn dimension_mut(&mut self, id: &str) -> Option<&mut Dimension> {
        let core = &mut self.core;
        if let Some(d) = core.left.dimension_mut(id) {
            return Some(d);
        }
        if let Some(d) = core.top.dimension_mut(id) {
            return Some(d);
        }
        core.aggregates.iter_mut().find(|d| d.id() == id)
    }

    fn axis_of_dimension(&self, id: &str) -> Result<AxisKind> {
        if self.core.left.dimension(id).is_some() {
            Ok(AxisKind::Left)
        } else if self.core.top.dimension(id).is_some() {
            Ok(AxisKind::Top)
        } else {
            Err(PivotError::DimensionNotFound(id.to_string()))
        }
    }

    /// Changes a grouping dimension's direction and re-sorts its axis
    /// without re-aggregating.
    pub fn set_sort_direction(&mut self, dimension_id: &str, direction: SortDirection) -> Result<()> {
        let kind = self.axis_of_dimension(dimension_id)?;
        let axis = self.core.axis_mut(kind);
        if let Some(dimension) = axis.dimension_mut(dimension_id) {
            dimension.set_direction(direction);
        }
        axis.sort_tree();
        self.core.refresh_view();
        Ok(())
    }

    /// Orders every sibling group of one axis by an aggregate value found at
    /// the crossing with `other_key` on the other axis. Groups without a
    /// value sort first.
    pub fn sort_axis_by_result(
        &mut self,
        kind: AxisKind,
        other_key: &str,
        aggregate_id: &str,
        direction: SortDirection,
    ) {
        let core = &mut self.core;
        let results = &core.results;
        let axis = match kind {
            AxisKind::Left => &mut core.left,
            AxisKind::Top => &mut core.top,
        };
        let value_of = |key: &str| -> Option<f64> {
            let cell = match kind {
                AxisKind::Left => results.value(key, other_key, aggregate_id),
                AxisKind::Top => results.value(other_key, key, aggregate_id),
            };
            cell.and_then(Value::as_f64)
        };
        axis.sort_siblings_by(|a, b| {
            let ord = match (value_of(&a.key), value_of(&b.key)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        core.refresh_view();
    }

    /// Replaces (or clears) the filter of a grouping dimension. The cycle in
    /// flight is cancelled and the matrix returns to `Idle`; run a new cycle
    /// to apply the filter.
    pub fn set_filter(&mut self, dimension_id: &str, filter: Option<FilterConfig>) -> Result<()> {
        let kind = self.axis_of_dimension(dimension_id)?;
        let filter = match filter {
            Some(config) => {
                let filter = Filter::new(config, self.core.config.locale.clone());
                let aggregate_ids: Vec<String> =
                    self.core.aggregates.iter().map(|d| d.id().to_string()).collect();
                filter.validate(dimension_id, &aggregate_ids)?;
                Some(filter)
            }
            None => None,
        };

        if let Some(dimension) = self.core.axis_mut(kind).dimension_mut(dimension_id) {
            dimension.set_filter(filter);
        }
        self.core.token.cancel();
        self.core.state = CycleState::Idle;
        log_info!("MATRIX", "filter on {} changed", dimension_id);
        Ok(())
    }

    // ========================================================================
    // EXPAND / COLLAPSE
    // ========================================================================

    pub fn expand(&mut self, kind: AxisKind, key: &str) -> Result<()> {
        self.core.axis_mut(kind).expand(key)?;
        self.core.notify(|l| l.on_expand(kind, key));
        self.core.refresh_view();
        Ok(())
    }

    pub fn collapse(&mut self, kind: AxisKind, key: &str) -> Result<()> {
        self.core.axis_mut(kind).collapse(key)?;
        self.core.notify(|l| l.on_collapse(kind, key));
        self.core.refresh_view();
        Ok(())
    }

    pub fn expand_all(&mut self, kind: AxisKind) {
        self.core.axis_mut(kind).expand_all();
        self.core.refresh_view();
    }

    pub fn collapse_all(&mut self, kind: AxisKind) {
        self.core.axis_mut(kind).collapse_all();
        self.core.refresh_view();
    }
}
