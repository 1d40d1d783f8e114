//! FILENAME: core/pivot-matrix/src/matrix/local.rs
//! Local strategy: classifies an in-memory record store in cooperative jobs.
//!
//! A cycle is an `AggregationTask` that processes `records_per_job` records
//! per job. `run` drives it on the tokio runtime, pausing `time_between_jobs`
//! milliseconds (or just yielding) between jobs, so a long classification
//! never starves other tasks. `run_blocking` drives the same jobs inline.
//!
//! Store mutations go through `mutate`/`apply_change`, which either
//! re-aggregates in place or restarts a full cycle.

use std::time::Instant;
use tokio_util::sync::CancellationToken;
use super::{CycleState, CycleTicket, Matrix, MatrixCore, MatrixStrategy};
use crate::definition::MatrixConfig;
use crate::error::Result;
use crate::logging::elapsed_ms;
use crate::store::{RecordId, RecordStore, StoreChange};
use crate::value::Record;
use crate::{log_debug, log_info};

// ============================================================================
// TYPES
// ============================================================================

/// Owns the records a local matrix aggregates.
#[derive(Debug, Default)]
pub struct LocalStrategy {
    store: RecordStore,
}

impl LocalStrategy {
    pub fn new(store: RecordStore) -> Self {
        LocalStrategy { store }
    }
}

/// One aggregation cycle over a snapshot of record ids.
#[derive(Debug)]
pub struct AggregationTask {
    ticket: CycleTicket,
    token: CancellationToken,
    pending: Vec<RecordId>,
    cursor: usize,
    per_job: usize,
}

impl AggregationTask {
    pub fn ticket(&self) -> CycleTicket {
        self.ticket
    }

    /// A handle that cancels this task from anywhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// (processed, total) record counts.
    pub fn progress(&self) -> (usize, usize) {
        (self.cursor, self.pending.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending { processed: usize, total: usize },
    Done,
    Cancelled,
}

/// What a store change did to the matrix.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Values were recomputed in place; the matrix is `Done` again.
    Recalculated,
    /// The change needs a full cycle. Run the returned task.
    Restarted(AggregationTask),
}

// ============================================================================
// STRATEGY
// ============================================================================

impl MatrixStrategy for LocalStrategy {
    type Batch = Vec<RecordId>;

    fn classify(&mut self, core: &mut MatrixCore, batch: Vec<RecordId>) -> Result<()> {
        for id in batch {
            if let Some(record) = self.store.get(id) {
                core.process_record(id, record)?;
            }
        }
        Ok(())
    }

    fn aggregate(&mut self, core: &mut MatrixCore) -> Result<()> {
        let start = Instant::now();
        core.results.calculate(
            &core.aggregates,
            &core.registry,
            &self.store,
            &core.config.keys_separator,
            &core.config.grand_total_key,
        )?;
        log_debug!("MATRIX", "aggregated {} results in {}ms", core.results.len(), elapsed_ms(start));
        Ok(())
    }

    fn build_tree(&mut self, core: &mut MatrixCore) -> Result<bool> {
        core.left.build_tree();
        core.top.build_tree();

        let mut pruned = false;
        if core.left.has_value_filter() && core.left.filter_tree(&mut core.results) {
            core.top.prune_empty_groups(&mut core.results);
            pruned = true;
        }
        if core.top.has_value_filter() {
            // column totals must reflect the pruned rows before they are tested
            if pruned {
                self.aggregate(core)?;
            }
            if core.top.filter_tree(&mut core.results) {
                core.left.prune_empty_groups(&mut core.results);
                pruned = true;
            }
        }
        Ok(pruned)
    }
}

// ============================================================================
// LOCAL MATRIX
// ============================================================================

impl Matrix<LocalStrategy> {
    pub fn local(config: MatrixConfig, store: RecordStore) -> Result<Self> {
        Matrix::new(config, LocalStrategy::new(store))
    }

    pub fn store(&self) -> &RecordStore {
        &self.strategy.store
    }

    /// Records attached to one cell.
    pub fn records_for(&self, left_key: &str, top_key: &str) -> Vec<&Record> {
        match self.core.results.get(left_key, top_key) {
            Some(result) => result.records.iter().filter_map(|&id| self.strategy.store.get(id)).collect(),
            None => Vec::new(),
        }
    }

    /// Starts a full cycle over the current records.
    pub fn start_cycle(&mut self) -> AggregationTask {
        let ticket = self.begin_cycle();
        AggregationTask {
            ticket,
            token: self.core.token(),
            pending: self.strategy.store.ids(),
            cursor: 0,
            per_job: self.core.config.records_per_job.max(1),
        }
    }

    /// Classifies the next chunk of the task. The last job aggregates,
    /// builds the trees and regenerates the view.
    pub fn run_job(&mut self, task: &mut AggregationTask) -> Result<JobStatus> {
        if task.token.is_cancelled() || !self.core.is_current(task.ticket) {
            log_debug!("MATRIX", "task of cycle {} cancelled", task.ticket.generation());
            return Ok(JobStatus::Cancelled);
        }

        let total = task.pending.len();
        let end = (task.cursor + task.per_job).min(total);
        let batch = task.pending[task.cursor..end].to_vec();
        self.feed(task.ticket, batch)?;
        task.cursor = end;
        self.core.notify_progress(end, total);

        if end < total {
            return Ok(JobStatus::Pending { processed: end, total });
        }
        self.finish(task.ticket)?;
        Ok(JobStatus::Done)
    }

    /// Runs a task to completion on the tokio runtime.
    pub async fn run_task(&mut self, mut task: AggregationTask) -> Result<JobStatus> {
        let interval = self.core.config.job_interval();
        loop {
            match self.run_job(&mut task)? {
                JobStatus::Pending { .. } => {
                    if interval.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(interval).await;
                    }
                }
                status => return Ok(status),
            }
        }
    }

    /// Starts and runs a full cycle.
    pub async fn run(&mut self) -> Result<JobStatus> {
        let task = self.start_cycle();
        self.run_task(task).await
    }

    /// Runs a task without yielding between jobs.
    pub fn run_task_blocking(&mut self, mut task: AggregationTask) -> Result<JobStatus> {
        loop {
            match self.run_job(&mut task)? {
                JobStatus::Pending { .. } => continue,
                status => return Ok(status),
            }
        }
    }

    pub fn run_blocking(&mut self) -> Result<JobStatus> {
        let task = self.start_cycle();
        self.run_task_blocking(task)
    }

    // ========================================================================
    // INCREMENTAL UPDATES
    // ========================================================================

    /// Mutates the store and applies the resulting change.
    pub fn mutate<F>(&mut self, f: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&mut RecordStore) -> Result<StoreChange>,
    {
        let change = f(&mut self.strategy.store)?;
        self.apply_change(change)
    }

    /// Brings the matrix up to date with a store change.
    ///
    /// Changes that only move values between existing cells re-aggregate in
    /// place. Anything that may create or drop a group, or any change while
    /// a value filter is active, restarts the cycle.
    pub fn apply_change(&mut self, change: StoreChange) -> Result<UpdateOutcome> {
        if self.state() != CycleState::Done {
            return Ok(self.restart("matrix not calculated"));
        }
        if self.core.has_value_filters() {
            return Ok(self.restart("value filters active"));
        }

        match change {
            StoreChange::Refresh | StoreChange::Clear => Ok(self.restart("records replaced")),
            StoreChange::Update { ids, modified_fields } => {
                let grouping_changed = modified_fields.iter().any(|field| {
                    self.core.left.dimensions().iter().any(|d| d.reads_field(field))
                        || self.core.top.dimensions().iter().any(|d| d.reads_field(field))
                });
                if !grouping_changed {
                    return self.recalculate();
                }
                if self.is_really_dirty(&ids, &modified_fields) {
                    return Ok(self.restart("new group value"));
                }
                for &id in &ids {
                    self.core.results.detach_record(id);
                }
                self.core.results.remove_empty();
                if !self.attach_known(&ids) {
                    return Ok(self.restart("new group combination"));
                }
                self.settle()
            }
            StoreChange::Add(ids) => {
                if self.is_really_dirty(&ids, &[]) {
                    return Ok(self.restart("new group value"));
                }
                if !self.attach_known(&ids) {
                    return Ok(self.restart("new group combination"));
                }
                self.recalculate()
            }
            StoreChange::Remove(ids) => {
                for &id in &ids {
                    self.core.results.detach_record(id);
                }
                self.core.results.remove_empty();
                self.settle()
            }
        }
    }

    /// True when any of the records now groups into a value some grouping
    /// dimension has never seen. Only dimensions reading one of
    /// `modified_fields` are checked; an empty list checks all of them.
    pub fn is_really_dirty(&self, ids: &[RecordId], modified_fields: &[String]) -> bool {
        let dimensions = self.core.left.dimensions().iter().chain(self.core.top.dimensions());
        let relevant: Vec<_> = dimensions
            .filter(|d| modified_fields.is_empty() || modified_fields.iter().any(|f| d.reads_field(f)))
            .collect();

        ids.iter()
            .filter_map(|&id| self.strategy.store.get(id))
            .any(|record| relevant.iter().any(|d| !d.has_value(&d.group_value(record))))
    }

    /// Classifies records and attaches them when every key they produce
    /// already exists. Returns false on the first unknown key.
    fn attach_known(&mut self, ids: &[RecordId]) -> bool {
        let core = &mut self.core;
        for &id in ids {
            let Some(record) = self.strategy.store.get(id) else {
                continue;
            };
            let Some(row) = core.left.process_record(record, &mut core.keys) else {
                continue;
            };
            let Some(col) = core.top.process_record(record, &mut core.keys) else {
                continue;
            };
            let known = row.iter().all(|t| core.left.has_key(&t.key))
                && col.iter().all(|t| core.top.has_key(&t.key));
            if !known {
                return false;
            }
            core.attach(id, &row, &col);
        }
        true
    }

    /// Recalculates unless some axis item lost its last record.
    fn settle(&mut self) -> Result<UpdateOutcome> {
        if self.core.has_orphans() {
            return Ok(self.restart("group emptied"));
        }
        self.recalculate()
    }

    fn recalculate(&mut self) -> Result<UpdateOutcome> {
        let start = Instant::now();
        if let Err(e) = self.strategy.aggregate(&mut self.core) {
            return Err(self.fail(e));
        }
        self.core.refresh_view();
        self.core.set_state(CycleState::Done);
        log_info!("MATRIX", "recalculated in place in {}ms", elapsed_ms(start));
        self.core.notify_done();
        Ok(UpdateOutcome::Recalculated)
    }

    fn restart(&mut self, reason: &str) -> UpdateOutcome {
        log_info!("MATRIX", "full recalculation required: {}", reason);
        UpdateOutcome::Restarted(self.start_cycle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DimensionConfig;
    use crate::filter::FilterConfig;
    use crate::value::Value;

    fn matrix(per_job: usize) -> Matrix<LocalStrategy> {
        let config = MatrixConfig {
            records_per_job: per_job,
            time_between_jobs: 0,
            left_axis: vec![DimensionConfig::new("person").with_id("person")],
            top_axis: vec![DimensionConfig::new("country").with_id("country")],
            aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("sum")],
            ..MatrixConfig::default()
        };
        let store = RecordStore::from_records(vec![
            Record::new().with("person", "John").with("country", "USA").with("sales", 10.0),
            Record::new().with("person", "John").with("country", "USA").with("sales", 20.0),
            Record::new().with("person", "John").with("country", "Canada").with("sales", 5.0),
            Record::new().with("person", "Mary").with("country", "USA").with("sales", 7.0),
        ]);
        Matrix::local(config, store).unwrap()
    }

    fn grand_total(m: &Matrix<LocalStrategy>) -> Option<f64> {
        let gt = m.grand_total_key();
        m.value(gt, gt, "sales").and_then(Value::as_f64)
    }

    #[test]
    fn test_jobs_are_chunked() {
        let mut m = matrix(3);
        let mut task = m.start_cycle();
        assert_eq!(m.state(), CycleState::Collecting);

        let status = m.run_job(&mut task).unwrap();
        assert_eq!(status, JobStatus::Pending { processed: 3, total: 4 });
        assert_eq!(task.progress(), (3, 4));

        assert_eq!(m.run_job(&mut task).unwrap(), JobStatus::Done);
        assert_eq!(m.state(), CycleState::Done);
        assert_eq!(grand_total(&m), Some(42.0));
    }

    #[test]
    fn test_stale_task_is_cancelled() {
        let mut m = matrix(1);
        let mut old = m.start_cycle();
        m.run_job(&mut old).unwrap();

        let fresh = m.start_cycle();
        assert_eq!(m.run_job(&mut old).unwrap(), JobStatus::Cancelled);
        assert_eq!(m.run_task_blocking(fresh).unwrap(), JobStatus::Done);
        assert_eq!(grand_total(&m), Some(42.0));
    }

    #[test]
    fn test_empty_store_completes() {
        let mut m = Matrix::local(MatrixConfig::default(), RecordStore::new()).unwrap();
        assert_eq!(m.run_blocking().unwrap(), JobStatus::Done);
        assert!(m.results().is_empty());
    }

    #[test]
    fn test_measure_update_recalculates() {
        let mut m = matrix(10);
        m.run_blocking().unwrap();

        let outcome = m.mutate(|store| store.update(3, "sales", Value::number(8.0))).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Recalculated));
        assert_eq!(grand_total(&m), Some(43.0));
    }

    #[test]
    fn test_new_group_value_restarts() {
        let mut m = matrix(10);
        m.run_blocking().unwrap();

        let outcome = m
            .mutate(|store| store.update(3, "country", Value::text("Mexico")))
            .unwrap();
        let UpdateOutcome::Restarted(task) = outcome else {
            panic!("expected restart");
        };
        m.run_task_blocking(task).unwrap();
        assert_eq!(m.top_axis().len(), 3);
        assert_eq!(grand_total(&m), Some(42.0));
    }

    #[test]
    fn test_known_group_move_recalculates() {
        let mut m = matrix(10);
        m.run_blocking().unwrap();

        // John/USA (20) moves to John/Canada; every group keeps a record
        let outcome = m
            .mutate(|store| store.update(1, "country", Value::text("Canada")))
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Recalculated));
        let canada = m
            .result_by_path(&[Value::text("John")], &[Value::text("Canada")])
            .and_then(|r| r.value("sales"))
            .and_then(Value::as_f64);
        assert_eq!(canada, Some(25.0));
    }

    #[test]
    fn test_removing_last_record_of_group_restarts() {
        let mut m = matrix(10);
        m.run_blocking().unwrap();

        let outcome = m.mutate(|store| store.remove(&[3])).unwrap();
        let UpdateOutcome::Restarted(task) = outcome else {
            panic!("expected restart");
        };
        m.run_task_blocking(task).unwrap();
        assert!(m.left_axis().key_for_path(&[Value::text("Mary")]).is_none());
        assert_eq!(grand_total(&m), Some(35.0));
    }

    #[test]
    fn test_records_for_cell() {
        let mut m = matrix(10);
        m.run_blocking().unwrap();
        let gt = m.grand_total_key().to_string();
        let john = m.left_axis().key_for_path(&[Value::text("John")]).unwrap();
        assert_eq!(m.records_for(&john, &gt).len(), 3);
        assert!(m.records_for("missing", &gt).is_empty());
    }

    #[tokio::test]
    async fn test_run_async_completes() {
        let mut m = matrix(1);
        assert_eq!(m.run().await.unwrap(), JobStatus::Done);
        assert_eq!(grand_total(&m), Some(42.0));
    }

    #[test]
    fn test_row_filter_leaves_no_empty_columns() {
        let config = MatrixConfig {
            time_between_jobs: 0,
            left_axis: vec![DimensionConfig::new("person")
                .with_id("person")
                .with_filter(FilterConfig::value(">", 10.0, "sales"))],
            top_axis: vec![DimensionConfig::new("country").with_id("country")],
            aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("sum")],
            ..MatrixConfig::default()
        };
        let store = RecordStore::from_records(vec![
            Record::new().with("person", "John").with("country", "USA").with("sales", 30.0),
            Record::new().with("person", "Mary").with("country", "Mexico").with("sales", 3.0),
        ]);
        let mut m = Matrix::local(config, store).unwrap();
        m.run_blocking().unwrap();

        // Mexico only held Mary's records
        assert_eq!(m.left_axis().len(), 1);
        assert_eq!(m.top_axis().len(), 1);
        assert!(!m.core.has_orphans());
        assert_eq!(grand_total(&m), Some(30.0));
    }
}
