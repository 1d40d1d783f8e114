//! FILENAME: tests/test_local_matrix.rs
//! Integration tests for local calculation: totals, keys, hierarchy,
//! cooperative scheduling, sorting and the derived view.

mod common;

use std::sync::{Arc, Mutex};
use common::{number_at, snapshot, SalesFixture};
use pivot_matrix::{
    AxisKind, CycleState, DimensionConfig, JobStatus, Matrix, MatrixConfig, MatrixListener,
    PivotError, RecordStore, RowKind, SortDirection, Value,
};

// ============================================================================
// TOTALS
// ============================================================================

#[test]
fn test_cells_and_totals() {
    let m = SalesFixture::matrix(SalesFixture::config());

    assert_eq!(number_at(&m, &[], &[], "sales"), Some(42.0));
    assert_eq!(number_at(&m, &["John"], &[], "sales"), Some(35.0));
    assert_eq!(number_at(&m, &["Mary"], &[], "sales"), Some(7.0));
    assert_eq!(number_at(&m, &[], &["USA"], "sales"), Some(37.0));
    assert_eq!(number_at(&m, &[], &["Canada"], "sales"), Some(5.0));
    assert_eq!(number_at(&m, &["John"], &["USA"], "sales"), Some(30.0));
    assert_eq!(number_at(&m, &["John"], &["Canada"], "sales"), Some(5.0));
    assert_eq!(number_at(&m, &["Mary"], &["USA"], "sales"), Some(7.0));
    // no record, no cell
    assert_eq!(number_at(&m, &["Mary"], &["Canada"], "sales"), None);
    assert_eq!(m.state(), CycleState::Done);
}

#[test]
fn test_nested_rows_under_parent() {
    let m = SalesFixture::matrix(SalesFixture::nested_config());

    assert_eq!(number_at(&m, &["John", "USA"], &[], "sales"), Some(30.0));
    assert_eq!(number_at(&m, &["John", "Canada"], &[], "sales"), Some(5.0));
    assert_eq!(number_at(&m, &["Mary", "USA"], &[], "sales"), Some(7.0));
    assert_eq!(m.left_axis().levels(), 2);
    assert!(m.top_axis().is_empty());
}

#[test]
fn test_sum_is_additive_over_children() {
    let m = SalesFixture::matrix(SalesFixture::nested_config());
    let gt = m.grand_total_key().to_string();
    let total = |key: &str| m.value(key, &gt, "sales").and_then(Value::as_f64).unwrap_or(0.0);

    let roots: f64 = m
        .left_axis()
        .tree()
        .iter()
        .filter_map(|&id| m.left_axis().item(id))
        .map(|item| total(&item.key))
        .sum();
    assert_eq!(roots, total(&gt));

    for (id, item) in m.left_axis().items() {
        if item.is_leaf() {
            continue;
        }
        let children: f64 = m
            .left_axis()
            .children_of(id)
            .iter()
            .filter_map(|&c| m.left_axis().item(c))
            .map(|child| total(&child.key))
            .sum();
        assert_eq!(children, total(&item.key), "children of {}", item.name);
    }
}

// ============================================================================
// KEYS
// ============================================================================

#[test]
fn test_keys_are_unique_and_hierarchical() {
    let m = SalesFixture::matrix(SalesFixture::nested_config());
    let axis = m.left_axis();
    let separator = m.keys_separator();

    let mut keys: Vec<&str> = axis.items().map(|(_, item)| item.key.as_str()).collect();
    let count = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), count);
    assert!(!keys.contains(&m.grand_total_key()));

    for (_, item) in axis.items() {
        if let Some(parent) = item.parent.and_then(|p| axis.item(p)) {
            assert!(item.key.starts_with(&format!("{}{}", parent.key, separator)));
            assert_eq!(item.level, parent.level + 1);
        } else {
            assert_eq!(item.level, 0);
            assert!(!item.key.contains(separator));
        }
    }
}

#[test]
fn test_same_value_same_fragment_across_axes() {
    let config = MatrixConfig {
        left_axis: vec![DimensionConfig::new("country").with_id("rowCountry")],
        top_axis: vec![DimensionConfig::new("country").with_id("colCountry")],
        aggregate: vec![DimensionConfig::new("sales").with_id("sales")],
        ..SalesFixture::config()
    };
    let m = SalesFixture::matrix(config);
    let left = m.left_axis().key_for_path(&[Value::text("USA")]);
    let top = m.top_axis().key_for_path(&[Value::text("USA")]);
    assert!(left.is_some());
    assert_eq!(left, top);
}

// ============================================================================
// CYCLES
// ============================================================================

#[test]
fn test_recalculation_is_idempotent() {
    let mut m = SalesFixture::matrix(SalesFixture::nested_config());
    let first = snapshot(&m);
    let generation = m.generation();

    m.run_blocking().unwrap();
    assert_eq!(snapshot(&m), first);
    assert_eq!(m.generation(), generation + 1);
}

#[tokio::test]
async fn test_chunked_run_matches_blocking_run() {
    let blocking = SalesFixture::matrix(SalesFixture::nested_config());

    let config = MatrixConfig { records_per_job: 1, ..SalesFixture::nested_config() };
    let mut chunked = Matrix::local(config, SalesFixture::store()).unwrap();
    assert_eq!(chunked.run().await.unwrap(), JobStatus::Done);

    assert_eq!(snapshot(&chunked), snapshot(&blocking));
}

#[tokio::test]
async fn test_cancelled_task_never_completes() {
    let config = MatrixConfig { records_per_job: 1, ..SalesFixture::config() };
    let mut m = Matrix::local(config, SalesFixture::store()).unwrap();

    let mut task = m.start_cycle();
    assert!(matches!(m.run_job(&mut task).unwrap(), JobStatus::Pending { processed: 1, total: 4 }));

    task.cancellation_token().cancel();
    assert_eq!(m.run_task(task).await.unwrap(), JobStatus::Cancelled);
    assert_ne!(m.state(), CycleState::Done);
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl MatrixListener for Recorder {
    fn on_start(&mut self, generation: u64) {
        self.events.lock().unwrap().push(format!("start {}", generation));
    }

    fn on_progress(&mut self, processed: usize, total: usize) {
        self.events.lock().unwrap().push(format!("progress {}/{}", processed, total));
    }

    fn on_done(&mut self, generation: u64) {
        self.events.lock().unwrap().push(format!("done {}", generation));
    }

    fn on_error(&mut self, error: &PivotError) {
        self.events.lock().unwrap().push(format!("error {}", error));
    }

    fn on_expand(&mut self, _axis: AxisKind, _key: &str) {
        self.events.lock().unwrap().push("expand".to_string());
    }
}

#[test]
fn test_listener_sees_cycle_lifecycle() {
    let config = MatrixConfig { records_per_job: 2, ..SalesFixture::config() };
    let mut m = Matrix::local(config, SalesFixture::store()).unwrap();
    let recorder = Recorder::default();
    m.add_listener(Box::new(recorder.clone()));

    m.run_blocking().unwrap();
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events, vec!["start 1", "progress 2/4", "progress 4/4", "done 1"]);
}

#[test]
fn test_unregistered_aggregator_fails_cycle() {
    let config = MatrixConfig {
        aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("median")],
        ..SalesFixture::config()
    };
    let mut m = Matrix::local(config, SalesFixture::store()).unwrap();
    let recorder = Recorder::default();
    m.add_listener(Box::new(recorder.clone()));

    let err = m.run_blocking().unwrap_err();
    assert!(matches!(err, PivotError::AggregatorNotFound(ref name) if name == "median"));
    assert_eq!(m.state(), CycleState::Failed);
    assert!(m.results().is_empty());
    assert!(recorder.events.lock().unwrap().iter().any(|e| e.starts_with("error")));
}

#[test]
fn test_registered_aggregator_resolves_by_name() {
    let config = MatrixConfig {
        aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("largeSales")],
        ..SalesFixture::config()
    };
    let mut m = Matrix::local(config, SalesFixture::store()).unwrap();
    m.register_aggregator("largeSales", |input| {
        let n = input
            .records
            .iter()
            .filter(|r| r.get(input.measure).number_or_zero() >= 10.0)
            .count();
        Value::number(n as f64)
    });
    m.run_blocking().unwrap();

    assert_eq!(number_at(&m, &[], &[], "sales"), Some(2.0));
    assert_eq!(number_at(&m, &["Mary"], &[], "sales"), Some(0.0));
}

#[test]
fn test_custom_grouper() {
    let mut m = Matrix::local(SalesFixture::config(), SalesFixture::store()).unwrap();
    m.dimension_mut("country")
        .unwrap()
        .set_grouper(|_| Value::text("North America"));
    m.run_blocking().unwrap();

    assert_eq!(m.top_axis().len(), 1);
    assert_eq!(number_at(&m, &["John"], &["North America"], "sales"), Some(35.0));
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

#[test]
fn test_duplicate_dimension_ids_rejected() {
    let config = MatrixConfig {
        top_axis: vec![DimensionConfig::new("country").with_id("person")],
        ..SalesFixture::config()
    };
    let err = Matrix::local(config, RecordStore::new()).unwrap_err();
    assert!(matches!(err, PivotError::DuplicateDimension(ref id) if id == "person"));
}

#[test]
fn test_missing_data_index_rejected() {
    let config = MatrixConfig {
        left_axis: vec![DimensionConfig::new("")],
        ..SalesFixture::config()
    };
    let err = Matrix::local(config, RecordStore::new()).unwrap_err();
    assert!(matches!(err, PivotError::MissingDataIndex(_)));
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "timeBetweenJobs": 0,
        "leftAxis": [{ "id": "person", "dataIndex": "person" }],
        "topAxis": [{ "id": "country", "dataIndex": "country", "direction": "DESC" }],
        "aggregate": [{ "id": "sales", "dataIndex": "sales", "aggregator": "avg" }]
    }"#;
    let config = MatrixConfig::from_json(json).unwrap();
    let m = SalesFixture::matrix(config);

    assert_eq!(number_at(&m, &["John"], &["USA"], "sales"), Some(15.0));
    let first = m.top_axis().tree()[0];
    assert_eq!(m.top_axis().item(first).unwrap().value, Value::text("USA"));
}

// ============================================================================
// SORTING
// ============================================================================

#[test]
fn test_sort_direction_change_resorts_only() {
    let mut m = SalesFixture::matrix(SalesFixture::config());
    let generation = m.generation();
    let first_name = |m: &pivot_matrix::LocalMatrix| {
        let id = m.left_axis().tree()[0];
        m.left_axis().item(id).unwrap().name.clone()
    };
    assert_eq!(first_name(&m), "John");

    m.set_sort_direction("person", SortDirection::Desc).unwrap();
    assert_eq!(first_name(&m), "Mary");
    assert_eq!(m.generation(), generation);
    assert_eq!(number_at(&m, &[], &[], "sales"), Some(42.0));

    assert!(matches!(
        m.set_sort_direction("nope", SortDirection::Asc),
        Err(PivotError::DimensionNotFound(_))
    ));
}

#[test]
fn test_sort_axis_by_result() {
    let mut m = SalesFixture::matrix(SalesFixture::config());
    let gt = m.grand_total_key().to_string();

    m.sort_axis_by_result(AxisKind::Left, &gt, "sales", SortDirection::Asc);
    let first = m.left_axis().tree()[0];
    assert_eq!(m.left_axis().item(first).unwrap().name, "Mary");

    m.sort_axis_by_result(AxisKind::Top, &gt, "sales", SortDirection::Asc);
    let first = m.top_axis().tree()[0];
    assert_eq!(m.top_axis().item(first).unwrap().name, "Canada");
}

// ============================================================================
// VIEW
// ============================================================================

#[test]
fn test_view_grand_total_row() {
    let m = SalesFixture::matrix(SalesFixture::config());
    let usa = m.top_axis().key_for_path(&[Value::text("USA")]).unwrap();
    let field = m.view().field_for(&usa, "sales").unwrap().to_string();

    let last = m.view().rows.last().unwrap();
    assert_eq!(last.kind, RowKind::GrandTotal);
    assert_eq!(last.values.get(&field), Some(&Value::number(37.0)));
    assert_eq!(m.view().totals[0].values.get(&field), Some(&Value::number(37.0)));
}

#[test]
fn test_expand_collapse_regenerates_view() {
    let mut m = SalesFixture::matrix(SalesFixture::nested_config());
    let recorder = Recorder::default();
    m.add_listener(Box::new(recorder.clone()));
    let john = m.left_axis().key_for_path(&[Value::text("John")]).unwrap();

    // groups start collapsed
    assert!(m.view().row_by_key(&john, RowKind::GroupHeader).is_some());
    assert!(m.view().row_by_key(&john, RowKind::GroupTotal).is_none());

    m.expand(AxisKind::Left, &john).unwrap();
    assert!(m.left_axis().item_by_key(&john).unwrap().expanded);
    assert!(m.view().row_by_key(&john, RowKind::GroupTotal).is_some());
    assert_eq!(recorder.events.lock().unwrap().as_slice(), ["expand"]);

    m.collapse(AxisKind::Left, &john).unwrap();
    assert!(m.view().row_by_key(&john, RowKind::GroupTotal).is_none());

    assert!(matches!(m.expand(AxisKind::Left, "missing"), Err(PivotError::ItemNotFound(_))));
}

#[test]
fn test_records_for_cell() {
    let m = SalesFixture::matrix(SalesFixture::config());
    let john = m.left_axis().key_for_path(&[Value::text("John")]).unwrap();
    let usa = m.top_axis().key_for_path(&[Value::text("USA")]).unwrap();

    let sales: Vec<f64> = m
        .records_for(&john, &usa)
        .iter()
        .map(|r| r.get("sales").number_or_zero())
        .collect();
    assert_eq!(sales, vec![10.0, 20.0]);
}
