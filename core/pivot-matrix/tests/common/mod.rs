//! FILENAME: tests/common/mod.rs
//! Fixtures and helpers for pivot-matrix integration tests.

#![allow(dead_code)]

use pivot_matrix::{
    DimensionConfig, LocalMatrix, Matrix, MatrixConfig, Record, RecordStore, Value,
};

/// Four sales records: John/USA 10, John/USA 20, John/Canada 5, Mary/USA 7.
pub struct SalesFixture;

impl SalesFixture {
    pub fn data() -> Vec<(&'static str, &'static str, f64)> {
        vec![
            ("John", "USA", 10.0),
            ("John", "USA", 20.0),
            ("John", "Canada", 5.0),
            ("Mary", "USA", 7.0),
        ]
    }

    pub fn records() -> Vec<Record> {
        Self::data()
            .into_iter()
            .map(|(person, country, sales)| {
                Record::new()
                    .with("person", person)
                    .with("country", country)
                    .with("sales", sales)
            })
            .collect()
    }

    pub fn store() -> RecordStore {
        RecordStore::from_records(Self::records())
    }

    /// person on rows, country on columns, sum of sales.
    pub fn config() -> MatrixConfig {
        MatrixConfig {
            time_between_jobs: 0,
            left_axis: vec![DimensionConfig::new("person").with_id("person")],
            top_axis: vec![DimensionConfig::new("country").with_id("country")],
            aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("sum")],
            ..MatrixConfig::default()
        }
    }

    /// person > country on rows, nothing on columns.
    pub fn nested_config() -> MatrixConfig {
        MatrixConfig {
            time_between_jobs: 0,
            left_axis: vec![
                DimensionConfig::new("person").with_id("person"),
                DimensionConfig::new("country").with_id("country"),
            ],
            aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("sum")],
            ..MatrixConfig::default()
        }
    }

    /// A calculated matrix over the fixture.
    pub fn matrix(config: MatrixConfig) -> LocalMatrix {
        let mut matrix = Matrix::local(config, Self::store()).expect("valid config");
        matrix.run_blocking().expect("calculation succeeds");
        matrix
    }
}

/// Resolves a cell by raw group values and reads one aggregate as a number.
pub fn number_at(matrix: &LocalMatrix, row: &[&str], col: &[&str], aggregate: &str) -> Option<f64> {
    let row: Vec<Value> = row.iter().map(|s| Value::text(*s)).collect();
    let col: Vec<Value> = col.iter().map(|s| Value::text(*s)).collect();
    matrix
        .result_by_path(&row, &col)
        .and_then(|r| r.value(aggregate))
        .and_then(Value::as_f64)
}

/// Every (left, top, aggregate, value) of a matrix, resolved through item
/// values so two runs can be compared regardless of generated keys.
pub fn snapshot(matrix: &LocalMatrix) -> Vec<(Vec<String>, Vec<String>, String, String)> {
    let path_of = |axis: &pivot_matrix::Axis, key: &str| -> Vec<String> {
        let mut path = Vec::new();
        let mut current = axis.item_by_key(key);
        while let Some(item) = current {
            path.push(item.value.to_string());
            current = item.parent.and_then(|p| axis.item(p));
        }
        path.reverse();
        path
    };

    let mut out: Vec<_> = matrix
        .results()
        .iter()
        .flat_map(|result| {
            let left = path_of(matrix.left_axis(), &result.left_key);
            let top = path_of(matrix.top_axis(), &result.top_key);
            result
                .values
                .iter()
                .map(move |(agg, value)| (left.clone(), top.clone(), agg.clone(), value.to_string()))
        })
        .collect();
    out.sort();
    out
}
