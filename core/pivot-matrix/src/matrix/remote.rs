//! FILENAME: core/pivot-matrix/src/matrix/remote.rs
//! Remote strategy: a server computes the axes and cell values.
//!
//! The request carries the separator, the grand total key and the three
//! dimension lists. The server answers with axis items and results whose
//! keys follow the same conventions; they are loaded as-is and the local
//! side only builds and sorts the trees.
//!
//! A response is applied only if its ticket still names the current cycle.
//! A failed or malformed response resets the matrix to empty.

use std::future::Future;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use super::{CycleTicket, Matrix, MatrixCore, MatrixStrategy};
use crate::axis::AxisItemConfig;
use crate::definition::{DimensionConfig, MatrixConfig};
use crate::error::{PivotError, Result};
use crate::value::Value;
use crate::{log_info, log_warn};

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequest {
    pub keys_separator: String,
    pub grand_total_key: String,
    pub left_axis: Vec<DimensionConfig>,
    pub top_axis: Vec<DimensionConfig>,
    pub aggregate: Vec<DimensionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResult {
    pub left_key: String,
    pub top_key: String,
    #[serde(default)]
    pub values: FxHashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResponse {
    pub success: bool,
    #[serde(default)]
    pub left_axis: Vec<AxisItemConfig>,
    #[serde(default)]
    pub top_axis: Vec<AxisItemConfig>,
    #[serde(default)]
    pub results: Vec<RemoteResult>,
}

/// Sends a request and resolves to the raw JSON payload.
pub trait Transport {
    fn send(&self, request: &RemoteRequest) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Applied,
    /// The response belonged to a superseded cycle and was ignored.
    Stale,
}

// ============================================================================
// STRATEGY
// ============================================================================

#[derive(Debug, Default)]
pub struct RemoteStrategy;

impl MatrixStrategy for RemoteStrategy {
    type Batch = RemoteResponse;

    fn classify(&mut self, core: &mut MatrixCore, response: RemoteResponse) -> Result<()> {
        for item in response.left_axis {
            core.left.add_item(item)?;
        }
        for item in response.top_axis {
            core.top.add_item(item)?;
        }
        for result in response.results {
            core.results.load_values(&result.left_key, &result.top_key, result.values);
        }
        Ok(())
    }

    fn aggregate(&mut self, _core: &mut MatrixCore) -> Result<()> {
        Ok(())
    }

    fn build_tree(&mut self, core: &mut MatrixCore) -> Result<bool> {
        core.left.build_tree();
        core.top.build_tree();
        Ok(false)
    }
}

// ============================================================================
// REMOTE MATRIX
// ============================================================================

impl Matrix<RemoteStrategy> {
    pub fn remote(config: MatrixConfig) -> Result<Self> {
        Matrix::new(config, RemoteStrategy)
    }

    /// Starts a cycle and builds the request for it.
    pub fn prepare_request(&mut self) -> (CycleTicket, RemoteRequest) {
        let ticket = self.begin_cycle();
        let core = &self.core;
        let request = RemoteRequest {
            keys_separator: core.config.keys_separator.clone(),
            grand_total_key: core.config.grand_total_key.clone(),
            left_axis: core.left.dimensions().iter().map(|d| d.to_config()).collect(),
            top_axis: core.top.dimensions().iter().map(|d| d.to_config()).collect(),
            aggregate: core.aggregates.iter().map(|d| d.to_config()).collect(),
        };
        (ticket, request)
    }

    /// Applies a server payload (or the transport error) to the cycle named
    /// by `ticket`.
    pub fn apply_response(
        &mut self,
        ticket: CycleTicket,
        payload: Result<serde_json::Value>,
    ) -> Result<ResponseOutcome> {
        if !self.is_current(ticket) {
            log_warn!("MATRIX", "ignoring response of superseded cycle {}", ticket.generation());
            return Ok(ResponseOutcome::Stale);
        }

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(e)),
        };
        let response: RemoteResponse = match serde_json::from_value(payload) {
            Ok(response) => response,
            Err(e) => return Err(self.fail(PivotError::MalformedResponse(e.to_string()))),
        };
        if !response.success {
            return Err(self.fail(PivotError::RemoteFailure));
        }

        log_info!(
            "MATRIX",
            "remote response: {} left items, {} top items, {} results",
            response.left_axis.len(),
            response.top_axis.len(),
            response.results.len()
        );
        self.feed(ticket, response)?;
        self.finish(ticket)?;
        Ok(ResponseOutcome::Applied)
    }

    /// Requests fresh data through `transport` and applies it.
    pub async fn reload<T: Transport>(&mut self, transport: &T) -> Result<ResponseOutcome> {
        let (ticket, request) = self.prepare_request();
        let payload = transport.send(&request).await;
        self.apply_response(ticket, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CycleState;
    use serde_json::json;

    fn config() -> MatrixConfig {
        MatrixConfig {
            left_axis: vec![DimensionConfig::new("person").with_id("person")],
            top_axis: vec![DimensionConfig::new("country").with_id("country")],
            aggregate: vec![DimensionConfig::new("sales").with_id("sales").with_aggregator("sum")],
            ..MatrixConfig::default()
        }
    }

    fn payload() -> serde_json::Value {
        json!({
            "success": true,
            "leftAxis": [
                { "key": "k1", "value": "John", "dimensionId": "person" },
                { "key": "k2", "value": "Mary", "dimensionId": "person" }
            ],
            "topAxis": [
                { "key": "k3", "value": "USA", "dimensionId": "country" }
            ],
            "results": [
                { "leftKey": "grandtotal", "topKey": "grandtotal", "values": { "sales": 37 } },
                { "leftKey": "k1", "topKey": "k3", "values": { "sales": 30 } },
                { "leftKey": "k2", "topKey": "k3", "values": { "sales": 7 } }
            ]
        })
    }

    #[test]
    fn test_request_carries_configuration() {
        let mut m = Matrix::remote(config()).unwrap();
        let (_, request) = m.prepare_request();
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["keysSeparator"], "#_#");
        assert_eq!(wire["grandTotalKey"], "grandtotal");
        assert_eq!(wire["leftAxis"][0]["dataIndex"], "person");
        assert_eq!(wire["aggregate"][0]["aggregator"], "sum");
        assert_eq!(m.state(), CycleState::Collecting);
    }

    #[test]
    fn test_apply_loads_items_and_values() {
        let mut m = Matrix::remote(config()).unwrap();
        let (ticket, _) = m.prepare_request();
        let outcome = m.apply_response(ticket, Ok(payload())).unwrap();
        assert_eq!(outcome, ResponseOutcome::Applied);
        assert_eq!(m.state(), CycleState::Done);
        assert_eq!(m.left_axis().len(), 2);
        assert_eq!(m.value("k1", "k3", "sales"), Some(&Value::number(30.0)));
        assert_eq!(m.value("grandtotal", "grandtotal", "sales"), Some(&Value::number(37.0)));
    }

    #[test]
    fn test_failure_resets_matrix() {
        let mut m = Matrix::remote(config()).unwrap();
        let (ticket, _) = m.prepare_request();
        m.apply_response(ticket, Ok(payload())).unwrap();

        let (ticket, _) = m.prepare_request();
        let err = m.apply_response(ticket, Ok(json!({ "success": false }))).unwrap_err();
        assert!(matches!(err, PivotError::RemoteFailure));
        assert_eq!(m.state(), CycleState::Failed);
        assert!(m.results().is_empty());
        assert!(m.left_axis().is_empty());
    }

    #[test]
    fn test_unknown_dimension_is_rejected_whole() {
        let mut m = Matrix::remote(config()).unwrap();
        let (ticket, _) = m.prepare_request();
        let bad = json!({
            "success": true,
            "leftAxis": [{ "key": "k1", "value": "John", "dimensionId": "nope" }],
            "results": [{ "leftKey": "k1", "topKey": "grandtotal", "values": { "sales": 1 } }]
        });
        let err = m.apply_response(ticket, Ok(bad)).unwrap_err();
        assert!(matches!(err, PivotError::DimensionNotFound(_)));
        assert!(m.results().is_empty());
    }
}
