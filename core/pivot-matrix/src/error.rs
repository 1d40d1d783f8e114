//! FILENAME: core/pivot-matrix/src/error.rs

use thiserror::Error;
use crate::store::RecordId;

/// Canonical result for the matrix crate.
pub type Result<T> = std::result::Result<T, PivotError>;

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("dimension '{0}' has no dataIndex")]
    MissingDataIndex(String),

    #[error("value filter on dimension '{0}' has no dimensionId")]
    MissingFilterDimension(String),

    #[error("value filter on dimension '{dimension}' references unknown aggregate '{aggregate}'")]
    UnknownAggregateDimension { dimension: String, aggregate: String },

    #[error("duplicate dimension id: {0}")]
    DuplicateDimension(String),

    #[error("dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("axis item not found: {0}")]
    ItemNotFound(String),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("aggregator not found: {0}")]
    AggregatorNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote aggregation reported failure")]
    RemoteFailure,

    #[error("malformed remote response: {0}")]
    MalformedResponse(String),
}
