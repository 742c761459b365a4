use thiserror::Error;

use crate::model::{BeaconId, RequestId};

/// Why a completion analysis did not produce a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// The snapshot handed to the scheduler was unusable.
    #[error("invalid input for request {request}: {reason}")]
    InvalidInput { request: RequestId, reason: InputFault },
    /// The kernel produced a value the analysis could not use, or the analysis panicked.
    #[error("geometry failure in request {request}: {detail}")]
    Geometry { request: RequestId, detail: String },
}

impl AnalysisError {
    pub fn request(&self) -> RequestId {
        match self {
            AnalysisError::InvalidInput { request, .. } | AnalysisError::Geometry { request, .. } => *request,
        }
    }

    pub fn is_input_error(&self) -> bool {
        matches!(self, AnalysisError::InvalidInput { .. })
    }

    pub(crate) fn with_request(self, id: RequestId) -> Self {
        match self {
            AnalysisError::InvalidInput { reason, .. } => AnalysisError::InvalidInput { request: id, reason },
            AnalysisError::Geometry { detail, .. } => AnalysisError::Geometry { request: id, detail },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputFault {
    #[error("beacon {0} has a non-finite or out-of-range coordinate")]
    BadCoordinate(BeaconId),
    #[error("beacon {0} appears more than once")]
    DuplicateId(BeaconId),
    #[error("viewport bounds are not finite")]
    BadViewport,
    #[error("{0} beacons exceeds the ingestion cap")]
    TooMany(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("region size {region_size} must be at least the largest cell size {cell_size}")]
    RegionSmallerThanCell { region_size: f32, cell_size: f32 },
}
