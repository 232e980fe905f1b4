//! Public error taxonomy of the route graph service.

use thiserror::Error;
use tour_graph_core::GraphError;

use crate::model::{RouteId, StopId};
use crate::store::StoreError;

/// Errors surfaced by the gateway and the query interface.
#[derive(Debug, Error)]
pub enum TourError {
    /// A referenced user, route, stop or neighbor row does not exist.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// The stop is not part of the addressed route's subgraph.
    #[error("stop {stop} is not part of route {route}")]
    UnknownStop { route: RouteId, stop: StopId },

    #[error("invalid distance {0}: must be a finite non-negative number")]
    InvalidWeight(f64),

    /// No directed path connects the two stops. An expected outcome.
    #[error("no path from stop {from} to stop {to}")]
    Unreachable { from: StopId, to: StopId },

    #[error(transparent)]
    Store(StoreError),

    /// Duplicate key: edge pair, email, route or stop name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input rejected before reaching the store.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("route {route} subgraph uses {used_mb}MB, exceeds max_memory_mb={limit_mb}MB")]
    MemoryLimit {
        route: RouteId,
        used_mb: usize,
        limit_mb: usize,
    },
}

impl TourError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// True for `Unreachable`, which callers treat as a normal answer.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl From<StoreError> for TourError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, key } => Self::NotFound { entity, key },
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

impl From<GraphError> for TourError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::UnknownStop { route, stop } => Self::UnknownStop { route, stop },
            GraphError::InvalidWeight(w) => Self::InvalidWeight(w),
            GraphError::Conflict { .. } | GraphError::DuplicateStop(_) => {
                Self::Conflict(err.to_string())
            }
            GraphError::EdgeNotFound {
                origin,
                destination,
            } => Self::not_found("neighbor", format!("{origin} -> {destination}")),
            GraphError::Unreachable { from, to } => Self::Unreachable { from, to },
        }
    }
}

pub type TourResult<T> = Result<T, TourError>;
