use thiserror::Error;

use crate::graph::{RouteId, StopId};

/// Errors raised by the route graph and the path engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// The stop is not a vertex of this route's subgraph.
    #[error("stop {stop} is not part of route {route}")]
    UnknownStop { route: RouteId, stop: StopId },

    /// Distances must be finite and non-negative.
    #[error("invalid distance {0}: must be a finite non-negative number")]
    InvalidWeight(f64),

    /// The ordered pair already has an edge.
    #[error("edge {origin} -> {destination} already exists")]
    Conflict { origin: StopId, destination: StopId },

    #[error("edge {origin} -> {destination} does not exist")]
    EdgeNotFound { origin: StopId, destination: StopId },

    #[error("stop {0} is already part of the route")]
    DuplicateStop(StopId),

    /// No directed path connects the two stops.
    #[error("no path from stop {from} to stop {to}")]
    Unreachable { from: StopId, to: StopId },
}

pub type GraphResult<T> = Result<T, GraphError>;
