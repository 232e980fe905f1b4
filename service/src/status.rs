use serde::{Deserialize, Serialize};

use crate::error::TourResult;
use crate::index::RouteSnapshot;
use crate::model::RouteId;
use crate::service::RouteGraphService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Loaded,
    Stale,
    NotLoaded,
}

/// Index state of one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStatus {
    pub route_id: RouteId,
    pub status: LoadState,
    pub stop_count: usize,
    pub edge_count: usize,
    pub memory_bytes: usize,
    pub revision: u64,
    pub loaded_generation: u64,
    pub current_generation: u64,
    pub is_stale: bool,
    pub load_time_ms: f64,
}

impl RouteStatus {
    fn from_snapshot(route_id: RouteId, snap: &RouteSnapshot, current_generation: u64) -> Self {
        let is_stale = snap.loaded_generation < current_generation;
        Self {
            route_id,
            status: if is_stale {
                LoadState::Stale
            } else {
                LoadState::Loaded
            },
            stop_count: snap.graph.stop_count(),
            edge_count: snap.graph.edge_count(),
            memory_bytes: snap.graph.memory_usage(),
            revision: snap.revision,
            loaded_generation: snap.loaded_generation,
            current_generation,
            is_stale,
            load_time_ms: snap.load_time_ms,
        }
    }
}

impl RouteGraphService {
    /// Index state of a route. Never triggers a load; a route that exists
    /// but is not cached reports `not_loaded`.
    pub fn route_status(&self, route: RouteId) -> TourResult<RouteStatus> {
        let current_generation = self.generations.current(route);
        if let Some(snap) = self.index.snapshot(route) {
            return Ok(RouteStatus::from_snapshot(route, &snap, current_generation));
        }
        self.store.get_route(route)?;
        Ok(RouteStatus {
            route_id: route,
            status: LoadState::NotLoaded,
            stop_count: 0,
            edge_count: 0,
            memory_bytes: 0,
            revision: 0,
            loaded_generation: 0,
            current_generation,
            is_stale: false,
            load_time_ms: 0.0,
        })
    }

    /// One row per cached route, ascending by route id.
    pub fn index_status(&self) -> Vec<RouteStatus> {
        self.index
            .snapshots()
            .into_iter()
            .map(|(route, snap)| {
                RouteStatus::from_snapshot(route, &snap, self.generations.current(route))
            })
            .collect()
    }
}
