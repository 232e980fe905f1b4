//! Query interface. Every route query runs on one immutable snapshot.

use serde::{Deserialize, Serialize};
use tour_graph_core::{degree_centrality, distances_from, shortest_path, Edge, RouteGraph};

use crate::error::{TourError, TourResult};
use crate::model::{Route, RouteId, Stop, StopId, User, UserId};
use crate::service::RouteGraphService;

/// Response of `shortest_path`: `{"path":[...],"distance":n}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResponse {
    pub path: Vec<StopId>,
    pub distance: f64,
}

impl PathResponse {
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// A stop reached from a source, with its minimum distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reach {
    pub stop: StopId,
    pub name: String,
    pub distance: f64,
    pub hops: u32,
}

/// One side of an edge as seen from a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub stop: StopId,
    pub name: String,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopConnections {
    pub stop: StopId,
    /// Edges leaving the stop, by destination id.
    pub outgoing: Vec<Connection>,
    /// Edges entering the stop, by origin id.
    pub incoming: Vec<Connection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRef {
    pub id: StopId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hub {
    pub stop: StopId,
    pub name: String,
    pub out_degree: u32,
    pub in_degree: u32,
    pub total_degree: u32,
}

fn stop_name(graph: &RouteGraph, stop: StopId) -> String {
    graph.stop(stop).map(|s| s.name.clone()).unwrap_or_default()
}

fn connections(graph: &RouteGraph, edges: impl Iterator<Item = Edge>) -> Vec<Connection> {
    edges
        .map(|e| Connection {
            stop: e.target,
            name: stop_name(graph, e.target),
            distance: e.weight,
        })
        .collect()
}

fn require_stop(graph: &RouteGraph, route: RouteId, stop: StopId) -> TourResult<()> {
    if graph.contains_stop(stop) {
        Ok(())
    } else {
        Err(TourError::UnknownStop { route, stop })
    }
}

impl RouteGraphService {
    /// Minimum-distance path from `source` to `target` within a route.
    ///
    /// `Unreachable` when no directed path exists, `UnknownStop` when either
    /// stop is not part of the route. Ties resolve to the same path for a
    /// given graph state: stops settle in (distance, stop id) order and the
    /// first settled predecessor is kept.
    pub fn shortest_path(
        &self,
        route: RouteId,
        source: StopId,
        target: StopId,
    ) -> TourResult<PathResponse> {
        let snap = self.snapshot(route)?;
        let path = shortest_path(&snap.graph, source, target)?;
        Ok(PathResponse {
            path: path.stops,
            distance: path.distance,
        })
    }

    /// Every stop reachable from `source`, by ascending (distance, stop id).
    /// The source itself comes first with distance 0.
    pub fn distances_from(&self, route: RouteId, source: StopId) -> TourResult<Vec<Reach>> {
        let snap = self.snapshot(route)?;
        let reached = distances_from(&snap.graph, source)?;
        Ok(reached
            .into_iter()
            .map(|r| Reach {
                stop: r.stop,
                name: stop_name(&snap.graph, r.stop),
                distance: r.distance,
                hops: r.hops,
            })
            .collect())
    }

    pub fn stop_connections(&self, route: RouteId, stop: StopId) -> TourResult<StopConnections> {
        let snap = self.snapshot(route)?;
        let graph = &snap.graph;
        require_stop(graph, route, stop)?;
        Ok(StopConnections {
            stop,
            outgoing: connections(graph, graph.neighbors_out(stop)),
            incoming: connections(graph, graph.neighbors_in(stop)),
        })
    }

    /// Stops of the route `stop` has no outgoing edge to yet, by id.
    pub fn available_targets(&self, route: RouteId, stop: StopId) -> TourResult<Vec<StopRef>> {
        let snap = self.snapshot(route)?;
        let graph = &snap.graph;
        require_stop(graph, route, stop)?;
        Ok(graph
            .stop_ids()
            .into_iter()
            .filter(|&id| id != stop && graph.edge_weight(stop, id).is_none())
            .map(|id| StopRef {
                id,
                name: stop_name(graph, id),
            })
            .collect())
    }

    /// Stops ranked by total degree, ties by stop id. `top_n` of 0 returns
    /// every stop.
    pub fn hubs(&self, route: RouteId, top_n: usize) -> TourResult<Vec<Hub>> {
        let snap = self.snapshot(route)?;
        Ok(degree_centrality(&snap.graph, top_n)
            .into_iter()
            .map(|d| Hub {
                stop: d.stop,
                name: d.name,
                out_degree: d.out_degree,
                in_degree: d.in_degree,
                total_degree: d.total_degree,
            })
            .collect())
    }

    // Record lookups. Served by the store, not the index.

    pub fn get_user(&self, user: UserId) -> TourResult<User> {
        Ok(self.store.get_user(user)?)
    }

    pub fn get_route(&self, route: RouteId) -> TourResult<Route> {
        Ok(self.store.get_route(route)?)
    }

    /// Routes of a user, newest first.
    pub fn routes_for_user(&self, user: UserId) -> TourResult<Vec<Route>> {
        self.store.get_user(user)?;
        Ok(self.store.routes_for_user(user)?)
    }

    /// Stops of a route, by id.
    pub fn stops_for_route(&self, route: RouteId) -> TourResult<Vec<Stop>> {
        self.store.get_route(route)?;
        Ok(self.store.get_stops_for_route(route)?)
    }
}
