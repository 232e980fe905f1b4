use std::time::Instant;

use tour_graph_core::{check_weight, EdgeRecord, RouteGraph};
use tracing::{debug, warn};

use crate::error::{TourError, TourResult};
use crate::model::RouteId;
use crate::store::EntityStore;

/// Counters from one load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadStats {
    pub stop_count: usize,
    pub edge_count: usize,
    /// Neighbor rows left out: cross-route or invalid distance.
    pub skipped_rows: usize,
    pub load_time_ms: f64,
}

/// Build a route's subgraph from the store.
///
/// Reads the route (so a missing route fails with `NotFound`), its stops and
/// every neighbor row touching them. Rows with an endpoint outside the route
/// or with a negative or non-finite distance are skipped with a warning: the
/// gateway never writes them, only external writers can.
pub fn load_route_graph(
    store: &dyn EntityStore,
    route_id: RouteId,
    max_memory_mb: usize,
) -> TourResult<(RouteGraph, LoadStats)> {
    let start = Instant::now();

    store.get_route(route_id)?;
    let stops = store.get_stops_for_route(route_id)?;
    let neighbors = store.get_neighbors_for_route(route_id)?;

    let mut graph = RouteGraph::with_capacity(route_id, stops.len());
    for stop in &stops {
        graph.add_stop(stop.id, stop.name.clone())?;
    }

    let mut skipped_rows = 0;
    let mut records = Vec::with_capacity(neighbors.len());
    for row in neighbors {
        if !graph.contains_stop(row.origin) || !graph.contains_stop(row.destination) {
            warn!(
                route = route_id,
                origin = row.origin,
                destination = row.destination,
                "skipping cross-route neighbor row"
            );
            skipped_rows += 1;
            continue;
        }
        if check_weight(row.distance).is_err() {
            warn!(
                route = route_id,
                origin = row.origin,
                destination = row.destination,
                distance = row.distance,
                "skipping neighbor row with invalid distance"
            );
            skipped_rows += 1;
            continue;
        }
        records.push(EdgeRecord {
            origin: row.origin,
            destination: row.destination,
            distance: row.distance,
        });
    }
    graph.load_edges(records)?;

    let used_mb = graph.memory_usage() / (1024 * 1024);
    if used_mb > max_memory_mb {
        return Err(TourError::MemoryLimit {
            route: route_id,
            used_mb,
            limit_mb: max_memory_mb,
        });
    }

    let stats = LoadStats {
        stop_count: graph.stop_count(),
        edge_count: graph.edge_count(),
        skipped_rows,
        load_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    };
    debug!(
        route = route_id,
        stops = stats.stop_count,
        edges = stats.edge_count,
        skipped = skipped_rows,
        "route subgraph built"
    );
    Ok((graph, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewRoute, NewStop, NewUser, Neighbor};
    use crate::store::{MemoryStore, SqliteStore};

    fn two_routes(store: &dyn EntityStore) -> (RouteId, Vec<i64>, Vec<i64>) {
        let user = store
            .create_user(&NewUser {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                credential_hash: "h".into(),
            })
            .unwrap();
        let mut ids = Vec::new();
        let mut route_ids = Vec::new();
        for name in ["Norte", "Sur"] {
            let route = store
                .create_route(&NewRoute {
                    user_id: user.id,
                    name: name.into(),
                    description: None,
                })
                .unwrap();
            route_ids.push(route.id);
            let stops: Vec<i64> = ["A", "B"]
                .iter()
                .map(|s| {
                    store
                        .insert_stop(&NewStop {
                            route_id: route.id,
                            name: s.to_string(),
                            description: None,
                        })
                        .unwrap()
                        .id
                })
                .collect();
            ids.push(stops);
        }
        (route_ids[0], ids[0].clone(), ids[1].clone())
    }

    #[test]
    fn test_load_skips_cross_route_rows() {
        let store = MemoryStore::new();
        let (route, north, south) = two_routes(&store);
        for (o, d, w) in [(north[0], north[1], 4.0), (north[1], south[0], 1.0)] {
            store
                .insert_neighbor(&Neighbor {
                    origin: o,
                    destination: d,
                    distance: w,
                })
                .unwrap();
        }

        let (graph, stats) = load_route_graph(&store, route, 256).unwrap();
        assert_eq!(graph.stop_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge_weight(north[0], north[1]), Some(4.0));
        assert_eq!(stats.skipped_rows, 1);
    }

    #[test]
    fn test_load_missing_route() {
        let store = SqliteStore::in_memory().unwrap();
        let err = load_route_graph(&store, 42, 256).unwrap_err();
        assert!(matches!(err, TourError::NotFound { entity: "route", .. }));
    }

    #[test]
    fn test_load_empty_route() {
        let store = SqliteStore::in_memory().unwrap();
        let (route, north, _) = two_routes(&store);
        let (graph, stats) = load_route_graph(&store, route, 256).unwrap();
        assert_eq!(graph.stop_ids(), north);
        assert_eq!(stats.edge_count, 0);
        assert_eq!(stats.skipped_rows, 0);
    }
}
