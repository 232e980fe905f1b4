use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{GraphError, GraphResult};
use crate::graph::{RouteGraph, StopId};

/// Minimum-distance path between two stops.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPath {
    /// Stops from source to target, inclusive.
    pub stops: Vec<StopId>,
    /// Sum of edge distances along `stops`.
    pub distance: f64,
}

impl WeightedPath {
    /// Path for source == target.
    pub fn single(stop: StopId) -> Self {
        Self {
            stops: vec![stop],
            distance: 0.0,
        }
    }

    pub fn hops(&self) -> usize {
        self.stops.len().saturating_sub(1)
    }
}

/// A stop reached by single-source search.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachedStop {
    pub stop: StopId,
    pub distance: f64,
    /// Edge count of the chosen shortest path.
    pub hops: u32,
}

/// Degree information for a single stop.
#[derive(Debug, Clone, PartialEq)]
pub struct DegreeResult {
    pub stop: StopId,
    pub name: String,
    pub out_degree: u32,
    pub in_degree: u32,
    pub total_degree: u32,
}

/// Priority queue entry. Pops in ascending (distance, stop id) order.
#[derive(Debug, Clone, Copy)]
struct Frontier {
    distance: f64,
    stop: StopId,
    slot: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse both keys.
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.stop.cmp(&self.stop))
    }
}

/// Per-slot search state, indexed by arena slot.
struct Search {
    distance: Vec<Option<f64>>,
    parent: Vec<Option<usize>>,
    hops: Vec<u32>,
    settled: Vec<bool>,
}

/// Dijkstra relaxation from `source`, stopping early once `stop_at` is settled.
///
/// Stops are settled in ascending (distance, stop id) order and adjacency
/// lists are sorted by stop id. A tentative distance is only replaced by a
/// strictly smaller one, so among equal-distance predecessors the one settled
/// first wins. The result is therefore a function of the graph alone.
///
/// Settled stops are never re-expanded, which bounds the loop on cyclic
/// graphs; non-negative weights guarantee a settled distance is final.
fn dijkstra(graph: &RouteGraph, source: usize, stop_at: Option<usize>) -> Search {
    let n = graph.slot_capacity();
    let mut search = Search {
        distance: vec![None; n],
        parent: vec![None; n],
        hops: vec![0; n],
        settled: vec![false; n],
    };

    let mut heap = BinaryHeap::new();
    search.distance[source] = Some(0.0);
    heap.push(Frontier {
        distance: 0.0,
        stop: graph.stop_at(source),
        slot: source,
    });

    while let Some(Frontier { distance, slot, .. }) = heap.pop() {
        if search.settled[slot] {
            continue;
        }
        search.settled[slot] = true;
        if Some(slot) == stop_at {
            break;
        }

        for link in graph.out_links(slot) {
            if search.settled[link.slot] {
                continue;
            }
            let candidate = distance + link.weight;
            let improves = match search.distance[link.slot] {
                Some(current) => candidate < current,
                None => true,
            };
            if improves {
                search.distance[link.slot] = Some(candidate);
                search.parent[link.slot] = Some(slot);
                search.hops[link.slot] = search.hops[slot] + 1;
                heap.push(Frontier {
                    distance: candidate,
                    stop: link.stop,
                    slot: link.slot,
                });
            }
        }
    }

    search
}

/// Minimum-total-distance path from `source` to `target`.
///
/// Errors: `UnknownStop` if either id is not a vertex of the route,
/// `Unreachable` if no directed path exists. source == target yields a
/// single-element path of distance 0.
pub fn shortest_path(graph: &RouteGraph, source: StopId, target: StopId) -> GraphResult<WeightedPath> {
    let unknown = |stop| GraphError::UnknownStop {
        route: graph.route_id(),
        stop,
    };
    let from = graph.slot_of(source).ok_or_else(|| unknown(source))?;
    let to = graph.slot_of(target).ok_or_else(|| unknown(target))?;

    if from == to {
        return Ok(WeightedPath::single(source));
    }

    let search = dijkstra(graph, from, Some(to));
    let distance = match (search.settled[to], search.distance[to]) {
        (true, Some(d)) => d,
        _ => {
            return Err(GraphError::Unreachable {
                from: source,
                to: target,
            })
        }
    };

    // Walk parent pointers back to the source.
    let mut stops = Vec::with_capacity(search.hops[to] as usize + 1);
    let mut current = Some(to);
    while let Some(slot) = current {
        stops.push(graph.stop_at(slot));
        current = search.parent[slot];
    }
    stops.reverse();

    Ok(WeightedPath { stops, distance })
}

/// Single-source shortest distances from `source` to every reachable stop.
///
/// The source itself is included at distance 0. Sorted by (distance, stop id).
pub fn distances_from(graph: &RouteGraph, source: StopId) -> GraphResult<Vec<ReachedStop>> {
    let from = graph.slot_of(source).ok_or(GraphError::UnknownStop {
        route: graph.route_id(),
        stop: source,
    })?;

    let search = dijkstra(graph, from, None);
    let mut reached: Vec<ReachedStop> = (0..graph.slot_capacity())
        .filter(|&slot| search.settled[slot])
        .filter_map(|slot| {
            search.distance[slot].map(|distance| ReachedStop {
                stop: graph.stop_at(slot),
                distance,
                hops: search.hops[slot],
            })
        })
        .collect();

    reached.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.stop.cmp(&b.stop)));
    Ok(reached)
}

/// Return stops ranked by degree (total connections).
///
/// If `top_n` is 0, returns all stops. Otherwise returns the top N by
/// total degree (descending). Ties are broken by stop id (ascending).
pub fn degree_centrality(graph: &RouteGraph, top_n: usize) -> Vec<DegreeResult> {
    let mut results: Vec<DegreeResult> = graph
        .vertices_iter()
        .map(|v| {
            let out_degree = v.outgoing.len() as u32;
            let in_degree = v.incoming.len() as u32;
            DegreeResult {
                stop: v.stop,
                name: v.info.name.clone(),
                out_degree,
                in_degree,
                total_degree: out_degree + in_degree,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.total_degree
            .cmp(&a.total_degree)
            .then(a.stop.cmp(&b.stop))
    });

    if top_n > 0 && top_n < results.len() {
        results.truncate(top_n);
    }

    results
}
