use std::sync::Arc;
use std::time::Instant;

use tour_graph::model::{NewRoute, NewStop, NewUser};
use tour_graph::{
    EntityStore, Neighbor, RouteGraphService, RouteId, ServiceConfig, SqliteStore, StopId,
    TourResult,
};
use tour_graph_core::RouteGraph;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("info")
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = std::env::args().collect();

    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("all");
    let stop_count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    if mode == "help" || mode == "--help" {
        println!("Usage: tour-graph-bench [mode] [stop_count]");
        println!();
        println!("Modes:");
        println!("  all      Run every generator, then the service benchmark (default)");
        println!("  chain    Linear route with occasional shortcuts (long paths)");
        println!("  grid     City-block grid, both directions, uneven distances");
        println!("  random   Uniform random edges, four per stop");
        println!("  service  Full service over an in-memory SQLite store");
        println!();
        println!("Default stop_count: 10000");
        return;
    }

    println!("tour-graph-bench");
    println!("================");
    println!();

    let generators: Vec<(&str, fn(u64) -> RouteGraph)> = match mode {
        "chain" => vec![("Chain with shortcuts", gen_chain)],
        "grid" => vec![("City-block grid", gen_grid)],
        "random" => vec![("Uniform random", gen_random)],
        "service" => Vec::new(),
        "all" => vec![
            ("Chain with shortcuts", gen_chain as fn(u64) -> RouteGraph),
            ("City-block grid", gen_grid),
            ("Uniform random", gen_random),
        ],
        _ => {
            eprintln!("Unknown mode: {}. Use --help for options.", mode);
            return;
        }
    };

    for (name, generator) in generators {
        run_benchmark(name, generator, stop_count);
    }

    if mode == "service" || mode == "all" {
        if let Err(err) = run_service(stop_count) {
            eprintln!("service benchmark failed: {err}");
            std::process::exit(1);
        }
    }
}

fn ms(t: Instant) -> f64 {
    t.elapsed().as_secs_f64() * 1000.0
}

fn run_benchmark(name: &str, generator: fn(u64) -> RouteGraph, stop_count: u64) {
    println!("--- {} ---", name);
    println!("Target: {} stops", stop_count);

    let t = Instant::now();
    let graph = generator(stop_count);
    println!(
        "Generated in {:.1}ms: {} stops, {} edges, ~{:.1}MB",
        ms(t),
        graph.stop_count(),
        graph.edge_count(),
        graph.memory_usage() as f64 / 1_048_576.0
    );

    let ids = graph.stop_ids();
    let (Some(&first), Some(&last)) = (ids.first(), ids.last()) else {
        println!("(empty graph)");
        println!();
        return;
    };

    // Single-source sweep from a few spread-out stops
    println!();
    println!("{:>10} {:>10} {:>14} {:>10}", "source", "reached", "max distance", "time");
    println!("{:->10} {:->10} {:->14} {:->10}", "", "", "", "");
    for source in [first, ids[ids.len() / 4], ids[ids.len() / 2], last] {
        let t = Instant::now();
        match tour_graph_core::distances_from(&graph, source) {
            Ok(reached) => {
                let max = reached.last().map_or(0.0, |r| r.distance);
                println!(
                    "{:>10} {:>10} {:>14.1} {:>8.1}ms",
                    source,
                    reached.len(),
                    max,
                    ms(t)
                );
            }
            Err(err) => println!("{:>10} error: {}", source, err),
        }
    }

    // Point-to-point: first stop to last, then a few random pairs
    println!();
    let mut rng = FastRng::new(7);
    let mut pairs = vec![(first, last)];
    for _ in 0..4 {
        let a = ids[rng.next(ids.len() as u64) as usize];
        let b = ids[rng.next(ids.len() as u64) as usize];
        pairs.push((a, b));
    }
    for (source, target) in pairs {
        let t = Instant::now();
        let result = tour_graph_core::shortest_path(&graph, source, target);
        let elapsed = ms(t);
        match result {
            Ok(p) => println!(
                "Shortest path {} → {}: {} hops, distance {:.1} in {:.1}ms",
                source,
                target,
                p.hops(),
                p.distance,
                elapsed
            ),
            Err(err) => println!("Shortest path {} → {}: {} ({:.1}ms)", source, target, err, elapsed),
        }
    }
    println!();
}

/// Seeds a route straight into the store, then times the service phases:
/// cold load, gateway mutations and snapshot queries.
fn run_service(stop_count: u64) -> TourResult<()> {
    println!("--- Service (in-memory SQLite) ---");
    println!("Target: {} stops", stop_count);

    let store = Arc::new(SqliteStore::in_memory()?);
    let service = RouteGraphService::new(store, ServiceConfig::default());

    let t = Instant::now();
    let user = service.store().create_user(&NewUser {
        name: "Bench".into(),
        email: "bench@example.com".into(),
        credential_hash: "bench".into(),
    })?;
    let route = service.store().create_route(&NewRoute {
        user_id: user.id,
        name: "Bench route".into(),
        description: None,
    })?;
    let mut stops: Vec<StopId> = Vec::with_capacity(stop_count as usize);
    for i in 0..stop_count {
        let stop = service.store().insert_stop(&NewStop {
            route_id: route.id,
            name: format!("Stop {i}"),
            description: None,
        })?;
        stops.push(stop.id);
    }
    let mut rng = FastRng::new(42);
    let mut edges = 0usize;
    for (i, &origin) in stops.iter().enumerate() {
        if let Some(&next) = stops.get(i + 1) {
            service.store().insert_neighbor(&Neighbor {
                origin,
                destination: next,
                distance: 1.0 + rng.next(10) as f64,
            })?;
            edges += 1;
        }
        let jump = stops[rng.next(stops.len() as u64) as usize];
        if jump != origin && jump != stops.get(i + 1).copied().unwrap_or(origin) {
            service.store().insert_neighbor(&Neighbor {
                origin,
                destination: jump,
                distance: 5.0 + rng.next_f64() * 50.0,
            })?;
            edges += 1;
        }
    }
    println!("Seeded store in {:.1}ms: {} stops, {} edges", ms(t), stops.len(), edges);

    let t = Instant::now();
    let stats = service.load(route.id)?;
    println!(
        "Loaded route {} in {:.1}ms: {} stops, {} edges, {} skipped",
        route.id,
        ms(t),
        stats.stop_count,
        stats.edge_count,
        stats.skipped_rows
    );

    let t = Instant::now();
    let mutations = gateway_mutations(&service, route.id, stops.first().copied())?;
    println!("Gateway mutations ({}) in {:.1}ms", mutations, ms(t));

    let (Some(&first), Some(&last)) = (stops.first(), stops.last()) else {
        println!();
        return Ok(());
    };

    let t = Instant::now();
    let reached = service.distances_from(route.id, first)?;
    println!("distances_from {}: {} reached in {:.1}ms", first, reached.len(), ms(t));

    let t = Instant::now();
    let response = service.shortest_path(route.id, first, last);
    let elapsed = ms(t);
    match response {
        Ok(path) => {
            println!(
                "shortest_path {} → {}: {} hops in {:.1}ms",
                first,
                last,
                path.hops(),
                elapsed
            );
            let sample = tour_graph::PathResponse {
                path: path.path.iter().take(8).copied().collect(),
                distance: path.distance,
            };
            if let Ok(json) = serde_json::to_string(&sample) {
                println!("Response sample (first 8 stops): {}", json);
            }
        }
        Err(err) if err.is_unreachable() => {
            println!("shortest_path {} → {}: unreachable ({:.1}ms)", first, last, elapsed)
        }
        Err(err) => return Err(err),
    }

    let hubs = service.hubs(route.id, 3)?;
    for hub in &hubs {
        info!(stop = hub.stop, degree = hub.total_degree, "hub");
    }

    let t = Instant::now();
    let plan = service.remove_route(route.id)?;
    println!("Removed route in {:.1}ms ({} rows)", ms(t), plan.len());
    println!();
    Ok(())
}

/// Adds two stops and toggles an edge between them, linking `entry` to the
/// first one when given. Returns how many mutations ran.
fn gateway_mutations(
    service: &RouteGraphService,
    route: RouteId,
    entry: Option<StopId>,
) -> TourResult<usize> {
    let mut mutations = 0;
    let a = service.add_stop(route, "Bench A", None)?;
    let b = service.add_stop(route, "Bench B", None)?;
    mutations += 2;
    if let Some(entry) = entry {
        service.add_neighbor(route, entry, a.id, 0.5)?;
        mutations += 1;
    }
    service.add_neighbor(route, a.id, b.id, 0.5)?;
    service.remove_neighbor(route, a.id, b.id)?;
    mutations += 2;
    Ok(mutations)
}

// ---------------------------------------------------------------------------
// Generators: O(stops + edges), single-threaded, deterministic
// ---------------------------------------------------------------------------

/// Simple LCG for deterministic, fast pseudo-random numbers.
struct FastRng(u64);

impl FastRng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next(&mut self, max: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 33) % max
    }
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn with_stops(stop_count: u64) -> RouteGraph {
    let mut graph = RouteGraph::with_capacity(1, stop_count as usize);
    for id in 1..=stop_count as StopId {
        let _ = graph.add_stop(id, format!("Stop {id}"));
    }
    graph
}

/// Adds the edge unless it is a self-loop or already present.
fn connect(graph: &mut RouteGraph, origin: StopId, destination: StopId, distance: f64) {
    if origin != destination && graph.edge_weight(origin, destination).is_none() {
        let _ = graph.add_edge(origin, destination, distance);
    }
}

/// Linear route 1 → 2 → ... → n with a forward shortcut every ~20 stops
/// and a sparse set of return legs.
fn gen_chain(stop_count: u64) -> RouteGraph {
    let mut rng = FastRng::new(1);
    let mut graph = with_stops(stop_count);
    let n = stop_count as StopId;
    for id in 1..n {
        connect(&mut graph, id, id + 1, 1.0 + rng.next(5) as f64);
        if rng.next(20) == 0 {
            let skip = 2 + rng.next(30) as StopId;
            connect(&mut graph, id, (id + skip).min(n), 2.0 + rng.next_f64() * 40.0);
        }
        if rng.next(50) == 0 {
            connect(&mut graph, id + 1, 1 + rng.next(id as u64) as StopId, 10.0);
        }
    }
    graph
}

/// Square grid of blocks; every street runs both ways with different
/// distances per direction.
fn gen_grid(stop_count: u64) -> RouteGraph {
    let mut rng = FastRng::new(2);
    let side = ((stop_count as f64).sqrt() as u64).max(1);
    let mut graph = with_stops(side * side);
    let id = |row: u64, col: u64| (row * side + col + 1) as StopId;
    for row in 0..side {
        for col in 0..side {
            if col + 1 < side {
                connect(&mut graph, id(row, col), id(row, col + 1), 1.0 + rng.next_f64() * 4.0);
                connect(&mut graph, id(row, col + 1), id(row, col), 1.0 + rng.next_f64() * 4.0);
            }
            if row + 1 < side {
                connect(&mut graph, id(row, col), id(row + 1, col), 1.0 + rng.next_f64() * 4.0);
                connect(&mut graph, id(row + 1, col), id(row, col), 1.0 + rng.next_f64() * 4.0);
            }
        }
    }
    graph
}

/// Four uniform random out-edges per stop.
fn gen_random(stop_count: u64) -> RouteGraph {
    let mut rng = FastRng::new(3);
    let mut graph = with_stops(stop_count);
    if stop_count == 0 {
        return graph;
    }
    for origin in 1..=stop_count as StopId {
        for _ in 0..4 {
            let destination = 1 + rng.next(stop_count) as StopId;
            connect(&mut graph, origin, destination, rng.next_f64() * 100.0);
        }
    }
    graph
}
