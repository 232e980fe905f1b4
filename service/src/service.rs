use std::sync::Arc;
use std::time::Duration;

use tour_graph_core::{GraphResult, RouteGraph};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{TourError, TourResult};
use crate::generation::{check_freshness, Freshness, Generations};
use crate::index::{AdjacencyIndex, RouteSlot, RouteSnapshot};
use crate::load::{load_route_graph, LoadStats};
use crate::model::RouteId;
use crate::store::EntityStore;

/// Route graph service: entity store + adjacency index + path engine.
///
/// Mutations (see `gateway`) go through the store first and are published to
/// the index only once persisted. Queries (see `path`) run on immutable
/// per-route snapshots. The value is `Send + Sync`; share it with `Arc`.
pub struct RouteGraphService {
    pub(crate) store: Arc<dyn EntityStore>,
    pub(crate) index: AdjacencyIndex,
    pub(crate) generations: Generations,
    pub(crate) config: ServiceConfig,
}

/// Result of a mutation closure run under a route's writer.
pub(crate) enum Mutation<R> {
    /// Nothing to publish.
    Unchanged(R),
    /// Persisted; publish this graph.
    Publish(RouteGraph, R),
    /// Persisted, but the index copy rejected the change. The subgraph is
    /// dropped and rebuilt from the store on next access.
    Diverged(R, tour_graph_core::GraphError),
}

impl<R> Mutation<R> {
    /// Copy `base`, apply `op` to the copy, and publish it if `op` succeeds.
    pub(crate) fn apply(
        base: &RouteGraph,
        result: R,
        op: impl FnOnce(&mut RouteGraph) -> GraphResult<()>,
    ) -> Self {
        let mut next = base.clone();
        match op(&mut next) {
            Ok(()) => Self::Publish(next, result),
            Err(err) => Self::Diverged(result, err),
        }
    }
}

impl RouteGraphService {
    pub fn new(store: Arc<dyn EntityStore>, config: ServiceConfig) -> Self {
        Self {
            index: AdjacencyIndex::new(config.index.max_cached_routes),
            generations: Generations::new(),
            store,
            config,
        }
    }

    /// Open the configured store and build a service on it.
    pub fn from_config(config: ServiceConfig) -> TourResult<Self> {
        let store = config.store.open()?;
        info!(backend = ?config.store.backend, "route graph service ready");
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn index(&self) -> &AdjacencyIndex {
        &self.index
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Build (or rebuild) a route's subgraph from the store and publish it.
    pub fn load(&self, route: RouteId) -> TourResult<LoadStats> {
        loop {
            let slot = self.index.slot(route);
            let _writer = slot.lock_writer();
            if slot.is_retired() {
                continue;
            }
            let (_, stats) = self.reload(&slot)?;
            return Ok(stats);
        }
    }

    /// Mark a route's subgraph stale after an external write.
    ///
    /// Returns the new generation. The next query or mutation reloads the
    /// route when `auto_reload` is on.
    pub fn invalidate(&self, route: RouteId) -> u64 {
        let gen = self.generations.bump(route);
        debug!(route, generation = gen, "route invalidated");
        gen
    }

    /// Current generation of a route.
    pub fn generation(&self, route: RouteId) -> u64 {
        self.generations.current(route)
    }

    /// Snapshot to answer a query from, loading or reloading when needed.
    pub(crate) fn snapshot(&self, route: RouteId) -> TourResult<Arc<RouteSnapshot>> {
        loop {
            let slot = self.index.slot(route);
            if let Some(snap) = slot.snapshot() {
                if !matches!(self.freshness(route, &snap), Freshness::Reload { .. }) {
                    return Ok(snap);
                }
            }
            let _writer = slot.lock_writer();
            if slot.is_retired() {
                continue;
            }
            return self.ensure_loaded(&slot);
        }
    }

    /// Run `f` under the route's writer against a loaded snapshot and
    /// publish what it returns.
    ///
    /// `f` validates, writes the store and prepares the next graph. An error
    /// from `f` leaves the published snapshot untouched.
    pub(crate) fn mutate<R, F>(&self, route: RouteId, mut f: F) -> TourResult<R>
    where
        F: FnMut(&RouteSnapshot) -> TourResult<Mutation<R>>,
    {
        loop {
            let slot = self.index.slot(route);
            let _writer = slot.lock_writer();
            if slot.is_retired() {
                continue;
            }
            let snap = self.ensure_current(&slot)?;
            return match f(snap.as_ref())? {
                Mutation::Unchanged(result) => Ok(result),
                Mutation::Publish(graph, result) => {
                    let published = self.index.publish(&slot, snap.next(graph));
                    debug!(route, revision = published.revision, "route subgraph published");
                    Ok(result)
                }
                Mutation::Diverged(result, err) => {
                    warn!(route, error = %err, "index diverged from store, dropping route subgraph");
                    self.index.remove_slot(&slot);
                    Ok(result)
                }
            };
        }
    }

    /// Run `f` under the route's writer, then drop the route from the index
    /// if `f` succeeded. Used for deletions of the route itself.
    pub(crate) fn retire_route<R, F>(&self, route: RouteId, mut f: F) -> TourResult<R>
    where
        F: FnMut() -> TourResult<R>,
    {
        loop {
            let slot = self.index.slot(route);
            let _writer = slot.lock_writer();
            if slot.is_retired() {
                continue;
            }
            let result = f();
            if result.is_ok() || slot.snapshot().is_none() {
                self.index.remove_slot(&slot);
            }
            if result.is_ok() {
                self.generations.forget(route);
            }
            return result;
        }
    }

    fn freshness(&self, route: RouteId, snap: &RouteSnapshot) -> Freshness {
        let current = self.generations.current(route);
        let freshness = check_freshness(
            snap.loaded_generation,
            current,
            snap.loaded_at,
            self.config.index.auto_reload,
            Duration::from_millis(self.config.index.reload_debounce_ms),
        );
        if let Freshness::ServeStale { loaded, current } = freshness {
            warn!(route, loaded, current, "serving stale route subgraph");
        }
        freshness
    }

    /// Caller holds the slot's writer.
    fn ensure_loaded(&self, slot: &Arc<RouteSlot>) -> TourResult<Arc<RouteSnapshot>> {
        let route = slot.route_id();
        if let Some(snap) = slot.snapshot() {
            match self.freshness(route, &snap) {
                Freshness::Fresh | Freshness::ServeStale { .. } => return Ok(snap),
                Freshness::Reload { loaded, current } => {
                    info!(route, loaded, current, "auto-reloading stale route subgraph");
                }
            }
        }
        self.reload(slot).map(|(snap, _)| snap)
    }

    /// Caller holds the slot's writer. Reloads any stale snapshot, ignoring
    /// `auto_reload` and the debounce window.
    fn ensure_current(&self, slot: &Arc<RouteSlot>) -> TourResult<Arc<RouteSnapshot>> {
        let route = slot.route_id();
        if let Some(snap) = slot.snapshot() {
            let current = self.generations.current(route);
            if snap.loaded_generation >= current {
                return Ok(snap);
            }
            info!(
                route,
                loaded = snap.loaded_generation,
                current,
                "reloading stale route subgraph before mutation"
            );
        }
        self.reload(slot).map(|(snap, _)| snap)
    }

    /// Caller holds the slot's writer.
    fn reload(&self, slot: &Arc<RouteSlot>) -> TourResult<(Arc<RouteSnapshot>, LoadStats)> {
        let route = slot.route_id();
        // Read the generation first: an invalidation racing with the load
        // leaves the new snapshot stale instead of silently fresh.
        let generation = self.generations.current(route);
        let revision = slot.snapshot().map_or(0, |s| s.revision);

        match load_route_graph(self.store.as_ref(), route, self.config.index.max_memory_mb) {
            Ok((graph, stats)) => {
                let snap = self.index.publish(slot, RouteSnapshot {
                    graph,
                    revision: revision + 1,
                    loaded_generation: generation,
                    loaded_at: std::time::Instant::now(),
                    load_time_ms: stats.load_time_ms,
                });
                info!(
                    route,
                    stops = stats.stop_count,
                    edges = stats.edge_count,
                    generation,
                    load_time_ms = stats.load_time_ms,
                    "route subgraph loaded"
                );
                Ok((snap, stats))
            }
            Err(err) => {
                let route_gone = matches!(err, TourError::NotFound { entity: "route", .. });
                if route_gone || slot.snapshot().is_none() {
                    self.index.remove_slot(slot);
                }
                Err(err)
            }
        }
    }
}
