//! Adjacency Index: registry of per-route subgraphs.
//!
//! Each route owns a [`RouteSlot`]. A slot serializes writers of that route
//! with a mutex and publishes immutable [`RouteSnapshot`]s behind an
//! `RwLock<Option<Arc<_>>>`. Readers take the lock only long enough to clone
//! the `Arc`, then compute on their private snapshot, so a query sees exactly
//! one published state and never blocks a writer for the length of a search.
//!
//! Lock order: a thread holding a slot's writer may take the registry lock;
//! a thread holding the registry lock only ever `try_lock`s a writer. No
//! operation blocks on the writers of two routes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use tour_graph_core::RouteGraph;
use tracing::{debug, info};

use crate::model::RouteId;
use crate::util::{lock, read, try_lock, write};

/// One published state of a route's subgraph.
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    pub graph: RouteGraph,
    /// Bumped on every publish. 1 = freshly loaded.
    pub revision: u64,
    /// Generation counter at load time.
    pub loaded_generation: u64,
    pub loaded_at: Instant,
    pub load_time_ms: f64,
}

impl RouteSnapshot {
    /// Successor snapshot carrying `graph`, same load metadata.
    pub fn next(&self, graph: RouteGraph) -> Self {
        Self {
            graph,
            revision: self.revision + 1,
            loaded_generation: self.loaded_generation,
            loaded_at: self.loaded_at,
            load_time_ms: self.load_time_ms,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RouteSlot {
    route_id: RouteId,
    writer: Mutex<()>,
    current: RwLock<Option<Arc<RouteSnapshot>>>,
    last_used: AtomicU64,
    retired: AtomicBool,
}

impl RouteSlot {
    fn new(route_id: RouteId) -> Self {
        Self {
            route_id,
            writer: Mutex::new(()),
            current: RwLock::new(None),
            last_used: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn route_id(&self) -> RouteId {
        self.route_id
    }

    /// Serialize mutations and loads of this route.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        lock(&self.writer)
    }

    pub(crate) fn snapshot(&self) -> Option<Arc<RouteSnapshot>> {
        read(&self.current).clone()
    }

    /// Swap in a new snapshot. Callers hold the writer.
    fn publish(&self, snapshot: RouteSnapshot) -> Arc<RouteSnapshot> {
        let snapshot = Arc::new(snapshot);
        *write(&self.current) = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// A retired slot is no longer in the registry. Operations that still
    /// hold it must fetch a fresh slot and retry.
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        *write(&self.current) = None;
    }

    fn touch(&self, tick: u64) {
        self.last_used.store(tick, Ordering::Relaxed);
    }

    fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }
}

/// Registry `RouteId → RouteSlot` with LRU capacity.
#[derive(Debug)]
pub struct AdjacencyIndex {
    slots: RwLock<HashMap<RouteId, Arc<RouteSlot>>>,
    clock: AtomicU64,
    capacity: usize,
}

impl AdjacencyIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered routes, loaded or not.
    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the route has a published snapshot.
    pub fn is_loaded(&self, route: RouteId) -> bool {
        self.snapshot(route).is_some()
    }

    /// Current snapshot of a route without loading it.
    pub fn snapshot(&self, route: RouteId) -> Option<Arc<RouteSnapshot>> {
        read(&self.slots).get(&route).and_then(|slot| slot.snapshot())
    }

    /// Every published snapshot, ascending by route id.
    pub fn snapshots(&self) -> Vec<(RouteId, Arc<RouteSnapshot>)> {
        let mut rows: Vec<(RouteId, Arc<RouteSnapshot>)> = read(&self.slots)
            .iter()
            .filter_map(|(&route, slot)| slot.snapshot().map(|snap| (route, snap)))
            .collect();
        rows.sort_unstable_by_key(|(route, _)| *route);
        rows
    }

    /// Slot of a route, registering an empty one on first use.
    ///
    /// Registering never evicts: a slot only counts against capacity once
    /// a snapshot is published into it.
    pub(crate) fn slot(&self, route: RouteId) -> Arc<RouteSlot> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(slot) = read(&self.slots).get(&route) {
            slot.touch(tick);
            return Arc::clone(slot);
        }

        let mut slots = write(&self.slots);
        let slot = Arc::clone(
            slots
                .entry(route)
                .or_insert_with(|| Arc::new(RouteSlot::new(route))),
        );
        slot.touch(tick);
        slot
    }

    /// Publish a snapshot into `slot`, then evict the least recently used
    /// idle route if the registry is over capacity. Callers hold the
    /// slot's writer.
    pub(crate) fn publish(&self, slot: &RouteSlot, snapshot: RouteSnapshot) -> Arc<RouteSnapshot> {
        let published = slot.publish(snapshot);
        if read(&self.slots).len() > self.capacity {
            let mut slots = write(&self.slots);
            if slots.len() > self.capacity {
                if let Some(evicted) = Self::evict_lru(&mut slots, slot.route_id) {
                    info!(route = evicted, capacity = self.capacity, "evicted least recently used route");
                }
            }
        }
        published
    }

    /// Remove `slot` if it is still the registered slot of its route.
    pub(crate) fn remove_slot(&self, slot: &Arc<RouteSlot>) -> bool {
        let mut slots = write(&self.slots);
        let registered = slots
            .get(&slot.route_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        slot.retire();
        if registered {
            slots.remove(&slot.route_id);
        }
        registered
    }

    /// Drop a route's subgraph. In-flight readers keep their snapshot.
    pub fn evict(&self, route: RouteId) -> bool {
        let removed = write(&self.slots).remove(&route);
        match removed {
            Some(slot) => {
                slot.retire();
                debug!(route, "route evicted from index");
                true
            }
            None => false,
        }
    }

    /// Drop every subgraph.
    pub fn clear(&self) {
        let drained: Vec<Arc<RouteSlot>> = write(&self.slots).drain().map(|(_, s)| s).collect();
        for slot in drained {
            slot.retire();
        }
    }

    fn evict_lru(slots: &mut HashMap<RouteId, Arc<RouteSlot>>, keep: RouteId) -> Option<RouteId> {
        let mut candidates: Vec<(u64, RouteId)> = slots
            .iter()
            .filter(|(&route, _)| route != keep)
            .map(|(&route, slot)| (slot.last_used(), route))
            .collect();
        candidates.sort_unstable();

        for (_, route) in candidates {
            let Some(slot) = slots.get(&route).cloned() else {
                continue;
            };
            // Busy writers are skipped rather than waited on.
            if let Some(_guard) = try_lock(&slot.writer) {
                slot.retire();
                slots.remove(&route);
                return Some(route);
            };
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(route: RouteId, stops: &[i64]) -> RouteSnapshot {
        let mut graph = RouteGraph::new(route);
        for &s in stops {
            graph.add_stop(s, format!("s{s}")).unwrap();
        }
        RouteSnapshot {
            graph,
            revision: 1,
            loaded_generation: 0,
            loaded_at: Instant::now(),
            load_time_ms: 0.0,
        }
    }

    #[test]
    fn test_slot_is_shared() {
        let index = AdjacencyIndex::new(4);
        let a = index.slot(1);
        let b = index.slot(1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(index.len(), 1);
        assert!(!index.is_loaded(1));
    }

    #[test]
    fn test_publish_and_read() {
        let index = AdjacencyIndex::new(4);
        let slot = index.slot(7);
        let _w = slot.lock_writer();
        index.publish(&slot, snapshot(7, &[1, 2]));
        let snap = index.snapshot(7).unwrap();
        assert_eq!(snap.graph.stop_count(), 2);
        assert_eq!(snap.revision, 1);

        let next = snap.next(RouteGraph::new(7));
        assert_eq!(next.revision, 2);
    }

    #[test]
    fn test_reader_keeps_old_snapshot() {
        let index = AdjacencyIndex::new(4);
        let slot = index.slot(1);
        index.publish(&slot, snapshot(1, &[1]));
        let held = index.snapshot(1).unwrap();

        index.publish(&slot, snapshot(1, &[1, 2, 3]));
        assert_eq!(held.graph.stop_count(), 1);
        assert_eq!(index.snapshot(1).unwrap().graph.stop_count(), 3);

        assert!(index.evict(1));
        assert!(slot.is_retired());
        assert_eq!(held.graph.stop_count(), 1);
        assert!(index.snapshot(1).is_none());
    }

    fn load(index: &AdjacencyIndex, route: RouteId) {
        index.publish(&index.slot(route), snapshot(route, &[route]));
    }

    #[test]
    fn test_lru_eviction() {
        let index = AdjacencyIndex::new(2);
        load(&index, 1);
        load(&index, 2);
        // Touch 1 so 2 becomes the least recently used.
        index.slot(1);
        load(&index, 3);

        assert_eq!(index.len(), 2);
        assert!(index.is_loaded(1));
        assert!(!index.is_loaded(2));
        assert!(index.is_loaded(3));
    }

    #[test]
    fn test_registering_does_not_evict() {
        let index = AdjacencyIndex::new(1);
        load(&index, 1);
        let empty = index.slot(99);

        assert_eq!(index.len(), 2);
        assert!(index.is_loaded(1));
        assert!(index.remove_slot(&empty));
        assert!(index.is_loaded(1));
    }

    #[test]
    fn test_lru_skips_busy_writer() {
        let index = AdjacencyIndex::new(2);
        let busy = index.slot(1);
        let _guard = busy.lock_writer();
        index.slot(2);
        load(&index, 3);

        assert!(!busy.is_retired());
        let ids: Vec<RouteId> = {
            let mut v: Vec<RouteId> = read(&index.slots).keys().copied().collect();
            v.sort_unstable();
            v
        };
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_remove_slot_only_if_registered() {
        let index = AdjacencyIndex::new(4);
        let old = index.slot(5);
        index.evict(5);
        let fresh = index.slot(5);

        assert!(!index.remove_slot(&old));
        assert_eq!(index.len(), 1);
        assert!(index.remove_slot(&fresh));
        assert!(index.is_empty());
    }

    #[test]
    fn test_snapshots_sorted() {
        let index = AdjacencyIndex::new(8);
        for route in [3, 1, 2] {
            load(&index, route);
        }
        index.slot(9);
        let routes: Vec<RouteId> = index.snapshots().into_iter().map(|(r, _)| r).collect();
        assert_eq!(routes, vec![1, 2, 3]);

        index.clear();
        assert!(index.is_empty());
    }
}
