use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tour_graph::model::{NewRoute, NewStop, NewUser};
use tour_graph::store::StoreResult;
use tour_graph::{
    DeletionPlan, EntityStore, IndexConfig, LoadState, MemoryStore, Neighbor, Route,
    RouteGraphService, RouteId, ServiceConfig, SqliteStore, Stop, StopId, StoreError, TourError,
    User, UserId,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn stores() -> Vec<(&'static str, Arc<dyn EntityStore>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("sqlite", Arc::new(SqliteStore::in_memory().unwrap())),
    ]
}

struct Tour {
    service: RouteGraphService,
    user: UserId,
    route: RouteId,
    stops: HashMap<&'static str, StopId>,
}

impl Tour {
    fn id(&self, name: &str) -> StopId {
        self.stops[name]
    }

    fn ids(&self, names: &[&str]) -> Vec<StopId> {
        names.iter().map(|n| self.id(n)).collect()
    }
}

fn build_tour(
    service: RouteGraphService,
    stops: &[&'static str],
    edges: &[(&str, &str, f64)],
) -> Tour {
    let user = service
        .create_user("Ana Torres", "ana@example.com", "hash")
        .unwrap();
    let route = service.create_route(user.id, "Centro", None).unwrap();
    let stops: HashMap<&'static str, StopId> = stops
        .iter()
        .map(|&name| (name, service.add_stop(route.id, name, None).unwrap().id))
        .collect();
    for &(o, d, w) in edges {
        service.add_neighbor(route.id, stops[o], stops[d], w).unwrap();
    }
    Tour {
        service,
        user: user.id,
        route: route.id,
        stops,
    }
}

fn tour(store: Arc<dyn EntityStore>, stops: &[&'static str], edges: &[(&str, &str, f64)]) -> Tour {
    build_tour(
        RouteGraphService::new(store, ServiceConfig::default()),
        stops,
        edges,
    )
}

const ABCD_EDGES: &[(&str, &str, f64)] = &[
    ("A", "B", 2.0),
    ("B", "C", 3.0),
    ("A", "C", 10.0),
    ("C", "D", 1.0),
];

fn abcd(store: Arc<dyn EntityStore>) -> Tour {
    tour(store, &["A", "B", "C", "D"], ABCD_EDGES)
}

// ---------------------------------------------------------------------------
// Path engine through the service
// ---------------------------------------------------------------------------

#[test]
fn test_shortest_path_scenario() {
    for (label, store) in stores() {
        let t = abcd(store);
        let response = t
            .service
            .shortest_path(t.route, t.id("A"), t.id("D"))
            .unwrap();
        assert_eq!(response.path, t.ids(&["A", "B", "C", "D"]), "{label}");
        assert_eq!(response.distance, 6.0, "{label}");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["distance"], 6.0);
        assert_eq!(json["path"].as_array().unwrap().len(), 4);
    }
}

#[test]
fn test_unreachable_without_edges() {
    for (label, store) in stores() {
        let t = tour(store, &["A", "B"], &[]);
        let err = t
            .service
            .shortest_path(t.route, t.id("A"), t.id("B"))
            .unwrap_err();
        assert!(
            matches!(err, TourError::Unreachable { from, to } if from == t.id("A") && to == t.id("B")),
            "{label}: {err:?}"
        );
    }
}

#[test]
fn test_edges_are_directional() {
    let t = tour(
        Arc::new(MemoryStore::new()),
        &["A", "B"],
        &[("A", "B", 1.0)],
    );
    assert!(t.service.shortest_path(t.route, t.id("A"), t.id("B")).is_ok());
    assert!(t
        .service
        .shortest_path(t.route, t.id("B"), t.id("A"))
        .unwrap_err()
        .is_unreachable());
}

#[test]
fn test_self_path() {
    let t = tour(Arc::new(MemoryStore::new()), &["A"], &[]);
    let response = t
        .service
        .shortest_path(t.route, t.id("A"), t.id("A"))
        .unwrap();
    assert_eq!(response.path, vec![t.id("A")]);
    assert_eq!(response.distance, 0.0);
}

#[test]
fn test_unknown_stop_in_query() {
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
    let t = abcd(Arc::clone(&store));
    let err = t
        .service
        .shortest_path(t.route, t.id("A"), 9_999)
        .unwrap_err();
    assert!(matches!(err, TourError::UnknownStop { stop: 9_999, .. }));

    let missing_route = t.service.shortest_path(424_242, 1, 2).unwrap_err();
    assert!(matches!(missing_route, TourError::NotFound { entity: "route", .. }));
}

#[test]
fn test_ties_resolve_to_lowest_stop_id() {
    for (label, store) in stores() {
        let t = tour(
            store,
            &["A", "B", "C", "D"],
            &[
                ("A", "C", 1.0),
                ("A", "B", 1.0),
                ("C", "D", 1.0),
                ("B", "D", 1.0),
            ],
        );
        for _ in 0..3 {
            let response = t
                .service
                .shortest_path(t.route, t.id("A"), t.id("D"))
                .unwrap();
            assert_eq!(response.path, t.ids(&["A", "B", "D"]), "{label}");
            assert_eq!(response.distance, 2.0);
        }
    }
}

#[test]
fn test_cycles_terminate() {
    let t = tour(
        Arc::new(MemoryStore::new()),
        &["A", "B", "C", "D"],
        &[
            ("A", "B", 1.0),
            ("B", "C", 1.0),
            ("C", "A", 1.0),
            ("B", "A", 0.0),
        ],
    );
    assert!(t
        .service
        .shortest_path(t.route, t.id("A"), t.id("D"))
        .unwrap_err()
        .is_unreachable());
    let response = t
        .service
        .shortest_path(t.route, t.id("C"), t.id("B"))
        .unwrap();
    assert_eq!(response.path, t.ids(&["C", "A", "B"]));
}

#[test]
fn test_distances_from_and_hubs() {
    let t = abcd(Arc::new(MemoryStore::new()));
    let reach = t.service.distances_from(t.route, t.id("A")).unwrap();
    let summary: Vec<(StopId, f64)> = reach.iter().map(|r| (r.stop, r.distance)).collect();
    assert_eq!(
        summary,
        vec![
            (t.id("A"), 0.0),
            (t.id("B"), 2.0),
            (t.id("C"), 5.0),
            (t.id("D"), 6.0),
        ]
    );
    assert_eq!(reach[3].name, "D");
    assert_eq!(reach[3].hops, 3);

    let hubs = t.service.hubs(t.route, 1).unwrap();
    assert_eq!(hubs.len(), 1);
    assert_eq!(hubs[0].stop, t.id("C"));
    assert_eq!(hubs[0].total_degree, 3);
    assert_eq!(t.service.hubs(t.route, 0).unwrap().len(), 4);
}

#[test]
fn test_stop_connections_and_available_targets() {
    let t = abcd(Arc::new(MemoryStore::new()));
    let c = t.service.stop_connections(t.route, t.id("C")).unwrap();
    let out: Vec<(StopId, f64)> = c.outgoing.iter().map(|e| (e.stop, e.distance)).collect();
    let inc: Vec<(StopId, &str)> = c.incoming.iter().map(|e| (e.stop, e.name.as_str())).collect();
    assert_eq!(out, vec![(t.id("D"), 1.0)]);
    assert_eq!(inc, vec![(t.id("A"), "A"), (t.id("B"), "B")]);

    let targets: Vec<StopId> = t
        .service
        .available_targets(t.route, t.id("A"))
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(targets, vec![t.id("D")]);

    assert!(matches!(
        t.service.stop_connections(t.route, 777),
        Err(TourError::UnknownStop { stop: 777, .. })
    ));
}

// ---------------------------------------------------------------------------
// Gateway validation
// ---------------------------------------------------------------------------

#[test]
fn test_negative_weight_rejected() {
    for (label, store) in stores() {
        let t = tour(store, &["A", "B"], &[]);
        let err = t
            .service
            .add_neighbor(t.route, t.id("A"), t.id("B"), -5.0)
            .unwrap_err();
        assert!(matches!(err, TourError::InvalidWeight(w) if w == -5.0), "{label}");
        assert!(matches!(
            t.service
                .add_neighbor(t.route, t.id("A"), t.id("B"), f64::NAN),
            Err(TourError::InvalidWeight(_))
        ));
        assert!(t
            .service
            .store()
            .get_neighbors_for_route(t.route)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn test_duplicate_and_self_edges() {
    for (label, store) in stores() {
        let t = tour(store, &["A", "B"], &[("A", "B", 1.0)]);
        let dup = t
            .service
            .add_neighbor(t.route, t.id("A"), t.id("B"), 4.0)
            .unwrap_err();
        assert!(matches!(dup, TourError::Conflict(_)), "{label}: {dup:?}");

        let own = t
            .service
            .add_neighbor(t.route, t.id("A"), t.id("A"), 1.0)
            .unwrap_err();
        assert!(matches!(own, TourError::Validation { .. }), "{label}");

        // The reverse direction is a different edge.
        t.service
            .add_neighbor(t.route, t.id("B"), t.id("A"), 4.0)
            .unwrap();
    }
}

#[test]
fn test_cross_route_edge_rejected() {
    for (label, store) in stores() {
        let t = tour(store, &["A"], &[]);
        let other = t.service.create_route(t.user, "Puerto", None).unwrap();
        let far = t.service.add_stop(other.id, "Faro", None).unwrap();

        let err = t
            .service
            .add_neighbor(t.route, t.id("A"), far.id, 1.0)
            .unwrap_err();
        assert!(
            matches!(err, TourError::UnknownStop { route, stop } if route == t.route && stop == far.id),
            "{label}: {err:?}"
        );
    }
}

#[test]
fn test_duplicate_names_conflict() {
    for (label, store) in stores() {
        let t = tour(store, &["A"], &[]);
        assert!(
            matches!(
                t.service.add_stop(t.route, "A", None),
                Err(TourError::Conflict(_))
            ),
            "{label}"
        );
        assert!(matches!(
            t.service.create_route(t.user, "Centro", None),
            Err(TourError::Conflict(_))
        ));
        assert!(matches!(
            t.service.create_user("Otra Persona", "ANA@example.com ", "x"),
            Err(TourError::Conflict(_))
        ));
    }
}

#[test]
fn test_user_and_route_records() {
    for (label, store) in stores() {
        let service = RouteGraphService::new(store, ServiceConfig::default());
        let user: User = service
            .create_user("  Luis Peña ", " Luis@Example.com", "hash")
            .unwrap();
        assert_eq!(user.name, "Luis Peña", "{label}");
        assert_eq!(user.email, "luis@example.com");
        assert!(matches!(
            service.create_user("Luis", "not-an-email", "hash"),
            Err(TourError::Validation { field: "email", .. })
        ));

        let first = service.create_route(user.id, "Norte", Some("  ")).unwrap();
        let second = service
            .create_route(user.id, "Sur", Some("by the river"))
            .unwrap();
        assert_eq!(first.description, None);
        let routes: Vec<Route> = service.routes_for_user(user.id).unwrap();
        let ids: Vec<RouteId> = routes.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id], "{label}");

        assert_eq!(service.get_user(user.id).unwrap().email, "luis@example.com");
        assert_eq!(service.get_route(second.id).unwrap().name, "Sur");
        assert!(matches!(
            service.create_route(9_999, "Nadie", None),
            Err(TourError::NotFound { entity: "user", .. })
        ));
    }
}

// ---------------------------------------------------------------------------
// Gateway mutations
// ---------------------------------------------------------------------------

#[test]
fn test_remove_neighbor_is_idempotent() {
    for (label, store) in stores() {
        let t = abcd(store);
        assert!(t
            .service
            .remove_neighbor(t.route, t.id("A"), t.id("B"))
            .unwrap());
        let revision = t.service.route_status(t.route).unwrap().revision;

        assert!(!t
            .service
            .remove_neighbor(t.route, t.id("A"), t.id("B"))
            .unwrap());
        let status = t.service.route_status(t.route).unwrap();
        assert_eq!(status.revision, revision, "{label}");
        assert_eq!(status.edge_count, 3);

        let response = t
            .service
            .shortest_path(t.route, t.id("A"), t.id("D"))
            .unwrap();
        assert_eq!(response.path, t.ids(&["A", "C", "D"]));
        assert_eq!(response.distance, 11.0);
    }
}

#[test]
fn test_remove_stop_drops_incident_edges() {
    for (label, store) in stores() {
        let t = abcd(store);
        let plan = t.service.remove_stop(t.route, t.id("C")).unwrap();
        assert_eq!(plan.stops, vec![t.id("C")]);
        assert_eq!(plan.neighbors.len(), 3, "{label}");

        let snapshot = t.service.index().snapshot(t.route).unwrap();
        assert_eq!(snapshot.graph.stop_count(), 3);
        assert_eq!(snapshot.graph.edge_count(), 1);
        assert!(snapshot
            .graph
            .edges()
            .all(|e| e.origin != t.id("C") && e.destination != t.id("C")));

        let rows = t.service.store().get_neighbors_for_route(t.route).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(t
            .service
            .shortest_path(t.route, t.id("A"), t.id("D"))
            .unwrap_err()
            .is_unreachable());
    }
}

#[test]
fn test_remove_stop_errors() {
    for (label, store) in stores() {
        let t = tour(store, &["A"], &[]);
        let other = t.service.create_route(t.user, "Puerto", None).unwrap();
        let far = t.service.add_stop(other.id, "Faro", None).unwrap();

        assert!(
            matches!(
                t.service.remove_stop(t.route, far.id),
                Err(TourError::UnknownStop { .. })
            ),
            "{label}"
        );
        assert!(matches!(
            t.service.remove_stop(t.route, 9_999),
            Err(TourError::NotFound { entity: "stop", .. })
        ));
        // The other route's stop survived.
        assert_eq!(t.service.stops_for_route(other.id).unwrap().len(), 1);
    }
}

#[test]
fn test_update_neighbor() {
    for (label, store) in stores() {
        let t = abcd(store);
        let updated = t
            .service
            .update_neighbor(t.route, t.id("A"), t.id("C"), None, 4.0)
            .unwrap();
        assert_eq!(updated.distance, 4.0);
        let response = t
            .service
            .shortest_path(t.route, t.id("A"), t.id("D"))
            .unwrap();
        assert_eq!(response.path, t.ids(&["A", "C", "D"]), "{label}");
        assert_eq!(response.distance, 5.0);

        // Re-point A->C to A->D.
        t.service
            .update_neighbor(t.route, t.id("A"), t.id("C"), Some(t.id("D")), 0.5)
            .unwrap();
        let snapshot = t.service.index().snapshot(t.route).unwrap();
        assert_eq!(snapshot.graph.edge_weight(t.id("A"), t.id("C")), None);
        assert_eq!(snapshot.graph.edge_weight(t.id("A"), t.id("D")), Some(0.5));
        let rows = t.service.store().get_neighbors_for_route(t.route).unwrap();
        assert!(rows.contains(&Neighbor {
            origin: t.id("A"),
            destination: t.id("D"),
            distance: 0.5,
        }));

        // Re-pointing onto an existing edge conflicts.
        assert!(matches!(
            t.service
                .update_neighbor(t.route, t.id("A"), t.id("D"), Some(t.id("B")), 1.0),
            Err(TourError::Conflict(_))
        ));
        assert!(matches!(
            t.service
                .update_neighbor(t.route, t.id("D"), t.id("A"), None, 1.0),
            Err(TourError::NotFound { entity: "neighbor", .. })
        ));
    }
}

#[test]
fn test_rename_stop() {
    for (label, store) in stores() {
        let t = abcd(store);
        let renamed: Stop = t
            .service
            .rename_stop(t.route, t.id("B"), "Catedral", Some("gothic"))
            .unwrap();
        assert_eq!(renamed.name, "Catedral");
        assert_eq!(
            t.service.store().get_stop(t.id("B")).unwrap().description.as_deref(),
            Some("gothic"),
            "{label}"
        );
        let c = t.service.stop_connections(t.route, t.id("C")).unwrap();
        assert!(c.incoming.iter().any(|e| e.name == "Catedral"));

        assert!(matches!(
            t.service.rename_stop(t.route, t.id("C"), "A", None),
            Err(TourError::Conflict(_))
        ));
    }
}

#[test]
fn test_remove_route_cascades() {
    for (label, store) in stores() {
        let t = abcd(store);
        t.service.shortest_path(t.route, t.id("A"), t.id("D")).unwrap();
        assert!(t.service.index().is_loaded(t.route));

        let plan: DeletionPlan = t.service.remove_route(t.route).unwrap();
        assert_eq!(plan.routes, vec![t.route]);
        assert_eq!(plan.stops.len(), 4);
        assert_eq!(plan.neighbors.len(), 4, "{label}");

        let store = t.service.store();
        assert!(store.get_stops_for_route(t.route).unwrap().is_empty());
        for id in t.stops.values() {
            assert!(matches!(
                store.get_stop(*id),
                Err(StoreError::NotFound { .. })
            ));
        }
        for &(o, d, _) in ABCD_EDGES {
            assert!(!store.delete_neighbor(t.id(o), t.id(d)).unwrap(), "{label}");
        }

        assert!(!t.service.index().is_loaded(t.route));
        assert!(matches!(
            t.service.shortest_path(t.route, t.id("A"), t.id("D")),
            Err(TourError::NotFound { entity: "route", .. })
        ));
        assert!(matches!(
            t.service.remove_route(t.route),
            Err(TourError::NotFound { .. })
        ));
        assert!(t.service.index().is_empty());
    }
}

#[test]
fn test_remove_user_cascades() {
    for (label, store) in stores() {
        let t = abcd(store);
        let second = t.service.create_route(t.user, "Puerto", None).unwrap();
        let x = t.service.add_stop(second.id, "X", None).unwrap();
        let y = t.service.add_stop(second.id, "Y", None).unwrap();
        t.service.add_neighbor(second.id, x.id, y.id, 1.0).unwrap();
        t.service.shortest_path(second.id, x.id, y.id).unwrap();

        let plan = t.service.remove_user(t.user).unwrap();
        assert_eq!(plan.users, vec![t.user]);
        assert_eq!(plan.routes.len(), 2, "{label}");
        assert_eq!(plan.stops.len(), 6);
        assert_eq!(plan.neighbors.len(), 5);

        assert!(t.service.index().is_empty());
        assert!(matches!(
            t.service.get_user(t.user),
            Err(TourError::NotFound { entity: "user", .. })
        ));
        assert!(t.service.store().get_stop(x.id).is_err());
    }
}

#[test]
fn test_remove_user_with_stop_deleted_mid_plan() {
    for (label, inner) in stores() {
        let store = Arc::new(FailingStore::over(inner));
        let t = abcd(Arc::clone(&store) as Arc<dyn EntityStore>);
        *store.delete_on_neighbor_read.lock().unwrap() = Some(t.id("A"));

        let plan = t.service.remove_user(t.user).unwrap();
        assert!(plan.stops.contains(&t.id("A")), "{label}");
        assert!(matches!(
            t.service.get_user(t.user),
            Err(TourError::NotFound { entity: "user", .. })
        ));
        assert!(store.get_route(t.route).is_err(), "{label}");
        assert!(store.get_stop(t.id("B")).is_err(), "{label}");
    }
}

// ---------------------------------------------------------------------------
// Store failures never reach the index
// ---------------------------------------------------------------------------

/// Delegates to another store. Every write fails while `fail_writes` is set;
/// `delete_on_neighbor_read` removes a stop behind the caller's back the next
/// time neighbor rows are read.
struct FailingStore {
    inner: Arc<dyn EntityStore>,
    fail_writes: AtomicBool,
    delete_on_neighbor_read: Mutex<Option<StopId>>,
}

impl FailingStore {
    fn new() -> Self {
        Self::over(Arc::new(MemoryStore::new()))
    }

    fn over(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            delete_on_neighbor_read: Mutex::new(None),
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                Some("disk I/O error".into()),
            )))
        } else {
            Ok(())
        }
    }
}

impl EntityStore for FailingStore {
    fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        self.check()?;
        self.inner.create_user(user)
    }
    fn get_user(&self, id: UserId) -> StoreResult<User> {
        self.inner.get_user(id)
    }
    fn create_route(&self, route: &NewRoute) -> StoreResult<Route> {
        self.check()?;
        self.inner.create_route(route)
    }
    fn get_route(&self, id: RouteId) -> StoreResult<Route> {
        self.inner.get_route(id)
    }
    fn routes_for_user(&self, user_id: UserId) -> StoreResult<Vec<Route>> {
        self.inner.routes_for_user(user_id)
    }
    fn get_stop(&self, id: StopId) -> StoreResult<Stop> {
        self.inner.get_stop(id)
    }
    fn get_stops_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Stop>> {
        self.inner.get_stops_for_route(route_id)
    }
    fn insert_stop(&self, stop: &NewStop) -> StoreResult<Stop> {
        self.check()?;
        self.inner.insert_stop(stop)
    }
    fn update_stop(&self, stop: &Stop) -> StoreResult<()> {
        self.check()?;
        self.inner.update_stop(stop)
    }
    fn get_neighbors_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Neighbor>> {
        if let Some(stop) = self.delete_on_neighbor_read.lock().unwrap().take() {
            self.inner.delete_stop(stop)?;
        }
        self.inner.get_neighbors_for_route(route_id)
    }
    fn insert_neighbor(&self, neighbor: &Neighbor) -> StoreResult<()> {
        self.check()?;
        self.inner.insert_neighbor(neighbor)
    }
    fn update_neighbor_distance(&self, o: StopId, d: StopId, distance: f64) -> StoreResult<()> {
        self.check()?;
        self.inner.update_neighbor_distance(o, d, distance)
    }
    fn replace_neighbor(&self, old: (StopId, StopId), new: &Neighbor) -> StoreResult<()> {
        self.check()?;
        self.inner.replace_neighbor(old, new)
    }
    fn delete_neighbor(&self, o: StopId, d: StopId) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_neighbor(o, d)
    }
    fn delete_stop(&self, id: StopId) -> StoreResult<()> {
        self.check()?;
        self.inner.delete_stop(id)
    }
    fn delete_route(&self, id: RouteId) -> StoreResult<()> {
        self.check()?;
        self.inner.delete_route(id)
    }
    fn execute_plan(&self, plan: &DeletionPlan) -> StoreResult<()> {
        self.check()?;
        self.inner.execute_plan(plan)
    }
}

#[test]
fn test_store_failure_leaves_index_untouched() {
    let store = Arc::new(FailingStore::new());
    let t = abcd(Arc::clone(&store) as Arc<dyn EntityStore>);
    let before = t.service.index().snapshot(t.route).unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let failures = [
        t.service
            .add_neighbor(t.route, t.id("D"), t.id("A"), 1.0)
            .map(|_| ()),
        t.service
            .remove_neighbor(t.route, t.id("A"), t.id("B"))
            .map(|_| ()),
        t.service
            .update_neighbor(t.route, t.id("A"), t.id("C"), None, 1.0)
            .map(|_| ()),
        t.service.remove_stop(t.route, t.id("B")).map(|_| ()),
        t.service.add_stop(t.route, "E", None).map(|_| ()),
        t.service.remove_route(t.route).map(|_| ()),
    ];
    for result in failures {
        assert!(matches!(result, Err(TourError::Store(_))), "{result:?}");
    }

    let after = t.service.index().snapshot(t.route).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.graph.edge_count(), 4);

    store.fail_writes.store(false, Ordering::SeqCst);
    let response = t
        .service
        .shortest_path(t.route, t.id("A"), t.id("D"))
        .unwrap();
    assert_eq!(response.distance, 6.0);
    assert_eq!(t.service.store().get_neighbors_for_route(t.route).unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_queries_see_whole_states_during_mutation() {
    for (label, store) in stores() {
        let t = abcd(store);
        let (a, b, d) = (t.id("A"), t.id("B"), t.id("D"));
        let pre = (t.ids(&["A", "B", "C", "D"]), 6.0);
        let post = (t.ids(&["A", "C", "D"]), 11.0);
        let service = &t.service;
        let route = t.route;

        std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                for _ in 0..50 {
                    assert!(service.remove_neighbor(route, a, b).unwrap());
                    service.add_neighbor(route, a, b, 2.0).unwrap();
                }
            });
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    let (pre, post) = (pre.clone(), post.clone());
                    scope.spawn(move || {
                        for _ in 0..200 {
                            let r = service.shortest_path(route, a, d).unwrap();
                            let seen = (r.path, r.distance);
                            assert!(seen == pre || seen == post, "{label}: {seen:?}");
                        }
                    })
                })
                .collect();
            writer.join().unwrap();
            for reader in readers {
                reader.join().unwrap();
            }
        });

        let status = t.service.route_status(t.route).unwrap();
        assert_eq!(status.edge_count, 4);
    }
}

#[test]
fn test_routes_are_independent() {
    let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let t = abcd(Arc::clone(&store));
    let other = t.service.create_route(t.user, "Puerto", None).unwrap();
    let x = t.service.add_stop(other.id, "X", None).unwrap();
    let y = t.service.add_stop(other.id, "Y", None).unwrap();
    let service = &t.service;

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..40 {
                service
                    .update_neighbor(t.route, t.id("C"), t.id("D"), None, 1.0 + f64::from(i))
                    .unwrap();
            }
        });
        scope.spawn(|| {
            service.add_neighbor(other.id, x.id, y.id, 3.0).unwrap();
            for _ in 0..40 {
                assert_eq!(service.shortest_path(other.id, x.id, y.id).unwrap().distance, 3.0);
            }
        });
    });

    assert_eq!(
        t.service
            .shortest_path(t.route, t.id("A"), t.id("D"))
            .unwrap()
            .distance,
        5.0 + 40.0
    );
}

// ---------------------------------------------------------------------------
// Registry lifecycle and staleness
// ---------------------------------------------------------------------------

#[test]
fn test_capacity_evicts_least_recently_used() {
    let service = RouteGraphService::new(
        Arc::new(MemoryStore::new()),
        ServiceConfig::with_index(IndexConfig {
            max_cached_routes: 1,
            ..IndexConfig::default()
        }),
    );
    let t = build_tour(service, &["A", "B"], &[("A", "B", 1.0)]);
    let other = t.service.create_route(t.user, "Puerto", None).unwrap();
    let x = t.service.add_stop(other.id, "X", None).unwrap();

    assert!(t.service.index().is_loaded(other.id));
    assert!(!t.service.index().is_loaded(t.route));
    assert_eq!(t.service.index().len(), 1);

    // Evicted routes reload transparently.
    let response = t
        .service
        .shortest_path(t.route, t.id("A"), t.id("B"))
        .unwrap();
    assert_eq!(response.distance, 1.0);
    assert!(!t.service.index().is_loaded(other.id));
    assert_eq!(t.service.stops_for_route(other.id).unwrap()[0].id, x.id);
}

#[test]
fn test_missing_route_query_keeps_cached_route() {
    let service = RouteGraphService::new(
        Arc::new(MemoryStore::new()),
        ServiceConfig::with_index(IndexConfig {
            max_cached_routes: 1,
            ..IndexConfig::default()
        }),
    );
    let t = build_tour(service, &["A", "B"], &[("A", "B", 1.0)]);
    assert!(t.service.index().is_loaded(t.route));

    let err = t.service.shortest_path(9_999, 1, 2).unwrap_err();
    assert!(matches!(err, TourError::NotFound { entity: "route", .. }));
    let err = t.service.distances_from(9_998, 1).unwrap_err();
    assert!(matches!(err, TourError::NotFound { entity: "route", .. }));

    assert!(t.service.index().is_loaded(t.route));
    assert_eq!(t.service.index().len(), 1);
}

#[test]
fn test_external_writer_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tours.db");
    let writer = RouteGraphService::new(
        Arc::new(SqliteStore::open(&path).unwrap()),
        ServiceConfig::default(),
    );
    let reader = RouteGraphService::new(
        Arc::new(SqliteStore::open(&path).unwrap()),
        ServiceConfig::default(),
    );

    let user = writer
        .create_user("Ana Torres", "ana@example.com", "hash")
        .unwrap();
    let route = writer.create_route(user.id, "Centro", None).unwrap();
    let a = writer.add_stop(route.id, "A", None).unwrap();
    let b = writer.add_stop(route.id, "B", None).unwrap();

    assert!(reader
        .shortest_path(route.id, a.id, b.id)
        .unwrap_err()
        .is_unreachable());

    writer.add_neighbor(route.id, a.id, b.id, 4.0).unwrap();
    // Cached subgraph until told otherwise.
    assert!(reader
        .shortest_path(route.id, a.id, b.id)
        .unwrap_err()
        .is_unreachable());

    assert_eq!(reader.invalidate(route.id), 1);
    assert_eq!(
        reader.shortest_path(route.id, a.id, b.id).unwrap().distance,
        4.0
    );
    let status = reader.route_status(route.id).unwrap();
    assert_eq!(status.status, LoadState::Loaded);
    assert_eq!(status.loaded_generation, 1);
}

#[test]
fn test_stale_status_without_auto_reload() {
    let service = RouteGraphService::new(
        Arc::new(MemoryStore::new()),
        ServiceConfig::with_index(IndexConfig {
            auto_reload: false,
            ..IndexConfig::default()
        }),
    );
    let t = build_tour(service, &["A", "B"], &[]);
    t.service
        .store()
        .insert_neighbor(&Neighbor {
            origin: t.id("A"),
            destination: t.id("B"),
            distance: 2.0,
        })
        .unwrap();
    t.service.invalidate(t.route);

    let status = t.service.route_status(t.route).unwrap();
    assert_eq!(status.status, LoadState::Stale);
    assert!(status.is_stale);
    assert_eq!(status.current_generation, 1);
    assert!(t
        .service
        .shortest_path(t.route, t.id("A"), t.id("B"))
        .unwrap_err()
        .is_unreachable());

    let stats = t.service.load(t.route).unwrap();
    assert_eq!(stats.edge_count, 1);
    let rows = t.service.index_status();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, LoadState::Loaded);
    assert_eq!(rows[0].edge_count, 1);
}

#[test]
fn test_mutations_see_external_writes_without_auto_reload() {
    for (label, store) in stores() {
        let service = RouteGraphService::new(
            store,
            ServiceConfig::with_index(IndexConfig {
                auto_reload: false,
                ..IndexConfig::default()
            }),
        );
        let t = build_tour(service, &["A", "B"], &[]);
        let store = t.service.store();
        store
            .insert_neighbor(&Neighbor {
                origin: t.id("A"),
                destination: t.id("B"),
                distance: 2.0,
            })
            .unwrap();
        let c = store
            .insert_stop(&NewStop {
                route_id: t.route,
                name: "C".into(),
                description: None,
            })
            .unwrap();
        t.service.invalidate(t.route);

        let removed = t
            .service
            .remove_neighbor(t.route, t.id("A"), t.id("B"))
            .unwrap();
        assert!(removed, "{label}");
        assert!(store.get_neighbors_for_route(t.route).unwrap().is_empty(), "{label}");

        t.service.add_neighbor(t.route, t.id("B"), c.id, 1.0).unwrap();
        assert_eq!(
            t.service.shortest_path(t.route, t.id("B"), c.id).unwrap().distance,
            1.0,
            "{label}"
        );
    }
}

#[test]
fn test_route_status_not_loaded() {
    let service = RouteGraphService::new(Arc::new(MemoryStore::new()), ServiceConfig::default());
    let user = service
        .create_user("Ana Torres", "ana@example.com", "hash")
        .unwrap();
    let route = service.create_route(user.id, "Centro", None).unwrap();

    let status = service.route_status(route.id).unwrap();
    assert_eq!(status.status, LoadState::NotLoaded);
    assert_eq!(status.revision, 0);
    assert!(service.index_status().is_empty());
    assert!(matches!(
        service.route_status(route.id + 1),
        Err(TourError::NotFound { .. })
    ));
}
