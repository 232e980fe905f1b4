//! Entity store: the durable side of the tours schema.
//!
//! [`EntityStore`] is the boundary the route graph service consumes. Two
//! implementations ship with the crate: [`MemoryStore`] (process-local
//! tables, used by tests and as the default backend) and [`SqliteStore`].
//! Both enforce the same referential-integrity rules: a route needs a live
//! user, a stop a live route, a neighbor two live stops, and deletions
//! cascade user → routes → stops → incident neighbors.

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{
    NewRoute, NewStop, NewUser, Neighbor, Route, RouteId, Stop, StopId, User, UserId,
};

/// CRUD boundary over the four relations.
///
/// Every method is a single atomic store operation. `NotFound` is returned
/// when a referenced record is absent; `Conflict` on duplicate keys.
pub trait EntityStore: Send + Sync {
    fn create_user(&self, user: &NewUser) -> StoreResult<User>;
    fn get_user(&self, id: UserId) -> StoreResult<User>;

    fn create_route(&self, route: &NewRoute) -> StoreResult<Route>;
    fn get_route(&self, id: RouteId) -> StoreResult<Route>;
    /// Routes owned by a user, newest first.
    fn routes_for_user(&self, user_id: UserId) -> StoreResult<Vec<Route>>;

    fn get_stop(&self, id: StopId) -> StoreResult<Stop>;
    /// Stops of a route, ascending by id.
    fn get_stops_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Stop>>;
    fn insert_stop(&self, stop: &NewStop) -> StoreResult<Stop>;
    /// Persist a new name/description for an existing stop.
    fn update_stop(&self, stop: &Stop) -> StoreResult<()>;

    /// Neighbor rows with at least one endpoint among the route's stops,
    /// ordered by (origin, destination).
    fn get_neighbors_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Neighbor>>;
    fn insert_neighbor(&self, neighbor: &Neighbor) -> StoreResult<()>;
    fn update_neighbor_distance(
        &self,
        origin: StopId,
        destination: StopId,
        distance: f64,
    ) -> StoreResult<()>;
    /// Delete `old` and insert `new` in one step.
    fn replace_neighbor(&self, old: (StopId, StopId), new: &Neighbor) -> StoreResult<()>;
    /// Returns false if the row did not exist.
    fn delete_neighbor(&self, origin: StopId, destination: StopId) -> StoreResult<bool>;

    /// Delete a stop; incident neighbors cascade.
    fn delete_stop(&self, id: StopId) -> StoreResult<()>;
    /// Delete a route; its stops and their neighbors cascade.
    fn delete_route(&self, id: RouteId) -> StoreResult<()>;

    /// Run every step of `plan` in order as one unit: either all steps
    /// apply or none does.
    fn execute_plan(&self, plan: &DeletionPlan) -> StoreResult<()>;
}

/// One step of a deletion plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStep {
    Neighbor(StopId, StopId),
    Stop(StopId),
    Route(RouteId),
    User(UserId),
}

/// Dependency-ordered cascade: neighbors, then stops, then routes, then users.
///
/// Built from explicit reads instead of relying on `ON DELETE CASCADE`, so
/// the index can be told exactly what disappeared and any store can execute
/// it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    pub neighbors: Vec<(StopId, StopId)>,
    pub stops: Vec<StopId>,
    pub routes: Vec<RouteId>,
    pub users: Vec<UserId>,
}

impl DeletionPlan {
    /// Plan for one stop: every neighbor row where it is origin or destination.
    pub fn for_stop(stop: StopId, neighbors: &[Neighbor]) -> Self {
        Self {
            neighbors: neighbors
                .iter()
                .filter(|n| n.touches(stop))
                .map(Neighbor::key)
                .collect(),
            stops: vec![stop],
            ..Self::default()
        }
    }

    /// Plan for a route given its stops and the neighbors touching them.
    pub fn for_route(route: RouteId, stops: &[Stop], neighbors: &[Neighbor]) -> Self {
        Self {
            neighbors: neighbors.iter().map(Neighbor::key).collect(),
            stops: stops.iter().map(|s| s.id).collect(),
            routes: vec![route],
            users: Vec::new(),
        }
    }

    /// Append another plan. Neighbor keys shared by both are kept once.
    pub fn merge(&mut self, other: DeletionPlan) {
        for key in other.neighbors {
            if !self.neighbors.contains(&key) {
                self.neighbors.push(key);
            }
        }
        self.stops.extend(other.stops);
        self.routes.extend(other.routes);
        self.users.extend(other.users);
    }

    pub fn len(&self) -> usize {
        self.neighbors.len() + self.stops.len() + self.routes.len() + self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the row of `step` must still exist when the plan runs.
    ///
    /// Only the root of the plan (its highest non-empty level) is required.
    /// Dependent rows that a concurrent deletion already removed count as
    /// deleted.
    pub fn requires(&self, step: DeletionStep) -> bool {
        match step {
            DeletionStep::Neighbor(..) => false,
            DeletionStep::Stop(_) => self.routes.is_empty() && self.users.is_empty(),
            DeletionStep::Route(_) => self.users.is_empty(),
            DeletionStep::User(_) => true,
        }
    }

    /// Steps in execution order.
    pub fn steps(&self) -> impl Iterator<Item = DeletionStep> + '_ {
        self.neighbors
            .iter()
            .map(|&(o, d)| DeletionStep::Neighbor(o, d))
            .chain(self.stops.iter().map(|&s| DeletionStep::Stop(s)))
            .chain(self.routes.iter().map(|&r| DeletionStep::Route(r)))
            .chain(self.users.iter().map(|&u| DeletionStep::User(u)))
    }
}
