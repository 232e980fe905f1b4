//! Process-local entity store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;

use super::{DeletionPlan, DeletionStep, EntityStore, StoreError, StoreResult};
use crate::model::{
    NewRoute, NewStop, NewUser, Neighbor, Route, RouteId, Stop, StopId, User, UserId,
};
use crate::util::lock;

#[derive(Debug, Clone, Default)]
struct Tables {
    last_user_id: UserId,
    last_route_id: RouteId,
    last_stop_id: StopId,
    users: BTreeMap<UserId, User>,
    routes: BTreeMap<RouteId, Route>,
    stops: BTreeMap<StopId, Stop>,
    neighbors: BTreeMap<(StopId, StopId), f64>,
}

impl Tables {
    fn require_stop(&self, id: StopId) -> StoreResult<&Stop> {
        self.stops
            .get(&id)
            .ok_or_else(|| StoreError::not_found("stop", id))
    }

    fn remove_stop(&mut self, id: StopId) -> StoreResult<()> {
        self.stops
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("stop", id))?;
        self.neighbors.retain(|&(o, d), _| o != id && d != id);
        Ok(())
    }

    fn remove_route(&mut self, id: RouteId) -> StoreResult<()> {
        self.routes
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("route", id))?;
        let stops: Vec<StopId> = self
            .stops
            .values()
            .filter(|s| s.route_id == id)
            .map(|s| s.id)
            .collect();
        for stop in stops {
            self.remove_stop(stop)?;
        }
        Ok(())
    }

    fn remove_user(&mut self, id: UserId) -> StoreResult<()> {
        self.users
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("user", id))?;
        let routes: Vec<RouteId> = self
            .routes
            .values()
            .filter(|r| r.user_id == id)
            .map(|r| r.id)
            .collect();
        for route in routes {
            self.remove_route(route)?;
        }
        Ok(())
    }
}

/// In-memory tables behind a single mutex.
///
/// Mirrors the relational layout closely enough to stand in for it: ids are
/// assigned from per-table sequences, uniqueness and foreign keys are checked
/// on insert, and deletes cascade.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryStore {
    fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        let mut t = lock(&self.tables);
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        t.last_user_id += 1;
        let record = User {
            id: t.last_user_id,
            name: user.name.clone(),
            email: user.email.clone(),
            credential_hash: user.credential_hash.clone(),
            created_at: Utc::now(),
        };
        t.users.insert(record.id, record.clone());
        Ok(record)
    }

    fn get_user(&self, id: UserId) -> StoreResult<User> {
        lock(&self.tables)
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    fn create_route(&self, route: &NewRoute) -> StoreResult<Route> {
        let mut t = lock(&self.tables);
        if !t.users.contains_key(&route.user_id) {
            return Err(StoreError::not_found("user", route.user_id));
        }
        if t
            .routes
            .values()
            .any(|r| r.user_id == route.user_id && r.name == route.name)
        {
            return Err(StoreError::Conflict(format!(
                "route '{}' already exists for user {}",
                route.name, route.user_id
            )));
        }
        t.last_route_id += 1;
        let record = Route {
            id: t.last_route_id,
            user_id: route.user_id,
            name: route.name.clone(),
            description: route.description.clone(),
            created_at: Utc::now(),
        };
        t.routes.insert(record.id, record.clone());
        Ok(record)
    }

    fn get_route(&self, id: RouteId) -> StoreResult<Route> {
        lock(&self.tables)
            .routes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("route", id))
    }

    fn routes_for_user(&self, user_id: UserId) -> StoreResult<Vec<Route>> {
        let t = lock(&self.tables);
        let mut routes: Vec<Route> = t
            .routes
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        routes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(routes)
    }

    fn get_stop(&self, id: StopId) -> StoreResult<Stop> {
        lock(&self.tables).require_stop(id).cloned()
    }

    fn get_stops_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Stop>> {
        let t = lock(&self.tables);
        Ok(t.stops
            .values()
            .filter(|s| s.route_id == route_id)
            .cloned()
            .collect())
    }

    fn insert_stop(&self, stop: &NewStop) -> StoreResult<Stop> {
        let mut t = lock(&self.tables);
        if !t.routes.contains_key(&stop.route_id) {
            return Err(StoreError::not_found("route", stop.route_id));
        }
        if t
            .stops
            .values()
            .any(|s| s.route_id == stop.route_id && s.name == stop.name)
        {
            return Err(StoreError::Conflict(format!(
                "stop '{}' already exists in route {}",
                stop.name, stop.route_id
            )));
        }
        t.last_stop_id += 1;
        let record = Stop {
            id: t.last_stop_id,
            route_id: stop.route_id,
            name: stop.name.clone(),
            description: stop.description.clone(),
            created_at: Utc::now(),
        };
        t.stops.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_stop(&self, stop: &Stop) -> StoreResult<()> {
        let mut t = lock(&self.tables);
        t.require_stop(stop.id)?;
        if t
            .stops
            .values()
            .any(|s| s.id != stop.id && s.route_id == stop.route_id && s.name == stop.name)
        {
            return Err(StoreError::Conflict(format!(
                "stop '{}' already exists in route {}",
                stop.name, stop.route_id
            )));
        }
        if let Some(existing) = t.stops.get_mut(&stop.id) {
            existing.name = stop.name.clone();
            existing.description = stop.description.clone();
        }
        Ok(())
    }

    fn get_neighbors_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Neighbor>> {
        let t = lock(&self.tables);
        let in_route = |id: &StopId| t.stops.get(id).is_some_and(|s| s.route_id == route_id);
        Ok(t.neighbors
            .iter()
            .filter(|((o, d), _)| in_route(o) || in_route(d))
            .map(|(&(origin, destination), &distance)| Neighbor {
                origin,
                destination,
                distance,
            })
            .collect())
    }

    fn insert_neighbor(&self, neighbor: &Neighbor) -> StoreResult<()> {
        let mut t = lock(&self.tables);
        t.require_stop(neighbor.origin)?;
        t.require_stop(neighbor.destination)?;
        if t.neighbors.contains_key(&neighbor.key()) {
            return Err(StoreError::Conflict(format!(
                "neighbor {} -> {} already exists",
                neighbor.origin, neighbor.destination
            )));
        }
        t.neighbors.insert(neighbor.key(), neighbor.distance);
        Ok(())
    }

    fn update_neighbor_distance(
        &self,
        origin: StopId,
        destination: StopId,
        distance: f64,
    ) -> StoreResult<()> {
        let mut t = lock(&self.tables);
        match t.neighbors.get_mut(&(origin, destination)) {
            Some(d) => {
                *d = distance;
                Ok(())
            }
            None => Err(StoreError::not_found(
                "neighbor",
                format!("{origin} -> {destination}"),
            )),
        }
    }

    fn replace_neighbor(&self, old: (StopId, StopId), new: &Neighbor) -> StoreResult<()> {
        let mut t = lock(&self.tables);
        if !t.neighbors.contains_key(&old) {
            return Err(StoreError::not_found(
                "neighbor",
                format!("{} -> {}", old.0, old.1),
            ));
        }
        t.require_stop(new.origin)?;
        t.require_stop(new.destination)?;
        if new.key() != old && t.neighbors.contains_key(&new.key()) {
            return Err(StoreError::Conflict(format!(
                "neighbor {} -> {} already exists",
                new.origin, new.destination
            )));
        }
        t.neighbors.remove(&old);
        t.neighbors.insert(new.key(), new.distance);
        Ok(())
    }

    fn delete_neighbor(&self, origin: StopId, destination: StopId) -> StoreResult<bool> {
        Ok(lock(&self.tables)
            .neighbors
            .remove(&(origin, destination))
            .is_some())
    }

    fn delete_stop(&self, id: StopId) -> StoreResult<()> {
        lock(&self.tables).remove_stop(id)
    }

    fn delete_route(&self, id: RouteId) -> StoreResult<()> {
        lock(&self.tables).remove_route(id)
    }

    fn execute_plan(&self, plan: &DeletionPlan) -> StoreResult<()> {
        let mut guard = lock(&self.tables);
        // Work on a copy so a failing step leaves the tables untouched.
        let mut next = guard.clone();
        for step in plan.steps() {
            let removed = match step {
                DeletionStep::Neighbor(o, d) => {
                    next.neighbors.remove(&(o, d));
                    Ok(())
                }
                DeletionStep::Stop(id) => next.remove_stop(id),
                DeletionStep::Route(id) => next.remove_route(id),
                DeletionStep::User(id) => next.remove_user(id),
            };
            match removed {
                Err(StoreError::NotFound { .. }) if !plan.requires(step) => {}
                other => other?,
            }
        }
        *guard = next;
        Ok(())
    }
}
