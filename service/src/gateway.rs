//! Consistency gateway: every mutation of users, routes, stops and neighbors.
//!
//! Route-scoped mutations run under the route's writer (see
//! `RouteGraphService::mutate`): validate against the current snapshot,
//! write the store, then publish the changed copy of the subgraph. A failed
//! store write returns before anything is published.
//!
//! Deletions are expressed as a [`DeletionPlan`] (neighbors, then stops, then
//! routes, then users) read from the store and executed as one unit.

use tour_graph_core::check_weight;
use tracing::{debug, info};

use crate::error::{TourError, TourResult};
use crate::model::{NewRoute, NewStop, NewUser, Neighbor, Route, RouteId, Stop, StopId, User, UserId};
use crate::service::{Mutation, RouteGraphService};
use crate::store::DeletionPlan;
use crate::validate;

impl RouteGraphService {
    // -----------------------------------------------------------------------
    // Users and routes
    // -----------------------------------------------------------------------

    /// Register a user. Email is stored trimmed and lower-cased.
    pub fn create_user(&self, name: &str, email: &str, credential_hash: &str) -> TourResult<User> {
        let name = validate::user_name(name)?;
        let email = validate::email(email)?;
        validate::credential_hash(credential_hash)?;

        let user = self.store.create_user(&NewUser {
            name,
            email,
            credential_hash: credential_hash.to_string(),
        })?;
        info!(user = user.id, "user created");
        Ok(user)
    }

    /// Delete a user with every route, stop and neighbor row it owns.
    ///
    /// The whole cascade is one store operation. Subgraphs of the removed
    /// routes are dropped from the index afterwards, one route at a time.
    pub fn remove_user(&self, user: UserId) -> TourResult<DeletionPlan> {
        self.store.get_user(user)?;
        let routes = self.store.routes_for_user(user)?;

        let mut plan = DeletionPlan::default();
        for route in &routes {
            let stops = self.store.get_stops_for_route(route.id)?;
            let neighbors = self.store.get_neighbors_for_route(route.id)?;
            plan.merge(DeletionPlan::for_route(route.id, &stops, &neighbors));
        }
        plan.users.push(user);
        self.store.execute_plan(&plan)?;

        for route in &routes {
            self.index.evict(route.id);
            self.generations.forget(route.id);
        }
        info!(user, routes = routes.len(), steps = plan.len(), "user removed");
        Ok(plan)
    }

    pub fn create_route(
        &self,
        user: UserId,
        name: &str,
        description: Option<&str>,
    ) -> TourResult<Route> {
        let route = self.store.create_route(&NewRoute {
            user_id: user,
            name: validate::route_name(name)?,
            description: validate::description(description)?,
        })?;
        info!(user, route = route.id, "route created");
        Ok(route)
    }

    /// Delete a route, its stops and every neighbor row touching them.
    ///
    /// The route's subgraph is retired under its writer, so no mutation of
    /// the route can interleave with the deletion.
    pub fn remove_route(&self, route: RouteId) -> TourResult<DeletionPlan> {
        let plan = self.retire_route(route, || {
            self.store.get_route(route)?;
            let stops = self.store.get_stops_for_route(route)?;
            let neighbors = self.store.get_neighbors_for_route(route)?;
            let plan = DeletionPlan::for_route(route, &stops, &neighbors);
            self.store.execute_plan(&plan)?;
            Ok(plan)
        })?;
        info!(
            route,
            stops = plan.stops.len(),
            neighbors = plan.neighbors.len(),
            "route removed"
        );
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Stops
    // -----------------------------------------------------------------------

    pub fn add_stop(&self, route: RouteId, name: &str, description: Option<&str>) -> TourResult<Stop> {
        let new_stop = NewStop {
            route_id: route,
            name: validate::stop_name(name)?,
            description: validate::description(description)?,
        };
        let stop = self.mutate(route, |snap| {
            let stop = self.store.insert_stop(&new_stop)?;
            let (id, name) = (stop.id, stop.name.clone());
            Ok(Mutation::apply(&snap.graph, stop, |g| g.add_stop(id, name)))
        })?;
        debug!(route, stop = stop.id, "stop added");
        Ok(stop)
    }

    /// Change a stop's name and description.
    pub fn rename_stop(
        &self,
        route: RouteId,
        stop: StopId,
        name: &str,
        description: Option<&str>,
    ) -> TourResult<Stop> {
        let name = validate::stop_name(name)?;
        let description = validate::description(description)?;
        self.mutate(route, |snap| {
            let current = self.store.get_stop(stop)?;
            if current.route_id != route {
                return Err(TourError::UnknownStop { route, stop });
            }
            let updated = Stop {
                name: name.clone(),
                description: description.clone(),
                ..current
            };
            self.store.update_stop(&updated)?;
            let label = updated.name.clone();
            Ok(Mutation::apply(&snap.graph, updated, |g| {
                g.set_stop_name(stop, label)
            }))
        })
    }

    /// Delete a stop and every neighbor row where it is origin or destination.
    ///
    /// Fails with `NotFound` if the stop does not exist and `UnknownStop` if
    /// it belongs to another route.
    pub fn remove_stop(&self, route: RouteId, stop: StopId) -> TourResult<DeletionPlan> {
        let plan = self.mutate(route, |snap| {
            let record = self.store.get_stop(stop)?;
            if record.route_id != route {
                return Err(TourError::UnknownStop { route, stop });
            }
            let neighbors = self.store.get_neighbors_for_route(route)?;
            let plan = DeletionPlan::for_stop(stop, &neighbors);
            self.store.execute_plan(&plan)?;
            Ok(Mutation::apply(&snap.graph, plan, |g| {
                g.remove_stop(stop);
                Ok(())
            }))
        })?;
        debug!(route, stop, neighbors = plan.neighbors.len(), "stop removed");
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Neighbors
    // -----------------------------------------------------------------------

    /// Insert a directed edge between two stops of the route.
    ///
    /// `InvalidWeight` for negative or non-finite distances, `Validation` for
    /// a self-connection, `UnknownStop` if an endpoint is not in the route
    /// (including stops of other routes) and `Conflict` if the pair exists.
    pub fn add_neighbor(
        &self,
        route: RouteId,
        origin: StopId,
        destination: StopId,
        distance: f64,
    ) -> TourResult<Neighbor> {
        let distance = check_weight(distance)?;
        if origin == destination {
            return Err(TourError::validation(
                "neighbor",
                "a stop cannot be connected to itself",
            ));
        }
        let neighbor = self.mutate(route, |snap| {
            require_stop(snap.graph.contains_stop(origin), route, origin)?;
            require_stop(snap.graph.contains_stop(destination), route, destination)?;
            if snap.graph.edge_weight(origin, destination).is_some() {
                return Err(TourError::Conflict(format!(
                    "neighbor {origin} -> {destination} already exists"
                )));
            }
            let neighbor = Neighbor {
                origin,
                destination,
                distance,
            };
            self.store.insert_neighbor(&neighbor)?;
            Ok(Mutation::apply(&snap.graph, neighbor, |g| {
                g.add_edge(origin, destination, distance)
            }))
        })?;
        debug!(route, origin, destination, distance, "neighbor added");
        Ok(neighbor)
    }

    /// Change an edge's distance and optionally re-point it to another stop
    /// of the same route. Re-pointing is a single store step.
    pub fn update_neighbor(
        &self,
        route: RouteId,
        origin: StopId,
        destination: StopId,
        new_destination: Option<StopId>,
        distance: f64,
    ) -> TourResult<Neighbor> {
        let distance = check_weight(distance)?;
        let target = new_destination.unwrap_or(destination);
        if target == origin {
            return Err(TourError::validation(
                "neighbor",
                "a stop cannot be connected to itself",
            ));
        }
        let neighbor = self.mutate(route, |snap| {
            require_stop(snap.graph.contains_stop(origin), route, origin)?;
            if snap.graph.edge_weight(origin, destination).is_none() {
                return Err(TourError::not_found(
                    "neighbor",
                    format!("{origin} -> {destination}"),
                ));
            }
            require_stop(snap.graph.contains_stop(target), route, target)?;

            let updated = Neighbor {
                origin,
                destination: target,
                distance,
            };
            if target == destination {
                self.store
                    .update_neighbor_distance(origin, destination, distance)?;
                return Ok(Mutation::apply(&snap.graph, updated, |g| {
                    g.set_weight(origin, destination, distance)
                }));
            }

            if snap.graph.edge_weight(origin, target).is_some() {
                return Err(TourError::Conflict(format!(
                    "neighbor {origin} -> {target} already exists"
                )));
            }
            self.store
                .replace_neighbor((origin, destination), &updated)?;
            Ok(Mutation::apply(&snap.graph, updated, |g| {
                g.remove_edge(origin, destination);
                g.add_edge(origin, target, distance)
            }))
        })?;
        debug!(route, origin, destination, target, distance, "neighbor updated");
        Ok(neighbor)
    }

    /// Remove a directed edge. Removing an absent edge is a no-op that
    /// returns false and does not touch the store.
    pub fn remove_neighbor(
        &self,
        route: RouteId,
        origin: StopId,
        destination: StopId,
    ) -> TourResult<bool> {
        let removed = self.mutate(route, |snap| {
            if snap.graph.edge_weight(origin, destination).is_none() {
                return Ok(Mutation::Unchanged(false));
            }
            self.store.delete_neighbor(origin, destination)?;
            Ok(Mutation::apply(&snap.graph, true, |g| {
                g.remove_edge(origin, destination);
                Ok(())
            }))
        })?;
        if removed {
            debug!(route, origin, destination, "neighbor removed");
        }
        Ok(removed)
    }
}

fn require_stop(present: bool, route: RouteId, stop: StopId) -> TourResult<()> {
    if present {
        Ok(())
    } else {
        Err(TourError::UnknownStop { route, stop })
    }
}
