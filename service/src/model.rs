//! Entity records for the four relations: users, routes, stops, neighbors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tour_graph_core::{RouteId, StopId};

/// User identifier (the `users` primary key).
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub credential_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRoute {
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub route_id: RouteId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStop {
    pub route_id: RouteId,
    pub name: String,
    pub description: Option<String>,
}

/// Directed, weighted edge between two stops. Keyed by (origin, destination).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub origin: StopId,
    pub destination: StopId,
    pub distance: f64,
}

impl Neighbor {
    pub fn key(&self) -> (StopId, StopId) {
        (self.origin, self.destination)
    }

    pub fn touches(&self, stop: StopId) -> bool {
        self.origin == stop || self.destination == stop
    }
}
