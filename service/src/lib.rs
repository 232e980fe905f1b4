//! tour-graph: route graph service for the tours schema.
//!
//! Wraps tour-graph-core with an entity store (in-memory or SQLite), a
//! registry of per-route subgraphs and a consistency gateway that applies
//! every mutation to the store before publishing it to the index. Queries
//! run on immutable per-route snapshots, so a query racing a mutation sees
//! either the whole pre-state or the whole post-state.
//!
//! ```no_run
//! use tour_graph::{RouteGraphService, ServiceConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = RouteGraphService::from_config(ServiceConfig::from_env()?)?;
//! let user = service.create_user("Ana", "ana@example.com", "hash")?;
//! let route = service.create_route(user.id, "Centro", None)?;
//! let a = service.add_stop(route.id, "Plaza", None)?;
//! let b = service.add_stop(route.id, "Museo", None)?;
//! service.add_neighbor(route.id, a.id, b.id, 2.5)?;
//! let path = service.shortest_path(route.id, a.id, b.id)?;
//! println!("{}", serde_json::to_string(&path)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod gateway;
mod generation;
mod index;
mod load;
pub mod model;
mod path;
mod service;
mod status;
pub mod store;
mod util;
pub mod validate;

pub use config::{ConfigError, IndexConfig, ServiceConfig, StoreBackend, StoreConfig};
pub use error::{TourError, TourResult};
pub use generation::{check_freshness, Freshness, Generations};
pub use index::{AdjacencyIndex, RouteSnapshot};
pub use load::{load_route_graph, LoadStats};
pub use model::{Neighbor, Route, RouteId, Stop, StopId, User, UserId};
pub use path::{Connection, Hub, PathResponse, Reach, StopConnections, StopRef};
pub use service::RouteGraphService;
pub use status::{LoadState, RouteStatus};
pub use store::{DeletionPlan, DeletionStep, EntityStore, MemoryStore, SqliteStore, StoreError};
