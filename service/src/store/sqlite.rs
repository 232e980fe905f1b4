//! SQLite-backed entity store.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};
use tracing::debug;

use super::{DeletionPlan, DeletionStep, EntityStore, StoreError, StoreResult};
use crate::model::{
    NewRoute, NewStop, NewUser, Neighbor, Route, RouteId, Stop, StopId, User, UserId,
};
use crate::util::lock;

/// SQL schema definition.
const SCHEMA: &str = include_str!("schema.sql");

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(SCHEMA)])
}

/// Entity store over a single SQLite connection.
///
/// Foreign keys are enabled on open, so the `ON DELETE CASCADE` rules of the
/// schema hold for direct deletes; deletion plans still remove dependents
/// explicitly, inside one transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening sqlite store");
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations()
            .to_latest(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> StoreResult<R>) -> StoreResult<R> {
        let conn = lock(&self.conn);
        f(&conn)
    }

    fn with_conn_mut<R>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<R>) -> StoreResult<R> {
        let mut conn = lock(&self.conn);
        f(&mut conn)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        credential_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn route_from_row(row: &Row<'_>) -> rusqlite::Result<Route> {
    Ok(Route {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn stop_from_row(row: &Row<'_>) -> rusqlite::Result<Stop> {
    Ok(Stop {
        id: row.get(0)?,
        route_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn neighbor_from_row(row: &Row<'_>) -> rusqlite::Result<Neighbor> {
    Ok(Neighbor {
        origin: row.get(0)?,
        destination: row.get(1)?,
        distance: row.get(2)?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map UNIQUE / PRIMARY KEY violations to `Conflict`, everything else to `Backend`.
fn conflict_or_backend(err: rusqlite::Error, message: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::Conflict(message())
        }
        _ => StoreError::Backend(err),
    }
}

fn require(conn: &Connection, table: &'static str, entity: &'static str, id: i64) -> StoreResult<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)");
    let exists: bool = conn.query_row(&sql, params![id], |row| row.get(0))?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::not_found(entity, id))
    }
}

fn neighbor_key(origin: StopId, destination: StopId) -> String {
    format!("{origin} -> {destination}")
}

const USER_COLUMNS: &str = "id, name, email, credential_hash, created_at";
const ROUTE_COLUMNS: &str = "id, user_id, name, description, created_at";
const STOP_COLUMNS: &str = "id, route_id, name, description, created_at";

impl EntityStore for SqliteStore {
    fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        self.with_conn(|conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO users (name, email, credential_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user.name, user.email, user.credential_hash, created_at],
            )
            .map_err(|e| {
                conflict_or_backend(e, || format!("email {} is already registered", user.email))
            })?;
            Ok(User {
                id: conn.last_insert_rowid(),
                name: user.name.clone(),
                email: user.email.clone(),
                credential_hash: user.credential_hash.clone(),
                created_at,
            })
        })
    }

    fn get_user(&self, id: UserId) -> StoreResult<User> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("user", id))
        })
    }

    fn create_route(&self, route: &NewRoute) -> StoreResult<Route> {
        self.with_conn(|conn| {
            require(conn, "users", "user", route.user_id)?;
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO routes (user_id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![route.user_id, route.name, route.description, created_at],
            )
            .map_err(|e| {
                conflict_or_backend(e, || {
                    format!(
                        "route '{}' already exists for user {}",
                        route.name, route.user_id
                    )
                })
            })?;
            Ok(Route {
                id: conn.last_insert_rowid(),
                user_id: route.user_id,
                name: route.name.clone(),
                description: route.description.clone(),
                created_at,
            })
        })
    }

    fn get_route(&self, id: RouteId) -> StoreResult<Route> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ROUTE_COLUMNS} FROM routes WHERE id = ?1"),
                params![id],
                route_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("route", id))
        })
    }

    fn routes_for_user(&self, user_id: UserId) -> StoreResult<Vec<Route>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROUTE_COLUMNS} FROM routes WHERE user_id = ?1 \
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let routes = stmt
                .query_map(params![user_id], route_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(routes)
        })
    }

    fn get_stop(&self, id: StopId) -> StoreResult<Stop> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {STOP_COLUMNS} FROM stops WHERE id = ?1"),
                params![id],
                stop_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("stop", id))
        })
    }

    fn get_stops_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Stop>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STOP_COLUMNS} FROM stops WHERE route_id = ?1 ORDER BY id"
            ))?;
            let stops = stmt
                .query_map(params![route_id], stop_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(stops)
        })
    }

    fn insert_stop(&self, stop: &NewStop) -> StoreResult<Stop> {
        self.with_conn(|conn| {
            require(conn, "routes", "route", stop.route_id)?;
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO stops (route_id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![stop.route_id, stop.name, stop.description, created_at],
            )
            .map_err(|e| {
                conflict_or_backend(e, || {
                    format!(
                        "stop '{}' already exists in route {}",
                        stop.name, stop.route_id
                    )
                })
            })?;
            Ok(Stop {
                id: conn.last_insert_rowid(),
                route_id: stop.route_id,
                name: stop.name.clone(),
                description: stop.description.clone(),
                created_at,
            })
        })
    }

    fn update_stop(&self, stop: &Stop) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE stops SET name = ?1, description = ?2 WHERE id = ?3",
                    params![stop.name, stop.description, stop.id],
                )
                .map_err(|e| {
                    conflict_or_backend(e, || {
                        format!(
                            "stop '{}' already exists in route {}",
                            stop.name, stop.route_id
                        )
                    })
                })?;
            if changed == 0 {
                return Err(StoreError::not_found("stop", stop.id));
            }
            Ok(())
        })
    }

    fn get_neighbors_for_route(&self, route_id: RouteId) -> StoreResult<Vec<Neighbor>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.origin_id, n.destination_id, n.distance \
                 FROM neighbors n \
                 WHERE n.origin_id IN (SELECT id FROM stops WHERE route_id = ?1) \
                    OR n.destination_id IN (SELECT id FROM stops WHERE route_id = ?1) \
                 ORDER BY n.origin_id, n.destination_id",
            )?;
            let neighbors = stmt
                .query_map(params![route_id], neighbor_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(neighbors)
        })
    }

    fn insert_neighbor(&self, neighbor: &Neighbor) -> StoreResult<()> {
        self.with_conn(|conn| {
            require(conn, "stops", "stop", neighbor.origin)?;
            require(conn, "stops", "stop", neighbor.destination)?;
            conn.execute(
                "INSERT INTO neighbors (origin_id, destination_id, distance) VALUES (?1, ?2, ?3)",
                params![neighbor.origin, neighbor.destination, neighbor.distance],
            )
            .map_err(|e| {
                conflict_or_backend(e, || {
                    format!(
                        "neighbor {} already exists",
                        neighbor_key(neighbor.origin, neighbor.destination)
                    )
                })
            })?;
            Ok(())
        })
    }

    fn update_neighbor_distance(
        &self,
        origin: StopId,
        destination: StopId,
        distance: f64,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE neighbors SET distance = ?1 WHERE origin_id = ?2 AND destination_id = ?3",
                params![distance, origin, destination],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(
                    "neighbor",
                    neighbor_key(origin, destination),
                ));
            }
            Ok(())
        })
    }

    fn replace_neighbor(&self, old: (StopId, StopId), new: &Neighbor) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM neighbors WHERE origin_id = ?1 AND destination_id = ?2",
                params![old.0, old.1],
            )?;
            if removed == 0 {
                return Err(StoreError::not_found("neighbor", neighbor_key(old.0, old.1)));
            }
            require(&tx, "stops", "stop", new.origin)?;
            require(&tx, "stops", "stop", new.destination)?;
            tx.execute(
                "INSERT INTO neighbors (origin_id, destination_id, distance) VALUES (?1, ?2, ?3)",
                params![new.origin, new.destination, new.distance],
            )
            .map_err(|e| {
                conflict_or_backend(e, || {
                    format!(
                        "neighbor {} already exists",
                        neighbor_key(new.origin, new.destination)
                    )
                })
            })?;
            tx.commit()?;
            Ok(())
        })
    }

    fn delete_neighbor(&self, origin: StopId, destination: StopId) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM neighbors WHERE origin_id = ?1 AND destination_id = ?2",
                params![origin, destination],
            )?;
            Ok(removed > 0)
        })
    }

    fn delete_stop(&self, id: StopId) -> StoreResult<()> {
        self.with_conn(|conn| {
            if conn.execute("DELETE FROM stops WHERE id = ?1", params![id])? == 0 {
                return Err(StoreError::not_found("stop", id));
            }
            Ok(())
        })
    }

    fn delete_route(&self, id: RouteId) -> StoreResult<()> {
        self.with_conn(|conn| {
            if conn.execute("DELETE FROM routes WHERE id = ?1", params![id])? == 0 {
                return Err(StoreError::not_found("route", id));
            }
            Ok(())
        })
    }

    fn execute_plan(&self, plan: &DeletionPlan) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            // Dropping the transaction on an early return rolls it back.
            let tx = conn.transaction()?;
            for step in plan.steps() {
                match step {
                    DeletionStep::Neighbor(origin, destination) => {
                        tx.execute(
                            "DELETE FROM neighbors WHERE origin_id = ?1 AND destination_id = ?2",
                            params![origin, destination],
                        )?;
                    }
                    DeletionStep::Stop(id) => {
                        if tx.execute("DELETE FROM stops WHERE id = ?1", params![id])? == 0
                            && plan.requires(step)
                        {
                            return Err(StoreError::not_found("stop", id));
                        }
                    }
                    DeletionStep::Route(id) => {
                        if tx.execute("DELETE FROM routes WHERE id = ?1", params![id])? == 0
                            && plan.requires(step)
                        {
                            return Err(StoreError::not_found("route", id));
                        }
                    }
                    DeletionStep::User(id) => {
                        if tx.execute("DELETE FROM users WHERE id = ?1", params![id])? == 0 {
                            return Err(StoreError::not_found("user", id));
                        }
                    }
                }
            }
            tx.commit()?;
            debug!(steps = plan.len(), "deletion plan committed");
            Ok(())
        })
    }
}
