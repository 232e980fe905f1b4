//! Generation-based cache invalidation.
//!
//! A monotonic per-route generation counter tracks writes that bypass the
//! gateway (another process on the same database, a migration). Such writers
//! call `RouteGraphService::invalidate(route)`, which bumps the counter.
//! Queries compare the generation a snapshot was loaded at with the current
//! value and reload when stale, subject to `auto_reload` and
//! `reload_debounce_ms`. Mutations always reload a stale snapshot first.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::RouteId;
use crate::util::lock;

/// Current generation of every route that was ever invalidated.
#[derive(Debug, Default)]
pub struct Generations {
    counters: Mutex<HashMap<RouteId, u64>>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0 if the route was never invalidated.
    pub fn current(&self, route: RouteId) -> u64 {
        lock(&self.counters).get(&route).copied().unwrap_or(0)
    }

    /// Bump the generation and return the new value. Starts at 1.
    pub fn bump(&self, route: RouteId) -> u64 {
        let mut counters = lock(&self.counters);
        let gen = counters.entry(route).or_insert(0);
        *gen += 1;
        *gen
    }

    /// Drop the counter of a deleted route.
    pub fn forget(&self, route: RouteId) {
        lock(&self.counters).remove(&route);
    }
}

/// What to do with a loaded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Stale, but auto-reload is off or the debounce window has not elapsed.
    ServeStale { loaded: u64, current: u64 },
    Reload { loaded: u64, current: u64 },
}

/// Decide whether a snapshot loaded at `loaded` (generation) and `loaded_at`
/// (time) may be served.
///
/// - Fresh (loaded >= current) → serve
/// - Stale + auto_reload off → serve stale
/// - Stale + auto_reload on + debounce not elapsed → serve stale
/// - Stale + auto_reload on + debounce elapsed → reload inline
pub fn check_freshness(
    loaded: u64,
    current: u64,
    loaded_at: Instant,
    auto_reload: bool,
    debounce: Duration,
) -> Freshness {
    if loaded >= current {
        return Freshness::Fresh;
    }
    if !auto_reload || loaded_at.elapsed() < debounce {
        return Freshness::ServeStale { loaded, current };
    }
    Freshness::Reload { loaded, current }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_per_route() {
        let gens = Generations::new();
        assert_eq!(gens.current(1), 0);
        assert_eq!(gens.bump(1), 1);
        assert_eq!(gens.bump(1), 2);
        assert_eq!(gens.bump(2), 1);
        assert_eq!(gens.current(1), 2);

        gens.forget(1);
        assert_eq!(gens.current(1), 0);
        assert_eq!(gens.current(2), 1);
    }

    #[test]
    fn test_fresh_snapshot() {
        let now = Instant::now();
        assert_eq!(
            check_freshness(3, 3, now, true, Duration::ZERO),
            Freshness::Fresh
        );
        assert_eq!(
            check_freshness(0, 0, now, false, Duration::ZERO),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_stale_without_auto_reload() {
        assert_eq!(
            check_freshness(1, 2, Instant::now(), false, Duration::ZERO),
            Freshness::ServeStale {
                loaded: 1,
                current: 2
            }
        );
    }

    #[test]
    fn test_stale_debounced() {
        assert_eq!(
            check_freshness(1, 2, Instant::now(), true, Duration::from_secs(3600)),
            Freshness::ServeStale {
                loaded: 1,
                current: 2
            }
        );
    }

    #[test]
    fn test_stale_reloads() {
        assert_eq!(
            check_freshness(1, 2, Instant::now(), true, Duration::ZERO),
            Freshness::Reload {
                loaded: 1,
                current: 2
            }
        );
    }
}
