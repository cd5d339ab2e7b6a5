//! ==============================================================================
//! registry.rs - mesh topology registry
//! ==============================================================================
//!
//! purpose:
//!     remembers the last known rpl routing table and collects the answer to
//!     a `routes` request.
//!
//! refresh cycle:
//!
//! ```text
//! `routes` sent ──► route line ──► route line ──► ... ──► quiet period ──► close
//!                    (deadline      (deadline                 elapsed
//!                     pushed)        pushed)
//! ```
//!
//! closing:
//!     the shell prints no end marker, so a cycle closes once no route line has
//!     arrived for `quiet_period`. on close the collected set replaces the
//!     registry in one swap; an empty cycle leaves the previous table alone.
//!
//! consistency:
//!     the table is an `Arc<[DeviceRoute]>`. readers clone the arc, so a reader
//!     holds exactly one generation and never a mix of two.
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::DeviceRoute;

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Arc<[DeviceRoute]>,
    generation: u64,
}

/// result of closing a refresh cycle
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Replaced(Arc<[DeviceRoute]>),
    NoResponse,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Arc::from(Vec::new()),
            generation: 0,
        }
    }

    /// current table; cheap, and immune to later replacements
    pub fn snapshot(&self) -> Arc<[DeviceRoute]> {
        Arc::clone(&self.devices)
    }

    /// number of completed replacements
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// close a refresh cycle, swapping in its candidates if there are any
    pub fn commit(&mut self, cycle: RefreshCycle) -> RefreshOutcome {
        let candidates = cycle.into_routes();
        if candidates.is_empty() {
            return RefreshOutcome::NoResponse;
        }
        self.devices = Arc::from(candidates);
        self.generation += 1;
        RefreshOutcome::Replaced(self.snapshot())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// routes collected since the last `routes` request
#[derive(Debug)]
pub struct RefreshCycle {
    candidates: BTreeMap<String, DeviceRoute>,
    quiet_period: Duration,
    deadline: Instant,
}

impl RefreshCycle {
    pub fn open(quiet_period: Duration) -> Self {
        Self {
            candidates: BTreeMap::new(),
            quiet_period,
            deadline: Instant::now() + quiet_period,
        }
    }

    /// add one route line; returns the running candidate list
    pub fn accept(&mut self, route: DeviceRoute) -> Vec<DeviceRoute> {
        self.candidates.insert(route.address.clone(), route);
        self.deadline = Instant::now() + self.quiet_period;
        self.routes()
    }

    /// a second `routes` request while collecting just extends the wait
    pub fn extend(&mut self) {
        self.deadline = Instant::now() + self.quiet_period;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn routes(&self) -> Vec<DeviceRoute> {
        self.candidates.values().cloned().collect()
    }

    fn into_routes(self) -> Vec<DeviceRoute> {
        self.candidates.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(address: &str, parent: &str) -> DeviceRoute {
        DeviceRoute {
            address: address.to_string(),
            parent: parent.to_string(),
            lifetime: 1800,
            is_root: parent.is_empty(),
        }
    }

    #[tokio::test]
    async fn test_commit_replaces_whole_table() {
        let mut registry = DeviceRegistry::new();

        let mut first = RefreshCycle::open(Duration::from_millis(10));
        first.accept(route("fd00::1", ""));
        first.accept(route("fd00::2", "fd00::1"));
        registry.commit(first);
        let old = registry.snapshot();

        let mut second = RefreshCycle::open(Duration::from_millis(10));
        second.accept(route("fd00::3", "fd00::1"));
        let outcome = registry.commit(second);

        // a reader holding the old generation still sees only the old table
        assert_eq!(old.len(), 2);
        assert!(old.iter().all(|r| r.address != "fd00::3"));

        let current = registry.snapshot();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].address, "fd00::3");
        assert_eq!(outcome, RefreshOutcome::Replaced(current));
        assert_eq!(registry.generation(), 2);
    }

    #[tokio::test]
    async fn test_empty_cycle_keeps_previous_table() {
        let mut registry = DeviceRegistry::new();
        let mut cycle = RefreshCycle::open(Duration::from_millis(10));
        cycle.accept(route("fd00::1", ""));
        registry.commit(cycle);

        let outcome = registry.commit(RefreshCycle::open(Duration::from_millis(10)));
        assert_eq!(outcome, RefreshOutcome::NoResponse);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.generation(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_address_keeps_latest_line() {
        let mut cycle = RefreshCycle::open(Duration::from_millis(10));
        cycle.accept(route("fd00::2", "fd00::1"));
        let routes = cycle.accept(route("fd00::2", "fd00::9"));
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].parent, "fd00::9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_pushes_deadline() {
        let mut cycle = RefreshCycle::open(Duration::from_millis(100));
        let first = cycle.deadline();
        tokio::time::advance(Duration::from_millis(60)).await;
        cycle.accept(route("fd00::1", ""));
        assert_eq!(cycle.deadline(), first + Duration::from_millis(60));
    }
}
