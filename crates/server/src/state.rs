//! Application state

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::coordinator::CoordinatorHandle;
use crate::store::Store;

/// Shared application state for the HTTP/WS layer.
pub struct AppState {
    coordinator: CoordinatorHandle,
    active_robots: Arc<ArcSwap<Vec<String>>>,
    store: Store,
}

impl AppState {
    pub fn new(
        coordinator: CoordinatorHandle,
        active_robots: Arc<ArcSwap<Vec<String>>>,
        store: Store,
    ) -> Self {
        Self {
            coordinator,
            active_robots,
            store,
        }
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Lock-free snapshot of the currently reachable robot identities.
    pub fn active_robots(&self) -> Vec<String> {
        self.active_robots.load_full().as_ref().clone()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
