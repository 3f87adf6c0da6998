//! Connectivity tracking.
//!
//! The platform layer (network reachability callbacks, OS events) drives a
//! [`ConnectivityMonitor`]; the engine only ever observes it.

use tokio::sync::watch;

// Re-export from shared types module
pub use crate::types::ConnectivityState;

/// Shared connectivity flag with change notifications.
///
/// Cheap to clone; every clone drives the same underlying channel.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    /// Mark the client as offline.
    pub fn set_offline(&self) {
        self.set(ConnectivityState::Offline);
    }

    /// Mark the client as online.
    pub fn set_online(&self) {
        self.set(ConnectivityState::Online);
    }

    /// Update the state; observers are only woken on an actual change.
    pub fn set(&self, state: ConnectivityState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::info!(state = ?state, "connectivity changed");
        }
    }

    pub fn is_offline(&self) -> bool {
        self.state() == ConnectivityState::Offline
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}
