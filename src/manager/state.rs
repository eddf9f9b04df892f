//! Manager lifecycle state.
//!
//! # State Transitions
//! ```text
//! Uninitialized → Configured → Running → ShuttingDown → Stopped
//!                     └──────── bind failure ─────────────┘
//! ```
//!
//! Leadership is tracked beside the state: a `Running` manager is either
//! elected (active) or waiting for the lease (standby).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::observability::metrics;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized = 0,
    Configured = 1,
    Running = 2,
    ShuttingDown = 3,
    Stopped = 4,
}

impl From<u8> for ManagerState {
    fn from(val: u8) -> Self {
        match val {
            1 => ManagerState::Configured,
            2 => ManagerState::Running,
            3 => ManagerState::ShuttingDown,
            4 => ManagerState::Stopped,
            _ => ManagerState::Uninitialized,
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Configured => "configured",
            ManagerState::Running => "running",
            ManagerState::ShuttingDown => "shutting-down",
            ManagerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared view of the manager, read by the health probes.
#[derive(Debug)]
pub struct ManagerStatus {
    state: AtomicU8,
    elected: AtomicBool,
    /// Milliseconds since `epoch` at the last scheduler heartbeat.
    heartbeat_ms: AtomicU64,
    epoch: Instant,
}

impl ManagerStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ManagerState::Uninitialized as u8),
            elected: AtomicBool::new(false),
            heartbeat_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ManagerState) {
        let previous = ManagerState::from(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Manager state changed");
            metrics::set_manager_state(state);
        }
    }

    /// True while this replica may run leader-only work.
    pub fn is_elected(&self) -> bool {
        self.elected.load(Ordering::Acquire)
    }

    pub(crate) fn set_elected(&self, elected: bool) {
        if self.elected.swap(elected, Ordering::AcqRel) != elected {
            metrics::set_leader(elected);
        }
    }

    /// Record that the scheduler made progress.
    pub(crate) fn beat(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.heartbeat_ms.store(ms, Ordering::Release);
    }

    /// Time since the last heartbeat.
    pub fn heartbeat_age(&self) -> Duration {
        let last = Duration::from_millis(self.heartbeat_ms.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for ManagerStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            ManagerState::Uninitialized,
            ManagerState::Configured,
            ManagerState::Running,
            ManagerState::ShuttingDown,
            ManagerState::Stopped,
        ] {
            assert_eq!(ManagerState::from(state as u8), state);
        }
        assert_eq!(ManagerState::from(42), ManagerState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_age() {
        let status = ManagerStatus::new();
        status.beat();
        assert!(status.heartbeat_age() < Duration::from_millis(1));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(status.heartbeat_age() >= Duration::from_secs(5));

        status.beat();
        assert!(status.heartbeat_age() < Duration::from_millis(1));
    }
}
