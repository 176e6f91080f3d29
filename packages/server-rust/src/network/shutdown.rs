//! Shutdown coordination for the HTTP server.
//!
//! Health state lives in an `ArcSwap` so probes and handlers read it without
//! locking. HTTP requests in progress are counted with RAII guards; the last
//! guard to drop wakes anyone waiting for the server to go idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Listener not serving yet.
    Starting,
    /// Accepting submissions.
    Ready,
    /// Refusing submissions; waiting for outstanding work.
    Draining,
    /// All outstanding work finished.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct ActiveRequests {
    count: AtomicU64,
    idle: Notify,
}

/// Health state plus the number of HTTP requests being handled.
#[derive(Debug)]
pub struct ShutdownController {
    state: ArcSwap<HealthState>,
    active: Arc<ActiveRequests>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(HealthState::Starting),
            active: Arc::new(ActiveRequests::default()),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Moves to `Draining`. Submissions are refused from here on.
    pub fn begin_draining(&self) {
        self.state.store(Arc::new(HealthState::Draining));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.health_state(),
            HealthState::Draining | HealthState::Stopped
        )
    }

    /// Counts one HTTP request as in flight until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.active.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            active: Arc::clone(&self.active),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.active.count.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for in-flight HTTP requests to finish.
    ///
    /// Returns `true` and moves to `Stopped` on success; on timeout returns
    /// `false` and stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                // Register before checking so a wakeup between the two is kept.
                let notified = self.active.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(timeout, idle).await.is_err() {
            return false;
        }
        self.state.store(Arc::new(HealthState::Stopped));
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one in-flight slot on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<ActiveRequests>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.active.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.active.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_of_health_state() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        assert!(!controller.is_shutting_down());

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);
        assert!(!controller.is_shutting_down());

        controller.begin_draining();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert!(controller.is_shutting_down());
    }

    #[test]
    fn health_state_names() {
        assert_eq!(HealthState::Starting.as_str(), "starting");
        assert_eq!(HealthState::Ready.as_str(), "ready");
        assert_eq!(HealthState::Draining.as_str(), "draining");
        assert_eq!(HealthState::Stopped.as_str(), "stopped");
    }

    #[test]
    fn guards_track_in_flight_requests() {
        let controller = ShutdownController::new();
        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(first);
        assert_eq!(controller.in_flight_count(), 1);
        drop(second);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn idle_controller_stops_immediately() {
        let controller = ShutdownController::new();
        controller.begin_draining();
        assert!(controller.wait_for_drain(Duration::ZERO).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn drain_wakes_when_last_guard_drops() {
        let controller = Arc::new(ShutdownController::new());
        controller.set_ready();
        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        controller.begin_draining();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.in_flight_count(), 0);
        assert_eq!(controller.health_state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_timeout_keeps_draining() {
        let controller = ShutdownController::new();
        let _guard = controller.in_flight_guard();
        controller.begin_draining();

        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
