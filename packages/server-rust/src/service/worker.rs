//! Bounded pool for background request processing.
//!
//! Every job is tracked by request id and shutdown can wait for the pool to
//! drain. `reserve` claims a slot before any work is recorded, so a caller
//! can persist state first and start the job after without racing shutdown.
//!
//! Starting a job never waits for capacity. Jobs over the cap queue on the
//! semaphore inside their own task, so the caller returns immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::gauge;
use provisioner_core::RequestId;
use tokio::sync::Semaphore;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// SpawnError
// ---------------------------------------------------------------------------

/// Reasons a slot is refused by [`TaskPool::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("request {0} is already being processed")]
    AlreadyInFlight(RequestId),
    #[error("task pool is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// InFlightEntry
// ---------------------------------------------------------------------------

/// Removes a request from the in-flight map when its job ends, including on
/// panic.
struct InFlightEntry {
    id: RequestId,
    in_flight: Arc<DashMap<RequestId, Instant>>,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        if let Some((_, started)) = self.in_flight.remove(&self.id) {
            debug!(
                request_id = %self.id,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Background job finished"
            );
        }
        record_gauge(&self.in_flight);
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_gauge(in_flight: &DashMap<RequestId, Instant>) {
    gauge!("provisioner_background_tasks").set(in_flight.len() as f64);
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// A claimed pool slot for one request, see [`TaskPool::reserve`].
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation {
    entry: InFlightEntry,
    token: TaskTrackerToken,
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
}

impl Reservation {
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.entry.id
    }

    /// Runs `job` in the slot. Works even if the pool closed after the
    /// reservation was taken.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            entry,
            token,
            permits,
            tracker,
        } = self;
        tracker.spawn(async move {
            let _entry = entry;
            let _token = token;
            // The semaphore is never closed, so acquisition only fails if it
            // is; run unthrottled in that case rather than dropping the job.
            let _permit = match permits {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            job.await;
        });
    }
}

// ---------------------------------------------------------------------------
// TaskPool
// ---------------------------------------------------------------------------

/// Tracked, optionally bounded set of background jobs keyed by request id.
#[derive(Debug)]
pub struct TaskPool {
    permits: Option<Arc<Semaphore>>,
    capacity: usize,
    tracker: TaskTracker,
    in_flight: Arc<DashMap<RequestId, Instant>>,
}

impl TaskPool {
    /// Creates a pool running at most `max_concurrent` jobs at once.
    /// Zero means unbounded.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
            capacity: max_concurrent,
            tracker: TaskTracker::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Claims the slot for request `id` without starting anything yet.
    ///
    /// While the returned [`Reservation`] is alive, [`drain`](Self::drain)
    /// keeps waiting, so work recorded under the reservation is never
    /// stranded by a concurrent shutdown. Dropping it releases the slot.
    ///
    /// # Errors
    ///
    /// - [`SpawnError::Closed`] once [`drain`](Self::drain) has been called.
    /// - [`SpawnError::AlreadyInFlight`] if a job for `id` is still tracked.
    pub fn reserve(&self, id: RequestId) -> Result<Reservation, SpawnError> {
        // Token first: a drain that closes after this check must wait for it.
        let token = self.tracker.token();
        if self.tracker.is_closed() {
            return Err(SpawnError::Closed);
        }

        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => return Err(SpawnError::AlreadyInFlight(id)),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            }
        }
        record_gauge(&self.in_flight);

        Ok(Reservation {
            entry: InFlightEntry {
                id,
                in_flight: Arc::clone(&self.in_flight),
            },
            token,
            permits: self.permits.clone(),
            tracker: self.tracker.clone(),
        })
    }

    /// Number of jobs accepted and not yet finished (running or queued).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of jobs currently holding a concurrency permit.
    #[must_use]
    pub fn running(&self) -> usize {
        match &self.permits {
            Some(semaphore) => self.capacity.saturating_sub(semaphore.available_permits()),
            None => self.in_flight(),
        }
    }

    /// Stops accepting jobs and waits up to `timeout` for tracked jobs to
    /// finish. Returns `true` if the pool drained in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            true
        } else {
            warn!(
                remaining = self.in_flight(),
                "Background jobs still running after drain timeout"
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
