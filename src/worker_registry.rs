//! Tracks connected workers: their active connection counts, shutdown state,
//! and the moment they fell to zero connections.
//!
//! The registry takes `now` as an explicit parameter on every call that cares
//! about elapsed time rather than reading the wall clock itself. This keeps
//! forget-delay behavior deterministic to test.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::id::WorkerId;

/// Elapsed time since an arbitrary reference point chosen by the caller
/// (typically "broker start"). Not wall-clock time: the broker never reads
/// the clock itself.
pub type Timestamp = Duration;

#[derive(Debug, Clone)]
struct WorkerEntry {
    connections: u32,
    shutting_down: bool,
    disconnected_at: Option<Timestamp>,
}

/// Registered workers plus the canonical sorted id list shuffle-sharding
/// samples from. `workers_sorted` is strictly ascending and always equal to
/// the registry's key set, guaranteed here by backing both with a single
/// `BTreeMap`.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: BTreeMap::new(),
        }
    }

    /// Sorted ascending, matching the registry's key set exactly.
    pub fn sorted_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, worker: &WorkerId) -> bool {
        self.workers.contains_key(worker)
    }

    /// True iff the worker is known and not marked shutting down. Used by
    /// `DequeueForWorker`'s eligibility check.
    pub fn is_eligible(&self, worker: &WorkerId) -> bool {
        matches!(self.workers.get(worker), Some(w) if !w.shutting_down)
    }

    /// Returns `true` if a new worker was added (the registry's caller must
    /// then trigger a global reassignment).
    pub fn add_connection(&mut self, worker: &WorkerId) -> bool {
        if let Some(entry) = self.workers.get_mut(worker) {
            entry.connections += 1;
            entry.shutting_down = false;
            entry.disconnected_at = None;
            false
        } else {
            self.workers.insert(
                worker.clone(),
                WorkerEntry {
                    connections: 1,
                    shutting_down: false,
                    disconnected_at: None,
                },
            );
            info!(%worker, "worker connected");
            true
        }
    }

    /// Returns `true` if the worker was removed from the registry (the
    /// caller must then trigger a global reassignment).
    ///
    /// Panics if `worker` is unknown or already has zero connections: both
    /// indicate the caller double-reported a disconnect, which this crate
    /// treats as fatal state corruption.
    pub fn remove_connection(&mut self, worker: &WorkerId, now: Timestamp, forget_delay: Duration) -> bool {
        let entry = self
            .workers
            .get_mut(worker)
            .unwrap_or_else(|| panic!("remove_connection on unknown worker {worker}"));
        assert!(
            entry.connections > 0,
            "remove_connection on worker {worker} with zero connections"
        );

        entry.connections -= 1;
        if entry.connections > 0 {
            return false;
        }

        if entry.shutting_down || forget_delay.is_zero() {
            self.workers.remove(worker);
            info!(%worker, "worker removed");
            true
        } else {
            entry.disconnected_at = Some(now);
            debug!(%worker, "worker disconnected, starting forget-delay window");
            false
        }
    }

    /// Idempotent: unknown workers are silently ignored (covers the race
    /// with a concurrent removal).
    ///
    /// Returns `true` if this call removed the worker outright (it had zero
    /// connections already), requiring a global reassignment.
    pub fn notify_shutdown(&mut self, worker: &WorkerId) -> bool {
        let Some(entry) = self.workers.get_mut(worker) else {
            debug!(%worker, "shutdown notice for unknown worker, ignored");
            return false;
        };

        if entry.connections == 0 {
            self.workers.remove(worker);
            info!(%worker, "worker removed on shutdown notice");
            true
        } else {
            if !entry.shutting_down {
                info!(%worker, "worker marked shutting down");
            }
            entry.shutting_down = true;
            false
        }
    }

    /// Removes every worker at zero connections whose forget-delay window
    /// has elapsed. Returns the count removed. A no-op (returns 0) when
    /// `forget_delay` is zero: that case is handled immediately in
    /// `remove_connection` instead.
    pub fn forget_disconnected(&mut self, now: Timestamp, forget_delay: Duration) -> usize {
        if forget_delay.is_zero() {
            return 0;
        }

        let expired: Vec<WorkerId> = self
            .workers
            .iter()
            .filter_map(|(id, entry)| {
                let disconnected_at = entry.disconnected_at?;
                // Inclusive boundary: a worker becomes forgettable the instant
                // `now` reaches `disconnected_at + forget_delay`, not strictly
                // after it.
                (entry.connections == 0 && now >= disconnected_at + forget_delay)
                    .then(|| id.clone())
            })
            .collect();

        for id in &expired {
            self.workers.remove(id);
            info!(worker = %id, "worker forgotten after disconnect grace window");
        }
        expired.len()
    }
}
