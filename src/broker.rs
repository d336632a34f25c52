//! The façade: composes the tree queue, worker registry and tenant registry
//! behind one lock.
//!
//! Every public method takes and releases the lock in one call. There is no
//! suspension point anywhere inside, so a synchronous `parking_lot::Mutex`
//! is the whole concurrency story: no actor loop, no channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info_span;

use crate::config::BrokerConfig;
use crate::errors::{DequeueError, EnqueueError};
use crate::id::{TenantId, WorkerId};
use crate::shuffle_shard;
use crate::tenant_registry::TenantRegistry;
use crate::tree_queue::TreeQueue;
use crate::worker_registry::{Timestamp, WorkerRegistry};

struct State<T> {
    queue: TreeQueue<T>,
    workers: WorkerRegistry,
    tenants: TenantRegistry,
}

struct Inner<T> {
    config: BrokerConfig,
    state: Mutex<State<T>>,
}

/// What `DequeueForWorker` hands back: the dequeued item (if any) tagged
/// with its tenant, and the rotation index the caller should pass as its
/// next `last_tenant_index`.
#[derive(Debug)]
pub struct DequeueOutcome<T> {
    pub item: Option<(TenantId, T)>,
    pub new_index: i64,
}

impl<T> DequeueOutcome<T> {
    pub fn is_empty(&self) -> bool {
        self.item.is_none()
    }
}

/// A handle to the broker's shared state. Cheap to clone (one `Arc` bump):
/// hand a clone to every worker-facing task rather than wrapping it in
/// another `Arc` yourself.
pub struct Broker<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Broker<T> {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    queue: TreeQueue::new(),
                    workers: WorkerRegistry::new(),
                    tenants: TenantRegistry::new(),
                }),
            }),
        }
    }

    /// Enqueues at the tail of the tenant's FIFO, creating or updating the
    /// tenant first. Fails (without enqueuing) if the leaf is already at the
    /// configured cap.
    pub fn enqueue_back(&self, tenant_id: &TenantId, payload: T, max_queriers: i64) -> Result<(), EnqueueError> {
        let mut state = self.inner.state.lock();
        Self::create_or_update_tenant(&mut state, tenant_id, max_queriers)?;

        let max_len = self.inner.config.max_tenant_queue_size;
        state
            .queue
            .enqueue_back(tenant_id, payload, max_len)
            .map_err(|e| EnqueueError::MaxQueueLengthExceeded {
                tenant: tenant_id.clone(),
                max: e.0,
            })
    }

    /// Enqueues at the head of the tenant's FIFO, bypassing the cap. Used to
    /// re-enqueue an item after a dispatch failure outside the broker.
    pub fn enqueue_front(&self, tenant_id: &TenantId, payload: T, max_queriers: i64) -> Result<(), EnqueueError> {
        let mut state = self.inner.state.lock();
        Self::create_or_update_tenant(&mut state, tenant_id, max_queriers)?;
        state.queue.enqueue_front(tenant_id, payload);
        Ok(())
    }

    fn create_or_update_tenant(
        state: &mut State<T>,
        tenant_id: &TenantId,
        max_queriers: i64,
    ) -> Result<(), EnqueueError> {
        let update = state
            .tenants
            .create_or_update(tenant_id, max_queriers)
            .map_err(|_| EnqueueError::InvalidTenantId)?;

        if update.created || update.max_queriers_changed {
            let workers_sorted = state.workers.sorted_ids();
            let entry = state
                .tenants
                .get_mut(tenant_id)
                .expect("just created or updated this tenant");
            let mut scratch = Vec::new();
            shuffle_shard::recompute_one(entry, &workers_sorted, &mut scratch);
        }
        Ok(())
    }

    /// Advances the rotation from `last_tenant_index`, returning the first
    /// request this worker is eligible for, or nothing if the scan
    /// completes without a match. Pass `-1` as `last_tenant_index` for a
    /// newly connected worker.
    pub fn dequeue_for_worker(
        &self,
        worker_id: &WorkerId,
        last_tenant_index: i64,
    ) -> Result<DequeueOutcome<T>, DequeueError> {
        let mut state = self.inner.state.lock();

        if !state.workers.is_eligible(worker_id) {
            return Err(DequeueError::WorkerShuttingDown);
        }

        let len = state.tenants.rotation_len();
        if len == 0 {
            return Ok(DequeueOutcome {
                item: None,
                new_index: last_tenant_index,
            });
        }

        // Explicit wrap, never modulo: the rotation order may have shrunk
        // since the caller last saw it, so a stale large index must land on
        // 0, not on a modulo-wrapped middle position.
        let next = last_tenant_index + 1;
        let mut index = if next < 0 || next as usize >= len { 0 } else { next as usize };

        for _ in 0..len {
            if let Some(tenant_id) = state.tenants.tenant_at(index).cloned() {
                let eligible = {
                    let entry = state
                        .tenants
                        .get(&tenant_id)
                        .expect("tenant_at only returns live tenants");
                    match &entry.assignment {
                        None => true,
                        Some(shard) => shard.contains(worker_id),
                    }
                };

                if eligible {
                    if let Some((payload, leaf_removed)) = state.queue.dequeue(&tenant_id) {
                        if leaf_removed {
                            state.tenants.remove(&tenant_id);
                        }
                        return Ok(DequeueOutcome {
                            item: Some((tenant_id, payload)),
                            new_index: index as i64,
                        });
                    }
                }
            }

            index += 1;
            if index >= len {
                index = 0;
            }
        }

        Ok(DequeueOutcome {
            item: None,
            new_index: last_tenant_index,
        })
    }

    pub fn add_worker_connection(&self, worker_id: &WorkerId) {
        let mut state = self.inner.state.lock();
        if state.workers.add_connection(worker_id) {
            Self::recompute_all_locked(&mut state);
        }
    }

    /// Panics if `worker_id` is unknown or already at zero connections. A
    /// surrounding service must de-duplicate disconnect events before
    /// calling this.
    pub fn remove_worker_connection(&self, worker_id: &WorkerId, now: Timestamp) {
        let mut state = self.inner.state.lock();
        let forget_delay = self.inner.config.forget_delay;
        if state.workers.remove_connection(worker_id, now, forget_delay) {
            Self::recompute_all_locked(&mut state);
        }
    }

    pub fn notify_worker_shutdown(&self, worker_id: &WorkerId) {
        let mut state = self.inner.state.lock();
        if state.workers.notify_shutdown(worker_id) {
            Self::recompute_all_locked(&mut state);
        }
    }

    /// Intended to be driven by an external tick at a cadence substantially
    /// shorter than `forget_delay`.
    pub fn forget_disconnected_workers(&self, now: Timestamp) -> usize {
        let mut state = self.inner.state.lock();
        let forget_delay = self.inner.config.forget_delay;
        let removed = state.workers.forget_disconnected(now, forget_delay);
        if removed > 0 {
            Self::recompute_all_locked(&mut state);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().queue.is_empty()
    }

    fn recompute_all_locked(state: &mut State<T>) {
        let workers_sorted = state.workers.sorted_ids();
        let span = info_span!("recompute_all_assignments", workers = workers_sorted.len());
        let _enter = span.enter();
        shuffle_shard::recompute_all(state.tenants.iter_mut().map(|(_, entry)| entry), &workers_sorted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Broker<&'static str> {
        Broker::new(BrokerConfig {
            max_tenant_queue_size: 10,
            forget_delay: std::time::Duration::ZERO,
        })
    }

    fn t(s: &str) -> TenantId {
        TenantId::new(s)
    }

    fn w(s: &str) -> WorkerId {
        WorkerId::new(s)
    }

    #[test]
    fn invalid_tenant_id_rejected_without_mutation() {
        let b = broker();
        assert!(matches!(
            b.enqueue_back(&TenantId::new(""), "x", 0),
            Err(EnqueueError::InvalidTenantId)
        ));
        assert!(b.is_empty());
    }

    #[test]
    fn fifo_within_tenant() {
        let b = broker();
        b.add_worker_connection(&w("q1"));
        b.enqueue_back(&t("a"), "1", 0).unwrap();
        b.enqueue_back(&t("a"), "2", 0).unwrap();
        b.enqueue_back(&t("a"), "3", 0).unwrap();

        let mut idx = -1;
        for expected in ["1", "2", "3"] {
            let out = b.dequeue_for_worker(&w("q1"), idx).unwrap();
            assert_eq!(out.item.unwrap().1, expected);
            idx = out.new_index;
        }
    }

    #[test]
    fn front_before_back() {
        let b = broker();
        b.add_worker_connection(&w("q1"));
        b.enqueue_back(&t("a"), "a", 0).unwrap();
        b.enqueue_front(&t("a"), "b", 0).unwrap();

        let out = b.dequeue_for_worker(&w("q1"), -1).unwrap();
        assert_eq!(out.item.unwrap().1, "b");
    }

    #[test]
    fn cap_enforced_and_reported_as_too_many_requests() {
        let b = Broker::new(BrokerConfig {
            max_tenant_queue_size: 1,
            forget_delay: std::time::Duration::ZERO,
        });
        b.enqueue_back(&t("a"), "1", 0).unwrap();
        let err = b.enqueue_back(&t("a"), "2", 0).unwrap_err();
        assert!(err.is_too_many_requests());
    }

    #[test]
    fn worker_shutting_down_is_rejected_without_advancing_index() {
        let b = broker();
        b.add_worker_connection(&w("q1"));
        b.notify_worker_shutdown(&w("q1"));
        let err = b.dequeue_for_worker(&w("q1"), 4).unwrap_err();
        assert!(matches!(err, DequeueError::WorkerShuttingDown));
    }

    #[test]
    fn requeue_on_dispatch_failure() {
        let b = broker();
        b.add_worker_connection(&w("q1"));
        b.enqueue_back(&t("t"), "a", 0).unwrap();
        b.enqueue_back(&t("t"), "b", 0).unwrap();

        let out = b.dequeue_for_worker(&w("q1"), -1).unwrap();
        let (tenant, item) = out.item.unwrap();
        assert_eq!(item, "a");

        b.enqueue_front(&tenant, item, 0).unwrap();

        let out = b.dequeue_for_worker(&w("q1"), out.new_index).unwrap();
        assert_eq!(out.item.unwrap().1, "a");
    }

    #[test]
    fn isolation_respects_computed_shard() {
        let b = broker();
        let workers = [w("q1"), w("q2"), w("q3")];
        for worker in &workers {
            b.add_worker_connection(worker);
        }
        b.enqueue_back(&t("tenant-a"), "a1", 1).unwrap();

        // Ask the same assigner the broker used internally what tenant-a's
        // one-worker shard actually is, rather than assuming a specific
        // worker. Only the *isolation* property is asserted here, not a
        // hardcoded shard member.
        let seed = crate::shuffle_shard::shuffle_shard_seed(&t("tenant-a"), "");
        let mut scratch = Vec::new();
        let shard = crate::shuffle_shard::compute_assignment(seed, 1, &workers, &mut scratch).unwrap();
        let assigned = shard[0].clone();

        for worker in &workers {
            let out = b.dequeue_for_worker(worker, -1).unwrap();
            if *worker == assigned {
                assert_eq!(out.item.unwrap().1, "a1");
            } else {
                assert!(out.is_empty());
            }
        }
    }

    #[test]
    fn tombstone_stability_redirects_to_surviving_tenant() {
        let b = broker();
        b.add_worker_connection(&w("q1"));
        b.enqueue_back(&t("a"), "a1", 0).unwrap();
        b.enqueue_back(&t("b"), "b1", 0).unwrap();
        b.enqueue_back(&t("c"), "c1", 0).unwrap();

        // Drain a (index 0), then b (index 1): b's leaf empties and gets tombstoned.
        let out = b.dequeue_for_worker(&w("q1"), -1).unwrap();
        assert_eq!(out.item.unwrap().1, "a1");
        let out = b.dequeue_for_worker(&w("q1"), out.new_index).unwrap();
        assert_eq!(out.item.unwrap().1, "b1");
        let held_index = out.new_index;

        let out = b.dequeue_for_worker(&w("q1"), held_index).unwrap();
        assert_eq!(out.item.unwrap().1, "c1");
    }

    #[test]
    fn rotation_wrap_safety_after_shrink() {
        let b = broker();
        b.add_worker_connection(&w("q1"));
        b.enqueue_back(&t("only"), "x", 0).unwrap();
        // A stale index far beyond the now-shrunk rotation order must wrap
        // to 0, not modulo into a middle slot.
        let out = b.dequeue_for_worker(&w("q1"), 999).unwrap();
        assert_eq!(out.item.unwrap().1, "x");
    }
}
