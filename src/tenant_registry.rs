//! Known tenants and the global rotation order workers walk to decide whose
//! request runs next.
//!
//! Removal writes a tombstone instead of re-indexing. A worker holds a
//! `last_tenant_index` across calls, and shifting other tenants down would
//! silently skip whichever tenant landed in the gap.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::id::{TenantId, WorkerId};
use crate::shuffle_shard::shuffle_shard_seed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tenant id must not be empty")]
pub struct InvalidTenantId;

#[derive(Debug, Clone)]
pub struct TenantEntry {
    pub max_queriers: u32,
    pub shuffle_shard_seed: u64,
    pub order_index: usize,
    /// `None` means "every currently known worker is eligible". `Some` is
    /// always non-empty and sized `min(max_queriers, |workers|)` as of its
    /// last computation.
    pub assignment: Option<Vec<WorkerId>>,
}

/// Outcome of [`TenantRegistry::create_or_update`], telling the caller
/// whether a (re)computation of this tenant's shard assignment is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantUpdate {
    pub created: bool,
    pub max_queriers_changed: bool,
}

#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: HashMap<TenantId, TenantEntry>,
    rotation_order: Vec<TenantId>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            tenants: HashMap::new(),
            rotation_order: Vec::new(),
        }
    }

    pub fn get(&self, tenant_id: &TenantId) -> Option<&TenantEntry> {
        self.tenants.get(tenant_id)
    }

    pub fn get_mut(&mut self, tenant_id: &TenantId) -> Option<&mut TenantEntry> {
        self.tenants.get_mut(tenant_id)
    }

    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        self.tenants.contains_key(tenant_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&TenantId, &mut TenantEntry)> {
        self.tenants.iter_mut()
    }

    pub fn rotation_len(&self) -> usize {
        self.rotation_order.len()
    }

    /// The tenant at `index`, or `None` if that slot is a tombstone. Callers
    /// must only pass `index < rotation_len()`.
    pub fn tenant_at(&self, index: usize) -> Option<&TenantId> {
        self.rotation_order
            .get(index)
            .filter(|id| !id.is_tombstone())
    }

    /// Creates the tenant if unknown (seeding `shuffle_shard_seed` from the
    /// tenant id alone, so independent broker instances converge), clamping
    /// a negative `max_queriers` to zero, and overwriting `max_queriers` if
    /// it changed. Returns what changed so the caller knows whether a shard
    /// recomputation for this tenant is due.
    pub fn create_or_update(
        &mut self,
        tenant_id: &TenantId,
        max_queriers: i64,
    ) -> Result<TenantUpdate, InvalidTenantId> {
        if tenant_id.is_tombstone() {
            return Err(InvalidTenantId);
        }
        let max_queriers = max_queriers.max(0) as u32;

        let created = if !self.tenants.contains_key(tenant_id) {
            let order_index = self.insert_into_rotation(tenant_id.clone());
            let seed = shuffle_shard_seed(tenant_id, "");
            self.tenants.insert(
                tenant_id.clone(),
                TenantEntry {
                    // Start at 0 so the comparison below always fires the
                    // first computation, even if the caller also passes 0.
                    max_queriers: 0,
                    shuffle_shard_seed: seed,
                    order_index,
                    assignment: None,
                },
            );
            debug!(%tenant_id, order_index, "tenant created");
            true
        } else {
            false
        };

        let entry = self.tenants.get_mut(tenant_id).expect("just inserted or already present");
        let max_queriers_changed = entry.max_queriers != max_queriers;
        if max_queriers_changed {
            entry.max_queriers = max_queriers;
        }

        Ok(TenantUpdate {
            created,
            max_queriers_changed,
        })
    }

    /// Reuses the lowest-indexed tombstone if one exists, otherwise appends.
    fn insert_into_rotation(&mut self, tenant_id: TenantId) -> usize {
        if let Some(slot) = self.rotation_order.iter().position(TenantId::is_tombstone) {
            self.rotation_order[slot] = tenant_id;
            slot
        } else {
            self.rotation_order.push(tenant_id);
            self.rotation_order.len() - 1
        }
    }

    /// Deletes the tenant and tombstones its rotation slot. Does **not**
    /// re-index surviving tenants. Only truncates trailing tombstones, which
    /// is always safe since nothing can be rotating past the end of the
    /// order.
    pub fn remove(&mut self, tenant_id: &TenantId) {
        let Some(entry) = self.tenants.remove(tenant_id) else {
            return;
        };
        self.rotation_order[entry.order_index] = TenantId::tombstone();
        while matches!(self.rotation_order.last(), Some(id) if id.is_tombstone()) {
            self.rotation_order.pop();
        }
        info!(%tenant_id, "tenant removed");
    }
}
