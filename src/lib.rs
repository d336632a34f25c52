//! Core of a multi-tenant request-queue broker: fair rotation and
//! shuffle-sharded assignment between request producers and a pool of
//! stateless workers.
//!
//! The crate root only wires the modules together and re-exports the public
//! surface; the interesting bookkeeping lives in [`broker`], composing
//! [`tree_queue`], [`worker_registry`], [`tenant_registry`] and
//! [`shuffle_shard`] behind a single lock.

mod broker;
mod config;
mod errors;
mod id;
mod tenant_registry;
mod tree_queue;
mod worker_registry;

// Exposed (rather than private) only so the shuffle-shard computation can be
// exercised directly from the benchmark harness; `Broker` never needs to
// reach outside its own crate for it.
pub mod shuffle_shard;

pub use broker::{Broker, DequeueOutcome};
pub use config::{BrokerConfig, ConfigParseError, DEFAULT_FORGET_DELAY, DEFAULT_MAX_TENANT_QUEUE_SIZE};
pub use errors::{DequeueError, EnqueueError};
pub use id::{TenantId, WorkerId};
pub use worker_registry::Timestamp;
