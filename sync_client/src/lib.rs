//! `sync_client`
//!
//! Participant-side replication:
//! - `PositionReplicator`: sample/replicate/restore state machine
//! - Periodic sampling task with cancellation tied to entity lifetime
//! - Transports (in-process channel, relay link)
//! - Session view routing relay messages to local and remote players

pub mod avatar;
pub mod entity;
pub mod link;
pub mod replicator;
pub mod session;
pub mod task;
pub mod transport;

pub use entity::ReplicatedEntity;
pub use replicator::PositionReplicator;
