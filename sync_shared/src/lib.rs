//! `sync_shared`
//!
//! Shared libraries used by both the replicator and the relay.
//!
//! Design goals:
//! - Explicit replication messages instead of implicitly synced fields.
//! - Ownership, entity access and transport behind traits.
//! - No `unsafe`.

pub mod config;
pub mod ecs;
pub mod math;
pub mod net;
pub mod persist;
pub mod replication;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::replication::*;
}
