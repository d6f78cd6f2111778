//! `sync_relay`
//!
//! Relay-side systems:
//! - Participant handshake and duplicate/version rejection
//! - Fan-out of owner-published `TransformUpdate`s
//! - Snapshot persistence and restore on (re)join
//!
//! Networking model:
//! - TCP only; every message is a length-prefixed JSON frame

pub mod server;

pub use server::RelayServer;
