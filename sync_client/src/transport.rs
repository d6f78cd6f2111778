//! Replication transports.
//!
//! `ChannelTransport` turns `replicate` calls into `NetMsg`s on an unbounded
//! channel. Whoever holds the receiver decides when and how they leave the
//! process (see [`crate::link::RelayLink`]).

use sync_shared::{
    net::NetMsg,
    replication::{ReplicationTransport, TransformUpdate},
};
use tokio::sync::mpsc;
use tracing::warn;

/// Fire-and-forget transport backed by an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<NetMsg>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<NetMsg>) -> Self {
        Self { tx }
    }

    /// Creates a transport together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NetMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ReplicationTransport for ChannelTransport {
    fn replicate(&mut self, update: TransformUpdate) {
        if self.tx.send(NetMsg::TransformUpdate(update)).is_err() {
            warn!(entity = %update.entity, seq = update.seq, "Transport closed, update dropped");
        }
    }
}
