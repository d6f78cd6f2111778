//! Relay link.
//!
//! The link maintains:
//! - A reliable stream to the relay, handshaken with `Hello`/`Welcome`
//! - A writer task draining the outbound channel fed by [`ChannelTransport`]s
//! - A reader task forwarding relay messages to an inbound queue
//!
//! Shutting the link down flushes queued updates and says goodbye so the
//! relay can persist the final snapshot.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use sync_shared::{
    config::SyncConfig,
    net::{NetMsg, ParticipantId, ReliableConn, ReliableReader, ReliableWriter, PROTOCOL_VERSION},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    session::{Routed, Session},
    transport::ChannelTransport,
};

/// Connected link to a relay.
pub struct RelayLink {
    pub participant: ParticipantId,
    transport: ChannelTransport,
    inbound: mpsc::UnboundedReceiver<NetMsg>,
    token: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayLink {
    /// Connects to the relay configured in `cfg` and performs the handshake.
    pub async fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let relay_addr: SocketAddr = cfg.relay_addr.parse().context("parse relay_addr")?;
        let participant = cfg.participant();

        info!(relay = %relay_addr, participant = ?participant, name = %cfg.display_name, "Connecting to relay");

        let mut conn = ReliableConn::connect(relay_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
            participant,
        })
        .await?;

        match conn.recv().await? {
            NetMsg::Welcome { participant: p } if p == participant => {}
            NetMsg::Disconnect { reason } => anyhow::bail!("relay refused connection: {reason}"),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        }

        let peer = conn.peer_addr()?;
        info!(participant = ?participant, %peer, "Joined relay");

        let (reader, writer) = conn.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let writer = tokio::spawn(write_loop(writer, out_rx, token.clone()));
        let reader = tokio::spawn(read_loop(reader, in_tx, token.clone()));

        Ok(Self {
            participant,
            transport: ChannelTransport::new(out_tx),
            inbound: in_rx,
            token,
            writer,
            reader,
        })
    }

    /// A transport that publishes through this link.
    pub fn transport(&self) -> ChannelTransport {
        self.transport.clone()
    }

    /// Waits for the next relay message. `None` once the link is closed.
    pub async fn recv(&mut self) -> Option<NetMsg> {
        self.inbound.recv().await
    }

    /// Routes relay messages into `session` until the stored snapshot has
    /// been applied or `wait` elapses. Participants with nothing stored get
    /// no restore, so callers activate sampling either way.
    pub async fn await_restore(
        &mut self,
        session: &mut Session<ChannelTransport>,
        wait: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, self.inbound.recv()).await {
            match session.route(&msg).await {
                Routed::Local => return true,
                Routed::Closed => return false,
                other => debug!(?other, "Routed while waiting for restore"),
            }
        }
        false
    }

    /// Flushes pending updates, sends `Disconnect` and closes the stream.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.token.cancel();
        self.writer.await.context("join relay writer")?;
        self.reader.await.context("join relay reader")?;
        info!(participant = ?self.participant, "Left relay");
        Ok(())
    }
}

async fn write_loop(
    mut writer: ReliableWriter,
    mut outbound: mpsc::UnboundedReceiver<NetMsg>,
    token: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = outbound.recv() => msg,
        };
        let Some(msg) = msg else { break };
        if let Err(e) = writer.send(&msg).await {
            warn!(error = %e, "Relay write failed");
            token.cancel();
            return;
        }
    }

    while let Ok(msg) = outbound.try_recv() {
        if writer.send(&msg).await.is_err() {
            return;
        }
    }
    let bye = NetMsg::Disconnect {
        reason: "leaving".to_string(),
    };
    if let Err(e) = writer.send(&bye).await {
        debug!(error = %e, "Goodbye not delivered");
    }
}

async fn read_loop(
    mut reader: ReliableReader,
    inbound: mpsc::UnboundedSender<NetMsg>,
    token: CancellationToken,
) {
    loop {
        let res = tokio::select! {
            _ = token.cancelled() => break,
            res = reader.recv() => res,
        };
        match res {
            Ok(msg) => {
                if inbound.send(msg).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Relay connection closed");
                break;
            }
        }
    }
}
