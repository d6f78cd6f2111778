//! Relay implementation.
//!
//! The relay is the transport host participants replicate through. It:
//! - Accepts participants with a `Hello`/`Welcome` handshake; a reconnect
//!   replaces the participant's previous connection
//! - Restores a (re)joining participant's last known transform
//! - Brings late joiners up to date with every connected owner
//! - Forwards each owner's `TransformUpdate`s to everyone else
//! - Tells the remaining participants when someone leaves
//! - Persists the last snapshot per participant
//!
//! Ownership rule: a participant may only publish updates for its own player.
//! The relay holds no authority of its own and never edits replicated state.
//!
//! Handshakes run in their own tasks; the main loop only sees participants
//! that already said `Hello`.

use anyhow::Context;
use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use sync_shared::{
    config::SyncConfig,
    ecs::EntityId,
    net::{
        NetMsg, ParticipantId, ReliableConn, ReliableListener, ReliableReader, ReliableWriter,
        PROTOCOL_VERSION,
    },
    persist::SnapshotStore,
    replication::TransformUpdate,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a fresh connection may take to say `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected participant.
struct Peer {
    /// Distinguishes successive connections of the same participant.
    conn: u64,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<NetMsg>,
    /// Stops this peer's reader when it is removed.
    token: CancellationToken,
    updates: u64,
}

/// Connection that completed the handshake, waiting to be registered.
struct Handshaken {
    participant: ParticipantId,
    conn: ReliableConn,
    addr: SocketAddr,
}

/// Something a peer task reported.
#[derive(Debug)]
struct PeerEvent {
    participant: ParticipantId,
    conn: u64,
    kind: PeerEventKind,
}

#[derive(Debug)]
enum PeerEventKind {
    Message(NetMsg),
    Closed,
}

/// Replication relay.
pub struct RelayServer {
    pub cfg: SyncConfig,
    listener: ReliableListener,
    peers: BTreeMap<ParticipantId, Peer>,
    /// Newest update per entity from currently connected owners.
    latest: BTreeMap<EntityId, TransformUpdate>,
    store: SnapshotStore,
    store_path: Option<PathBuf>,
    next_conn: u64,

    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    joins_tx: mpsc::UnboundedSender<Handshaken>,
    joins_rx: mpsc::UnboundedReceiver<Handshaken>,
    /// Parent of every peer task's token.
    peers_token: CancellationToken,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl RelayServer {
    /// Binds the listener and loads the snapshot store, if configured.
    pub async fn bind(cfg: SyncConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.relay_addr.parse().context("parse relay_addr")?;
        let listener = ReliableListener::bind(addr).await?;

        let store_path = cfg.store_path.as_ref().map(PathBuf::from);
        let store = match &store_path {
            Some(path) => SnapshotStore::load(path)?,
            None => SnapshotStore::new(),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (joins_tx, joins_rx) = mpsc::unbounded_channel();
        Ok(Self {
            cfg,
            listener,
            peers: BTreeMap::new(),
            latest: BTreeMap::new(),
            store,
            store_path,
            next_conn: 0,
            events_tx,
            events_rx,
            joins_tx,
            joins_rx,
            peers_token: CancellationToken::new(),
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.peers.contains_key(&participant)
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Serves until `token` is cancelled, then disconnects everyone and
    /// persists the store.
    pub async fn run(&mut self, token: CancellationToken) -> anyhow::Result<()> {
        let local = self.local_addr()?;
        info!(%local, "Relay serving");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((conn, addr)) => {
                            tokio::spawn(handshake(
                                conn,
                                addr,
                                self.joins_tx.clone(),
                                self.peers_token.child_token(),
                            ));
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
                Some(joined) = self.joins_rx.recv() => self.register(joined),
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                line = recv_console(&mut self.console_rx) => {
                    let Some(line) = line else {
                        self.console_rx = None;
                        continue;
                    };
                    if matches!(line.trim(), "quit" | "exit") {
                        info!("Relay shutting down");
                        break;
                    }
                    for out in self.exec_console(&line) {
                        info!("{out}");
                    }
                }
            }
        }

        self.shutdown()
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = tokens.first() else {
            return Vec::new();
        };

        match *cmd {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Participants: {}", self.peers.len()));
                for (id, peer) in &self.peers {
                    out.push(format!(
                        "  {}: addr={} updates={} stored_seq={:?}",
                        id.0,
                        peer.addr,
                        peer.updates,
                        self.store.get(*id).map(|s| s.seq)
                    ));
                }
                out.push(format!("Stored snapshots: {}", self.store.len()));
                out
            }
            "save" => match &self.store_path {
                Some(path) => match self.store.save(path) {
                    Ok(()) => vec![format!("Saved {} snapshot(s) to {}", self.store.len(), path.display())],
                    Err(e) => vec![format!("Save failed: {e:#}")],
                },
                None => vec!["No store path configured".to_string()],
            },
            "kick" => {
                let Some(id) = tokens.get(1).and_then(|t| t.parse().ok()) else {
                    return vec!["Usage: kick <participant>".to_string()];
                };
                let participant = ParticipantId(id);
                match self.peers.get(&participant) {
                    Some(peer) => {
                        let _ = peer.outbound.send(NetMsg::Disconnect {
                            reason: "kicked".to_string(),
                        });
                        self.remove_peer(participant);
                        vec![format!("Kicked {id}")]
                    }
                    None => vec![format!("Participant {id} not connected")],
                }
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }

    /// Admits a handshaken connection. The greeting, restore and catch-up
    /// are queued ahead of everything the writer sends later.
    fn register(&mut self, joined: Handshaken) {
        let Handshaken {
            participant,
            conn,
            addr,
        } = joined;

        // A reconnect can beat the old connection's teardown; the newest wins.
        if let Some(old) = self.detach_peer(participant) {
            let _ = old.outbound.send(NetMsg::Disconnect {
                reason: "replaced by a newer connection".to_string(),
            });
            info!(participant = ?participant, old_addr = %old.addr, "Replacing existing connection");
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let _ = out_tx.send(NetMsg::Welcome { participant });
        if let Some(snapshot) = self.store.get(participant) {
            let _ = out_tx.send(NetMsg::restore(participant, snapshot.seq, snapshot.state));
            debug!(participant = ?participant, seq = snapshot.seq, "Restore queued");
        }
        for update in self.latest.values() {
            let _ = out_tx.send(NetMsg::TransformUpdate(*update));
        }

        let conn_id = self.next_conn;
        self.next_conn += 1;

        let (reader, writer) = conn.into_split();
        let token = self.peers_token.child_token();
        tokio::spawn(write_loop(writer, out_rx, token.clone()));
        tokio::spawn(read_loop(
            reader,
            participant,
            conn_id,
            self.events_tx.clone(),
            token.clone(),
        ));

        self.peers.insert(
            participant,
            Peer {
                conn: conn_id,
                addr,
                outbound: out_tx,
                token,
                updates: 0,
            },
        );

        info!(participant = ?participant, %addr, peers = self.peers.len(), "Participant joined");
    }

    fn handle_event(&mut self, event: PeerEvent) {
        let current = self
            .peers
            .get(&event.participant)
            .is_some_and(|p| p.conn == event.conn);
        if !current {
            debug!(participant = ?event.participant, "Event from a stale connection dropped");
            return;
        }

        match event.kind {
            PeerEventKind::Message(NetMsg::TransformUpdate(update)) => {
                self.on_update(event.participant, update)
            }
            PeerEventKind::Message(NetMsg::Disconnect { reason }) => {
                info!(participant = ?event.participant, %reason, "Participant leaving");
                self.remove_peer(event.participant);
            }
            PeerEventKind::Message(other) => {
                debug!(participant = ?event.participant, ?other, "Unexpected message");
            }
            PeerEventKind::Closed => self.remove_peer(event.participant),
        }
    }

    fn on_update(&mut self, from: ParticipantId, update: TransformUpdate) {
        if update.owner != from || update.entity.player_participant() != Some(from) {
            warn!(from = ?from, claimed = ?update.owner, entity = %update.entity, "Update for foreign authority dropped");
            return;
        }

        if let Some(peer) = self.peers.get_mut(&from) {
            peer.updates += 1;
        }
        self.store.record(&update);
        let newer = self
            .latest
            .get(&update.entity)
            .map_or(true, |prev| update.seq > prev.seq);
        if newer {
            self.latest.insert(update.entity, update);
        }

        let msg = NetMsg::TransformUpdate(update);
        for (id, peer) in &self.peers {
            if *id != from {
                let _ = peer.outbound.send(msg.clone());
            }
        }
    }

    /// Removes a peer, stops its reader and forgets its live updates.
    fn detach_peer(&mut self, participant: ParticipantId) -> Option<Peer> {
        let peer = self.peers.remove(&participant)?;
        peer.token.cancel();
        self.latest.retain(|_, u| u.owner != participant);
        Some(peer)
    }

    fn remove_peer(&mut self, participant: ParticipantId) {
        let Some(peer) = self.detach_peer(participant) else {
            return;
        };
        info!(participant = ?participant, addr = %peer.addr, updates = peer.updates, peers = self.peers.len(), "Participant left");

        let left = NetMsg::Left { participant };
        for other in self.peers.values() {
            let _ = other.outbound.send(left.clone());
        }

        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist snapshots");
        }
    }

    fn persist(&self) -> anyhow::Result<()> {
        match &self.store_path {
            Some(path) => self.store.save(path),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        let bye = NetMsg::Disconnect {
            reason: "relay shutting down".to_string(),
        };
        for peer in self.peers.values() {
            let _ = peer.outbound.send(bye.clone());
        }
        // Writers drain their queues once the senders are gone.
        self.peers.clear();
        self.latest.clear();
        self.peers_token.cancel();

        info!(snapshots = self.store.len(), "Relay stopped");
        self.persist()
    }
}

async fn recv_console(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Reads the `Hello` of a fresh connection and hands it to the main loop.
async fn handshake(
    mut conn: ReliableConn,
    addr: SocketAddr,
    joins: mpsc::UnboundedSender<Handshaken>,
    token: CancellationToken,
) {
    let hello = tokio::select! {
        _ = token.cancelled() => return,
        hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv()) => hello,
    };

    let participant = match hello {
        Ok(Ok(NetMsg::Hello {
            protocol,
            participant,
        })) if protocol == PROTOCOL_VERSION => participant,
        Ok(Ok(NetMsg::Hello { protocol, .. })) => {
            let reason = format!("protocol {protocol} not supported, expected {PROTOCOL_VERSION}");
            warn!(%addr, %reason, "Connection rejected");
            let _ = conn.send(&NetMsg::Disconnect { reason }).await;
            return;
        }
        Ok(Ok(other)) => {
            warn!(%addr, ?other, "Connection rejected: unexpected handshake message");
            return;
        }
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "Connection closed during handshake");
            return;
        }
        Err(_) => {
            warn!(%addr, "Connection rejected: handshake timed out");
            return;
        }
    };

    let _ = joins.send(Handshaken {
        participant,
        conn,
        addr,
    });
}

async fn write_loop(
    mut writer: ReliableWriter,
    mut outbound: mpsc::UnboundedReceiver<NetMsg>,
    token: CancellationToken,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = writer.send(&msg).await {
            debug!(error = %e, "Peer write failed");
            token.cancel();
            return;
        }
    }
}

async fn read_loop(
    mut reader: ReliableReader,
    participant: ParticipantId,
    conn: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
    token: CancellationToken,
) {
    loop {
        let res = tokio::select! {
            _ = token.cancelled() => return,
            res = reader.recv() => res,
        };
        let kind = match res {
            Ok(msg) => PeerEventKind::Message(msg),
            Err(e) => {
                debug!(participant = ?participant, error = %e, "Peer read ended");
                PeerEventKind::Closed
            }
        };
        let closed = matches!(kind, PeerEventKind::Closed);
        let event = PeerEvent {
            participant,
            conn,
            kind,
        };
        if events.send(event).is_err() || closed {
            return;
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(
    store_path: Option<PathBuf>,
) -> anyhow::Result<(RelayServer, SyncConfig)> {
    let cfg = SyncConfig {
        relay_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        store_path: store_path.map(|p| p.to_string_lossy().into_owned()),
        ..Default::default()
    };

    let mut server = RelayServer::bind(cfg).await?;
    let addr = server.local_addr()?;
    server.cfg.relay_addr = addr.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
