//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) framed channel between participants and the relay.
//! - Provide the message types replicated transforms travel in.
//! - Keep serialization explicit and versionable.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::replication::{ReplicatedTransform, TransformUpdate};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame; replication messages are tiny.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Identifies a participant across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
        participant: ParticipantId,
    },
    Welcome {
        participant: ParticipantId,
    },

    // ─── Replication ───
    /// Authoritative sample published by an entity's owner.
    TransformUpdate(TransformUpdate),
    /// Relay -> client: stored snapshot for `recipient`, sent on (re)join.
    Restore {
        recipient: ParticipantId,
        update: TransformUpdate,
    },
    /// Relay -> client: `participant` left the session.
    Left {
        participant: ParticipantId,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

impl NetMsg {
    /// Convenience constructor for a restore of `state` to `recipient`'s player.
    pub fn restore(recipient: ParticipantId, seq: u32, state: ReplicatedTransform) -> Self {
        NetMsg::Restore {
            recipient,
            update: TransformUpdate {
                entity: crate::ecs::EntityId::player_of(recipient),
                owner: recipient,
                seq,
                state,
            },
        }
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned halves so reads and writes can live
    /// in separate tasks.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (r, w) = self.stream.into_split();
        (ReliableReader { inner: r }, ReliableWriter { inner: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableReader {
    inner: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.inner).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableWriter {
    inner: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.inner, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}
