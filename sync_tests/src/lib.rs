//! Helpers shared by the integration tests: a relay on an ephemeral port and
//! participants that pump relay messages into their session.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use sync_client::{
    avatar::SharedAvatar,
    link::RelayLink,
    session::{Routed, Session},
    transport::ChannelTransport,
};
use sync_relay::server::{bind_ephemeral, RelayServer};
use sync_shared::config::SyncConfig;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A relay running in the background.
pub struct RunningRelay {
    pub cfg: SyncConfig,
    token: CancellationToken,
    handle: JoinHandle<anyhow::Result<RelayServer>>,
}

impl RunningRelay {
    pub async fn start(store_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (mut server, cfg) = bind_ephemeral(store_path).await?;
        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            server.run(run_token).await?;
            Ok(server)
        });
        Ok(Self { cfg, token, handle })
    }

    /// Config for a participant joining this relay.
    pub fn participant_cfg(&self, id: u32, interval: Duration) -> SyncConfig {
        SyncConfig {
            participant_id: id,
            display_name: format!("tester-{id}"),
            update_interval_secs: interval.as_secs_f32(),
            ..self.cfg.clone()
        }
    }

    /// Stops the relay and hands back its final state.
    pub async fn stop(self) -> anyhow::Result<RelayServer> {
        self.token.cancel();
        self.handle.await.context("join relay")?
    }
}

/// One participant: relay link, session view and its avatar.
pub struct Participant {
    pub link: RelayLink,
    pub session: Session<ChannelTransport>,
    pub avatar: SharedAvatar,
}

impl Participant {
    /// Joins without starting to sample; call `session.activate()` when ready.
    pub async fn join(cfg: &SyncConfig, avatar: SharedAvatar) -> anyhow::Result<Self> {
        let link = RelayLink::connect(cfg).await?;
        let session = Session::new(
            link.participant,
            avatar.clone(),
            link.transport(),
            cfg.update_interval()?,
        );
        Ok(Self {
            link,
            session,
            avatar,
        })
    }

    /// Routes relay messages until `done` accepts one, or fails on timeout.
    pub async fn pump_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(Routed) -> bool,
    ) -> anyhow::Result<Routed> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.link.recv())
                .await
                .context("timed out waiting for relay messages")?
                .context("relay link closed")?;
            let routed = self.session.route(&msg).await;
            if done(routed) {
                return Ok(routed);
            }
        }
    }

    /// Routes whatever arrives within `window`.
    pub async fn pump_for(&mut self, window: Duration) -> Vec<Routed> {
        let deadline = tokio::time::Instant::now() + window;
        let mut routed = Vec::new();
        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, self.link.recv()).await {
            routed.push(self.session.route(&msg).await);
        }
        routed
    }

    pub async fn leave(self) -> anyhow::Result<()> {
        self.session.shutdown().await;
        self.link.shutdown().await
    }
}

/// Snapshot store path inside a scratch directory. The directory is removed
/// when the returned guard drops.
pub fn temp_store_path() -> anyhow::Result<(TempDir, PathBuf)> {
    let dir = TempDir::new().context("create scratch dir")?;
    let path = dir.path().join("snapshots.json");
    Ok((dir, path))
}
