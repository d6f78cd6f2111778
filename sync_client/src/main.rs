//! Standalone replicator binary.
//!
//! Usage:
//!   cargo run -p sync_client -- [--config cfg.json] [--addr 127.0.0.1:40100]
//!       [--id 1] [--name Player] [--interval 0.5] [--duration 30]
//!
//! Joins the relay as one participant, walks a wandering avatar around
//! (with the occasional hop), replicates its transform while grounded and
//! logs what arrives from other participants.

use std::env;
use std::time::Duration;

use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sync_client::{
    avatar::SharedAvatar,
    link::RelayLink,
    session::{Routed, Session},
};
use sync_shared::{
    config::SyncConfig,
    math::{Quat, Vec3},
};
use tracing::info;

/// How long to wait for the relay's restore before sampling starts.
const RESTORE_WAIT: Duration = Duration::from_millis(500);

struct Args {
    cfg: SyncConfig,
    duration: Option<Duration>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&args[i + 1])?,
        _ => SyncConfig::default(),
    };
    let mut duration = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.relay_addr = args[i + 1].clone();
                i += 2;
            }
            "--id" if i + 1 < args.len() => {
                cfg.participant_id = args[i + 1].parse().context("parse --id")?;
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.display_name = args[i + 1].clone();
                i += 2;
            }
            "--interval" if i + 1 < args.len() => {
                cfg.update_interval_secs = args[i + 1].parse().context("parse --interval")?;
                i += 2;
            }
            "--duration" if i + 1 < args.len() => {
                let secs: f32 = args[i + 1].parse().context("parse --duration")?;
                duration = Some(Duration::from_secs_f32(secs.max(0.0)));
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, duration })
}

/// Random walk with hops; airborne steps are not replicated.
struct Wander {
    rng: StdRng,
    yaw: f32,
    airborne_steps: u32,
}

impl Wander {
    const SPEED: f32 = 1.5;
    const HOP_CHANCE: f64 = 0.05;
    const HOP_HEIGHT: f32 = 0.8;

    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            yaw: 0.0,
            airborne_steps: 0,
        }
    }

    fn step(&mut self, avatar: &SharedAvatar, dt: f32) {
        self.yaw += self.rng.gen_range(-0.4f32..0.4);
        let dir = Vec3::new(self.yaw.cos(), self.yaw.sin(), 0.0);
        avatar.translate(dir.scale(Self::SPEED * dt));
        avatar.set_orientation(Quat::from_yaw(self.yaw));

        if self.airborne_steps > 0 {
            self.airborne_steps -= 1;
            if self.airborne_steps == 0 {
                avatar.translate(Vec3::new(0.0, 0.0, -Self::HOP_HEIGHT));
                avatar.set_grounded(true);
            }
        } else if self.rng.gen_bool(Self::HOP_CHANCE) {
            self.airborne_steps = self.rng.gen_range(3..8);
            avatar.translate(Vec3::new(0.0, 0.0, Self::HOP_HEIGHT));
            avatar.set_grounded(false);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, duration } = parse_args()?;
    let interval = cfg.update_interval()?;
    info!(relay = %cfg.relay_addr, participant = cfg.participant_id, interval_ms = interval.as_millis() as u64, "Starting replicator");

    let mut link = RelayLink::connect(&cfg).await.context("connect")?;
    let avatar = SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY);
    let mut session = Session::new(link.participant, avatar.clone(), link.transport(), interval);
    if link.await_restore(&mut session, RESTORE_WAIT).await {
        let restored = session.local().state().await;
        info!(position = ?restored.position, "Restored to last known position");
    } else {
        info!("No stored position, starting at spawn");
    }
    if !session.activate().await {
        anyhow::bail!("local player is not owned locally");
    }

    let step = Duration::from_millis(100);
    let mut wander = Wander::new();
    let mut ticker = tokio::time::interval(step);
    let deadline = duration.map(|d| tokio::time::Instant::now() + d);

    loop {
        tokio::select! {
            msg = link.recv() => {
                let Some(msg) = msg else {
                    info!("Relay link closed");
                    break;
                };
                match session.route(&msg).await {
                    Routed::Local => {
                        let s = avatar.snapshot();
                        info!(position = ?s.position, "Restored to last known position");
                    }
                    Routed::Remote(p) => {
                        if let Some(state) = session.remote_state(p).await {
                            info!(participant = p.0, position = ?state.position, "Remote player moved");
                        }
                    }
                    Routed::Departed(p) => info!(participant = p.0, "Remote player left"),
                    Routed::Closed => break,
                    Routed::Ignored => {}
                }
            }
            _ = ticker.tick() => {
                wander.step(&avatar, step.as_secs_f32());
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    info!("Run duration elapsed");
                    break;
                }
            }
        }
    }

    let stats = session.local().replicator().lock().await.stats();
    info!(ticks = stats.ticks, replicated = stats.replicated, skipped_airborne = stats.skipped_not_grounded, "Replicator finished");

    session.shutdown().await;
    link.shutdown().await?;
    Ok(())
}
