//! Periodic sampling task.
//!
//! Sleeps one interval, ticks the replicator, repeats. Every sleep races a
//! cancellation token, so cancelling stops the loop before the next tick.

use std::{sync::Arc, time::Duration};

use sync_shared::replication::{AuthorityProvider, ReplicationTransport, TrackedEntity};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::replicator::{PositionReplicator, TickOutcome};

/// Replicator shared between the sampling task and message handling.
pub type SharedReplicator<E, T, A> = Arc<Mutex<PositionReplicator<E, T, A>>>;

/// Handle to a running sampling loop.
pub struct SamplingTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SamplingTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels and waits for the loop to exit.
    pub async fn join(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sampling task ended abnormally");
        }
    }
}

/// Runs `start` and, if this instance is authoritative, spawns the loop.
///
/// Returns `None` on non-authoritative instances; no loop runs there.
pub async fn spawn_sampling<E, T, A>(
    replicator: SharedReplicator<E, T, A>,
    token: CancellationToken,
) -> Option<SamplingTask>
where
    E: TrackedEntity + 'static,
    T: ReplicationTransport + 'static,
    A: AuthorityProvider + 'static,
{
    let (entity, interval) = {
        let mut r = replicator.lock().await;
        if !r.start() {
            return None;
        }
        (r.entity_id(), r.interval())
    };

    let loop_token = token.clone();
    let handle = tokio::spawn(async move {
        run_sampling(replicator, interval, loop_token).await;
        debug!(%entity, "Sampling stopped");
    });

    Some(SamplingTask { token, handle })
}

async fn run_sampling<E, T, A>(
    replicator: SharedReplicator<E, T, A>,
    interval: Duration,
    token: CancellationToken,
) where
    E: TrackedEntity,
    T: ReplicationTransport,
    A: AuthorityProvider,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let outcome = replicator.lock().await.tick();
        match outcome {
            TickOutcome::Replicated(update) => {
                trace!(entity = %update.entity, seq = update.seq, "Transform replicated")
            }
            other => trace!(?other, "Tick skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_shared::{
        ecs::EntityId,
        math::{Quat, Vec3},
        net::{NetMsg, ParticipantId},
        replication::AuthorityTable,
    };
    use tokio::sync::mpsc;

    use crate::{avatar::SharedAvatar, transport::ChannelTransport};

    const LOCAL: ParticipantId = ParticipantId(1);

    type Shared = SharedReplicator<SharedAvatar, ChannelTransport, AuthorityTable>;

    fn setup(
        owner: ParticipantId,
    ) -> (Shared, SharedAvatar, AuthorityTable, mpsc::UnboundedReceiver<NetMsg>) {
        let avatar = SharedAvatar::new(Vec3::new(0.0, 0.0, 0.0), Quat::IDENTITY);
        let authority = AuthorityTable::new(LOCAL);
        let id = EntityId::player_of(owner);
        authority.transfer(id, owner);
        let (transport, rx) = ChannelTransport::channel();
        let r = PositionReplicator::new(
            id,
            Duration::from_millis(500),
            avatar.clone(),
            transport,
            authority.clone(),
        );
        (Arc::new(Mutex::new(r)), avatar, authority, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<NetMsg>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn grounded_owner_replicates_every_interval() {
        let (shared, _avatar, _auth, mut rx) = setup(LOCAL);
        let task = spawn_sampling(shared.clone(), CancellationToken::new())
            .await
            .expect("owner should sample");

        sleep_ms(400).await;
        assert_eq!(drain(&mut rx), 0, "first tick waits a full interval");

        // t = 1.6s: ticks at 0.5, 1.0 and 1.5 have fired.
        sleep_ms(1200).await;
        assert_eq!(drain(&mut rx), 3);
        assert_eq!(shared.lock().await.stats().replicated, 3);

        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn airborne_interval_skips_its_tick() {
        let (shared, avatar, _auth, mut rx) = setup(LOCAL);
        let task = spawn_sampling(shared.clone(), CancellationToken::new())
            .await
            .expect("owner should sample");

        // t = 0.7s: jump.
        sleep_ms(700).await;
        avatar.set_grounded(false);

        // t = 1.1s: the 1.0 tick saw an airborne avatar.
        sleep_ms(400).await;
        assert_eq!(drain(&mut rx), 1);

        // t = 1.2s: landed; t = 1.6s: the 1.5 tick published again.
        sleep_ms(100).await;
        avatar.set_grounded(true);
        sleep_ms(400).await;
        assert_eq!(drain(&mut rx), 1);

        let stats = shared.lock().await.stats();
        assert_eq!(stats.replicated, 2);
        assert_eq!(stats.skipped_not_grounded, 1);
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_owner_never_spawns_a_loop() {
        let (shared, _avatar, _auth, mut rx) = setup(ParticipantId(2));
        assert!(spawn_sampling(shared.clone(), CancellationToken::new())
            .await
            .is_none());

        sleep_ms(5_000).await;
        assert_eq!(drain(&mut rx), 0);
        assert_eq!(shared.lock().await.stats().ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_rescheduling_while_authority_is_away() {
        let (shared, _avatar, authority, mut rx) = setup(LOCAL);
        let id = shared.lock().await.entity_id();
        let task = spawn_sampling(shared.clone(), CancellationToken::new())
            .await
            .expect("owner should sample");

        sleep_ms(100).await;
        authority.transfer(id, ParticipantId(2));
        sleep_ms(1_000).await;
        assert_eq!(drain(&mut rx), 0);

        authority.transfer(id, LOCAL);
        sleep_ms(500).await;
        assert_eq!(drain(&mut rx), 1);
        assert_eq!(shared.lock().await.stats().skipped_authority_lost, 2);

        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_further_ticks() {
        let (shared, _avatar, _auth, mut rx) = setup(LOCAL);
        let token = CancellationToken::new();
        let task = spawn_sampling(shared.clone(), token.clone())
            .await
            .expect("owner should sample");

        sleep_ms(600).await;
        assert_eq!(drain(&mut rx), 1);

        token.cancel();
        sleep_ms(2_000).await;
        assert!(task.is_finished());
        assert_eq!(drain(&mut rx), 0);
        assert_eq!(shared.lock().await.stats().ticks, 1);
        task.join().await;
    }
}
