//! Replicated entity lifecycle.
//!
//! Ties a replicator and its sampling loop to the lifetime of one entity:
//! activation starts sampling, inbound messages are routed to the
//! replicator, and despawning (or dropping) cancels the loop.

use std::sync::Arc;

use sync_shared::{
    ecs::EntityId,
    net::NetMsg,
    replication::{AuthorityProvider, ReplicatedTransform, ReplicationTransport, TrackedEntity},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    replicator::PositionReplicator,
    task::{spawn_sampling, SamplingTask, SharedReplicator},
};

/// One entity with a replicated transform.
pub struct ReplicatedEntity<E, T, A> {
    id: EntityId,
    replicator: SharedReplicator<E, T, A>,
    token: CancellationToken,
    task: Option<SamplingTask>,
}

impl<E, T, A> ReplicatedEntity<E, T, A>
where
    E: TrackedEntity + 'static,
    T: ReplicationTransport + 'static,
    A: AuthorityProvider + 'static,
{
    pub fn new(replicator: PositionReplicator<E, T, A>) -> Self {
        Self {
            id: replicator.entity_id(),
            replicator: Arc::new(Mutex::new(replicator)),
            token: CancellationToken::new(),
            task: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Activation: runs `start` and spawns the sampling loop when
    /// authoritative. Returns whether a loop is running.
    pub async fn activate(&mut self) -> bool {
        if self.task.is_none() {
            self.task = spawn_sampling(self.replicator.clone(), self.token.child_token()).await;
        }
        self.task.is_some()
    }

    /// Routes an inbound message. Returns whether it changed replicated state.
    pub async fn handle(&self, msg: &NetMsg) -> bool {
        match msg {
            NetMsg::TransformUpdate(update) => self.replicator.lock().await.apply_update(update),
            NetMsg::Restore { recipient, update } => {
                let mut r = self.replicator.lock().await;
                if !r.load_snapshot(update) {
                    return false;
                }
                r.on_state_restored(*recipient);
                true
            }
            other => {
                debug!(entity = %self.id, ?other, "Message not for replicator");
                false
            }
        }
    }

    /// Last written or received transform.
    pub async fn state(&self) -> ReplicatedTransform {
        self.replicator.lock().await.state()
    }

    pub fn replicator(&self) -> &SharedReplicator<E, T, A> {
        &self.replicator
    }

    pub fn is_sampling(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Destroys the entity: cancels sampling and waits for the loop to exit.
    pub async fn despawn(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.join().await;
        }
        debug!(entity = %self.id, "Replicated entity despawned");
    }
}

impl<E, T, A> Drop for ReplicatedEntity<E, T, A> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use sync_shared::{
        math::{Quat, Vec3},
        net::ParticipantId,
        replication::{AuthorityTable, TransformUpdate},
    };

    use crate::{avatar::SharedAvatar, transport::ChannelTransport};

    const LOCAL: ParticipantId = ParticipantId(1);

    fn local_player() -> (
        ReplicatedEntity<SharedAvatar, ChannelTransport, AuthorityTable>,
        SharedAvatar,
        tokio::sync::mpsc::UnboundedReceiver<NetMsg>,
    ) {
        let avatar = SharedAvatar::new(Vec3::new(1.0, 1.0, 0.0), Quat::IDENTITY);
        let (transport, rx) = ChannelTransport::channel();
        let r = PositionReplicator::new(
            EntityId::player_of(LOCAL),
            Duration::from_millis(500),
            avatar.clone(),
            transport,
            AuthorityTable::with_own_player(LOCAL),
        );
        (ReplicatedEntity::new(r), avatar, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn restore_message_teleports_local_player() {
        let (entity, avatar, _rx) = local_player();
        let target = ReplicatedTransform::new(Vec3::new(10.0, -3.0, 0.0), Quat::from_yaw(0.7));

        assert!(entity.handle(&NetMsg::restore(LOCAL, 5, target)).await);
        let s = avatar.snapshot();
        assert_eq!(s.position, target.position);
        assert_eq!(s.teleports, 1);
        assert_eq!(entity.state().await, target);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_for_other_player_is_not_applied() {
        let (entity, avatar, _rx) = local_player();
        let msg = NetMsg::restore(ParticipantId(2), 5, ReplicatedTransform::default());

        assert!(!entity.handle(&msg).await);
        assert_eq!(avatar.snapshot().teleports, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_for_owned_entity_is_ignored() {
        let (entity, _avatar, _rx) = local_player();
        let msg = NetMsg::TransformUpdate(TransformUpdate {
            entity: entity.id(),
            owner: ParticipantId(2),
            seq: 50,
            state: ReplicatedTransform::new(Vec3::new(3.0, 3.0, 3.0), Quat::IDENTITY),
        });
        assert!(!entity.handle(&msg).await);
    }

    #[tokio::test(start_paused = true)]
    async fn despawn_stops_sampling() {
        let (mut entity, _avatar, mut rx) = local_player();
        assert!(entity.activate().await);
        assert!(entity.is_sampling());
        assert!(entity.activate().await, "second activation keeps the same loop");

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let replicator = entity.replicator().clone();
        entity.despawn().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut sent = 0;
        while rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 2);
        assert_eq!(replicator.lock().await.stats().ticks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_entity_cancels_its_loop() {
        let (mut entity, _avatar, mut rx) = local_player();
        entity.activate().await;
        let replicator = entity.replicator().clone();
        drop(entity);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(replicator.lock().await.stats().ticks, 0);
    }
}
