//! Participant session view.
//!
//! Holds the local player's replicated entity plus read-only views of every
//! remote player seen so far, and routes relay messages between them.

use std::{collections::BTreeMap, time::Duration};

use sync_shared::{
    ecs::EntityId,
    math::{Quat, Vec3},
    net::{NetMsg, ParticipantId},
    replication::{AuthorityTable, ReplicatedTransform, ReplicationTransport},
};
use tracing::{debug, info};

use crate::{avatar::SharedAvatar, entity::ReplicatedEntity, replicator::PositionReplicator};

/// Replicated player object as seen from one participant.
pub type PlayerEntity<T> = ReplicatedEntity<SharedAvatar, T, AuthorityTable>;

/// What routing a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Applied to the local player (restore).
    Local,
    /// Applied to a remote player's view.
    Remote(ParticipantId),
    /// A remote player left; its view was despawned.
    Departed(ParticipantId),
    /// Dropped (stale, foreign, or not a replication message).
    Ignored,
    /// The relay closed the session.
    Closed,
}

/// Local participant's view of the shared session.
pub struct Session<T> {
    participant: ParticipantId,
    interval: Duration,
    authority: AuthorityTable,
    transport: T,
    local: PlayerEntity<T>,
    remotes: BTreeMap<EntityId, PlayerEntity<T>>,
}

impl<T> Session<T>
where
    T: ReplicationTransport + Clone + 'static,
{
    /// Creates the session with the local player bound to `avatar`.
    pub fn new(
        participant: ParticipantId,
        avatar: SharedAvatar,
        transport: T,
        interval: Duration,
    ) -> Self {
        let authority = AuthorityTable::with_own_player(participant);
        let local = ReplicatedEntity::new(PositionReplicator::new(
            EntityId::player_of(participant),
            interval,
            avatar,
            transport.clone(),
            authority.clone(),
        ));
        Self {
            participant,
            interval,
            authority,
            transport,
            local,
            remotes: BTreeMap::new(),
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn local(&self) -> &PlayerEntity<T> {
        &self.local
    }

    /// Starts sampling the local player.
    pub async fn activate(&mut self) -> bool {
        self.local.activate().await
    }

    /// Routes one relay message.
    pub async fn route(&mut self, msg: &NetMsg) -> Routed {
        match msg {
            NetMsg::Restore { .. } => {
                if self.local.handle(msg).await {
                    Routed::Local
                } else {
                    Routed::Ignored
                }
            }
            NetMsg::TransformUpdate(update) if update.entity == self.local.id() => {
                // Authority is local; the replicator rejects foreign writes.
                self.local.handle(msg).await;
                Routed::Ignored
            }
            NetMsg::TransformUpdate(update)
                if update.entity.player_participant() != Some(update.owner) =>
            {
                debug!(entity = %update.entity, from = ?update.owner, "Update for someone else's player dropped");
                Routed::Ignored
            }
            NetMsg::TransformUpdate(update) => {
                let view = self.remotes.entry(update.entity).or_insert_with(|| {
                    info!(entity = %update.entity, owner = ?update.owner, "Remote player discovered");
                    ReplicatedEntity::new(PositionReplicator::new(
                        update.entity,
                        self.interval,
                        SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY),
                        self.transport.clone(),
                        self.authority.clone(),
                    ))
                });
                if view.handle(msg).await {
                    Routed::Remote(update.owner)
                } else {
                    Routed::Ignored
                }
            }
            NetMsg::Left { participant } => {
                match self.remotes.remove(&EntityId::player_of(*participant)) {
                    Some(view) => {
                        view.despawn().await;
                        info!(participant = ?participant, "Remote player left");
                        Routed::Departed(*participant)
                    }
                    None => Routed::Ignored,
                }
            }
            NetMsg::Disconnect { reason } => {
                info!(%reason, "Relay closed the session");
                Routed::Closed
            }
            other => {
                debug!(?other, "Unhandled relay message");
                Routed::Ignored
            }
        }
    }

    /// Last replicated transform of a remote player.
    pub async fn remote_state(&self, participant: ParticipantId) -> Option<ReplicatedTransform> {
        match self.remotes.get(&EntityId::player_of(participant)) {
            Some(view) => Some(view.state().await),
            None => None,
        }
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Despawns every entity, local player last.
    pub async fn shutdown(self) {
        for (_, view) in self.remotes {
            view.despawn().await;
        }
        self.local.despawn().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_shared::replication::TransformUpdate;

    use crate::transport::ChannelTransport;

    fn update(owner: u32, seq: u32, x: f32) -> NetMsg {
        NetMsg::TransformUpdate(TransformUpdate {
            entity: EntityId::player_of(ParticipantId(owner)),
            owner: ParticipantId(owner),
            seq,
            state: ReplicatedTransform::new(Vec3::new(x, 0.0, 0.0), Quat::IDENTITY),
        })
    }

    fn session() -> (Session<ChannelTransport>, SharedAvatar) {
        let avatar = SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY);
        let (transport, _rx) = ChannelTransport::channel();
        let s = Session::new(
            ParticipantId(1),
            avatar.clone(),
            transport,
            Duration::from_millis(500),
        );
        (s, avatar)
    }

    #[tokio::test]
    async fn remote_updates_build_views() {
        let (mut s, _avatar) = session();
        assert_eq!(s.route(&update(2, 1, 3.0)).await, Routed::Remote(ParticipantId(2)));
        assert_eq!(s.route(&update(2, 1, 9.0)).await, Routed::Ignored);
        assert_eq!(s.route(&update(3, 1, 4.0)).await, Routed::Remote(ParticipantId(3)));

        assert_eq!(s.remote_count(), 2);
        assert_eq!(s.remote_state(ParticipantId(2)).await.unwrap().position.x, 3.0);
        assert!(s.remote_state(ParticipantId(9)).await.is_none());
        s.shutdown().await;
    }

    #[tokio::test]
    async fn restore_moves_local_avatar() {
        let (mut s, avatar) = session();
        let state = ReplicatedTransform::new(Vec3::new(5.0, 5.0, 0.0), Quat::IDENTITY);

        assert_eq!(s.route(&NetMsg::restore(ParticipantId(1), 3, state)).await, Routed::Local);
        assert_eq!(avatar.snapshot().position, state.position);
        assert_eq!(
            s.route(&NetMsg::restore(ParticipantId(2), 3, state)).await,
            Routed::Ignored
        );
        s.shutdown().await;
    }

    #[tokio::test]
    async fn updates_for_own_player_are_ignored() {
        let (mut s, avatar) = session();
        assert_eq!(s.route(&update(1, 10, 8.0)).await, Routed::Ignored);
        assert_eq!(avatar.snapshot().position, Vec3::ZERO);
        assert_eq!(s.local().state().await, ReplicatedTransform::default());
        s.shutdown().await;
    }

    #[tokio::test]
    async fn forged_owner_creates_no_view() {
        let (mut s, _avatar) = session();
        let NetMsg::TransformUpdate(mut forged) = update(2, u32::MAX, 666.0) else {
            unreachable!()
        };
        forged.owner = ParticipantId(3);

        assert_eq!(s.route(&NetMsg::TransformUpdate(forged)).await, Routed::Ignored);
        assert_eq!(s.remote_count(), 0);
        assert_eq!(s.route(&update(2, 1, 5.0)).await, Routed::Remote(ParticipantId(2)));
        assert_eq!(s.remote_state(ParticipantId(2)).await.map(|t| t.position.x), Some(5.0));
        s.shutdown().await;
    }

    #[tokio::test]
    async fn departed_players_are_dropped() {
        let (mut s, _avatar) = session();
        s.route(&update(2, 1, 3.0)).await;
        s.route(&update(3, 1, 4.0)).await;

        let left = NetMsg::Left { participant: ParticipantId(2) };
        assert_eq!(s.route(&left).await, Routed::Departed(ParticipantId(2)));
        assert_eq!(s.route(&left).await, Routed::Ignored);
        assert_eq!(s.remote_count(), 1);
        assert!(s.remote_state(ParticipantId(2)).await.is_none());

        // A returning player gets a fresh view.
        assert_eq!(s.route(&update(2, 1, 8.0)).await, Routed::Remote(ParticipantId(2)));
        s.shutdown().await;
    }
}
