//! Replicated state and the collaborator seams around it.
//!
//! The replicator never talks to a concrete engine or network. It sees:
//! - an [`AuthorityProvider`] answering who owns an entity,
//! - a [`TrackedEntity`] it samples and teleports,
//! - a [`ReplicationTransport`] it hands explicit [`TransformUpdate`]s to.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ecs::EntityId,
    math::{Quat, Vec3},
    net::ParticipantId,
};

/// Transform state shared with other participants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ReplicatedTransform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl ReplicatedTransform {
    pub const fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

/// One published sample of an entity's transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformUpdate {
    pub entity: EntityId,
    /// Participant that held authority when the sample was taken.
    pub owner: ParticipantId,
    /// Monotonic per-owner sample counter.
    pub seq: u32,
    pub state: ReplicatedTransform,
}

/// Answers ownership questions for entities.
pub trait AuthorityProvider: Send + Sync {
    /// The participant this process acts for.
    fn local_participant(&self) -> ParticipantId;

    /// The participant currently authoritative for `entity`, if any.
    fn owner_of(&self, entity: EntityId) -> Option<ParticipantId>;

    fn is_owner(&self, entity: EntityId) -> bool {
        self.owner_of(entity) == Some(self.local_participant())
    }
}

/// Sink for locally authoritative state. Fire-and-forget.
pub trait ReplicationTransport: Send {
    fn replicate(&mut self, update: TransformUpdate);
}

/// The engine-side entity being tracked.
pub trait TrackedEntity: Send {
    fn position(&self) -> Vec3;
    fn orientation(&self) -> Quat;
    /// Whether the entity is settled enough for its transform to be published.
    fn is_grounded(&self) -> bool;
    /// Instantly relocates the entity, bypassing any interpolation.
    fn teleport_to(&mut self, position: Vec3, orientation: Quat);
}

impl<A: AuthorityProvider + ?Sized> AuthorityProvider for Arc<A> {
    fn local_participant(&self) -> ParticipantId {
        (**self).local_participant()
    }

    fn owner_of(&self, entity: EntityId) -> Option<ParticipantId> {
        (**self).owner_of(entity)
    }
}

impl<T: ReplicationTransport + ?Sized> ReplicationTransport for Box<T> {
    fn replicate(&mut self, update: TransformUpdate) {
        (**self).replicate(update)
    }
}

/// Shared ownership map for one participant's view of the session.
///
/// Cloning yields another handle to the same table. Transfers are made by
/// whoever manages the session; the replicator only reads.
#[derive(Debug, Clone)]
pub struct AuthorityTable {
    local: ParticipantId,
    owners: Arc<RwLock<HashMap<EntityId, ParticipantId>>>,
}

impl AuthorityTable {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            owners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Table where the local participant owns its own player object.
    pub fn with_own_player(local: ParticipantId) -> Self {
        let table = Self::new(local);
        table.transfer(EntityId::player_of(local), local);
        table
    }

    /// Assigns `entity` to `to`, returning the previous owner.
    pub fn transfer(&self, entity: EntityId, to: ParticipantId) -> Option<ParticipantId> {
        let prev = self
            .owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity, to);
        debug!(%entity, from = ?prev, to = ?to, "Authority transferred");
        prev
    }

    /// Removes any owner for `entity`.
    pub fn release(&self, entity: EntityId) -> Option<ParticipantId> {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entity)
    }
}

impl AuthorityProvider for AuthorityTable {
    fn local_participant(&self) -> ParticipantId {
        self.local
    }

    fn owner_of(&self, entity: EntityId) -> Option<ParticipantId> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity)
            .copied()
    }
}
