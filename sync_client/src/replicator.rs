//! Position replicator.
//!
//! Owner-authoritative sample/replicate/restore state machine for a single
//! entity's transform:
//! - `start` records the local participant as sampling owner if it holds
//!   authority over the entity.
//! - `tick` samples position/orientation while the entity is grounded and
//!   hands the sample to the transport.
//! - `on_state_restored` hard-teleports the local entity to the last
//!   replicated transform.
//!
//! Scheduling lives in [`crate::task`]; this type never sleeps.

use std::time::Duration;

use sync_shared::{
    ecs::EntityId,
    net::ParticipantId,
    replication::{
        AuthorityProvider, ReplicatedTransform, ReplicationTransport, TrackedEntity,
        TransformUpdate,
    },
};
use tracing::{debug, info, warn};

/// Default sampling interval.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Result of one sampling step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// State was sampled and handed to the transport.
    Replicated(TransformUpdate),
    /// Owner recorded but the entity is not settled; nothing published.
    NotGrounded,
    /// `start` never recorded an owner on this instance.
    NoOwner,
    /// Authority moved to another participant since `start`.
    AuthorityLost,
}

/// Running counters, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicatorStats {
    pub ticks: u64,
    pub replicated: u64,
    pub skipped_not_grounded: u64,
    pub skipped_no_owner: u64,
    pub skipped_authority_lost: u64,
    pub updates_applied: u64,
    pub restores: u64,
}

/// Sample/replicate/restore state for one tracked entity.
pub struct PositionReplicator<E, T, A> {
    entity_id: EntityId,
    interval: Duration,
    entity: E,
    transport: T,
    authority: A,

    owner: Option<ParticipantId>,
    started: bool,
    state: ReplicatedTransform,
    /// Highest sequence number written or accepted so far.
    seq: u32,
    stats: ReplicatorStats,
}

impl<E, T, A> PositionReplicator<E, T, A>
where
    E: TrackedEntity,
    T: ReplicationTransport,
    A: AuthorityProvider,
{
    pub fn new(
        entity_id: EntityId,
        interval: Duration,
        entity: E,
        transport: T,
        authority: A,
    ) -> Self {
        Self {
            entity_id,
            interval,
            entity,
            transport,
            authority,
            owner: None,
            started: false,
            state: ReplicatedTransform::default(),
            seq: 0,
            stats: ReplicatorStats::default(),
        }
    }

    /// Activation hook.
    ///
    /// Returns `true` when this instance is authoritative and the caller must
    /// schedule the first tick one interval from now. Only the first call can
    /// return `true`.
    pub fn start(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;

        if !self.authority.is_owner(self.entity_id) {
            debug!(entity = %self.entity_id, "Not authoritative, sampling disabled");
            return false;
        }

        let local = self.authority.local_participant();
        self.owner = Some(local);
        info!(entity = %self.entity_id, owner = ?local, interval_ms = self.interval.as_millis() as u64, "Sampling owner recorded");
        true
    }

    /// One sampling step. The driver reschedules regardless of the outcome.
    pub fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;

        let Some(owner) = self.owner else {
            self.stats.skipped_no_owner += 1;
            return TickOutcome::NoOwner;
        };

        if !self.authority.is_owner(self.entity_id) {
            self.stats.skipped_authority_lost += 1;
            debug!(entity = %self.entity_id, "Authority no longer held, tick skipped");
            return TickOutcome::AuthorityLost;
        }

        if !self.entity.is_grounded() {
            self.stats.skipped_not_grounded += 1;
            return TickOutcome::NotGrounded;
        }

        self.state = ReplicatedTransform::new(self.entity.position(), self.entity.orientation());
        self.seq = self.seq.wrapping_add(1);

        let update = TransformUpdate {
            entity: self.entity_id,
            owner,
            seq: self.seq,
            state: self.state,
        };
        self.transport.replicate(update);
        self.stats.replicated += 1;
        TickOutcome::Replicated(update)
    }

    /// Consumes another participant's published sample.
    ///
    /// Rejected while this instance holds authority, for foreign entities,
    /// when the sender is not the entity's owner, and for samples not newer
    /// than the last one seen.
    pub fn apply_update(&mut self, update: &TransformUpdate) -> bool {
        if update.entity != self.entity_id {
            return false;
        }
        if self.authority.is_owner(self.entity_id) {
            debug!(entity = %self.entity_id, from = ?update.owner, "Ignoring update for locally owned entity");
            return false;
        }
        // Player objects are owned by their participant unless the table says otherwise.
        let expected = self
            .authority
            .owner_of(self.entity_id)
            .or_else(|| self.entity_id.player_participant());
        if expected != Some(update.owner) {
            warn!(entity = %self.entity_id, from = ?update.owner, owner = ?expected, "Update from non-owner dropped");
            return false;
        }
        if update.seq <= self.seq {
            debug!(entity = %self.entity_id, seq = update.seq, last = self.seq, "Stale update dropped");
            return false;
        }

        self.state = update.state;
        self.seq = update.seq;
        self.stats.updates_applied += 1;
        true
    }

    /// Loads a stored snapshot delivered by the transport.
    ///
    /// Unlike [`apply_update`](Self::apply_update) this always overwrites the
    /// replicated state; subsequent local samples continue above its `seq`.
    pub fn load_snapshot(&mut self, update: &TransformUpdate) -> bool {
        if update.entity != self.entity_id {
            return false;
        }
        self.state = update.state;
        self.seq = self.seq.max(update.seq);
        true
    }

    /// Restore notification from the transport.
    ///
    /// No-op unless `recipient` is the local participant; otherwise the local
    /// entity is teleported to the current replicated transform.
    pub fn on_state_restored(&mut self, recipient: ParticipantId) -> bool {
        if recipient != self.authority.local_participant() {
            return false;
        }

        self.entity
            .teleport_to(self.state.position, self.state.orientation);
        self.stats.restores += 1;
        info!(entity = %self.entity_id, position = ?self.state.position, "Transform restored");
        true
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Participant recorded by `start`, if any.
    pub fn owner(&self) -> Option<ParticipantId> {
        self.owner
    }

    /// Last written or received transform.
    pub fn state(&self) -> ReplicatedTransform {
        self.state
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn stats(&self) -> ReplicatorStats {
        self.stats
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
