//! In-memory tracked entity.
//!
//! `SharedAvatar` stands in for the engine's player object: gameplay code
//! moves it through one handle while the replicator samples and teleports it
//! through another.

use std::sync::{Arc, PoisonError, RwLock};

use sync_shared::{
    math::{Quat, Vec3},
    replication::TrackedEntity,
};

/// Plain transform state of an avatar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarState {
    pub position: Vec3,
    pub orientation: Quat,
    pub grounded: bool,
    /// Number of hard teleports applied.
    pub teleports: u32,
}

/// Cloneable handle to one avatar.
#[derive(Debug, Clone)]
pub struct SharedAvatar {
    inner: Arc<RwLock<AvatarState>>,
}

impl SharedAvatar {
    /// Creates a grounded avatar at `position`.
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AvatarState {
                position,
                orientation,
                grounded: true,
                teleports: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> AvatarState {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_grounded(&self, grounded: bool) {
        self.update(|s| s.grounded = grounded);
    }

    pub fn set_position(&self, position: Vec3) {
        self.update(|s| s.position = position);
    }

    pub fn set_orientation(&self, orientation: Quat) {
        self.update(|s| s.orientation = orientation.normalized());
    }

    /// Moves by `delta`, leaving orientation and grounding alone.
    pub fn translate(&self, delta: Vec3) {
        self.update(|s| s.position = s.position.add(delta));
    }

    fn update(&self, f: impl FnOnce(&mut AvatarState)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard);
    }
}

impl TrackedEntity for SharedAvatar {
    fn position(&self) -> Vec3 {
        self.snapshot().position
    }

    fn orientation(&self) -> Quat {
        self.snapshot().orientation
    }

    fn is_grounded(&self) -> bool {
        self.snapshot().grounded
    }

    fn teleport_to(&mut self, position: Vec3, orientation: Quat) {
        self.update(|s| {
            s.position = position;
            s.orientation = orientation.normalized();
            s.teleports += 1;
        });
    }
}
