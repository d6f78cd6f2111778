//! Entity identity.
//!
//! Entities are owned by the hosting world; this crate only needs a stable id
//! to address replicated state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::ParticipantId;

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// High bit marks per-participant player objects.
    const PLAYER_TAG: u64 = 1 << 63;

    /// Id of the player object bound to `participant`.
    ///
    /// Every participant gets exactly one player object, so the id is derived
    /// rather than allocated and is identical on every peer.
    pub const fn player_of(participant: ParticipantId) -> Self {
        EntityId(Self::PLAYER_TAG | participant.0 as u64)
    }

    /// Returns the participant a player object belongs to.
    pub const fn player_participant(self) -> Option<ParticipantId> {
        if self.0 & Self::PLAYER_TAG != 0 {
            Some(ParticipantId((self.0 & !Self::PLAYER_TAG) as u32))
        } else {
            None
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.player_participant() {
            Some(p) => write!(f, "player#{}", p.0),
            None => write!(f, "entity#{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_ids_map_back_to_participant() {
        let e = EntityId::player_of(ParticipantId(42));
        assert_eq!(e.player_participant(), Some(ParticipantId(42)));
        assert_eq!(e.to_string(), "player#42");
        assert_eq!(EntityId(7).player_participant(), None);
    }
}
