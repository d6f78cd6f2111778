//! Persisted player snapshots.
//!
//! Keeps the last replicated transform per participant so it can be handed
//! back when that participant rejoins. The on-disk format is a JSON array of
//! [`StoredSnapshot`]s.

use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    net::ParticipantId,
    replication::{ReplicatedTransform, TransformUpdate},
};

/// Last known transform of one participant's player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub participant: ParticipantId,
    pub seq: u32,
    pub state: ReplicatedTransform,
    pub saved_at: DateTime<Utc>,
}

/// In-memory snapshot table with optional JSON persistence.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    entries: BTreeMap<ParticipantId, StoredSnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `update` as its owner's latest snapshot.
    ///
    /// Only player objects are stored; updates older than the stored one are
    /// ignored. Returns whether the store changed.
    pub fn record(&mut self, update: &TransformUpdate) -> bool {
        if update.entity.player_participant() != Some(update.owner) {
            return false;
        }
        if let Some(prev) = self.entries.get(&update.owner) {
            if prev.seq > update.seq {
                debug!(participant = ?update.owner, stored = prev.seq, got = update.seq, "Stale snapshot ignored");
                return false;
            }
        }
        self.entries.insert(
            update.owner,
            StoredSnapshot {
                participant: update.owner,
                seq: update.seq,
                state: update.state,
                saved_at: Utc::now(),
            },
        );
        true
    }

    pub fn get(&self, participant: ParticipantId) -> Option<&StoredSnapshot> {
        self.entries.get(&participant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a store from disk. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No snapshot store yet, starting empty");
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot store {}", path.display()))?;
        let list: Vec<StoredSnapshot> = serde_json::from_str(&text)
            .with_context(|| format!("parse snapshot store {}", path.display()))?;
        let entries = list.into_iter().map(|s| (s.participant, s)).collect();
        let store = Self { entries };
        info!(path = %path.display(), snapshots = store.len(), "Snapshot store loaded");
        Ok(store)
    }

    /// Writes the store to disk as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let list: Vec<&StoredSnapshot> = self.entries.values().collect();
        let text = serde_json::to_string_pretty(&list).context("serialize snapshot store")?;
        std::fs::write(path, text)
            .with_context(|| format!("write snapshot store {}", path.display()))?;
        debug!(path = %path.display(), snapshots = list.len(), "Snapshot store saved");
        Ok(())
    }
}
