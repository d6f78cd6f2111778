//! Configuration system.
//!
//! Loads participant/relay configuration from JSON strings or files.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::net::ParticipantId;

/// Root configuration shared by replicator and relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Relay address, e.g. `127.0.0.1:40100`.
    pub relay_addr: String,
    /// Stable participant identity (replicator only).
    #[serde(default = "default_participant_id")]
    pub participant_id: u32,
    /// Display name (replicator only).
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Seconds between transform samples.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: f32,
    /// Snapshot store file (relay only). In-memory when unset.
    #[serde(default)]
    pub store_path: Option<String>,
}

fn default_participant_id() -> u32 {
    1
}

fn default_display_name() -> String {
    "Player".to_string()
}

fn default_update_interval_secs() -> f32 {
    0.5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:40100".to_string(),
            participant_id: default_participant_id(),
            display_name: default_display_name(),
            update_interval_secs: default_update_interval_secs(),
            store_path: None,
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn participant(&self) -> ParticipantId {
        ParticipantId(self.participant_id)
    }

    /// Sampling interval; must be positive and finite.
    pub fn update_interval(&self) -> anyhow::Result<Duration> {
        let secs = self.update_interval_secs;
        if !secs.is_finite() || secs <= 0.0 {
            anyhow::bail!("update_interval_secs must be a positive number, got {secs}");
        }
        Ok(Duration::from_secs_f32(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = SyncConfig::from_json_str(r#"{ "relay_addr": "10.0.0.2:9000" }"#).unwrap();
        assert_eq!(cfg.relay_addr, "10.0.0.2:9000");
        assert_eq!(cfg.participant(), ParticipantId(1));
        assert_eq!(cfg.update_interval().unwrap(), Duration::from_millis(500));
        assert_eq!(cfg.store_path, None);
    }

    #[test]
    fn non_positive_interval_is_rejected() {
        let cfg = SyncConfig {
            update_interval_secs: 0.0,
            ..Default::default()
        };
        assert!(cfg.update_interval().is_err());

        let cfg = SyncConfig {
            update_interval_secs: f32::NAN,
            ..Default::default()
        };
        assert!(cfg.update_interval().is_err());
    }
}
