use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::Endpoint;

use super::FactionId;
use super::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub faction: FactionId,
    pub endpoint: Endpoint,
}

/// Who takes part in a session and how frames are paced. Peer discovery
/// happens before a session is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub local_faction: FactionId,
    pub peers: Vec<PeerEntry>,
    pub initial_steps_per_frame: u32,
    pub min_steps_per_frame: u32,
    pub max_steps_per_frame: u32,
    /// Local simulation rate, used to size the pacing window in frames.
    pub steps_per_second: u32,
    /// How much history the frame pacer averages over.
    pub pacing_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_faction: 0,
            peers: Vec::new(),
            initial_steps_per_frame: 4,
            min_steps_per_frame: 1,
            max_steps_per_frame: 32,
            steps_per_second: 20,
            pacing_window: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn new(local_faction: FactionId) -> Self {
        Self {
            local_faction,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, faction: FactionId, endpoint: Endpoint) -> Self {
        self.peers.push(PeerEntry { faction, endpoint });
        self
    }

    /// Fixes the frame length, disabling adaptation.
    pub fn with_fixed_steps_per_frame(mut self, steps: u32) -> Self {
        self.initial_steps_per_frame = steps;
        self.min_steps_per_frame = steps;
        self.max_steps_per_frame = steps;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.min_steps_per_frame == 0 {
            return Err(SyncError::InvalidSession(
                "min_steps_per_frame must be at least 1".to_string(),
            ));
        }
        if self.min_steps_per_frame > self.max_steps_per_frame {
            return Err(SyncError::InvalidSession(format!(
                "min_steps_per_frame {} exceeds max_steps_per_frame {}",
                self.min_steps_per_frame, self.max_steps_per_frame
            )));
        }
        if self.steps_per_second == 0 {
            return Err(SyncError::InvalidSession(
                "steps_per_second must be at least 1".to_string(),
            ));
        }

        let mut factions = BTreeSet::from([self.local_faction]);
        let mut endpoints = BTreeSet::new();
        for peer in &self.peers {
            if !factions.insert(peer.faction) {
                return Err(SyncError::InvalidSession(format!(
                    "faction {} is listed twice",
                    peer.faction
                )));
            }
            if !endpoints.insert(peer.endpoint) {
                return Err(SyncError::InvalidSession(format!(
                    "endpoint {} is listed twice",
                    peer.endpoint
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_faction_rejected() {
        let config = SessionConfig::new(1)
            .with_peer(2, Endpoint::localhost(5000))
            .with_peer(1, Endpoint::localhost(5001));
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidSession(_))
        ));
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let config = SessionConfig::new(1)
            .with_peer(2, Endpoint::localhost(5000))
            .with_peer(3, Endpoint::localhost(5000));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_steps_bounds_checked() {
        let mut config = SessionConfig::new(1);
        config.min_steps_per_frame = 8;
        config.max_steps_per_frame = 4;
        assert!(config.validate().is_err());

        assert!(SessionConfig::new(1).with_fixed_steps_per_frame(3).validate().is_ok());
        assert!(SessionConfig::new(1).with_fixed_steps_per_frame(0).validate().is_err());
    }
}
