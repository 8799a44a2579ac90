use lockstep::sync::{PeerEntry, SessionConfig};
use lockstep::{Endpoint, PacketLossSimulation, TransportConfig};

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub local_faction: u8,
    pub peers: Vec<PeerEntry>,
    pub tick_rate: u32,
    /// Submit a demo command every this many local steps. 0 disables it.
    pub command_interval: u64,
    /// Stop after this many frames have executed.
    pub frame_limit: Option<u64>,
    pub initial_steps_per_frame: u32,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            local_faction: 1,
            peers: Vec::new(),
            tick_rate: 20,
            command_interval: 10,
            frame_limit: None,
            initial_steps_per_frame: 4,
            packet_loss: None,
        }
    }
}

impl PeerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            local_faction: self.local_faction,
            peers: self.peers.clone(),
            initial_steps_per_frame: self.initial_steps_per_frame,
            steps_per_second: self.tick_rate,
            ..Default::default()
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            packet_loss: self.packet_loss.clone(),
            ..Default::default()
        }
    }
}

/// Parses `FACTION@IP:PORT`, e.g. `2@192.168.1.20:27016`.
pub fn parse_peer(value: &str) -> Result<PeerEntry, String> {
    let (faction, endpoint) = value
        .split_once('@')
        .ok_or_else(|| format!("expected FACTION@IP:PORT, got '{}'", value))?;

    let faction = faction
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid faction '{}': {}", faction, e))?;
    let endpoint = endpoint
        .trim()
        .parse::<Endpoint>()
        .map_err(|e| e.to_string())?;

    Ok(PeerEntry { faction, endpoint })
}
