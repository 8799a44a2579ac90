use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::simulator::PacketLossSimulation;
use super::tracking::DEFAULT_RTT_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Pause between two passes of the outbound loop.
    pub resend_interval: Duration,
    /// Age at which an unacknowledged message times its peer out.
    pub send_timeout: Duration,
    pub min_resend_delay: Duration,
    /// Upper bound on a blocking read so the inbound loop notices shutdown.
    pub read_timeout: Duration,
    pub rtt_capacity: usize,
    pub broadcast_address: Ipv4Addr,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(10),
            send_timeout: Duration::from_secs(10),
            min_resend_delay: Duration::from_millis(1),
            read_timeout: Duration::from_millis(20),
            rtt_capacity: DEFAULT_RTT_CAPACITY,
            broadcast_address: Ipv4Addr::BROADCAST,
            packet_loss: None,
        }
    }
}
