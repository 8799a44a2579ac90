use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_resent: u64,
    pub messages_delivered: u64,
    pub duplicates_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_received: u64,
    pub foreign_packets: u64,
    pub malformed_packets: u64,
    pub peers_timed_out: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStats {
    pub average_ping: Duration,
    pub ping_deviation: Duration,
    pub rtt_samples: usize,
    pub pending_sends: usize,
    pub timed_out: bool,
}
