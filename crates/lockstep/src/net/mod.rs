mod config;
mod endpoint;
mod error;
mod link;
mod simulator;
mod socket;
mod stats;
mod tracking;
mod transport;

pub mod protocol;

pub use config::TransportConfig;
pub use endpoint::{Endpoint, EndpointError};
pub use error::TransportError;
pub use link::{DeliveredMessage, OutgoingMessage, PeerLink, PendingSend};
pub use protocol::{
    DEFAULT_PORT, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_MAGIC, Packet, PacketError,
    PacketType,
};
pub use simulator::{NetworkSimulator, PacketLossSimulation, Verdict};
pub use socket::{DatagramSocket, RecvOutcome, SendOutcome};
pub use stats::{LinkStats, NetworkStats};
pub use tracking::{
    DEFAULT_AVERAGE_PING, DEFAULT_PING_DEVIATION, DEFAULT_RTT_CAPACITY, ReceiveTracker,
    RttWindow,
};
pub use transport::{ReliableTransport, TransportEvent, TransportMode};
