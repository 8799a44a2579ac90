use std::io;

use super::endpoint::Endpoint;
use super::protocol::PacketError;

/// Errors surfaced by the public transport API. Malformed and foreign
/// datagrams never show up here; they are dropped on the inbound path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport has been shut down")]
    Disposed,
    #[error("peer {0} has timed out")]
    PeerTimedOut(Endpoint),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("transport failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Sending to a timed-out peer is a caller mistake, reported as an
    /// invalid operation that still names the peer.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::PeerTimedOut(_) | Self::InvalidOperation(_))
    }
}
