use crate::net::TransportError;

use super::FactionId;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode frame message: {0}")]
    Encode(String),
    #[error("failed to decode frame message: {0}")]
    Decode(String),
    #[error("faction {0} is not part of this session")]
    UnknownFaction(FactionId),
    #[error("the local faction cannot be removed from its own session")]
    LocalFaction,
    #[error("invalid session: {0}")]
    InvalidSession(String),
}
