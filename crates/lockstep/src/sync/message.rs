use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use super::error::SyncError;
use super::{FactionId, FrameNumber};

/// Payloads exchanged between synchronizers, carried as reliable transport
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum FrameMessage {
    /// Every command one faction issued during one frame, in submission
    /// order. An empty batch still counts as a contribution.
    Commands {
        frame: FrameNumber,
        faction: FactionId,
        commands: Vec<Vec<u8>>,
    },
    /// The sender holds commands from every active faction for `frame`.
    Done {
        frame: FrameNumber,
        faction: FactionId,
        steps_taken: u32,
    },
}

impl FrameMessage {
    pub fn frame(&self) -> FrameNumber {
        match self {
            Self::Commands { frame, .. } | Self::Done { frame, .. } => *frame,
        }
    }

    pub fn faction(&self) -> FactionId {
        match self {
            Self::Commands { faction, .. } | Self::Done { faction, .. } => *faction,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Transport payloads carry no alignment guarantee, so the bytes are
    /// copied into an aligned buffer before validation.
    pub fn decode(data: &[u8]) -> Result<Self, SyncError> {
        let mut aligned: AlignedVec = AlignedVec::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_survive_encoding() {
        let message = FrameMessage::Commands {
            frame: 12,
            faction: 3,
            commands: vec![b"first".to_vec(), Vec::new(), b"third".to_vec()],
        };

        let bytes = message.encode().unwrap();
        assert_eq!(FrameMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_decode_from_unaligned_slice() {
        let message = FrameMessage::Done {
            frame: 4,
            faction: 1,
            steps_taken: 9,
        };
        let bytes = message.encode().unwrap();

        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        assert_eq!(FrameMessage::decode(&shifted[1..]).unwrap(), message);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            FrameMessage::decode(&[0xFF, 0x01, 0x02]),
            Err(SyncError::Decode(_))
        ));
    }
}
