pub const PROTOCOL_MAGIC: u8 = 0xD7;
pub const DEFAULT_PORT: u16 = 27016;

pub const MAX_DATAGRAM_SIZE: usize = 65_507;
pub const MESSAGE_HEADER_SIZE: usize = 8;
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - MESSAGE_HEADER_SIZE;

const TYPE_OFFSET: usize = 1;
const SEQUENCE_OFFSET: usize = 2;
const LENGTH_OFFSET: usize = 6;
const BROADCAST_PAYLOAD_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Message = 0,
    Acknowledgement = 1,
    Broadcast = 2,
    Ping = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Message),
            1 => Ok(Self::Acknowledgement),
            2 => Ok(Self::Broadcast),
            3 => Ok(Self::Ping),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Message { sequence: u32, payload: Vec<u8> },
    Acknowledgement { sequence: u32 },
    Broadcast { payload: Vec<u8> },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("not a lockstep packet")]
    Foreign,
    #[error("packet has no type byte")]
    MissingType,
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("truncated {kind:?} packet: need {expected} bytes, got {actual}")]
    Truncated {
        kind: PacketType,
        expected: usize,
        actual: usize,
    },
    #[error("payload of {0} bytes does not fit in a datagram")]
    PayloadTooLarge(usize),
}

impl PacketError {
    /// Foreign traffic is expected on a shared port; everything else means
    /// the sender speaks the protocol but produced a broken packet.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Foreign)
    }
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Message { .. } => PacketType::Message,
            Self::Acknowledgement { .. } => PacketType::Acknowledgement,
            Self::Broadcast { .. } => PacketType::Broadcast,
            Self::Ping => PacketType::Ping,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            Self::Message { sequence, payload } => encode_message(payload, *sequence),
            Self::Acknowledgement { sequence } => Ok(encode_ack(*sequence)),
            Self::Broadcast { payload } => Ok(encode_broadcast(payload)),
            Self::Ping => Ok(encode_ping()),
        }
    }
}

pub fn encode_message(payload: &[u8], sequence: u32) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(PacketError::PayloadTooLarge(payload.len()));
    }
    let length = payload.len() as u16;

    let mut data = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    data.push(PROTOCOL_MAGIC);
    data.push(PacketType::Message as u8);
    data.extend_from_slice(&sequence.to_le_bytes());
    data.extend_from_slice(&length.to_le_bytes());
    data.extend_from_slice(payload);
    Ok(data)
}

pub fn encode_ack(sequence: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(LENGTH_OFFSET);
    data.push(PROTOCOL_MAGIC);
    data.push(PacketType::Acknowledgement as u8);
    data.extend_from_slice(&sequence.to_le_bytes());
    data
}

pub fn encode_broadcast(payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(BROADCAST_PAYLOAD_OFFSET + payload.len());
    data.push(PROTOCOL_MAGIC);
    data.push(PacketType::Broadcast as u8);
    data.extend_from_slice(payload);
    data
}

pub fn encode_ping() -> Vec<u8> {
    vec![PROTOCOL_MAGIC, PacketType::Ping as u8]
}

#[inline]
pub fn is_foreign(data: &[u8]) -> bool {
    data.first() != Some(&PROTOCOL_MAGIC)
}

pub fn decode(data: &[u8]) -> Result<Packet, PacketError> {
    if is_foreign(data) {
        return Err(PacketError::Foreign);
    }

    let kind_byte = *data.get(TYPE_OFFSET).ok_or(PacketError::MissingType)?;
    let kind = PacketType::try_from(kind_byte)?;

    match kind {
        PacketType::Message => {
            require(kind, data, MESSAGE_HEADER_SIZE)?;
            let sequence = read_u32(data, SEQUENCE_OFFSET);
            let length = u16::from_le_bytes([data[LENGTH_OFFSET], data[LENGTH_OFFSET + 1]]);
            let end = MESSAGE_HEADER_SIZE + length as usize;
            require(kind, data, end)?;
            Ok(Packet::Message {
                sequence,
                payload: data[MESSAGE_HEADER_SIZE..end].to_vec(),
            })
        }
        PacketType::Acknowledgement => {
            require(kind, data, LENGTH_OFFSET)?;
            Ok(Packet::Acknowledgement {
                sequence: read_u32(data, SEQUENCE_OFFSET),
            })
        }
        PacketType::Broadcast => Ok(Packet::Broadcast {
            payload: data[BROADCAST_PAYLOAD_OFFSET..].to_vec(),
        }),
        PacketType::Ping => Ok(Packet::Ping),
    }
}

fn require(kind: PacketType, data: &[u8], expected: usize) -> Result<(), PacketError> {
    if data.len() < expected {
        return Err(PacketError::Truncated {
            kind,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout() {
        let data = encode_message(b"abc", 0x0102_0304).unwrap();

        assert_eq!(data[0], PROTOCOL_MAGIC);
        assert_eq!(data[1], 0);
        assert_eq!(&data[2..6], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&data[6..8], &[3, 0]);
        assert_eq!(&data[8..], b"abc");
    }

    #[test]
    fn test_ack_and_ping_layout() {
        assert_eq!(encode_ack(7), vec![PROTOCOL_MAGIC, 1, 7, 0, 0, 0]);
        assert_eq!(encode_ping(), vec![PROTOCOL_MAGIC, 3]);
    }

    #[test]
    fn test_broadcast_payload_starts_at_byte_two() {
        let data = encode_broadcast(&[9, 8, 7]);
        assert_eq!(data, vec![PROTOCOL_MAGIC, 2, 9, 8, 7]);

        match decode(&data).unwrap() {
            Packet::Broadcast { payload } => assert_eq!(payload, vec![9, 8, 7]),
            other => panic!("Expected Broadcast, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message() {
        let payload: Vec<u8> = (0..=255).collect();
        let data = encode_message(&payload, 42).unwrap();

        let packet = decode(&data).unwrap();
        assert_eq!(
            packet,
            Packet::Message {
                sequence: 42,
                payload
            }
        );
        assert_eq!(packet.encode().unwrap(), data);
    }

    #[test]
    fn test_empty_message_payload() {
        let data = encode_message(&[], 0).unwrap();
        assert_eq!(data.len(), MESSAGE_HEADER_SIZE);
        assert_eq!(
            decode(&data).unwrap(),
            Packet::Message {
                sequence: 0,
                payload: Vec::new()
            }
        );
    }

    #[test]
    fn test_foreign_packets() {
        assert!(is_foreign(&[]));
        assert!(is_foreign(&[0x00, 0x00]));
        assert!(!is_foreign(&[PROTOCOL_MAGIC]));

        assert_eq!(decode(&[]), Err(PacketError::Foreign));
        assert_eq!(decode(b"GET / HTTP/1.1"), Err(PacketError::Foreign));
        assert!(!PacketError::Foreign.is_malformed());
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = decode(&[PROTOCOL_MAGIC, 9]).unwrap_err();
        assert_eq!(err, PacketError::UnknownType(9));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_truncated_packets() {
        assert_eq!(decode(&[PROTOCOL_MAGIC]), Err(PacketError::MissingType));
        assert!(matches!(
            decode(&[PROTOCOL_MAGIC, 1, 0, 0]),
            Err(PacketError::Truncated {
                kind: PacketType::Acknowledgement,
                ..
            })
        ));

        let mut data = encode_message(b"hello", 1).unwrap();
        data.truncate(data.len() - 1);
        assert_eq!(
            decode(&data),
            Err(PacketError::Truncated {
                kind: PacketType::Message,
                expected: MESSAGE_HEADER_SIZE + 5,
                actual: MESSAGE_HEADER_SIZE + 4,
            })
        );
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            encode_message(&payload, 0),
            Err(PacketError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1))
        );
    }
}
