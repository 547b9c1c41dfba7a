use replica_serde::{BufferReader, BufferWriter};

use crate::wire::WireError;

/// Every frame starts with 12 bytes: a length (or sentinel) and 8 more bytes
pub const HEADER_LENGTH: usize = 12;
pub const ACK_SENTINEL: i32 = -1;
pub const PING_SENTINEL: i32 = -2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameHeader {
    /// `length` payload bytes follow
    Data { length: usize, seqn: i64 },
    Ack { seqn: i64 },
    Ping { timestamp: i32, counterpart: i32 },
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; HEADER_LENGTH]) -> Result<Self, WireError> {
        let mut reader = BufferReader::new(bytes);
        let length = reader.read_i32()?;
        match length {
            ACK_SENTINEL => Ok(FrameHeader::Ack {
                seqn: reader.read_i64()?,
            }),
            PING_SENTINEL => Ok(FrameHeader::Ping {
                timestamp: reader.read_i32()?,
                counterpart: reader.read_i32()?,
            }),
            length if length >= 0 => Ok(FrameHeader::Data {
                length: length as usize,
                seqn: reader.read_i64()?,
            }),
            length => Err(WireError::InvalidFrameLength(length)),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LENGTH] {
        let mut writer = BufferWriter::with_capacity(HEADER_LENGTH);
        match self {
            FrameHeader::Data { length, seqn } => {
                writer.write_i32(length as i32);
                writer.write_i64(seqn);
            }
            FrameHeader::Ack { seqn } => {
                writer.write_i32(ACK_SENTINEL);
                writer.write_i64(seqn);
            }
            FrameHeader::Ping {
                timestamp,
                counterpart,
            } => {
                writer.write_i32(PING_SENTINEL);
                writer.write_i32(timestamp);
                writer.write_i32(counterpart);
            }
        }
        let mut output = [0u8; HEADER_LENGTH];
        output.copy_from_slice(writer.as_slice());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_layout() {
        let bytes = FrameHeader::Ack { seqn: 5 }.to_bytes();
        assert_eq!(&bytes[0..4], &(-1i32).to_le_bytes());
        assert_eq!(&bytes[4..12], &5i64.to_le_bytes());
    }

    #[test]
    fn ping_layout() {
        let bytes = FrameHeader::Ping {
            timestamp: 7,
            counterpart: 3,
        }
        .to_bytes();
        assert_eq!(&bytes[0..4], &(-2i32).to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3i32.to_le_bytes());
    }

    #[test]
    fn headers_parse_back() {
        for header in [
            FrameHeader::Data {
                length: 100,
                seqn: 42,
            },
            FrameHeader::Ack { seqn: 9 },
            FrameHeader::Ping {
                timestamp: -4,
                counterpart: 11,
            },
        ] {
            assert_eq!(FrameHeader::parse(&header.to_bytes()).unwrap(), header);
        }
    }

    #[test]
    fn unknown_sentinel_is_rejected() {
        let mut bytes = [0u8; HEADER_LENGTH];
        bytes[0..4].copy_from_slice(&(-3i32).to_le_bytes());
        assert!(matches!(
            FrameHeader::parse(&bytes),
            Err(WireError::InvalidFrameLength(-3))
        ));
    }
}
