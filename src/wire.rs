//! Frame codec for the replication tag.
//!
//! Each frame starts with a one-byte opcode; query ids and versions are
//! little-endian `u64`s, and the metadata payload is encoded by the codec
//! variant selected by the connection's [`ClusterVersion`]. The transport is
//! trusted to deliver intact frames: there is no checksum and no attempt to
//! resynchronize after a bad frame.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::types::{ClusterVersion, Version};

/// Wire opcodes. One byte, first in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Metadata broadcast: delta (or full snapshot) plus its version.
    Metadata = 0x4D,
    /// Sync-from query: "what is your current version?"
    SyncFromQuery = 0x46,
    /// Sync-from reply: the responder's version at receipt time.
    SyncFromReply = 0x66,
    /// Sync-to query: "reply once you have seen this version of mine."
    SyncToQuery = 0x54,
    /// Sync-to reply.
    SyncToReply = 0x74,
}

impl Opcode {
    fn from_byte(byte: u8) -> Option<Opcode> {
        match byte {
            0x4D => Some(Opcode::Metadata),
            0x46 => Some(Opcode::SyncFromQuery),
            0x66 => Some(Opcode::SyncFromReply),
            0x54 => Some(Opcode::SyncToQuery),
            0x74 => Some(Opcode::SyncToReply),
            _ => None,
        }
    }
}

/// One replication frame. A single serializer and a single parser dispatch
/// on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<V> {
    Metadata { delta: V, version: Version },
    SyncFromQuery { qid: u64 },
    SyncFromReply { qid: u64, version: Version },
    SyncToQuery { qid: u64, version: Version },
    SyncToReply { qid: u64 },
}

impl<V> Frame<V> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Metadata { .. } => Opcode::Metadata,
            Frame::SyncFromQuery { .. } => Opcode::SyncFromQuery,
            Frame::SyncFromReply { .. } => Opcode::SyncFromReply,
            Frame::SyncToQuery { .. } => Opcode::SyncToQuery,
            Frame::SyncToReply { .. } => Opcode::SyncToReply,
        }
    }
}

/// Any decode failure is a fatal protocol error: the transport is trusted,
/// so a bad frame means a peer (or the framing above us) is broken.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unsupported cluster version {0}")]
    UnsupportedClusterVersion(ClusterVersion),
    #[error("frame truncated reading {0}")]
    Truncated(&'static str),
    #[error("trailing bytes after frame body")]
    TrailingBytes,
    #[error("metadata encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("metadata decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub fn encode<V: Serialize>(cluster: ClusterVersion, frame: &Frame<V>) -> Result<Vec<u8>, WireError> {
    if cluster != ClusterVersion::V1 {
        return Err(WireError::UnsupportedClusterVersion(cluster));
    }

    let mut buf = Vec::with_capacity(17);
    buf.push(frame.opcode() as u8);
    match frame {
        Frame::Metadata { delta, version } => {
            let payload = bincode::serde::encode_to_vec(delta, bincode::config::standard())?;
            buf.extend_from_slice(&payload);
            buf.extend_from_slice(&version.to_le_bytes());
        }
        Frame::SyncFromQuery { qid } | Frame::SyncToReply { qid } => {
            buf.extend_from_slice(&qid.to_le_bytes());
        }
        Frame::SyncFromReply { qid, version } | Frame::SyncToQuery { qid, version } => {
            buf.extend_from_slice(&qid.to_le_bytes());
            buf.extend_from_slice(&version.to_le_bytes());
        }
    }
    Ok(buf)
}

pub fn decode<V: DeserializeOwned>(
    cluster: ClusterVersion,
    bytes: &[u8],
) -> Result<Frame<V>, WireError> {
    if cluster != ClusterVersion::V1 {
        return Err(WireError::UnsupportedClusterVersion(cluster));
    }

    let (&op, rest) = bytes.split_first().ok_or(WireError::Truncated("opcode"))?;
    let opcode = Opcode::from_byte(op).ok_or(WireError::UnknownOpcode(op))?;

    let frame = match opcode {
        Opcode::Metadata => {
            let (delta, used) =
                bincode::serde::decode_from_slice(rest, bincode::config::standard())?;
            let (version, rest) = read_u64(&rest[used..], "version")?;
            expect_end(rest)?;
            Frame::Metadata { delta, version }
        }
        Opcode::SyncFromQuery => {
            let (qid, rest) = read_u64(rest, "query id")?;
            expect_end(rest)?;
            Frame::SyncFromQuery { qid }
        }
        Opcode::SyncFromReply => {
            let (qid, rest) = read_u64(rest, "query id")?;
            let (version, rest) = read_u64(rest, "version")?;
            expect_end(rest)?;
            Frame::SyncFromReply { qid, version }
        }
        Opcode::SyncToQuery => {
            let (qid, rest) = read_u64(rest, "query id")?;
            let (version, rest) = read_u64(rest, "version")?;
            expect_end(rest)?;
            Frame::SyncToQuery { qid, version }
        }
        Opcode::SyncToReply => {
            let (qid, rest) = read_u64(rest, "query id")?;
            expect_end(rest)?;
            Frame::SyncToReply { qid }
        }
    };
    Ok(frame)
}

fn read_u64<'a>(bytes: &'a [u8], field: &'static str) -> Result<(u64, &'a [u8]), WireError> {
    if bytes.len() < 8 {
        return Err(WireError::Truncated(field));
    }
    let (head, rest) = bytes.split_at(8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(head);
    Ok((u64::from_le_bytes(raw), rest))
}

fn expect_end(rest: &[u8]) -> Result<(), WireError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(WireError::TrailingBytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    type Tags = BTreeSet<String>;

    fn tags(items: &[&str]) -> Tags {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn roundtrip_all_variants() {
        let frames: Vec<Frame<Tags>> = vec![
            Frame::Metadata {
                delta: tags(&["a", "b"]),
                version: 7,
            },
            Frame::SyncFromQuery { qid: 1 },
            Frame::SyncFromReply { qid: 2, version: 9 },
            Frame::SyncToQuery {
                qid: 3,
                version: 11,
            },
            Frame::SyncToReply { qid: 4 },
        ];

        for frame in frames {
            let bytes = encode(ClusterVersion::V1, &frame).unwrap();
            let decoded: Frame<Tags> = decode(ClusterVersion::V1, &bytes).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn opcode_bytes_match_protocol() {
        let frame: Frame<Tags> = Frame::SyncFromQuery { qid: 0 };
        let bytes = encode(ClusterVersion::V1, &frame).unwrap();
        assert_eq!(bytes[0], b'F');

        let frame: Frame<Tags> = Frame::Metadata {
            delta: tags(&[]),
            version: 0,
        };
        let bytes = encode(ClusterVersion::V1, &frame).unwrap();
        assert_eq!(bytes[0], b'M');
    }

    #[test]
    fn unknown_opcode_rejected() {
        let err = decode::<Tags>(ClusterVersion::V1, &[0xFF, 0, 0]).unwrap_err();
        assert!(matches!(err, WireError::UnknownOpcode(0xFF)));
    }

    #[test]
    fn truncated_field_rejected() {
        let err = decode::<Tags>(ClusterVersion::V1, &[b'F', 1, 2, 3]).unwrap_err();
        assert!(matches!(err, WireError::Truncated(_)));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(ClusterVersion::V1, &Frame::<Tags>::SyncToReply { qid: 5 }).unwrap();
        bytes.push(0);
        let err = decode::<Tags>(ClusterVersion::V1, &bytes).unwrap_err();
        assert!(matches!(err, WireError::TrailingBytes));
    }

    #[test]
    fn unsupported_cluster_version_rejected() {
        let frame: Frame<Tags> = Frame::SyncToReply { qid: 1 };
        let err = encode(ClusterVersion(2), &frame).unwrap_err();
        assert!(matches!(err, WireError::UnsupportedClusterVersion(_)));
    }
}
