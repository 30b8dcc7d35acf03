//! Per-packet envelope: pairs a [`Mpeg2TsPacket`] (or the raw bytes it failed to parse from)
//! with its ordinal and byte offset in the input stream (`SPEC_FULL.md` §3/§4.4).

use crate::error::{CodecError, Result};
use crate::packet::{Mpeg2TsPacket, PACKET_LEN};

/// The body of an [`Envelope`]: either a fully structured packet, or the raw bytes the framer
/// handed over when parsing failed (or was never attempted, for an unaligned run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A successfully parsed 188-byte packet.
    Parsed(Mpeg2TsPacket),
    /// Opaque bytes: either a packet that failed structural validation, or an unaligned run
    /// the framer emitted while resynchronizing.
    Raw(Vec<u8>),
}

/// One packet (or raw run) from an input stream, tagged with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Monotonically increasing ordinal, incremented by exactly one per emitted chunk.
    pub packet_index: u64,
    /// Byte offset of this chunk's first byte within the input stream.
    pub byte_offset: u64,
    /// The parsed packet, or the raw bytes it was recovered from.
    pub body: Body,
}

impl Envelope {
    /// Parses one 188-byte packet window into an [`Envelope`]. Never fails: any structural
    /// problem in `bytes` falls back to a `Raw` envelope, as required by §4.4.
    pub fn parse_packet(packet_index: u64, byte_offset: u64, bytes: &[u8; PACKET_LEN]) -> Self {
        let body = match Mpeg2TsPacket::parse(bytes) {
            Ok(packet) => Body::Parsed(packet),
            Err(err) => {
                log::warn!(
                    "packet {packet_index} at offset {byte_offset}: {err}; falling back to raw"
                );
                Body::Raw(bytes.to_vec())
            }
        };
        Self {
            packet_index,
            byte_offset,
            body,
        }
    }

    /// Wraps an unaligned run of bytes the framer skipped while resynchronizing. Never a
    /// `Parsed` packet by construction — the framer only hands over aligned 188-byte windows
    /// for that path.
    pub fn raw(packet_index: u64, byte_offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            packet_index,
            byte_offset,
            body: Body::Raw(bytes),
        }
    }

    /// Serializes this envelope's body into `out`, returning the number of bytes written.
    /// For a `Parsed` body this is always [`PACKET_LEN`]; for `Raw` it is the length of the
    /// stored bytes.
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<usize> {
        match &self.body {
            Body::Parsed(packet) => {
                let bytes = packet.serialize()?;
                out.extend_from_slice(&bytes);
                Ok(bytes.len())
            }
            Body::Raw(bytes) => {
                out.extend_from_slice(bytes);
                Ok(bytes.len())
            }
        }
    }

    /// `true` if this envelope fell back to (or was constructed as) `Raw`.
    pub fn is_raw(&self) -> bool {
        matches!(self.body, Body::Raw(_))
    }
}

/// Helper used by callers that want a hard error instead of a silent `Raw` fallback
/// (the CLI's `--no-raw` mode, per §6).
pub fn reject_raw(envelope: &Envelope) -> Result<()> {
    if envelope.is_raw() {
        return Err(CodecError::LostSync {
            offset: envelope.byte_offset as usize,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::header::SYNC_BYTE;

    #[test]
    fn bad_sync_byte_falls_back_to_raw() {
        let bytes = [0xAAu8; PACKET_LEN];
        let envelope = Envelope::parse_packet(0, 0, &bytes);
        assert!(envelope.is_raw());
        match &envelope.body {
            Body::Raw(raw) => assert_eq!(raw.len(), PACKET_LEN),
            _ => panic!("expected raw body"),
        }
    }

    #[test]
    fn valid_minimal_packet_parses_and_roundtrips() {
        use crate::header::PacketHeader;
        let mut bytes = [0xffu8; PACKET_LEN];
        let header = PacketHeader::new()
            .with_sync_byte(SYNC_BYTE)
            .with_pid(0x1fff)
            .with_payload_exists(true);
        bytes[0..4].copy_from_slice(&header.into_bytes());

        let envelope = Envelope::parse_packet(5, 940, &bytes);
        assert!(!envelope.is_raw());
        assert_eq!(envelope.packet_index, 5);
        assert_eq!(envelope.byte_offset, 940);

        let mut out = Vec::new();
        let written = envelope.serialize(&mut out).unwrap();
        assert_eq!(written, PACKET_LEN);
        assert_eq!(out, bytes.to_vec());
    }

    #[test]
    fn raw_envelope_roundtrips_its_bytes() {
        let bytes = vec![0xAAu8; 100];
        let envelope = Envelope::raw(2, 0, bytes.clone());
        let mut out = Vec::new();
        let written = envelope.serialize(&mut out).unwrap();
        assert_eq!(written, 100);
        assert_eq!(out, bytes);
    }
}
