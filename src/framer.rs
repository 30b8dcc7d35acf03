//! Byte-stream framing: recovers 188-byte packet boundaries from a possibly noisy input
//! stream and re-synchronizes after loss of lock (`SPEC_FULL.md` §4.3).

use crate::error::{CodecError, Result};
use crate::header::SYNC_BYTE;
use crate::packet::PACKET_LEN;

/// Pull-style byte source. Blanket-implemented over [`std::io::Read`] so files, stdin, and
/// in-memory cursors all work without an adapter.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes, returning the number actually read. `0` means end of
    /// stream. Must not reorder bytes relative to earlier calls.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

impl<R: std::io::Read> ByteSource for R {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(self, buf)
    }
}

/// Byte sink for serialized output. Blanket-implemented over [`std::io::Write`].
pub trait ByteSink {
    /// Writes the entire slice.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

impl<W: std::io::Write> ByteSink for W {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(self, buf)
    }
}

/// One chunk returned by [`Framer::next_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A sync-aligned 188-byte packet window, ready for [`crate::envelope::Envelope::parse_packet`].
    Packet([u8; PACKET_LEN]),
    /// Bytes that could not be aligned to the packet grid: either leading noise before the
    /// framer reacquires sync, or a short final run at end of stream. `1 ≤ len < sync_gap`.
    Unaligned(Vec<u8>),
    /// The input stream is exhausted and no bytes remain buffered.
    Eof,
    /// No sync byte triple was found within `sync_gap` bytes of lookahead. Terminal: the
    /// stream cannot continue to make progress.
    LostSync,
}

/// Resynchronizing byte-stream framer. Owns its back buffer; the source is pulled from on
/// demand and never written back to.
pub struct Framer<S> {
    source: S,
    sync_gap: usize,
    buffer: Vec<u8>,
    eof: bool,
    lost_sync: bool,
    packet_index: u64,
    byte_offset: u64,
}

impl<S: ByteSource> Framer<S> {
    /// Smallest accepted `sync_gap`: exactly one packet.
    pub const MIN_SYNC_GAP: usize = PACKET_LEN;
    /// Largest accepted `sync_gap`: 100 packets.
    pub const MAX_SYNC_GAP: usize = PACKET_LEN * 100;
    /// `sync_gap` used by [`Framer::with_default_sync_gap`].
    pub const DEFAULT_SYNC_GAP: usize = 1880;

    /// Builds a framer over `source` with the given resync lookahead. `sync_gap` must fall in
    /// `188..=18800`.
    pub fn new(source: S, sync_gap: usize) -> Result<Self> {
        if !(Self::MIN_SYNC_GAP..=Self::MAX_SYNC_GAP).contains(&sync_gap) {
            return Err(CodecError::FieldOverflow {
                field: "sync_gap",
                value: sync_gap as u64,
                bits: 0,
            });
        }
        Ok(Self {
            source,
            sync_gap,
            buffer: Vec::with_capacity(sync_gap),
            eof: false,
            lost_sync: false,
            packet_index: 0,
            byte_offset: 0,
        })
    }

    /// Builds a framer using [`Framer::DEFAULT_SYNC_GAP`].
    pub fn with_default_sync_gap(source: S) -> Self {
        Self::new(source, Self::DEFAULT_SYNC_GAP).expect("default sync_gap is always in range")
    }

    /// The ordinal that will be assigned to the next emitted chunk.
    pub fn packet_index(&self) -> u64 {
        self.packet_index
    }

    /// The input-stream byte offset of the front of the internal buffer.
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    fn refill_to(&mut self, target: usize) -> Result<()> {
        let mut scratch = [0u8; 4096];
        while self.buffer.len() < target && !self.eof {
            let n = self.source.read(&mut scratch)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&scratch[..n]);
            }
        }
        Ok(())
    }

    fn take_front(&mut self, n: usize) -> Vec<u8> {
        self.buffer.drain(..n).collect()
    }

    fn emit(&mut self, n: usize) -> Vec<u8> {
        let bytes = self.take_front(n);
        self.byte_offset += n as u64;
        self.packet_index += 1;
        bytes
    }

    /// Returns the next chunk: a sync-aligned packet, an unaligned run, end of stream, or a
    /// terminal loss of sync. Once `LostSync` is returned, every subsequent call returns
    /// `LostSync` again without touching the source.
    pub fn next_chunk(&mut self) -> Result<Chunk> {
        if self.lost_sync {
            return Ok(Chunk::LostSync);
        }

        self.refill_to(PACKET_LEN)?;
        if self.buffer.len() < PACKET_LEN {
            if self.buffer.is_empty() {
                return Ok(Chunk::Eof);
            }
            let n = self.buffer.len();
            return Ok(Chunk::Unaligned(self.emit(n)));
        }

        if self.buffer[0] == SYNC_BYTE {
            let bytes = self.emit(PACKET_LEN);
            let mut packet = [0u8; PACKET_LEN];
            packet.copy_from_slice(&bytes);
            return Ok(Chunk::Packet(packet));
        }

        self.refill_to(self.sync_gap)?;
        if self.buffer.len() < 3 * PACKET_LEN && self.eof {
            let n = self.buffer.len();
            return Ok(Chunk::Unaligned(self.emit(n)));
        }

        let scan_limit = self.buffer.len().saturating_sub(2 * PACKET_LEN);
        for i in 0..scan_limit {
            if self.buffer[i] == SYNC_BYTE
                && self.buffer[i + PACKET_LEN] == SYNC_BYTE
                && self.buffer[i + 2 * PACKET_LEN] == SYNC_BYTE
            {
                log::debug!(
                    "resynchronized after {i} unaligned bytes at offset {}",
                    self.byte_offset
                );
                return Ok(Chunk::Unaligned(self.emit(i)));
            }
        }

        log::debug!("lost sync at byte offset {}", self.byte_offset);
        self.lost_sync = true;
        Ok(Chunk::LostSync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn valid_packet() -> [u8; PACKET_LEN] {
        let mut packet = [0xffu8; PACKET_LEN];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x1f;
        packet[2] = 0xff;
        packet[3] = 0x10;
        packet
    }

    #[test]
    fn lost_sync_on_noise_with_no_aligned_sync_bytes() {
        let input = vec![0xAAu8; 3000];
        let mut framer = Framer::new(Cursor::new(input), 1880).unwrap();
        assert_eq!(framer.next_chunk().unwrap(), Chunk::LostSync);
        assert_eq!(framer.next_chunk().unwrap(), Chunk::LostSync);
    }

    #[test]
    fn resyncs_after_leading_noise() {
        let mut input = vec![0xAAu8; 100];
        let packet = valid_packet();
        input.extend_from_slice(&packet);
        input.extend_from_slice(&packet);
        input.extend_from_slice(&packet);
        let mut framer = Framer::new(Cursor::new(input), 1880).unwrap();

        match framer.next_chunk().unwrap() {
            Chunk::Unaligned(bytes) => assert_eq!(bytes.len(), 100),
            other => panic!("expected Unaligned(100), got {other:?}"),
        }
        assert_eq!(framer.next_chunk().unwrap(), Chunk::Packet(packet));
        assert_eq!(framer.next_chunk().unwrap(), Chunk::Packet(packet));
        assert_eq!(framer.next_chunk().unwrap(), Chunk::Packet(packet));
        assert_eq!(framer.next_chunk().unwrap(), Chunk::Eof);
    }

    #[test]
    fn partial_tail_then_eof() {
        let packet = valid_packet();
        let mut input = packet.to_vec();
        input.extend_from_slice(&[0x47u8; 112]);
        let mut framer = Framer::new(Cursor::new(input), 1880).unwrap();

        assert_eq!(framer.next_chunk().unwrap(), Chunk::Packet(packet));
        match framer.next_chunk().unwrap() {
            Chunk::Unaligned(bytes) => assert_eq!(bytes.len(), 112),
            other => panic!("expected Unaligned(112), got {other:?}"),
        }
        assert_eq!(framer.next_chunk().unwrap(), Chunk::Eof);
    }

    #[test]
    fn packet_index_and_byte_offset_advance_monotonically() {
        let packet = valid_packet();
        let mut input = packet.to_vec();
        input.extend_from_slice(&packet);
        let mut framer = Framer::new(Cursor::new(input), 1880).unwrap();

        assert_eq!(framer.packet_index(), 0);
        framer.next_chunk().unwrap();
        assert_eq!(framer.packet_index(), 1);
        assert_eq!(framer.byte_offset(), PACKET_LEN as u64);
        framer.next_chunk().unwrap();
        assert_eq!(framer.packet_index(), 2);
        assert_eq!(framer.byte_offset(), 2 * PACKET_LEN as u64);
    }

    #[test]
    fn rejects_out_of_range_sync_gap() {
        assert!(Framer::new(Cursor::new(Vec::<u8>::new()), 10).is_err());
        assert!(Framer::new(Cursor::new(Vec::<u8>::new()), 100_000).is_err());
    }
}
