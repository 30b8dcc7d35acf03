//! The 4-byte link-layer header found at the start of every MPEG-TS packet.
//!
//! Reused near-verbatim from the teacher library's `PacketHeader`/`TransportScramblingControl`.

use modular_bitfield_msb::prelude::*;

/// The MPEG-TS sync byte every packet must start with.
pub const SYNC_BYTE: u8 = 0x47;

/// Transport scrambling control (TSC) value carried in the header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Reserved; do not use.
    Reserved,
    /// Scrambled with an even key.
    ScrambledEvenKey,
    /// Scrambled with an odd key.
    ScrambledOddKey,
}

/// Link-layer header found at the start of every 188-byte MPEG-TS packet.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Must equal [`SYNC_BYTE`] (`0x47`) for the packet to be valid.
    pub sync_byte: B8,
    /// Transport error indicator.
    pub transport_error_indicator: bool,
    /// Payload unit start indicator: the payload begins a new PES/PSI unit.
    pub payload_unit_start_indicator: bool,
    /// Transport priority.
    pub transport_priority: bool,
    /// 13-bit packet identifier.
    pub pid: B13,
    /// Transport scrambling control.
    pub transport_scrambling_control: TransportScramblingControl,
    /// Whether an adaptation field follows this header.
    pub adaptation_field_exists: bool,
    /// Whether a payload follows the adaptation field (if any).
    pub payload_exists: bool,
    /// 4-bit continuity counter.
    pub continuity_counter: B4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let bytes = [0x47u8, 0x41, 0x00, 0x10];
        let header = PacketHeader::from_bytes(bytes);
        assert_eq!(header.sync_byte(), 0x47);
        assert!(header.payload_unit_start_indicator());
        assert_eq!(header.pid(), 0x100);
        assert!(header.payload_exists());
        assert_eq!(header.into_bytes(), bytes);
    }
}
