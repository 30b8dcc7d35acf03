//! Packetized Elementary Stream (PES) packet header, grounded on the teacher library's
//! `pes.rs` (which only parsed PTS/DTS, marking the rest `// TODO: Other fields`) and completed
//! from `original_source/src/mpeg2ts_parser.cc`'s `ParseESCR`/`ParseESRate`/`ParseDsmTrickMode`/
//! `ParsePesExtension` (see `SPEC_FULL.md` §4.6 and §9 open questions 1 and 2).

use crate::adaptation::{decode_escr, decode_ts5, encode_escr, encode_ts5, ClockReference};
use crate::error::{CodecError, Result};
use crate::slice_reader::SliceReader;

/// The category a PES `stream_id` byte falls into, per ISO/IEC 13818-1 Table 2-18.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdType {
    /// `0xbc`
    ProgramStreamMap,
    /// `0xbd`
    PrivateStream1,
    /// `0xbe`
    PaddingStream,
    /// `0xbf`
    PrivateStream2,
    /// `0xf0`
    EcmStream,
    /// `0xf1`
    EmmStream,
    /// `0xf2`
    DsmccStream,
    /// `0xf3`
    Stream13522,
    /// `0xf4`
    H222A,
    /// `0xf5`
    H222B,
    /// `0xf6`
    H222C,
    /// `0xf7`
    H222D,
    /// `0xf8`
    H222E,
    /// `0xf9`
    AncillaryStream,
    /// `0xff`
    ProgramStreamDirectory,
    /// `0xc0..=0xdf`
    Audio13818,
    /// `0xe0..=0xef`
    Video13818,
    /// Anything not covered above.
    Other,
}

/// Classifies a raw `stream_id` byte into its [`StreamIdType`]. The raw byte remains the
/// source of truth on [`PesPacket`]; this is a pure derived view.
pub fn classify_stream_id(stream_id: u8) -> StreamIdType {
    match stream_id {
        0xbc => StreamIdType::ProgramStreamMap,
        0xbd => StreamIdType::PrivateStream1,
        0xbe => StreamIdType::PaddingStream,
        0xbf => StreamIdType::PrivateStream2,
        0xf0 => StreamIdType::EcmStream,
        0xf1 => StreamIdType::EmmStream,
        0xf2 => StreamIdType::DsmccStream,
        0xf3 => StreamIdType::Stream13522,
        0xf4 => StreamIdType::H222A,
        0xf5 => StreamIdType::H222B,
        0xf6 => StreamIdType::H222C,
        0xf7 => StreamIdType::H222D,
        0xf8 => StreamIdType::H222E,
        0xf9 => StreamIdType::AncillaryStream,
        0xff => StreamIdType::ProgramStreamDirectory,
        0xc0..=0xdf => StreamIdType::Audio13818,
        0xe0..=0xef => StreamIdType::Video13818,
        _ => StreamIdType::Other,
    }
}

/// Whether this category carries the extended optional PES header (everything except the
/// categories ISO/IEC 13818-1 §2.4.3.7 explicitly excludes).
pub fn has_extended_header(stream_id_type: StreamIdType) -> bool {
    !matches!(
        stream_id_type,
        StreamIdType::ProgramStreamMap
            | StreamIdType::PaddingStream
            | StreamIdType::PrivateStream2
            | StreamIdType::EcmStream
            | StreamIdType::EmmStream
            | StreamIdType::DsmccStream
            | StreamIdType::H222E
            | StreamIdType::ProgramStreamDirectory
    )
}

/// `trick_mode_control` and its case-dependent sub-fields, ISO/IEC 13818-1 Table 2-19.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsmTrickMode {
    /// `trick_mode_control == 0`.
    FastForward {
        field_id: u8,
        intra_slice_refresh: bool,
        frequency_truncation: u8,
    },
    /// `trick_mode_control == 1`.
    SlowMotion { rep_cntrl: u8 },
    /// `trick_mode_control == 2`.
    FreezeFrame { field_id: u8 },
    /// `trick_mode_control == 3`.
    FastReverse {
        field_id: u8,
        intra_slice_refresh: bool,
        frequency_truncation: u8,
    },
    /// `trick_mode_control == 4`.
    SlowReverse { rep_cntrl: u8 },
    /// `trick_mode_control` in `5..=7`; the 5 trailing bits are preserved verbatim.
    Reserved { control: u8, bits: u8 },
}

pub(crate) fn decode_dsm_trick_mode(b: u8) -> DsmTrickMode {
    let control = (b >> 5) & 0x7;
    match control {
        0 => DsmTrickMode::FastForward {
            field_id: (b >> 3) & 0x3,
            intra_slice_refresh: (b & 0x04) != 0,
            frequency_truncation: b & 0x3,
        },
        1 => DsmTrickMode::SlowMotion { rep_cntrl: b & 0x1f },
        2 => DsmTrickMode::FreezeFrame {
            field_id: (b >> 3) & 0x3,
        },
        3 => DsmTrickMode::FastReverse {
            field_id: (b >> 3) & 0x3,
            intra_slice_refresh: (b & 0x04) != 0,
            frequency_truncation: b & 0x3,
        },
        4 => DsmTrickMode::SlowReverse { rep_cntrl: b & 0x1f },
        c => DsmTrickMode::Reserved { control: c, bits: b & 0x1f },
    }
}

pub(crate) fn encode_dsm_trick_mode(mode: DsmTrickMode) -> u8 {
    match mode {
        DsmTrickMode::FastForward {
            field_id,
            intra_slice_refresh,
            frequency_truncation,
        } => {
            (0 << 5)
                | ((field_id & 0x3) << 3)
                | (if intra_slice_refresh { 0x04 } else { 0 })
                | (frequency_truncation & 0x3)
        }
        DsmTrickMode::SlowMotion { rep_cntrl } => (1 << 5) | (rep_cntrl & 0x1f),
        DsmTrickMode::FreezeFrame { field_id } => (2 << 5) | ((field_id & 0x3) << 3) | 0x07,
        DsmTrickMode::FastReverse {
            field_id,
            intra_slice_refresh,
            frequency_truncation,
        } => {
            (3 << 5)
                | ((field_id & 0x3) << 3)
                | (if intra_slice_refresh { 0x04 } else { 0 })
                | (frequency_truncation & 0x3)
        }
        DsmTrickMode::SlowReverse { rep_cntrl } => (4 << 5) | (rep_cntrl & 0x1f),
        DsmTrickMode::Reserved { control, bits } => ((control & 0x7) << 5) | (bits & 0x1f),
    }
}

/// `program_packet_sequence_counter()` sub-field of [`PesExtension`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketSequenceCounter {
    pub counter: u8,
    pub mpeg1_mpeg2_identifier: bool,
    pub original_stuff_length: u8,
}

/// `P-STD_buffer()` sub-field of [`PesExtension`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PStdBuffer {
    pub scale: bool,
    pub size: u16,
}

/// `PES_extension()`: five optional sub-blocks in fixed order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PesExtension {
    pub private_data: Option<[u8; 16]>,
    pub pack_header: Option<Vec<u8>>,
    pub packet_sequence_counter: Option<PacketSequenceCounter>,
    pub p_std_buffer: Option<PStdBuffer>,
    pub extension_field: Option<Vec<u8>>,
}

impl PesExtension {
    fn body_len(&self) -> usize {
        1 /* flags byte */
            + self.private_data.map_or(0, |_| 16)
            + self.pack_header.as_ref().map_or(0, |d| 1 + d.len())
            + self.packet_sequence_counter.map_or(0, |_| 2)
            + self.p_std_buffer.map_or(0, |_| 2)
            + self.extension_field.as_ref().map_or(0, |d| 1 + d.len())
    }

    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let offset = reader.location();
        let flags = reader.read_u8()?;
        let private_data_flag = (flags & 0x80) != 0;
        let pack_header_field_flag = (flags & 0x40) != 0;
        let program_packet_sequence_counter_flag = (flags & 0x20) != 0;
        let p_std_buffer_flag = (flags & 0x10) != 0;
        let pes_extension_flag_2 = (flags & 0x01) != 0;

        let mut out = Self::default();
        if private_data_flag {
            out.private_data = Some(reader.read_array_ref::<16>()?);
        }
        if pack_header_field_flag {
            let len = reader.read_u8()? as usize;
            out.pack_header = Some(reader.read(len)?.to_vec());
        }
        if program_packet_sequence_counter_flag {
            let b = reader.read_array_ref::<2>()?;
            if (b[0] & 0x80) == 0 || (b[1] & 0x80) == 0 {
                return Err(CodecError::BadPesHeader { offset });
            }
            out.packet_sequence_counter = Some(PacketSequenceCounter {
                counter: b[0] & 0x7f,
                mpeg1_mpeg2_identifier: (b[1] & 0x40) != 0,
                original_stuff_length: b[1] & 0x3f,
            });
        }
        if p_std_buffer_flag {
            let b = reader.read_array_ref::<2>()?;
            if (b[0] & 0xc0) != 0x40 {
                return Err(CodecError::BadPesHeader { offset });
            }
            out.p_std_buffer = Some(PStdBuffer {
                scale: (b[0] & 0x20) != 0,
                size: (((b[0] & 0x1f) as u16) << 8) | b[1] as u16,
            });
        }
        if pes_extension_flag_2 {
            let len_byte = reader.read_u8()?;
            let len = (len_byte & 0x7f) as usize;
            out.extension_field = Some(reader.read(len)?.to_vec());
        }
        Ok(out)
    }

    fn write(&self, out: &mut Vec<u8>) {
        let flags = (if self.private_data.is_some() { 0x80 } else { 0 })
            | (if self.pack_header.is_some() { 0x40 } else { 0 })
            | (if self.packet_sequence_counter.is_some() {
                0x20
            } else {
                0
            })
            | (if self.p_std_buffer.is_some() { 0x10 } else { 0 })
            | 0x0e // 3-bit reserved field, all 1
            | (if self.extension_field.is_some() { 0x01 } else { 0 });
        out.push(flags);
        if let Some(data) = self.private_data {
            out.extend_from_slice(&data);
        }
        if let Some(pack_header) = &self.pack_header {
            out.push(pack_header.len() as u8);
            out.extend_from_slice(pack_header);
        }
        if let Some(counter) = self.packet_sequence_counter {
            out.push(0x80 | (counter.counter & 0x7f));
            out.push(
                0x80 | (if counter.mpeg1_mpeg2_identifier { 0x40 } else { 0 })
                    | (counter.original_stuff_length & 0x3f),
            );
        }
        if let Some(buf) = self.p_std_buffer {
            let b0 = 0x40 | (if buf.scale { 0x20 } else { 0 }) | ((buf.size >> 8) as u8 & 0x1f);
            let b1 = (buf.size & 0xff) as u8;
            out.extend_from_slice(&[b0, b1]);
        }
        if let Some(field) = &self.extension_field {
            out.push(0x80 | (field.len() as u8 & 0x7f));
            out.extend_from_slice(field);
        }
    }
}

/// The optional extended PES header carried by every [`StreamIdType`] except the ones
/// [`has_extended_header`] excludes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PesOptionalHeader {
    pub pes_scrambling_control: u8,
    pub pes_priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original_or_copy: bool,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub escr: Option<ClockReference>,
    pub es_rate: Option<u32>,
    pub dsm_trick_mode: Option<DsmTrickMode>,
    pub additional_copy_info: Option<u8>,
    pub previous_pes_packet_crc: Option<u16>,
    pub pes_extension: Option<PesExtension>,
    /// Raw trailing stuffing bytes (`0xff`) filling out `pes_header_data_length`.
    pub stuffing: Vec<u8>,
}

impl PesOptionalHeader {
    fn body_len(&self) -> usize {
        self.pts.map_or(0, |_| 5)
            + self.dts.map_or(0, |_| 5)
            + self.escr.map_or(0, |_| 6)
            + self.es_rate.map_or(0, |_| 3)
            + self.dsm_trick_mode.map_or(0, |_| 1)
            + self.additional_copy_info.map_or(0, |_| 1)
            + self.previous_pes_packet_crc.map_or(0, |_| 2)
            + self.pes_extension.as_ref().map_or(0, |e| 1 + e.body_len())
            + self.stuffing.len()
    }

    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let offset = reader.location();
        let flags1 = reader.read_u8()?;
        if (flags1 & 0xc0) != 0x80 {
            return Err(CodecError::BadPesHeader { offset });
        }
        let flags2 = reader.read_u8()?;
        let pts_flag = (flags2 & 0x80) != 0;
        let dts_flag = (flags2 & 0x40) != 0;
        let escr_flag = (flags2 & 0x20) != 0;
        let es_rate_flag = (flags2 & 0x10) != 0;
        let dsm_trick_mode_flag = (flags2 & 0x08) != 0;
        let additional_copy_info_flag = (flags2 & 0x04) != 0;
        let pes_crc_flag = (flags2 & 0x02) != 0;
        let pes_extension_flag = (flags2 & 0x01) != 0;
        if dts_flag && !pts_flag {
            return Err(CodecError::BadPesHeader { offset });
        }

        let header_data_length = reader.read_u8()? as usize;
        let mut sub = reader.new_sub_reader(header_data_length)?;

        let mut out = Self {
            pes_scrambling_control: (flags1 >> 4) & 0x3,
            pes_priority: (flags1 & 0x08) != 0,
            data_alignment_indicator: (flags1 & 0x04) != 0,
            copyright: (flags1 & 0x02) != 0,
            original_or_copy: (flags1 & 0x01) != 0,
            ..Default::default()
        };

        if pts_flag {
            let expected_prefix = if dts_flag { 0x3 } else { 0x2 };
            let (prefix, value) = decode_ts5(sub.read_array_ref::<5>()?)
                .ok_or(CodecError::BadPesHeader { offset })?;
            if prefix != expected_prefix {
                return Err(CodecError::BadPesHeader { offset });
            }
            out.pts = Some(value);
        }
        if dts_flag {
            let (prefix, value) = decode_ts5(sub.read_array_ref::<5>()?)
                .ok_or(CodecError::BadPesHeader { offset })?;
            if prefix != 0x1 {
                return Err(CodecError::BadPesHeader { offset });
            }
            out.dts = Some(value);
        }
        if escr_flag {
            out.escr = Some(decode_escr(sub.read_array_ref::<6>()?));
        }
        if es_rate_flag {
            let b = sub.read_array_ref::<3>()?;
            if (b[0] & 0x80) == 0 || (b[2] & 0x01) == 0 {
                return Err(CodecError::BadPesHeader { offset });
            }
            out.es_rate =
                Some((((b[0] & 0x7f) as u32) << 15) | ((b[1] as u32) << 7) | ((b[2] as u32 >> 1) & 0x7f));
        }
        if dsm_trick_mode_flag {
            out.dsm_trick_mode = Some(decode_dsm_trick_mode(sub.read_u8()?));
        }
        if additional_copy_info_flag {
            let b = sub.read_u8()?;
            if (b & 0x80) == 0 {
                return Err(CodecError::BadPesHeader { offset });
            }
            out.additional_copy_info = Some(b & 0x7f);
        }
        if pes_crc_flag {
            out.previous_pes_packet_crc = Some(sub.read_be_u16()?);
        }
        if pes_extension_flag {
            out.pes_extension = Some(PesExtension::parse(&mut sub)?);
        }
        out.stuffing = sub.read_to_end().to_vec();
        Ok(out)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let flags1 = 0x80
            | ((self.pes_scrambling_control & 0x3) << 4)
            | (if self.pes_priority { 0x08 } else { 0 })
            | (if self.data_alignment_indicator { 0x04 } else { 0 })
            | (if self.copyright { 0x02 } else { 0 })
            | (if self.original_or_copy { 0x01 } else { 0 });
        let flags2 = (if self.pts.is_some() { 0x80 } else { 0 })
            | (if self.dts.is_some() { 0x40 } else { 0 })
            | (if self.escr.is_some() { 0x20 } else { 0 })
            | (if self.es_rate.is_some() { 0x10 } else { 0 })
            | (if self.dsm_trick_mode.is_some() { 0x08 } else { 0 })
            | (if self.additional_copy_info.is_some() {
                0x04
            } else {
                0
            })
            | (if self.previous_pes_packet_crc.is_some() {
                0x02
            } else {
                0
            })
            | (if self.pes_extension.is_some() { 0x01 } else { 0 });
        out.push(flags1);
        out.push(flags2);

        let body_len = self.body_len();
        if body_len > 255 {
            return Err(CodecError::FieldOverflow {
                field: "pes_optional_header.header_data_length",
                value: body_len as u64,
                bits: 8,
            });
        }
        out.push(body_len as u8);

        if let Some(pts) = self.pts {
            let prefix = if self.dts.is_some() { 0x3 } else { 0x2 };
            out.extend_from_slice(&encode_ts5(prefix, pts));
        }
        if let Some(dts) = self.dts {
            out.extend_from_slice(&encode_ts5(0x1, dts));
        }
        if let Some(escr) = self.escr {
            out.extend_from_slice(&encode_escr(escr));
        }
        if let Some(rate) = self.es_rate {
            let b0 = 0x80 | ((rate >> 15) as u8 & 0x7f);
            let b1 = ((rate >> 7) & 0xff) as u8;
            let b2 = (((rate & 0x7f) << 1) | 0x01) as u8;
            out.extend_from_slice(&[b0, b1, b2]);
        }
        if let Some(mode) = self.dsm_trick_mode {
            out.push(encode_dsm_trick_mode(mode));
        }
        if let Some(info) = self.additional_copy_info {
            out.push(0x80 | (info & 0x7f));
        }
        if let Some(crc) = self.previous_pes_packet_crc {
            out.extend_from_slice(&crc.to_be_bytes());
        }
        if let Some(ext) = &self.pes_extension {
            ext.write(out);
        }
        out.extend_from_slice(&self.stuffing);
        Ok(())
    }
}

/// A PES packet header as carried by a single TS packet's payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PesPacket {
    pub stream_id: u8,
    pub pes_packet_length: u16,
    pub optional_header: Option<PesOptionalHeader>,
}

impl PesPacket {
    /// Derived category of [`PesPacket::stream_id`].
    pub fn stream_id_type(&self) -> StreamIdType {
        classify_stream_id(self.stream_id)
    }

    /// Parses a PES packet header. `reader` must already be positioned just past the
    /// `00 00 01` start code prefix.
    pub(crate) fn parse(reader: &mut SliceReader) -> Result<Self> {
        let stream_id = reader.read_u8()?;
        let pes_packet_length = reader.read_be_u16()?;
        let optional_header = if has_extended_header(classify_stream_id(stream_id)) {
            Some(PesOptionalHeader::parse(reader)?)
        } else {
            None
        };
        Ok(Self {
            stream_id,
            pes_packet_length,
            optional_header,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&[0x00, 0x00, 0x01]);
        out.push(self.stream_id);
        out.extend_from_slice(&self.pes_packet_length.to_be_bytes());
        if let Some(header) = &self.optional_header {
            header.write(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_known_stream_ids() {
        assert_eq!(classify_stream_id(0xbd), StreamIdType::PrivateStream1);
        assert_eq!(classify_stream_id(0xc5), StreamIdType::Audio13818);
        assert_eq!(classify_stream_id(0xe1), StreamIdType::Video13818);
        assert_eq!(classify_stream_id(0x42), StreamIdType::Other);
    }

    #[test]
    fn extended_header_exclusions() {
        assert!(!has_extended_header(StreamIdType::ProgramStreamMap));
        assert!(!has_extended_header(StreamIdType::PaddingStream));
        assert!(!has_extended_header(StreamIdType::H222E));
        assert!(has_extended_header(StreamIdType::PrivateStream1));
        assert!(has_extended_header(StreamIdType::Video13818));
        assert!(has_extended_header(StreamIdType::H222A));
    }

    #[test]
    fn pts_only_roundtrips() {
        let pes = PesPacket {
            stream_id: 0xe0,
            pes_packet_length: 0,
            optional_header: Some(PesOptionalHeader {
                pts: Some(5_000_000),
                ..Default::default()
            }),
        };
        let mut out = Vec::new();
        pes.write(&mut out).unwrap();
        let mut reader = SliceReader::new(&out[3..]); // skip the 00 00 01 prefix
        let parsed = PesPacket::parse(&mut reader).unwrap();
        assert_eq!(parsed, pes);
    }

    #[test]
    fn pts_dts_roundtrips() {
        let pes = PesPacket {
            stream_id: 0xe0,
            pes_packet_length: 0,
            optional_header: Some(PesOptionalHeader {
                pts: Some(5_000_000),
                dts: Some(4_900_000),
                ..Default::default()
            }),
        };
        let mut out = Vec::new();
        pes.write(&mut out).unwrap();
        let mut reader = SliceReader::new(&out[3..]);
        let parsed = PesPacket::parse(&mut reader).unwrap();
        assert_eq!(parsed, pes);
    }

    #[test]
    fn bad_pts_marker_is_rejected() {
        // S5: stream_id 0xe0, flags '10 00 0000', pts_flag set, header_data_length=5,
        // PTS bytes 21 00 01 00 00 (middle marker bit zero).
        let mut bytes = vec![0xe0, 0x00, 0x00, 0x80, 0x80, 0x05];
        bytes.extend_from_slice(&[0x21, 0x00, 0x01, 0x00, 0x00]);
        let mut reader = SliceReader::new(&bytes);
        assert!(PesPacket::parse(&mut reader).is_err());
    }

    #[test]
    fn dsm_trick_mode_roundtrips_all_variants() {
        let variants = [
            DsmTrickMode::FastForward {
                field_id: 0x2,
                intra_slice_refresh: true,
                frequency_truncation: 0x1,
            },
            DsmTrickMode::SlowMotion { rep_cntrl: 0x15 },
            DsmTrickMode::FreezeFrame { field_id: 0x3 },
            DsmTrickMode::FastReverse {
                field_id: 0x1,
                intra_slice_refresh: false,
                frequency_truncation: 0x2,
            },
            DsmTrickMode::SlowReverse { rep_cntrl: 0x0a },
        ];
        for mode in variants {
            let encoded = encode_dsm_trick_mode(mode);
            assert_eq!(decode_dsm_trick_mode(encoded), mode);
        }
    }

    #[test]
    fn pes_extension_flag_2_at_bit_position_7() {
        let ext = PesExtension {
            extension_field: Some(vec![0xaa, 0xbb]),
            ..Default::default()
        };
        let mut out = Vec::new();
        ext.write(&mut out);
        // Only flag_2 set: reserved bits 0b111 at positions 4-6, flag_2 at bit 0 (LSB).
        assert_eq!(out[0], 0x0f);
        let mut reader = SliceReader::new(&out);
        let parsed = PesExtension::parse(&mut reader).unwrap();
        assert_eq!(parsed, ext);
    }
}
