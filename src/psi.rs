//! Program-Specific Information: PAT, PMT, and opaque "other" sections, grounded on the teacher
//! library's `psi.rs` (which only implemented the parse direction) and expanded with the
//! serialize direction and `OtherPsiSection`/`verify_crc` support (`SPEC_FULL.md` §4.7, §9).

use crate::error::{CodecError, Result};
use crate::slice_reader::SliceReader;
use crc::{Crc, CRC_32_MPEG_2};
use modular_bitfield_msb::prelude::*;

const PSI_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PsiSectionHeader {
    section_syntax_indicator: bool,
    zero_bit: bool,
    #[skip]
    reserved: B2,
    section_length: B12,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PsiTableSyntax {
    #[skip]
    reserved: B2,
    version_number: B5,
    current_next_indicator: bool,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PatEntryBits {
    program_number: B16,
    #[skip]
    reserved: B3,
    pid: B13,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PmtHeaderBits {
    #[skip]
    reserved1: B3,
    pcr_pid: B13,
    #[skip]
    reserved2: B4,
    program_info_length: B12,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct ElementaryStreamInfoHeaderBits {
    stream_type: B8,
    #[skip]
    reserved1: B3,
    elementary_pid: B13,
    #[skip]
    reserved2: B4,
    es_info_length: B12,
}

/// `{program_number, pid}` entry of a [`ProgramAssociationSection`]. `program_number == 0`
/// means `pid` is the network PID; otherwise it's a `program_map_pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pid: u16,
}

/// A single `{tag, data}` descriptor found in PMT program/stream descriptor loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

impl Descriptor {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let tag = reader.read_u8()?;
        let length = reader.read_u8()? as usize;
        let data = reader.read(length)?.to_vec();
        log::trace!("descriptor tag={tag} length={length}");
        Ok(Self { tag, data })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.data.len() > 255 {
            return Err(CodecError::FieldOverflow {
                field: "descriptor.length",
                value: self.data.len() as u64,
                bits: 8,
            });
        }
        out.push(self.tag);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        Ok(())
    }

    fn serialized_len(&self) -> usize {
        2 + self.data.len()
    }
}

fn parse_descriptors(reader: &mut SliceReader, total_len: usize) -> Result<Vec<Descriptor>> {
    let mut sub = reader.new_sub_reader(total_len)?;
    let mut descriptors = Vec::new();
    while sub.remaining_len() > 0 {
        descriptors.push(Descriptor::parse(&mut sub)?);
    }
    log::trace!("parsed {} descriptor(s) from {total_len} byte(s)", descriptors.len());
    Ok(descriptors)
}

fn write_descriptors(out: &mut Vec<u8>, descriptors: &[Descriptor]) -> Result<()> {
    for d in descriptors {
        d.write(out)?;
    }
    Ok(())
}

fn descriptors_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(Descriptor::serialized_len).sum()
}

/// One elementary stream entry in a [`ProgramMapSection`]'s stream loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl StreamDescription {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let offset = reader.location();
        let header = ElementaryStreamInfoHeaderBits::from_bytes(reader.read_array_ref::<5>()?);
        let es_info_length = header.es_info_length();
        if es_info_length & 0x0c00 != 0 {
            return Err(CodecError::BadPsiHeader { offset });
        }
        let descriptors = parse_descriptors(reader, es_info_length as usize)?;
        log::trace!(
            "stream_description stream_type={} elementary_pid={}",
            header.stream_type(),
            header.elementary_pid(),
        );
        Ok(Self {
            stream_type: header.stream_type(),
            elementary_pid: header.elementary_pid(),
            descriptors,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let es_info_length = descriptors_len(&self.descriptors);
        if es_info_length > 0x0fff {
            return Err(CodecError::FieldOverflow {
                field: "stream_description.es_info_length",
                value: es_info_length as u64,
                bits: 12,
            });
        }
        let header = ElementaryStreamInfoHeaderBits::new()
            .with_stream_type(self.stream_type)
            .with_reserved1(0x7)
            .with_elementary_pid(self.elementary_pid)
            .with_reserved2(0xf)
            .with_es_info_length(es_info_length as u16);
        out.extend_from_slice(&header.into_bytes());
        write_descriptors(out, &self.descriptors)
    }

    fn serialized_len(&self) -> usize {
        5 + descriptors_len(&self.descriptors)
    }
}

/// `table_id == 0x00`: Program Association Table section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAssociationSection {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub programs: Vec<PatEntry>,
    /// Preserved verbatim; never recomputed by the parser (see `SPEC_FULL.md` §9).
    pub crc_32: u32,
}

impl ProgramAssociationSection {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let offset = reader.location();
        let _table_id = reader.read_u8()?; // 0x00, already dispatched on by the caller
        let section_header = PsiSectionHeader::from_bytes(reader.read_array_ref::<2>()?);
        let section_length = section_header.section_length() as usize;
        let mut sub = reader.new_sub_reader(section_length)?;
        if sub.remaining_len() < 9 {
            return Err(CodecError::BadPsiHeader { offset });
        }
        let transport_stream_id = sub.read_be_u16()?;
        let syntax = PsiTableSyntax::from_bytes([sub.read_u8()?]);
        let section_number = sub.read_u8()?;
        let last_section_number = sub.read_u8()?;

        let mut programs = Vec::new();
        while sub.remaining_len() > 4 {
            let entry = PatEntryBits::from_bytes(sub.read_array_ref::<4>()?);
            programs.push(PatEntry {
                program_number: entry.program_number(),
                pid: entry.pid(),
            });
        }
        let crc_32 = sub.read_be_u32()?;

        log::trace!(
            "pat section transport_stream_id={transport_stream_id} programs={} section_length={section_length}",
            programs.len(),
        );
        Ok(Self {
            transport_stream_id,
            version_number: syntax.version_number(),
            current_next_indicator: syntax.current_next_indicator(),
            section_number,
            last_section_number,
            programs,
            crc_32,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let section_length = 5 + self.programs.len() * 4 + 4;
        if section_length > 0x0fff {
            return Err(CodecError::FieldOverflow {
                field: "pat.section_length",
                value: section_length as u64,
                bits: 12,
            });
        }
        out.push(0x00);
        let header = PsiSectionHeader::new()
            .with_section_syntax_indicator(true)
            .with_zero_bit(false)
            .with_reserved(0x3)
            .with_section_length(section_length as u16);
        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(&self.transport_stream_id.to_be_bytes());
        let syntax = PsiTableSyntax::new()
            .with_reserved(0x3)
            .with_version_number(self.version_number)
            .with_current_next_indicator(self.current_next_indicator);
        out.extend_from_slice(&syntax.into_bytes());
        out.push(self.section_number);
        out.push(self.last_section_number);
        for p in &self.programs {
            let entry = PatEntryBits::new()
                .with_program_number(p.program_number)
                .with_reserved(0x7)
                .with_pid(p.pid);
            out.extend_from_slice(&entry.into_bytes());
        }
        out.extend_from_slice(&self.crc_32.to_be_bytes());
        Ok(())
    }

    fn serialized_len(&self) -> usize {
        3 + 5 + self.programs.len() * 4 + 4
    }

    /// Recomputes the CRC-32/MPEG-2 over the section body (table_id through the byte before
    /// `crc_32`) and compares it to the stored value. The parser never calls this itself.
    pub fn verify_crc(&self) -> Result<()> {
        let mut body = Vec::new();
        self.write(&mut body)?;
        let computed = PSI_CRC.checksum(&body[..body.len() - 4]);
        if computed != self.crc_32 {
            return Err(CodecError::PsiCrcMismatch {
                expected: self.crc_32,
                actual: computed,
            });
        }
        Ok(())
    }
}

/// `table_id == 0x02`: Program Map Table section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMapSection {
    pub program_number: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub streams: Vec<StreamDescription>,
    /// Preserved verbatim; never recomputed by the parser (see `SPEC_FULL.md` §9).
    pub crc_32: u32,
}

impl ProgramMapSection {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let offset = reader.location();
        let _table_id = reader.read_u8()?; // 0x02
        let section_header = PsiSectionHeader::from_bytes(reader.read_array_ref::<2>()?);
        let section_length = section_header.section_length() as usize;
        let mut sub = reader.new_sub_reader(section_length)?;
        if sub.remaining_len() < 9 {
            return Err(CodecError::BadPsiHeader { offset });
        }
        let program_number = sub.read_be_u16()?;
        let syntax = PsiTableSyntax::from_bytes([sub.read_u8()?]);
        let section_number = sub.read_u8()?;
        let last_section_number = sub.read_u8()?;
        let pmt_header = PmtHeaderBits::from_bytes(sub.read_array_ref::<4>()?);
        let program_info_length = pmt_header.program_info_length() as usize;
        let program_descriptors = parse_descriptors(&mut sub, program_info_length)?;

        let mut streams = Vec::new();
        while sub.remaining_len() > 4 {
            streams.push(StreamDescription::parse(&mut sub)?);
        }
        let crc_32 = sub.read_be_u32()?;

        log::trace!(
            "pmt section program_number={program_number} pcr_pid={} streams={} section_length={section_length}",
            pmt_header.pcr_pid(),
            streams.len(),
        );
        Ok(Self {
            program_number,
            version_number: syntax.version_number(),
            current_next_indicator: syntax.current_next_indicator(),
            section_number,
            last_section_number,
            pcr_pid: pmt_header.pcr_pid(),
            program_descriptors,
            streams,
            crc_32,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let program_info_length = descriptors_len(&self.program_descriptors);
        if program_info_length > 0x0fff {
            return Err(CodecError::FieldOverflow {
                field: "pmt.program_info_length",
                value: program_info_length as u64,
                bits: 12,
            });
        }
        let streams_len: usize = self.streams.iter().map(StreamDescription::serialized_len).sum();
        let section_length = 5 + 4 + program_info_length + streams_len + 4;
        if section_length > 0x0fff {
            return Err(CodecError::FieldOverflow {
                field: "pmt.section_length",
                value: section_length as u64,
                bits: 12,
            });
        }
        out.push(0x02);
        let header = PsiSectionHeader::new()
            .with_section_syntax_indicator(true)
            .with_zero_bit(false)
            .with_reserved(0x3)
            .with_section_length(section_length as u16);
        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(&self.program_number.to_be_bytes());
        let syntax = PsiTableSyntax::new()
            .with_reserved(0x3)
            .with_version_number(self.version_number)
            .with_current_next_indicator(self.current_next_indicator);
        out.extend_from_slice(&syntax.into_bytes());
        out.push(self.section_number);
        out.push(self.last_section_number);
        let pmt_header = PmtHeaderBits::new()
            .with_reserved1(0x7)
            .with_pcr_pid(self.pcr_pid)
            .with_reserved2(0xf)
            .with_program_info_length(program_info_length as u16);
        out.extend_from_slice(&pmt_header.into_bytes());
        write_descriptors(out, &self.program_descriptors)?;
        for s in &self.streams {
            s.write(out)?;
        }
        out.extend_from_slice(&self.crc_32.to_be_bytes());
        Ok(())
    }

    fn serialized_len(&self) -> usize {
        let program_info_length = descriptors_len(&self.program_descriptors);
        let streams_len: usize = self.streams.iter().map(StreamDescription::serialized_len).sum();
        3 + 5 + 4 + program_info_length + streams_len + 4
    }

    /// Recomputes the CRC-32/MPEG-2 over the section body and compares it to the stored value.
    pub fn verify_crc(&self) -> Result<()> {
        let mut body = Vec::new();
        self.write(&mut body)?;
        let computed = PSI_CRC.checksum(&body[..body.len() - 4]);
        if computed != self.crc_32 {
            return Err(CodecError::PsiCrcMismatch {
                expected: self.crc_32,
                actual: computed,
            });
        }
        Ok(())
    }
}

/// Any `table_id` other than `0x00`/`0x02`/`0xff`, carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherPsiSection {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub zero_bit: bool,
    /// Raw bytes of the section body, `section_length` bytes long, verbatim (may or may not
    /// include a trailing CRC depending on `table_id` semantics this codec doesn't know about).
    pub data: Vec<u8>,
}

impl OtherPsiSection {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let table_id = reader.read_u8()?;
        let section_header = PsiSectionHeader::from_bytes(reader.read_array_ref::<2>()?);
        let data = reader.read(section_header.section_length() as usize)?.to_vec();
        log::trace!("other psi section table_id={table_id:#04x} length={}", data.len());
        Ok(Self {
            table_id,
            section_syntax_indicator: section_header.section_syntax_indicator(),
            zero_bit: section_header.zero_bit(),
            data,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.data.len() > 0x0fff {
            return Err(CodecError::FieldOverflow {
                field: "other_psi_section.section_length",
                value: self.data.len() as u64,
                bits: 12,
            });
        }
        out.push(self.table_id);
        let header = PsiSectionHeader::new()
            .with_section_syntax_indicator(self.section_syntax_indicator)
            .with_zero_bit(self.zero_bit)
            .with_reserved(0x3)
            .with_section_length(self.data.len() as u16);
        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }

    fn serialized_len(&self) -> usize {
        3 + self.data.len()
    }
}

/// One section found by [`PsiPacket::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsiSection {
    Pat(ProgramAssociationSection),
    Pmt(ProgramMapSection),
    Other(OtherPsiSection),
}

impl PsiSection {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            PsiSection::Pat(s) => s.write(out),
            PsiSection::Pmt(s) => s.write(out),
            PsiSection::Other(s) => s.write(out),
        }
    }

    fn serialized_len(&self) -> usize {
        match self {
            PsiSection::Pat(s) => s.serialized_len(),
            PsiSection::Pmt(s) => s.serialized_len(),
            PsiSection::Other(s) => s.serialized_len(),
        }
    }
}

/// The PSI payload of a single TS packet: a pointer field followed by an ordered list of
/// sections, terminated either by a `0xff` table_id or the end of the packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PsiPacket {
    /// Raw bytes between the pointer_field byte and the first section (normally empty).
    pub pointer_stuffing: Vec<u8>,
    pub sections: Vec<PsiSection>,
}

impl PsiPacket {
    pub(crate) fn parse(reader: &mut SliceReader) -> Result<Self> {
        let pointer_field = reader.read_u8()? as usize;
        let pointer_stuffing = reader.read(pointer_field)?.to_vec();
        let mut sections = Vec::new();
        while reader.remaining_len() > 0 {
            let table_id = reader.peek(1)?[0];
            match table_id {
                0xff => break,
                0x00 => sections.push(PsiSection::Pat(ProgramAssociationSection::parse(reader)?)),
                0x02 => sections.push(PsiSection::Pmt(ProgramMapSection::parse(reader)?)),
                _ => sections.push(PsiSection::Other(OtherPsiSection::parse(reader)?)),
            }
        }
        Ok(Self {
            pointer_stuffing,
            sections,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.pointer_stuffing.len() > 255 {
            return Err(CodecError::FieldOverflow {
                field: "psi_packet.pointer_field",
                value: self.pointer_stuffing.len() as u64,
                bits: 8,
            });
        }
        out.push(self.pointer_stuffing.len() as u8);
        out.extend_from_slice(&self.pointer_stuffing);
        for s in &self.sections {
            s.write(out)?;
        }
        Ok(())
    }

    pub(crate) fn serialized_len(&self) -> usize {
        1 + self.pointer_stuffing.len()
            + self.sections.iter().map(PsiSection::serialized_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_pat() -> ProgramAssociationSection {
        ProgramAssociationSection {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
            programs: vec![
                PatEntry {
                    program_number: 0,
                    pid: 16,
                },
                PatEntry {
                    program_number: 1,
                    pid: 0x100,
                },
            ],
            crc_32: 0xdeadbeef,
        }
    }

    #[test]
    fn pat_roundtrips() {
        let pat = sample_pat();
        let mut out = Vec::new();
        pat.write(&mut out).unwrap();
        let mut reader = SliceReader::new(&out);
        let parsed = ProgramAssociationSection::parse(&mut reader).unwrap();
        assert_eq!(parsed, pat);
    }

    #[test]
    fn pat_crc_is_preserved_not_recomputed() {
        // crc_32 is a garbage value; write/parse must preserve it verbatim regardless.
        let pat = sample_pat();
        assert!(pat.verify_crc().is_err());
    }

    #[test]
    fn pmt_roundtrips_with_descriptors_and_streams() {
        let pmt = ProgramMapSection {
            program_number: 1,
            version_number: 3,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
            pcr_pid: 0x101,
            program_descriptors: vec![Descriptor {
                tag: 0x05,
                data: vec![0x48, 0x44, 0x4d, 0x56],
            }],
            streams: vec![StreamDescription {
                stream_type: 0x1b,
                elementary_pid: 0x101,
                descriptors: vec![],
            }],
            crc_32: 0x12345678,
        };
        let mut out = Vec::new();
        pmt.write(&mut out).unwrap();
        let mut reader = SliceReader::new(&out);
        let parsed = ProgramMapSection::parse(&mut reader).unwrap();
        assert_eq!(parsed, pmt);
    }

    #[test]
    fn es_info_length_top_bits_must_be_zero() {
        let mut bytes = vec![0x1bu8, 0x61, 0x01, 0xff, 0xff]; // top 2 bits of es_info_length set
        bytes.truncate(5);
        let mut reader = SliceReader::new(&bytes);
        assert!(StreamDescription::parse(&mut reader).is_err());
    }

    #[test]
    fn other_section_is_opaque() {
        let section = OtherPsiSection {
            table_id: 0x40,
            section_syntax_indicator: true,
            zero_bit: false,
            data: vec![0x01, 0x02, 0x03],
        };
        let mut out = Vec::new();
        section.write(&mut out).unwrap();
        let mut reader = SliceReader::new(&out);
        let parsed = OtherPsiSection::parse(&mut reader).unwrap();
        assert_eq!(parsed, section);
    }

    #[test]
    fn psi_packet_stops_at_terminator() {
        let pat = sample_pat();
        let mut inner = Vec::new();
        pat.write(&mut inner).unwrap();
        let packet = PsiPacket {
            pointer_stuffing: vec![],
            sections: vec![PsiSection::Pat(pat)],
        };
        let mut out = Vec::new();
        out.push(0); // pointer_field
        out.extend_from_slice(&inner);
        out.push(0xff); // terminator, not part of the PsiPacket
        out.push(0xff);
        let mut reader = SliceReader::new(&out);
        let parsed = PsiPacket::parse(&mut reader).unwrap();
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(reader.remaining_len(), 2); // terminator + trailing byte left for data_bytes
    }
}
