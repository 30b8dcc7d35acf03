//! Line-oriented `key=value` text rendering of an [`Envelope`], used for round-trip testing
//! and the CLI's `totxt`/`tobin` subcommands (`SPEC_FULL.md` §4.14). Not a wire format: this
//! module only ever walks the crate's own typed structs in one direction per call, rather than
//! exposing a generic reflective accessor.

use std::collections::HashMap;

use crate::adaptation::{AdaptationField, AdaptationFieldExtension, ClockReference, LegalTimeWindow, SeamlessSplice};
use crate::envelope::{Body, Envelope};
use crate::error::{CodecError, Result};
use crate::header::{PacketHeader, TransportScramblingControl};
use crate::packet::Mpeg2TsPacket;
use crate::pes::{
    decode_dsm_trick_mode, encode_dsm_trick_mode, DsmTrickMode, PacketSequenceCounter,
    PStdBuffer, PesExtension, PesOptionalHeader, PesPacket,
};
use crate::psi::{
    Descriptor, OtherPsiSection, PatEntry, ProgramAssociationSection, ProgramMapSection,
    PsiPacket, PsiSection, StreamDescription,
};

struct Fields(Vec<(String, String)>);

impl Fields {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, key: impl Into<String>, value: impl std::fmt::Display) {
        self.0.push((key.into(), value.to_string()));
    }

    fn push_hex(&mut self, key: impl Into<String>, bytes: &[u8]) {
        self.0.push((key.into(), hex_encode(bytes)));
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str, key: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(CodecError::MalformedText {
            reason: format!("odd-length hex value for {key}: {s}"),
        });
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| CodecError::MalformedText {
                reason: format!("invalid hex value for {key}: {s}"),
            })
        })
        .collect()
}

fn tsc_to_u8(v: TransportScramblingControl) -> u8 {
    match v {
        TransportScramblingControl::NotScrambled => 0,
        TransportScramblingControl::Reserved => 1,
        TransportScramblingControl::ScrambledEvenKey => 2,
        TransportScramblingControl::ScrambledOddKey => 3,
    }
}

fn tsc_from_u8(v: u8, key: &str) -> Result<TransportScramblingControl> {
    Ok(match v {
        0 => TransportScramblingControl::NotScrambled,
        1 => TransportScramblingControl::Reserved,
        2 => TransportScramblingControl::ScrambledEvenKey,
        3 => TransportScramblingControl::ScrambledOddKey,
        other => {
            return Err(CodecError::MalformedText {
                reason: format!("invalid {key}: {other}"),
            })
        }
    })
}

/// Renders a single [`Envelope`] to one line of `key=value` tokens (no trailing newline).
pub fn render(envelope: &Envelope) -> String {
    let mut fields = Fields::new();
    match &envelope.body {
        Body::Raw(bytes) => fields.push_hex("raw", bytes),
        Body::Parsed(packet) => render_packet(&mut fields, packet),
    }
    fields
        .0
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_packet(f: &mut Fields, packet: &Mpeg2TsPacket) {
    render_header(f, &packet.header);
    if let Some(af) = &packet.adaptation_field {
        render_adaptation_field(f, af);
    }
    match &packet.payload {
        Some(crate::packet::PacketPayload::Pes(pes)) => render_pes(f, pes),
        Some(crate::packet::PacketPayload::Psi(psi)) => render_psi(f, psi),
        None => {}
    }
    if !packet.data_bytes.is_empty() {
        f.push_hex("data_bytes", &packet.data_bytes);
    }
}

fn render_header(f: &mut Fields, h: &PacketHeader) {
    f.push("header.sync_byte", h.sync_byte());
    f.push("header.transport_error_indicator", h.transport_error_indicator());
    f.push(
        "header.payload_unit_start_indicator",
        h.payload_unit_start_indicator(),
    );
    f.push("header.transport_priority", h.transport_priority());
    f.push("header.pid", h.pid());
    f.push(
        "header.transport_scrambling_control",
        tsc_to_u8(h.transport_scrambling_control()),
    );
    f.push("header.adaptation_field_exists", h.adaptation_field_exists());
    f.push("header.payload_exists", h.payload_exists());
    f.push("header.continuity_counter", h.continuity_counter());
}

fn render_clock_reference(f: &mut Fields, prefix: &str, cr: ClockReference) {
    f.push(format!("{prefix}.base"), cr.base);
    f.push(format!("{prefix}.extension"), cr.extension);
}

fn render_adaptation_field(f: &mut Fields, af: &AdaptationField) {
    f.push("adaptation_field.empty", af.empty);
    if af.empty {
        return;
    }
    f.push(
        "adaptation_field.discontinuity_indicator",
        af.discontinuity_indicator,
    );
    f.push(
        "adaptation_field.random_access_indicator",
        af.random_access_indicator,
    );
    f.push(
        "adaptation_field.elementary_stream_priority_indicator",
        af.elementary_stream_priority_indicator,
    );
    if let Some(pcr) = af.pcr {
        render_clock_reference(f, "adaptation_field.pcr", pcr);
    }
    if let Some(opcr) = af.opcr {
        render_clock_reference(f, "adaptation_field.opcr", opcr);
    }
    if let Some(sc) = af.splice_countdown {
        f.push("adaptation_field.splice_countdown", sc);
    }
    if let Some(tpd) = &af.transport_private_data {
        f.push_hex("adaptation_field.transport_private_data", tpd);
    }
    if let Some(ext) = &af.extension {
        render_adaptation_field_extension(f, ext);
    }
    if !af.stuffing.is_empty() {
        f.push_hex("adaptation_field.stuffing", &af.stuffing);
    }
}

fn render_adaptation_field_extension(f: &mut Fields, ext: &AdaptationFieldExtension) {
    f.push("adaptation_field.extension.present", true);
    if let Some(ltw) = ext.ltw {
        f.push("adaptation_field.extension.ltw.valid_flag", ltw.ltw_valid_flag);
        f.push("adaptation_field.extension.ltw.offset", ltw.ltw_offset);
    }
    if let Some(rate) = ext.piecewise_rate {
        f.push("adaptation_field.extension.piecewise_rate", rate);
    }
    if let Some(splice) = &ext.splice {
        f.push("adaptation_field.extension.splice.type", splice.splice_type);
        f.push("adaptation_field.extension.splice.dts_next_au", splice.dts_next_au);
    }
    if !ext.stuffing.is_empty() {
        f.push_hex("adaptation_field.extension.stuffing", &ext.stuffing);
    }
}

fn render_pes(f: &mut Fields, pes: &PesPacket) {
    f.push("pes.stream_id", pes.stream_id);
    f.push("pes.pes_packet_length", pes.pes_packet_length);
    if let Some(oh) = &pes.optional_header {
        render_pes_optional_header(f, oh);
    }
}

fn render_pes_optional_header(f: &mut Fields, oh: &PesOptionalHeader) {
    f.push("pes.optional_header.pes_scrambling_control", oh.pes_scrambling_control);
    f.push("pes.optional_header.pes_priority", oh.pes_priority);
    f.push(
        "pes.optional_header.data_alignment_indicator",
        oh.data_alignment_indicator,
    );
    f.push("pes.optional_header.copyright", oh.copyright);
    f.push("pes.optional_header.original_or_copy", oh.original_or_copy);
    if let Some(pts) = oh.pts {
        f.push("pes.optional_header.pts", pts);
    }
    if let Some(dts) = oh.dts {
        f.push("pes.optional_header.dts", dts);
    }
    if let Some(escr) = oh.escr {
        render_clock_reference(f, "pes.optional_header.escr", escr);
    }
    if let Some(rate) = oh.es_rate {
        f.push("pes.optional_header.es_rate", rate);
    }
    if let Some(mode) = oh.dsm_trick_mode {
        f.push("pes.optional_header.dsm_trick_mode", encode_dsm_trick_mode(mode));
    }
    if let Some(info) = oh.additional_copy_info {
        f.push("pes.optional_header.additional_copy_info", info);
    }
    if let Some(crc) = oh.previous_pes_packet_crc {
        f.push("pes.optional_header.previous_pes_packet_crc", crc);
    }
    if let Some(ext) = &oh.pes_extension {
        render_pes_extension(f, ext);
    }
    if !oh.stuffing.is_empty() {
        f.push_hex("pes.optional_header.stuffing", &oh.stuffing);
    }
}

fn render_pes_extension(f: &mut Fields, ext: &PesExtension) {
    f.push("pes.optional_header.pes_extension.present", true);
    if let Some(pd) = ext.private_data {
        f.push_hex("pes.optional_header.pes_extension.private_data", &pd);
    }
    if let Some(ph) = &ext.pack_header {
        f.push_hex("pes.optional_header.pes_extension.pack_header", ph);
    }
    if let Some(psc) = ext.packet_sequence_counter {
        f.push(
            "pes.optional_header.pes_extension.packet_sequence_counter.counter",
            psc.counter,
        );
        f.push(
            "pes.optional_header.pes_extension.packet_sequence_counter.mpeg1_mpeg2_identifier",
            psc.mpeg1_mpeg2_identifier,
        );
        f.push(
            "pes.optional_header.pes_extension.packet_sequence_counter.original_stuff_length",
            psc.original_stuff_length,
        );
    }
    if let Some(psb) = ext.p_std_buffer {
        f.push("pes.optional_header.pes_extension.p_std_buffer.scale", psb.scale);
        f.push("pes.optional_header.pes_extension.p_std_buffer.size", psb.size);
    }
    if let Some(field) = &ext.extension_field {
        f.push_hex("pes.optional_header.pes_extension.extension_field", field);
    }
}

fn render_descriptor_list(f: &mut Fields, prefix: &str, descriptors: &[Descriptor]) {
    f.push(format!("{prefix}.count"), descriptors.len());
    for (i, d) in descriptors.iter().enumerate() {
        f.push(format!("{prefix}.{i}.tag"), d.tag);
        f.push_hex(&format!("{prefix}.{i}.data"), &d.data);
    }
}

fn render_psi(f: &mut Fields, psi: &PsiPacket) {
    if !psi.pointer_stuffing.is_empty() {
        f.push_hex("psi.pointer_stuffing", &psi.pointer_stuffing);
    }
    f.push("psi.sections.count", psi.sections.len());
    for (i, section) in psi.sections.iter().enumerate() {
        let prefix = format!("psi.sections.{i}");
        match section {
            PsiSection::Pat(pat) => {
                f.push(format!("{prefix}.kind"), "pat");
                render_pat(f, &prefix, pat);
            }
            PsiSection::Pmt(pmt) => {
                f.push(format!("{prefix}.kind"), "pmt");
                render_pmt(f, &prefix, pmt);
            }
            PsiSection::Other(other) => {
                f.push(format!("{prefix}.kind"), "other");
                render_other(f, &prefix, other);
            }
        }
    }
}

fn render_pat(f: &mut Fields, prefix: &str, pat: &ProgramAssociationSection) {
    f.push(format!("{prefix}.transport_stream_id"), pat.transport_stream_id);
    f.push(format!("{prefix}.version_number"), pat.version_number);
    f.push(format!("{prefix}.current_next_indicator"), pat.current_next_indicator);
    f.push(format!("{prefix}.section_number"), pat.section_number);
    f.push(format!("{prefix}.last_section_number"), pat.last_section_number);
    f.push(format!("{prefix}.crc_32"), pat.crc_32);
    f.push(format!("{prefix}.programs.count"), pat.programs.len());
    for (i, p) in pat.programs.iter().enumerate() {
        f.push(format!("{prefix}.programs.{i}.program_number"), p.program_number);
        f.push(format!("{prefix}.programs.{i}.pid"), p.pid);
    }
}

fn render_pmt(f: &mut Fields, prefix: &str, pmt: &ProgramMapSection) {
    f.push(format!("{prefix}.program_number"), pmt.program_number);
    f.push(format!("{prefix}.version_number"), pmt.version_number);
    f.push(format!("{prefix}.current_next_indicator"), pmt.current_next_indicator);
    f.push(format!("{prefix}.section_number"), pmt.section_number);
    f.push(format!("{prefix}.last_section_number"), pmt.last_section_number);
    f.push(format!("{prefix}.pcr_pid"), pmt.pcr_pid);
    f.push(format!("{prefix}.crc_32"), pmt.crc_32);
    render_descriptor_list(f, &format!("{prefix}.program_descriptors"), &pmt.program_descriptors);
    f.push(format!("{prefix}.streams.count"), pmt.streams.len());
    for (i, s) in pmt.streams.iter().enumerate() {
        let sprefix = format!("{prefix}.streams.{i}");
        f.push(format!("{sprefix}.stream_type"), s.stream_type);
        f.push(format!("{sprefix}.elementary_pid"), s.elementary_pid);
        render_descriptor_list(f, &format!("{sprefix}.descriptors"), &s.descriptors);
    }
}

fn render_other(f: &mut Fields, prefix: &str, other: &OtherPsiSection) {
    f.push(format!("{prefix}.table_id"), other.table_id);
    f.push(
        format!("{prefix}.section_syntax_indicator"),
        other.section_syntax_indicator,
    );
    f.push(format!("{prefix}.zero_bit"), other.zero_bit);
    f.push_hex(&format!("{prefix}.data"), &other.data);
}

struct Tokens(HashMap<String, String>);

impl Tokens {
    fn parse(line: &str) -> Result<Self> {
        let mut map = HashMap::new();
        for token in line.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or_else(|| CodecError::MalformedText {
                reason: format!("token missing '=': {token}"),
            })?;
            map.insert(key.to_string(), value.to_string());
        }
        Ok(Self(map))
    }

    fn take(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    fn require(&mut self, key: &str) -> Result<String> {
        self.take(key).ok_or_else(|| CodecError::MalformedText {
            reason: format!("missing required key: {key}"),
        })
    }

    fn require_val<T: std::str::FromStr>(&mut self, key: &str) -> Result<T> {
        let s = self.require(key)?;
        s.parse().map_err(|_| CodecError::MalformedText {
            reason: format!("invalid value for {key}: {s}"),
        })
    }

    fn take_val<T: std::str::FromStr>(&mut self, key: &str) -> Result<Option<T>> {
        match self.take(key) {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| CodecError::MalformedText {
                    reason: format!("invalid value for {key}: {s}"),
                }),
        }
    }

    fn finish(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            let mut keys: Vec<_> = self.0.into_keys().collect();
            keys.sort();
            Err(CodecError::MalformedText {
                reason: format!("unknown key(s): {}", keys.join(", ")),
            })
        }
    }
}

/// Parses one line of `key=value` tokens back into an [`Envelope`]. `packet_index` and
/// `byte_offset` are not encoded in the line (they are stream position, not packet content)
/// and must be supplied by the caller.
pub fn parse(line: &str, packet_index: u64, byte_offset: u64) -> Result<Envelope> {
    let mut tokens = Tokens::parse(line)?;

    if let Some(raw) = tokens.take("raw") {
        let bytes = hex_decode(&raw, "raw")?;
        tokens.finish()?;
        return Ok(Envelope {
            packet_index,
            byte_offset,
            body: Body::Raw(bytes),
        });
    }

    let packet = parse_packet(&mut tokens)?;
    tokens.finish()?;
    Ok(Envelope {
        packet_index,
        byte_offset,
        body: Body::Parsed(packet),
    })
}

fn parse_packet(t: &mut Tokens) -> Result<Mpeg2TsPacket> {
    let header = parse_header(t)?;
    let adaptation_field = if t.0.contains_key("adaptation_field.empty") {
        Some(parse_adaptation_field(t)?)
    } else {
        None
    };

    let payload = if t.0.contains_key("pes.stream_id") {
        Some(crate::packet::PacketPayload::Pes(parse_pes(t)?))
    } else if t.0.contains_key("psi.sections.count") {
        Some(crate::packet::PacketPayload::Psi(parse_psi(t)?))
    } else {
        None
    };

    let data_bytes = match t.take("data_bytes") {
        Some(s) => hex_decode(&s, "data_bytes")?,
        None => Vec::new(),
    };

    Ok(Mpeg2TsPacket {
        header,
        adaptation_field,
        payload,
        data_bytes,
    })
}

fn parse_header(t: &mut Tokens) -> Result<PacketHeader> {
    let sync_byte: u8 = t.require_val("header.sync_byte")?;
    let transport_error_indicator: bool = t.require_val("header.transport_error_indicator")?;
    let payload_unit_start_indicator: bool = t.require_val("header.payload_unit_start_indicator")?;
    let transport_priority: bool = t.require_val("header.transport_priority")?;
    let pid: u16 = t.require_val("header.pid")?;
    let tsc_raw: u8 = t.require_val("header.transport_scrambling_control")?;
    let transport_scrambling_control = tsc_from_u8(tsc_raw, "header.transport_scrambling_control")?;
    let adaptation_field_exists: bool = t.require_val("header.adaptation_field_exists")?;
    let payload_exists: bool = t.require_val("header.payload_exists")?;
    let continuity_counter: u8 = t.require_val("header.continuity_counter")?;

    Ok(PacketHeader::new()
        .with_sync_byte(sync_byte)
        .with_transport_error_indicator(transport_error_indicator)
        .with_payload_unit_start_indicator(payload_unit_start_indicator)
        .with_transport_priority(transport_priority)
        .with_pid(pid)
        .with_transport_scrambling_control(transport_scrambling_control)
        .with_adaptation_field_exists(adaptation_field_exists)
        .with_payload_exists(payload_exists)
        .with_continuity_counter(continuity_counter))
}

fn parse_clock_reference(t: &mut Tokens, prefix: &str) -> Result<ClockReference> {
    Ok(ClockReference {
        base: t.require_val(&format!("{prefix}.base"))?,
        extension: t.require_val(&format!("{prefix}.extension"))?,
    })
}

fn parse_adaptation_field(t: &mut Tokens) -> Result<AdaptationField> {
    let empty: bool = t.require_val("adaptation_field.empty")?;
    if empty {
        return Ok(AdaptationField {
            empty: true,
            ..Default::default()
        });
    }
    let discontinuity_indicator = t.require_val("adaptation_field.discontinuity_indicator")?;
    let random_access_indicator = t.require_val("adaptation_field.random_access_indicator")?;
    let elementary_stream_priority_indicator =
        t.require_val("adaptation_field.elementary_stream_priority_indicator")?;

    let pcr = if t.0.contains_key("adaptation_field.pcr.base") {
        Some(parse_clock_reference(t, "adaptation_field.pcr")?)
    } else {
        None
    };
    let opcr = if t.0.contains_key("adaptation_field.opcr.base") {
        Some(parse_clock_reference(t, "adaptation_field.opcr")?)
    } else {
        None
    };
    let splice_countdown = t.take_val("adaptation_field.splice_countdown")?;
    let transport_private_data = match t.take("adaptation_field.transport_private_data") {
        Some(s) => Some(hex_decode(&s, "adaptation_field.transport_private_data")?),
        None => None,
    };
    let extension = if t.0.contains_key("adaptation_field.extension.present") {
        Some(parse_adaptation_field_extension(t)?)
    } else {
        None
    };
    let stuffing = match t.take("adaptation_field.stuffing") {
        Some(s) => hex_decode(&s, "adaptation_field.stuffing")?,
        None => Vec::new(),
    };

    Ok(AdaptationField {
        empty: false,
        discontinuity_indicator,
        random_access_indicator,
        elementary_stream_priority_indicator,
        pcr,
        opcr,
        splice_countdown,
        transport_private_data,
        extension,
        stuffing,
    })
}

fn parse_adaptation_field_extension(t: &mut Tokens) -> Result<AdaptationFieldExtension> {
    t.require_val::<bool>("adaptation_field.extension.present")?;
    let ltw = if t.0.contains_key("adaptation_field.extension.ltw.valid_flag") {
        Some(LegalTimeWindow {
            ltw_valid_flag: t.require_val("adaptation_field.extension.ltw.valid_flag")?,
            ltw_offset: t.require_val("adaptation_field.extension.ltw.offset")?,
        })
    } else {
        None
    };
    let piecewise_rate = t.take_val("adaptation_field.extension.piecewise_rate")?;
    let splice = if t.0.contains_key("adaptation_field.extension.splice.type") {
        Some(SeamlessSplice {
            splice_type: t.require_val("adaptation_field.extension.splice.type")?,
            dts_next_au: t.require_val("adaptation_field.extension.splice.dts_next_au")?,
        })
    } else {
        None
    };
    let stuffing = match t.take("adaptation_field.extension.stuffing") {
        Some(s) => hex_decode(&s, "adaptation_field.extension.stuffing")?,
        None => Vec::new(),
    };
    Ok(AdaptationFieldExtension {
        ltw,
        piecewise_rate,
        splice,
        stuffing,
    })
}

fn parse_pes(t: &mut Tokens) -> Result<PesPacket> {
    let stream_id: u8 = t.require_val("pes.stream_id")?;
    let pes_packet_length: u16 = t.require_val("pes.pes_packet_length")?;
    let optional_header = if t.0.contains_key("pes.optional_header.pes_scrambling_control") {
        Some(parse_pes_optional_header(t)?)
    } else {
        None
    };
    Ok(PesPacket {
        stream_id,
        pes_packet_length,
        optional_header,
    })
}

fn parse_pes_optional_header(t: &mut Tokens) -> Result<PesOptionalHeader> {
    let pes_scrambling_control = t.require_val("pes.optional_header.pes_scrambling_control")?;
    let pes_priority = t.require_val("pes.optional_header.pes_priority")?;
    let data_alignment_indicator = t.require_val("pes.optional_header.data_alignment_indicator")?;
    let copyright = t.require_val("pes.optional_header.copyright")?;
    let original_or_copy = t.require_val("pes.optional_header.original_or_copy")?;
    let pts = t.take_val("pes.optional_header.pts")?;
    let dts = t.take_val("pes.optional_header.dts")?;
    let escr = if t.0.contains_key("pes.optional_header.escr.base") {
        Some(parse_clock_reference(t, "pes.optional_header.escr")?)
    } else {
        None
    };
    let es_rate = t.take_val("pes.optional_header.es_rate")?;
    let dsm_trick_mode = match t.take_val::<u8>("pes.optional_header.dsm_trick_mode")? {
        Some(b) => Some(decode_dsm_trick_mode(b)),
        None => None,
    };
    let additional_copy_info = t.take_val("pes.optional_header.additional_copy_info")?;
    let previous_pes_packet_crc = t.take_val("pes.optional_header.previous_pes_packet_crc")?;
    let pes_extension = if t
        .0
        .contains_key("pes.optional_header.pes_extension.present")
    {
        Some(parse_pes_extension(t)?)
    } else {
        None
    };
    let stuffing = match t.take("pes.optional_header.stuffing") {
        Some(s) => hex_decode(&s, "pes.optional_header.stuffing")?,
        None => Vec::new(),
    };
    Ok(PesOptionalHeader {
        pes_scrambling_control,
        pes_priority,
        data_alignment_indicator,
        copyright,
        original_or_copy,
        pts,
        dts,
        escr,
        es_rate,
        dsm_trick_mode,
        additional_copy_info,
        previous_pes_packet_crc,
        pes_extension,
        stuffing,
    })
}

fn parse_pes_extension(t: &mut Tokens) -> Result<PesExtension> {
    t.require_val::<bool>("pes.optional_header.pes_extension.present")?;
    let private_data = match t.take("pes.optional_header.pes_extension.private_data") {
        Some(s) => {
            let bytes = hex_decode(&s, "pes.optional_header.pes_extension.private_data")?;
            let arr: [u8; 16] = bytes.try_into().map_err(|_| CodecError::MalformedText {
                reason: "pes_extension.private_data must be 16 bytes".to_string(),
            })?;
            Some(arr)
        }
        None => None,
    };
    let pack_header = match t.take("pes.optional_header.pes_extension.pack_header") {
        Some(s) => Some(hex_decode(&s, "pes.optional_header.pes_extension.pack_header")?),
        None => None,
    };
    let packet_sequence_counter = if t
        .0
        .contains_key("pes.optional_header.pes_extension.packet_sequence_counter.counter")
    {
        Some(PacketSequenceCounter {
            counter: t.require_val(
                "pes.optional_header.pes_extension.packet_sequence_counter.counter",
            )?,
            mpeg1_mpeg2_identifier: t.require_val(
                "pes.optional_header.pes_extension.packet_sequence_counter.mpeg1_mpeg2_identifier",
            )?,
            original_stuff_length: t.require_val(
                "pes.optional_header.pes_extension.packet_sequence_counter.original_stuff_length",
            )?,
        })
    } else {
        None
    };
    let p_std_buffer = if t
        .0
        .contains_key("pes.optional_header.pes_extension.p_std_buffer.scale")
    {
        Some(PStdBuffer {
            scale: t.require_val("pes.optional_header.pes_extension.p_std_buffer.scale")?,
            size: t.require_val("pes.optional_header.pes_extension.p_std_buffer.size")?,
        })
    } else {
        None
    };
    let extension_field = match t.take("pes.optional_header.pes_extension.extension_field") {
        Some(s) => Some(hex_decode(&s, "pes.optional_header.pes_extension.extension_field")?),
        None => None,
    };
    Ok(PesExtension {
        private_data,
        pack_header,
        packet_sequence_counter,
        p_std_buffer,
        extension_field,
    })
}

fn parse_descriptor_list(t: &mut Tokens, prefix: &str) -> Result<Vec<Descriptor>> {
    let count: usize = t.require_val(&format!("{prefix}.count"))?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let tag = t.require_val(&format!("{prefix}.{i}.tag"))?;
        let data = hex_decode(
            &t.require(&format!("{prefix}.{i}.data"))?,
            &format!("{prefix}.{i}.data"),
        )?;
        out.push(Descriptor { tag, data });
    }
    Ok(out)
}

fn parse_psi(t: &mut Tokens) -> Result<PsiPacket> {
    let pointer_stuffing = match t.take("psi.pointer_stuffing") {
        Some(s) => hex_decode(&s, "psi.pointer_stuffing")?,
        None => Vec::new(),
    };
    let count: usize = t.require_val("psi.sections.count")?;
    let mut sections = Vec::with_capacity(count);
    for i in 0..count {
        let prefix = format!("psi.sections.{i}");
        let kind = t.require(&format!("{prefix}.kind"))?;
        let section = match kind.as_str() {
            "pat" => PsiSection::Pat(parse_pat(t, &prefix)?),
            "pmt" => PsiSection::Pmt(parse_pmt(t, &prefix)?),
            "other" => PsiSection::Other(parse_other(t, &prefix)?),
            other => {
                return Err(CodecError::MalformedText {
                    reason: format!("unknown section kind: {other}"),
                })
            }
        };
        sections.push(section);
    }
    Ok(PsiPacket {
        pointer_stuffing,
        sections,
    })
}

fn parse_pat(t: &mut Tokens, prefix: &str) -> Result<ProgramAssociationSection> {
    let transport_stream_id = t.require_val(&format!("{prefix}.transport_stream_id"))?;
    let version_number = t.require_val(&format!("{prefix}.version_number"))?;
    let current_next_indicator = t.require_val(&format!("{prefix}.current_next_indicator"))?;
    let section_number = t.require_val(&format!("{prefix}.section_number"))?;
    let last_section_number = t.require_val(&format!("{prefix}.last_section_number"))?;
    let crc_32 = t.require_val(&format!("{prefix}.crc_32"))?;
    let count: usize = t.require_val(&format!("{prefix}.programs.count"))?;
    let mut programs = Vec::with_capacity(count);
    for i in 0..count {
        programs.push(PatEntry {
            program_number: t.require_val(&format!("{prefix}.programs.{i}.program_number"))?,
            pid: t.require_val(&format!("{prefix}.programs.{i}.pid"))?,
        });
    }
    Ok(ProgramAssociationSection {
        transport_stream_id,
        version_number,
        current_next_indicator,
        section_number,
        last_section_number,
        programs,
        crc_32,
    })
}

fn parse_pmt(t: &mut Tokens, prefix: &str) -> Result<ProgramMapSection> {
    let program_number = t.require_val(&format!("{prefix}.program_number"))?;
    let version_number = t.require_val(&format!("{prefix}.version_number"))?;
    let current_next_indicator = t.require_val(&format!("{prefix}.current_next_indicator"))?;
    let section_number = t.require_val(&format!("{prefix}.section_number"))?;
    let last_section_number = t.require_val(&format!("{prefix}.last_section_number"))?;
    let pcr_pid = t.require_val(&format!("{prefix}.pcr_pid"))?;
    let crc_32 = t.require_val(&format!("{prefix}.crc_32"))?;
    let program_descriptors = parse_descriptor_list(t, &format!("{prefix}.program_descriptors"))?;
    let stream_count: usize = t.require_val(&format!("{prefix}.streams.count"))?;
    let mut streams = Vec::with_capacity(stream_count);
    for i in 0..stream_count {
        let sprefix = format!("{prefix}.streams.{i}");
        let stream_type = t.require_val(&format!("{sprefix}.stream_type"))?;
        let elementary_pid = t.require_val(&format!("{sprefix}.elementary_pid"))?;
        let descriptors = parse_descriptor_list(t, &format!("{sprefix}.descriptors"))?;
        streams.push(StreamDescription {
            stream_type,
            elementary_pid,
            descriptors,
        });
    }
    Ok(ProgramMapSection {
        program_number,
        version_number,
        current_next_indicator,
        section_number,
        last_section_number,
        pcr_pid,
        program_descriptors,
        streams,
        crc_32,
    })
}

fn parse_other(t: &mut Tokens, prefix: &str) -> Result<OtherPsiSection> {
    let table_id = t.require_val(&format!("{prefix}.table_id"))?;
    let section_syntax_indicator = t.require_val(&format!("{prefix}.section_syntax_indicator"))?;
    let zero_bit = t.require_val(&format!("{prefix}.zero_bit"))?;
    let data = hex_decode(
        &t.require(&format!("{prefix}.data"))?,
        &format!("{prefix}.data"),
    )?;
    Ok(OtherPsiSection {
        table_id,
        section_syntax_indicator,
        zero_bit,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SYNC_BYTE;
    use crate::packet::PacketPayload;

    #[test]
    fn raw_envelope_roundtrips_through_text() {
        let envelope = Envelope {
            packet_index: 3,
            byte_offset: 564,
            body: Body::Raw(vec![0xAA, 0xBB, 0xCC]),
        };
        let line = render(&envelope);
        assert_eq!(line, "raw=aabbcc");
        let parsed = parse(&line, 3, 564).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn minimal_packet_roundtrips_through_text() {
        let packet = Mpeg2TsPacket {
            header: PacketHeader::new()
                .with_sync_byte(SYNC_BYTE)
                .with_pid(0x1fff)
                .with_payload_exists(true)
                .with_continuity_counter(7),
            adaptation_field: None,
            payload: None,
            data_bytes: vec![0xff; 10],
        };
        let envelope = Envelope {
            packet_index: 0,
            byte_offset: 0,
            body: Body::Parsed(packet),
        };
        let line = render(&envelope);
        let parsed = parse(&line, 0, 0).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn pat_packet_roundtrips_through_text() {
        let pat = ProgramAssociationSection {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
            programs: vec![
                PatEntry {
                    program_number: 0,
                    pid: 0x10,
                },
                PatEntry {
                    program_number: 1,
                    pid: 0x101,
                },
            ],
            crc_32: 0xdeadbeef,
        };
        let packet = Mpeg2TsPacket {
            header: PacketHeader::new()
                .with_sync_byte(SYNC_BYTE)
                .with_payload_unit_start_indicator(true)
                .with_pid(0)
                .with_payload_exists(true),
            adaptation_field: None,
            payload: Some(PacketPayload::Psi(PsiPacket {
                pointer_stuffing: vec![],
                sections: vec![PsiSection::Pat(pat)],
            })),
            data_bytes: vec![],
        };
        let envelope = Envelope {
            packet_index: 0,
            byte_offset: 0,
            body: Body::Parsed(packet),
        };
        let line = render(&envelope);
        let parsed = parse(&line, 0, 0).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let line = "header.sync_byte=71 header.bogus=1";
        assert!(parse(line, 0, 0).is_err());
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let line = "header.sync_byte=71";
        assert!(parse(line, 0, 0).is_err());
    }
}
