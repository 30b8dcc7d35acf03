//! Thin CLI shell over the `mpegts-codec` library: stream-level conversion between binary MPEG-2
//! TS, the line-oriented text format, and per-field extraction.
//!
//! CLI shape grounded in `xxxxuanran-rust-srec/src/cli.rs` and `hua0512-rust-srec`'s `CliArgs`
//! (`clap` derive, a `Commands` enum matched in `main`), adapted to the `log`/`pretty_env_logger`
//! ambient stack this crate carries instead of `tracing`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use clap::{Parser, Subcommand};

use mpegts_codec::envelope::{reject_raw, Body};
use mpegts_codec::error::{CodecError, Result};
use mpegts_codec::framer::{ByteSource, Chunk, Framer};
use mpegts_codec::modulo::PTS_MODULO;
use mpegts_codec::packet::PacketPayload;
use mpegts_codec::{probes, text, Envelope};

/// Resynchronization lookahead used when `--sync-gap` is not given. Matches
/// [`Framer::DEFAULT_SYNC_GAP`].
const DEFAULT_SYNC_GAP: usize = 1880;

/// Every dotted field path `text::render` can produce, with array indices (`sections.3`,
/// `programs.0`, ...) normalized to `#` so one template covers every index value. Kept in sync
/// by hand with `text.rs`'s `render_*` functions; `validate_dump_field` checks a `--field` flag
/// against this set after applying the same normalization to the user's path.
const KNOWN_DUMP_FIELDS: &[&str] = &[
    "header.sync_byte",
    "header.transport_error_indicator",
    "header.payload_unit_start_indicator",
    "header.transport_priority",
    "header.pid",
    "header.transport_scrambling_control",
    "header.adaptation_field_exists",
    "header.payload_exists",
    "header.continuity_counter",
    "adaptation_field.empty",
    "adaptation_field.discontinuity_indicator",
    "adaptation_field.random_access_indicator",
    "adaptation_field.elementary_stream_priority_indicator",
    "adaptation_field.pcr.base",
    "adaptation_field.pcr.extension",
    "adaptation_field.opcr.base",
    "adaptation_field.opcr.extension",
    "adaptation_field.splice_countdown",
    "adaptation_field.transport_private_data",
    "adaptation_field.stuffing",
    "adaptation_field.extension.present",
    "adaptation_field.extension.ltw.valid_flag",
    "adaptation_field.extension.ltw.offset",
    "adaptation_field.extension.piecewise_rate",
    "adaptation_field.extension.splice.type",
    "adaptation_field.extension.splice.dts_next_au",
    "adaptation_field.extension.stuffing",
    "pes.stream_id",
    "pes.pes_packet_length",
    "pes.optional_header.pes_scrambling_control",
    "pes.optional_header.pes_priority",
    "pes.optional_header.data_alignment_indicator",
    "pes.optional_header.copyright",
    "pes.optional_header.original_or_copy",
    "pes.optional_header.pts",
    "pes.optional_header.dts",
    "pes.optional_header.escr.base",
    "pes.optional_header.escr.extension",
    "pes.optional_header.es_rate",
    "pes.optional_header.dsm_trick_mode",
    "pes.optional_header.additional_copy_info",
    "pes.optional_header.previous_pes_packet_crc",
    "pes.optional_header.stuffing",
    "pes.optional_header.pes_extension.present",
    "pes.optional_header.pes_extension.private_data",
    "pes.optional_header.pes_extension.pack_header",
    "pes.optional_header.pes_extension.packet_sequence_counter.counter",
    "pes.optional_header.pes_extension.packet_sequence_counter.mpeg1_mpeg2_identifier",
    "pes.optional_header.pes_extension.packet_sequence_counter.original_stuff_length",
    "pes.optional_header.pes_extension.p_std_buffer.scale",
    "pes.optional_header.pes_extension.p_std_buffer.size",
    "pes.optional_header.pes_extension.extension_field",
    "psi.pointer_stuffing",
    "psi.sections.count",
    "psi.sections.#.kind",
    "psi.sections.#.transport_stream_id",
    "psi.sections.#.version_number",
    "psi.sections.#.current_next_indicator",
    "psi.sections.#.section_number",
    "psi.sections.#.last_section_number",
    "psi.sections.#.crc_32",
    "psi.sections.#.programs.count",
    "psi.sections.#.programs.#.program_number",
    "psi.sections.#.programs.#.pid",
    "psi.sections.#.program_number",
    "psi.sections.#.pcr_pid",
    "psi.sections.#.program_descriptors.count",
    "psi.sections.#.program_descriptors.#.tag",
    "psi.sections.#.program_descriptors.#.data",
    "psi.sections.#.streams.count",
    "psi.sections.#.streams.#.stream_type",
    "psi.sections.#.streams.#.elementary_pid",
    "psi.sections.#.streams.#.descriptors.count",
    "psi.sections.#.streams.#.descriptors.#.tag",
    "psi.sections.#.streams.#.descriptors.#.data",
    "psi.sections.#.table_id",
    "psi.sections.#.section_syntax_indicator",
    "psi.sections.#.zero_bit",
    "psi.sections.#.data",
];

#[derive(Parser)]
#[command(
    name = "tscodec",
    author,
    version,
    about = "Bidirectional codec between MPEG-2 Transport Stream packets and a structured field model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Resynchronization lookahead in bytes (188..=18800).
    #[arg(short = 's', long = "sync-gap", global = true, default_value_t = DEFAULT_SYNC_GAP)]
    sync_gap: usize,

    /// Reject any stream that produces Raw (unparsed) envelopes.
    #[arg(long = "no-raw", global = true)]
    no_raw: bool,

    /// Suppress the per-PID PTS discontinuity warning.
    #[arg(long = "ignore-pts-delta", global = true)]
    ignore_pts_delta: bool,

    /// Increase logging verbosity; repeatable (info, then debug, then trace).
    #[arg(short = 'd', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Silence all logging.
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Render a binary TS stream as line-oriented text.
    Totxt {
        #[arg(default_value = "-")]
        input: String,
        #[arg(default_value = "-")]
        output: String,
    },
    /// Parse line-oriented text back into a binary TS stream.
    Tobin {
        #[arg(default_value = "-")]
        input: String,
        #[arg(default_value = "-")]
        output: String,
    },
    /// Extract selected fields from each packet, one line per packet.
    Dump {
        #[arg(default_value = "-")]
        input: String,
        /// Include `pes.optional_header.pts` when present.
        #[arg(long)]
        pts: bool,
        /// Include `header.payload_unit_start_indicator`.
        #[arg(long)]
        pusi: bool,
        /// Include `header.pid`.
        #[arg(long)]
        pid: bool,
        /// Include the H.264 frame-type probe over the packet's trailing payload bytes.
        #[arg(long = "type")]
        frame_type: bool,
        /// Include the AC-3 syncframe scan offset, when found.
        #[arg(long)]
        syncframe: bool,
        /// Additional `--<dotted.field.path>` flags resolved against the rendered field set.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        fields: Vec<String>,
    },
    /// Round-trip a binary stream through the packet model and verify it matches byte-for-byte.
    Test {
        #[arg(default_value = "-")]
        input: String,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .init();
}

fn open_input(path: &str) -> io::Result<Box<dyn Read>> {
    if path == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

fn open_output(path: &str) -> io::Result<Box<dyn Write>> {
    if path == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Pulls the next envelope off `framer`, mapping `Eof` to `None` and `LostSync` to an error.
fn next_envelope<S: ByteSource>(framer: &mut Framer<S>) -> Result<Option<Envelope>> {
    let packet_index = framer.packet_index();
    let byte_offset = framer.byte_offset();
    match framer.next_chunk()? {
        Chunk::Eof => Ok(None),
        Chunk::LostSync => Err(CodecError::LostSync {
            offset: byte_offset as usize,
        }),
        Chunk::Packet(bytes) => Ok(Some(Envelope::parse_packet(
            packet_index,
            byte_offset,
            &bytes,
        ))),
        Chunk::Unaligned(bytes) => Ok(Some(Envelope::raw(packet_index, byte_offset, bytes))),
    }
}

/// Tracks the last PTS seen per PID and warns when a new one runs earlier on the wrapped clock.
#[derive(Default)]
struct PtsTracker {
    last_pts: HashMap<u16, i64>,
}

impl PtsTracker {
    fn check(&mut self, envelope: &Envelope) {
        let Body::Parsed(packet) = &envelope.body else {
            return;
        };
        let Some(PacketPayload::Pes(pes)) = &packet.payload else {
            return;
        };
        let Some(optional_header) = &pes.optional_header else {
            return;
        };
        let Some(pts) = optional_header.pts else {
            return;
        };
        let pid = packet.header.pid();
        let pts = pts as i64;
        if let Some(&previous) = self.last_pts.get(&pid) {
            if PTS_MODULO.cmp(pts, previous) < 0 {
                log::warn!(
                    "PTS discontinuity on pid {pid} at packet {}: {previous} -> {pts}",
                    envelope.packet_index
                );
            }
        }
        self.last_pts.insert(pid, pts);
    }
}

fn run_totxt(cli: &Cli, input: &str, output: &str) -> Result<()> {
    let source = open_input(input)?;
    let mut sink = open_output(output)?;
    let mut framer = Framer::new(source, cli.sync_gap)?;
    let mut pts_tracker = PtsTracker::default();
    let mut saw_raw = false;

    while let Some(envelope) = next_envelope(&mut framer)? {
        if cli.no_raw {
            reject_raw(&envelope)?;
        }
        saw_raw |= envelope.is_raw();
        if !cli.ignore_pts_delta {
            pts_tracker.check(&envelope);
        }
        writeln!(sink, "{}", text::render(&envelope))?;
    }

    if cli.no_raw && saw_raw {
        return Err(CodecError::LostSync { offset: 0 });
    }
    Ok(())
}

fn run_tobin(cli: &Cli, input: &str, output: &str) -> Result<()> {
    let source = open_input(input)?;
    let mut sink = open_output(output)?;
    let reader = BufReader::new(source);
    let mut offset = 0u64;
    let mut saw_raw = false;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope = text::parse(&line, index as u64, offset)?;
        if cli.no_raw {
            reject_raw(&envelope)?;
        }
        saw_raw |= envelope.is_raw();

        let mut bytes = Vec::new();
        envelope.serialize(&mut bytes)?;
        offset += bytes.len() as u64;
        sink.write_all(&bytes)?;
    }

    if cli.no_raw && saw_raw {
        return Err(CodecError::LostSync { offset: 0 });
    }
    Ok(())
}

fn run_test(cli: &Cli, input: &str) -> Result<()> {
    let source = open_input(input)?;
    let mut framer = Framer::new(source, cli.sync_gap)?;
    let mut saw_raw = false;
    let mut mismatches = 0u64;

    loop {
        let packet_index = framer.packet_index();
        let byte_offset = framer.byte_offset();
        let (envelope, original) = match framer.next_chunk()? {
            Chunk::Eof => break,
            Chunk::LostSync => {
                return Err(CodecError::LostSync {
                    offset: byte_offset as usize,
                })
            }
            Chunk::Packet(bytes) => (
                Envelope::parse_packet(packet_index, byte_offset, &bytes),
                bytes.to_vec(),
            ),
            Chunk::Unaligned(bytes) => (
                Envelope::raw(packet_index, byte_offset, bytes.clone()),
                bytes,
            ),
        };

        if cli.no_raw {
            reject_raw(&envelope)?;
        }
        saw_raw |= envelope.is_raw();

        let mut reserialized = Vec::new();
        envelope.serialize(&mut reserialized)?;
        if reserialized != original {
            mismatches += 1;
            log::error!(
                "round-trip mismatch at packet {packet_index} (offset {byte_offset}): original={} reserialized={}",
                hex_bytes(&original),
                hex_bytes(&reserialized),
            );
        }
    }

    if mismatches > 0 {
        return Err(CodecError::MalformedText {
            reason: format!("{mismatches} round-trip mismatch(es)"),
        });
    }
    if cli.no_raw && saw_raw {
        return Err(CodecError::LostSync { offset: 0 });
    }
    Ok(())
}

fn tokenize(line: &str) -> HashMap<String, String> {
    line.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Normalizes a dotted field path by replacing every purely-numeric segment (a `psi.sections.#`
/// or `...programs.#` index) with `#`, so it can be compared against [`KNOWN_DUMP_FIELDS`].
fn normalize_dump_field(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "#"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn validate_dump_field(path: &str) -> Result<()> {
    if KNOWN_DUMP_FIELDS.contains(&normalize_dump_field(path).as_str()) {
        Ok(())
    } else {
        Err(CodecError::MalformedText {
            reason: format!("unknown dump field: --{path}"),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn run_dump(
    cli: &Cli,
    input: &str,
    pts: bool,
    pusi: bool,
    pid: bool,
    frame_type: bool,
    syncframe: bool,
    fields: &[String],
) -> Result<()> {
    let mut field_paths = Vec::with_capacity(fields.len());
    for flag in fields {
        let path = flag.strip_prefix("--").ok_or_else(|| CodecError::MalformedText {
            reason: format!("unrecognized dump argument: {flag}"),
        })?;
        validate_dump_field(path)?;
        field_paths.push(path.to_string());
    }

    let source = open_input(input)?;
    let mut framer = Framer::new(source, cli.sync_gap)?;
    let stdout = io::stdout();
    let mut sink = stdout.lock();
    let mut pts_tracker = PtsTracker::default();

    while let Some(envelope) = next_envelope(&mut framer)? {
        if cli.no_raw {
            reject_raw(&envelope)?;
        }
        if !cli.ignore_pts_delta {
            pts_tracker.check(&envelope);
        }

        let tokens = tokenize(&text::render(&envelope));
        let mut line = format!("packet_index={}", envelope.packet_index);

        if pid {
            if let Some(v) = tokens.get("header.pid") {
                line.push_str(&format!(" pid={v}"));
            }
        }
        if pusi {
            if let Some(v) = tokens.get("header.payload_unit_start_indicator") {
                line.push_str(&format!(" pusi={v}"));
            }
        }
        if pts {
            if let Some(v) = tokens.get("pes.optional_header.pts") {
                line.push_str(&format!(" pts={v}"));
            }
        }
        if let Body::Parsed(packet) = &envelope.body {
            if frame_type {
                let probe = probes::probe_h264_frame_type(&packet.data_bytes);
                line.push_str(&format!(" type={probe:?}"));
            }
            if syncframe {
                if let Some(at) = probes::scan_ac3_syncframe(&packet.data_bytes) {
                    line.push_str(&format!(" syncframe={at}"));
                }
            }
        }
        for path in &field_paths {
            if let Some(v) = tokens.get(path.as_str()) {
                line.push_str(&format!(" {path}={v}"));
            }
        }

        writeln!(sink, "{line}")?;
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Totxt { input, output } => run_totxt(cli, input, output),
        Command::Tobin { input, output } => run_tobin(cli, input, output),
        Command::Test { input } => run_test(cli, input),
        Command::Dump {
            input,
            pts,
            pusi,
            pid,
            frame_type,
            syncframe,
            fields,
        } => run_dump(cli, input, *pts, *pusi, *pid, *frame_type, *syncframe, fields),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(err) = run(&cli) {
        log::error!("{err}");
        std::process::exit(1);
    }
}
