//! Bidirectional codec between MPEG-2 Transport Stream packets and a structured, round-trippable
//! field model.
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! mpegts-codec = "~0.1.0"
//! ```
//!
//! The typical pipeline is [`framer::Framer`] (byte stream → 188-byte packet windows) feeding
//! [`envelope::Envelope::parse_packet`] (packet window → structured [`packet::Mpeg2TsPacket`] or
//! raw fallback bytes). [`text`] renders/parses an [`envelope::Envelope`] to the line-oriented
//! text format used for round-trip testing and the `tscodec` CLI's `totxt`/`tobin` subcommands.

#![deny(unsafe_code)]

pub mod adaptation;
pub mod bits;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod header;
pub mod modulo;
pub mod packet;
pub mod pes;
pub mod probes;
pub mod psi;
pub mod slice_reader;
pub mod text;

pub use envelope::{Body, Envelope};
pub use error::{CodecError, Result};
pub use framer::{ByteSink, ByteSource, Chunk, Framer};
pub use packet::Mpeg2TsPacket;

/// Expands to [`format_args`] for a 90kHz timestamp of any integer type.
///
/// Format is `<hours>:<minutes>:<seconds>:<90kHz-ticks>`.
///
/// # Example
///
/// ```
/// use mpegts_codec::pts_format_args;
/// assert_eq!(std::fmt::format(pts_format_args!(900000)), "0:0:10:0");
/// ```
#[macro_export]
macro_rules! pts_format_args {
    ($pts:expr) => {
        format_args!(
            "{}:{}:{}:{}",
            $pts / (90000 * 60 * 60),
            $pts / (90000 * 60) % 60,
            $pts / 90000 % 60,
            $pts % 90000
        )
    };
}
