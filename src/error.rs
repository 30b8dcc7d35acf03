use thiserror::Error;

/// Errors that may be encountered while parsing or serializing an MPEG transport stream.
///
/// Every variant carries the byte (or, for [`crate::bits::BitReader`], bit) offset at which the
/// problem was found, mirroring the `location` field the teacher library attaches to its own
/// `Error<D>` type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read or write would run past the end of the backing buffer.
    #[error("packet overrun: attempted to read/write {length} bytes at offset {offset}")]
    PacketOverrun {
        /// Byte offset the overrunning access started at.
        offset: usize,
        /// Number of bytes the access attempted to consume.
        length: usize,
    },

    /// MPEG-TS packet headers must contain a sync byte of `0x47`.
    #[error("lost sync at byte offset {offset}")]
    LostSync {
        /// Byte offset within the input stream at which sync was lost.
        offset: usize,
    },

    /// Encountered for inconsistent [`crate::adaptation::AdaptationField`] parses.
    #[error("bad adaptation field at offset {offset}")]
    BadAdaptationField {
        /// Byte offset within the packet.
        offset: usize,
    },

    /// Encountered for inconsistent PES header parses (bad PTS/DTS markers, truncated
    /// optional fields, ...).
    #[error("bad PES header at offset {offset}")]
    BadPesHeader {
        /// Byte offset within the packet.
        offset: usize,
    },

    /// Encountered for inconsistent PSI header parses.
    #[error("bad PSI header at offset {offset}")]
    BadPsiHeader {
        /// Byte offset within the packet.
        offset: usize,
    },

    /// A PSI section failed CRC-32 verification (only returned by the optional
    /// `verify_crc` methods; the parser itself never checks this).
    #[error("PSI CRC-32 mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    PsiCrcMismatch {
        /// CRC-32 carried in the section.
        expected: u32,
        /// CRC-32 computed over the section body.
        actual: u32,
    },

    /// The serializer's output buffer is smaller than the bytes it needs to write.
    #[error("output buffer too short: need {needed} bytes, have {available}")]
    ShortOutputBuffer {
        /// Bytes the serializer needed to write.
        needed: usize,
        /// Bytes actually available in the caller's buffer.
        available: usize,
    },

    /// A value the model requires for serialization was not populated.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the unset field.
        field: &'static str,
    },

    /// A field value exceeds the bit width its wire encoding allows.
    #[error("field {field} value {value} does not fit in {bits} bits")]
    FieldOverflow {
        /// Name of the offending field.
        field: &'static str,
        /// Value the caller attempted to encode.
        value: u64,
        /// Bit width of the field's wire encoding.
        bits: u32,
    },

    /// The text-format line could not be parsed.
    #[error("malformed text record: {reason}")]
    MalformedText {
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// The byte source or sink backing a [`crate::framer::Framer`] failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Io(err.to_string())
    }
}

/// [`std::result::Result`] alias that uses [`CodecError`].
pub type Result<T> = std::result::Result<T, CodecError>;
