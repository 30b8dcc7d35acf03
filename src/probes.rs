//! Coarse elementary-stream sniffers used by the `dump` CLI feature: an H.264 frame-type probe
//! and an AC-3 syncframe scanner. Neither decodes the stream; both look for fixed byte/bit
//! patterns, grounded on `original_source/src/h264_utils.cc` and `src/ac3_utils.cc`.

use crate::bits::BitReader;

/// Coarse H.264 picture type, as determined by [`probe_h264_frame_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// No recognizable pattern was found.
    Unknown,
    /// Intra-coded (I) picture.
    I,
    /// Predictive (P) picture.
    P,
    /// Bi-predictive (B) picture.
    B,
    /// A recognizable pattern was found but didn't map to I/P/B (e.g. an SI/SP slice type).
    Other,
}

fn start_code_len(data: &[u8], i: usize) -> Option<usize> {
    if i + 3 <= data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
        Some(3)
    } else if i + 4 <= data.len()
        && data[i] == 0
        && data[i + 1] == 0
        && data[i + 2] == 0
        && data[i + 3] == 1
    {
        Some(4)
    } else {
        None
    }
}

fn slice_type_to_frame_type(slice_type: u32) -> FrameType {
    match slice_type % 5 {
        0 | 3 => FrameType::P,
        1 => FrameType::B,
        2 | 4 => FrameType::I,
        _ => FrameType::Other,
    }
}

/// Probes an H.264 elementary-stream payload (the data region of a single PES packet) for the
/// earliest frame-type indication it can find.
///
/// Looks for an Access Unit Delimiter NAL (`primary_picture_type` byte `0x10`/`0x30`/`0x50` maps
/// to I/P/B), an IDR slice NAL (always I), or a non-IDR slice NAL (decodes `first_mb_in_slice`
/// and `slice_type` via Exp-Golomb and maps `slice_type` to I/P/B/Other). The earliest match in
/// the buffer wins; returns [`FrameType::Unknown`] if nothing matches.
pub fn probe_h264_frame_type(data: &[u8]) -> FrameType {
    let mut i = 0;
    while i < data.len() {
        if let Some(sc_len) = start_code_len(data, i) {
            let nal_start = i + sc_len;
            if nal_start >= data.len() {
                break;
            }
            let nal_unit_type = data[nal_start] & 0x1f;
            match nal_unit_type {
                9 => {
                    // Access unit delimiter: one byte of primary_picture_type follows.
                    if nal_start + 1 < data.len() {
                        return match data[nal_start + 1] {
                            0x10 => FrameType::I,
                            0x30 => FrameType::P,
                            0x50 => FrameType::B,
                            _ => FrameType::Other,
                        };
                    }
                }
                5 => return FrameType::I, // IDR slice
                1 => {
                    // Non-IDR slice: decode first_mb_in_slice (unused) then slice_type.
                    let rest = &data[nal_start + 1..];
                    let mut reader = BitReader::new(rest);
                    if reader.read_golomb_uint32().is_ok() {
                        if let Ok(slice_type) = reader.read_golomb_uint32() {
                            return slice_type_to_frame_type(slice_type);
                        }
                    }
                    return FrameType::Unknown;
                }
                _ => {}
            }
            i = nal_start + 1;
        } else {
            i += 1;
        }
    }
    FrameType::Unknown
}

/// Scans `buf` for the first AC-3 syncframe header (`0x0b 0x77 .. .. {0x14,0x0c}`) and returns
/// its byte offset, or `None` if none is found.
pub fn scan_ac3_syncframe(buf: &[u8]) -> Option<usize> {
    if buf.len() < 5 {
        return None;
    }
    let limit = buf.len() - 5;
    for i in 0..=limit {
        if buf[i] == 0x0b && buf[i + 1] == 0x77 && (buf[i + 4] == 0x14 || buf[i + 4] == 0x0c) {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aud_primary_picture_type_maps_to_frame_type() {
        assert_eq!(
            probe_h264_frame_type(&[0x00, 0x00, 0x00, 0x01, 0x09, 0x30, 0x00]),
            FrameType::P
        );
        assert_eq!(
            probe_h264_frame_type(&[0x00, 0x00, 0x00, 0x01, 0x09, 0x10, 0x00]),
            FrameType::I
        );
        assert_eq!(
            probe_h264_frame_type(&[0x00, 0x00, 0x00, 0x01, 0x09, 0x50, 0x00]),
            FrameType::B
        );
    }

    #[test]
    fn idr_slice_is_always_i() {
        assert_eq!(
            probe_h264_frame_type(&[0x00, 0x00, 0x00, 0x01, 0x05, 0x88, 0x80]),
            FrameType::I
        );
    }

    #[test]
    fn unknown_when_no_pattern_present() {
        assert_eq!(probe_h264_frame_type(&[0xde, 0xad, 0xbe, 0xef]), FrameType::Unknown);
    }

    #[test]
    fn ac3_scanner_finds_first_syncframe() {
        let buf = [0xff, 0xff, 0x0b, 0x77, 0x00, 0x00, 0x14, 0x00];
        assert_eq!(scan_ac3_syncframe(&buf), Some(2));
    }

    #[test]
    fn ac3_scanner_returns_none_without_match() {
        let buf = [0x00, 0x0b, 0x00, 0x77, 0x00];
        assert_eq!(scan_ac3_syncframe(&buf), None);
    }
}
