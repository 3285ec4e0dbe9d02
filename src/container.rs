//! Self-describing binary frame container shared by every transport.
//!
//! # Wire layout
//!
//! All integers little-endian:
//!
//! ```text
//! ┌────────────┬────────────────┬───────┬────────┬───────────┬────────────┬──────────────────────┐
//! │ marker[15] │ remaining(u32) │ w(u32)│ h(u32) │ ts(f64)   │ parts(u32) │ {len(u32)|payload}*  │
//! └────────────┴────────────────┴───────┴────────┴───────────┴────────────┴──────────────────────┘
//! ```
//!
//! `remaining` counts every byte after the `remaining` field itself, so a
//! receiver that has located the marker knows exactly how many more bytes to
//! accumulate before the frame is complete.
//!
//! Stream boundaries (socket reads, UDP fragments) do not align with frame
//! boundaries, so the marker is always scanned for, never assumed at a fixed
//! offset.

use crate::error::{Error, Result};

/// Marker prefixing every serialized frame, scanned for on receive.
pub const FRAME_MARKER: &[u8; 15] = b"DrishtiFrame01\n";

/// Fixed bytes before the first part: marker + remaining + w + h + ts + count.
pub const PREFIX_LEN: usize = 15 + 4 + 4 + 4 + 8 + 4;

/// Sanity cap on frame dimensions.
pub const MAX_DIMENSION: u32 = 16_384;

/// Sanity cap on the part count.
pub const MAX_PARTS: u32 = 512;

/// Sanity cap on a whole serialized frame. Declared sizes are checked against
/// this before any buffer is allocated from network-controlled input.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// One compressed frame: dimensions, capture timestamp, and the per-band
/// compressed parts in band order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Capture time in seconds
    pub timestamp: f64,
    /// Compressed payload of each row band, band 0 first
    pub parts: Vec<Vec<u8>>,
}

impl Frame {
    /// Total serialized size in bytes.
    pub fn serialized_len(&self) -> usize {
        PREFIX_LEN + self.parts.iter().map(|p| 4 + p.len()).sum::<usize>()
    }
}

/// Decoded fixed-size container prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerHeader {
    pub width: u32,
    pub height: u32,
    pub timestamp: f64,
    pub part_count: u32,
    /// Bytes after the `remaining` field, as declared on the wire
    pub remaining: u32,
}

impl ContainerHeader {
    /// Total size of the serialized frame this header describes.
    pub fn frame_len(&self) -> usize {
        15 + 4 + self.remaining as usize
    }
}

/// Serialize a frame, appending to `buf`. Returns the number of bytes written.
pub fn serialize_into(frame: &Frame, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    let total = frame.serialized_len();
    buf.reserve(total);

    buf.extend_from_slice(FRAME_MARKER);
    let remaining = (total - 15 - 4) as u32;
    buf.extend_from_slice(&remaining.to_le_bytes());
    buf.extend_from_slice(&frame.width.to_le_bytes());
    buf.extend_from_slice(&frame.height.to_le_bytes());
    buf.extend_from_slice(&frame.timestamp.to_le_bytes());
    buf.extend_from_slice(&(frame.parts.len() as u32).to_le_bytes());
    for part in &frame.parts {
        buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
        buf.extend_from_slice(part);
    }

    buf.len() - start
}

/// Serialize a frame into a fresh buffer.
pub fn serialize(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame.serialized_len());
    serialize_into(frame, &mut buf);
    buf
}

/// Locate the frame marker in `buf`. First match wins.
pub fn find_marker(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_MARKER.len() {
        return None;
    }
    buf.windows(FRAME_MARKER.len())
        .position(|w| w == FRAME_MARKER)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Decode and validate the fixed prefix. `buf` must start at the marker and
/// hold at least [`PREFIX_LEN`] bytes.
pub fn parse_header(buf: &[u8]) -> Result<ContainerHeader> {
    if buf.len() < PREFIX_LEN {
        return Err(Error::MalformedHeader(format!(
            "prefix needs {} bytes, got {}",
            PREFIX_LEN,
            buf.len()
        )));
    }
    if &buf[..15] != FRAME_MARKER {
        return Err(Error::MalformedHeader("marker mismatch".to_string()));
    }

    let remaining = read_u32(buf, 15);
    let width = read_u32(buf, 19);
    let height = read_u32(buf, 23);
    let timestamp = f64::from_le_bytes([
        buf[27], buf[28], buf[29], buf[30], buf[31], buf[32], buf[33], buf[34],
    ]);
    let part_count = read_u32(buf, 35);

    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::MalformedHeader(format!(
            "implausible dimensions {}x{}",
            width, height
        )));
    }
    if part_count == 0 || part_count > MAX_PARTS {
        return Err(Error::MalformedHeader(format!(
            "implausible part count {}",
            part_count
        )));
    }
    let frame_len = 15 + 4 + remaining as usize;
    if frame_len > MAX_FRAME_BYTES {
        return Err(Error::TooLarge(frame_len));
    }
    // The declared remainder must at least cover the rest of the prefix plus
    // one length word per part.
    if (remaining as usize) < PREFIX_LEN - 19 + part_count as usize * 4 {
        return Err(Error::MalformedHeader(format!(
            "remaining {} too small for {} parts",
            remaining, part_count
        )));
    }

    Ok(ContainerHeader {
        width,
        height,
        timestamp,
        part_count,
        remaining,
    })
}

/// Decode a complete serialized frame. `buf` must start at the marker and
/// contain the whole frame; trailing bytes are an error (transports hand over
/// exactly one frame at a time).
pub fn parse(buf: &[u8]) -> Result<Frame> {
    let header = parse_header(buf)?;
    let total = header.frame_len();
    if buf.len() < total {
        return Err(Error::MalformedHeader(format!(
            "frame declares {} bytes, got {}",
            total,
            buf.len()
        )));
    }

    let mut parts = Vec::with_capacity(header.part_count as usize);
    let mut at = PREFIX_LEN;
    for i in 0..header.part_count {
        if at + 4 > total {
            return Err(Error::MalformedHeader(format!(
                "part {} length field past frame end",
                i
            )));
        }
        let len = read_u32(buf, at) as usize;
        at += 4;
        if at + len > total {
            return Err(Error::MalformedHeader(format!(
                "part {} ({} bytes) past frame end",
                i, len
            )));
        }
        parts.push(buf[at..at + len].to_vec());
        at += len;
    }
    if at != total {
        return Err(Error::MalformedHeader(format!(
            "{} trailing bytes after last part",
            total - at
        )));
    }

    Ok(Frame {
        width: header.width,
        height: header.height,
        timestamp: header.timestamp,
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            width: 640,
            height: 480,
            timestamp: 12.375,
            parts: vec![vec![1, 2, 3], vec![], vec![9; 100]],
        }
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let frame = sample_frame();
        let bytes = serialize(&frame);
        assert_eq!(bytes.len(), frame.serialized_len());

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_remaining_field_matches() {
        let frame = sample_frame();
        let bytes = serialize(&frame);
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.frame_len(), bytes.len());
        assert_eq!(header.part_count, 3);
    }

    #[test]
    fn test_find_marker_offsets() {
        let frame = sample_frame();
        let bytes = serialize(&frame);

        assert_eq!(find_marker(&bytes), Some(0));

        let mut shifted = vec![0xAAu8; 37];
        shifted.extend_from_slice(&bytes);
        assert_eq!(find_marker(&shifted), Some(37));

        assert_eq!(find_marker(&shifted[..10]), None);
    }

    #[test]
    fn test_parse_truncated() {
        let bytes = serialize(&sample_frame());
        assert!(parse(&bytes[..bytes.len() - 1]).is_err());
        assert!(parse_header(&bytes[..PREFIX_LEN - 1]).is_err());
    }

    #[test]
    fn test_parse_rejects_implausible_sizes() {
        let mut bytes = serialize(&sample_frame());
        // Corrupt the width field
        bytes[19..23].copy_from_slice(&(MAX_DIMENSION + 1).to_le_bytes());
        assert!(parse_header(&bytes).is_err());

        let mut bytes = serialize(&sample_frame());
        // Part length pointing past the end of the frame
        bytes[PREFIX_LEN..PREFIX_LEN + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_marker() {
        let mut bytes = serialize(&sample_frame());
        bytes[0] ^= 0xFF;
        assert!(matches!(
            parse_header(&bytes),
            Err(Error::MalformedHeader(_))
        ));
    }
}
