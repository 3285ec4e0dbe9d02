//! Versioned on-disk file layout.
//!
//! The 15-byte file-start marker encodes the format version. Each version is
//! parsed by its own branch of [`FormatVersion`] instead of scattered
//! `if version > N` checks:
//!
//! ```text
//! V0: marker[15] | width(u32) | height(u32) | frames*
//! V1: marker[15] | diff(u8) | width | height | frames*
//! V2: marker[15] | diff(u8) | footer_off(i64) | width | height | frames*
//!     footer: last_frame_id(i32) | offsets(i64 * n)
//! V3: marker[15] | diff(u8) | footer_off(i64) | width | height | frames*
//!     footer: last_frame_id(i32) | offsets(i64 * n) | timestamps(f64 * n)
//! ```
//!
//! Every frame record is a full container serialization
//! ([`crate::container`]). The footer-offset field is written as zero at
//! create time and rewritten at close; a file whose field is still zero was
//! not closed cleanly and plays back through a linear recovery scan.

use crate::container::MAX_DIMENSION;
use crate::error::{Error, Result};
use std::io::{Read, Write};

pub const MARKER_LEN: usize = 15;

const MARKER_V0: &[u8; MARKER_LEN] = b"DrishtiVideo00\n";
const MARKER_V1: &[u8; MARKER_LEN] = b"DrishtiVideo01\n";
const MARKER_V2: &[u8; MARKER_LEN] = b"DrishtiVideo02\n";
const MARKER_V3: &[u8; MARKER_LEN] = b"DrishtiVideo03\n";

/// Byte position of the footer-offset field in V2/V3 headers.
pub const FOOTER_OFFSET_POS: u64 = MARKER_LEN as u64 + 1;

/// Sanity cap on the frame count declared by a footer.
pub const MAX_INDEX_FRAMES: usize = 1 << 26;

/// On-disk format version, selected once at open time from the file marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V0,
    V1,
    V2,
    V3,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V3;

    pub fn from_marker(marker: &[u8]) -> Option<Self> {
        match marker {
            m if m == MARKER_V0 => Some(Self::V0),
            m if m == MARKER_V1 => Some(Self::V1),
            m if m == MARKER_V2 => Some(Self::V2),
            m if m == MARKER_V3 => Some(Self::V3),
            _ => None,
        }
    }

    pub fn marker(self) -> &'static [u8; MARKER_LEN] {
        match self {
            Self::V0 => MARKER_V0,
            Self::V1 => MARKER_V1,
            Self::V2 => MARKER_V2,
            Self::V3 => MARKER_V3,
        }
    }

    pub fn has_differential_flag(self) -> bool {
        self != Self::V0
    }

    pub fn has_footer(self) -> bool {
        matches!(self, Self::V2 | Self::V3)
    }

    pub fn footer_has_timestamps(self) -> bool {
        self == Self::V3
    }

    /// Byte offset of the first frame record.
    pub fn header_len(self) -> u64 {
        match self {
            Self::V0 => (MARKER_LEN + 8) as u64,
            Self::V1 => (MARKER_LEN + 1 + 8) as u64,
            Self::V2 | Self::V3 => (MARKER_LEN + 1 + 8 + 8) as u64,
        }
    }
}

/// Decoded file header, any version.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub version: FormatVersion,
    pub differential: bool,
    /// Footer position; zero means "no footer" (unclean shutdown or legacy)
    pub footer_offset: i64,
    pub width: u32,
    pub height: u32,
}

impl FileHeader {
    /// Read and validate a header from the start of `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut marker = [0u8; MARKER_LEN];
        reader.read_exact(&mut marker)?;
        let version = FormatVersion::from_marker(&marker).ok_or(Error::UnknownFormat)?;

        let differential = if version.has_differential_flag() {
            let mut flag = [0u8; 1];
            reader.read_exact(&mut flag)?;
            flag[0] != 0
        } else {
            false
        };

        let footer_offset = if version.has_footer() {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            i64::from_le_bytes(bytes)
        } else {
            0
        };

        let mut dims = [0u8; 8];
        reader.read_exact(&mut dims)?;
        let width = u32::from_le_bytes([dims[0], dims[1], dims[2], dims[3]]);
        let height = u32::from_le_bytes([dims[4], dims[5], dims[6], dims[7]]);
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(Error::MalformedHeader(format!(
                "implausible file dimensions {}x{}",
                width, height
            )));
        }
        if footer_offset < 0 || (footer_offset > 0 && (footer_offset as u64) < version.header_len())
        {
            return Err(Error::MalformedHeader(format!(
                "implausible footer offset {}",
                footer_offset
            )));
        }

        Ok(Self {
            version,
            differential,
            footer_offset,
            width,
            height,
        })
    }

    /// Write a current-version header with a zeroed footer placeholder.
    pub fn write_current<W: Write>(
        writer: &mut W,
        differential: bool,
        width: u32,
        height: u32,
    ) -> Result<()> {
        writer.write_all(FormatVersion::CURRENT.marker())?;
        writer.write_all(&[differential as u8])?;
        writer.write_all(&0i64.to_le_bytes())?;
        writer.write_all(&width.to_le_bytes())?;
        writer.write_all(&height.to_le_bytes())?;
        Ok(())
    }
}

/// Append a V3 footer at the writer's current position.
pub fn write_footer<W: Write>(writer: &mut W, offsets: &[i64], timestamps: &[f64]) -> Result<()> {
    debug_assert_eq!(offsets.len(), timestamps.len());
    let last_frame_id = offsets.len() as i32 - 1;
    writer.write_all(&last_frame_id.to_le_bytes())?;
    for offset in offsets {
        writer.write_all(&offset.to_le_bytes())?;
    }
    for timestamp in timestamps {
        writer.write_all(&timestamp.to_le_bytes())?;
    }
    Ok(())
}

/// Read a footer (V2: offsets only, V3: offsets + timestamps). Validates the
/// strictly-increasing offset invariant.
pub fn read_footer<R: Read>(
    reader: &mut R,
    version: FormatVersion,
) -> Result<(Vec<i64>, Vec<f64>)> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    let last_frame_id = i32::from_le_bytes(bytes);
    if last_frame_id < -1 {
        return Err(Error::MalformedHeader(format!(
            "implausible last frame id {}",
            last_frame_id
        )));
    }
    let count = (last_frame_id + 1) as usize;
    if count > MAX_INDEX_FRAMES {
        return Err(Error::TooLarge(count));
    }

    let mut offsets = Vec::with_capacity(count);
    let mut word = [0u8; 8];
    for _ in 0..count {
        reader.read_exact(&mut word)?;
        offsets.push(i64::from_le_bytes(word));
    }
    for pair in offsets.windows(2) {
        if pair[1] <= pair[0] {
            return Err(Error::MalformedHeader(
                "frame offsets not strictly increasing".to_string(),
            ));
        }
    }

    let mut timestamps = Vec::new();
    if version.footer_has_timestamps() {
        timestamps.reserve(count);
        for _ in 0..count {
            reader.read_exact(&mut word)?;
            timestamps.push(f64::from_le_bytes(word));
        }
    }

    Ok((offsets, timestamps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_roundtrip_current() {
        let mut buf = Vec::new();
        FileHeader::write_current(&mut buf, true, 640, 480).unwrap();
        assert_eq!(buf.len() as u64, FormatVersion::CURRENT.header_len());

        let header = FileHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(header.version, FormatVersion::V3);
        assert!(header.differential);
        assert_eq!(header.footer_offset, 0);
        assert_eq!((header.width, header.height), (640, 480));
    }

    #[test]
    fn test_version_detection() {
        assert_eq!(
            FormatVersion::from_marker(MARKER_V0),
            Some(FormatVersion::V0)
        );
        assert_eq!(
            FormatVersion::from_marker(MARKER_V3),
            Some(FormatVersion::V3)
        );
        assert_eq!(FormatVersion::from_marker(b"NotAVideoFile!\n"), None);
    }

    #[test]
    fn test_legacy_v0_header() {
        // V0: marker, width, height only
        let mut buf = Vec::new();
        buf.extend_from_slice(MARKER_V0);
        buf.extend_from_slice(&320u32.to_le_bytes());
        buf.extend_from_slice(&240u32.to_le_bytes());

        let header = FileHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(header.version, FormatVersion::V0);
        assert!(!header.differential);
        assert_eq!(header.footer_offset, 0);
        assert_eq!((header.width, header.height), (320, 240));
    }

    #[test]
    fn test_unknown_marker_rejected() {
        let mut buf = vec![0u8; 64];
        buf[..MARKER_LEN].copy_from_slice(b"SomethingElse!\n");
        assert!(matches!(
            FileHeader::read_from(&mut Cursor::new(&buf)),
            Err(Error::UnknownFormat)
        ));
    }

    #[test]
    fn test_footer_roundtrip() {
        let offsets = vec![32i64, 100, 250];
        let timestamps = vec![0.0f64, 0.04, 0.08];
        let mut buf = Vec::new();
        write_footer(&mut buf, &offsets, &timestamps).unwrap();

        let (o, t) = read_footer(&mut Cursor::new(&buf), FormatVersion::V3).unwrap();
        assert_eq!(o, offsets);
        assert_eq!(t, timestamps);
    }

    #[test]
    fn test_footer_rejects_unsorted_offsets() {
        let mut buf = Vec::new();
        write_footer(&mut buf, &[100, 50], &[0.0, 1.0]).unwrap();
        assert!(read_footer(&mut Cursor::new(&buf), FormatVersion::V3).is_err());
    }

    #[test]
    fn test_empty_footer() {
        let mut buf = Vec::new();
        write_footer(&mut buf, &[], &[]).unwrap();
        let (o, t) = read_footer(&mut Cursor::new(&buf), FormatVersion::V3).unwrap();
        assert!(o.is_empty());
        assert!(t.is_empty());
    }
}
