//! Seekable video file reader with legacy-version and recovery playback.
//!
//! Modern files (V2/V3) carry a frame index in their footer: seek by frame
//! id is O(1) and seek by time is an O(log n) binary search. Legacy versions
//! and files that were never closed cleanly (footer placeholder still zero)
//! are rebuilt by a linear scan at open time and play back sequentially with
//! seeking disabled, matching the original recovery behavior.
//!
//! Seeking is also unsupported on differential streams: frame N cannot be
//! reconstructed without sequentially decoding every frame before it.

use crate::codec::FrameDecompressor;
use crate::config::{BandErrorPolicy, CompressionConfig};
use crate::container::{self, Frame, PREFIX_LEN};
use crate::disk::format::{read_footer, FileHeader, FormatVersion};
use crate::error::{Error, Result};
use image::RgbImage;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Seekable video file reader.
pub struct VideoReader {
    file: BufReader<File>,
    version: FormatVersion,
    width: u32,
    height: u32,
    differential: bool,
    offsets: Vec<i64>,
    timestamps: Vec<f64>,
    /// False for legacy versions and recovered files: playback only.
    indexed: bool,
    pos: usize,
    decompressor: FrameDecompressor,
}

impl VideoReader {
    /// Open a video file, detecting its format version from the marker.
    /// Decode parallelism follows the per-frame part count, fixed when the
    /// file was recorded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut file = BufReader::new(file);
        let header = FileHeader::read_from(&mut file)?;

        let config = CompressionConfig::raw_zlib(6)
            .with_differential(header.differential)
            .with_band_errors(BandErrorPolicy::Lenient);
        let decompressor = FrameDecompressor::new(header.width, header.height, config)?;

        let mut reader = Self {
            file,
            version: header.version,
            width: header.width,
            height: header.height,
            differential: header.differential,
            offsets: Vec::new(),
            timestamps: Vec::new(),
            indexed: false,
            pos: 0,
            decompressor,
        };

        if header.version.has_footer() && header.footer_offset > 0 {
            match reader.load_footer(header.footer_offset) {
                Ok(()) => reader.indexed = true,
                Err(e) => {
                    log::warn!(
                        "{}: footer unreadable ({}), falling back to recovery scan",
                        path.display(),
                        e
                    );
                    reader.recovery_scan()?;
                }
            }
        } else {
            if header.version.has_footer() {
                log::warn!(
                    "{}: no footer (unclean shutdown), recovering by linear scan",
                    path.display()
                );
            }
            reader.recovery_scan()?;
        }

        reader.rewind()?;
        log::info!(
            "opened {} ({:?}, {}x{}, {} frames, differential {}, seekable {})",
            path.display(),
            reader.version,
            reader.width,
            reader.height,
            reader.offsets.len(),
            reader.differential,
            reader.seekable()
        );
        Ok(reader)
    }

    fn load_footer(&mut self, footer_offset: i64) -> Result<()> {
        self.file.seek(SeekFrom::Start(footer_offset as u64))?;
        let (offsets, timestamps) = read_footer(&mut self.file, self.version)?;
        if let Some(&first) = offsets.first() {
            if (first as u64) < self.version.header_len() {
                return Err(Error::MalformedHeader(
                    "first frame offset inside file header".to_string(),
                ));
            }
        }
        self.offsets = offsets;
        self.timestamps = timestamps;
        Ok(())
    }

    /// Rebuild the index by walking frame records until EOF or corruption.
    /// A truncated tail is tolerated: everything before it stays readable.
    fn recovery_scan(&mut self) -> Result<()> {
        let mut offset = self.version.header_len();
        self.file.seek(SeekFrom::Start(offset))?;
        let mut prefix = [0u8; PREFIX_LEN];

        loop {
            match self.file.read_exact(&mut prefix) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let header = match container::parse_header(&prefix) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("scan stopped at offset {}: {}", offset, e);
                    break;
                }
            };
            self.offsets.push(offset as i64);
            self.timestamps.push(header.timestamp);

            let skip = header.frame_len() - PREFIX_LEN;
            self.file.seek_relative(skip as i64)?;
            offset += header.frame_len() as u64;
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn differential(&self) -> bool {
        self.differential
    }

    pub fn frame_count(&self) -> usize {
        self.offsets.len()
    }

    /// Current read position (next frame id to be returned).
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// True when random access is available on this stream.
    pub fn seekable(&self) -> bool {
        self.indexed && !self.differential
    }

    /// Read the next frame at container level without decompressing.
    /// Returns `Ok(None)` at end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.pos >= self.offsets.len() {
            return Ok(None);
        }

        let mut prefix = [0u8; PREFIX_LEN];
        self.file.read_exact(&mut prefix)?;
        let header = container::parse_header(&prefix)?;

        let mut buf = vec![0u8; header.frame_len()];
        buf[..PREFIX_LEN].copy_from_slice(&prefix);
        self.file.read_exact(&mut buf[PREFIX_LEN..])?;

        let frame = container::parse(&buf)?;
        self.pos += 1;
        Ok(Some(frame))
    }

    /// Read and decompress the next frame. Returns `Ok(None)` at end of
    /// stream, letting callers rewind to frame 0 and keep playing.
    pub fn read_image(&mut self) -> Result<Option<(f64, RgbImage)>> {
        match self.read_frame()? {
            Some(frame) => {
                let image = self.decompressor.decompress(&frame)?;
                Ok(Some((frame.timestamp, image)))
            }
            None => Ok(None),
        }
    }

    /// Seek to a frame id. O(1) via the frame index.
    pub fn set_pos(&mut self, frame: usize) -> Result<()> {
        if self.differential {
            return Err(Error::SeekUnsupported(
                "differential streams decode sequentially",
            ));
        }
        if !self.indexed {
            return Err(Error::SeekUnsupported("no frame index on this file"));
        }
        if frame >= self.offsets.len() {
            return Err(Error::OutOfRange(frame));
        }
        self.file.seek(SeekFrom::Start(self.offsets[frame] as u64))?;
        self.pos = frame;
        Ok(())
    }

    /// Frame id whose timestamp is the latest at or before `t`. O(log n)
    /// binary search over the timestamp table. This is a pure query: it is
    /// available on differential streams too, where the position can be used
    /// after a sequential decode even though `set_pos` is not.
    pub fn pos_at_time(&self, t: f64) -> Result<usize> {
        if !self.indexed || self.timestamps.is_empty() {
            return Err(Error::SeekUnsupported("no timestamp index on this file"));
        }
        let after = self.timestamps.partition_point(|&ts| ts <= t);
        Ok(after.saturating_sub(1))
    }

    /// Reset playback to frame 0. Valid on every stream, including
    /// differential ones (the reference is reset alongside the position).
    pub fn rewind(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(self.version.header_len()))?;
        self.pos = 0;
        self.decompressor.reset();
        Ok(())
    }
}
