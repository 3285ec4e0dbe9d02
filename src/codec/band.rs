//! Parallel per-row-band frame compression.
//!
//! An image is split into N contiguous horizontal bands (N = worker count,
//! fixed per stream) and each band is converted and compressed independently
//! on its own thread. Band compression is order-independent; serialization
//! re-imposes row order by band index. The fork-join blocks the caller until
//! every band of the current frame is done.
//!
//! Two codecs:
//! - `RawZlib`: planar 4:2:2 intermediate ([`crate::codec::planar`]),
//!   optional temporal differential coding, zlib per band.
//! - `Jpeg`: RGB rows encoded as an independent JPEG per band.

use crate::codec::{differential, planar};
use crate::config::{BandErrorPolicy, CompressionConfig, CompressorKind};
use crate::container::{Frame, MAX_DIMENSION};
use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbImage;
use std::io::{Read, Write};
use std::thread;

/// Row range `[start, end)` covered by band `index` of `bands` total.
pub fn band_rows(height: usize, bands: usize, index: usize) -> (usize, usize) {
    let start = index * height / bands;
    let end = ((index + 1) * height / bands).min(height);
    (start, end)
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::InvalidConfig(format!(
            "unsupported frame dimensions {}x{}",
            width, height
        )));
    }
    Ok(())
}

/// Split `buf` into consecutive chunks of the given sizes.
fn split_sizes<'a>(mut buf: &'a mut [u8], sizes: &[usize]) -> Vec<&'a mut [u8]> {
    let mut out = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let (head, tail) = buf.split_at_mut(size);
        out.push(head);
        buf = tail;
    }
    out
}

fn compress_band_zlib(
    rgb_band: &[u8],
    width: usize,
    rows: usize,
    level: u32,
    prev: Option<&mut [u8]>,
) -> Result<Vec<u8>> {
    let plen = planar::planar_len(width, rows);
    let mut band = vec![0u8; plen];
    planar::forward(rgb_band, width, rows, &mut band);

    if let Some(prev) = prev {
        let mut residual = vec![0u8; plen];
        differential::encode(&band, prev, &mut residual);
        band = residual;
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(plen / 4), Compression::new(level));
    encoder
        .write_all(&band)
        .map_err(|e| Error::Compression(format!("zlib encode: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("zlib encode: {}", e)))
}

fn compress_band_jpeg(rgb_band: &[u8], width: usize, rows: usize, quality: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality as u8);
    encoder
        .encode(
            rgb_band,
            width as u32,
            rows as u32,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| Error::Compression(format!("jpeg encode: {}", e)))?;
    Ok(out)
}

fn decode_band_zlib(
    part: &[u8],
    width: usize,
    rows: usize,
    prev: Option<&mut [u8]>,
    rgb_band: &mut [u8],
) -> Result<()> {
    let plen = planar::planar_len(width, rows);
    let mut decoded = Vec::with_capacity(plen);
    ZlibDecoder::new(part)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Compression(format!("zlib decode: {}", e)))?;
    if decoded.len() != plen {
        return Err(Error::Compression(format!(
            "band decoded to {} bytes, expected {}",
            decoded.len(),
            plen
        )));
    }

    match prev {
        Some(prev) => {
            differential::decode(&decoded, prev);
            planar::inverse(prev, width, rows, rgb_band);
        }
        None => planar::inverse(&decoded, width, rows, rgb_band),
    }
    Ok(())
}

fn decode_band_jpeg(part: &[u8], width: usize, rows: usize, rgb_band: &mut [u8]) -> Result<()> {
    let image = image::load_from_memory_with_format(part, image::ImageFormat::Jpeg)
        .map_err(|e| Error::Compression(format!("jpeg decode: {}", e)))?
        .into_rgb8();
    if image.width() as usize != width || image.height() as usize != rows {
        return Err(Error::Compression(format!(
            "jpeg band is {}x{}, expected {}x{}",
            image.width(),
            image.height(),
            width,
            rows
        )));
    }
    rgb_band.copy_from_slice(image.as_raw());
    Ok(())
}

/// Parallel band compressor. Holds the differential reference between frames,
/// so one instance serves exactly one stream.
pub struct FrameCompressor {
    width: usize,
    height: usize,
    bands: usize,
    config: CompressionConfig,
    /// Planar reference of the previous frame, differential mode only
    prev: Option<Vec<u8>>,
}

impl FrameCompressor {
    /// Create a compressor for a stream of `width`x`height` RGB frames split
    /// across `workers` bands. The worker count is clamped to `[1, height]`
    /// so every band is non-empty and the part count is constant.
    pub fn new(width: u32, height: u32, workers: usize, config: CompressionConfig) -> Result<Self> {
        config.validate()?;
        check_dimensions(width, height)?;
        let bands = workers.clamp(1, height as usize);
        let prev = config
            .differential
            .then(|| vec![0u8; planar::planar_len(width as usize, height as usize)]);
        Ok(Self {
            width: width as usize,
            height: height as usize,
            bands,
            config,
            prev,
        })
    }

    /// Number of bands (= parts per frame) this stream produces.
    pub fn band_count(&self) -> usize {
        self.bands
    }

    /// Compress one frame. Blocks until every band is done.
    pub fn compress(&mut self, image: &RgbImage, timestamp: f64) -> Result<Frame> {
        if image.width() as usize != self.width || image.height() as usize != self.height {
            return Err(Error::InvalidConfig(format!(
                "frame is {}x{}, stream is {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }

        let (width, height, bands) = (self.width, self.height, self.bands);
        let raw = image.as_raw().as_slice();
        let kind = self.config.kind;
        let level = self.config.level;

        // Per-band views into the shared differential reference.
        let band_sizes: Vec<usize> = (0..bands)
            .map(|i| {
                let (r0, r1) = band_rows(height, bands, i);
                planar::planar_len(width, r1 - r0)
            })
            .collect();
        let mut prev_slices: Vec<Option<&mut [u8]>> = match self.prev.as_mut() {
            Some(prev) => split_sizes(prev, &band_sizes).into_iter().map(Some).collect(),
            None => (0..bands).map(|_| None).collect(),
        };

        let mut results: Vec<Result<Vec<u8>>> = Vec::with_capacity(bands);
        thread::scope(|s| {
            let mut handles = Vec::with_capacity(bands);
            for (i, prev) in prev_slices.drain(..).enumerate() {
                let (r0, r1) = band_rows(height, bands, i);
                let rgb_band = &raw[r0 * width * 3..r1 * width * 3];
                handles.push(s.spawn(move || match kind {
                    CompressorKind::RawZlib => {
                        compress_band_zlib(rgb_band, width, r1 - r0, level, prev)
                    }
                    CompressorKind::Jpeg => compress_band_jpeg(rgb_band, width, r1 - r0, level),
                }));
            }
            for handle in handles {
                results.push(
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Other("band worker panicked".to_string()))),
                );
            }
        });

        let mut parts = Vec::with_capacity(bands);
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(part) => parts.push(part),
                Err(e) => match self.config.band_errors {
                    BandErrorPolicy::Strict => return Err(e),
                    BandErrorPolicy::Lenient => {
                        log::warn!("band {} compression failed, shipping empty part: {}", i, e);
                        parts.push(Vec::new());
                    }
                },
            }
        }

        Ok(Frame {
            width: self.width as u32,
            height: self.height as u32,
            timestamp,
            parts,
        })
    }
}

/// Parallel band decompressor, the inverse of [`FrameCompressor`].
pub struct FrameDecompressor {
    width: usize,
    height: usize,
    config: CompressionConfig,
    prev: Option<Vec<u8>>,
    /// Part count of the stream, latched from the first frame
    expected_parts: Option<usize>,
}

impl FrameDecompressor {
    pub fn new(width: u32, height: u32, config: CompressionConfig) -> Result<Self> {
        config.validate()?;
        check_dimensions(width, height)?;
        let prev = config
            .differential
            .then(|| vec![0u8; planar::planar_len(width as usize, height as usize)]);
        Ok(Self {
            width: width as usize,
            height: height as usize,
            config,
            prev,
            expected_parts: None,
        })
    }

    /// Reset the differential reference (playback restarted from frame 0).
    pub fn reset(&mut self) {
        if let Some(prev) = self.prev.as_mut() {
            prev.fill(0);
        }
    }

    /// Decompress one frame into an RGB image. Blocks until every band is
    /// done. Failed bands follow the configured [`BandErrorPolicy`]: strict
    /// surfaces a retryable error, lenient leaves the band zeroed and logs.
    pub fn decompress(&mut self, frame: &Frame) -> Result<RgbImage> {
        if frame.width as usize != self.width || frame.height as usize != self.height {
            return Err(Error::MalformedHeader(format!(
                "frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        let bands = frame.parts.len();
        if bands == 0 || bands > self.height {
            return Err(Error::MalformedHeader(format!(
                "{} parts for a {}-row frame",
                bands, self.height
            )));
        }
        // Part count is fixed at stream-open time; a change means the sender
        // and receiver disagree about the stream.
        match self.expected_parts {
            None => self.expected_parts = Some(bands),
            Some(expected) if expected != bands => {
                return Err(Error::MalformedHeader(format!(
                    "part count changed mid-stream: {} -> {}",
                    expected, bands
                )));
            }
            Some(_) => {}
        }

        let (width, height) = (self.width, self.height);
        let kind = self.config.kind;

        let band_sizes: Vec<usize> = (0..bands)
            .map(|i| {
                let (r0, r1) = band_rows(height, bands, i);
                planar::planar_len(width, r1 - r0)
            })
            .collect();
        let rgb_sizes: Vec<usize> = (0..bands)
            .map(|i| {
                let (r0, r1) = band_rows(height, bands, i);
                (r1 - r0) * width * 3
            })
            .collect();

        let mut rgb = vec![0u8; width * height * 3];
        let mut rgb_slices = split_sizes(&mut rgb, &rgb_sizes);
        let mut prev_slices: Vec<Option<&mut [u8]>> = match self.prev.as_mut() {
            Some(prev) => split_sizes(prev, &band_sizes).into_iter().map(Some).collect(),
            None => (0..bands).map(|_| None).collect(),
        };

        let mut results: Vec<Result<()>> = Vec::with_capacity(bands);
        thread::scope(|s| {
            let mut handles = Vec::with_capacity(bands);
            for (i, (rgb_band, prev)) in rgb_slices.drain(..).zip(prev_slices.drain(..)).enumerate()
            {
                let (r0, r1) = band_rows(height, bands, i);
                let part = frame.parts[i].as_slice();
                handles.push(s.spawn(move || match kind {
                    CompressorKind::RawZlib => {
                        decode_band_zlib(part, width, r1 - r0, prev, rgb_band)
                    }
                    CompressorKind::Jpeg => decode_band_jpeg(part, width, r1 - r0, rgb_band),
                }));
            }
            for handle in handles {
                results.push(
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Other("band worker panicked".to_string()))),
                );
            }
        });

        for (i, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                match self.config.band_errors {
                    BandErrorPolicy::Strict => {
                        log::error!("band {} decode failed: {}", i, e);
                        return Err(Error::Retry);
                    }
                    BandErrorPolicy::Lenient => {
                        log::warn!("band {} decode failed, leaving it zeroed: {}", i, e);
                    }
                }
            }
        }

        RgbImage::from_raw(self.width as u32, self.height as u32, rgb)
            .ok_or_else(|| Error::Other("image buffer size mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionConfig;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 3 + y * 5) % 64) as u8;
            image::Rgb([v, v, v])
        })
    }

    fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb(rgb))
    }

    #[test]
    fn test_band_rows_cover_height_exactly() {
        for (height, bands) in [(48, 4), (48, 5), (7, 3), (1, 1), (10, 10)] {
            let mut covered = 0;
            for i in 0..bands {
                let (r0, r1) = band_rows(height, bands, i);
                assert_eq!(r0, covered, "band {} of {}x{}", i, height, bands);
                covered = r1;
            }
            assert_eq!(covered, height);
        }
    }

    #[test]
    fn test_zlib_roundtrip_multiband() {
        let image = gradient_image(64, 48);
        let mut compressor =
            FrameCompressor::new(64, 48, 4, CompressionConfig::raw_zlib(6)).unwrap();
        let mut decompressor =
            FrameDecompressor::new(64, 48, CompressionConfig::raw_zlib(6)).unwrap();

        let frame = compressor.compress(&image, 0.5).unwrap();
        assert_eq!(frame.parts.len(), 4);
        assert_eq!(frame.timestamp, 0.5);

        let out = decompressor.decompress(&frame).unwrap();
        assert_eq!(out.as_raw(), image.as_raw());
    }

    #[test]
    fn test_zlib_differential_sequence() {
        let config = CompressionConfig::raw_zlib(6).with_differential(true);
        let mut compressor = FrameCompressor::new(64, 48, 3, config).unwrap();
        let mut decompressor = FrameDecompressor::new(64, 48, config).unwrap();

        for i in 0..10u8 {
            let image = solid_image(64, 48, [i, 0, 0]);
            let frame = compressor.compress(&image, i as f64).unwrap();
            let out = decompressor.decompress(&frame).unwrap();
            assert_eq!(out.as_raw(), image.as_raw(), "frame {}", i);
        }
    }

    #[test]
    fn test_worker_clamp_keeps_part_count_stable() {
        // More workers than rows: band count must clamp to the row count.
        let compressor = FrameCompressor::new(32, 4, 16, CompressionConfig::raw_zlib(1)).unwrap();
        assert_eq!(compressor.band_count(), 4);
    }

    #[test]
    fn test_jpeg_roundtrip_near_exact_on_flat_content() {
        let image = solid_image(48, 32, [120, 60, 200]);
        let mut compressor = FrameCompressor::new(48, 32, 2, CompressionConfig::jpeg(95)).unwrap();
        let mut decompressor = FrameDecompressor::new(48, 32, CompressionConfig::jpeg(95)).unwrap();

        let frame = compressor.compress(&image, 0.0).unwrap();
        let out = decompressor.decompress(&frame).unwrap();

        for (a, b) in out.as_raw().iter().zip(image.as_raw()) {
            assert!(
                (*a as i32 - *b as i32).abs() <= 4,
                "jpeg drifted: {} vs {}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_lenient_corrupt_band_is_zeroed() {
        let image = gradient_image(64, 48);
        let config = CompressionConfig::raw_zlib(6);
        let mut compressor = FrameCompressor::new(64, 48, 4, config).unwrap();
        let mut decompressor = FrameDecompressor::new(64, 48, config).unwrap();

        let mut frame = compressor.compress(&image, 0.0).unwrap();
        frame.parts[2] = vec![0xDE, 0xAD, 0xBE, 0xEF];

        let out = decompressor.decompress(&frame).unwrap();
        let (r0, r1) = band_rows(48, 4, 2);
        // Failed band zeroed, neighbors intact
        assert!(out.as_raw()[r0 * 64 * 3..r1 * 64 * 3].iter().all(|&b| b == 0));
        assert_eq!(
            &out.as_raw()[..r0 * 64 * 3],
            &image.as_raw()[..r0 * 64 * 3]
        );
    }

    #[test]
    fn test_strict_corrupt_band_is_retryable() {
        let image = gradient_image(64, 48);
        let config = CompressionConfig::raw_zlib(6).with_band_errors(BandErrorPolicy::Strict);
        let mut compressor = FrameCompressor::new(64, 48, 4, config).unwrap();
        let mut decompressor = FrameDecompressor::new(64, 48, config).unwrap();

        let mut frame = compressor.compress(&image, 0.0).unwrap();
        frame.parts[0] = vec![1, 2, 3];

        assert!(matches!(decompressor.decompress(&frame), Err(Error::Retry)));
    }

    #[test]
    fn test_part_count_change_rejected() {
        let image = gradient_image(64, 48);
        let config = CompressionConfig::raw_zlib(6);
        let mut compressor = FrameCompressor::new(64, 48, 4, config).unwrap();
        let mut decompressor = FrameDecompressor::new(64, 48, config).unwrap();

        let frame = compressor.compress(&image, 0.0).unwrap();
        decompressor.decompress(&frame).unwrap();

        let mut fewer = frame.clone();
        fewer.parts.truncate(2);
        assert!(decompressor.decompress(&fewer).is_err());
    }
}
