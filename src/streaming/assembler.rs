//! Byte-stream to frame resynchronization.
//!
//! TCP delivers the container stream with no alignment between socket reads
//! and frame boundaries, so the receive side scans for the frame marker,
//! parses the header, and accumulates bytes until the declared frame size is
//! reached. A marker that shows up *inside* an incomplete frame means the
//! previous frame was truncated (sender restart, corruption): the partial
//! frame is discarded and reconstruction restarts at the new marker.
//!
//! Malformed input never fails the stream; it costs frames and a warning.

use crate::container::{self, Frame, FRAME_MARKER, PREFIX_LEN};

/// Incremental frame assembler over an unaligned byte stream.
#[derive(Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered (incomplete frame tail).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed received bytes, returning every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            // Resynchronize on the marker.
            match container::find_marker(&self.buf) {
                Some(0) => {}
                Some(skip) => {
                    log::debug!("resync: skipping {} bytes before marker", skip);
                    self.buf.drain(..skip);
                }
                None => {
                    // Keep only a potential marker prefix at the tail.
                    if self.buf.len() >= FRAME_MARKER.len() {
                        let drop = self.buf.len() - (FRAME_MARKER.len() - 1);
                        self.buf.drain(..drop);
                    }
                    return frames;
                }
            }

            if self.buf.len() < PREFIX_LEN {
                return frames;
            }

            let header = match container::parse_header(&self.buf) {
                Ok(header) => header,
                Err(e) => {
                    // Corrupt header behind a genuine-looking marker: skip the
                    // marker byte and rescan.
                    log::warn!("discarding corrupt frame header: {}", e);
                    self.buf.drain(..1);
                    continue;
                }
            };
            let total = header.frame_len();

            // A second marker inside the declared frame region means this
            // frame was cut short; restart at the new marker.
            let window = total.min(self.buf.len());
            if let Some(next) = container::find_marker(&self.buf[1..window]) {
                log::warn!(
                    "truncated frame detected ({} of {} bytes), resyncing",
                    next + 1,
                    total
                );
                self.buf.drain(..next + 1);
                continue;
            }

            if self.buf.len() < total {
                return frames;
            }

            match container::parse(&self.buf[..total]) {
                Ok(frame) => {
                    self.buf.drain(..total);
                    frames.push(frame);
                }
                Err(e) => {
                    log::warn!("discarding unparseable frame: {}", e);
                    self.buf.drain(..1);
                }
            }
        }
    }
}
