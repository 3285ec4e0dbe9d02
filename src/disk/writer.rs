//! Asynchronous disk writer with a dedicated writer thread.
//!
//! `write()` compresses on the caller's thread (fork-join across the band
//! workers), serializes into whichever of two alternating buffers is free,
//! and hands it to the writer thread. The two buffers circulate through a
//! pair of bounded channels, so compression of frame N+1 overlaps with the
//! disk write of frame N and at most one serialized frame is ever in flight.
//! `write()` only blocks when both buffers are held by the writer — that is,
//! on actual disk latency, not on compression.

use crate::codec::FrameCompressor;
use crate::config::{CompressionConfig, CompressorKind};
use crate::container;
use crate::disk::format::{write_footer, FileHeader, FormatVersion, FOOTER_OFFSET_POS};
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Frame index growth chunk: offsets and timestamps are reserved in blocks
/// of this many entries to amortize reallocation.
const INDEX_CHUNK: usize = 1024;

/// Writer thread poll interval for the shutdown flag.
const WRITER_POLL: Duration = Duration::from_millis(200);

/// Seekable video file writer.
///
/// Always produces the current format version. Close is idempotent and also
/// runs from `Drop`, so the writer thread never outlives the value.
pub struct VideoWriter {
    compressor: FrameCompressor,
    free_rx: Receiver<Vec<u8>>,
    full_tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<File>>,
    shutdown: Arc<AtomicBool>,
    write_error: Arc<Mutex<Option<String>>>,
    offsets: Vec<i64>,
    timestamps: Vec<f64>,
    next_offset: i64,
    path: PathBuf,
    closed: bool,
}

impl VideoWriter {
    /// Create a new video file and start the writer thread. Returns once the
    /// thread has signalled readiness; fails if thread setup fails.
    ///
    /// Disk streams always use the zlib band codec (the on-disk format stores
    /// zlib planar parts); JPEG configs are rejected here.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        config: CompressionConfig,
        workers: usize,
    ) -> Result<Self> {
        config.validate()?;
        if config.kind != CompressorKind::RawZlib {
            return Err(Error::InvalidConfig(
                "disk streams support only the raw_zlib codec".to_string(),
            ));
        }
        let compressor = FrameCompressor::new(width, height, workers, config)?;

        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        FileHeader::write_current(&mut file, config.differential, width, height)?;

        // Two buffers circulate between the caller and the writer thread.
        let (free_tx, free_rx) = bounded::<Vec<u8>>(2);
        let (full_tx, full_rx) = bounded::<Vec<u8>>(2);
        for _ in 0..2 {
            free_tx
                .send(Vec::new())
                .map_err(|_| Error::Other("buffer channel closed at startup".to_string()))?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let write_error = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = bounded::<()>(1);

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_error = Arc::clone(&write_error);
        let handle = thread::Builder::new()
            .name("disk-writer".to_string())
            .spawn(move || {
                writer_loop(file, full_rx, free_tx, thread_shutdown, thread_error, ready_tx)
            })
            .map_err(|e| Error::Other(format!("failed to spawn disk writer: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Other("disk writer thread died during startup".to_string()))?;

        log::info!(
            "recording {}x{} video to {} (level {}, differential {})",
            width,
            height,
            path.display(),
            config.level,
            config.differential
        );

        Ok(Self {
            compressor,
            free_rx,
            full_tx: Some(full_tx),
            handle: Some(handle),
            shutdown,
            write_error,
            offsets: Vec::with_capacity(INDEX_CHUNK),
            timestamps: Vec::with_capacity(INDEX_CHUNK),
            next_offset: FormatVersion::CURRENT.header_len() as i64,
            path,
            closed: false,
        })
    }

    /// Compress and enqueue one frame. Blocks on the previous frame's disk
    /// write only when both buffers are in flight.
    pub fn write(&mut self, image: &RgbImage, timestamp: f64) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if let Some(e) = self.take_write_error() {
            return Err(Error::Other(format!("disk write failed: {}", e)));
        }

        let frame = self.compressor.compress(image, timestamp)?;

        let mut buf = self.free_rx.recv().map_err(|_| Error::Closed)?;
        buf.clear();
        let written = container::serialize_into(&frame, &mut buf);

        if self.offsets.len() == self.offsets.capacity() {
            self.offsets.reserve(INDEX_CHUNK);
            self.timestamps.reserve(INDEX_CHUNK);
        }
        self.offsets.push(self.next_offset);
        self.timestamps.push(timestamp);
        self.next_offset += written as i64;

        self.full_tx
            .as_ref()
            .ok_or(Error::Closed)?
            .send(buf)
            .map_err(|_| Error::Closed)?;
        Ok(())
    }

    /// Number of frames enqueued so far.
    pub fn frame_count(&self) -> usize {
        self.offsets.len()
    }

    /// Stop the writer thread, append the footer, and rewrite the footer
    /// placeholder. Idempotent: a second call is a no-op returning Ok.
    ///
    /// If the footer write fails the file handle is still released and the
    /// error reported.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Disconnect the frame channel; the writer drains what is queued and
        // exits, handing the file back.
        drop(self.full_tx.take());
        self.shutdown.store(true, Ordering::Relaxed);

        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        let mut file = handle
            .join()
            .map_err(|_| Error::Other("disk writer thread panicked".to_string()))?;

        if let Some(e) = self.take_write_error() {
            // File handle drops here; the recording is a recoverable
            // (footer-less) file.
            return Err(Error::Other(format!("disk write failed: {}", e)));
        }

        let footer_offset = file.seek(SeekFrom::End(0))? as i64;
        write_footer(&mut file, &self.offsets, &self.timestamps)?;
        file.seek(SeekFrom::Start(FOOTER_OFFSET_POS))?;
        file.write_all(&footer_offset.to_le_bytes())?;
        file.sync_all()?;

        log::info!(
            "closed {} ({} frames, footer at {})",
            self.path.display(),
            self.offsets.len(),
            footer_offset
        );
        Ok(())
    }

    fn take_write_error(&self) -> Option<String> {
        self.write_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("closing {} on drop failed: {}", self.path.display(), e);
        }
    }
}

/// Writer thread body: drain serialized frames to disk, hand buffers back.
/// The first write error is recorded and later frames are discarded so the
/// producer never deadlocks on a dead disk.
fn writer_loop(
    mut file: File,
    full_rx: Receiver<Vec<u8>>,
    free_tx: Sender<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    write_error: Arc<Mutex<Option<String>>>,
    ready_tx: Sender<()>,
) -> File {
    let _ = ready_tx.send(());

    loop {
        match full_rx.recv_timeout(WRITER_POLL) {
            Ok(buf) => {
                let failed = write_error
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .is_some();
                if !failed {
                    if let Err(e) = file.write_all(&buf) {
                        log::error!("disk write failed: {}", e);
                        *write_error.lock().unwrap_or_else(|e| e.into_inner()) =
                            Some(e.to_string());
                    }
                }
                // Hand the buffer back even after a failure so the producer
                // unblocks and observes the recorded error.
                if free_tx.send(buf).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("disk writer thread exiting");
    file
}
