//! Rate-paced UDP frame sender.
//!
//! Frames are fragmented into fixed-size packets and sent in bursts of
//! `2^burst_log2`; after each burst the pacer sleeps until
//! `burst_start + burst_bytes * 8 / max_rate_bps`, capping the instantaneous
//! send rate regardless of compression ratio so the unreliable transport
//! does not saturate the link and induce its own loss. Deadlines are
//! computed on `Instant`, so there is no floating-point clock to lose
//! precision over long runs.
//!
//! The transport is lossy by design: when the sender falls behind, whole
//! frames are dropped at the enqueue side rather than buffered unboundedly.

use crate::container::{self, Frame};
use crate::error::{Error, Result};
use crate::streaming::packet::{PacketHeader, DEFAULT_APP_ID, PACKET_HEADER_LEN};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default port of the UDP frame stream.
pub const DEFAULT_UDP_PORT: u16 = 24779;

/// Frames the send thread may have queued before new ones are dropped.
const SEND_CHANNEL_DEPTH: usize = 4;

/// Send thread poll interval for the shutdown flag.
const SEND_POLL: Duration = Duration::from_millis(200);

/// Fragmentation and pacing parameters, captured at sender creation.
#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    /// Send-rate ceiling in bits per second
    pub max_rate_bps: u64,
    /// Datagram size in bytes, header included
    pub packet_size: usize,
    /// Packets per burst as a power of two
    pub burst_log2: u32,
    /// Application id stamped into every packet
    pub app_id: u32,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            max_rate_bps: 120_000_000,
            packet_size: 1400,
            burst_log2: 3,
            app_id: DEFAULT_APP_ID,
        }
    }
}

impl PacerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.packet_size <= PACKET_HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "packet size {} leaves no payload room",
                self.packet_size
            )));
        }
        if self.packet_size > 65_507 {
            return Err(Error::InvalidConfig(format!(
                "packet size {} exceeds a UDP datagram",
                self.packet_size
            )));
        }
        if self.max_rate_bps == 0 {
            return Err(Error::InvalidConfig("max_rate_bps must be nonzero".to_string()));
        }
        if self.burst_log2 > 16 {
            return Err(Error::InvalidConfig(format!(
                "burst_log2 {} out of range 0-16",
                self.burst_log2
            )));
        }
        Ok(())
    }

    /// Container bytes carried per packet.
    pub fn data_size(&self) -> usize {
        self.packet_size - PACKET_HEADER_LEN
    }
}

/// Sending end of the UDP frame stream.
pub struct UdpFrameSender {
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    dest: SocketAddr,
    closed: bool,
}

impl UdpFrameSender {
    /// Create the sender and start its send thread.
    pub fn new(dest: SocketAddr, config: PacerConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(dest)?;

        let (tx, rx) = bounded::<Vec<u8>>(SEND_CHANNEL_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("udp-send".to_string())
            .spawn(move || send_loop(socket, rx, config, thread_shutdown))
            .map_err(|e| Error::Other(format!("failed to spawn UDP sender: {}", e)))?;

        log::info!(
            "UDP frame sender to {} ({} Mbit/s cap, {} byte packets)",
            dest,
            config.max_rate_bps / 1_000_000,
            config.packet_size
        );

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            shutdown,
            dest,
            closed: false,
        })
    }

    /// Serialize and enqueue one frame. Drops the frame (and says so at
    /// debug level) when the send thread is backed up.
    pub fn write(&self, frame: &Frame) -> Result<()> {
        self.write_serialized(container::serialize(frame))
    }

    /// Enqueue an already-serialized frame.
    pub fn write_serialized(&self, bytes: Vec<u8>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::Closed)?;
        match tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("UDP sender to {} backed up, frame dropped", self.dest);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::Closed),
        }
    }

    /// Stop and join the send thread. Idempotent; also runs from `Drop`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        drop(self.tx.take());
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        log::info!("UDP frame sender to {} stopped", self.dest);
    }
}

impl Drop for UdpFrameSender {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_loop(
    socket: UdpSocket,
    rx: Receiver<Vec<u8>>,
    config: PacerConfig,
    shutdown: Arc<AtomicBool>,
) {
    let data_size = config.data_size();
    let burst_packets = 1u32 << config.burst_log2;
    let mut packet = vec![0u8; config.packet_size];
    let mut packet_seq: u32 = 0;
    let mut frame_seq: u32 = 0;

    let mut burst_start = Instant::now();
    let mut burst_bytes: u64 = 0;
    let mut burst_count: u32 = 0;

    loop {
        let bytes = match rx.recv_timeout(SEND_POLL) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                // Idle: restart the pacing window so a quiet period is not
                // credited against the next burst.
                burst_start = Instant::now();
                burst_bytes = 0;
                burst_count = 0;
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let total_parts = bytes.len().div_ceil(data_size);
        if total_parts > u16::MAX as usize {
            log::warn!(
                "frame of {} bytes needs {} fragments, skipping",
                bytes.len(),
                total_parts
            );
            continue;
        }

        for (index, chunk) in bytes.chunks(data_size).enumerate() {
            let header = PacketHeader {
                app_id: config.app_id,
                packet_seq,
                frame_seq,
                index_in_frame: index as u32,
                total_parts: total_parts as u16,
            };
            packet[..PACKET_HEADER_LEN].copy_from_slice(&header.to_bytes());
            packet[PACKET_HEADER_LEN..PACKET_HEADER_LEN + chunk.len()].copy_from_slice(chunk);

            let wire_len = PACKET_HEADER_LEN + chunk.len();
            if let Err(e) = socket.send(&packet[..wire_len]) {
                // UDP send errors are not fatal; the frame is simply lossier.
                log::warn!("UDP send failed: {}", e);
            }
            packet_seq = packet_seq.wrapping_add(1);
            burst_bytes += wire_len as u64;
            burst_count += 1;

            if burst_count >= burst_packets {
                let deadline = burst_start
                    + Duration::from_secs_f64(burst_bytes as f64 * 8.0 / config.max_rate_bps as f64);
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                burst_start = Instant::now();
                burst_bytes = 0;
                burst_count = 0;
            }
        }
        frame_seq = frame_seq.wrapping_add(1);
    }
    log::debug!("UDP send thread exiting");
}
