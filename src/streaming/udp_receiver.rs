//! UDP frame receiver with loss-intolerant reassembly.
//!
//! Fragments of one frame may arrive out of order and are copied into the
//! reassembly buffer at `index * data_size`; the frame is delivered only
//! when every fragment of the declared byte length has arrived. UDP offers
//! no retransmission, so a fragment that never arrives costs exactly that
//! whole frame: the moment a fragment of a *different* frame shows up
//! mid-assembly, the in-progress buffer is discarded and reassembly
//! restarts. A dropped packet can therefore never produce a corrupted frame,
//! only a skipped one.
//!
//! The declared frame size is validated against the container sanity caps
//! before the reassembly buffer is sized from it — a garbage or hostile
//! `total_parts`/length field cannot drive allocation.

use crate::container::{self, Frame, PREFIX_LEN};
use crate::error::{Error, Result};
use crate::streaming::packet::{PacketHeader, DEFAULT_APP_ID, PACKET_HEADER_LEN};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Completed frames buffered for the consumer.
const FRAME_CHANNEL_CAPACITY: usize = 4;

/// Socket timeout; bounds shutdown-flag latency.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest possible datagram.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct UdpReceiverConfig {
    /// Address to bind the UDP socket (e.g. "0.0.0.0:24779")
    pub bind_addr: String,
    /// Application id; datagrams with any other id are ignored
    pub app_id: u32,
}

impl Default for UdpReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", crate::streaming::DEFAULT_UDP_PORT),
            app_id: DEFAULT_APP_ID,
        }
    }
}

/// Fragment-to-frame reassembly state machine, separated from the socket so
/// loss behavior is directly testable.
pub struct Reassembler {
    app_id: u32,
    /// Frame sequence being assembled, if any
    cur_seq: Option<u32>,
    buf: Vec<u8>,
    total_len: usize,
    total_parts: u16,
    data_size: usize,
    received: Vec<bool>,
    received_parts: usize,
    received_bytes: usize,
    /// Frames abandoned because a fragment went missing
    dropped_frames: u64,
}

impl Reassembler {
    pub fn new(app_id: u32) -> Self {
        Self {
            app_id,
            cur_seq: None,
            buf: Vec::new(),
            total_len: 0,
            total_parts: 0,
            data_size: 0,
            received: Vec::new(),
            received_parts: 0,
            received_bytes: 0,
            dropped_frames: 0,
        }
    }

    /// Frames abandoned so far because of fragment loss.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn abandon(&mut self) {
        if self.cur_seq.take().is_some() {
            self.dropped_frames += 1;
            log::debug!(
                "abandoning frame ({} of {} fragments arrived)",
                self.received_parts,
                self.total_parts
            );
        }
    }

    /// Feed one datagram; returns a frame when reassembly completes.
    pub fn push(&mut self, datagram: &[u8]) -> Option<Frame> {
        let header = match PacketHeader::from_bytes(datagram) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("ignoring bad datagram: {}", e);
                return None;
            }
        };
        if header.app_id != self.app_id {
            return None;
        }
        let payload = &datagram[PACKET_HEADER_LEN..];
        if payload.is_empty() {
            return None;
        }

        // A fragment of a different frame while one is in progress means a
        // fragment of the old frame was lost.
        if let Some(cur) = self.cur_seq {
            if header.frame_seq != cur {
                self.abandon();
            }
        }

        if header.index_in_frame == 0 {
            self.abandon();
            self.start_frame(&header, payload);
        } else if self.cur_seq == Some(header.frame_seq) {
            self.add_fragment(&header, payload);
        }
        // Fragments with no frame in progress (their first fragment was
        // lost) are dropped on the floor.

        self.try_finish()
    }

    fn start_frame(&mut self, header: &PacketHeader, payload: &[u8]) {
        // The first fragment must begin with the container marker; scan to
        // confirm rather than trusting the index field alone.
        match container::find_marker(payload) {
            Some(0) => {}
            found => {
                log::debug!("first fragment without leading marker ({:?})", found);
                return;
            }
        }
        if payload.len() < PREFIX_LEN {
            log::debug!("first fragment too short for a container prefix");
            return;
        }
        let container_header = match container::parse_header(payload) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("undecodable frame start: {}", e);
                return;
            }
        };

        // parse_header caps the declared size; only now is the buffer sized
        // from network-controlled input.
        let total_len = container_header.frame_len();
        let total_parts = header.total_parts as usize;
        if total_len > (total_parts.saturating_mul(payload.len())).max(payload.len()) {
            log::debug!(
                "frame of {} bytes cannot fit in {} fragments of {}",
                total_len,
                total_parts,
                payload.len()
            );
            return;
        }

        self.cur_seq = Some(header.frame_seq);
        self.total_len = total_len;
        self.total_parts = header.total_parts;
        self.data_size = payload.len();
        self.buf.clear();
        self.buf.resize(total_len, 0);
        self.received.clear();
        self.received.resize(total_parts, false);

        let take = payload.len().min(total_len);
        self.buf[..take].copy_from_slice(&payload[..take]);
        self.received[0] = true;
        self.received_parts = 1;
        self.received_bytes = take;
    }

    fn add_fragment(&mut self, header: &PacketHeader, payload: &[u8]) {
        if header.total_parts != self.total_parts {
            self.abandon();
            return;
        }
        let index = header.index_in_frame as usize;
        if self.received[index] {
            return; // duplicate
        }
        let pos = index * self.data_size;
        if pos + payload.len() > self.total_len {
            self.abandon();
            return;
        }
        self.buf[pos..pos + payload.len()].copy_from_slice(payload);
        self.received[index] = true;
        self.received_parts += 1;
        self.received_bytes += payload.len();
    }

    fn try_finish(&mut self) -> Option<Frame> {
        if self.cur_seq.is_none()
            || self.received_parts != self.total_parts as usize
            || self.received_bytes != self.total_len
        {
            return None;
        }
        self.cur_seq = None;
        match container::parse(&self.buf[..self.total_len]) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::warn!("reassembled frame failed to parse: {}", e);
                None
            }
        }
    }
}

/// Receiving end of the UDP frame stream.
///
/// Construction returns the receiver plus the channel completed frames are
/// delivered on; the caller runs [`run`](Self::run) on its own thread:
///
/// ```ignore
/// let running = Arc::new(AtomicBool::new(true));
/// let (mut receiver, frames) = UdpFrameReceiver::bind(config, Arc::clone(&running))?;
/// std::thread::spawn(move || receiver.run());
/// while let Ok(frame) = frames.recv() { /* ... */ }
/// ```
pub struct UdpFrameReceiver {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    frames_tx: Sender<Frame>,
    reassembler: Reassembler,
    started: bool,
}

impl UdpFrameReceiver {
    /// Bind the socket. Returns the receiver and the completed-frame channel.
    pub fn bind(
        config: UdpReceiverConfig,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, Receiver<Frame>)> {
        let socket = UdpSocket::bind(&config.bind_addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let (frames_tx, frames_rx) = bounded(FRAME_CHANNEL_CAPACITY);

        log::info!("UDP frame receiver bound to {}", config.bind_addr);

        Ok((
            Self {
                socket,
                running,
                frames_tx,
                reassembler: Reassembler::new(config.app_id),
                started: false,
            },
            frames_rx,
        ))
    }

    /// Actual bound address (useful with an ephemeral port).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop; call once on a dedicated thread. Exits when the running
    /// flag clears or every frame consumer is gone.
    pub fn run(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyInitialized);
        }
        self.started = true;

        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];
        while self.running.load(Ordering::Relaxed) {
            let n = match self.socket.recv_from(&mut datagram) {
                Ok((n, _)) => n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    log::error!("UDP recv error: {}", e);
                    std::thread::sleep(RECV_TIMEOUT);
                    continue;
                }
            };

            if let Some(frame) = self.reassembler.push(&datagram[..n]) {
                match self.frames_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Consumer lagging on a lossy transport: newest frame
                        // loses.
                        log::debug!("frame channel full, dropping frame");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        log::info!("all frame consumers gone, receiver exiting");
                        break;
                    }
                }
            }
        }
        log::debug!("UDP receive thread exiting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::packet::PacketHeader;

    const DATA_SIZE: usize = 64;

    fn sample_frame(seq: u8) -> Frame {
        Frame {
            width: 64,
            height: 16,
            timestamp: seq as f64,
            parts: vec![vec![seq; 150], vec![seq.wrapping_add(1); 90]],
        }
    }

    /// Fragment a frame the way the sender does.
    fn fragments(frame: &Frame, frame_seq: u32, app_id: u32) -> Vec<Vec<u8>> {
        let bytes = container::serialize(frame);
        let total_parts = bytes.len().div_ceil(DATA_SIZE) as u16;
        bytes
            .chunks(DATA_SIZE)
            .enumerate()
            .map(|(index, chunk)| {
                let header = PacketHeader {
                    app_id,
                    packet_seq: index as u32,
                    frame_seq,
                    index_in_frame: index as u32,
                    total_parts,
                };
                let mut datagram = header.to_bytes().to_vec();
                datagram.extend_from_slice(chunk);
                datagram
            })
            .collect()
    }

    #[test]
    fn test_reassembles_in_order() {
        let frame = sample_frame(1);
        let mut reassembler = Reassembler::new(7);

        let packets = fragments(&frame, 0, 7);
        assert!(packets.len() > 2);
        let mut delivered = None;
        for packet in &packets {
            delivered = reassembler.push(packet);
        }
        assert_eq!(delivered, Some(frame));
    }

    #[test]
    fn test_reassembles_out_of_order_tail() {
        let frame = sample_frame(2);
        let mut reassembler = Reassembler::new(7);

        let mut packets = fragments(&frame, 0, 7);
        let tail = packets.split_off(1);
        // First fragment first (it carries the marker), rest reversed
        let mut delivered = None;
        for packet in packets.iter().chain(tail.iter().rev()) {
            delivered = reassembler.push(packet);
        }
        assert_eq!(delivered, Some(frame));
    }

    #[test]
    fn test_lost_fragment_skips_exactly_one_frame() {
        let first = sample_frame(3);
        let second = sample_frame(4);
        let mut reassembler = Reassembler::new(7);

        let mut first_packets = fragments(&first, 0, 7);
        first_packets.remove(1); // lose one fragment
        for packet in &first_packets {
            assert_eq!(reassembler.push(packet), None);
        }

        let mut delivered = None;
        for packet in &fragments(&second, 1, 7) {
            delivered = reassembler.push(packet);
        }
        assert_eq!(delivered, Some(second));
        assert_eq!(reassembler.dropped_frames(), 1);
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let frame = sample_frame(5);
        let mut reassembler = Reassembler::new(7);

        let packets = fragments(&frame, 0, 7);
        let mut delivered = None;
        for (i, packet) in packets.iter().enumerate() {
            delivered = reassembler.push(packet);
            if i == 1 {
                assert_eq!(reassembler.push(packet), None);
            }
        }
        assert_eq!(delivered, Some(frame));
    }

    #[test]
    fn test_foreign_app_id_ignored() {
        let frame = sample_frame(6);
        let mut reassembler = Reassembler::new(7);

        for packet in &fragments(&frame, 0, 999) {
            assert_eq!(reassembler.push(packet), None);
        }
    }

    #[test]
    fn test_mid_frame_join_waits_for_next_start() {
        // A receiver that starts listening mid-frame must deliver nothing
        // until the next frame's first fragment arrives.
        let first = sample_frame(7);
        let second = sample_frame(8);
        let mut reassembler = Reassembler::new(7);

        for packet in fragments(&first, 0, 7).iter().skip(1) {
            assert_eq!(reassembler.push(packet), None);
        }
        let mut delivered = None;
        for packet in &fragments(&second, 1, 7) {
            delivered = reassembler.push(packet);
        }
        assert_eq!(delivered, Some(second));
    }
}
