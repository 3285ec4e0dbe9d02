//! UDP packet header.
//!
//! Every datagram carries a 20-byte header followed by a fragment of the
//! serialized container bytes; the first fragment of a frame begins with the
//! container marker.
//!
//! ```text
//! ┌────────────┬─────────────────┬────────────────┬──────────────────┬─────────────────┬───────────────┐
//! │ app_id(u32)│ packet_seq(u32) │ frame_seq(u32) │ index_in_frame   │ total_parts(u16)│ reserved(u16) │
//! │            │                 │                │ (u32)            │                 │               │
//! └────────────┴─────────────────┴────────────────┴──────────────────┴─────────────────┴───────────────┘
//! ```

use crate::error::{Error, Result};

/// Serialized header size in bytes.
pub const PACKET_HEADER_LEN: usize = 20;

/// Default application id stamped into packet headers ("DVID").
pub const DEFAULT_APP_ID: u32 = 0x4456_4944;

/// Fragment header prefixed to every UDP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Stream identity; datagrams with a foreign id are ignored
    pub app_id: u32,
    /// Monotonic per-packet counter (wraps)
    pub packet_seq: u32,
    /// Monotonic per-frame counter (wraps)
    pub frame_seq: u32,
    /// Fragment position within the frame
    pub index_in_frame: u32,
    /// Fragment count of the frame
    pub total_parts: u16,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut buf = [0u8; PACKET_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.app_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.packet_seq.to_le_bytes());
        buf[8..12].copy_from_slice(&self.frame_seq.to_le_bytes());
        buf[12..16].copy_from_slice(&self.index_in_frame.to_le_bytes());
        buf[16..18].copy_from_slice(&self.total_parts.to_le_bytes());
        // reserved stays zero
        buf
    }

    /// Decode and validate a header from the front of a datagram.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < PACKET_HEADER_LEN {
            return Err(Error::MalformedHeader(format!(
                "datagram of {} bytes is shorter than the packet header",
                buf.len()
            )));
        }
        let header = Self {
            app_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            packet_seq: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            frame_seq: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            index_in_frame: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            total_parts: u16::from_le_bytes([buf[16], buf[17]]),
        };
        if header.total_parts == 0 || header.index_in_frame as usize >= header.total_parts as usize
        {
            return Err(Error::MalformedHeader(format!(
                "fragment index {} of {}",
                header.index_in_frame, header.total_parts
            )));
        }
        Ok(header)
    }
}
