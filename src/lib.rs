//! drishti-stream - frame streaming and storage for a real-time vision
//! pipeline.
//!
//! Compressed video frames move through a self-describing binary container
//! ([`container`]) produced by a parallel per-row-band compressor ([`codec`])
//! and are delivered to one of three transports:
//!
//! - a seekable on-disk format with an asynchronous writer thread ([`disk`]),
//! - a TCP fan-out server broadcasting to many clients ([`streaming::tcp_server`]),
//! - a rate-paced lossy UDP stream ([`streaming::udp_sender`]).
//!
//! Readers run the inverse path: transport, container parse, band
//! decompression. Receivers resynchronize on the frame marker, so joining a
//! stream mid-flight or losing packets costs frames, never correctness.

pub mod codec;
pub mod config;
pub mod container;
pub mod disk;
pub mod error;
pub mod streaming;

// Re-export commonly used types
pub use codec::{FrameCompressor, FrameDecompressor};
pub use config::{AppConfig, BandErrorPolicy, CompressionConfig, CompressorKind};
pub use container::Frame;
pub use disk::{FormatVersion, VideoReader, VideoWriter};
pub use error::{Error, Result};
