//! Configuration for drishti-stream
//!
//! Two layers: `CompressionConfig` is the immutable per-stream codec
//! configuration captured at `create`/`open`/`connect` time, and `AppConfig`
//! is the TOML configuration of the replay daemon.
//!
//! Compression settings are negotiated out of band: the container wire format
//! carries no codec descriptor, so sender and receiver must be configured
//! identically (typically from the same `[compression]` TOML section).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Per-band codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressorKind {
    /// Planar 4:2:2 intermediate format compressed with zlib
    #[default]
    RawZlib,
    /// Independent JPEG per band, RGB kept as-is
    Jpeg,
}

/// What to do when a single band fails to compress or decompress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandErrorPolicy {
    /// Fail the whole frame
    Strict,
    /// Deliver the frame with the failed band zeroed (or stale when
    /// differential coding is active) and log a warning
    #[default]
    Lenient,
}

/// Immutable codec configuration, captured once when a stream is opened.
///
/// There are deliberately no setters: changing compression parameters on an
/// open stream is always rejected by construction. Build a new config and a
/// new stream instead.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CompressionConfig {
    /// Band codec
    pub kind: CompressorKind,
    /// zlib level 0-9, or JPEG quality 0-100
    pub level: u32,
    /// Temporal differential coding against the previous frame (zlib only)
    pub differential: bool,
    /// Per-band failure policy
    #[serde(default)]
    pub band_errors: BandErrorPolicy,
}

impl CompressionConfig {
    /// zlib configuration at the given level (0-9)
    pub fn raw_zlib(level: u32) -> Self {
        Self {
            kind: CompressorKind::RawZlib,
            level,
            differential: false,
            band_errors: BandErrorPolicy::default(),
        }
    }

    /// JPEG configuration at the given quality (0-100)
    pub fn jpeg(quality: u32) -> Self {
        Self {
            kind: CompressorKind::Jpeg,
            level: quality,
            differential: false,
            band_errors: BandErrorPolicy::default(),
        }
    }

    /// Enable differential coding (valid for the zlib path only)
    pub fn with_differential(mut self, differential: bool) -> Self {
        self.differential = differential;
        self
    }

    /// Set the per-band failure policy
    pub fn with_band_errors(mut self, policy: BandErrorPolicy) -> Self {
        self.band_errors = policy;
        self
    }

    /// Validate level range and kind/differential combinations.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            CompressorKind::RawZlib => {
                if self.level > 9 {
                    return Err(Error::InvalidConfig(format!(
                        "zlib level {} out of range 0-9",
                        self.level
                    )));
                }
            }
            CompressorKind::Jpeg => {
                if self.level > 100 {
                    return Err(Error::InvalidConfig(format!(
                        "JPEG quality {} out of range 0-100",
                        self.level
                    )));
                }
                if self.differential {
                    return Err(Error::InvalidConfig(
                        "differential coding is only available with raw_zlib".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::raw_zlib(6)
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub streaming: StreamingConfig,
    pub compression: CompressionConfig,
    pub logging: LoggingConfig,
}

/// Replay source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Recorded video file to replay
    pub input: String,
    /// Loop back to frame 0 at end of stream
    pub loop_playback: bool,
    /// Playback speed multiplier (0.0 = as fast as possible, 1.0 = real time)
    pub speed: f32,
}

/// Network fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// TCP bind address for the fan-out server
    ///
    /// Examples:
    /// - `0.0.0.0:24778` - all interfaces, default port
    /// - `127.0.0.1:24778` - localhost only
    pub tcp_bind: String,
    /// Maximum simultaneous TCP clients
    pub max_clients: usize,
    /// Enable the UDP sender
    pub udp_enabled: bool,
    /// UDP destination, `host@port` (default port 24779 when omitted)
    pub udp_dest: String,
    /// UDP send-rate ceiling in megabits per second
    pub udp_rate_mbps: u64,
    /// UDP packet size in bytes, header included
    pub udp_packet_size: usize,
    /// Application id stamped into every UDP packet header
    pub udp_app_id: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.compression.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("config serialize error: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig {
                input: "capture.dvf".to_string(),
                loop_playback: true,
                speed: 1.0,
            },
            streaming: StreamingConfig {
                tcp_bind: "0.0.0.0:24778".to_string(),
                max_clients: 8,
                udp_enabled: false,
                udp_dest: "127.0.0.1@24779".to_string(),
                udp_rate_mbps: 120,
                udp_packet_size: 1400,
                udp_app_id: 0x4456_4944, // "DVID"
            },
            compression: CompressionConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
