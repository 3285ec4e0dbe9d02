//! Error types for drishti-stream

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// drishti-stream error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame container header
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    /// File marker does not match any known format version
    #[error("unknown file format marker")]
    UnknownFormat,

    /// Band compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Seeking is not available on this stream
    #[error("seeking unsupported: {0}")]
    SeekUnsupported(&'static str),

    /// Frame id outside the recorded range
    #[error("frame {0} out of range")]
    OutOfRange(usize),

    /// A declared size exceeds the sanity cap
    #[error("declared size too large: {0} bytes")]
    TooLarge(usize),

    /// Transient decode failure, caller should re-pull the stream
    #[error("transient decode failure, retry")]
    Retry,

    /// Stream has already been closed
    #[error("stream is closed")]
    Closed,

    /// Component was already started
    #[error("already initialized")]
    AlreadyInitialized,

    /// Remote end closed the connection
    #[error("connection closed by peer")]
    Disconnected,

    /// TOML configuration parse error
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
