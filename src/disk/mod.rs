//! Seekable on-disk video format: versioned layout, async writer, reader.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::FormatVersion;
pub use reader::VideoReader;
pub use writer::VideoWriter;
