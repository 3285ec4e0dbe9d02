//! Frame compression: planar conversion, differential coding, band codec.

pub mod band;
pub mod differential;
pub mod planar;

pub use band::{band_rows, FrameCompressor, FrameDecompressor};
