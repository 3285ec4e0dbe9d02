//! Byte-wise temporal differential coder.
//!
//! Each byte is encoded as a clipped signed delta from the same position in
//! the previous frame. Small deltas (|d| < 64) are stored verbatim; larger
//! ones are quantized three-to-one to fit the full 8-bit dynamic range into a
//! single signed byte:
//!
//! ```text
//! |d| <  64:  e = d
//! |d| >= 64:  e = sign(d) * (64 + (|d| - 64) / 3)      (lossy)
//! ```
//!
//! The large-delta branch is lossy, so the encoder immediately decodes its
//! own output back into the reference buffer. This keeps encoder and decoder
//! references byte-identical even when quantization loses precision —
//! skipping that step silently desynchronizes the two ends, which is why
//! [`encode`] updates `prev` itself rather than leaving it to the caller.

/// Expand one encoded delta back to the pixel-domain delta.
#[inline]
fn expand(e: i32) -> i32 {
    if e.abs() < 64 {
        e
    } else {
        e.signum() * (64 + (e.abs() - 64) * 3)
    }
}

/// Quantize one pixel-domain delta.
#[inline]
fn quantize(d: i32) -> i32 {
    if d.abs() < 64 {
        d
    } else {
        d.signum() * (64 + (d.abs() - 64) / 3)
    }
}

/// Encode `cur` against `prev` into `out`, then self-correct `prev` to the
/// decoder's view of this frame. All slices must be the same length.
pub fn encode(cur: &[u8], prev: &mut [u8], out: &mut [u8]) {
    debug_assert_eq!(cur.len(), prev.len());
    debug_assert_eq!(cur.len(), out.len());

    for i in 0..cur.len() {
        let d = cur[i] as i32 - prev[i] as i32;
        let e = quantize(d);
        out[i] = e as i8 as u8;
        prev[i] = (prev[i] as i32 + expand(e)).clamp(0, 255) as u8;
    }
}

/// Decode `encoded` in place over `prev`: afterwards `prev` holds the
/// reconstructed frame and is the reference for the next call.
pub fn decode(encoded: &[u8], prev: &mut [u8]) {
    debug_assert_eq!(encoded.len(), prev.len());

    for i in 0..encoded.len() {
        let e = encoded[i] as i8 as i32;
        prev[i] = (prev[i] as i32 + expand(e)).clamp(0, 255) as u8;
    }
}
