//! RGB <-> planar 4:2:2 intermediate format for the zlib band codec.
//!
//! Layout per band: full-resolution luma plane, then the two chroma
//! difference planes subsampled 2:1 horizontally:
//!
//! ```text
//! [ Y: rows*width ][ Cb: rows*ceil(width/2) ][ Cr: rows*ceil(width/2) ]
//! ```
//!
//! The color transform is the reversible lifting variant (luma carries the
//! rounding residue), so content whose chroma fits in the 8-bit offset range
//! round-trips exactly; chroma is only clipped for fully saturated colors.
//! 2 bytes per pixel total.

/// Chroma plane width for an image `width` pixels wide.
#[inline]
pub fn chroma_width(width: usize) -> usize {
    width.div_ceil(2)
}

/// Planar byte length of a band of `rows` rows.
#[inline]
pub fn planar_len(width: usize, rows: usize) -> usize {
    rows * width + 2 * rows * chroma_width(width)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert interleaved RGB rows into the planar layout.
///
/// `rgb` holds `rows * width * 3` bytes, `out` exactly
/// [`planar_len`]`(width, rows)` bytes.
pub fn forward(rgb: &[u8], width: usize, rows: usize, out: &mut [u8]) {
    debug_assert_eq!(rgb.len(), rows * width * 3);
    debug_assert_eq!(out.len(), planar_len(width, rows));

    let cw = chroma_width(width);
    let (y_plane, chroma) = out.split_at_mut(rows * width);
    let (cb_plane, cr_plane) = chroma.split_at_mut(rows * cw);

    for row in 0..rows {
        let src = &rgb[row * width * 3..(row + 1) * width * 3];
        let y_row = &mut y_plane[row * width..(row + 1) * width];
        let cb_row = &mut cb_plane[row * cw..(row + 1) * cw];
        let cr_row = &mut cr_plane[row * cw..(row + 1) * cw];

        let mut x = 0;
        while x < width {
            let (r0, g0, b0) = (
                src[x * 3] as i32,
                src[x * 3 + 1] as i32,
                src[x * 3 + 2] as i32,
            );
            let cr0 = r0 - g0;
            let cb0 = b0 - g0;
            y_row[x] = (g0 + ((cr0 + cb0) >> 2)) as u8;

            let (cb, cr) = if x + 1 < width {
                let (r1, g1, b1) = (
                    src[(x + 1) * 3] as i32,
                    src[(x + 1) * 3 + 1] as i32,
                    src[(x + 1) * 3 + 2] as i32,
                );
                let cr1 = r1 - g1;
                let cb1 = b1 - g1;
                y_row[x + 1] = (g1 + ((cr1 + cb1) >> 2)) as u8;
                ((cb0 + cb1) >> 1, (cr0 + cr1) >> 1)
            } else {
                (cb0, cr0)
            };

            cb_row[x / 2] = clamp_u8(cb + 128);
            cr_row[x / 2] = clamp_u8(cr + 128);
            x += 2;
        }
    }
}

/// Convert the planar layout back into interleaved RGB rows.
pub fn inverse(planar: &[u8], width: usize, rows: usize, rgb: &mut [u8]) {
    debug_assert_eq!(planar.len(), planar_len(width, rows));
    debug_assert_eq!(rgb.len(), rows * width * 3);

    let cw = chroma_width(width);
    let (y_plane, chroma) = planar.split_at(rows * width);
    let (cb_plane, cr_plane) = chroma.split_at(rows * cw);

    for row in 0..rows {
        let dst = &mut rgb[row * width * 3..(row + 1) * width * 3];
        let y_row = &y_plane[row * width..(row + 1) * width];
        let cb_row = &cb_plane[row * cw..(row + 1) * cw];
        let cr_row = &cr_plane[row * cw..(row + 1) * cw];

        for x in 0..width {
            let y = y_row[x] as i32;
            let cb = cb_row[x / 2] as i32 - 128;
            let cr = cr_row[x / 2] as i32 - 128;
            let g = y - ((cr + cb) >> 2);
            dst[x * 3] = clamp_u8(cr + g);
            dst[x * 3 + 1] = clamp_u8(g);
            dst[x * 3 + 2] = clamp_u8(cb + g);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(rgb: &[u8], width: usize, rows: usize) -> Vec<u8> {
        let mut planar = vec![0u8; planar_len(width, rows)];
        forward(rgb, width, rows, &mut planar);
        let mut out = vec![0u8; rows * width * 3];
        inverse(&planar, width, rows, &mut out);
        out
    }

    #[test]
    fn test_solid_color_exact() {
        for &(r, g, b) in &[(0u8, 0u8, 0u8), (9, 0, 0), (120, 200, 40), (255, 255, 255)] {
            let rgb: Vec<u8> = [r, g, b].repeat(8 * 4);
            assert_eq!(roundtrip(&rgb, 8, 4), rgb, "color ({},{},{})", r, g, b);
        }
    }

    #[test]
    fn test_gray_gradient_exact() {
        // Neutral content has zero chroma, so even a per-pixel gradient
        // survives the 2:1 chroma subsampling untouched.
        let width = 16;
        let rows = 2;
        let mut rgb = Vec::with_capacity(rows * width * 3);
        for row in 0..rows {
            for x in 0..width {
                let v = (row * width + x) as u8 * 7;
                rgb.extend_from_slice(&[v, v, v]);
            }
        }
        assert_eq!(roundtrip(&rgb, width, rows), rgb);
    }

    #[test]
    fn test_odd_width() {
        let rgb: Vec<u8> = [30u8, 60, 90].repeat(7 * 3);
        assert_eq!(roundtrip(&rgb, 7, 3), rgb);
    }

    #[test]
    fn test_saturated_chroma_stays_in_range() {
        // (255,0,0) has chroma past the 8-bit offset range; the transform is
        // allowed to lose precision there but must stay in bounds.
        let rgb: Vec<u8> = [255u8, 0, 0].repeat(4 * 2);
        let out = roundtrip(&rgb, 4, 2);
        assert_eq!(out.len(), rgb.len());
        for px in out.chunks(3) {
            assert!(px[0] >= 200, "red channel collapsed: {:?}", px);
        }
    }

    #[test]
    fn test_planar_len() {
        assert_eq!(planar_len(8, 4), 8 * 4 * 2);
        assert_eq!(planar_len(7, 3), 7 * 3 + 2 * 3 * 4);
    }
}
