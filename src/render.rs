//! Color-mode-aware rendering to interleaved RGBA8.
//!
//! Converts planar channel data (one plane per channel) into interleaved
//! 8-bit RGBA, non-premultiplied. Per-sample reduction to 8 bits takes the
//! most significant byte for 16- and 32-bit depths; depth 1 expands packed
//! bits MSB-first to 0/255.
//!
//! Lab documents use the D50 reference white. The pipeline is
//! Lab -> XYZ(D50) -> Bradford adaptation -> XYZ(D65) -> linear sRGB ->
//! companded sRGB.

use crate::error::{PsdError, PsdResult};
use crate::ColorMode;

/// Bytes per sample for a depth; depth 1 is packed and returns 0.
fn bytes_per_sample(depth: u16) -> usize {
    match depth {
        8 => 1,
        16 => 2,
        32 => 4,
        _ => 0,
    }
}

/// 8-bit reduction of one sample: pass-through for depth 8, most
/// significant byte of the big-endian value otherwise.
#[inline]
fn sample_to_u8(plane: &[u8], offset: usize) -> u8 {
    plane.get(offset).copied().unwrap_or(0)
}

#[inline]
fn read_be_u16(plane: &[u8], offset: usize) -> u16 {
    let hi = plane.get(offset).copied().unwrap_or(0);
    let lo = plane.get(offset + 1).copied().unwrap_or(0);
    u16::from(hi) << 8 | u16::from(lo)
}

// ============================================================================
// Lab -> sRGB
// ============================================================================

/// Bradford cone-response matrix.
const BRADFORD: [[f32; 3]; 3] = [
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
];

/// Inverse Bradford matrix.
const BRADFORD_INV: [[f32; 3]; 3] = [
    [0.9869929, -0.1470543, 0.1599627],
    [0.4323053, 0.5183603, 0.0492912],
    [-0.0085287, 0.0400428, 0.9684867],
];

/// D50 reference white (ICC).
const D50: [f32; 3] = [0.96422, 1.0, 0.82521];
/// D65 reference white (sRGB).
const D65: [f32; 3] = [0.95047, 1.0, 1.08883];

#[inline]
fn mat_mul(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[inline]
fn srgb_compand(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.0031308 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Converts one CIE Lab (D50) sample to companded sRGB bytes.
fn lab_d50_to_srgb(l: f32, a: f32, b: f32) -> [u8; 3] {
    // Lab -> XYZ (D50), CIE inverse f function
    let eps = 216.0 / 24389.0;
    let kappa = 24389.0 / 27.0;

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let fx3 = fx * fx * fx;
    let fz3 = fz * fz * fz;

    let xr = if fx3 > eps { fx3 } else { (116.0 * fx - 16.0) / kappa };
    let yr = if l > kappa * eps { fy * fy * fy } else { l / kappa };
    let zr = if fz3 > eps { fz3 } else { (116.0 * fz - 16.0) / kappa };

    let xyz_d50 = [xr * D50[0], yr * D50[1], zr * D50[2]];

    // Bradford adaptation D50 -> D65: scale in cone space by the ratio of
    // the adapted white points.
    let lms_src = mat_mul(&BRADFORD, D50);
    let lms_dst = mat_mul(&BRADFORD, D65);
    let mut lms = mat_mul(&BRADFORD, xyz_d50);
    for i in 0..3 {
        if lms_src[i] != 0.0 {
            lms[i] *= lms_dst[i] / lms_src[i];
        }
    }
    let xyz_d65 = mat_mul(&BRADFORD_INV, lms);

    // XYZ (D65) -> linear sRGB
    let [x, y, z] = xyz_d65;
    let rl = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let gl = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let bl = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    [
        to_u8(srgb_compand(rl)),
        to_u8(srgb_compand(gl)),
        to_u8(srgb_compand(bl)),
    ]
}

// ============================================================================
// Planar -> RGBA8
// ============================================================================

/// Renders planar channel data into interleaved RGBA8.
///
/// `planes` holds up to five plane slices in render order: the mode's base
/// channels first, then the transparency plane when present. Passing `None`
/// for `out` queries the required size. Output is non-premultiplied.
pub(crate) fn render_planar_rgba8(
    mode: ColorMode,
    depth: u16,
    width: u32,
    height: u32,
    planes: &[Option<&[u8]>; 5],
    color_mode_data: &[u8],
    out: Option<&mut [u8]>,
) -> PsdResult<usize> {
    let required64 = u64::from(width) * u64::from(height) * 4;
    let required = usize::try_from(required64)
        .map_err(|_| PsdError::OutOfRange(format!("render size {required64}")))?;

    let out = match out {
        None => return Ok(required),
        Some(out) => {
            if out.len() < required {
                return Err(PsdError::BufferTooSmall { required });
            }
            out
        }
    };

    if width == 0 || height == 0 {
        return Ok(required);
    }

    if !matches!(depth, 1 | 8 | 16 | 32) {
        return Err(PsdError::UnsupportedFeature(format!("render depth {depth}")));
    }

    let bps = bytes_per_sample(depth);
    let row_bytes = if depth == 1 {
        (u64::from(width) + 7) / 8
    } else {
        0
    };

    for y in 0..height {
        for x in 0..width {
            let (r, g, b, a);

            if depth == 1 {
                let plane = planes[0].ok_or_else(|| {
                    PsdError::CorruptData("bitmap render without a plane".into())
                })?;
                let offset = (u64::from(y) * row_bytes + u64::from(x / 8)) as usize;
                let bit = 7 - (x & 7);
                let v = if plane.get(offset).copied().unwrap_or(0) >> bit & 1 != 0 {
                    255
                } else {
                    0
                };
                r = v;
                g = v;
                b = v;
                a = 255;
            } else {
                let idx = (u64::from(y) * u64::from(width) + u64::from(x)) as usize * bps;
                let p0 = planes[0];
                let p1 = planes[1];
                let p2 = planes[2];
                let p3 = planes[3];
                let p4 = planes[4];

                match mode {
                    ColorMode::Rgb => {
                        r = p0.map_or(0, |p| sample_to_u8(p, idx));
                        g = p1.map_or(r, |p| sample_to_u8(p, idx));
                        b = p2.map_or(r, |p| sample_to_u8(p, idx));
                        a = p3.map_or(255, |p| sample_to_u8(p, idx));
                    }
                    ColorMode::Grayscale | ColorMode::Duotone => {
                        r = p0.map_or(0, |p| sample_to_u8(p, idx));
                        g = r;
                        b = r;
                        a = p1.map_or(255, |p| sample_to_u8(p, idx));
                    }
                    ColorMode::Indexed => {
                        let key = usize::from(p0.map_or(0, |p| sample_to_u8(p, idx)));
                        if color_mode_data.len() >= 768 {
                            r = color_mode_data[key];
                            g = color_mode_data[256 + key];
                            b = color_mode_data[512 + key];
                        } else {
                            r = key as u8;
                            g = key as u8;
                            b = key as u8;
                        }
                        a = p1.map_or(255, |p| sample_to_u8(p, idx));
                    }
                    ColorMode::Cmyk => {
                        // Values are stored complemented by the writer;
                        // composite with black directly.
                        let c = u16::from(p0.map_or(0, |p| sample_to_u8(p, idx)));
                        let m = u16::from(p1.map_or(0, |p| sample_to_u8(p, idx)));
                        let y_ = u16::from(p2.map_or(0, |p| sample_to_u8(p, idx)));
                        let k = u16::from(p3.map_or(0, |p| sample_to_u8(p, idx)));
                        r = 255 - (c + k).min(255) as u8;
                        g = 255 - (m + k).min(255) as u8;
                        b = 255 - (y_ + k).min(255) as u8;
                        a = p4.map_or(255, |p| sample_to_u8(p, idx));
                    }
                    ColorMode::Lab => {
                        let (p0, p1, p2) = match (p0, p1, p2) {
                            (Some(p0), Some(p1), Some(p2)) => (p0, p1, p2),
                            _ => {
                                return Err(PsdError::CorruptData(
                                    "Lab render missing a channel plane".into(),
                                ))
                            }
                        };
                        let (l, aa, bb) = if depth == 16 {
                            let lv = read_be_u16(p0, idx);
                            let av = read_be_u16(p1, idx);
                            let bv = read_be_u16(p2, idx);
                            (
                                f32::from(lv) * 100.0 / 65535.0,
                                (f32::from(av) - 32768.0) / 256.0,
                                (f32::from(bv) - 32768.0) / 256.0,
                            )
                        } else {
                            let lv = sample_to_u8(p0, idx);
                            let av = sample_to_u8(p1, idx);
                            let bv = sample_to_u8(p2, idx);
                            (
                                f32::from(lv) * 100.0 / 255.0,
                                f32::from(av) - 128.0,
                                f32::from(bv) - 128.0,
                            )
                        };
                        let rgb = lab_d50_to_srgb(l, aa, bb);
                        r = rgb[0];
                        g = rgb[1];
                        b = rgb[2];
                        a = p3.map_or(255, |p| sample_to_u8(p, idx));
                    }
                    ColorMode::Bitmap => {
                        // Depth 1 is handled above; a bitmap document with
                        // another depth is not renderable.
                        return Err(PsdError::UnsupportedColorMode(mode.raw()));
                    }
                    ColorMode::Multichannel | ColorMode::Unknown(_) => {
                        return Err(PsdError::UnsupportedColorMode(mode.raw()));
                    }
                }
            }

            let off = (y as usize * width as usize + x as usize) * 4;
            out[off] = r;
            out[off + 1] = g;
            out[off + 2] = b;
            out[off + 3] = a;
        }
    }

    Ok(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(
        mode: ColorMode,
        depth: u16,
        width: u32,
        height: u32,
        planes: &[Option<&[u8]>; 5],
        palette: &[u8],
    ) -> Vec<u8> {
        let required =
            render_planar_rgba8(mode, depth, width, height, planes, palette, None).unwrap();
        let mut out = vec![0u8; required];
        render_planar_rgba8(mode, depth, width, height, planes, palette, Some(&mut out)).unwrap();
        out
    }

    #[test]
    fn test_size_query_and_too_small() {
        let planes = [None; 5];
        let required =
            render_planar_rgba8(ColorMode::Rgb, 8, 4, 3, &planes, &[], None).unwrap();
        assert_eq!(required, 48);

        let mut short = vec![0u8; 47];
        let err =
            render_planar_rgba8(ColorMode::Rgb, 8, 4, 3, &planes, &[], Some(&mut short))
                .unwrap_err();
        assert!(matches!(err, PsdError::BufferTooSmall { required: 48 }));
    }

    #[test]
    fn test_rgb_with_and_without_alpha() {
        let r = [10u8, 20];
        let g = [30u8, 40];
        let b = [50u8, 60];
        let a = [70u8, 80];

        let planes = [Some(&r[..]), Some(&g[..]), Some(&b[..]), None, None];
        let out = render(ColorMode::Rgb, 8, 2, 1, &planes, &[]);
        assert_eq!(out, [10, 30, 50, 255, 20, 40, 60, 255]);

        let planes = [Some(&r[..]), Some(&g[..]), Some(&b[..]), Some(&a[..]), None];
        let out = render(ColorMode::Rgb, 8, 2, 1, &planes, &[]);
        assert_eq!(out, [10, 30, 50, 70, 20, 40, 60, 80]);
    }

    #[test]
    fn test_grayscale() {
        let gray = [0u8, 128, 255];
        let planes = [Some(&gray[..]), None, None, None, None];
        let out = render(ColorMode::Grayscale, 8, 3, 1, &planes, &[]);
        assert_eq!(out[..4], [0, 0, 0, 255]);
        assert_eq!(out[4..8], [128, 128, 128, 255]);
    }

    #[test]
    fn test_depth16_takes_msb() {
        let plane = [0xAB, 0xCD, 0x12, 0x34];
        let planes = [Some(&plane[..]), None, None, None, None];
        let out = render(ColorMode::Grayscale, 16, 2, 1, &planes, &[]);
        assert_eq!(out[0], 0xAB);
        assert_eq!(out[4], 0x12);
    }

    #[test]
    fn test_indexed_palette() {
        let mut palette = vec![0u8; 768];
        palette[1] = 100; // R of key 1
        palette[256 + 1] = 110; // G
        palette[512 + 1] = 120; // B
        let keys = [1u8];
        let planes = [Some(&keys[..]), None, None, None, None];
        let out = render(ColorMode::Indexed, 8, 1, 1, &planes, &palette);
        assert_eq!(out, [100, 110, 120, 255]);

        // Without a palette the key becomes gray
        let out = render(ColorMode::Indexed, 8, 1, 1, &planes, &[]);
        assert_eq!(out, [1, 1, 1, 255]);
    }

    #[test]
    fn test_cmyk_black_composite() {
        // Stored values are already complemented; full ink everywhere = black
        let c = [0u8];
        let planes = [Some(&c[..]), Some(&c[..]), Some(&c[..]), Some(&c[..]), None];
        let out = render(ColorMode::Cmyk, 8, 1, 1, &planes, &[]);
        assert_eq!(out, [255, 255, 255, 255]);

        let k = [255u8];
        let zero = [0u8];
        let planes = [
            Some(&zero[..]),
            Some(&zero[..]),
            Some(&zero[..]),
            Some(&k[..]),
            None,
        ];
        let out = render(ColorMode::Cmyk, 8, 1, 1, &planes, &[]);
        assert_eq!(out, [0, 0, 0, 255]);
    }

    #[test]
    fn test_lab_white_and_black() {
        // L=255 a=128 b=128 is white (L*=100, a*=b*=0)
        let l = [255u8];
        let ab = [128u8];
        let planes = [Some(&l[..]), Some(&ab[..]), Some(&ab[..]), None, None];
        let out = render(ColorMode::Lab, 8, 1, 1, &planes, &[]);
        for ch in 0..3 {
            assert!(out[ch] >= 254, "white channel {ch} was {}", out[ch]);
        }
        assert_eq!(out[3], 255);

        let l = [0u8];
        let planes = [Some(&l[..]), Some(&ab[..]), Some(&ab[..]), None, None];
        let out = render(ColorMode::Lab, 8, 1, 1, &planes, &[]);
        for ch in 0..3 {
            assert!(out[ch] <= 1, "black channel {ch} was {}", out[ch]);
        }
    }

    #[test]
    fn test_lab_depth16_neutral_gray() {
        // Mid L, neutral a/b: all three outputs should be close together
        let l = 32768u16.to_be_bytes();
        let ab = 32768u16.to_be_bytes();
        let planes = [Some(&l[..]), Some(&ab[..]), Some(&ab[..]), None, None];
        let out = render(ColorMode::Lab, 16, 1, 1, &planes, &[]);
        let spread = out[..3].iter().max().unwrap() - out[..3].iter().min().unwrap();
        assert!(spread <= 2, "gray spread {spread}, pixel {:?}", &out[..4]);
    }

    #[test]
    fn test_bitmap_bits_msb_first() {
        // 0b1010_0000 over width 3: on, off, on
        let plane = [0xA0u8];
        let planes = [Some(&plane[..]), None, None, None, None];
        let out = render(ColorMode::Bitmap, 1, 3, 1, &planes, &[]);
        assert_eq!(out[..4], [255, 255, 255, 255]);
        assert_eq!(out[4..8], [0, 0, 0, 255]);
        assert_eq!(out[8..12], [255, 255, 255, 255]);
    }

    #[test]
    fn test_unsupported_mode() {
        let planes = [None; 5];
        let mut out = vec![0u8; 4];
        let err = render_planar_rgba8(
            ColorMode::Multichannel,
            8,
            1,
            1,
            &planes,
            &[],
            Some(&mut out),
        )
        .unwrap_err();
        assert!(matches!(err, PsdError::UnsupportedColorMode(7)));
    }
}
