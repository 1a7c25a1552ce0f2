//! DEFLATE decompression and PNG-style prediction reversal.
//!
//! PSD compression kinds 2 (ZIP) and 3 (ZIP with prediction) carry DEFLATE
//! streams. The published format calls for zlib framing, but raw DEFLATE
//! streams are observed in real files, so [`decompress`] attempts raw first
//! and retries with zlib framing.
//!
//! Prediction (kind 3) applies the PNG filter set per scanline. Each
//! filtered scanline is one filter-type byte followed by the filtered data;
//! because filtering is confined to a single scanline, the "above" and
//! "upper-left" neighbors are zero.
//!
//! Everything here is gated on the `deflate` cargo feature. Without it the
//! entry points report [`PsdError::UnsupportedCompression`] so callers can
//! leave channels undecoded rather than fail the document.

use crate::error::{PsdError, PsdResult};

/// Inflates `input` into exactly `expected` bytes.
///
/// Raw DEFLATE is attempted first; if it fails or produces the wrong length,
/// the same input is retried as a zlib-wrapped stream. Both failing is
/// corruption.
#[cfg(feature = "deflate")]
pub fn decompress(input: &[u8], expected: usize) -> PsdResult<Vec<u8>> {
    let options = || {
        zune_inflate::DeflateOptions::default()
            .set_limit(expected)
            .set_size_hint(expected)
            .set_confirm_checksum(false)
    };

    let mut decoder = zune_inflate::DeflateDecoder::new_with_options(input, options());
    if let Ok(out) = decoder.decode_deflate() {
        if out.len() == expected {
            return Ok(out);
        }
    }

    let mut decoder = zune_inflate::DeflateDecoder::new_with_options(input, options());
    match decoder.decode_zlib() {
        Ok(out) if out.len() == expected => Ok(out),
        _ => Err(PsdError::CorruptData(
            "DEFLATE stream malformed in both raw and zlib framing".into(),
        )),
    }
}

/// Stub when DEFLATE support is compiled out.
#[cfg(not(feature = "deflate"))]
pub fn decompress(_input: &[u8], _expected: usize) -> PsdResult<Vec<u8>> {
    Err(PsdError::UnsupportedCompression(2))
}

/// Inflates and reverses per-scanline prediction.
///
/// After inflation, scanline regions of `scanline_width + 1` bytes are
/// walked at `scanline_width` strides; each region's filter byte is reversed
/// and removed in place. A trailing region that does not fit is left as-is.
#[cfg(feature = "deflate")]
pub fn decompress_with_prediction(
    input: &[u8],
    expected: usize,
    scanline_width: usize,
    bytes_per_pixel: usize,
) -> PsdResult<Vec<u8>> {
    if scanline_width == 0 {
        return Err(PsdError::InvalidArgument("zero scanline width".into()));
    }

    let mut out = decompress(input, expected)?;

    let scanline_len = scanline_width + 1;
    let mut offset = 0;
    while offset + scanline_len <= out.len() {
        reverse_prediction(&mut out[offset..offset + scanline_len], bytes_per_pixel)?;
        offset += scanline_width;
    }

    Ok(out)
}

/// Stub when DEFLATE support is compiled out.
#[cfg(not(feature = "deflate"))]
pub fn decompress_with_prediction(
    _input: &[u8],
    _expected: usize,
    _scanline_width: usize,
    _bytes_per_pixel: usize,
) -> PsdResult<Vec<u8>> {
    Err(PsdError::UnsupportedCompression(3))
}

/// Paeth predictor from the PNG specification.
#[cfg(feature = "deflate")]
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i32::from(a) + i32::from(b) - i32::from(c);
    let pa = (p - i32::from(a)).abs();
    let pb = (p - i32::from(b)).abs();
    let pc = (p - i32::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverses one scanline's PNG filter in place.
///
/// `scanline[0]` is the filter type; the filtered data follows. After
/// reversal the data is shifted left one byte so the first
/// `scanline.len() - 1` bytes hold the reconstructed scanline. The "above"
/// neighbors are zero throughout.
#[cfg(feature = "deflate")]
fn reverse_prediction(scanline: &mut [u8], bytes_per_pixel: usize) -> PsdResult<()> {
    if scanline.is_empty() {
        return Err(PsdError::InvalidArgument("empty scanline".into()));
    }
    if bytes_per_pixel == 0 || bytes_per_pixel > 8 {
        return Err(PsdError::InvalidArgument(format!(
            "bad bytes per pixel {bytes_per_pixel}"
        )));
    }

    let filter = scanline[0];
    let data_len = scanline.len() - 1;

    match filter {
        0 => {
            // None
        }
        1 => {
            // Sub: delta from the sample to the left
            for i in bytes_per_pixel..data_len {
                scanline[1 + i] = scanline[1 + i].wrapping_add(scanline[1 + i - bytes_per_pixel]);
            }
        }
        2 => {
            // Up: the row above is zero, nothing to add
        }
        3 => {
            // Average of left and (zero) above
            for i in 0..bytes_per_pixel.min(data_len) {
                let v = scanline[1 + i];
                scanline[1 + i] = v.wrapping_add(v / 2);
            }
            for i in bytes_per_pixel..data_len {
                let left = scanline[1 + i - bytes_per_pixel];
                scanline[1 + i] = scanline[1 + i].wrapping_add(left / 2);
            }
        }
        4 => {
            // Paeth on (left, 0, 0); for the first pixel everything is zero
            for i in bytes_per_pixel..data_len {
                let left = scanline[1 + i - bytes_per_pixel];
                let pred = paeth(left, 0, 0);
                scanline[1 + i] = scanline[1 + i].wrapping_add(pred);
            }
        }
        _ => {
            return Err(PsdError::CorruptData(format!(
                "unknown prediction filter type {filter}"
            )));
        }
    }

    // Drop the filter byte.
    scanline.copy_within(1.., 0);
    Ok(())
}
