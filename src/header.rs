//! File header parsing.
//!
//! The header is a fixed 26-byte layout: signature, version, six reserved
//! bytes, channel count, height, width, depth, color mode. Everything that
//! follows in the file depends on the version field (standard vs large
//! document), so the header decides length-field widths downstream.

use crate::error::{PsdError, PsdResult};
use crate::stream::ByteSource;
use crate::ColorMode;

/// File magic: `"8BPS"`.
pub const SIGNATURE: u32 = 0x3842_5053;
/// Version field for the standard format.
pub const VERSION_STANDARD: u16 = 1;
/// Version field for the large-document format.
pub const VERSION_LARGE: u16 = 2;
/// Maximum channel count permitted by the format.
pub const MAX_CHANNELS: u16 = 56;
/// Maximum width/height in the standard format.
pub const MAX_DIMENSION_STANDARD: u32 = 30_000;
/// Maximum width/height in the large-document format.
pub const MAX_DIMENSION_LARGE: u32 = 300_000;

/// Parsed file header.
#[derive(Debug, Clone)]
pub struct Header {
    /// True for the large-document format (version 2).
    pub is_large: bool,
    /// Channel count, 1..=56.
    pub channels: u16,
    /// Image height in pixels.
    pub height: u32,
    /// Image width in pixels.
    pub width: u32,
    /// Bits per channel: 1, 8, 16 or 32.
    pub depth: u16,
    /// Document color mode.
    pub color_mode: ColorMode,
}

impl Header {
    /// Bytes per decoded scanline of one channel plane.
    pub fn scanline_bytes(&self) -> u64 {
        scanline_bytes(self.width, self.depth)
    }
}

/// Bytes per scanline for a plane of `width` samples at `depth` bits.
///
/// Depth 1 packs eight samples per byte; other depths use whole bytes per
/// sample.
pub(crate) fn scanline_bytes(width: u32, depth: u16) -> u64 {
    if depth == 1 {
        (u64::from(width) + 7) / 8
    } else {
        u64::from(width) * u64::from(depth / 8)
    }
}

/// Parses and validates the file header.
pub(crate) fn parse_header<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<Header> {
    let signature = source.read_u32()?;
    if signature != SIGNATURE {
        return Err(PsdError::InvalidFileFormat);
    }

    let version = source.read_u16()?;
    if version != VERSION_STANDARD && version != VERSION_LARGE {
        return Err(PsdError::UnsupportedVersion(version));
    }
    let is_large = version == VERSION_LARGE;

    // Six reserved bytes; consumed but not validated.
    source.skip(6)?;

    let channels = source.read_u16()?;
    if channels < 1 || channels > MAX_CHANNELS {
        return Err(PsdError::InvalidHeader(format!(
            "channel count {channels} outside 1..=56"
        )));
    }

    let height = source.read_u32()?;
    let width = source.read_u32()?;
    let max_dim = if is_large {
        MAX_DIMENSION_LARGE
    } else {
        MAX_DIMENSION_STANDARD
    };
    if width < 1 || width > max_dim || height < 1 || height > max_dim {
        return Err(PsdError::InvalidHeader(format!(
            "dimensions {width}x{height} outside 1..={max_dim}"
        )));
    }

    let depth = source.read_u16()?;
    if !matches!(depth, 1 | 8 | 16 | 32) {
        return Err(PsdError::InvalidHeader(format!("bit depth {depth}")));
    }

    // Color mode is stored as-is; unrecognized values are not rejected.
    let color_mode = ColorMode::from_raw(source.read_u16()?);

    Ok(Header {
        is_large,
        channels,
        height,
        width,
        depth,
        color_mode,
    })
}
