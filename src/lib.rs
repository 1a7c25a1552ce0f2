//! # psd-io
//!
//! Read-only decoder for Adobe Photoshop documents in both the standard
//! format (`.psd`, up to 30k x 30k pixels, 32-bit lengths) and the
//! large-document format (`.psb`, up to 300k x 300k pixels, 64-bit
//! lengths).
//!
//! The decoder produces an owned [`Document`] exposing the header fields,
//! color-mode block, image resources, per-layer records with lazily decoded
//! channel data, the composite image, and a derived text-layer index,
//! plus color-mode-aware rendering of the composite and of individual
//! pixel layers to interleaved 8-bit RGBA.
//!
//! # Features
//!
//! - Standard and large-document formats, with the length-width fallbacks
//!   real-world writers require
//! - RAW, PackBits RLE, ZIP and ZIP-with-prediction channel compression
//! - RGB, grayscale, indexed, CMYK, Lab (D50), duotone and bitmap
//!   rendering to RGBA8
//! - Text-layer detection with content, transform/bounds and default-style
//!   extraction from action descriptors and EngineData
//! - Unknown image resources and color modes retained, never rejected
//!
//! # Quick Start
//!
//! ```no_run
//! use psd_io::Document;
//!
//! let data = std::fs::read("artwork.psd")?;
//! let doc = Document::from_bytes(&data)?;
//!
//! println!("{}x{} {:?}", doc.width(), doc.height(), doc.color_mode());
//!
//! // Two-call render protocol: query the size, then fill the buffer.
//! let size = doc.render_composite_rgba8(None)?;
//! let mut rgba = vec![0u8; size];
//! doc.render_composite_rgba8(Some(&mut rgba))?;
//!
//! for (i, layer) in doc.layers().iter().enumerate() {
//!     println!("layer {i}: {:?} {:?}", layer.name(), layer.layer_type());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Custom byte sources
//!
//! Parsing needs random access, not a file: implement [`ByteSource`] or
//! wrap any `Read + Seek` in [`ReaderSource`].
//!
//! # Feature Flags
//!
//! - `deflate` *(default)*: ZIP and ZIP-with-prediction support. Without
//!   it those compression kinds are reported as unsupported and the
//!   affected channels stay compressed.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod channel;
mod composite;
mod document;
mod engine;
mod error;
mod header;
mod layer;
mod render;
mod resources;
mod stream;
mod text;
mod unicode;
mod zip;

pub mod descriptor;
pub mod packbits;

pub use channel::ChannelData;
pub use document::{CompositeRenderInfo, Document, LayerChannel};
pub use error::{PsdError, PsdResult};
pub use layer::{LayerBounds, LayerFeatures, LayerRecord, LayerType};
pub use resources::ResourceBlock;
pub use stream::{ByteSource, ReaderSource, SliceSource};
pub use text::{
    Justification, TextBounds, TextLayer, TextSource, TextStyle, TextTransform,
};
pub use unicode::{macroman_to_utf8, utf16be_to_utf8};

/// Document color mode.
///
/// Stored as a 16-bit value in the header; values this crate does not
/// recognize are retained verbatim in [`ColorMode::Unknown`] rather than
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// 1-bit bitmap.
    Bitmap,
    /// Grayscale.
    Grayscale,
    /// Indexed color (palette in the color-mode data).
    Indexed,
    /// RGB.
    Rgb,
    /// CMYK.
    Cmyk,
    /// Multichannel.
    Multichannel,
    /// Duotone.
    Duotone,
    /// CIE Lab.
    Lab,
    /// Any other value, retained as stored.
    Unknown(u16),
}

impl ColorMode {
    /// Maps the 16-bit header value to a color mode.
    pub fn from_raw(raw: u16) -> ColorMode {
        match raw {
            0 => ColorMode::Bitmap,
            1 => ColorMode::Grayscale,
            2 => ColorMode::Indexed,
            3 => ColorMode::Rgb,
            4 => ColorMode::Cmyk,
            7 => ColorMode::Multichannel,
            8 => ColorMode::Duotone,
            9 => ColorMode::Lab,
            other => ColorMode::Unknown(other),
        }
    }

    /// The 16-bit value as stored in the header.
    pub fn raw(&self) -> u16 {
        match self {
            ColorMode::Bitmap => 0,
            ColorMode::Grayscale => 1,
            ColorMode::Indexed => 2,
            ColorMode::Rgb => 3,
            ColorMode::Cmyk => 4,
            ColorMode::Multichannel => 7,
            ColorMode::Duotone => 8,
            ColorMode::Lab => 9,
            ColorMode::Unknown(raw) => *raw,
        }
    }
}

/// Compression kind for channel and composite image data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed planar data.
    #[default]
    Raw,
    /// PackBits RLE with a per-row byte-count table.
    Rle,
    /// DEFLATE (raw or zlib-wrapped).
    Zip,
    /// DEFLATE with per-scanline prediction.
    ZipPrediction,
}

impl Compression {
    /// Maps the 16-bit field to a compression kind; `None` for values
    /// outside 0..=3.
    pub fn from_raw(raw: u16) -> Option<Compression> {
        match raw {
            0 => Some(Compression::Raw),
            1 => Some(Compression::Rle),
            2 => Some(Compression::Zip),
            3 => Some(Compression::ZipPrediction),
            _ => None,
        }
    }

    /// The 16-bit value as stored in the file.
    pub fn raw(&self) -> u16 {
        match self {
            Compression::Raw => 0,
            Compression::Rle => 1,
            Compression::Zip => 2,
            Compression::ZipPrediction => 3,
        }
    }
}
