//! Derived text-layer index.
//!
//! After layer parsing completes, every layer flagged with text is scanned
//! for `TySh` (Photoshop 6+) and `tySh` (legacy) tagged blocks. Each hit
//! becomes a [`TextLayer`] record retaining the raw payload. For `TySh`,
//! the transform and bounds are extracted eagerly; the expensive action
//! descriptors are parsed lazily on the first content or style request and
//! cached.

use crate::descriptor::Descriptor;
use crate::error::{PsdError, PsdResult};
use crate::layer::{split_extra, LayerRecord, TaggedBlocks};
use crate::stream::{ByteSource, SliceSource};

/// Which tagged block produced a text-layer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// `TySh` type tool object setting (Photoshop 6+).
    Modern,
    /// `tySh` type tool info (Photoshop 5/5.5).
    Legacy,
}

/// 2D affine transform stored with a text layer: `xx, xy, yx, yy, tx, ty`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextTransform {
    /// X scale component.
    pub xx: f64,
    /// X shear component.
    pub xy: f64,
    /// Y shear component.
    pub yx: f64,
    /// Y scale component.
    pub yy: f64,
    /// X translation.
    pub tx: f64,
    /// Y translation.
    pub ty: f64,
}

/// Text rectangle stored as four doubles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextBounds {
    /// Left edge.
    pub left: f64,
    /// Top edge.
    pub top: f64,
    /// Right edge.
    pub right: f64,
    /// Bottom edge.
    pub bottom: f64,
}

/// Paragraph justification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Justification {
    /// Left-aligned (default).
    #[default]
    Left,
    /// Right-aligned.
    Right,
    /// Centered.
    Center,
    /// Fully justified.
    Full,
}

/// Single-run default style of a text layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// UTF-8 font name (PostScript or family name).
    pub font_name: String,
    /// Font size in points.
    pub size: f64,
    /// RGBA fill color, 0..=255 per channel; alpha is 255 when unknown.
    pub color_rgba: [u8; 4],
    /// Uniform inter-character spacing adjustment.
    pub tracking: f64,
    /// Vertical space between lines; 0 when unknown.
    pub leading: f64,
    /// Paragraph justification.
    pub justification: Justification,
}

/// Derived record for one text layer.
#[derive(Debug, Clone)]
pub struct TextLayer {
    pub(crate) layer_index: usize,
    pub(crate) source: TextSource,
    pub(crate) tysh_version: u16,
    pub(crate) text_version: u16,
    pub(crate) text_desc_version: u32,
    pub(crate) warp_version: u16,
    pub(crate) warp_desc_version: u32,
    pub(crate) transform: TextTransform,
    pub(crate) bounds: TextBounds,
    pub(crate) raw_payload: Vec<u8>,
    pub(crate) text_data: Option<Descriptor>,
    pub(crate) warp_data: Option<Descriptor>,
    pub(crate) has_rendered_pixels: bool,
}

impl TextLayer {
    fn new(layer_index: usize, source: TextSource) -> Self {
        Self {
            layer_index,
            source,
            tysh_version: 0,
            text_version: 0,
            text_desc_version: 0,
            warp_version: 0,
            warp_desc_version: 0,
            transform: TextTransform::default(),
            bounds: TextBounds::default(),
            raw_payload: Vec::new(),
            text_data: None,
            warp_data: None,
            has_rendered_pixels: false,
        }
    }

    /// Index of the owning layer.
    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    /// Which tagged-block flavor produced this record.
    pub fn source(&self) -> TextSource {
        self.source
    }

    /// Affine transform (meaningful for [`TextSource::Modern`] records).
    pub fn transform(&self) -> TextTransform {
        self.transform
    }

    /// Text rectangle (meaningful for [`TextSource::Modern`] records).
    pub fn bounds(&self) -> TextBounds {
        self.bounds
    }

    /// True when the owning layer carries rasterized pixels.
    pub fn has_rendered_pixels(&self) -> bool {
        self.has_rendered_pixels
    }

    /// The parsed text descriptor, if descriptor parsing has happened.
    pub fn text_descriptor(&self) -> Option<&Descriptor> {
        self.text_data.as_ref()
    }

    /// The parsed warp descriptor, if present and parsed.
    pub fn warp_descriptor(&self) -> Option<&Descriptor> {
        self.warp_data.as_ref()
    }

    /// Parses the text (and, when present, warp) descriptors from the
    /// retained payload. Runs at most once; later calls are free.
    ///
    /// Missing warp data is not an error. A failed text-descriptor parse is.
    pub(crate) fn ensure_descriptors(&mut self) -> PsdResult<()> {
        if self.text_data.is_some() {
            return Ok(());
        }
        if self.raw_payload.is_empty() {
            return Err(PsdError::CorruptData("text layer without a payload".into()));
        }

        let payload = std::mem::take(&mut self.raw_payload);
        let result = self.parse_descriptors(&payload);
        self.raw_payload = payload;

        if result.is_err() {
            self.text_data = None;
            self.warp_data = None;
        }
        result
    }

    fn parse_descriptors(&mut self, payload: &[u8]) -> PsdResult<()> {
        let mut source = SliceSource::new(payload);

        self.tysh_version = source.read_u16()?;
        // Transform doubles were taken eagerly; skip them here.
        source.skip(48)?;
        self.text_version = source.read_u16()?;
        self.text_desc_version = source.read_u32()?;

        self.text_data = Some(Descriptor::parse(&mut source)?);

        // Warp data is optional; stop quietly wherever it ends.
        let warp_version = match source.read_u16() {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        let warp_desc_version = match source.read_u32() {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        match Descriptor::parse(&mut source) {
            Ok(warp) => {
                self.warp_version = warp_version;
                self.warp_desc_version = warp_desc_version;
                self.warp_data = Some(warp);
            }
            Err(e) => {
                tracing::debug!(layer = self.layer_index, error = %e, "warp descriptor skipped");
            }
        }
        Ok(())
    }
}

/// Builds the text-layer index from parsed layer records.
///
/// Failures while reading a `TySh` payload never abort: the record is kept
/// with its raw payload for later lazy parsing.
pub(crate) fn build_text_index(layers: &[LayerRecord]) -> Vec<TextLayer> {
    let mut index = Vec::new();

    for (layer_index, layer) in layers.iter().enumerate() {
        if !layer.features().has_text || layer.extra.len() < 12 {
            continue;
        }

        let parts = split_extra(&layer.extra);
        for block in TaggedBlocks::new(&layer.extra[parts.tagged_offset..]) {
            let source = match &block.key {
                b"TySh" => TextSource::Modern,
                b"tySh" => TextSource::Legacy,
                _ => continue,
            };

            let mut item = TextLayer::new(layer_index, source);
            item.raw_payload = block.payload.to_vec();
            item.has_rendered_pixels = !layer.channels().is_empty()
                && layer.bounds().width() > 0
                && layer.bounds().height() > 0;

            if source == TextSource::Modern {
                if let Err(e) = parse_tysh_eager(&mut item, block.payload) {
                    tracing::debug!(layer_index, error = %e, "eager TySh fields unavailable");
                }
            }

            index.push(item);
        }
    }

    index
}

/// Extracts the rendering-essential `TySh` fields: version, transform, text
/// versions, and the bounds doubles stored in the last 32 payload bytes.
fn parse_tysh_eager(item: &mut TextLayer, payload: &[u8]) -> PsdResult<()> {
    let mut source = SliceSource::new(payload);

    item.tysh_version = source.read_u16()?;
    item.transform.xx = source.read_f64()?;
    item.transform.xy = source.read_f64()?;
    item.transform.yx = source.read_f64()?;
    item.transform.yy = source.read_f64()?;
    item.transform.tx = source.read_f64()?;
    item.transform.ty = source.read_f64()?;
    item.text_version = source.read_u16()?;
    item.text_desc_version = source.read_u32()?;

    if payload.len() >= 70 {
        let bounds_start = payload.len() as u64 - 32;
        if bounds_start > source.tell()? {
            source.seek(bounds_start)?;
        }
        item.bounds.left = source.read_f64()?;
        item.bounds.top = source.read_f64()?;
        item.bounds.right = source.read_f64()?;
        item.bounds.bottom = source.read_f64()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal TySh payload: versions + transform + descriptor
    /// bytes + trailing bounds.
    fn tysh_payload(descriptor: &[u8], bounds: [f64; 4]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes()); // TySh version
        for v in [2.0f64, 0.0, 0.0, 2.0, 10.0, 20.0] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf.extend_from_slice(&50u16.to_be_bytes()); // text version
        buf.extend_from_slice(&16u32.to_be_bytes()); // descriptor version
        buf.extend_from_slice(descriptor);
        for v in bounds {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf
    }

    fn text_descriptor_bytes(text: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        // Bare layout: class id (OSType) + count + one TEXT property
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"TxLr");
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"Txt ");
        buf.extend_from_slice(b"TEXT");
        let units: Vec<u16> = text.encode_utf16().collect();
        buf.extend_from_slice(&(units.len() as u32).to_be_bytes());
        for unit in units {
            buf.extend_from_slice(&unit.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_eager_fields() {
        let payload = tysh_payload(&text_descriptor_bytes("hi"), [1.0, 2.0, 3.0, 4.0]);
        let mut item = TextLayer::new(0, TextSource::Modern);
        parse_tysh_eager(&mut item, &payload).unwrap();

        assert_eq!(item.tysh_version, 1);
        assert_eq!(item.transform.xx, 2.0);
        assert_eq!(item.transform.ty, 20.0);
        assert_eq!(item.text_version, 50);
        assert_eq!(item.text_desc_version, 16);
        assert_eq!(item.bounds.left, 1.0);
        assert_eq!(item.bounds.bottom, 4.0);
    }

    #[test]
    fn test_lazy_descriptor_parse_and_cache() {
        let payload = tysh_payload(&text_descriptor_bytes("Hello, \u{4E16}\u{754C}"), [0.0; 4]);
        let mut item = TextLayer::new(0, TextSource::Modern);
        item.raw_payload = payload;

        item.ensure_descriptors().unwrap();
        let desc = item.text_descriptor().unwrap();
        assert_eq!(desc.find_text("Txt "), Some("Hello, \u{4E16}\u{754C}"));

        // Second call keeps the same parsed tree.
        let before = desc as *const Descriptor;
        item.ensure_descriptors().unwrap();
        assert_eq!(item.text_descriptor().unwrap() as *const Descriptor, before);
    }

    #[test]
    fn test_payload_ending_at_text_descriptor() {
        // Truncated right after the text descriptor: no warp, no bounds.
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&[0u8; 48]);
        payload.extend_from_slice(&50u16.to_be_bytes());
        payload.extend_from_slice(&16u32.to_be_bytes());
        payload.extend_from_slice(&text_descriptor_bytes("x"));

        let mut item = TextLayer::new(0, TextSource::Modern);
        item.raw_payload = payload;
        item.ensure_descriptors().unwrap();
        assert!(item.text_descriptor().is_some());
        assert!(item.warp_descriptor().is_none());
    }

    #[test]
    fn test_warp_descriptor_parsed_when_present() {
        let mut warp_desc = Vec::new();
        warp_desc.extend_from_slice(&0u32.to_be_bytes());
        warp_desc.extend_from_slice(b"warp");
        warp_desc.extend_from_slice(&0u32.to_be_bytes());

        let mut middle = text_descriptor_bytes("x");
        middle.extend_from_slice(&1u16.to_be_bytes()); // warp version
        middle.extend_from_slice(&16u32.to_be_bytes()); // warp descriptor version
        middle.extend_from_slice(&warp_desc);

        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&[0u8; 48]);
        payload.extend_from_slice(&50u16.to_be_bytes());
        payload.extend_from_slice(&16u32.to_be_bytes());
        payload.extend_from_slice(&middle);

        let mut item = TextLayer::new(0, TextSource::Modern);
        item.raw_payload = payload;
        item.ensure_descriptors().unwrap();
        let warp = item.warp_descriptor().unwrap();
        assert_eq!(warp.class_id, "warp");
        assert_eq!(item.warp_version, 1);
        assert_eq!(item.warp_desc_version, 16);
    }

    #[test]
    fn test_empty_payload_is_corrupt() {
        let mut item = TextLayer::new(0, TextSource::Legacy);
        assert!(matches!(
            item.ensure_descriptors().unwrap_err(),
            PsdError::CorruptData(_)
        ));
    }
}
