//! The parsed document: owner of every decoded buffer, query surface and
//! rendering entry points.
//!
//! Parsing runs the five sections in file order: header, color-mode data,
//! image resources, layer-and-mask information, composite image data. The
//! text-layer index is derived between the last two. Two failure classes
//! are soft: text-layer problems never abort the document, and a composite
//! that is missing or undecodable in this build leaves the document intact
//! without a composite buffer.

use crate::composite::{parse_composite, CompositeImage};
use crate::error::{PsdError, PsdResult};
use crate::header::{parse_header, scanline_bytes, Header};
use crate::layer::{parse_layer_info, LayerRecord};
use crate::render::render_planar_rgba8;
use crate::resources::{parse_resources, ResourceBlock};
use crate::stream::{ByteSource, SliceSource};
use crate::text::{build_text_index, TextBounds, TextLayer, TextStyle, TextTransform};
use crate::{engine, ColorMode, Compression};

/// Composite properties reported by the extended render call.
#[derive(Debug, Clone, Copy)]
pub struct CompositeRenderInfo {
    /// Document color mode.
    pub color_mode: ColorMode,
    /// Bits per channel.
    pub depth: u16,
    /// Document channel count.
    pub channels: u16,
    /// Original compression of the composite data.
    pub compression: Compression,
}

/// Decoded pixels of one layer channel.
#[derive(Debug)]
pub struct LayerChannel<'a> {
    /// Channel id: 0.. color planes, -1 transparency, -2 user mask,
    /// -3 vector mask.
    pub id: i16,
    /// Decoded plane bytes when decoding succeeded, otherwise the
    /// still-compressed payload.
    pub data: &'a [u8],
    /// True when `data` is decoded plane bytes.
    pub decoded: bool,
    /// Original compression kind.
    pub compression: Compression,
}

/// A parsed PSD/PSB document.
///
/// Owns every buffer produced by parsing. Accessors that trigger lazy work
/// (channel pixels, text content and style) take `&mut self`; plain queries
/// are `&self`.
#[derive(Debug)]
pub struct Document {
    header: Header,
    color_mode_data: Vec<u8>,
    resources: Vec<ResourceBlock>,
    layers: Vec<LayerRecord>,
    has_transparency_layer: bool,
    composite: CompositeImage,
    text_layers: Vec<TextLayer>,
}

impl Document {
    /// Parses a document from a byte source positioned at the file start.
    ///
    /// The source is only needed for the duration of this call.
    pub fn parse<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<Document> {
        let header = parse_header(source)?;

        // Color-mode data: 4-byte length + raw bytes, retained verbatim.
        let color_len = source.read_u32()?;
        let mut color_mode_data = vec![0u8; color_len as usize];
        source.read_exact(&mut color_mode_data)?;

        let resources = parse_resources(source)?;

        let layer_info = parse_layer_info(source, &header)?;
        let text_layers = build_text_index(&layer_info.layers);

        let composite = match parse_composite(source, &header) {
            Ok(composite) => composite,
            Err(
                PsdError::StreamEof
                | PsdError::StreamInvalid(_)
                | PsdError::UnsupportedCompression(_),
            ) => {
                tracing::debug!("composite image unavailable, continuing without it");
                CompositeImage::default()
            }
            Err(e) => return Err(e),
        };

        Ok(Document {
            header,
            color_mode_data,
            resources,
            layers: layer_info.layers,
            has_transparency_layer: layer_info.has_transparency_layer,
            composite,
            text_layers,
        })
    }

    /// Parses a document from an in-memory byte slice.
    pub fn from_bytes(data: &[u8]) -> PsdResult<Document> {
        Document::parse(&mut SliceSource::new(data))
    }

    // ========================================================================
    // Document metadata
    // ========================================================================

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.header.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Bits per channel: 1, 8, 16 or 32.
    pub fn depth(&self) -> u16 {
        self.header.depth
    }

    /// Document channel count, 1..=56.
    pub fn channel_count(&self) -> u16 {
        self.header.channels
    }

    /// Document color mode; unrecognized values are retained.
    pub fn color_mode(&self) -> ColorMode {
        self.header.color_mode
    }

    /// True for the large-document (PSB) format.
    pub fn is_large(&self) -> bool {
        self.header.is_large
    }

    /// Raw color-mode data; for indexed documents, conventionally 768
    /// palette bytes (256 R, then G, then B).
    pub fn color_mode_data(&self) -> &[u8] {
        &self.color_mode_data
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Number of image-resource blocks.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Resource blocks in file order.
    pub fn resources(&self) -> &[ResourceBlock] {
        &self.resources
    }

    /// Resource block by index.
    pub fn resource(&self, index: usize) -> PsdResult<&ResourceBlock> {
        self.resources
            .get(index)
            .ok_or_else(|| PsdError::OutOfRange(format!("resource index {index}")))
    }

    /// Index of the first resource with `id`, if any.
    pub fn find_resource(&self, id: u16) -> Option<usize> {
        self.resources.iter().position(|block| block.id == id)
    }

    // ========================================================================
    // Layers
    // ========================================================================

    /// Number of layer records.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// True when the file declared a transparency layer (negative count).
    pub fn has_transparency_layer(&self) -> bool {
        self.has_transparency_layer
    }

    /// Layer records in file order.
    pub fn layers(&self) -> &[LayerRecord] {
        &self.layers
    }

    /// Layer record by index.
    pub fn layer(&self, index: usize) -> PsdResult<&LayerRecord> {
        self.layers
            .get(index)
            .ok_or_else(|| PsdError::OutOfRange(format!("layer index {index}")))
    }

    /// True iff the layer at `index` is the Photoshop background layer.
    ///
    /// Requires all of: bottom-most index, background flag, no transparency
    /// channel, no layer mask, no vector mask, and exactly
    /// `base_channel_count` channels (3 for RGB, 4 for CMYK, 1 for
    /// grayscale). At most one layer of a document satisfies this.
    pub fn is_background_layer(&self, index: usize, base_channel_count: usize) -> bool {
        if index + 1 != self.layers.len() {
            return false;
        }
        match self.layers.get(index) {
            Some(layer) => layer.is_background_candidate(base_channel_count),
            None => false,
        }
    }

    /// Decodes (once) and returns a layer channel's pixels.
    ///
    /// Channel ids -2 and -3 (user and vector masks) are stored at 8 bits
    /// regardless of document depth. A zero-area layer yields empty data.
    /// Channels whose compression this build cannot decode are returned
    /// compressed with `decoded == false`.
    pub fn layer_channel_data(
        &mut self,
        layer_index: usize,
        channel_index: usize,
    ) -> PsdResult<LayerChannel<'_>> {
        let depth = self.header.depth;
        let layer = self
            .layers
            .get_mut(layer_index)
            .ok_or_else(|| PsdError::OutOfRange(format!("layer index {layer_index}")))?;

        let width = layer.bounds.width();
        let height = layer.bounds.height();

        let channel = layer
            .channels
            .get_mut(channel_index)
            .ok_or_else(|| PsdError::OutOfRange(format!("channel index {channel_index}")))?;

        if width == 0 || height == 0 {
            return Ok(LayerChannel {
                id: channel.id(),
                data: &[],
                decoded: false,
                compression: channel.compression(),
            });
        }

        let channel_depth = match channel.id() {
            -2 | -3 => 8,
            _ => depth,
        };
        channel.decode(width, height, channel_depth)?;

        match channel.decoded() {
            Some(data) => Ok(LayerChannel {
                id: channel.id(),
                data,
                decoded: true,
                compression: channel.compression(),
            }),
            None => Ok(LayerChannel {
                id: channel.id(),
                data: channel.compressed(),
                decoded: false,
                compression: channel.compression(),
            }),
        }
    }

    // ========================================================================
    // Composite
    // ========================================================================

    /// Decoded planar composite bytes, if the file carried a composite.
    pub fn composite_image(&self) -> Option<&[u8]> {
        self.composite.data.as_deref()
    }

    /// Original compression kind of the composite data.
    pub fn composite_compression(&self) -> Compression {
        self.composite.compression
    }

    /// Renders the composite to interleaved RGBA8, non-premultiplied.
    ///
    /// Two-call protocol: pass `None` to query the required byte size, then
    /// call again with a buffer of at least that size.
    pub fn render_composite_rgba8(&self, out: Option<&mut [u8]>) -> PsdResult<usize> {
        self.render_composite_rgba8_ex(out).map(|(size, _)| size)
    }

    /// Like [`render_composite_rgba8`](Self::render_composite_rgba8), also
    /// reporting the composite's native properties.
    pub fn render_composite_rgba8_ex(
        &self,
        out: Option<&mut [u8]>,
    ) -> PsdResult<(usize, CompositeRenderInfo)> {
        let info = CompositeRenderInfo {
            color_mode: self.header.color_mode,
            depth: self.header.depth,
            channels: self.header.channels,
            compression: self.composite.compression,
        };

        let composite = self
            .composite
            .data
            .as_deref()
            .ok_or_else(|| PsdError::InvalidArgument("document has no composite image".into()))?;

        let plane_bytes64 = scanline_bytes(self.header.width, self.header.depth)
            * u64::from(self.header.height);
        let plane_bytes = usize::try_from(plane_bytes64)
            .map_err(|_| PsdError::OutOfRange(format!("plane size {plane_bytes64}")))?;
        if plane_bytes == 0 {
            return Err(PsdError::CorruptData("composite with empty planes".into()));
        }
        if composite.len() < plane_bytes * usize::from(self.header.channels) {
            return Err(PsdError::CorruptData(
                "composite shorter than its channel planes".into(),
            ));
        }

        let mut planes: [Option<&[u8]>; 5] = [None; 5];
        for (i, plane) in planes
            .iter_mut()
            .take(usize::from(self.header.channels).min(5))
            .enumerate()
        {
            *plane = Some(&composite[i * plane_bytes..(i + 1) * plane_bytes]);
        }

        let size = render_planar_rgba8(
            self.header.color_mode,
            self.header.depth,
            self.header.width,
            self.header.height,
            &planes,
            &self.color_mode_data,
            out,
        )?;
        Ok((size, info))
    }

    /// Renders one pixel layer to interleaved RGBA8, non-premultiplied.
    ///
    /// The output covers the layer's bounds, not the document canvas; use
    /// [`LayerRecord::bounds`] to position it. Channels are lazily decoded,
    /// so this takes `&mut self`. Two-call protocol as for the composite.
    pub fn render_layer_rgba8(
        &mut self,
        layer_index: usize,
        out: Option<&mut [u8]>,
    ) -> PsdResult<usize> {
        let layer = self
            .layers
            .get(layer_index)
            .ok_or_else(|| PsdError::OutOfRange(format!("layer index {layer_index}")))?;

        let width = layer.bounds.width();
        let height = layer.bounds.height();
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

        // Decode every channel up front; individual failures leave that
        // plane missing rather than failing the render.
        let channel_count = self.layers[layer_index].channels.len();
        for channel_index in 0..channel_count {
            if let Err(e) = self.layer_channel_data(layer_index, channel_index) {
                tracing::debug!(layer_index, channel_index, error = %e, "channel skipped");
            }
        }

        let layer = &self.layers[layer_index];
        let mut by_id: [Option<&[u8]>; 5] = [None; 5];
        for channel in &layer.channels {
            let Some(data) = channel.decoded() else { continue };
            match channel.id() {
                id @ 0..=3 => by_id[id as usize] = Some(data),
                -1 => by_id[4] = Some(data),
                _ => {}
            }
        }

        // Order the planes the renderer expects: base channels first, then
        // the transparency plane when present.
        let mode = self.header.color_mode;
        let mut planes: [Option<&[u8]>; 5] = [None; 5];
        match mode {
            ColorMode::Rgb | ColorMode::Lab => {
                planes[0] = by_id[0];
                planes[1] = by_id[1];
                planes[2] = by_id[2];
                planes[3] = by_id[4];
            }
            ColorMode::Grayscale | ColorMode::Duotone | ColorMode::Indexed | ColorMode::Bitmap => {
                planes[0] = by_id[0];
                planes[1] = by_id[4];
            }
            ColorMode::Cmyk => {
                planes = [by_id[0], by_id[1], by_id[2], by_id[3], by_id[4]];
            }
            ColorMode::Multichannel | ColorMode::Unknown(_) => {
                return Err(PsdError::UnsupportedColorMode(mode.raw()));
            }
        }

        render_planar_rgba8(
            mode,
            self.header.depth,
            width,
            height,
            &planes,
            &self.color_mode_data,
            Some(out),
        )
    }

    // ========================================================================
    // Text layers
    // ========================================================================

    /// Number of derived text-layer records.
    pub fn text_layer_count(&self) -> usize {
        self.text_layers.len()
    }

    /// Derived text-layer records in layer order.
    pub fn text_layers(&self) -> &[TextLayer] {
        &self.text_layers
    }

    fn text_layer_mut(&mut self, layer_index: usize) -> PsdResult<&mut TextLayer> {
        self.text_layers
            .iter_mut()
            .find(|item| item.layer_index() == layer_index)
            .ok_or_else(|| {
                PsdError::InvalidArgument(format!("layer {layer_index} has no text data"))
            })
    }

    /// Extracts the text content of the text layer owned by `layer_index`.
    ///
    /// Parses the text descriptor on first access and caches it; the
    /// content is the `Txt ` string property.
    pub fn text_content(&mut self, layer_index: usize) -> PsdResult<String> {
        let item = self.text_layer_mut(layer_index)?;
        item.ensure_descriptors()?;
        let descriptor = item
            .text_descriptor()
            .ok_or_else(|| PsdError::CorruptData("text descriptor unavailable".into()))?;
        descriptor
            .find_text("Txt ")
            .map(str::to_owned)
            .ok_or_else(|| PsdError::InvalidStructure("text descriptor without Txt".into()))
    }

    /// Extracts the single-run default style of the text layer owned by
    /// `layer_index` from its EngineData.
    pub fn text_default_style(&mut self, layer_index: usize) -> PsdResult<TextStyle> {
        let item = self.text_layer_mut(layer_index)?;
        item.ensure_descriptors()?;
        let descriptor = item
            .text_descriptor()
            .ok_or_else(|| PsdError::CorruptData("text descriptor unavailable".into()))?;
        let engine_data = descriptor
            .find_raw_data("EngineData")
            .ok_or_else(|| PsdError::InvalidStructure("text descriptor without EngineData".into()))?;

        let text = engine::engine_data_to_text(engine_data)?;
        engine::extract_style(&text)
    }

    /// Transform matrix and text bounds of the text layer owned by
    /// `layer_index`.
    pub fn text_matrix_bounds(
        &self,
        layer_index: usize,
    ) -> PsdResult<(TextTransform, TextBounds)> {
        self.text_layers
            .iter()
            .find(|item| item.layer_index() == layer_index)
            .map(|item| (item.transform(), item.bounds()))
            .ok_or_else(|| {
                PsdError::InvalidArgument(format!("layer {layer_index} has no text data"))
            })
    }
}
