//! Layer records and the layer-and-mask-information section.
//!
//! This is the most drift-prone part of the format. Length-field widths
//! differ between the standard and large-document formats, and large-format
//! writers are observed emitting 4-byte lengths where 8 bytes are specified.
//! Every section- and channel-length read here is confirmed by independent
//! byte accounting before it is trusted, with a 4-byte reread as the
//! fallback.
//!
//! Layer extra data (mask data, blending ranges, name, tagged blocks) is
//! read as one blob and scanned in memory; the tagged blocks drive the
//! derived [`LayerFeatures`] set.

use crate::channel::ChannelData;
use crate::error::{PsdError, PsdResult};
use crate::header::Header;
use crate::stream::ByteSource;
use crate::unicode::{macroman_to_utf8, utf16be_to_utf8};
use crate::Compression;
use byteorder::{BigEndian, ByteOrder};

const SIG_8BIM: u32 = 0x3842_494D;
const SIG_8B64: u32 = 0x3842_3634;
const BLEND_KEY_NORMAL: u32 = u32::from_be_bytes(*b"norm");

/// Extra-data blobs above this size mark the layer as misaligned and empty.
const MAX_EXTRA_LENGTH: u32 = 1_000_000;
/// Bounds beyond this magnitude are treated as suspicious.
const MAX_REASONABLE_COORD: i32 = 1_000_000;

/// Signed bounding rectangle of a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerBounds {
    /// Top coordinate.
    pub top: i32,
    /// Left coordinate.
    pub left: i32,
    /// Bottom coordinate.
    pub bottom: i32,
    /// Right coordinate.
    pub right: i32,
}

impl LayerBounds {
    /// Width in pixels; zero when the rectangle is inverted.
    pub fn width(&self) -> u32 {
        if self.right > self.left {
            (self.right - self.left) as u32
        } else {
            0
        }
    }

    /// Height in pixels; zero when the rectangle is inverted.
    pub fn height(&self) -> u32 {
        if self.bottom > self.top {
            (self.bottom - self.top) as u32
        } else {
            0
        }
    }
}

/// Feature booleans derived from a layer's tagged blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerFeatures {
    /// Layer opens a group/folder (`lsct` type 1 or 2).
    pub is_group_start: bool,
    /// Layer closes a group (`lsct` type 3).
    pub is_group_end: bool,
    /// Layer carries text (`TySh`/`tySh`).
    pub has_text: bool,
    /// Layer has a vector mask (`vmsk`/`vmns`).
    pub has_vector_mask: bool,
    /// Layer is a smart object (`SoLd`/`SoLE`).
    pub has_smart_object: bool,
    /// Layer is an adjustment layer (`adj*` or a known adjustment key).
    pub has_adjustment: bool,
    /// Layer is a fill layer (`SoCo`/`GdFl`/`PtFl`).
    pub has_fill: bool,
    /// Layer has effects (`lfx2`).
    pub has_effects: bool,
    /// Layer is 3D (`3dL*`).
    pub has_3d: bool,
    /// Layer is video (`vtrk`).
    pub has_video: bool,
}

/// Simplified layer classification derived from features and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerType {
    /// Group closing marker.
    GroupEnd,
    /// Group opening marker.
    GroupStart,
    /// Text layer.
    Text,
    /// Smart object.
    SmartObject,
    /// Adjustment layer.
    Adjustment,
    /// Fill layer.
    Fill,
    /// Layer with effects.
    Effects,
    /// 3D layer.
    ThreeD,
    /// Video layer.
    Video,
    /// Ordinary pixel layer.
    Pixel,
    /// No pixels and no recognized feature.
    Empty,
}

/// One parsed layer record.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub(crate) bounds: LayerBounds,
    pub(crate) bounds_invalid: bool,
    pub(crate) channels: Vec<ChannelData>,
    pub(crate) blend_sig: u32,
    pub(crate) blend_key: u32,
    pub(crate) opacity: u8,
    pub(crate) clipping: u8,
    pub(crate) flags: u8,
    pub(crate) name: Option<String>,
    pub(crate) extra: Vec<u8>,
    pub(crate) mask_data_len: u32,
    pub(crate) tagged_offset: usize,
    pub(crate) features: LayerFeatures,
}

impl LayerRecord {
    fn empty() -> Self {
        Self {
            bounds: LayerBounds::default(),
            bounds_invalid: false,
            channels: Vec::new(),
            blend_sig: SIG_8BIM,
            blend_key: BLEND_KEY_NORMAL,
            opacity: 255,
            clipping: 0,
            flags: 0,
            name: None,
            extra: Vec::new(),
            mask_data_len: 0,
            tagged_offset: 0,
            features: LayerFeatures::default(),
        }
    }

    /// Bounding rectangle as stored in the file.
    pub fn bounds(&self) -> LayerBounds {
        self.bounds
    }

    /// True when the stored bounds failed plausibility checks. The values
    /// are kept regardless; callers must tolerate them.
    pub fn bounds_invalid(&self) -> bool {
        self.bounds_invalid
    }

    /// Blend-mode signature (normally `8BIM`).
    pub fn blend_signature(&self) -> u32 {
        self.blend_sig
    }

    /// Blend-mode key (e.g. `norm`, `mult`, `scrn`).
    pub fn blend_key(&self) -> u32 {
        self.blend_key
    }

    /// Opacity 0..=255.
    pub fn opacity(&self) -> u8 {
        self.opacity
    }

    /// Clipping byte: 0 = base, 1 = non-base.
    pub fn clipping(&self) -> u8 {
        self.clipping
    }

    /// Layer flags byte.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel records in file order.
    pub fn channels(&self) -> &[ChannelData] {
        &self.channels
    }

    /// Layer name as UTF-8. A `luni` block overrides the legacy MacRoman
    /// name when present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Derived feature set.
    pub fn features(&self) -> LayerFeatures {
        self.features
    }

    /// Raw tagged-block region of the extra data (where descriptors live);
    /// empty when absent.
    pub fn descriptor_bytes(&self) -> &[u8] {
        &self.extra[self.tagged_offset.min(self.extra.len())..]
    }

    /// Derived layer type; a total function of features and channel count.
    pub fn layer_type(&self) -> LayerType {
        let f = &self.features;
        if f.is_group_end {
            LayerType::GroupEnd
        } else if f.is_group_start {
            LayerType::GroupStart
        } else if f.has_text {
            LayerType::Text
        } else if f.has_smart_object {
            LayerType::SmartObject
        } else if f.has_adjustment {
            LayerType::Adjustment
        } else if f.has_fill {
            LayerType::Fill
        } else if f.has_effects {
            LayerType::Effects
        } else if f.has_3d {
            LayerType::ThreeD
        } else if f.has_video {
            LayerType::Video
        } else if !self.channels.is_empty() {
            LayerType::Pixel
        } else {
            LayerType::Empty
        }
    }

    /// Background-layer criteria that do not depend on the layer's position:
    /// background flag set, no transparency channel, no layer mask, no
    /// vector mask, and exactly `base_channel_count` channels.
    pub(crate) fn is_background_candidate(&self, base_channel_count: usize) -> bool {
        if self.flags & 0x04 == 0 {
            return false;
        }
        if self.channels.iter().any(|ch| ch.id() == -1) {
            return false;
        }
        if self.mask_data_len > 0 {
            return false;
        }
        if self.features.has_vector_mask {
            return false;
        }
        self.channels.len() == base_channel_count
    }
}

/// Parsed layer-and-mask-information section.
#[derive(Debug, Default)]
pub(crate) struct LayerInfo {
    pub layers: Vec<LayerRecord>,
    pub has_transparency_layer: bool,
}

/// One tagged block inside a layer's extra data.
pub(crate) struct TaggedBlock<'a> {
    pub key: [u8; 4],
    pub payload: &'a [u8],
}

/// Iterator over the tagged-block region of extra data.
///
/// Stops at the first block with a bad signature or an implausible length.
/// The final block is yielded even when its even-padding byte is missing.
pub(crate) struct TaggedBlocks<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> TaggedBlocks<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, done: false }
    }
}

impl<'a> Iterator for TaggedBlocks<'a> {
    type Item = TaggedBlock<'a>;

    fn next(&mut self) -> Option<TaggedBlock<'a>> {
        if self.done {
            return None;
        }
        let data: &'a [u8] = self.data;
        let remaining = &data[self.pos..];
        if remaining.len() < 12 {
            return None;
        }

        let sig = BigEndian::read_u32(remaining);
        if sig != SIG_8BIM && sig != SIG_8B64 {
            self.done = true;
            return None;
        }

        let key = [remaining[4], remaining[5], remaining[6], remaining[7]];
        let block_len = BigEndian::read_u32(&remaining[8..]) as usize;
        if block_len > remaining.len() - 12 {
            self.done = true;
            return None;
        }
        let payload = &remaining[12..12 + block_len];

        // Payloads are padded to even length; a final unpadded block is
        // still yielded, then iteration ends.
        let advance = 12 + block_len + (block_len & 1);
        if advance <= remaining.len() {
            self.pos += advance;
        } else {
            self.done = true;
        }

        Some(TaggedBlock { key, payload })
    }
}

/// Result of splitting a layer's extra-data blob into its three fixed
/// sub-regions plus the tagged-block region.
pub(crate) struct ExtraParts<'a> {
    pub mask_data_len: u32,
    pub legacy_name: Option<&'a [u8]>,
    /// Offset of the tagged-block region within the blob.
    pub tagged_offset: usize,
}

/// Splits extra data into mask data, blending ranges, Pascal name (padded to
/// a multiple of four including its length byte) and the tagged-block tail.
///
/// Truncated or inconsistent sub-lengths end the scan early with an empty
/// tagged region, mirroring the defensive posture needed for real files.
pub(crate) fn split_extra(extra: &[u8]) -> ExtraParts<'_> {
    let mut pos = 0usize;
    let mut mask_data_len = 0u32;

    // Layer mask data: 4-byte length + data.
    if extra.len() - pos >= 4 {
        let len = BigEndian::read_u32(&extra[pos..]);
        mask_data_len = len;
        pos += 4;
        let len = len as usize;
        if len > extra.len() - pos {
            return ExtraParts { mask_data_len, legacy_name: None, tagged_offset: extra.len() };
        }
        pos += len;
    }

    // Blending ranges: 4-byte length + data.
    if extra.len() - pos >= 4 {
        let len = BigEndian::read_u32(&extra[pos..]) as usize;
        pos += 4;
        if len > extra.len() - pos {
            return ExtraParts { mask_data_len, legacy_name: None, tagged_offset: extra.len() };
        }
        pos += len;
    }

    // Pascal name, total (length byte + bytes) padded to a multiple of 4.
    let mut legacy_name = None;
    if extra.len() - pos >= 1 {
        let name_len = usize::from(extra[pos]);
        let mut total = 1 + name_len;
        if total % 4 != 0 {
            total += 4 - total % 4;
        }
        if total > extra.len() - pos {
            return ExtraParts { mask_data_len, legacy_name: None, tagged_offset: extra.len() };
        }
        if name_len > 0 {
            legacy_name = Some(&extra[pos + 1..pos + 1 + name_len]);
        }
        pos += total;
    }

    ExtraParts { mask_data_len, legacy_name, tagged_offset: pos }
}

/// Applies feature detection and name overrides from one tagged block.
fn apply_tagged_block(layer: &mut LayerRecord, block: &TaggedBlock<'_>) {
    match &block.key {
        b"TySh" | b"tySh" => layer.features.has_text = true,
        b"SoLd" | b"SoLE" => layer.features.has_smart_object = true,
        b"lfx2" => layer.features.has_effects = true,
        b"vmsk" | b"vmns" => layer.features.has_vector_mask = true,
        b"SoCo" | b"GdFl" | b"PtFl" => layer.features.has_fill = true,
        b"vtrk" => layer.features.has_video = true,
        b"lsct" => {
            if block.payload.len() >= 4 {
                match BigEndian::read_u32(block.payload) {
                    1 | 2 => layer.features.is_group_start = true,
                    3 => layer.features.is_group_end = true,
                    _ => {}
                }
            }
        }
        b"luni" => {
            if block.payload.len() >= 4 {
                let char_count = BigEndian::read_u32(block.payload) as usize;
                let utf16_bytes = char_count * 2;
                if 4 + utf16_bytes <= block.payload.len() {
                    let mut name = utf16be_to_utf8(&block.payload[4..4 + utf16_bytes]);
                    while name.ends_with('\0') {
                        name.pop();
                    }
                    // Unicode name replaces the legacy MacRoman name.
                    layer.name = Some(name);
                }
            }
        }
        key if key.starts_with(b"adj") => layer.features.has_adjustment = true,
        key if key.starts_with(b"3dL") => layer.features.has_3d = true,
        b"brit" | b"brtC" | b"levl" | b"curv" | b"hue " | b"hue2" | b"blnc" | b"vibA"
        | b"expA" | b"mixr" | b"selc" | b"thrs" | b"post" | b"phfl" | b"grdm" | b"clrL" => {
            layer.features.has_adjustment = true;
        }
        _ => {}
    }
}

/// Parses a layer's extra-data blob in place: name, mask length, features.
fn parse_extra_data(layer: &mut LayerRecord) {
    let extra = std::mem::take(&mut layer.extra);

    let parts = split_extra(&extra);
    layer.mask_data_len = parts.mask_data_len;
    layer.tagged_offset = parts.tagged_offset;
    if let Some(raw) = parts.legacy_name {
        layer.name = Some(macroman_to_utf8(raw));
    }

    for block in TaggedBlocks::new(&extra[parts.tagged_offset..]) {
        apply_tagged_block(layer, &block);
    }

    layer.extra = extra;
}

/// Parses the layer-and-mask-information section at the current position.
pub(crate) fn parse_layer_info<S: ByteSource + ?Sized>(
    source: &mut S,
    header: &Header,
) -> PsdResult<LayerInfo> {
    let is_large = header.is_large;
    let mut info = LayerInfo::default();

    // Outer section length: 4 bytes standard, 8 bytes large. Large files
    // are probed with a seek; an end past the stream falls back to 4 bytes.
    let section_len_pos = source.tell()?;
    let mut section_length = source.read_length(is_large)?;
    if section_length == 0 {
        return Ok(info);
    }

    let mut section_start = source.tell()?;
    let mut section_end = section_start + section_length;
    if is_large {
        match source.seek(section_end) {
            Ok(_) => {
                source.seek(section_start)?;
            }
            Err(_) => {
                tracing::debug!("outer layer section length rereading as 4 bytes");
                source.seek(section_len_pos)?;
                section_length = u64::from(source.read_u32()?);
                section_start = source.tell()?;
                section_end = section_start + section_length;
            }
        }
    }

    // Layer-info subsection length, with the same 4-byte fallback when the
    // 8-byte reading runs past the outer section.
    let layer_info_len_pos = source.tell()?;
    let mut layer_info_length = source.read_length(is_large)?;
    let mut layer_info_start = source.tell()?;
    let mut layer_info_end = layer_info_start + layer_info_length;
    if layer_info_end > section_end && is_large {
        tracing::debug!("layer-info subsection length rereading as 4 bytes");
        source.seek(layer_info_len_pos)?;
        layer_info_length = u64::from(source.read_u32()?);
        layer_info_start = source.tell()?;
        layer_info_end = layer_info_start + layer_info_length;
    }
    if layer_info_end > section_end {
        return Err(PsdError::CorruptData(
            "layer-info subsection extends past section end".into(),
        ));
    }

    let raw_count = source.read_u16()? as i16;
    let mut layer_count = i32::from(raw_count);
    if layer_count < 0 {
        info.has_transparency_layer = true;
        layer_count = -layer_count;
    }

    let mut layers: Vec<LayerRecord> = Vec::with_capacity(layer_count as usize);

    'records: for index in 0..layer_count {
        let mut layer = LayerRecord::empty();

        layer.bounds.top = source.read_i32()?;
        layer.bounds.left = source.read_i32()?;
        layer.bounds.bottom = source.read_i32()?;
        layer.bounds.right = source.read_i32()?;

        let b = layer.bounds;
        let mut bounds_invalid = [b.top, b.left, b.bottom, b.right]
            .iter()
            .any(|&v| v > MAX_REASONABLE_COORD || v < -MAX_REASONABLE_COORD)
            || b.bottom < b.top
            || b.right < b.left;

        // A first record whose fields line up with the header dimensions
        // plus a huge top coordinate means the reader landed inside the
        // header, not on a layer record.
        if !bounds_invalid
            && index == 0
            && b.right == header.height as i32
            && b.top > MAX_REASONABLE_COORD
            && b.left == 0
            && b.bottom == 0
        {
            bounds_invalid = true;
        }

        // A full-image layer is legitimate.
        if b.top == 0
            && b.left == 0
            && b.bottom == header.height as i32
            && b.right == header.width as i32
        {
            bounds_invalid = false;
        }
        layer.bounds_invalid = bounds_invalid;

        let mut channel_count = source.read_u16()?;
        if channel_count > crate::header::MAX_CHANNELS {
            // Channel count past the format limit means misalignment; treat
            // the layer as empty.
            channel_count = 0;
        }

        for _ in 0..channel_count {
            let id = source.read_u16()? as i16;

            let chan_len_pos = source.tell()?;
            let mut length = source.read_length(is_large)?;

            // Large-format channel lengths are nominally 8 bytes, but 4-byte
            // writers exist. Confirm against the remaining subsection bytes.
            if is_large {
                let after = source.tell()?;
                if after < layer_info_end {
                    let remaining = layer_info_end - after;
                    if length > remaining {
                        tracing::debug!(length, "channel length rereading as 4 bytes");
                        source.seek(chan_len_pos)?;
                        length = u64::from(source.read_u32()?);
                    }
                }
            }

            layer.channels.push(ChannelData::new(id, length));
        }

        layer.blend_sig = source.read_u32()?;
        layer.blend_key = source.read_u32()?;
        if layer.blend_sig != SIG_8BIM && layer.blend_sig != SIG_8B64 && bounds_invalid {
            // Bad signature on top of bad bounds confirms misalignment;
            // fall back to a sane blend mode.
            layer.blend_sig = SIG_8BIM;
            layer.blend_key = BLEND_KEY_NORMAL;
        }

        layer.opacity = source.read_u8()?;
        layer.clipping = source.read_u8()?;
        layer.flags = source.read_u8()?;
        let _filler = source.read_u8()?;

        let extra_length = source.read_u32()?;

        if extra_length > MAX_EXTRA_LENGTH {
            // Misaligned or unsupported record. Empty the layer, then skip
            // the declared bytes so the next record stays aligned.
            layer.channels.clear();
            layer.bounds = LayerBounds::default();
            layer.bounds_invalid = false;

            let pos = source.tell()?;
            if pos + u64::from(extra_length) > section_end {
                // The declared skip runs into the channel image data; stop
                // parsing layer records here.
                tracing::debug!(index, extra_length, "extra data overruns section, stopping");
                source.seek(section_end)?;
                layers.push(layer);
                break 'records;
            }
            source.skip(u64::from(extra_length))?;
        } else if extra_length > 0 {
            let mut extra = vec![0u8; extra_length as usize];
            source.read_exact(&mut extra)?;
            layer.extra = extra;
            parse_extra_data(&mut layer);
        }

        if source.tell()? > layer_info_end {
            return Err(PsdError::CorruptData(
                "layer records overran the layer-info subsection".into(),
            ));
        }

        layers.push(layer);
    }

    // Channel image data: all compression payloads follow the records in a
    // second pass. Per the published format the stored per-channel length
    // includes the 2-byte compression field, but payload-only writers exist.
    // Total byte accounting over the subsection disambiguates.
    let channel_data_start = source.tell()?;
    if layer_info_end < channel_data_start {
        return Err(PsdError::CorruptData(
            "channel image data starts past the layer-info subsection".into(),
        ));
    }
    let remaining = layer_info_end - channel_data_start;

    let mut sum_lengths: u64 = 0;
    let mut total_channels: u64 = 0;
    for layer in &layers {
        total_channels += layer.channels.len() as u64;
        for ch in &layer.channels {
            sum_lengths += ch.declared_length;
        }
    }
    let lengths_exclude_prefix = sum_lengths + 2 * total_channels == remaining;
    if lengths_exclude_prefix {
        tracing::debug!("per-channel lengths are payload-only");
    }

    for layer in &mut layers {
        for ch in &mut layer.channels {
            let compression = source.read_u16()?;
            let Some(kind) = Compression::from_raw(compression) else {
                return Err(PsdError::CorruptData(format!(
                    "channel compression kind {compression}"
                )));
            };
            ch.compression = kind;

            let payload_len = if lengths_exclude_prefix {
                ch.declared_length
            } else {
                if ch.declared_length < 2 {
                    return Err(PsdError::CorruptData(
                        "channel length smaller than its compression field".into(),
                    ));
                }
                ch.declared_length - 2
            };
            ch.declared_length = payload_len;

            let mut payload = vec![0u8; payload_len as usize];
            source.read_exact(&mut payload)?;
            ch.compressed = payload;
        }
    }

    if source.tell()? != layer_info_end {
        source.seek(layer_info_end)?;
    }

    // Global layer mask info: 4-byte length, contents skipped.
    let global_mask_length = source.read_u32()?;
    if global_mask_length > 0 {
        source.skip(u64::from(global_mask_length))?;
    }

    // Additional subsections may follow inside the outer section; realign
    // to its end so the composite image data parses from the right place.
    let pos = source.tell()?;
    if pos < section_end {
        source.seek(section_end)?;
    } else if pos > section_end {
        return Err(PsdError::CorruptData(
            "layer-and-mask section overran its declared end".into(),
        ));
    }

    info.layers = layers;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(key: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"8BIM");
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        if payload.len() % 2 != 0 {
            buf.push(0);
        }
        buf
    }

    /// Extra data with empty mask/blend regions and a padded Pascal name.
    fn extra_with(name: &[u8], blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes()); // mask data
        buf.extend_from_slice(&0u32.to_be_bytes()); // blending ranges
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);
        while (buf.len() - 8) % 4 != 0 {
            buf.push(0);
        }
        for block in blocks {
            buf.extend_from_slice(block);
        }
        buf
    }

    fn layer_from_extra(extra: Vec<u8>) -> LayerRecord {
        let mut layer = LayerRecord::empty();
        layer.extra = extra;
        parse_extra_data(&mut layer);
        layer
    }

    #[test]
    fn test_legacy_name_macroman() {
        let layer = layer_from_extra(extra_with(&[0x43, 0x61, 0x66, 0x8E], &[]));
        assert_eq!(layer.name(), Some("Caf\u{00E9}"));
    }

    #[test]
    fn test_unicode_name_overrides_legacy() {
        let mut luni = 5u32.to_be_bytes().to_vec();
        for unit in "Neu\u{00DF}!".encode_utf16() {
            luni.extend_from_slice(&unit.to_be_bytes());
        }
        let layer = layer_from_extra(extra_with(b"old", &[tagged(b"luni", &luni)]));
        assert_eq!(layer.name(), Some("Neu\u{00DF}!"));
    }

    #[test]
    fn test_feature_keys() {
        let layer = layer_from_extra(extra_with(
            b"x",
            &[
                tagged(b"TySh", &[0, 1]),
                tagged(b"lfx2", &[]),
                tagged(b"vmsk", &[1, 2, 3, 4]),
            ],
        ));
        assert!(layer.features.has_text);
        assert!(layer.features.has_effects);
        assert!(layer.features.has_vector_mask);
        assert!(!layer.features.has_fill);
    }

    #[test]
    fn test_adjustment_keys_and_prefix() {
        for key in [b"levl", b"curv", b"hue ", b"vibA", b"adjX"] {
            let layer = layer_from_extra(extra_with(b"a", &[tagged(key, &[0; 4])]));
            assert!(layer.features.has_adjustment, "key {key:?}");
        }
    }

    #[test]
    fn test_group_markers() {
        let layer =
            layer_from_extra(extra_with(b"g", &[tagged(b"lsct", &1u32.to_be_bytes())]));
        assert!(layer.features.is_group_start);
        assert_eq!(layer.layer_type(), LayerType::GroupStart);

        let layer =
            layer_from_extra(extra_with(b"g", &[tagged(b"lsct", &3u32.to_be_bytes())]));
        assert!(layer.features.is_group_end);
        assert_eq!(layer.layer_type(), LayerType::GroupEnd);
    }

    #[test]
    fn test_layer_type_priority() {
        let mut layer = LayerRecord::empty();
        layer.features.has_text = true;
        layer.features.has_effects = true;
        assert_eq!(layer.layer_type(), LayerType::Text);

        layer.features.is_group_end = true;
        assert_eq!(layer.layer_type(), LayerType::GroupEnd);

        let mut layer = LayerRecord::empty();
        assert_eq!(layer.layer_type(), LayerType::Empty);
        layer.channels.push(ChannelData::new(0, 0));
        assert_eq!(layer.layer_type(), LayerType::Pixel);
    }

    #[test]
    fn test_tagged_blocks_stop_on_bad_signature() {
        let mut buf = tagged(b"lfx2", &[1, 2]);
        buf.extend_from_slice(b"JUNKJUNKJUNKJUNK");
        let blocks: Vec<_> = TaggedBlocks::new(&buf).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(&blocks[0].key, b"lfx2");
    }

    #[test]
    fn test_tagged_blocks_final_unpadded() {
        // Odd-length payload with the pad byte missing entirely
        let mut buf = Vec::new();
        buf.extend_from_slice(b"8BIM");
        buf.extend_from_slice(b"lfx2");
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&[7, 8, 9]);
        let blocks: Vec<_> = TaggedBlocks::new(&buf).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].payload, &[7, 8, 9]);
    }

    #[test]
    fn test_split_extra_truncated_mask() {
        // Mask length claims more than the blob holds
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(&[0; 4]);
        let parts = split_extra(&buf);
        assert_eq!(parts.mask_data_len, 100);
        assert_eq!(parts.tagged_offset, buf.len());
        assert!(parts.legacy_name.is_none());
    }

    #[test]
    fn test_background_candidate() {
        let mut layer = LayerRecord::empty();
        layer.flags = 0x04;
        layer.channels = vec![
            ChannelData::new(0, 0),
            ChannelData::new(1, 0),
            ChannelData::new(2, 0),
        ];
        assert!(layer.is_background_candidate(3));
        assert!(!layer.is_background_candidate(4));

        // Transparency channel disqualifies
        layer.channels.push(ChannelData::new(-1, 0));
        assert!(!layer.is_background_candidate(4));
        layer.channels.pop();

        // Mask data disqualifies
        layer.mask_data_len = 20;
        assert!(!layer.is_background_candidate(3));
        layer.mask_data_len = 0;

        // Vector mask disqualifies
        layer.features.has_vector_mask = true;
        assert!(!layer.is_background_candidate(3));
        layer.features.has_vector_mask = false;

        // Background flag required
        layer.flags = 0;
        assert!(!layer.is_background_candidate(3));
    }
}
