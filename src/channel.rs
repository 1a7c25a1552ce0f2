//! Per-layer channel data with lazy decoding.
//!
//! Channel payloads are read during layer parsing but stay compressed until
//! a caller asks for pixels. Decoding happens at most once; the cache moves
//! `Pending -> Decoded` or `Pending -> Unavailable` (compression kind not
//! decodable in this build) and never transitions again.

use crate::error::{PsdError, PsdResult};
use crate::header::scanline_bytes;
use crate::{packbits, zip, Compression};

/// Lazy decode cache state.
#[derive(Debug, Clone)]
pub(crate) enum DecodeState {
    /// Not yet decoded.
    Pending,
    /// Decoded plane bytes.
    Decoded(Vec<u8>),
    /// Compression kind cannot be decoded in this build; the compressed
    /// payload remains available.
    Unavailable,
}

/// One channel of a layer: descriptor fields plus the compressed payload and
/// the lazy decode cache.
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub(crate) id: i16,
    pub(crate) compression: Compression,
    pub(crate) compressed: Vec<u8>,
    pub(crate) state: DecodeState,
    /// Payload length as declared by the channel descriptor (compression
    /// prefix already excluded).
    pub(crate) declared_length: u64,
}

impl ChannelData {
    pub(crate) fn new(id: i16, declared_length: u64) -> Self {
        Self {
            id,
            compression: Compression::Raw,
            compressed: Vec::new(),
            state: DecodeState::Pending,
            declared_length,
        }
    }

    /// Channel id: 0.. are color planes, -1 transparency, -2 user mask,
    /// -3 vector mask.
    pub fn id(&self) -> i16 {
        self.id
    }

    /// Original compression kind of the payload.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Decoded bytes if decoding has happened, otherwise `None`.
    pub fn decoded(&self) -> Option<&[u8]> {
        match &self.state {
            DecodeState::Decoded(data) => Some(data),
            _ => None,
        }
    }

    /// The compressed payload as stored in the file.
    pub fn compressed(&self) -> &[u8] {
        &self.compressed
    }

    /// Decodes the channel for a layer of `width` x `height` at `depth`
    /// bits per sample. Idempotent.
    ///
    /// An undecodable compression kind marks the channel unavailable and
    /// returns `Ok`; the caller can still reach the compressed payload.
    pub(crate) fn decode(&mut self, width: u32, height: u32, depth: u16) -> PsdResult<()> {
        match self.state {
            DecodeState::Decoded(_) | DecodeState::Unavailable => return Ok(()),
            DecodeState::Pending => {}
        }

        let scanline = scanline_bytes(width, depth) as usize;
        let expected = scanline * height as usize;

        let decoded = match self.compression {
            Compression::Raw => {
                // Writers sometimes pad raw payloads; trailing bytes beyond
                // the expected plane size are ignored.
                if self.compressed.len() < expected {
                    return Err(PsdError::CorruptData(format!(
                        "raw channel payload {} shorter than plane {expected}",
                        self.compressed.len()
                    )));
                }
                self.compressed[..expected].to_vec()
            }
            Compression::Rle => {
                let width = packbits::detect_count_width(&self.compressed, height as usize)?;
                packbits::decode_rows(&self.compressed, width, height as usize, scanline)?
            }
            Compression::Zip => match zip::decompress(&self.compressed, expected) {
                Ok(data) => data,
                Err(PsdError::UnsupportedCompression(_)) => {
                    self.state = DecodeState::Unavailable;
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            Compression::ZipPrediction => {
                let bytes_per_pixel = if depth == 1 { 1 } else { usize::from(depth / 8) };
                match zip::decompress_with_prediction(
                    &self.compressed,
                    expected,
                    scanline,
                    bytes_per_pixel,
                ) {
                    Ok(data) => data,
                    Err(PsdError::UnsupportedCompression(_)) => {
                        self.state = DecodeState::Unavailable;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.state = DecodeState::Decoded(decoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(compression: Compression, payload: Vec<u8>) -> ChannelData {
        let mut ch = ChannelData::new(0, payload.len() as u64);
        ch.compression = compression;
        ch.compressed = payload;
        ch
    }

    #[test]
    fn test_raw_decode_ignores_trailing_padding() {
        let mut ch = channel(Compression::Raw, vec![1, 2, 3, 4, 5, 6, 0, 0]);
        ch.decode(3, 2, 8).unwrap();
        assert_eq!(ch.decoded().unwrap(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_raw_decode_short_payload() {
        let mut ch = channel(Compression::Raw, vec![1, 2]);
        assert!(ch.decode(3, 2, 8).is_err());
    }

    #[test]
    fn test_rle_decode_two_byte_counts() {
        // 2 rows x 4 bytes, 2-byte count table
        let mut payload = vec![0x00, 0x02, 0x00, 0x02];
        payload.extend_from_slice(&[0xFD, 0xAA]); // row 0: AA x4
        payload.extend_from_slice(&[0xFD, 0xBB]); // row 1: BB x4
        let mut ch = channel(Compression::Rle, payload);
        ch.decode(4, 2, 8).unwrap();
        assert_eq!(ch.decoded().unwrap(), &[0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]);
    }

    #[test]
    fn test_rle_decode_four_byte_counts() {
        let mut payload = vec![0x00, 0x00, 0x00, 0x02];
        payload.extend_from_slice(&[0xFC, 0x11]); // 5 bytes of 0x11
        let mut ch = channel(Compression::Rle, payload);
        ch.decode(5, 1, 8).unwrap();
        assert_eq!(ch.decoded().unwrap(), &[0x11; 5]);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let mut ch = channel(Compression::Raw, vec![7, 7, 7, 7]);
        ch.decode(2, 2, 8).unwrap();
        let first = ch.decoded().unwrap().as_ptr();
        ch.decode(2, 2, 8).unwrap();
        assert_eq!(ch.decoded().unwrap().as_ptr(), first);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_zip_decode() {
        let plane = vec![42u8; 16];
        let payload = miniz_oxide::deflate::compress_to_vec_zlib(&plane, 6);
        let mut ch = channel(Compression::Zip, payload);
        ch.decode(4, 4, 8).unwrap();
        assert_eq!(ch.decoded().unwrap(), plane.as_slice());
    }

    #[cfg(not(feature = "deflate"))]
    #[test]
    fn test_zip_unavailable_without_deflate() {
        let mut ch = channel(Compression::Zip, vec![1, 2, 3]);
        ch.decode(4, 4, 8).unwrap();
        assert!(ch.decoded().is_none());
        assert_eq!(ch.compressed(), &[1, 2, 3]);
    }
}
