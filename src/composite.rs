//! Composite (flattened) image-data section parsing.
//!
//! The section is a bare 2-byte compression kind followed by planar image
//! data for every channel; there is no length prefix. A missing section is
//! not an error: the document is simply returned without a composite.
//!
//! RLE row-count width differs between formats and writers disagree, so the
//! format-default width is tried first and the other width on failure.

use crate::error::{PsdError, PsdResult};
use crate::header::Header;
use crate::packbits::{self, RowCountWidth};
use crate::stream::ByteSource;
use crate::{zip, Compression};

/// Composite image data: decoded planar bytes plus the original compression.
#[derive(Debug, Default)]
pub(crate) struct CompositeImage {
    pub data: Option<Vec<u8>>,
    pub compression: Compression,
}

/// Parses the composite image-data section at the current position.
///
/// Errors of kind stream-eof, stream-invalid and unsupported-compression are
/// soft at the caller: the document stays valid without a composite.
pub(crate) fn parse_composite<S: ByteSource + ?Sized>(
    source: &mut S,
    header: &Header,
) -> PsdResult<CompositeImage> {
    let compression = match source.read_u16() {
        Ok(v) => v,
        Err(_) => {
            // No composite section at all.
            return Ok(CompositeImage::default());
        }
    };

    let Some(compression) = Compression::from_raw(compression) else {
        return Err(PsdError::UnsupportedCompression(compression));
    };

    let scanline = header.scanline_bytes();
    let expected64 = u64::from(header.channels) * u64::from(header.height) * scanline;
    let expected = usize::try_from(expected64)
        .map_err(|_| PsdError::OutOfRange(format!("composite size {expected64}")))?;

    let data = match compression {
        Compression::Raw => {
            let mut data = vec![0u8; expected];
            source.read_exact(&mut data)?;
            data
        }
        Compression::Rle => {
            let scanlines = header.height as usize * usize::from(header.channels);
            let counts_pos = source.tell()?;

            let order = if header.is_large {
                [RowCountWidth::Four, RowCountWidth::Two]
            } else {
                [RowCountWidth::Two, RowCountWidth::Four]
            };

            let mut decoded = None;
            for width in order {
                match try_decode_rle(source, counts_pos, scanlines, scanline as usize, width) {
                    Ok(data) if data.len() == expected => {
                        decoded = Some(data);
                        break;
                    }
                    Ok(_) | Err(_) => {
                        tracing::debug!(?width, "composite RLE attempt failed");
                    }
                }
            }
            decoded.ok_or_else(|| {
                PsdError::CorruptData("composite RLE data matches neither count width".into())
            })?
        }
        Compression::Zip | Compression::ZipPrediction => {
            // No length prefix; read up to twice the uncompressed size.
            let payload = read_up_to(source, expected.saturating_mul(2))?;
            if payload.is_empty() {
                return Err(PsdError::StreamEof);
            }
            if compression == Compression::Zip {
                zip::decompress(&payload, expected)?
            } else {
                let bytes_per_pixel = if header.depth == 1 {
                    1
                } else {
                    usize::from(header.depth / 8)
                };
                zip::decompress_with_prediction(&payload, expected, scanline as usize, bytes_per_pixel)?
            }
        }
    };

    Ok(CompositeImage {
        data: Some(data),
        compression,
    })
}

/// One composite RLE attempt with a specific row-count width. Seeks back to
/// the counts table, sums the counts, reads exactly that much row data and
/// decodes.
fn try_decode_rle<S: ByteSource + ?Sized>(
    source: &mut S,
    counts_pos: u64,
    scanlines: usize,
    row_bytes: usize,
    width: RowCountWidth,
) -> PsdResult<Vec<u8>> {
    source.seek(counts_pos)?;

    let table_bytes = scanlines * width.bytes();
    let mut buffer = vec![0u8; table_bytes];
    source.read_exact(&mut buffer)?;

    let mut total: u64 = 0;
    for row in 0..scanlines {
        let entry = match width {
            RowCountWidth::Two => {
                u64::from(u16::from_be_bytes([buffer[row * 2], buffer[row * 2 + 1]]))
            }
            RowCountWidth::Four => u64::from(u32::from_be_bytes([
                buffer[row * 4],
                buffer[row * 4 + 1],
                buffer[row * 4 + 2],
                buffer[row * 4 + 3],
            ])),
        };
        total += entry;
    }
    let total = usize::try_from(total)
        .map_err(|_| PsdError::OutOfRange(format!("RLE data size {total}")))?;

    // A wrong count width reads as absurd totals; pulling data with a
    // bounded read keeps the failed attempt cheap.
    let data = read_up_to(source, total)?;
    if data.len() != total {
        return Err(PsdError::StreamEof);
    }
    buffer.extend_from_slice(&data);

    packbits::decode_rows(&buffer, width, scanlines, row_bytes)
}

/// Reads up to `max` bytes from the source, stopping at end of stream.
fn read_up_to<S: ByteSource + ?Sized>(source: &mut S, max: usize) -> PsdResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 65536];
    while out.len() < max {
        let want = chunk.len().min(max - out.len());
        let n = source.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SliceSource;
    use crate::ColorMode;

    fn small_header(channels: u16, height: u32, width: u32, depth: u16, is_large: bool) -> Header {
        Header {
            is_large,
            channels,
            height,
            width,
            depth,
            color_mode: ColorMode::Rgb,
        }
    }

    #[test]
    fn test_missing_section_is_soft() {
        let header = small_header(3, 4, 4, 8, false);
        let mut src = SliceSource::new(&[]);
        let composite = parse_composite(&mut src, &header).unwrap();
        assert!(composite.data.is_none());
    }

    #[test]
    fn test_raw_composite() {
        let header = small_header(1, 2, 3, 8, false);
        let mut buf = 0u16.to_be_bytes().to_vec();
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let mut src = SliceSource::new(&buf);
        let composite = parse_composite(&mut src, &header).unwrap();
        assert_eq!(composite.data.unwrap(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(composite.compression, Compression::Raw);
    }

    #[test]
    fn test_raw_composite_truncated_is_eof() {
        let header = small_header(1, 2, 3, 8, false);
        let mut buf = 0u16.to_be_bytes().to_vec();
        buf.extend_from_slice(&[1, 2, 3]);
        let mut src = SliceSource::new(&buf);
        assert!(matches!(
            parse_composite(&mut src, &header).unwrap_err(),
            PsdError::StreamEof
        ));
    }

    #[test]
    fn test_bad_compression_kind() {
        let header = small_header(1, 1, 1, 8, false);
        let buf = 9u16.to_be_bytes();
        let mut src = SliceSource::new(&buf);
        assert!(matches!(
            parse_composite(&mut src, &header).unwrap_err(),
            PsdError::UnsupportedCompression(9)
        ));
    }

    fn rle_section(width: RowCountWidth, rows: &[&[u8]]) -> Vec<u8> {
        let mut table = Vec::new();
        let mut data = Vec::new();
        for row in rows {
            match width {
                RowCountWidth::Two => table.extend_from_slice(&(row.len() as u16).to_be_bytes()),
                RowCountWidth::Four => table.extend_from_slice(&(row.len() as u32).to_be_bytes()),
            }
            data.extend_from_slice(row);
        }
        let mut buf = 1u16.to_be_bytes().to_vec();
        buf.extend_from_slice(&table);
        buf.extend_from_slice(&data);
        buf
    }

    #[test]
    fn test_rle_standard_default_width() {
        let header = small_header(1, 2, 4, 8, false);
        let buf = rle_section(RowCountWidth::Two, &[&[0xFD, 0x10], &[0xFD, 0x20]]);
        let mut src = SliceSource::new(&buf);
        let composite = parse_composite(&mut src, &header).unwrap();
        assert_eq!(
            composite.data.unwrap(),
            [0x10, 0x10, 0x10, 0x10, 0x20, 0x20, 0x20, 0x20]
        );
    }

    #[test]
    fn test_rle_large_falls_back_to_two_byte() {
        // Large-document default is 4-byte counts; payload uses 2-byte.
        let header = small_header(1, 2, 4, 8, true);
        let buf = rle_section(RowCountWidth::Two, &[&[0xFD, 0x10], &[0xFD, 0x20]]);
        let mut src = SliceSource::new(&buf);
        let composite = parse_composite(&mut src, &header).unwrap();
        assert_eq!(composite.data.unwrap().len(), 8);
    }

    #[test]
    fn test_rle_large_four_byte_counts() {
        let header = small_header(1, 2, 4, 8, true);
        let buf = rle_section(RowCountWidth::Four, &[&[0xFD, 0x33], &[0xFD, 0x44]]);
        let mut src = SliceSource::new(&buf);
        let composite = parse_composite(&mut src, &header).unwrap();
        assert_eq!(
            composite.data.unwrap(),
            [0x33, 0x33, 0x33, 0x33, 0x44, 0x44, 0x44, 0x44]
        );
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_zip_composite() {
        let header = small_header(1, 2, 4, 8, false);
        let plane = [9u8; 8];
        let mut buf = 2u16.to_be_bytes().to_vec();
        buf.extend_from_slice(&miniz_oxide::deflate::compress_to_vec_zlib(&plane, 6));
        let mut src = SliceSource::new(&buf);
        let composite = parse_composite(&mut src, &header).unwrap();
        assert_eq!(composite.data.unwrap(), plane);
        assert_eq!(composite.compression, Compression::Zip);
    }
}
