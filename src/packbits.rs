//! PackBits (RLE) decompression.
//!
//! PSD compression kind 1 stores each scanline PackBits-encoded, preceded by
//! a per-row byte-count table. The count entries are 2 bytes wide in the
//! standard format and 4 bytes wide in the large-document format, but real
//! writers disagree, so [`detect_count_width`] resolves the width by byte
//! accounting against the payload.
//!
//! PackBits header bytes: `0..=127` copy the next `header + 1` literal
//! bytes, `128` is a no-op, `129..=255` replicate the next byte
//! `257 - header` times.

use crate::error::{PsdError, PsdResult};
use byteorder::{BigEndian, ByteOrder};

/// Width of the per-row byte-count entries in an RLE payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountWidth {
    /// 2-byte counts (standard format default).
    Two,
    /// 4-byte counts (large-document format default).
    Four,
}

impl RowCountWidth {
    /// Entry size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            RowCountWidth::Two => 2,
            RowCountWidth::Four => 4,
        }
    }

    fn read_entry(self, table: &[u8], row: usize) -> u64 {
        match self {
            RowCountWidth::Two => u64::from(BigEndian::read_u16(&table[row * 2..])),
            RowCountWidth::Four => u64::from(BigEndian::read_u32(&table[row * 4..])),
        }
    }
}

/// Decodes one PackBits-encoded row.
///
/// Exactly `src.len()` input bytes must be consumed and exactly `dst.len()`
/// output bytes produced; any mismatch is corruption.
pub fn decode_row(src: &[u8], dst: &mut [u8]) -> PsdResult<()> {
    let mut si = 0;
    let mut di = 0;

    while si < src.len() && di < dst.len() {
        let header = src[si];
        si += 1;

        if header < 128 {
            let count = usize::from(header) + 1;
            if si + count > src.len() || di + count > dst.len() {
                return Err(PsdError::CorruptData("PackBits literal run overruns".into()));
            }
            dst[di..di + count].copy_from_slice(&src[si..si + count]);
            si += count;
            di += count;
        } else if header == 128 {
            // No-op per the PackBits specification.
        } else {
            let count = 257 - usize::from(header);
            if si >= src.len() {
                return Err(PsdError::CorruptData("PackBits replicate run truncated".into()));
            }
            if di + count > dst.len() {
                return Err(PsdError::CorruptData("PackBits replicate run overruns".into()));
            }
            let value = src[si];
            si += 1;
            dst[di..di + count].fill(value);
            di += count;
        }
    }

    if si != src.len() || di != dst.len() {
        return Err(PsdError::CorruptData(format!(
            "PackBits row consumed {si}/{} bytes, produced {di}/{}",
            src.len(),
            dst.len()
        )));
    }
    Ok(())
}

/// Decodes a full RLE payload: row-count table followed by row data.
///
/// `buffer` must contain exactly the table (`rows * width.bytes()`) plus the
/// summed row data; any slack or shortfall is corruption. Returns
/// `rows * row_bytes` decoded bytes.
pub fn decode_rows(
    buffer: &[u8],
    width: RowCountWidth,
    rows: usize,
    row_bytes: usize,
) -> PsdResult<Vec<u8>> {
    let table_bytes = rows
        .checked_mul(width.bytes())
        .ok_or_else(|| PsdError::OutOfRange("RLE row-count table size overflow".into()))?;
    if buffer.len() < table_bytes {
        return Err(PsdError::CorruptData("RLE payload shorter than count table".into()));
    }

    let table = &buffer[..table_bytes];
    let mut total: u64 = 0;
    for row in 0..rows {
        total += width.read_entry(table, row);
    }
    if table_bytes as u64 + total != buffer.len() as u64 {
        return Err(PsdError::CorruptData(format!(
            "RLE byte accounting mismatch: table {table_bytes} + rows {total} != payload {}",
            buffer.len()
        )));
    }

    let mut out = vec![0u8; rows * row_bytes];
    let data = &buffer[table_bytes..];
    let mut offset = 0usize;
    for row in 0..rows {
        let row_len = width.read_entry(table, row) as usize;
        decode_row(
            &data[offset..offset + row_len],
            &mut out[row * row_bytes..(row + 1) * row_bytes],
        )?;
        offset += row_len;
    }

    Ok(out)
}

/// Resolves the row-count width of a layer-channel RLE payload in memory.
///
/// Computes the total payload size implied by each width; the width whose
/// total matches the payload exactly wins. When both match, 2-byte counts
/// are preferred. When neither matches, the payload is corrupt.
pub fn detect_count_width(buffer: &[u8], rows: usize) -> PsdResult<RowCountWidth> {
    let matches = |width: RowCountWidth| -> bool {
        let table_bytes = match rows.checked_mul(width.bytes()) {
            Some(n) => n,
            None => return false,
        };
        if buffer.len() < table_bytes {
            return false;
        }
        let mut total = table_bytes as u64;
        for row in 0..rows {
            total += width.read_entry(&buffer[..table_bytes], row);
        }
        total == buffer.len() as u64
    };

    let two = matches(RowCountWidth::Two);
    let four = matches(RowCountWidth::Four);
    match (two, four) {
        (true, _) => Ok(RowCountWidth::Two),
        (false, true) => Ok(RowCountWidth::Four),
        (false, false) => Err(PsdError::CorruptData(
            "RLE payload matches neither 2-byte nor 4-byte row counts".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_row_mixed_runs() {
        // 3 literals, replicate DD x3, 1 literal => AA BB CC DD DD DD EE
        let src = [0x02, 0xAA, 0xBB, 0xCC, 0xFE, 0xDD, 0x00, 0xEE];
        let mut dst = [0u8; 7];
        decode_row(&src, &mut dst).unwrap();
        assert_eq!(dst, [0xAA, 0xBB, 0xCC, 0xDD, 0xDD, 0xDD, 0xEE]);
    }

    #[test]
    fn test_decode_row_noop_header() {
        // 0x80 between runs is skipped
        let src = [0x80, 0x01, 0x10, 0x20, 0x80, 0xFF, 0x30, 0x30];
        let mut dst = [0u8; 5];
        decode_row(&src, &mut dst).unwrap();
        assert_eq!(dst, [0x10, 0x20, 0x30, 0x30, 0x30]);
    }

    #[test]
    fn test_decode_row_exact_end() {
        // Final token lands exactly at input end and output width
        let src = [0xFF, 0x42, 0xFF, 0x42];
        let mut dst = [0u8; 4];
        decode_row(&src, &mut dst).unwrap();
        assert_eq!(dst, [0x42; 4]);
    }

    #[test]
    fn test_decode_row_width_mismatch() {
        let src = [0x00, 0xAA];
        let mut dst = [0u8; 2];
        assert!(decode_row(&src, &mut dst).is_err());

        // Unconsumed trailing input
        let src = [0x00, 0xAA, 0x00, 0xBB];
        let mut dst = [0u8; 1];
        assert!(decode_row(&src, &mut dst).is_err());
    }

    #[test]
    fn test_decode_row_truncated_replicate() {
        let src = [0xFE];
        let mut dst = [0u8; 3];
        assert!(decode_row(&src, &mut dst).is_err());
    }

    fn two_row_payload() -> Vec<u8> {
        // Two rows of width 4: row 0 = literal 4 bytes (5 encoded),
        // row 1 = replicate 0x07 x4 (2 encoded)
        let mut buf = vec![0x00, 0x05, 0x00, 0x02];
        buf.extend_from_slice(&[0x03, 1, 2, 3, 4]);
        buf.extend_from_slice(&[0xFD, 0x07]);
        buf
    }

    #[test]
    fn test_decode_rows_with_table() {
        let buf = two_row_payload();
        let out = decode_rows(&buf, RowCountWidth::Two, 2, 4).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 7, 7, 7, 7]);
    }

    #[test]
    fn test_decode_rows_rejects_slack() {
        let mut buf = two_row_payload();
        buf.push(0);
        assert!(decode_rows(&buf, RowCountWidth::Two, 2, 4).is_err());
    }

    #[test]
    fn test_detect_count_width_two() {
        let buf = two_row_payload();
        assert_eq!(detect_count_width(&buf, 2).unwrap(), RowCountWidth::Two);
    }

    #[test]
    fn test_detect_count_width_four() {
        // One row of width 3, 4-byte count table
        let mut buf = vec![0x00, 0x00, 0x00, 0x02];
        buf.extend_from_slice(&[0xFE, 0xAB]);
        assert_eq!(detect_count_width(&buf, 1).unwrap(), RowCountWidth::Four);
        let out = decode_rows(&buf, RowCountWidth::Four, 1, 3).unwrap();
        assert_eq!(out, [0xAB, 0xAB, 0xAB]);
    }

    #[test]
    fn test_detect_count_width_prefers_two_on_tie() {
        // Degenerate zero-row payload satisfies both widths
        assert_eq!(detect_count_width(&[], 0).unwrap(), RowCountWidth::Two);
    }

    #[test]
    fn test_detect_count_width_neither() {
        let buf = [0x00, 0x09, 0xFF];
        assert!(detect_count_width(&buf, 1).is_err());
    }
}
