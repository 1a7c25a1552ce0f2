//! Text decoding for the two encodings PSD files carry.
//!
//! Legacy layer names and resource names use the MacRoman repertoire;
//! everything Unicode (layer name overrides, descriptor strings) is UTF-16BE.
//! Both decode to owned UTF-8 strings.

use byteorder::{BigEndian, ByteOrder};

/// MacRoman 0x80..=0xFF to Unicode code points.
const MACROMAN_HIGH: [u16; 128] = [
    0x00C4, 0x00C5, 0x00C7, 0x00C9, 0x00D1, 0x00D6, 0x00DC, 0x00E1, //
    0x00E0, 0x00E2, 0x00E4, 0x00E3, 0x00E5, 0x00E7, 0x00E9, 0x00E8, //
    0x00EA, 0x00EB, 0x00ED, 0x00EC, 0x00EE, 0x00EF, 0x00F1, 0x00F3, //
    0x00F2, 0x00F4, 0x00F6, 0x00F5, 0x00FA, 0x00F9, 0x00FB, 0x00FC, //
    0x2020, 0x00B0, 0x00A2, 0x00A3, 0x00A7, 0x2022, 0x00B6, 0x00DF, //
    0x00AE, 0x00A9, 0x2122, 0x00B4, 0x00A8, 0x2260, 0x00C6, 0x00D8, //
    0x221E, 0x00B1, 0x2264, 0x2265, 0x00A5, 0x00B5, 0x2202, 0x2211, //
    0x220F, 0x03C0, 0x222B, 0x00AA, 0x00BA, 0x03A9, 0x00E6, 0x00F8, //
    0x00BF, 0x00A1, 0x00AC, 0x221A, 0x0192, 0x2248, 0x2206, 0x00AB, //
    0x00BB, 0x2026, 0x00A0, 0x00C0, 0x00C3, 0x00D5, 0x0152, 0x0153, //
    0x2013, 0x2014, 0x201C, 0x201D, 0x2018, 0x2019, 0x00F7, 0x25CA, //
    0x00FF, 0x0178, 0x2044, 0x20AC, 0x2039, 0x203A, 0xFB01, 0xFB02, //
    0x2021, 0x00B7, 0x201A, 0x201E, 0x2030, 0x00C2, 0x00CA, 0x00C1, //
    0x00CB, 0x00C8, 0x00CD, 0x00CE, 0x00CF, 0x00CC, 0x00D3, 0x00D4, //
    0xF8FF, 0x00D2, 0x00DA, 0x00DB, 0x00D9, 0x0131, 0x02C6, 0x02DC, //
    0x00AF, 0x02D8, 0x02D9, 0x02DA, 0x00B8, 0x02DD, 0x02DB, 0x02C7, //
];

/// Converts MacRoman bytes to UTF-8.
///
/// Bytes below 0x80 map identically to Unicode; bytes at or above 0x80 use
/// the fixed MacRoman table.
pub fn macroman_to_utf8(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input {
        let cp = if b < 0x80 {
            u32::from(b)
        } else {
            u32::from(MACROMAN_HIGH[usize::from(b - 0x80)])
        };
        // Every table entry is a valid BMP scalar.
        out.push(char::from_u32(cp).unwrap_or('\u{FFFD}'));
    }
    out
}

/// Converts UTF-16BE bytes to UTF-8.
///
/// Surrogate pairs are combined; lone or mispaired surrogates decode to
/// U+FFFD. An odd trailing byte is dropped.
pub fn utf16be_to_utf8(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() / 2 * 3);
    let mut i = 0;
    while i + 1 < input.len() {
        let w1 = BigEndian::read_u16(&input[i..]);
        i += 2;

        let cp = if (0xD800..=0xDBFF).contains(&w1) {
            if i + 1 < input.len() {
                let w2 = BigEndian::read_u16(&input[i..]);
                if (0xDC00..=0xDFFF).contains(&w2) {
                    i += 2;
                    0x10000 + ((u32::from(w1) - 0xD800) << 10 | (u32::from(w2) - 0xDC00))
                } else {
                    0xFFFD
                }
            } else {
                0xFFFD
            }
        } else if (0xDC00..=0xDFFF).contains(&w1) {
            0xFFFD
        } else {
            u32::from(w1)
        };

        out.push(char::from_u32(cp).unwrap_or('\u{FFFD}'));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macroman_ascii_passthrough() {
        assert_eq!(macroman_to_utf8(b"Layer 1"), "Layer 1");
    }

    #[test]
    fn test_macroman_high_bytes() {
        // 0xA5 = bullet, 0xD0 = en dash, 0xD1 = em dash, 0xBD = omega
        assert_eq!(macroman_to_utf8(&[0xA5]), "\u{2022}");
        assert_eq!(macroman_to_utf8(&[0xD0, 0xD1]), "\u{2013}\u{2014}");
        assert_eq!(macroman_to_utf8(&[0xBD]), "\u{03A9}");
        // 0x8E = e acute
        assert_eq!(macroman_to_utf8(&[0x43, 0x61, 0x66, 0x8E]), "Caf\u{00E9}");
    }

    #[test]
    fn test_utf16_bmp() {
        let input = [0x00, 0x48, 0x00, 0x69, 0x4E, 0x16];
        assert_eq!(utf16be_to_utf8(&input), "Hi\u{4E16}");
    }

    #[test]
    fn test_utf16_surrogate_pair() {
        // U+1F600 = D83D DE00
        let input = [0xD8, 0x3D, 0xDE, 0x00];
        assert_eq!(utf16be_to_utf8(&input), "\u{1F600}");
    }

    #[test]
    fn test_utf16_lone_surrogates() {
        // High surrogate at end of input
        assert_eq!(utf16be_to_utf8(&[0xD8, 0x3D]), "\u{FFFD}");
        // Low surrogate with no preceding high
        assert_eq!(utf16be_to_utf8(&[0xDE, 0x00, 0x00, 0x41]), "\u{FFFD}A");
        // High surrogate followed by non-surrogate: replacement, then the
        // following unit decodes on its own
        assert_eq!(utf16be_to_utf8(&[0xD8, 0x3D, 0x00, 0x41]), "\u{FFFD}A");
    }

    #[test]
    fn test_utf16_odd_trailing_byte_dropped() {
        assert_eq!(utf16be_to_utf8(&[0x00, 0x41, 0x00]), "A");
    }
}
