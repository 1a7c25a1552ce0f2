//! EngineData decoding and default-style extraction.
//!
//! EngineData is a textual, PostScript-flavored serialization of text
//! rendering state carried as an opaque raw value inside the text
//! descriptor: `/Key value` pairs, dictionaries in `<< >>`, arrays in `[ ]`,
//! and strings in `( )` that usually begin with a UTF-16 byte-order mark.
//!
//! Style extraction treats the layer as a single run: font name from the
//! `/FontSet` list (picked by `/Font` index), size, tracking, leading,
//! justification and fill color.

use crate::error::{PsdError, PsdResult};
use crate::text::{Justification, TextStyle};
use crate::unicode::utf16be_to_utf8;

/// Converts an EngineData blob to readable UTF-8 text.
///
/// Parenthesised substrings are decoded through their byte-order mark
/// (`FE FF` big-endian, `FF FE` little-endian); other bytes are copied
/// as-is. Backslash escapes are honored when matching the closing
/// parenthesis. An unmatched `(` is an invalid structure.
pub(crate) fn engine_data_to_text(data: &[u8]) -> PsdResult<String> {
    let mut out = String::with_capacity(data.len());

    let mut i = 0;
    while i < data.len() {
        let c = data[i];

        if c != b'(' {
            out.push(char::from(c));
            i += 1;
            continue;
        }

        // Find the closing ')' respecting backslash escapes.
        let mut j = i + 1;
        let mut escaped = false;
        while j < data.len() {
            let cj = data[j];
            if !escaped && cj == b')' {
                break;
            }
            escaped = !escaped && cj == b'\\';
            j += 1;
        }
        if j >= data.len() {
            return Err(PsdError::InvalidFormat(
                "EngineData string without closing parenthesis".into(),
            ));
        }

        let inner = &data[i + 1..j];
        out.push('(');
        if inner.len() >= 2 && inner[0] == 0xFE && inner[1] == 0xFF {
            out.push_str(&utf16be_to_utf8(&inner[2..]));
        } else if inner.len() >= 2 && inner[0] == 0xFF && inner[1] == 0xFE {
            // Little-endian: swap pairs, then decode as big-endian.
            let body = &inner[2..];
            let mut swapped = Vec::with_capacity(body.len());
            for pair in body.chunks_exact(2) {
                swapped.push(pair[1]);
                swapped.push(pair[0]);
            }
            out.push_str(&utf16be_to_utf8(&swapped));
        } else {
            for &b in inner {
                out.push(char::from(b));
            }
        }
        out.push(')');

        i = j + 1;
    }

    Ok(out)
}

/// Finds `token` at an identifier boundary: the next character must not
/// continue the token name. Keeps `/Font` from matching inside `/FontSet`.
fn find_token(text: &str, token: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = text[from..].find(token) {
        let pos = from + rel;
        let after = text[pos + token.len()..].chars().next();
        match after {
            Some(c) if c.is_ascii_alphanumeric() => from = pos + token.len(),
            _ => return Some(pos),
        }
    }
    None
}

/// Parses a leading signed decimal number from `s`.
fn parse_number_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' || c == 'e' || c == 'E' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    s[..end].parse().ok()
}

fn number_after(text: &str, token: &str) -> Option<f64> {
    let pos = find_token(text, token)?;
    parse_number_prefix(&text[pos + token.len()..])
}

fn int_after(text: &str, token: &str) -> Option<i64> {
    number_after(text, token).map(|v| v as i64)
}

/// Font names from `/FontSet` entries' `/Name (...)` strings.
fn fontset_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();

    let Some(set_pos) = find_token(text, "/FontSet") else {
        return names;
    };
    let Some(bracket) = text[set_pos..].find('[') else {
        return names;
    };

    let mut rest = &text[set_pos + bracket + 1..];
    while let Some(name_pos) = find_token(rest, "/Name") {
        let after = &rest[name_pos + 5..];
        let Some(open) = after.find('(') else {
            rest = &rest[name_pos + 5..];
            continue;
        };
        let Some(close) = after[open + 1..].find(')') else {
            rest = &rest[name_pos + 5..];
            continue;
        };
        names.push(after[open + 1..open + 1 + close].to_string());
        rest = &after[open + 1 + close + 1..];
    }

    names
}

/// RGB floats after `/FillColor` `Values [ r g b ]`, clamped and scaled to
/// 0..=255 with alpha 255.
fn fill_color(text: &str) -> Option<[u8; 4]> {
    let pos = find_token(text, "/FillColor")?;
    let scope = &text[pos..];
    let scope = match scope.find("Values") {
        Some(v) => &scope[v..],
        None => scope,
    };
    let bracket = scope.find('[')?;
    let mut rest = &scope[bracket + 1..];

    let mut rgb = [0f64; 3];
    for channel in &mut rgb {
        let trimmed = rest.trim_start();
        let value = parse_number_prefix(trimmed)?;
        *channel = value.clamp(0.0, 1.0);
        // Advance past the parsed number.
        let consumed = trimmed
            .find(|c: char| c.is_whitespace() || c == ']')
            .unwrap_or(trimmed.len());
        rest = &trimmed[consumed..];
    }

    Some([
        (rgb[0] * 255.0 + 0.5) as u8,
        (rgb[1] * 255.0 + 0.5) as u8,
        (rgb[2] * 255.0 + 0.5) as u8,
        255,
    ])
}

/// Extracts the single-run default style from decoded EngineData text.
///
/// A missing font name or non-positive size is an invalid structure.
pub(crate) fn extract_style(text: &str) -> PsdResult<TextStyle> {
    let mut style = TextStyle {
        font_name: String::new(),
        size: 0.0,
        color_rgba: [0, 0, 0, 255],
        tracking: 0.0,
        leading: 0.0,
        justification: Justification::Left,
    };

    let font_idx = int_after(text, "/Font").unwrap_or(-1);
    let names = fontset_names(text);
    if !names.is_empty() {
        let pick = if font_idx >= 0 && (font_idx as usize) < names.len() {
            font_idx as usize
        } else {
            0
        };
        style.font_name = names[pick].clone();
    } else if let Some(name_pos) = find_token(text, "/Name") {
        // Fallback: first parenthesised string after any /Name
        let after = &text[name_pos..];
        if let Some(open) = after.find('(') {
            if let Some(close) = after[open + 1..].find(')') {
                style.font_name = after[open + 1..open + 1 + close].to_string();
            }
        }
    }

    if let Some(size) = number_after(text, "/FontSize") {
        style.size = size;
    }
    if let Some(tracking) = number_after(text, "/Tracking") {
        style.tracking = tracking;
    }
    match number_after(text, "/Leading") {
        Some(leading) => style.leading = leading,
        None => {
            if let Some(auto) = number_after(text, "/AutoLeading") {
                if style.size > 0.0 && auto > 0.0 {
                    style.leading = style.size * auto;
                }
            }
        }
    }
    if let Some(just) = int_after(text, "/Justification") {
        style.justification = match just {
            1 => Justification::Right,
            2 => Justification::Center,
            3 => Justification::Full,
            _ => Justification::Left,
        };
    }
    if let Some(color) = fill_color(text) {
        style.color_rgba = color;
    }

    if style.font_name.is_empty() || style.size <= 0.0 {
        return Err(PsdError::InvalidStructure(
            "EngineData lacks a usable font name or size".into(),
        ));
    }

    Ok(style)
}
