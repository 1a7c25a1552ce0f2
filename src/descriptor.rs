//! Photoshop action-descriptor parsing.
//!
//! Action descriptors are the recursive keyed-map structures Photoshop uses
//! for scriptable state: text layers, warp settings, effects. They appear
//! inside tagged blocks (principally `TySh`).
//!
//! Descriptors appear in the wild with and without a leading Unicode name,
//! so the parser saves the stream position, tries the named layout, and
//! rolls back to the bare layout on failure. The same resolution applies to
//! `Obj ` values.
//!
//! # Example
//!
//! ```no_run
//! use psd_io::{SliceSource, descriptor::Descriptor};
//!
//! let payload: Vec<u8> = vec![];
//! let mut source = SliceSource::new(&payload);
//! let desc = Descriptor::parse(&mut source)?;
//! if let Some(text) = desc.find_text("Txt ") {
//!     println!("text content: {text}");
//! }
//! # Ok::<(), psd_io::PsdError>(())
//! ```

use crate::error::{PsdError, PsdResult};
use crate::stream::ByteSource;
use crate::unicode::utf16be_to_utf8;

/// Sanity cap on property, list and reference item counts.
const MAX_ITEM_COUNT: u32 = 1_000_000;
/// Sanity cap on raw-preserved unknown values.
const MAX_UNKNOWN_BYTES: u32 = 100 * 1024 * 1024;

const TYPE_INTEGER: u32 = u32::from_be_bytes(*b"long");
const TYPE_DOUBLE: u32 = u32::from_be_bytes(*b"doub");
const TYPE_UNIT_FLOAT: u32 = u32::from_be_bytes(*b"UntF");
const TYPE_UNIT_VALUE: u32 = u32::from_be_bytes(*b"UntV");
const TYPE_BOOLEAN: u32 = u32::from_be_bytes(*b"bool");
const TYPE_TEXT: u32 = u32::from_be_bytes(*b"TEXT");
const TYPE_ENUMERATED: u32 = u32::from_be_bytes(*b"enum");
const TYPE_CLASS: u32 = u32::from_be_bytes(*b"type");
const TYPE_RAW_DATA: u32 = u32::from_be_bytes(*b"raws");
const TYPE_OBJECT: u32 = u32::from_be_bytes(*b"Obj ");
const TYPE_LIST: u32 = u32::from_be_bytes(*b"VlLs");
const TYPE_REFERENCE: u32 = u32::from_be_bytes(*b"ref ");

const REF_PROPERTY: u32 = u32::from_be_bytes(*b"prop");
const REF_CLASS: u32 = u32::from_be_bytes(*b"Clss");
const REF_ENUMERATED: u32 = u32::from_be_bytes(*b"Enmr");
const REF_IDENTIFIER: u32 = u32::from_be_bytes(*b"Idnt");
const REF_INDEX: u32 = u32::from_be_bytes(*b"indx");
const REF_NAME: u32 = u32::from_be_bytes(*b"name");

/// A descriptor value.
///
/// Container variants (`Object`, `List`) own their payloads; everything else
/// is a leaf. Unknown type tags are preserved raw for forward compatibility.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `long`: signed 32-bit integer.
    Integer(i32),
    /// `doub`: IEEE-754 double.
    Double(f64),
    /// `UntF` / `UntV`: unit code plus double.
    UnitFloat {
        /// Four-character unit code (e.g. `#Pnt`, `#Prc`).
        unit: String,
        /// The measured value.
        value: f64,
    },
    /// `bool`: single byte.
    Boolean(bool),
    /// `TEXT`: Unicode string, converted to UTF-8.
    Text(String),
    /// `enum`: enum type and value tokens stored as `"type:value"`.
    Enum(String),
    /// `type`: a bare class-id token.
    Class(String),
    /// `raws`: length-prefixed raw bytes.
    Raw(Vec<u8>),
    /// `Obj `: nested descriptor with its class id.
    Object {
        /// Class id of the nested object.
        class_id: String,
        /// The nested descriptor.
        descriptor: Box<Descriptor>,
    },
    /// `VlLs`: ordered list of values.
    List(Vec<Value>),
    /// `ref `: reference; the item contents are consumed but not retained.
    Reference,
    /// Any other type tag, preserved as `{length, bytes}`.
    Unknown {
        /// The unrecognized 4-byte type tag.
        type_tag: u32,
        /// The preserved payload.
        data: Vec<u8>,
    },
}

/// A keyed property inside a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property key (class-id token).
    pub key: String,
    /// Property value.
    pub value: Value,
}

/// A parsed action descriptor: class id plus ordered properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Class identifier token.
    pub class_id: String,
    /// Key/value properties in file order.
    pub properties: Vec<Property>,
}

impl Descriptor {
    /// Parses a descriptor at the current stream position.
    ///
    /// Tries the `{Unicode name, class-id, ...}` layout first and falls back
    /// to `{class-id, ...}` on failure.
    pub fn parse<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<Descriptor> {
        let start = source.tell()?;

        let class_id = match skip_unicode_string(source).and_then(|()| parse_class_id(source)) {
            Ok(id) => id,
            Err(_) => {
                source.seek(start)?;
                parse_class_id(source)?
            }
        };

        let count = source.read_u32()?;
        if count > MAX_ITEM_COUNT {
            return Err(PsdError::CorruptData(format!(
                "descriptor property count {count} exceeds sanity limit"
            )));
        }

        let mut properties = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let key = parse_class_id(source)?;
            let type_tag = source.read_u32()?;
            let value = parse_value(source, type_tag)?;
            properties.push(Property { key, value });
        }

        Ok(Descriptor { class_id, properties })
    }

    /// Finds the first property with `key` anywhere in the tree whose value
    /// is a `TEXT` string.
    pub fn find_text(&self, key: &str) -> Option<&str> {
        for prop in &self.properties {
            if prop.key == key {
                if let Value::Text(s) = &prop.value {
                    return Some(s);
                }
            }
            if let Some(found) = value_find_text(&prop.value, key) {
                return Some(found);
            }
        }
        None
    }

    /// Finds the first property with `key` anywhere in the tree carrying raw
    /// bytes (`raws` or an unknown preserved type).
    pub fn find_raw_data(&self, key: &str) -> Option<&[u8]> {
        for prop in &self.properties {
            if prop.key == key {
                match &prop.value {
                    Value::Raw(data) => return Some(data),
                    Value::Unknown { data, .. } => return Some(data),
                    _ => {}
                }
            }
            if let Some(found) = value_find_raw(&prop.value, key) {
                return Some(found);
            }
        }
        None
    }
}

fn value_find_text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    match value {
        Value::Object { descriptor, .. } => descriptor.find_text(key),
        Value::List(items) => items.iter().find_map(|item| value_find_text(item, key)),
        _ => None,
    }
}

fn value_find_raw<'a>(value: &'a Value, key: &str) -> Option<&'a [u8]> {
    match value {
        Value::Object { descriptor, .. } => descriptor.find_raw_data(key),
        Value::List(items) => items.iter().find_map(|item| value_find_raw(item, key)),
        _ => None,
    }
}

/// Reads a class-id token: 32-bit length, then either a 4-byte OSType
/// (length 0) or that many ASCII bytes.
fn parse_class_id<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<String> {
    let length = source.read_u32()?;
    if length == 0 {
        let mut ostype = [0u8; 4];
        source.read_exact(&mut ostype)?;
        Ok(String::from_utf8_lossy(&ostype).into_owned())
    } else {
        if length > MAX_ITEM_COUNT {
            return Err(PsdError::CorruptData(format!(
                "class-id token length {length} exceeds sanity limit"
            )));
        }
        let mut bytes = vec![0u8; length as usize];
        source.read_exact(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Reads a Unicode string: 32-bit character count + UTF-16BE.
fn parse_unicode_string<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<String> {
    let char_count = source.read_u32()?;
    if char_count == 0 {
        return Ok(String::new());
    }
    if char_count > MAX_ITEM_COUNT {
        return Err(PsdError::CorruptData(format!(
            "unicode string length {char_count} exceeds sanity limit"
        )));
    }
    let mut utf16 = vec![0u8; char_count as usize * 2];
    source.read_exact(&mut utf16)?;
    let mut s = utf16be_to_utf8(&utf16);
    // Stored strings commonly carry a trailing NUL terminator.
    while s.ends_with('\0') {
        s.pop();
    }
    Ok(s)
}

fn skip_unicode_string<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<()> {
    let char_count = source.read_u32()?;
    if char_count == 0 {
        return Ok(());
    }
    if char_count > MAX_ITEM_COUNT {
        return Err(PsdError::CorruptData(format!(
            "unicode string length {char_count} exceeds sanity limit"
        )));
    }
    source.skip(u64::from(char_count) * 2)
}

fn parse_value<S: ByteSource + ?Sized>(source: &mut S, type_tag: u32) -> PsdResult<Value> {
    match type_tag {
        TYPE_INTEGER => Ok(Value::Integer(source.read_i32()?)),
        TYPE_DOUBLE => Ok(Value::Double(source.read_f64()?)),
        TYPE_UNIT_FLOAT | TYPE_UNIT_VALUE => {
            let mut unit = [0u8; 4];
            source.read_exact(&mut unit)?;
            let value = source.read_f64()?;
            Ok(Value::UnitFloat {
                unit: String::from_utf8_lossy(&unit).into_owned(),
                value,
            })
        }
        TYPE_BOOLEAN => Ok(Value::Boolean(source.read_u8()? != 0)),
        TYPE_TEXT => Ok(Value::Text(parse_unicode_string(source)?)),
        TYPE_ENUMERATED => {
            let enum_type = parse_class_id(source)?;
            let enum_value = parse_class_id(source)?;
            Ok(Value::Enum(format!("{enum_type}:{enum_value}")))
        }
        TYPE_CLASS => Ok(Value::Class(parse_class_id(source)?)),
        TYPE_RAW_DATA => {
            let length = source.read_u32()?;
            if length > MAX_UNKNOWN_BYTES {
                return Err(PsdError::CorruptData(format!(
                    "raw value length {length} exceeds sanity limit"
                )));
            }
            let mut data = vec![0u8; length as usize];
            source.read_exact(&mut data)?;
            Ok(Value::Raw(data))
        }
        TYPE_OBJECT => parse_object(source),
        TYPE_LIST => {
            let count = source.read_u32()?;
            if count > MAX_ITEM_COUNT {
                return Err(PsdError::CorruptData(format!(
                    "list item count {count} exceeds sanity limit"
                )));
            }
            let mut items = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                let item_tag = source.read_u32()?;
                items.push(parse_value(source, item_tag)?);
            }
            Ok(Value::List(items))
        }
        TYPE_REFERENCE => parse_reference(source),
        _ => {
            // Unknown type: length-prefixed raw preservation.
            let length = source.read_u32()?;
            if length > MAX_UNKNOWN_BYTES {
                return Err(PsdError::CorruptData(format!(
                    "unknown value length {length} exceeds sanity limit"
                )));
            }
            let mut data = vec![0u8; length as usize];
            source.read_exact(&mut data)?;
            Ok(Value::Unknown { type_tag, data })
        }
    }
}

/// `Obj ` values appear with or without a leading Unicode name; try the
/// named layout first, then roll back.
fn parse_object<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<Value> {
    let start = source.tell()?;

    let named = skip_unicode_string(source)
        .and_then(|()| parse_class_id(source))
        .and_then(|class_id| Descriptor::parse(source).map(|desc| (class_id, desc)));
    if let Ok((class_id, descriptor)) = named {
        return Ok(Value::Object {
            class_id,
            descriptor: Box::new(descriptor),
        });
    }

    source.seek(start)?;
    let class_id = parse_class_id(source)?;
    let descriptor = Descriptor::parse(source)?;
    Ok(Value::Object {
        class_id,
        descriptor: Box::new(descriptor),
    })
}

/// Consumes a `ref ` value. Item contents are validated and skipped; the
/// reference structure itself is not retained.
fn parse_reference<S: ByteSource + ?Sized>(source: &mut S) -> PsdResult<Value> {
    let item_count = source.read_u32()?;
    if item_count > MAX_ITEM_COUNT {
        return Err(PsdError::CorruptData(format!(
            "reference item count {item_count} exceeds sanity limit"
        )));
    }

    for _ in 0..item_count {
        let form = source.read_u32()?;
        match form {
            REF_PROPERTY => {
                parse_class_id(source)?;
                parse_class_id(source)?;
            }
            REF_CLASS => {
                parse_class_id(source)?;
            }
            REF_ENUMERATED => {
                parse_class_id(source)?;
                parse_class_id(source)?;
                parse_class_id(source)?;
            }
            REF_IDENTIFIER | REF_INDEX => {
                source.read_u32()?;
            }
            REF_NAME => {
                skip_unicode_string(source)?;
            }
            _ => {
                return Err(PsdError::UnsupportedFeature(format!(
                    "reference form {:?}",
                    form.to_be_bytes().map(|b| b as char)
                )));
            }
        }
    }

    Ok(Value::Reference)
}
