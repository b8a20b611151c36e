//! Generic chunk codec.
//!
//! A chunk is `tag(4) length(u32 LE) body(length)`. Each chunk type is
//! described once by a static [`ChunkSpec`] — an ordered list of named,
//! fixed-width fields — and one interpreter walks the list for both
//! parsing and writing. Bytes past the declared fields are retained
//! verbatim so unknown vendor extensions round-trip bit-exactly.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    Bool,
    Pad,
    /// Fixed single-character slots concatenated into a string on parse.
    Name,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub width: usize,
    pub kind: FieldKind,
}

impl Field {
    pub const fn u8(name: &'static str) -> Self {
        Self {
            name,
            width: 1,
            kind: FieldKind::U8,
        }
    }

    pub const fn bool(name: &'static str) -> Self {
        Self {
            name,
            width: 1,
            kind: FieldKind::Bool,
        }
    }

    pub const fn pad(width: usize) -> Self {
        Self {
            name: "",
            width,
            kind: FieldKind::Pad,
        }
    }

    pub const fn name(name: &'static str, width: usize) -> Self {
        Self {
            name,
            width,
            kind: FieldKind::Name,
        }
    }
}

#[derive(Debug)]
pub struct ChunkSpec {
    pub tag: [u8; 4],
    pub fields: &'static [Field],
}

impl ChunkSpec {
    pub fn body_len(&self) -> usize {
        self.fields.iter().map(|f| f.width).sum()
    }

    /// Header plus body.
    pub fn total_len(&self) -> usize {
        8 + self.body_len()
    }
}

// Errors ////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    Mismatch {
        offset: usize,
        expected: [u8; 4],
        found: [u8; 4],
    },
    Truncated {
        offset: usize,
        needed: usize,
    },
    NoSuchField {
        name: String,
    },
    WrongKind {
        name: String,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FormatError::Mismatch {
                offset,
                expected,
                found,
            } => write!(
                f,
                "unexpected chunk tag at offset {}; expected {:?}, found {:?}",
                offset,
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(found)
            ),
            FormatError::Truncated { offset, needed } => {
                write!(f, "buffer truncated at offset {}; {} more bytes needed", offset, needed)
            }
            FormatError::NoSuchField { name } => write!(f, "no such field: {}", name),
            FormatError::WrongKind { name } => write!(f, "wrong value kind for field: {}", name),
        }
    }
}

impl std::error::Error for FormatError {}

impl From<FormatError> for crate::error::AppError {
    fn from(e: FormatError) -> Self {
        let error_type = match e {
            FormatError::Mismatch { .. } => crate::error::ErrorType::FormatMismatch,
            FormatError::Truncated { .. } => crate::error::ErrorType::Truncated,
            _ => crate::error::ErrorType::RuntimeError,
        };
        crate::error::AppError::new(error_type, e.to_string())
    }
}

type Result<T> = std::result::Result<T, FormatError>;

// Values ////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub spec: &'static ChunkSpec,
    values: BTreeMap<&'static str, Value>,
    /// Bytes past the declared fields, kept for bit-exact round trips.
    extra: Vec<u8>,
}

impl Chunk {
    /// A chunk with every numeric field zero, flags off, names empty.
    pub fn with_defaults(spec: &'static ChunkSpec) -> Self {
        let mut values = BTreeMap::new();
        for field in spec.fields {
            let value = match field.kind {
                FieldKind::U8 => Value::U8(0),
                FieldKind::Bool => Value::Bool(false),
                FieldKind::Name => Value::Text(String::new()),
                FieldKind::Pad => continue,
            };
            values.insert(field.name, value);
        }
        Self {
            spec,
            values,
            extra: Vec::new(),
        }
    }

    /// Parse one chunk at `offset`. Returns the chunk and the number of
    /// bytes consumed (header plus declared body length).
    pub fn parse(spec: &'static ChunkSpec, buffer: &[u8], offset: usize) -> Result<(Self, usize)> {
        if buffer.len() < offset + 8 {
            return Err(FormatError::Truncated {
                offset,
                needed: offset + 8 - buffer.len(),
            });
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&buffer[offset..offset + 4]);
        if found != spec.tag {
            return Err(FormatError::Mismatch {
                offset,
                expected: spec.tag,
                found,
            });
        }
        let length = u32::from_le_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = body_start + length;
        if buffer.len() < body_end {
            return Err(FormatError::Truncated {
                offset,
                needed: body_end - buffer.len(),
            });
        }

        let mut values = BTreeMap::new();
        let mut pos = body_start;
        for field in spec.fields {
            if pos + field.width > body_end {
                return Err(FormatError::Truncated {
                    offset: pos,
                    needed: pos + field.width - body_end,
                });
            }
            match field.kind {
                FieldKind::Pad => {}
                FieldKind::U8 => {
                    values.insert(field.name, Value::U8(buffer[pos]));
                }
                FieldKind::Bool => {
                    values.insert(field.name, Value::Bool(buffer[pos] != 0));
                }
                FieldKind::Name => {
                    let slots = &buffer[pos..pos + field.width];
                    let end = slots.iter().position(|b| *b == 0).unwrap_or(field.width);
                    let text = String::from_utf8_lossy(&slots[..end]).into_owned();
                    values.insert(field.name, Value::Text(text));
                }
            }
            pos += field.width;
        }
        let extra = buffer[pos..body_end].to_vec();
        return Ok((
            Self {
                spec,
                values,
                extra,
            },
            8 + length,
        ));
    }

    /// Append this chunk to `out`. Pad fields emit zeros; name fields are
    /// zeroed first, then repopulated from the string, truncated to the
    /// declared width.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.spec.tag);
        let length = (self.spec.body_len() + self.extra.len()) as u32;
        out.extend_from_slice(&length.to_le_bytes());
        for field in self.spec.fields {
            match field.kind {
                FieldKind::Pad => out.extend(std::iter::repeat_n(0u8, field.width)),
                FieldKind::U8 => {
                    let value = match self.values.get(field.name) {
                        Some(Value::U8(v)) => *v,
                        _ => 0,
                    };
                    out.push(value);
                }
                FieldKind::Bool => {
                    let value = match self.values.get(field.name) {
                        Some(Value::Bool(v)) => *v,
                        _ => false,
                    };
                    out.push(if value { 1 } else { 0 });
                }
                FieldKind::Name => {
                    let mut slots = vec![0u8; field.width];
                    if let Some(Value::Text(text)) = self.values.get(field.name) {
                        for (slot, byte) in slots.iter_mut().zip(text.bytes()) {
                            *slot = byte;
                        }
                    }
                    out.extend_from_slice(&slots);
                }
            }
        }
        out.extend_from_slice(&self.extra);
    }

    // Field access //////////////////////////////////////////////

    pub fn get_u8(&self, name: &str) -> Result<u8> {
        match self.values.get(name) {
            Some(Value::U8(v)) => Ok(*v),
            Some(_) => Err(FormatError::WrongKind {
                name: name.to_string(),
            }),
            None => Err(FormatError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }

    pub fn set_u8(&mut self, name: &'static str, value: u8) -> Result<()> {
        match self.values.get_mut(name) {
            Some(Value::U8(v)) => {
                *v = value;
                Ok(())
            }
            Some(_) => Err(FormatError::WrongKind {
                name: name.to_string(),
            }),
            None => Err(FormatError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.values.get(name) {
            Some(Value::Bool(v)) => Ok(*v),
            Some(_) => Err(FormatError::WrongKind {
                name: name.to_string(),
            }),
            None => Err(FormatError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }

    pub fn set_bool(&mut self, name: &'static str, value: bool) -> Result<()> {
        match self.values.get_mut(name) {
            Some(Value::Bool(v)) => {
                *v = value;
                Ok(())
            }
            Some(_) => Err(FormatError::WrongKind {
                name: name.to_string(),
            }),
            None => Err(FormatError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.values.get(name) {
            Some(Value::Text(v)) => Ok(v.as_str()),
            Some(_) => Err(FormatError::WrongKind {
                name: name.to_string(),
            }),
            None => Err(FormatError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }

    pub fn set_text(&mut self, name: &'static str, value: &str) -> Result<()> {
        match self.values.get_mut(name) {
            Some(Value::Text(v)) => {
                *v = value.to_string();
                Ok(())
            }
            Some(_) => Err(FormatError::WrongKind {
                name: name.to_string(),
            }),
            None => Err(FormatError::NoSuchField {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_SPEC: ChunkSpec = ChunkSpec {
        tag: *b"test",
        fields: &[
            Field::pad(1),
            Field::u8("alpha"),
            Field::bool("flag"),
            Field::name("label", 4),
            Field::pad(2),
        ],
    };

    #[test]
    fn test_write_layout() {
        let mut chunk = Chunk::with_defaults(&TEST_SPEC);
        chunk.set_u8("alpha", 0x2a).unwrap();
        chunk.set_bool("flag", true).unwrap();
        chunk.set_text("label", "hi").unwrap();
        let mut out = Vec::new();
        chunk.write(&mut out);
        assert_eq!(
            out,
            b"test\x09\x00\x00\x00\x00\x2a\x01hi\x00\x00\x00\x00".to_vec()
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let mut chunk = Chunk::with_defaults(&TEST_SPEC);
        chunk.set_u8("alpha", 7).unwrap();
        chunk.set_text("label", "abcd").unwrap();
        let mut buf = Vec::new();
        chunk.write(&mut buf);

        let (parsed, consumed) = Chunk::parse(&TEST_SPEC, &buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed.get_u8("alpha").unwrap(), 7);
        assert!(!parsed.get_bool("flag").unwrap());
        assert_eq!(parsed.text("label").unwrap(), "abcd");

        let mut again = Vec::new();
        parsed.write(&mut again);
        assert_eq!(again, buf);
    }

    #[test]
    fn test_name_truncated_to_declared_width() {
        let mut chunk = Chunk::with_defaults(&TEST_SPEC);
        chunk.set_text("label", "longer than four").unwrap();
        let mut buf = Vec::new();
        chunk.write(&mut buf);
        let (parsed, _) = Chunk::parse(&TEST_SPEC, &buf, 0).unwrap();
        assert_eq!(parsed.text("label").unwrap(), "long");
    }

    #[test]
    fn test_tag_mismatch_carries_offset() {
        let buf = b"xxxx\x09\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
        let err = Chunk::parse(&TEST_SPEC, &buf, 0).unwrap_err();
        assert_eq!(
            err,
            FormatError::Mismatch {
                offset: 0,
                expected: *b"test",
                found: *b"xxxx",
            }
        );
    }

    #[test]
    fn test_truncated_body() {
        let buf = b"test\x09\x00\x00\x00\x00\x2a".to_vec();
        let err = Chunk::parse(&TEST_SPEC, &buf, 0).unwrap_err();
        let FormatError::Truncated { offset, needed } = err else {
            panic!("expected truncation, got {:?}", err);
        };
        assert_eq!(offset, 0);
        assert_eq!(needed, 7);
    }

    #[test]
    fn test_extra_bytes_preserved() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"test");
        buf.extend_from_slice(&11u32.to_le_bytes());
        buf.extend_from_slice(b"\x00\x01\x00abcd\x00\x00");
        buf.extend_from_slice(b"ZZ"); // unknown trailing bytes
        let (parsed, consumed) = Chunk::parse(&TEST_SPEC, &buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        let mut out = Vec::new();
        parsed.write(&mut out);
        assert_eq!(out, buf);
    }

    #[test]
    fn test_unknown_field_errors() {
        let chunk = Chunk::with_defaults(&TEST_SPEC);
        assert!(matches!(
            chunk.get_u8("nope"),
            Err(FormatError::NoSuchField { .. })
        ));
        assert!(matches!(
            chunk.get_u8("label"),
            Err(FormatError::WrongKind { .. })
        ));
    }
}
