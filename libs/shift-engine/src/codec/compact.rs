use std::sync::Arc;

use shift_api::{FieldKind, Record, Schema, Value};

use crate::error::{DecodeError, EncodeError};

// ═══════════════════════════════════════════════════════════════
//  Wire format
// ═══════════════════════════════════════════════════════════════
//
//  magic u8 | format version u8 | schema version u32
//  | type name (u16 len + utf8) | field count u16 | field*
//
//  field: name (u8 len + utf8) | kind tag u8 | null flag u8 | payload?
//
//  All integers little-endian. The payload is omitted when the null flag
//  is set. The schema version is informational; readers never branch on it.

const MAGIC: u8 = 0xC7;
const FORMAT_VERSION: u8 = 1;

fn kind_tag(kind: FieldKind) -> u8 {
    match kind {
        FieldKind::Int64 => 1,
        FieldKind::Float64 => 2,
        FieldKind::Bool => 3,
        FieldKind::Decimal => 4,
        FieldKind::String => 5,
        FieldKind::Bytes => 6,
    }
}

fn kind_from_tag(tag: u8) -> Result<FieldKind, DecodeError> {
    match tag {
        1 => Ok(FieldKind::Int64),
        2 => Ok(FieldKind::Float64),
        3 => Ok(FieldKind::Bool),
        4 => Ok(FieldKind::Decimal),
        5 => Ok(FieldKind::String),
        6 => Ok(FieldKind::Bytes),
        other => Err(DecodeError::UnknownKindTag(other)),
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::with_capacity(64) }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn value(&mut self, value: &Value, field: &str) -> Result<(), EncodeError> {
        match value {
            Value::Int64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Value::Bool(v) => self.u8(u8::from(*v)),
            Value::Decimal(unscaled, scale) => {
                self.u8(*scale);
                self.buf.extend_from_slice(&unscaled.to_le_bytes());
            }
            Value::String(v) => {
                self.u32(length(v.len(), field)?);
                self.buf.extend_from_slice(v.as_bytes());
            }
            Value::Bytes(v) => {
                self.u32(length(v.len(), field)?);
                self.buf.extend_from_slice(v);
            }
            Value::Null => {}
        }
        Ok(())
    }
}

/// Length prefix of `what`, or an error if it does not fit the prefix width.
fn length<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T, EncodeError> {
    T::try_from(len).map_err(|_| EncodeError::TooLong {
        what: what.to_string(),
        len,
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn str(&mut self, len: usize, what: &str) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(what.to_string()))
    }

    fn value(&mut self, kind: FieldKind, field: &str) -> Result<Value, DecodeError> {
        Ok(match kind {
            FieldKind::Int64 => Value::Int64(i64::from_le_bytes(self.array()?)),
            FieldKind::Float64 => Value::Float64(f64::from_le_bytes(self.array()?)),
            FieldKind::Bool => Value::Bool(self.u8()? != 0),
            FieldKind::Decimal => {
                let scale = self.u8()?;
                Value::Decimal(i128::from_le_bytes(self.array()?), scale)
            }
            FieldKind::String => {
                let len = self.u32()? as usize;
                Value::String(self.str(len, field)?)
            }
            FieldKind::Bytes => {
                let len = self.u32()? as usize;
                Value::Bytes(self.take(len)?.to_vec())
            }
        })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

// ═══════════════════════════════════════════════════════════════
//  FieldTable: structural view of a binary
// ═══════════════════════════════════════════════════════════════

/// One field as found in a binary.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub name: String,
    pub kind: FieldKind,
    /// `Value::Null` when the writer flagged the field null.
    pub value: Value,
}

/// Every field a binary carries, in write order, without defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTable {
    pub type_name: String,
    /// Version of the writer's schema. Informational only.
    pub schema_version: u32,
    pub fields: Vec<FieldEntry>,
}

impl FieldTable {
    /// Parse the field directory of a compact binary.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);

        let magic = r.u8()?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = r.u8()?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let schema_version = r.u32()?;
        let name_len = r.u16()? as usize;
        let type_name = r.str(name_len, "type name")?;

        let count = r.u16()? as usize;
        let mut fields: Vec<FieldEntry> = Vec::with_capacity(count);
        for _ in 0..count {
            let len = r.u8()? as usize;
            let name = r.str(len, "field name")?;
            if fields.iter().any(|f| f.name == name) {
                return Err(DecodeError::DuplicateField(name));
            }
            let kind = kind_from_tag(r.u8()?)?;
            let value = if r.u8()? != 0 {
                Value::Null
            } else {
                r.value(kind, &name)?
            };
            fields.push(FieldEntry { name, kind, value });
        }

        if r.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            type_name,
            schema_version,
            fields,
        })
    }

    /// Kind of `name` if the binary carries that field (null or not).
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.entry(name).map(|f| f.kind)
    }

    pub fn entry(&self, name: &str) -> Option<&FieldEntry> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ═══════════════════════════════════════════════════════════════
//  CompactCodec
// ═══════════════════════════════════════════════════════════════

/// Codec bound to one schema version.
///
/// Encoding writes exactly the schema's fields. Decoding resolves whatever
/// the binary carries against this schema: matching fields are read, absent
/// or null fields take the registered default, extra fields are dropped.
#[derive(Debug, Clone)]
pub struct CompactCodec {
    schema: Arc<Schema>,
}

impl CompactCodec {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        &self.schema.type_name
    }

    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, EncodeError> {
        let schema = &*self.schema;
        if let Some((field, _)) = record.iter().find(|(name, _)| !schema.contains(name)) {
            return Err(EncodeError::UnknownField {
                type_name: schema.type_name.clone(),
                field: field.to_string(),
            });
        }

        let mut w = Writer::new();
        w.u8(MAGIC);
        w.u8(FORMAT_VERSION);
        w.u32(schema.version);
        w.u16(length(schema.type_name.len(), "type name")?);
        w.buf.extend_from_slice(schema.type_name.as_bytes());
        w.u16(length(schema.fields.len(), "field table")?);

        for def in &schema.fields {
            let value = record.get(&def.name).unwrap_or(&Value::Null);
            if let Some(found) = value.kind() {
                if found != def.kind {
                    return Err(EncodeError::KindMismatch {
                        field: def.name.clone(),
                        expected: def.kind,
                        found,
                    });
                }
            } else if def.required {
                return Err(EncodeError::MissingField(def.name.clone()));
            }

            w.u8(length(def.name.len(), "field name")?);
            w.buf.extend_from_slice(def.name.as_bytes());
            w.u8(kind_tag(def.kind));
            w.u8(u8::from(value.is_null()));
            w.value(value, &def.name)?;
        }

        Ok(w.buf)
    }

    /// Field directory of `bytes`, with no schema resolution applied.
    pub fn inspect(bytes: &[u8]) -> Result<FieldTable, DecodeError> {
        FieldTable::parse(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Record, DecodeError> {
        let table = FieldTable::parse(bytes)?;
        self.resolve(&table)
    }

    /// Resolve a parsed binary against this codec's schema.
    pub fn resolve(&self, table: &FieldTable) -> Result<Record, DecodeError> {
        let schema = &*self.schema;
        if table.type_name != schema.type_name {
            return Err(DecodeError::TypeMismatch {
                expected: schema.type_name.clone(),
                found: table.type_name.clone(),
            });
        }

        let mut record = Record::new();
        for def in &schema.fields {
            let present = match table.entry(&def.name) {
                Some(entry) if entry.kind != def.kind => {
                    return Err(DecodeError::KindMismatch {
                        field: def.name.clone(),
                        expected: def.kind,
                        found: entry.kind,
                    });
                }
                Some(entry) if !entry.value.is_null() => Some(entry.value.clone()),
                _ => None,
            };

            let value = match (present, &def.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) if !def.required => Value::Null,
                (None, None) => return Err(DecodeError::MissingField(def.name.clone())),
            };
            record.set(def.name.clone(), value);
        }
        Ok(record)
    }
}
