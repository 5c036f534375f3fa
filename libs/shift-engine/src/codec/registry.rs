use std::collections::{BTreeMap, HashMap};

use shift_api::{Record, Schema};

use super::compact::CompactCodec;
use crate::error::{CodecError, SchemaError};

/// Type identity → registered schema versions.
///
/// Every version of one identity must stay mutually decodable: fields are
/// only ever added, and added fields are optional or carry a default.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, BTreeMap<u32, CompactCodec>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` under its identity.
    ///
    /// Re-registering an identical version is a no-op.
    pub fn register(&mut self, schema: Schema) -> Result<(), SchemaError> {
        validate(&schema)?;

        let versions = self.types.get(&schema.type_name);
        if let Some(versions) = versions {
            if let Some(existing) = versions.get(&schema.version) {
                if existing.schema() == &schema {
                    return Ok(());
                }
                return Err(SchemaError::DuplicateVersion {
                    type_name: schema.type_name.clone(),
                    version: schema.version,
                });
            }
            for codec in versions.values() {
                check_compatible(&schema, codec.schema())?;
            }
        }

        tracing::debug!(
            type_name = %schema.type_name,
            version = schema.version,
            fields = schema.fields.len(),
            "Schema registered"
        );
        self.types
            .entry(schema.type_name.clone())
            .or_default()
            .insert(schema.version, CompactCodec::new(schema));
        Ok(())
    }

    /// Codec for the latest registered version of `type_name`.
    pub fn codec(&self, type_name: &str) -> Result<&CompactCodec, CodecError> {
        self.types
            .get(type_name)
            .and_then(|versions| versions.values().next_back())
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))
    }

    pub fn codec_version(&self, type_name: &str, version: u32) -> Result<&CompactCodec, CodecError> {
        let versions = self
            .types
            .get(type_name)
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;
        versions.get(&version).ok_or_else(|| CodecError::UnknownVersion {
            type_name: type_name.to_string(),
            version,
        })
    }

    pub fn schema(&self, type_name: &str) -> Result<&Schema, CodecError> {
        self.codec(type_name).map(CompactCodec::schema)
    }

    /// Decode `bytes` against the latest version of `type_name`.
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Record, CodecError> {
        self.codec(type_name)?
            .decode(bytes)
            .map_err(|source| CodecError::Decode {
                type_name: type_name.to_string(),
                source,
            })
    }

    /// Encode `record` with the latest version of `type_name`.
    pub fn encode(&self, type_name: &str, record: &Record) -> Result<Vec<u8>, CodecError> {
        self.codec(type_name)?
            .encode(record)
            .map_err(|source| CodecError::Encode {
                type_name: type_name.to_string(),
                source,
            })
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

fn invalid(schema: &Schema, reason: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        type_name: schema.type_name.clone(),
        reason: reason.into(),
    }
}

/// Structural checks that do not depend on other versions.
fn validate(schema: &Schema) -> Result<(), SchemaError> {
    if schema.type_name.is_empty() {
        return Err(invalid(schema, "empty type name"));
    }
    if schema.type_name.len() > u16::MAX as usize {
        return Err(invalid(schema, "type name too long"));
    }
    if schema.fields.len() > u16::MAX as usize {
        return Err(invalid(schema, "too many fields"));
    }

    for (i, field) in schema.fields.iter().enumerate() {
        if field.name.is_empty() || field.name.len() > u8::MAX as usize {
            return Err(invalid(
                schema,
                format!("field name '{}' must be 1..=255 bytes", field.name),
            ));
        }
        if schema.fields[..i].iter().any(|f| f.name == field.name) {
            return Err(invalid(schema, format!("duplicate field '{}'", field.name)));
        }
        if let Some(default) = &field.default {
            if default.kind() != Some(field.kind) {
                return Err(invalid(
                    schema,
                    format!("default of '{}' is not a {} value", field.name, field.kind),
                ));
            }
        }
    }
    Ok(())
}

/// `schema` and `other` share an identity; fail unless each decodes the other.
fn check_compatible(schema: &Schema, other: &Schema) -> Result<(), SchemaError> {
    let incompatible = |reason: String| SchemaError::Incompatible {
        type_name: schema.type_name.clone(),
        version: schema.version,
        other: other.version,
        reason,
    };

    // Order the pair so `older` is the one whose fields must all survive.
    let (older, newer) = if schema.version < other.version {
        (schema, other)
    } else {
        (other, schema)
    };

    for field in &older.fields {
        match newer.get(&field.name) {
            None => return Err(incompatible(format!("field '{}' removed", field.name))),
            Some(f) if f.kind != field.kind => {
                return Err(incompatible(format!(
                    "field '{}' changed from {} to {}",
                    field.name, field.kind, f.kind
                )));
            }
            Some(f) if f.required && !field.required && f.default.is_none() => {
                return Err(incompatible(format!(
                    "field '{}' became required without a default",
                    field.name
                )));
            }
            Some(_) => {}
        }
    }

    for field in &newer.fields {
        if !older.contains(&field.name) && field.required && field.default.is_none() {
            return Err(incompatible(format!(
                "added field '{}' must be optional or carry a default",
                field.name
            )));
        }
    }
    Ok(())
}
