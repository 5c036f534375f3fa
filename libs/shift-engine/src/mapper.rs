use shift_api::{FieldKind, Record, Schema, Value};

use crate::error::{EngineError, MappingError};

/// Pure translation of a decoded source record into the target layout.
///
/// Runs concurrently on every partition worker, so it holds no mutable state.
/// Keys are never seen by a mapper: they pass through migration untouched.
pub trait RecordMapper: Send + Sync {
    fn map(&self, record: &Record) -> Result<Record, MappingError>;
}

impl<F> RecordMapper for F
where
    F: Fn(&Record) -> Result<Record, MappingError> + Send + Sync,
{
    fn map(&self, record: &Record) -> Result<Record, MappingError> {
        self(record)
    }
}

/// One declarative mapping rule, as written in config:
///
/// ```toml
/// rules = [
///   { op = "rename", from = "customerId", to = "accountId" },
///   { op = "constant", field = "channel", value = "web" },
///   { op = "drop", field = "legacyFlag" },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldRule {
    Rename { from: String, to: String },
    Constant { field: String, value: serde_json::Value },
    Drop { field: String },
}

/// Where a target field's value comes from.
#[derive(Debug, Clone, PartialEq)]
enum FieldSource {
    /// Source field of that name.
    Field(String),
    Constant(Value),
    /// Nothing feeds it; left absent (target field is optional).
    Unset,
}

/// One target field and its source.
#[derive(Debug, Clone)]
struct FieldMap {
    target: String,
    kind: FieldKind,
    required: bool,
    source: FieldSource,
}

/// Mapper compiled from [`FieldRule`]s against a concrete source/target pair.
///
/// Target fields with no rule are carried from the source field of the same
/// name. A target field that nothing can feed must be optional.
///
/// Every field the source schema declares required must hold a value, even
/// one that is dropped or feeds an optional target.
#[derive(Debug, Clone)]
pub struct RuleMapper {
    required_source: Vec<String>,
    fields: Vec<FieldMap>,
}

impl RuleMapper {
    pub fn new(rules: &[FieldRule], source: &Schema, target: &Schema) -> Result<Self, EngineError> {
        let cfg = |msg: String| {
            EngineError::Config(format!("mapper {} -> {}: {msg}", source.type_name, target.type_name))
        };

        let mut renamed_from = Vec::new();
        let mut dropped = Vec::new();
        for rule in rules {
            match rule {
                FieldRule::Rename { from, to } => {
                    if !source.contains(from) {
                        return Err(cfg(format!("rename source '{from}' not in source schema")));
                    }
                    if !target.contains(to) {
                        return Err(cfg(format!("rename target '{to}' not in target schema")));
                    }
                    renamed_from.push(from.as_str());
                }
                FieldRule::Constant { field, .. } => {
                    if !target.contains(field) {
                        return Err(cfg(format!("constant '{field}' not in target schema")));
                    }
                }
                FieldRule::Drop { field } => {
                    if !source.contains(field) {
                        return Err(cfg(format!("dropped field '{field}' not in source schema")));
                    }
                    dropped.push(field.as_str());
                }
            }
        }

        let mut fields = Vec::with_capacity(target.fields.len());
        for def in &target.fields {
            let rule = rules.iter().find(|rule| match rule {
                FieldRule::Rename { to, .. } => to == &def.name,
                FieldRule::Constant { field, .. } => field == &def.name,
                FieldRule::Drop { .. } => false,
            });

            let source_field = match rule {
                Some(FieldRule::Rename { from, .. }) => Some(from.as_str()),
                Some(FieldRule::Constant { value, .. }) => {
                    let value = Value::from_json(def.kind, value)
                        .map_err(|e| cfg(format!("constant '{}': {}", def.name, e.message)))?;
                    if value.is_null() && def.required {
                        return Err(cfg(format!("required target field '{}' set to null", def.name)));
                    }
                    fields.push(FieldMap {
                        target: def.name.clone(),
                        kind: def.kind,
                        required: def.required,
                        source: FieldSource::Constant(value),
                    });
                    continue;
                }
                _ if renamed_from.contains(&def.name.as_str()) || dropped.contains(&def.name.as_str()) => None,
                _ => source.get(&def.name).map(|f| f.name.as_str()),
            };

            let feed = match source_field {
                Some(name) => {
                    let found = source.get(name).map(|f| f.kind);
                    if found != Some(def.kind) {
                        return Err(cfg(format!(
                            "'{name}' is {} in source, target '{}' is {}",
                            found.map(|k| k.to_string()).unwrap_or_else(|| "absent".into()),
                            def.name,
                            def.kind
                        )));
                    }
                    FieldSource::Field(name.to_string())
                }
                None if def.required => {
                    return Err(cfg(format!("required target field '{}' has no source", def.name)));
                }
                None => FieldSource::Unset,
            };
            fields.push(FieldMap {
                target: def.name.clone(),
                kind: def.kind,
                required: def.required,
                source: feed,
            });
        }

        let required_source = source
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect();
        Ok(Self { required_source, fields })
    }

    /// Identity mapping between two layouts that share field names.
    pub fn carry(source: &Schema, target: &Schema) -> Result<Self, EngineError> {
        Self::new(&[], source, target)
    }
}

impl RecordMapper for RuleMapper {
    fn map(&self, record: &Record) -> Result<Record, MappingError> {
        if let Some(missing) = self
            .required_source
            .iter()
            .find(|name| record.get(name).is_none_or(Value::is_null))
        {
            return Err(MappingError::MissingField { field: missing.clone() });
        }

        let mut out = Record::new();
        for field in &self.fields {
            let value = match &field.source {
                FieldSource::Constant(value) => value.clone(),
                FieldSource::Field(name) => match record.get(name) {
                    Some(value) if !value.is_null() => {
                        if let Some(found) = value.kind().filter(|k| *k != field.kind) {
                            return Err(MappingError::KindMismatch {
                                field: name.clone(),
                                expected: field.kind,
                                found,
                            });
                        }
                        value.clone()
                    }
                    _ if field.required => {
                        return Err(MappingError::MissingField { field: name.clone() });
                    }
                    _ => continue,
                },
                FieldSource::Unset => continue,
            };
            out.set(field.target.clone(), value);
        }
        Ok(out)
    }
}
