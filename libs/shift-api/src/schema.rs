use std::fmt;

use crate::value::Value;

/// Wire-level kind of a field. Every encoded field carries its kind,
/// so readers detect presence and type structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Int64,
    Float64,
    Bool,
    Decimal,
    String,
    Bytes,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int64 => write!(f, "int64"),
            FieldKind::Float64 => write!(f, "float64"),
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Decimal => write!(f, "decimal"),
            FieldKind::String => write!(f, "string"),
            FieldKind::Bytes => write!(f, "bytes"),
        }
    }
}

/// A single field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Substituted by readers when the field is absent (or null) in a binary.
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Named, versioned field set.
///
/// Schemas sharing `type_name` (the type identity) must be mutually
/// decodable; the registry enforces that only optional fields are ever added
/// under one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub type_name: String,
    pub version: u32,
    pub fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(type_name: impl Into<String>, version: u32) -> Self {
        Self {
            type_name: type_name.into(),
            version,
            fields: Vec::new(),
        }
    }

    /// Builder-style field append.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}
