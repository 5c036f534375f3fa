use std::sync::Arc;

use shift_api::{ApiError, FieldKind};

/// Binary does not match the reader's field layout.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset} (need {needed} more bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("bad magic byte {0:#04x}")]
    BadMagic(u8),

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown field kind tag {0}")]
    UnknownKindTag(u8),

    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(String),

    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    #[error("{0} trailing bytes after last field")]
    TrailingBytes(usize),

    #[error("binary has type identity '{found}', reader expects '{expected}'")]
    TypeMismatch { expected: String, found: String },

    #[error("field '{field}' is {found} in binary, reader declares {expected}")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("required field '{0}' absent and has no default")]
    MissingField(String),
}

/// Logical record violates the target schema's typing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("field '{field}' declared {expected}, got {found}")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("required field '{0}' missing")]
    MissingField(String),

    #[error("field '{field}' not declared by '{type_name}'")]
    UnknownField { type_name: String, field: String },

    #[error("{what} is {len} long, more than its length prefix can hold")]
    TooLong { what: String, len: usize },
}

/// Schema definition or evolution error, raised at registration time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("'{type_name}': {reason}")]
    Invalid { type_name: String, reason: String },

    #[error("'{type_name}' v{version} is incompatible with v{other}: {reason}")]
    Incompatible {
        type_name: String,
        version: u32,
        other: u32,
        reason: String,
    },

    #[error("'{type_name}' v{version} already registered with a different field set")]
    DuplicateVersion { type_name: String, version: u32 },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("decode '{type_name}': {source}")]
    Decode {
        type_name: String,
        #[source]
        source: DecodeError,
    },

    #[error("encode '{type_name}': {source}")]
    Encode {
        type_name: String,
        #[source]
        source: EncodeError,
    },

    #[error("unknown type identity '{0}'")]
    UnknownType(String),

    #[error("unknown version {version} of '{type_name}'")]
    UnknownVersion { type_name: String, version: u32 },

    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
}

/// Required source field absent at mapping time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("required field '{field}' absent in source record")]
    MissingField { field: String },

    #[error("field '{field}' should map to {expected}, got {found}")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("store error: {0}")]
    Store(#[from] ApiError),

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("job '{job}' failed: {cause}")]
    JobExecution {
        job: String,
        #[source]
        cause: Box<EngineError>,
    },
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(Arc::new(e))
    }
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Store` variant, context is added to the inner `ApiError`.
    /// For message and io variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Store(e) => EngineError::Store(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::StoreNotFound(msg) => EngineError::StoreNotFound(format!("{ctx}: {msg}")),
            EngineError::Io(e) => {
                EngineError::Io(Arc::new(std::io::Error::new(e.kind(), format!("{ctx}: {e}"))))
            }
            other => other,
        }
    }

    /// A restart of the pipeline may succeed (store or journal outage).
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Error confined to a single record (schema contract violation).
    pub fn is_record_error(&self) -> bool {
        matches!(self, EngineError::Codec(_) | EngineError::Mapping(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let outage = EngineError::Store(ApiError::unavailable("down"));
        assert!(outage.is_transient());
        assert!(!outage.is_record_error());

        let mapping = EngineError::Mapping(MappingError::MissingField {
            field: "customerId".into(),
        });
        assert!(mapping.is_record_error());
        assert!(!mapping.is_transient());

        assert!(!EngineError::Store(ApiError::truncated("gone")).is_transient());
    }

    #[test]
    fn context_reaches_inner_store_error() {
        let err = EngineError::Store(ApiError::unavailable("down")).with_context("store 'orders'");
        assert_eq!(err.to_string(), "store error: Unavailable: store 'orders': down");
    }
}
