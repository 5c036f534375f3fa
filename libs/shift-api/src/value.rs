use std::fmt;

use crate::error::ApiError;
use crate::schema::FieldKind;

/// Canonical value representation of a single record field.
///
/// - Scalars (Int64, Float64, Bool): stored as-is
/// - Decimal: `(unscaled, scale)`, value = unscaled × 10^-scale
/// - String, Bytes: owned buffers (records cross task boundaries)
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    /// `(unscaled, scale)`.
    Decimal(i128, u8),
    String(String),
    Bytes(Vec<u8>),
    Null,
}

impl Value {
    /// Kind of a non-null value. `None` for `Null`.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Value::Int64(_) => Some(FieldKind::Int64),
            Value::Float64(_) => Some(FieldKind::Float64),
            Value::Bool(_) => Some(FieldKind::Bool),
            Value::Decimal(..) => Some(FieldKind::Decimal),
            Value::String(_) => Some(FieldKind::String),
            Value::Bytes(_) => Some(FieldKind::Bytes),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Parse a decimal literal such as `"-12.50"`.
    pub fn parse_decimal(s: &str) -> Result<Value, ApiError> {
        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if frac_part.len() > u8::MAX as usize || frac_part.starts_with(['-', '+']) {
            return Err(ApiError::format(format!("invalid decimal '{s}'")));
        }
        let digits = format!("{int_part}{frac_part}");
        let unscaled: i128 = digits
            .parse()
            .map_err(|e| ApiError::format(format!("invalid decimal '{s}': {e}")))?;
        Ok(Value::Decimal(unscaled, frac_part.len() as u8))
    }

    /// Convert a JSON value into a field value of the declared kind.
    ///
    /// Decimals are accepted both as JSON numbers and as strings.
    pub fn from_json(kind: FieldKind, json: &serde_json::Value) -> Result<Value, ApiError> {
        use serde_json::Value as J;
        let mismatch = || ApiError::format(format!("expected {kind} value, got {json}"));
        match (kind, json) {
            (_, J::Null) => Ok(Value::Null),
            (FieldKind::Int64, J::Number(n)) => n.as_i64().map(Value::Int64).ok_or_else(mismatch),
            (FieldKind::Float64, J::Number(n)) => n.as_f64().map(Value::Float64).ok_or_else(mismatch),
            (FieldKind::Bool, J::Bool(b)) => Ok(Value::Bool(*b)),
            (FieldKind::Decimal, J::String(s)) => Value::parse_decimal(s),
            (FieldKind::Decimal, J::Number(n)) => Value::parse_decimal(&n.to_string()),
            (FieldKind::String, J::String(s)) => Ok(Value::String(s.clone())),
            (FieldKind::Bytes, J::Array(items)) => items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    /// Convert into JSON. Decimals become strings so no precision is lost.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Int64(v) => J::from(*v),
            Value::Float64(v) => J::from(*v),
            Value::Bool(v) => J::from(*v),
            Value::Decimal(..) => J::String(self.to_string()),
            Value::String(v) => J::String(v.clone()),
            Value::Bytes(v) => J::from(v.clone()),
            Value::Null => J::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Decimal(unscaled, 0) => write!(f, "{unscaled}"),
            Value::Decimal(unscaled, scale) => {
                let scale = *scale as usize;
                let sign = if *unscaled < 0 { "-" } else { "" };
                let digits = format!("{:0>width$}", unscaled.unsigned_abs(), width = scale + 1);
                let (int_part, frac_part) = digits.split_at(digits.len() - scale);
                write!(f, "{sign}{int_part}.{frac_part}")
            }
            Value::String(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
