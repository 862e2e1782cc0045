//! # Value Model
//!
//! This module provides the polymorphic typed value used throughout containers.
//! It replaces the source system's inheritance hierarchy (an abstract `value`
//! base class with one concrete subclass per type) with a single tagged
//! `enum Value` dispatched by `match` — the idiomatic Rust rendering of a closed
//! variant set, and considerably cheaper to clone and send across threads than a
//! hierarchy of boxed trait objects.
//!
//! ## Design
//!
//! - **Closed set of variants**: `Null`, `Bool`, signed/unsigned integers at four
//!   widths, `Float`, `Double`, `String`, `Bytes`, and nested `Container`.
//! - **Conversions**: every variant exposes fallible `to_*` accessors following
//!   the widening/narrowing/parsing rules pinned by the design spec.
//! - **Ownership**: a `Value` owns its payload outright (a `String`, a `Vec<u8>`,
//!   or a boxed `Container`); no shared-pointer aliasing is needed because
//!   `Container` gives values away by clone, never by reference.

use crate::container::Container;
use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single named, typed datum. See module docs for the design rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Container(Box<Container>),
}

/// Short fixed wire codes for each variant, used by the textual serializer in
/// [`crate::container`]. Kept here because the tag is an intrinsic property of
/// the variant, not of the container encoding it.
impl Value {
    pub(crate) fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "nl",
            Value::Bool(_) => "b",
            Value::Int8(_) => "i1",
            Value::Int16(_) => "i2",
            Value::Int32(_) => "i4",
            Value::Int64(_) => "i8",
            Value::UInt8(_) => "u1",
            Value::UInt16(_) => "u2",
            Value::UInt32(_) => "u4",
            Value::UInt64(_) => "u8",
            Value::Float(_) => "f4",
            Value::Double(_) => "f8",
            Value::String(_) => "s",
            Value::Bytes(_) => "by",
            Value::Container(_) => "cn",
        }
    }

    /// Human-readable name of the active variant, used in type-error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Container(_) => "container",
        }
    }

    fn type_error(&self, target: &str) -> BusError {
        BusError::TypeError(format!("cannot convert {} to {target}", self.type_name()))
    }

    /// Convert to `bool`. Numeric variants are truthy when non-zero; strings
    /// accept case-insensitive `"true"`/`"false"`; `null` always fails.
    pub fn to_bool(&self) -> Result<bool, BusError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int8(n) => Ok(*n != 0),
            Value::Int16(n) => Ok(*n != 0),
            Value::Int32(n) => Ok(*n != 0),
            Value::Int64(n) => Ok(*n != 0),
            Value::UInt8(n) => Ok(*n != 0),
            Value::UInt16(n) => Ok(*n != 0),
            Value::UInt32(n) => Ok(*n != 0),
            Value::UInt64(n) => Ok(*n != 0),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(self.type_error("bool")),
            },
            Value::Null => Err(BusError::TypeError("null-conversion".to_string())),
            _ => Err(self.type_error("bool")),
        }
    }

    /// Convert to `i64`, the canonical wide-integer accessor. Narrower integer
    /// variants widen losslessly; floating variants truncate toward zero;
    /// strings parse in base 10, yielding `0` (not an error) on failure per the
    /// spec's pinned string-conversion behavior.
    pub fn to_int(&self) -> Result<i64, BusError> {
        match self {
            Value::Int8(n) => Ok(*n as i64),
            Value::Int16(n) => Ok(*n as i64),
            Value::Int32(n) => Ok(*n as i64),
            Value::Int64(n) => Ok(*n),
            Value::UInt8(n) => Ok(*n as i64),
            Value::UInt16(n) => Ok(*n as i64),
            Value::UInt32(n) => Ok(*n as i64),
            Value::UInt64(n) => {
                if *n > i64::MAX as u64 {
                    Err(BusError::TypeError(format!(
                        "uint64 value {n} overflows i64 on narrowing conversion"
                    )))
                } else {
                    Ok(*n as i64)
                }
            }
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(f) => Ok(*f as i64),
            Value::Double(f) => Ok(*f as i64),
            Value::String(s) => Ok(s.trim().parse::<i64>().unwrap_or(0)),
            Value::Null => Err(BusError::TypeError("null-conversion".to_string())),
            _ => Err(self.type_error("int")),
        }
    }

    /// Alias for [`Value::to_int`] under the `to_long` accessor name.
    pub fn to_long(&self) -> Result<i64, BusError> {
        self.to_int()
    }

    /// Convert to `f64`. Strings parse in base 10, yielding `0.0` on failure.
    pub fn to_double(&self) -> Result<f64, BusError> {
        match self {
            Value::Float(f) => Ok(*f as f64),
            Value::Double(f) => Ok(*f),
            Value::Int8(n) => Ok(*n as f64),
            Value::Int16(n) => Ok(*n as f64),
            Value::Int32(n) => Ok(*n as f64),
            Value::Int64(n) => Ok(*n as f64),
            Value::UInt8(n) => Ok(*n as f64),
            Value::UInt16(n) => Ok(*n as f64),
            Value::UInt32(n) => Ok(*n as f64),
            Value::UInt64(n) => Ok(*n as f64),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => Ok(s.trim().parse::<f64>().unwrap_or(0.0)),
            Value::Null => Err(BusError::TypeError("null-conversion".to_string())),
            _ => Err(self.type_error("double")),
        }
    }

    /// Render the value as a display string. Unlike the numeric accessors this
    /// never fails for non-null, non-container variants — every scalar has a
    /// canonical textual form.
    pub fn to_string_value(&self) -> Result<String, BusError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int8(n) => Ok(n.to_string()),
            Value::Int16(n) => Ok(n.to_string()),
            Value::Int32(n) => Ok(n.to_string()),
            Value::Int64(n) => Ok(n.to_string()),
            Value::UInt8(n) => Ok(n.to_string()),
            Value::UInt16(n) => Ok(n.to_string()),
            Value::UInt32(n) => Ok(n.to_string()),
            Value::UInt64(n) => Ok(n.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Double(f) => Ok(f.to_string()),
            Value::Null => Err(BusError::TypeError("null-conversion".to_string())),
            _ => Err(self.type_error("string")),
        }
    }

    /// Convert to raw bytes. Only the `Bytes` and `String` variants carry a
    /// natural byte representation; every other conversion is a type error.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        match self {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Null => Err(BusError::TypeError("null-conversion".to_string())),
            _ => Err(self.type_error("bytes")),
        }
    }

    /// Borrow the nested container, if this value holds one.
    pub fn to_container(&self) -> Result<&Container, BusError> {
        match self {
            Value::Container(c) => Ok(c),
            Value::Null => Err(BusError::TypeError("null-conversion".to_string())),
            _ => Err(self.type_error("container")),
        }
    }

    /// True for the `Null` variant, used by container getters that return a
    /// canonical null for a missing name rather than an `Option`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_string_value() {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
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
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Value::Container(Box::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_conversion_is_case_insensitive() {
        assert_eq!(Value::String("TRUE".into()).to_bool().unwrap(), true);
        assert_eq!(Value::String("false".into()).to_bool().unwrap(), false);
        assert!(Value::String("nope".into()).to_bool().is_err());
    }

    #[test]
    fn null_rejects_all_conversions() {
        let v = Value::Null;
        assert!(v.to_bool().is_err());
        assert!(v.to_int().is_err());
        assert!(v.to_double().is_err());
        assert!(v.to_string_value().is_err());
        assert!(v.to_bytes().is_err());
    }

    #[test]
    fn string_to_numeric_failure_yields_zero() {
        assert_eq!(Value::String("not-a-number".into()).to_int().unwrap(), 0);
        assert_eq!(Value::String("not-a-number".into()).to_double().unwrap(), 0.0);
    }

    #[test]
    fn numeric_widening_is_lossless() {
        assert_eq!(Value::Int8(-5).to_int().unwrap(), -5);
        assert_eq!(Value::UInt32(42).to_int().unwrap(), 42);
        assert_eq!(Value::Int32(7).to_double().unwrap(), 7.0);
    }

    #[test]
    fn type_tags_are_short_fixed_codes() {
        assert_eq!(Value::Null.type_tag(), "nl");
        assert_eq!(Value::Int32(1).type_tag(), "i4");
        assert_eq!(Value::String("x".into()).type_tag(), "s");
        assert_eq!(Value::Bytes(vec![1]).type_tag(), "by");
    }
}
