mod format;

pub use format::format_value;

use crate::error::{EdiError, Result};
use bitflags::bitflags;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Field data types. Discriminants are the wire-stable type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TypeTag {
    Blob = 1,
    Bool = 2,
    Date = 3,
    Float = 4,
    Int = 5,
    /// UTF-8 string
    String = 6,
    /// Long text; same semantics as `String`
    Text = 7,
}

impl TypeTag {
    pub const ALL: [TypeTag; 7] = [
        TypeTag::Blob,
        TypeTag::Bool,
        TypeTag::Date,
        TypeTag::Float,
        TypeTag::Int,
        TypeTag::String,
        TypeTag::Text,
    ];

    /// Canonical lowercase name of the type.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Blob => "blob",
            TypeTag::Bool => "bool",
            TypeTag::Date => "date",
            TypeTag::Float => "float",
            TypeTag::Int => "int",
            TypeTag::String => "string",
            TypeTag::Text => "text",
        }
    }

    /// Resolve a canonical type name.
    pub fn from_name(name: &str) -> Result<Self> {
        TypeTag::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| EdiError::UnknownType(name.to_string()))
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        TypeTag::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| EdiError::UnknownType(code.to_string()))
    }

    /// String and text hold free-form text; an empty value is still a value.
    pub fn is_textual(self) -> bool {
        matches!(self, TypeTag::String | TypeTag::Text)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TypeTag {
    type Err = EdiError;

    fn from_str(s: &str) -> Result<Self> {
        TypeTag::from_name(s)
    }
}

pub fn type_tag_to_name(ty: TypeTag) -> &'static str {
    ty.name()
}

pub fn name_to_type_tag(name: &str) -> Result<TypeTag> {
    TypeTag::from_name(name)
}

bitflags! {
    /// Column options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u32 {
        /// Value cannot be null
        const NOT_NULL = 0x1;
        /// Field auto increments on new row
        const AUTO_INC = 0x2;
        /// Column is the key
        const KEY = 0x4;
        /// Column is indexed
        const INDEX = 0x8;
    }
}

/// A single typed scalar. Exactly one kind is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Blob(Vec<u8>),
    Bool(bool),
    Date(DateTime<Utc>),
    Float(f64),
    Int(i64),
    String(String),
    Text(String),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Blob(_) => TypeTag::Blob,
            Value::Bool(_) => TypeTag::Bool,
            Value::Date(_) => TypeTag::Date,
            Value::Float(_) => TypeTag::Float,
            Value::Int(_) => TypeTag::Int,
            Value::String(_) => TypeTag::String,
            Value::Text(_) => TypeTag::Text,
        }
    }

    /// Canonical text form; `parse_value` accepts it back for the same type.
    pub fn to_text(&self) -> String {
        match self {
            Value::Blob(bytes) => encode_hex(bytes),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Value::Float(f) => f.to_string(),
            Value::Int(i) => i.to_string(),
            Value::String(s) | Value::Text(s) => s.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Order two values. Ints and floats compare numerically; other kinds
    /// only compare with themselves (string and text are interchangeable).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            (Value::String(a) | Value::Text(a), Value::String(b) | Value::Text(b)) => {
                Some(a.cmp(b))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Parse the textual representation of a value of the given type.
pub fn parse_value(text: &str, ty: TypeTag) -> Result<Value> {
    let invalid = || EdiError::InvalidFormat(format!("'{text}' is not a valid {ty} value"));
    let trimmed = text.trim();

    match ty {
        TypeTag::Blob => decode_hex(trimmed).map(Value::Blob).ok_or_else(invalid),
        TypeTag::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        TypeTag::Date => parse_date(trimmed).map(Value::Date).ok_or_else(invalid),
        TypeTag::Float => trimmed.parse().map(Value::Float).map_err(|_| invalid()),
        TypeTag::Int => trimmed.parse().map(Value::Int).map_err(|_| invalid()),
        TypeTag::String => Ok(Value::String(text.to_string())),
        TypeTag::Text => Ok(Value::Text(text.to_string())),
    }
}

/// Parse text destined for a field. Empty text is null for every
/// non-textual type.
pub fn parse_field_text(text: &str, ty: TypeTag) -> Result<Option<Value>> {
    if text.is_empty() && !ty.is_textual() {
        return Ok(None);
    }
    parse_value(text, ty).map(Some)
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).trunc_subsecs(3));
    }
    for pattern in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
            return Some(Utc.from_utc_datetime(&naive).trunc_subsecs(3));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    let millis: i64 = s.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// One column's value within a record, with its declared type and options.
///
/// The declared type and the active value kind always agree; a field may be
/// null and still carry its type.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    ty: TypeTag,
    value: Option<Value>,
    valid: bool,
    flags: ColumnFlags,
}

impl Field {
    /// A null field of the given type.
    pub fn new(name: impl Into<String>, ty: TypeTag, flags: ColumnFlags) -> Self {
        Field {
            name: name.into(),
            ty,
            value: None,
            valid: true,
            flags,
        }
    }

    /// A field whose type is taken from the value.
    pub fn with_value(name: impl Into<String>, value: Value, flags: ColumnFlags) -> Self {
        Field {
            name: name.into(),
            ty: value.type_tag(),
            value: Some(value),
            valid: true,
            flags,
        }
    }

    /// A field of a declared type; the value, if any, must match it.
    pub fn typed(
        name: impl Into<String>,
        ty: TypeTag,
        value: Option<Value>,
        flags: ColumnFlags,
    ) -> Result<Self> {
        let mut field = Field::new(name, ty, flags);
        field.set_value(value)?;
        Ok(field)
    }

    /// A field parsed from text, as a provider would store it.
    pub fn parse(
        name: impl Into<String>,
        ty: TypeTag,
        text: &str,
        flags: ColumnFlags,
    ) -> Result<Self> {
        let value = parse_field_text(text, ty)?;
        Ok(Field {
            name: name.into(),
            ty,
            value,
            valid: true,
            flags,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> TypeTag {
        self.ty
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Whether the last validation pass accepted this field.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn set_value(&mut self, value: Option<Value>) -> Result<()> {
        if let Some(v) = &value {
            if v.type_tag() != self.ty {
                return Err(EdiError::InvalidFormat(format!(
                    "field '{}' is {} but value is {}",
                    self.name,
                    self.ty,
                    v.type_tag()
                )));
            }
        }
        self.value = value;
        Ok(())
    }

    pub fn set_text(&mut self, text: &str) -> Result<()> {
        self.value = parse_field_text(text, self.ty)?;
        Ok(())
    }

    /// Canonical text of the value; empty for null.
    pub fn to_text(&self) -> String {
        self.value.as_ref().map(Value::to_text).unwrap_or_default()
    }
}
