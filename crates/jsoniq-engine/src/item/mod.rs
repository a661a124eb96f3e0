//! The JSONiq item model.
//!
//! Every query value is an [`Item`]: one of the atomic variants (null, boolean,
//! the numeric subtypes, string, the date/time subtypes, the binary subtypes)
//! or a structured value (object, array). Behavior per variant lives in
//! exhaustive matches here and in [`crate::types`], not in per-type objects.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use compact_str::CompactString;
use core::fmt;
use core::hash::{Hash, Hasher};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::engine::runtime::{Error, ErrorCode, Result};
use crate::types::AtomicType;

pub(crate) mod binary;
pub mod codec;
pub(crate) mod temporal;

pub type Sequence = Vec<Item>;

/// Object keys and variable names share the same inline-string representation.
pub type Name = CompactString;

#[derive(Debug, Clone)]
pub enum Item {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
    String(String),
    DateTime {
        value: NaiveDateTime,
        tz: Option<FixedOffset>,
    },
    Date {
        date: NaiveDate,
        tz: Option<FixedOffset>,
    },
    Time {
        time: NaiveTime,
        tz: Option<FixedOffset>,
    },
    HexBinary(Vec<u8>),
    Base64Binary(Vec<u8>),
    /// Insertion-ordered entries; keys are unique (see [`Item::object`]).
    Object(Vec<(Name, Item)>),
    Array(Vec<Item>),
}

// ===== Construction =====
impl Item {
    pub fn string(s: impl Into<String>) -> Self {
        Item::String(s.into())
    }

    /// Build an object, rejecting duplicate keys (jerr:JNDY0003).
    pub fn object<K: Into<Name>>(entries: impl IntoIterator<Item = (K, Item)>) -> Result<Self> {
        let mut out: Vec<(Name, Item)> = Vec::new();
        for (k, v) in entries {
            let k = k.into();
            if out.iter().any(|(existing, _)| *existing == k) {
                return Err(Error::from_code(
                    ErrorCode::JNDY0003,
                    format!("duplicate key \"{k}\" in object constructor"),
                ));
            }
            out.push((k, v));
        }
        Ok(Item::Object(out))
    }

    pub fn array(members: impl IntoIterator<Item = Item>) -> Self {
        Item::Array(members.into_iter().collect())
    }

    pub fn parse_date(s: &str) -> Result<Self> {
        let (date, tz) = temporal::parse_date_lex(s)
            .ok_or_else(|| Error::cast(format!("invalid lexical form for date: \"{s}\"")))?;
        Ok(Item::Date { date, tz })
    }

    pub fn parse_time(s: &str) -> Result<Self> {
        let (time, tz) = temporal::parse_time_lex(s)
            .ok_or_else(|| Error::cast(format!("invalid lexical form for time: \"{s}\"")))?;
        Ok(Item::Time { time, tz })
    }

    pub fn parse_date_time(s: &str) -> Result<Self> {
        let (value, tz) = temporal::parse_date_time_lex(s)
            .ok_or_else(|| Error::cast(format!("invalid lexical form for dateTime: \"{s}\"")))?;
        Ok(Item::DateTime { value, tz })
    }

    pub fn parse_hex_binary(s: &str) -> Result<Self> {
        binary::decode_hex(s.trim())
            .map(Item::HexBinary)
            .ok_or_else(|| Error::cast(format!("invalid lexical form for hexBinary: \"{s}\"")))
    }

    pub fn parse_base64_binary(s: &str) -> Result<Self> {
        binary::decode_base64(s)
            .map(Item::Base64Binary)
            .ok_or_else(|| Error::cast(format!("invalid lexical form for base64Binary: \"{s}\"")))
    }
}

// ===== Type predicates =====
impl Item {
    pub fn is_null(&self) -> bool {
        matches!(self, Item::Null)
    }
    pub fn is_boolean(&self) -> bool {
        matches!(self, Item::Boolean(_))
    }
    pub fn is_integer(&self) -> bool {
        matches!(self, Item::Integer(_))
    }
    pub fn is_decimal(&self) -> bool {
        matches!(self, Item::Decimal(_))
    }
    pub fn is_double(&self) -> bool {
        matches!(self, Item::Double(_))
    }
    pub fn is_numeric(&self) -> bool {
        matches!(self, Item::Integer(_) | Item::Decimal(_) | Item::Double(_))
    }
    pub fn is_string(&self) -> bool {
        matches!(self, Item::String(_))
    }
    pub fn is_date_time(&self) -> bool {
        matches!(self, Item::DateTime { .. })
    }
    pub fn is_date(&self) -> bool {
        matches!(self, Item::Date { .. })
    }
    pub fn is_time(&self) -> bool {
        matches!(self, Item::Time { .. })
    }
    pub fn is_hex_binary(&self) -> bool {
        matches!(self, Item::HexBinary(_))
    }
    pub fn is_base64_binary(&self) -> bool {
        matches!(self, Item::Base64Binary(_))
    }
    pub fn is_binary(&self) -> bool {
        self.is_hex_binary() || self.is_base64_binary()
    }
    pub fn is_object(&self) -> bool {
        matches!(self, Item::Object(_))
    }
    pub fn is_array(&self) -> bool {
        matches!(self, Item::Array(_))
    }
    pub fn is_atomic(&self) -> bool {
        !matches!(self, Item::Object(_) | Item::Array(_))
    }

    /// Whether the value carries a zone designator. Only meaningful for the
    /// date/time variants; everything else reports false.
    pub fn has_timezone(&self) -> bool {
        match self {
            Item::DateTime { tz, .. } | Item::Date { tz, .. } | Item::Time { tz, .. } => tz.is_some(),
            _ => false,
        }
    }

    /// Dynamic atomic type, `None` for objects and arrays.
    pub fn atomic_type(&self) -> Option<AtomicType> {
        Some(match self {
            Item::Null => AtomicType::Null,
            Item::Boolean(_) => AtomicType::Boolean,
            Item::Integer(_) => AtomicType::Integer,
            Item::Decimal(_) => AtomicType::Decimal,
            Item::Double(_) => AtomicType::Double,
            Item::String(_) => AtomicType::String,
            Item::DateTime { .. } => AtomicType::DateTime,
            Item::Date { .. } => AtomicType::Date,
            Item::Time { .. } => AtomicType::Time,
            Item::HexBinary(_) => AtomicType::HexBinary,
            Item::Base64Binary(_) => AtomicType::Base64Binary,
            Item::Object(_) | Item::Array(_) => return None,
        })
    }

    /// Name of the dynamic type, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Item::Object(_) => "object",
            Item::Array(_) => "array",
            atomic => atomic.atomic_type().map_or("item", |t| t.name()),
        }
    }
}

// ===== Typed accessors =====
//
// Valid only for the matching variant; anything else is a caller bug and
// fails with err:ENGN0003 instead of coercing.
fn accessor_mismatch(expected: &str, item: &Item) -> Error {
    Error::from_code(
        ErrorCode::ENGN0003,
        format!("{expected} accessor called on an item of type {}", item.type_name()),
    )
}

impl Item {
    pub fn boolean_value(&self) -> Result<bool> {
        match self {
            Item::Boolean(b) => Ok(*b),
            other => Err(accessor_mismatch("boolean", other)),
        }
    }

    pub fn integer_value(&self) -> Result<i64> {
        match self {
            Item::Integer(i) => Ok(*i),
            other => Err(accessor_mismatch("integer", other)),
        }
    }

    pub fn decimal_value(&self) -> Result<Decimal> {
        match self {
            Item::Decimal(d) => Ok(*d),
            other => Err(accessor_mismatch("decimal", other)),
        }
    }

    pub fn double_value(&self) -> Result<f64> {
        match self {
            Item::Double(d) => Ok(*d),
            other => Err(accessor_mismatch("double", other)),
        }
    }

    pub fn string_value(&self) -> Result<&str> {
        match self {
            Item::String(s) => Ok(s),
            other => Err(accessor_mismatch("string", other)),
        }
    }

    pub fn date_time_value(&self) -> Result<(NaiveDateTime, Option<FixedOffset>)> {
        match self {
            Item::DateTime { value, tz } => Ok((*value, *tz)),
            other => Err(accessor_mismatch("dateTime", other)),
        }
    }

    pub fn date_value(&self) -> Result<(NaiveDate, Option<FixedOffset>)> {
        match self {
            Item::Date { date, tz } => Ok((*date, *tz)),
            other => Err(accessor_mismatch("date", other)),
        }
    }

    pub fn time_value(&self) -> Result<(NaiveTime, Option<FixedOffset>)> {
        match self {
            Item::Time { time, tz } => Ok((*time, *tz)),
            other => Err(accessor_mismatch("time", other)),
        }
    }

    pub fn binary_value(&self) -> Result<&[u8]> {
        match self {
            Item::HexBinary(b) | Item::Base64Binary(b) => Ok(b),
            other => Err(accessor_mismatch("binary", other)),
        }
    }

    pub fn object_entries(&self) -> Result<&[(Name, Item)]> {
        match self {
            Item::Object(entries) => Ok(entries),
            other => Err(accessor_mismatch("object", other)),
        }
    }

    pub fn array_members(&self) -> Result<&[Item]> {
        match self {
            Item::Array(members) => Ok(members),
            other => Err(accessor_mismatch("array", other)),
        }
    }

    /// Value under `key`; `None` when absent or when `self` is not an object.
    pub fn get(&self, key: &str) -> Option<&Item> {
        match self {
            Item::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

// ===== Effective boolean value =====
impl Item {
    /// Boolean interpretation of a single item. Null, date/time, binary,
    /// object and array values are all false.
    pub fn effective_boolean_value(&self) -> bool {
        match self {
            Item::Boolean(b) => *b,
            Item::Integer(i) => *i != 0,
            Item::Decimal(d) => !d.is_zero(),
            Item::Double(d) => *d != 0.0 && !d.is_nan(),
            Item::String(s) => !s.is_empty(),
            _ => false,
        }
    }
}

/// Effective boolean value of a whole sequence.
pub fn sequence_ebv(seq: &[Item]) -> Result<bool> {
    match seq {
        [] => Ok(false),
        [single] => Ok(single.effective_boolean_value()),
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for a sequence of more than one item",
        )),
    }
}

// ===== Serialization =====
pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    let abs = d.abs();
    if abs != 0.0 && !(1e-6..1e6).contains(&abs) {
        let s = format!("{d:E}");
        return match s.split_once('E') {
            Some((mantissa, exp)) if !mantissa.contains('.') => format!("{mantissa}.0E{exp}"),
            _ => s,
        };
    }
    format!("{d}")
}

impl Item {
    /// Canonical text form. Top-level strings are written bare; inside
    /// objects and arrays every string-like atomic is quoted.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out, false);
        out
    }

    /// Lexical form used by casts to string: equal to [`serialize`] for atomics.
    ///
    /// [`serialize`]: Item::serialize
    pub(crate) fn lexical(&self) -> String {
        match self {
            Item::Null => "null".to_string(),
            Item::Boolean(b) => b.to_string(),
            Item::Integer(i) => i.to_string(),
            Item::Decimal(d) => d.normalize().to_string(),
            Item::Double(d) => format_double(*d),
            Item::String(s) => s.clone(),
            Item::DateTime { value, tz } => temporal::format_date_time(*value, *tz),
            Item::Date { date, tz } => temporal::format_date(*date, *tz),
            Item::Time { time, tz } => temporal::format_time(*time, *tz),
            Item::HexBinary(b) => binary::encode_hex_upper(b),
            Item::Base64Binary(b) => binary::encode_base64(b),
            structured => {
                let mut out = String::new();
                structured.write_to(&mut out, false);
                out
            }
        }
    }

    fn write_to(&self, out: &mut String, nested: bool) {
        match self {
            Item::Object(entries) => {
                if entries.is_empty() {
                    out.push_str("{ }");
                    return;
                }
                out.push_str("{ ");
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&quote(k));
                    out.push_str(" : ");
                    v.write_to(out, true);
                }
                out.push_str(" }");
            }
            Item::Array(members) => {
                if members.is_empty() {
                    out.push_str("[ ]");
                    return;
                }
                out.push_str("[ ");
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    m.write_to(out, true);
                }
                out.push_str(" ]");
            }
            Item::Null | Item::Boolean(_) | Item::Integer(_) | Item::Decimal(_) => {
                out.push_str(&self.lexical());
            }
            Item::Double(d) if d.is_finite() => out.push_str(&self.lexical()),
            other if nested => out.push_str(&quote(&other.lexical())),
            other => out.push_str(&other.lexical()),
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

// ===== Equality and hashing =====
//
// Type-aware: items of different variants are never equal (no error), so
// `Integer(1) != Double(1.0)` here even though `1 eq 1.0` holds as a value
// comparison. Date/time values compare by instant.
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        use Item::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (Double(a), Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (String(a), String(b)) => a == b,
            (DateTime { value: a, tz: ta }, DateTime { value: b, tz: tb }) => {
                temporal::instant(*a, *ta) == temporal::instant(*b, *tb)
            }
            (Date { date: a, tz: ta }, Date { date: b, tz: tb }) => {
                temporal::date_instant(*a, *ta) == temporal::date_instant(*b, *tb)
            }
            (Time { time: a, tz: ta }, Time { time: b, tz: tb }) => {
                temporal::time_instant(*a, *ta) == temporal::time_instant(*b, *tb)
            }
            (HexBinary(a), HexBinary(b)) | (Base64Binary(a), Base64Binary(b)) => a == b,
            (Object(a), Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Array(a), Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Item::Null => {}
            Item::Boolean(b) => b.hash(state),
            Item::Integer(i) => i.hash(state),
            Item::Decimal(d) => d.normalize().hash(state),
            Item::Double(d) => {
                let bits = if d.is_nan() {
                    f64::NAN.to_bits()
                } else if *d == 0.0 {
                    0
                } else {
                    d.to_bits()
                };
                bits.hash(state);
            }
            Item::String(s) => s.hash(state),
            Item::DateTime { value, tz } => temporal::instant(*value, *tz).hash(state),
            Item::Date { date, tz } => temporal::date_instant(*date, *tz).hash(state),
            Item::Time { time, tz } => temporal::time_instant(*time, *tz).hash(state),
            Item::HexBinary(b) | Item::Base64Binary(b) => b.hash(state),
            Item::Object(entries) => {
                // entry order is not significant for equality
                let mut sorted: Vec<&(Name, Item)> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                sorted.len().hash(state);
                for (k, v) in sorted {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Item::Array(members) => members.hash(state),
        }
    }
}

// ===== JSON interop =====
impl Item {
    /// Convert parsed JSON into items. Integral numbers that fit in i64 become
    /// integers, every other number a double; a number no double can hold
    /// fails with err:FOCA0002.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value as J;
        Ok(match value {
            J::Null => Item::Null,
            J::Bool(b) => Item::Boolean(b),
            J::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Item::Integer(i),
                (None, Some(d)) if d.is_finite() => Item::Double(d),
                _ => {
                    return Err(Error::from_code(
                        ErrorCode::FOCA0002,
                        format!("JSON number {n} is out of range for a double"),
                    ));
                }
            },
            J::String(s) => Item::String(s),
            J::Array(members) => Item::Array(members.into_iter().map(Item::from_json).collect::<Result<_>>()?),
            J::Object(map) => Item::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((Name::from(k), Item::from_json(v)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Convert to JSON. Atomics without a JSON counterpart (date/time,
    /// binary, non-finite doubles) become their lexical string.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Item::Null => J::Null,
            Item::Boolean(b) => J::Bool(*b),
            Item::Integer(i) => J::from(*i),
            Item::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(|| J::String(self.lexical()), J::Number),
            Item::Double(d) => serde_json::Number::from_f64(*d)
                .map_or_else(|| J::String(self.lexical()), J::Number),
            Item::String(s) => J::String(s.clone()),
            Item::Object(entries) => J::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Item::Array(members) => J::Array(members.iter().map(Item::to_json).collect()),
            other => J::String(other.lexical()),
        }
    }
}

impl From<bool> for Item {
    fn from(b: bool) -> Self {
        Item::Boolean(b)
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Self {
        Item::Integer(i)
    }
}

impl From<f64> for Item {
    fn from(d: f64) -> Self {
        Item::Double(d)
    }
}

impl From<Decimal> for Item {
    fn from(d: Decimal) -> Self {
        Item::Decimal(d)
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::String(s.to_string())
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Item::String(s)
    }
}
