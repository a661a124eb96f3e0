//! Casting between atomic types.
//!
//! `cast_as` is the single source of truth: an item is castable to a type
//! exactly when the cast succeeds.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::str::FromStr;

use super::AtomicType;
use super::comparison::atomize;
use crate::engine::runtime::{Error, ErrorCode, Result};
use crate::item::Item;

/// Error raised for `cast as atomic` / `castable as atomic`, whatever the
/// operand.
pub fn invalid_target_error() -> Error {
    Error::from_code(
        ErrorCode::XPST0080,
        "\"atomic\": invalid type for \"cast\" or \"castable\" expression",
    )
}

pub fn castable_as(item: &Item, target: AtomicType) -> bool {
    cast_as(item, target).is_ok()
}

pub fn cast_as(item: &Item, target: AtomicType) -> Result<Item> {
    if target == AtomicType::Atomic {
        return Err(invalid_target_error());
    }
    let item = atomize(item)?;
    match target {
        AtomicType::Atomic => Err(invalid_target_error()),
        AtomicType::String => Ok(match item {
            Item::String(s) => Item::String(s.clone()),
            other => Item::String(other.lexical()),
        }),
        AtomicType::Null => match item {
            Item::Null => Ok(Item::Null),
            Item::String(s) if s.trim() == "null" => Ok(Item::Null),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Boolean => to_boolean(item),
        AtomicType::Integer => to_integer(item),
        AtomicType::Decimal => to_decimal(item),
        AtomicType::Double => to_double(item),
        AtomicType::DateTime => match item {
            Item::DateTime { .. } => Ok(item.clone()),
            Item::Date { date, tz } => Ok(Item::DateTime {
                value: date.and_time(chrono::NaiveTime::MIN),
                tz: *tz,
            }),
            Item::String(s) => Item::parse_date_time(s),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Date => match item {
            Item::Date { .. } => Ok(item.clone()),
            Item::DateTime { value, tz } => Ok(Item::Date {
                date: value.date(),
                tz: *tz,
            }),
            Item::String(s) => Item::parse_date(s),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Time => match item {
            Item::Time { .. } => Ok(item.clone()),
            Item::DateTime { value, tz } => Ok(Item::Time {
                time: value.time(),
                tz: *tz,
            }),
            Item::String(s) => Item::parse_time(s),
            other => Err(not_castable(other, target)),
        },
        AtomicType::HexBinary => match item {
            Item::HexBinary(_) => Ok(item.clone()),
            Item::Base64Binary(b) => Ok(Item::HexBinary(b.clone())),
            Item::String(s) => Item::parse_hex_binary(s),
            other => Err(not_castable(other, target)),
        },
        AtomicType::Base64Binary => match item {
            Item::Base64Binary(_) => Ok(item.clone()),
            Item::HexBinary(b) => Ok(Item::Base64Binary(b.clone())),
            Item::String(s) => Item::parse_base64_binary(s),
            other => Err(not_castable(other, target)),
        },
    }
}

fn not_castable(item: &Item, target: AtomicType) -> Error {
    Error::cast(format!(
        "\"{}\": value of type {} is not castable to type {}",
        item.lexical(),
        item.type_name(),
        target
    ))
}

fn out_of_range(item: &Item, target: AtomicType) -> Error {
    Error::from_code(
        ErrorCode::FOCA0002,
        format!("\"{}\": value out of range for type {}", item.lexical(), target),
    )
}

fn to_boolean(item: &Item) -> Result<Item> {
    match item {
        Item::Boolean(_) | Item::Integer(_) | Item::Decimal(_) | Item::Double(_) => {
            Ok(Item::Boolean(item.effective_boolean_value()))
        }
        Item::String(s) => match s.trim() {
            "true" | "1" => Ok(Item::Boolean(true)),
            "false" | "0" => Ok(Item::Boolean(false)),
            _ => Err(not_castable(item, AtomicType::Boolean)),
        },
        other => Err(not_castable(other, AtomicType::Boolean)),
    }
}

fn to_integer(item: &Item) -> Result<Item> {
    match item {
        Item::Integer(i) => Ok(Item::Integer(*i)),
        Item::Boolean(b) => Ok(Item::Integer(i64::from(*b))),
        Item::Decimal(d) => d
            .trunc()
            .to_i64()
            .map(Item::Integer)
            .ok_or_else(|| out_of_range(item, AtomicType::Integer)),
        Item::Double(d) => {
            let t = d.trunc();
            // i64::MAX as f64 rounds up to 2^63, which is already out of range
            if !d.is_finite() || t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return Err(out_of_range(item, AtomicType::Integer));
            }
            Ok(Item::Integer(t as i64))
        }
        Item::String(s) => {
            let s = s.trim();
            if !is_integer_lexical(s) {
                return Err(not_castable(item, AtomicType::Integer));
            }
            s.strip_prefix('+')
                .unwrap_or(s)
                .parse::<i64>()
                .map(Item::Integer)
                .map_err(|_| out_of_range(item, AtomicType::Integer))
        }
        other => Err(not_castable(other, AtomicType::Integer)),
    }
}

fn to_decimal(item: &Item) -> Result<Item> {
    match item {
        Item::Decimal(d) => Ok(Item::Decimal(*d)),
        Item::Integer(i) => Ok(Item::Decimal(Decimal::from(*i))),
        Item::Boolean(b) => Ok(Item::Decimal(Decimal::from(i64::from(*b)))),
        Item::Double(d) => {
            if !d.is_finite() {
                return Err(not_castable(item, AtomicType::Decimal));
            }
            Decimal::from_f64(*d)
                .map(Item::Decimal)
                .ok_or_else(|| out_of_range(item, AtomicType::Decimal))
        }
        Item::String(s) => {
            let s = s.trim();
            if !is_decimal_lexical(s) {
                return Err(not_castable(item, AtomicType::Decimal));
            }
            Decimal::from_str(&canonical_decimal(s))
                .map(Item::Decimal)
                .map_err(|_| out_of_range(item, AtomicType::Decimal))
        }
        other => Err(not_castable(other, AtomicType::Decimal)),
    }
}

fn to_double(item: &Item) -> Result<Item> {
    match item {
        Item::Double(d) => Ok(Item::Double(*d)),
        Item::Integer(i) => Ok(Item::Double(*i as f64)),
        Item::Decimal(d) => Ok(Item::Double(d.to_f64().unwrap_or(f64::NAN))),
        Item::Boolean(b) => Ok(Item::Double(if *b { 1.0 } else { 0.0 })),
        Item::String(s) => parse_double(s.trim())
            .map(Item::Double)
            .ok_or_else(|| not_castable(item, AtomicType::Double)),
        other => Err(not_castable(other, AtomicType::Double)),
    }
}

fn split_sign(s: &str) -> &str {
    s.strip_prefix(['+', '-']).unwrap_or(s)
}

fn is_integer_lexical(s: &str) -> bool {
    let digits = split_sign(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal_lexical(s: &str) -> bool {
    let body = split_sign(s);
    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    (!int.is_empty() || !frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

/// Rewrites `+1.`, `.5` and friends as `1.0` / `0.5` before handing them to
/// `Decimal::from_str`.
fn canonical_decimal(s: &str) -> String {
    let negative = s.starts_with('-');
    let body = split_sign(s);
    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    format!(
        "{}{}.{}",
        if negative { "-" } else { "" },
        if int.is_empty() { "0" } else { int },
        if frac.is_empty() { "0" } else { frac }
    )
}

/// Double lexical space: decimal form with an optional exponent, or one of
/// the special values as they are serialized.
pub(crate) fn parse_double(s: &str) -> Option<f64> {
    match s {
        "NaN" => return Some(f64::NAN),
        "INF" | "+INF" => return Some(f64::INFINITY),
        "-INF" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
        None => (s, None),
    };
    if !is_decimal_lexical(mantissa) || exponent.is_some_and(|e| !is_integer_lexical(e)) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_lexical_space() {
        assert_eq!(parse_double("1.5E3"), Some(1500.0));
        assert_eq!(parse_double("-INF"), Some(f64::NEG_INFINITY));
        assert!(parse_double("NaN").is_some_and(f64::is_nan));
        assert_eq!(parse_double("inf"), None);
        assert_eq!(parse_double("1e"), None);
        assert_eq!(parse_double("."), None);
    }

    #[test]
    fn decimal_rejects_exponent_and_separators() {
        assert!(to_decimal(&Item::string("1e5")).is_err());
        assert!(to_decimal(&Item::string("1_000")).is_err());
        assert_eq!(to_decimal(&Item::string(" -2.50 ")).unwrap(), Item::Decimal(Decimal::new(-25, 1)));
    }

    #[test]
    fn double_to_integer_bounds() {
        assert_eq!(to_integer(&Item::Double(-3.9)).unwrap(), Item::Integer(-3));
        assert_eq!(to_integer(&Item::Double(f64::NAN)).unwrap_err().code, ErrorCode::FOCA0002);
        assert_eq!(to_integer(&Item::Double(1e19)).unwrap_err().code, ErrorCode::FOCA0002);
    }
}
