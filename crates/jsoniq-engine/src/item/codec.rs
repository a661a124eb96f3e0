//! Binary encoding of items and tuples for shipping across worker boundaries.
//!
//! Layout: one tag byte per item followed by a variant-specific payload.
//! Lengths are u32 big-endian. Binary values travel as their canonical
//! lexical form and are re-parsed on decode, so decode(encode(x)) == x
//! including exact byte content and timezone presence.

use bytes::{Buf, BufMut};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;

use super::{Item, Name};
use crate::engine::context::Tuple;
use crate::engine::runtime::{Error, ErrorCode, Result};

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INTEGER: u8 = 3;
const TAG_DECIMAL: u8 = 4;
const TAG_DOUBLE: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_DATE_TIME: u8 = 7;
const TAG_DATE: u8 = 8;
const TAG_TIME: u8 = 9;
const TAG_HEX_BINARY: u8 = 10;
const TAG_BASE64_BINARY: u8 = 11;
const TAG_OBJECT: u8 = 12;
const TAG_ARRAY: u8 = 13;

fn malformed(what: &str) -> Error {
    Error::from_code(ErrorCode::ENGN0004, format!("malformed encoded item: {what}"))
}

fn put_str(buf: &mut impl BufMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut impl Buf) -> Result<String> {
    let len = get_len(buf)?;
    if buf.remaining() < len {
        return Err(malformed("truncated string"));
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| malformed("string is not UTF-8"))
}

fn get_len(buf: &mut impl Buf) -> Result<usize> {
    if buf.remaining() < 4 {
        return Err(malformed("truncated length"));
    }
    Ok(buf.get_u32() as usize)
}

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(malformed("truncated payload"))
    } else {
        Ok(())
    }
}

fn put_tz(buf: &mut impl BufMut, tz: Option<FixedOffset>) {
    match tz {
        Some(tz) => {
            buf.put_u8(1);
            buf.put_i32(tz.local_minus_utc());
        }
        None => buf.put_u8(0),
    }
}

fn get_tz(buf: &mut impl Buf) -> Result<Option<FixedOffset>> {
    need(buf, 1)?;
    if buf.get_u8() == 0 {
        return Ok(None);
    }
    need(buf, 4)?;
    FixedOffset::east_opt(buf.get_i32())
        .map(Some)
        .ok_or_else(|| malformed("timezone offset out of range"))
}

fn put_time(buf: &mut impl BufMut, time: NaiveTime) {
    buf.put_u32(time.num_seconds_from_midnight());
    buf.put_u32(time.nanosecond());
}

fn get_time(buf: &mut impl Buf) -> Result<NaiveTime> {
    need(buf, 8)?;
    let secs = buf.get_u32();
    let nanos = buf.get_u32();
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or_else(|| malformed("time out of range"))
}

impl Item {
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Item::Null => buf.put_u8(TAG_NULL),
            Item::Boolean(false) => buf.put_u8(TAG_FALSE),
            Item::Boolean(true) => buf.put_u8(TAG_TRUE),
            Item::Integer(i) => {
                buf.put_u8(TAG_INTEGER);
                buf.put_i64(*i);
            }
            Item::Decimal(d) => {
                buf.put_u8(TAG_DECIMAL);
                buf.put_slice(&d.serialize());
            }
            Item::Double(d) => {
                buf.put_u8(TAG_DOUBLE);
                buf.put_f64(*d);
            }
            Item::String(s) => {
                buf.put_u8(TAG_STRING);
                put_str(buf, s);
            }
            Item::DateTime { value, tz } => {
                buf.put_u8(TAG_DATE_TIME);
                buf.put_i32(value.date().num_days_from_ce());
                put_time(buf, value.time());
                put_tz(buf, *tz);
            }
            Item::Date { date, tz } => {
                buf.put_u8(TAG_DATE);
                buf.put_i32(date.num_days_from_ce());
                put_tz(buf, *tz);
            }
            Item::Time { time, tz } => {
                buf.put_u8(TAG_TIME);
                put_time(buf, *time);
                put_tz(buf, *tz);
            }
            Item::HexBinary(_) => {
                buf.put_u8(TAG_HEX_BINARY);
                put_str(buf, &self.lexical());
            }
            Item::Base64Binary(_) => {
                buf.put_u8(TAG_BASE64_BINARY);
                put_str(buf, &self.lexical());
            }
            Item::Object(entries) => {
                buf.put_u8(TAG_OBJECT);
                buf.put_u32(entries.len() as u32);
                for (k, v) in entries {
                    put_str(buf, k);
                    v.encode(buf);
                }
            }
            Item::Array(members) => {
                buf.put_u8(TAG_ARRAY);
                encode_sequence(members, buf);
            }
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Item> {
        need(buf, 1)?;
        Ok(match buf.get_u8() {
            TAG_NULL => Item::Null,
            TAG_FALSE => Item::Boolean(false),
            TAG_TRUE => Item::Boolean(true),
            TAG_INTEGER => {
                need(buf, 8)?;
                Item::Integer(buf.get_i64())
            }
            TAG_DECIMAL => {
                need(buf, 16)?;
                let mut raw = [0u8; 16];
                buf.copy_to_slice(&mut raw);
                Item::Decimal(Decimal::deserialize(raw))
            }
            TAG_DOUBLE => {
                need(buf, 8)?;
                Item::Double(buf.get_f64())
            }
            TAG_STRING => Item::String(get_str(buf)?),
            TAG_DATE_TIME => {
                need(buf, 4)?;
                let date = date_from_days(buf.get_i32())?;
                let time = get_time(buf)?;
                Item::DateTime {
                    value: date.and_time(time),
                    tz: get_tz(buf)?,
                }
            }
            TAG_DATE => {
                need(buf, 4)?;
                let date = date_from_days(buf.get_i32())?;
                Item::Date {
                    date,
                    tz: get_tz(buf)?,
                }
            }
            TAG_TIME => {
                let time = get_time(buf)?;
                Item::Time {
                    time,
                    tz: get_tz(buf)?,
                }
            }
            TAG_HEX_BINARY => Item::parse_hex_binary(&get_str(buf)?)?,
            TAG_BASE64_BINARY => Item::parse_base64_binary(&get_str(buf)?)?,
            TAG_OBJECT => {
                let len = get_len(buf)?;
                let mut entries = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let k = Name::from(get_str(buf)?);
                    entries.push((k, Item::decode(buf)?));
                }
                Item::object(entries)?
            }
            TAG_ARRAY => Item::Array(decode_sequence(buf)?),
            other => return Err(malformed(&format!("unknown tag {other}"))),
        })
    }
}

pub fn encode_sequence(seq: &[Item], buf: &mut impl BufMut) {
    buf.put_u32(seq.len() as u32);
    for item in seq {
        item.encode(buf);
    }
}

pub fn decode_sequence(buf: &mut impl Buf) -> Result<Vec<Item>> {
    let len = get_len(buf)?;
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(Item::decode(buf)?);
    }
    Ok(out)
}

impl Tuple {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.len() as u32);
        for (name, seq) in self.iter() {
            put_str(buf, name);
            encode_sequence(seq, buf);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Tuple> {
        let len = get_len(buf)?;
        let mut tuple = Tuple::default();
        for _ in 0..len {
            let name = Name::from(get_str(buf)?);
            tuple.bind(name, decode_sequence(buf)?);
        }
        Ok(tuple)
    }
}

fn date_from_days(days: i32) -> Result<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days).ok_or_else(|| malformed("date out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_is_rejected() {
        let mut buf = Vec::new();
        Item::string("hello").encode(&mut buf);
        buf.truncate(buf.len() - 2);
        let err = Item::decode(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ENGN0004);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = Item::decode(&mut [0xFFu8].as_slice()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ENGN0004);
    }

    #[test]
    fn date_keeps_missing_timezone() {
        let item = Item::parse_date("2020-01-01").unwrap();
        let mut buf = Vec::new();
        item.encode(&mut buf);
        let back = Item::decode(&mut buf.as_slice()).unwrap();
        assert!(!back.has_timezone());
        assert_eq!(back.serialize(), "2020-01-01");
    }
}
