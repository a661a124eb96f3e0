//! Lexical forms of the date/time atomic types.
//!
//! A value without a zone designator keeps `tz = None`; this is a distinct
//! state from an explicit `Z`/`+00:00`. For comparison and hashing a missing
//! timezone is read as UTC.

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub(crate) fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz == "Z" {
        return FixedOffset::east_opt(0);
    }
    let bytes = tz.as_bytes();
    if bytes.len() != 6 || bytes[3] != b':' {
        return None;
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = parse_digits(&tz[1..3])?;
    let mins: i32 = parse_digits(&tz[4..6])?;
    if hours > 14 || mins > 59 || (hours == 14 && mins != 0) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + mins * 60))
}

fn parse_digits<T: core::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Split an optional trailing zone designator off a lexical value.
fn split_tz(s: &str) -> Option<(&str, Option<FixedOffset>)> {
    if let Some(body) = s.strip_suffix('Z') {
        return Some((body, FixedOffset::east_opt(0)));
    }
    let bytes = s.as_bytes();
    let n = bytes.len();
    if n >= 6 && matches!(bytes[n - 6], b'+' | b'-') && bytes[n - 3] == b':' {
        let tz = parse_offset(&s[n - 6..])?;
        return Some((&s[..n - 6], Some(tz)));
    }
    Some((s, None))
}

fn parse_date_body(s: &str) -> Option<NaiveDate> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };
    let mut parts = rest.splitn(3, '-');
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if y.len() < 4 || (y.len() > 4 && y.starts_with('0')) || m.len() != 2 || d.len() != 2 {
        return None;
    }
    let year: i32 = parse_digits(y)?;
    let year = if negative { -year } else { year };
    NaiveDate::from_ymd_opt(year, parse_digits(m)?, parse_digits(d)?)
}

fn parse_time_body(s: &str) -> Option<NaiveTime> {
    let (hms, frac) = match s.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (s, None),
    };
    let mut parts = hms.split(':');
    let (h, m, sec) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || h.len() != 2 || m.len() != 2 || sec.len() != 2 {
        return None;
    }
    let nanos = match frac {
        None => 0,
        Some(f) if f.is_empty() || f.len() > 9 => return None,
        Some(f) => {
            let digits: u32 = parse_digits(f)?;
            digits * 10u32.pow(9 - f.len() as u32)
        }
    };
    NaiveTime::from_hms_nano_opt(parse_digits(h)?, parse_digits(m)?, parse_digits(sec)?, nanos)
}

pub(crate) fn parse_date_lex(s: &str) -> Option<(NaiveDate, Option<FixedOffset>)> {
    let (body, tz) = split_tz(s.trim())?;
    Some((parse_date_body(body)?, tz))
}

pub(crate) fn parse_time_lex(s: &str) -> Option<(NaiveTime, Option<FixedOffset>)> {
    let (body, tz) = split_tz(s.trim())?;
    Some((parse_time_body(body)?, tz))
}

pub(crate) fn parse_date_time_lex(s: &str) -> Option<(NaiveDateTime, Option<FixedOffset>)> {
    let (body, tz) = split_tz(s.trim())?;
    let (date, time) = body.split_once('T')?;
    Some((parse_date_body(date)?.and_time(parse_time_body(time)?), tz))
}

pub(crate) fn format_offset(tz: Option<FixedOffset>) -> String {
    let Some(tz) = tz else {
        return String::new();
    };
    let secs = tz.local_minus_utc();
    if secs == 0 {
        return "Z".to_string();
    }
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.abs();
    format!("{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
}

fn format_date_body(date: NaiveDate) -> String {
    let year = date.year();
    if year < 0 {
        format!("-{:04}-{:02}-{:02}", -year, date.month(), date.day())
    } else {
        format!("{:04}-{:02}-{:02}", year, date.month(), date.day())
    }
}

fn format_time_body(time: NaiveTime) -> String {
    let mut out = format!("{:02}:{:02}:{:02}", time.hour(), time.minute(), time.second());
    let nanos = time.nanosecond();
    if nanos > 0 {
        let frac = format!("{nanos:09}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out
}

pub(crate) fn format_date(date: NaiveDate, tz: Option<FixedOffset>) -> String {
    format_date_body(date) + &format_offset(tz)
}

pub(crate) fn format_time(time: NaiveTime, tz: Option<FixedOffset>) -> String {
    format_time_body(time) + &format_offset(tz)
}

pub(crate) fn format_date_time(value: NaiveDateTime, tz: Option<FixedOffset>) -> String {
    format!(
        "{}T{}{}",
        format_date_body(value.date()),
        format_time_body(value.time()),
        format_offset(tz)
    )
}

/// Absolute instant of a local value, a missing timezone read as UTC.
pub(crate) fn instant(value: NaiveDateTime, tz: Option<FixedOffset>) -> (i64, u32) {
    let offset = tz.map_or(0, |tz| tz.local_minus_utc());
    let local = value.and_utc();
    (local.timestamp() - i64::from(offset), local.timestamp_subsec_nanos())
}

pub(crate) fn date_instant(date: NaiveDate, tz: Option<FixedOffset>) -> (i64, u32) {
    instant(date.and_time(NaiveTime::MIN), tz)
}

/// Times are anchored to a fixed date before being compared as instants.
pub(crate) fn time_instant(time: NaiveTime, tz: Option<FixedOffset>) -> (i64, u32) {
    let anchor = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();
    instant(anchor.and_time(time), tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_without_zone_keeps_no_timezone() {
        let (date, tz) = parse_date_lex("2020-01-01").unwrap();
        assert!(tz.is_none());
        assert_eq!(format_date(date, tz), "2020-01-01");
    }

    #[test]
    fn utc_designators_normalize_to_z() {
        let (date, tz) = parse_date_lex("2020-01-01+00:00").unwrap();
        assert_eq!(format_date(date, tz), "2020-01-01Z");
    }

    #[test]
    fn negative_offset_is_not_mistaken_for_date_separator() {
        let (date, tz) = parse_date_lex("2020-01-01-05:00").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(tz.unwrap().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn fractional_seconds_are_trimmed() {
        let (value, tz) = parse_date_time_lex("2021-03-04T05:06:07.500Z").unwrap();
        assert_eq!(format_date_time(value, tz), "2021-03-04T05:06:07.5Z");
    }

    #[test]
    fn instants_at_the_edge_of_the_calendar_keep_their_offset() {
        let plus = FixedOffset::east_opt(14 * 3600).unwrap();
        let minus = FixedOffset::west_opt(14 * 3600).unwrap();
        let (utc, _) = instant(NaiveDateTime::MIN, None);
        assert_eq!(instant(NaiveDateTime::MIN, Some(plus)).0, utc - 14 * 3600);
        let (utc, _) = instant(NaiveDateTime::MAX, None);
        assert_eq!(instant(NaiveDateTime::MAX, Some(minus)).0, utc + 14 * 3600);
    }

    #[test]
    fn malformed_lexical_forms_are_rejected() {
        assert!(parse_date_lex("2020-1-01").is_none());
        assert!(parse_date_lex("2020-02-30").is_none());
        assert!(parse_time_lex("25:00:00").is_none());
        assert!(parse_date_time_lex("2020-01-01 10:00:00").is_none());
        assert!(parse_offset("+15:00").is_none());
    }
}
