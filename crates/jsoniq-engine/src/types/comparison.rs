//! Atomic comparison for value comparisons, general comparisons, order-by
//! keys and group-by keys.

use core::cmp::Ordering;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::engine::runtime::{Error, ErrorCode, Result};
use crate::item::temporal::{date_instant, instant, time_instant};
use crate::item::{Item, Sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn is_equality(&self) -> bool {
        matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }

    /// Keyword used by value comparisons (`eq`, `lt`, ...).
    pub fn keyword(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Ne => "ne",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Le => "le",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Ge => "ge",
        }
    }

    /// Whether the operator holds for an ordering. `None` is the unordered
    /// outcome (a NaN operand): only `ne` holds.
    fn holds(&self, ord: Option<Ordering>) -> bool {
        use ComparisonOp::*;
        match ord {
            None => *self == Ne,
            Some(ord) => match self {
                Eq => ord == Ordering::Equal,
                Ne => ord != Ordering::Equal,
                Lt => ord == Ordering::Less,
                Le => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                Ge => ord != Ordering::Less,
            },
        }
    }
}

/// `eq`-style (single item per side) versus `=`-style (existential).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonKind {
    Value,
    General,
}

/// Atomic items pass through; objects and arrays cannot be atomized.
pub fn atomize(item: &Item) -> Result<&Item> {
    if item.is_atomic() {
        Ok(item)
    } else {
        Err(non_atomic(item))
    }
}

pub(crate) fn non_atomic(item: &Item) -> Error {
    Error::from_code(
        ErrorCode::JNTY0004,
        format!(
            "Can not atomize an {} item: an {} has probably been passed where an atomic value is expected",
            item.type_name(),
            item.type_name()
        ),
    )
}

/// Reduce a sequence to zero or one atomic item. `what` names the operand in
/// the cardinality error.
pub(crate) fn single_atomic(seq: Sequence, what: &str) -> Result<Option<Item>> {
    let mut it = seq.into_iter();
    let first = it.next();
    if it.next().is_some() {
        return Err(Error::type_mismatch(format!(
            "{what} must be a single atomic item or the empty sequence"
        )));
    }
    match first {
        Some(item) if !item.is_atomic() => Err(non_atomic(&item)),
        other => Ok(other),
    }
}

fn incomparable(a: &Item, b: &Item, op: ComparisonOp) -> Error {
    Error::type_mismatch(format!(
        "Invalid args for comparison \"{}\": {} and {}",
        op.keyword(),
        a.type_name(),
        b.type_name()
    ))
}

/// Three-way comparison of two non-null atomics of comparable types.
/// `Ok(None)` when a NaN makes the pair unordered.
fn order_non_null(a: &Item, b: &Item, op: ComparisonOp) -> Result<Option<Ordering>> {
    use Item::*;
    Ok(match (a, b) {
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Double(x), Double(y)) => x.partial_cmp(y),
        (Double(d), _) if b.is_numeric() => exact_vs_double(numeric_decimal(b), *d).map(Ordering::reverse),
        (_, Double(d)) if a.is_numeric() => exact_vs_double(numeric_decimal(a), *d),
        (Decimal(_) | Integer(_), Decimal(_) | Integer(_)) => Some(numeric_decimal(a).cmp(&numeric_decimal(b))),
        (String(x), String(y)) => Some(x.as_str().cmp(y.as_str())),
        (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
        (DateTime { value: x, tz: tx }, DateTime { value: y, tz: ty }) => {
            Some(instant(*x, *tx).cmp(&instant(*y, *ty)))
        }
        (Date { date: x, tz: tx }, Date { date: y, tz: ty }) => {
            Some(date_instant(*x, *tx).cmp(&date_instant(*y, *ty)))
        }
        (Time { time: x, tz: tx }, Time { time: y, tz: ty }) => {
            Some(time_instant(*x, *tx).cmp(&time_instant(*y, *ty)))
        }
        (HexBinary(x), HexBinary(y)) | (Base64Binary(x), Base64Binary(y)) if op.is_equality() => {
            Some(if x == y { Ordering::Equal } else { Ordering::Less })
        }
        _ => return Err(incomparable(a, b, op)),
    })
}

/// Exact ordering of an integer or decimal against a double. The rounded
/// value decides unless it lands on `d`, in which case `d` is widened to a
/// decimal. `None` for NaN.
fn exact_vs_double(x: Decimal, d: f64) -> Option<Ordering> {
    if d.is_nan() {
        return None;
    }
    match x.to_f64()?.partial_cmp(&d)? {
        Ordering::Equal => Some(Decimal::from_f64(d).map_or(Ordering::Equal, |exact| x.cmp(&exact))),
        ord => Some(ord),
    }
}

fn numeric_decimal(item: &Item) -> Decimal {
    match item {
        Item::Integer(i) => Decimal::from(*i),
        Item::Decimal(d) => *d,
        _ => Decimal::ZERO,
    }
}

/// Ordering with null: null equals only null and is greater than every
/// other atomic. Null is checked before the type rules, so it is comparable
/// with anything atomic under every operator.
fn order_atomics(a: &Item, b: &Item, op: ComparisonOp) -> Result<Option<Ordering>> {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ok(Some(Ordering::Equal)),
        (true, false) => Ok(Some(Ordering::Greater)),
        (false, true) => Ok(Some(Ordering::Less)),
        (false, false) => order_non_null(a, b, op),
    }
}

pub(crate) fn compare_bool(a: &Item, b: &Item, op: ComparisonOp) -> Result<bool> {
    let a = atomize(a)?;
    let b = atomize(b)?;
    Ok(op.holds(order_atomics(a, b, op)?))
}

/// Compare two items under `op`, yielding a boolean item.
pub fn compare_item(a: &Item, b: &Item, op: ComparisonOp) -> Result<Item> {
    compare_bool(a, b, op).map(Item::Boolean)
}

/// Compare two operand sequences.
///
/// Value comparisons take zero or one item per side and yield the empty
/// sequence when either side is empty. General comparisons are true when
/// any pair satisfies `op`.
pub fn compare_sequences(lhs: Sequence, rhs: Sequence, op: ComparisonOp, kind: ComparisonKind) -> Result<Sequence> {
    match kind {
        ComparisonKind::Value => {
            let lhs = single_atomic(lhs, "left operand of a value comparison")?;
            let rhs = single_atomic(rhs, "right operand of a value comparison")?;
            match (lhs, rhs) {
                (Some(a), Some(b)) => Ok(vec![compare_item(&a, &b, op)?]),
                _ => Ok(Vec::new()),
            }
        }
        ComparisonKind::General => {
            for a in &lhs {
                for b in &rhs {
                    if compare_bool(a, b, op)? {
                        return Ok(vec![Item::Boolean(true)]);
                    }
                }
            }
            Ok(vec![Item::Boolean(false)])
        }
    }
}

/// Comparability class of a non-null order-by key. Binaries have none:
/// they only support equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortFamily {
    Number,
    String,
    Boolean,
    DateTime,
    Date,
    Time,
}

fn sort_family(item: &Item) -> Option<SortFamily> {
    Some(match item {
        Item::Integer(_) | Item::Decimal(_) | Item::Double(_) => SortFamily::Number,
        Item::String(_) => SortFamily::String,
        Item::Boolean(_) => SortFamily::Boolean,
        Item::DateTime { .. } => SortFamily::DateTime,
        Item::Date { .. } => SortFamily::Date,
        Item::Time { .. } => SortFamily::Time,
        _ => return None,
    })
}

/// Check that the values of one order-by key column are mutually
/// comparable. Empty keys and nulls fit any column.
pub(crate) fn check_sort_column<'a>(keys: impl IntoIterator<Item = Option<&'a Item>>) -> Result<()> {
    let mut first: Option<(&Item, SortFamily)> = None;
    for item in keys.into_iter().flatten().filter(|item| !item.is_null()) {
        let family = sort_family(item).ok_or_else(|| incomparable(item, item, ComparisonOp::Lt))?;
        match first {
            None => first = Some((item, family)),
            Some((seen, expected)) if expected != family => return Err(incomparable(seen, item, ComparisonOp::Lt)),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Order two order-by key values of a column accepted by
/// [`check_sort_column`].
///
/// `None` is the empty key. With `empty_greatest` the ranking is
/// `non-null < null < empty`; otherwise `empty < non-null < null`. NaN sorts
/// below every other number.
pub(crate) fn compare_sort_keys(a: Option<&Item>, b: Option<&Item>, empty_greatest: bool) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return if empty_greatest { Ordering::Greater } else { Ordering::Less },
        (Some(_), None) => return if empty_greatest { Ordering::Less } else { Ordering::Greater },
        (Some(a), Some(b)) => (a, b),
    };
    let (a_nan, b_nan) = (is_nan(a), is_nan(b));
    if a_nan || b_nan {
        return a_nan.cmp(&b_nan).reverse();
    }
    order_atomics(a, b, ComparisonOp::Lt)
        .ok()
        .flatten()
        .unwrap_or(Ordering::Equal)
}

fn is_nan(item: &Item) -> bool {
    matches!(item, Item::Double(d) if d.is_nan())
}

/// Hashable grouping identity of a group-by key.
///
/// Numerics collapse by value across subtypes so `1`, `1.0` and `1e0` land in
/// the same group; date/time keys collapse by instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum GroupKey {
    Empty,
    Null,
    Boolean(bool),
    Number(NumberKey),
    String(String),
    DateTime(i64, u32),
    Date(i64, u32),
    Time(i64, u32),
    HexBinary(Vec<u8>),
    Base64Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum NumberKey {
    Exact(Decimal),
    Bits(u64),
    NaN,
}

impl GroupKey {
    pub(crate) fn from_key(key: Option<&Item>) -> Result<Self> {
        let Some(item) = key else {
            return Ok(GroupKey::Empty);
        };
        Ok(match item {
            Item::Null => GroupKey::Null,
            Item::Boolean(b) => GroupKey::Boolean(*b),
            Item::Integer(i) => GroupKey::Number(NumberKey::Exact(Decimal::from(*i).normalize())),
            Item::Decimal(d) => GroupKey::Number(NumberKey::Exact(d.normalize())),
            Item::Double(d) if d.is_nan() => GroupKey::Number(NumberKey::NaN),
            Item::Double(d) => GroupKey::Number(match Decimal::from_f64(*d) {
                Some(exact) if d.is_finite() => NumberKey::Exact(exact.normalize()),
                _ => NumberKey::Bits(d.to_bits()),
            }),
            Item::String(s) => GroupKey::String(s.clone()),
            Item::DateTime { value, tz } => {
                let (s, n) = instant(*value, *tz);
                GroupKey::DateTime(s, n)
            }
            Item::Date { date, tz } => {
                let (s, n) = date_instant(*date, *tz);
                GroupKey::Date(s, n)
            }
            Item::Time { time, tz } => {
                let (s, n) = time_instant(*time, *tz);
                GroupKey::Time(s, n)
            }
            Item::HexBinary(b) => GroupKey::HexBinary(b.clone()),
            Item::Base64Binary(b) => GroupKey::Base64Binary(b.clone()),
            structured => return Err(non_atomic(structured)),
        })
    }
}
