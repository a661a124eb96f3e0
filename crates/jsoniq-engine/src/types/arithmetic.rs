//! Numeric arithmetic with type promotion integer -> decimal -> double.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::comparison::single_atomic;
use crate::engine::runtime::{Error, ErrorCode, Result};
use crate::item::{Item, Sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "div",
            ArithmeticOp::Mod => "mod",
        }
    }
}

/// Evaluate `lhs op rhs` over operand sequences. An empty operand yields the
/// empty sequence, a null operand yields null.
pub fn arithmetic(lhs: Sequence, rhs: Sequence, op: ArithmeticOp) -> Result<Sequence> {
    let lhs = single_atomic(lhs, "left operand of an arithmetic expression")?;
    let rhs = single_atomic(rhs, "right operand of an arithmetic expression")?;
    match (lhs, rhs) {
        (Some(a), Some(b)) => Ok(vec![apply(&a, &b, op)?]),
        _ => Ok(Vec::new()),
    }
}

pub fn apply(a: &Item, b: &Item, op: ArithmeticOp) -> Result<Item> {
    if a.is_null() || b.is_null() {
        return Ok(Item::Null);
    }
    if !a.is_numeric() || !b.is_numeric() {
        return Err(Error::type_mismatch(format!(
            "Invalid args for arithmetic \"{}\": {} and {}",
            op.symbol(),
            a.type_name(),
            b.type_name()
        )));
    }
    match (a, b) {
        (Item::Double(_), _) | (_, Item::Double(_)) => Ok(Item::Double(apply_f64(as_f64(a), as_f64(b), op))),
        (Item::Integer(x), Item::Integer(y)) if op != ArithmeticOp::Div => apply_i64(*x, *y, op),
        _ => apply_decimal(as_decimal(a), as_decimal(b), op).map(Item::Decimal),
    }
}

fn as_f64(item: &Item) -> f64 {
    match item {
        Item::Integer(i) => *i as f64,
        Item::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        Item::Double(d) => *d,
        _ => f64::NAN,
    }
}

fn as_decimal(item: &Item) -> Decimal {
    match item {
        Item::Integer(i) => Decimal::from(*i),
        Item::Decimal(d) => *d,
        _ => Decimal::ZERO,
    }
}

fn apply_f64(x: f64, y: f64, op: ArithmeticOp) -> f64 {
    match op {
        ArithmeticOp::Add => x + y,
        ArithmeticOp::Sub => x - y,
        ArithmeticOp::Mul => x * y,
        ArithmeticOp::Div => x / y,
        ArithmeticOp::Mod => x % y,
    }
}

fn division_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

fn overflow(op: ArithmeticOp) -> Error {
    Error::from_code(ErrorCode::FOCA0002, format!("numeric overflow in \"{}\"", op.symbol()))
}

fn apply_i64(x: i64, y: i64, op: ArithmeticOp) -> Result<Item> {
    let out = match op {
        ArithmeticOp::Add => x.checked_add(y),
        ArithmeticOp::Sub => x.checked_sub(y),
        ArithmeticOp::Mul => x.checked_mul(y),
        ArithmeticOp::Mod if y == 0 => return Err(division_by_zero()),
        ArithmeticOp::Mod => x.checked_rem(y),
        ArithmeticOp::Div => return apply_decimal(Decimal::from(x), Decimal::from(y), op).map(Item::Decimal),
    };
    out.map(Item::Integer).ok_or_else(|| overflow(op))
}

fn apply_decimal(x: Decimal, y: Decimal, op: ArithmeticOp) -> Result<Decimal> {
    if matches!(op, ArithmeticOp::Div | ArithmeticOp::Mod) && y.is_zero() {
        return Err(division_by_zero());
    }
    let out = match op {
        ArithmeticOp::Add => x.checked_add(y),
        ArithmeticOp::Sub => x.checked_sub(y),
        ArithmeticOp::Mul => x.checked_mul(y),
        ArithmeticOp::Div => x.checked_div(y),
        ArithmeticOp::Mod => x.checked_rem(y),
    };
    out.map(|d| d.normalize()).ok_or_else(|| overflow(op))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_yields_decimal() {
        assert_eq!(apply(&Item::Integer(7), &Item::Integer(2), ArithmeticOp::Div).unwrap(), Item::Decimal(Decimal::new(35, 1)));
    }

    #[test]
    fn division_by_zero_fails_for_exact_types() {
        let err = apply(&Item::Integer(1), &Item::Integer(0), ArithmeticOp::Div).unwrap_err();
        assert_eq!(err.code, ErrorCode::FOAR0001);
        let inf = apply(&Item::Double(1.0), &Item::Integer(0), ArithmeticOp::Div).unwrap();
        assert_eq!(inf, Item::Double(f64::INFINITY));
    }

    #[test]
    fn null_and_empty_operands() {
        assert_eq!(apply(&Item::Null, &Item::Integer(1), ArithmeticOp::Add).unwrap(), Item::Null);
        assert!(arithmetic(vec![], vec![Item::Integer(1)], ArithmeticOp::Add).unwrap().is_empty());
    }
}
