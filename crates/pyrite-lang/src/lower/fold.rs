//! Compile-time evaluation of literal-only operations.
//!
//! Only operations that cannot raise for the given operands are folded, so
//! folding never moves or hides an error.

use crate::{
    ast::{BinaryOp, UnaryOp},
    constant::Constant,
};

/// Upper bound on the length of a string produced by folding.
const MAX_FOLDED_STR: usize = 256;

pub(super) fn binary(op: BinaryOp, left: &Constant, right: &Constant) -> Option<Constant> {
    use Constant::{Float, Int, Str};

    match (left, right) {
        (Int(a), Int(b)) => int_binary(op, *a, *b).map(Int),
        (Float(a), Float(b)) => float_binary(op, *a, *b).map(Float),
        (Int(a), Float(b)) => float_binary(op, *a as f64, *b).map(Float),
        (Float(a), Int(b)) => float_binary(op, *a, *b as f64).map(Float),
        (Str(a), Str(b)) if op == BinaryOp::Add && a.len() + b.len() <= MAX_FOLDED_STR => {
            Some(Constant::str(format!("{a}{b}")))
        }
        _ => None,
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mult => a.checked_mul(b),
        BinaryOp::FloorDiv if b != 0 => {
            let q = a.checked_div(b)?;
            Some(if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinaryOp::Mod if b != 0 => {
            let r = a.checked_rem(b)?;
            Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinaryOp::BitOr => Some(a | b),
        BinaryOp::BitXor => Some(a ^ b),
        BinaryOp::BitAnd => Some(a & b),
        _ => None,
    }
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mult => Some(a * b),
        _ => None,
    }
}

pub(super) fn unary(op: UnaryOp, operand: &Constant) -> Option<Constant> {
    match (op, operand) {
        (UnaryOp::Not, c) if !matches!(c, Constant::Missing) => Some(Constant::Bool(!c.is_truthy())),
        (UnaryOp::Neg, Constant::Int(i)) => i.checked_neg().map(Constant::Int),
        (UnaryOp::Neg, Constant::Float(f)) => Some(Constant::Float(-f)),
        (UnaryOp::Pos, c @ (Constant::Int(_) | Constant::Float(_))) => Some(c.clone()),
        (UnaryOp::Invert, Constant::Int(i)) => Some(Constant::Int(!i)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::add(BinaryOp::Add, Constant::Int(2), Constant::Int(3), Some(Constant::Int(5)))]
    #[case::floor_div_negative(BinaryOp::FloorDiv, Constant::Int(7), Constant::Int(-2), Some(Constant::Int(-4)))]
    #[case::mod_negative(BinaryOp::Mod, Constant::Int(-7), Constant::Int(3), Some(Constant::Int(2)))]
    #[case::division_by_zero(BinaryOp::FloorDiv, Constant::Int(1), Constant::Int(0), None)]
    #[case::true_division(BinaryOp::Div, Constant::Int(1), Constant::Int(2), None)]
    #[case::overflow(BinaryOp::Mult, Constant::Int(i64::MAX), Constant::Int(2), None)]
    #[case::mixed(BinaryOp::Add, Constant::Int(1), Constant::Float(0.5), Some(Constant::Float(1.5)))]
    #[case::concat(BinaryOp::Add, Constant::str("a"), Constant::str("b"), Some(Constant::str("ab")))]
    #[case::str_times_int(BinaryOp::Mult, Constant::str("a"), Constant::Int(3), None)]
    #[case::bool_operand(BinaryOp::Add, Constant::Bool(true), Constant::Int(1), None)]
    fn test_binary(#[case] op: BinaryOp, #[case] left: Constant, #[case] right: Constant, #[case] expected: Option<Constant>) {
        assert_eq!(binary(op, &left, &right), expected);
    }

    #[rstest]
    #[case::not(UnaryOp::Not, Constant::str(""), Some(Constant::Bool(true)))]
    #[case::neg(UnaryOp::Neg, Constant::Int(4), Some(Constant::Int(-4)))]
    #[case::neg_min(UnaryOp::Neg, Constant::Int(i64::MIN), None)]
    #[case::invert(UnaryOp::Invert, Constant::Int(0), Some(Constant::Int(-1)))]
    #[case::neg_str(UnaryOp::Neg, Constant::str("x"), None)]
    fn test_unary(#[case] op: UnaryOp, #[case] operand: Constant, #[case] expected: Option<Constant>) {
        assert_eq!(unary(op, &operand), expected);
    }
}
