//! The closed operator table shared by constant folding and evaluation.
//!
//! `None` means the operator does not apply to the operand values; folding
//! keeps the node and evaluation reports an operator error.

use velm_common::value::Value;
use velm_parser::ast::{BinaryOperator, UnaryOperator};

pub fn apply_binary(operator: BinaryOperator, left: &Value, right: &Value) -> Option<Value> {
    use BinaryOperator as Op;
    match operator {
        Op::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Some(Value::String(format!("{left}{right}")))
            }
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_add(*b))),
            _ => numeric(left, right, |a, b| a + b),
        },
        Op::Subtract => int_or_numeric(left, right, i64::wrapping_sub, |a, b| a - b),
        Op::Multiply => int_or_numeric(left, right, i64::wrapping_mul, |a, b| a * b),
        Op::Divide => match (left, right) {
            (Value::Int(_), Value::Int(0)) => None,
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a / b)),
            _ => numeric(left, right, |a, b| a / b),
        },
        Op::Modulo => match (left, right) {
            (Value::Int(_), Value::Int(0)) => None,
            (Value::Int(a), Value::Int(b)) => Some(Value::Int(a % b)),
            _ => numeric(left, right, |a, b| a % b),
        },
        Op::Less => compare(left, right, |o| o == std::cmp::Ordering::Less),
        Op::LessOrEqual => compare(left, right, |o| o != std::cmp::Ordering::Greater),
        Op::Greater => compare(left, right, |o| o == std::cmp::Ordering::Greater),
        Op::GreaterOrEqual => compare(left, right, |o| o != std::cmp::Ordering::Less),
        Op::Equal => Some(Value::Bool(loose_equal(left, right))),
        Op::NotEqual => Some(Value::Bool(!loose_equal(left, right))),
        Op::And => match (left, right) {
            (Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a && *b)),
            _ => None,
        },
        Op::Or => match (left, right) {
            (Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(*a || *b)),
            _ => None,
        },
        // Null coalescing is structural, not value arithmetic.
        Op::NullCoalesce => Some(if left.is_null() { right.clone() } else { left.clone() }),
    }
}

pub fn apply_unary(operator: UnaryOperator, operand: &Value) -> Option<Value> {
    match (operator, operand) {
        (UnaryOperator::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
        (UnaryOperator::Negate, Value::Int(i)) => Some(Value::Int(i.wrapping_neg())),
        (UnaryOperator::Negate, Value::Double(d)) => Some(Value::Double(-d)),
        _ => None,
    }
}

/// Equality with numeric widening: `1 == 1.0` holds.
fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left.as_double(), right.as_double()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn numeric(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    Some(Value::Double(f(left.as_double()?, right.as_double()?)))
}

fn int_or_numeric(
    left: &Value,
    right: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    double_op: impl Fn(f64, f64) -> f64,
) -> Option<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(Value::Int(int_op(*a, *b))),
        _ => numeric(left, right, double_op),
    }
}

fn compare(
    left: &Value,
    right: &Value,
    f: impl Fn(std::cmp::Ordering) -> bool,
) -> Option<Value> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => left.as_double()?.partial_cmp(&right.as_double()?)?,
    };
    Some(Value::Bool(f(ordering)))
}
