use std::fmt::{self, Display};

use crate::error::BasicError;

/// A BASIC runtime value: numeric (int or float) or string. Promotion rules
/// live on the arithmetic/comparison helpers below, not on the variant
/// itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn as_f64(&self) -> Result<f64, BasicError> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Str(_) => Err(BasicError::type_err("expected a number, found a string")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, BasicError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            Value::Str(_) => Err(BasicError::type_err("expected a number, found a string")),
        }
    }

    pub fn as_str(&self) -> Result<&str, BasicError> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(BasicError::type_err("expected a string, found a number")),
        }
    }

    /// Truthiness used by `IF`, `AND`/`OR`/`NOT`: any nonzero number is
    /// true; strings are never valid conditions.
    pub fn truthy(&self) -> Result<bool, BasicError> {
        match self {
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Str(_) => Err(BasicError::type_err("cannot use a string as a condition")),
        }
    }

    pub fn from_bool(b: bool) -> Value {
        Value::Int(if b { 1 } else { 0 })
    }

    /// Zero value for a freshly-allocated numeric array slot.
    pub fn zero() -> Value {
        Value::Int(0)
    }

    pub fn empty_string() -> Value {
        Value::Str(String::new())
    }

    fn both_int(a: &Value, b: &Value) -> Option<(i64, i64)> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Some((*x, *y)),
            _ => None,
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, BasicError> {
        if let (Value::Str(a), Value::Str(b)) = (self, other) {
            return Ok(Value::Str(format!("{a}{b}")));
        }
        numeric_binop(self, other, |a, b| a + b, |a, b| a.wrapping_add(b))
    }

    pub fn sub(&self, other: &Value) -> Result<Value, BasicError> {
        numeric_binop(self, other, |a, b| a - b, |a, b| a.wrapping_sub(b))
    }

    pub fn mul(&self, other: &Value) -> Result<Value, BasicError> {
        numeric_binop(self, other, |a, b| a * b, |a, b| a.wrapping_mul(b))
    }

    /// Integer division is floating unless both operands are ints *and*
    /// the division is exact via `%`-style integer semantics is handled
    /// separately; `/` always promotes to float division per §3.
    pub fn div(&self, other: &Value) -> Result<Value, BasicError> {
        let a = self.as_f64()?;
        let b = other.as_f64()?;
        if b == 0.0 {
            return Err(BasicError::value("division by zero"));
        }
        Ok(Value::Float(a / b))
    }

    /// `%` is integer modulo when both operands are ints, float modulo
    /// otherwise.
    pub fn modulo(&self, other: &Value) -> Result<Value, BasicError> {
        if let Some((a, b)) = Self::both_int(self, other) {
            if b == 0 {
                return Err(BasicError::value("division by zero"));
            }
            return Ok(Value::Int(a % b));
        }
        let a = self.as_f64()?;
        let b = other.as_f64()?;
        if b == 0.0 {
            return Err(BasicError::value("division by zero"));
        }
        Ok(Value::Float(a % b))
    }

    pub fn negate(&self) -> Result<Value, BasicError> {
        match self {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Str(_) => Err(BasicError::type_err("cannot negate a string")),
        }
    }

    fn compare(&self, other: &Value) -> Result<std::cmp::Ordering, BasicError> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Err(BasicError::type_err("cannot compare a string to a number"))
            }
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
                    .ok_or_else(|| BasicError::value("cannot compare NaN"))
            }
        }
    }

    pub fn eq_val(&self, other: &Value) -> Result<bool, BasicError> {
        Ok(self.compare(other)? == std::cmp::Ordering::Equal)
    }
    pub fn ne_val(&self, other: &Value) -> Result<bool, BasicError> {
        Ok(!self.eq_val(other)?)
    }
    pub fn lt_val(&self, other: &Value) -> Result<bool, BasicError> {
        Ok(self.compare(other)? == std::cmp::Ordering::Less)
    }
    pub fn gt_val(&self, other: &Value) -> Result<bool, BasicError> {
        Ok(self.compare(other)? == std::cmp::Ordering::Greater)
    }
    pub fn le_val(&self, other: &Value) -> Result<bool, BasicError> {
        Ok(self.compare(other)? != std::cmp::Ordering::Greater)
    }
    pub fn ge_val(&self, other: &Value) -> Result<bool, BasicError> {
        Ok(self.compare(other)? != std::cmp::Ordering::Less)
    }
}

fn numeric_binop(
    a: &Value,
    b: &Value,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> i64,
) -> Result<Value, BasicError> {
    if a.is_string() || b.is_string() {
        return Err(BasicError::type_err("expected numbers, found a string"));
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Ok(Value::Int(int_op(*x, *y)));
    }
    Ok(Value::Float(float_op(a.as_f64()?, b.as_f64()?)))
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let result = Value::Int(1).add(&Value::Float(2.5)).unwrap();
        assert_eq!(result, Value::Float(3.5));
    }

    #[test]
    fn integer_division_is_always_floating() {
        let result = Value::Int(7).div(&Value::Int(2)).unwrap();
        assert_eq!(result, Value::Float(3.5));
    }

    #[test]
    fn percent_is_integer_modulo_for_two_ints() {
        let result = Value::Int(7).modulo(&Value::Int(2)).unwrap();
        assert_eq!(result, Value::Int(1));
    }

    #[test]
    fn percent_is_float_modulo_when_either_operand_is_float() {
        let result = Value::Float(7.5).modulo(&Value::Int(2)).unwrap();
        assert_eq!(result, Value::Float(1.5));
    }

    #[test]
    fn string_addition_concatenates() {
        let result = Value::Str("a".into()).add(&Value::Str("b".into())).unwrap();
        assert_eq!(result, Value::Str("ab".into()));
    }

    #[test]
    fn numeric_and_string_mix_is_a_type_error() {
        assert!(Value::Int(1).add(&Value::Str("x".into())).is_err());
    }
}
