use std::collections::HashMap;

use crate::error::BasicError;
use crate::value::Value;

/// Suffix discipline: a trailing `$` marks a string-typed name.
pub fn is_string_name(name: &str) -> bool {
    name.ends_with('$')
}

/// A fixed-shape 1–3 dimensional array, over-allocated by one per
/// dimension (index range `0..=size`), stored as a flat vector with
/// computed strides per §9's design note.
#[derive(Debug, Clone)]
pub struct ArrayValue {
    pub dims: Vec<i64>, // declared sizes, one per dimension (1..=3 entries)
    data: Vec<Value>,
    is_string: bool,
}

impl ArrayValue {
    pub fn new(dims: Vec<i64>, is_string: bool) -> Result<Self, BasicError> {
        if dims.is_empty() || dims.len() > 3 {
            return Err(BasicError::index("array must have between 1 and 3 dimensions"));
        }
        for &d in &dims {
            if d < 0 {
                return Err(BasicError::value("array dimension size must be non-negative"));
            }
        }
        let total: i64 = dims.iter().map(|d| d + 1).product();
        let fill = if is_string { Value::empty_string() } else { Value::zero() };
        Ok(Self {
            dims,
            data: vec![fill; total as usize],
            is_string,
        })
    }

    pub fn is_string(&self) -> bool {
        self.is_string
    }

    fn index_of(&self, indices: &[i64]) -> Result<usize, BasicError> {
        if indices.len() != self.dims.len() {
            return Err(BasicError::index(format!(
                "wrong number of array indices: expected {}, got {}",
                self.dims.len(),
                indices.len()
            )));
        }
        let mut idx: i64 = 0;
        for (i, (&ix, &dim)) in indices.iter().zip(self.dims.iter()).enumerate().rev() {
            if ix < 0 || ix > dim {
                return Err(BasicError::index(format!(
                    "array index {ix} out of bounds for dimension {} (0..={dim})",
                    i + 1
                )));
            }
            idx = ix + (dim + 1) * idx;
        }
        Ok(idx as usize)
    }

    pub fn get(&self, indices: &[i64]) -> Result<&Value, BasicError> {
        let idx = self.index_of(indices)?;
        Ok(&self.data[idx])
    }

    pub fn set(&mut self, indices: &[i64], value: Value) -> Result<(), BasicError> {
        let idx = self.index_of(indices)?;
        self.data[idx] = value;
        Ok(())
    }
}

/// Holds simple variables and arrays for the duration of one RUN (or across
/// RUNs until NEW). Arrays live in a parallel map keyed by `<name>_array` so
/// a scalar `A` and an array `A(...)` can coexist (§3).
#[derive(Debug, Default)]
pub struct VariableStore {
    scalars: HashMap<String, Value>,
    arrays: HashMap<String, ArrayValue>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.scalars.clear();
        self.arrays.clear();
    }

    fn array_key(name: &str) -> String {
        format!("{name}_array")
    }

    pub fn has_array(&self, name: &str) -> bool {
        self.arrays.contains_key(&Self::array_key(name))
    }

    pub fn get_scalar(&self, name: &str) -> Result<&Value, BasicError> {
        self.scalars
            .get(name)
            .ok_or_else(|| BasicError::name(format!("undefined variable '{name}'")))
    }

    pub fn set_scalar(&mut self, name: &str, value: Value) -> Result<(), BasicError> {
        check_suffix(name, &value)?;
        self.scalars.insert(name.to_string(), value);
        Ok(())
    }

    pub fn dim(&mut self, name: &str, dims: Vec<i64>) -> Result<(), BasicError> {
        let array = ArrayValue::new(dims, is_string_name(name))?;
        self.arrays.insert(Self::array_key(name), array);
        Ok(())
    }

    pub fn get_array(&self, name: &str) -> Result<&ArrayValue, BasicError> {
        self.arrays
            .get(&Self::array_key(name))
            .ok_or_else(|| BasicError::name(format!("undefined array '{name}'")))
    }

    pub fn get_array_element(&self, name: &str, indices: &[i64]) -> Result<Value, BasicError> {
        self.get_array(name)?.get(indices).cloned()
    }

    pub fn set_array_element(
        &mut self,
        name: &str,
        indices: &[i64],
        value: Value,
    ) -> Result<(), BasicError> {
        check_suffix(name, &value)?;
        let array = self
            .arrays
            .get_mut(&Self::array_key(name))
            .ok_or_else(|| BasicError::name(format!("undefined array '{name}'")))?;
        array.set(indices, value)
    }
}

fn check_suffix(name: &str, value: &Value) -> Result<(), BasicError> {
    let wants_string = is_string_name(name);
    if wants_string != value.is_string() {
        return Err(BasicError::type_err(format!(
            "type mismatch assigning to '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_is_over_allocated_by_one_per_dimension() {
        let array = ArrayValue::new(vec![2, 3], false).unwrap();
        assert!(array.get(&[2, 3]).is_ok());
        assert!(array.get(&[3, 3]).is_err());
    }

    #[test]
    fn string_array_initializes_to_empty_strings() {
        let array = ArrayValue::new(vec![1], true).unwrap();
        assert_eq!(*array.get(&[0]).unwrap(), Value::empty_string());
    }

    #[test]
    fn scalar_and_array_of_same_name_coexist() {
        let mut store = VariableStore::new();
        store.set_scalar("A", Value::Int(5)).unwrap();
        store.dim("A", vec![3]).unwrap();
        assert_eq!(*store.get_scalar("A").unwrap(), Value::Int(5));
        assert!(store.has_array("A"));
    }

    #[test]
    fn suffix_discipline_rejects_string_into_numeric_name() {
        let mut store = VariableStore::new();
        assert!(store.set_scalar("A", Value::Str("x".into())).is_err());
    }

    #[test]
    fn wrong_arity_index_is_rejected() {
        let array = ArrayValue::new(vec![2, 2], false).unwrap();
        assert!(array.get(&[1]).is_err());
    }
}
