//! Structural hashing and equality for value trees
//!
//! Numbers compare by numeric value, so `1` and `1.0` are equal and hash
//! the same. Object keys are fed in sorted order.

use serde_json::{Number, Value};
use xxhash_rust::xxh3::Xxh3;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_OBJECT: u8 = 7;

/// Stable 64-bit hash of a value tree.
pub fn value_hash(value: &Value) -> u64 {
    let mut hasher = Xxh3::new();
    feed(&mut hasher, value);
    hasher.digest()
}

/// Hash of an optional value; absent hashes differently from `null`.
pub fn optional_hash(value: Option<&Value>) -> u64 {
    match value {
        Some(value) => value_hash(value),
        None => {
            let mut hasher = Xxh3::new();
            hasher.update(b"absent");
            hasher.digest()
        }
    }
}

fn feed(hasher: &mut Xxh3, value: &Value) {
    match value {
        Value::Null => hasher.update(&[TAG_NULL]),
        Value::Bool(b) => hasher.update(&[TAG_BOOL, *b as u8]),
        Value::Number(n) => feed_number(hasher, n),
        Value::String(s) => {
            hasher.update(&[TAG_STRING]);
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(&[TAG_ARRAY]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                feed(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(&[TAG_OBJECT]);
            hasher.update(&(map.len() as u64).to_le_bytes());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                feed(hasher, &map[key]);
            }
        }
    }
}

fn feed_number(hasher: &mut Xxh3, n: &Number) {
    if let Some(i) = n.as_i64() {
        hasher.update(&[TAG_INT]);
        hasher.update(&i.to_le_bytes());
    } else if let Some(u) = n.as_u64() {
        hasher.update(&[TAG_UINT]);
        hasher.update(&u.to_le_bytes());
    } else {
        let f = n.as_f64().unwrap_or(f64::NAN);
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            hasher.update(&[TAG_INT]);
            hasher.update(&(f as i64).to_le_bytes());
        } else {
            hasher.update(&[TAG_FLOAT]);
            hasher.update(&f.to_bits().to_le_bytes());
        }
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Structural equality with numeric comparison of numbers.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| deep_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| deep_equal(value, other)))
        }
        _ => false,
    }
}

/// Equality over possibly-absent values; absent only equals absent.
pub fn optional_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equal(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_floats_equal_integers() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert_eq!(value_hash(&json!(1)), value_hash(&json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!(1.5)));
    }

    #[test]
    fn test_object_key_order_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":[true,null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":[true,null],"a":1}"#).unwrap();
        assert!(deep_equal(&a, &b));
        assert_eq!(value_hash(&a), value_hash(&b));
    }

    #[test]
    fn test_distinct_shapes_hash_differently() {
        assert_ne!(value_hash(&json!("1")), value_hash(&json!(1)));
        assert_ne!(value_hash(&json!([])), value_hash(&json!({})));
        assert_ne!(value_hash(&json!(["ab"])), value_hash(&json!(["a", "b"])));
        assert_ne!(value_hash(&json!(null)), optional_hash(None));
    }

    #[test]
    fn test_optional_equal() {
        assert!(optional_equal(None, None));
        assert!(!optional_equal(None, Some(&json!(null))));
        assert!(optional_equal(Some(&json!({"x": 2})), Some(&json!({"x": 2.0}))));
    }
}
