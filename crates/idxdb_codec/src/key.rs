//! Key model: validation and total ordering.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;

/// Maximum nesting depth accepted when validating array keys.
///
/// The value tree is acyclic by construction, so this only bounds the cost
/// of adversarially deep input.
const MAX_KEY_DEPTH: usize = 256;

/// A validated record key.
///
/// Keys form a total order across heterogeneous types:
/// number < date < string < binary < array. Within a type the order is
/// numeric, chronological, UTF-16 code-unit-wise, bytewise
/// (shorter-prefix-first), and element-wise (shorter-prefix-first)
/// respectively.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// A finite floating-point number. `-0.0` is canonicalised to `0.0`.
    Number(f64),
    /// A finite timestamp in milliseconds since the Unix epoch.
    Date(f64),
    /// A text string, ordered by UTF-16 code units.
    Text(String),
    /// A byte string, ordered bytewise.
    Binary(Vec<u8>),
    /// An ordered sequence of keys.
    Array(Vec<Key>),
}

impl Key {
    /// Validates a value as a key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] for NaN or infinite numbers,
    /// invalid dates, nulls, booleans, maps, and arrays containing any
    /// rejected element.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        Self::from_value_at_depth(value, 0)
    }

    fn from_value_at_depth(value: &Value, depth: usize) -> CodecResult<Self> {
        if depth > MAX_KEY_DEPTH {
            return Err(CodecError::invalid_key("array key nests too deeply"));
        }

        match value {
            Value::Number(n) => {
                if n.is_nan() || n.is_infinite() {
                    return Err(CodecError::invalid_key("number key must be finite"));
                }
                Ok(Key::Number(canonicalize_zero(*n)))
            }
            Value::Date(ms) => {
                if ms.is_nan() || ms.is_infinite() {
                    return Err(CodecError::invalid_key("date key must be a valid time"));
                }
                Ok(Key::Date(canonicalize_zero(*ms)))
            }
            Value::Text(s) => Ok(Key::Text(s.clone())),
            Value::Bytes(b) => Ok(Key::Binary(b.clone())),
            Value::Array(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(Self::from_value_at_depth(item, depth + 1)?);
                }
                Ok(Key::Array(keys))
            }
            Value::Null => Err(CodecError::invalid_key("null is not a valid key")),
            Value::Bool(_) => Err(CodecError::invalid_key("boolean is not a valid key")),
            Value::Map(_) => Err(CodecError::invalid_key("object is not a valid key")),
        }
    }

    /// Converts this key back into a value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Number(*n),
            Key::Date(ms) => Value::Date(*ms),
            Key::Text(s) => Value::Text(s.clone()),
            Key::Binary(b) => Value::Bytes(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Compares two keys under the cross-type total order.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        let rank = self.type_rank();
        let other_rank = other.type_rank();
        if rank != other_rank {
            return rank.cmp(&other_rank);
        }

        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => cmp_f64(*a, *b),
            (Key::Text(a), Key::Text(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => {
                for (av, bv) in a.iter().zip(b.iter()) {
                    let ord = av.cmp_order(bv);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => unreachable!("rank comparison handles mismatched types"),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::Text(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Returns the number value if this is a number key.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Maps `-0.0` to `0.0` so that equal keys have equal encodings.
fn canonicalize_zero(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

/// Compares two finite floats. Keys never hold NaN, so the partial order
/// is total here.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_scalars() {
        assert_eq!(
            Key::from_value(&Value::Number(1.5)).unwrap(),
            Key::Number(1.5)
        );
        assert_eq!(
            Key::from_value(&Value::Text("a".into())).unwrap(),
            Key::Text("a".into())
        );
        assert_eq!(
            Key::from_value(&Value::Bytes(vec![1, 2])).unwrap(),
            Key::Binary(vec![1, 2])
        );
        assert_eq!(
            Key::from_value(&Value::Date(0.0)).unwrap(),
            Key::Date(0.0)
        );
    }

    #[test]
    fn reject_invalid_scalars() {
        assert!(Key::from_value(&Value::Number(f64::NAN)).is_err());
        assert!(Key::from_value(&Value::Number(f64::INFINITY)).is_err());
        assert!(Key::from_value(&Value::Number(f64::NEG_INFINITY)).is_err());
        assert!(Key::from_value(&Value::Date(f64::NAN)).is_err());
        assert!(Key::from_value(&Value::Null).is_err());
        assert!(Key::from_value(&Value::Bool(true)).is_err());
        assert!(Key::from_value(&Value::map(vec![])).is_err());
    }

    #[test]
    fn reject_array_with_invalid_element() {
        let value = Value::Array(vec![Value::Number(1.0), Value::Null]);
        assert!(Key::from_value(&value).is_err());
    }

    #[test]
    fn negative_zero_canonicalised() {
        let key = Key::from_value(&Value::Number(-0.0)).unwrap();
        match key {
            Key::Number(n) => assert!(n.is_sign_positive()),
            other => panic!("expected Number, got {other:?}"),
        }
    }

    #[test]
    fn zero_keys_compare_equal() {
        let a = Key::Number(0.0);
        let b = Key::Number(-0.0);
        assert_eq!(a.cmp_order(&b), Ordering::Equal);
    }

    #[test]
    fn cross_type_ranking() {
        let keys = [
            Key::Number(f64::MAX),
            Key::Date(f64::MIN),
            Key::Text(String::new()),
            Key::Binary(vec![]),
            Key::Array(vec![]),
        ];
        for window in keys.windows(2) {
            assert_eq!(window[0].cmp_order(&window[1]), Ordering::Less);
        }
    }

    #[test]
    fn number_ordering() {
        assert_eq!(
            Key::Number(-1.0).cmp_order(&Key::Number(1.0)),
            Ordering::Less
        );
        assert_eq!(
            Key::Number(1.5).cmp_order(&Key::Number(1.5)),
            Ordering::Equal
        );
    }

    #[test]
    fn string_ordering_is_code_unit_wise() {
        // U+FF61 (halfwidth ideographic full stop) is a single code unit
        // 0xFF61; U+10000 encodes as the surrogate pair D800 DC00. Code
        // unit order puts the surrogate pair first, unlike scalar order.
        let a = Key::Text("\u{10000}".to_string());
        let b = Key::Text("\u{ff61}".to_string());
        assert_eq!(a.cmp_order(&b), Ordering::Less);
    }

    #[test]
    fn binary_prefix_ordering() {
        assert_eq!(
            Key::Binary(vec![1]).cmp_order(&Key::Binary(vec![1, 0])),
            Ordering::Less
        );
        assert_eq!(
            Key::Binary(vec![2]).cmp_order(&Key::Binary(vec![1, 255])),
            Ordering::Greater
        );
    }

    #[test]
    fn array_prefix_ordering() {
        let short = Key::Array(vec![Key::Number(1.0)]);
        let long = Key::Array(vec![Key::Number(1.0), Key::Number(0.0)]);
        assert_eq!(short.cmp_order(&long), Ordering::Less);

        let bigger_head = Key::Array(vec![Key::Number(2.0)]);
        assert_eq!(bigger_head.cmp_order(&long), Ordering::Greater);
    }

    #[test]
    fn roundtrip_to_value() {
        let key = Key::Array(vec![
            Key::Number(3.0),
            Key::Text("x".into()),
            Key::Binary(vec![9]),
        ]);
        assert_eq!(Key::from_value(&key.to_value()).unwrap(), key);
    }

    #[test]
    fn deep_nesting_rejected() {
        let mut value = Value::Number(1.0);
        for _ in 0..300 {
            value = Value::Array(vec![value]);
        }
        assert!(Key::from_value(&value).is_err());
    }
}
