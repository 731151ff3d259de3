//! Canonical CBOR serializer for record values.

use crate::value::{cmp_text_canonical, Value};

/// Serializes a value to canonical CBOR bytes.
///
/// The output is deterministic:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Length headers use the shortest possible encoding
/// - No indefinite-length encoding
/// - Numbers always encode as double-precision floats, so round-trips
///   preserve the [`Value::Number`] variant exactly; dates use tag 1
pub fn serialize_value(value: &Value) -> Vec<u8> {
    let mut encoder = ValueEncoder::new();
    encoder.encode(value);
    encoder.into_bytes()
}

/// A canonical CBOR encoder for [`Value`] trees.
pub struct ValueEncoder {
    buffer: Vec<u8>,
}

impl ValueEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encodes a value into the buffer.
    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Number(n) => self.encode_double(*n),
            Value::Date(ms) => {
                // Tag 1: epoch-based date/time
                self.buffer.push(0xc1);
                self.encode_double(*ms);
            }
            Value::Bytes(b) => {
                self.encode_header(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.encode_header(3, s.len() as u64);
                self.buffer.extend_from_slice(s.as_bytes());
            }
            Value::Array(arr) => {
                self.encode_header(4, arr.len() as u64);
                for item in arr {
                    self.encode(item);
                }
            }
            Value::Map(pairs) => self.encode_map(pairs),
        }
    }

    /// Consumes this encoder and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn encode_double(&mut self, n: f64) {
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&n.to_bits().to_be_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_header(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_map(&mut self, pairs: &[(String, Value)]) {
        // Keys may arrive unsorted when a Map was built by hand rather
        // than through Value::map.
        let mut ordered: Vec<&(String, Value)> = pairs.iter().collect();
        ordered.sort_by(|a, b| cmp_text_canonical(&a.0, &b.0));

        self.encode_header(5, pairs.len() as u64);
        for (key, value) in ordered {
            self.encode_header(3, key.len() as u64);
            self.buffer.extend_from_slice(key.as_bytes());
            self.encode(value);
        }
    }
}

impl Default for ValueEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_null() {
        assert_eq!(serialize_value(&Value::Null), vec![0xf6]);
    }

    #[test]
    fn encode_bool() {
        assert_eq!(serialize_value(&Value::Bool(false)), vec![0xf4]);
        assert_eq!(serialize_value(&Value::Bool(true)), vec![0xf5]);
    }

    #[test]
    fn encode_number_as_double() {
        let bytes = serialize_value(&Value::Number(1.0));
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.0f64.to_bits().to_be_bytes());
    }

    #[test]
    fn encode_date_tagged() {
        let bytes = serialize_value(&Value::Date(1000.0));
        assert_eq!(bytes[0], 0xc1);
        assert_eq!(bytes[1], 0xfb);
    }

    #[test]
    fn encode_bytes() {
        assert_eq!(serialize_value(&Value::Bytes(vec![])), vec![0x40]);
        assert_eq!(
            serialize_value(&Value::Bytes(vec![1, 2, 3])),
            vec![0x43, 1, 2, 3]
        );
    }

    #[test]
    fn encode_text() {
        assert_eq!(serialize_value(&Value::Text(String::new())), vec![0x60]);
        assert_eq!(
            serialize_value(&Value::Text("hello".to_string())),
            vec![0x65, b'h', b'e', b'l', b'l', b'o']
        );
    }

    #[test]
    fn encode_array() {
        assert_eq!(serialize_value(&Value::Array(vec![])), vec![0x80]);
        let bytes = serialize_value(&Value::Array(vec![Value::Null, Value::Bool(true)]));
        assert_eq!(bytes, vec![0x82, 0xf6, 0xf5]);
    }

    #[test]
    fn encode_map_sorted() {
        let map = Value::Map(vec![
            ("bb".to_string(), Value::Null),
            ("a".to_string(), Value::Bool(true)),
        ]);
        let bytes = serialize_value(&map);
        assert_eq!(
            bytes,
            vec![0xa2, 0x61, b'a', 0xf5, 0x62, b'b', b'b', 0xf6]
        );
    }

    #[test]
    fn deterministic_encoding() {
        let map1 = Value::Map(vec![
            ("z".to_string(), Value::Number(1.0)),
            ("a".to_string(), Value::Number(2.0)),
        ]);
        let map2 = Value::Map(vec![
            ("a".to_string(), Value::Number(2.0)),
            ("z".to_string(), Value::Number(1.0)),
        ]);

        assert_eq!(serialize_value(&map1), serialize_value(&map2));
    }

    #[test]
    fn long_header_lengths() {
        let bytes = serialize_value(&Value::Bytes(vec![0u8; 300]));
        assert_eq!(bytes[0], 0x59); // major 2, two-byte length
        assert_eq!(&bytes[1..3], &300u16.to_be_bytes());
    }
}
