//! CBOR deserializer for record values.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Maximum allowed element count for arrays and maps.
/// Prevents allocation-based blowups from corrupted input.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Deserializes a value from CBOR bytes.
///
/// Accepts everything [`crate::serialize_value`] produces, plus a small
/// foreign-producer surface: integer major types and half- or
/// single-precision floats decode by widening to [`Value::Number`].
/// The serializer itself never emits those forms, so encoded output
/// stays canonical.
///
/// # Errors
///
/// Returns an error on malformed input and on forbidden constructs:
/// indefinite-length items, unknown tags, non-text map keys, trailing
/// bytes.
pub fn deserialize_value(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = ValueDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::invalid_structure("trailing bytes after value"));
    }
    Ok(value)
}

/// A CBOR decoder for [`Value`] trees.
pub struct ValueDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ValueDecoder<'a> {
    /// Creates a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decodes the next value.
    #[allow(clippy::cast_precision_loss)]
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => self
                .decode_unsigned(additional_info)
                .map(|n| Value::Number(n as f64)),
            1 => self
                .decode_unsigned(additional_info)
                .map(|n| Value::Number(-1.0 - n as f64)),
            2 => self.decode_bytes(additional_info),
            3 => self.decode_text(additional_info),
            4 => self.decode_array(additional_info),
            5 => self.decode_map(additional_info),
            6 => self.decode_tagged(additional_info),
            7 => self.decode_simple(additional_info),
            _ => unreachable!(),
        }
    }

    /// Checks if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => Ok(u64::from(self.read_byte()?)),
            25 => {
                let bytes = self.read_bytes(2)?;
                Ok(u64::from(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                Ok(u64::from(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                Ok(u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]))
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => unreachable!(),
        }
    }

    fn decode_length(&mut self, additional_info: u8, max: u64) -> CodecResult<usize> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len = self.decode_unsigned(additional_info)?;
        if len > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: max,
            });
        }
        Ok(len as usize)
    }

    fn decode_bytes(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Value::Text(text.to_string()))
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut items = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut pairs = Vec::with_capacity(len.min(4096));

        for _ in 0..len {
            let key = match self.decode()? {
                Value::Text(s) => s,
                other => {
                    return Err(CodecError::invalid_structure(format!(
                        "map key must be text, got {other:?}"
                    )))
                }
            };
            let value = self.decode()?;
            pairs.push((key, value));
        }

        Ok(Value::Map(pairs))
    }

    fn decode_tagged(&mut self, additional_info: u8) -> CodecResult<Value> {
        let tag = self.decode_unsigned(additional_info)?;
        match tag {
            // Tag 1: epoch-based date/time
            1 => match self.decode()? {
                Value::Number(ms) => Ok(Value::Date(ms)),
                other => Err(CodecError::invalid_structure(format!(
                    "date tag must wrap a number, got {other:?}"
                ))),
            },
            other => Err(CodecError::invalid_structure(format!(
                "unsupported tag {other}"
            ))),
        }
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 | 23 => Ok(Value::Null),
            25 => {
                // Half-precision: widen to f64
                let bytes = self.read_bytes(2)?;
                let half = u16::from_be_bytes([bytes[0], bytes[1]]);
                Ok(Value::Number(half_to_f64(half)))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Ok(Value::Number(f64::from(f32::from_bits(bits))))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let bits = u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                Ok(Value::Number(f64::from_bits(bits)))
            }
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            other => Err(CodecError::invalid_structure(format!(
                "unsupported simple value {other}"
            ))),
        }
    }
}

/// Widens an IEEE-754 half-precision value to f64.
fn half_to_f64(half: u16) -> f64 {
    let sign = f64::from((half >> 15) & 1);
    let exp = i32::from((half >> 10) & 0x1f);
    let frac = f64::from(half & 0x3ff);

    let magnitude = match exp {
        0 => frac * 2f64.powi(-24),
        31 => {
            if frac == 0.0 {
                f64::INFINITY
            } else {
                f64::NAN
            }
        }
        _ => (1.0 + frac / 1024.0) * 2f64.powi(exp - 25 + 10),
    };

    if sign == 1.0 {
        -magnitude
    } else {
        magnitude
    }
}
