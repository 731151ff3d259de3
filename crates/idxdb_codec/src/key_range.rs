//! Key ranges for queries and cursors.

use crate::error::{CodecError, CodecResult};
use crate::key::Key;
use crate::key_codec::encode_key;
use std::cmp::Ordering;

/// A contiguous range of keys, bounded or half-bounded, with open or
/// closed endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    /// Lower bound, if any.
    pub lower: Option<Key>,
    /// Upper bound, if any.
    pub upper: Option<Key>,
    /// Whether the lower bound is excluded.
    pub lower_open: bool,
    /// Whether the upper bound is excluded.
    pub upper_open: bool,
}

impl KeyRange {
    /// A range containing exactly one key.
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// A range with only a lower bound.
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// A range with only an upper bound.
    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key),
            lower_open: false,
            upper_open: open,
        }
    }

    /// A doubly-bounded range.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if the lower bound is above the
    /// upper bound, or equal to it with either endpoint open.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> CodecResult<Self> {
        match lower.cmp_order(&upper) {
            Ordering::Greater => Err(CodecError::invalid_key(
                "lower bound is greater than upper bound",
            )),
            Ordering::Equal if lower_open || upper_open => Err(CodecError::invalid_key(
                "bounds are equal but an endpoint is open",
            )),
            _ => Ok(Self {
                lower: Some(lower),
                upper: Some(upper),
                lower_open,
                upper_open,
            }),
        }
    }

    /// The unbounded range.
    pub fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    /// Checks whether a key falls within this range.
    pub fn contains(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            match key.cmp_order(lower) {
                Ordering::Less => return false,
                Ordering::Equal if self.lower_open => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match key.cmp_order(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if self.upper_open => return false,
                _ => {}
            }
        }
        true
    }

    /// Encodes the bounds for the storage layer.
    pub fn to_byte_bounds(&self) -> EncodedBounds {
        EncodedBounds {
            lower: self.lower.as_ref().map(encode_key),
            upper: self.upper.as_ref().map(encode_key),
            lower_open: self.lower_open,
            upper_open: self.upper_open,
        }
    }
}

/// Encoded form of a [`KeyRange`]'s bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBounds {
    /// Encoded lower bound, if any.
    pub lower: Option<Vec<u8>>,
    /// Encoded upper bound, if any.
    pub upper: Option<Vec<u8>>,
    /// Whether the lower bound is excluded.
    pub lower_open: bool,
    /// Whether the upper bound is excluded.
    pub upper_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contains_just_the_key() {
        let range = KeyRange::only(Key::Number(5.0));
        assert!(range.contains(&Key::Number(5.0)));
        assert!(!range.contains(&Key::Number(5.1)));
        assert!(!range.contains(&Key::Number(4.9)));
    }

    #[test]
    fn bound_validation() {
        assert!(KeyRange::bound(Key::Number(2.0), Key::Number(1.0), false, false).is_err());
        assert!(KeyRange::bound(Key::Number(1.0), Key::Number(1.0), true, false).is_err());
        assert!(KeyRange::bound(Key::Number(1.0), Key::Number(1.0), false, false).is_ok());
    }

    #[test]
    fn open_and_closed_endpoints() {
        let closed = KeyRange::bound(Key::Number(1.0), Key::Number(3.0), false, false).unwrap();
        assert!(closed.contains(&Key::Number(1.0)));
        assert!(closed.contains(&Key::Number(3.0)));

        let open = KeyRange::bound(Key::Number(1.0), Key::Number(3.0), true, true).unwrap();
        assert!(!open.contains(&Key::Number(1.0)));
        assert!(!open.contains(&Key::Number(3.0)));
        assert!(open.contains(&Key::Number(2.0)));
    }

    #[test]
    fn half_bounded_ranges() {
        let lower = KeyRange::lower_bound(Key::Text("m".into()), false);
        assert!(lower.contains(&Key::Text("m".into())));
        assert!(lower.contains(&Key::Text("z".into())));
        assert!(!lower.contains(&Key::Text("a".into())));
        // Binary keys rank above every string.
        assert!(lower.contains(&Key::Binary(vec![])));

        let upper = KeyRange::upper_bound(Key::Number(10.0), true);
        assert!(upper.contains(&Key::Number(9.0)));
        assert!(!upper.contains(&Key::Number(10.0)));
    }

    #[test]
    fn unbounded_contains_everything() {
        let range = KeyRange::unbounded();
        assert!(range.contains(&Key::Number(f64::MIN)));
        assert!(range.contains(&Key::Array(vec![])));
    }

    #[test]
    fn byte_bounds_carry_flags() {
        let range = KeyRange::bound(Key::Number(1.0), Key::Number(2.0), true, false).unwrap();
        let bounds = range.to_byte_bounds();
        assert!(bounds.lower.is_some());
        assert!(bounds.upper.is_some());
        assert!(bounds.lower_open);
        assert!(!bounds.upper_open);
    }
}
