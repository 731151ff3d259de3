//! Key paths: extracting and injecting keys on values.

use crate::error::{CodecError, CodecResult};
use crate::key::Key;
use crate::value::Value;

/// A rule for locating the key inside a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPath {
    /// No key path; keys are supplied out of line.
    None,
    /// A single dotted identifier chain. The empty string means the whole
    /// value is the key.
    Single(String),
    /// A non-empty ordered sequence of dotted chains; the extracted key is
    /// the array of component keys.
    Sequence(Vec<String>),
}

/// Outcome of evaluating a key path against a value.
#[derive(Debug, Clone, PartialEq)]
pub enum PathResult {
    /// The path resolved to a valid key.
    Resolved(Key),
    /// An intermediate step was missing, or the terminal value is absent.
    Unresolved,
    /// The terminal value exists but is not a valid key.
    NotAKey,
}

impl KeyPath {
    /// Parses a single dotted key path string.
    ///
    /// The empty string is the identity path. Each dot-separated segment
    /// must be an identifier: a letter, `_` or `$` followed by
    /// alphanumerics, `_` or `$`. This approximates the Unicode
    /// ID_Start/ID_Continue classes via `char::is_alphabetic` /
    /// `is_alphanumeric`, which accepts all ASCII identifiers and
    /// non-ASCII letters.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] on malformed input.
    pub fn parse_single(path: &str) -> CodecResult<Self> {
        validate_path_string(path)?;
        Ok(KeyPath::Single(path.to_string()))
    }

    /// Parses a sequence key path.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] if the sequence is empty or
    /// any component is malformed.
    pub fn parse_sequence(paths: &[String]) -> CodecResult<Self> {
        if paths.is_empty() {
            return Err(CodecError::invalid_key_path(
                "key path sequence must not be empty",
            ));
        }
        for path in paths {
            validate_path_string(path)?;
        }
        Ok(KeyPath::Sequence(paths.to_vec()))
    }

    /// Checks whether this is the out-of-line (absent) key path.
    pub fn is_none(&self) -> bool {
        matches!(self, KeyPath::None)
    }

    /// Checks whether this path can never produce a key without an
    /// external key generator (the empty single path extracts the value
    /// itself, so it does not count).
    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    /// Evaluates this key path against a value.
    ///
    /// Three outcomes are distinguished so the store layer can decide
    /// between raising an error and generating a key: see [`PathResult`].
    pub fn evaluate(&self, value: &Value) -> PathResult {
        match self {
            KeyPath::None => PathResult::Unresolved,
            KeyPath::Single(path) => match resolve(path, value) {
                Some(v) => match Key::from_value(v.as_ref()) {
                    Ok(key) => PathResult::Resolved(key),
                    Err(_) => PathResult::NotAKey,
                },
                None => PathResult::Unresolved,
            },
            KeyPath::Sequence(paths) => {
                let mut keys = Vec::with_capacity(paths.len());
                for path in paths {
                    match resolve(path, value) {
                        Some(v) => match Key::from_value(v.as_ref()) {
                            Ok(key) => keys.push(key),
                            Err(_) => return PathResult::NotAKey,
                        },
                        None => return PathResult::Unresolved,
                    }
                }
                PathResult::Resolved(Key::Array(keys))
            }
        }
    }

    /// Evaluates a single path without key validation, returning the raw
    /// value at the path. Used by multi-entry index extraction.
    ///
    /// Returns `None` for sequences, out-of-line paths, and unresolved
    /// traversals.
    pub fn evaluate_raw<'a>(&self, value: &'a Value) -> Option<ResolvedValue<'a>> {
        match self {
            KeyPath::Single(path) => resolve(path, value),
            _ => None,
        }
    }

    /// Injects a generated key into a value at this path, creating
    /// intermediate maps where missing.
    ///
    /// Only meaningful for non-empty single paths (the only shape a key
    /// generator is permitted with).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if an existing intermediate is
    /// not a map, or [`CodecError::InvalidKeyPath`] if the path shape
    /// cannot accept an injection.
    pub fn inject(&self, value: &mut Value, key: &Key) -> CodecResult<()> {
        let KeyPath::Single(path) = self else {
            return Err(CodecError::invalid_key_path(
                "key injection requires a single key path",
            ));
        };
        if path.is_empty() {
            return Err(CodecError::invalid_key_path(
                "cannot inject into the identity key path",
            ));
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut current = value;

        for segment in &segments[..segments.len() - 1] {
            let Value::Map(pairs) = current else {
                return Err(CodecError::invalid_key(format!(
                    "cannot create property \"{segment}\" on a primitive"
                )));
            };
            let index = match pairs.iter().position(|(k, _)| k == segment) {
                Some(i) => i,
                None => {
                    pairs.push(((*segment).to_string(), Value::Map(Vec::new())));
                    pairs.len() - 1
                }
            };
            current = &mut pairs[index].1;
        }

        let last = segments[segments.len() - 1];
        let Value::Map(pairs) = current else {
            return Err(CodecError::invalid_key(format!(
                "cannot set property \"{last}\" on a primitive"
            )));
        };
        match pairs.iter_mut().find(|(k, _)| k == last) {
            Some((_, slot)) => *slot = key.to_value(),
            None => pairs.push((last.to_string(), key.to_value())),
        }
        Ok(())
    }

    /// Checks whether [`KeyPath::inject`] would succeed on this value:
    /// every existing intermediate along the path must be a map, and so
    /// must the parent of the final segment.
    pub fn can_inject(&self, value: &Value) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        if path.is_empty() {
            return false;
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut current = value;
        for segment in &segments[..segments.len() - 1] {
            match current {
                Value::Map(_) => match current.get(segment) {
                    Some(next) => current = next,
                    None => return true,
                },
                _ => return false,
            }
        }
        matches!(current, Value::Map(_))
    }
}

/// A resolved value: borrowed when it exists in the tree, owned for
/// synthesized properties such as string length.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue<'a> {
    /// A value borrowed from the input tree.
    Borrowed(&'a Value),
    /// A value synthesized during traversal.
    Owned(Value),
}

impl ResolvedValue<'_> {
    /// Returns a reference to the resolved value.
    pub fn as_ref(&self) -> &Value {
        match self {
            ResolvedValue::Borrowed(v) => v,
            ResolvedValue::Owned(v) => v,
        }
    }

    /// Clones the resolved value out.
    pub fn into_owned(self) -> Value {
        match self {
            ResolvedValue::Borrowed(v) => v.clone(),
            ResolvedValue::Owned(v) => v,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn resolve<'a>(path: &str, value: &'a Value) -> Option<ResolvedValue<'a>> {
    if path.is_empty() {
        return Some(ResolvedValue::Borrowed(value));
    }

    let mut current = ResolvedValue::Borrowed(value);
    for segment in path.split('.') {
        // "length" resolves on strings and arrays the way own properties
        // would on the host side. UTF-16 length for strings.
        let next = match current.as_ref() {
            Value::Text(s) if segment == "length" => Some(ResolvedValue::Owned(Value::Number(
                s.encode_utf16().count() as f64,
            ))),
            Value::Array(items) if segment == "length" => {
                Some(ResolvedValue::Owned(Value::Number(items.len() as f64)))
            }
            Value::Map(_) => match current {
                ResolvedValue::Borrowed(v) => v.get(segment).map(ResolvedValue::Borrowed),
                ResolvedValue::Owned(ref v) => {
                    v.get(segment).cloned().map(ResolvedValue::Owned)
                }
            },
            _ => None,
        };
        current = next?;
    }
    Some(current)
}

fn validate_path_string(path: &str) -> CodecResult<()> {
    if path.is_empty() {
        return Ok(());
    }
    for segment in path.split('.') {
        let mut chars = segment.chars();
        let Some(first) = chars.next() else {
            return Err(CodecError::invalid_key_path(format!(
                "empty segment in key path \"{path}\""
            )));
        };
        if !(first.is_alphabetic() || first == '_' || first == '$') {
            return Err(CodecError::invalid_key_path(format!(
                "segment \"{segment}\" does not start with an identifier character"
            )));
        }
        if let Some(bad) = chars.find(|c| !(c.is_alphanumeric() || *c == '_' || *c == '$')) {
            return Err(CodecError::invalid_key_path(format!(
                "invalid character {bad:?} in segment \"{segment}\""
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Value {
        Value::map(vec![
            ("id".to_string(), Value::Number(42.0)),
            ("name".to_string(), Value::Text("gadget".to_string())),
            (
                "vendor".to_string(),
                Value::map(vec![
                    ("city".to_string(), Value::Text("Oslo".to_string())),
                    ("rating".to_string(), Value::Null),
                ]),
            ),
        ])
    }

    #[test]
    fn parse_accepts_identifiers() {
        assert!(KeyPath::parse_single("id").is_ok());
        assert!(KeyPath::parse_single("vendor.city").is_ok());
        assert!(KeyPath::parse_single("_private.$dollar").is_ok());
        assert!(KeyPath::parse_single("").is_ok());
        assert!(KeyPath::parse_single("øre.値").is_ok());
    }

    #[test]
    fn parse_rejects_bad_syntax() {
        assert!(KeyPath::parse_single(".id").is_err());
        assert!(KeyPath::parse_single("id.").is_err());
        assert!(KeyPath::parse_single("a..b").is_err());
        assert!(KeyPath::parse_single("1up").is_err());
        assert!(KeyPath::parse_single("a-b").is_err());
        assert!(KeyPath::parse_single("a b").is_err());
    }

    #[test]
    fn parse_sequence_rejects_empty() {
        assert!(KeyPath::parse_sequence(&[]).is_err());
        assert!(KeyPath::parse_sequence(&["a".to_string(), "!".to_string()]).is_err());
    }

    #[test]
    fn evaluate_resolves_simple_path() {
        let path = KeyPath::parse_single("id").unwrap();
        assert_eq!(
            path.evaluate(&record()),
            PathResult::Resolved(Key::Number(42.0))
        );
    }

    #[test]
    fn evaluate_resolves_nested_path() {
        let path = KeyPath::parse_single("vendor.city").unwrap();
        assert_eq!(
            path.evaluate(&record()),
            PathResult::Resolved(Key::Text("Oslo".to_string()))
        );
    }

    #[test]
    fn evaluate_identity_path() {
        let path = KeyPath::parse_single("").unwrap();
        assert_eq!(
            path.evaluate(&Value::Number(7.0)),
            PathResult::Resolved(Key::Number(7.0))
        );
        assert_eq!(path.evaluate(&record()), PathResult::NotAKey);
    }

    #[test]
    fn evaluate_unresolved_on_missing() {
        let path = KeyPath::parse_single("missing").unwrap();
        assert_eq!(path.evaluate(&record()), PathResult::Unresolved);

        let deep = KeyPath::parse_single("vendor.country.code").unwrap();
        assert_eq!(deep.evaluate(&record()), PathResult::Unresolved);

        let through_primitive = KeyPath::parse_single("id.sub").unwrap();
        assert_eq!(through_primitive.evaluate(&record()), PathResult::Unresolved);
    }

    #[test]
    fn evaluate_not_a_key_on_invalid_terminal() {
        let path = KeyPath::parse_single("vendor.rating").unwrap();
        assert_eq!(path.evaluate(&record()), PathResult::NotAKey);
    }

    #[test]
    fn evaluate_string_length() {
        let path = KeyPath::parse_single("name.length").unwrap();
        assert_eq!(
            path.evaluate(&record()),
            PathResult::Resolved(Key::Number(6.0))
        );
    }

    #[test]
    fn evaluate_sequence_bundles_keys() {
        let path = KeyPath::parse_sequence(&["id".to_string(), "name".to_string()]).unwrap();
        assert_eq!(
            path.evaluate(&record()),
            PathResult::Resolved(Key::Array(vec![
                Key::Number(42.0),
                Key::Text("gadget".to_string()),
            ]))
        );
    }

    #[test]
    fn evaluate_sequence_fails_as_a_whole() {
        let missing =
            KeyPath::parse_sequence(&["id".to_string(), "missing".to_string()]).unwrap();
        assert_eq!(missing.evaluate(&record()), PathResult::Unresolved);

        let invalid =
            KeyPath::parse_sequence(&["id".to_string(), "vendor.rating".to_string()]).unwrap();
        assert_eq!(invalid.evaluate(&record()), PathResult::NotAKey);
    }

    #[test]
    fn evaluate_raw_skips_validation() {
        let value = Value::map(vec![(
            "tags".to_string(),
            Value::Array(vec![Value::Text("a".into()), Value::Null]),
        )]);
        let path = KeyPath::parse_single("tags").unwrap();
        let raw = path.evaluate_raw(&value).unwrap();
        assert_eq!(raw.as_ref().as_array().unwrap().len(), 2);
    }

    #[test]
    fn inject_sets_existing_slot() {
        let mut value = Value::map(vec![("name".to_string(), Value::Text("x".into()))]);
        let path = KeyPath::parse_single("id").unwrap();
        path.inject(&mut value, &Key::Number(1.0)).unwrap();
        assert_eq!(value.get("id"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn inject_creates_intermediates() {
        let mut value = Value::map(vec![]);
        let path = KeyPath::parse_single("meta.seq").unwrap();
        path.inject(&mut value, &Key::Number(5.0)).unwrap();
        assert_eq!(
            value.get("meta").and_then(|m| m.get("seq")),
            Some(&Value::Number(5.0))
        );
    }

    #[test]
    fn inject_fails_through_primitive() {
        let mut value = Value::map(vec![("meta".to_string(), Value::Number(1.0))]);
        let path = KeyPath::parse_single("meta.seq").unwrap();
        assert!(path.inject(&mut value, &Key::Number(5.0)).is_err());
    }

    #[test]
    fn can_inject_matches_inject() {
        let path = KeyPath::parse_single("meta.seq").unwrap();

        assert!(path.can_inject(&Value::map(vec![])));
        assert!(path.can_inject(&Value::map(vec![(
            "meta".to_string(),
            Value::map(vec![])
        )])));
        assert!(!path.can_inject(&Value::map(vec![(
            "meta".to_string(),
            Value::Number(1.0)
        )])));
        assert!(!path.can_inject(&Value::Text("primitive".into())));
        assert!(!KeyPath::None.can_inject(&Value::map(vec![])));
    }

    #[test]
    fn inject_fails_on_primitive_root() {
        let mut value = Value::Text("primitive".into());
        let path = KeyPath::parse_single("id").unwrap();
        assert!(path.inject(&mut value, &Key::Number(1.0)).is_err());
    }
}
