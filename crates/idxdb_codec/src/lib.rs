//! # IdxDB Codec
//!
//! Key and value codecs for IdxDB.
//!
//! This crate provides the pure data layer under the storage engine:
//!
//! - [`Value`]: the dynamic record value type, with a deterministic CBOR
//!   serialization ([`serialize_value`] / [`deserialize_value`])
//! - [`Key`]: validated record keys with the cross-type total order
//!   (number < date < string < binary < array)
//! - [`encode_key`] / [`decode_key`]: an order-preserving byte encoding;
//!   bytewise comparison of encoded keys equals [`Key::cmp_order`]
//! - [`KeyPath`]: extraction and injection of keys on values
//! - [`KeyRange`]: bounded and half-bounded query ranges
//!
//! ## The ordering law
//!
//! ```
//! use idxdb_codec::{encode_key, Key};
//!
//! let a = Key::Number(10.0);
//! let b = Key::Text("10".to_string());
//! assert_eq!(a.cmp_order(&b), encode_key(&a).cmp(&encode_key(&b)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod key;
mod key_codec;
mod key_path;
mod key_range;
mod value;

pub use decoder::{deserialize_value, ValueDecoder};
pub use encoder::{serialize_value, ValueEncoder};
pub use error::{CodecError, CodecResult};
pub use key::Key;
pub use key_codec::{decode_key, encode_key};
pub use key_path::{KeyPath, PathResult, ResolvedValue};
pub use key_range::{EncodedBounds, KeyRange};
pub use value::Value;
