//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding, decoding, or key handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A value could not be interpreted as a key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the rejection.
        message: String,
    },

    /// A key path string failed to parse.
    #[error("invalid key path: {message}")]
    InvalidKeyPath {
        /// Description of the syntax error.
        message: String,
    },

    /// Failed to decode a serialized value or key.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Indefinite-length items are forbidden.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// Invalid UTF-8 text.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Invalid UTF-16 code unit sequence in an encoded key.
    #[error("invalid UTF-16 sequence")]
    InvalidUtf16,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A size header exceeded the allowed limit.
    #[error("size limit exceeded: claimed {claimed}, max {max_allowed}")]
    SizeLimitExceeded {
        /// Length claimed by the header.
        claimed: u64,
        /// Maximum the decoder accepts.
        max_allowed: u64,
    },

    /// Invalid structure in the encoded input.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid key path error.
    pub fn invalid_key_path(message: impl Into<String>) -> Self {
        Self::InvalidKeyPath {
            message: message.into(),
        }
    }

    /// Creates a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
