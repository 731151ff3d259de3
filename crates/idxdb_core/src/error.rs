//! Error types for the engine.

use idxdb_codec::CodecError;
use idxdb_storage::DriverError;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine.
///
/// Each variant corresponds to one name in the DOM-exception taxonomy;
/// [`Error::name`] returns that name. Synchronous misuse throws the error
/// on the caller's stack; asynchronous failures are delivered through a
/// request's error event.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// An open was requested at a version below the stored one.
    #[error("requested version is below the stored version: {0}")]
    Version(String),

    /// A handle was used outside its valid lifecycle window.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A data operation was issued while the transaction was not active.
    #[error("transaction is not active: {0}")]
    TransactionInactive(String),

    /// A mutation was issued in a read-only transaction.
    #[error("transaction is read-only: {0}")]
    ReadOnly(String),

    /// A uniqueness or naming constraint was violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A key, query, or cursor argument was invalid.
    #[error("data error: {0}")]
    Data(String),

    /// A value could not be serialized for storage.
    #[error("value could not be cloned: {0}")]
    DataClone(String),

    /// A store, index, or database was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation was invoked on the wrong kind of source.
    #[error("invalid access: {0}")]
    InvalidAccess(String),

    /// The transaction was aborted.
    #[error("transaction aborted: {0}")]
    Abort(String),

    /// A key path string failed to parse.
    #[error("key path syntax error: {0}")]
    Syntax(String),

    /// An argument failed basic validation.
    #[error("type error: {0}")]
    Type(String),

    /// The storage driver failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns the DOM-exception-style name of this error.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Error::Version(_) => "VersionError",
            Error::InvalidState(_) => "InvalidStateError",
            Error::TransactionInactive(_) => "TransactionInactiveError",
            Error::ReadOnly(_) => "ReadOnlyError",
            Error::Constraint(_) => "ConstraintError",
            Error::Data(_) => "DataError",
            Error::DataClone(_) => "DataCloneError",
            Error::NotFound(_) => "NotFoundError",
            Error::InvalidAccess(_) => "InvalidAccessError",
            Error::Abort(_) => "AbortError",
            Error::Syntax(_) => "SyntaxError",
            Error::Type(_) => "TypeError",
            Error::Storage(_) => "UnknownError",
        }
    }

    /// Creates a version error.
    pub fn version(message: impl Into<String>) -> Self {
        Self::Version(message.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates a transaction-inactive error.
    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::TransactionInactive(message.into())
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::ReadOnly(message.into())
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Creates a data-clone error.
    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::DataClone(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates an invalid-access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess(message.into())
    }

    /// Creates an abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort(message.into())
    }

    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    /// Creates a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::InvalidKey { message } => Error::Data(message),
            CodecError::InvalidKeyPath { message } => Error::Syntax(message),
            other => Error::DataClone(other.to_string()),
        }
    }
}
