//! Error types for schema compilation and runtime read/write operations.

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while compiling a type definition into a schema.
///
/// These are always raised eagerly, at [`crate::Schema::compile`] time or
/// earlier; a compiled schema cannot produce them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A type name the registry does not know.
    #[error("unregistered type: {0}")]
    UnregisteredType(String),

    /// Two fields of the same record share a name.
    #[error("duplicate field name: {0}")]
    NameCollision(String),

    /// A field name shadows an operation of the record contract.
    #[error("reserved field name: {0}")]
    ReservedName(String),

    /// `initial_length` and `read_until` supplied together.
    #[error("initial_length and read_until are mutually exclusive")]
    MutuallyExclusive,

    /// Integer or bit field width outside 1..=64.
    #[error("invalid field width: {0} bits")]
    InvalidWidth(u32),

    /// A parameter the type requires was not supplied.
    #[error("type {ty} requires parameter {param}")]
    MissingParameter { ty: String, param: String },
}

/// Errors raised by read, write, evaluation, and assignment.
#[derive(Error, Debug)]
pub enum Error {
    /// The input stream ended mid-field.
    #[error("short read: needed {needed} bytes at offset {offset}")]
    ShortRead { needed: usize, offset: u64 },

    /// The output sink rejected bytes mid-field.
    #[error("short write at offset {offset}")]
    ShortWrite { offset: u64 },

    /// A `check_value` or computed `value` predicate failed on read.
    #[error("value check failed for {field}: expected {expected}, got {actual}")]
    Validity {
        field: String,
        expected: String,
        actual: String,
    },

    /// The evaluator exhausted the ancestor chain without a match.
    #[error("unresolved name: {0}")]
    UnresolvedName(String),

    /// Assignment to a computed field, or a type-incompatible value.
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    /// A choice selection matched none of the declared alternatives.
    #[error("selection {0} matches no alternative")]
    NoAlternative(String),

    /// More bits requested from the stream than fit in one value.
    #[error("too many bits: {0}")]
    TooManyBits(u32),

    /// Schema error surfaced at instantiation time.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// IO error from the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a validity error from displayable expected/actual values.
    pub(crate) fn validity(
        field: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::Validity {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
