//! Error types for the FFI layer.

use thiserror::Error;

/// Errors raised by struct and opaque wrappers and by the library loader.
#[derive(Debug, Error)]
pub enum FfiError {
    /// A value of the wrong shape or type was supplied.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description naming the expected type and the received value.
        message: String,
    },

    /// The named member does not exist on the type.
    #[error("{type_name} has no member `{member}`")]
    NoSuchMember {
        /// Type that was accessed.
        type_name: String,
        /// Requested member.
        member: String,
    },

    /// No accessor was generated for the member (hidden, read-only, or undeclared).
    #[error("undefined accessor `{accessor}` for {type_name}")]
    UnknownAccessor {
        /// Type that was accessed.
        type_name: String,
        /// Accessor name, with a trailing `=` for writers.
        accessor: String,
    },

    /// A field map did not provide a declared member.
    #[error("cannot create new {type_name}: member `{member}` is missing")]
    MissingMember {
        /// Type being constructed.
        type_name: String,
        /// Member absent from the map.
        member: String,
    },

    /// An ordered value list had the wrong length.
    #[error("cannot create new {type_name}: expected {expected} values, got {received}")]
    ArityMismatch {
        /// Type being constructed.
        type_name: String,
        /// Number of declared members.
        expected: usize,
        /// Number of values supplied.
        received: usize,
    },

    /// A byte blob did not match the struct size.
    #[error("cannot create new {type_name}: expected {expected} bytes, got {received}")]
    SizeMismatch {
        /// Type being constructed.
        type_name: String,
        /// Struct size in bytes.
        expected: usize,
        /// Blob length.
        received: usize,
    },

    /// A primitive field could not hold the given value.
    #[error("cannot store {received} in a {expected} field")]
    InvalidValue {
        /// Field type.
        expected: String,
        /// Offending value.
        received: String,
    },

    /// Memory was accessed through a null pointer.
    #[error("memory access through a null pointer")]
    NullPointer,

    /// Access would run past the end of a self-managed buffer.
    #[error("access of {size} bytes at offset {offset} exceeds {len}-byte buffer")]
    OutOfBounds {
        /// Byte offset of the access.
        offset: usize,
        /// Number of bytes accessed.
        size: usize,
        /// Buffer length.
        len: usize,
    },

    /// `layout` was declared more than once for a struct type.
    #[error("layout for {type_name} was already declared")]
    LayoutRedeclared {
        /// Type being declared.
        type_name: String,
    },

    /// A member name appears twice in a layout.
    #[error("{type_name} declares member `{member}` more than once")]
    DuplicateMember {
        /// Type being declared.
        type_name: String,
        /// Repeated member.
        member: String,
    },

    /// The computed size/alignment is not a valid allocation layout.
    #[error("invalid memory layout: {0}")]
    Layout(#[from] std::alloc::LayoutError),

    /// None of the candidate library paths could be loaded.
    #[error("could not load {names}")]
    LoadFailure {
        /// Human-readable list of requested names.
        names: String,
        /// Every path that was tried, in order.
        attempts: Vec<String>,
    },

    /// A symbol is missing from a loaded library.
    #[error("function `{symbol}` not found: {reason}")]
    SymbolNotFound {
        /// Requested symbol.
        symbol: String,
        /// Loader diagnostic.
        reason: String,
    },

    /// No path templates are registered for this operating system.
    #[error("your OS ({os}) is not supported yet")]
    UnsupportedPlatform {
        /// Operating system that was searched for.
        os: String,
    },

    /// An OS pattern in a path set is not a valid regular expression.
    #[error("invalid OS pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// Regex compiler error.
        #[source]
        source: regex::Error,
    },
}

impl FfiError {
    /// Create a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        FfiError::TypeMismatch {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type FfiResult<T> = Result<T, FfiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_type_and_value() {
        let err = FfiError::type_mismatch("cannot create new Rect from 5 (i32)");
        assert!(err.to_string().contains("Rect"));
        assert!(err.to_string().contains("5 (i32)"));

        let err = FfiError::UnknownAccessor {
            type_name: "ReadStruct".into(),
            accessor: "reader=".into(),
        };
        assert_eq!(err.to_string(), "undefined accessor `reader=` for ReadStruct");
    }
}
