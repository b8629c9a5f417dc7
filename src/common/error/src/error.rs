//! Core error types for Quarry.

use thiserror::Error;

/// Result type alias using `QuarryError`.
pub type QuarryResult<T> = std::result::Result<T, QuarryError>;

/// Generic boxed error for external error sources.
pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for Quarry operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuarryError {
    /// The memory accountant refused an allocation.
    #[error("ResourceExhausted: [{label}] would use {} bytes, limit {limit} bytes (requested {requested})", .used + .requested)]
    ResourceExhausted {
        /// What was being allocated.
        label: String,
        /// Bytes requested by the failing call.
        requested: usize,
        /// Bytes in use when the call was made.
        used: usize,
        /// Configured budget.
        limit: usize,
    },

    /// A programmer-contract defect: out-of-order doc ids, builder type
    /// mismatch, operator protocol misuse.
    #[error("InvariantViolation: {0}")]
    InvariantViolation(String),

    /// Argument validation failed at construction time.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// A single value could not be coerced to the requested type.
    #[error("TypeCoercion: {0}")]
    TypeCoercion(String),

    /// Execution was cancelled cooperatively.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Type mismatch or invalid type operation.
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Invalid value provided.
    #[error("ValueError: {0}")]
    ValueError(String),

    /// Query execution error.
    #[error("ExecutionError: {0}")]
    ExecutionError(String),

    /// Error reported by the storage layer.
    #[error("StorageError: {0}")]
    StorageError(String),

    /// Feature not yet implemented.
    #[error("NotImplemented: {0}")]
    NotImplemented(String),

    /// Internal error (bug in Quarry).
    #[error("InternalError: {0}")]
    InternalError(String),

    /// IO error.
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// External error from third-party libraries.
    #[error("ExternalError: {0}")]
    ExternalError(GenericError),
}

impl QuarryError {
    /// Create a new `TypeError`.
    pub fn type_error<S: Into<String>>(msg: S) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a new `ValueError`.
    pub fn value_error<S: Into<String>>(msg: S) -> Self {
        Self::ValueError(msg.into())
    }

    /// Create a new `NotImplemented` error.
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a new `InternalError`.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::InternalError(msg.into())
    }

    /// Create a new `ExecutionError`.
    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Create a new `StorageError`.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::StorageError(msg.into())
    }

    /// Create a new `InvariantViolation`.
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new `TypeCoercion` error.
    pub fn coercion<S: Into<String>>(msg: S) -> Self {
        Self::TypeCoercion(msg.into())
    }

    /// Create a cancellation error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(
        label: S,
        requested: usize,
        used: usize,
        limit: usize,
    ) -> Self {
        Self::ResourceExhausted {
            label: label.into(),
            requested,
            used,
            limit,
        }
    }

    /// Whether this error came from the memory accountant.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }

    /// Whether this error is a programmer-contract defect.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Whether this error is a per-value coercion failure.
    pub fn is_coercion(&self) -> bool {
        matches!(self, Self::TypeCoercion(_))
    }

    /// Whether execution was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Ensure a condition holds, returning an `ExecutionError` if not.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            return Err($crate::QuarryError::ExecutionError($msg.to_string()));
        }
    };
    ($cond:expr, $variant:ident: $($msg:tt)*) => {
        if !$cond {
            return Err($crate::QuarryError::$variant(format!($($msg)*)));
        }
    };
}

/// Return early with an `InvariantViolation`.
#[macro_export]
macro_rules! invariant {
    ($($arg:tt)*) => {
        return Err($crate::QuarryError::InvariantViolation(format!($($arg)*)))
    };
}

/// Return early with a `ValueError`.
#[macro_export]
macro_rules! value_err {
    ($($arg:tt)*) => {
        return Err($crate::QuarryError::ValueError(format!($($arg)*)))
    };
}

/// Return early with a `TypeError`.
#[macro_export]
macro_rules! type_err {
    ($($arg:tt)*) => {
        return Err($crate::QuarryError::TypeError(format!($($arg)*)))
    };
}
