//! Unified error handling for aotforge
//!
//! Every fallible operation in the crate returns [`ForgeResult`]. Errors are
//! surfaced synchronously at the call that detects them and are never retried
//! by the runtime; a failed operation leaves the session usable.
//!
//! Errors are grouped into categories:
//! - User errors (bad arguments, bad configuration, unknown names)
//! - Backend errors (device unavailable, out of memory, driver failures)
//! - Module errors (artifact directory problems)
//! - Internal errors (bugs)

use std::fmt;
use std::path::PathBuf;

/// What kind of entity a failed lookup was searching for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Kernel,
    Graph,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::Kernel => write!(f, "kernel"),
            LookupKind::Graph => write!(f, "graph"),
        }
    }
}

/// Why an artifact directory could not be turned into a module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleLoadErrorKind {
    /// Directory (or its metadata file) does not exist or is unreadable
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Metadata could not be parsed or is internally inconsistent
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// Metadata (or executor) targets a different backend than the loader
    #[error("backend mismatch: loader targets {expected}, found {found}")]
    BackendMismatch { expected: String, found: String },

    /// A compiled kernel payload could not be bound to the device
    #[error("invalid kernel payload: {0}")]
    InvalidPayload(String),
}

/// Unified error type for aotforge
#[derive(Debug, thiserror::Error)]
pub enum AotForgeError {
    // ========== Backend Errors ==========
    /// Requested backend is not available on this machine or in this build
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// Allocator could not satisfy a request
    #[error("Out of device memory: requested {requested} bytes ({reason})")]
    OutOfDeviceMemory { requested: usize, reason: String },

    /// Device-side failure (queue, copy, synchronization)
    #[error("Device error: {0}")]
    DeviceError(String),

    /// A kernel launch could not be enqueued or failed while executing
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    // ========== Module Errors ==========
    /// Artifact directory could not be loaded
    #[error("Failed to load module at {}: {kind}", path.display())]
    ModuleLoad {
        path: PathBuf,
        kind: ModuleLoadErrorKind,
    },

    // ========== User Errors ==========
    /// Unknown kernel or graph name
    #[error("{kind} not found: {name}")]
    NotFound { kind: LookupKind, name: String },

    /// A dispatch needs an argument symbol the caller did not supply
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    /// Bound value disagrees with the kernel's declared parameter
    #[error("Argument type mismatch for parameter '{parameter}': expected {expected}, got {actual}")]
    ArgumentTypeMismatch {
        parameter: String,
        expected: String,
        actual: String,
    },

    /// Bound ndarray declares a larger footprint than its allocation holds
    #[error("Allocation too small for parameter '{parameter}': needs {required} bytes, has {available}")]
    AllocationTooSmall {
        parameter: String,
        required: usize,
        available: usize,
    },

    /// Zero-sized request, freed handle, or handle from another session
    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    /// Caller-supplied value is unusable for the requested operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ========== Internal Errors ==========
    /// Lock poisoned (a kernel or host thread panicked while holding it)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AotForgeError {
    /// Shorthand for building a module load error
    pub fn module_load(path: impl Into<PathBuf>, kind: ModuleLoadErrorKind) -> Self {
        AotForgeError::ModuleLoad {
            path: path.into(),
            kind,
        }
    }

    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            AotForgeError::NotFound { .. }
            | AotForgeError::MissingArgument(_)
            | AotForgeError::ArgumentTypeMismatch { .. }
            | AotForgeError::AllocationTooSmall { .. }
            | AotForgeError::InvalidAllocation(_)
            | AotForgeError::InvalidArgument(_)
            | AotForgeError::InvalidConfiguration(_) => ErrorCategory::User,

            AotForgeError::UnsupportedBackend(_)
            | AotForgeError::OutOfDeviceMemory { .. }
            | AotForgeError::DeviceError(_)
            | AotForgeError::KernelLaunchFailed(_) => ErrorCategory::Backend,

            AotForgeError::ModuleLoad { .. } | AotForgeError::IoError(_) => ErrorCategory::Module,

            AotForgeError::LockPoisoned(_) | AotForgeError::InternalError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this is a user-facing error (actionable by the caller)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }

    /// The load failure cause, if this is a module load error
    pub fn module_load_kind(&self) -> Option<&ModuleLoadErrorKind> {
        match self {
            AotForgeError::ModuleLoad { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, configuration or name
    User,
    /// Device or driver failure
    Backend,
    /// Artifact directory problem
    Module,
    /// Bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Module => write!(f, "Module"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for AotForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AotForgeError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using AotForgeError
pub type ForgeResult<T> = std::result::Result<T, AotForgeError>;

/// Create an internal error with context
///
/// # Examples
/// ```ignore
/// return Err(internal_error!("slot {} vanished", index));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::AotForgeError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AotForgeError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Create a device error with context
#[macro_export]
macro_rules! device_error {
    ($msg:expr) => {
        $crate::error::AotForgeError::DeviceError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AotForgeError::DeviceError(format!($fmt, $($arg)*))
    };
}

/// Create a malformed-metadata load error for `path`
#[macro_export]
macro_rules! malformed_metadata {
    ($path:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $crate::error::AotForgeError::module_load(
            $path,
            $crate::error::ModuleLoadErrorKind::MalformedMetadata(format!($fmt $(, $arg)*)),
        )
    };
}
