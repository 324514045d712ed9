//! Error types for the host bridge

use skein_sdk::{HandleToken, ScriptError, VmError};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types.
///
/// Every bridge operation returns these as values. Hooks running inside the
/// VM convert them into script errors before control returns to the VM.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// No overload accepts the supplied arguments
    #[error("No matching overload for '{member}' with {arg_count} argument(s)")]
    NoMatchingOverload {
        /// Member name
        member: String,
        /// Number of script arguments
        arg_count: usize,
    },

    /// Write to a member without a setter
    #[error("Member '{member}' is read-only")]
    ReadOnlyMemberWrite {
        /// Member name
        member: String,
    },

    /// Token does not map to a live host object
    #[error("Unresolved handle {:#x} (tag {})", token.id, token.tag)]
    UnresolvedHandle {
        /// The offending token
        token: HandleToken,
    },

    /// Member name or target object missing at a bridge hook
    #[error("Null member access: {0}")]
    NullMemberAccess(String),

    /// No constructor takes the supplied number of arguments
    #[error("No constructor of '{type_name}' takes {arg_count} argument(s)")]
    ConstructionFailure {
        /// Type being constructed
        type_name: String,
        /// Number of script arguments
        arg_count: usize,
    },

    /// Value cannot be converted to the required host type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Script function used after `dispose`
    #[error("Script function has been disposed")]
    DisposedFunction,

    /// Host object is already borrowed by an outer call
    #[error("Host object of type '{type_name}' is already in use")]
    BorrowConflict {
        /// Type of the object
        type_name: String,
    },

    /// Host type was never forwarded to this session
    #[error("Type '{0}' has not been forwarded")]
    UnforwardedType(String),

    /// Type forwarded twice while duplicates are rejected
    #[error("Type '{0}' is already forwarded")]
    DuplicateForward(String),

    /// Host callable panicked
    #[error("Host function panicked: {0}")]
    HostPanic(String),

    /// Live handle cap reached
    #[error("Handle limit of {0} reached")]
    HandleLimit(usize),

    /// Error reported by the VM
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl BridgeError {
    /// Build a type mismatch error
    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<BridgeError> for ScriptError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Vm(vm) => vm.into(),
            other => ScriptError::new(other.to_string()),
        }
    }
}

/// Run host code, turning a panic into `BridgeError::HostPanic`
pub(crate) fn catch_host_panic<T>(f: impl FnOnce() -> BridgeResult<T>) -> BridgeResult<T> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        Err(BridgeError::HostPanic(msg))
    })
}
