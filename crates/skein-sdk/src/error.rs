//! Error types for the Skein VM ABI

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;

/// Errors reported by a script VM
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// A script-level error raised while running code
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Source text could not be turned into a chunk
    #[error("Syntax error in {chunk}: {message}")]
    Syntax {
        /// Chunk name given to `load`
        chunk: String,
        /// Loader diagnostic
        message: String,
    },

    /// Too many nested calls
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack index does not refer to a live slot
    #[error("Invalid stack index: {0}")]
    InvalidIndex(i32),

    /// Operation applied to a value of the wrong type
    #[error("Type error: {0}")]
    TypeError(String),

    /// The session has been closed
    #[error("VM is closed")]
    Closed,
}

/// Error raised by a native function.
///
/// Native functions never unwind into the VM. They return this value and the
/// VM turns it into a script error at the nearest protected call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ScriptError(pub String);

impl ScriptError {
    /// Create a script error from any message
    pub fn new(message: impl Into<String>) -> Self {
        ScriptError(message.into())
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for ScriptError {
    fn from(s: String) -> Self {
        ScriptError(s)
    }
}

impl From<&str> for ScriptError {
    fn from(s: &str) -> Self {
        ScriptError(s.to_string())
    }
}

impl From<VmError> for ScriptError {
    fn from(e: VmError) -> Self {
        match e {
            // Keep nested runtime messages flat instead of stacking prefixes
            VmError::Runtime(msg) => ScriptError(msg),
            other => ScriptError(other.to_string()),
        }
    }
}
