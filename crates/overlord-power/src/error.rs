//! Power driver errors.

use std::io;

use thiserror::Error;

/// Result type for power operations
pub type PowerResult<T> = Result<T, PowerError>;

#[derive(Debug, Error)]
pub enum PowerError {
    /// The control channel ran but reported failure
    #[error("power command failed (return code {code:?}): {output}")]
    CommandFailed { code: Option<i32>, output: String },

    /// The control channel could not be started at all
    #[error("failed to run power command: {0}")]
    Io(#[from] io::Error),

    /// Status output outside the expected vocabulary
    #[error("unexpected power state output: {output:?}")]
    UnexpectedState { output: String },

    /// A power command answered with something other than its acknowledgement
    #[error("unexpected acknowledgement: expected {expected:?}, got {output:?}")]
    UnexpectedAcknowledgement { expected: String, output: String },

    #[error("unsupported boot device: {0}")]
    UnsupportedBootDevice(String),
}

impl PowerError {
    /// Transport failures, as opposed to protocol (unexpected text) failures
    pub fn is_transport(&self) -> bool {
        matches!(self, PowerError::CommandFailed { .. } | PowerError::Io(_))
    }
}
