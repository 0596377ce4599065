//! Probe error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe execution failed ({status}): {detail}")]
    ExecutionFailed { status: String, detail: String },

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse probe output: {0}")]
    ParseError(String),

    #[error("Probe output incomplete: {0}")]
    IncompleteData(String),
}

impl ProbeError {
    /// Short machine-readable tag, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::ExecutionFailed { .. } => "execution_failed",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::ParseError(_) => "parse_error",
            ProbeError::IncompleteData(_) => "incomplete_data",
        }
    }
}
