use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Every way a single scenario can fail. None of them are retried.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to launch {}: {source}", .path.display())]
    LaunchFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read target stdout: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("banner is {expected} bytes long, but captured output has only {observed}")]
    TooShort { observed: usize, expected: usize },

    #[error("expected match: `{expected}`, got `{actual}`")]
    Mismatch { expected: String, actual: String },

    #[error("timed out after {} ms without reading a line", .timeout.as_millis())]
    TimedOut { timeout: Duration },

    #[error("expected to find `{needle}` in `{output}`")]
    NotSeen { needle: String, output: String },

    #[error("expected NOT to find `{needle}` in `{output}`")]
    UnexpectedlySeen { needle: String, output: String },

    #[error("expected to find `{first}` alternating with `{second}` within `{output}`")]
    NotAlternating {
        first: String,
        second: String,
        output: String,
    },

    #[error("invalid output pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl ScenarioError {
    /// Short label used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScenarioError::LaunchFailed { .. } => "launch_failed",
            ScenarioError::ReadFailed(_) => "read_failed",
            ScenarioError::TooShort { .. } => "too_short",
            ScenarioError::Mismatch { .. } => "mismatch",
            ScenarioError::TimedOut { .. } => "timed_out",
            ScenarioError::NotSeen { .. } => "not_seen",
            ScenarioError::UnexpectedlySeen { .. } => "unexpectedly_seen",
            ScenarioError::NotAlternating { .. } => "not_alternating",
            ScenarioError::InvalidPattern { .. } => "invalid_pattern",
        }
    }
}
