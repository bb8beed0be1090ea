use std::path::PathBuf;

use thiserror::Error;

pub type RtResult<T> = Result<T, RtError>;

#[derive(Debug, Error)]
pub enum RtError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing command `{command}`")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("run cancelled: {0}")]
    Cancelled(String),

    #[error("required {what} not found at `{}`", path.display())]
    PreconditionMissing { what: String, path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid level file `{}`: {reason}", path.display())]
    InvalidLevelFile { path: PathBuf, reason: String },

    #[error("cannot restore `{}` from the fixture: {source}", path.display())]
    RestoreFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("working file `{}` does not match fixture (expected {expected}, found {actual})", path.display())]
    FixtureMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("illegal round-trip transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl RtError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        Self::CommandFailed {
            command,
            status,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn precondition(what: &str, path: impl Into<PathBuf>) -> Self {
        Self::PreconditionMissing {
            what: what.to_owned(),
            path: path.into(),
        }
    }

    /// Errors that abort the whole run. Stages propagate these and record
    /// everything else in the run log before the pipeline carries on.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PreconditionMissing { .. }
                | Self::InvalidConfig(_)
                | Self::RestoreFailed { .. }
                | Self::FixtureMismatch { .. }
                | Self::Cancelled(_)
        )
    }

    /// Process exit status for an error that reached `main`.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled(_) => crate::cli::ShutdownController::signal_exit_code(),
            _ => 1,
        }
    }

    /// Stable, machine-readable code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "RT-IO",
            Self::Json(_) => "RT-JSON",
            Self::CommandMissing { .. } => "RT-CMD-MISSING",
            Self::CommandFailed { .. } => "RT-CMD-FAILED",
            Self::CommandTimedOut { .. } => "RT-CMD-TIMEOUT",
            Self::Cancelled(_) => "RT-CANCELLED",
            Self::PreconditionMissing { .. } => "RT-PRECONDITION",
            Self::InvalidConfig(_) => "RT-CONFIG",
            Self::InvalidLevelFile { .. } => "RT-LEVEL-FILE",
            Self::RestoreFailed { .. } => "RT-RESTORE",
            Self::FixtureMismatch { .. } => "RT-FIXTURE-MISMATCH",
            Self::InvalidTransition { .. } => "RT-TRANSITION",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {trimmed}")
    }
}
