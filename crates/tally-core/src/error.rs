//! Sweep error taxonomy.
//!
//! Every error carries a scope that tells the runner what to do with it:
//! day-level errors leave a gap in the series and the sweep moves on,
//! workspace-level errors stop the sweep (restoration still runs),
//! fatal errors stop before or after the sweep with nothing left to try.

use thiserror::Error;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Only the current day is lost.
    Day,
    /// The shared tree can no longer be trusted; stop sweeping.
    Workspace,
    /// Nothing can proceed (no history, or the tree could not be restored).
    Fatal,
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sampling error: {message}")]
    Sampling { message: String },

    #[error("checkout error ({target}): {message}")]
    Checkout { target: String, message: String },

    #[error("staging error: {message}")]
    Staging {
        message: String,
        /// Whether the partial stage was removed and the tree left as checked out.
        tree_consistent: bool,
    },

    #[error("test invocation error: {message}")]
    TestInvocation { message: String },

    #[error("no summary line found ({lines} lines scanned)")]
    Parse { lines: usize },

    #[error("cleanup error: {message}")]
    Cleanup { message: String },
}

impl SweepError {
    pub fn sampling(message: impl Into<String>) -> Self {
        Self::Sampling {
            message: message.into(),
        }
    }

    pub fn checkout(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Checkout {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn test_invocation(message: impl Into<String>) -> Self {
        Self::TestInvocation {
            message: message.into(),
        }
    }

    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::Cleanup {
            message: message.into(),
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Sampling { .. } | Self::Cleanup { .. } => ErrorScope::Fatal,
            Self::Checkout { .. } => ErrorScope::Workspace,
            Self::Staging {
                tree_consistent: true,
                ..
            } => ErrorScope::Day,
            Self::Staging { .. } => ErrorScope::Workspace,
            Self::TestInvocation { .. } | Self::Parse { .. } => ErrorScope::Day,
        }
    }

    /// Machine-readable code for logs and the event file.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sampling { .. } => "sampling_error",
            Self::Checkout { .. } => "checkout_error",
            Self::Staging { .. } => "staging_error",
            Self::TestInvocation { .. } => "test_invocation_error",
            Self::Parse { .. } => "parse_error",
            Self::Cleanup { .. } => "cleanup_error",
        }
    }

    pub fn is_day_level(&self) -> bool {
        self.scope() == ErrorScope::Day
    }
}
