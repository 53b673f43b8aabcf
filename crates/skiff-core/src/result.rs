//! Initialization and run result types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of running an action's initialization code in a fresh container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitResult {
    /// Whether the container accepted the code
    pub ok: bool,

    /// Time spent initializing
    pub duration: Duration,

    /// Error reported by the container (if !ok)
    pub error: Option<String>,
}

impl InitResult {
    #[must_use]
    pub const fn success(duration: Duration) -> Self {
        Self {
            ok: true,
            duration,
            error: None,
        }
    }

    pub fn failure(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            duration,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one invocation inside a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Exit code of the action process
    pub exit_code: i32,

    /// Action response: parsed JSON when the output is JSON, a string otherwise
    pub response: serde_json::Value,

    /// Execution duration
    pub duration: Duration,

    /// Whether the action was killed due to timeout
    pub timed_out: bool,
}

impl RunResult {
    /// Check if the invocation was successful (exit code 0, no timeout)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Build a result from raw action output.
    #[must_use]
    pub fn from_output(exit_code: i32, stdout: &[u8], duration: Duration) -> Self {
        let text = String::from_utf8_lossy(stdout);
        let response = serde_json::from_str(text.trim())
            .unwrap_or_else(|_| serde_json::Value::String(text.into_owned()));
        Self {
            exit_code,
            response,
            duration,
            timed_out: false,
        }
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self {
            exit_code: -1,
            response: serde_json::Value::Null,
            duration: Duration::ZERO,
            timed_out: false,
        }
    }
}
