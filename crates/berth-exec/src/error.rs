//! Error types for remote execution.

use thiserror::Error;

use berth_state::StateError;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The remote host rejected our credentials.
    #[error("authentication failed for {host}: {message}")]
    Authentication { host: String, message: String },

    /// Connection failure, timeout, refusal or unreachable host.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command `{command}` exited with {exit_code}: {}", tail(output))]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("ledger write failed: {0}")]
    Ledger(#[from] StateError),
}

impl ExecError {
    pub fn connection(message: impl Into<String>) -> Self {
        ExecError::Connection(message.into())
    }

    /// Exit code for `CommandFailed`, `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Last few lines of command output, for error messages.
fn tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_message_keeps_tail_only() {
        let output = (1..=8).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let err = ExecError::CommandFailed {
            command: "make".into(),
            exit_code: 2,
            output,
        };
        let message = err.to_string();
        assert!(message.starts_with("command `make` exited with 2"));
        assert!(message.contains("line 8"));
        assert!(!message.contains("line 3"));
        assert_eq!(err.exit_code(), Some(2));
    }
}
