//! The transport seam: something that can run a shell command somewhere and
//! stream its output back line by line.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use berth_state::{LogStream, SshKeyPair};

use crate::error::ExecResult;

/// Line sink passed to [`Transport::run`]. Called on the caller's thread.
pub type LineSink<'a> = dyn FnMut(LogStream, &str) + 'a;

pub trait Transport: Send + Sync {
    /// Run `command`, delivering each output line to `on_line` as it arrives.
    /// Returns the remote exit code; transport-level failures are errors.
    fn run(&self, command: &str, timeout: Duration, on_line: &mut LineSink<'_>) -> ExecResult<i32>;
}

/// Opens transports to freshly provisioned hosts.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, target: &SshTarget) -> ExecResult<Arc<dyn Transport>>;
}

/// Where and as whom to connect.
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub key: SshKeyPair,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>, key: SshKeyPair) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            key,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
