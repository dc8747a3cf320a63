//! berth-exec — remote command execution for Berth.
//!
//! Every shell command Berth runs on a server goes through a [`RemoteRunner`],
//! which opens an execution row in the ledger, streams output lines to the
//! [`ProvisionEvents`] sink as they arrive, persists them per stream, and
//! closes the row with the exit code.
//!
//! ```text
//! RemoteRunner
//!   ├── Transport (SshTransport | ScriptedTransport)
//!   └── StepRecorder
//!         ├── StateStore (executions + log lines)
//!         └── ProvisionEvents (on_step_started, on_log_line)
//! ```
//!
//! Engine steps that are not shell commands (cloud reconcile calls, state
//! transitions) are recorded through [`StepRecorder::step`] so the ledger is
//! a complete account of a workflow.

pub mod error;
pub mod events;
pub mod poll;
pub mod recorder;
pub mod runner;
pub mod shell;
pub mod ssh;
pub mod transport;

#[cfg(feature = "testing")]
pub mod testing;

pub use error::{ExecError, ExecResult};
pub use events::{NoopEvents, ProvisionEvents, TracingEvents};
pub use poll::poll_until;
pub use recorder::StepRecorder;
pub use runner::{CommandOutput, ExecOptions, RemoteRunner};
pub use ssh::{SshTransport, SshTransportFactory};
pub use transport::{LineSink, SshTarget, Transport, TransportFactory};
