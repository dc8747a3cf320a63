//! Progress events emitted while a workflow runs.
//!
//! Events are delivered synchronously on the workflow's thread. Forwarding
//! them to a UI is the implementor's business.

use tracing::{debug, info};

use berth_state::{ExecutionId, ExecutionOwner, ExecutionTag, LogStream};

pub trait ProvisionEvents: Send + Sync {
    fn on_step_started(&self, owner: ExecutionOwner, tag: Option<ExecutionTag>, description: &str) {
        let _ = (owner, tag, description);
    }

    fn on_log_line(&self, owner: ExecutionOwner, execution: ExecutionId, stream: LogStream, line: &str) {
        let _ = (owner, execution, stream, line);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl ProvisionEvents for NoopEvents {}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl ProvisionEvents for TracingEvents {
    fn on_step_started(&self, owner: ExecutionOwner, tag: Option<ExecutionTag>, description: &str) {
        let step = tag.map(|t| t.label()).unwrap_or("Step");
        info!(%owner, step, "{description}");
    }

    fn on_log_line(&self, owner: ExecutionOwner, execution: ExecutionId, stream: LogStream, line: &str) {
        debug!(%owner, execution, stream = stream.as_str(), "{line}");
    }
}
