//! kubectl over the remote runner.

use std::time::Duration;

use tracing::info;

use berth_exec::shell::{heredoc, quote};
use berth_exec::{CommandOutput, ExecError, ExecOptions, RemoteRunner};
use berth_manifest::ManifestSet;
use berth_state::ExecutionTag;

use crate::error::{BootstrapError, BootstrapResult};

/// Slack on top of kubectl's own `--timeout` before the transport gives up.
const TRANSPORT_SLACK: Duration = Duration::from_secs(30);

pub struct Kubectl<'a> {
    runner: &'a RemoteRunner,
}

impl<'a> Kubectl<'a> {
    pub fn new(runner: &'a RemoteRunner) -> Self {
        Self { runner }
    }

    pub fn apply(&self, set: &ManifestSet, tag: ExecutionTag) -> BootstrapResult<CommandOutput> {
        self.apply_with(set, ExecOptions::tagged(tag))
    }

    /// Apply `set` with explicit options, e.g. secrets masked in the ledger.
    pub fn apply_with(&self, set: &ManifestSet, opts: ExecOptions) -> BootstrapResult<CommandOutput> {
        let yaml = set.to_yaml()?;
        Ok(self.runner.execute(&apply_command(&yaml), opts)?)
    }

    pub fn apply_url(&self, url: &str, tag: ExecutionTag) -> BootstrapResult<CommandOutput> {
        Ok(self
            .runner
            .run(&format!("kubectl apply -f {}", quote(url)), tag)?)
    }

    /// Wait for `deployment` to finish rolling out, bounded by `timeout`.
    pub fn rollout_status(&self, deployment: &str, timeout: Duration) -> BootstrapResult<()> {
        let command = format!(
            "kubectl rollout status deployment/{deployment} --timeout={}s",
            timeout.as_secs()
        );
        let opts = ExecOptions::tagged(ExecutionTag::Rollout).timeout(timeout + TRANSPORT_SLACK);
        match self.runner.execute(&command, opts) {
            Ok(_) => {
                info!(deployment, "rollout complete");
                Ok(())
            }
            Err(ExecError::CommandFailed { output, .. }) => Err(BootstrapError::RolloutFailed {
                deployment: deployment.to_string(),
                output,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for every deployment in order; the first failure stops the wait.
    pub fn wait_for_rollouts(&self, deployments: &[String], timeout: Duration) -> BootstrapResult<()> {
        for deployment in deployments {
            self.rollout_status(deployment, timeout)?;
        }
        Ok(())
    }

    pub fn scale(&self, deployment: &str, replicas: u32) -> BootstrapResult<CommandOutput> {
        Ok(self.runner.run(
            &format!("kubectl scale deployment/{deployment} --replicas={replicas}"),
            ExecutionTag::Scale,
        )?)
    }

    pub fn rollout_restart(&self, deployment: &str) -> BootstrapResult<CommandOutput> {
        Ok(self.runner.run(
            &format!("kubectl rollout restart deployment/{deployment}"),
            ExecutionTag::Restart,
        )?)
    }
}

pub fn apply_command(yaml: &str) -> String {
    heredoc("kubectl apply -f -", yaml)
}

/// Command running `command` in the first pod of `deployment`.
pub fn exec_command(deployment: &str, command: &str) -> String {
    format!(
        "kubectl exec deployment/{deployment} -- sh -c {}",
        quote(command)
    )
}
