//! Operator commands against a running release or sandbox.
//!
//! Each command picks the most recent release (optionally of one
//! environment) or sandbox (optionally by slug). Remote commands are
//! recorded in the ledger under the `operator` category.

use std::fmt::Write as _;

use berth_cluster::Kubectl;
use berth_cluster::kubectl::exec_command;
use berth_core::BerthConfig;
use berth_core::naming::{release_prefix, resource_name, sandbox_prefix};
use berth_exec::shell::quote;
use berth_exec::{CommandOutput, ExecOptions, RemoteRunner, SshTarget, SshTransport};
use berth_state::{
    Execution, ExecutionCategory, ExecutionLogLine, ExecutionOwner, ExecutionTag, Release, Sandbox,
    SshKeyPair,
};
use tracing::info;

use crate::context::Backends;
use crate::error::{ProvisionError, ProvisionResult};
use crate::sandbox::{DEFAULT_WORKDIR, compose_command};

/// Which owner a command targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Release { environment: Option<String> },
    Sandbox { slug: Option<String> },
}

impl Selector {
    pub fn release(environment: Option<&str>) -> Self {
        Selector::Release {
            environment: environment.map(str::to_string),
        }
    }

    pub fn sandbox(slug: Option<&str>) -> Self {
        Selector::Sandbox {
            slug: slug.map(str::to_string),
        }
    }
}

enum Resolved {
    Release(Release),
    Sandbox(Sandbox),
}

/// One ledger row with its output.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub execution: Execution,
    pub lines: Vec<ExecutionLogLine>,
}

pub struct Operator {
    config: BerthConfig,
    backends: Backends,
}

impl Operator {
    pub fn new(config: BerthConfig, backends: Backends) -> Self {
        Self { config, backends }
    }

    /// Ledger of the selected owner, oldest first. With `failed_only`, just
    /// the executions that exited non-zero.
    pub fn logs(&self, selector: &Selector, failed_only: bool) -> ProvisionResult<Vec<LedgerEntry>> {
        let owner = match self.resolve(selector)? {
            Resolved::Release(r) => ExecutionOwner::Release(r.id),
            Resolved::Sandbox(s) => ExecutionOwner::Sandbox(s.id),
        };
        let store = &self.backends.store;
        let mut entries = Vec::new();
        for execution in store.list_executions(owner)? {
            if failed_only && !execution.failed() {
                continue;
            }
            let lines = store.list_log_lines(execution.id)?;
            entries.push(LedgerEntry { execution, lines });
        }
        Ok(entries)
    }

    /// Transport for an interactive login. Its key file lives as long as
    /// the returned value.
    pub fn ssh(&self, selector: &Selector) -> ProvisionResult<SshTransport> {
        let (host, key, _) = self.endpoint(selector)?;
        let target = SshTarget::new(host, self.config.compute.ssh_user.as_str(), key);
        Ok(SshTransport::new(target)?)
    }

    /// Run `command` inside a process or service: its pod on a release, its
    /// compose container on a sandbox.
    pub fn exec(
        &self,
        selector: &Selector,
        process: &str,
        command: &str,
        session: Option<&str>,
    ) -> ProvisionResult<CommandOutput> {
        let resolved = self.resolve(selector)?;
        let remote = match &resolved {
            Resolved::Release(release) => {
                self.require_workload(process)?;
                let prefix = release_prefix(&self.config.app_name, &release.environment);
                exec_command(&resource_name(&prefix, process), command)
            }
            Resolved::Sandbox(sandbox) => {
                self.require_workload(process)?;
                let prefix = sandbox_prefix(&self.config.app_name, &sandbox.slug);
                let workdir = self
                    .config
                    .repository
                    .as_ref()
                    .map_or(DEFAULT_WORKDIR, |r| r.path.as_str());
                format!(
                    "{} exec -T {} sh -c {}",
                    compose_command(&prefix, workdir, &self.config.sandbox.compose_file),
                    quote(process),
                    quote(command)
                )
            }
        };

        let runner = self.runner(resolved)?;
        let mut opts = ExecOptions::tagged(ExecutionTag::Command).allow_failure();
        if let Some(session) = session {
            opts = opts.session(session);
        }
        Ok(runner.execute(&remote, opts)?)
    }

    pub fn scale(&self, environment: Option<&str>, process: &str, replicas: u32) -> ProvisionResult<()> {
        let selector = Selector::release(environment);
        let (runner, deployment) = self.release_workload(&selector, process)?;
        Kubectl::new(&runner).scale(&deployment, replicas)?;
        info!(deployment, replicas, "scaled");
        Ok(())
    }

    pub fn restart(&self, environment: Option<&str>, process: &str) -> ProvisionResult<()> {
        let selector = Selector::release(environment);
        let (runner, deployment) = self.release_workload(&selector, process)?;
        Kubectl::new(&runner).rollout_restart(&deployment)?;
        info!(deployment, "restarted");
        Ok(())
    }

    fn release_workload(&self, selector: &Selector, process: &str) -> ProvisionResult<(RemoteRunner, String)> {
        self.require_workload(process)?;
        let resolved = self.resolve(selector)?;
        let prefix = match &resolved {
            Resolved::Release(r) => release_prefix(&self.config.app_name, &r.environment),
            Resolved::Sandbox(s) => sandbox_prefix(&self.config.app_name, &s.slug),
        };
        Ok((self.runner(resolved)?, resource_name(&prefix, process)))
    }

    fn require_workload(&self, name: &str) -> ProvisionResult<()> {
        let known = self.config.processes.contains_key(name)
            || self.config.services.iter().any(|s| s.name == name)
            || self.config.databases.iter().any(|d| d.kind.name() == name);
        if known {
            Ok(())
        } else {
            Err(ProvisionError::UnknownProcess(name.to_string()))
        }
    }

    fn resolve(&self, selector: &Selector) -> ProvisionResult<Resolved> {
        let store = &self.backends.store;
        match selector {
            Selector::Release { environment } => store
                .latest_release(environment.as_deref())?
                .map(Resolved::Release)
                .ok_or_else(|| {
                    ProvisionError::NotFound(match environment {
                        Some(env) => format!("no release for environment {env}"),
                        None => "no release".to_string(),
                    })
                }),
            Selector::Sandbox { slug: Some(slug) } => store
                .find_sandbox_by_slug(slug)?
                .map(Resolved::Sandbox)
                .ok_or_else(|| ProvisionError::NotFound(format!("no sandbox {slug}"))),
            Selector::Sandbox { slug: None } => store
                .latest_sandbox(None)?
                .map(Resolved::Sandbox)
                .ok_or_else(|| ProvisionError::NotFound("no sandbox".to_string())),
        }
    }

    fn endpoint(&self, selector: &Selector) -> ProvisionResult<(String, SshKeyPair, ExecutionOwner)> {
        let resolved = self.resolve(selector)?;
        self.endpoint_of(&resolved)
    }

    fn endpoint_of(&self, resolved: &Resolved) -> ProvisionResult<(String, SshKeyPair, ExecutionOwner)> {
        match resolved {
            Resolved::Release(release) => {
                let prefix = release_prefix(&self.config.app_name, &release.environment);
                match (&release.server_ip, &release.ssh_key) {
                    (Some(ip), Some(key)) => {
                        Ok((ip.clone(), key.clone(), ExecutionOwner::Release(release.id)))
                    }
                    _ => Err(ProvisionError::NotProvisioned(prefix)),
                }
            }
            Resolved::Sandbox(sandbox) => {
                let prefix = sandbox_prefix(&self.config.app_name, &sandbox.slug);
                let Some(key) = &sandbox.ssh_key else {
                    return Err(ProvisionError::NotProvisioned(prefix));
                };
                let ip = self
                    .backends
                    .compute
                    .find_server(&prefix)?
                    .and_then(|s| s.public_ip)
                    .ok_or_else(|| ProvisionError::NotProvisioned(prefix.clone()))?;
                Ok((ip, key.clone(), ExecutionOwner::Sandbox(sandbox.id)))
            }
        }
    }

    fn runner(&self, resolved: Resolved) -> ProvisionResult<RemoteRunner> {
        let (host, key, owner) = self.endpoint_of(&resolved)?;
        let recorder = self.backends.recorder(owner, ExecutionCategory::Operator);
        self.backends.connect(&self.config, &host, &key, recorder)
    }
}

/// Plain-text rendering of a ledger for terminals.
pub fn render_ledger(entries: &[LedgerEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let e = &entry.execution;
        let step = e.tag.map(|t| t.label()).unwrap_or("Command");
        let status = match e.exit_code {
            Some(0) => "ok".to_string(),
            Some(code) => format!("exit {code}"),
            None => "running".to_string(),
        };
        let _ = writeln!(out, "#{} [{step}] {} ({status})", e.id, e.command);
        for line in &entry.lines {
            let _ = writeln!(out, "    {}", line.content);
        }
    }
    out
}
