//! Sandbox lifecycle.
//!
//! ```text
//! pending ──► provisioning ──► running ──► stopped
//!                  │                          ▲
//!                  └──────► failed ───────────┘ (deprovision)
//! ```

use std::collections::BTreeMap;

use berth_cloud::IngressRule;
use berth_core::naming::{sandbox_branch, sandbox_hostname, sandbox_prefix};
use berth_core::{BerthConfig, ConfigError, Target};
use berth_exec::shell::{quote, write_file};
use berth_exec::{ExecError, ExecOptions, RemoteRunner, StepRecorder};
use berth_manifest::env::{app_env, dotenv};
use berth_manifest::kube::TUNNEL_CLIENT_IMAGE;
use berth_manifest::compose::{ComposeFile, render_compose};
use berth_state::{
    ExecutionCategory, ExecutionOwner, ExecutionTag, Sandbox, SandboxId, SandboxState, SshKeyPair,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::context::{Backends, wait_for_ssh};
use crate::error::{ProvisionError, ProvisionResult};
use crate::git;
use crate::infra::{Infrastructure, owner_labels, public_address};
use crate::tunnel::TunnelReconciler;

/// Checkout location when no repository is configured.
pub const DEFAULT_WORKDIR: &str = "/srv/app";
const DEFAULT_APP_PORT: u16 = 80;

pub struct SandboxProvisioner {
    config: BerthConfig,
    backends: Backends,
    id: SandboxId,
}

impl SandboxProvisioner {
    pub fn new(config: BerthConfig, backends: Backends, id: SandboxId) -> Self {
        Self {
            config,
            backends,
            id,
        }
    }

    fn owner(&self) -> ExecutionOwner {
        ExecutionOwner::Sandbox(self.id)
    }

    pub fn prefix(&self, sandbox: &Sandbox) -> String {
        sandbox_prefix(&self.config.app_name, &sandbox.slug)
    }

    /// Bring the sandbox to `running`. Does nothing when it already is.
    pub fn provision(&self) -> ProvisionResult<Sandbox> {
        let store = &self.backends.store;
        let sandbox = store.require_sandbox(self.id)?;
        if sandbox.state == SandboxState::Running {
            info!(slug = %sandbox.slug, "sandbox already running");
            return Ok(sandbox);
        }

        let recorder = self
            .backends
            .recorder(self.owner(), ExecutionCategory::Provision);
        let sandbox = self.transition(&recorder, SandboxState::Provisioning)?;
        info!(slug = %sandbox.slug, "provisioning sandbox");

        match self.run_provision(&recorder, &sandbox) {
            Ok(()) => {
                let sandbox = self.transition(&recorder, SandboxState::Running)?;
                info!(slug = %sandbox.slug, "sandbox running");
                Ok(sandbox)
            }
            Err(err) => Err(self.fail(&recorder, err)),
        }
    }

    /// Remove everything the sandbox owns and mark it `stopped`, whatever
    /// state it was in.
    pub fn deprovision(&self) -> ProvisionResult<Sandbox> {
        let sandbox = self.backends.store.require_sandbox(self.id)?;
        let recorder = self
            .backends
            .recorder(self.owner(), ExecutionCategory::Teardown);
        info!(slug = %sandbox.slug, "deprovisioning sandbox");

        match self.run_deprovision(&recorder, &sandbox) {
            Ok(()) => self.transition(&recorder, SandboxState::Stopped),
            Err(err) => Err(self.fail(&recorder, err)),
        }
    }

    fn run_provision(&self, recorder: &StepRecorder, sandbox: &Sandbox) -> ProvisionResult<()> {
        let config = &self.config;
        config.validate(Target::Sandbox)?;

        let prefix = self.prefix(sandbox);
        let key = self.ensure_keypair(recorder, sandbox, &prefix)?;
        let labels = owner_labels(&config.app_name, "sandbox", "slug", &sandbox.slug);
        let server = Infrastructure::new(self.backends.compute.as_ref(), recorder, &prefix, labels)
            .ensure(config, Target::Sandbox, &key)?;

        let runner = self
            .backends
            .connect(config, &public_address(&server)?, &key, recorder.clone())?;
        wait_for_ssh(&runner, &config.timeouts)?;

        self.install_tools(&runner)?;
        let workdir = self.checkout(&runner, sandbox)?;
        let compose = self.write_files(&runner, sandbox, &prefix, &workdir)?;
        self.start_services(&runner, &prefix, &workdir, &compose.datastores())?;

        if sandbox.exposed {
            self.expose(recorder, &runner, sandbox, &prefix)?;
        }
        Ok(())
    }

    fn ensure_keypair(
        &self,
        recorder: &StepRecorder,
        sandbox: &Sandbox,
        prefix: &str,
    ) -> ProvisionResult<SshKeyPair> {
        if let Some(key) = &sandbox.ssh_key {
            return Ok(key.clone());
        }
        let key = recorder.step(ExecutionTag::SshKeypair, "generate ssh keypair", || {
            self.backends.keys.generate(prefix)
        })?;
        let stored = key.clone();
        self.backends
            .store
            .update_sandbox(self.id, move |s| s.ssh_key = Some(stored))?;
        Ok(key)
    }

    fn install_tools(&self, runner: &RemoteRunner) -> ProvisionResult<()> {
        for tool in &self.config.sandbox.tools {
            runner.run(
                &format!(
                    "command -v {} >/dev/null 2>&1 || ({})",
                    quote(&tool.name),
                    tool.install
                ),
                ExecutionTag::SystemDependencies,
            )?;
        }
        Ok(())
    }

    /// Clone the repository and switch to the sandbox branch. Returns the
    /// working directory.
    fn checkout(&self, runner: &RemoteRunner, sandbox: &Sandbox) -> ProvisionResult<String> {
        let Some(repo) = &self.config.repository else {
            runner.run(
                &format!("mkdir -p {DEFAULT_WORKDIR}"),
                ExecutionTag::Clone,
            )?;
            return Ok(DEFAULT_WORKDIR.to_string());
        };

        git::store_credentials(runner, repo)?;
        runner.run(&git::clone_command(repo), ExecutionTag::Clone)?;

        let base = repo
            .branch
            .resolve(Target::Sandbox)
            .unwrap_or_else(|| "main".to_string());
        runner.run(
            &git::checkout_command(repo, &sandbox_branch(&sandbox.slug), &base),
            ExecutionTag::Clone,
        )?;
        Ok(repo.path.clone())
    }

    fn write_files(
        &self,
        runner: &RemoteRunner,
        sandbox: &Sandbox,
        prefix: &str,
        workdir: &str,
    ) -> ProvisionResult<ComposeFile> {
        let password = database_password(sandbox);
        let passwords: BTreeMap<String, String> = self
            .config
            .databases
            .iter()
            .map(|db| (db.kind.name().to_string(), password.clone()))
            .collect();

        let env = app_env(&self.config, Target::Sandbox, &passwords, |name| name.to_string())?;
        runner.execute(
            &write_file(&format!("{workdir}/.env"), &dotenv(&env), "600"),
            ExecOptions::tagged(ExecutionTag::EnvFile).secret(password.clone()),
        )?;

        let compose = render_compose(&self.config, prefix, &password)?;
        runner.execute(
            &write_file(
                &format!("{workdir}/{}", self.config.sandbox.compose_file),
                &compose.to_yaml()?,
                "644",
            ),
            ExecOptions::tagged(ExecutionTag::ComposeFile).secret(password),
        )?;
        Ok(compose)
    }

    fn start_services(
        &self,
        runner: &RemoteRunner,
        prefix: &str,
        workdir: &str,
        datastores: &[String],
    ) -> ProvisionResult<()> {
        let compose = compose_command(prefix, workdir, &self.config.sandbox.compose_file);
        let timeout = self.config.timeouts.build_timeout();

        if !datastores.is_empty() {
            runner.execute(
                &format!("{compose} up -d --wait {}", datastores.join(" ")),
                ExecOptions::tagged(ExecutionTag::Datastores).timeout(timeout),
            )?;
        }

        let setup = &self.config.sandbox.setup;
        if !setup.is_empty() {
            let app = self
                .config
                .app_service()
                .ok_or_else(|| ConfigError::Missing {
                    field: "sandbox.app_service".to_string(),
                    target: Target::Sandbox,
                })?;
            for command in setup {
                runner.execute(
                    &format!("{compose} run --rm {app} sh -c {}", quote(command)),
                    ExecOptions::tagged(ExecutionTag::Setup).timeout(timeout),
                )?;
            }
        }

        runner.execute(
            &format!("{compose} up -d --build --remove-orphans"),
            ExecOptions::tagged(ExecutionTag::Services).timeout(timeout),
        )?;
        Ok(())
    }

    fn expose(
        &self,
        recorder: &StepRecorder,
        runner: &RemoteRunner,
        sandbox: &Sandbox,
        prefix: &str,
    ) -> ProvisionResult<()> {
        let tunnel_config = self.config.tunnel.as_ref().ok_or_else(|| ConfigError::Missing {
            field: "tunnel.zone".to_string(),
            target: Target::Sandbox,
        })?;
        let edge = self
            .backends
            .edge
            .as_ref()
            .ok_or_else(|| ProvisionError::NoEdgeProvider(prefix.to_string()))?;

        let rule = IngressRule {
            hostname: sandbox_hostname(&sandbox.slug, &tunnel_config.zone),
            service: format!("http://localhost:{}", self.app_port()),
        };
        let handle = TunnelReconciler::new(edge.as_ref(), tunnel_config, recorder)
            .ensure(prefix, std::slice::from_ref(&rule))?;

        let container = format!("{prefix}-tunnel");
        runner.execute(
            &format!(
                "docker rm -f {container} >/dev/null 2>&1; \
                 docker run -d --name {container} --restart unless-stopped --network host \
                 {TUNNEL_CLIENT_IMAGE} tunnel --no-autoupdate run --token {}",
                quote(&handle.token)
            ),
            ExecOptions::tagged(ExecutionTag::TunnelClient).secret(handle.token.clone()),
        )?;
        info!(host = %rule.hostname, "sandbox exposed");
        Ok(())
    }

    fn app_port(&self) -> u16 {
        self.config
            .app_service()
            .and_then(|name| self.config.processes.get(name))
            .and_then(|p| p.port)
            .unwrap_or(DEFAULT_APP_PORT)
    }

    fn run_deprovision(&self, recorder: &StepRecorder, sandbox: &Sandbox) -> ProvisionResult<()> {
        let prefix = self.prefix(sandbox);

        if let (Some(tunnel_config), Some(edge)) = (&self.config.tunnel, &self.backends.edge) {
            let host = sandbox_hostname(&sandbox.slug, &tunnel_config.zone);
            TunnelReconciler::new(edge.as_ref(), tunnel_config, recorder).teardown(&prefix, &[host])?;
        }

        self.stop_containers(recorder, sandbox, &prefix)?;

        Infrastructure::new(
            self.backends.compute.as_ref(),
            recorder,
            &prefix,
            Default::default(),
        )
        .teardown()
    }

    /// Best effort: the server is deleted next regardless.
    fn stop_containers(
        &self,
        recorder: &StepRecorder,
        sandbox: &Sandbox,
        prefix: &str,
    ) -> ProvisionResult<()> {
        let Some(key) = &sandbox.ssh_key else {
            return Ok(());
        };
        let Some(server) = self.backends.compute.find_server(prefix)? else {
            return Ok(());
        };
        let Some(host) = server.public_ip else {
            return Ok(());
        };

        let workdir = self
            .config
            .repository
            .as_ref()
            .map_or(DEFAULT_WORKDIR, |r| r.path.as_str());
        let compose = compose_command(prefix, workdir, &self.config.sandbox.compose_file);
        let result = self
            .backends
            .connect(&self.config, &host, key, recorder.clone())
            .and_then(|runner| {
                Ok(runner.execute(
                    &format!("{compose} down -v --remove-orphans; docker rm -f {prefix}-tunnel"),
                    ExecOptions::tagged(ExecutionTag::Containers).allow_failure(),
                )?)
            });
        match result {
            Ok(_) => Ok(()),
            Err(ProvisionError::Exec(
                err @ (ExecError::Connection(_) | ExecError::Authentication { .. }),
            )) => {
                warn!(prefix, error = %err, "cannot reach sandbox server; skipping container stop");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn transition(&self, recorder: &StepRecorder, state: SandboxState) -> ProvisionResult<Sandbox> {
        let sandbox = self.backends.store.update_sandbox(self.id, |s| {
            s.state = state;
            if state != SandboxState::Failed {
                s.last_error = None;
            }
        })?;
        recorder.marker(&format!("sandbox {} {state:?}", sandbox.slug))?;
        Ok(sandbox)
    }

    /// Record the failure and hand the error back for re-raising.
    fn fail(&self, recorder: &StepRecorder, err: ProvisionError) -> ProvisionError {
        let message = err.to_string();
        warn!(sandbox = self.id, error = %message, "sandbox workflow failed");
        let stored = self.backends.store.update_sandbox(self.id, |s| {
            s.state = SandboxState::Failed;
            s.last_error = Some(message.clone());
        });
        if let Err(e) = stored.map_err(ProvisionError::from).and_then(|s| {
            recorder
                .marker(&format!("sandbox {} Failed", s.slug))
                .map_err(ProvisionError::from)
        }) {
            warn!(sandbox = self.id, error = %e, "cannot record sandbox failure");
        }
        err
    }
}

/// `docker compose` invocation for the sandbox project.
pub fn compose_command(project: &str, workdir: &str, file: &str) -> String {
    format!(
        "cd {} && docker compose -p {} -f {}",
        quote(workdir),
        quote(project),
        quote(file)
    )
}

/// Database password of a sandbox, stable for its lifetime.
pub fn database_password(sandbox: &Sandbox) -> String {
    let digest = Sha256::digest(format!("{}:database", sandbox.access_token).as_bytes());
    hex::encode(&digest[..16])
}
