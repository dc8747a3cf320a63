//! Release lifecycle.
//!
//! `pending → deploying → {deployed | failed}`, `deployed → torn_down`.
//! Every step reconciles by name under `{app}-{environment}`, so a failed
//! run is resumed by running `provision` again.

use berth_cloud::{IngressRule, ManagedResource, Server, Volumes};
use berth_cluster::{ClusterBootstrapper, Kubectl};
use berth_core::env::{resolve_map, resolve_opt};
use berth_core::naming::{generate_secret, hostname, release_prefix, resource_name};
use berth_core::{BerthConfig, ConfigError, Target};
use berth_exec::{ExecOptions, RemoteRunner, StepRecorder};
use berth_manifest::platform::registry_address;
use berth_manifest::{ReleaseInputs, render_release, rollout_targets};
use berth_state::{
    ExecutionCategory, ExecutionOwner, ExecutionTag, Release, ReleaseId, ReleaseState, SshKeyPair,
    epoch_secs,
};
use tracing::{info, warn};

use crate::builder::{BuildRequest, DockerBuilder};
use crate::context::{Backends, wait_for_ssh};
use crate::error::{ProvisionError, ProvisionResult};
use crate::git;
use crate::infra::{Infrastructure, owner_labels, public_address};
use crate::sandbox::DEFAULT_WORKDIR;
use crate::tunnel::TunnelReconciler;
use crate::volume::{VolumeMounter, VolumeRequest};

/// Where the ingress controller listens on the node.
pub const INGRESS_SERVICE: &str = "http://localhost:30080";
const DEFAULT_VOLUME_GB: u32 = 10;
const PASSWORD_BYTES: usize = 16;

pub struct ReleaseProvisioner {
    config: BerthConfig,
    backends: Backends,
    id: ReleaseId,
}

impl ReleaseProvisioner {
    pub fn new(config: BerthConfig, backends: Backends, id: ReleaseId) -> Self {
        Self {
            config,
            backends,
            id,
        }
    }

    fn owner(&self) -> ExecutionOwner {
        ExecutionOwner::Release(self.id)
    }

    pub fn prefix(&self, release: &Release) -> String {
        release_prefix(&self.config.app_name, &release.environment)
    }

    /// Bring the release to `deployed`. Does nothing when it already is.
    pub fn provision(&self) -> ProvisionResult<Release> {
        let release = self.backends.store.require_release(self.id)?;
        if release.state == ReleaseState::Deployed {
            info!(environment = %release.environment, "release already deployed");
            return Ok(release);
        }

        let recorder = self
            .backends
            .recorder(self.owner(), ExecutionCategory::Provision);
        let release = self.transition(&recorder, ReleaseState::Deploying)?;
        info!(environment = %release.environment, branch = %release.branch, "deploying release");

        match self.run_provision(&recorder, &release) {
            Ok(()) => self.deployed(&recorder),
            Err(err) => Err(self.fail(&recorder, err)),
        }
    }

    /// Build, apply and roll out on the existing cluster.
    pub fn redeploy(&self) -> ProvisionResult<Release> {
        let release = self.backends.store.require_release(self.id)?;
        let recorder = self.backends.recorder(self.owner(), ExecutionCategory::Deploy);
        let release = self.transition(&recorder, ReleaseState::Deploying)?;
        info!(environment = %release.environment, "redeploying release");

        match self.run_redeploy(&recorder, &release) {
            Ok(()) => self.deployed(&recorder),
            Err(err) => Err(self.fail(&recorder, err)),
        }
    }

    /// Remove the tunnel, the database volumes and the infrastructure, then
    /// mark the release `torn_down`.
    pub fn deprovision(&self) -> ProvisionResult<Release> {
        let release = self.backends.store.require_release(self.id)?;
        let recorder = self
            .backends
            .recorder(self.owner(), ExecutionCategory::Teardown);
        info!(environment = %release.environment, "tearing down release");

        match self.run_deprovision(&recorder, &release) {
            Ok(()) => {
                self.backends.store.update_release(self.id, |r| {
                    r.server_id = None;
                    r.server_ip = None;
                    r.private_ip = None;
                    r.tunnel_id = None;
                    r.bootstrapped_server_id = None;
                })?;
                self.transition(&recorder, ReleaseState::TornDown)
            }
            Err(err) => Err(self.fail(&recorder, err)),
        }
    }

    fn run_provision(&self, recorder: &StepRecorder, release: &Release) -> ProvisionResult<()> {
        let config = &self.config;
        config.validate(Target::Release)?;

        let prefix = self.prefix(release);
        let key = self.ensure_keypair(recorder, release, &prefix)?;
        let labels = owner_labels(&config.app_name, "release", "environment", &release.environment);
        let server = Infrastructure::new(self.backends.compute.as_ref(), recorder, &prefix, labels)
            .ensure(config, Target::Release, &key)?;
        let address = public_address(&server)?;
        let release = self.backends.store.update_release(self.id, |r| {
            r.server_id = Some(server.id.clone());
            r.server_ip = Some(address.clone());
            if r.private_ip.is_none() {
                r.private_ip = server.private_ip.clone();
            }
        })?;

        let runner = self
            .backends
            .connect(config, &address, &key, recorder.clone())?;
        wait_for_ssh(&runner, &config.timeouts)?;

        let release = self.bootstrap(&runner, &release, &server)?;
        self.mount_volumes(&runner, &prefix, &server)?;
        let release = self.ensure_passwords(&release)?;
        let tunnel_token = self.ensure_tunnel(recorder, &prefix)?;

        self.deploy(&runner, &release, &prefix, tunnel_token.as_deref(), server.memory_mib)
    }

    fn run_redeploy(&self, recorder: &StepRecorder, release: &Release) -> ProvisionResult<()> {
        let prefix = self.prefix(release);
        let (Some(key), Some(address)) = (&release.ssh_key, &release.server_ip) else {
            return Err(ProvisionError::NotProvisioned(prefix));
        };
        let server = self.backends.compute.find_server(&prefix)?;
        let runner = self
            .backends
            .connect(&self.config, address, key, recorder.clone())?;

        let release = self.ensure_passwords(release)?;
        let tunnel_token = match (&release.tunnel_id, &self.backends.edge) {
            (Some(id), Some(edge)) => Some(edge.tunnel_token(id)?),
            _ => None,
        };
        let memory = server.and_then(|s| s.memory_mib);
        self.deploy(&runner, &release, &prefix, tunnel_token.as_deref(), memory)
    }

    fn ensure_keypair(
        &self,
        recorder: &StepRecorder,
        release: &Release,
        prefix: &str,
    ) -> ProvisionResult<SshKeyPair> {
        if let Some(key) = &release.ssh_key {
            return Ok(key.clone());
        }
        let key = recorder.step(ExecutionTag::SshKeypair, "generate ssh keypair", || {
            self.backends.keys.generate(prefix)
        })?;
        let stored = key.clone();
        self.backends
            .store
            .update_release(self.id, move |r| r.ssh_key = Some(stored))?;
        Ok(key)
    }

    /// Install the cluster unless this server already has one.
    fn bootstrap(
        &self,
        runner: &RemoteRunner,
        release: &Release,
        server: &Server,
    ) -> ProvisionResult<Release> {
        if release.bootstrapped_server_id.as_deref() == Some(server.id.as_str()) {
            info!(server = %server.name, "cluster already bootstrapped");
            return Ok(release.clone());
        }
        let runner = runner.in_category(ExecutionCategory::Bootstrap);
        let node =
            ClusterBootstrapper::new(&runner, &self.config.timeouts, &self.config.storage).run()?;
        let server_id = server.id.clone();
        Ok(self.backends.store.update_release(self.id, move |r| {
            r.private_ip = Some(node.private_ip);
            r.bootstrapped_server_id = Some(server_id);
        })?)
    }

    fn mount_volumes(&self, runner: &RemoteRunner, prefix: &str, server: &Server) -> ProvisionResult<()> {
        let config = &self.config;
        let location = config
            .compute
            .location
            .resolve(Target::Release)
            .ok_or_else(|| ConfigError::Missing {
                field: "compute.location".to_string(),
                target: Target::Release,
            })?;
        let mounter = VolumeMounter::new(
            self.backends.compute.as_ref(),
            runner,
            &config.storage,
            &config.timeouts,
        );
        for db in &config.databases {
            let name = resource_name(prefix, db.kind.name());
            let request = VolumeRequest {
                name: &name,
                size_gb: db
                    .volume_size_gb
                    .resolve(Target::Release)
                    .unwrap_or(DEFAULT_VOLUME_GB),
                location: &location,
                labels: owner_labels(&config.app_name, "database", "kind", db.kind.name()),
            };
            mounter.ensure(&request, server)?;
        }
        Ok(())
    }

    /// Generate a password for every database that has none yet. Existing
    /// passwords are never replaced, since the data volume outlives them.
    fn ensure_passwords(&self, release: &Release) -> ProvisionResult<Release> {
        let missing: Vec<String> = self
            .config
            .databases
            .iter()
            .map(|db| db.kind.name().to_string())
            .filter(|kind| !release.database_passwords.contains_key(kind))
            .collect();
        if missing.is_empty() {
            return Ok(release.clone());
        }
        Ok(self.backends.store.update_release(self.id, |r| {
            for kind in missing {
                r.database_passwords
                    .insert(kind, generate_secret(PASSWORD_BYTES));
            }
        })?)
    }

    /// Public hostnames of every process and service with a subdomain.
    fn ingress_rules(&self) -> Vec<IngressRule> {
        let Some(zone) = self.config.zone() else {
            return Vec::new();
        };
        let subdomains = self
            .config
            .processes
            .values()
            .map(|p| p.subdomain.as_ref())
            .chain(self.config.services.iter().map(|s| s.subdomain.as_ref()));
        let mut rules: Vec<IngressRule> = Vec::new();
        for subdomain in subdomains.filter_map(|s| resolve_opt(s, Target::Release)) {
            let host = hostname(&subdomain, zone);
            if rules.iter().any(|r| r.hostname == host) {
                continue;
            }
            rules.push(IngressRule {
                hostname: host,
                service: INGRESS_SERVICE.to_string(),
            });
        }
        rules
    }

    fn ensure_tunnel(&self, recorder: &StepRecorder, prefix: &str) -> ProvisionResult<Option<String>> {
        let rules = self.ingress_rules();
        let Some(tunnel_config) = &self.config.tunnel else {
            return Ok(None);
        };
        if rules.is_empty() {
            return Ok(None);
        }
        let edge = self
            .backends
            .edge
            .as_ref()
            .ok_or_else(|| ProvisionError::NoEdgeProvider(prefix.to_string()))?;

        let handle = TunnelReconciler::new(edge.as_ref(), tunnel_config, recorder).ensure(prefix, &rules)?;
        let tunnel_id = handle.id.clone();
        self.backends
            .store
            .update_release(self.id, move |r| r.tunnel_id = Some(tunnel_id))?;
        Ok(Some(handle.token))
    }

    /// Build when an image is configured, then apply and wait for rollouts.
    fn deploy(
        &self,
        runner: &RemoteRunner,
        release: &Release,
        prefix: &str,
        tunnel_token: Option<&str>,
        node_memory_mib: Option<u64>,
    ) -> ProvisionResult<()> {
        let runner = runner.in_category(ExecutionCategory::Deploy);
        let mut image = release.registry_tag.clone();

        if let Some(image_config) = &self.config.image {
            let node_ip = release
                .private_ip
                .as_deref()
                .ok_or_else(|| ProvisionError::NotProvisioned(prefix.to_string()))?;
            let workdir = self.sync_source(&runner, release)?;
            let registry = registry_address(node_ip);
            let request = BuildRequest {
                registry: &registry,
                repository: prefix,
                workdir: &workdir,
                dockerfile: &image_config.dockerfile,
                context: &image_config.context,
                build_args: resolve_map(&image_config.build_args, Target::Release),
                keep: image_config.keep,
            };
            let reference = DockerBuilder::new(&runner, self.config.timeouts.build_timeout())
                .build_and_push(&request)?;
            let stored = reference.clone();
            self.backends
                .store
                .update_release(self.id, move |r| r.registry_tag = Some(stored))?;
            image = Some(reference);
        }

        let manifests = render_release(
            &self.config,
            &ReleaseInputs {
                prefix,
                image: image.as_deref(),
                database_passwords: &release.database_passwords,
                tunnel_token,
                node_memory_mib,
            },
        )?;
        let secrets = release
            .database_passwords
            .values()
            .map(String::as_str)
            .chain(tunnel_token);
        let kubectl = Kubectl::new(&runner);
        kubectl.apply_with(
            &manifests,
            ExecOptions::tagged(ExecutionTag::ManifestApply).secrets(secrets),
        )?;
        kubectl.wait_for_rollouts(
            &rollout_targets(&self.config, prefix),
            self.config.timeouts.rollout_timeout(),
        )?;
        info!(prefix, documents = manifests.len(), "manifests applied and rolled out");
        Ok(())
    }

    /// Bring the checkout on the server to the tip of the release branch.
    fn sync_source(&self, runner: &RemoteRunner, release: &Release) -> ProvisionResult<String> {
        let Some(repo) = &self.config.repository else {
            return Ok(DEFAULT_WORKDIR.to_string());
        };
        git::store_credentials(runner, repo)?;
        runner.run(&git::clone_command(repo), ExecutionTag::SourceSync)?;
        runner.run(&git::sync_command(repo, &release.branch), ExecutionTag::SourceSync)?;
        Ok(repo.path.clone())
    }

    fn run_deprovision(&self, recorder: &StepRecorder, release: &Release) -> ProvisionResult<()> {
        let prefix = self.prefix(release);

        if let (Some(tunnel_config), Some(edge)) = (&self.config.tunnel, &self.backends.edge) {
            let hosts: Vec<String> = self.ingress_rules().into_iter().map(|r| r.hostname).collect();
            TunnelReconciler::new(edge.as_ref(), tunnel_config, recorder).teardown(&prefix, &hosts)?;
        }

        let volumes = Volumes(self.backends.compute.as_ref());
        for db in &self.config.databases {
            let name = resource_name(&prefix, db.kind.name());
            recorder.step(ExecutionTag::Volume, &format!("delete volume {name}"), || {
                volumes
                    .delete_if_exists(&name)
                    .map_err(ProvisionError::from)
            })?;
        }

        Infrastructure::new(
            self.backends.compute.as_ref(),
            recorder,
            &prefix,
            Default::default(),
        )
        .teardown()
    }

    fn deployed(&self, recorder: &StepRecorder) -> ProvisionResult<Release> {
        self.backends
            .store
            .update_release(self.id, |r| r.deployed_at = Some(epoch_secs()))?;
        let release = self.transition(recorder, ReleaseState::Deployed)?;
        info!(environment = %release.environment, "release deployed");
        Ok(release)
    }

    fn transition(&self, recorder: &StepRecorder, state: ReleaseState) -> ProvisionResult<Release> {
        let release = self.backends.store.update_release(self.id, |r| {
            r.state = state;
            if state != ReleaseState::Failed {
                r.last_error = None;
            }
        })?;
        recorder.marker(&format!("release {} {state:?}", release.environment))?;
        Ok(release)
    }

    /// Record the failure and hand the error back for re-raising.
    fn fail(&self, recorder: &StepRecorder, err: ProvisionError) -> ProvisionError {
        let message = err.to_string();
        warn!(release = self.id, error = %message, "release workflow failed");
        let stored = self.backends.store.update_release(self.id, |r| {
            r.state = ReleaseState::Failed;
            r.last_error = Some(message.clone());
        });
        if let Err(e) = stored.map_err(ProvisionError::from).and_then(|r| {
            recorder
                .marker(&format!("release {} Failed", r.environment))
                .map_err(ProvisionError::from)
        }) {
            warn!(release = self.id, error = %e, "cannot record release failure");
        }
        err
    }
}

