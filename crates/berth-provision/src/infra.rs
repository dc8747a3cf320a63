//! Firewall, private network, SSH key and server for one owner.
//!
//! Created in that order and deleted in reverse. Every resource is named
//! after the owner's prefix, so a re-run finds what an earlier run left.

use berth_cloud::{
    ComputeProvider, FirewallRule, FirewallSpec, Firewalls, Labels, ManagedResource, NetworkSpec,
    Networks, Server, ServerSpec, Servers, SshKeySpec, SshKeys,
};
use berth_core::{BerthConfig, ConfigError, Target};
use berth_exec::StepRecorder;
use berth_state::{ExecutionTag, SshKeyPair};
use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};

pub struct Infrastructure<'a> {
    compute: &'a dyn ComputeProvider,
    recorder: &'a StepRecorder,
    prefix: &'a str,
    labels: Labels,
}

impl<'a> Infrastructure<'a> {
    pub fn new(
        compute: &'a dyn ComputeProvider,
        recorder: &'a StepRecorder,
        prefix: &'a str,
        labels: Labels,
    ) -> Self {
        Self {
            compute,
            recorder,
            prefix,
            labels,
        }
    }

    /// Find or create everything the server needs, then the server.
    pub fn ensure(
        &self,
        config: &BerthConfig,
        target: Target,
        key: &SshKeyPair,
    ) -> ProvisionResult<Server> {
        let name = self.prefix;
        let resolve = |value: &berth_core::EnvValue<String>, field: &str| {
            value
                .resolve(target)
                .ok_or_else(|| ConfigError::Missing {
                    field: field.to_string(),
                    target,
                })
        };
        let server_type = resolve(&config.compute.server_type, "compute.server_type")?;
        let image = resolve(&config.compute.image, "compute.image")?;
        let location = resolve(&config.compute.location, "compute.location")?;

        self.recorder
            .step(ExecutionTag::Firewall, &format!("firewall {name}"), || {
                let spec = FirewallSpec {
                    rules: vec![FirewallRule::tcp("22")],
                    labels: self.labels.clone(),
                };
                Firewalls(self.compute)
                    .find_or_create(name, &spec)
                    .map_err(ProvisionError::from)
            })?;

        self.recorder
            .step(ExecutionTag::Network, &format!("network {name}"), || {
                let spec = NetworkSpec {
                    ip_range: config.compute.network_ip_range.clone(),
                    labels: self.labels.clone(),
                };
                Networks(self.compute)
                    .find_or_create(name, &spec)
                    .map_err(ProvisionError::from)
            })?;

        self.recorder
            .step(ExecutionTag::SshKey, &format!("ssh key {name}"), || {
                let spec = SshKeySpec {
                    public_key: key.public_key.clone(),
                    labels: self.labels.clone(),
                };
                SshKeys(self.compute)
                    .find_or_create(name, &spec)
                    .map_err(ProvisionError::from)
            })?;

        let server = self
            .recorder
            .step(ExecutionTag::Server, &format!("server {name}"), || {
                let spec = ServerSpec {
                    server_type,
                    image,
                    location,
                    ssh_keys: vec![name.to_string()],
                    network: Some(name.to_string()),
                    firewalls: vec![name.to_string()],
                    labels: self.labels.clone(),
                };
                Servers(self.compute)
                    .find_or_create(name, &spec)
                    .map_err(ProvisionError::from)
            })?;
        info!(prefix = %name, server = %server.id, "infrastructure ready");
        Ok(server)
    }

    /// Delete server, SSH key, network and firewall. Missing ones are fine.
    pub fn teardown(&self) -> ProvisionResult<()> {
        let name = self.prefix;
        self.recorder
            .step(ExecutionTag::Server, &format!("delete server {name}"), || {
                Servers(self.compute)
                    .delete_if_exists(name)
                    .map_err(ProvisionError::from)
            })?;
        self.recorder
            .step(ExecutionTag::SshKey, &format!("delete ssh key {name}"), || {
                SshKeys(self.compute)
                    .delete_if_exists(name)
                    .map_err(ProvisionError::from)
            })?;
        self.recorder
            .step(ExecutionTag::Network, &format!("delete network {name}"), || {
                Networks(self.compute)
                    .delete_if_exists(name)
                    .map_err(ProvisionError::from)
            })?;
        self.recorder
            .step(ExecutionTag::Firewall, &format!("delete firewall {name}"), || {
                Firewalls(self.compute)
                    .delete_if_exists(name)
                    .map_err(ProvisionError::from)
            })?;
        info!(prefix = %name, "infrastructure removed");
        Ok(())
    }
}

/// Labels put on every resource of an owner.
pub fn owner_labels(app: &str, purpose: &str, key: &str, value: &str) -> Labels {
    Labels::from([
        ("app".to_string(), app.to_string()),
        ("purpose".to_string(), purpose.to_string()),
        (key.to_string(), value.to_string()),
    ])
}

/// Address the workflow connects to.
pub fn public_address(server: &Server) -> ProvisionResult<String> {
    server
        .public_ip
        .clone()
        .ok_or_else(|| ProvisionError::NoPublicAddress(server.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_cloud::memory::MemoryCompute;
    use berth_state::{ExecutionOwner, StateStore};

    fn key() -> SshKeyPair {
        SshKeyPair {
            private_key: "private".into(),
            public_key: "ssh-ed25519 AAAA test".into(),
        }
    }

    #[test]
    fn ensure_twice_creates_once() {
        let compute = MemoryCompute::new();
        let store = StateStore::open_in_memory().unwrap();
        let recorder = StepRecorder::new(store.clone(), ExecutionOwner::Release(1));
        let config = BerthConfig::builder("shop").build().unwrap();
        let labels = owner_labels("shop", "release", "environment", "staging");
        let infra = Infrastructure::new(&compute, &recorder, "shop-staging", labels);

        let first = infra.ensure(&config, Target::Release, &key()).unwrap();
        let second = infra.ensure(&config, Target::Release, &key()).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(compute.total_create_calls(), 4);

        let spec = compute.server_spec("shop-staging").unwrap();
        assert_eq!(spec.network.as_deref(), Some("shop-staging"));
        assert_eq!(spec.firewalls, vec!["shop-staging"]);
        assert_eq!(spec.labels["purpose"], "release");

        let rows = store.list_executions(ExecutionOwner::Release(1)).unwrap();
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| r.exit_code == Some(0)));
    }

    #[test]
    fn teardown_is_reverse_order_and_repeatable() {
        let compute = MemoryCompute::new();
        let store = StateStore::open_in_memory().unwrap();
        let recorder = StepRecorder::new(store, ExecutionOwner::Sandbox(1));
        let config = BerthConfig::builder("shop").build().unwrap();
        let infra = Infrastructure::new(&compute, &recorder, "shop-a1b2c3", Labels::new());

        infra.ensure(&config, Target::Sandbox, &key()).unwrap();
        infra.teardown().unwrap();
        infra.teardown().unwrap();

        assert_eq!(
            compute.deletions(),
            vec![
                "server:shop-a1b2c3",
                "ssh_key:shop-a1b2c3",
                "network:shop-a1b2c3",
                "firewall:shop-a1b2c3",
            ]
        );
        assert!(compute.is_empty());
    }
}
