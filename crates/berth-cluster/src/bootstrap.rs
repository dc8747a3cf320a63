//! Single-node cluster bootstrap.
//!
//! ```text
//! cloud-init done ─► discover addresses ─► container runtime ─► daemon config
//!   ─► registry mirror ─► k3s install (unless a node is Ready) ─► node Ready
//!   ─► kubeconfig ─► priority classes ─► registry (/v2/) ─► ingress (NodePorts)
//! ```
//!
//! Every step is its own tagged execution. Waits poll at a fixed interval
//! with an attempt budget and fail with [`BootstrapError::Timeout`].

use serde_json::json;
use tracing::info;

use berth_core::{StorageConfig, TimeoutsConfig};
use berth_exec::shell::{quote, write_file};
use berth_exec::{ExecOptions, RemoteRunner, poll_until};
use berth_manifest::platform::{
    INGRESS_CONTROLLER_SERVICE, INGRESS_NAMESPACE, INGRESS_NGINX_MANIFEST, ingress_node_port_patch,
    priority_classes, registry, registry_address,
};
use berth_state::ExecutionTag;

use crate::error::{BootstrapError, BootstrapResult};
use crate::kubectl::Kubectl;
use crate::network::private_interface;

pub const BOOT_FINISHED: &str = "/var/lib/cloud/instance/boot-finished";
pub const K3S_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";
pub const K3S_REGISTRIES: &str = "/etc/rancher/k3s/registries.yaml";
pub const DOCKER_DAEMON_CONFIG: &str = "/etc/docker/daemon.json";
const PUBLIC_IP_LOOKUP: &str = "https://api.ipify.org";
const NODE_READY: &str = "kubectl get nodes --no-headers 2>/dev/null | grep -q ' Ready'";

/// Addresses discovered on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub public_ip: String,
    pub private_ip: String,
    pub private_interface: String,
}

impl NodeInfo {
    pub fn registry(&self) -> String {
        registry_address(&self.private_ip)
    }
}

pub struct ClusterBootstrapper<'a> {
    runner: &'a RemoteRunner,
    timeouts: &'a TimeoutsConfig,
    storage: &'a StorageConfig,
}

impl<'a> ClusterBootstrapper<'a> {
    pub fn new(runner: &'a RemoteRunner, timeouts: &'a TimeoutsConfig, storage: &'a StorageConfig) -> Self {
        Self {
            runner,
            timeouts,
            storage,
        }
    }

    pub fn run(&self) -> BootstrapResult<NodeInfo> {
        self.wait_for_cloud_init()?;
        let node = self.discover_node()?;
        info!(public_ip = %node.public_ip, private_ip = %node.private_ip, iface = %node.private_interface, "node discovered");

        self.install_container_runtime()?;
        self.configure_daemon(&node)?;
        self.configure_registry_mirror(&node)?;
        self.install_cluster(&node)?;
        self.wait_for_node_ready()?;
        self.write_kubeconfig(&node)?;

        let kubectl = Kubectl::new(self.runner);
        kubectl.apply(&priority_classes(), ExecutionTag::PriorityClasses)?;
        self.deploy_registry(&kubectl, &node)?;
        self.deploy_ingress(&kubectl)?;

        info!(node = %node.public_ip, "cluster bootstrap complete");
        Ok(node)
    }

    /// Poll `probe` as one recorded step; exhaustion is a `Timeout`.
    fn wait(&self, tag: ExecutionTag, what: &'static str, attempts: u32, probe: &str) -> BootstrapResult<()> {
        self.runner.recorder().step(tag, &format!("wait for {what}"), || {
            let ready = poll_until(attempts, self.timeouts.poll_interval(), || {
                self.runner.probe(probe).map(|ok| ok.then_some(()))
            })?;
            ready.ok_or(BootstrapError::Timeout { what, attempts })
        })
    }

    fn wait_for_cloud_init(&self) -> BootstrapResult<()> {
        self.wait(
            ExecutionTag::CloudInit,
            "cloud-init",
            self.timeouts.cloud_init_attempts,
            &format!("test -f {BOOT_FINISHED}"),
        )
    }

    fn discover_node(&self) -> BootstrapResult<NodeInfo> {
        let public = self.runner.run(
            &format!("curl -fsS --max-time 10 {PUBLIC_IP_LOOKUP}"),
            ExecutionTag::DiscoverNetwork,
        )?;
        let public_ip = public.stdout.trim().to_string();
        if public_ip.is_empty() {
            return Err(BootstrapError::NoPublicAddress);
        }

        let addrs = self
            .runner
            .run("ip -o -4 addr show", ExecutionTag::DiscoverNetwork)?;
        let (iface, private_ip) =
            private_interface(&addrs.stdout).ok_or(BootstrapError::NoPrivateNetwork)?;
        Ok(NodeInfo {
            public_ip,
            private_ip,
            private_interface: iface,
        })
    }

    fn install_container_runtime(&self) -> BootstrapResult<()> {
        self.runner.run(
            "command -v docker >/dev/null 2>&1 || curl -fsSL https://get.docker.com | sh",
            ExecutionTag::ContainerRuntime,
        )?;
        Ok(())
    }

    /// Trust the in-cluster registry over plain HTTP. Restarts the daemon
    /// only when the file changed.
    fn configure_daemon(&self, node: &NodeInfo) -> BootstrapResult<()> {
        let config = json!({
            "insecure-registries": [node.registry(), registry_address("127.0.0.1")],
        });
        let staged = format!("{DOCKER_DAEMON_CONFIG}.berth");
        let command = format!(
            "{} && if ! cmp -s {staged} {DOCKER_DAEMON_CONFIG}; then mv {staged} {DOCKER_DAEMON_CONFIG} && systemctl restart docker; else rm -f {staged}; fi",
            write_file(&staged, &format!("{config:#}\n"), "644"),
        );
        self.runner.run(&command, ExecutionTag::DaemonConfig)?;
        Ok(())
    }

    fn configure_registry_mirror(&self, node: &NodeInfo) -> BootstrapResult<()> {
        let registry = node.registry();
        let mut endpoints = serde_json::Map::new();
        endpoints.insert(
            registry.clone(),
            json!({ "endpoint": [format!("http://{registry}")] }),
        );
        let mirrors = json!({ "mirrors": endpoints });
        let yaml = serde_yaml::to_string(&mirrors).map_err(berth_manifest::ManifestError::from)?;
        self.runner
            .run(&write_file(K3S_REGISTRIES, &yaml, "644"), ExecutionTag::RegistryMirror)?;
        Ok(())
    }

    fn install_cluster(&self, node: &NodeInfo) -> BootstrapResult<()> {
        if self.runner.check(NODE_READY, ExecutionTag::ClusterInstall)? {
            info!("cluster already reports a Ready node; skipping install");
            return Ok(());
        }
        let exec = install_flags(node).join(" ");
        self.runner.execute(
            &format!("curl -sfL https://get.k3s.io | INSTALL_K3S_EXEC={} sh -", quote(&exec)),
            ExecOptions::tagged(ExecutionTag::ClusterInstall)
                .timeout(self.timeouts.command_timeout()),
        )?;
        Ok(())
    }

    fn wait_for_node_ready(&self) -> BootstrapResult<()> {
        self.wait(
            ExecutionTag::ClusterReady,
            "cluster node",
            self.timeouts.node_ready_attempts,
            NODE_READY,
        )
    }

    /// Operator kubeconfig pointing at the private address.
    fn write_kubeconfig(&self, node: &NodeInfo) -> BootstrapResult<()> {
        self.runner.run(
            &format!(
                "mkdir -p ~/.kube && sed 's/127.0.0.1/{}/' {K3S_KUBECONFIG} > ~/.kube/config && chmod 600 ~/.kube/config",
                node.private_ip
            ),
            ExecutionTag::Kubeconfig,
        )?;
        Ok(())
    }

    fn deploy_registry(&self, kubectl: &Kubectl<'_>, node: &NodeInfo) -> BootstrapResult<()> {
        kubectl.apply(&registry(&self.storage.registry_path), ExecutionTag::Registry)?;
        self.wait(
            ExecutionTag::Registry,
            "image registry",
            self.timeouts.registry_ready_attempts,
            &format!("curl -fsS -o /dev/null http://{}/v2/", node.registry()),
        )
    }

    fn deploy_ingress(&self, kubectl: &Kubectl<'_>) -> BootstrapResult<()> {
        kubectl.apply_url(INGRESS_NGINX_MANIFEST, ExecutionTag::Ingress)?;
        self.wait(
            ExecutionTag::Ingress,
            "ingress controller",
            self.timeouts.ingress_ready_attempts,
            &format!(
                "kubectl get pods -n {INGRESS_NAMESPACE} -l app.kubernetes.io/component=controller -o jsonpath='{{.items[*].status.phase}}' | grep -q Running"
            ),
        )?;
        let patch = ingress_node_port_patch().to_string();
        self.runner.run(
            &format!(
                "kubectl patch service {INGRESS_CONTROLLER_SERVICE} -n {INGRESS_NAMESPACE} -p {}",
                quote(&patch)
            ),
            ExecutionTag::Ingress,
        )?;
        Ok(())
    }
}

/// `k3s server` flags for a single node on a private network.
pub fn install_flags(node: &NodeInfo) -> Vec<String> {
    vec![
        "server".to_string(),
        "--disable traefik".to_string(),
        "--disable servicelb".to_string(),
        "--flannel-backend=wireguard-native".to_string(),
        format!("--flannel-iface={}", node.private_interface),
        format!("--node-ip={}", node.private_ip),
        format!("--node-external-ip={}", node.public_ip),
    ]
}
