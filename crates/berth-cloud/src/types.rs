//! Cloud resource records and creation specs.
//!
//! Records carry provider ids for the duration of one call chain only; Berth
//! never stores them for reconciliation. Lookup is always by name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    /// Memory of the server type, when the provider reports it.
    pub memory_mib: Option<u64>,
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub server_type: String,
    pub image: String,
    pub location: String,
    /// Names of registered SSH keys.
    pub ssh_keys: Vec<String>,
    /// Name of the private network to join.
    pub network: Option<String>,
    /// Names of firewalls to apply.
    pub firewalls: Vec<String>,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub ip_range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub ip_range: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub protocol: String,
    pub port: String,
    pub source_ips: Vec<String>,
}

impl FirewallRule {
    pub fn tcp(port: impl Into<String>) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port: port.into(),
            source_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firewall {
    pub id: String,
    pub name: String,
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallSpec {
    /// Inbound rules. Everything else is dropped.
    pub rules: Vec<FirewallRule>,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeySpec {
    pub public_key: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gb: u32,
    /// Server the volume is attached to.
    pub server_id: Option<String>,
    /// Device path on the attached server.
    pub linux_device: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub size_gb: u32,
    pub location: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    pub hostname: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: String,
    pub name: String,
}

impl Tunnel {
    /// CNAME target for hostnames routed through this tunnel.
    pub fn cname_target(&self) -> String {
        format!("{}.cfargotunnel.com", self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub proxied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecordSpec {
    pub record_type: String,
    pub content: String,
    pub proxied: bool,
}

impl DnsRecordSpec {
    pub fn tunnel_cname(tunnel: &Tunnel) -> Self {
        Self {
            record_type: "CNAME".to_string(),
            content: tunnel.cname_target(),
            proxied: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRoute {
    pub id: String,
    pub pattern: String,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRouteSpec {
    pub script: String,
}
