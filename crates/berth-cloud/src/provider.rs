//! Provider capability traits. Concrete REST clients live outside this crate.
//!
//! `find_*` methods map "no such resource" to `Ok(None)`; `delete_*` may
//! return `ProviderError::NotFound`, which reconciliation treats as success.

use crate::error::ProviderResult;
use crate::types::*;

/// Servers, networks, firewalls, SSH keys and block volumes.
pub trait ComputeProvider: Send + Sync {
    fn find_server(&self, name: &str) -> ProviderResult<Option<Server>>;
    fn create_server(&self, name: &str, spec: &ServerSpec) -> ProviderResult<Server>;
    fn delete_server(&self, id: &str) -> ProviderResult<()>;

    fn find_network(&self, name: &str) -> ProviderResult<Option<Network>>;
    fn create_network(&self, name: &str, spec: &NetworkSpec) -> ProviderResult<Network>;
    fn delete_network(&self, id: &str) -> ProviderResult<()>;

    fn find_firewall(&self, name: &str) -> ProviderResult<Option<Firewall>>;
    fn create_firewall(&self, name: &str, spec: &FirewallSpec) -> ProviderResult<Firewall>;
    fn delete_firewall(&self, id: &str) -> ProviderResult<()>;

    fn find_ssh_key(&self, name: &str) -> ProviderResult<Option<SshKey>>;
    fn create_ssh_key(&self, name: &str, spec: &SshKeySpec) -> ProviderResult<SshKey>;
    fn delete_ssh_key(&self, id: &str) -> ProviderResult<()>;

    fn find_volume(&self, name: &str) -> ProviderResult<Option<Volume>>;
    fn create_volume(&self, name: &str, spec: &VolumeSpec) -> ProviderResult<Volume>;
    fn delete_volume(&self, id: &str) -> ProviderResult<()>;
    fn attach_volume(&self, volume_id: &str, server_id: &str) -> ProviderResult<Volume>;
    fn detach_volume(&self, volume_id: &str) -> ProviderResult<()>;
}

/// Tunnels, DNS records and edge worker routes, scoped to a zone.
pub trait EdgeProvider: Send + Sync {
    fn find_tunnel(&self, name: &str) -> ProviderResult<Option<Tunnel>>;
    fn create_tunnel(&self, name: &str, spec: &TunnelSpec) -> ProviderResult<Tunnel>;
    fn delete_tunnel(&self, id: &str) -> ProviderResult<()>;
    /// Replace the tunnel's ingress rules.
    fn configure_tunnel(&self, id: &str, ingress: &[IngressRule]) -> ProviderResult<()>;
    /// Connector token for the on-server tunnel client.
    fn tunnel_token(&self, id: &str) -> ProviderResult<String>;

    fn find_dns_record(&self, zone_id: &str, name: &str) -> ProviderResult<Option<DnsRecord>>;
    fn create_dns_record(&self, zone_id: &str, name: &str, spec: &DnsRecordSpec) -> ProviderResult<DnsRecord>;
    fn delete_dns_record(&self, zone_id: &str, id: &str) -> ProviderResult<()>;

    /// Upload (or replace) the edge script `name`.
    fn deploy_worker(&self, name: &str, script: &str) -> ProviderResult<()>;
    fn delete_worker(&self, name: &str) -> ProviderResult<()>;

    fn find_worker_route(&self, zone_id: &str, pattern: &str) -> ProviderResult<Option<WorkerRoute>>;
    fn create_worker_route(
        &self,
        zone_id: &str,
        pattern: &str,
        spec: &WorkerRouteSpec,
    ) -> ProviderResult<WorkerRoute>;
    fn delete_worker_route(&self, zone_id: &str, id: &str) -> ProviderResult<()>;
}
