//! Name-keyed reconciliation shared by every resource type.
//!
//! `find_or_create` returns whatever already carries the name, unchanged, even
//! if its spec differs from the one passed in. `delete_if_exists` treats a
//! missing resource as success, so teardown can run any number of times.

use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ComputeProvider, EdgeProvider};
use crate::types::*;

pub trait ManagedResource {
    type Resource;
    type Spec;

    fn kind(&self) -> &'static str;

    fn find(&self, name: &str) -> ProviderResult<Option<Self::Resource>>;

    fn create(&self, name: &str, spec: &Self::Spec) -> ProviderResult<Self::Resource>;

    fn delete(&self, resource: &Self::Resource) -> ProviderResult<()>;

    fn find_or_create(&self, name: &str, spec: &Self::Spec) -> ProviderResult<Self::Resource> {
        if let Some(existing) = self.find(name)? {
            debug!(kind = self.kind(), name, "resource exists");
            return Ok(existing);
        }
        info!(kind = self.kind(), name, "creating resource");
        self.create(name, spec)
    }

    /// Returns whether something was deleted.
    fn delete_if_exists(&self, name: &str) -> ProviderResult<bool> {
        let existing = match self.find(name) {
            Ok(Some(existing)) => existing,
            Ok(None) => return Ok(false),
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        match self.delete(&existing) {
            Ok(()) => {
                info!(kind = self.kind(), name, "resource deleted");
                Ok(true)
            }
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

macro_rules! compute_resource {
    ($adapter:ident, $kind:literal, $resource:ty, $spec:ty, $find:ident, $create:ident, $delete:ident) => {
        pub struct $adapter<'a>(pub &'a dyn ComputeProvider);

        impl ManagedResource for $adapter<'_> {
            type Resource = $resource;
            type Spec = $spec;

            fn kind(&self) -> &'static str {
                $kind
            }

            fn find(&self, name: &str) -> ProviderResult<Option<$resource>> {
                self.0.$find(name)
            }

            fn create(&self, name: &str, spec: &$spec) -> ProviderResult<$resource> {
                self.0.$create(name, spec)
            }

            fn delete(&self, resource: &$resource) -> ProviderResult<()> {
                self.0.$delete(&resource.id)
            }
        }
    };
}

compute_resource!(Servers, "server", Server, ServerSpec, find_server, create_server, delete_server);
compute_resource!(Networks, "network", Network, NetworkSpec, find_network, create_network, delete_network);
compute_resource!(Firewalls, "firewall", Firewall, FirewallSpec, find_firewall, create_firewall, delete_firewall);
compute_resource!(SshKeys, "ssh_key", SshKey, SshKeySpec, find_ssh_key, create_ssh_key, delete_ssh_key);

/// Volumes detach before deletion.
pub struct Volumes<'a>(pub &'a dyn ComputeProvider);

impl ManagedResource for Volumes<'_> {
    type Resource = Volume;
    type Spec = VolumeSpec;

    fn kind(&self) -> &'static str {
        "volume"
    }

    fn find(&self, name: &str) -> ProviderResult<Option<Volume>> {
        self.0.find_volume(name)
    }

    fn create(&self, name: &str, spec: &VolumeSpec) -> ProviderResult<Volume> {
        self.0.create_volume(name, spec)
    }

    fn delete(&self, volume: &Volume) -> ProviderResult<()> {
        if volume.server_id.is_some() {
            match self.0.detach_volume(&volume.id) {
                Ok(()) | Err(ProviderError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.0.delete_volume(&volume.id)
    }
}

pub struct Tunnels<'a>(pub &'a dyn EdgeProvider);

impl ManagedResource for Tunnels<'_> {
    type Resource = Tunnel;
    type Spec = TunnelSpec;

    fn kind(&self) -> &'static str {
        "tunnel"
    }

    fn find(&self, name: &str) -> ProviderResult<Option<Tunnel>> {
        self.0.find_tunnel(name)
    }

    fn create(&self, name: &str, spec: &TunnelSpec) -> ProviderResult<Tunnel> {
        self.0.create_tunnel(name, spec)
    }

    fn delete(&self, tunnel: &Tunnel) -> ProviderResult<()> {
        self.0.delete_tunnel(&tunnel.id)
    }
}

pub struct DnsRecords<'a> {
    pub provider: &'a dyn EdgeProvider,
    pub zone_id: &'a str,
}

impl ManagedResource for DnsRecords<'_> {
    type Resource = DnsRecord;
    type Spec = DnsRecordSpec;

    fn kind(&self) -> &'static str {
        "dns_record"
    }

    fn find(&self, name: &str) -> ProviderResult<Option<DnsRecord>> {
        self.provider.find_dns_record(self.zone_id, name)
    }

    fn create(&self, name: &str, spec: &DnsRecordSpec) -> ProviderResult<DnsRecord> {
        self.provider.create_dns_record(self.zone_id, name, spec)
    }

    fn delete(&self, record: &DnsRecord) -> ProviderResult<()> {
        self.provider.delete_dns_record(self.zone_id, &record.id)
    }
}

pub struct WorkerRoutes<'a> {
    pub provider: &'a dyn EdgeProvider,
    pub zone_id: &'a str,
}

impl ManagedResource for WorkerRoutes<'_> {
    type Resource = WorkerRoute;
    type Spec = WorkerRouteSpec;

    fn kind(&self) -> &'static str {
        "worker_route"
    }

    fn find(&self, pattern: &str) -> ProviderResult<Option<WorkerRoute>> {
        self.provider.find_worker_route(self.zone_id, pattern)
    }

    fn create(&self, pattern: &str, spec: &WorkerRouteSpec) -> ProviderResult<WorkerRoute> {
        self.provider.create_worker_route(self.zone_id, pattern, spec)
    }

    fn delete(&self, route: &WorkerRoute) -> ProviderResult<()> {
        self.provider.delete_worker_route(self.zone_id, &route.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCompute, MemoryEdge};

    fn network_spec(range: &str) -> NetworkSpec {
        NetworkSpec {
            ip_range: range.to_string(),
            labels: Labels::new(),
        }
    }

    #[test]
    fn find_or_create_twice_creates_once() {
        let compute = MemoryCompute::new();
        let networks = Networks(&compute);

        let first = networks.find_or_create("app-staging", &network_spec("10.0.0.0/16")).unwrap();
        let second = networks.find_or_create("app-staging", &network_spec("10.0.0.0/16")).unwrap();

        assert_eq!(first, second);
        assert_eq!(compute.create_calls("network"), 1);
    }

    #[test]
    fn existing_resource_is_not_mutated() {
        let compute = MemoryCompute::new();
        let networks = Networks(&compute);
        networks.find_or_create("app-staging", &network_spec("10.0.0.0/16")).unwrap();

        let again = networks.find_or_create("app-staging", &network_spec("172.16.0.0/12")).unwrap();
        assert_eq!(again.ip_range, "10.0.0.0/16");
    }

    #[test]
    fn delete_if_exists_tolerates_absence() {
        let compute = MemoryCompute::new();
        assert!(!Servers(&compute).delete_if_exists("ghost").unwrap());
        assert!(!Firewalls(&compute).delete_if_exists("ghost").unwrap());

        let spec = ServerSpec::default();
        Servers(&compute).find_or_create("app-staging", &spec).unwrap();
        assert!(Servers(&compute).delete_if_exists("app-staging").unwrap());
        assert!(!Servers(&compute).delete_if_exists("app-staging").unwrap());
    }

    #[test]
    fn delete_absorbs_concurrent_not_found() {
        let compute = MemoryCompute::new();
        SshKeys(&compute)
            .find_or_create(
                "app-staging",
                &SshKeySpec {
                    public_key: "ssh-ed25519 AAAA".into(),
                    labels: Labels::new(),
                },
            )
            .unwrap();
        compute.fail_deletes_with(ProviderError::not_found("ssh key"));
        assert!(!SshKeys(&compute).delete_if_exists("app-staging").unwrap());
    }

    #[test]
    fn delete_propagates_other_errors() {
        let compute = MemoryCompute::new();
        Networks(&compute)
            .find_or_create("app-staging", &network_spec("10.0.0.0/16"))
            .unwrap();
        compute.fail_deletes_with(ProviderError::from_status(500, "boom"));
        let err = Networks(&compute).delete_if_exists("app-staging").unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn attached_volume_detaches_before_delete() {
        let compute = MemoryCompute::new();
        let server = Servers(&compute)
            .find_or_create("app-staging", &ServerSpec::default())
            .unwrap();
        let volume = Volumes(&compute)
            .find_or_create(
                "app-staging-postgres",
                &VolumeSpec {
                    size_gb: 10,
                    location: "nbg1".into(),
                    labels: Labels::new(),
                },
            )
            .unwrap();
        compute.attach_volume(&volume.id, &server.id).unwrap();

        assert!(Volumes(&compute).delete_if_exists("app-staging-postgres").unwrap());
        assert_eq!(
            compute.deletions(),
            vec!["detach:app-staging-postgres", "volume:app-staging-postgres"]
        );
    }

    #[test]
    fn dns_records_are_zone_scoped() {
        let edge = MemoryEdge::new();
        let tunnel = Tunnels(&edge)
            .find_or_create("app-staging", &TunnelSpec::default())
            .unwrap();
        let spec = DnsRecordSpec::tunnel_cname(&tunnel);

        DnsRecords { provider: &edge, zone_id: "zone-a" }
            .find_or_create("app.example.com", &spec)
            .unwrap();
        assert!(
            DnsRecords { provider: &edge, zone_id: "zone-b" }
                .find("app.example.com")
                .unwrap()
                .is_none()
        );
        let again = DnsRecords { provider: &edge, zone_id: "zone-a" }
            .find_or_create("app.example.com", &spec)
            .unwrap();
        assert_eq!(again.content, format!("{}.cfargotunnel.com", tunnel.id));
        assert_eq!(edge.create_calls("dns_record"), 1);
    }
}
