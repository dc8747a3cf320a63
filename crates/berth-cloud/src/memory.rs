//! In-memory providers for tests. They count create calls per kind and
//! record deletions in order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ComputeProvider, EdgeProvider};
use crate::types::*;

#[derive(Default)]
struct ComputeInner {
    next_id: u64,
    servers: BTreeMap<String, Server>,
    server_specs: BTreeMap<String, ServerSpec>,
    networks: BTreeMap<String, Network>,
    firewalls: BTreeMap<String, Firewall>,
    ssh_keys: BTreeMap<String, SshKey>,
    volumes: BTreeMap<String, Volume>,
    creates: HashMap<&'static str, usize>,
    attaches: usize,
    deletions: Vec<String>,
    delete_error: Option<ProviderError>,
    server_memory_mib: Option<u64>,
}

impl ComputeInner {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn created(&mut self, kind: &'static str) {
        *self.creates.entry(kind).or_default() += 1;
    }

    fn check_delete(&self) -> ProviderResult<()> {
        match &self.delete_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn remove_by_id<T>(
    map: &mut BTreeMap<String, T>,
    id: &str,
    id_of: impl Fn(&T) -> &str,
    kind: &str,
) -> ProviderResult<String> {
    let name = map
        .iter()
        .find(|(_, v)| id_of(v) == id)
        .map(|(k, _)| k.clone())
        .ok_or_else(|| ProviderError::not_found(format!("{kind} {id}")))?;
    map.remove(&name);
    Ok(name)
}

#[derive(Default)]
pub struct MemoryCompute {
    inner: Mutex<ComputeInner>,
}

impl MemoryCompute {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ComputeInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Memory reported for every server created afterwards.
    pub fn with_server_memory(self, mib: u64) -> Self {
        self.lock().server_memory_mib = Some(mib);
        self
    }

    pub fn create_calls(&self, kind: &str) -> usize {
        self.lock().creates.get(kind).copied().unwrap_or(0)
    }

    pub fn total_create_calls(&self) -> usize {
        self.lock().creates.values().sum()
    }

    pub fn attach_calls(&self) -> usize {
        self.lock().attaches
    }

    /// `kind:name` for every deletion (and detach), in call order.
    pub fn deletions(&self) -> Vec<String> {
        self.lock().deletions.clone()
    }

    /// Make every later delete fail with `err`.
    pub fn fail_deletes_with(&self, err: ProviderError) {
        self.lock().delete_error = Some(err);
    }

    pub fn server_spec(&self, name: &str) -> Option<ServerSpec> {
        self.lock().server_specs.get(name).cloned()
    }

    pub fn server(&self, name: &str) -> Option<Server> {
        self.lock().servers.get(name).cloned()
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.lock().volumes.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.servers.is_empty()
            && inner.networks.is_empty()
            && inner.firewalls.is_empty()
            && inner.ssh_keys.is_empty()
            && inner.volumes.is_empty()
    }
}

impl ComputeProvider for MemoryCompute {
    fn find_server(&self, name: &str) -> ProviderResult<Option<Server>> {
        Ok(self.lock().servers.get(name).cloned())
    }

    fn create_server(&self, name: &str, spec: &ServerSpec) -> ProviderResult<Server> {
        let mut inner = self.lock();
        inner.created("server");
        let id = inner.next_id();
        let octet = inner.servers.len() + 2;
        let server = Server {
            id,
            name: name.to_string(),
            public_ip: Some(format!("203.0.113.{octet}")),
            private_ip: spec.network.as_ref().map(|_| format!("10.0.0.{octet}")),
            memory_mib: inner.server_memory_mib,
            labels: spec.labels.clone(),
        };
        inner.server_specs.insert(name.to_string(), spec.clone());
        inner.servers.insert(name.to_string(), server.clone());
        Ok(server)
    }

    fn delete_server(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.check_delete()?;
        let name = remove_by_id(&mut inner.servers, id, |s| s.id.as_str(), "server")?;
        inner.deletions.push(format!("server:{name}"));
        Ok(())
    }

    fn find_network(&self, name: &str) -> ProviderResult<Option<Network>> {
        Ok(self.lock().networks.get(name).cloned())
    }

    fn create_network(&self, name: &str, spec: &NetworkSpec) -> ProviderResult<Network> {
        let mut inner = self.lock();
        inner.created("network");
        let network = Network {
            id: inner.next_id(),
            name: name.to_string(),
            ip_range: spec.ip_range.clone(),
        };
        inner.networks.insert(name.to_string(), network.clone());
        Ok(network)
    }

    fn delete_network(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.check_delete()?;
        let name = remove_by_id(&mut inner.networks, id, |n| n.id.as_str(), "network")?;
        inner.deletions.push(format!("network:{name}"));
        Ok(())
    }

    fn find_firewall(&self, name: &str) -> ProviderResult<Option<Firewall>> {
        Ok(self.lock().firewalls.get(name).cloned())
    }

    fn create_firewall(&self, name: &str, spec: &FirewallSpec) -> ProviderResult<Firewall> {
        let mut inner = self.lock();
        inner.created("firewall");
        let firewall = Firewall {
            id: inner.next_id(),
            name: name.to_string(),
            rules: spec.rules.clone(),
        };
        inner.firewalls.insert(name.to_string(), firewall.clone());
        Ok(firewall)
    }

    fn delete_firewall(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.check_delete()?;
        let name = remove_by_id(&mut inner.firewalls, id, |f| f.id.as_str(), "firewall")?;
        inner.deletions.push(format!("firewall:{name}"));
        Ok(())
    }

    fn find_ssh_key(&self, name: &str) -> ProviderResult<Option<SshKey>> {
        Ok(self.lock().ssh_keys.get(name).cloned())
    }

    fn create_ssh_key(&self, name: &str, spec: &SshKeySpec) -> ProviderResult<SshKey> {
        let mut inner = self.lock();
        inner.created("ssh_key");
        let key = SshKey {
            id: inner.next_id(),
            name: name.to_string(),
            public_key: spec.public_key.clone(),
        };
        inner.ssh_keys.insert(name.to_string(), key.clone());
        Ok(key)
    }

    fn delete_ssh_key(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.check_delete()?;
        let name = remove_by_id(&mut inner.ssh_keys, id, |k| k.id.as_str(), "ssh key")?;
        inner.deletions.push(format!("ssh_key:{name}"));
        Ok(())
    }

    fn find_volume(&self, name: &str) -> ProviderResult<Option<Volume>> {
        Ok(self.lock().volumes.get(name).cloned())
    }

    fn create_volume(&self, name: &str, spec: &VolumeSpec) -> ProviderResult<Volume> {
        let mut inner = self.lock();
        inner.created("volume");
        let volume = Volume {
            id: inner.next_id(),
            name: name.to_string(),
            size_gb: spec.size_gb,
            server_id: None,
            linux_device: None,
        };
        inner.volumes.insert(name.to_string(), volume.clone());
        Ok(volume)
    }

    fn delete_volume(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.check_delete()?;
        let name = remove_by_id(&mut inner.volumes, id, |v| v.id.as_str(), "volume")?;
        inner.deletions.push(format!("volume:{name}"));
        Ok(())
    }

    fn attach_volume(&self, volume_id: &str, server_id: &str) -> ProviderResult<Volume> {
        let mut inner = self.lock();
        inner.attaches += 1;
        let volume = inner
            .volumes
            .values_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| ProviderError::not_found(format!("volume {volume_id}")))?;
        volume.server_id = Some(server_id.to_string());
        volume.linux_device = Some(format!("/dev/disk/by-id/scsi-0HC_Volume_{volume_id}"));
        Ok(volume.clone())
    }

    fn detach_volume(&self, volume_id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        let volume = inner
            .volumes
            .values_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| ProviderError::not_found(format!("volume {volume_id}")))?;
        volume.server_id = None;
        volume.linux_device = None;
        let name = volume.name.clone();
        inner.deletions.push(format!("detach:{name}"));
        Ok(())
    }
}

#[derive(Default)]
struct EdgeInner {
    next_id: u64,
    tunnels: BTreeMap<String, Tunnel>,
    ingress: HashMap<String, Vec<IngressRule>>,
    dns: BTreeMap<(String, String), DnsRecord>,
    routes: BTreeMap<(String, String), WorkerRoute>,
    workers: BTreeMap<String, String>,
    creates: HashMap<&'static str, usize>,
    deletions: Vec<String>,
}

impl EdgeInner {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:08x}", self.next_id)
    }

    fn created(&mut self, kind: &'static str) {
        *self.creates.entry(kind).or_default() += 1;
    }
}

#[derive(Default)]
pub struct MemoryEdge {
    inner: Mutex<EdgeInner>,
}

impl MemoryEdge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EdgeInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn create_calls(&self, kind: &str) -> usize {
        self.lock().creates.get(kind).copied().unwrap_or(0)
    }

    pub fn deletions(&self) -> Vec<String> {
        self.lock().deletions.clone()
    }

    /// Current ingress rules of the named tunnel.
    pub fn ingress(&self, tunnel_name: &str) -> Vec<IngressRule> {
        let inner = self.lock();
        inner
            .tunnels
            .get(tunnel_name)
            .and_then(|t| inner.ingress.get(&t.id).cloned())
            .unwrap_or_default()
    }

    pub fn tunnel_id(&self, tunnel_name: &str) -> Option<String> {
        self.lock().tunnels.get(tunnel_name).map(|t| t.id.clone())
    }

    pub fn dns_names(&self) -> Vec<String> {
        self.lock().dns.keys().map(|(_, name)| name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.tunnels.is_empty() && inner.dns.is_empty() && inner.routes.is_empty()
    }

    /// Script body of the named worker, if deployed.
    pub fn worker(&self, name: &str) -> Option<String> {
        self.lock().workers.get(name).cloned()
    }
}

impl EdgeProvider for MemoryEdge {
    fn find_tunnel(&self, name: &str) -> ProviderResult<Option<Tunnel>> {
        Ok(self.lock().tunnels.get(name).cloned())
    }

    fn create_tunnel(&self, name: &str, spec: &TunnelSpec) -> ProviderResult<Tunnel> {
        let mut inner = self.lock();
        inner.created("tunnel");
        let tunnel = Tunnel {
            id: inner.next_id(),
            name: name.to_string(),
        };
        inner.ingress.insert(tunnel.id.clone(), spec.ingress.clone());
        inner.tunnels.insert(name.to_string(), tunnel.clone());
        Ok(tunnel)
    }

    fn delete_tunnel(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        let name = remove_by_id(&mut inner.tunnels, id, |t| t.id.as_str(), "tunnel")?;
        inner.ingress.remove(id);
        inner.deletions.push(format!("tunnel:{name}"));
        Ok(())
    }

    fn configure_tunnel(&self, id: &str, ingress: &[IngressRule]) -> ProviderResult<()> {
        let mut inner = self.lock();
        if !inner.tunnels.values().any(|t| t.id == id) {
            return Err(ProviderError::not_found(format!("tunnel {id}")));
        }
        inner.ingress.insert(id.to_string(), ingress.to_vec());
        Ok(())
    }

    fn tunnel_token(&self, id: &str) -> ProviderResult<String> {
        Ok(format!("token-{id}"))
    }

    fn find_dns_record(&self, zone_id: &str, name: &str) -> ProviderResult<Option<DnsRecord>> {
        Ok(self
            .lock()
            .dns
            .get(&(zone_id.to_string(), name.to_string()))
            .cloned())
    }

    fn create_dns_record(&self, zone_id: &str, name: &str, spec: &DnsRecordSpec) -> ProviderResult<DnsRecord> {
        let mut inner = self.lock();
        inner.created("dns_record");
        let record = DnsRecord {
            id: inner.next_id(),
            name: name.to_string(),
            record_type: spec.record_type.clone(),
            content: spec.content.clone(),
            proxied: spec.proxied,
        };
        inner
            .dns
            .insert((zone_id.to_string(), name.to_string()), record.clone());
        Ok(record)
    }

    fn delete_dns_record(&self, zone_id: &str, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        let key = inner
            .dns
            .iter()
            .find(|((zone, _), r)| zone == zone_id && r.id == id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| ProviderError::not_found(format!("dns record {id}")))?;
        inner.dns.remove(&key);
        inner.deletions.push(format!("dns_record:{}", key.1));
        Ok(())
    }

    fn deploy_worker(&self, name: &str, script: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.created("worker");
        inner.workers.insert(name.to_string(), script.to_string());
        Ok(())
    }

    fn delete_worker(&self, name: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        if inner.workers.remove(name).is_none() {
            return Err(ProviderError::not_found(format!("worker {name}")));
        }
        inner.deletions.push(format!("worker:{name}"));
        Ok(())
    }

    fn find_worker_route(&self, zone_id: &str, pattern: &str) -> ProviderResult<Option<WorkerRoute>> {
        Ok(self
            .lock()
            .routes
            .get(&(zone_id.to_string(), pattern.to_string()))
            .cloned())
    }

    fn create_worker_route(
        &self,
        zone_id: &str,
        pattern: &str,
        spec: &WorkerRouteSpec,
    ) -> ProviderResult<WorkerRoute> {
        let mut inner = self.lock();
        inner.created("worker_route");
        let route = WorkerRoute {
            id: inner.next_id(),
            pattern: pattern.to_string(),
            script: spec.script.clone(),
        };
        inner
            .routes
            .insert((zone_id.to_string(), pattern.to_string()), route.clone());
        Ok(route)
    }

    fn delete_worker_route(&self, zone_id: &str, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        let key = inner
            .routes
            .iter()
            .find(|((zone, _), r)| zone == zone_id && r.id == id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| ProviderError::not_found(format!("worker route {id}")))?;
        inner.routes.remove(&key);
        inner.deletions.push(format!("worker_route:{}", key.1));
        Ok(())
    }
}
