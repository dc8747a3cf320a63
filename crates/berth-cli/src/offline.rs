//! Compute backend for a binary built without provider API clients.

use berth_cloud::{
    ComputeProvider, Firewall, FirewallSpec, Network, NetworkSpec, ProviderError, ProviderResult,
    Server, ServerSpec, SshKey, SshKeySpec, Volume, VolumeSpec,
};

/// Refuses every call. Release operations never reach it; sandbox lookups
/// surface its error.
pub struct OfflineCompute;

fn unavailable<T>(what: &str) -> ProviderResult<T> {
    Err(ProviderError::Api {
        status: 501,
        message: format!("no compute provider configured ({what})"),
    })
}

impl ComputeProvider for OfflineCompute {
    fn find_server(&self, _name: &str) -> ProviderResult<Option<Server>> {
        unavailable("find server")
    }
    fn create_server(&self, _name: &str, _spec: &ServerSpec) -> ProviderResult<Server> {
        unavailable("create server")
    }
    fn delete_server(&self, _id: &str) -> ProviderResult<()> {
        unavailable("delete server")
    }

    fn find_network(&self, _name: &str) -> ProviderResult<Option<Network>> {
        unavailable("find network")
    }
    fn create_network(&self, _name: &str, _spec: &NetworkSpec) -> ProviderResult<Network> {
        unavailable("create network")
    }
    fn delete_network(&self, _id: &str) -> ProviderResult<()> {
        unavailable("delete network")
    }

    fn find_firewall(&self, _name: &str) -> ProviderResult<Option<Firewall>> {
        unavailable("find firewall")
    }
    fn create_firewall(&self, _name: &str, _spec: &FirewallSpec) -> ProviderResult<Firewall> {
        unavailable("create firewall")
    }
    fn delete_firewall(&self, _id: &str) -> ProviderResult<()> {
        unavailable("delete firewall")
    }

    fn find_ssh_key(&self, _name: &str) -> ProviderResult<Option<SshKey>> {
        unavailable("find ssh key")
    }
    fn create_ssh_key(&self, _name: &str, _spec: &SshKeySpec) -> ProviderResult<SshKey> {
        unavailable("create ssh key")
    }
    fn delete_ssh_key(&self, _id: &str) -> ProviderResult<()> {
        unavailable("delete ssh key")
    }

    fn find_volume(&self, _name: &str) -> ProviderResult<Option<Volume>> {
        unavailable("find volume")
    }
    fn create_volume(&self, _name: &str, _spec: &VolumeSpec) -> ProviderResult<Volume> {
        unavailable("create volume")
    }
    fn delete_volume(&self, _id: &str) -> ProviderResult<()> {
        unavailable("delete volume")
    }
    fn attach_volume(&self, _volume_id: &str, _server_id: &str) -> ProviderResult<Volume> {
        unavailable("attach volume")
    }
    fn detach_volume(&self, _volume_id: &str) -> ProviderResult<()> {
        unavailable("detach volume")
    }
}
