//! berth-cloud — cloud resource reconciliation for Berth.
//!
//! Compute (servers, networks, firewalls, SSH keys, volumes) and edge
//! (tunnels, DNS records, worker routes) providers are capability traits.
//! Every resource is reconciled by deterministic name through
//! [`ManagedResource::find_or_create`] and [`ManagedResource::delete_if_exists`];
//! provider ids are never persisted.

pub mod error;
pub mod provider;
pub mod reconcile;
pub mod types;

#[cfg(feature = "testing")]
pub mod memory;

pub use error::{ProviderError, ProviderResult};
pub use provider::{ComputeProvider, EdgeProvider};
pub use reconcile::{
    DnsRecords, Firewalls, ManagedResource, Networks, Servers, SshKeys, Tunnels, Volumes,
    WorkerRoutes,
};
pub use types::*;
