//! Error types for the provisioners.

use thiserror::Error;

use berth_cloud::ProviderError;
use berth_cluster::BootstrapError;
use berth_core::ConfigError;
use berth_exec::ExecError;
use berth_manifest::ManifestError;
use berth_state::StateError;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("ssh key generation failed: {0}")]
    Keygen(String),

    #[error("server {0} has no public address")]
    NoPublicAddress(String),

    #[error("device {device} for volume {volume} did not appear after {attempts} attempts")]
    DeviceTimeout {
        volume: String,
        device: String,
        attempts: u32,
    },

    /// The owner has never reached a server, so there is nothing to talk to.
    #[error("{0} has no server yet")]
    NotProvisioned(String),

    #[error("{0}")]
    NotFound(String),

    #[error("no edge provider configured for tunnel `{0}`")]
    NoEdgeProvider(String),

    #[error("unknown process `{0}`")]
    UnknownProcess(String),

    #[error("background job failed: {0}")]
    Job(String),
}
