use thiserror::Error;

use berth_exec::ExecError;
use berth_manifest::ManifestError;

pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("no private network address found on the node")]
    NoPrivateNetwork,

    #[error("could not determine the node's public address")]
    NoPublicAddress,

    #[error("{what} not ready after {attempts} attempts")]
    Timeout { what: &'static str, attempts: u32 },

    #[error("rollout of {deployment} did not complete: {output}")]
    RolloutFailed { deployment: String, output: String },
}
