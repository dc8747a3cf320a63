use thiserror::Error;

use berth_core::ConfigError;

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no password generated for database {0}")]
    MissingPassword(String),

    #[error("process {0} has no image to run")]
    MissingImage(String),

    #[error("YAML rendering failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
