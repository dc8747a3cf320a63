pub mod config;
pub mod env;
pub mod error;
pub mod naming;
pub mod policy;

pub use config::{
    BerthConfig, BerthConfigBuilder, ComputeConfig, DatabaseConfig, DatabaseKind, ImageConfig,
    ProcessConfig, RepositoryConfig, SandboxConfig, ServiceConfig, StorageConfig, TimeoutsConfig,
    ToolConfig, TunnelConfig, WorkerConfig,
};
pub use env::{EnvValue, Target, resolve};
pub use error::{ConfigError, ConfigResult};
pub use policy::{PriorityTier, ResourceProfile, WorkloadType};
