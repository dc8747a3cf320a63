//! Sandbox and release workflows.
//!
//! A provisioner owns one sandbox or release and drives it through its
//! state machine. Every step is recorded in the execution ledger, every
//! cloud resource is reconciled by name, and a failed run is resumed by
//! running it again.

pub mod builder;
pub mod context;
pub mod error;
pub mod git;
pub mod infra;
pub mod jobs;
pub mod keys;
pub mod ops;
pub mod release;
pub mod sandbox;
pub mod tunnel;
pub mod volume;

pub use context::Backends;
pub use error::{ProvisionError, ProvisionResult};
pub use jobs::Job;
pub use keys::{KeySource, SshKeygen};
pub use ops::{Operator, Selector};
pub use release::ReleaseProvisioner;
pub use sandbox::SandboxProvisioner;
