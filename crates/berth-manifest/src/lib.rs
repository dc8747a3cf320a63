//! berth-manifest — declarative manifests for Berth.
//!
//! * [`compose`] renders the sandbox Compose file (target `sandbox`).
//! * [`kube`] renders the cluster objects of a release (target `release`).
//! * [`platform`] holds the once-per-server objects: priority classes and the
//!   in-cluster registry.
//!
//! Both generators derive `DATABASE_URL`, `<KIND>_URL` and `<NAME>_URL` the
//! same way ([`env::app_env`]); only the host naming differs.

pub mod compose;
pub mod env;
pub mod error;
pub mod kube;
pub mod labels;
pub mod platform;

pub use compose::{ComposeFile, render_compose};
pub use error::{ManifestError, ManifestResult};
pub use kube::{ManifestSet, ReleaseInputs, render_release, rollout_targets};
