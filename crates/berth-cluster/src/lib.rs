//! berth-cluster — turns a fresh server into a single-node cluster.
//!
//! [`ClusterBootstrapper`] installs k3s over the private network, runs an
//! image registry inside the cluster, and exposes an nginx ingress on fixed
//! NodePorts. [`Kubectl`] wraps the manifest applies and rollout waits the
//! release workflow issues afterwards.

pub mod bootstrap;
pub mod error;
pub mod kubectl;
pub mod network;

pub use bootstrap::{ClusterBootstrapper, NodeInfo};
pub use error::{BootstrapError, BootstrapResult};
pub use kubectl::Kubectl;
