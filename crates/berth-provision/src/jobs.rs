//! Background execution of provisioning workflows.
//!
//! Workflows are synchronous and block on SSH for minutes at a time, so they
//! run on tokio's blocking pool. A caller can await the handle or drop it;
//! the workflow keeps running either way and its outcome lands in the store.

use tokio::task::JoinHandle;
use tracing::{error, info};

use berth_state::{Release, Sandbox};

use crate::error::{ProvisionError, ProvisionResult};
use crate::release::ReleaseProvisioner;
use crate::sandbox::SandboxProvisioner;

/// A workflow running in the background.
pub struct Job<T> {
    name: String,
    handle: JoinHandle<ProvisionResult<T>>,
}

impl<T: Send + 'static> Job<T> {
    /// Run `work` on the blocking pool.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> ProvisionResult<T> + Send + 'static,
    {
        let name = name.into();
        let job_name = name.clone();
        let handle = tokio::task::spawn_blocking(move || {
            info!(job = %job_name, "job started");
            let result = work();
            match &result {
                Ok(_) => info!(job = %job_name, "job finished"),
                Err(e) => error!(job = %job_name, error = %e, "job failed"),
            }
            result
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the workflow. A panic inside it surfaces as
    /// [`ProvisionError::Job`].
    pub async fn join(self) -> ProvisionResult<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ProvisionError::Job(format!("{}: {e}", self.name))),
        }
    }
}

pub fn provision_sandbox(provisioner: SandboxProvisioner) -> Job<Sandbox> {
    Job::spawn("provision sandbox", move || provisioner.provision())
}

pub fn deprovision_sandbox(provisioner: SandboxProvisioner) -> Job<Sandbox> {
    Job::spawn("deprovision sandbox", move || provisioner.deprovision())
}

pub fn provision_release(provisioner: ReleaseProvisioner) -> Job<Release> {
    Job::spawn("provision release", move || provisioner.provision())
}

pub fn redeploy_release(provisioner: ReleaseProvisioner) -> Job<Release> {
    Job::spawn("redeploy release", move || provisioner.redeploy())
}

pub fn deprovision_release(provisioner: ReleaseProvisioner) -> Job<Release> {
    Job::spawn("deprovision release", move || provisioner.deprovision())
}
