//! External collaborators a provisioner talks to.

use std::sync::Arc;

use berth_cloud::{ComputeProvider, EdgeProvider};
use berth_core::{BerthConfig, TimeoutsConfig};
use berth_exec::{
    NoopEvents, ProvisionEvents, RemoteRunner, SshTarget, StepRecorder, TransportFactory,
};
use berth_state::{ExecutionCategory, ExecutionOwner, ExecutionTag, SshKeyPair, StateStore};

use crate::error::{ProvisionError, ProvisionResult};
use crate::keys::{KeySource, SshKeygen};

/// Store, providers, transports and event sink shared by every workflow.
#[derive(Clone)]
pub struct Backends {
    pub store: StateStore,
    pub compute: Arc<dyn ComputeProvider>,
    pub edge: Option<Arc<dyn EdgeProvider>>,
    pub transports: Arc<dyn TransportFactory>,
    pub keys: Arc<dyn KeySource>,
    pub events: Arc<dyn ProvisionEvents>,
}

impl Backends {
    pub fn new(
        store: StateStore,
        compute: Arc<dyn ComputeProvider>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            store,
            compute,
            edge: None,
            transports,
            keys: Arc::new(SshKeygen),
            events: Arc::new(NoopEvents),
        }
    }

    pub fn with_edge(mut self, edge: Arc<dyn EdgeProvider>) -> Self {
        self.edge = Some(edge);
        self
    }

    pub fn with_keys(mut self, keys: Arc<dyn KeySource>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ProvisionEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn recorder(&self, owner: ExecutionOwner, category: ExecutionCategory) -> StepRecorder {
        StepRecorder::new(self.store.clone(), owner)
            .with_events(self.events.clone())
            .in_category(category)
    }

    /// Open a runner to `host` without waiting for it.
    pub fn connect(
        &self,
        config: &BerthConfig,
        host: &str,
        key: &SshKeyPair,
        recorder: StepRecorder,
    ) -> ProvisionResult<RemoteRunner> {
        let target = SshTarget::new(host, config.compute.ssh_user.as_str(), key.clone());
        let transport = self.transports.connect(&target)?;
        Ok(RemoteRunner::new(transport, recorder)
            .with_default_timeout(config.timeouts.command_timeout()))
    }
}

/// Block until the host answers, as one recorded step.
pub fn wait_for_ssh(runner: &RemoteRunner, timeouts: &TimeoutsConfig) -> ProvisionResult<()> {
    runner
        .recorder()
        .step(ExecutionTag::SshReady, "wait for ssh", || {
            runner
                .wait_until_ready(timeouts.ssh_ready_attempts, timeouts.poll_interval())
                .map_err(ProvisionError::from)
        })
}
