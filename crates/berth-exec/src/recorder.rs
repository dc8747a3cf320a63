//! Ledger rows for steps the engine performs itself.

use std::fmt::Display;
use std::sync::Arc;

use tracing::warn;

use berth_state::{
    Execution, ExecutionCategory, ExecutionOwner, ExecutionTag, LogStream, NewExecution,
    StateStore,
};

use crate::error::ExecResult;
use crate::events::{NoopEvents, ProvisionEvents};

/// Binds a store, an owner and an event sink. Cheap to clone.
#[derive(Clone)]
pub struct StepRecorder {
    store: StateStore,
    owner: ExecutionOwner,
    events: Arc<dyn ProvisionEvents>,
    category: Option<ExecutionCategory>,
}

impl StepRecorder {
    pub fn new(store: StateStore, owner: ExecutionOwner) -> Self {
        Self {
            store,
            owner,
            events: Arc::new(NoopEvents),
            category: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn ProvisionEvents>) -> Self {
        self.events = events;
        self
    }

    /// Same recorder, new default category for subsequent rows.
    pub fn in_category(&self, category: ExecutionCategory) -> Self {
        Self {
            category: Some(category),
            ..self.clone()
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn owner(&self) -> ExecutionOwner {
        self.owner
    }

    pub fn category(&self) -> Option<ExecutionCategory> {
        self.category
    }

    pub fn events(&self) -> &Arc<dyn ProvisionEvents> {
        &self.events
    }

    /// Run `f` as a `process` execution tagged `tag`. The row finishes with
    /// exit code 0 on success and 1 on error, with the error text logged on
    /// the `output` stream.
    pub fn step<T, E, F>(&self, tag: ExecutionTag, description: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<crate::ExecError> + Display,
    {
        let execution = self.open(
            NewExecution::process(self.owner, description).tag(Some(tag)),
        )?;
        let result = f();
        match &result {
            Ok(_) => {
                self.store
                    .finish_execution(execution.id, Some(0))
                    .map_err(crate::ExecError::from)?;
            }
            Err(err) => self.close_failed(execution.id, &err.to_string()),
        }
        result
    }

    /// Record an instantaneous marker, e.g. a state transition.
    pub fn marker(&self, description: &str) -> ExecResult<Execution> {
        let execution = self.open(
            NewExecution::process(self.owner, description).tag(Some(ExecutionTag::StateTransition)),
        )?;
        Ok(self.store.finish_execution(execution.id, Some(0))?)
    }

    /// Open a ledger row, applying the default category and announcing it.
    pub(crate) fn open(&self, new: NewExecution) -> ExecResult<Execution> {
        let new = match new.category {
            Some(_) => new,
            None => new.category(self.category),
        };
        self.events
            .on_step_started(self.owner, new.tag, &new.command);
        Ok(self.store.create_execution(new)?)
    }

    /// Best effort: the original error matters more than a ledger hiccup.
    fn close_failed(&self, execution: u64, message: &str) {
        let lines = vec![message.to_string()];
        if let Err(e) = self
            .store
            .append_log_lines(execution, LogStream::Output, &lines)
            .and_then(|_| self.store.finish_execution(execution, Some(1)))
        {
            warn!(owner = %self.owner, execution, error = %e, "cannot record step failure");
        }
        self.events
            .on_log_line(self.owner, execution, LogStream::Output, message);
    }
}
