use crate::lifecycle::{validate_transition, WorkspaceStatus};
use crate::CoreError;
use serde::Serialize;
use tessera_schema::Machine;

/// Snapshot of a workspace's runtime: active environment and its machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceRuntime {
    active_env: String,
    env_type: String,
    root_folder: Option<String>,
    machines: Vec<Machine>,
    dev_machine: Option<Machine>,
}

impl WorkspaceRuntime {
    pub fn new(active_env: impl Into<String>, env_type: impl Into<String>) -> Self {
        Self {
            active_env: active_env.into(),
            env_type: env_type.into(),
            root_folder: None,
            machines: Vec::new(),
            dev_machine: None,
        }
    }

    pub fn active_env(&self) -> &str {
        &self.active_env
    }

    pub fn env_type(&self) -> &str {
        &self.env_type
    }

    pub fn root_folder(&self) -> Option<&str> {
        self.root_folder.as_deref()
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn dev_machine(&self) -> Option<&Machine> {
        self.dev_machine.as_ref()
    }

    /// Attach the provisioned machines; the root folder follows the dev machine.
    pub(crate) fn attach_machines(&mut self, machines: Vec<Machine>, dev_machine: Machine) {
        self.root_folder = dev_machine.projects_root().map(str::to_owned);
        self.machines = machines;
        self.dev_machine = Some(dev_machine);
    }

    /// Remove every machine named `name`; returns whether any was removed.
    pub(crate) fn remove_machine(&mut self, name: &str) -> bool {
        let before = self.machines.len();
        self.machines.retain(|m| m.name() != name);
        self.machines.len() != before
    }
}

/// Registry record for one workspace: its status and runtime snapshot.
///
/// Values handed out by the registry are independent clones; mutating one
/// never reaches the registry's copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeDescriptor {
    status: WorkspaceStatus,
    runtime: WorkspaceRuntime,
}

impl RuntimeDescriptor {
    pub(crate) fn starting(runtime: WorkspaceRuntime) -> Result<Self, CoreError> {
        validate_transition(None, Some(WorkspaceStatus::Starting))?;
        Ok(Self {
            status: WorkspaceStatus::Starting,
            runtime,
        })
    }

    pub fn status(&self) -> WorkspaceStatus {
        self.status
    }

    pub fn runtime(&self) -> &WorkspaceRuntime {
        &self.runtime
    }

    /// Retire a `STOPPING` descriptor, yielding its runtime.
    pub(crate) fn finish_stop(self) -> Result<WorkspaceRuntime, CoreError> {
        validate_transition(Some(self.status), None)?;
        Ok(self.runtime)
    }

    pub(crate) fn runtime_mut(&mut self) -> &mut WorkspaceRuntime {
        &mut self.runtime
    }

    pub(crate) fn set_status(&mut self, status: WorkspaceStatus) -> Result<(), CoreError> {
        validate_transition(Some(self.status), Some(status))?;
        self.status = status;
        Ok(())
    }
}
