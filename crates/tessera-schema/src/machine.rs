use crate::types::{MachineId, WorkspaceId};
use crate::workspace::MachineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Creating,
    Running,
    Destroying,
    Error,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Creating => write!(f, "CREATING"),
            MachineStatus::Running => write!(f, "RUNNING"),
            MachineStatus::Destroying => write!(f, "DESTROYING"),
            MachineStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Runtime facts an engine learns while provisioning a machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineRuntimeInfo {
    #[serde(default)]
    pub projects_root: Option<String>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
}

/// A compute unit provisioned by an environment engine for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub id: MachineId,
    pub workspace_id: WorkspaceId,
    pub status: MachineStatus,
    pub config: MachineConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<MachineRuntimeInfo>,
}

impl Machine {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_dev(&self) -> bool {
        self.config.dev
    }

    pub fn projects_root(&self) -> Option<&str> {
        self.runtime.as_ref()?.projects_root.as_deref()
    }
}
