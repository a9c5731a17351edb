//! Workspace definitions, machines, and event payloads for Tessera.
//!
//! This crate defines the value layer shared by engines and the runtime
//! registry: workspace definitions parsed from TOML or JSON (`Workspace`,
//! `Environment`, `MachineConfig`), the provisioned `Machine`, the lifecycle
//! and machine event payloads, and string newtype identifiers.

pub mod events;
pub mod machine;
pub mod types;
pub mod workspace;

pub use events::{
    MachineEventType, MachineLogMessage, MachineStatusEvent, WorkspaceEventType,
    WorkspaceStatusEvent,
};
pub use machine::{Machine, MachineRuntimeInfo, MachineStatus};
pub use types::{MachineId, WorkspaceId};
pub use workspace::{
    parse_workspace_file, parse_workspace_json, parse_workspace_str, Environment,
    EnvironmentRecipe, MachineConfig, MachineLimits, MachineSource, SchemaError, ServerConf,
    Workspace, WorkspaceConfig,
};
