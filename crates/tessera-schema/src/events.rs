//! Payloads carried by the event service.

use crate::types::{MachineId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceEventType {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

/// Lifecycle notification published by the runtime registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceStatusEvent {
    pub event_type: WorkspaceEventType,
    pub workspace_id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkspaceStatusEvent {
    pub fn new(event_type: WorkspaceEventType, workspace_id: WorkspaceId) -> Self {
        Self {
            event_type,
            workspace_id,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineEventType {
    Creating,
    Running,
    Destroying,
    Destroyed,
    Error,
}

/// Machine lifecycle notification, usually published by environment engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineStatusEvent {
    pub event_type: MachineEventType,
    pub machine_id: MachineId,
    pub machine_name: String,
    pub workspace_id: WorkspaceId,
    pub dev: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One line of output produced by a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineLogMessage {
    pub workspace_id: WorkspaceId,
    pub machine_name: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_event_omits_missing_error() {
        let event = WorkspaceStatusEvent::new(WorkspaceEventType::Running, WorkspaceId::new("ws"));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event_type":"RUNNING","workspace_id":"ws"}"#);
    }

    #[test]
    fn workspace_event_carries_error() {
        let event = WorkspaceStatusEvent::new(WorkspaceEventType::Error, WorkspaceId::new("ws"))
            .with_error("boom");
        assert_eq!(event.error.as_deref(), Some("boom"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event_type":"ERROR""#));
        assert!(json.contains(r#""error":"boom""#));
    }

    #[test]
    fn machine_event_parses_from_json() {
        let json = r#"{
            "event_type": "DESTROYED",
            "machine_id": "m-1",
            "machine_name": "db",
            "workspace_id": "ws",
            "dev": false
        }"#;
        let event: MachineStatusEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, MachineEventType::Destroyed);
        assert_eq!(event.machine_name, "db");
        assert!(!event.dev);
        assert!(event.error.is_none());
    }
}
