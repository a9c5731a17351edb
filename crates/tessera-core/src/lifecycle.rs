use crate::CoreError;
use serde::{Deserialize, Serialize};

/// Status of a registered workspace runtime.
///
/// There is no stopped variant: a workspace without a descriptor is stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceStatus::Starting => write!(f, "STARTING"),
            WorkspaceStatus::Running => write!(f, "RUNNING"),
            WorkspaceStatus::Stopping => write!(f, "STOPPING"),
        }
    }
}

fn describe(status: Option<WorkspaceStatus>) -> String {
    status.map_or_else(|| "STOPPED".to_owned(), |s| s.to_string())
}

/// `None` stands for the absent (stopped) state.
pub fn validate_transition(
    from: Option<WorkspaceStatus>,
    to: Option<WorkspaceStatus>,
) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (None, Some(WorkspaceStatus::Starting))
            | (
                Some(WorkspaceStatus::Starting),
                Some(WorkspaceStatus::Running)
            )
            | (
                Some(WorkspaceStatus::Running),
                Some(WorkspaceStatus::Stopping)
            )
            | (Some(WorkspaceStatus::Stopping), None)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::Conflict(format!(
            "invalid workspace status transition: {} -> {}",
            describe(from),
            describe(to)
        )))
    }
}
