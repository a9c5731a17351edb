//! Core lifecycle controller for Tessera workspace runtimes.
//!
//! `WorkspaceRuntimes` is the registry holding the runtime of every active
//! workspace. Around it live the striped per-key locks guarding it, the status
//! state machine, the in-process event service, and the bounded pool used to
//! stop every environment at shutdown.

pub mod concurrency;
pub mod config;
pub mod descriptor;
pub mod events;
pub mod lifecycle;
pub mod pool;
pub mod runtimes;

pub use concurrency::{install_signal_handler, shutdown_requested, StripedLocks, WriteAllGuard};
pub use config::{ConfigError, RuntimesConfig, ShutdownConfig};
pub use descriptor::{RuntimeDescriptor, WorkspaceRuntime};
pub use events::{EventChannel, EventService, EventSubscriber, MachineLogger, SubscriptionId};
pub use lifecycle::{validate_transition, WorkspaceStatus};
pub use pool::StopPool;
pub use runtimes::{ShutdownReport, WorkspaceRuntimes};

use thiserror::Error;

/// Category of a [`CoreError`], for callers that map failures onto their own
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Server,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::InvalidArgument(_) | CoreError::Config(_) => ErrorKind::InvalidArgument,
            CoreError::Server(_) => ErrorKind::Server,
        }
    }
}
