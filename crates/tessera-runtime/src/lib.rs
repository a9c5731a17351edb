//! Environment engines for Tessera workspaces.
//!
//! This crate defines the provisioning seam: the `EnvironmentEngine` trait
//! that starts and stops the machines of one environment type, the
//! tag-keyed `EngineRegistry` the runtime registry resolves engines from,
//! and a scriptable `MockEngine` for tests and load drivers.

pub mod engine;
pub mod mock;

pub use engine::{EngineRegistry, EnvironmentEngine};
pub use mock::{Gate, MockEngine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("environment start failed: {0}")]
    StartFailed(String),
    #[error("engine error: {0}")]
    Server(String),
    #[error("environment of workspace '{0}' is not running")]
    NotRunning(String),
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let e = EngineError::StartFailed("image pull failed".to_owned());
        assert_eq!(e.to_string(), "environment start failed: image pull failed");
        let e = EngineError::NotRunning("ws-1".to_owned());
        assert!(e.to_string().contains("ws-1"));
    }
}
