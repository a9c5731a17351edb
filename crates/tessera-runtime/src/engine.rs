use crate::EngineError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_schema::{Environment, Machine, WorkspaceId};
use tracing::{debug, warn};

/// Backend that provisions and tears down the machines of one environment type.
///
/// Both calls may block for a long time; the runtime registry never holds a
/// lock while invoking them.
pub trait EnvironmentEngine: Send + Sync {
    /// Recipe type tag this engine handles, e.g. `"compose"`.
    fn env_type(&self) -> &str;

    /// Provision every machine of `environment` for the workspace.
    ///
    /// When `recover` is set the engine should reattach to machines left
    /// over from a previous run instead of creating fresh ones.
    fn start(
        &self,
        workspace_id: &WorkspaceId,
        environment: &Environment,
        recover: bool,
    ) -> Result<Vec<Machine>, EngineError>;

    fn stop(&self, workspace_id: &WorkspaceId) -> Result<(), EngineError>;
}

/// Tag-keyed set of engines, resolved once per registry call.
#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn EnvironmentEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its own type tag, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn EnvironmentEngine>) {
        let tag = engine.env_type().to_owned();
        if self.engines.insert(tag.clone(), engine).is_some() {
            warn!("environment engine for type '{tag}' replaced");
        } else {
            debug!("registered environment engine '{tag}'");
        }
    }

    #[must_use]
    pub fn with(mut self, engine: Arc<dyn EnvironmentEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, env_type: &str) -> Option<Arc<dyn EnvironmentEngine>> {
        self.engines.get(env_type).cloned()
    }

    pub fn contains(&self, env_type: &str) -> bool {
        self.engines.contains_key(env_type)
    }

    pub fn types(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    #[test]
    fn lookup_by_type_tag() {
        let registry = EngineRegistry::new()
            .with(Arc::new(MockEngine::new()))
            .with(Arc::new(MockEngine::with_type("compose")));

        assert!(registry.get("mock").is_some());
        assert!(registry.get("compose").is_some());
        assert!(registry.contains("compose"));
        assert_eq!(registry.types(), vec!["compose", "mock"]);
    }

    #[test]
    fn unknown_type_is_none() {
        let registry = EngineRegistry::new().with(Arc::new(MockEngine::new()));
        assert!(registry.get("nonexistent").is_none());
        assert!(EngineRegistry::new().is_empty());
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let first = Arc::new(MockEngine::new());
        let second = Arc::new(MockEngine::new());
        let registry = EngineRegistry::new()
            .with(first.clone())
            .with(second.clone());

        let resolved = registry.get("mock").unwrap();
        resolved.stop(&WorkspaceId::new("ws")).ok();
        assert_eq!(first.stop_calls(&WorkspaceId::new("ws")), 0);
        assert_eq!(second.stop_calls(&WorkspaceId::new("ws")), 1);
    }
}
