use crate::engine::EnvironmentEngine;
use crate::EngineError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tessera_schema::{
    Environment, Machine, MachineId, MachineRuntimeInfo, MachineStatus, WorkspaceId,
};

/// One-shot latch that holds mock starts until a test opens it.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let guard = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = self
            .cond
            .wait_while(guard, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevFlags {
    Keep,
    Strip,
    Duplicate,
}

#[derive(Default)]
struct MockState {
    running: HashSet<WorkspaceId>,
    starts: HashMap<WorkspaceId, usize>,
    stops: HashMap<WorkspaceId, usize>,
}

/// In-memory engine that provisions one machine per machine config.
///
/// Behaviour is scripted with the `with_*`/`failing_*` builders before the
/// engine is registered; invocation counters stay readable through a shared
/// `Arc` afterwards.
pub struct MockEngine {
    env_type: String,
    start_failure: Option<String>,
    stop_failure: Option<String>,
    stop_panics: bool,
    dev_flags: DevFlags,
    start_gate: Option<Arc<Gate>>,
    stop_delay: Option<Duration>,
    state: Mutex<MockState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::with_type("mock")
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(env_type: &str) -> Self {
        Self {
            env_type: env_type.to_owned(),
            start_failure: None,
            stop_failure: None,
            stop_panics: false,
            dev_flags: DevFlags::Keep,
            start_gate: None,
            stop_delay: None,
            state: Mutex::new(MockState::default()),
        }
    }

    #[must_use]
    pub fn failing_start(mut self, message: &str) -> Self {
        self.start_failure = Some(message.to_owned());
        self
    }

    #[must_use]
    pub fn failing_stop(mut self, message: &str) -> Self {
        self.stop_failure = Some(message.to_owned());
        self
    }

    #[must_use]
    pub fn panicking_stop(mut self) -> Self {
        self.stop_panics = true;
        self
    }

    /// Provisioned machines all report `dev = false`.
    #[must_use]
    pub fn without_dev_machine(mut self) -> Self {
        self.dev_flags = DevFlags::Strip;
        self
    }

    /// Provisioned machines all report `dev = true`.
    #[must_use]
    pub fn with_duplicate_dev_machines(mut self) -> Self {
        self.dev_flags = DevFlags::Duplicate;
        self
    }

    #[must_use]
    pub fn with_start_gate(mut self, gate: Arc<Gate>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    #[must_use]
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    pub fn start_calls(&self, workspace_id: &WorkspaceId) -> usize {
        self.lock_state().starts.get(workspace_id).copied().unwrap_or(0)
    }

    pub fn stop_calls(&self, workspace_id: &WorkspaceId) -> usize {
        self.lock_state().stops.get(workspace_id).copied().unwrap_or(0)
    }

    pub fn total_stop_calls(&self) -> usize {
        self.lock_state().stops.values().sum()
    }

    pub fn is_running(&self, workspace_id: &WorkspaceId) -> bool {
        self.lock_state().running.contains(workspace_id)
    }

    pub fn running_count(&self) -> usize {
        self.lock_state().running.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn provision(&self, workspace_id: &WorkspaceId, environment: &Environment) -> Vec<Machine> {
        environment
            .machines
            .iter()
            .map(|config| {
                let mut config = config.clone();
                match self.dev_flags {
                    DevFlags::Keep => {}
                    DevFlags::Strip => config.dev = false,
                    DevFlags::Duplicate => config.dev = true,
                }
                let runtime = MachineRuntimeInfo {
                    projects_root: config.dev.then(|| "/projects".to_owned()),
                    env_variables: config.env_variables.clone(),
                };
                Machine {
                    id: MachineId::new(format!("machine-{workspace_id}-{}", config.name)),
                    workspace_id: workspace_id.clone(),
                    status: MachineStatus::Running,
                    config,
                    runtime: Some(runtime),
                }
            })
            .collect()
    }
}

impl EnvironmentEngine for MockEngine {
    fn env_type(&self) -> &str {
        &self.env_type
    }

    fn start(
        &self,
        workspace_id: &WorkspaceId,
        environment: &Environment,
        _recover: bool,
    ) -> Result<Vec<Machine>, EngineError> {
        *self
            .lock_state()
            .starts
            .entry(workspace_id.clone())
            .or_insert(0) += 1;

        if let Some(gate) = &self.start_gate {
            gate.wait();
        }
        if let Some(message) = &self.start_failure {
            return Err(EngineError::StartFailed(message.clone()));
        }

        let machines = self.provision(workspace_id, environment);
        self.lock_state().running.insert(workspace_id.clone());
        Ok(machines)
    }

    fn stop(&self, workspace_id: &WorkspaceId) -> Result<(), EngineError> {
        *self
            .lock_state()
            .stops
            .entry(workspace_id.clone())
            .or_insert(0) += 1;

        if let Some(delay) = self.stop_delay {
            std::thread::sleep(delay);
        }
        assert!(
            !self.stop_panics,
            "mock engine stop panicked for workspace '{workspace_id}'"
        );
        if let Some(message) = &self.stop_failure {
            return Err(EngineError::Server(message.clone()));
        }

        if self.lock_state().running.remove(workspace_id) {
            Ok(())
        } else {
            Err(EngineError::NotRunning(workspace_id.to_string()))
        }
    }
}
