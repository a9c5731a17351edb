use crate::concurrency::StripedLocks;
use crate::config::RuntimesConfig;
use crate::descriptor::{RuntimeDescriptor, WorkspaceRuntime};
use crate::events::{EventService, EventSubscriber, MachineLogger, SubscriptionId};
use crate::lifecycle::WorkspaceStatus;
use crate::pool::StopPool;
use crate::CoreError;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tessera_runtime::{EngineRegistry, EnvironmentEngine};
use tessera_schema::{
    Machine, MachineEventType, MachineId, MachineStatusEvent, Workspace, WorkspaceEventType,
    WorkspaceId, WorkspaceStatusEvent,
};
use tracing::{debug, error, info, warn};

type Descriptors = HashMap<WorkspaceId, RuntimeDescriptor>;

/// Outcome of [`WorkspaceRuntimes::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Environment stops handed to the stop pool.
    pub scheduled: usize,
    /// Scheduled stops that ran to completion, successfully or not.
    pub completed: usize,
    /// The graceful timeout elapsed with stops still running.
    pub timed_out: bool,
}

/// Registry of workspace runtimes.
///
/// Owns one [`RuntimeDescriptor`] per starting, running or stopping
/// workspace and drives each through `STARTING -> RUNNING -> STOPPING`.
/// Descriptor mutations happen under the stripe lock of the workspace id;
/// engine calls and event publication happen outside every lock.
///
/// Every descriptor handed out is a copy. A workspace with no descriptor is
/// stopped.
pub struct WorkspaceRuntimes {
    descriptors: StripedLocks<Descriptors>,
    engines: EngineRegistry,
    events: Arc<EventService>,
    config: RuntimesConfig,
    shutting_down: AtomicBool,
    machine_subscription: Mutex<Option<SubscriptionId>>,
}

impl WorkspaceRuntimes {
    /// Create a registry with the default configuration.
    pub fn new(events: Arc<EventService>, engines: EngineRegistry) -> Arc<Self> {
        Self::build(events, engines, RuntimesConfig::default())
    }

    pub fn with_config(
        events: Arc<EventService>,
        engines: EngineRegistry,
        config: RuntimesConfig,
    ) -> Result<Arc<Self>, CoreError> {
        config.validate()?;
        Ok(Self::build(events, engines, config))
    }

    fn build(events: Arc<EventService>, engines: EngineRegistry, config: RuntimesConfig) -> Arc<Self> {
        debug!(
            "creating workspace runtimes with {} stripes and engines {:?}",
            config.stripes,
            engines.types()
        );
        let runtimes = Arc::new(Self {
            descriptors: StripedLocks::new(config.stripes),
            engines,
            events,
            config,
            shutting_down: AtomicBool::new(false),
            machine_subscription: Mutex::new(None),
        });

        let subscriber = Arc::new(RemoveMachineSubscriber {
            runtimes: Arc::downgrade(&runtimes),
        });
        let id = runtimes.events.machine_events().subscribe(subscriber);
        *runtimes
            .machine_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);
        runtimes
    }

    pub fn config(&self) -> &RuntimesConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventService> {
        &self.events
    }

    /// Copy of the descriptor of a starting, running or stopping workspace.
    pub fn get(&self, workspace_id: &WorkspaceId) -> Result<RuntimeDescriptor, CoreError> {
        self.descriptors
            .acquire_read(workspace_id)
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| not_running(workspace_id))
    }

    /// Whether the workspace has a descriptor in any status.
    pub fn has_runtime(&self, workspace_id: &WorkspaceId) -> bool {
        self.descriptors
            .acquire_read(workspace_id)
            .contains_key(workspace_id)
    }

    /// Number of registered descriptors, counted one stripe at a time.
    pub fn runtime_count(&self) -> usize {
        let mut count = 0;
        self.descriptors.for_each_stripe(|shard| count += shard.len());
        count
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Start the machines of environment `env_name` of `workspace`.
    ///
    /// Blocks for as long as the engine provisions the environment; the
    /// descriptor is visible as `STARTING` meanwhile. Returns a copy of the
    /// `RUNNING` descriptor.
    ///
    /// If the engine fails, or returns anything other than exactly one dev
    /// machine, an `ERROR` event is published and a server error returned.
    /// The `STARTING` descriptor is left in place in that case; only
    /// [`shutdown`](Self::shutdown) clears it.
    pub fn start(
        &self,
        workspace: &Workspace,
        env_name: &str,
        recover: bool,
    ) -> Result<RuntimeDescriptor, CoreError> {
        let workspace_id = &workspace.id;
        let environment = workspace
            .config
            .environment(env_name)
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!(
                    "workspace '{workspace_id}' doesn't contain environment '{env_name}'"
                ))
            })?
            .clone();

        let engine = self.engines.get(environment.env_type()).ok_or_else(|| {
            CoreError::NotFound(format!(
                "environment engine of type '{}' is not found",
                environment.env_type()
            ))
        })?;

        self.ensure_not_shutting_down()?;
        {
            let mut shard = self.descriptors.acquire_write(workspace_id);
            self.ensure_not_shutting_down()?;
            if let Some(existing) = shard.get(workspace_id) {
                return Err(CoreError::Conflict(format!(
                    "could not start workspace '{}' because its status is '{}'",
                    workspace.config.name,
                    existing.status()
                )));
            }
            let runtime = WorkspaceRuntime::new(env_name, environment.env_type());
            shard.insert(workspace_id.clone(), RuntimeDescriptor::starting(runtime)?);
        }

        self.ensure_not_shutting_down()?;
        info!("starting workspace '{workspace_id}' with environment '{env_name}'");
        self.publish(WorkspaceEventType::Starting, workspace_id, None);

        let start_error = match engine.start(workspace_id, &environment, recover) {
            Ok(machines) => {
                let dev_count = machines.iter().filter(|m| m.is_dev()).count();
                let dev_machine = machines.iter().find(|m| m.is_dev()).cloned();
                if let (1, Some(dev_machine)) = (dev_count, dev_machine) {
                    return self.complete_start(engine.as_ref(), workspace_id, machines, dev_machine);
                }
                let message = if dev_count == 0 {
                    format!(
                        "environment '{env_name}' has booted but it doesn't contain dev machine, environment has been stopped"
                    )
                } else {
                    format!(
                        "environment '{env_name}' has booted with {dev_count} dev machines, environment has been stopped"
                    )
                };
                if let Err(e) = stop_environment(engine.as_ref(), workspace_id) {
                    error!("failed to stop environment of workspace '{workspace_id}': {e}");
                }
                message
            }
            Err(e) => format!("start of environment '{env_name}' failed: {e}"),
        };

        error!("{start_error}");
        self.publish(WorkspaceEventType::Error, workspace_id, Some(&start_error));
        Err(CoreError::Server(start_error))
    }

    /// [`start`](Self::start) without recovering existing machines.
    pub fn start_new(
        &self,
        workspace: &Workspace,
        env_name: &str,
    ) -> Result<RuntimeDescriptor, CoreError> {
        self.start(workspace, env_name, false)
    }

    fn complete_start(
        &self,
        engine: &dyn EnvironmentEngine,
        workspace_id: &WorkspaceId,
        machines: Vec<Machine>,
        dev_machine: Machine,
    ) -> Result<RuntimeDescriptor, CoreError> {
        let attached = {
            let mut shard = self.descriptors.acquire_write(workspace_id);
            match shard.get_mut(workspace_id) {
                Some(descriptor) => {
                    descriptor.set_status(WorkspaceStatus::Running)?;
                    descriptor.runtime_mut().attach_machines(machines, dev_machine);
                    true
                }
                None => false,
            }
        };

        if !attached {
            // The shutdown sweep removed the descriptor while the engine was
            // provisioning; its stop may have run before the machines existed.
            let message = format!(
                "workspace '{workspace_id}' was stopped while its environment was starting"
            );
            if let Err(e) = stop_environment(engine, workspace_id) {
                debug!("stop after interrupted start of '{workspace_id}' failed: {e}");
            }
            warn!("{message}");
            self.publish(WorkspaceEventType::Error, workspace_id, Some(&message));
            return Err(CoreError::Server(message));
        }

        info!("workspace '{workspace_id}' is running");
        self.publish(WorkspaceEventType::Running, workspace_id, None);
        self.get(workspace_id)
    }

    /// Stop a running workspace.
    ///
    /// The descriptor is `STOPPING` while the engine works and is removed
    /// afterwards whatever the engine reports. Engine failures, panics
    /// included, are published as an `ERROR` event and not returned.
    pub fn stop(&self, workspace_id: &WorkspaceId) -> Result<(), CoreError> {
        self.ensure_not_shutting_down()?;
        let runtime = {
            let mut shard = self.descriptors.acquire_write(workspace_id);
            self.ensure_not_shutting_down()?;
            let descriptor = shard
                .get_mut(workspace_id)
                .ok_or_else(|| not_running(workspace_id))?;
            if descriptor.status() != WorkspaceStatus::Running {
                return Err(CoreError::Conflict(format!(
                    "couldn't stop '{workspace_id}' workspace because its status is '{}', workspace can be stopped only if it is 'RUNNING'",
                    descriptor.status()
                )));
            }
            descriptor.set_status(WorkspaceStatus::Stopping)?;
            descriptor.runtime().clone()
        };

        let Some(engine) = self.engines.get(runtime.env_type()) else {
            let message = format!(
                "can't stop workspace '{workspace_id}', engine of type '{}' not found",
                runtime.env_type()
            );
            error!("{message}");
            self.publish(WorkspaceEventType::Error, workspace_id, Some(&message));
            self.remove_descriptor(workspace_id);
            return Err(CoreError::Server(message));
        };

        info!("stopping workspace '{workspace_id}'");
        self.publish(WorkspaceEventType::Stopping, workspace_id, None);
        match stop_environment(engine.as_ref(), workspace_id) {
            Ok(()) => {
                info!("workspace '{workspace_id}' stopped");
                self.publish(WorkspaceEventType::Stopped, workspace_id, None);
            }
            Err(e) => {
                warn!("failed to stop environment of workspace '{workspace_id}': {e}");
                self.publish(WorkspaceEventType::Error, workspace_id, Some(&e));
            }
        }
        self.remove_descriptor(workspace_id);
        Ok(())
    }

    /// Drop machine `machine_name` from a running workspace's runtime.
    ///
    /// Does nothing unless the workspace is `RUNNING`. A machine that is not
    /// in the runtime is logged and otherwise ignored.
    pub fn remove_machine(
        &self,
        machine_id: &MachineId,
        machine_name: &str,
        workspace_id: &WorkspaceId,
    ) {
        let mut shard = self.descriptors.acquire_write(workspace_id);
        let Some(descriptor) = shard.get_mut(workspace_id) else {
            return;
        };
        if descriptor.status() != WorkspaceStatus::Running {
            return;
        }
        if descriptor.runtime_mut().remove_machine(machine_name) {
            debug!("removed machine '{machine_name}' ({machine_id}) from workspace '{workspace_id}'");
        } else {
            warn!(
                "an attempt to remove machine '{machine_name}' ({machine_id}) from workspace '{workspace_id}' runtime failed, the machine is not part of the runtime"
            );
        }
    }

    /// Line sink publishing output of `machine_name` on the machine-log channel.
    pub fn machine_logger(&self, workspace_id: &WorkspaceId, machine_name: &str) -> MachineLogger {
        MachineLogger::new(Arc::clone(&self.events), workspace_id.clone(), machine_name)
    }

    /// Stop every starting or running environment and clear the registry.
    ///
    /// From the first call on, `start` and `stop` fail with a server error.
    /// Stops run on a bounded pool; the call waits for them up to the
    /// graceful timeout. Stops still queued then get a thread each, so every
    /// scheduled stop has been invoked before the wait up to the forced
    /// timeout. Later calls return an empty report.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("workspace runtimes already shut down");
            return ShutdownReport::default();
        }
        info!("shutting down workspace runtimes");
        self.unsubscribe_machine_events();

        let mut pool = StopPool::new(self.config.shutdown.pool_size());
        let completed = Arc::new(AtomicUsize::new(0));
        let mut scheduled = 0;
        {
            let mut all = self.descriptors.acquire_write_all();
            for shard in all.shards_mut() {
                for (workspace_id, descriptor) in shard.drain() {
                    if !matches!(
                        descriptor.status(),
                        WorkspaceStatus::Starting | WorkspaceStatus::Running
                    ) {
                        continue;
                    }
                    let env_type = descriptor.runtime().env_type();
                    let Some(engine) = self.engines.get(env_type) else {
                        error!("can't stop workspace '{workspace_id}', engine of type '{env_type}' not found");
                        continue;
                    };

                    let events = Arc::clone(&self.events);
                    let completed = Arc::clone(&completed);
                    let label = workspace_id.clone();
                    let job = move || {
                        if let Err(e) = stop_environment(engine.as_ref(), &workspace_id) {
                            error!("failed to stop environment of workspace '{workspace_id}': {e}");
                            events.workspace_events().publish(
                                &WorkspaceStatusEvent::new(WorkspaceEventType::Error, workspace_id)
                                    .with_error(e),
                            );
                        }
                        completed.fetch_add(1, Ordering::SeqCst);
                    };
                    match pool.execute(job) {
                        Ok(()) => scheduled += 1,
                        Err(e) => error!("could not schedule stop of workspace '{label}': {e}"),
                    }
                }
            }
            pool.shutdown();
        }
        info!("scheduled {scheduled} environment stops");

        let mut report = ShutdownReport {
            scheduled,
            ..ShutdownReport::default()
        };
        let graceful = self.config.shutdown.graceful_timeout();
        let forced = self.config.shutdown.forced_timeout();
        if !pool.await_termination(graceful) {
            report.timed_out = true;
            let spilled = pool.spill_queued();
            warn!(
                "{} environment stops still running after {graceful:?}, {spilled} queued stops moved off the pool",
                pool.pending()
            );
            if !pool.await_termination(forced) {
                warn!(
                    "unable to terminate stop pool, {} environment stops still pending",
                    pool.pending()
                );
            }
        }
        report.completed = completed.load(Ordering::SeqCst);
        info!(
            "workspace runtimes shut down, {}/{} environment stops completed",
            report.completed, report.scheduled
        );
        report
    }

    fn ensure_not_shutting_down(&self) -> Result<(), CoreError> {
        if self.is_shutting_down() {
            return Err(CoreError::Server(
                "could not perform operation because application server is stopping".to_owned(),
            ));
        }
        Ok(())
    }

    /// Drop the descriptor of a stopped workspace; it is removed even if
    /// it was not `STOPPING`.
    fn remove_descriptor(&self, workspace_id: &WorkspaceId) {
        let removed = self
            .descriptors
            .acquire_write(workspace_id)
            .remove(workspace_id);
        match removed.map(RuntimeDescriptor::finish_stop) {
            Some(Ok(runtime)) => debug!(
                "released runtime of workspace '{workspace_id}' with {} machines",
                runtime.machines().len()
            ),
            Some(Err(e)) => error!("removed descriptor of workspace '{workspace_id}': {e}"),
            None => {}
        }
    }

    fn publish(&self, event_type: WorkspaceEventType, workspace_id: &WorkspaceId, error: Option<&str>) {
        let mut event = WorkspaceStatusEvent::new(event_type, workspace_id.clone());
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.events.workspace_events().publish(&event);
    }

    fn unsubscribe_machine_events(&self) {
        let id = self
            .machine_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.events.machine_events().unsubscribe(id);
        }
    }
}

impl Drop for WorkspaceRuntimes {
    fn drop(&mut self) {
        self.unsubscribe_machine_events();
    }
}

/// Drops destroyed non-dev machines from running runtimes.
///
/// A destroyed dev machine takes the whole workspace down, which is the
/// engine's business rather than the registry's.
struct RemoveMachineSubscriber {
    runtimes: Weak<WorkspaceRuntimes>,
}

impl EventSubscriber<MachineStatusEvent> for RemoveMachineSubscriber {
    fn on_event(&self, event: &MachineStatusEvent) {
        if event.event_type != MachineEventType::Destroyed || event.dev {
            return;
        }
        if let Some(runtimes) = self.runtimes.upgrade() {
            runtimes.remove_machine(&event.machine_id, &event.machine_name, &event.workspace_id);
        }
    }
}

fn not_running(workspace_id: &WorkspaceId) -> CoreError {
    CoreError::NotFound(format!("workspace with id '{workspace_id}' is not running"))
}

/// Run `engine.stop`, turning both errors and panics into a message.
fn stop_environment(engine: &dyn EnvironmentEngine, workspace_id: &WorkspaceId) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| engine.stop(workspace_id))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!(
            "environment engine panicked while stopping: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
