//! In-process publish/subscribe service for lifecycle notifications.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tessera_schema::{MachineLogMessage, MachineStatusEvent, WorkspaceId, WorkspaceStatusEvent};
use tracing::{debug, error};

pub trait EventSubscriber<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventSubscriber<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscribers<E> = Vec<(SubscriptionId, Arc<dyn EventSubscriber<E>>)>;

/// Typed channel with fire-and-forget publication.
///
/// Subscribers run on the publishing thread, outside the channel's lock, so
/// they may subscribe or unsubscribe from within `on_event`. A panicking
/// subscriber is logged and skipped.
pub struct EventChannel<E> {
    subscribers: RwLock<Subscribers<E>>,
    next_id: AtomicU64,
}

impl<E> Default for EventChannel<E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> EventChannel<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber<E>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        debug!("subscriber {} added", id.0);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Arc<dyn EventSubscriber<E>>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();

        for subscriber in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))).is_err() {
                error!("event subscriber panicked; continuing with remaining subscribers");
            }
        }
    }
}

/// Process-wide bus with one channel per event type.
#[derive(Default)]
pub struct EventService {
    workspace: EventChannel<WorkspaceStatusEvent>,
    machine: EventChannel<MachineStatusEvent>,
    machine_logs: EventChannel<MachineLogMessage>,
}

impl EventService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn workspace_events(&self) -> &EventChannel<WorkspaceStatusEvent> {
        &self.workspace
    }

    pub fn machine_events(&self) -> &EventChannel<MachineStatusEvent> {
        &self.machine
    }

    pub fn machine_logs(&self) -> &EventChannel<MachineLogMessage> {
        &self.machine_logs
    }
}

/// Line sink that publishes a machine's output on the machine-log channel.
#[derive(Clone)]
pub struct MachineLogger {
    events: Arc<EventService>,
    workspace_id: WorkspaceId,
    machine_name: String,
}

impl MachineLogger {
    pub fn new(events: Arc<EventService>, workspace_id: WorkspaceId, machine_name: &str) -> Self {
        Self {
            events,
            workspace_id,
            machine_name: machine_name.to_owned(),
        }
    }

    pub fn write_line(&self, line: &str) {
        self.events.machine_logs().publish(&MachineLogMessage {
            workspace_id: self.workspace_id.clone(),
            machine_name: self.machine_name.clone(),
            content: line.to_owned(),
        });
    }
}
