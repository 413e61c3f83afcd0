use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::constants::{DOMAIN, MANUFACTURER};
use crate::coordinator::{DataUpdateCoordinator, ListenerId};
use crate::restore_state::RestoreStateStore;

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

/// Groups the entities of one physical meter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
}

impl DeviceInfo {
    pub fn for_meter(meter_uuid: &str, meter_id: &str) -> Self {
        Self {
            identifiers: vec![(DOMAIN.to_string(), meter_uuid.to_string())],
            name: format!("Water Meter {meter_id}"),
            manufacturer: MANUFACTURER.to_string(),
        }
    }
}

/// Snapshot of an entity as written to the host
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub unique_id: String,
    pub name: String,
    pub state: Value,
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn is_available(&self) -> bool {
        self.state != Value::from(STATE_UNAVAILABLE)
    }
}

/// Receives state-changed notifications from entities
pub trait StateWriter: Send + Sync {
    fn write_state(&self, state: EntityState);
}

impl StateWriter for UnboundedSender<EntityState> {
    fn write_state(&self, state: EntityState) {
        if let Err(e) = self.send(state) {
            debug!("Dropping state for {}, host is gone", e.0.unique_id);
        }
    }
}

/// An entity whose state follows a [`DataUpdateCoordinator`]
pub trait CoordinatorEntity: Send + Sync {
    fn unique_id(&self) -> &str;

    fn entity_state(&self) -> EntityState;

    /// Subscribes to the coordinator, restores prior state if no live data has
    /// arrived yet, and writes the initial state
    fn attach(self: Arc<Self>, writer: Arc<dyn StateWriter>, restore: &dyn RestoreStateStore);

    /// Unsubscribes from the coordinator
    fn detach(&self);
}

/// Live subscription of an attached entity
pub(crate) struct Attachment {
    coordinator: Arc<DataUpdateCoordinator>,
    listener: ListenerId,
    writer: Arc<dyn StateWriter>,
}

impl Attachment {
    pub(crate) fn new(
        coordinator: Arc<DataUpdateCoordinator>,
        listener: ListenerId,
        writer: Arc<dyn StateWriter>,
    ) -> Self {
        Self {
            coordinator,
            listener,
            writer,
        }
    }

    pub(crate) fn writer(&self) -> Arc<dyn StateWriter> {
        self.writer.clone()
    }

    pub(crate) fn release(self) {
        self.coordinator.remove_listener(self.listener);
    }
}
