//! Leak and empty-pipe flag sensors for each meter

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::coordinator::DataUpdateCoordinator;
use crate::entity::{
    Attachment, CoordinatorEntity, DeviceInfo, EntityState, StateWriter, STATE_OFF, STATE_ON,
    STATE_UNAVAILABLE,
};
use crate::eow::Meter;
use crate::restore_state::RestoreStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySensorDeviceClass {
    Moisture,
    Problem,
}

impl BinarySensorDeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moisture => "moisture",
            Self::Problem => "problem",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySensorEntityDescription {
    /// Flag name as reported by the meter
    pub key: &'static str,
    pub name: &'static str,
    pub device_class: BinarySensorDeviceClass,
}

pub const FLAG_SENSORS: &[BinarySensorEntityDescription] = &[
    BinarySensorEntityDescription {
        key: "Leak",
        name: "Leak Sensor",
        device_class: BinarySensorDeviceClass::Moisture,
    },
    BinarySensorEntityDescription {
        key: "EmptyPipe",
        name: "Empty Pipe",
        device_class: BinarySensorDeviceClass::Problem,
    },
];

/// Builds one flag sensor per meter and descriptor and hands them to the host in one batch
pub fn setup_entry<F>(
    meters: &[Arc<Meter>],
    coordinator: &Arc<DataUpdateCoordinator>,
    add_entities: F,
) where
    F: FnOnce(Vec<Arc<EyeOnWaterBinarySensor>>, bool),
{
    let sensors = meters
        .iter()
        .flat_map(|meter| {
            FLAG_SENSORS.iter().map(move |description| {
                Arc::new(EyeOnWaterBinarySensor::new(
                    meter.clone(),
                    coordinator.clone(),
                    description.clone(),
                ))
            })
        })
        .collect();

    add_entities(sensors, false);
}

#[derive(Debug, Default)]
struct FlagState {
    state: Option<Value>,
    available: bool,
}

/// A boolean flag of one meter, such as a detected leak
pub struct EyeOnWaterBinarySensor {
    meter: Arc<Meter>,
    coordinator: Arc<DataUpdateCoordinator>,
    entity_description: BinarySensorEntityDescription,
    unique_id: String,
    device_info: DeviceInfo,
    state: Mutex<FlagState>,
    attachment: Mutex<Option<Attachment>>,
}

impl EyeOnWaterBinarySensor {
    pub fn new(
        meter: Arc<Meter>,
        coordinator: Arc<DataUpdateCoordinator>,
        description: BinarySensorEntityDescription,
    ) -> Self {
        let unique_id = format!("{}_{}", description.key, meter.meter_uuid());
        let device_info = DeviceInfo::for_meter(meter.meter_uuid(), &meter.meter_id());
        Self {
            meter,
            coordinator,
            entity_description: description,
            unique_id,
            device_info,
            state: Mutex::new(FlagState::default()),
            attachment: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.entity_description.name
    }

    pub fn device_class(&self) -> BinarySensorDeviceClass {
        self.entity_description.device_class
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// On only when the flag value is exactly boolean `true`
    pub fn is_on(&self) -> bool {
        matches!(self.lock_state().state, Some(Value::Bool(true)))
    }

    pub fn available(&self) -> bool {
        self.lock_state().available
    }

    /// Called after each coordinator refresh
    fn handle_coordinator_update(&self) {
        self.read_coordinator_data();
        self.write_ha_state();
    }

    fn read_coordinator_data(&self) {
        let mut state = self.lock_state();
        state.available = self.coordinator.last_update_success();
        if state.available {
            state.state = self.meter.get_flags(self.entity_description.key);
        }
    }

    fn write_ha_state(&self) {
        let writer = self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Attachment::writer);
        if let Some(writer) = writer {
            writer.write_state(self.entity_state());
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FlagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CoordinatorEntity for EyeOnWaterBinarySensor {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn entity_state(&self) -> EntityState {
        let state = match (self.available(), self.is_on()) {
            (false, _) => STATE_UNAVAILABLE,
            (true, true) => STATE_ON,
            (true, false) => STATE_OFF,
        };
        let mut attributes = Map::new();
        attributes.insert("device_class".into(), self.device_class().as_str().into());
        attributes.insert("device".into(), self.device_info.name.clone().into());
        EntityState {
            unique_id: self.unique_id.clone(),
            name: format!("{} {}", self.device_info.name, self.name()),
            state: Value::from(state),
            attributes,
        }
    }

    fn attach(self: Arc<Self>, writer: Arc<dyn StateWriter>, restore: &dyn RestoreStateStore) {
        let weak = Arc::downgrade(&self);
        let listener = self.coordinator.add_listener(move || {
            if let Some(sensor) = weak.upgrade() {
                sensor.handle_coordinator_update();
            }
        });
        let previous = self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Attachment::new(self.coordinator.clone(), listener, writer));
        if let Some(previous) = previous {
            previous.release();
        }

        // Live data beats whatever the previous run left behind
        if self.coordinator.last_update_success() {
            self.read_coordinator_data();
        } else if let Some(last_state) = restore.last_state(&self.unique_id) {
            let mut state = self.lock_state();
            state.state = Some(last_state.state);
            state.available = true;
        }

        self.write_ha_state();
    }

    fn detach(&self) {
        let attachment = self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(attachment) = attachment {
            attachment.release();
        }
    }
}
