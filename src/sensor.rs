//! Cumulative water usage sensor for each meter

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::coordinator::DataUpdateCoordinator;
use crate::entity::{
    Attachment, CoordinatorEntity, DeviceInfo, EntityState, StateWriter, STATE_UNAVAILABLE,
    STATE_UNKNOWN,
};
use crate::eow::Meter;
use crate::restore_state::RestoreStateStore;

pub const UNIT_GALLONS: &str = "gal";
pub const UNIT_CUBIC_METERS: &str = "m³";

pub fn setup_entry<F>(
    meters: &[Arc<Meter>],
    coordinator: &Arc<DataUpdateCoordinator>,
    metric_measurement_system: bool,
    add_entities: F,
) where
    F: FnOnce(Vec<Arc<EyeOnWaterSensor>>, bool),
{
    let sensors = meters
        .iter()
        .map(|meter| {
            Arc::new(EyeOnWaterSensor::new(
                meter.clone(),
                coordinator.clone(),
                metric_measurement_system,
            ))
        })
        .collect();
    add_entities(sensors, false);
}

#[derive(Debug, Default)]
struct ReadingState {
    value: Option<f64>,
    available: bool,
}

/// Latest total volume read from a meter
pub struct EyeOnWaterSensor {
    meter: Arc<Meter>,
    coordinator: Arc<DataUpdateCoordinator>,
    unique_id: String,
    device_info: DeviceInfo,
    unit: &'static str,
    state: Mutex<ReadingState>,
    attachment: Mutex<Option<Attachment>>,
}

impl EyeOnWaterSensor {
    pub fn new(
        meter: Arc<Meter>,
        coordinator: Arc<DataUpdateCoordinator>,
        metric_measurement_system: bool,
    ) -> Self {
        let unique_id = meter.meter_uuid().to_string();
        let device_info = DeviceInfo::for_meter(meter.meter_uuid(), &meter.meter_id());
        let unit = if metric_measurement_system {
            UNIT_CUBIC_METERS
        } else {
            UNIT_GALLONS
        };
        Self {
            meter,
            coordinator,
            unique_id,
            device_info,
            unit,
            state: Mutex::new(ReadingState::default()),
            attachment: Mutex::new(None),
        }
    }

    pub fn native_value(&self) -> Option<f64> {
        self.lock_state().value
    }

    pub fn native_unit_of_measurement(&self) -> &'static str {
        self.unit
    }

    pub fn available(&self) -> bool {
        self.lock_state().available
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn handle_coordinator_update(&self) {
        self.read_coordinator_data();
        self.write_ha_state();
    }

    fn read_coordinator_data(&self) {
        let mut state = self.lock_state();
        state.available = self.coordinator.last_update_success();
        if state.available {
            if let Some(reading) = self.meter.reading() {
                state.value = Some(reading.full_read);
            }
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

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReadingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts numbers and numeric strings, the two shapes a persisted reading can take
fn restored_reading(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl CoordinatorEntity for EyeOnWaterSensor {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn entity_state(&self) -> EntityState {
        let (available, value) = {
            let state = self.lock_state();
            (state.available, state.value)
        };
        let state = match (available, value) {
            (false, _) => Value::from(STATE_UNAVAILABLE),
            (true, Some(value)) => Value::from(value),
            (true, None) => Value::from(STATE_UNKNOWN),
        };
        let mut attributes = Map::new();
        attributes.insert("device_class".into(), "water".into());
        attributes.insert("state_class".into(), "total_increasing".into());
        attributes.insert("unit_of_measurement".into(), self.unit.into());
        EntityState {
            unique_id: self.unique_id.clone(),
            name: self.device_info.name.clone(),
            state,
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

        if self.coordinator.last_update_success() {
            self.read_coordinator_data();
        } else if let Some(value) = restore
            .last_state(&self.unique_id)
            .and_then(|last| restored_reading(&last.state))
        {
            let mut state = self.lock_state();
            state.value = Some(value);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::test_support::RecordingWriter;
    use crate::eow::{self, MeterReading};
    use crate::restore_state::JsonRestoreStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn meter() -> Arc<Meter> {
        let info = json!({"meter_id": "200024940"}).as_object().cloned().unwrap();
        Arc::new(Meter::new("uuid-1", info))
    }

    fn coordinator(should_fail: Arc<AtomicBool>) -> Arc<DataUpdateCoordinator> {
        Arc::new(DataUpdateCoordinator::new("test", Duration::from_secs(60), move || {
            let should_fail = should_fail.clone();
            async move {
                if should_fail.load(Ordering::Relaxed) {
                    Err(eow::Error::Api("down".to_string()))
                } else {
                    Ok(())
                }
            }
        }))
    }

    #[test]
    fn test_unit_follows_measurement_system() {
        let coordinator = coordinator(Arc::new(AtomicBool::new(false)));
        let imperial = EyeOnWaterSensor::new(meter(), coordinator.clone(), false);
        let metric = EyeOnWaterSensor::new(meter(), coordinator, true);

        assert_eq!(imperial.native_unit_of_measurement(), "gal");
        assert_eq!(metric.native_unit_of_measurement(), "m³");
        assert_eq!(imperial.unique_id(), "uuid-1");
        assert_eq!(imperial.device_info().name, "Water Meter 200024940");
    }

    #[tokio::test]
    async fn test_refresh_publishes_latest_reading() {
        let meter = meter();
        let should_fail = Arc::new(AtomicBool::new(false));
        let coordinator = coordinator(should_fail.clone());
        let sensor = Arc::new(EyeOnWaterSensor::new(meter.clone(), coordinator.clone(), false));
        let writer = Arc::new(RecordingWriter::default());
        sensor.clone().attach(writer.clone(), &JsonRestoreStore::new());
        assert_eq!(writer.last().unwrap().state, json!("unavailable"));

        coordinator.refresh().await;
        assert_eq!(writer.last().unwrap().state, json!("unknown"));

        meter.update(
            Map::new(),
            Map::new(),
            Some(MeterReading {
                full_read: 1520.25,
                units: None,
            }),
        );
        coordinator.refresh().await;
        assert_eq!(sensor.native_value(), Some(1520.25));
        assert_eq!(writer.last().unwrap().state, json!(1520.25));

        should_fail.store(true, Ordering::Relaxed);
        coordinator.refresh().await;
        assert!(!sensor.available());
        assert_eq!(sensor.native_value(), Some(1520.25));
    }

    #[test]
    fn test_restore_accepts_only_numeric_values() {
        assert_eq!(restored_reading(&json!(12.5)), Some(12.5));
        assert_eq!(restored_reading(&json!("12.5")), Some(12.5));
        assert_eq!(restored_reading(&json!("unknown")), None);
        assert_eq!(restored_reading(&json!(true)), None);
    }

    #[tokio::test]
    async fn test_restores_reading_before_first_refresh() {
        let coordinator = coordinator(Arc::new(AtomicBool::new(false)));
        let sensor = Arc::new(EyeOnWaterSensor::new(meter(), coordinator, true));
        let restore = JsonRestoreStore::new();
        restore.record(&EntityState {
            unique_id: "uuid-1".to_string(),
            name: String::new(),
            state: json!(88.5),
            attributes: Map::new(),
        });

        sensor.clone().attach(Arc::new(RecordingWriter::default()), &restore);

        assert!(sensor.available());
        assert_eq!(sensor.native_value(), Some(88.5));
    }

    #[tokio::test]
    async fn test_attach_after_refresh_shows_live_reading() {
        let meter = meter();
        meter.update(
            Map::new(),
            Map::new(),
            Some(MeterReading {
                full_read: 42.0,
                units: None,
            }),
        );
        let coordinator = coordinator(Arc::new(AtomicBool::new(false)));
        coordinator.refresh().await;
        let sensor = Arc::new(EyeOnWaterSensor::new(meter, coordinator, false));
        let restore = JsonRestoreStore::new();
        restore.record(&EntityState {
            unique_id: "uuid-1".to_string(),
            name: String::new(),
            state: json!(10.0),
            attributes: Map::new(),
        });
        let writer = Arc::new(RecordingWriter::default());

        sensor.clone().attach(writer.clone(), &restore);

        assert!(sensor.available());
        assert_eq!(sensor.native_value(), Some(42.0));
        assert_eq!(writer.last().unwrap().state, json!(42.0));
    }
}
