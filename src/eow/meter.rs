use serde_json::{Map, Value};
use std::sync::{PoisonError, RwLock};

/// Latest cumulative register read for a meter
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReading {
    pub full_read: f64,
    pub units: Option<String>,
}

#[derive(Debug, Default)]
struct MeterData {
    meter_info: Map<String, Value>,
    flags: Map<String, Value>,
    reading: Option<MeterReading>,
}

/// A water meter attached to an EyeOnWater account.
///
/// The client owns the data and refreshes it in place; entities only read it.
#[derive(Debug)]
pub struct Meter {
    meter_uuid: String,
    data: RwLock<MeterData>,
}

impl Meter {
    pub fn new(meter_uuid: impl Into<String>, meter_info: Map<String, Value>) -> Self {
        Self {
            meter_uuid: meter_uuid.into(),
            data: RwLock::new(MeterData {
                meter_info,
                ..Default::default()
            }),
        }
    }

    pub fn meter_uuid(&self) -> &str {
        &self.meter_uuid
    }

    pub fn meter_info(&self) -> Map<String, Value> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .meter_info
            .clone()
    }

    /// The reading-point id shown to users, falling back to the UUID
    pub fn meter_id(&self) -> String {
        match self.meter_info().get("meter_id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => self.meter_uuid.clone(),
        }
    }

    /// Current value of a named flag such as `Leak` or `EmptyPipe`
    pub fn get_flags(&self, flag: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .flags
            .get(flag)
            .cloned()
    }

    pub fn reading(&self) -> Option<MeterReading> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reading
            .clone()
    }

    pub(crate) fn update(
        &self,
        meter_info: Map<String, Value>,
        flags: Map<String, Value>,
        reading: Option<MeterReading>,
    ) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.meter_info.extend(meter_info);
        data.flags = flags;
        if reading.is_some() {
            data.reading = reading;
        }
    }
}
