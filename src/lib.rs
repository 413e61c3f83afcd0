//! EyeOnWater Library
//!
//! This library exposes EyeOnWater water meter readings and leak/empty-pipe flags
//! as sensor entities, refreshed by a shared polling coordinator, and provides the
//! config flow that validates account credentials before an entry is persisted.

pub mod binary_sensor;
pub mod config_entries;
pub mod config_flow;
pub mod constants;
pub mod coordinator;
pub mod entity;
pub mod eow;
pub mod integration;
pub mod restore_state;
pub mod sensor;
pub mod settings;
mod storage;

// Re-export commonly used types for easier access
pub use binary_sensor::{EyeOnWaterBinarySensor, FLAG_SENSORS};
pub use config_entries::{ConfigEntries, ConfigEntry};
pub use config_flow::{ConfigFlow, FlowResult, UserInput, ValidationError};
pub use coordinator::DataUpdateCoordinator;
pub use entity::{CoordinatorEntity, EntityState, StateWriter};
pub use eow::{Account, Client, Meter};
pub use integration::EyeOnWaterIntegration;
pub use restore_state::{JsonRestoreStore, RestoreStateStore};
pub use sensor::EyeOnWaterSensor;
pub use settings::Settings;
pub use storage::StorageError;
