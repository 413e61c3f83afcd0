use std::time::Duration;

pub const DOMAIN: &str = "eyeonwater";
pub const MANUFACTURER: &str = "EyeOnWater";

/// How often the coordinator polls the EyeOnWater API
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub const CONFIG_ENTRIES_FILE: &str = "config_entries.json";
pub const RESTORE_STATE_FILE: &str = "restore_state.json";

/// How often unsaved restore state is flushed to disk
pub const RESTORE_STATE_SAVE_INTERVAL: Duration = Duration::from_secs(60);
