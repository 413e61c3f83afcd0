use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::binary_sensor;
use crate::config_entries::ConfigEntry;
use crate::config_flow::create_account_from_config;
use crate::constants::DOMAIN;
use crate::coordinator::DataUpdateCoordinator;
use crate::entity::CoordinatorEntity;
use crate::eow::{Client, Meter};
use crate::sensor;

/// Everything set up for one config entry
pub struct EyeOnWaterIntegration {
    pub entry: ConfigEntry,
    pub client: Arc<Client>,
    pub meters: Vec<Arc<Meter>>,
    pub coordinator: Arc<DataUpdateCoordinator>,
}

impl EyeOnWaterIntegration {
    /// Signs in, discovers the account's meters, and prepares the coordinator.
    /// The coordinator is not started.
    pub async fn setup(
        entry: ConfigEntry,
        session: reqwest::Client,
        base_url: Option<String>,
        scan_interval: Duration,
    ) -> anyhow::Result<Self> {
        let mut account = create_account_from_config(&entry.data)?;
        if let Some(base_url) = base_url {
            account = account.with_base_url(base_url);
        }
        let client = Arc::new(Client::new(session, account));
        client.authenticate().await?;

        let meters = client.discover_meters().await?;
        info!(count = meters.len(), account = %entry.title, "Discovered EyeOnWater meters");

        let coordinator = {
            let client = client.clone();
            let meters = meters.clone();
            Arc::new(DataUpdateCoordinator::new(DOMAIN, scan_interval, move || {
                let client = client.clone();
                let meters = meters.clone();
                async move {
                    for meter in &meters {
                        client.read_meter(meter).await?;
                    }
                    Ok(())
                }
            }))
        };

        Ok(Self {
            entry,
            client,
            meters,
            coordinator,
        })
    }

    /// Flag sensors followed by the usage sensors, one set per meter
    pub fn entities(&self) -> Vec<Arc<dyn CoordinatorEntity>> {
        let mut entities: Vec<Arc<dyn CoordinatorEntity>> = Vec::new();
        binary_sensor::setup_entry(&self.meters, &self.coordinator, |sensors, _| {
            entities.extend(sensors.into_iter().map(|s| s as Arc<dyn CoordinatorEntity>));
        });
        sensor::setup_entry(
            &self.meters,
            &self.coordinator,
            self.client.account().metric_measurement_system,
            |sensors, _| {
                entities.extend(sensors.into_iter().map(|s| s as Arc<dyn CoordinatorEntity>));
            },
        );
        entities
    }
}
