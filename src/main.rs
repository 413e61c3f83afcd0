use std::sync::Arc;

use anyhow::{bail, Context};
use eyeonwater::config_flow::{ConfigFlow, FlowResult, SessionAuthenticator};
use eyeonwater::constants::{CONFIG_ENTRIES_FILE, RESTORE_STATE_FILE, RESTORE_STATE_SAVE_INTERVAL};
use eyeonwater::entity::{CoordinatorEntity, StateWriter};
use eyeonwater::{eow, ConfigEntries, ConfigEntry, EyeOnWaterIntegration, JsonRestoreStore, Settings};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting EyeOnWater bridge");
    let settings = Settings::from_env()?;
    let session = eow::build_session()?;

    let entries_path = settings.state_dir.join(CONFIG_ENTRIES_FILE);
    let mut entries = ConfigEntries::load(&entries_path)?;
    let entry = match entries.get_by_unique_id(&settings.username) {
        Some(entry) => entry.clone(),
        None => {
            let entry = configure(&settings, &session, &mut entries).await?;
            entries.save(&entries_path)?;
            entry
        }
    };

    let integration =
        EyeOnWaterIntegration::setup(entry, session, settings.base_url.clone(), settings.scan_interval)
            .await
            .context("Failed to set up EyeOnWater")?;

    let restore_path = settings.state_dir.join(RESTORE_STATE_FILE);
    let restore = Arc::new(JsonRestoreStore::load(&restore_path)?);

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    let writer: Arc<dyn StateWriter> = Arc::new(state_tx);
    let entities = integration.entities();
    for entity in &entities {
        entity.clone().attach(writer.clone(), restore.as_ref());
    }
    info!(count = entities.len(), "Entities added");

    let poller = integration.coordinator.clone().spawn();
    let autosave = restore
        .clone()
        .spawn_autosave(restore_path.clone(), RESTORE_STATE_SAVE_INTERVAL);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(state) = state_rx.recv() => {
                info!(entity = %state.name, unique_id = %state.unique_id, state = %state.state, "State changed");
                restore.record(&state);
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    poller.abort();
    autosave.abort();
    for entity in &entities {
        entity.detach();
    }
    while let Ok(state) = state_rx.try_recv() {
        restore.record(&state);
    }
    if let Err(e) = restore.save(&restore_path) {
        warn!("Failed to save restore state: {e}");
    }
    Ok(())
}

/// Resolves on ctrl-c, or on SIGTERM where there is one
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

/// Runs the config flow for the credentials in the environment
async fn configure(
    settings: &Settings,
    session: &reqwest::Client,
    entries: &mut ConfigEntries,
) -> anyhow::Result<ConfigEntry> {
    let authenticator =
        SessionAuthenticator::new(session.clone()).with_base_url(settings.base_url.clone());
    let mut flow = ConfigFlow::new(&authenticator, entries);

    match flow.step_user(Some(settings.user_input())).await {
        FlowResult::CreateEntry { title, .. } => {
            info!("Created config entry for {title}");
        }
        FlowResult::Form { errors, .. } => {
            bail!("Account validation failed: {errors:?}");
        }
        FlowResult::Abort { reason } => {
            bail!("Account setup aborted: {reason}");
        }
    }

    entries
        .get_by_unique_id(&settings.username)
        .cloned()
        .context("Config entry missing after creation")
}
