use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::eow;

pub type UpdateFuture = Pin<Box<dyn Future<Output = Result<(), eow::Error>> + Send>>;
type UpdateMethod = Box<dyn Fn() -> UpdateFuture + Send + Sync>;
type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`DataUpdateCoordinator::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Periodically fetches fresh meter data and fans the result out to subscribed entities
pub struct DataUpdateCoordinator {
    name: String,
    update_interval: Duration,
    update_method: UpdateMethod,
    status: Mutex<RefreshStatus>,
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_listener_id: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl DataUpdateCoordinator {
    pub fn new<F, Fut>(name: impl Into<String>, update_interval: Duration, update_method: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), eow::Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            update_interval,
            update_method: Box::new(move || Box::pin(update_method()) as UpdateFuture),
            status: Mutex::new(RefreshStatus::Pending),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// True once the most recent refresh succeeded. False before the first refresh.
    pub fn last_update_success(&self) -> bool {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) == RefreshStatus::Succeeded
    }

    /// Registers a callback invoked after every refresh, successful or not
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs the update method once and notifies every listener
    pub async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        let result = (self.update_method)().await;

        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            match &result {
                Ok(()) => {
                    if *status == RefreshStatus::Failed {
                        info!(coordinator = %self.name, "Fetching data recovered");
                    }
                    *status = RefreshStatus::Succeeded;
                }
                Err(e) => {
                    // Only log the first failure in a row
                    if *status != RefreshStatus::Failed {
                        warn!(coordinator = %self.name, error = %e, "Error fetching data");
                    } else {
                        debug!(coordinator = %self.name, error = %e, "Still failing to fetch data");
                    }
                    *status = RefreshStatus::Failed;
                }
            }
        }

        self.notify_listeners();
    }

    fn notify_listeners(&self) {
        // Callbacks may add or remove listeners, so call them outside the lock
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Spawns the polling loop. The first refresh happens immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(
                coordinator = %self.name,
                interval_secs = self.update_interval.as_secs(),
                "Starting coordinator polling"
            );
            let mut ticker = interval(self.update_interval);
            // A slow refresh pushes the schedule back instead of triggering catch-up refreshes
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}
