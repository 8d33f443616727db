//! Adapter registry
//! Tracks the adapters surfaced by the driver's enumeration facility and its
//! hot-plug events, in insertion order.

use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::driver::{BleDriver, DriverAdapter, DriverEvent};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::notification::{Dispatcher, Notification};
use crate::core::bluetooth::types::{AdapterId, AdapterState};

struct AdapterEntry {
    handle: Arc<dyn DriverAdapter>,
    state: AdapterState,
}

pub struct AdapterRegistry {
    driver: Arc<dyn BleDriver>,
    dispatcher: Dispatcher,
    entries: Mutex<Vec<AdapterEntry>>,
    removals: broadcast::Sender<AdapterId>,
    listening: Once,
}

impl AdapterRegistry {
    pub fn new(driver: Arc<dyn BleDriver>, dispatcher: Dispatcher) -> Self {
        let (removals, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            driver,
            dispatcher,
            entries: Mutex::new(Vec::new()),
            removals,
            listening: Once::new(),
        }
    }

    /// Enumerates the driver's adapters and starts following hot-plug events.
    ///
    /// Adapters not yet known are surfaced as `AdapterAdded` in enumeration
    /// order. The driver event listener is installed once per registry, no
    /// matter how often this is called.
    pub async fn discover(self: &Arc<Self>) -> Result<Vec<AdapterState>, BleError> {
        // Subscribe before enumerating so an adapter plugged in meanwhile is not lost.
        let events = self.driver.events();

        let adapters = match self.driver.adapters().await {
            Ok(adapters) => adapters,
            Err(source) => {
                error!("Adapter enumeration failed: {}", source);
                let error = BleError::Enumeration { source };
                self.dispatcher.emit(Notification::ErrorOccurred {
                    adapter: None,
                    error: error.clone(),
                });
                return Err(error);
            }
        };
        info!("Driver enumerated {} adapter(s)", adapters.len());

        let states = adapters
            .into_iter()
            .map(|adapter| self.insert(adapter))
            .collect();

        let registry = Arc::clone(self);
        self.listening.call_once(move || {
            tokio::spawn(registry.follow_driver_events(events));
        });

        Ok(states)
    }

    /// Looks up an adapter by port
    pub fn find(&self, port: &str) -> Option<Arc<dyn DriverAdapter>> {
        self.lock()
            .iter()
            .find(|entry| entry.handle.port() == port)
            .map(|entry| entry.handle.clone())
    }

    /// Last known state of an adapter
    pub fn state(&self, port: &str) -> Option<AdapterState> {
        self.lock()
            .iter()
            .find(|entry| entry.handle.port() == port)
            .map(|entry| entry.state.clone())
    }

    /// All known adapters in insertion order
    pub fn adapters(&self) -> Vec<AdapterState> {
        self.lock().iter().map(|entry| entry.state.clone()).collect()
    }

    /// Records a new hardware state snapshot; returns false for unknown adapters.
    pub fn update_state(&self, state: AdapterState) -> bool {
        let mut entries = self.lock();
        match entries.iter_mut().find(|entry| entry.handle.port() == state.port) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Subscribe to the ports of adapters removed from the registry
    pub fn removals(&self) -> broadcast::Receiver<AdapterId> {
        self.removals.subscribe()
    }

    fn insert(&self, handle: Arc<dyn DriverAdapter>) -> AdapterState {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter().find(|entry| entry.handle.port() == handle.port()) {
            debug!("Adapter {} already registered", handle.port());
            return entry.state.clone();
        }

        let state = handle.state();
        info!("Adapter added: {}", state.port);
        entries.push(AdapterEntry {
            handle,
            state: state.clone(),
        });
        self.dispatcher.emit(Notification::AdapterAdded {
            adapter: state.clone(),
        });
        state
    }

    fn remove(&self, port: &str) -> Option<AdapterState> {
        let mut entries = self.lock();
        let index = entries.iter().position(|entry| entry.handle.port() == port)?;
        let entry = entries.remove(index);

        info!("Adapter removed: {}", port);
        self.dispatcher.emit(Notification::AdapterRemoved {
            adapter: entry.state.clone(),
        });
        // Nobody listening just means no adapter is open.
        let _ = self.removals.send(port.to_string());
        Some(entry.state)
    }

    async fn follow_driver_events(self: Arc<Self>, mut events: broadcast::Receiver<DriverEvent>) {
        info!("Listening for driver adapter events");
        loop {
            match events.recv().await {
                Ok(DriverEvent::Added(adapter)) => {
                    self.insert(adapter);
                }
                Ok(DriverEvent::Removed(state)) => {
                    if self.remove(&state.port).is_none() {
                        debug!("Ignoring removal of unknown adapter {}", state.port);
                    }
                }
                Ok(DriverEvent::Error(source)) => {
                    error!("Driver error: {}", source);
                    self.dispatcher.emit(Notification::ErrorOccurred {
                        adapter: None,
                        error: BleError::Unscoped { source },
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Driver event listener lagged, {} event(s) skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("Driver event stream has ended.");
                    break;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AdapterEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
