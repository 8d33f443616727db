//! Adapter session
//! Owns the open/close lifecycle of the single selected adapter and relays its
//! hardware events while it stays open.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::config::driver_config::OpenOptions;
use crate::core::bluetooth::driver::{AdapterEvent, DriverAdapter};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::notification::{Dispatcher, Notification};
use crate::core::bluetooth::registry::AdapterRegistry;
use crate::core::bluetooth::types::{AdapterId, AdapterState};

/// The currently open adapter
#[derive(Clone)]
pub struct Selection {
    pub adapter: Arc<dyn DriverAdapter>,
    /// Distinguishes successive openings, including reopening the same port
    pub epoch: u64,
    relay: CancellationToken,
}

impl Selection {
    pub fn port(&self) -> &str {
        self.adapter.port()
    }
}

pub struct AdapterSession {
    registry: Arc<AdapterRegistry>,
    dispatcher: Dispatcher,
    options: OpenOptions,
    selected: watch::Sender<Option<Selection>>,
    next_epoch: AtomicU64,
    /// Serialises open/close so there is exactly one writer of `selected`
    lifecycle: Mutex<()>,
}

impl AdapterSession {
    pub fn new(registry: Arc<AdapterRegistry>, dispatcher: Dispatcher, options: OpenOptions) -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            registry,
            dispatcher,
            options,
            selected,
            next_epoch: AtomicU64::new(1),
            lifecycle: Mutex::new(()),
        }
    }

    /// Snapshot of the selected adapter. Callers must not hold it across
    /// suspension points; re-read or watch instead.
    pub fn current(&self) -> Option<Selection> {
        self.selected.borrow().clone()
    }

    /// Whether the opening tagged `epoch` is still the selected adapter
    pub fn is_selected(&self, epoch: u64) -> bool {
        self.selected.borrow().as_ref().is_some_and(|s| s.epoch == epoch)
    }

    /// Follow changes of the selected adapter
    pub fn watch(&self) -> watch::Receiver<Option<Selection>> {
        self.selected.subscribe()
    }

    /// Opens `port`, closing whatever adapter is open first.
    pub async fn open(self: &Arc<Self>, port: &str) -> Result<AdapterState, BleError> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(previous) = self.current() {
            info!("Closing adapter {} before opening {}", previous.port(), port);
            if let Err(e) = self.close_selected(previous).await {
                warn!("Ignoring close failure during adapter swap: {}", e);
            }
        }

        let Some(adapter) = self.registry.find(port) else {
            let error = BleError::AdapterNotFound {
                port: port.to_string(),
            };
            error!("{}", error);
            self.dispatcher.emit(Notification::AdapterError {
                adapter: None,
                error: error.clone(),
            });
            return Err(error);
        };

        // Listeners go in before the open call so no hardware event is missed.
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let relay = CancellationToken::new();
        tokio::spawn(Arc::clone(self).relay_adapter_events(
            adapter.clone(),
            epoch,
            adapter.events(),
            self.registry.removals(),
            relay.clone(),
        ));

        self.dispatcher.emit(Notification::AdapterOpening {
            adapter: adapter.state(),
        });
        info!("Opening adapter {} with {:?}", port, self.options);

        match adapter.open(&self.options).await {
            Ok(()) => {
                let state = adapter.state();
                if !self.registry.update_state(state.clone()) {
                    // Unplugged while opening.
                    relay.cancel();
                    let error = BleError::AdapterNotFound {
                        port: port.to_string(),
                    };
                    error!("{}", error);
                    self.dispatcher.emit(Notification::AdapterError {
                        adapter: Some(state),
                        error: error.clone(),
                    });
                    return Err(error);
                }
                self.selected.send_replace(Some(Selection {
                    adapter,
                    epoch,
                    relay,
                }));
                info!("Adapter {} opened", port);
                self.dispatcher.emit(Notification::AdapterOpened {
                    adapter: state.clone(),
                });
                Ok(state)
            }
            Err(source) => {
                relay.cancel();
                error!("Failed to open adapter {}: {}", port, source);
                let error = BleError::AdapterOpen {
                    port: port.to_string(),
                    source,
                };
                self.dispatcher.emit(Notification::AdapterError {
                    adapter: Some(adapter.state()),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Closes `port`. Closing a known adapter that is not open is a no-op
    /// success and never reaches the driver; an unknown port is `AdapterNotFound`.
    pub async fn close(&self, port: &str) -> Result<(), BleError> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(selection) = self.current().filter(|s| s.port() == port) {
            return self.close_selected(selection).await;
        }
        match self.registry.state(port) {
            Some(state) => {
                debug!("Adapter {} is not open, nothing to close", port);
                self.dispatcher
                    .emit(Notification::AdapterClosed { adapter: state });
                Ok(())
            }
            None => {
                let error = BleError::AdapterNotFound {
                    port: port.to_string(),
                };
                error!("{}", error);
                self.dispatcher.emit(Notification::AdapterError {
                    adapter: None,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Deselects first so in-flight device operations see the change, then
    /// closes. The adapter stays deselected even if the driver close fails.
    async fn close_selected(&self, selection: Selection) -> Result<(), BleError> {
        self.deselect(selection.epoch);
        let port: AdapterId = selection.port().to_string();

        let result = selection.adapter.close().await;
        selection.relay.cancel();

        match result {
            Ok(()) => {
                let state = selection.adapter.state();
                self.registry.update_state(state.clone());
                info!("Adapter {} closed", port);
                self.dispatcher
                    .emit(Notification::AdapterClosed { adapter: state });
                Ok(())
            }
            Err(source) => {
                error!("Failed to close adapter {}: {}", port, source);
                let error = BleError::AdapterClose { port, source };
                self.dispatcher.emit(Notification::AdapterError {
                    adapter: Some(selection.adapter.state()),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn deselect(&self, epoch: u64) -> bool {
        self.selected.send_if_modified(|selected| {
            if selected.as_ref().is_some_and(|s| s.epoch == epoch) {
                *selected = None;
                true
            } else {
                false
            }
        })
    }

    async fn relay_adapter_events(
        self: Arc<Self>,
        adapter: Arc<dyn DriverAdapter>,
        epoch: u64,
        mut events: broadcast::Receiver<AdapterEvent>,
        mut removals: broadcast::Receiver<AdapterId>,
        stop: CancellationToken,
    ) {
        let port = adapter.port().to_string();
        debug!("Relaying events of adapter {}", port);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                removed = removals.recv() => match removed {
                    Ok(removed) if removed == port => {
                        info!("Open adapter {} was removed", port);
                        self.deselect(epoch);
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Ok(AdapterEvent::Error(source)) => {
                        error!("Adapter {} reported an error: {}", port, source);
                        self.dispatcher.emit(Notification::AdapterError {
                            adapter: Some(adapter.state()),
                            error: BleError::AdapterHardware { port: port.clone(), source },
                        });
                    }
                    Ok(AdapterEvent::StateChanged(state)) => {
                        self.registry.update_state(state.clone());
                        self.dispatcher
                            .emit(Notification::AdapterStateChanged { adapter: state });
                    }
                    // Device events belong to the connection controller.
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Adapter {} event relay lagged, {} event(s) skipped", port, skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Event stream of adapter {} has ended.", port);
                        break;
                    }
                },
            }
        }

        debug!("Stopped relaying events of adapter {}", port);
    }
}
