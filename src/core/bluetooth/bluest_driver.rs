//! Driver backend over the system Bluetooth stack
//! The platform exposes a single default adapter, surfaced under a fixed port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, ConnectionEvent};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{OnceCell, broadcast};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::driver_config::{ConnectOptions, ConnectTarget, OpenOptions};
use crate::core::bluetooth::constants::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, DEFAULT_ADAPTER_PORT, EVENT_CHANNEL_CAPACITY,
};
use crate::core::bluetooth::driver::{AdapterEvent, BleDriver, DriverAdapter, DriverEvent};
use crate::core::bluetooth::error::DriverError;
use crate::core::bluetooth::types::{AdapterState, Device, extract_mac_address};

impl From<bluest::Error> for DriverError {
    fn from(error: bluest::Error) -> Self {
        DriverError::new(error.to_string())
    }
}

/// Address of a platform device, read from its identifier
fn peer_address(device: &bluest::Device) -> Option<String> {
    // BlueZ identifiers separate octets with underscores.
    extract_mac_address(&device.id().to_string().replace('_', ":"))
}

pub struct BluestDriver {
    adapter: OnceCell<Option<Arc<BluestAdapter>>>,
    events: broadcast::Sender<DriverEvent>,
}

impl BluestDriver {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            adapter: OnceCell::new(),
            events,
        }
    }
}

impl Default for BluestDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleDriver for BluestDriver {
    async fn adapters(&self) -> Result<Vec<Arc<dyn DriverAdapter>>, DriverError> {
        let adapter = self
            .adapter
            .get_or_init(|| async {
                match Adapter::default().await {
                    Some(adapter) => {
                        info!("System Bluetooth adapter found.");
                        Some(Arc::new(BluestAdapter::new(adapter)))
                    }
                    None => {
                        warn!("No Bluetooth adapter found");
                        None
                    }
                }
            })
            .await;

        Ok(adapter
            .iter()
            .map(|adapter| adapter.clone() as Arc<dyn DriverAdapter>)
            .collect())
    }

    fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

/// Clears the scanning/connecting flags however a connect call ends,
/// including when its future is dropped mid-flight.
struct AttemptFlags<'a>(&'a BluestAdapter);

impl Drop for AttemptFlags<'_> {
    fn drop(&mut self) {
        self.0.set_state(|state| {
            state.scanning = false;
            state.connecting = false;
        });
    }
}

struct PeerLink {
    device: bluest::Device,
    stop: CancellationToken,
}

pub struct BluestAdapter {
    adapter: Adapter,
    state: Mutex<AdapterState>,
    events: broadcast::Sender<AdapterEvent>,
    /// Stops the availability watcher of the current opening
    opened: Mutex<Option<CancellationToken>>,
    attempt: Mutex<Option<CancellationToken>>,
    links: Arc<Mutex<HashMap<String, PeerLink>>>,
}

impl BluestAdapter {
    fn new(adapter: Adapter) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            adapter,
            state: Mutex::new(AdapterState::new(DEFAULT_ADAPTER_PORT)),
            events,
            opened: Mutex::new(None),
            attempt: Mutex::new(None),
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, update: impl FnOnce(&mut AdapterState)) -> AdapterState {
        let mut state = self.lock_state();
        update(&mut state);
        state.clone()
    }

    fn publish(&self, event: AdapterEvent) {
        // No receivers just means nobody is listening yet.
        let _ = self.events.send(event);
    }

    fn watch_availability(&self, stop: CancellationToken) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let state = self.lock_state().clone();

        tokio::spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Unable to follow adapter availability: {}", e);
                    return;
                }
            };
            let mut state = state;
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(bluest::AdapterEvent::Available)) => {
                            state.available = true;
                            state.ble_enabled = true;
                            let _ = events.send(AdapterEvent::StateChanged(state.clone()));
                        }
                        Some(Ok(bluest::AdapterEvent::Unavailable)) => {
                            warn!("Bluetooth adapter became unavailable");
                            state.available = false;
                            state.ble_enabled = false;
                            let _ = events.send(AdapterEvent::StateChanged(state.clone()));
                        }
                        Some(Err(e)) => {
                            let _ = events.send(AdapterEvent::Error(e.into()));
                        }
                        None => {
                            info!("Adapter event stream has ended.");
                            break;
                        }
                    },
                }
            }
        });
    }

    /// Finds the target among connected devices first, then by scanning.
    async fn locate(
        &self,
        address: &str,
        options: &ConnectOptions,
    ) -> Result<bluest::Device, DriverError> {
        for device in self.adapter.connected_devices().await? {
            if peer_address(&device).as_deref() == Some(address) {
                debug!("{} is already connected at system level", address);
                return Ok(device);
            }
        }

        info!("Scanning for {}", address);
        let scan_timeout = Duration::from_secs(u64::from(options.scan_params.timeout));
        let scan = async {
            let mut stream = self.adapter.scan(&[]).await?;
            while let Some(discovered) = stream.next().await {
                debug!(
                    "Found device - Device: {:?}, RSSI: {:?}",
                    discovered.device, discovered.rssi
                );
                if peer_address(&discovered.device).as_deref() == Some(address) {
                    return Ok(discovered.device);
                }
            }
            Err::<bluest::Device, _>(DriverError::new("Bluetooth scan stream has ended"))
        };

        match timeout(scan_timeout, scan).await {
            Ok(found) => found,
            Err(_) => Err(DriverError::new(format!(
                "{} not found within {}s",
                address, options.scan_params.timeout
            ))),
        }
    }

    fn watch_link(&self, address: String, device: bluest::Device) {
        let stop = CancellationToken::new();
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                address.clone(),
                PeerLink {
                    device: device.clone(),
                    stop: stop.clone(),
                },
            );

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let links = self.links.clone();
        tokio::spawn(async move {
            let mut stream = match adapter.device_connection_events(&device).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Unable to follow link to {}: {}", address, e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    event = stream.next() => match event {
                        Some(ConnectionEvent::Connected) => {}
                        Some(ConnectionEvent::Disconnected) | None => break,
                    },
                }
            }

            links
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&address);
            if let Ok(device) = Device::new(&address) {
                let _ = events.send(AdapterEvent::DeviceDisconnected {
                    device,
                    reason: Some("link lost".to_string()),
                });
            }
        });
    }
}

#[async_trait]
impl DriverAdapter for BluestAdapter {
    fn port(&self) -> &str {
        DEFAULT_ADAPTER_PORT
    }

    fn state(&self) -> AdapterState {
        self.lock_state().clone()
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    async fn open(&self, options: &OpenOptions) -> Result<(), DriverError> {
        // Serial settings have no meaning for the system stack.
        debug!("Opening system adapter, ignoring {:?}", options);
        let wait = Duration::from_secs(BLUETOOTH_OPERATION_TIMEOUT_SECS);
        match timeout(wait, self.adapter.wait_available()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DriverError::new(format!(
                    "Bluetooth adapter not available after {}s",
                    BLUETOOTH_OPERATION_TIMEOUT_SECS
                )));
            }
        }
        info!("Bluetooth adapter is available.");

        let stop = CancellationToken::new();
        if let Some(previous) = self
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(stop.clone())
        {
            previous.cancel();
        }
        let state = self.set_state(|state| {
            state.available = true;
            state.ble_enabled = true;
        });
        self.watch_availability(stop);
        self.publish(AdapterEvent::StateChanged(state));
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        if let Some(stop) = self.opened.lock().unwrap_or_else(PoisonError::into_inner).take() {
            stop.cancel();
        }
        if let Some(attempt) = self.attempt.lock().unwrap_or_else(PoisonError::into_inner).take() {
            attempt.cancel();
        }
        let links: Vec<PeerLink> = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, link)| link)
            .collect();
        for link in links {
            link.stop.cancel();
            if let Err(e) = self.adapter.disconnect_device(&link.device).await {
                warn!("Failed to drop link to {:?} while closing: {}", link.device, e);
            }
        }

        self.set_state(|state| {
            state.available = false;
            state.scanning = false;
            state.connecting = false;
        });
        info!("System adapter closed");
        Ok(())
    }

    async fn connect(
        &self,
        target: &ConnectTarget,
        options: &ConnectOptions,
    ) -> Result<(), DriverError> {
        if !self.lock_state().available {
            return Err(DriverError::new("Adapter is not open"));
        }

        let token = CancellationToken::new();
        if let Some(previous) = self
            .attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }
        self.set_state(|state| {
            state.scanning = true;
            state.connecting = true;
        });
        let flags = AttemptFlags(self);

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(DriverError::new("Connect cancelled")),
            result = async {
                let device = self.locate(&target.address, options).await?;
                if !device.is_connected().await {
                    info!("Initiating connection to {}...", device.id());
                    self.adapter.connect_device(&device).await?;
                }
                Ok::<_, DriverError>(device)
            } => result,
        };
        drop(flags);
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner).take();

        let device = result?;
        let name = device.name().ok();
        self.watch_link(target.address.clone(), device);

        let peer = Device::new(&target.address)
            .map_err(|e| DriverError::new(e.to_string()))?
            .with_name(name);
        self.publish(AdapterEvent::DeviceConnected(peer));
        Ok(())
    }

    async fn cancel_connect(&self) -> Result<(), DriverError> {
        match self.attempt.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(token) => token.cancel(),
            None => debug!("No connect in flight on the system adapter"),
        }
        self.set_state(|state| {
            state.scanning = false;
            state.connecting = false;
        });
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<(), DriverError> {
        let link = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);

        let device = match link {
            Some(link) => {
                link.stop.cancel();
                link.device
            }
            None => self
                .adapter
                .connected_devices()
                .await?
                .into_iter()
                .find(|device| peer_address(device).as_deref() == Some(address))
                .ok_or_else(|| DriverError::new(format!("{} is not connected", address)))?,
        };

        info!("Disconnecting from device {}", device.id());
        if let Err(e) = self.adapter.disconnect_device(&device).await {
            error!("Failed to disconnect {}: {}", address, e);
            return Err(e.into());
        }
        info!("Successfully disconnected");
        if let Ok(device) = Device::new(address) {
            self.publish(AdapterEvent::DeviceDisconnected {
                device,
                reason: Some("local host terminated connection".to_string()),
            });
        }
        Ok(())
    }
}
