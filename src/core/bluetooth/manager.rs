//! Bluetooth manager for the adapter console
//! This module provides the main interface for adapter and device operations

use std::sync::Arc;

use log::warn;

use crate::config::driver_config::DriverConfig;
use crate::core::bluetooth::connection::ConnectionController;
use crate::core::bluetooth::driver::BleDriver;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::notification::{Dispatcher, Notification};
use crate::core::bluetooth::registry::AdapterRegistry;
use crate::core::bluetooth::session::AdapterSession;
use crate::core::bluetooth::types::{AdapterState, Device};

/// Manages Bluetooth operations
///
/// Every operation returns its result and emits exactly one terminal
/// notification through the dispatcher it was built with.
#[derive(Clone)]
pub struct BluetoothManager {
    /// Known adapters
    registry: Arc<AdapterRegistry>,
    /// Open/close lifecycle of the selected adapter
    session: Arc<AdapterSession>,
    /// Connect/cancel/disconnect against the selected adapter
    connection: Arc<ConnectionController>,
    dispatcher: Dispatcher,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager
    pub fn new(driver: Arc<dyn BleDriver>, config: &DriverConfig, dispatcher: Dispatcher) -> Self {
        let registry = Arc::new(AdapterRegistry::new(driver, dispatcher.clone()));
        let session = Arc::new(AdapterSession::new(
            registry.clone(),
            dispatcher.clone(),
            config.open.clone(),
        ));
        let connection = Arc::new(ConnectionController::new(
            session.clone(),
            dispatcher.clone(),
            config.connect.clone(),
        ));

        Self {
            registry,
            session,
            connection,
            dispatcher,
        }
    }

    pub async fn discover_adapters(&self) -> Result<Vec<AdapterState>, BleError> {
        self.registry.discover().await
    }

    pub async fn open_adapter(&self, port: &str) -> Result<AdapterState, BleError> {
        self.session.open(port).await
    }

    pub async fn close_adapter(&self, port: &str) -> Result<(), BleError> {
        self.session.close(port).await
    }

    pub async fn connect_to_device(&self, address: &str) -> Result<Device, BleError> {
        let device = self.parse_device(address)?;
        self.connection.connect(device).await
    }

    pub async fn disconnect_from_device(&self, address: &str) -> Result<(), BleError> {
        let device = self.parse_device(address)?;
        self.connection.disconnect(device).await
    }

    pub async fn cancel_connect(&self) -> Result<(), BleError> {
        self.connection.cancel_connect().await
    }

    /// Known adapters in discovery order
    pub fn adapters(&self) -> Vec<AdapterState> {
        self.registry.adapters()
    }

    /// State of the open adapter, if any
    pub fn selected_adapter(&self) -> Option<AdapterState> {
        let selection = self.session.current()?;
        self.registry.state(selection.port())
    }

    /// Device of the outstanding connect attempt, if any
    pub fn pending_connection(&self) -> Option<Device> {
        self.connection.pending_device()
    }

    pub fn connected_devices(&self) -> Vec<Device> {
        self.connection.connected_devices()
    }

    fn parse_device(&self, address: &str) -> Result<Device, BleError> {
        Device::new(address).map_err(|error| {
            warn!("{}", error);
            let adapter = self.session.current().map(|s| s.port().to_string());
            self.dispatcher.emit(Notification::ErrorOccurred {
                adapter,
                error: error.clone(),
            });
            error
        })
    }
}
