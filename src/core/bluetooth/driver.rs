//! Native BLE driver facility
//! The controllers only talk to the radio through these traits. Event
//! listeners are `broadcast` subscriptions: a receiver sees every event sent
//! after it was created and nothing sent before.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::driver_config::{ConnectOptions, ConnectTarget, OpenOptions};
use crate::core::bluetooth::error::DriverError;
use crate::core::bluetooth::types::{AdapterState, Device};

/// Factory-scoped events
#[derive(Clone)]
pub enum DriverEvent {
    /// A new adapter was plugged in
    Added(Arc<dyn DriverAdapter>),
    /// An adapter disappeared
    Removed(AdapterState),
    /// A driver failure that cannot be attributed to one adapter
    Error(DriverError),
}

impl fmt::Debug for DriverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(adapter) => f.debug_tuple("Added").field(&adapter.port()).finish(),
            Self::Removed(state) => f.debug_tuple("Removed").field(&state.port).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

/// Adapter-scoped events
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// Hardware-level error
    Error(DriverError),
    StateChanged(AdapterState),
    DeviceConnected(Device),
    DeviceDisconnected {
        device: Device,
        reason: Option<String>,
    },
}

/// Adapter enumeration and hot-plug facility
#[async_trait]
pub trait BleDriver: Send + Sync {
    /// Enumerate the adapters currently attached
    async fn adapters(&self) -> Result<Vec<Arc<dyn DriverAdapter>>, DriverError>;

    /// Subscribe to added/removed/error events
    fn events(&self) -> broadcast::Receiver<DriverEvent>;
}

/// One physical or virtual BLE controller
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    /// Stable port/path identifier
    fn port(&self) -> &str;

    /// Current hardware state snapshot
    fn state(&self) -> AdapterState;

    /// Subscribe to error/state/connection events of this adapter
    fn events(&self) -> broadcast::Receiver<AdapterEvent>;

    async fn open(&self, options: &OpenOptions) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;

    /// Issue a connect request. Completion is reported by `AdapterEvent::DeviceConnected`.
    async fn connect(
        &self,
        target: &ConnectTarget,
        options: &ConnectOptions,
    ) -> Result<(), DriverError>;

    async fn cancel_connect(&self) -> Result<(), DriverError>;

    async fn disconnect(&self, address: &str) -> Result<(), DriverError>;
}
