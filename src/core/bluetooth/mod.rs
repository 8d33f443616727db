//! Bluetooth functionality for the adapter console
//! This module handles adapter discovery, the open/close lifecycle of the
//! selected adapter and the connection lifecycle of devices on it.

#[cfg(feature = "bluest-driver")]
mod bluest_driver;
mod connection;
pub mod constants;
mod driver;
mod error;
mod manager;
mod notification;
mod registry;
mod session;
mod types;

// Re-export types that should be publicly accessible
#[cfg(feature = "bluest-driver")]
pub use bluest_driver::{BluestAdapter, BluestDriver};
pub use connection::ConnectionController;
pub use driver::{AdapterEvent, BleDriver, DriverAdapter, DriverEvent};
pub use error::{AbortReason, BleError, DriverError};
pub use manager::BluetoothManager;
pub use notification::{Dispatcher, Notification, NotificationEnvelope};
pub use registry::AdapterRegistry;
pub use session::{AdapterSession, Selection};
pub use types::{
    AdapterId, AdapterState, AddressType, ConnectionState, Device, extract_mac_address,
    normalize_address,
};
