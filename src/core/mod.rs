//! Core functionality for the adapter console
//! This module contains the adapter/device lifecycle controllers and the
//! state store fed by their notifications.

pub mod bluetooth;
pub mod store;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use store::AdapterStore;
