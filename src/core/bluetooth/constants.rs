//! Constants used throughout the application
//! This module contains the fixed driver parameters, identifiers and
//! event names shared by the controllers and the desktop shell.

/// Serial baud rate used when opening an adapter
pub const OPEN_BAUD_RATE: u32 = 115_200;

/// Interval between driver event batches in milliseconds
pub const OPEN_EVENT_INTERVAL_MS: u32 = 100;

/// Scan interval in milliseconds
pub const SCAN_INTERVAL_MS: f64 = 100.0;

/// Scan window in milliseconds
pub const SCAN_WINDOW_MS: f64 = 50.0;

/// Scan timeout in seconds, enforced by the driver
pub const SCAN_TIMEOUT_SECS: u16 = 20;

/// Minimum and maximum connection interval in milliseconds
pub const MIN_CONN_INTERVAL_MS: f64 = 7.5;
pub const MAX_CONN_INTERVAL_MS: f64 = 7.5;

/// Slave latency in connection events
pub const SLAVE_LATENCY: u16 = 0;

/// Supervision timeout in milliseconds, enforced by the driver
pub const CONN_SUP_TIMEOUT_MS: u16 = 4000;

/// Capacity of the per-adapter and per-driver event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Port identifier given to the system default adapter
pub const DEFAULT_ADAPTER_PORT: &str = "default";

/// Timeout for waiting on the system adapter to become available
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Event name used to push notifications to the webview
pub const NOTIFICATION_EVENT: &str = "ble-notification";

/// Event name used to push log records to the webview
pub const LOG_MESSAGE_EVENT: &str = "log-message";
