use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    CONN_SUP_TIMEOUT_MS, MAX_CONN_INTERVAL_MS, MIN_CONN_INTERVAL_MS, OPEN_BAUD_RATE,
    OPEN_EVENT_INTERVAL_MS, SCAN_INTERVAL_MS, SCAN_TIMEOUT_SECS, SCAN_WINDOW_MS, SLAVE_LATENCY,
};
use crate::core::bluetooth::{AddressType, Device};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Hw,
}

/// Verbosity of the driver's own hardware log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverLogLevel {
    #[default]
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Options passed verbatim to the driver's open call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOptions {
    pub baud_rate: u32,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Event batching interval in milliseconds
    pub event_interval: u32,
    pub log_level: DriverLogLevel,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            baud_rate: OPEN_BAUD_RATE,
            parity: Parity::None,
            flow_control: FlowControl::None,
            event_interval: OPEN_EVENT_INTERVAL_MS,
            log_level: DriverLogLevel::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub active: bool,
    /// Milliseconds
    pub interval: f64,
    /// Milliseconds
    pub window: f64,
    /// Seconds
    pub timeout: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            active: true,
            interval: SCAN_INTERVAL_MS,
            window: SCAN_WINDOW_MS,
            timeout: SCAN_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnParams {
    pub min_conn_interval: f64,
    pub max_conn_interval: f64,
    pub slave_latency: u16,
    pub conn_sup_timeout: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            min_conn_interval: MIN_CONN_INTERVAL_MS,
            max_conn_interval: MAX_CONN_INTERVAL_MS,
            slave_latency: SLAVE_LATENCY,
            conn_sup_timeout: CONN_SUP_TIMEOUT_MS,
        }
    }
}

/// Options passed verbatim to the driver's connect call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    pub scan_params: ScanParams,
    pub conn_params: ConnParams,
}

/// The peer a connect call targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectTarget {
    pub address: String,
    #[serde(rename = "type")]
    pub address_type: AddressType,
}

impl From<&Device> for ConnectTarget {
    fn from(device: &Device) -> Self {
        Self {
            address: device.address.clone(),
            address_type: AddressType::RandomStatic,
        }
    }
}

/// Driver parameters used by the session and connection controllers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub open: OpenOptions,
    pub connect: ConnectOptions,
}
