//! Error types for adapter and connection operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::bluetooth::types::AdapterId;

/// Error reported by the native driver, carried verbatim
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct DriverError {
    pub code: Option<i32>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Why a pending connection attempt ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// `cancel_connect` invalidated the attempt
    Cancelled,
    /// The adapter was closed, swapped or removed while the attempt was pending
    AdapterClosed,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::AdapterClosed => write!(f, "adapter closed"),
        }
    }
}

/// Errors produced at the boundary of every adapter/device operation
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BleError {
    #[error("Failed to enumerate adapters: {source}")]
    Enumeration { source: DriverError },

    #[error("Not able to find adapter {port}")]
    AdapterNotFound { port: AdapterId },

    #[error("Failed to open adapter {port}: {source}")]
    AdapterOpen { port: AdapterId, source: DriverError },

    #[error("Failed to close adapter {port}: {source}")]
    AdapterClose { port: AdapterId, source: DriverError },

    #[error("Adapter {port} reported an error: {source}")]
    AdapterHardware { port: AdapterId, source: DriverError },

    #[error("No adapter selected")]
    NoAdapterSelected,

    #[error("A connection to {address} is already in progress")]
    ConnectionInProgress { address: String },

    #[error("No connection attempt to cancel")]
    NoConnectAttempt,

    #[error("Failed to connect to {address} via {port}: {source}")]
    Connect {
        port: AdapterId,
        address: String,
        source: DriverError,
    },

    #[error("Connection to {address} aborted: {reason}")]
    ConnectAborted { address: String, reason: AbortReason },

    #[error("Failed to cancel connection on {port}: {source}")]
    Cancel { port: AdapterId, source: DriverError },

    #[error("Device {address} is not connected")]
    DeviceNotConnected { address: String },

    #[error("Failed to disconnect {address} via {port}: {source}")]
    Disconnect {
        port: AdapterId,
        address: String,
        source: DriverError,
    },

    #[error("Invalid device address: {address:?}")]
    InvalidAddress { address: String },

    #[error("Driver error: {source}")]
    Unscoped { source: DriverError },
}
