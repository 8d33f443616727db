//! Notification handling for the adapter and connection controllers
//! Every asynchronous outcome is funnelled through a single `Dispatcher`
//! which stamps it with a sequence number and hands it to the state store.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::bluetooth::error::{AbortReason, BleError};
use crate::core::bluetooth::types::{AdapterId, AdapterState, Device};

/// State transition messages consumed by the application state store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    AdapterAdded {
        adapter: AdapterState,
    },
    AdapterRemoved {
        adapter: AdapterState,
    },
    AdapterOpening {
        adapter: AdapterState,
    },
    AdapterOpened {
        adapter: AdapterState,
    },
    AdapterClosed {
        adapter: AdapterState,
    },
    AdapterError {
        adapter: Option<AdapterState>,
        error: BleError,
    },
    AdapterStateChanged {
        adapter: AdapterState,
    },
    DeviceConnecting {
        adapter: AdapterId,
        device: Device,
    },
    DeviceConnected {
        adapter: AdapterId,
        device: Device,
    },
    DeviceConnectAborted {
        adapter: AdapterId,
        device: Device,
        reason: AbortReason,
    },
    DeviceCancelConnecting {
        adapter: AdapterId,
    },
    DeviceConnectCancelled {
        adapter: AdapterId,
    },
    DeviceDisconnecting {
        adapter: AdapterId,
        device: Device,
    },
    DeviceDisconnected {
        adapter: AdapterId,
        device: Device,
        reason: Option<String>,
    },
    ErrorOccurred {
        adapter: Option<AdapterId>,
        error: BleError,
    },
}

impl Notification {
    /// The message type, as serialized in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AdapterAdded { .. } => "ADAPTER_ADDED",
            Self::AdapterRemoved { .. } => "ADAPTER_REMOVED",
            Self::AdapterOpening { .. } => "ADAPTER_OPENING",
            Self::AdapterOpened { .. } => "ADAPTER_OPENED",
            Self::AdapterClosed { .. } => "ADAPTER_CLOSED",
            Self::AdapterError { .. } => "ADAPTER_ERROR",
            Self::AdapterStateChanged { .. } => "ADAPTER_STATE_CHANGED",
            Self::DeviceConnecting { .. } => "DEVICE_CONNECTING",
            Self::DeviceConnected { .. } => "DEVICE_CONNECTED",
            Self::DeviceConnectAborted { .. } => "DEVICE_CONNECT_ABORTED",
            Self::DeviceCancelConnecting { .. } => "DEVICE_CANCEL_CONNECTING",
            Self::DeviceConnectCancelled { .. } => "DEVICE_CONNECT_CANCELLED",
            Self::DeviceDisconnecting { .. } => "DEVICE_DISCONNECTING",
            Self::DeviceDisconnected { .. } => "DEVICE_DISCONNECTED",
            Self::ErrorOccurred { .. } => "ERROR_OCCURRED",
        }
    }
}

/// A notification as delivered to the store
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEnvelope {
    /// Strictly increasing, starting at 1
    pub seq: u64,
    pub timestamp: String,
    pub notification: Notification,
}

/// Single-writer funnel for notifications
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<NotificationEnvelope>,
    seq: Arc<Mutex<u64>>,
}

impl Dispatcher {
    /// Creates a dispatcher and the receiving end the store reads from
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NotificationEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            tx,
            seq: Arc::new(Mutex::new(0)),
        };
        (dispatcher, rx)
    }

    pub fn emit(&self, notification: Notification) {
        // Numbering and sending happen under one lock so channel order matches seq order.
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq += 1;
        debug!("Dispatching #{} {}", *seq, notification.kind());

        let envelope = NotificationEnvelope {
            seq: *seq,
            timestamp: Local::now().to_rfc3339(),
            notification,
        };
        if let Err(e) = self.tx.send(envelope) {
            warn!(
                "Notification #{} {} dropped, store is gone",
                e.0.seq,
                e.0.notification.kind()
            );
        }
    }
}
