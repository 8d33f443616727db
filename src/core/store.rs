//! Application state store
//! Folds the notification stream into the adapter/device view the UI renders.

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;

use crate::core::bluetooth::{
    AdapterId, AdapterState, BleError, ConnectionState, Device, Notification,
    NotificationEnvelope,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStore {
    /// Known adapters in the order they were added
    pub adapters: Vec<AdapterState>,
    /// Adapter being opened, if an open is in flight
    pub opening: Option<AdapterId>,
    pub selected_adapter: Option<AdapterId>,
    /// Devices of the selected adapter, keyed by address
    pub devices: BTreeMap<String, Device>,
    /// A cancel request is outstanding
    pub cancelling: bool,
    pub last_error: Option<BleError>,
    /// Sequence number of the last applied notification
    pub last_seq: u64,
}

impl AdapterStore {
    /// Applies an envelope, ignoring anything not newer than what was already applied.
    pub fn apply(&mut self, envelope: &NotificationEnvelope) -> bool {
        if envelope.seq <= self.last_seq {
            warn!(
                "Ignoring out-of-order notification #{} (last applied #{})",
                envelope.seq, self.last_seq
            );
            return false;
        }
        self.last_seq = envelope.seq;
        self.reduce(&envelope.notification);
        true
    }

    pub fn reduce(&mut self, notification: &Notification) {
        match notification {
            Notification::AdapterAdded { adapter } | Notification::AdapterStateChanged { adapter } => {
                self.upsert_adapter(adapter);
            }
            Notification::AdapterRemoved { adapter } => {
                self.adapters.retain(|a| a.port != adapter.port);
                self.drop_selection(&adapter.port);
                if self.opening.as_deref() == Some(adapter.port.as_str()) {
                    self.opening = None;
                }
            }
            Notification::AdapterOpening { adapter } => {
                self.opening = Some(adapter.port.clone());
            }
            Notification::AdapterOpened { adapter } => {
                self.upsert_adapter(adapter);
                self.opening = None;
                self.selected_adapter = Some(adapter.port.clone());
                self.devices.clear();
                self.cancelling = false;
            }
            Notification::AdapterClosed { adapter } => {
                // Closing never introduces an adapter the store has not seen added.
                if let Some(existing) = self.adapters.iter_mut().find(|a| a.port == adapter.port) {
                    *existing = adapter.clone();
                }
                self.drop_selection(&adapter.port);
            }
            Notification::AdapterError { adapter, error } => {
                if let Some(adapter) = adapter {
                    if self.opening.as_deref() == Some(adapter.port.as_str()) {
                        self.opening = None;
                    }
                    // A failed close still leaves the adapter deselected.
                    if matches!(error, BleError::AdapterClose { .. }) {
                        self.drop_selection(&adapter.port);
                    }
                } else if matches!(error, BleError::AdapterNotFound { .. }) {
                    self.opening = None;
                }
                self.last_error = Some(error.clone());
            }
            Notification::DeviceConnecting { device, .. } => {
                self.set_device(device, ConnectionState::Connecting);
            }
            Notification::DeviceConnected { device, .. } => {
                self.set_device(device, ConnectionState::Connected);
            }
            Notification::DeviceConnectAborted { device, .. } => {
                self.discard_connecting(&device.address);
                self.cancelling = false;
            }
            Notification::DeviceCancelConnecting { .. } => {
                self.cancelling = true;
            }
            Notification::DeviceConnectCancelled { .. } => {
                self.cancelling = false;
                self.devices
                    .retain(|_, d| d.connection_state != ConnectionState::Connecting);
            }
            Notification::DeviceDisconnecting { device, .. } => {
                self.set_device(device, ConnectionState::Disconnecting);
            }
            Notification::DeviceDisconnected { device, .. } => {
                self.devices.remove(&device.address);
            }
            Notification::ErrorOccurred { error, .. } => {
                match error {
                    BleError::Connect { address, .. } => self.discard_connecting(address),
                    BleError::Cancel { .. } => self.cancelling = false,
                    BleError::Disconnect { address, .. } => {
                        if let Some(device) = self.devices.get_mut(address) {
                            device.connection_state = ConnectionState::Connected;
                        }
                    }
                    _ => {}
                }
                self.last_error = Some(error.clone());
            }
        }
    }

    pub fn adapter(&self, port: &str) -> Option<&AdapterState> {
        self.adapters.iter().find(|a| a.port == port)
    }

    pub fn device(&self, address: &str) -> Option<&Device> {
        self.devices.get(address)
    }

    fn upsert_adapter(&mut self, adapter: &AdapterState) {
        match self.adapters.iter_mut().find(|a| a.port == adapter.port) {
            Some(existing) => *existing = adapter.clone(),
            None => self.adapters.push(adapter.clone()),
        }
    }

    fn drop_selection(&mut self, port: &str) {
        if self.selected_adapter.as_deref() == Some(port) {
            self.selected_adapter = None;
            self.devices.clear();
            self.cancelling = false;
        }
    }

    fn set_device(&mut self, device: &Device, state: ConnectionState) {
        self.devices
            .insert(device.address.clone(), device.clone().with_state(state));
    }

    fn discard_connecting(&mut self, address: &str) {
        if self
            .devices
            .get(address)
            .is_some_and(|d| d.connection_state == ConnectionState::Connecting)
        {
            self.devices.remove(address);
        }
    }
}
