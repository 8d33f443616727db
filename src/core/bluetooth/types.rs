//! Defines shared data structures for the Bluetooth module.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::error::BleError;

/// Stable port/path identifier of an adapter (e.g. `COM3`, `/dev/ttyACM0`)
pub type AdapterId = String;

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("address pattern is valid")
});

static EMBEDDED_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("address pattern is valid")
});

/// Hardware state snapshot of an adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterState {
    /// Port the adapter is attached to
    pub port: AdapterId,
    pub serial_number: Option<String>,
    /// Name advertised by the adapter, if any
    pub name: Option<String>,
    /// The adapter's own BLE address
    pub address: Option<String>,
    /// Whether the adapter is open and usable
    pub available: bool,
    pub ble_enabled: bool,
    pub scanning: bool,
    pub advertising: bool,
    pub connecting: bool,
}

impl AdapterState {
    /// Creates a closed, idle state for the given port
    pub fn new(port: impl Into<AdapterId>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }
}

/// GAP address type of a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    #[serde(rename = "BLE_GAP_ADDR_TYPE_PUBLIC")]
    Public,
    #[default]
    #[serde(rename = "BLE_GAP_ADDR_TYPE_RANDOM_STATIC")]
    RandomStatic,
    #[serde(rename = "BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_RESOLVABLE")]
    RandomPrivateResolvable,
    #[serde(rename = "BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_NON_RESOLVABLE")]
    RandomPrivateNonResolvable,
}

/// Connection state tag of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Represents a discovered or connected BLE peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Normalised address, upper-case and colon separated
    pub address: String,
    pub address_type: AddressType,
    /// The name of the device, if known
    pub name: Option<String>,
    pub connection_state: ConnectionState,
}

impl Device {
    /// Creates an idle random-static device after validating its address
    pub fn new(address: &str) -> Result<Self, BleError> {
        Ok(Self {
            address: normalize_address(address)?,
            address_type: AddressType::RandomStatic,
            name: None,
            connection_state: ConnectionState::Idle,
        })
    }

    pub fn with_state(mut self, connection_state: ConnectionState) -> Self {
        self.connection_state = connection_state;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Returns true if `address` refers to this device, regardless of case or separator
    pub fn same_address(&self, address: &str) -> bool {
        normalize_address(address).is_ok_and(|normalized| normalized == self.address)
    }
}

/// Validates a `XX:XX:XX:XX:XX:XX` address and returns its canonical form
pub fn normalize_address(address: &str) -> Result<String, BleError> {
    let trimmed = address.trim();
    if !ADDRESS_RE.is_match(trimmed) {
        return Err(BleError::InvalidAddress {
            address: address.to_string(),
        });
    }
    Ok(trimmed.replace('-', ":").to_uppercase())
}

/// Pulls the last MAC address out of a platform device identifier
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    EMBEDDED_ADDRESS_RE
        .find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}
