//! Tauri commands
//! This module defines all the commands that can be invoked from the frontend.
//! Every command reports its outcome both as its return value and as a
//! notification on the `ble-notification` event.

use tauri::State;

use crate::core::AdapterStore;
use crate::core::bluetooth::{AdapterState, Device};
use crate::state::AppState;

/// Enumerates the attached adapters and starts following hot-plug events
#[tauri::command]
pub async fn discover_adapters(
    app_state: State<'_, AppState>,
) -> Result<Vec<AdapterState>, String> {
    app_state
        .get_bluetooth_manager_arc()
        .discover_adapters()
        .await
        .map_err(|e| e.to_string())
}

/// Opens an adapter, closing the previously open one first
///
/// # Arguments
/// * `port` - Port of the adapter as reported by `discover_adapters`
#[tauri::command]
pub async fn open_adapter(
    port: String,
    app_state: State<'_, AppState>,
) -> Result<AdapterState, String> {
    app_state
        .get_bluetooth_manager_arc()
        .open_adapter(&port)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn close_adapter(port: String, app_state: State<'_, AppState>) -> Result<(), String> {
    app_state
        .get_bluetooth_manager_arc()
        .close_adapter(&port)
        .await
        .map_err(|e| e.to_string())
}

/// Connects to a device through the open adapter
///
/// # Arguments
/// * `address` - `XX:XX:XX:XX:XX:XX`, case and separator insensitive
#[tauri::command]
pub async fn connect_to_device(
    address: String,
    app_state: State<'_, AppState>,
) -> Result<Device, String> {
    app_state
        .get_bluetooth_manager_arc()
        .connect_to_device(&address)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn disconnect_from_device(
    address: String,
    app_state: State<'_, AppState>,
) -> Result<(), String> {
    app_state
        .get_bluetooth_manager_arc()
        .disconnect_from_device(&address)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn cancel_connect(app_state: State<'_, AppState>) -> Result<(), String> {
    app_state
        .get_bluetooth_manager_arc()
        .cancel_connect()
        .await
        .map_err(|e| e.to_string())
}

/// Snapshot of the adapter/device view, for windows that attach late
#[tauri::command]
pub async fn get_adapter_store(app_state: State<'_, AppState>) -> Result<AdapterStore, String> {
    Ok(app_state.store.lock().await.clone())
}
