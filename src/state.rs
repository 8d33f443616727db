//! Application state management
//! This module defines and manages the global application state.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use tauri::{AppHandle, Emitter};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::AppConfig;
use crate::core::bluetooth::constants::NOTIFICATION_EVENT;
use crate::core::bluetooth::{BluestDriver, Dispatcher, NotificationEnvelope};
use crate::core::{AdapterStore, BluetoothManager};

/// Global application state
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<BluetoothManager>,
    /// View of adapters and devices built from the notification stream
    pub store: Arc<Mutex<AdapterStore>>,
    pub config: AppConfig,
}

impl AppState {
    /// Creates a new AppState instance and starts forwarding notifications
    /// to the webview.
    pub async fn new(app_handle: &AppHandle) -> Result<Self> {
        let config = AppConfig::load_config(app_handle).await?;
        // Writes the defaults on first run and fills in fields missing from older files.
        if let Err(e) = config.save_config(app_handle).await {
            warn!("Failed to write app config: {}", e);
        }

        info!("Initializing BluetoothManager...");
        let (dispatcher, notifications) = Dispatcher::channel();
        let driver = Arc::new(BluestDriver::new());
        let manager = BluetoothManager::new(driver, &config.driver, dispatcher);

        let store = Arc::new(Mutex::new(AdapterStore::default()));
        tokio::spawn(pump_notifications(
            app_handle.clone(),
            store.clone(),
            notifications,
        ));

        Ok(Self {
            bluetooth_manager: Arc::new(manager),
            store,
            config,
        })
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<BluetoothManager> {
        self.bluetooth_manager.clone()
    }
}

/// Applies each notification to the store, then hands it to the frontend.
async fn pump_notifications(
    app_handle: AppHandle,
    store: Arc<Mutex<AdapterStore>>,
    mut notifications: UnboundedReceiver<NotificationEnvelope>,
) {
    while let Some(envelope) = notifications.recv().await {
        if !store.lock().await.apply(&envelope) {
            continue;
        }
        if let Err(e) = app_handle.emit(NOTIFICATION_EVENT, &envelope) {
            error!(
                "Failed to emit {} notification: {}",
                envelope.notification.kind(),
                e
            );
        }
    }
    info!("Notification stream has ended.");
}
