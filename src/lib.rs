//! BLE adapter console library
//! Opens BLE adapters, tracks the selected one and manages device
//! connections on it, reporting every step as a notification.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod utils;

#[cfg(feature = "desktop")]
pub mod commands;
#[cfg(feature = "desktop")]
pub mod state;

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::{
        cancel_connect, close_adapter, connect_to_device, disconnect_from_device,
        discover_adapters, get_adapter_store, open_adapter,
    };
    use config::AppConfig;
    use log::info;
    use state::AppState;
    use tauri::Manager;

    let mut builder = tauri::Builder::default();

    #[cfg(desktop)]
    {
        builder = builder.plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
            if let Some(window) = app.get_webview_window("main") {
                let _ = window.show();
                let _ = window.set_focus();
            }
        }));
    }

    builder
        // Register our commands
        .invoke_handler(tauri::generate_handler![
            discover_adapters,
            open_adapter,
            close_adapter,
            connect_to_device,
            disconnect_from_device,
            cancel_connect,
            get_adapter_store,
        ])
        // Setup our application state
        .setup(|app| {
            // Log with the default level until the config has been read.
            let default_level = AppConfig::default().log_level;
            if logging::TauriLogger::init(app.handle().clone(), &default_level).is_err() {
                // Only fall back to the console logger if the Tauri logger could not be installed
                logging::init_env_logger(&default_level);
            }
            info!("Logging initialized");

            let handle = app.handle().clone();
            let app_state = tauri::async_runtime::block_on(async move {
                info!("Starting AppState initialization in Tauri setup.");
                AppState::new(&handle).await
            })
            .map_err(|e| format!("Failed to initialize AppState: {}", e))?;
            logging::TauriLogger::set_filters(&app_state.config.log_level);

            app.manage(app_state);
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
