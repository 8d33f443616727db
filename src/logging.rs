use chrono::Local;
use log::Record;
use serde::Serialize;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    level: String,
    message: String,
    timestamp: String,
}

impl LogMessage {
    pub fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// Builds the console logger from an `env_logger` filter string such as
/// `info` or `ble_adapter_console_lib=debug`. `RUST_LOG` wins when set.
pub fn console_logger(filters: &str) -> env_logger::Logger {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(filters);
    if let Ok(env_filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_filters);
    }
    builder.build()
}

/// Installs a console-only logger. Returns false, leaving the installed
/// logger in place, if one is already set.
pub fn init_env_logger(filters: &str) -> bool {
    let logger = console_logger(filters);
    let max_level = logger.filter();
    match log::set_boxed_logger(Box::new(logger)) {
        Ok(()) => {
            log::set_max_level(max_level);
            true
        }
        Err(_) => false,
    }
}

#[cfg(feature = "desktop")]
pub use desktop::TauriLogger;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, PoisonError, RwLock};

    use log::{Log, Metadata, Record, SetLoggerError};
    use tauri::Emitter;

    use super::{LogMessage, console_logger};
    use crate::core::bluetooth::constants::LOG_MESSAGE_EVENT;

    static LOGGER: OnceLock<TauriLogger> = OnceLock::new();
    static INSTALLED: AtomicBool = AtomicBool::new(false);

    /// Writes to the console and forwards every record to the webview.
    pub struct TauriLogger {
        app_handle: tauri::AppHandle,
        console: RwLock<env_logger::Logger>,
    }

    impl TauriLogger {
        pub fn init(app_handle: tauri::AppHandle, filters: &str) -> Result<(), SetLoggerError> {
            let logger = LOGGER.get_or_init(|| TauriLogger {
                app_handle,
                console: RwLock::new(console_logger(filters)),
            });
            log::set_logger(logger)?;
            INSTALLED.store(true, Ordering::Release);
            log::set_max_level(logger.console().filter());
            Ok(())
        }

        /// Swaps in new filters once the app config is known. No-op unless
        /// this logger is the one installed.
        pub fn set_filters(filters: &str) {
            let Some(logger) = LOGGER.get().filter(|_| INSTALLED.load(Ordering::Acquire)) else {
                return;
            };
            let console = console_logger(filters);
            log::set_max_level(console.filter());
            *logger.console.write().unwrap_or_else(PoisonError::into_inner) = console;
        }

        fn console(&self) -> std::sync::RwLockReadGuard<'_, env_logger::Logger> {
            self.console.read().unwrap_or_else(PoisonError::into_inner)
        }

        fn emit_log(&self, record: &Record) {
            if let Err(e) = self
                .app_handle
                .emit(LOG_MESSAGE_EVENT, LogMessage::from_record(record))
            {
                eprintln!("Failed to emit log message: {}", e);
            }
        }
    }

    impl Log for TauriLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            self.console().enabled(metadata)
        }

        fn log(&self, record: &Record) {
            let console = self.console();
            if console.matches(record) {
                console.log(record);
                drop(console);
                self.emit_log(record);
            }
        }

        fn flush(&self) {
            self.console().flush();
        }
    }
}
