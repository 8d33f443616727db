//! Mock BLE driver for integration tests.
//!
//! Records every driver call in a shared log so tests can assert on call
//! order, lets tests script failures per operation, and injects the
//! hardware events a real adapter would raise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ble_adapter_console_lib::config::driver_config::{
    ConnectOptions, ConnectTarget, DriverConfig, OpenOptions,
};
use ble_adapter_console_lib::core::BluetoothManager;
use ble_adapter_console_lib::logging;
use ble_adapter_console_lib::core::bluetooth::{
    AdapterEvent, AdapterState, BleDriver, ConnectionState, Device, Dispatcher, DriverAdapter,
    DriverError, DriverEvent, Notification, NotificationEnvelope,
};
use tokio::sync::{Notify, broadcast, mpsc};

// ── Driver call record ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Enumerate,
    Subscribe { port: String },
    Open { port: String, options: OpenOptions },
    Close { port: String },
    Connect { port: String, target: ConnectTarget },
    CancelConnect { port: String },
    Disconnect { port: String, address: String },
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<DriverCall>>>);

#[allow(dead_code)]
impl CallLog {
    fn push(&self, call: DriverCall) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first recorded call matching `pred`
    pub fn position(&self, pred: impl Fn(&DriverCall) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(*c)).count()
    }
}

// ── MockAdapter ───────────────────────────────────────────────

pub struct MockAdapter {
    port: String,
    state: Mutex<AdapterState>,
    events: broadcast::Sender<AdapterEvent>,
    log: CallLog,
    fail_open: Mutex<Option<DriverError>>,
    fail_close: Mutex<Option<DriverError>>,
    fail_connect: Mutex<Option<DriverError>>,
    fail_cancel: Mutex<Option<DriverError>>,
    fail_disconnect: Mutex<Option<DriverError>>,
    /// Confirm connect requests straight away
    auto_confirm: AtomicBool,
    /// Open blocks until this is notified
    open_gate: Mutex<Option<Arc<Notify>>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    /// Link loss reason raised from inside the next disconnect call
    lose_link_on_disconnect: Mutex<Option<String>>,
}

#[allow(dead_code)]
impl MockAdapter {
    fn new(port: &str, log: CallLog) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            port: port.to_string(),
            state: Mutex::new(AdapterState {
                serial_number: Some(format!("SN-{}", port)),
                ..AdapterState::new(port)
            }),
            events,
            log,
            fail_open: Mutex::new(None),
            fail_close: Mutex::new(None),
            fail_connect: Mutex::new(None),
            fail_cancel: Mutex::new(None),
            fail_disconnect: Mutex::new(None),
            auto_confirm: AtomicBool::new(true),
            open_gate: Mutex::new(None),
            connect_gate: Mutex::new(None),
            lose_link_on_disconnect: Mutex::new(None),
        }
    }

    /// Holds the next open call until the returned gate is notified
    pub fn hold_open(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.open_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Holds the next connect call until the returned gate is notified
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// The next disconnect call raises a link loss before returning
    pub fn lose_link_on_disconnect(&self, reason: &str) {
        *self.lose_link_on_disconnect.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_open(&self, message: &str) {
        *self.fail_open.lock().unwrap() = Some(DriverError::new(message));
    }

    pub fn fail_close(&self, message: &str) {
        *self.fail_close.lock().unwrap() = Some(DriverError::new(message));
    }

    pub fn fail_connect(&self, message: &str) {
        *self.fail_connect.lock().unwrap() = Some(DriverError::new(message));
    }

    pub fn fail_cancel(&self, message: &str) {
        *self.fail_cancel.lock().unwrap() = Some(DriverError::new(message));
    }

    pub fn fail_disconnect(&self, message: &str) {
        *self.fail_disconnect.lock().unwrap() = Some(DriverError::new(message));
    }

    pub fn set_auto_confirm(&self, enabled: bool) {
        self.auto_confirm.store(enabled, Ordering::SeqCst);
    }

    /// Raises `deviceConnected` for `address`
    pub fn confirm(&self, address: &str) {
        let device = Device::new(address)
            .unwrap()
            .with_name(Some("Mock Peripheral".into()))
            .with_state(ConnectionState::Connected);
        let _ = self.events.send(AdapterEvent::DeviceConnected(device));
    }

    /// Raises a link loss for `address`
    pub fn drop_link(&self, address: &str, reason: &str) {
        let _ = self.events.send(AdapterEvent::DeviceDisconnected {
            device: Device::new(address).unwrap(),
            reason: Some(reason.to_string()),
        });
    }

    pub fn hardware_error(&self, message: &str) {
        let _ = self.events.send(AdapterEvent::Error(DriverError::with_code(3, message)));
    }

    pub fn change_state(&self, update: impl FnOnce(&mut AdapterState)) {
        let state = {
            let mut state = self.state.lock().unwrap();
            update(&mut state);
            state.clone()
        };
        let _ = self.events.send(AdapterEvent::StateChanged(state));
    }

    fn scripted(slot: &Mutex<Option<DriverError>>) -> Result<(), DriverError> {
        match slot.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DriverAdapter for MockAdapter {
    fn port(&self) -> &str {
        &self.port
    }

    fn state(&self) -> AdapterState {
        self.state.lock().unwrap().clone()
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.log.push(DriverCall::Subscribe {
            port: self.port.clone(),
        });
        self.events.subscribe()
    }

    async fn open(&self, options: &OpenOptions) -> Result<(), DriverError> {
        self.log.push(DriverCall::Open {
            port: self.port.clone(),
            options: options.clone(),
        });
        let gate = self.open_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Self::scripted(&self.fail_open)?;
        let mut state = self.state.lock().unwrap();
        state.available = true;
        state.ble_enabled = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.log.push(DriverCall::Close {
            port: self.port.clone(),
        });
        Self::scripted(&self.fail_close)?;
        let mut state = self.state.lock().unwrap();
        state.available = false;
        state.ble_enabled = false;
        Ok(())
    }

    async fn connect(
        &self,
        target: &ConnectTarget,
        _options: &ConnectOptions,
    ) -> Result<(), DriverError> {
        self.log.push(DriverCall::Connect {
            port: self.port.clone(),
            target: target.clone(),
        });
        let gate = self.connect_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Self::scripted(&self.fail_connect)?;
        if self.auto_confirm.load(Ordering::SeqCst) {
            self.confirm(&target.address);
        }
        Ok(())
    }

    async fn cancel_connect(&self) -> Result<(), DriverError> {
        self.log.push(DriverCall::CancelConnect {
            port: self.port.clone(),
        });
        Self::scripted(&self.fail_cancel)
    }

    async fn disconnect(&self, address: &str) -> Result<(), DriverError> {
        self.log.push(DriverCall::Disconnect {
            port: self.port.clone(),
            address: address.to_string(),
        });
        let lost = self.lose_link_on_disconnect.lock().unwrap().take();
        if let Some(reason) = lost {
            self.drop_link(address, &reason);
        }
        Self::scripted(&self.fail_disconnect)?;
        // Real drivers report the teardown as an event as well.
        self.drop_link(address, "local host terminated connection");
        Ok(())
    }
}

// ── MockDriver ────────────────────────────────────────────────

pub struct MockDriver {
    adapters: Mutex<Vec<Arc<MockAdapter>>>,
    events: broadcast::Sender<DriverEvent>,
    fail_enumeration: Mutex<Option<DriverError>>,
    pub log: CallLog,
}

#[allow(dead_code)]
impl MockDriver {
    pub fn new(ports: &[&str]) -> Arc<Self> {
        let log = CallLog::default();
        let (events, _) = broadcast::channel(64);
        let adapters = ports
            .iter()
            .map(|port| Arc::new(MockAdapter::new(port, log.clone())))
            .collect();
        Arc::new(Self {
            adapters: Mutex::new(adapters),
            events,
            fail_enumeration: Mutex::new(None),
            log,
        })
    }

    pub fn adapter(&self, port: &str) -> Arc<MockAdapter> {
        self.adapters
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.port == port)
            .cloned()
            .unwrap_or_else(|| panic!("no mock adapter on {}", port))
    }

    pub fn fail_enumeration(&self, message: &str) {
        *self.fail_enumeration.lock().unwrap() = Some(DriverError::new(message));
    }

    /// Hot-plugs a new adapter
    pub fn plug(&self, port: &str) -> Arc<MockAdapter> {
        let adapter = Arc::new(MockAdapter::new(port, self.log.clone()));
        self.adapters.lock().unwrap().push(adapter.clone());
        let _ = self.events.send(DriverEvent::Added(adapter.clone()));
        adapter
    }

    /// Hot-unplugs an adapter
    pub fn unplug(&self, port: &str) {
        self.adapters.lock().unwrap().retain(|a| a.port != port);
        let _ = self.events.send(DriverEvent::Removed(AdapterState::new(port)));
    }

    pub fn driver_error(&self, message: &str) {
        let _ = self.events.send(DriverEvent::Error(DriverError::new(message)));
    }
}

#[async_trait]
impl BleDriver for MockDriver {
    async fn adapters(&self) -> Result<Vec<Arc<dyn DriverAdapter>>, DriverError> {
        self.log.push(DriverCall::Enumerate);
        if let Some(error) = self.fail_enumeration.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self
            .adapters
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.clone() as Arc<dyn DriverAdapter>)
            .collect())
    }

    fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

// ── Harness ───────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Console {
    pub manager: BluetoothManager,
    pub driver: Arc<MockDriver>,
    notifications: mpsc::UnboundedReceiver<NotificationEnvelope>,
}

#[allow(dead_code)]
impl Console {
    pub fn new(ports: &[&str]) -> Self {
        logging::init_env_logger("warn");
        let driver = MockDriver::new(ports);
        let (dispatcher, notifications) = Dispatcher::channel();
        let manager = BluetoothManager::new(driver.clone(), &DriverConfig::default(), dispatcher);
        Self {
            manager,
            driver,
            notifications,
        }
    }

    /// Discovers and opens `port`, discarding the notifications produced so far.
    pub async fn with_open(ports: &[&str], port: &str) -> Self {
        let mut console = Self::new(ports);
        console.manager.discover_adapters().await.unwrap();
        console.manager.open_adapter(port).await.unwrap();
        console.drain();
        console
    }

    /// Notifications already dispatched, in order
    pub fn drain(&mut self) -> Vec<Notification> {
        self.drain_envelopes()
            .into_iter()
            .map(|e| e.notification)
            .collect()
    }

    pub fn drain_envelopes(&mut self) -> Vec<NotificationEnvelope> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.notifications.try_recv() {
            drained.push(envelope);
        }
        drained
    }

    pub fn kinds(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(Notification::kind).collect()
    }

    /// Waits for the next notification raised by a background task
    pub async fn next(&mut self) -> Notification {
        tokio::time::timeout(WAIT, self.notifications.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("dispatcher dropped")
            .notification
    }

    /// Lets background tasks run, then returns whatever they dispatched
    pub async fn settle(&mut self) -> Vec<&'static str> {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.kinds()
    }
}

/// Polls `condition` until it holds or the wait budget runs out
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
