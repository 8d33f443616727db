//! Device connection handling
//! This module handles connecting to, cancelling and disconnecting from
//! devices on the adapter that is currently open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::driver_config::{ConnectOptions, ConnectTarget};
use crate::core::bluetooth::driver::AdapterEvent;
use crate::core::bluetooth::error::{AbortReason, BleError, DriverError};
use crate::core::bluetooth::notification::{Dispatcher, Notification};
use crate::core::bluetooth::session::{AdapterSession, Selection};
use crate::core::bluetooth::types::{AdapterId, ConnectionState, Device};

/// The single outstanding connect operation
struct PendingAttempt {
    id: u64,
    /// Opening of the adapter the attempt was issued on
    epoch: u64,
    port: AdapterId,
    device: Device,
    token: CancellationToken,
}

/// A connected device and the task watching its link
struct LinkWatch {
    id: u64,
    port: AdapterId,
    device: Device,
    stop: CancellationToken,
}

enum AttemptError {
    Aborted(AbortReason),
    Driver(DriverError),
}

type Confirmed = (Device, broadcast::Receiver<AdapterEvent>);

pub struct ConnectionController {
    session: Arc<AdapterSession>,
    dispatcher: Dispatcher,
    options: ConnectOptions,
    pending: Mutex<Option<PendingAttempt>>,
    links: Mutex<HashMap<String, LinkWatch>>,
    next_id: AtomicU64,
}

impl ConnectionController {
    pub fn new(session: Arc<AdapterSession>, dispatcher: Dispatcher, options: ConnectOptions) -> Self {
        Self {
            session,
            dispatcher,
            options,
            pending: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connects to `device` through the selected adapter.
    ///
    /// Only one attempt may be outstanding per opened adapter; a second call
    /// fails fast with `ConnectionInProgress` without touching the driver.
    /// An attempt left over from an adapter that has since been closed does
    /// not count, its own task resolves it as `AdapterClosed`.
    pub async fn connect(self: &Arc<Self>, device: Device) -> Result<Device, BleError> {
        let Some(selection) = self.session.current() else {
            return Err(self.fail(None, BleError::NoAdapterSelected));
        };
        let port = selection.port().to_string();
        let attempt_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = pending.as_ref() {
                if current.epoch == selection.epoch {
                    let address = current.device.address.clone();
                    drop(pending);
                    return Err(self.fail(Some(port), BleError::ConnectionInProgress { address }));
                }
                debug!(
                    "Dropping stale attempt for {} on closed adapter {}",
                    current.device.address, current.port
                );
            }
            *pending = Some(PendingAttempt {
                id: attempt_id,
                epoch: selection.epoch,
                port: port.clone(),
                device: device.clone(),
                token: token.clone(),
            });
        }

        info!("Connecting to {} via {}", device.address, port);
        self.dispatcher.emit(Notification::DeviceConnecting {
            adapter: port.clone(),
            device: device.clone().with_state(ConnectionState::Connecting),
        });

        let outcome = self.run_attempt(&selection, &device, &token).await;

        // Settle under the lock: whoever removes the attempt from the slot owns its outcome.
        let outcome = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let ours = pending.as_ref().is_some_and(|p| p.id == attempt_id);
            if ours {
                pending.take();
            }
            // Losing the slot means a cancel took it, or a newer attempt replaced it
            // after the adapter was closed.
            let lost = if token.is_cancelled() {
                AbortReason::Cancelled
            } else {
                AbortReason::AdapterClosed
            };
            match outcome {
                Ok(_) | Err(AttemptError::Driver(_)) if !ours => Err(AttemptError::Aborted(lost)),
                Ok(_) if token.is_cancelled() => Err(AttemptError::Aborted(AbortReason::Cancelled)),
                other => other,
            }
        };

        match outcome {
            Ok((confirmed, events)) => {
                let connected = Device {
                    address: device.address.clone(),
                    address_type: device.address_type,
                    name: confirmed.name.or(device.name),
                    connection_state: ConnectionState::Connected,
                };
                self.watch_link(&selection, connected.clone(), events);
                info!("Connected to {} via {}", connected.address, port);
                self.dispatcher.emit(Notification::DeviceConnected {
                    adapter: port,
                    device: connected.clone(),
                });
                Ok(connected)
            }
            Err(AttemptError::Aborted(reason)) => {
                info!("Connection to {} aborted: {}", device.address, reason);
                let address = device.address.clone();
                self.dispatcher.emit(Notification::DeviceConnectAborted {
                    adapter: port,
                    device,
                    reason,
                });
                Err(BleError::ConnectAborted { address, reason })
            }
            Err(AttemptError::Driver(source)) => {
                error!("Failed to connect to {}: {}", device.address, source);
                Err(self.fail(
                    Some(port.clone()),
                    BleError::Connect {
                        port,
                        address: device.address,
                        source,
                    },
                ))
            }
        }
    }

    /// Issues the connect call and lets it run to completion, then waits for
    /// the matching `DeviceConnected`. Only the confirmation wait gives way to
    /// cancellation and to the adapter being deselected.
    async fn run_attempt(
        &self,
        selection: &Selection,
        device: &Device,
        token: &CancellationToken,
    ) -> Result<Confirmed, AttemptError> {
        let adapter = &selection.adapter;
        let mut selected = self.session.watch();
        // One-shot listener, registered before the connect call.
        let mut events = adapter.events();
        let target = ConnectTarget::from(device);

        if let Err(source) = adapter.connect(&target, &self.options).await {
            // A driver that gives up because it was cancelled or closed has not failed.
            if token.is_cancelled() {
                return Err(AttemptError::Aborted(AbortReason::Cancelled));
            }
            if !self.session.is_selected(selection.epoch) {
                return Err(AttemptError::Aborted(AbortReason::AdapterClosed));
            }
            return Err(AttemptError::Driver(source));
        }
        debug!("Connect request for {} accepted by {}", device.address, selection.port());

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AttemptError::Aborted(AbortReason::Cancelled)),
                _ = deselected(&mut selected, selection.epoch) => {
                    return Err(AttemptError::Aborted(AbortReason::AdapterClosed));
                }
                event = events.recv() => match event {
                    Ok(AdapterEvent::DeviceConnected(peer)) if device.same_address(&peer.address) => {
                        return Ok((peer, events));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connect listener lagged, {} event(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        return Err(AttemptError::Driver(DriverError::new("adapter event stream closed")));
                    }
                },
            }
        }
    }

    /// Cancels the outstanding connect attempt on the selected adapter.
    pub async fn cancel_connect(&self) -> Result<(), BleError> {
        let Some(selection) = self.session.current() else {
            return Err(self.fail(None, BleError::NoAdapterSelected));
        };
        let port = selection.port().to_string();

        let attempt = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.as_ref().is_some_and(|p| p.epoch == selection.epoch) {
                pending.take()
            } else {
                None
            }
        };
        let Some(attempt) = attempt else {
            return Err(self.fail(Some(port), BleError::NoConnectAttempt));
        };

        // Invalidate the attempt first so a late confirmation cannot resolve it.
        attempt.token.cancel();
        info!("Cancelling connection to {} on {}", attempt.device.address, port);
        self.dispatcher.emit(Notification::DeviceCancelConnecting {
            adapter: port.clone(),
        });

        match selection.adapter.cancel_connect().await {
            Ok(()) => {
                self.dispatcher
                    .emit(Notification::DeviceConnectCancelled { adapter: port });
                Ok(())
            }
            Err(source) => {
                error!("Failed to cancel connection on {}: {}", port, source);
                Err(self.fail(Some(port.clone()), BleError::Cancel { port, source }))
            }
        }
    }

    /// Disconnects a device previously connected through the selected adapter.
    pub async fn disconnect(self: &Arc<Self>, device: Device) -> Result<(), BleError> {
        let Some(selection) = self.session.current() else {
            return Err(self.fail(None, BleError::NoAdapterSelected));
        };
        let port = selection.port().to_string();

        let link = {
            let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
            if links.get(&device.address).is_some_and(|l| l.port == port) {
                links.remove(&device.address)
            } else {
                None
            }
        };
        let Some(link) = link else {
            return Err(self.fail(
                Some(port),
                BleError::DeviceNotConnected {
                    address: device.address,
                },
            ));
        };
        // The explicit disconnect owns the outcome from here on.
        link.stop.cancel();
        // Subscribed before the call so a link loss raised during it still reaches the
        // watcher restarted on failure.
        let events = selection.adapter.events();

        info!("Disconnecting from {} on {}", link.device.address, port);
        self.dispatcher.emit(Notification::DeviceDisconnecting {
            adapter: port.clone(),
            device: link.device.clone().with_state(ConnectionState::Disconnecting),
        });

        match selection.adapter.disconnect(&link.device.address).await {
            Ok(()) => {
                info!("Disconnected from {}", link.device.address);
                self.dispatcher.emit(Notification::DeviceDisconnected {
                    adapter: port,
                    device: link.device.with_state(ConnectionState::Idle),
                    reason: None,
                });
                Ok(())
            }
            Err(source) => {
                error!("Failed to disconnect {}: {}", link.device.address, source);
                // Still connected as far as we know; keep watching the link.
                self.watch_link(&selection, link.device.clone(), events);
                Err(self.fail(
                    Some(port.clone()),
                    BleError::Disconnect {
                        port,
                        address: link.device.address,
                        source,
                    },
                ))
            }
        }
    }

    /// The device of the outstanding connect attempt, if any
    pub fn pending_device(&self) -> Option<Device> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.device.clone())
    }

    /// Devices currently connected, on any adapter
    pub fn connected_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|l| l.device.clone())
            .collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        devices
    }

    /// Reports a link loss exactly once; dropped silently when the adapter goes away.
    fn watch_link(
        self: &Arc<Self>,
        selection: &Selection,
        device: Device,
        mut events: broadcast::Receiver<AdapterEvent>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let port = selection.port().to_string();
        let address = device.address.clone();
        let epoch = selection.epoch;

        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                address.clone(),
                LinkWatch {
                    id,
                    port: port.clone(),
                    device,
                    stop: stop.clone(),
                },
            );

        let controller = Arc::clone(self);
        let mut selected = self.session.watch();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    _ = deselected(&mut selected, epoch) => {
                        debug!("Adapter {} closed, forgetting link to {}", port, address);
                        controller.take_link(&address, id);
                        return;
                    }
                    event = events.recv() => match event {
                        Ok(AdapterEvent::DeviceDisconnected { device, reason })
                            if device.same_address(&address) => break reason,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => {
                            controller.take_link(&address, id);
                            return;
                        }
                    },
                }
            };

            if let Some(link) = controller.take_link(&address, id) {
                warn!("Link to {} lost: {:?}", address, reason);
                controller.dispatcher.emit(Notification::DeviceDisconnected {
                    adapter: port,
                    device: link.device.with_state(ConnectionState::Idle),
                    reason,
                });
            }
        });
    }

    fn take_link(&self, address: &str, id: u64) -> Option<LinkWatch> {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        if links.get(address).is_some_and(|l| l.id == id) {
            links.remove(address)
        } else {
            None
        }
    }

    fn fail(&self, adapter: Option<AdapterId>, error: BleError) -> BleError {
        warn!("{}", error);
        self.dispatcher.emit(Notification::ErrorOccurred {
            adapter,
            error: error.clone(),
        });
        error
    }
}

/// Resolves once the selection with `epoch` is no longer the selected adapter.
async fn deselected(selected: &mut watch::Receiver<Option<Selection>>, epoch: u64) {
    loop {
        let still_selected = selected
            .borrow_and_update()
            .as_ref()
            .is_some_and(|s| s.epoch == epoch);
        if !still_selected {
            return;
        }
        if selected.changed().await.is_err() {
            // Session dropped; nothing will change any more.
            std::future::pending::<()>().await;
        }
    }
}
