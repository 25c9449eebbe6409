//! Transmitter session.
//!
//! A [`Session`] owns everything about the single peripheral it manages:
//! the lifecycle controller that scans, connects, discovers and reconnects,
//! the characteristic registry, and the operation gate every read, write
//! and notification wait goes through.

mod controller;
pub mod gate;
mod operations;

#[cfg(test)]
pub(crate) mod harness;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::ble::adapter::{Central, GattPeripheral};
use crate::ble::advertising::PeripheralInfo;
use crate::ble::connection::{ConnectionEvent, ConnectionState};
use crate::ble::registry::CharacteristicRegistry;
use crate::config::SessionConfig;
use crate::error::{Error, Result};

use self::controller::Controller;
use self::gate::OperationGate;

/// Callbacks into the application that owns the session.
///
/// Called from the lifecycle task; implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait SessionDelegate: Send + Sync + 'static {
    /// Decide whether to connect to a discovered peripheral.
    fn should_connect(&self, peripheral: &PeripheralInfo) -> bool;

    /// Every configured characteristic was discovered; operations may be issued.
    fn is_ready(&self);

    /// The session ended and reconnects were not attempted or were exhausted.
    fn did_disconnect(&self);
}

/// State shared between the lifecycle task and operation callers.
pub(crate) struct Shared<P: GattPeripheral> {
    /// Session configuration.
    pub(crate) config: SessionConfig,
    /// Current lifecycle state.
    state: RwLock<ConnectionState>,
    /// The tracked peripheral.
    peripheral: RwLock<Option<P>>,
    /// Handles from the latest discovery pass.
    pub(crate) registry: RwLock<CharacteristicRegistry<P::Characteristic>>,
    /// Reconnects attempted since the last successful discovery.
    reconnect_attempts: AtomicU32,
    /// Bumped every time the link to the tracked peripheral is lost.
    link_epoch: watch::Sender<u64>,
    /// Lifecycle state changes.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// The single operation slot.
    pub(crate) gate: OperationGate,
}

impl<P: GattPeripheral> Shared<P> {
    fn new(config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        let (link_epoch, _) = watch::channel(0);
        let registry = CharacteristicRegistry::new(config.characteristics.clone());

        Self {
            config,
            state: RwLock::new(ConnectionState::Idle),
            peripheral: RwLock::new(None),
            registry: RwLock::new(registry),
            reconnect_attempts: AtomicU32::new(0),
            link_epoch,
            event_tx,
            gate: OperationGate::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Update the lifecycle state and emit an event.
    pub(crate) fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);

        if old_state != new_state {
            debug!("Session state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(ConnectionEvent::now(
                new_state,
                self.peripheral_id(),
            ));
        }
    }

    pub(crate) fn peripheral(&self) -> Option<P> {
        self.peripheral.read().clone()
    }

    pub(crate) fn peripheral_id(&self) -> Option<String> {
        self.peripheral.read().as_ref().map(|p| p.id())
    }

    pub(crate) fn set_peripheral(&self, peripheral: P) {
        *self.peripheral.write() = Some(peripheral);
    }

    /// Forget the tracked peripheral and cancel whatever operation is in flight on it.
    pub(crate) fn take_peripheral(&self) -> Option<P> {
        let peripheral = self.peripheral.write().take();
        if peripheral.is_some() {
            self.link_epoch.send_modify(|epoch| *epoch += 1);
        }
        peripheral
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    /// A future that completes the next time the link is lost.
    ///
    /// Observation starts when this is called, not when the future is first polled.
    pub(crate) fn link_lost(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.link_epoch.subscribe();
        async move {
            // A closed channel means the session is gone, which counts as lost.
            let _ = rx.changed().await;
        }
        .boxed()
    }
}

/// A managed BLE session with one transmitter.
pub struct Session<C: Central> {
    /// The radio.
    central: Arc<C>,
    /// The application callbacks.
    delegate: Arc<dyn SessionDelegate>,
    /// State shared with the lifecycle task.
    pub(crate) shared: Arc<Shared<C::Peripheral>>,
    /// Lifecycle task handle.
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Stops the lifecycle task.
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl<C: Central> Session<C> {
    /// Create a session. Nothing happens until [`start`](Self::start) is called.
    pub fn new(central: C, config: SessionConfig, delegate: Arc<dyn SessionDelegate>) -> Self {
        Self {
            central: Arc::new(central),
            delegate,
            shared: Arc::new(Shared::new(config)),
            task: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Spawn the lifecycle task.
    ///
    /// Scanning starts as soon as the radio reports it is powered on.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the session is
    /// already running, or the radio event stream cannot be opened.
    pub async fn start(&self) -> Result<()> {
        self.shared.config.validate()?;

        if self.task.lock().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let events = self.central.events().await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let controller = Controller::new(
            self.central.clone(),
            self.shared.clone(),
            self.delegate.clone(),
        );

        let mut task = self.task.lock();
        if task.is_some() {
            return Err(Error::AlreadyRunning);
        }
        *task = Some(tokio::spawn(controller.run(events, shutdown_rx)));
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        info!("Session started");
        Ok(())
    }

    /// Stop scanning, drop the link and end the lifecycle task.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Session task ended abnormally: {}", e);
            }
            info!("Session stopped");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether discovery completed on the current connection.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Identifier of the tracked peripheral.
    pub fn peripheral_id(&self) -> Option<String> {
        self.shared.peripheral_id()
    }

    /// Reconnects attempted since the last successful discovery.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts()
    }

    /// Whether an operation is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.shared.gate.is_occupied()
    }

    /// Subscribe to lifecycle state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl<C: Central> Drop for Session<C> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl<C: Central> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("peripheral_id", &self.peripheral_id())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}
