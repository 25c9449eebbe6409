//! Connection lifecycle controller.
//!
//! Runs as a single task that owns every lifecycle decision: start scanning
//! when the radio powers on, connect to the peripheral the delegate accepts,
//! drive discovery, and on link loss either reconnect straight away (while
//! still setting up, a bounded number of times) or rescan after a delay.
//!
//! Stack calls that take time (connect, discovery) run in spawned tasks that
//! report back over a channel, tagged with the link attempt they belong to.
//! Results for an attempt that has since been abandoned are dropped.

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{Central, CentralEvent, GattPeripheral, RadioState};
use crate::ble::advertising::PeripheralInfo;
use crate::ble::connection::ConnectionState;
use crate::ble::discovery::{DiscoveryMachine, DiscoveryStep, Stall};
use crate::error::{Error, Result};
use crate::session::{SessionDelegate, Shared};

/// Outcome of a spawned stack call.
enum Work<P: GattPeripheral> {
    Connected,
    ConnectFailed(Error),
    ConnectTimedOut,
    Services(Result<Vec<Uuid>>),
    Characteristics(Result<Vec<P::Characteristic>>),
}

/// Drives scan, connect, discovery and reconnect for one session.
pub(crate) struct Controller<C: Central> {
    central: Arc<C>,
    shared: Arc<Shared<C::Peripheral>>,
    delegate: Arc<dyn SessionDelegate>,
    machine: DiscoveryMachine,
    /// Last reported radio state.
    radio: RadioState,
    /// Whether we asked the stack to scan.
    scanning: bool,
    /// Whether discovery completed on the current link.
    discover_success: bool,
    /// Advertisement of the tracked peripheral, kept for reconnects.
    current: Option<PeripheralInfo>,
    /// Link attempt counter used to tag spawned work.
    attempt: u64,
    rescan_at: Option<Instant>,
    discovery_deadline: Option<Instant>,
    work_tx: mpsc::UnboundedSender<(u64, Work<C::Peripheral>)>,
    work_rx: mpsc::UnboundedReceiver<(u64, Work<C::Peripheral>)>,
}

impl<C: Central> Controller<C> {
    pub(crate) fn new(
        central: Arc<C>,
        shared: Arc<Shared<C::Peripheral>>,
        delegate: Arc<dyn SessionDelegate>,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let machine = DiscoveryMachine::new(shared.config.service);

        Self {
            central,
            shared,
            delegate,
            machine,
            radio: RadioState::Unknown,
            scanning: false,
            discover_success: false,
            current: None,
            attempt: 0,
            rescan_at: None,
            discovery_deadline: None,
            work_tx,
            work_rx,
        }
    }

    /// Process radio events and spawned work until shut down.
    pub(crate) async fn run(
        mut self,
        mut events: BoxStream<'static, CentralEvent<C::Peripheral>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        debug!("Lifecycle task started");

        loop {
            let rescan = until(self.rescan_at);
            let discovery_deadline = until(self.discovery_deadline);

            tokio::select! {
                _ = &mut shutdown => break,
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Radio event stream ended");
                        break;
                    }
                },
                Some((attempt, work)) = self.work_rx.recv() => {
                    self.handle_work(attempt, work).await;
                }
                _ = rescan => {
                    self.rescan_at = None;
                    info!("Rescan delay elapsed");
                    self.begin_scanning().await;
                }
                _ = discovery_deadline => self.on_discovery_timeout().await,
            }
        }

        self.teardown().await;
        debug!("Lifecycle task ended");
    }

    async fn handle_event(&mut self, event: CentralEvent<C::Peripheral>) {
        match event {
            CentralEvent::StateChanged(state) => self.on_radio_state(state).await,
            CentralEvent::Discovered { peripheral, info } => {
                if self.shared.state() == ConnectionState::Scanning {
                    self.on_discovered(peripheral, info).await;
                } else {
                    trace!("Ignoring discovery of {} while {}", info.id, self.shared.state());
                }
            }
            CentralEvent::Disconnected(id) => {
                if self.shared.peripheral_id().as_deref() == Some(id.as_str()) {
                    self.on_link_lost().await;
                } else {
                    trace!("Ignoring disconnect of untracked peripheral {}", id);
                }
            }
            CentralEvent::ScanStarted => debug!("Scan started"),
            CentralEvent::ScanStopped => debug!("Scan stopped"),
        }
    }

    async fn handle_work(&mut self, attempt: u64, work: Work<C::Peripheral>) {
        if attempt != self.attempt {
            trace!("Dropping result of abandoned attempt {}", attempt);
            return;
        }

        match work {
            Work::Connected => self.on_connected(),
            Work::ConnectFailed(e) => {
                warn!("Connect failed: {}", e);
                self.on_link_lost().await;
            }
            Work::ConnectTimedOut => {
                warn!(
                    "Connect did not complete within {:?}",
                    self.shared.config.connect_timeout
                );
                self.on_link_lost().await;
            }
            Work::Services(result) => {
                let step = match result {
                    Ok(services) => self.machine.on_services(&services),
                    Err(e) => DiscoveryStep::Stalled(Stall::Failed(e.to_string())),
                };
                self.advance(step);
            }
            Work::Characteristics(result) => {
                let step = match result {
                    Ok(characteristics) => {
                        let mut registry = self.shared.registry.write();
                        self.machine
                            .on_characteristics(characteristics, &mut *registry)
                    }
                    Err(e) => DiscoveryStep::Stalled(Stall::Failed(e.to_string())),
                };
                self.advance(step);
            }
        }
    }

    async fn on_radio_state(&mut self, state: RadioState) {
        debug!("Radio state: {}", state);
        self.radio = state;

        if state.is_powered_on() {
            if self.shared.state() == ConnectionState::Idle {
                self.begin_scanning().await;
            }
            return;
        }

        self.stop_scanning().await;
        self.rescan_at = None;
        self.discovery_deadline = None;
        self.current = None;

        if self.shared.take_peripheral().is_some() {
            self.attempt += 1;
            warn!("Radio went {} with a peripheral tracked; link dropped", state);
        }

        self.shared.set_state(ConnectionState::Idle);
    }

    async fn on_discovered(&mut self, peripheral: C::Peripheral, info: PeripheralInfo) {
        if !self.delegate.should_connect(&info) {
            debug!("Delegate declined {}", info.id);
            if !self.scanning {
                self.begin_scanning().await;
            }
            return;
        }

        self.stop_scanning().await;
        self.connect(peripheral, info);
    }

    fn connect(&mut self, peripheral: C::Peripheral, info: PeripheralInfo) {
        info!("Connecting to {}", info.id);

        self.attempt += 1;
        let attempt = self.attempt;
        self.discover_success = false;
        self.current = Some(info);
        self.shared.registry.write().clear();
        self.shared.set_peripheral(peripheral.clone());
        self.shared.set_state(ConnectionState::Connecting);

        let tx = self.work_tx.clone();
        let timeout = self.shared.config.connect_timeout;

        tokio::spawn(async move {
            let result = match timeout {
                Some(timeout) => tokio::time::timeout(timeout, peripheral.connect())
                    .await
                    .ok(),
                None => Some(peripheral.connect().await),
            };

            let work = match result {
                Some(Ok(())) => Work::Connected,
                Some(Err(e)) => Work::ConnectFailed(e),
                None => Work::ConnectTimedOut,
            };
            let _ = tx.send((attempt, work));
        });
    }

    fn on_connected(&mut self) {
        if self.shared.state() != ConnectionState::Connecting {
            return;
        }

        info!("Connected to {:?}", self.shared.peripheral_id());

        self.discover_success = false;
        self.discovery_deadline = self
            .shared
            .config
            .discovery_timeout
            .map(|timeout| Instant::now() + timeout);
        self.shared.set_state(ConnectionState::DiscoveringServices);

        let step = self.machine.start();
        self.advance(step);
    }

    /// Act on the discovery machine's next step.
    fn advance(&mut self, step: DiscoveryStep) {
        match step {
            DiscoveryStep::DiscoverServices(service) => {
                self.spawn_discovery(move |peripheral| async move {
                    Work::Services(peripheral.discover_services(&[service]).await)
                });
            }
            DiscoveryStep::DiscoverCharacteristics(service) => {
                self.shared
                    .set_state(ConnectionState::DiscoveringCharacteristics);
                self.spawn_discovery(move |peripheral| async move {
                    Work::Characteristics(peripheral.discover_characteristics(service).await)
                });
            }
            DiscoveryStep::Ready => self.on_ready(),
            DiscoveryStep::Stalled(stall) => match self.discovery_deadline {
                Some(_) => warn!("Discovery stalled ({}); waiting for the deadline", stall),
                None => warn!("Discovery stalled ({}); waiting for the link to drop", stall),
            },
            DiscoveryStep::Ignored => trace!("Discovery input ignored"),
        }
    }

    fn spawn_discovery<F, Fut>(&self, request: F)
    where
        F: FnOnce(C::Peripheral) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Work<C::Peripheral>> + Send + 'static,
    {
        let Some(peripheral) = self.shared.peripheral() else {
            return;
        };

        let tx = self.work_tx.clone();
        let attempt = self.attempt;
        tokio::spawn(async move {
            let work = request(peripheral).await;
            let _ = tx.send((attempt, work));
        });
    }

    fn on_ready(&mut self) {
        self.discover_success = true;
        self.discovery_deadline = None;
        self.shared.set_reconnect_attempts(0);
        self.shared.set_state(ConnectionState::Ready);

        info!("Transmitter {:?} ready", self.shared.peripheral_id());
        self.delegate.is_ready();
    }

    async fn on_discovery_timeout(&mut self) {
        self.discovery_deadline = None;

        let Some(peripheral) = self.shared.peripheral() else {
            return;
        };

        warn!(
            "Discovery on {} did not complete within {:?}; disconnecting",
            peripheral.id(),
            self.shared.config.discovery_timeout
        );

        // The stack reports the resulting disconnect like any other.
        if let Err(e) = peripheral.disconnect().await {
            warn!("Failed to disconnect {}: {}", peripheral.id(), e);
            self.on_link_lost().await;
        }
    }

    /// The tracked peripheral's link is gone: reconnect or schedule a rescan.
    async fn on_link_lost(&mut self) {
        let Some(peripheral) = self.shared.take_peripheral() else {
            return;
        };

        self.attempt += 1;
        self.discovery_deadline = None;
        let info = self
            .current
            .take()
            .unwrap_or_else(|| PeripheralInfo::new(peripheral.id()));
        self.shared.set_state(ConnectionState::Disconnected);

        let attempts = self.shared.reconnect_attempts();
        let max_attempts = self.shared.config.max_reconnect_attempts;

        if !self.discover_success && attempts < max_attempts {
            self.shared.set_reconnect_attempts(attempts + 1);
            warn!(
                "Link to {} lost during setup, reconnect attempt {} of {}",
                info.id,
                attempts + 1,
                max_attempts
            );
            self.on_discovered(peripheral, info).await;
            return;
        }

        let delay = self.shared.config.rescan_delay;
        info!("Link to {} lost, rescanning in {:?}", info.id, delay);
        self.rescan_at = Some(Instant::now() + delay);
        self.delegate.did_disconnect();
    }

    async fn begin_scanning(&mut self) {
        if !self.radio.is_powered_on() {
            debug!("Radio is {}, not scanning", self.radio);
            return;
        }

        let services = self.shared.config.advertised_services.clone();
        match self
            .central
            .start_scanning(&services, self.shared.config.allow_duplicates)
            .await
        {
            Ok(()) => {
                self.scanning = true;
                self.shared.set_state(ConnectionState::Scanning);
            }
            Err(e) => {
                error!("Failed to start scanning: {}", e);
                self.shared.set_state(ConnectionState::Idle);
            }
        }
    }

    async fn stop_scanning(&mut self) {
        if !self.scanning {
            return;
        }

        self.scanning = false;
        if let Err(e) = self.central.stop_scanning().await {
            warn!("Failed to stop scanning: {}", e);
        }
    }

    async fn teardown(&mut self) {
        self.stop_scanning().await;

        if let Some(peripheral) = self.shared.take_peripheral() {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect {}: {}", peripheral.id(), e);
            }
        }

        self.shared.set_state(ConnectionState::Idle);
    }
}

/// Sleep until `deadline`, or forever if there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
