//! Scripted in-memory BLE stack for tests.

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ble::adapter::{
    Central, CentralEvent, GattCharacteristic, GattPeripheral, Notification, RadioState,
};
use crate::ble::advertising::PeripheralInfo;
use crate::ble::uuids::{CharacteristicId, CGM_SERVICE_UUID};
use crate::error::{Error, Result};

/// How a scripted stack call settles.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Fail(String),
    Pending,
}

impl<T> Reply<T> {
    async fn settle(self) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Fail(reason) => Err(Error::protocol(reason)),
            Reply::Pending => futures::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCharacteristic {
    uuid: Uuid,
}

impl FakeCharacteristic {
    pub fn new(uuid: Uuid) -> Self {
        Self { uuid }
    }
}

impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[derive(Debug)]
pub struct Script {
    pub connect: Reply<()>,
    pub services: Reply<Vec<Uuid>>,
    pub characteristics: Reply<Vec<Uuid>>,
    pub write: Reply<()>,
    pub read: Reply<Vec<u8>>,
    pub notify: Reply<()>,
    /// Pushed as a notification on the written characteristic once a write completes.
    pub reply_to_write: Option<Vec<u8>>,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    pub writes: Vec<(Uuid, Vec<u8>, bool)>,
    pub notify_calls: Vec<(Uuid, bool)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect: Reply::Ok(()),
            services: Reply::Ok(vec![CGM_SERVICE_UUID]),
            characteristics: Reply::Ok(
                CharacteristicId::ALL
                    .iter()
                    .map(|id| id.default_uuid())
                    .collect(),
            ),
            write: Reply::Ok(()),
            read: Reply::Ok(Vec::new()),
            notify: Reply::Ok(()),
            reply_to_write: None,
            connect_calls: 0,
            disconnect_calls: 0,
            writes: Vec::new(),
            notify_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakePeripheral {
    id: String,
    script: Arc<Mutex<Script>>,
    notifications: broadcast::Sender<Notification>,
    central: UnboundedSender<CentralEvent<FakePeripheral>>,
}

impl FakePeripheral {
    pub fn script(&self) -> parking_lot::MutexGuard<'_, Script> {
        self.script.lock()
    }

    pub fn info(&self) -> PeripheralInfo {
        PeripheralInfo::new(self.id.clone()).with_local_name("DexcomAB")
    }

    /// Push a notification as if the device sent it.
    pub fn push(&self, uuid: Uuid, value: Vec<u8>) {
        let _ = self.notifications.send(Notification { uuid, value });
    }

    /// Drop the link as if the device went out of range.
    pub fn drop_link(&self) {
        let _ = self
            .central
            .unbounded_send(CentralEvent::Disconnected(self.id.clone()));
    }
}

#[async_trait]
impl GattPeripheral for FakePeripheral {
    type Characteristic = FakeCharacteristic;

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self) -> Result<()> {
        let reply = {
            let mut script = self.script.lock();
            script.connect_calls += 1;
            script.connect.clone()
        };
        reply.settle().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.script.lock().disconnect_calls += 1;
        self.drop_link();
        Ok(())
    }

    async fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Uuid>> {
        let reply = self.script.lock().services.clone();
        let services = reply.settle().await?;
        Ok(services
            .into_iter()
            .filter(|uuid| filter.is_empty() || filter.contains(uuid))
            .collect())
    }

    async fn discover_characteristics(&self, _service: Uuid) -> Result<Vec<FakeCharacteristic>> {
        let reply = self.script.lock().characteristics.clone();
        let uuids = reply.settle().await?;
        Ok(uuids.into_iter().map(FakeCharacteristic::new).collect())
    }

    async fn write(
        &self,
        characteristic: &FakeCharacteristic,
        value: &[u8],
        without_response: bool,
    ) -> Result<()> {
        let (reply, echo) = {
            let mut script = self.script.lock();
            script
                .writes
                .push((characteristic.uuid, value.to_vec(), without_response));
            (script.write.clone(), script.reply_to_write.clone())
        };
        reply.settle().await?;
        if let Some(echo) = echo {
            self.push(characteristic.uuid, echo);
        }
        Ok(())
    }

    async fn read(&self, _characteristic: &FakeCharacteristic) -> Result<Vec<u8>> {
        let reply = self.script.lock().read.clone();
        reply.settle().await
    }

    async fn set_notify(&self, characteristic: &FakeCharacteristic, enabled: bool) -> Result<()> {
        let reply = {
            let mut script = self.script.lock();
            script.notify_calls.push((characteristic.uuid, enabled));
            script.notify.clone()
        };
        reply.settle().await
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let rx = self.notifications.subscribe();
        Ok(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => return Some((notification, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}

#[derive(Debug, Default)]
pub struct CentralLog {
    pub scans: Vec<(Vec<Uuid>, bool)>,
    pub stops: usize,
}

/// A radio whose events are pushed by the test.
#[derive(Debug, Clone)]
pub struct FakeCentral {
    tx: UnboundedSender<CentralEvent<FakePeripheral>>,
    rx: Arc<Mutex<Option<UnboundedReceiver<CentralEvent<FakePeripheral>>>>>,
    log: Arc<Mutex<CentralLog>>,
}

impl FakeCentral {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            log: Arc::new(Mutex::new(CentralLog::default())),
        }
    }

    pub fn peripheral(&self, id: &str) -> FakePeripheral {
        let (notifications, _) = broadcast::channel(16);
        FakePeripheral {
            id: id.to_string(),
            script: Arc::new(Mutex::new(Script::default())),
            notifications,
            central: self.tx.clone(),
        }
    }

    pub fn log(&self) -> parking_lot::MutexGuard<'_, CentralLog> {
        self.log.lock()
    }

    pub fn radio(&self, state: RadioState) {
        let _ = self.tx.unbounded_send(CentralEvent::StateChanged(state));
    }

    pub fn discover(&self, peripheral: &FakePeripheral) {
        let _ = self.tx.unbounded_send(CentralEvent::Discovered {
            peripheral: peripheral.clone(),
            info: peripheral.info(),
        });
    }
}

#[async_trait]
impl Central for FakeCentral {
    type Peripheral = FakePeripheral;

    async fn events(&self) -> Result<BoxStream<'static, CentralEvent<FakePeripheral>>> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| Error::protocol("event stream already taken"))?;
        Ok(rx.boxed())
    }

    async fn start_scanning(&self, services: &[Uuid], allow_duplicates: bool) -> Result<()> {
        self.log
            .lock()
            .scans
            .push((services.to_vec(), allow_duplicates));
        let _ = self.tx.unbounded_send(CentralEvent::ScanStarted);
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<()> {
        self.log.lock().stops += 1;
        let _ = self.tx.unbounded_send(CentralEvent::ScanStopped);
        Ok(())
    }
}
