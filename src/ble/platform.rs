//! btleplug-backed implementation of the adapter traits.
//!
//! Provides the [`Central`] and [`GattPeripheral`] used on real hardware.

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent as BtleEvent, CentralState, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::adapter::{
    Central, CentralEvent, GattCharacteristic, GattPeripheral, Notification, RadioState,
};
use crate::ble::advertising::PeripheralInfo;
use crate::error::{Error, Result};

impl GattCharacteristic for Characteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// A btleplug peripheral.
#[derive(Debug, Clone)]
pub struct BtlePeripheral {
    inner: Peripheral,
}

impl BtlePeripheral {
    /// Wrap a btleplug peripheral.
    pub fn new(inner: Peripheral) -> Self {
        Self { inner }
    }

    /// Get the underlying peripheral.
    pub fn inner(&self) -> &Peripheral {
        &self.inner
    }
}

#[async_trait]
impl GattPeripheral for BtlePeripheral {
    type Characteristic = Characteristic;

    fn id(&self) -> String {
        self.inner.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connect().await.map_err(Error::Bluetooth)
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await.map_err(Error::Bluetooth)
    }

    async fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Uuid>> {
        // btleplug has no filtered discovery; discover everything and filter here.
        self.inner
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let found: Vec<Uuid> = self
            .inner
            .services()
            .into_iter()
            .map(|service| service.uuid)
            .filter(|uuid| filter.is_empty() || filter.contains(uuid))
            .collect();

        debug!("Discovered {} matching services", found.len());
        Ok(found)
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Characteristic>> {
        // Characteristics are populated by discover_services on every backend.
        let characteristics: Vec<Characteristic> = self
            .inner
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.into_iter())
            .collect();

        for characteristic in &characteristics {
            debug!(
                "Found characteristic: {} in service {}",
                characteristic.uuid, service
            );
        }

        Ok(characteristics)
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        without_response: bool,
    ) -> Result<()> {
        let write_type = if without_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        self.inner
            .write(characteristic, value, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!(
            "Wrote {} bytes to characteristic {}",
            value.len(),
            characteristic.uuid
        );
        Ok(())
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let data = self
            .inner
            .read(characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!(
            "Read {} bytes from characteristic {}",
            data.len(),
            characteristic.uuid
        );
        Ok(data)
    }

    async fn set_notify(&self, characteristic: &Characteristic, enabled: bool) -> Result<()> {
        if enabled {
            self.inner.subscribe(characteristic).await?;
        } else {
            self.inner.unsubscribe(characteristic).await?;
        }

        debug!(
            "Notifications {} for {}",
            if enabled { "enabled" } else { "disabled" },
            characteristic.uuid
        );
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let stream = self
            .inner
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        Ok(stream
            .map(|notification| Notification {
                uuid: notification.uuid,
                value: notification.value,
            })
            .boxed())
    }
}

/// A btleplug adapter acting as the central.
pub struct BtleplugCentral {
    /// The BLE adapter to use.
    adapter: Adapter,
    /// Whether repeated advertisements of known peripherals are reported.
    allow_duplicates: Arc<AtomicBool>,
}

impl BtleplugCentral {
    /// Use the first Bluetooth adapter on this system.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            allow_duplicates: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Translate a btleplug event.
    async fn translate(
        event: BtleEvent,
        adapter: &Adapter,
        allow_duplicates: bool,
    ) -> Option<CentralEvent<BtlePeripheral>> {
        match event {
            BtleEvent::StateUpdate(state) => Some(CentralEvent::StateChanged(match state {
                CentralState::PoweredOn => RadioState::PoweredOn,
                CentralState::PoweredOff => RadioState::PoweredOff,
                _ => RadioState::Unknown,
            })),
            BtleEvent::DeviceDiscovered(id) => Self::discovered(adapter, id).await,
            BtleEvent::DeviceUpdated(id) if allow_duplicates => {
                Self::discovered(adapter, id).await
            }
            BtleEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                Some(CentralEvent::Disconnected(id.to_string()))
            }
            _ => None,
        }
    }

    /// Resolve a discovered peripheral and snapshot its advertisement.
    async fn discovered(
        adapter: &Adapter,
        id: PeripheralId,
    ) -> Option<CentralEvent<BtlePeripheral>> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = peripheral.properties().await.ok().flatten()?;

        let info = PeripheralInfo {
            id: id.to_string(),
            local_name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        };

        trace!("Device discovered: {:?}", info);

        Some(CentralEvent::Discovered {
            peripheral: BtlePeripheral::new(peripheral),
            info,
        })
    }
}

#[async_trait]
impl Central for BtleplugCentral {
    type Peripheral = BtlePeripheral;

    async fn events(&self) -> Result<BoxStream<'static, CentralEvent<BtlePeripheral>>> {
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;
        let adapter = self.adapter.clone();
        let allow_duplicates = self.allow_duplicates.clone();

        let translated = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let allow_duplicates = allow_duplicates.load(Ordering::SeqCst);
            async move { Self::translate(event, &adapter, allow_duplicates).await }
        });

        // btleplug only reports transitions; an adapter handed out by the
        // manager is usable, so start from powered on.
        Ok(stream::once(async { CentralEvent::StateChanged(RadioState::PoweredOn) })
            .chain(translated)
            .boxed())
    }

    async fn start_scanning(&self, services: &[Uuid], allow_duplicates: bool) -> Result<()> {
        info!("Starting BLE scan for {:?}", services);

        self.allow_duplicates
            .store(allow_duplicates, Ordering::SeqCst);

        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await
            .map_err(Error::Bluetooth)
    }

    async fn stop_scanning(&self) -> Result<()> {
        info!("Stopping BLE scan");
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }
}
