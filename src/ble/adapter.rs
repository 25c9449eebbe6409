//! Abstract BLE stack the session drives.
//!
//! The session never talks to a radio directly. It is generic over a
//! [`Central`] that reports radio and discovery events, and the
//! [`GattPeripheral`]s that central hands out. The btleplug-backed
//! implementation lives in [`crate::ble::platform`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use uuid::Uuid;

use crate::ble::advertising::PeripheralInfo;
use crate::error::Result;

/// Power/availability state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RadioState {
    /// State not yet reported.
    #[default]
    Unknown,
    /// The stack is restarting.
    Resetting,
    /// The host has no BLE support.
    Unsupported,
    /// The process is not allowed to use Bluetooth.
    Unauthorized,
    /// The radio is switched off.
    PoweredOff,
    /// The radio is available.
    PoweredOn,
}

impl RadioState {
    /// Check if the radio can be used.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Resetting => write!(f, "resetting"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::PoweredOff => write!(f, "poweredOff"),
            Self::PoweredOn => write!(f, "poweredOn"),
        }
    }
}

/// Event reported by a [`Central`].
#[derive(Debug, Clone)]
pub enum CentralEvent<P> {
    /// The radio changed state.
    StateChanged(RadioState),
    /// A peripheral matching the scan filter was seen.
    Discovered {
        /// Handle to the peripheral.
        peripheral: P,
        /// Advertisement snapshot.
        info: PeripheralInfo,
    },
    /// The link to the peripheral with this identifier went down.
    Disconnected(String),
    /// The stack started scanning.
    ScanStarted,
    /// The stack stopped scanning.
    ScanStopped,
}

/// A characteristic handle returned by discovery.
pub trait GattCharacteristic: Clone + Send + Sync + fmt::Debug + 'static {
    /// UUID of the characteristic.
    fn uuid(&self) -> Uuid;
}

/// Data pushed by a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// UUID of the characteristic that sent the data.
    pub uuid: Uuid,
    /// The payload.
    pub value: Vec<u8>,
}

/// A remote device reachable through a [`Central`].
#[async_trait]
pub trait GattPeripheral: Clone + Send + Sync + fmt::Debug + 'static {
    /// Characteristic handle type.
    type Characteristic: GattCharacteristic;

    /// Stable identifier of this peripheral.
    fn id(&self) -> String;

    /// Establish the link. Completes once the stack reports the connection.
    async fn connect(&self) -> Result<()>;

    /// Tear down the link.
    async fn disconnect(&self) -> Result<()>;

    /// Discover services, returning the UUIDs found among `filter`.
    async fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Uuid>>;

    /// Discover the characteristics of a previously discovered service.
    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Self::Characteristic>>;

    /// Write `value`. With `without_response` the stack does not request an acknowledgement.
    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        value: &[u8],
        without_response: bool,
    ) -> Result<()>;

    /// Read the current value.
    async fn read(&self, characteristic: &Self::Characteristic) -> Result<Vec<u8>>;

    /// Enable or disable notifications.
    async fn set_notify(&self, characteristic: &Self::Characteristic, enabled: bool) -> Result<()>;

    /// Stream of notifications from every subscribed characteristic.
    ///
    /// Only data arriving after this call returns is delivered.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;
}

/// The local radio.
#[async_trait]
pub trait Central: Send + Sync + 'static {
    /// Peripheral handle type.
    type Peripheral: GattPeripheral;

    /// Stream of radio, discovery and link events.
    async fn events(&self) -> Result<BoxStream<'static, CentralEvent<Self::Peripheral>>>;

    /// Start scanning for peripherals advertising any of `services`.
    async fn start_scanning(&self, services: &[Uuid], allow_duplicates: bool) -> Result<()>;

    /// Stop scanning.
    async fn stop_scanning(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_state() {
        assert!(RadioState::PoweredOn.is_powered_on());
        assert!(!RadioState::PoweredOff.is_powered_on());
        assert!(!RadioState::default().is_powered_on());
    }

    #[test]
    fn test_radio_state_display() {
        assert_eq!(RadioState::PoweredOn.to_string(), "poweredOn");
        assert_eq!(RadioState::Unauthorized.to_string(), "unauthorized");
    }
}
