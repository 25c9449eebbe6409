//! BLE communication module.
//!
//! This module provides the radio abstraction the session drives, its
//! btleplug implementation, and the discovery pieces that turn a raw
//! connection into a set of usable characteristic handles.

pub mod adapter;
pub mod advertising;
pub mod connection;
pub mod discovery;
pub mod platform;
pub mod registry;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use adapter::{
    Central, CentralEvent, GattCharacteristic, GattPeripheral, Notification, RadioState,
};
pub use advertising::{matches_transmitter, PeripheralInfo};
pub use connection::{ConnectionEvent, ConnectionState};
pub use discovery::{DiscoveryMachine, DiscoveryPhase, DiscoveryStep, Stall};
pub use platform::{BtlePeripheral, BtleplugCentral};
pub use registry::CharacteristicRegistry;
pub use uuids::*;
