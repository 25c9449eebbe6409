// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # transmitter-ble
//!
//! A cross-platform Rust library that manages a Bluetooth Low Energy session
//! with a single continuous glucose monitor transmitter.
//!
//! The session scans for the transmitter's advertisement, connects to the
//! peripheral the application picks, discovers the transmitter's service and
//! characteristics, and reconnects when the link drops. Reads, writes and
//! notification waits are serialized through a single operation slot, each
//! with its own timeout and cancelled when the link is lost.
//!
//! ## Features
//!
//! - **Lifecycle**: Scanning, connecting and discovery driven from radio events
//! - **Reconnects**: Bounded immediate retries during setup, timed rescans after
//! - **One Operation at a Time**: Overlapping operations fail fast with [`Error::Busy`]
//! - **Notification Handling**: Listen-before-write for request/response exchanges
//! - **Pluggable Radio**: Any stack implementing [`Central`], btleplug included
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transmitter_ble::{
//!     matches_transmitter, BtleplugCentral, CharacteristicId, PeripheralInfo, Result, Session,
//!     SessionConfig, SessionDelegate,
//! };
//!
//! struct Transmitter(String);
//!
//! impl SessionDelegate for Transmitter {
//!     fn should_connect(&self, peripheral: &PeripheralInfo) -> bool {
//!         matches_transmitter(peripheral, &self.0)
//!     }
//!
//!     fn is_ready(&self) {
//!         println!("Transmitter ready");
//!     }
//!
//!     fn did_disconnect(&self) {
//!         println!("Transmitter gone");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let central = BtleplugCentral::new().await?;
//!     let delegate = Arc::new(Transmitter("80H4H4".to_string()));
//!     let session = Session::new(central, SessionConfig::default(), delegate);
//!     session.start().await?;
//!
//!     let mut events = session.subscribe_state();
//!     while let Ok(event) = events.recv().await {
//!         if event.state.is_ready() {
//!             session
//!                 .set_notify_enabled(true, CharacteristicId::Control, None)
//!                 .await?;
//!             let reply = session
//!                 .write_then_wait_for_notification(&[0x30], CharacteristicId::Control, Some(0x31), None)
//!                 .await?;
//!             println!("Reply: {:02x?}", reply);
//!             break;
//!         }
//!     }
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and event types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod session;

// Re-exports for convenience
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::gate::{OperationGate, DEFAULT_OPERATION_TIMEOUT};
pub use session::{Session, SessionDelegate};

// Re-export commonly used types from submodules
pub use ble::advertising::{matches_transmitter, PeripheralInfo};
pub use ble::connection::{ConnectionEvent, ConnectionState};
pub use ble::platform::BtleplugCentral;
pub use ble::uuids::{CharacteristicId, CharacteristicTable};
pub use ble::{Central, CentralEvent, GattCharacteristic, GattPeripheral, RadioState};
