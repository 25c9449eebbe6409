//! BLE Service and Characteristic UUIDs.
//!
//! Contains the identifier set used to address characteristics on a
//! transmitter, plus the stock UUID table for G5/G6-style transmitters.

use std::fmt;
use uuid::Uuid;

// Advertisement service (Bluetooth SIG assigned 16-bit UUID)
/// Service UUID advertised by transmitters while they are looking for a receiver.
pub const ADVERTISEMENT_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_febc_0000_1000_8000_00805f9b34fb);

// CGM Service (vendor custom)
/// Primary CGM service UUID.
pub const CGM_SERVICE_UUID: Uuid = Uuid::from_u128(0xf808_3532_849e_531c_c594_30f1f86a4ea5);
/// Communication characteristic UUID (Read, Notify).
pub const COMMUNICATION_UUID: Uuid = Uuid::from_u128(0xf808_3533_849e_531c_c594_30f1f86a4ea5);
/// Control characteristic UUID (Write, Indicate).
pub const CONTROL_UUID: Uuid = Uuid::from_u128(0xf808_3534_849e_531c_c594_30f1f86a4ea5);
/// Authentication characteristic UUID (Read, Write, Indicate).
pub const AUTHENTICATION_UUID: Uuid = Uuid::from_u128(0xf808_3535_849e_531c_c594_30f1f86a4ea5);
/// Backfill characteristic UUID (Read, Write, Notify).
pub const BACKFILL_UUID: Uuid = Uuid::from_u128(0xf808_3536_849e_531c_c594_30f1f86a4ea5);

/// The fixed set of characteristics a session can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicId {
    /// Glucose/status traffic.
    Communication,
    /// Control opcodes (glucose, time, session commands).
    Control,
    /// Authentication handshake.
    Authentication,
    /// Historical data backfill stream.
    Backfill,
}

impl CharacteristicId {
    /// Every identifier, in table order.
    pub const ALL: [CharacteristicId; 4] = [
        Self::Communication,
        Self::Control,
        Self::Authentication,
        Self::Backfill,
    ];

    /// The stock UUID for this characteristic.
    pub fn default_uuid(&self) -> Uuid {
        match self {
            Self::Communication => COMMUNICATION_UUID,
            Self::Control => CONTROL_UUID,
            Self::Authentication => AUTHENTICATION_UUID,
            Self::Backfill => BACKFILL_UUID,
        }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Communication => write!(f, "Communication"),
            Self::Control => write!(f, "Control"),
            Self::Authentication => write!(f, "Authentication"),
            Self::Backfill => write!(f, "Backfill"),
        }
    }
}

/// Mapping from characteristic identifier to UUID.
///
/// The table defines the target set a discovery pass must resolve before
/// the session is considered ready.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicTable {
    entries: Vec<(CharacteristicId, Uuid)>,
}

impl CharacteristicTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace the UUID for an identifier.
    pub fn with(mut self, id: CharacteristicId, uuid: Uuid) -> Self {
        self.insert(id, uuid);
        self
    }

    /// Add or replace the UUID for an identifier.
    pub fn insert(&mut self, id: CharacteristicId, uuid: Uuid) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = uuid,
            None => self.entries.push((id, uuid)),
        }
    }

    /// UUID configured for an identifier.
    pub fn uuid(&self, id: CharacteristicId) -> Option<Uuid> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, uuid)| *uuid)
    }

    /// Identifier configured for a UUID.
    pub fn identify(&self, uuid: &Uuid) -> Option<CharacteristicId> {
        self.entries
            .iter()
            .find(|(_, existing)| existing == uuid)
            .map(|(id, _)| *id)
    }

    /// Iterate over the configured entries.
    pub fn iter(&self) -> impl Iterator<Item = (CharacteristicId, Uuid)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of configured identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identifiers are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CharacteristicTable {
    fn default() -> Self {
        CharacteristicId::ALL
            .iter()
            .fold(Self::new(), |table, id| table.with(*id, id.default_uuid()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert!(ADVERTISEMENT_SERVICE_UUID.to_string().contains("febc"));
        assert_eq!(
            CGM_SERVICE_UUID.to_string(),
            "f8083532-849e-531c-c594-30f1f86a4ea5"
        );
        assert_eq!(
            BACKFILL_UUID.to_string(),
            "f8083536-849e-531c-c594-30f1f86a4ea5"
        );
    }

    #[test]
    fn test_default_table_covers_all_identifiers() {
        let table = CharacteristicTable::default();
        assert_eq!(table.len(), 4);
        for id in CharacteristicId::ALL {
            assert_eq!(table.uuid(id), Some(id.default_uuid()));
            assert_eq!(table.identify(&id.default_uuid()), Some(id));
        }
    }

    #[test]
    fn test_insert_replaces_existing_entry() {
        let replacement = Uuid::from_u128(0x1234);
        let table = CharacteristicTable::default().with(CharacteristicId::Control, replacement);
        assert_eq!(table.len(), 4);
        assert_eq!(table.uuid(CharacteristicId::Control), Some(replacement));
        assert_eq!(table.identify(&CONTROL_UUID), None);
    }

    #[test]
    fn test_identifier_display() {
        assert_eq!(CharacteristicId::Authentication.to_string(), "Authentication");
    }
}
