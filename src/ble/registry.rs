//! Characteristic registry.
//!
//! Maps the configured characteristic identifiers to the handles found by
//! the most recent characteristic-discovery pass.

use std::collections::HashMap;
use tracing::debug;

use crate::ble::adapter::GattCharacteristic;
use crate::ble::uuids::{CharacteristicId, CharacteristicTable};
use crate::error::{Error, Result};

/// Discovered characteristic handles for the current connection.
#[derive(Debug, Clone)]
pub struct CharacteristicRegistry<C> {
    /// The target identifier set.
    table: CharacteristicTable,
    /// Handles from the most recent discovery pass.
    handles: HashMap<CharacteristicId, C>,
}

impl<C: GattCharacteristic> CharacteristicRegistry<C> {
    /// Create an empty registry for a target set.
    pub fn new(table: CharacteristicTable) -> Self {
        Self {
            table,
            handles: HashMap::new(),
        }
    }

    /// Replace the registry contents with the result of a discovery pass.
    ///
    /// Characteristics whose UUID is not in the target set are ignored.
    /// Handles from earlier passes are dropped, never merged.
    pub fn record_discovered<I>(&mut self, characteristics: I)
    where
        I: IntoIterator<Item = C>,
    {
        self.handles.clear();

        for characteristic in characteristics {
            match self.table.identify(&characteristic.uuid()) {
                Some(id) => {
                    debug!("Resolved {} -> {}", id, characteristic.uuid());
                    self.handles.insert(id, characteristic);
                }
                None => debug!("Ignoring characteristic {}", characteristic.uuid()),
            }
        }
    }

    /// Drop every handle, e.g. when a new connection begins.
    pub fn clear(&mut self) {
        self.handles.clear();
    }

    /// Whether every target identifier has a handle.
    pub fn is_complete(&self) -> bool {
        self.table.iter().all(|(id, _)| self.handles.contains_key(&id))
    }

    /// Target identifiers that have no handle yet.
    pub fn missing(&self) -> Vec<CharacteristicId> {
        self.table
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !self.handles.contains_key(id))
            .collect()
    }

    /// Look up the handle for an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotDiscovered`] if the identifier has no handle.
    pub fn lookup(&self, id: CharacteristicId) -> Result<C> {
        self.handles
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotDiscovered {
                identifier: id.to_string(),
            })
    }

    /// Number of resolved identifiers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing has been resolved.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
