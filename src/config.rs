//! Session configuration.
//!
//! Defaults describe a G5/G6-style transmitter. Every field can be
//! overridden for other models.

use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::ble::uuids::{CharacteristicTable, ADVERTISEMENT_SERVICE_UUID, CGM_SERVICE_UUID};
use crate::error::{Error, Result};
use crate::session::gate::DEFAULT_OPERATION_TIMEOUT;

/// Reconnects attempted before falling back to a timed rescan.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Delay before scanning again after a session ends.
pub const DEFAULT_RESCAN_DELAY: Duration = Duration::from_secs(60);

/// Deadline for a connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for service and characteristic discovery on one connection.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Service UUIDs to scan for.
    pub advertised_services: Vec<Uuid>,
    /// Primary service searched during discovery.
    pub service: Uuid,
    /// Characteristics that must be resolved before the session is ready.
    pub characteristics: CharacteristicTable,
    /// Timeout for operations that do not specify one.
    pub default_timeout: Duration,
    /// Reconnects attempted on a link lost before readiness.
    pub max_reconnect_attempts: u32,
    /// Delay before rescanning once reconnects are exhausted or a session ends.
    pub rescan_delay: Duration,
    /// Deadline for a connect attempt. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Deadline for discovery on one connection. `None` waits for a disconnect.
    pub discovery_timeout: Option<Duration>,
    /// Whether repeated advertisements are reported while scanning.
    pub allow_duplicates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            advertised_services: vec![ADVERTISEMENT_SERVICE_UUID, CGM_SERVICE_UUID],
            service: CGM_SERVICE_UUID,
            characteristics: CharacteristicTable::default(),
            default_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            rescan_delay: DEFAULT_RESCAN_DELAY,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            discovery_timeout: Some(DEFAULT_DISCOVERY_TIMEOUT),
            allow_duplicates: false,
        }
    }
}

impl SessionConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised services to scan for.
    pub fn with_advertised_services(mut self, services: Vec<Uuid>) -> Self {
        self.advertised_services = services;
        self
    }

    /// Set the primary service.
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.service = service;
        self
    }

    /// Set the characteristic table.
    pub fn with_characteristics(mut self, characteristics: CharacteristicTable) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Set the default operation timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the reconnect parameters.
    pub fn with_reconnect(mut self, max_attempts: u32, rescan_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.rescan_delay = rescan_delay;
        self
    }

    /// Set the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the discovery deadline.
    pub fn with_discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Report repeated advertisements while scanning.
    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Check the configuration for values the session cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.characteristics.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "characteristic table is empty".to_string(),
            });
        }

        if self.advertised_services.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "no advertised services to scan for".to_string(),
            });
        }

        let zero_timeout = self.default_timeout.is_zero()
            || self.connect_timeout.map_or(false, |t| t.is_zero())
            || self.discovery_timeout.map_or(false, |t| t.is_zero());
        if zero_timeout {
            return Err(Error::InvalidConfig {
                reason: "timeouts must be non-zero".to_string(),
            });
        }

        if !self.advertised_services.contains(&self.service) {
            warn!(
                "Primary service {} is not among the advertised services",
                self.service
            );
        }

        Ok(())
    }
}
