//! Service and characteristic discovery state machine.
//!
//! The machine performs no I/O. The lifecycle controller feeds it the
//! results of the stack calls it asked for and acts on the returned step.

use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::adapter::GattCharacteristic;
use crate::ble::registry::CharacteristicRegistry;
use crate::ble::uuids::CharacteristicId;

/// Discovery progress for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DiscoveryPhase {
    /// Waiting for the service list.
    #[default]
    AwaitingServices,
    /// Waiting for the characteristic list of the primary service.
    AwaitingCharacteristics,
    /// Every target characteristic was resolved.
    Complete,
}

impl fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingServices => write!(f, "AwaitingServices"),
            Self::AwaitingCharacteristics => write!(f, "AwaitingCharacteristics"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Why discovery cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stall {
    /// The primary service was not among the discovered services.
    ServiceMissing(Uuid),
    /// Characteristic discovery did not resolve every target.
    CharacteristicsMissing(Vec<CharacteristicId>),
    /// The stack failed the discovery request.
    Failed(String),
}

impl fmt::Display for Stall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceMissing(uuid) => write!(f, "service {} not found", uuid),
            Self::CharacteristicsMissing(ids) => {
                write!(f, "characteristics not found: {:?}", ids)
            }
            Self::Failed(reason) => write!(f, "discovery failed: {}", reason),
        }
    }
}

/// What the controller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStep {
    /// Request service discovery filtered to this UUID.
    DiscoverServices(Uuid),
    /// Request characteristic discovery on this service.
    DiscoverCharacteristics(Uuid),
    /// Discovery finished; the session is ready.
    Ready,
    /// No further progress is possible on this connection.
    Stalled(Stall),
    /// The input did not match the current phase and was dropped.
    Ignored,
}

/// Drives service discovery, then characteristic discovery, then readiness.
#[derive(Debug, Clone)]
pub struct DiscoveryMachine {
    /// The primary service.
    service: Uuid,
    /// Current phase.
    phase: DiscoveryPhase,
}

impl DiscoveryMachine {
    /// Create a machine for the given primary service.
    pub fn new(service: Uuid) -> Self {
        Self {
            service,
            phase: DiscoveryPhase::AwaitingServices,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    /// Whether discovery reached [`DiscoveryPhase::Complete`].
    pub fn is_complete(&self) -> bool {
        self.phase == DiscoveryPhase::Complete
    }

    /// Re-enter from the beginning for a fresh connection.
    pub fn start(&mut self) -> DiscoveryStep {
        self.phase = DiscoveryPhase::AwaitingServices;
        debug!("Discovering service {}", self.service);
        DiscoveryStep::DiscoverServices(self.service)
    }

    /// Handle the arrival of the service list.
    pub fn on_services(&mut self, services: &[Uuid]) -> DiscoveryStep {
        if self.phase != DiscoveryPhase::AwaitingServices {
            return DiscoveryStep::Ignored;
        }

        if !services.contains(&self.service) {
            warn!(
                "Service {} not found among {} discovered services",
                self.service,
                services.len()
            );
            return DiscoveryStep::Stalled(Stall::ServiceMissing(self.service));
        }

        self.phase = DiscoveryPhase::AwaitingCharacteristics;
        debug!("Service {} found, discovering characteristics", self.service);
        DiscoveryStep::DiscoverCharacteristics(self.service)
    }

    /// Handle the arrival of the characteristic list, populating `registry`.
    pub fn on_characteristics<C, I>(
        &mut self,
        characteristics: I,
        registry: &mut CharacteristicRegistry<C>,
    ) -> DiscoveryStep
    where
        C: GattCharacteristic,
        I: IntoIterator<Item = C>,
    {
        if self.phase != DiscoveryPhase::AwaitingCharacteristics {
            return DiscoveryStep::Ignored;
        }

        registry.record_discovered(characteristics);

        if !registry.is_complete() {
            let missing = registry.missing();
            warn!("Characteristic discovery incomplete, missing {:?}", missing);
            return DiscoveryStep::Stalled(Stall::CharacteristicsMissing(missing));
        }

        self.phase = DiscoveryPhase::Complete;
        debug!("All {} characteristics resolved", registry.len());
        DiscoveryStep::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::FakeCharacteristic;
    use crate::ble::uuids::*;
    use pretty_assertions::assert_eq;

    fn registry() -> CharacteristicRegistry<FakeCharacteristic> {
        CharacteristicRegistry::new(CharacteristicTable::default())
    }

    fn all_characteristics() -> Vec<FakeCharacteristic> {
        CharacteristicId::ALL
            .iter()
            .map(|id| FakeCharacteristic::new(id.default_uuid()))
            .collect()
    }

    #[test]
    fn test_happy_path() {
        let mut machine = DiscoveryMachine::new(CGM_SERVICE_UUID);
        let mut registry = registry();

        assert_eq!(
            machine.start(),
            DiscoveryStep::DiscoverServices(CGM_SERVICE_UUID)
        );
        assert_eq!(
            machine.on_services(&[CGM_SERVICE_UUID]),
            DiscoveryStep::DiscoverCharacteristics(CGM_SERVICE_UUID)
        );
        assert_eq!(machine.phase(), DiscoveryPhase::AwaitingCharacteristics);
        assert_eq!(
            machine.on_characteristics(all_characteristics(), &mut registry),
            DiscoveryStep::Ready
        );
        assert!(machine.is_complete());
        assert!(registry.is_complete());
    }

    #[test]
    fn test_missing_service_stalls_without_transition() {
        let mut machine = DiscoveryMachine::new(CGM_SERVICE_UUID);
        machine.start();

        assert_eq!(
            machine.on_services(&[ADVERTISEMENT_SERVICE_UUID]),
            DiscoveryStep::Stalled(Stall::ServiceMissing(CGM_SERVICE_UUID))
        );
        assert_eq!(machine.phase(), DiscoveryPhase::AwaitingServices);
    }

    #[test]
    fn test_incomplete_characteristics_stall() {
        let mut machine = DiscoveryMachine::new(CGM_SERVICE_UUID);
        let mut registry = registry();
        machine.start();
        machine.on_services(&[CGM_SERVICE_UUID]);

        let step = machine.on_characteristics(
            vec![FakeCharacteristic::new(CONTROL_UUID)],
            &mut registry,
        );

        assert_eq!(
            step,
            DiscoveryStep::Stalled(Stall::CharacteristicsMissing(vec![
                CharacteristicId::Communication,
                CharacteristicId::Authentication,
                CharacteristicId::Backfill,
            ]))
        );
        assert_eq!(machine.phase(), DiscoveryPhase::AwaitingCharacteristics);
    }

    #[test]
    fn test_out_of_phase_input_ignored() {
        let mut machine = DiscoveryMachine::new(CGM_SERVICE_UUID);
        let mut registry = registry();
        machine.start();

        assert_eq!(
            machine.on_characteristics(all_characteristics(), &mut registry),
            DiscoveryStep::Ignored
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_restart_resets_phase() {
        let mut machine = DiscoveryMachine::new(CGM_SERVICE_UUID);
        let mut registry = registry();
        machine.start();
        machine.on_services(&[CGM_SERVICE_UUID]);
        machine.on_characteristics(all_characteristics(), &mut registry);
        assert!(machine.is_complete());

        machine.start();
        assert_eq!(machine.phase(), DiscoveryPhase::AwaitingServices);
    }
}
