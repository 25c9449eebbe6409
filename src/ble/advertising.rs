//! Advertisement snapshots handed to the session delegate.

use uuid::Uuid;

/// Prefix of the local name transmitters advertise under.
pub const TRANSMITTER_NAME_PREFIX: &str = "Dexcom";

/// What was known about a peripheral when it was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralInfo {
    /// Stack-assigned peripheral identifier.
    pub id: String,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Service UUIDs present in the advertisement.
    pub services: Vec<Uuid>,
}

impl PeripheralInfo {
    /// Create a snapshot with only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the advertised local name.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }
}

/// Check whether an advertisement belongs to the transmitter with `transmitter_id`.
///
/// Transmitters advertise as `Dexcom` followed by the last two characters of
/// their six-character ID. The comparison is case-insensitive.
///
/// # Example
///
/// ```
/// use transmitter_ble::ble::advertising::{matches_transmitter, PeripheralInfo};
///
/// let info = PeripheralInfo::new("AA:BB").with_local_name("DexcomH4");
/// assert!(matches_transmitter(&info, "80H4H4"));
/// assert!(!matches_transmitter(&info, "80H4Q1"));
/// ```
pub fn matches_transmitter(info: &PeripheralInfo, transmitter_id: &str) -> bool {
    let Some(name) = info.local_name.as_deref() else {
        return false;
    };

    let id = transmitter_id.trim();
    if id.len() < 2 || !id.is_ascii() {
        return false;
    }

    let expected = format!("{}{}", TRANSMITTER_NAME_PREFIX, &id[id.len() - 2..]);
    name.eq_ignore_ascii_case(&expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_transmitter() {
        let info = PeripheralInfo::new("p1").with_local_name("DexcomQ1");
        assert!(matches_transmitter(&info, "8GQ1Q1"));
        assert!(matches_transmitter(&info, "8gq1q1"));
        assert!(!matches_transmitter(&info, "8GQ1Q2"));
    }

    #[test]
    fn test_matches_transmitter_rejects_missing_name() {
        let info = PeripheralInfo::new("p1");
        assert!(!matches_transmitter(&info, "8GQ1Q1"));
    }

    #[test]
    fn test_matches_transmitter_rejects_short_id() {
        let info = PeripheralInfo::new("p1").with_local_name("Dexcom1");
        assert!(!matches_transmitter(&info, "1"));
        assert!(!matches_transmitter(&info, ""));
    }
}
