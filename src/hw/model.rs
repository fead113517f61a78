use derive_more::{Display, From, Into};
use serde_with::SerializeDisplay;

/// Stable key for one remote radio endpoint, as reported by the transport.
///
/// Input and output endpoints discovered on the same remote share this key.
#[derive(
    Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Display, From, Into, SerializeDisplay,
)]
pub struct RemoteIdentity(String);

impl From<&str> for RemoteIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl RemoteIdentity {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An advertising remote seen while scanning.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveredRemote {
    identity: RemoteIdentity,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl DiscoveredRemote {
    #[must_use]
    pub fn new(identity: RemoteIdentity, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            identity,
            local_name,
            rssi,
        }
    }

    /// Returns the remote identity.
    #[must_use]
    pub fn identity(&self) -> &RemoteIdentity {
        &self.identity
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns whether the local name starts with a prefix.
    pub(crate) fn local_name_starts_with(&self, prefix: &str) -> bool {
        self.local_name
            .as_deref()
            .is_some_and(|name| name.starts_with(prefix))
    }
}

/// A characteristic description discovered on a connected remote.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    uuid: String,
    properties: Vec<String>,
}

impl CharacteristicInfo {
    #[must_use]
    pub fn new(uuid: String, properties: Vec<String>) -> Self {
        Self { uuid, properties }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns property labels such as `notify` or `write_without_response`.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub(crate) fn has_property(&self, property: &str) -> bool {
        self.properties
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(property))
    }
}

/// A GATT service with discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: String,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(
        uuid: String,
        primary: bool,
        characteristics: Vec<CharacteristicInfo>,
    ) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn remote_identity_serialises_as_plain_string() {
        let identity = RemoteIdentity::from("AA:BB:CC:DD:EE:FF");
        let json = serde_json::to_string(&identity).expect("identity should serialise");
        assert_eq!("\"AA:BB:CC:DD:EE:FF\"", json);
    }

    #[test]
    fn local_name_prefix_requires_a_name() {
        let named = DiscoveredRemote::new("a".into(), Some("Keys-49".to_string()), None);
        let anonymous = DiscoveredRemote::new("b".into(), None, Some(-40));

        assert!(named.local_name_starts_with("Keys"));
        assert!(!anonymous.local_name_starts_with(""));
    }

    #[test]
    fn property_lookup_ignores_case() {
        let characteristic = CharacteristicInfo::new(
            "x".to_string(),
            vec!["Notify".to_string(), "write_without_response".to_string()],
        );
        assert!(characteristic.has_property("notify"));
        assert!(!characteristic.has_property("indicate"));
    }
}
