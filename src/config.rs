use bon::Builder;

use crate::hw::{ConnectionPriority, GattProfile};
use crate::protocol::REQUESTED_ATT_MTU;

const DEFAULT_LOCAL_NAME: &str = "blemidi";

/// Settings shared by the connections a provider drives.
#[derive(Debug, Clone, Builder)]
pub struct ProviderConfig {
    /// Service and characteristics identifying MIDI remotes.
    #[builder(default)]
    gatt_profile: GattProfile,
    /// ATT MTU requested after connecting.
    #[builder(default = REQUESTED_ATT_MTU)]
    requested_mtu: u16,
    #[builder(default)]
    connection_priority: ConnectionPriority,
    /// Only remotes whose advertised name starts with this are connected.
    #[builder(into)]
    name_prefix: Option<String>,
    /// Name advertised in the peripheral role.
    #[builder(into, default = DEFAULT_LOCAL_NAME.to_string())]
    local_name: String,
    /// Whether central connections must bond before becoming ready.
    #[builder(default = true)]
    require_bonding: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProviderConfig {
    #[must_use]
    pub fn gatt_profile(&self) -> &GattProfile {
        &self.gatt_profile
    }

    #[must_use]
    pub fn requested_mtu(&self) -> u16 {
        self.requested_mtu
    }

    #[must_use]
    pub fn connection_priority(&self) -> ConnectionPriority {
        self.connection_priority
    }

    #[must_use]
    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    #[must_use]
    pub fn require_bonding(&self) -> bool {
        self.require_bonding
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_request_large_mtu_and_bonding() {
        let config = ProviderConfig::default();

        assert_eq!(GattProfile::midi1(), *config.gatt_profile());
        assert_eq!(517, config.requested_mtu());
        assert_eq!(ConnectionPriority::High, config.connection_priority());
        assert_eq!(None, config.name_prefix());
        assert_eq!("blemidi", config.local_name());
        assert!(config.require_bonding());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = ProviderConfig::builder()
            .gatt_profile(GattProfile::midi2())
            .name_prefix("Keys")
            .require_bonding(false)
            .build();

        assert_eq!(Some("Keys"), config.name_prefix());
        assert!(!config.require_bonding());
        assert!(!config.gatt_profile().is_bidirectional());
    }
}
