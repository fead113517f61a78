use bon::Builder;
use tracing::{debug, instrument};

use super::model::{CharacteristicInfo, ServiceInfo};
use super::transport::WriteMode;
use crate::error::DiscoveryError;
use crate::protocol::{
    self, MIDI_IO_CHARACTERISTIC_UUID, MIDI_SERVICE_UUID, MIDI2_INPUT_CHARACTERISTIC_UUID,
    MIDI2_OUTPUT_CHARACTERISTIC_UUID,
};

/// Service and characteristic UUIDs that identify a BLE-MIDI data channel.
///
/// MIDI 1.0 devices use one characteristic for both directions; the MIDI 2.0
/// variant splits them. "Input" carries data from the remote to us.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct GattProfile {
    #[builder(into)]
    service_uuid: String,
    #[builder(into)]
    input_characteristic_uuid: String,
    #[builder(into)]
    output_characteristic_uuid: String,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self::midi1()
    }
}

impl GattProfile {
    #[must_use]
    pub fn midi1() -> Self {
        Self {
            service_uuid: MIDI_SERVICE_UUID.to_string(),
            input_characteristic_uuid: MIDI_IO_CHARACTERISTIC_UUID.to_string(),
            output_characteristic_uuid: MIDI_IO_CHARACTERISTIC_UUID.to_string(),
        }
    }

    #[must_use]
    pub fn midi2() -> Self {
        Self {
            service_uuid: MIDI_SERVICE_UUID.to_string(),
            input_characteristic_uuid: MIDI2_INPUT_CHARACTERISTIC_UUID.to_string(),
            output_characteristic_uuid: MIDI2_OUTPUT_CHARACTERISTIC_UUID.to_string(),
        }
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn input_characteristic_uuid(&self) -> &str {
        &self.input_characteristic_uuid
    }

    #[must_use]
    pub fn output_characteristic_uuid(&self) -> &str {
        &self.output_characteristic_uuid
    }

    /// Returns whether both directions share one characteristic.
    #[must_use]
    pub fn is_bidirectional(&self) -> bool {
        self.input_characteristic_uuid
            .eq_ignore_ascii_case(&self.output_characteristic_uuid)
    }
}

/// Characteristics matched on a connected remote.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct NegotiatedMidiEndpoints {
    pub(crate) service_uuid: String,
    pub(crate) input_uuid: Option<String>,
    pub(crate) output: Option<NegotiatedOutput>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct NegotiatedOutput {
    pub(crate) uuid: String,
    pub(crate) write_mode: WriteMode,
}

/// Matches discovered services against a profile.
///
/// Succeeds when the profile's service exposes at least one usable data
/// characteristic: a notifying input or a writable output.
#[instrument(skip(services, profile), level = "debug", fields(service_count = services.len()))]
pub(crate) fn negotiate_midi_endpoints(
    services: &[ServiceInfo],
    profile: &GattProfile,
) -> Result<NegotiatedMidiEndpoints, DiscoveryError> {
    let Some(service) = find_service(services, profile.service_uuid()) else {
        return Err(DiscoveryError::MissingService {
            service_uuid: profile.service_uuid().to_ascii_lowercase(),
        });
    };

    for characteristic in service.characteristics() {
        debug!(
            uuid = characteristic.uuid(),
            known = protocol::endpoint_for_uuid(characteristic.uuid())
                .map(|endpoint| protocol::endpoint_metadata(endpoint).name()),
            properties = ?characteristic.properties(),
            "inspecting characteristic"
        );
    }

    let input_uuid = find_characteristic(service, profile.input_characteristic_uuid())
        .filter(|characteristic| supports_notify(characteristic))
        .map(|characteristic| characteristic.uuid().to_ascii_lowercase());
    let output = find_characteristic(service, profile.output_characteristic_uuid()).and_then(
        |characteristic| {
            select_write_mode(characteristic).map(|write_mode| NegotiatedOutput {
                uuid: characteristic.uuid().to_ascii_lowercase(),
                write_mode,
            })
        },
    );

    if input_uuid.is_none() && output.is_none() {
        return Err(DiscoveryError::MissingMidiCharacteristics {
            service_uuid: service.uuid().to_ascii_lowercase(),
        });
    }

    Ok(NegotiatedMidiEndpoints {
        service_uuid: service.uuid().to_ascii_lowercase(),
        input_uuid,
        output,
    })
}

fn find_service<'a>(services: &'a [ServiceInfo], uuid: &str) -> Option<&'a ServiceInfo> {
    services
        .iter()
        .find(|service| service.uuid().eq_ignore_ascii_case(uuid))
}

fn find_characteristic<'a>(service: &'a ServiceInfo, uuid: &str) -> Option<&'a CharacteristicInfo> {
    service
        .characteristics()
        .iter()
        .find(|characteristic| characteristic.uuid().eq_ignore_ascii_case(uuid))
}

fn supports_notify(characteristic: &CharacteristicInfo) -> bool {
    characteristic.has_property("notify") || characteristic.has_property("indicate")
}

/// Write-without-response keeps latency low; plain writes are the fallback.
fn select_write_mode(characteristic: &CharacteristicInfo) -> Option<WriteMode> {
    if characteristic.has_property("write_without_response") {
        Some(WriteMode::WithoutResponse)
    } else if characteristic.has_property("write") {
        Some(WriteMode::WithResponse)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn characteristic(uuid: &str, properties: &[&str]) -> CharacteristicInfo {
        CharacteristicInfo::new(
            uuid.to_string(),
            properties
                .iter()
                .map(|property| (*property).to_string())
                .collect(),
        )
    }

    fn service(uuid: &str, characteristics: Vec<CharacteristicInfo>) -> ServiceInfo {
        ServiceInfo::new(uuid.to_string(), true, characteristics)
    }

    #[test]
    fn midi1_profile_matches_shared_characteristic() {
        let services = vec![service(
            &MIDI_SERVICE_UUID.to_ascii_uppercase(),
            vec![characteristic(
                MIDI_IO_CHARACTERISTIC_UUID,
                &["read", "write_without_response", "notify"],
            )],
        )];

        let negotiated = negotiate_midi_endpoints(&services, &GattProfile::midi1())
            .expect("midi service should match");

        assert_eq!(
            NegotiatedMidiEndpoints {
                service_uuid: MIDI_SERVICE_UUID.to_string(),
                input_uuid: Some(MIDI_IO_CHARACTERISTIC_UUID.to_string()),
                output: Some(NegotiatedOutput {
                    uuid: MIDI_IO_CHARACTERISTIC_UUID.to_string(),
                    write_mode: WriteMode::WithoutResponse,
                }),
            },
            negotiated
        );
    }

    #[test]
    fn midi2_profile_matches_split_characteristics() {
        let services = vec![service(
            MIDI_SERVICE_UUID,
            vec![
                characteristic(MIDI2_INPUT_CHARACTERISTIC_UUID, &["notify"]),
                characteristic(MIDI2_OUTPUT_CHARACTERISTIC_UUID, &["write"]),
            ],
        )];

        let negotiated = negotiate_midi_endpoints(&services, &GattProfile::midi2())
            .expect("midi 2.0 characteristics should match");

        assert_eq!(
            Some(MIDI2_INPUT_CHARACTERISTIC_UUID),
            negotiated.input_uuid.as_deref()
        );
        assert_eq!(
            Some(WriteMode::WithResponse),
            negotiated.output.map(|output| output.write_mode)
        );
    }

    #[rstest]
    #[case(&["notify"], true, false)]
    #[case(&["write"], false, true)]
    fn one_direction_is_enough(
        #[case] properties: &[&str],
        #[case] expect_input: bool,
        #[case] expect_output: bool,
    ) {
        let services = vec![service(
            MIDI_SERVICE_UUID,
            vec![characteristic(MIDI_IO_CHARACTERISTIC_UUID, properties)],
        )];

        let negotiated = negotiate_midi_endpoints(&services, &GattProfile::midi1())
            .expect("one direction should match");

        assert_eq!(expect_input, negotiated.input_uuid.is_some());
        assert_eq!(expect_output, negotiated.output.is_some());
    }

    #[test]
    fn missing_service_is_reported() {
        let services = vec![service(
            "0000180f-0000-1000-8000-00805f9b34fb",
            vec![characteristic(MIDI_IO_CHARACTERISTIC_UUID, &["notify"])],
        )];

        assert_matches!(
            negotiate_midi_endpoints(&services, &GattProfile::midi1()),
            Err(DiscoveryError::MissingService { .. })
        );
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![characteristic(MIDI_IO_CHARACTERISTIC_UUID, &["read"])])]
    #[case(vec![characteristic("00002a19-0000-1000-8000-00805f9b34fb", &["notify", "write"])])]
    fn service_without_usable_characteristic_is_reported(
        #[case] characteristics: Vec<CharacteristicInfo>,
    ) {
        let services = vec![service(MIDI_SERVICE_UUID, characteristics)];

        assert_matches!(
            negotiate_midi_endpoints(&services, &GattProfile::midi1()),
            Err(DiscoveryError::MissingMidiCharacteristics { service_uuid })
            if service_uuid == MIDI_SERVICE_UUID
        );
    }

    #[test]
    fn custom_profile_is_built_with_builder() {
        let profile = GattProfile::builder()
            .service_uuid(MIDI_SERVICE_UUID)
            .input_characteristic_uuid("7772e5db-3868-4112-a1a9-f2669d106bf6")
            .output_characteristic_uuid("7772e5db-3868-4112-a1a9-f2669d106bf7")
            .build();

        assert!(!profile.is_bidirectional());
        assert!(GattProfile::midi1().is_bidirectional());
    }
}
