use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Standard BLE-MIDI GATT service.
pub(crate) const MIDI_SERVICE_UUID: &str = "03b80e5a-ede8-4b33-a751-6ce34ec4c700";
/// Bidirectional MIDI 1.0 data characteristic.
pub(crate) const MIDI_IO_CHARACTERISTIC_UUID: &str = "7772e5db-3868-4112-a1a9-f2669d106bf3";
/// MIDI 2.0 variant characteristic carrying data from the remote to us.
pub(crate) const MIDI2_INPUT_CHARACTERISTIC_UUID: &str = "7772e5db-3868-4112-a1a9-f2669d106bf4";
/// MIDI 2.0 variant characteristic carrying data from us to the remote.
pub(crate) const MIDI2_OUTPUT_CHARACTERISTIC_UUID: &str = "7772e5db-3868-4112-a1a9-f2669d106bf5";
/// Client Characteristic Configuration descriptor (`0x2902`).
pub(crate) const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

/// ATT MTU every link starts with before negotiation.
pub(crate) const DEFAULT_ATT_MTU: u16 = 23;
/// ATT MTU requested during connection configuration.
pub(crate) const REQUESTED_ATT_MTU: u16 = 517;
/// Bytes of each ATT PDU consumed by the opcode and attribute handle.
pub(crate) const ATT_HEADER_LEN: u16 = 3;

/// Largest BLE-MIDI packet that fits in one ATT PDU for a negotiated MTU.
pub(crate) fn max_payload_for_mtu(mtu: u16) -> usize {
    usize::from(mtu.max(DEFAULT_ATT_MTU) - ATT_HEADER_LEN)
}

/// Known BLE-MIDI protocol endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// BLE-MIDI primary service.
    #[strum(to_string = "midi_service")]
    MidiService,
    /// MIDI 1.0 data characteristic used for both directions.
    #[strum(to_string = "midi_io_characteristic")]
    MidiIoCharacteristic,
    /// MIDI 2.0 variant input characteristic.
    #[strum(to_string = "midi2_input_characteristic")]
    Midi2InputCharacteristic,
    /// MIDI 2.0 variant output characteristic.
    #[strum(to_string = "midi2_output_characteristic")]
    Midi2OutputCharacteristic,
    /// Descriptor written to enable notifications.
    #[strum(to_string = "client_characteristic_configuration")]
    ClientCharacteristicConfiguration,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
}

impl EndpointMetadata {
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }
}

static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Resolves a UUID string to a known endpoint, ignoring case.
pub(crate) fn endpoint_for_uuid(uuid: &str) -> Option<EndpointId> {
    EndpointId::iter().find(|endpoint| endpoint_metadata(*endpoint).uuid().eq_ignore_ascii_case(uuid))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::MidiService => EndpointMetadata {
            name: "BLE-MIDI service",
            uuid: MIDI_SERVICE_UUID,
        },
        EndpointId::MidiIoCharacteristic => EndpointMetadata {
            name: "MIDI I/O data",
            uuid: MIDI_IO_CHARACTERISTIC_UUID,
        },
        EndpointId::Midi2InputCharacteristic => EndpointMetadata {
            name: "MIDI 2.0 input data",
            uuid: MIDI2_INPUT_CHARACTERISTIC_UUID,
        },
        EndpointId::Midi2OutputCharacteristic => EndpointMetadata {
            name: "MIDI 2.0 output data",
            uuid: MIDI2_OUTPUT_CHARACTERISTIC_UUID,
        },
        EndpointId::ClientCharacteristicConfiguration => EndpointMetadata {
            name: "client characteristic configuration",
            uuid: CCCD_UUID,
        },
    }
}
