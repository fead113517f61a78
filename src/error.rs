use thiserror::Error;

use crate::controller::ConnectionRole;
use crate::hw::{ConnectionHandle, RemoteIdentity};

/// Errors returned by BLE transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the transport does not support the {role} role")]
    UnsupportedRole { role: ConnectionRole },
    #[error("connection {handle} is not open")]
    UnknownConnection { handle: ConnectionHandle },
    #[error("remote `{identity}` is not known to the transport")]
    UnknownRemote { identity: RemoteIdentity },
    #[error("characteristic `{uuid}` was not found on the connection")]
    MissingCharacteristic { uuid: String },
    #[error("{operation} was rejected by the remote or the host stack")]
    Rejected { operation: &'static str },
    #[error("the transport event stream has already been taken")]
    EventsTaken,
    #[error("the transport is closed")]
    Closed,
}

/// Reasons a connected remote is not usable as a MIDI device.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DiscoveryError {
    #[error("required service `{service_uuid}` was not found on the remote")]
    MissingService { service_uuid: String },
    #[error("service `{service_uuid}` exposes none of the MIDI data characteristics")]
    MissingMidiCharacteristics { service_uuid: String },
}

/// Errors returned when creating or driving a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("the {role} role is unsupported on this host")]
    Unsupported {
        role: ConnectionRole,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors returned when parsing fake transport fixtures and CLI payloads.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("payload is not valid hex")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("`{value}` is not a complete MIDI message")]
    InvalidMidiMessage { value: String },
}

/// Errors raised by CLI commands beyond provider and transport failures.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no BLE-MIDI output attached within {waited}")]
    NoOutputAttached { waited: String },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
