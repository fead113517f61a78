//! MIDI over Bluetooth Low Energy.
//!
//! [`MidiEvent`]s travel in BLE-MIDI packets built by [`EncodeSession`] and
//! parsed by [`DecodeSession`]. A [`CentralProvider`] scans for and connects
//! to MIDI peripherals, a [`PeripheralProvider`] advertises the MIDI service
//! and accepts centrals. Either way, every connection that becomes ready
//! shows up in a [`DeviceRegistry`] as a [`MidiInputEndpoint`] and a
//! [`MidiOutputEndpoint`] keyed by the remote's identity.

mod app;
mod cli;
mod codec;
mod config;
mod controller;
mod endpoint;
mod error;
mod hw;
mod protocol;
mod provider;
mod registry;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    Backend, default_output_format, run, run_with_clients, run_with_clients_and_log_level,
    run_with_log_level,
};
pub use cli::{
    AdvertiseArgs, Args, Command, FakeArgs, ListenArgs, LogLevel, MidiMessageArg, OutputFormat,
    ScanArgs, SendArgs,
};
pub use codec::{
    DecodeSession, DecodedMessage, EncodeSession, MIN_MAX_PAYLOAD, MidiEvent, PacketCodecError,
    encode_event,
};
pub use config::ProviderConfig;
pub use controller::{
    ConnectionController, ConnectionOutcome, ConnectionRole, ControllerContext, LifecycleState,
};
pub use endpoint::{
    EndpointDirection, EndpointInfo, MidiInputEndpoint, MidiInputListener, MidiOutputEndpoint,
    ReceivedMidiMessage,
};
pub use error::{CommandError, DiscoveryError, FixtureError, ProviderError, TransportError};
pub use hw::{
    BondState, BtleplugTransport, CharacteristicInfo, ConnectionHandle, ConnectionPriority,
    DiscoveredRemote, FakeRemote, FakeTransport, FakeTransportConfig, GattProfile,
    RemoteIdentity, ServiceInfo, Transport, TransportCapabilities, TransportEvent,
    TransportEventStream, WriteMode, WrittenPacket,
};
pub use protocol::EndpointId;
pub use provider::{CentralProvider, PeripheralProvider};
pub use registry::{AttachEvent, DeviceAttachListener, DeviceRegistry};
pub use terminal::{SystemTerminalClient, TerminalClient};
