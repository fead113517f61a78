mod btleplug_backend;
mod fake_backend;
mod model;
mod session;
mod transport;

pub use self::btleplug_backend::BtleplugTransport;
pub use self::fake_backend::{FakeRemote, FakeTransport, FakeTransportConfig, WrittenPacket};
pub(crate) use self::fake_backend::{NotificationPayloads, ScanFixture, parse_hex};
pub use self::model::{CharacteristicInfo, DiscoveredRemote, RemoteIdentity, ServiceInfo};
pub use self::session::GattProfile;
pub(crate) use self::session::{NegotiatedMidiEndpoints, negotiate_midi_endpoints};
pub use self::transport::{
    BondState, ConnectionHandle, ConnectionPriority, Transport, TransportCapabilities,
    TransportEvent, TransportEventStream, WriteMode,
};
