use std::pin::Pin;

use async_trait::async_trait;
use derive_more::{Display, From, Into};
use serde_with::SerializeDisplay;
use tokio_stream::Stream;

use super::model::{DiscoveredRemote, RemoteIdentity, ServiceInfo};
use super::session::GattProfile;
use crate::controller::ConnectionRole;
use crate::error::TransportError;

/// Transport-assigned key for one open link.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("#{_0}")]
pub struct ConnectionHandle(u64);

/// GATT write procedure used for outgoing packets.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, SerializeDisplay)]
pub enum WriteMode {
    #[display("with_response")]
    WithResponse,
    #[display("without_response")]
    WithoutResponse,
}

/// Link-layer connection interval preference.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display, SerializeDisplay)]
pub enum ConnectionPriority {
    #[display("balanced")]
    Balanced,
    /// Shortest connection interval, lowest latency.
    #[default]
    #[display("high")]
    High,
    #[display("low_power")]
    LowPower,
}

/// Outcome of a bonding attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum BondState {
    #[display("bonded")]
    Bonded,
    #[display("failed")]
    Failed,
}

/// Roles a transport can play on this host.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TransportCapabilities {
    pub central: bool,
    pub peripheral: bool,
}

impl TransportCapabilities {
    #[must_use]
    pub fn supports(self, role: ConnectionRole) -> bool {
        match role {
            ConnectionRole::Central => self.central,
            ConnectionRole::Peripheral => self.peripheral,
        }
    }
}

/// Callbacks from the radio stack, delivered on one stream per transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportEvent {
    /// A remote advertising the scanned service was seen.
    Discovered { remote: DiscoveredRemote },
    /// A central connected to our advertised service.
    IncomingConnection {
        handle: ConnectionHandle,
        remote: RemoteIdentity,
    },
    Connected { handle: ConnectionHandle },
    Disconnected { handle: ConnectionHandle },
    BondStateChanged {
        handle: ConnectionHandle,
        state: BondState,
    },
    /// A value arrived on a characteristic: a notification in the central
    /// role, a write from the remote in the peripheral role.
    Notification {
        handle: ConnectionHandle,
        characteristic: String,
        value: Vec<u8>,
    },
    MtuChanged { handle: ConnectionHandle, mtu: u16 },
}

impl TransportEvent {
    /// Returns the connection this event belongs to, if any.
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match self {
            Self::Discovered { .. } => None,
            Self::IncomingConnection { handle, .. }
            | Self::Connected { handle }
            | Self::Disconnected { handle }
            | Self::BondStateChanged { handle, .. }
            | Self::Notification { handle, .. }
            | Self::MtuChanged { handle, .. } => Some(*handle),
        }
    }
}

pub type TransportEventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Radio stack operations consumed by connection controllers and providers.
///
/// Results of long-running procedures (connection establishment, bonding,
/// link loss) are reported on the event stream rather than returned.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    fn capabilities(&self) -> TransportCapabilities;

    /// Takes the event stream; only the first call succeeds.
    fn events(&self) -> Result<TransportEventStream, TransportError>;

    async fn start_scan(&self, service_uuid: &str) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Hosts `profile` and advertises it under `local_name`.
    async fn start_advertising(
        &self,
        local_name: &str,
        profile: &GattProfile,
    ) -> Result<(), TransportError>;

    async fn stop_advertising(&self) -> Result<(), TransportError>;

    /// Starts connecting; `TransportEvent::Connected` follows on success.
    async fn connect(&self, identity: &RemoteIdentity) -> Result<ConnectionHandle, TransportError>;

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    async fn discover_services(
        &self,
        handle: ConnectionHandle,
    ) -> Result<Vec<ServiceInfo>, TransportError>;

    async fn read_characteristic(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
    ) -> Result<Vec<u8>, TransportError>;

    async fn write_characteristic(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    async fn enable_notifications(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
    ) -> Result<(), TransportError>;

    /// Requests an ATT MTU and returns the negotiated value.
    async fn request_mtu(&self, handle: ConnectionHandle, mtu: u16) -> Result<u16, TransportError>;

    async fn request_connection_priority(
        &self,
        handle: ConnectionHandle,
        priority: ConnectionPriority,
    ) -> Result<(), TransportError>;

    async fn is_bonded(&self, handle: ConnectionHandle) -> Result<bool, TransportError>;

    /// Starts bonding; the outcome arrives as `TransportEvent::BondStateChanged`.
    async fn request_bond(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Releases radio resources. Called once, after every connection is gone.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
