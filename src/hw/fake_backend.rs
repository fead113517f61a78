use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::model::{CharacteristicInfo, DiscoveredRemote, RemoteIdentity, ServiceInfo};
use super::session::GattProfile;
use super::transport::{
    BondState, ConnectionHandle, ConnectionPriority, Transport, TransportCapabilities,
    TransportEvent, TransportEventStream, WriteMode,
};
use crate::controller::ConnectionRole;
use crate::error::{FixtureError, TransportError};
use crate::protocol::REQUESTED_ATT_MTU;

/// A scripted remote served by [`FakeTransport`].
#[derive(Debug, Clone, Builder)]
pub struct FakeRemote {
    #[builder(into)]
    identity: RemoteIdentity,
    #[builder(into)]
    local_name: Option<String>,
    rssi: Option<i16>,
    /// GATT table reported by service discovery.
    #[builder(default = default_services())]
    services: Vec<ServiceInfo>,
    #[builder(default = true)]
    bonded: bool,
    #[builder(default = BondState::Bonded)]
    bond_outcome: BondState,
    /// Packets sent once notifications are enabled, or once an incoming link
    /// opens in the peripheral role.
    #[builder(default)]
    notifications: Vec<Vec<u8>>,
    /// Largest ATT MTU the remote accepts.
    #[builder(default = REQUESTED_ATT_MTU)]
    mtu: u16,
    #[builder(default)]
    reject_mtu: bool,
    #[builder(default)]
    reject_connection: bool,
    #[builder(default)]
    fail_writes: bool,
}

impl FakeRemote {
    #[must_use]
    pub fn identity(&self) -> &RemoteIdentity {
        &self.identity
    }

    fn advertises(&self, service_uuid: &str) -> bool {
        self.services
            .iter()
            .any(|service| service.uuid().eq_ignore_ascii_case(service_uuid))
    }

    fn discovered(&self) -> DiscoveredRemote {
        DiscoveredRemote::new(self.identity.clone(), self.local_name.clone(), self.rssi)
    }
}

/// Settings for constructing a [`FakeTransport`].
#[derive(Debug, Clone, Builder)]
pub struct FakeTransportConfig {
    #[builder(default)]
    remotes: Vec<FakeRemote>,
    #[builder(default = true)]
    central: bool,
    #[builder(default = true)]
    peripheral: bool,
    /// Delay between starting a scan and reporting remotes.
    #[builder(default)]
    discovery_delay: Duration,
}

/// A packet written to a fake remote.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WrittenPacket {
    pub handle: ConnectionHandle,
    pub identity: RemoteIdentity,
    pub characteristic: String,
    pub value: Vec<u8>,
    pub mode: WriteMode,
}

#[derive(Debug)]
struct FakeLink {
    remote: FakeRemote,
    bonded: bool,
    fail_writes: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    next_handle: u64,
    links: HashMap<ConnectionHandle, FakeLink>,
    connect_attempts: HashMap<RemoteIdentity, usize>,
    scanning: bool,
    advertised_name: Option<String>,
    written: Vec<WrittenPacket>,
    closed: bool,
}

/// In-memory transport for tests and hardware-free runs.
///
/// Every procedure completes immediately; asynchronous outcomes are queued
/// on the event stream in the order a radio stack would report them.
#[derive(Debug)]
pub struct FakeTransport {
    remotes: Vec<FakeRemote>,
    capabilities: TransportCapabilities,
    discovery_delay: Duration,
    sender: UnboundedSender<TransportEvent>,
    receiver: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    #[must_use]
    pub fn new(config: FakeTransportConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            remotes: config.remotes,
            capabilities: TransportCapabilities {
                central: config.central,
                peripheral: config.peripheral,
            },
            discovery_delay: config.discovery_delay,
            sender,
            receiver: Mutex::new(Some(receiver)),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Returns every packet written so far, oldest first.
    #[must_use]
    pub fn written_packets(&self) -> Vec<WrittenPacket> {
        self.state.lock().written.clone()
    }

    /// Opens a link as if `identity` connected to our advertised service.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote is unknown or the transport is closed.
    pub fn accept_incoming(
        &self,
        identity: &RemoteIdentity,
    ) -> Result<ConnectionHandle, TransportError> {
        let remote = self.remote(identity)?.clone();
        let handle = self.open_link(remote.clone())?;
        self.emit(TransportEvent::IncomingConnection {
            handle,
            remote: identity.clone(),
        });
        let characteristic = GattProfile::default().input_characteristic_uuid().to_string();
        for value in remote.notifications {
            self.emit(TransportEvent::Notification {
                handle,
                characteristic: characteristic.clone(),
                value,
            });
        }
        Ok(handle)
    }

    /// Delivers one value on the open link to `identity`.
    pub fn inject_notification(
        &self,
        identity: &RemoteIdentity,
        characteristic: &str,
        value: Vec<u8>,
    ) -> bool {
        let Some(handle) = self.handle_for(identity) else {
            return false;
        };
        self.emit(TransportEvent::Notification {
            handle,
            characteristic: characteristic.to_string(),
            value,
        });
        true
    }

    /// Reports an MTU change on the open link to `identity`.
    pub fn change_mtu(&self, identity: &RemoteIdentity, mtu: u16) -> bool {
        let Some(handle) = self.handle_for(identity) else {
            return false;
        };
        self.emit(TransportEvent::MtuChanged { handle, mtu });
        true
    }

    /// Drops the link to `identity` as if the radio lost it.
    pub fn drop_link(&self, identity: &RemoteIdentity) -> bool {
        let handle = {
            let mut state = self.state.lock();
            let Some(handle) = find_handle(&state, identity) else {
                return false;
            };
            state.links.remove(&handle);
            handle
        };
        debug!(%identity, %handle, "fake link dropped");
        self.emit(TransportEvent::Disconnected { handle });
        true
    }

    /// Makes subsequent writes to `identity` fail or succeed.
    pub fn set_fail_writes(&self, identity: &RemoteIdentity, fail_writes: bool) {
        let mut state = self.state.lock();
        for link in state.links.values_mut() {
            if link.remote.identity == *identity {
                link.fail_writes = fail_writes;
            }
        }
    }

    #[must_use]
    pub fn handle_for(&self, identity: &RemoteIdentity) -> Option<ConnectionHandle> {
        find_handle(&self.state.lock(), identity)
    }

    #[must_use]
    pub fn is_connected(&self, identity: &RemoteIdentity) -> bool {
        self.handle_for(identity).is_some()
    }

    /// Counts `connect` calls made for `identity`, refused ones included.
    #[must_use]
    pub fn connect_attempts(&self, identity: &RemoteIdentity) -> usize {
        self.state
            .lock()
            .connect_attempts
            .get(identity)
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    #[must_use]
    pub fn advertised_name(&self) -> Option<String> {
        self.state.lock().advertised_name.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn emit(&self, event: TransportEvent) {
        trace!(?event, "fake transport event");
        let _ = self.sender.send(event);
    }

    fn remote(&self, identity: &RemoteIdentity) -> Result<&FakeRemote, TransportError> {
        self.remotes
            .iter()
            .find(|remote| remote.identity == *identity)
            .ok_or_else(|| TransportError::UnknownRemote {
                identity: identity.clone(),
            })
    }

    fn open_link(&self, remote: FakeRemote) -> Result<ConnectionHandle, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.next_handle += 1;
        let handle = ConnectionHandle::from(state.next_handle);
        state.links.insert(
            handle,
            FakeLink {
                bonded: remote.bonded,
                fail_writes: remote.fail_writes,
                remote,
            },
        );
        Ok(handle)
    }

    fn with_link<T>(
        &self,
        handle: ConnectionHandle,
        operation: impl FnOnce(&mut FakeLink) -> T,
    ) -> Result<T, TransportError> {
        let mut state = self.state.lock();
        state
            .links
            .get_mut(&handle)
            .map(operation)
            .ok_or(TransportError::UnknownConnection { handle })
    }

    fn require(&self, role: ConnectionRole) -> Result<(), TransportError> {
        if self.state.lock().closed {
            return Err(TransportError::Closed);
        }
        if self.capabilities.supports(role) {
            Ok(())
        } else {
            Err(TransportError::UnsupportedRole { role })
        }
    }
}

fn find_handle(state: &FakeState, identity: &RemoteIdentity) -> Option<ConnectionHandle> {
    state
        .links
        .iter()
        .find(|(_, link)| link.remote.identity == *identity)
        .map(|(handle, _)| *handle)
}

#[async_trait]
impl Transport for FakeTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn events(&self) -> Result<TransportEventStream, TransportError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(TransportError::EventsTaken)?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn start_scan(&self, service_uuid: &str) -> Result<(), TransportError> {
        self.require(ConnectionRole::Central)?;
        self.state.lock().scanning = true;

        let discovered: Vec<_> = self
            .remotes
            .iter()
            .filter(|remote| remote.advertises(service_uuid))
            .map(FakeRemote::discovered)
            .collect();
        if self.discovery_delay.is_zero() {
            for remote in discovered {
                self.emit(TransportEvent::Discovered { remote });
            }
        } else {
            let sender = self.sender.clone();
            let delay = self.discovery_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for remote in discovered {
                    let _ = sender.send(TransportEvent::Discovered { remote });
                }
            });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.lock().scanning = false;
        Ok(())
    }

    async fn start_advertising(
        &self,
        local_name: &str,
        profile: &GattProfile,
    ) -> Result<(), TransportError> {
        self.require(ConnectionRole::Peripheral)?;
        debug!(local_name, service_uuid = profile.service_uuid(), "fake advertising started");
        self.state.lock().advertised_name = Some(local_name.to_string());
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        self.state.lock().advertised_name = None;
        Ok(())
    }

    async fn connect(&self, identity: &RemoteIdentity) -> Result<ConnectionHandle, TransportError> {
        self.require(ConnectionRole::Central)?;
        *self
            .state
            .lock()
            .connect_attempts
            .entry(identity.clone())
            .or_default() += 1;
        let remote = self.remote(identity)?.clone();
        if remote.reject_connection {
            return Err(TransportError::Rejected {
                operation: "connect",
            });
        }
        let handle = self.open_link(remote)?;
        self.emit(TransportEvent::Connected { handle });
        Ok(handle)
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let removed = self.state.lock().links.remove(&handle);
        if removed.is_none() {
            return Err(TransportError::UnknownConnection { handle });
        }
        self.emit(TransportEvent::Disconnected { handle });
        Ok(())
    }

    async fn discover_services(
        &self,
        handle: ConnectionHandle,
    ) -> Result<Vec<ServiceInfo>, TransportError> {
        self.with_link(handle, |link| link.remote.services.clone())
    }

    async fn read_characteristic(
        &self,
        handle: ConnectionHandle,
        _uuid: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.with_link(handle, |_| Vec::new())
    }

    async fn write_characteristic(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let link = state
            .links
            .get(&handle)
            .ok_or(TransportError::UnknownConnection { handle })?;
        if link.fail_writes {
            return Err(TransportError::Rejected { operation: "write" });
        }
        let identity = link.remote.identity.clone();
        state.written.push(WrittenPacket {
            handle,
            identity,
            characteristic: uuid.to_ascii_lowercase(),
            value: value.to_vec(),
            mode,
        });
        Ok(())
    }

    async fn enable_notifications(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
    ) -> Result<(), TransportError> {
        let notifications = self.with_link(handle, |link| link.remote.notifications.clone())?;
        for value in notifications {
            self.emit(TransportEvent::Notification {
                handle,
                characteristic: uuid.to_string(),
                value,
            });
        }
        Ok(())
    }

    async fn request_mtu(&self, handle: ConnectionHandle, mtu: u16) -> Result<u16, TransportError> {
        let (rejected, remote_mtu) =
            self.with_link(handle, |link| (link.remote.reject_mtu, link.remote.mtu))?;
        if rejected {
            return Err(TransportError::Rejected {
                operation: "MTU request",
            });
        }
        Ok(mtu.min(remote_mtu))
    }

    async fn request_connection_priority(
        &self,
        handle: ConnectionHandle,
        priority: ConnectionPriority,
    ) -> Result<(), TransportError> {
        self.with_link(handle, |_| trace!(%handle, %priority, "fake priority set"))
    }

    async fn is_bonded(&self, handle: ConnectionHandle) -> Result<bool, TransportError> {
        self.with_link(handle, |link| link.bonded)
    }

    async fn request_bond(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let state = self.with_link(handle, |link| {
            link.bonded = link.remote.bond_outcome == BondState::Bonded;
            link.remote.bond_outcome
        })?;
        self.emit(TransportEvent::BondStateChanged { handle, state });
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.closed = true;
        state.scanning = false;
        state.advertised_name = None;
        Ok(())
    }
}

/// Parsed `identity|name|rssi;...` discovery fixture.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct ScanFixture {
    remotes: Vec<FakeRemote>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let remotes = value
            .split(';')
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { remotes })
    }
}

/// Parsed comma-separated hex packets.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub(crate) struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        let payloads = value
            .split(',')
            .map(parse_hex)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { payloads })
    }
}

impl ScanFixture {
    /// Scripts every fixture remote to send `notifications` once subscribed.
    pub(crate) fn with_notifications(self, notifications: &NotificationPayloads) -> Vec<FakeRemote> {
        self.remotes
            .into_iter()
            .map(|mut remote| {
                remote.notifications.clone_from(&notifications.payloads);
                remote
            })
            .collect()
    }
}

fn parse_scan_record(raw_record: &str) -> Result<FakeRemote, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [identity, local_name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if identity.is_empty() || local_name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = (*local_name != "-").then(|| (*local_name).to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(FakeRemote::builder()
        .identity(*identity)
        .maybe_local_name(local_name)
        .maybe_rssi(rssi)
        .build())
}

pub(crate) fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(cleaned)?)
}

fn default_services() -> Vec<ServiceInfo> {
    let profile = GattProfile::default();
    vec![ServiceInfo::new(
        profile.service_uuid().to_string(),
        true,
        vec![CharacteristicInfo::new(
            profile.input_characteristic_uuid().to_string(),
            vec![
                "read".to_string(),
                "write_without_response".to_string(),
                "notify".to_string(),
            ],
        )],
    )]
}
