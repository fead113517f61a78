use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, instrument, trace, warn};

use super::model::{CharacteristicInfo, DiscoveredRemote, RemoteIdentity, ServiceInfo};
use super::session::GattProfile;
use super::transport::{
    BondState, ConnectionHandle, ConnectionPriority, Transport, TransportCapabilities,
    TransportEvent, TransportEventStream, WriteMode,
};
use crate::controller::ConnectionRole;
use crate::error::TransportError;

#[derive(Debug)]
struct BtleplugLink {
    peripheral: Peripheral,
    characteristics: HashMap<String, Characteristic>,
    notification_task: Option<JoinHandle<()>>,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: &str) -> Result<Characteristic, TransportError> {
        self.characteristics
            .get(&uuid.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| TransportError::MissingCharacteristic {
                uuid: uuid.to_string(),
            })
    }
}

#[derive(Debug, Default)]
struct BtleplugState {
    next_handle: u64,
    links: HashMap<ConnectionHandle, BtleplugLink>,
    scan_service: Option<String>,
}

impl BtleplugState {
    fn handle_for(&self, id: &PeripheralId) -> Option<ConnectionHandle> {
        self.links
            .iter()
            .find(|(_, link)| link.peripheral.id() == *id)
            .map(|(handle, _)| *handle)
    }
}

/// Central-role transport backed by the host Bluetooth stack via `btleplug`.
///
/// The host operating system owns pairing, MTU and connection parameters;
/// requests for them are answered conservatively.
#[derive(Debug)]
pub struct BtleplugTransport {
    adapter: Adapter,
    sender: UnboundedSender<TransportEvent>,
    receiver: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
    state: Arc<Mutex<BtleplugState>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugTransport {
    /// Opens the first Bluetooth adapter on the host.
    ///
    /// # Errors
    ///
    /// Returns an error when no adapter exists or the stack cannot be reached.
    #[instrument(level = "debug")]
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapters)?;
        let adapter_name = adapter.adapter_info().await?;
        info!(adapter = %adapter_name, "using BLE adapter");

        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(BtleplugState::default()));
        let adapter_events = adapter.events().await?;
        let forwarder = tokio::spawn(forward_adapter_events(
            adapter.clone(),
            adapter_events,
            Arc::clone(&state),
            sender.clone(),
        ));

        Ok(Self {
            adapter,
            sender,
            receiver: Mutex::new(Some(receiver)),
            state,
            forwarder: Mutex::new(Some(forwarder)),
        })
    }

    fn link<T>(
        &self,
        handle: ConnectionHandle,
        operation: impl FnOnce(&BtleplugLink) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let state = self.state.lock();
        let link = state
            .links
            .get(&handle)
            .ok_or(TransportError::UnknownConnection { handle })?;
        operation(link)
    }

    fn peripheral(&self, handle: ConnectionHandle) -> Result<Peripheral, TransportError> {
        self.link(handle, |link| Ok(link.peripheral.clone()))
    }

    async fn find_peripheral(&self, identity: &RemoteIdentity) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.id().to_string() == identity.as_str())
            .ok_or_else(|| TransportError::UnknownRemote {
                identity: identity.clone(),
            })
    }
}

async fn forward_adapter_events(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn tokio_stream::Stream<Item = CentralEvent> + Send>>,
    state: Arc<Mutex<BtleplugState>>,
    sender: UnboundedSender<TransportEvent>,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Some(service_uuid) = state.lock().scan_service.clone() else {
                    continue;
                };
                let properties = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral.properties().await,
                    Err(error) => Err(error),
                };
                let Ok(Some(properties)) = properties else {
                    continue;
                };
                if !advertises_service(&properties, &service_uuid) {
                    continue;
                }
                let remote = DiscoveredRemote::new(
                    id.to_string().into(),
                    properties.local_name,
                    properties.rssi,
                );
                if sender.send(TransportEvent::Discovered { remote }).is_err() {
                    break;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let removed = {
                    let mut state = state.lock();
                    state
                        .handle_for(&id)
                        .and_then(|handle| state.links.remove(&handle).map(|link| (handle, link)))
                };
                if let Some((handle, link)) = removed {
                    if let Some(task) = link.notification_task {
                        task.abort();
                    }
                    let _ = sender.send(TransportEvent::Disconnected { handle });
                }
            }
            other => trace!(event = ?other, "ignoring adapter event"),
        }
    }
    debug!("adapter event stream ended");
}

fn advertises_service(properties: &PeripheralProperties, service_uuid: &str) -> bool {
    properties
        .services
        .iter()
        .any(|uuid| uuid.to_string().eq_ignore_ascii_case(service_uuid))
}

#[async_trait]
impl Transport for BtleplugTransport {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            central: true,
            peripheral: false,
        }
    }

    fn events(&self) -> Result<TransportEventStream, TransportError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(TransportError::EventsTaken)?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self, service_uuid: &str) -> Result<(), TransportError> {
        self.state.lock().scan_service = Some(service_uuid.to_ascii_lowercase());
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.lock().scan_service = None;
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn start_advertising(
        &self,
        _local_name: &str,
        _profile: &GattProfile,
    ) -> Result<(), TransportError> {
        Err(TransportError::UnsupportedRole {
            role: ConnectionRole::Peripheral,
        })
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%identity))]
    async fn connect(&self, identity: &RemoteIdentity) -> Result<ConnectionHandle, TransportError> {
        let peripheral = self.find_peripheral(identity).await?;
        let handle = {
            let mut state = self.state.lock();
            state.next_handle += 1;
            let handle = ConnectionHandle::from(state.next_handle);
            state.links.insert(
                handle,
                BtleplugLink {
                    peripheral: peripheral.clone(),
                    characteristics: HashMap::new(),
                    notification_task: None,
                },
            );
            handle
        };

        let sender = self.sender.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let connected = match peripheral.is_connected().await {
                Ok(true) => Ok(()),
                Ok(false) | Err(_) => peripheral.connect().await,
            };
            let event = match connected {
                Ok(()) => TransportEvent::Connected { handle },
                Err(error) => {
                    warn!(%error, %handle, "connection attempt failed");
                    state.lock().links.remove(&handle);
                    TransportEvent::Disconnected { handle }
                }
            };
            let _ = sender.send(event);
        });
        Ok(handle)
    }

    #[instrument(skip(self), level = "debug", fields(%handle))]
    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let link = self
            .state
            .lock()
            .links
            .remove(&handle)
            .ok_or(TransportError::UnknownConnection { handle })?;
        if let Some(task) = link.notification_task {
            task.abort();
        }
        let _ = self.sender.send(TransportEvent::Disconnected { handle });
        if link.peripheral.is_connected().await? {
            link.peripheral.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%handle))]
    async fn discover_services(
        &self,
        handle: ConnectionHandle,
    ) -> Result<Vec<ServiceInfo>, TransportError> {
        let peripheral = self.peripheral(handle)?;
        peripheral.discover_services().await?;
        let (services, characteristics) = collect_services_and_characteristics(&peripheral);
        if let Some(link) = self.state.lock().links.get_mut(&handle) {
            link.characteristics = characteristics;
        }
        Ok(services)
    }

    #[instrument(skip(self), level = "trace", fields(%handle))]
    async fn read_characteristic(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) =
            self.link(handle, |link| Ok((link.peripheral.clone(), link.characteristic(uuid)?)))?;
        Ok(peripheral.read(&characteristic).await?)
    }

    #[instrument(skip(self, value), level = "trace", fields(%handle, %mode, len = value.len()))]
    async fn write_characteristic(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) =
            self.link(handle, |link| Ok((link.peripheral.clone(), link.characteristic(uuid)?)))?;
        peripheral
            .write(&characteristic, value, write_type(mode))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%handle))]
    async fn enable_notifications(
        &self,
        handle: ConnectionHandle,
        uuid: &str,
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) =
            self.link(handle, |link| Ok((link.peripheral.clone(), link.characteristic(uuid)?)))?;
        peripheral.subscribe(&characteristic).await?;

        let mut notifications = peripheral.notifications().await?;
        let sender = self.sender.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let event = TransportEvent::Notification {
                    handle,
                    characteristic: notification.uuid.to_string(),
                    value: notification.value,
                };
                if sender.send(event).is_err() {
                    break;
                }
            }
        });

        match self.state.lock().links.get_mut(&handle) {
            Some(link) => {
                if let Some(previous) = link.notification_task.replace(task) {
                    previous.abort();
                }
            }
            None => task.abort(),
        }
        Ok(())
    }

    async fn request_mtu(&self, _handle: ConnectionHandle, _mtu: u16) -> Result<u16, TransportError> {
        Err(TransportError::Rejected {
            operation: "MTU request",
        })
    }

    async fn request_connection_priority(
        &self,
        _handle: ConnectionHandle,
        _priority: ConnectionPriority,
    ) -> Result<(), TransportError> {
        Err(TransportError::Rejected {
            operation: "connection priority request",
        })
    }

    async fn is_bonded(&self, handle: ConnectionHandle) -> Result<bool, TransportError> {
        // The host pairs on demand when an encrypted characteristic is touched.
        self.link(handle, |_| Ok(true))
    }

    async fn request_bond(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        self.link(handle, |_| Ok(()))?;
        let _ = self.sender.send(TransportEvent::BondStateChanged {
            handle,
            state: BondState::Bonded,
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn close(&self) -> Result<(), TransportError> {
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
        let links: Vec<_> = self.state.lock().links.drain().collect();
        for (handle, link) in links {
            if let Some(task) = link.notification_task {
                task.abort();
            }
            if let Err(error) = link.peripheral.disconnect().await {
                debug!(%error, %handle, "failed to disconnect cleanly");
            }
        }
        if let Err(error) = self.adapter.stop_scan().await {
            debug!(%error, "failed to stop adapter scan cleanly");
        }
        Ok(())
    }
}

fn write_type(mode: WriteMode) -> WriteType {
    match mode {
        WriteMode::WithResponse => WriteType::WithResponse,
        WriteMode::WithoutResponse => WriteType::WithoutResponse,
    }
}

fn collect_services_and_characteristics(
    peripheral: &Peripheral,
) -> (Vec<ServiceInfo>, HashMap<String, Characteristic>) {
    let mut services = Vec::new();
    let mut characteristics_by_uuid = HashMap::new();

    for service in peripheral.services() {
        let mut characteristics = Vec::new();
        for characteristic in &service.characteristics {
            let characteristic_uuid = characteristic.uuid.to_string().to_lowercase();
            characteristics_by_uuid
                .entry(characteristic_uuid.clone())
                .or_insert_with(|| characteristic.clone());
            characteristics.push(CharacteristicInfo::new(
                characteristic_uuid,
                property_labels(characteristic.properties),
            ));
        }
        characteristics.sort_by(|left, right| left.uuid().cmp(right.uuid()));

        services.push(ServiceInfo::new(
            service.uuid.to_string().to_lowercase(),
            service.primary,
            characteristics,
        ));
    }
    services.sort_by(|left, right| left.uuid().cmp(right.uuid()));

    (services, characteristics_by_uuid)
}

fn property_labels(flags: CharPropFlags) -> Vec<String> {
    let labels: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();
    if labels.is_empty() {
        vec!["none".to_string()]
    } else {
        labels
    }
}
