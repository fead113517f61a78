use std::sync::Arc;

use serde_with::SerializeDisplay;
use strum_macros::Display;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ProviderConfig;
use crate::endpoint::{MidiInputEndpoint, MidiOutputEndpoint};
use crate::error::TransportError;
use crate::hw::{
    BondState, ConnectionHandle, NegotiatedMidiEndpoints, RemoteIdentity, Transport,
    TransportEvent, negotiate_midi_endpoints,
};
use crate::protocol::{DEFAULT_ATT_MTU, max_payload_for_mtu};
use crate::registry::DeviceRegistry;
use crate::utils::format_hex;

/// Which side initiated the link.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, SerializeDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionRole {
    /// We scanned for and connected to the remote.
    Central,
    /// The remote connected to our advertised service.
    Peripheral,
}

/// Lifecycle of one remote connection.
///
/// `MatchFailed` and `Disconnected` are terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, SerializeDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Connecting,
    DiscoveringServices,
    MatchFailed,
    Bonding,
    Configuring,
    Ready,
    Disconnected,
}

impl LifecycleState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::MatchFailed | Self::Disconnected)
    }
}

/// How a finished connection ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConnectionOutcome {
    pub final_state: LifecycleState,
    /// The remote has no usable MIDI service or refused to bond.
    pub rejected: bool,
}

/// Collaborators shared by every connection of a provider.
#[derive(Debug, Clone)]
pub struct ControllerContext {
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    config: Arc<ProviderConfig>,
}

impl ControllerContext {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<DeviceRegistry>,
        config: Arc<ProviderConfig>,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
        }
    }
}

/// Drives one remote connection from connect to teardown.
///
/// The controller is the only owner of its transport handle and the only
/// writer of its lifecycle state. Endpoints are created on the way to
/// `Ready` and closed, after their detach notifications, on teardown.
#[derive(Debug)]
pub struct ConnectionController {
    role: ConnectionRole,
    identity: RemoteIdentity,
    name: String,
    context: ControllerContext,
    state: LifecycleState,
    rejected: bool,
    handle: Option<ConnectionHandle>,
    matched: Option<NegotiatedMidiEndpoints>,
    mtu: u16,
    input: Option<MidiInputEndpoint>,
    output: Option<MidiOutputEndpoint>,
    outgoing_tx: UnboundedSender<Vec<u8>>,
    outgoing_rx: Option<UnboundedReceiver<Vec<u8>>>,
}

impl ConnectionController {
    /// Creates a controller that will connect out to `identity`.
    #[must_use]
    pub fn central(identity: RemoteIdentity, name: String, context: ControllerContext) -> Self {
        Self::new(ConnectionRole::Central, None, identity, name, context)
    }

    /// Creates a controller for a link the remote already opened.
    #[must_use]
    pub fn peripheral(
        handle: ConnectionHandle,
        identity: RemoteIdentity,
        name: String,
        context: ControllerContext,
    ) -> Self {
        Self::new(ConnectionRole::Peripheral, Some(handle), identity, name, context)
    }

    fn new(
        role: ConnectionRole,
        handle: Option<ConnectionHandle>,
        identity: RemoteIdentity,
        name: String,
        context: ControllerContext,
    ) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            role,
            identity,
            name,
            context,
            state: LifecycleState::Idle,
            rejected: false,
            handle,
            matched: None,
            mtu: DEFAULT_ATT_MTU,
            input: None,
            output: None,
            outgoing_tx,
            outgoing_rx: Some(outgoing_rx),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether the remote turned out unusable, as opposed to merely lost.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    #[must_use]
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    #[must_use]
    pub fn identity(&self) -> &RemoteIdentity {
        &self.identity
    }

    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    #[must_use]
    pub fn input(&self) -> Option<&MidiInputEndpoint> {
        self.input.as_ref()
    }

    #[must_use]
    pub fn output(&self) -> Option<&MidiOutputEndpoint> {
        self.output.as_ref()
    }

    /// Leaves `Idle`: centrals start connecting, peripherals go straight to
    /// service discovery on the link they were handed.
    ///
    /// # Errors
    ///
    /// Returns the transport error when a central connection attempt cannot
    /// be started; the controller is then `Disconnected`.
    #[instrument(skip(self), level = "debug", fields(identity = %self.identity, role = %self.role))]
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if self.state != LifecycleState::Idle {
            trace!(state = %self.state, "controller already started");
            return Ok(());
        }

        match self.role {
            ConnectionRole::Central => {
                self.transition(LifecycleState::Connecting);
                match self.context.transport.connect(&self.identity).await {
                    Ok(handle) => {
                        self.handle = Some(handle);
                        Ok(())
                    }
                    Err(error) => {
                        self.transition(LifecycleState::Disconnected);
                        Err(error)
                    }
                }
            }
            ConnectionRole::Peripheral => {
                self.discover().await;
                Ok(())
            }
        }
    }

    /// Advances the state machine with one transport event for this link.
    pub async fn handle_event(&mut self, event: TransportEvent) {
        if self.state.is_terminal() {
            trace!(?event, "ignoring event after teardown");
            return;
        }
        if let Some(handle) = event.handle()
            && Some(handle) != self.handle
        {
            trace!(%handle, "ignoring event for another connection");
            return;
        }

        match event {
            TransportEvent::Disconnected { .. } => {
                info!(identity = %self.identity, state = %self.state, "link lost");
                self.teardown(LifecycleState::Disconnected, false).await;
            }
            TransportEvent::Connected { .. } => match self.state {
                LifecycleState::Connecting | LifecycleState::Ready => self.discover().await,
                state => trace!(%state, "ignoring connection event"),
            },
            TransportEvent::BondStateChanged { state, .. }
                if self.state == LifecycleState::Bonding =>
            {
                match state {
                    BondState::Bonded => self.configure().await,
                    BondState::Failed => {
                        warn!(identity = %self.identity, "bonding failed");
                        self.rejected = true;
                        self.teardown(LifecycleState::Disconnected, true).await;
                    }
                }
            }
            TransportEvent::Notification {
                characteristic,
                value,
                ..
            } => self.on_notification(&characteristic, &value),
            TransportEvent::MtuChanged { mtu, .. } => self.on_mtu_changed(mtu),
            other => trace!(event = ?other, state = %self.state, "ignoring event"),
        }
    }

    /// Tears the connection down: detach notifications first, then endpoint
    /// shutdown, then the link itself. Repeated calls do nothing.
    pub async fn close(&mut self) {
        self.teardown(LifecycleState::Disconnected, true).await;
    }

    /// Processes events and queued output until the connection ends or
    /// `shutdown` fires.
    #[instrument(skip_all, level = "debug", fields(identity = %self.identity, role = %self.role))]
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> ConnectionOutcome {
        let Some(mut outgoing) = self.outgoing_rx.take() else {
            warn!("connection controller is already running");
            return self.outcome();
        };

        while !self.state.is_terminal() {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.flush_outgoing(&mut outgoing).await;
                    self.close().await;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.close().await,
                },
                Some(packet) = outgoing.recv() => self.write_packet(&packet).await,
            }
        }
        self.outcome()
    }

    fn outcome(&self) -> ConnectionOutcome {
        ConnectionOutcome {
            final_state: self.state,
            rejected: self.rejected,
        }
    }

    /// Writes whatever the output endpoint queued before a requested close.
    async fn flush_outgoing(&self, outgoing: &mut UnboundedReceiver<Vec<u8>>) {
        while let Ok(packet) = outgoing.try_recv() {
            self.write_packet(&packet).await;
        }
    }

    async fn discover(&mut self) {
        let Some(handle) = self.handle else {
            return;
        };
        self.transition(LifecycleState::DiscoveringServices);

        let services = match self.context.transport.discover_services(handle).await {
            Ok(services) => services,
            Err(error) => {
                warn!(identity = %self.identity, %error, "service discovery failed");
                self.teardown(LifecycleState::Disconnected, true).await;
                return;
            }
        };
        let matched = match negotiate_midi_endpoints(&services, self.context.config.gatt_profile())
        {
            Ok(matched) => matched,
            Err(error) => {
                warn!(identity = %self.identity, %error, "remote is not a MIDI device");
                self.rejected = true;
                self.teardown(LifecycleState::MatchFailed, true).await;
                return;
            }
        };
        self.matched = Some(matched);

        if self.role == ConnectionRole::Central && self.context.config.require_bonding() {
            match self.context.transport.is_bonded(handle).await {
                Ok(true) => {}
                Ok(false) => {
                    self.transition(LifecycleState::Bonding);
                    if let Err(error) = self.context.transport.request_bond(handle).await {
                        warn!(identity = %self.identity, %error, "bonding could not start");
                        self.rejected = true;
                        self.teardown(LifecycleState::Disconnected, true).await;
                    }
                    return;
                }
                Err(error) => debug!(%error, "bond state unavailable; continuing"),
            }
        }

        self.configure().await;
    }

    async fn configure(&mut self) {
        let (Some(handle), Some(matched)) = (self.handle, self.matched.clone()) else {
            return;
        };
        self.transition(LifecycleState::Configuring);
        self.configure_link(handle, &matched).await;
        self.attach(&matched);
        self.transition(LifecycleState::Ready);
    }

    /// Role-specific link setup. Every step is best-effort.
    async fn configure_link(&mut self, handle: ConnectionHandle, matched: &NegotiatedMidiEndpoints) {
        let transport = Arc::clone(&self.context.transport);
        let config = Arc::clone(&self.context.config);

        match self.role {
            ConnectionRole::Central => {
                if let Some(input_uuid) = &matched.input_uuid {
                    if let Err(error) = transport.enable_notifications(handle, input_uuid).await {
                        warn!(%error, "enabling notifications failed; input will stay silent");
                    }
                    // MIDI peripherals answer reads with an empty payload.
                    match transport.read_characteristic(handle, input_uuid).await {
                        Ok(value) => trace!(value = %format_hex(&value), "initial read"),
                        Err(error) => debug!(%error, "initial read failed"),
                    }
                }
                match transport.request_mtu(handle, config.requested_mtu()).await {
                    Ok(mtu) => self.mtu = mtu,
                    Err(error) => debug!(%error, mtu = self.mtu, "MTU request failed; keeping current MTU"),
                }
                if let Err(error) = transport
                    .request_connection_priority(handle, config.connection_priority())
                    .await
                {
                    debug!(%error, "connection priority request failed");
                }
            }
            ConnectionRole::Peripheral => {
                trace!("remote central owns subscription and MTU negotiation");
            }
        }

        if let Some(output) = &matched.output {
            debug!(uuid = output.uuid, write_mode = %output.write_mode, "output write mode selected");
        }
    }

    fn attach(&mut self, matched: &NegotiatedMidiEndpoints) {
        let registry = Arc::clone(&self.context.registry);

        if matched.input_uuid.is_some() {
            let endpoint = self
                .input
                .get_or_insert_with(|| {
                    MidiInputEndpoint::new(self.identity.clone(), self.name.clone())
                })
                .clone();
            self.input = Some(registry.attach_input(endpoint));
        }

        if matched.output.is_some() {
            let max_payload = max_payload_for_mtu(self.mtu);
            let outgoing = self.outgoing_tx.clone();
            let endpoint = self
                .output
                .get_or_insert_with(|| {
                    MidiOutputEndpoint::new(
                        self.identity.clone(),
                        self.name.clone(),
                        max_payload,
                        outgoing,
                    )
                })
                .clone();
            endpoint.set_max_payload(max_payload);
            self.output = Some(registry.attach_output(endpoint));
        }
    }

    fn on_notification(&self, characteristic: &str, value: &[u8]) {
        let Some(input) = &self.input else {
            trace!(value = %format_hex(value), "dropping notification before input is attached");
            return;
        };
        let is_input = self
            .matched
            .as_ref()
            .and_then(|matched| matched.input_uuid.as_deref())
            .is_some_and(|uuid| uuid.eq_ignore_ascii_case(characteristic));
        if !is_input {
            trace!(characteristic, "dropping notification from another characteristic");
            return;
        }
        input.deliver_packet(value);
    }

    fn on_mtu_changed(&mut self, mtu: u16) {
        debug!(identity = %self.identity, mtu, "MTU changed");
        self.mtu = mtu;
        if let Some(output) = &self.output {
            output.set_max_payload(max_payload_for_mtu(mtu));
        }
    }

    async fn write_packet(&self, packet: &[u8]) {
        let output = self.matched.as_ref().and_then(|matched| matched.output.as_ref());
        let (Some(handle), Some(output), LifecycleState::Ready) = (self.handle, output, self.state)
        else {
            debug!(state = %self.state, "dropping output packet; connection is not ready");
            return;
        };

        if let Err(error) = self
            .context
            .transport
            .write_characteristic(handle, &output.uuid, packet, output.write_mode)
            .await
        {
            debug!(%error, packet = %format_hex(packet), "output write failed; packet dropped");
        }
    }

    async fn teardown(&mut self, final_state: LifecycleState, disconnect_link: bool) {
        if self.state.is_terminal() {
            return;
        }

        if self.input.is_some() || self.output.is_some() {
            let detached = self.context.registry.detach_all(&self.identity);
            debug!(identity = %self.identity, detached, "endpoints detached");
        }
        if let Some(input) = self.input.take() {
            input.close();
        }
        if let Some(output) = self.output.take() {
            output.close();
        }
        if disconnect_link
            && let Some(handle) = self.handle
            && let Err(error) = self.context.transport.disconnect(handle).await
        {
            debug!(%error, "disconnect failed");
        }
        self.transition(final_state);
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state == next {
            return;
        }
        debug!(identity = %self.identity, from = %self.state, to = %next, "connection state changed");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::codec::MidiEvent;
    use crate::hw::{
        CharacteristicInfo, FakeRemote, FakeTransport, FakeTransportConfig, ServiceInfo,
        TransportEventStream, WriteMode,
    };
    use crate::protocol::MIDI_IO_CHARACTERISTIC_UUID;
    use crate::registry::AttachEvent;

    struct Harness {
        transport: Arc<FakeTransport>,
        events: TransportEventStream,
        registry: Arc<DeviceRegistry>,
        attach_events: UnboundedReceiver<AttachEvent>,
        context: ControllerContext,
    }

    fn harness(remote: FakeRemote, config: ProviderConfig) -> Harness {
        let transport = Arc::new(FakeTransport::new(
            FakeTransportConfig::builder().remotes(vec![remote]).build(),
        ));
        let events = transport.events().expect("event stream should be available");
        let registry = Arc::new(DeviceRegistry::new());
        let (sender, attach_events) = mpsc::unbounded_channel();
        registry.set_listener(Some(Arc::new(sender)));
        let context = ControllerContext::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&registry),
            Arc::new(config),
        );
        Harness {
            transport,
            events,
            registry,
            attach_events,
            context,
        }
    }

    fn keys() -> FakeRemote {
        FakeRemote::builder().identity("AA:BB").local_name("Keys").build()
    }

    async fn pump(harness: &mut Harness, controller: &mut ConnectionController) {
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(20), harness.events.next()).await
        {
            controller.handle_event(event).await;
        }
    }

    fn attach_count(receiver: &mut UnboundedReceiver<AttachEvent>) -> (usize, usize) {
        let mut attached = 0;
        let mut detached = 0;
        while let Ok(event) = receiver.try_recv() {
            match event {
                AttachEvent::InputAttached(_) | AttachEvent::OutputAttached(_) => attached += 1,
                AttachEvent::InputDetached(_) | AttachEvent::OutputDetached(_) => detached += 1,
            }
        }
        (attached, detached)
    }

    #[tokio::test]
    async fn central_reaches_ready_and_attaches_both_directions() {
        let mut harness = harness(keys(), ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "Keys".to_string(), harness.context.clone());

        controller.start().await.expect("connect should start");
        assert_eq!(LifecycleState::Connecting, controller.state());
        pump(&mut harness, &mut controller).await;

        assert_eq!(LifecycleState::Ready, controller.state());
        assert_eq!((2, 0), attach_count(&mut harness.attach_events));
        let output = controller.output().expect("output should be attached");
        assert_eq!(514, output.max_payload());
    }

    #[tokio::test]
    async fn unbonded_central_waits_for_bonding() {
        let remote = FakeRemote::builder().identity("AA:BB").bonded(false).build();
        let mut harness = harness(remote, ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "AA:BB".to_string(), harness.context.clone());

        controller.start().await.expect("connect should start");
        let connected = harness.events.next().await.expect("connected event");
        controller.handle_event(connected).await;
        assert_eq!(LifecycleState::Bonding, controller.state());

        pump(&mut harness, &mut controller).await;
        assert_eq!(LifecycleState::Ready, controller.state());
    }

    #[tokio::test]
    async fn failed_bonding_disconnects_without_attaching() {
        let remote = FakeRemote::builder()
            .identity("AA:BB")
            .bonded(false)
            .bond_outcome(BondState::Failed)
            .build();
        let mut harness = harness(remote, ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "AA:BB".to_string(), harness.context.clone());

        controller.start().await.expect("connect should start");
        pump(&mut harness, &mut controller).await;

        assert_eq!(LifecycleState::Disconnected, controller.state());
        assert!(controller.is_rejected());
        assert_eq!((0, 0), attach_count(&mut harness.attach_events));
        assert!(!harness.transport.is_connected(&"AA:BB".into()));
    }

    #[tokio::test]
    async fn remote_without_midi_service_fails_match_and_never_registers() {
        let remote = FakeRemote::builder()
            .identity("AA:BB")
            .services(vec![ServiceInfo::new(
                "0000180f-0000-1000-8000-00805f9b34fb".to_string(),
                true,
                vec![CharacteristicInfo::new(
                    "00002a19-0000-1000-8000-00805f9b34fb".to_string(),
                    vec!["read".to_string(), "notify".to_string()],
                )],
            )])
            .build();
        let mut harness = harness(remote, ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "AA:BB".to_string(), harness.context.clone());

        controller.start().await.expect("connect should start");
        pump(&mut harness, &mut controller).await;

        assert_eq!(LifecycleState::MatchFailed, controller.state());
        assert!(controller.is_rejected());
        assert!(harness.registry.is_empty());
        assert_eq!((0, 0), attach_count(&mut harness.attach_events));
        assert!(!harness.transport.is_connected(&"AA:BB".into()));
    }

    #[tokio::test]
    async fn rejected_mtu_falls_back_to_default_payload() {
        let remote = FakeRemote::builder().identity("AA:BB").reject_mtu(true).build();
        let mut harness = harness(remote, ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "AA:BB".to_string(), harness.context.clone());

        controller.start().await.expect("connect should start");
        pump(&mut harness, &mut controller).await;

        assert_eq!(LifecycleState::Ready, controller.state());
        assert_eq!(Some(20), controller.output().map(MidiOutputEndpoint::max_payload));
    }

    #[tokio::test]
    async fn scripted_notifications_reach_the_input_listener() {
        let remote = FakeRemote::builder()
            .identity("AA:BB")
            .notifications(vec![vec![0x80, 0x8A, 0x90, 60, 100]])
            .build();
        let mut harness = harness(remote, ProviderConfig::default());
        let (sender, mut received) = mpsc::unbounded_channel();
        harness.registry.set_listener(Some(Arc::new(ListenOnAttach(sender))));
        let mut controller =
            ConnectionController::central("AA:BB".into(), "AA:BB".to_string(), harness.context.clone());

        controller.start().await.expect("connect should start");
        pump(&mut harness, &mut controller).await;

        let message = received.try_recv().expect("note should be delivered");
        assert_eq!(
            MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 },
            message.message.event
        );
    }

    struct ListenOnAttach(UnboundedSender<crate::endpoint::ReceivedMidiMessage>);

    impl crate::registry::DeviceAttachListener for ListenOnAttach {
        fn on_input_attached(&self, endpoint: &MidiInputEndpoint) {
            endpoint.set_listener(Some(Arc::new(self.0.clone())));
        }
    }

    #[tokio::test]
    async fn link_loss_detaches_once_and_close_is_idempotent() {
        let mut harness = harness(keys(), ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "Keys".to_string(), harness.context.clone());
        controller.start().await.expect("connect should start");
        pump(&mut harness, &mut controller).await;
        let input = controller.input().cloned().expect("input should be attached");
        attach_count(&mut harness.attach_events);

        harness.transport.drop_link(&"AA:BB".into());
        pump(&mut harness, &mut controller).await;
        controller.close().await;
        controller.close().await;

        assert_eq!(LifecycleState::Disconnected, controller.state());
        assert!(!controller.is_rejected());
        assert_eq!((0, 2), attach_count(&mut harness.attach_events));
        assert!(input.is_closed());
        assert!(harness.registry.is_empty());
    }

    #[tokio::test]
    async fn peripheral_skips_bonding_and_link_configuration() {
        let remote = FakeRemote::builder().identity("CC:DD").bonded(false).build();
        let mut harness = harness(remote, ProviderConfig::default());
        let handle = harness
            .transport
            .accept_incoming(&"CC:DD".into())
            .expect("incoming link should open");
        let mut controller = ConnectionController::peripheral(
            handle,
            "CC:DD".into(),
            "CC:DD".to_string(),
            harness.context.clone(),
        );

        controller.start().await.expect("peripheral start should succeed");

        assert_eq!(LifecycleState::Ready, controller.state());
        assert_eq!(Some(20), controller.output().map(MidiOutputEndpoint::max_payload));
        assert_eq!(ConnectionRole::Peripheral, controller.role());
    }

    #[tokio::test]
    async fn run_writes_output_and_swallows_write_failures() {
        let remote = FakeRemote::builder().identity("AA:BB").build();
        let mut harness = harness(remote, ProviderConfig::default());
        let mut controller =
            ConnectionController::central("AA:BB".into(), "AA:BB".to_string(), harness.context.clone());
        controller.start().await.expect("connect should start");
        pump(&mut harness, &mut controller).await;
        let output = controller.output().cloned().expect("output should be attached");

        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(controller.run(event_receiver, shutdown.clone()));

        output
            .send_at(&MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 }, 10)
            .expect("note should encode");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        harness.transport.set_fail_writes(&"AA:BB".into(), true);
        output.send_at(&MidiEvent::Stop, 11).expect("stop should encode");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        shutdown.cancel();
        let outcome = task.await.expect("controller task should finish");
        drop(event_sender);

        assert_eq!(
            ConnectionOutcome {
                final_state: LifecycleState::Disconnected,
                rejected: false,
            },
            outcome
        );
        let written = harness.transport.written_packets();
        assert_eq!(1, written.len());
        assert_eq!(vec![0x80, 0x8A, 0x90, 60, 100], written[0].value);
        assert_eq!(MIDI_IO_CHARACTERISTIC_UUID, written[0].characteristic);
        assert_eq!(WriteMode::WithoutResponse, written[0].mode);
    }
}
