use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ProviderConfig;
use crate::controller::{ConnectionController, ConnectionRole, ControllerContext};
use crate::endpoint::{MidiInputEndpoint, MidiOutputEndpoint};
use crate::error::{ProviderError, TransportError};
use crate::hw::{
    BtleplugTransport, ConnectionHandle, DiscoveredRemote, RemoteIdentity, Transport,
    TransportEvent, TransportEventStream,
};
use crate::registry::{DeviceAttachListener, DeviceRegistry};
use crate::utils::display_name;

/// Events held for a connection whose controller has not bound yet.
const MAX_PENDING_EVENTS: usize = 32;
/// Recently finished connections whose late events are dropped.
const RETIRED_HANDLES: usize = 64;

#[derive(Debug, Default)]
struct Routes {
    bound: HashMap<ConnectionHandle, UnboundedSender<TransportEvent>>,
    pending: HashMap<ConnectionHandle, Vec<TransportEvent>>,
    retired: VecDeque<ConnectionHandle>,
}

impl Routes {
    fn retire(&mut self, handle: ConnectionHandle) {
        self.bound.remove(&handle);
        self.pending.remove(&handle);
        if self.retired.len() == RETIRED_HANDLES {
            self.retired.pop_front();
        }
        self.retired.push_back(handle);
    }
}

/// Scan or advertising session state.
#[derive(Debug, Default)]
struct Activity {
    active: bool,
    generation: u64,
    timer: Option<CancellationToken>,
}

#[derive(Debug)]
struct ProviderCore {
    role: ConnectionRole,
    transport: Arc<dyn Transport>,
    config: Arc<ProviderConfig>,
    registry: Arc<DeviceRegistry>,
    routes: Mutex<Routes>,
    /// Remotes with a live connection, plus those rejected for good.
    known: Mutex<HashSet<RemoteIdentity>>,
    activity: Mutex<Activity>,
    tasks: Mutex<JoinSet<()>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_shutdown: CancellationToken,
    shutdown: CancellationToken,
    terminated: AtomicBool,
}

impl ProviderCore {
    fn start(
        role: ConnectionRole,
        transport: Arc<dyn Transport>,
        config: ProviderConfig,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Arc<Self>, ProviderError> {
        if !transport.capabilities().supports(role) {
            return Err(ProviderError::Unsupported {
                role,
                source: TransportError::UnsupportedRole { role },
            });
        }
        let events = transport.events()?;

        let core = Arc::new(Self {
            role,
            transport,
            config: Arc::new(config),
            registry,
            routes: Mutex::new(Routes::default()),
            known: Mutex::new(HashSet::new()),
            activity: Mutex::new(Activity::default()),
            tasks: Mutex::new(JoinSet::new()),
            dispatcher: Mutex::new(None),
            dispatcher_shutdown: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            terminated: AtomicBool::new(false),
        });
        let dispatcher = tokio::spawn(Arc::clone(&core).dispatch_events(events));
        *core.dispatcher.lock() = Some(dispatcher);
        debug!(%role, "provider started");
        Ok(core)
    }

    fn context(&self) -> ControllerContext {
        ControllerContext::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        )
    }

    fn ensure_running(&self) -> Result<(), ProviderError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    async fn dispatch_events(self: Arc<Self>, mut events: TransportEventStream) {
        let shutdown = self.dispatcher_shutdown.clone();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        warn!(role = %self.role, "transport event stream ended");
                        // Dropping the routes ends every controller.
                        self.routes.lock().bound.clear();
                        break;
                    }
                },
            }
        }
        trace!("dispatcher stopped");
    }

    fn dispatch(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Discovered { remote } => self.on_discovered(&remote),
            TransportEvent::IncomingConnection { handle, remote } => {
                self.on_incoming(handle, remote);
            }
            other => self.route(other),
        }
    }

    fn on_discovered(self: &Arc<Self>, remote: &DiscoveredRemote) {
        if self.role != ConnectionRole::Central || !self.activity.lock().active {
            trace!(identity = %remote.identity(), "ignoring discovery outside a scan");
            return;
        }
        if let Some(prefix) = self.config.name_prefix()
            && !remote.local_name_starts_with(prefix)
        {
            trace!(identity = %remote.identity(), prefix, "remote name does not match");
            return;
        }
        if !self.known.lock().insert(remote.identity().clone()) {
            trace!(identity = %remote.identity(), "remote already connected or rejected");
            return;
        }

        let name = display_name(remote.local_name(), remote.identity());
        info!(identity = %remote.identity(), %name, rssi = ?remote.rssi(), "MIDI remote discovered");
        let controller =
            ConnectionController::central(remote.identity().clone(), name, self.context());
        self.spawn_controller(controller, None);
    }

    fn on_incoming(self: &Arc<Self>, handle: ConnectionHandle, remote: RemoteIdentity) {
        let accepting =
            self.role == ConnectionRole::Peripheral && self.activity.lock().active;
        if !accepting || !self.known.lock().insert(remote.clone()) {
            debug!(identity = %remote, %handle, accepting, "rejecting incoming connection");
            self.routes.lock().retire(handle);
            let transport = Arc::clone(&self.transport);
            self.tasks.lock().spawn(async move {
                if let Err(error) = transport.disconnect(handle).await {
                    debug!(%error, %handle, "failed to reject incoming connection");
                }
            });
            return;
        }

        info!(identity = %remote, %handle, "incoming connection accepted");
        let events = self.bind(handle);
        let controller = ConnectionController::peripheral(
            handle,
            remote.clone(),
            remote.to_string(),
            self.context(),
        );
        self.spawn_controller(controller, Some((handle, events)));
    }

    fn spawn_controller(
        self: &Arc<Self>,
        controller: ConnectionController,
        bound: Option<(ConnectionHandle, UnboundedReceiver<TransportEvent>)>,
    ) {
        let core = Arc::clone(self);
        let shutdown = self.shutdown.child_token();
        let mut tasks = self.tasks.lock();
        while let Some(finished) = tasks.try_join_next() {
            if let Err(error) = finished {
                warn!(%error, "connection task failed");
            }
        }
        tasks.spawn(core.drive(controller, bound, shutdown));
    }

    async fn drive(
        self: Arc<Self>,
        mut controller: ConnectionController,
        bound: Option<(ConnectionHandle, UnboundedReceiver<TransportEvent>)>,
        shutdown: CancellationToken,
    ) {
        let identity = controller.identity().clone();
        if let Err(error) = controller.start().await {
            warn!(%identity, %error, "connection attempt failed");
            self.forget(&identity, None);
            return;
        }

        let (handle, events) = match bound {
            Some(bound) => bound,
            None => {
                let Some(handle) = controller.handle() else {
                    self.forget(&identity, None);
                    return;
                };
                (handle, self.bind(handle))
            }
        };

        let outcome = controller.run(events, shutdown).await;
        info!(%identity, final_state = %outcome.final_state, rejected = outcome.rejected, "connection finished");
        if outcome.rejected {
            // Stays known, so later advertisements from it are ignored.
            self.routes.lock().retire(handle);
        } else {
            self.forget(&identity, Some(handle));
        }
    }

    /// Opens the event route for `handle`, replaying anything that arrived
    /// before the controller was ready.
    fn bind(&self, handle: ConnectionHandle) -> UnboundedReceiver<TransportEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock();
        for event in routes.pending.remove(&handle).unwrap_or_default() {
            let _ = sender.send(event);
        }
        routes.bound.insert(handle, sender);
        receiver
    }

    fn route(&self, mut event: TransportEvent) {
        let Some(handle) = event.handle() else {
            return;
        };
        let mut routes = self.routes.lock();
        if let Some(sender) = routes.bound.get(&handle) {
            match sender.send(event) {
                Ok(()) => return,
                Err(error) => {
                    event = error.0;
                    routes.retire(handle);
                }
            }
        }
        if routes.retired.contains(&handle) {
            trace!(?event, "dropping event for a finished connection");
            return;
        }

        let pending = routes.pending.entry(handle).or_default();
        if pending.len() < MAX_PENDING_EVENTS {
            pending.push(event);
        } else {
            debug!(%handle, ?event, "dropping event for an unbound connection");
        }
    }

    fn forget(&self, identity: &RemoteIdentity, handle: Option<ConnectionHandle>) {
        self.known.lock().remove(identity);
        if let Some(handle) = handle {
            self.routes.lock().retire(handle);
        }
    }

    async fn start_activity(self: &Arc<Self>, timeout: Option<Duration>) -> Result<(), ProviderError> {
        self.ensure_running()?;
        let (generation, previous_timer) = {
            let mut activity = self.activity.lock();
            activity.generation += 1;
            activity.active = true;
            (activity.generation, activity.timer.take())
        };
        if let Some(timer) = previous_timer {
            timer.cancel();
        }

        let started = match self.role {
            ConnectionRole::Central => {
                self.transport
                    .start_scan(self.config.gatt_profile().service_uuid())
                    .await
            }
            ConnectionRole::Peripheral => {
                self.transport
                    .start_advertising(self.config.local_name(), self.config.gatt_profile())
                    .await
            }
        };
        if let Err(error) = started {
            let mut activity = self.activity.lock();
            if activity.generation == generation {
                activity.active = false;
            }
            return Err(error.into());
        }

        let Some(timeout) = timeout.filter(|timeout| !timeout.is_zero()) else {
            info!(role = %self.role, "started until stopped");
            return Ok(());
        };
        info!(role = %self.role, timeout = %humantime::format_duration(timeout), "started");

        let timer = self.shutdown.child_token();
        {
            let mut activity = self.activity.lock();
            if activity.generation != generation {
                return Ok(());
            }
            activity.timer = Some(timer.clone());
        }
        let core = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    debug!(role = %core.role, "activity timed out");
                    if let Err(error) = core.stop_activity(Some(generation)).await {
                        debug!(%error, "failed to stop timed-out activity");
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops the current scan or advertising session. Stopping when nothing
    /// runs, or when `expected_generation` is stale, does nothing.
    async fn stop_activity(&self, expected_generation: Option<u64>) -> Result<(), ProviderError> {
        let timer = {
            let mut activity = self.activity.lock();
            let stale = expected_generation.is_some_and(|generation| generation != activity.generation);
            if !activity.active || stale {
                return Ok(());
            }
            activity.active = false;
            activity.timer.take()
        };
        if let Some(timer) = timer {
            timer.cancel();
        }

        info!(role = %self.role, "stopped");
        match self.role {
            ConnectionRole::Central => self.transport.stop_scan().await?,
            ConnectionRole::Peripheral => self.transport.stop_advertising().await?,
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.activity.lock().active
    }

    #[instrument(skip(self), level = "debug", fields(role = %self.role))]
    async fn terminate(&self) -> Result<(), ProviderError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(error) = self.stop_activity(None).await {
            debug!(%error, "failed to stop activity during teardown");
        }

        self.dispatcher_shutdown.cancel();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher
            && let Err(error) = dispatcher.await
        {
            warn!(%error, "dispatcher task failed");
        }

        self.shutdown.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(finished) = tasks.join_next().await {
            if let Err(error) = finished {
                warn!(%error, "connection task failed");
            }
        }

        self.transport.close().await?;
        info!(role = %self.role, "provider terminated");
        Ok(())
    }

    fn cancel(&self) {
        self.dispatcher_shutdown.cancel();
        self.shutdown.cancel();
    }
}

/// Scans for BLE-MIDI peripherals and connects to each one found.
///
/// Must be created inside a Tokio runtime. Dropping the provider cancels
/// every connection; call [`CentralProvider::terminate`] to wait for the
/// detach notifications and release the transport.
#[derive(Debug)]
pub struct CentralProvider {
    core: Arc<ProviderCore>,
}

impl CentralProvider {
    /// # Errors
    ///
    /// Returns [`ProviderError::Unsupported`] when the transport cannot act
    /// as a central, before any state is allocated.
    pub fn new(transport: Arc<dyn Transport>, config: ProviderConfig) -> Result<Self, ProviderError> {
        Self::with_registry(transport, config, Arc::new(DeviceRegistry::new()))
    }

    /// Creates a provider that publishes into a registry shared with others.
    ///
    /// # Errors
    ///
    /// See [`CentralProvider::new`].
    pub fn with_registry(
        transport: Arc<dyn Transport>,
        config: ProviderConfig,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Self, ProviderError> {
        let core = ProviderCore::start(ConnectionRole::Central, transport, config, registry)?;
        Ok(Self { core })
    }

    /// Opens the host's first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unsupported`] when the host has no usable
    /// adapter.
    pub async fn with_host_adapter(config: ProviderConfig) -> Result<Self, ProviderError> {
        let transport = BtleplugTransport::new()
            .await
            .map_err(|source| ProviderError::Unsupported {
                role: ConnectionRole::Central,
                source,
            })?;
        Self::new(Arc::new(transport), config)
    }

    /// Starts scanning. `None` or a zero timeout scans until stopped.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport refuses to scan or the provider
    /// was terminated.
    pub async fn start_scan(&self, timeout: Option<Duration>) -> Result<(), ProviderError> {
        self.core.start_activity(timeout).await
    }

    /// Stops scanning; connections already made stay open.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails to stop.
    pub async fn stop_scan(&self) -> Result<(), ProviderError> {
        self.core.stop_activity(None).await
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.core.is_active()
    }

    pub fn set_attach_listener(&self, listener: Option<Arc<dyn DeviceAttachListener>>) {
        self.core.registry.set_listener(listener);
    }

    #[must_use]
    pub fn inputs(&self) -> Vec<MidiInputEndpoint> {
        self.core.registry.list_inputs()
    }

    #[must_use]
    pub fn outputs(&self) -> Vec<MidiOutputEndpoint> {
        self.core.registry.list_outputs()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.core.registry
    }

    /// Stops scanning, disconnects every remote (firing detach
    /// notifications), then closes the transport. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails to close.
    pub async fn terminate(&self) -> Result<(), ProviderError> {
        self.core.terminate().await
    }
}

impl Drop for CentralProvider {
    fn drop(&mut self) {
        self.core.cancel();
    }
}

/// Advertises the BLE-MIDI service and serves centrals that connect.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct PeripheralProvider {
    core: Arc<ProviderCore>,
}

impl PeripheralProvider {
    /// # Errors
    ///
    /// Returns [`ProviderError::Unsupported`] when the transport cannot
    /// advertise, before any state is allocated.
    pub fn new(transport: Arc<dyn Transport>, config: ProviderConfig) -> Result<Self, ProviderError> {
        Self::with_registry(transport, config, Arc::new(DeviceRegistry::new()))
    }

    /// # Errors
    ///
    /// See [`PeripheralProvider::new`].
    pub fn with_registry(
        transport: Arc<dyn Transport>,
        config: ProviderConfig,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Self, ProviderError> {
        let core = ProviderCore::start(ConnectionRole::Peripheral, transport, config, registry)?;
        Ok(Self { core })
    }

    /// Starts accepting incoming connections.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport refuses to advertise or the
    /// provider was terminated.
    pub async fn start_advertising(&self) -> Result<(), ProviderError> {
        self.core.start_activity(None).await
    }

    /// Stops accepting connections; connected centrals stay connected.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails to stop.
    pub async fn stop_advertising(&self) -> Result<(), ProviderError> {
        self.core.stop_activity(None).await
    }

    #[must_use]
    pub fn is_advertising(&self) -> bool {
        self.core.is_active()
    }

    pub fn set_attach_listener(&self, listener: Option<Arc<dyn DeviceAttachListener>>) {
        self.core.registry.set_listener(listener);
    }

    #[must_use]
    pub fn inputs(&self) -> Vec<MidiInputEndpoint> {
        self.core.registry.list_inputs()
    }

    #[must_use]
    pub fn outputs(&self) -> Vec<MidiOutputEndpoint> {
        self.core.registry.list_outputs()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.core.registry
    }

    /// Stops advertising, disconnects every central, then closes the
    /// transport. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport fails to close.
    pub async fn terminate(&self) -> Result<(), ProviderError> {
        self.core.terminate().await
    }
}

impl Drop for PeripheralProvider {
    fn drop(&mut self) {
        self.core.cancel();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn routes_with_retired(count: u64) -> Routes {
        let mut routes = Routes::default();
        for handle in 0..count {
            routes.retire(ConnectionHandle::from(handle));
        }
        routes
    }

    #[test]
    fn retired_handles_are_bounded() {
        let routes = routes_with_retired(100);

        assert_eq!(RETIRED_HANDLES, routes.retired.len());
        assert!(!routes.retired.contains(&ConnectionHandle::from(0)));
        assert!(routes.retired.contains(&ConnectionHandle::from(99)));
    }

    #[tokio::test]
    async fn events_before_binding_are_replayed_in_order() {
        let transport = Arc::new(crate::hw::FakeTransport::new(
            crate::hw::FakeTransportConfig::builder().build(),
        ));
        let core = ProviderCore::start(
            ConnectionRole::Central,
            transport,
            ProviderConfig::default(),
            Arc::new(DeviceRegistry::new()),
        )
        .expect("fake transport supports the central role");
        let handle = ConnectionHandle::from(7);

        core.route(TransportEvent::Connected { handle });
        core.route(TransportEvent::MtuChanged { handle, mtu: 185 });
        let mut events = core.bind(handle);

        assert_matches!(events.try_recv(), Ok(TransportEvent::Connected { .. }));
        assert_matches!(events.try_recv(), Ok(TransportEvent::MtuChanged { mtu: 185, .. }));
        core.cancel();
    }
}
