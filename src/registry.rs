use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, trace};

use crate::endpoint::{EndpointDirection, EndpointInfo, MidiInputEndpoint, MidiOutputEndpoint};
use crate::hw::RemoteIdentity;

/// Receives endpoint lifetime notifications.
///
/// Each endpoint is reported attached once and detached once. Callbacks run
/// outside every registry lock and may call back into the registry.
pub trait DeviceAttachListener: Send + Sync {
    fn on_input_attached(&self, _endpoint: &MidiInputEndpoint) {}

    fn on_output_attached(&self, _endpoint: &MidiOutputEndpoint) {}

    fn on_input_detached(&self, _endpoint: &MidiInputEndpoint) {}

    fn on_output_detached(&self, _endpoint: &MidiOutputEndpoint) {}
}

/// Endpoint lifetime notification in channel form.
#[derive(Debug, Clone)]
pub enum AttachEvent {
    InputAttached(MidiInputEndpoint),
    OutputAttached(MidiOutputEndpoint),
    InputDetached(MidiInputEndpoint),
    OutputDetached(MidiOutputEndpoint),
}

impl AttachEvent {
    /// `true` for attach notices, `false` for detach notices.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::InputAttached(_) | Self::OutputAttached(_))
    }

    #[must_use]
    pub fn direction(&self) -> EndpointDirection {
        match self {
            Self::InputAttached(_) | Self::InputDetached(_) => EndpointDirection::Input,
            Self::OutputAttached(_) | Self::OutputDetached(_) => EndpointDirection::Output,
        }
    }

    #[must_use]
    pub fn info(&self) -> &EndpointInfo {
        match self {
            Self::InputAttached(endpoint) | Self::InputDetached(endpoint) => endpoint.info(),
            Self::OutputAttached(endpoint) | Self::OutputDetached(endpoint) => endpoint.info(),
        }
    }
}

fn forward(sender: &UnboundedSender<AttachEvent>, event: AttachEvent) {
    if let Err(error) = sender.send(event) {
        trace!(event = ?error.0, "attach channel closed; dropping notification");
    }
}

impl DeviceAttachListener for UnboundedSender<AttachEvent> {
    fn on_input_attached(&self, endpoint: &MidiInputEndpoint) {
        forward(self, AttachEvent::InputAttached(endpoint.clone()));
    }

    fn on_output_attached(&self, endpoint: &MidiOutputEndpoint) {
        forward(self, AttachEvent::OutputAttached(endpoint.clone()));
    }

    fn on_input_detached(&self, endpoint: &MidiInputEndpoint) {
        forward(self, AttachEvent::InputDetached(endpoint.clone()));
    }

    fn on_output_detached(&self, endpoint: &MidiOutputEndpoint) {
        forward(self, AttachEvent::OutputDetached(endpoint.clone()));
    }
}

#[derive(Debug, Default)]
struct RegistryEntry {
    input: Option<MidiInputEndpoint>,
    output: Option<MidiOutputEndpoint>,
}

/// Live endpoints keyed by remote identity.
///
/// Operations on different identities touch different map shards and do not
/// block each other.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: DashMap<RemoteIdentity, RegistryEntry>,
    listener: RwLock<Option<Arc<dyn DeviceAttachListener>>>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("remotes", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the listener for attach and detach notifications.
    pub fn set_listener(&self, listener: Option<Arc<dyn DeviceAttachListener>>) {
        *self.listener.write() = listener;
    }

    fn listener(&self) -> Option<Arc<dyn DeviceAttachListener>> {
        self.listener.read().clone()
    }

    /// Registers an input endpoint and returns the live one.
    ///
    /// When the identity already has an input, that endpoint stays registered,
    /// is returned, and no notification fires.
    pub fn attach_input(&self, endpoint: MidiInputEndpoint) -> MidiInputEndpoint {
        let (registered, fresh) = {
            let mut entry = self.entries.entry(endpoint.identity().clone()).or_default();
            match entry.input.clone() {
                Some(existing) => (existing, false),
                None => {
                    entry.input = Some(endpoint.clone());
                    (endpoint, true)
                }
            }
        };

        if fresh {
            info!(identity = %registered.identity(), name = registered.info().name(), "input attached");
            if let Some(listener) = self.listener() {
                listener.on_input_attached(&registered);
            }
        } else {
            trace!(identity = %registered.identity(), "input already attached");
        }
        registered
    }

    /// Registers an output endpoint and returns the live one.
    ///
    /// A repeated attach keeps the existing endpoint and adopts the new
    /// payload limit.
    pub fn attach_output(&self, endpoint: MidiOutputEndpoint) -> MidiOutputEndpoint {
        let (registered, fresh) = {
            let mut entry = self.entries.entry(endpoint.identity().clone()).or_default();
            match entry.output.clone() {
                Some(existing) => {
                    existing.set_max_payload(endpoint.max_payload());
                    (existing, false)
                }
                None => {
                    entry.output = Some(endpoint.clone());
                    (endpoint, true)
                }
            }
        };

        if fresh {
            info!(
                identity = %registered.identity(),
                name = registered.info().name(),
                max_payload = registered.max_payload(),
                "output attached"
            );
            if let Some(listener) = self.listener() {
                listener.on_output_attached(&registered);
            }
        } else {
            trace!(identity = %registered.identity(), "output already attached");
        }
        registered
    }

    /// Removes every endpoint of `identity`, reporting each one detached.
    ///
    /// Returns the number of endpoints removed.
    pub fn detach_all(&self, identity: &RemoteIdentity) -> usize {
        let Some((_, entry)) = self.entries.remove(identity) else {
            return 0;
        };

        let listener = self.listener();
        let mut detached = 0;
        if let Some(input) = entry.input {
            info!(identity = %identity, "input detached");
            if let Some(listener) = &listener {
                listener.on_input_detached(&input);
            }
            detached += 1;
        }
        if let Some(output) = entry.output {
            info!(identity = %identity, "output detached");
            if let Some(listener) = &listener {
                listener.on_output_detached(&output);
            }
            detached += 1;
        }
        detached
    }

    /// Returns every attached input, ordered by identity.
    #[must_use]
    pub fn list_inputs(&self) -> Vec<MidiInputEndpoint> {
        let mut inputs: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| entry.input.clone())
            .collect();
        inputs.sort_by(|left, right| left.identity().cmp(right.identity()));
        inputs
    }

    /// Returns every attached output, ordered by identity.
    #[must_use]
    pub fn list_outputs(&self) -> Vec<MidiOutputEndpoint> {
        let mut outputs: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| entry.output.clone())
            .collect();
        outputs.sort_by(|left, right| left.identity().cmp(right.identity()));
        outputs
    }

    #[must_use]
    pub fn input(&self, identity: &RemoteIdentity) -> Option<MidiInputEndpoint> {
        self.entries.get(identity).and_then(|entry| entry.input.clone())
    }

    #[must_use]
    pub fn output(&self, identity: &RemoteIdentity) -> Option<MidiOutputEndpoint> {
        self.entries.get(identity).and_then(|entry| entry.output.clone())
    }

    #[must_use]
    pub fn contains(&self, identity: &RemoteIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;

    fn input(identity: &str) -> MidiInputEndpoint {
        MidiInputEndpoint::new(identity.into(), identity.to_string())
    }

    fn output(identity: &str, max_payload: usize) -> MidiOutputEndpoint {
        let (sender, _receiver) = mpsc::unbounded_channel();
        MidiOutputEndpoint::new(identity.into(), identity.to_string(), max_payload, sender)
    }

    fn registry_with_channel() -> (DeviceRegistry, mpsc::UnboundedReceiver<AttachEvent>) {
        let registry = DeviceRegistry::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        registry.set_listener(Some(Arc::new(sender)));
        (registry, receiver)
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<AttachEvent>) -> Vec<AttachEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn repeated_input_attach_fires_once_and_keeps_first_endpoint() {
        let (registry, mut events) = registry_with_channel();
        let first = registry.attach_input(input("A"));
        let second = registry.attach_input(input("A"));

        first.set_listener(Some(Arc::new(|_message: crate::endpoint::ReceivedMidiMessage| {})));
        assert!(second.has_listener());
        let attached = drain(&mut events);
        assert_eq!(1, attached.len());
        assert_matches!(&attached[0], AttachEvent::InputAttached(endpoint) if endpoint.identity().as_str() == "A");

        assert_eq!(1, registry.detach_all(&"A".into()));
        let detached = drain(&mut events);
        assert_eq!(1, detached.len());
        assert_matches!(&detached[0], AttachEvent::InputDetached(_));
    }

    #[test]
    fn repeated_output_attach_adopts_new_payload_limit() {
        let (registry, mut events) = registry_with_channel();
        registry.attach_output(output("A", 20));
        let live = registry.attach_output(output("A", 182));

        assert_eq!(182, live.max_payload());
        assert_eq!(1, drain(&mut events).len());
    }

    #[test]
    fn detach_reports_each_endpoint_and_removes_entry() {
        let (registry, mut events) = registry_with_channel();
        registry.attach_input(input("A"));
        registry.attach_output(output("A", 20));
        registry.attach_input(input("B"));
        drain(&mut events);

        assert_eq!(2, registry.detach_all(&"A".into()));
        let detached = drain(&mut events);
        assert_matches!(
            detached.as_slice(),
            [AttachEvent::InputDetached(_), AttachEvent::OutputDetached(_)]
        );
        assert!(!registry.contains(&"A".into()));
        assert!(registry.contains(&"B".into()));
    }

    #[test]
    fn detach_of_unknown_identity_is_silent() {
        let (registry, mut events) = registry_with_channel();
        assert_eq!(0, registry.detach_all(&"missing".into()));
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn reattach_after_detach_is_a_new_lifetime() {
        let (registry, mut events) = registry_with_channel();
        registry.attach_input(input("A"));
        registry.detach_all(&"A".into());
        registry.attach_input(input("A"));

        let kinds: Vec<&str> = drain(&mut events)
            .iter()
            .map(|event| match event {
                AttachEvent::InputAttached(_) => "attached",
                AttachEvent::InputDetached(_) => "detached",
                AttachEvent::OutputAttached(_) | AttachEvent::OutputDetached(_) => "output",
            })
            .collect();
        assert_eq!(vec!["attached", "detached", "attached"], kinds);
    }

    #[test]
    fn attach_events_describe_change_and_direction() {
        let (registry, mut events) = registry_with_channel();
        registry.attach_output(output("A", 20));
        registry.detach_all(&"A".into());

        let described: Vec<(bool, EndpointDirection, String)> = drain(&mut events)
            .iter()
            .map(|event| (event.is_attached(), event.direction(), event.info().name().to_string()))
            .collect();
        assert_eq!(
            vec![
                (true, EndpointDirection::Output, "A".to_string()),
                (false, EndpointDirection::Output, "A".to_string()),
            ],
            described
        );
    }

    #[test]
    fn closed_attach_channel_does_not_block_registry_changes() {
        let (registry, events) = registry_with_channel();
        drop(events);

        registry.attach_input(input("A"));
        registry.attach_output(output("A", 20));

        assert!(registry.contains(&"A".into()));
        assert_eq!(2, registry.detach_all(&"A".into()));
        assert!(registry.is_empty());
    }

    #[test]
    fn listings_are_sorted_by_identity() {
        let registry = DeviceRegistry::new();
        registry.attach_output(output("C", 20));
        registry.attach_input(input("B"));
        registry.attach_output(output("A", 20));

        let outputs: Vec<String> = registry
            .list_outputs()
            .iter()
            .map(|endpoint| endpoint.identity().to_string())
            .collect();
        assert_eq!(vec!["A", "C"], outputs);
        assert_eq!(1, registry.list_inputs().len());
        assert!(registry.output(&"B".into()).is_none());
        assert!(registry.input(&"B".into()).is_some());
    }

    #[test]
    fn listener_may_query_registry_during_callback() {
        struct Reentrant(Arc<DeviceRegistry>, Arc<parking_lot::Mutex<usize>>);
        impl DeviceAttachListener for Reentrant {
            fn on_input_detached(&self, _endpoint: &MidiInputEndpoint) {
                *self.1.lock() = self.0.list_inputs().len();
            }
        }

        let registry = Arc::new(DeviceRegistry::new());
        let seen = Arc::new(parking_lot::Mutex::new(usize::MAX));
        registry.set_listener(Some(Arc::new(Reentrant(Arc::clone(&registry), Arc::clone(&seen)))));
        registry.attach_input(input("A"));
        registry.attach_input(input("B"));

        registry.detach_all(&"A".into());

        assert_eq!(1, *seen.lock());
        registry.set_listener(None);
    }
}
