// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery event bridge.
//!
//! Turns middleware notifications into normalized records and dispatches them
//! through a [`CallbackRegistry`]. When a [`DiscoveryGraph`] is attached, every
//! discovered/removed record is folded into it before the host callback runs.
//!
//! # Locator selection
//!
//! Only the first locator of each list is consulted: the participant's first
//! default unicast locator, or the first remote unicast locator of a
//! reader/writer. Multi-locator announcements lose their later entries.
//!
//! # Failure isolation
//!
//! There is no error channel back to the middleware. A panicking host
//! callback is caught, logged and counted; the delivery thread keeps going.

use crate::callbacks::{CallbackBinding, CallbackRegistry, EventCategory};
use crate::graph::DiscoveryGraph;
use crate::locator::Endpoint;
use crate::middleware::{
    DiscoveryStatus, EndpointDiscoveryInfo, ParticipantDiscoveryInfo, ParticipantListener,
};
use crate::records::{BoundedName, EndpointRecord, ParticipantRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Events handed to a bound callback.
    pub dispatched: u64,
    /// Events dropped because the category had no binding.
    pub unbound: u64,
    /// QoS-change notifications ignored.
    pub qos_changes: u64,
    /// Callbacks that panicked.
    pub failed: u64,
    /// Records built with an unknown transport.
    pub unknown_transport: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    unbound: AtomicU64,
    qos_changes: AtomicU64,
    failed: AtomicU64,
    unknown_transport: AtomicU64,
}

/// [`ParticipantListener`] that feeds host callbacks.
pub struct DiscoveryListener {
    callbacks: Arc<CallbackRegistry>,
    graph: Option<Arc<DiscoveryGraph>>,
    counters: Counters,
}

impl DiscoveryListener {
    pub fn new(callbacks: CallbackRegistry) -> Self {
        Self {
            callbacks: Arc::new(callbacks),
            graph: None,
            counters: Counters::default(),
        }
    }

    /// Also feed every discovered/removed record into `graph`.
    pub fn with_graph(mut self, graph: Arc<DiscoveryGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn graph(&self) -> Option<&Arc<DiscoveryGraph>> {
        self.graph.as_ref()
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            unbound: self.counters.unbound.load(Ordering::Relaxed),
            qos_changes: self.counters.qos_changes.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            unknown_transport: self.counters.unknown_transport.load(Ordering::Relaxed),
        }
    }

    fn endpoint(&self, endpoint: Endpoint) -> Endpoint {
        if let Endpoint::Unknown(kind) = endpoint {
            self.counters
                .unknown_transport
                .fetch_add(1, Ordering::Relaxed);
            debug!("Locator kind {} not supported, endpoint left unknown", kind);
        }
        endpoint
    }

    fn participant_record(&self, info: &ParticipantDiscoveryInfo) -> ParticipantRecord {
        ParticipantRecord {
            participant: info.participant,
            guid_prefix: info.guid_prefix,
            endpoint: self.endpoint(Endpoint::from_first(&info.default_unicast_locators)),
        }
    }

    fn endpoint_record(&self, info: &EndpointDiscoveryInfo) -> EndpointRecord {
        EndpointRecord {
            topic_name: BoundedName::new(&info.topic_name),
            type_name: BoundedName::new(&info.type_name),
            guid_prefix: info.guid_prefix,
            endpoint: self.endpoint(Endpoint::from_first(&info.remote_locators.unicast)),
        }
    }

    fn dispatch<R>(
        &self,
        category: EventCategory,
        binding: Option<&CallbackBinding<R>>,
        build: impl FnOnce() -> R,
        track: impl FnOnce(&DiscoveryGraph, &R),
    ) {
        if binding.is_none() && self.graph.is_none() {
            self.counters.unbound.fetch_add(1, Ordering::Relaxed);
            trace!("No {} callback bound, event dropped", category);
            return;
        }
        let record = build();
        if let Some(graph) = &self.graph {
            track(graph, &record);
        }
        let Some(binding) = binding else {
            self.counters.unbound.fetch_add(1, Ordering::Relaxed);
            trace!("No {} callback bound, record only tracked", category);
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            binding.invoke(record);
        }));
        match result {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Host {} callback panicked, event dropped", category);
            }
        }
    }

    fn qos_changed(&self, what: &str) {
        self.counters.qos_changes.fetch_add(1, Ordering::Relaxed);
        trace!("{} QoS change ignored", what);
    }
}

impl ParticipantListener for DiscoveryListener {
    fn on_participant_discovery(&self, info: ParticipantDiscoveryInfo) {
        match info.status {
            DiscoveryStatus::Discovered => self.dispatch(
                EventCategory::ParticipantDiscovered,
                self.callbacks.participant_discovered(),
                || self.participant_record(&info),
                DiscoveryGraph::participant_discovered,
            ),
            DiscoveryStatus::ChangedQos => self.qos_changed("Participant"),
            DiscoveryStatus::Removed => self.dispatch(
                EventCategory::ParticipantRemoved,
                self.callbacks.participant_removed(),
                || self.participant_record(&info),
                DiscoveryGraph::participant_removed,
            ),
        }
    }

    fn on_reader_discovery(&self, info: EndpointDiscoveryInfo) {
        match info.status {
            DiscoveryStatus::Discovered => self.dispatch(
                EventCategory::ReaderDiscovered,
                self.callbacks.reader_discovered(),
                || self.endpoint_record(&info),
                DiscoveryGraph::reader_discovered,
            ),
            DiscoveryStatus::ChangedQos => self.qos_changed("Reader"),
            DiscoveryStatus::Removed => self.dispatch(
                EventCategory::ReaderRemoved,
                self.callbacks.reader_removed(),
                || self.endpoint_record(&info),
                DiscoveryGraph::reader_removed,
            ),
        }
    }

    fn on_writer_discovery(&self, info: EndpointDiscoveryInfo) {
        match info.status {
            DiscoveryStatus::Discovered => self.dispatch(
                EventCategory::WriterDiscovered,
                self.callbacks.writer_discovered(),
                || self.endpoint_record(&info),
                DiscoveryGraph::writer_discovered,
            ),
            DiscoveryStatus::ChangedQos => self.qos_changed("Writer"),
            DiscoveryStatus::Removed => self.dispatch(
                EventCategory::WriterRemoved,
                self.callbacks.writer_removed(),
                || self.endpoint_record(&info),
                DiscoveryGraph::writer_removed,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackContext;
    use crate::locator::{Locator, Transport};
    use crate::middleware::{ParticipantHandle, RemoteLocatorList};
    use crate::records::{GuidPrefix, ReaderRecord, WriterRecord};
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    fn participant_info(status: DiscoveryStatus, locators: Vec<Locator>) -> ParticipantDiscoveryInfo {
        ParticipantDiscoveryInfo {
            status,
            participant: ParticipantHandle::from_raw(42),
            guid_prefix: GuidPrefix::new([0x0a; 12]),
            name: None,
            default_unicast_locators: locators,
        }
    }

    fn endpoint_info(status: DiscoveryStatus, unicast: Vec<Locator>) -> EndpointDiscoveryInfo {
        EndpointDiscoveryInfo {
            status,
            topic_name: "rt/chatter".into(),
            type_name: "std_msgs::msg::dds_::String_".into(),
            guid_prefix: GuidPrefix::new([0x0b; 12]),
            entity_id: [0, 0, 1, 4],
            remote_locators: RemoteLocatorList {
                unicast,
                multicast: vec![],
            },
        }
    }

    type Seen<R> = Arc<Mutex<Vec<(R, CallbackContext)>>>;

    fn recording_participants(seen: &Seen<ParticipantRecord>) -> crate::callbacks::ParticipantCallback {
        let seen = seen.clone();
        Arc::new(move |record: ParticipantRecord, ctx: &CallbackContext| {
            seen.lock().push((record, ctx.clone()));
        })
    }

    fn recording_endpoints(seen: &Seen<EndpointRecord>) -> crate::callbacks::ReaderCallback {
        let seen = seen.clone();
        Arc::new(move |record: ReaderRecord, ctx: &CallbackContext| {
            seen.lock().push((record, ctx.clone()));
        })
    }

    #[test]
    fn test_participant_round_trip() {
        let seen: Seen<ParticipantRecord> = Arc::default();
        let context: CallbackContext = Arc::new("host-context");
        let mut callbacks = CallbackRegistry::new();
        callbacks
            .set_participant_discovered(Some(recording_participants(&seen)), Some(context.clone()))
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        let gp = GuidPrefix::new([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let mut info = participant_info(
            DiscoveryStatus::Discovered,
            vec![Locator::udp_v4(Ipv4Addr::new(10, 0, 0, 5), 7410)],
        );
        info.guid_prefix = gp;
        listener.on_participant_discovery(info);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (record, ctx) = &seen[0];
        assert_eq!(record.guid_prefix, gp);
        assert_eq!(record.endpoint.transport(), Transport::UdpV4);
        assert_eq!(record.endpoint.address(), &[10, 0, 0, 5]);
        assert_eq!(record.participant, ParticipantHandle::from_raw(42));
        assert!(Arc::ptr_eq(ctx, &context));
        assert_eq!(listener.stats().dispatched, 1);
    }

    #[test]
    fn test_unbound_events_are_dropped() {
        let listener = DiscoveryListener::new(CallbackRegistry::new());
        listener.on_participant_discovery(participant_info(DiscoveryStatus::Discovered, vec![]));
        listener.on_participant_discovery(participant_info(DiscoveryStatus::Removed, vec![]));
        listener.on_reader_discovery(endpoint_info(DiscoveryStatus::Discovered, vec![]));
        listener.on_reader_discovery(endpoint_info(DiscoveryStatus::Removed, vec![]));
        listener.on_writer_discovery(endpoint_info(DiscoveryStatus::Discovered, vec![]));
        listener.on_writer_discovery(endpoint_info(DiscoveryStatus::Removed, vec![]));

        let stats = listener.stats();
        assert_eq!(stats.unbound, 6);
        assert_eq!(stats.dispatched, 0);
        // Records are never built for unbound categories.
        assert_eq!(stats.unknown_transport, 0);
    }

    #[test]
    fn test_qos_changes_never_reach_callbacks() {
        let seen: Seen<ParticipantRecord> = Arc::default();
        let readers: Seen<EndpointRecord> = Arc::default();
        let mut callbacks = CallbackRegistry::new();
        let ctx: CallbackContext = Arc::new(());
        callbacks
            .set_participant_discovered(Some(recording_participants(&seen)), Some(ctx.clone()))
            .unwrap();
        callbacks
            .set_participant_removed(Some(recording_participants(&seen)), Some(ctx.clone()))
            .unwrap();
        callbacks
            .set_reader_discovered(Some(recording_endpoints(&readers)), Some(ctx.clone()))
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        listener.on_participant_discovery(participant_info(DiscoveryStatus::ChangedQos, vec![]));
        listener.on_reader_discovery(endpoint_info(DiscoveryStatus::ChangedQos, vec![]));
        listener.on_writer_discovery(endpoint_info(DiscoveryStatus::ChangedQos, vec![]));

        assert!(seen.lock().is_empty());
        assert!(readers.lock().is_empty());
        assert_eq!(listener.stats().qos_changes, 3);
    }

    #[test]
    fn test_removed_goes_to_removed_binding_only() {
        let discovered: Seen<ParticipantRecord> = Arc::default();
        let removed: Seen<ParticipantRecord> = Arc::default();
        let mut callbacks = CallbackRegistry::new();
        callbacks
            .set_participant_discovered(Some(recording_participants(&discovered)), Some(Arc::new(1u8)))
            .unwrap();
        callbacks
            .set_participant_removed(Some(recording_participants(&removed)), Some(Arc::new(2u8)))
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        listener.on_participant_discovery(participant_info(
            DiscoveryStatus::Removed,
            vec![Locator::shm(0)],
        ));

        assert!(discovered.lock().is_empty());
        let removed = removed.lock();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0.endpoint, Endpoint::Shm);
        assert_eq!(removed[0].1.downcast_ref::<u8>(), Some(&2));
    }

    #[test]
    fn test_reader_uses_first_remote_unicast_locator() {
        let readers: Seen<EndpointRecord> = Arc::default();
        let mut callbacks = CallbackRegistry::new();
        callbacks
            .set_reader_discovered(Some(recording_endpoints(&readers)), Some(Arc::new(())))
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        listener.on_reader_discovery(endpoint_info(
            DiscoveryStatus::Discovered,
            vec![
                Locator::tcp_v4(Ipv4Addr::new(192, 168, 0, 7), 7411),
                Locator::udp_v4(Ipv4Addr::new(10, 9, 9, 9), 7411),
            ],
        ));

        let readers = readers.lock();
        assert_eq!(readers.len(), 1);
        let record = &readers[0].0;
        assert_eq!(record.topic_name.as_str(), "rt/chatter");
        assert_eq!(record.type_name.as_str(), "std_msgs::msg::dds_::String_");
        assert_eq!(record.guid_prefix, GuidPrefix::new([0x0b; 12]));
        assert_eq!(record.endpoint, Endpoint::TcpV4([192, 168, 0, 7]));
    }

    #[test]
    fn test_writer_removed_dispatch() {
        let writers: Seen<EndpointRecord> = Arc::default();
        let mut callbacks = CallbackRegistry::new();
        let w = writers.clone();
        callbacks
            .set_writer_removed(
                Some(Arc::new(move |record: WriterRecord, ctx: &CallbackContext| {
                    w.lock().push((record, ctx.clone()));
                })),
                Some(Arc::new(())),
            )
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        listener.on_writer_discovery(endpoint_info(DiscoveryStatus::Discovered, vec![]));
        listener.on_writer_discovery(endpoint_info(DiscoveryStatus::Removed, vec![]));

        assert_eq!(writers.lock().len(), 1);
        assert_eq!(listener.stats().unbound, 1);
    }

    #[test]
    fn test_unknown_transport_is_counted() {
        let seen: Seen<ParticipantRecord> = Arc::default();
        let mut callbacks = CallbackRegistry::new();
        callbacks
            .set_participant_discovered(Some(recording_participants(&seen)), Some(Arc::new(())))
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        listener.on_participant_discovery(participant_info(
            DiscoveryStatus::Discovered,
            vec![Locator::new(0x8000, 0, [0; 16])],
        ));

        assert_eq!(seen.lock()[0].0.endpoint, Endpoint::Unknown(0x8000));
        assert_eq!(listener.stats().unknown_transport, 1);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let mut callbacks = CallbackRegistry::new();
        callbacks
            .set_participant_discovered(
                Some(Arc::new(|_: ParticipantRecord, _: &CallbackContext| {
                    panic!("host bug")
                })),
                Some(Arc::new(())),
            )
            .unwrap();
        let listener = DiscoveryListener::new(callbacks);

        listener.on_participant_discovery(participant_info(DiscoveryStatus::Discovered, vec![]));
        listener.on_participant_discovery(participant_info(DiscoveryStatus::Discovered, vec![]));

        let stats = listener.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.dispatched, 0);
    }

    #[test]
    fn test_graph_tracks_unbound_events() {
        let graph = Arc::new(DiscoveryGraph::new(false));
        let listener = DiscoveryListener::new(CallbackRegistry::new()).with_graph(graph.clone());

        listener.on_participant_discovery(participant_info(
            DiscoveryStatus::Discovered,
            vec![Locator::udp_v4(Ipv4Addr::new(10, 0, 0, 5), 7410)],
        ));
        let mut writer = endpoint_info(DiscoveryStatus::Discovered, vec![]);
        writer.guid_prefix = GuidPrefix::new([0x0a; 12]);
        listener.on_writer_discovery(writer.clone());
        listener.on_writer_discovery(EndpointDiscoveryInfo {
            status: DiscoveryStatus::ChangedQos,
            ..writer.clone()
        });

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.version, 2);
        let owner = snapshot.participant(&GuidPrefix::new([0x0a; 12])).unwrap();
        assert_eq!(owner.endpoint, Some(Endpoint::UdpV4([10, 0, 0, 5])));
        assert_eq!(snapshot.topic("/chatter").unwrap().publishers, 1);

        listener.on_writer_discovery(EndpointDiscoveryInfo {
            status: DiscoveryStatus::Removed,
            ..writer
        });
        listener.on_participant_discovery(participant_info(DiscoveryStatus::Removed, vec![]));
        assert!(graph.snapshot().is_empty());

        let stats = listener.stats();
        assert_eq!(stats.unbound, 4);
        assert_eq!(stats.qos_changes, 1);
    }
}
