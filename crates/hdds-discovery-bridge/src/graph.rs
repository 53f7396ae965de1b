// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live discovery graph of a domain.
//!
//! A [`DiscoveryGraph`] folds the server's discovered/removed events into an
//! aggregated view: every known participant with its readers and writers,
//! and every topic with its publisher and subscriber counts. Each change
//! publishes a new [`GraphSnapshot`]; readers always get the latest one
//! without taking the graph lock.
//!
//! Endpoints are keyed by the owning [`GuidPrefix`] plus the ROS 2 topic name
//! and type name. Several endpoints of one participant on the same topic are
//! counted, so every removal undoes exactly one discovery.
//!
//! # Internal topics
//!
//! `/rosout`, `/parameter_events` and `/ros_discovery_info` are tracked like
//! any other topic but left out of snapshots unless the graph was created
//! with `include_internals`.

use crate::locator::Endpoint;
use crate::records::{EndpointRecord, GuidPrefix, ParticipantRecord};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

const INTERNAL_TOPICS: [&str; 3] = ["/rosout", "/parameter_events", "/ros_discovery_info"];

/// Whether `topic_name` (ROS 2 form, e.g. `/rosout`) is a ROS 2 internal topic.
pub fn is_internal_topic(topic_name: &str) -> bool {
    INTERNAL_TOPICS.contains(&topic_name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EndpointKind {
    Reader,
    Writer,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TopicKey {
    name: String,
    type_name: String,
}

impl TopicKey {
    fn of(record: &EndpointRecord) -> Self {
        Self {
            name: record.ros2_topic_name(),
            type_name: record.type_name.as_str().to_string(),
        }
    }

    fn is_visible(&self, include_internals: bool) -> bool {
        include_internals || !is_internal_topic(&self.name)
    }
}

#[derive(Default)]
struct ParticipantEntry {
    /// `None` until the participant itself is announced.
    endpoint: Option<Endpoint>,
    readers: BTreeMap<TopicKey, usize>,
    writers: BTreeMap<TopicKey, usize>,
}

impl ParticipantEntry {
    fn endpoints_mut(&mut self, kind: EndpointKind) -> &mut BTreeMap<TopicKey, usize> {
        match kind {
            EndpointKind::Reader => &mut self.readers,
            EndpointKind::Writer => &mut self.writers,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Readers or writers of one participant on one topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraphEndpoint {
    pub topic_name: String,
    pub type_name: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraphParticipant {
    pub guid_prefix: GuidPrefix,
    pub endpoint: Option<Endpoint>,
    pub readers: Vec<GraphEndpoint>,
    pub writers: Vec<GraphEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraphTopic {
    pub name: String,
    pub type_name: String,
    pub publishers: usize,
    pub subscribers: usize,
}

/// Immutable view of the graph at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    /// Incremented on every change; 0 for the empty initial snapshot.
    pub version: u64,
    /// Ordered by GUID prefix.
    pub participants: Vec<GraphParticipant>,
    /// Ordered by name, then type.
    pub topics: Vec<GraphTopic>,
}

impl GraphSnapshot {
    pub fn participant(&self, guid_prefix: &GuidPrefix) -> Option<&GraphParticipant> {
        self.participants
            .iter()
            .find(|p| p.guid_prefix == *guid_prefix)
    }

    /// First topic named `name`, whatever its type.
    pub fn topic(&self, name: &str) -> Option<&GraphTopic> {
        self.topics.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[derive(Default)]
struct GraphState {
    version: u64,
    participants: BTreeMap<GuidPrefix, ParticipantEntry>,
}

impl GraphState {
    fn snapshot(&self, include_internals: bool) -> GraphSnapshot {
        let mut topics: BTreeMap<&TopicKey, (usize, usize)> = BTreeMap::new();
        let mut participants = Vec::with_capacity(self.participants.len());

        for (guid_prefix, entry) in &self.participants {
            let mut readers = Vec::new();
            for (key, count) in &entry.readers {
                if key.is_visible(include_internals) {
                    topics.entry(key).or_default().1 += count;
                    readers.push(graph_endpoint(key, *count));
                }
            }
            let mut writers = Vec::new();
            for (key, count) in &entry.writers {
                if key.is_visible(include_internals) {
                    topics.entry(key).or_default().0 += count;
                    writers.push(graph_endpoint(key, *count));
                }
            }
            participants.push(GraphParticipant {
                guid_prefix: *guid_prefix,
                endpoint: entry.endpoint,
                readers,
                writers,
            });
        }

        GraphSnapshot {
            version: self.version,
            participants,
            topics: topics
                .into_iter()
                .map(|(key, (publishers, subscribers))| GraphTopic {
                    name: key.name.clone(),
                    type_name: key.type_name.clone(),
                    publishers,
                    subscribers,
                })
                .collect(),
        }
    }
}

fn graph_endpoint(key: &TopicKey, count: usize) -> GraphEndpoint {
    GraphEndpoint {
        topic_name: key.name.clone(),
        type_name: key.type_name.clone(),
        count,
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Aggregated participants, endpoints and topics seen by one server.
pub struct DiscoveryGraph {
    include_internals: bool,
    state: Mutex<GraphState>,
    latest: ArcSwap<GraphSnapshot>,
}

impl DiscoveryGraph {
    pub fn new(include_internals: bool) -> Self {
        Self {
            include_internals,
            state: Mutex::new(GraphState::default()),
            latest: ArcSwap::from_pointee(GraphSnapshot::default()),
        }
    }

    pub fn include_internals(&self) -> bool {
        self.include_internals
    }

    /// Latest published snapshot (lock-free).
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.latest.load_full()
    }

    /// Version of the latest published snapshot.
    pub fn version(&self) -> u64 {
        self.latest.load().version
    }

    pub fn participant_discovered(&self, record: &ParticipantRecord) {
        let mut state = self.state.lock();
        let entry = state.participants.entry(record.guid_prefix).or_default();
        if entry.endpoint == Some(record.endpoint) {
            return;
        }
        entry.endpoint = Some(record.endpoint);
        self.publish(&mut state);
    }

    /// Forget the participant together with every endpoint it owned.
    pub fn participant_removed(&self, record: &ParticipantRecord) {
        let mut state = self.state.lock();
        if state.participants.remove(&record.guid_prefix).is_none() {
            trace!("Graph: participant {} was not known", record.guid_prefix);
            return;
        }
        self.publish(&mut state);
    }

    pub fn reader_discovered(&self, record: &EndpointRecord) {
        self.endpoint_discovered(EndpointKind::Reader, record);
    }

    pub fn reader_removed(&self, record: &EndpointRecord) {
        self.endpoint_removed(EndpointKind::Reader, record);
    }

    pub fn writer_discovered(&self, record: &EndpointRecord) {
        self.endpoint_discovered(EndpointKind::Writer, record);
    }

    pub fn writer_removed(&self, record: &EndpointRecord) {
        self.endpoint_removed(EndpointKind::Writer, record);
    }

    fn endpoint_discovered(&self, kind: EndpointKind, record: &EndpointRecord) {
        let mut state = self.state.lock();
        let entry = state.participants.entry(record.guid_prefix).or_default();
        *entry
            .endpoints_mut(kind)
            .entry(TopicKey::of(record))
            .or_insert(0) += 1;
        self.publish(&mut state);
    }

    fn endpoint_removed(&self, kind: EndpointKind, record: &EndpointRecord) {
        let mut state = self.state.lock();
        let Some(entry) = state.participants.get_mut(&record.guid_prefix) else {
            trace!("Graph: owner {} of removed {:?} unknown", record.guid_prefix, kind);
            return;
        };
        let key = TopicKey::of(record);
        let endpoints = entry.endpoints_mut(kind);
        let Some(count) = endpoints.get_mut(&key) else {
            trace!("Graph: removed {:?} on {} was not known", kind, key.name);
            return;
        };
        *count -= 1;
        if *count == 0 {
            endpoints.remove(&key);
        }
        self.publish(&mut state);
    }

    fn publish(&self, state: &mut GraphState) {
        state.version += 1;
        let snapshot = state.snapshot(self.include_internals);
        debug!(
            "Graph v{}: {} participant(s), {} topic(s)",
            snapshot.version,
            snapshot.participants.len(),
            snapshot.topics.len()
        );
        self.latest.store(Arc::new(snapshot));
    }
}

impl Default for DiscoveryGraph {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::ParticipantHandle;
    use crate::records::BoundedName;

    fn participant(id: u8) -> ParticipantRecord {
        ParticipantRecord {
            participant: ParticipantHandle::from_raw(u64::from(id)),
            guid_prefix: GuidPrefix::new([id; 12]),
            endpoint: Endpoint::UdpV4([10, 0, 0, id]),
        }
    }

    fn endpoint(id: u8, topic: &str, type_name: &str) -> EndpointRecord {
        EndpointRecord {
            topic_name: BoundedName::new(topic),
            type_name: BoundedName::new(type_name),
            guid_prefix: GuidPrefix::new([id; 12]),
            endpoint: Endpoint::Shm,
        }
    }

    const STRING: &str = "std_msgs::msg::dds_::String_";

    #[test]
    fn test_empty_graph() {
        let graph = DiscoveryGraph::default();
        let snapshot = graph.snapshot();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.is_empty());
        assert!(snapshot.topics.is_empty());
    }

    #[test]
    fn test_topic_counts_across_participants() {
        let graph = DiscoveryGraph::new(false);
        graph.participant_discovered(&participant(1));
        graph.participant_discovered(&participant(2));
        graph.writer_discovered(&endpoint(1, "rt/chatter", STRING));
        graph.reader_discovered(&endpoint(2, "rt/chatter", STRING));
        graph.reader_discovered(&endpoint(2, "rt/chatter", STRING));

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.version, 5);
        assert_eq!(snapshot.participants.len(), 2);
        let topic = snapshot.topic("/chatter").unwrap();
        assert_eq!(topic.type_name, STRING);
        assert_eq!(topic.publishers, 1);
        assert_eq!(topic.subscribers, 2);

        let listener = snapshot.participant(&GuidPrefix::new([2; 12])).unwrap();
        assert_eq!(listener.endpoint, Some(Endpoint::UdpV4([10, 0, 0, 2])));
        assert_eq!(listener.readers[0].count, 2);
        assert!(listener.writers.is_empty());
    }

    #[test]
    fn test_add_remove_symmetry() {
        let graph = DiscoveryGraph::new(false);
        graph.participant_discovered(&participant(1));
        let empty_participant = graph.snapshot();

        let reader = endpoint(1, "rt/chatter", STRING);
        let writer = endpoint(1, "rt/odom", "nav_msgs::msg::dds_::Odometry_");
        graph.reader_discovered(&reader);
        graph.writer_discovered(&writer);
        graph.reader_discovered(&reader);
        graph.reader_removed(&reader);
        graph.writer_removed(&writer);
        graph.reader_removed(&reader);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.participants, empty_participant.participants);
        assert!(snapshot.topics.is_empty());
        assert!(snapshot.version > empty_participant.version);

        graph.participant_removed(&participant(1));
        assert!(graph.snapshot().is_empty());
    }

    #[test]
    fn test_participant_removal_drops_its_endpoints() {
        let graph = DiscoveryGraph::new(false);
        graph.participant_discovered(&participant(1));
        graph.participant_discovered(&participant(2));
        graph.writer_discovered(&endpoint(1, "rt/chatter", STRING));
        graph.reader_discovered(&endpoint(2, "rt/chatter", STRING));

        graph.participant_removed(&participant(1));

        let snapshot = graph.snapshot();
        assert!(snapshot.participant(&GuidPrefix::new([1; 12])).is_none());
        let topic = snapshot.topic("/chatter").unwrap();
        assert_eq!(topic.publishers, 0);
        assert_eq!(topic.subscribers, 1);
    }

    #[test]
    fn test_unknown_removals_are_ignored() {
        let graph = DiscoveryGraph::new(false);
        graph.reader_removed(&endpoint(1, "rt/chatter", STRING));
        graph.participant_removed(&participant(1));
        assert_eq!(graph.version(), 0);

        graph.participant_discovered(&participant(1));
        graph.writer_removed(&endpoint(1, "rt/chatter", STRING));
        assert_eq!(graph.version(), 1);
    }

    #[test]
    fn test_endpoint_before_participant() {
        let graph = DiscoveryGraph::new(false);
        graph.writer_discovered(&endpoint(3, "rt/chatter", STRING));

        let snapshot = graph.snapshot();
        let owner = snapshot.participant(&GuidPrefix::new([3; 12])).unwrap();
        assert_eq!(owner.endpoint, None);
        assert_eq!(owner.writers.len(), 1);

        graph.participant_discovered(&participant(3));
        let snapshot = graph.snapshot();
        let owner = snapshot.participant(&GuidPrefix::new([3; 12])).unwrap();
        assert_eq!(owner.endpoint, Some(Endpoint::UdpV4([10, 0, 0, 3])));
        assert_eq!(owner.writers.len(), 1);
    }

    #[test]
    fn test_rediscovery_without_change_is_not_published() {
        let graph = DiscoveryGraph::new(false);
        graph.participant_discovered(&participant(1));
        graph.participant_discovered(&participant(1));
        assert_eq!(graph.version(), 1);
    }

    #[test]
    fn test_internal_topics_filtered() {
        let hidden = DiscoveryGraph::new(false);
        let shown = DiscoveryGraph::new(true);
        for graph in [&hidden, &shown] {
            graph.writer_discovered(&endpoint(1, "rt/rosout", "rcl_interfaces::msg::dds_::Log_"));
            graph.writer_discovered(&endpoint(
                1,
                "rt/parameter_events",
                "rcl_interfaces::msg::dds_::ParameterEvent_",
            ));
            graph.writer_discovered(&endpoint(1, "rt/chatter", STRING));
        }

        let snapshot = hidden.snapshot();
        assert_eq!(snapshot.topics.len(), 1);
        assert_eq!(snapshot.topics[0].name, "/chatter");
        assert_eq!(snapshot.participants[0].writers.len(), 1);

        let snapshot = shown.snapshot();
        assert_eq!(snapshot.topics.len(), 3);
        assert!(snapshot.topic("/rosout").is_some());
    }

    #[test]
    fn test_internal_topic_names() {
        assert!(is_internal_topic("/rosout"));
        assert!(is_internal_topic("/parameter_events"));
        assert!(is_internal_topic("/ros_discovery_info"));
        assert!(!is_internal_topic("rosout"));
        assert!(!is_internal_topic("/chatter"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let graph = DiscoveryGraph::new(false);
        graph.participant_discovered(&participant(1));
        graph.writer_discovered(&endpoint(1, "rt/chatter", STRING));

        let json = serde_json::to_value(&*graph.snapshot()).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(
            json["participants"][0]["guid_prefix"],
            "01.01.01.01.01.01.01.01.01.01.01.01"
        );
        assert_eq!(json["topics"][0]["name"], "/chatter");
        assert_eq!(json["topics"][0]["publishers"], 1);
    }
}
