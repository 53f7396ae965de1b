// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process loopback domain fabric.
//!
//! Every participant created through this middleware (or added as a passive
//! peer) joins a shared in-memory domain. Participants on the same domain
//! discover each other and each other's readers/writers, exactly as they
//! would through SPDP/SEDP, but without any sockets.
//!
//! Notifications are delivered on a single dedicated delivery thread. The
//! fabric lock is never held while a listener runs, so listeners may call
//! back into the middleware (e.g. to delete a participant).
//!
//! A notification is only delivered if its recipient is still an enabled
//! member when the delivery thread picks it up. `close_participant` and
//! `delete_participant` wait for a delivery already in progress before
//! returning, unless they are called from the delivery thread itself. Once
//! they return, the participant's listener is never invoked again.

use super::{
    DiscoveryMiddleware, DiscoveryStatus, EndpointDiscoveryInfo, MiddlewareError,
    ParticipantDiscoveryInfo, ParticipantHandle, ParticipantListener, RemoteLocatorList,
    ServerQos,
};
use crate::locator::Locator;
use crate::records::GuidPrefix;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};

const ENTITY_KIND_READER: u8 = 0x04;
const ENTITY_KIND_WRITER: u8 = 0x03;

/// Description of a passive peer participant (no listener).
#[derive(Clone, Debug)]
pub struct SimulatedPeer {
    pub guid_prefix: GuidPrefix,
    pub name: Option<String>,
    pub unicast_locators: Vec<Locator>,
}

impl SimulatedPeer {
    pub fn new(guid_prefix: GuidPrefix, unicast_locators: Vec<Locator>) -> Self {
        Self {
            guid_prefix,
            name: None,
            unicast_locators,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Clone)]
struct LocalEndpoint {
    entity_id: [u8; 4],
    topic_name: String,
    type_name: String,
    locators: RemoteLocatorList,
    is_writer: bool,
}

struct Member {
    domain_id: u32,
    guid_prefix: GuidPrefix,
    name: Option<String>,
    locators: Vec<Locator>,
    listener: Option<Arc<dyn ParticipantListener>>,
    enabled: bool,
    endpoints: Vec<LocalEndpoint>,
    next_entity: u16,
}

impl Member {
    fn info(&self, handle: ParticipantHandle, status: DiscoveryStatus) -> ParticipantDiscoveryInfo {
        ParticipantDiscoveryInfo {
            status,
            participant: handle,
            guid_prefix: self.guid_prefix,
            name: self.name.clone(),
            default_unicast_locators: self.locators.clone(),
        }
    }

    fn endpoint_info(&self, ep: &LocalEndpoint, status: DiscoveryStatus) -> EndpointDiscoveryInfo {
        EndpointDiscoveryInfo {
            status,
            topic_name: ep.topic_name.clone(),
            type_name: ep.type_name.clone(),
            guid_prefix: self.guid_prefix,
            entity_id: ep.entity_id,
            remote_locators: ep.locators.clone(),
        }
    }
}

#[derive(Default)]
struct Fabric {
    next_handle: u64,
    members: BTreeMap<ParticipantHandle, Member>,
    fail_next_create: bool,
    refuse_deletes: bool,
}

impl Fabric {
    /// Listening members on `domain_id`, excluding `except`.
    fn audience(&self, domain_id: u32, except: ParticipantHandle) -> Vec<Recipient> {
        self.members
            .iter()
            .filter(|(h, m)| **h != except && m.enabled && m.domain_id == domain_id)
            .filter_map(|(h, m)| m.listener.clone().map(|listener| (*h, listener)))
            .collect()
    }

    fn is_listening(&self, handle: ParticipantHandle) -> bool {
        self.members.get(&handle).is_some_and(|m| m.enabled)
    }
}

/// Recipient handle and its listener.
type Recipient = (ParticipantHandle, Arc<dyn ParticipantListener>);

enum Notification {
    Participant(ParticipantDiscoveryInfo),
    Reader(EndpointDiscoveryInfo),
    Writer(EndpointDiscoveryInfo),
}

impl Notification {
    fn endpoint(info: EndpointDiscoveryInfo, is_writer: bool) -> Self {
        if is_writer {
            Notification::Writer(info)
        } else {
            Notification::Reader(info)
        }
    }

    fn deliver(self, listener: &dyn ParticipantListener) {
        match self {
            Notification::Participant(info) => {
                trace!("deliver participant {:?} {}", info.status, info.guid_prefix);
                listener.on_participant_discovery(info);
            }
            Notification::Reader(info) => listener.on_reader_discovery(info),
            Notification::Writer(info) => listener.on_writer_discovery(info),
        }
    }
}

enum Delivery {
    Notify {
        target: ParticipantHandle,
        listener: Arc<dyn ParticipantListener>,
        notification: Notification,
    },
    Flush(Sender<()>),
    Shutdown,
}

/// In-process [`DiscoveryMiddleware`].
pub struct LoopbackMiddleware {
    fabric: Arc<Mutex<Fabric>>,
    /// Held by the delivery thread while a listener runs.
    delivering: Arc<Mutex<()>>,
    tx: Sender<Delivery>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
}

impl LoopbackMiddleware {
    /// Create a fabric with its delivery thread.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel::unbounded();
        let fabric = Arc::new(Mutex::new(Fabric {
            next_handle: 1,
            ..Default::default()
        }));
        let delivering = Arc::new(Mutex::new(()));
        let worker = {
            let fabric = fabric.clone();
            let delivering = delivering.clone();
            thread::Builder::new()
                .name("hdds-bridge-loopback".into())
                .spawn(move || delivery_loop(rx, fabric, delivering))
                .ok()
        };
        if worker.is_none() {
            warn!("Unable to spawn loopback delivery thread");
        }
        let worker_id = worker.as_ref().map(|w| w.thread().id());
        Arc::new(Self {
            fabric,
            delivering,
            tx,
            worker: Mutex::new(worker),
            worker_id,
        })
    }

    /// Add a passive participant that is discoverable but has no listener.
    pub fn add_peer(&self, domain_id: u32, peer: SimulatedPeer) -> ParticipantHandle {
        self.join(
            domain_id,
            peer.guid_prefix,
            peer.name,
            peer.unicast_locators,
            None,
        )
    }

    /// Announce a reader owned by `owner`. Returns its entity id.
    pub fn add_reader(
        &self,
        owner: ParticipantHandle,
        topic_name: &str,
        type_name: &str,
        locators: RemoteLocatorList,
    ) -> Result<[u8; 4], MiddlewareError> {
        self.add_endpoint(owner, topic_name, type_name, locators, false)
    }

    /// Announce a writer owned by `owner`. Returns its entity id.
    pub fn add_writer(
        &self,
        owner: ParticipantHandle,
        topic_name: &str,
        type_name: &str,
        locators: RemoteLocatorList,
    ) -> Result<[u8; 4], MiddlewareError> {
        self.add_endpoint(owner, topic_name, type_name, locators, true)
    }

    /// Withdraw a reader or writer.
    pub fn remove_endpoint(
        &self,
        owner: ParticipantHandle,
        entity_id: [u8; 4],
    ) -> Result<(), MiddlewareError> {
        let mut fabric = self.fabric.lock();
        let audience;
        let delivery_info;
        let is_writer;
        {
            let member = fabric
                .members
                .get_mut(&owner)
                .ok_or(MiddlewareError::UnknownParticipant(owner))?;
            let pos = member
                .endpoints
                .iter()
                .position(|e| e.entity_id == entity_id)
                .ok_or_else(|| MiddlewareError::Refused("unknown entity".into()))?;
            let ep = member.endpoints.remove(pos);
            is_writer = ep.is_writer;
            delivery_info = member.endpoint_info(&ep, DiscoveryStatus::Removed);
            if !member.enabled {
                return Ok(());
            }
            let domain_id = member.domain_id;
            audience = fabric.audience(domain_id, owner);
        }
        for recipient in audience {
            self.send_endpoint(recipient, delivery_info.clone(), is_writer);
        }
        Ok(())
    }

    /// Signal a QoS change of `handle` to the rest of its domain.
    pub fn update_participant_qos(&self, handle: ParticipantHandle) -> Result<(), MiddlewareError> {
        let fabric = self.fabric.lock();
        let member = fabric
            .members
            .get(&handle)
            .ok_or(MiddlewareError::UnknownParticipant(handle))?;
        if !member.enabled {
            return Ok(());
        }
        let info = member.info(handle, DiscoveryStatus::ChangedQos);
        for recipient in fabric.audience(member.domain_id, handle) {
            self.notify(recipient, Notification::Participant(info.clone()));
        }
        Ok(())
    }

    /// Make the next `create_participant` call return `None`.
    pub fn fail_next_create(&self) {
        self.fabric.lock().fail_next_create = true;
    }

    /// Make every `delete_participant` call fail while set.
    pub fn refuse_deletes(&self, refuse: bool) {
        self.fabric.lock().refuse_deletes = refuse;
    }

    /// Whether the fabric still knows `handle` (closed or not).
    pub fn contains(&self, handle: ParticipantHandle) -> bool {
        self.fabric.lock().members.contains_key(&handle)
    }

    /// Number of enabled participants on a domain.
    pub fn participant_count(&self, domain_id: u32) -> usize {
        self.fabric
            .lock()
            .members
            .values()
            .filter(|m| m.enabled && m.domain_id == domain_id)
            .count()
    }

    /// Block until every notification queued so far has been delivered.
    ///
    /// Must not be called from inside a listener.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.send(Delivery::Flush(ack_tx));
        if ack_rx.recv_timeout(Duration::from_secs(5)).is_err() {
            warn!("Loopback flush timed out");
        }
    }

    fn join(
        &self,
        domain_id: u32,
        guid_prefix: GuidPrefix,
        name: Option<String>,
        locators: Vec<Locator>,
        listener: Option<Arc<dyn ParticipantListener>>,
    ) -> ParticipantHandle {
        let mut fabric = self.fabric.lock();
        let handle = ParticipantHandle::from_raw(fabric.next_handle);
        fabric.next_handle += 1;

        let member = Member {
            domain_id,
            guid_prefix,
            name,
            locators,
            listener,
            enabled: true,
            endpoints: Vec::new(),
            next_entity: 1,
        };

        for (other_handle, other) in fabric
            .members
            .iter()
            .filter(|(_, m)| m.enabled && m.domain_id == domain_id)
        {
            // Existing participants and their endpoints, as seen by the newcomer.
            if let Some(listener) = &member.listener {
                self.notify(
                    (handle, listener.clone()),
                    Notification::Participant(
                        other.info(*other_handle, DiscoveryStatus::Discovered),
                    ),
                );
                for ep in &other.endpoints {
                    self.send_endpoint(
                        (handle, listener.clone()),
                        other.endpoint_info(ep, DiscoveryStatus::Discovered),
                        ep.is_writer,
                    );
                }
            }
            // The newcomer, as seen by the existing participant.
            if let Some(other_listener) = &other.listener {
                self.notify(
                    (*other_handle, other_listener.clone()),
                    Notification::Participant(member.info(handle, DiscoveryStatus::Discovered)),
                );
            }
        }

        debug!(
            "Participant {} ({}) joined domain {}",
            handle, guid_prefix, domain_id
        );
        fabric.members.insert(handle, member);
        handle
    }

    fn add_endpoint(
        &self,
        owner: ParticipantHandle,
        topic_name: &str,
        type_name: &str,
        locators: RemoteLocatorList,
        is_writer: bool,
    ) -> Result<[u8; 4], MiddlewareError> {
        let mut fabric = self.fabric.lock();
        let (info, domain_id, enabled, entity_id) = {
            let member = fabric
                .members
                .get_mut(&owner)
                .ok_or(MiddlewareError::UnknownParticipant(owner))?;
            let [hi, lo] = member.next_entity.to_be_bytes();
            member.next_entity = member.next_entity.wrapping_add(1);
            let kind = if is_writer {
                ENTITY_KIND_WRITER
            } else {
                ENTITY_KIND_READER
            };
            let ep = LocalEndpoint {
                entity_id: [0, hi, lo, kind],
                topic_name: topic_name.to_string(),
                type_name: type_name.to_string(),
                locators,
                is_writer,
            };
            let info = member.endpoint_info(&ep, DiscoveryStatus::Discovered);
            let entity_id = ep.entity_id;
            member.endpoints.push(ep);
            (info, member.domain_id, member.enabled, entity_id)
        };
        if enabled {
            for recipient in fabric.audience(domain_id, owner) {
                self.send_endpoint(recipient, info.clone(), is_writer);
            }
        }
        Ok(entity_id)
    }

    /// Queue removal notifications for a member leaving its domain.
    fn announce_departure(&self, fabric: &Fabric, handle: ParticipantHandle, member: &Member) {
        for recipient in fabric.audience(member.domain_id, handle) {
            for ep in &member.endpoints {
                self.send_endpoint(
                    recipient.clone(),
                    member.endpoint_info(ep, DiscoveryStatus::Removed),
                    ep.is_writer,
                );
            }
            self.notify(
                recipient,
                Notification::Participant(member.info(handle, DiscoveryStatus::Removed)),
            );
        }
    }

    /// Wait for a delivery in progress to finish.
    ///
    /// No-op on the delivery thread, where the running listener is the caller.
    fn quiesce(&self) {
        if self.worker_id != Some(thread::current().id()) {
            drop(self.delivering.lock());
        }
    }

    fn send_endpoint(&self, recipient: Recipient, info: EndpointDiscoveryInfo, is_writer: bool) {
        self.notify(recipient, Notification::endpoint(info, is_writer));
    }

    fn notify(&self, (target, listener): Recipient, notification: Notification) {
        self.send(Delivery::Notify {
            target,
            listener,
            notification,
        });
    }

    fn send(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            warn!("Loopback delivery thread is gone, notification dropped");
        }
    }
}

impl DiscoveryMiddleware for LoopbackMiddleware {
    fn create_participant(
        &self,
        domain_id: u32,
        qos: &ServerQos,
        listener: Arc<dyn ParticipantListener>,
    ) -> Option<ParticipantHandle> {
        {
            let mut fabric = self.fabric.lock();
            if fabric.fail_next_create {
                fabric.fail_next_create = false;
                warn!("Loopback refusing participant creation on domain {}", domain_id);
                return None;
            }
        }
        Some(self.join(
            domain_id,
            qos.guid_prefix,
            None,
            qos.metatraffic_unicast.clone(),
            Some(listener),
        ))
    }

    fn close_participant(&self, handle: ParticipantHandle) {
        {
            let mut fabric = self.fabric.lock();
            let Some(member) = fabric.members.get_mut(&handle) else {
                return;
            };
            if !member.enabled {
                return;
            }
            member.enabled = false;
            let fabric = &*fabric;
            if let Some(member) = fabric.members.get(&handle) {
                self.announce_departure(fabric, handle, member);
            }
        }
        self.quiesce();
        debug!("Participant {} closed", handle);
    }

    fn delete_participant(&self, handle: ParticipantHandle) -> Result<(), MiddlewareError> {
        let member = {
            let mut fabric = self.fabric.lock();
            if fabric.refuse_deletes {
                return Err(MiddlewareError::Refused("deletion disabled".into()));
            }
            let member = fabric
                .members
                .remove(&handle)
                .ok_or(MiddlewareError::UnknownParticipant(handle))?;
            if member.enabled {
                self.announce_departure(&fabric, handle, &member);
            }
            member
        };
        self.quiesce();
        drop(member);
        debug!("Participant {} deleted", handle);
        Ok(())
    }

    fn is_enabled(&self, handle: ParticipantHandle) -> bool {
        self.fabric.lock().is_listening(handle)
    }
}

impl Drop for LoopbackMiddleware {
    fn drop(&mut self) {
        let _ = self.tx.send(Delivery::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            // The last reference may be released from a listener callback.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn delivery_loop(rx: Receiver<Delivery>, fabric: Arc<Mutex<Fabric>>, delivering: Arc<Mutex<()>>) {
    while let Ok(delivery) = rx.recv() {
        match delivery {
            Delivery::Notify {
                target,
                listener,
                notification,
            } => {
                // Delivery lock is taken before the fabric lock is released.
                let _running = {
                    let members = fabric.lock();
                    if !members.is_listening(target) {
                        trace!("Participant {} gone, notification dropped", target);
                        continue;
                    }
                    delivering.lock()
                };
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    notification.deliver(&*listener)
                }));
                if result.is_err() {
                    warn!("Listener panicked during loopback delivery");
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
            Delivery::Shutdown => break,
        }
    }
    trace!("Loopback delivery thread exiting");
}
