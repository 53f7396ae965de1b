// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Seam between the bridge and the discovery middleware.
//!
//! The middleware owns participants and delivers discovery notifications on
//! its own threads. The bridge only needs participant create/close/delete and
//! a listener hook, which is what [`DiscoveryMiddleware`] and
//! [`ParticipantListener`] describe.

use crate::locator::Locator;
use crate::records::GuidPrefix;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub mod loopback;

pub use loopback::{LoopbackMiddleware, SimulatedPeer};

/// Opaque participant handle issued by the middleware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ParticipantHandle(u64);

impl ParticipantHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

// ============================================================================
// Raw notifications
// ============================================================================

/// Status carried by every discovery notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Discovered,
    ChangedQos,
    Removed,
}

/// Participant discovery notification.
#[derive(Clone, Debug)]
pub struct ParticipantDiscoveryInfo {
    pub status: DiscoveryStatus,
    /// Handle of the participant the notification is about.
    pub participant: ParticipantHandle,
    pub guid_prefix: GuidPrefix,
    pub name: Option<String>,
    pub default_unicast_locators: Vec<Locator>,
}

/// Remote locators announced by a reader or writer.
#[derive(Clone, Debug, Default)]
pub struct RemoteLocatorList {
    pub unicast: Vec<Locator>,
    pub multicast: Vec<Locator>,
}

/// Reader or writer discovery notification.
#[derive(Clone, Debug)]
pub struct EndpointDiscoveryInfo {
    pub status: DiscoveryStatus,
    pub topic_name: String,
    pub type_name: String,
    /// Prefix of the owning participant.
    pub guid_prefix: GuidPrefix,
    pub entity_id: [u8; 4],
    pub remote_locators: RemoteLocatorList,
}

/// Receiver of discovery notifications.
///
/// Called from middleware threads; implementations must not assume a
/// particular thread and must not panic into the caller.
pub trait ParticipantListener: Send + Sync {
    fn on_participant_discovery(&self, info: ParticipantDiscoveryInfo);

    fn on_reader_discovery(&self, info: EndpointDiscoveryInfo);

    fn on_writer_discovery(&self, info: EndpointDiscoveryInfo);
}

// ============================================================================
// Participant QoS
// ============================================================================

/// Discovery role of a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryRole {
    /// Plain participant (simple discovery).
    Simple,
    /// Discovery server.
    Server,
    /// Discovery server that persists its discovery database.
    Backup,
}

/// Remote discovery server a server participant rendezvous with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteServer {
    pub guid_prefix: GuidPrefix,
    pub metatraffic_unicast: Locator,
}

/// Participant QoS subset the bridge configures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerQos {
    pub role: DiscoveryRole,
    pub guid_prefix: GuidPrefix,
    pub metatraffic_unicast: Vec<Locator>,
    pub remote_servers: Vec<RemoteServer>,
}

// ============================================================================
// Middleware
// ============================================================================

/// Participant lifecycle operations offered by the middleware.
pub trait DiscoveryMiddleware: Send + Sync {
    /// Create an enabled participant. `None` when the middleware refuses.
    fn create_participant(
        &self,
        domain_id: u32,
        qos: &ServerQos,
        listener: Arc<dyn ParticipantListener>,
    ) -> Option<ParticipantHandle>;

    /// Disable a participant; the handle stays known until deleted.
    fn close_participant(&self, handle: ParticipantHandle);

    fn delete_participant(&self, handle: ParticipantHandle) -> Result<(), MiddlewareError>;

    fn is_enabled(&self, handle: ParticipantHandle) -> bool;
}

/// Middleware operation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareError {
    UnknownParticipant(ParticipantHandle),
    Refused(String),
}

impl fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParticipant(h) => write!(f, "Unknown participant {}", h),
            Self::Refused(s) => write!(f, "Refused: {}", s),
        }
    }
}

impl std::error::Error for MiddlewareError {}
