// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Discovery Bridge
//!
//! Runs a DDS discovery server participant on a domain and surfaces what it
//! discovers to a host application:
//! - participants, readers and writers, as normalized records
//! - discovered and removed events, each with its own callback binding
//! - a live discovery graph of participants, endpoints and topics
//! - start/stop/is-running control of the server, including stopping a
//!   server started by another process
//!
//! # Example
//!
//! ```no_run
//! use hdds_discovery_bridge::{
//!     BridgeConfig, CallbackContext, CallbackRegistry, LoopbackMiddleware, MemoryStateStore,
//!     ParticipantRecord, ServerLifecycle,
//! };
//! use std::sync::Arc;
//!
//! let middleware = LoopbackMiddleware::new();
//! let store = Arc::new(MemoryStateStore::new());
//! let lifecycle = ServerLifecycle::new(middleware, store, BridgeConfig::default()).unwrap();
//!
//! let mut callbacks = CallbackRegistry::new();
//! callbacks
//!     .set_participant_discovered(
//!         Some(Arc::new(|record: ParticipantRecord, _: &CallbackContext| {
//!             println!("{} at {}", record.guid_prefix, record.endpoint);
//!         })),
//!         Some(Arc::new(())),
//!     )
//!     .unwrap();
//!
//! lifecycle.start(0, callbacks).unwrap();
//! assert!(lifecycle.is_running(0));
//! lifecycle.stop(0).unwrap();
//! ```

pub mod callbacks;
pub mod config;
pub mod error;
pub mod ffi;
pub mod graph;
pub mod lifecycle;
pub mod listener;
pub mod locator;
pub mod middleware;
pub mod records;
pub mod state;

pub use callbacks::{CallbackContext, CallbackRegistry, EventCategory};
pub use config::{BridgeConfig, ConfigError, RECOVERY_GUID_PREFIX, SERVER_GUID_PREFIX};
pub use error::BridgeError;
pub use graph::{DiscoveryGraph, GraphSnapshot};
pub use lifecycle::{ServerLifecycle, ServerState, StopOutcome};
pub use listener::{DiscoveryListener, ListenerStats};
pub use locator::{DomainPorts, Endpoint, Locator, Transport};
pub use middleware::{
    DiscoveryMiddleware, LoopbackMiddleware, ParticipantHandle, ParticipantListener, SimulatedPeer,
};
pub use records::{EndpointRecord, GuidPrefix, ParticipantRecord, ReaderRecord, WriterRecord};
pub use state::{FileStateStore, MemoryStateStore, ServerRecord, ServerStateStore, StateError};
