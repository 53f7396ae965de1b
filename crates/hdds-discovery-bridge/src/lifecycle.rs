// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery server lifecycle.
//!
//! A [`ServerLifecycle`] owns at most one discovery server participant. It
//! creates it with the well-known server prefix, tears it down, and answers
//! whether a server is up on a domain.
//!
//! # Stopping a server owned by someone else
//!
//! When `stop` is called on a context that does not hold the server (e.g. a
//! fresh process), there is no handle to delete. The context then joins the
//! domain with a throwaway participant whose participant-discovered callback
//! deletes whichever participant carries the server prefix. After
//! `recovery_wait` the throwaway participant is removed again. This is best
//! effort: if the server is not discovered in time it keeps running, and its
//! server record is kept as long as the recorded process is alive.

use crate::callbacks::{CallbackContext, CallbackRegistry};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::graph::DiscoveryGraph;
use crate::listener::{DiscoveryListener, ListenerStats};
use crate::middleware::{DiscoveryMiddleware, ParticipantHandle};
use crate::records::{GuidPrefix, ParticipantRecord};
use crate::state::{ServerRecord, ServerStateStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running {
        domain_id: u32,
        handle: ParticipantHandle,
    },
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The locally held server was deleted.
    Stopped,
    /// No local server; the recovery participant ran for `recovery_wait`.
    /// `matched` counts participants that carried the server prefix.
    RecoveryAttempted { matched: usize },
}

struct RunningServer {
    domain_id: u32,
    handle: ParticipantHandle,
    listener: Arc<DiscoveryListener>,
    graph: Arc<DiscoveryGraph>,
}

/// Owner of the discovery server participant.
pub struct ServerLifecycle {
    middleware: Arc<dyn DiscoveryMiddleware>,
    store: Arc<dyn ServerStateStore>,
    config: BridgeConfig,
    server: Mutex<Option<RunningServer>>,
}

impl ServerLifecycle {
    /// Create a stopped context. Fails if `config` does not validate.
    pub fn new(
        middleware: Arc<dyn DiscoveryMiddleware>,
        store: Arc<dyn ServerStateStore>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            middleware,
            store,
            config,
            server: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start the discovery server on `domain_id`.
    ///
    /// Any server this context already holds is closed and deleted first,
    /// whatever its domain; none of its callbacks run once this returns.
    /// `callbacks` is frozen for the life of the new server, which also gets
    /// a fresh [`DiscoveryGraph`].
    pub fn start(
        &self,
        domain_id: u32,
        callbacks: CallbackRegistry,
    ) -> Result<ParticipantHandle, BridgeError> {
        let mut server = self.server.lock();
        if let Some(previous) = server.take() {
            self.discard(previous);
        }

        debug!("Callbacks for domain {}: {:?}", domain_id, callbacks);
        let graph = Arc::new(DiscoveryGraph::new(self.config.include_internals));
        let listener = Arc::new(DiscoveryListener::new(callbacks).with_graph(graph.clone()));
        let qos = self.config.server_qos();
        let handle = self
            .middleware
            .create_participant(domain_id, &qos, listener.clone())
            .ok_or_else(|| {
                error!("Unable to create server participant on domain {}", domain_id);
                BridgeError::CreationFailure { domain_id }
            })?;

        info!(
            "Discovery server {} started on domain {} ({})",
            qos.guid_prefix, domain_id, handle
        );

        let record = ServerRecord::for_current_process(domain_id, qos.guid_prefix);
        if let Err(e) = self.store.save(&record) {
            warn!("Failed to record server for domain {}: {}", domain_id, e);
        }

        *server = Some(RunningServer {
            domain_id,
            handle,
            listener,
            graph,
        });
        Ok(handle)
    }

    /// Stop the discovery server on `domain_id`.
    ///
    /// Deletes the local server if this context holds it for that domain,
    /// otherwise runs the recovery participant (blocking for
    /// `recovery_wait`). After a local stop no host callback of that server
    /// runs again.
    pub fn stop(&self, domain_id: u32) -> Result<StopOutcome, BridgeError> {
        let mut server = self.server.lock();

        let held = server
            .as_ref()
            .filter(|s| s.domain_id == domain_id)
            .map(|s| s.handle);
        if let Some(handle) = held {
            self.middleware
                .delete_participant(handle)
                .map_err(|source| {
                    error!("Unable to delete server participant: {}", source);
                    BridgeError::DeletionFailure { domain_id, source }
                })?;
            info!("Discovery server on domain {} stopped", domain_id);
            *server = None;
            self.clear_record(domain_id);
            return Ok(StopOutcome::Stopped);
        }

        info!(
            "No local server on domain {}, trying to recover it from another process",
            domain_id
        );
        self.recover(domain_id)
    }

    /// Whether a discovery server is up on `domain_id`.
    ///
    /// Read-only: never creates a participant.
    pub fn is_running(&self, domain_id: u32) -> bool {
        {
            let server = self.server.lock();
            if let Some(running) = server.as_ref().filter(|s| s.domain_id == domain_id) {
                if self.middleware.is_enabled(running.handle) {
                    return true;
                }
                debug!("Local server {} is no longer enabled", running.handle);
            }
        }

        match self.store.load(domain_id) {
            Ok(Some(record)) => {
                let live = record.is_live();
                trace!(
                    "Server record for domain {}: pid {} live={}",
                    domain_id,
                    record.pid,
                    live
                );
                live
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read server record for domain {}: {}", domain_id, e);
                false
            }
        }
    }

    pub fn state(&self) -> ServerState {
        match self.server.lock().as_ref() {
            Some(s) => ServerState::Running {
                domain_id: s.domain_id,
                handle: s.handle,
            },
            None => ServerState::Stopped,
        }
    }

    pub fn server_handle(&self) -> Option<ParticipantHandle> {
        self.server.lock().as_ref().map(|s| s.handle)
    }

    /// Dispatch counters of the running server's listener.
    pub fn listener_stats(&self) -> Option<ListenerStats> {
        self.server.lock().as_ref().map(|s| s.listener.stats())
    }

    /// Discovery graph of the running server.
    pub fn graph(&self) -> Option<Arc<DiscoveryGraph>> {
        self.server.lock().as_ref().map(|s| s.graph.clone())
    }

    fn discard(&self, previous: RunningServer) {
        debug!(
            "Replacing server {} on domain {}",
            previous.handle, previous.domain_id
        );
        self.middleware.close_participant(previous.handle);
        if let Err(e) = self.middleware.delete_participant(previous.handle) {
            warn!("Failed to delete replaced server {}: {}", previous.handle, e);
        }
        self.clear_record(previous.domain_id);
    }

    fn recover(&self, domain_id: u32) -> Result<StopOutcome, BridgeError> {
        let recovery = Arc::new(RecoveryContext {
            middleware: Arc::downgrade(&self.middleware),
            target: self.config.server_guid_prefix,
            matched: AtomicUsize::new(0),
        });
        let context: CallbackContext = recovery.clone();

        let mut callbacks = CallbackRegistry::new();
        callbacks.set_participant_discovered(Some(Arc::new(kill_matching_server)), Some(context))?;

        let handle = self
            .middleware
            .create_participant(
                domain_id,
                &self.config.recovery_qos(),
                Arc::new(DiscoveryListener::new(callbacks)),
            )
            .ok_or_else(|| {
                error!("Unable to create recovery participant on domain {}", domain_id);
                BridgeError::CreationFailure { domain_id }
            })?;
        debug!(
            "Recovery participant {} waiting {:?}",
            handle,
            self.config.recovery_wait()
        );

        std::thread::sleep(self.config.recovery_wait());

        if let Err(e) = self.middleware.delete_participant(handle) {
            warn!("Failed to delete recovery participant {}: {}", handle, e);
        }

        let matched = recovery.matched.load(Ordering::SeqCst);
        if matched > 0 {
            self.clear_record(domain_id);
        } else {
            warn!("Recovery found no server on domain {}", domain_id);
            self.clear_stale_record(domain_id);
        }
        Ok(StopOutcome::RecoveryAttempted { matched })
    }

    /// Clear the record of `domain_id` only if its process is gone.
    fn clear_stale_record(&self, domain_id: u32) {
        match self.store.load(domain_id) {
            Ok(Some(record)) if record.is_live() => {
                warn!(
                    "Keeping server record for domain {}: pid {} is still alive",
                    domain_id, record.pid
                );
            }
            Ok(Some(_)) => self.clear_record(domain_id),
            Ok(None) => {}
            Err(e) => warn!("Failed to read server record for domain {}: {}", domain_id, e),
        }
    }

    fn clear_record(&self, domain_id: u32) {
        if let Err(e) = self.store.clear(domain_id) {
            warn!("Failed to clear server record for domain {}: {}", domain_id, e);
        }
    }
}

impl Drop for ServerLifecycle {
    fn drop(&mut self) {
        if let Some(running) = self.server.get_mut().take() {
            match self.middleware.delete_participant(running.handle) {
                Ok(()) => {
                    debug!("Server {} deleted on drop", running.handle);
                    self.clear_record(running.domain_id);
                }
                Err(e) => warn!("Failed to delete server {} on drop: {}", running.handle, e),
            }
        }
    }
}

/// Context of the recovery participant's participant-discovered callback.
struct RecoveryContext {
    middleware: Weak<dyn DiscoveryMiddleware>,
    target: GuidPrefix,
    matched: AtomicUsize,
}

fn kill_matching_server(record: ParticipantRecord, context: &CallbackContext) {
    let Some(recovery) = context.downcast_ref::<RecoveryContext>() else {
        return;
    };
    if record.guid_prefix != recovery.target {
        trace!("Recovery ignoring participant {}", record.guid_prefix);
        return;
    }
    recovery.matched.fetch_add(1, Ordering::SeqCst);
    let Some(middleware) = recovery.middleware.upgrade() else {
        return;
    };
    match middleware.delete_participant(record.participant) {
        Ok(()) => info!("Deleted discovery server {}", record.participant),
        Err(e) => warn!("Unable to kill the server via callback: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SERVER_GUID_PREFIX;
    use crate::middleware::LoopbackMiddleware;
    use crate::state::MemoryStateStore;

    fn config() -> BridgeConfig {
        BridgeConfig {
            recovery_wait_ms: 200,
            ..Default::default()
        }
    }

    fn lifecycle(mw: &Arc<LoopbackMiddleware>, store: &Arc<MemoryStateStore>) -> ServerLifecycle {
        ServerLifecycle::new(mw.clone(), store.clone(), config()).unwrap()
    }

    #[test]
    fn test_start_and_stop() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);

        assert_eq!(lc.state(), ServerState::Stopped);
        let handle = lc.start(1, CallbackRegistry::new()).unwrap();
        assert_eq!(
            lc.state(),
            ServerState::Running {
                domain_id: 1,
                handle
            }
        );
        assert!(mw.is_enabled(handle));
        assert!(lc.is_running(1));
        assert_eq!(store.load(1).unwrap().unwrap().pid, std::process::id());

        assert_eq!(lc.stop(1).unwrap(), StopOutcome::Stopped);
        assert_eq!(lc.state(), ServerState::Stopped);
        assert!(!mw.contains(handle));
        assert!(store.load(1).unwrap().is_none());
        assert!(!lc.is_running(1));
    }

    #[test]
    fn test_start_replaces_previous_server() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);

        let first = lc.start(1, CallbackRegistry::new()).unwrap();
        let second = lc.start(2, CallbackRegistry::new()).unwrap();

        assert_ne!(first, second);
        assert!(!mw.is_enabled(first));
        assert!(!mw.contains(first));
        assert_eq!(lc.server_handle(), Some(second));
        assert!(store.load(1).unwrap().is_none());
        assert!(store.load(2).unwrap().is_some());
    }

    #[test]
    fn test_creation_failure() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);

        mw.fail_next_create();
        let err = lc.start(0, CallbackRegistry::new()).unwrap_err();
        assert!(matches!(err, BridgeError::CreationFailure { domain_id: 0 }));
        assert_eq!(lc.state(), ServerState::Stopped);
        assert!(store.load(0).unwrap().is_none());
    }

    #[test]
    fn test_deletion_failure_keeps_handle() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);

        let handle = lc.start(0, CallbackRegistry::new()).unwrap();
        mw.refuse_deletes(true);
        let err = lc.stop(0).unwrap_err();
        assert!(matches!(err, BridgeError::DeletionFailure { domain_id: 0, .. }));
        assert_eq!(lc.server_handle(), Some(handle));
        assert!(store.load(0).unwrap().is_some());

        mw.refuse_deletes(false);
        assert_eq!(lc.stop(0).unwrap(), StopOutcome::Stopped);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mw = LoopbackMiddleware::new();
        let config = BridgeConfig {
            recovery_wait_ms: 0,
            ..Default::default()
        };
        let result = ServerLifecycle::new(mw, Arc::new(MemoryStateStore::new()), config);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_stop_without_server_runs_recovery() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);

        let outcome = lc.stop(4).unwrap();
        assert_eq!(outcome, StopOutcome::RecoveryAttempted { matched: 0 });
        // The recovery participant is gone again.
        assert_eq!(mw.participant_count(4), 0);
    }

    #[test]
    fn test_drop_deletes_server() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let handle = {
            let lc = lifecycle(&mw, &store);
            lc.start(3, CallbackRegistry::new()).unwrap()
        };
        assert!(!mw.contains(handle));
        assert!(store.load(3).unwrap().is_none());
    }

    #[test]
    fn test_listener_stats_follow_server() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);
        assert!(lc.listener_stats().is_none());

        lc.start(0, CallbackRegistry::new()).unwrap();
        mw.add_peer(
            0,
            crate::middleware::SimulatedPeer::new(GuidPrefix::new([9; 12]), vec![]),
        );
        mw.flush();
        assert_eq!(lc.listener_stats().unwrap().unbound, 1);
    }

    #[test]
    fn test_graph_follows_server() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);
        assert!(lc.graph().is_none());

        lc.start(0, CallbackRegistry::new()).unwrap();
        let peer = mw.add_peer(
            0,
            crate::middleware::SimulatedPeer::new(GuidPrefix::new([9; 12]), vec![]),
        );
        mw.flush();
        let graph = lc.graph().unwrap();
        assert!(graph
            .snapshot()
            .participant(&GuidPrefix::new([9; 12]))
            .is_some());

        mw.delete_participant(peer).unwrap();
        mw.flush();
        assert!(graph.snapshot().is_empty());

        lc.start(0, CallbackRegistry::new()).unwrap();
        assert!(!Arc::ptr_eq(&graph, &lc.graph().unwrap()));
    }

    #[test]
    fn test_unmatched_recovery_keeps_live_record() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);
        // Another process (this one, for the test) recorded a server that
        // the recovery participant never discovers.
        store
            .save(&ServerRecord::for_current_process(3, SERVER_GUID_PREFIX))
            .unwrap();

        let outcome = lc.stop(3).unwrap();

        assert_eq!(outcome, StopOutcome::RecoveryAttempted { matched: 0 });
        assert!(store.load(3).unwrap().is_some());
        assert!(lc.is_running(3));
    }

    #[test]
    fn test_unmatched_recovery_clears_dead_record() {
        let mw = LoopbackMiddleware::new();
        let store = Arc::new(MemoryStateStore::new());
        let lc = lifecycle(&mw, &store);
        store
            .save(&ServerRecord {
                domain_id: 3,
                pid: i32::MAX as u32,
                guid_prefix: SERVER_GUID_PREFIX,
                started_at_ms: 0,
            })
            .unwrap();

        let outcome = lc.stop(3).unwrap();

        assert_eq!(outcome, StopOutcome::RecoveryAttempted { matched: 0 });
        assert!(store.load(3).unwrap().is_none());
    }
}
