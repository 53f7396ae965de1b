// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! C ABI for the discovery bridge.
//!
//! The host installs a middleware once from Rust ([`install`]), then drives
//! the bridge from C:
//!
//! ```c
//! void on_participant(HddsBridgeParticipantData data, void* ctx) {
//!     // data.guid_prefix, data.endpoint ...
//! }
//!
//! hdds_bridge_set_participant_discovered_callback(on_participant, my_ctx);
//! hdds_bridge_start(0);
//! // ...
//! hdds_bridge_stop(0);
//! hdds_bridge_shutdown();
//! ```
//!
//! Callbacks registered with the setters are captured by the next
//! `hdds_bridge_start`; changing them afterwards only affects later starts.
//!
//! # Thread Safety
//!
//! Callbacks run on middleware threads. The C caller is responsible for
//! keeping callback functions and context pointers valid and thread safe
//! until the server using them is gone. Once `hdds_bridge_stop`, a replacing
//! `hdds_bridge_start` or `hdds_bridge_shutdown` returns, no callback of the
//! previous server runs again. Callbacks must not call the start, stop or
//! shutdown functions.

use crate::callbacks::{CallbackContext, CallbackRegistry};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::lifecycle::{ServerLifecycle, StopOutcome};
use crate::locator::{Endpoint, Transport};
use crate::middleware::DiscoveryMiddleware;
use crate::records::{BoundedName, EndpointRecord, ParticipantRecord, GUID_PREFIX_LEN, MAX_NAME_LEN};
use crate::state::{FileStateStore, ServerStateStore};
use parking_lot::Mutex;
use std::os::raw::{c_char, c_void};
use std::sync::{Arc, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Size of the name buffers, terminator included.
pub const HDDS_BRIDGE_NAME_CAPACITY: usize = MAX_NAME_LEN + 1;

// =============================================================================
// C-compatible types
// =============================================================================

/// Status codes returned by every bridge function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HddsBridgeStatus {
    HddsBridgeOk = 0,
    /// The middleware did not create the participant
    HddsBridgeCreationFailure = -1,
    /// The middleware refused to delete the participant
    HddsBridgeDeletionFailure = -2,
    /// Callback registered without a context
    HddsBridgeContractViolation = -3,
    /// `install` has not been called
    HddsBridgeNotInitialized = -4,
    /// State store failure, or logging already initialized
    HddsBridgeStateError = -5,
    /// Invalid argument or configuration
    HddsBridgeInvalidArgument = -6,
}

impl From<&BridgeError> for HddsBridgeStatus {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::CreationFailure { .. } => Self::HddsBridgeCreationFailure,
            BridgeError::DeletionFailure { .. } => Self::HddsBridgeDeletionFailure,
            BridgeError::ContractViolation(_) => Self::HddsBridgeContractViolation,
            BridgeError::State(_) => Self::HddsBridgeStateError,
            BridgeError::Config(_) => Self::HddsBridgeInvalidArgument,
        }
    }
}

/// Transport tag of an endpoint.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HddsBridgeTransport {
    HddsBridgeTransportUnknown = 0,
    HddsBridgeTransportShm = 1,
    HddsBridgeTransportUdpV4 = 2,
    HddsBridgeTransportUdpV6 = 3,
    HddsBridgeTransportTcpV4 = 4,
    HddsBridgeTransportTcpV6 = 5,
}

impl From<Transport> for HddsBridgeTransport {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Unknown => Self::HddsBridgeTransportUnknown,
            Transport::Shm => Self::HddsBridgeTransportShm,
            Transport::UdpV4 => Self::HddsBridgeTransportUdpV4,
            Transport::UdpV6 => Self::HddsBridgeTransportUdpV6,
            Transport::TcpV4 => Self::HddsBridgeTransportTcpV4,
            Transport::TcpV6 => Self::HddsBridgeTransportTcpV6,
        }
    }
}

/// Endpoint address.
///
/// IPv4 addresses occupy the first 4 bytes, IPv6 all 16, SHM none. Unused
/// bytes are zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HddsBridgeEndpoint {
    pub transport: HddsBridgeTransport,
    pub address: [u8; 16],
}

impl From<&Endpoint> for HddsBridgeEndpoint {
    fn from(endpoint: &Endpoint) -> Self {
        let mut address = [0u8; 16];
        let bytes = endpoint.address();
        address[..bytes.len()].copy_from_slice(bytes);
        Self {
            transport: endpoint.transport().into(),
            address,
        }
    }
}

/// Discovered or removed participant.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HddsBridgeParticipantData {
    /// Middleware handle token of the participant.
    pub participant: u64,
    pub guid_prefix: [u8; GUID_PREFIX_LEN],
    /// First default unicast locator.
    pub endpoint: HddsBridgeEndpoint,
}

impl From<&ParticipantRecord> for HddsBridgeParticipantData {
    fn from(record: &ParticipantRecord) -> Self {
        Self {
            participant: record.participant.as_raw(),
            guid_prefix: *record.guid_prefix.as_bytes(),
            endpoint: HddsBridgeEndpoint::from(&record.endpoint),
        }
    }
}

/// Discovered or removed reader/writer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HddsBridgeEndpointData {
    /// NUL-terminated, at most 254 bytes of text.
    pub topic_name: [c_char; HDDS_BRIDGE_NAME_CAPACITY],
    /// NUL-terminated, at most 254 bytes of text.
    pub type_name: [c_char; HDDS_BRIDGE_NAME_CAPACITY],
    /// Prefix of the owning participant.
    pub guid_prefix: [u8; GUID_PREFIX_LEN],
    /// First remote unicast locator.
    pub endpoint: HddsBridgeEndpoint,
}

pub type HddsBridgeReaderData = HddsBridgeEndpointData;
pub type HddsBridgeWriterData = HddsBridgeEndpointData;

impl From<&EndpointRecord> for HddsBridgeEndpointData {
    fn from(record: &EndpointRecord) -> Self {
        Self {
            topic_name: c_name(&record.topic_name),
            type_name: c_name(&record.type_name),
            guid_prefix: *record.guid_prefix.as_bytes(),
            endpoint: HddsBridgeEndpoint::from(&record.endpoint),
        }
    }
}

fn c_name(name: &BoundedName) -> [c_char; HDDS_BRIDGE_NAME_CAPACITY] {
    let mut buf = [0 as c_char; HDDS_BRIDGE_NAME_CAPACITY];
    for (dst, src) in buf.iter_mut().zip(name.as_str().bytes().take(MAX_NAME_LEN)) {
        *dst = src as c_char;
    }
    buf
}

pub type HddsBridgeOnParticipant =
    Option<unsafe extern "C" fn(data: HddsBridgeParticipantData, user_data: *mut c_void)>;
pub type HddsBridgeOnReader =
    Option<unsafe extern "C" fn(data: HddsBridgeReaderData, user_data: *mut c_void)>;
pub type HddsBridgeOnWriter =
    Option<unsafe extern "C" fn(data: HddsBridgeWriterData, user_data: *mut c_void)>;

/// Log level for `hdds_bridge_logging_init`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HddsBridgeLogLevel {
    HddsBridgeLogOff = 0,
    HddsBridgeLogError = 1,
    HddsBridgeLogWarn = 2,
    HddsBridgeLogInfo = 3,
    HddsBridgeLogDebug = 4,
    HddsBridgeLogTrace = 5,
}

impl From<HddsBridgeLogLevel> for LevelFilter {
    fn from(level: HddsBridgeLogLevel) -> Self {
        match level {
            HddsBridgeLogLevel::HddsBridgeLogOff => LevelFilter::OFF,
            HddsBridgeLogLevel::HddsBridgeLogError => LevelFilter::ERROR,
            HddsBridgeLogLevel::HddsBridgeLogWarn => LevelFilter::WARN,
            HddsBridgeLogLevel::HddsBridgeLogInfo => LevelFilter::INFO,
            HddsBridgeLogLevel::HddsBridgeLogDebug => LevelFilter::DEBUG,
            HddsBridgeLogLevel::HddsBridgeLogTrace => LevelFilter::TRACE,
        }
    }
}

// =============================================================================
// Process-wide bridge
// =============================================================================

/// Host context pointer carried inside a binding.
struct HostContext(*mut c_void);

// Safety: The C caller is responsible for thread safety of the pointee.
unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}

#[derive(Default)]
struct Bridge {
    lifecycle: Option<Arc<ServerLifecycle>>,
    pending: CallbackRegistry,
}

fn bridge() -> &'static Mutex<Bridge> {
    static BRIDGE: OnceLock<Mutex<Bridge>> = OnceLock::new();
    BRIDGE.get_or_init(|| Mutex::new(Bridge::default()))
}

fn installed() -> Option<Arc<ServerLifecycle>> {
    bridge().lock().lifecycle.clone()
}

/// Install the middleware the C ABI drives, with a file state store under
/// `config.state_dir`.
///
/// Replaces (and drops) any previous installation.
pub fn install(
    middleware: Arc<dyn DiscoveryMiddleware>,
    config: BridgeConfig,
) -> Result<(), BridgeError> {
    let store = Arc::new(FileStateStore::new(config.state_dir.clone()));
    install_with_store(middleware, store, config)
}

/// Like [`install`], with an explicit state store.
pub fn install_with_store(
    middleware: Arc<dyn DiscoveryMiddleware>,
    store: Arc<dyn ServerStateStore>,
    config: BridgeConfig,
) -> Result<(), BridgeError> {
    let lifecycle = Arc::new(ServerLifecycle::new(middleware, store, config)?);
    let previous = bridge().lock().lifecycle.replace(lifecycle);
    if previous.is_some() {
        info!("Bridge reinstalled, previous context dropped");
    }
    Ok(())
}

/// Wrap a C callback into a binding callback.
fn adapt<R: 'static, D: 'static>(
    callback: Option<unsafe extern "C" fn(D, *mut c_void)>,
    convert: fn(&R) -> D,
) -> Option<Arc<dyn Fn(R, &CallbackContext) + Send + Sync>> {
    let callback = callback?;
    let adapted = move |record: R, context: &CallbackContext| {
        if let Some(host) = context.downcast_ref::<HostContext>() {
            // SAFETY: the host keeps `callback` and its context valid while bound.
            unsafe { callback(convert(&record), host.0) };
        }
    };
    Some(Arc::new(adapted))
}

fn host_context(user_data: *mut c_void) -> Option<CallbackContext> {
    if user_data.is_null() {
        None
    } else {
        Some(Arc::new(HostContext(user_data)))
    }
}

fn status_of(result: Result<(), BridgeError>) -> HddsBridgeStatus {
    match result {
        Ok(()) => HddsBridgeStatus::HddsBridgeOk,
        Err(e) => {
            warn!("{}", e);
            HddsBridgeStatus::from(&e)
        }
    }
}

fn participant_data(record: &ParticipantRecord) -> HddsBridgeParticipantData {
    HddsBridgeParticipantData::from(record)
}

fn endpoint_data(record: &EndpointRecord) -> HddsBridgeEndpointData {
    HddsBridgeEndpointData::from(record)
}

// =============================================================================
// FFI functions
// =============================================================================

/// Bind the participant-discovered callback.
///
/// # Safety
///
/// `callback` and `user_data` must stay valid until every server started
/// with this binding is stopped, or `hdds_bridge_shutdown` returns.
///
/// # Returns
///
/// `HddsBridgeOk` on success, `HddsBridgeContractViolation` if `callback` is
/// set and `user_data` is NULL.
#[no_mangle]
pub unsafe extern "C" fn hdds_bridge_set_participant_discovered_callback(
    callback: HddsBridgeOnParticipant,
    user_data: *mut c_void,
) -> HddsBridgeStatus {
    status_of(bridge().lock().pending.set_participant_discovered(
        adapt(callback, participant_data),
        host_context(user_data),
    ))
}

/// Bind the participant-removed callback.
///
/// # Safety
///
/// Same contract as `hdds_bridge_set_participant_discovered_callback`.
#[no_mangle]
pub unsafe extern "C" fn hdds_bridge_set_participant_removed_callback(
    callback: HddsBridgeOnParticipant,
    user_data: *mut c_void,
) -> HddsBridgeStatus {
    status_of(bridge().lock().pending.set_participant_removed(
        adapt(callback, participant_data),
        host_context(user_data),
    ))
}

/// Bind the reader-discovered callback.
///
/// # Safety
///
/// Same contract as `hdds_bridge_set_participant_discovered_callback`.
#[no_mangle]
pub unsafe extern "C" fn hdds_bridge_set_reader_discovered_callback(
    callback: HddsBridgeOnReader,
    user_data: *mut c_void,
) -> HddsBridgeStatus {
    status_of(
        bridge()
            .lock()
            .pending
            .set_reader_discovered(adapt(callback, endpoint_data), host_context(user_data)),
    )
}

/// Bind the reader-removed callback.
///
/// # Safety
///
/// Same contract as `hdds_bridge_set_participant_discovered_callback`.
#[no_mangle]
pub unsafe extern "C" fn hdds_bridge_set_reader_removed_callback(
    callback: HddsBridgeOnReader,
    user_data: *mut c_void,
) -> HddsBridgeStatus {
    status_of(
        bridge()
            .lock()
            .pending
            .set_reader_removed(adapt(callback, endpoint_data), host_context(user_data)),
    )
}

/// Bind the writer-discovered callback.
///
/// # Safety
///
/// Same contract as `hdds_bridge_set_participant_discovered_callback`.
#[no_mangle]
pub unsafe extern "C" fn hdds_bridge_set_writer_discovered_callback(
    callback: HddsBridgeOnWriter,
    user_data: *mut c_void,
) -> HddsBridgeStatus {
    status_of(
        bridge()
            .lock()
            .pending
            .set_writer_discovered(adapt(callback, endpoint_data), host_context(user_data)),
    )
}

/// Bind the writer-removed callback.
///
/// # Safety
///
/// Same contract as `hdds_bridge_set_participant_discovered_callback`.
#[no_mangle]
pub unsafe extern "C" fn hdds_bridge_set_writer_removed_callback(
    callback: HddsBridgeOnWriter,
    user_data: *mut c_void,
) -> HddsBridgeStatus {
    status_of(
        bridge()
            .lock()
            .pending
            .set_writer_removed(adapt(callback, endpoint_data), host_context(user_data)),
    )
}

/// Start the discovery server on `domain_id` with the callbacks bound so far.
#[no_mangle]
pub extern "C" fn hdds_bridge_start(domain_id: u32) -> HddsBridgeStatus {
    let (lifecycle, callbacks) = {
        let bridge = bridge().lock();
        match &bridge.lifecycle {
            Some(lifecycle) => (lifecycle.clone(), bridge.pending.clone()),
            None => return HddsBridgeStatus::HddsBridgeNotInitialized,
        }
    };
    status_of(lifecycle.start(domain_id, callbacks).map(|_| ()))
}

/// Stop the discovery server on `domain_id`.
///
/// May block for the configured recovery wait when this process does not
/// hold the server.
#[no_mangle]
pub extern "C" fn hdds_bridge_stop(domain_id: u32) -> HddsBridgeStatus {
    let Some(lifecycle) = installed() else {
        return HddsBridgeStatus::HddsBridgeNotInitialized;
    };
    status_of(lifecycle.stop(domain_id).map(|outcome| {
        if let StopOutcome::RecoveryAttempted { matched } = outcome {
            info!("Recovery on domain {} matched {} server(s)", domain_id, matched);
        }
    }))
}

/// Whether a discovery server is up on `domain_id`. `false` when not installed.
#[no_mangle]
pub extern "C" fn hdds_bridge_is_running(domain_id: u32) -> bool {
    installed().is_some_and(|lifecycle| lifecycle.is_running(domain_id))
}

/// Drop the installed context (deleting a running server) and clear every
/// callback binding.
#[no_mangle]
pub extern "C" fn hdds_bridge_shutdown() -> HddsBridgeStatus {
    let previous = {
        let mut bridge = bridge().lock();
        bridge.pending = CallbackRegistry::new();
        bridge.lifecycle.take()
    };
    match previous {
        Some(_) => HddsBridgeStatus::HddsBridgeOk,
        None => HddsBridgeStatus::HddsBridgeNotInitialized,
    }
}

/// Initialize bridge logging with console output.
///
/// # Returns
///
/// `HddsBridgeOk` on success, `HddsBridgeStateError` if a global subscriber
/// is already installed.
///
/// # Example (C)
///
/// ```c
/// hdds_bridge_logging_init(HDDS_BRIDGE_LOG_INFO);
/// ```
#[no_mangle]
pub extern "C" fn hdds_bridge_logging_init(level: HddsBridgeLogLevel) -> HddsBridgeStatus {
    let filter: LevelFilter = level.into();
    match tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .try_init()
    {
        Ok(()) => HddsBridgeStatus::HddsBridgeOk,
        Err(_) => HddsBridgeStatus::HddsBridgeStateError, // Already initialized
    }
}

/// Initialize bridge logging, honoring `RUST_LOG` when set.
///
/// # Returns
///
/// `HddsBridgeOk` on success, `HddsBridgeStateError` if a global subscriber
/// is already installed.
#[no_mangle]
pub extern "C" fn hdds_bridge_logging_init_env(
    default_level: HddsBridgeLogLevel,
) -> HddsBridgeStatus {
    let default: LevelFilter = default_level.into();
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        Ok(()) => HddsBridgeStatus::HddsBridgeOk,
        Err(_) => HddsBridgeStatus::HddsBridgeStateError,
    }
}
