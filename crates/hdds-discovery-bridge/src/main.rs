// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Discovery Bridge
//!
//! Inspect and drive the discovery server bridge from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Is a discovery server recorded as running on domain 1?
//! hdds-discovery-bridge status --domain 1
//!
//! # Forget a stale record
//! hdds-discovery-bridge clear --domain 1
//!
//! # Run the bridge on an in-process fabric with simulated peers
//! hdds-discovery-bridge --log-level debug demo --domain 0
//! ```

use clap::{Parser, Subcommand};
use hdds_discovery_bridge::callbacks::CallbackContext;
use hdds_discovery_bridge::middleware::RemoteLocatorList;
use hdds_discovery_bridge::{
    BridgeConfig, CallbackRegistry, DiscoveryMiddleware, DomainPorts, EndpointRecord,
    EventCategory, FileStateStore, GuidPrefix, Locator, LoopbackMiddleware, ParticipantRecord,
    ServerLifecycle, ServerStateStore, SimulatedPeer,
};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// HDDS Discovery Bridge - discovery server control and event bridge
#[derive(Parser, Debug)]
#[command(name = "hdds-discovery-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding server records (overrides the config file)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the server record of a domain; exit 0 if running, 1 otherwise
    Status {
        #[arg(short, long, default_value = "0")]
        domain: u32,
    },
    /// Remove the server record of a domain
    Clear {
        #[arg(short, long, default_value = "0")]
        domain: u32,
    },
    /// Run the bridge on an in-process fabric and log every record as JSON
    Demo {
        #[arg(short, long, default_value = "0")]
        domain: u32,

        /// Pause between simulated discovery phases in milliseconds
        #[arg(long, default_value = "200")]
        pause_ms: u64,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        BridgeConfig::from_file(config_path)?
    } else {
        BridgeConfig::default()
    };
    if let Some(state_dir) = args.state_dir {
        config.state_dir = state_dir;
    }
    config.validate()?;

    let store = FileStateStore::new(config.state_dir.clone());

    match args.command {
        Command::Status { domain } => status(&store, domain),
        Command::Clear { domain } => {
            store.clear(domain)?;
            info!("Cleared server record for domain {}", domain);
            Ok(ExitCode::SUCCESS)
        }
        Command::Demo { domain, pause_ms } => {
            demo(config, store, domain, Duration::from_millis(pause_ms))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn status(store: &FileStateStore, domain: u32) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let Some(record) = store.load(domain)? else {
        println!("domain {}: no server recorded", domain);
        return Ok(ExitCode::FAILURE);
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.is_live() {
        println!("domain {}: running (pid {})", domain, record.pid);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("domain {}: stale record, pid {} is gone", domain, record.pid);
        Ok(ExitCode::FAILURE)
    }
}

fn log_record<R: Serialize>(event: EventCategory, record: &R) {
    match serde_json::to_string(record) {
        Ok(json) => info!("{} {}", event, json),
        Err(e) => warn!("Failed to serialize {} record: {}", event, e),
    }
}

fn log_graph(lifecycle: &ServerLifecycle) {
    let Some(graph) = lifecycle.graph() else {
        return;
    };
    let snapshot = graph.snapshot();
    match serde_json::to_string_pretty(&*snapshot) {
        Ok(json) => info!("Discovery graph v{}:\n{}", snapshot.version, json),
        Err(e) => warn!("Failed to serialize discovery graph: {}", e),
    }
}

/// Callback that logs the record and counts it in an `AtomicU64` context.
fn logging_callback<R: Serialize + 'static>(
    event: EventCategory,
) -> Arc<dyn Fn(R, &CallbackContext) + Send + Sync> {
    Arc::new(move |record: R, context: &CallbackContext| {
        if let Some(seen) = context.downcast_ref::<AtomicU64>() {
            seen.fetch_add(1, Ordering::Relaxed);
        }
        log_record(event, &record);
    })
}

fn demo(
    config: BridgeConfig,
    store: FileStateStore,
    domain: u32,
    pause: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let seen = Arc::new(AtomicU64::new(0));
    let context: CallbackContext = seen.clone();

    let mut callbacks = CallbackRegistry::new();
    callbacks.set_participant_discovered(
        Some(logging_callback::<ParticipantRecord>(EventCategory::ParticipantDiscovered)),
        Some(context.clone()),
    )?;
    callbacks.set_participant_removed(
        Some(logging_callback::<ParticipantRecord>(EventCategory::ParticipantRemoved)),
        Some(context.clone()),
    )?;
    callbacks.set_reader_discovered(
        Some(logging_callback::<EndpointRecord>(EventCategory::ReaderDiscovered)),
        Some(context.clone()),
    )?;
    callbacks.set_reader_removed(
        Some(logging_callback::<EndpointRecord>(EventCategory::ReaderRemoved)),
        Some(context.clone()),
    )?;
    callbacks.set_writer_discovered(
        Some(logging_callback::<EndpointRecord>(EventCategory::WriterDiscovered)),
        Some(context.clone()),
    )?;
    callbacks.set_writer_removed(
        Some(logging_callback::<EndpointRecord>(EventCategory::WriterRemoved)),
        Some(context),
    )?;

    let middleware = LoopbackMiddleware::new();
    let lifecycle = ServerLifecycle::new(middleware.clone(), Arc::new(store), config)?;

    info!("+----------------------------------------------------+");
    info!(
        "|       HDDS Discovery Bridge v{}              |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Listen: {:40} |",
        format!(
            "{}:{}",
            lifecycle.config().listen_address,
            lifecycle.config().listen_port
        )
    );
    info!("|  Domain: {:40} |", domain);
    info!(
        "|  Prefix: {:40} |",
        lifecycle.config().server_guid_prefix.to_string()
    );
    info!("+----------------------------------------------------+");

    lifecycle.start(domain, callbacks)?;

    // Simulated peers: a UDP talker and an SHM listener.
    let talker_port = u16::try_from(DomainPorts::for_domain(domain, 1).user_unicast)?;
    let talker_locator = Locator::udp_v4(Ipv4Addr::new(192, 168, 1, 10), talker_port);
    let talker = middleware.add_peer(
        domain,
        SimulatedPeer::new(
            GuidPrefix::new([0x01, 0x0f, 0x6e, 0x21, 0, 0, 0, 0, 0x01, 0, 0, 0]),
            vec![talker_locator],
        )
        .with_name("talker"),
    );
    let listener = middleware.add_peer(
        domain,
        SimulatedPeer::new(
            GuidPrefix::new([0x01, 0x0f, 0x6e, 0x21, 0, 0, 0, 0, 0x02, 0, 0, 0]),
            vec![Locator::shm(0)],
        )
        .with_name("listener"),
    );
    middleware.add_writer(
        talker,
        "rt/chatter",
        "std_msgs::msg::dds_::String_",
        RemoteLocatorList {
            unicast: vec![talker_locator],
            multicast: vec![],
        },
    )?;
    middleware.add_reader(
        listener,
        "rt/chatter",
        "std_msgs::msg::dds_::String_",
        RemoteLocatorList {
            unicast: vec![Locator::shm(0)],
            multicast: vec![],
        },
    )?;
    middleware.flush();
    std::thread::sleep(pause);
    log_graph(&lifecycle);

    info!("Talker leaving domain {}", domain);
    middleware.delete_participant(talker)?;
    middleware.flush();
    std::thread::sleep(pause);

    log_graph(&lifecycle);
    if let Some(stats) = lifecycle.listener_stats() {
        info!(
            "Dispatched {} event(s), {} unbound, {} failed, {} with unknown transport",
            stats.dispatched, stats.unbound, stats.failed, stats.unknown_transport
        );
    }
    info!("Host context saw {} record(s)", seen.load(Ordering::Relaxed));

    lifecycle.stop(domain)?;
    info!("Discovery bridge stopped");
    Ok(())
}
