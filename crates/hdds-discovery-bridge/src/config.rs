// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery bridge configuration.

use crate::locator::Locator;
use crate::middleware::{DiscoveryRole, RemoteServer, ServerQos};
use crate::records::GuidPrefix;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known prefix of the discovery server participant.
pub const SERVER_GUID_PREFIX: GuidPrefix = GuidPrefix::new([
    0x44, 0x53, 0x00, 0x5f, 0x45, 0x50, 0x52, 0x4f, 0x53, 0x49, 0x4d, 0x41,
]);

/// Prefix of the throwaway participant used to stop a foreign server.
pub const RECOVERY_GUID_PREFIX: GuidPrefix = GuidPrefix::new([
    0x45, 0x53, 0x00, 0x5f, 0x45, 0x50, 0x51, 0x4f, 0x53, 0x49, 0x4d, 0x42,
]);

pub const DEFAULT_LISTEN_PORT: u16 = 11811;
pub const DEFAULT_PEER_PORT: u16 = 11812;
pub const DEFAULT_RECOVERY_LISTEN_PORT: u16 = 11814;
pub const DEFAULT_RECOVERY_PEER_PORT: u16 = 11815;

/// Discovery bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Prefix of the server participant (default: 44.53.00.5f.45.50.52.4f.53.49.4d.41)
    #[serde(default = "default_server_prefix")]
    pub server_guid_prefix: GuidPrefix,

    /// Metatraffic unicast address the server listens on (default: 0.0.0.0)
    #[serde(default = "default_address")]
    pub listen_address: IpAddr,

    /// Metatraffic unicast port (default: 11811)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Address of the static remote peer server (default: 0.0.0.0)
    #[serde(default = "default_address")]
    pub peer_address: IpAddr,

    /// Port of the static remote peer server (default: 11812)
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,

    /// Prefix of the recovery participant
    #[serde(default = "default_recovery_prefix")]
    pub recovery_guid_prefix: GuidPrefix,

    /// Recovery participant listening port (default: 11814)
    #[serde(default = "default_recovery_listen_port")]
    pub recovery_listen_port: u16,

    /// Recovery participant peer port (default: 11815)
    #[serde(default = "default_recovery_peer_port")]
    pub recovery_peer_port: u16,

    /// How long recovery waits for the foreign server to be discovered (ms)
    #[serde(default = "default_recovery_wait")]
    pub recovery_wait_ms: u64,

    /// Directory holding server records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Keep internal ROS 2 topics (/rosout, /parameter_events, ...) in
    /// discovery graph snapshots (default: false)
    #[serde(default)]
    pub include_internals: bool,
}

fn default_server_prefix() -> GuidPrefix {
    SERVER_GUID_PREFIX
}

fn default_recovery_prefix() -> GuidPrefix {
    RECOVERY_GUID_PREFIX
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_peer_port() -> u16 {
    DEFAULT_PEER_PORT
}

fn default_recovery_listen_port() -> u16 {
    DEFAULT_RECOVERY_LISTEN_PORT
}

fn default_recovery_peer_port() -> u16 {
    DEFAULT_RECOVERY_PEER_PORT
}

fn default_recovery_wait() -> u64 {
    20_000
}

fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("hdds-discovery-bridge")
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_guid_prefix: SERVER_GUID_PREFIX,
            listen_address: default_address(),
            listen_port: DEFAULT_LISTEN_PORT,
            peer_address: default_address(),
            peer_port: DEFAULT_PEER_PORT,
            recovery_guid_prefix: RECOVERY_GUID_PREFIX,
            recovery_listen_port: DEFAULT_RECOVERY_LISTEN_PORT,
            recovery_peer_port: DEFAULT_RECOVERY_PEER_PORT,
            recovery_wait_ms: default_recovery_wait(),
            state_dir: default_state_dir(),
            include_internals: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get recovery wait as Duration.
    pub fn recovery_wait(&self) -> Duration {
        Duration::from_millis(self.recovery_wait_ms)
    }

    /// QoS of the discovery server participant.
    pub fn server_qos(&self) -> ServerQos {
        backup_server_qos(
            self.server_guid_prefix,
            Locator::udp(self.listen_address, self.listen_port),
            Locator::udp(self.peer_address, self.peer_port),
        )
    }

    /// QoS of the throwaway recovery participant.
    pub fn recovery_qos(&self) -> ServerQos {
        backup_server_qos(
            self.recovery_guid_prefix,
            Locator::udp(self.listen_address, self.recovery_listen_port),
            Locator::udp(self.peer_address, self.recovery_peer_port),
        )
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, port) in [
            ("listen_port", self.listen_port),
            ("peer_port", self.peer_port),
            ("recovery_listen_port", self.recovery_listen_port),
            ("recovery_peer_port", self.recovery_peer_port),
        ] {
            if port == 0 {
                return Err(ConfigError::InvalidValue(format!("{} cannot be 0", name)));
            }
        }
        if self.listen_port == self.peer_port {
            return Err(ConfigError::InvalidValue(
                "listen_port and peer_port must differ".into(),
            ));
        }
        if self.recovery_listen_port == self.recovery_peer_port {
            return Err(ConfigError::InvalidValue(
                "recovery_listen_port and recovery_peer_port must differ".into(),
            ));
        }
        let server_ports = [self.listen_port, self.peer_port];
        if server_ports.contains(&self.recovery_listen_port)
            || server_ports.contains(&self.recovery_peer_port)
        {
            return Err(ConfigError::InvalidValue(
                "recovery ports must not reuse server ports".into(),
            ));
        }
        if self.server_guid_prefix == self.recovery_guid_prefix {
            return Err(ConfigError::InvalidValue(
                "recovery_guid_prefix must differ from server_guid_prefix".into(),
            ));
        }
        if self.recovery_wait_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "recovery_wait_ms cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Backup-role server listening on `listen`, paired with one remote server
/// of the same prefix reachable at `peer`.
fn backup_server_qos(guid_prefix: GuidPrefix, listen: Locator, peer: Locator) -> ServerQos {
    ServerQos {
        role: DiscoveryRole::Backup,
        guid_prefix,
        metatraffic_unicast: vec![listen],
        remote_servers: vec![RemoteServer {
            guid_prefix,
            metatraffic_unicast: peer,
        }],
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
