// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locators and normalized endpoints.
//!
//! Discovery notifications carry RTPS locators:
//!
//! ```text
//! struct Locator_t {
//!     long kind;           // 4 bytes: transport kind
//!     unsigned long port;  // 4 bytes
//!     octet address[16];   // 16 bytes: IPv4 (last 4) or IPv6 address
//! };
//! ```
//!
//! The bridge hands callbacks an [`Endpoint`] instead: the transport tag plus
//! only the address bytes that are meaningful for that transport.

use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// ============================================================================
// Constants
// ============================================================================

/// Locator kind: Invalid locator.
pub const LOCATOR_KIND_INVALID: i32 = -1;

/// Locator kind: UDP over IPv4 (standard RTPS).
pub const LOCATOR_KIND_UDPV4: i32 = 1;

/// Locator kind: UDP over IPv6 (standard RTPS).
pub const LOCATOR_KIND_UDPV6: i32 = 2;

/// Locator kind: TCP over IPv4 (vendor extension).
pub const LOCATOR_KIND_TCPV4: i32 = 4;

/// Locator kind: TCP over IPv6 (vendor extension).
pub const LOCATOR_KIND_TCPV6: i32 = 8;

/// Locator kind: Shared Memory (vendor extension).
pub const LOCATOR_KIND_SHM: i32 = 16;

/// Locator address length (16 bytes).
pub const LOCATOR_ADDRESS_LEN: usize = 16;

// ============================================================================
// Locator
// ============================================================================

/// Transport-qualified network address as announced by the middleware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; LOCATOR_ADDRESS_LEN],
}

impl Locator {
    /// Create a locator from raw components.
    pub fn new(kind: i32, port: u32, address: [u8; LOCATOR_ADDRESS_LEN]) -> Self {
        Self {
            kind,
            port,
            address,
        }
    }

    /// UDPv4 locator; the IPv4 address goes in the last 4 bytes.
    pub fn udp_v4(addr: Ipv4Addr, port: u16) -> Self {
        Self::v4(LOCATOR_KIND_UDPV4, addr, port)
    }

    /// UDPv6 locator.
    pub fn udp_v6(addr: Ipv6Addr, port: u16) -> Self {
        Self::new(LOCATOR_KIND_UDPV6, port as u32, addr.octets())
    }

    /// TCPv4 locator; the IPv4 address goes in the last 4 bytes.
    pub fn tcp_v4(addr: Ipv4Addr, port: u16) -> Self {
        Self::v4(LOCATOR_KIND_TCPV4, addr, port)
    }

    /// TCPv6 locator.
    pub fn tcp_v6(addr: Ipv6Addr, port: u16) -> Self {
        Self::new(LOCATOR_KIND_TCPV6, port as u32, addr.octets())
    }

    /// UDP locator for either address family.
    pub fn udp(addr: IpAddr, port: u16) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::udp_v4(v4, port),
            IpAddr::V6(v6) => Self::udp_v6(v6, port),
        }
    }

    /// Shared memory locator (no address).
    pub fn shm(port: u32) -> Self {
        Self::new(LOCATOR_KIND_SHM, port, [0u8; LOCATOR_ADDRESS_LEN])
    }

    fn v4(kind: i32, addr: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; LOCATOR_ADDRESS_LEN];
        address[12..16].copy_from_slice(&addr.octets());
        Self::new(kind, port as u32, address)
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Transport tag exposed to hosts.
///
/// Discriminants are part of the C boundary and must not change.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Unknown = 0,
    Shm = 1,
    UdpV4 = 2,
    UdpV6 = 3,
    TcpV4 = 4,
    TcpV6 = 5,
}

/// Normalized endpoint: transport tag plus the address bytes that matter for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "transport", content = "address", rename_all = "snake_case")]
pub enum Endpoint {
    Shm,
    UdpV4([u8; 4]),
    UdpV6([u8; 16]),
    TcpV4([u8; 4]),
    TcpV6([u8; 16]),
    /// Locator kind the bridge does not understand (raw kind kept).
    Unknown(i32),
}

impl Endpoint {
    /// Map a locator to its endpoint. Never fails; unsupported kinds
    /// become [`Endpoint::Unknown`].
    pub fn from_locator(locator: &Locator) -> Self {
        match locator.kind {
            LOCATOR_KIND_UDPV4 => Endpoint::UdpV4(v4_octets(&locator.address)),
            LOCATOR_KIND_UDPV6 => Endpoint::UdpV6(locator.address),
            LOCATOR_KIND_TCPV4 => Endpoint::TcpV4(v4_octets(&locator.address)),
            LOCATOR_KIND_TCPV6 => Endpoint::TcpV6(locator.address),
            LOCATOR_KIND_SHM => Endpoint::Shm,
            other => Endpoint::Unknown(other),
        }
    }

    /// Endpoint of the first locator in a list, `Unknown(INVALID)` for an
    /// empty list. Later locators are ignored.
    pub fn from_first(locators: &[Locator]) -> Self {
        locators
            .first()
            .map(Endpoint::from_locator)
            .unwrap_or(Endpoint::Unknown(LOCATOR_KIND_INVALID))
    }

    pub fn transport(&self) -> Transport {
        match self {
            Endpoint::Shm => Transport::Shm,
            Endpoint::UdpV4(_) => Transport::UdpV4,
            Endpoint::UdpV6(_) => Transport::UdpV6,
            Endpoint::TcpV4(_) => Transport::TcpV4,
            Endpoint::TcpV6(_) => Transport::TcpV6,
            Endpoint::Unknown(_) => Transport::Unknown,
        }
    }

    /// Meaningful address bytes: 4 for v4 kinds, 16 for v6, none otherwise.
    pub fn address(&self) -> &[u8] {
        match self {
            Endpoint::UdpV4(a) | Endpoint::TcpV4(a) => a,
            Endpoint::UdpV6(a) | Endpoint::TcpV6(a) => a,
            Endpoint::Shm | Endpoint::Unknown(_) => &[],
        }
    }

    pub fn ip_addr(&self) -> Option<IpAddr> {
        match self {
            Endpoint::UdpV4(a) | Endpoint::TcpV4(a) => Some(IpAddr::V4(Ipv4Addr::from(*a))),
            Endpoint::UdpV6(a) | Endpoint::TcpV6(a) => Some(IpAddr::V6(Ipv6Addr::from(*a))),
            Endpoint::Shm | Endpoint::Unknown(_) => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Endpoint::Unknown(_))
    }
}

impl From<&Locator> for Endpoint {
    fn from(locator: &Locator) -> Self {
        Endpoint::from_locator(locator)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Shm => write!(f, "SHM"),
            Endpoint::Unknown(kind) => write!(f, "unknown({})", kind),
            _ => match self.ip_addr() {
                Some(ip) => write!(f, "{}", ip),
                None => Ok(()),
            },
        }
    }
}

fn v4_octets(address: &[u8; LOCATOR_ADDRESS_LEN]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&address[12..16]);
    out
}

// ============================================================================
// Well-known ports
// ============================================================================

/// RTPS well-known ports of a domain (DDS-RTPS v2.3 section 9.6.1.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainPorts {
    pub discovery_multicast: u32,
    pub user_multicast: u32,
    pub discovery_unicast: u32,
    pub user_unicast: u32,
}

impl DomainPorts {
    const PB: u32 = 7400;
    const DG: u32 = 250;
    const PG: u32 = 2;
    const D0: u32 = 0;
    const D1: u32 = 10;
    const D2: u32 = 1;
    const D3: u32 = 11;

    pub fn for_domain(domain_id: u32, participant_id: u32) -> Self {
        let base = Self::PB + Self::DG * domain_id;
        Self {
            discovery_multicast: base + Self::D0,
            user_multicast: base + Self::D2,
            discovery_unicast: base + Self::D1 + Self::PG * participant_id,
            user_unicast: base + Self::D3 + Self::PG * participant_id,
        }
    }
}
