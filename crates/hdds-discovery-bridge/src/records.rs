// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Normalized discovery records handed to host callbacks.
//!
//! Records are built fresh for every discovery event and passed by value;
//! nothing here is retained by the bridge after a callback returns.

use crate::locator::Endpoint;
use crate::middleware::ParticipantHandle;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// GUID prefix length in bytes.
pub const GUID_PREFIX_LEN: usize = 12;

/// Maximum bytes of a topic or type name, excluding the terminator.
pub const MAX_NAME_LEN: usize = 254;

// ============================================================================
// GuidPrefix
// ============================================================================

/// 12-byte participant identifier.
///
/// # Display Format
/// Hex with dots: "44.53.00.5f.45.50.52.4f.53.49.4d.41"
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct GuidPrefix(pub [u8; GUID_PREFIX_LEN]);

impl GuidPrefix {
    pub const fn new(bytes: [u8; GUID_PREFIX_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GUID_PREFIX_LEN] {
        &self.0
    }
}

impl From<[u8; GUID_PREFIX_LEN]> for GuidPrefix {
    fn from(bytes: [u8; GUID_PREFIX_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuidPrefix({})", self)
    }
}

/// Error parsing a dotted-hex GUID prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseGuidPrefixError(String);

impl fmt::Display for ParseGuidPrefixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid GUID prefix '{}'", self.0)
    }
}

impl std::error::Error for ParseGuidPrefixError {}

impl FromStr for GuidPrefix {
    type Err = ParseGuidPrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGuidPrefixError(s.to_string());
        let mut bytes = [0u8; GUID_PREFIX_LEN];
        let mut count = 0;
        for part in s.trim().split('.') {
            if count == GUID_PREFIX_LEN || part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            bytes[count] = u8::from_str_radix(part, 16).map_err(|_| err())?;
            count += 1;
        }
        if count != GUID_PREFIX_LEN {
            return Err(err());
        }
        Ok(Self(bytes))
    }
}

impl Serialize for GuidPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GuidPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// BoundedName
// ============================================================================

/// Topic or type name bounded to [`MAX_NAME_LEN`] bytes.
///
/// Longer input is cut at the last UTF-8 char boundary that fits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct BoundedName(String);

impl BoundedName {
    pub fn new(name: &str) -> Self {
        if name.len() <= MAX_NAME_LEN {
            return Self(name.to_string());
        }
        let mut end = MAX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        warn!(
            "Name of {} bytes truncated to {} bytes: {}...",
            name.len(),
            end,
            name.chars().take(32).collect::<String>()
        );
        Self(name[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoundedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BoundedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Records
// ============================================================================

/// A discovered (or removed) participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParticipantRecord {
    /// Middleware handle of the discovered participant. Owned by the middleware.
    pub participant: ParticipantHandle,
    pub guid_prefix: GuidPrefix,
    /// First default unicast locator only.
    pub endpoint: Endpoint,
}

/// A discovered (or removed) reader or writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndpointRecord {
    pub topic_name: BoundedName,
    pub type_name: BoundedName,
    /// Prefix of the owning participant.
    pub guid_prefix: GuidPrefix,
    /// First remote unicast locator only.
    pub endpoint: Endpoint,
}

pub type ReaderRecord = EndpointRecord;
pub type WriterRecord = EndpointRecord;

impl EndpointRecord {
    /// Topic name with the ROS 2 mangling prefix removed and a leading '/'.
    ///
    /// `rt/chatter` becomes `/chatter`; names without a known prefix are only
    /// rooted.
    pub fn ros2_topic_name(&self) -> String {
        let name = self.topic_name.as_str();
        let stripped = ["rt/", "rr/", "rq/"]
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
            .unwrap_or(name);
        if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{}", stripped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_prefix_display_and_parse() {
        let gp = GuidPrefix::new([
            0x44, 0x53, 0x00, 0x5f, 0x45, 0x50, 0x52, 0x4f, 0x53, 0x49, 0x4d, 0x41,
        ]);
        let text = gp.to_string();
        assert_eq!(text, "44.53.00.5f.45.50.52.4f.53.49.4d.41");
        assert_eq!(text.parse::<GuidPrefix>().unwrap(), gp);
    }

    #[test]
    fn test_guid_prefix_parse_rejects_bad_input() {
        assert!("44.53.00".parse::<GuidPrefix>().is_err());
        assert!("44.53.00.5f.45.50.52.4f.53.49.4d.41.00"
            .parse::<GuidPrefix>()
            .is_err());
        assert!("zz.53.00.5f.45.50.52.4f.53.49.4d.41"
            .parse::<GuidPrefix>()
            .is_err());
        assert!("".parse::<GuidPrefix>().is_err());
    }

    #[test]
    fn test_guid_prefix_serde_as_string() {
        let gp = GuidPrefix::new([1; 12]);
        let json = serde_json::to_string(&gp).unwrap();
        assert_eq!(json, "\"01.01.01.01.01.01.01.01.01.01.01.01\"");
        let back: GuidPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, gp);
    }

    #[test]
    fn test_bounded_name_short_unchanged() {
        let name = BoundedName::new("rt/chatter");
        assert_eq!(name.as_str(), "rt/chatter");
    }

    #[test]
    fn test_bounded_name_truncates() {
        let long = "a".repeat(400);
        assert_eq!(BoundedName::new(&long).as_str().len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_bounded_name_truncates_on_char_boundary() {
        // 253 ASCII bytes followed by a 2-byte char would end at 255.
        let mut s = "a".repeat(253);
        s.push('é');
        s.push_str("tail");
        let name = BoundedName::new(&s);
        assert_eq!(name.as_str().len(), 253);
        assert!(name.as_str().chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_ros2_topic_name() {
        let record = |topic: &str| EndpointRecord {
            topic_name: BoundedName::new(topic),
            type_name: BoundedName::new("std_msgs::msg::dds_::String_"),
            guid_prefix: GuidPrefix::default(),
            endpoint: Endpoint::Shm,
        };
        assert_eq!(record("rt/chatter").ros2_topic_name(), "/chatter");
        assert_eq!(record("rq/add_twoRequest").ros2_topic_name(), "/add_twoRequest");
        assert_eq!(record("plain").ros2_topic_name(), "/plain");
        assert_eq!(record("/rooted").ros2_topic_name(), "/rooted");
    }
}
