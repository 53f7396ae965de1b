// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge error types.

use crate::config::ConfigError;
use crate::middleware::MiddlewareError;
use crate::state::StateError;

/// Errors reported by callback configuration and lifecycle operations.
#[derive(Debug)]
pub enum BridgeError {
    /// The middleware returned no participant handle.
    CreationFailure { domain_id: u32 },
    /// The middleware refused to delete the server participant.
    DeletionFailure {
        domain_id: u32,
        source: MiddlewareError,
    },
    /// Host misuse of the callback contract (e.g. callback without context).
    ContractViolation(String),
    State(StateError),
    Config(ConfigError),
}

impl BridgeError {
    /// Negative status code used on the C boundary.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::CreationFailure { .. } => -1,
            Self::DeletionFailure { .. } => -2,
            Self::ContractViolation(_) => -3,
            Self::State(_) => -5,
            Self::Config(_) => -6,
        }
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreationFailure { domain_id } => {
                write!(f, "Unable to create participant on domain {}", domain_id)
            }
            Self::DeletionFailure { domain_id, source } => write!(
                f,
                "Unable to delete participant on domain {}: {}",
                domain_id, source
            ),
            Self::ContractViolation(s) => write!(f, "Contract violation: {}", s),
            Self::State(e) => write!(f, "State store error: {}", e),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DeletionFailure { source, .. } => Some(source),
            Self::State(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StateError> for BridgeError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<ConfigError> for BridgeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
