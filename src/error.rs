// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Error taxonomy, one enum per module boundary.
//!
//! The TLV codec itself never fails to decode (§4.1/§7: malformed input is
//! handled best-effort and logged); these errors cover the handful of
//! operations in each module that can genuinely fail.

use thiserror::Error;

/// Errors building a TLV from caller-supplied fields.
#[derive(Debug, Error)]
pub enum TlvError {
    /// A fixed-width field (node-id, hash) was the wrong length.
    #[error("field {field} must be {expected} bytes, got {actual}")]
    WrongFieldLength {
        /// Field name.
        field: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

/// Errors from the flooding engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation that requires the own node referenced one that doesn't
    /// exist (programming error: the own node always exists once created).
    #[error("no own node set")]
    NoOwnNode,
    /// `create_ep` was called with a name already in use.
    #[error("endpoint name already in use: {0}")]
    DuplicateEndpointName(String),
    /// A recomputed hash disagreed with an accepted NodeState; per §7 this
    /// is a fatal programming error, not a recoverable one.
    #[error("node hash mismatch after applying node-state for {node_id}")]
    HashMismatch {
        /// Hex node-id this failure occurred on.
        node_id: String,
    },
}

/// Errors from a DNCP profile (HNCP).
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The profile could not find an unused node-id (astronomically
    /// unlikely for HNCP's 4-byte id space, but the search is bounded).
    #[error("exhausted attempts to find a free node id")]
    NodeIdSpaceExhausted,
}

/// Errors from the SHSP key-value profile.
#[derive(Debug, Error)]
pub enum ShspError {
    /// A SHSPKV body did not parse as the expected JSON shape.
    #[error("malformed SHSPKV body")]
    MalformedEntry,
    /// A SHSPAuth container's hash did not match `MD5(psk ∥ body)`.
    #[error("SHSPAuth integrity check failed")]
    AuthMismatch,
}

/// Errors from the UDP/IPv6 multicast transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket I/O failure.
    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),
    /// No usable interface was found or configured.
    #[error("no usable interface configured")]
    NoInterface,
    /// An interface name didn't resolve to a kernel interface index.
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
}

/// Errors loading or validating on-disk configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the configuration file.
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    /// Could not parse the configuration file as TOML.
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration was internally inconsistent (e.g. no interfaces
    /// and no simulation mode requested).
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors registering Prometheus metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric failed to register with the registry (e.g. duplicate name).
    #[error("prometheus")]
    Prom,
}
