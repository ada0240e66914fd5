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

//! DNCP: a distributed node consensus protocol core, plus its HNCP and
//! SHSP profiles.
//!
//! This crate provides:
//! - A transport-agnostic flooding engine that converges a set of nodes on
//!   shared typed-length-value state via Trickle-timed multicast/unicast
//!   gossip ([`engine`]).
//! - The wire codec ([`tlv`]) and node/endpoint bookkeeping ([`node`],
//!   [`endpoint`]) the engine is built from.
//! - HNCP, a concrete profile fixing DNCP's hash function, node-id width,
//!   and timing constants ([`profile::hncp`]), and SHSP, a key-value
//!   dictionary layered on top with an optional PSK-authenticated envelope
//!   ([`profile::shsp`]).
//! - A UDP/IPv6 multicast transport ([`transport`]) and on-disk
//!   configuration ([`config`]) for running a node as the `hncpd` binary.
//! - Prometheus metrics ([`monitoring::metrics`]) for the engine and
//!   transport.

/// On-disk node configuration.
pub mod config;
/// Endpoint and neighbor bookkeeping.
pub mod endpoint;
/// The flooding engine: `Dncp<P>`, dirty flags, subscriber dispatch, run loop.
pub mod engine;
/// Crate-wide error taxonomy.
pub mod error;
/// Observability: Prometheus metrics.
pub mod monitoring;
/// Node and node-store bookkeeping.
pub mod node;
/// DNCP profiles (HNCP, SHSP).
pub mod profile;
/// The `SystemInterface` contract and a deterministic test implementation.
pub mod system;
/// TLV wire codec.
pub mod tlv;
/// Trickle timer (RFC 6206-style, with DNCP's ordering).
pub mod trickle;
/// UDP/IPv6 multicast transport.
pub mod transport;
