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

//! Prometheus counters/gauges for the engine and transport, plus the
//! `/metrics` HTTP exposition the teacher's Cargo.toml pairs `prometheus`
//! with (via `axum`) but never wires up.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::MetricsError;

/// Metrics container, constructed once per running node and shared with
/// the transport and the CLI.
#[derive(Clone)]
pub struct Metrics {
    /// Registry every metric below is registered against.
    pub registry: Registry,

    /// Current count of nodes this engine considers valid/reachable.
    pub valid_nodes: IntGauge,
    /// How many times `network_hash` has changed.
    pub network_hash_changes_total: IntCounter,
    /// How many times `is_consistent` flipped from false to true.
    pub consistency_reached_total: IntCounter,
    /// How many times `is_consistent` flipped from true to false.
    pub consistency_lost_total: IntCounter,

    /// Trickle-gated sends actually emitted (per-endpoint + per-peer).
    pub trickle_sends_total: IntCounter,
    /// Trickle sends suppressed by the consistency counter (§4.3).
    pub trickle_suppressed_total: IntCounter,

    /// TLV decode attempts that produced a corrupt/truncated record (§7).
    pub decode_errors_total: IntCounter,
    /// NodeState bodies that failed the `profile_hash` check (§4.5 rule 4).
    pub hash_mismatches_total: IntCounter,
    /// Own-node-id collisions observed from a peer (§4.5 rule 5).
    pub collisions_total: IntCounter,

    /// Outbound frames handed to the transport.
    pub frames_sent_total: IntCounter,
    /// Inbound frames handed to `ext_received`.
    pub frames_received_total: IntCounter,
}

impl Metrics {
    /// Create and register every metric against a fresh [`Registry`].
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        macro_rules! gauge {
            ($name:literal, $help:literal) => {{
                let g = IntGauge::new($name, $help).map_err(|_| MetricsError::Prom)?;
                registry.register(Box::new(g.clone())).map_err(|_| MetricsError::Prom)?;
                g
            }};
        }
        macro_rules! counter {
            ($name:literal, $help:literal) => {{
                let c = IntCounter::new($name, $help).map_err(|_| MetricsError::Prom)?;
                registry.register(Box::new(c.clone())).map_err(|_| MetricsError::Prom)?;
                c
            }};
        }

        Ok(Self {
            valid_nodes: gauge!("dncp_valid_nodes", "Nodes considered valid/reachable"),
            network_hash_changes_total: counter!(
                "dncp_network_hash_changes_total",
                "Times the network hash changed"
            ),
            consistency_reached_total: counter!(
                "dncp_consistency_reached_total",
                "Times is_consistent flipped false -> true"
            ),
            consistency_lost_total: counter!(
                "dncp_consistency_lost_total",
                "Times is_consistent flipped true -> false"
            ),
            trickle_sends_total: counter!("dncp_trickle_sends_total", "Trickle-gated sends emitted"),
            trickle_suppressed_total: counter!(
                "dncp_trickle_suppressed_total",
                "Trickle sends suppressed by the consistency counter"
            ),
            decode_errors_total: counter!("dncp_decode_errors_total", "Corrupt/truncated TLV decodes"),
            hash_mismatches_total: counter!(
                "dncp_hash_mismatches_total",
                "NodeState bodies failing the profile hash check"
            ),
            collisions_total: counter!("dncp_collisions_total", "Own node-id collisions observed"),
            frames_sent_total: counter!("dncp_frames_sent_total", "Outbound frames handed to the transport"),
            frames_received_total: counter!(
                "dncp_frames_received_total",
                "Inbound frames handed to ext_received"
            ),
            registry,
        })
    }
}

async fn render(State(metrics): State<Arc<Metrics>>) -> String {
    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    let _ = TextEncoder::new().encode(&families, &mut buf);
    String::from_utf8(buf).unwrap_or_default()
}

/// Serve `GET /metrics` in Prometheus text exposition format until the
/// listener fails. The CLI spawns this as a background task.
pub async fn serve(metrics: Arc<Metrics>, addr: SocketAddr) -> std::io::Result<()> {
    let app = Router::new().route("/metrics", get(render)).with_state(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registers_without_name_collisions() {
        let m = Metrics::new().expect("metrics register cleanly");
        assert_eq!(m.registry.gather().len(), 11);
    }
}
