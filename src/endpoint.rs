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

//! Per-link binding, and the keepalive Trickle timer(s) that live on it.

use rand::Rng;

use crate::tlv::NodeId;
use crate::trickle::Trickle;

/// Identifies one Neighbor assertion: `(n_node_id, n_ep_id, ep_id)`, the
/// part of a Neighbor TLV that defines wire identity (§3: `last_contact` is
/// local mutable metadata, excluded here).
pub type NeighborKey = (NodeId, u32, u32);

/// A local binding to one link (e.g. one network interface, or one unicast
/// peer for listen-mode transports).
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    pub ep_id: u32,
    pub enabled: bool,
    pub per_endpoint_ka: bool,
    pub per_peer_ka: bool,
    /// Present iff `per_endpoint_ka`.
    pub trickle: Option<Trickle>,
}

impl Endpoint {
    pub fn new(
        name: String,
        ep_id: u32,
        per_endpoint_ka: bool,
        per_peer_ka: bool,
        now: f64,
        rng: &mut impl Rng,
    ) -> Self {
        let trickle = per_endpoint_ka.then(|| {
            // i_min/i_max/k are profile-supplied; the engine reconstructs
            // with the right bounds via `reset`, called right after
            // creation once the endpoint is registered.
            Trickle::new(now, 0.2, 40.0, 1, rng)
        });
        Endpoint {
            name,
            ep_id,
            enabled: false,
            per_endpoint_ka,
            per_peer_ka,
            trickle,
        }
    }

    /// Reset this endpoint's own Trickle to `i=0` (e.g. on creation with
    /// the profile's real bounds, or whenever the network hash changes).
    pub fn reset_trickle(&mut self, now: f64, i_min: f64, i_max: f64, k: u32, rng: &mut impl Rng) {
        if let Some(t) = &mut self.trickle {
            *t = Trickle::new(now, i_min, i_max, k, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn per_endpoint_ka_creates_a_trickle() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let ep = Endpoint::new("eth0".into(), 1, true, false, 0.0, &mut rng);
        assert!(ep.trickle.is_some());
    }

    #[test]
    fn per_peer_ka_has_no_endpoint_level_trickle() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let ep = Endpoint::new("listen".into(), 1, false, true, 0.0, &mut rng);
        assert!(ep.trickle.is_none());
    }
}
