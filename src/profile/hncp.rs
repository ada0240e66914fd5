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

//! The HNCP profile: concrete constants for hash/node-id length, Trickle
//! bounds, keepalive cadence, and the multicast wire binding (§4.6, §6).

use rand::RngCore;

use crate::profile::Profile;
use crate::tlv::NodeId;

/// UDP/IPv6 multicast group HNCP binds to (§6).
pub const MULTICAST_GROUP: &str = "ff02::8808";
/// UDP port HNCP binds to (§6).
pub const MULTICAST_PORT: u16 = 8808;

/// HNCP: the one concrete profile this crate implements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hncp;

impl Hncp {
    pub const HASH_LENGTH: usize = 8;
    pub const NODE_ID_LENGTH: usize = 4;
    pub const TRICKLE_IMIN: f64 = 0.2;
    pub const TRICKLE_IMAX: f64 = 40.0;
    pub const TRICKLE_K: u32 = 1;
    pub const KEEPALIVE_INTERVAL: f64 = 20.0;
    pub const KEEPALIVE_MULTIPLIER: f64 = 2.1;
    pub const GRACE_INTERVAL: f64 = 60.0;
    pub const PER_PEER_KA: bool = false;
    pub const PER_ENDPOINT_KA: bool = true;
}

impl Profile for Hncp {
    fn node_id_len(&self) -> usize {
        Self::NODE_ID_LENGTH
    }
    fn trickle_imin(&self) -> f64 {
        Self::TRICKLE_IMIN
    }
    fn trickle_imax(&self) -> f64 {
        Self::TRICKLE_IMAX
    }
    fn trickle_k(&self) -> u32 {
        Self::TRICKLE_K
    }
    fn keepalive_interval(&self) -> f64 {
        Self::KEEPALIVE_INTERVAL
    }
    fn keepalive_multiplier(&self) -> f64 {
        Self::KEEPALIVE_MULTIPLIER
    }
    fn grace_interval(&self) -> f64 {
        Self::GRACE_INTERVAL
    }
    fn per_endpoint_ka(&self) -> bool {
        Self::PER_ENDPOINT_KA
    }
    fn per_peer_ka(&self) -> bool {
        Self::PER_PEER_KA
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        md5::compute(data).0[..Self::HASH_LENGTH].to_vec()
    }

    fn random_node_id(&self, exists: &dyn Fn(&NodeId) -> bool, rng: &mut dyn RngCore) -> NodeId {
        loop {
            let mut id = vec![0u8; Self::NODE_ID_LENGTH];
            rng.fill_bytes(&mut id);
            if !exists(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_truncates_md5_to_eight_bytes() {
        let h = Hncp.hash(b"asd");
        assert_eq!(h.len(), 8);
        let full = md5::compute(b"asd").0;
        assert_eq!(h, full[..8]);
    }

    #[test]
    fn random_node_id_avoids_collisions_with_existing_set() {
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let used = vec![0u8; 4];
        let id = Hncp.random_node_id(&|id| id == &used, &mut rng);
        assert_ne!(id, used);
    }
}
