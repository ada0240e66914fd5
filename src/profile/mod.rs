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

//! Profile hook: the constants and hash/collision behavior a concrete
//! profile (HNCP) supplies to the generic flooding engine (§4.6).

pub mod hncp;
pub mod shsp;

use rand::RngCore;

use crate::tlv::NodeId;

/// Everything the engine needs from a concrete profile. HNCP is the only
/// profile implemented here, but the engine is written against this trait
/// rather than HNCP's constants directly, per §2's "Profile (HNCP)" split.
pub trait Profile {
    fn node_id_len(&self) -> usize;
    fn trickle_imin(&self) -> f64;
    fn trickle_imax(&self) -> f64;
    fn trickle_k(&self) -> u32;
    fn keepalive_interval(&self) -> f64;
    fn keepalive_multiplier(&self) -> f64;
    fn grace_interval(&self) -> f64;
    fn per_endpoint_ka(&self) -> bool;
    fn per_peer_ka(&self) -> bool;

    /// `profile_hash` (HNCP: first 8 bytes of MD5).
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// Pick a fresh node-id not present in `existing` (HNCP: uniform
    /// random over `node_id_len` bytes, retried until free).
    fn random_node_id(&self, existing: &dyn Fn(&NodeId) -> bool, rng: &mut dyn RngCore) -> NodeId;
}
