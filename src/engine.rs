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

//! The flooding engine: owns endpoints, the node store, and the local
//! publication buffer; drives the periodic run and handles inbound TLVs
//! (§4.4, §4.5).
//!
//! The engine's public methods take `now: f64` and an `&mut dyn RngCore`
//! explicitly rather than calling back into a `SystemInterface` for the
//! clock and randomness. The source this is modeled on instead holds a
//! `sys` handle and self-schedules via closures; Rust's ownership model
//! makes storing those closures on the engine impractical, so the clock is
//! threaded through as a parameter (a functional-core/imperative-shell
//! split) and outbound frames are collected into an outbox the caller
//! drains and actually transmits via its own `SystemInterface`. See
//! `DESIGN.md` for the full rationale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::RngCore;
use tracing::{debug, error, warn};

use crate::endpoint::{Endpoint, NeighborKey};
use crate::error::EngineError;
use crate::monitoring::metrics::Metrics;
use crate::node::{Node, NodeStore};
use crate::profile::Profile;
use crate::tlv::{decode_tlvs, decode_tlvs_counted, encode_tlvs, NodeId, Tlv};
use crate::trickle::Trickle;

/// An opaque endpoint token: an address as observed on the wire. The core
/// never interprets these bytes (§1 Non-goals: no IP-address validation).
pub type PeerAddr = Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Dirty {
    Graph,
    NetworkHash,
    LocalTlv,
    LocalAlways,
}

/// A local TLV was added to or removed from the pending publication buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvEvent {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpEventKind {
    Add,
    Remove,
}

/// Subscriber callbacks, named the way the source's `Subscriber` class
/// does, with empty default bodies so implementers only override what
/// they need (§9: "single trait/interface with one method per event kind
/// and default empty implementations").
pub trait Subscriber {
    fn republish_event(&mut self) {}
    fn local_tlv_event(&mut self, _tlv: &Tlv, _event: TlvEvent) {}
    fn tlv_event(&mut self, _node_id: &NodeId, _tlv: &Tlv, _event: TlvEvent) {}
    fn node_event(&mut self, _node_id: &NodeId, _event: NodeEventKind) {}
    fn ep_event(&mut self, _ep_name: &str, _event: EpEventKind) {}
    fn network_consistent_event(&mut self, _is_consistent: bool) {}
}

/// One outbound frame, queued for the caller to hand to its
/// `SystemInterface`. `dst == None` means multicast.
#[derive(Debug, Clone)]
pub struct OutFrame {
    pub ep_id: u32,
    pub src: Option<PeerAddr>,
    pub dst: Option<PeerAddr>,
    pub tlvs: Vec<Tlv>,
}

/// The generic DNCP flooding engine, parameterized over a concrete
/// [`Profile`] (HNCP).
pub struct Dncp<P: Profile> {
    profile: P,
    pub read_only: bool,
    own_id: NodeId,
    nodes: NodeStore,
    endpoints: HashMap<u32, Endpoint>,
    name2ep: HashMap<String, u32>,
    next_ep_id: u32,
    /// Pending local publication buffer (the source's `DNCP.tlvs`); the
    /// own node's actual published TLVs are a flushed, encode/decode
    /// round-tripped copy of this, refreshed by `flush_local`.
    local_tlvs: Vec<Tlv>,
    neighbor_trickles: HashMap<NeighborKey, Trickle>,
    neighbor_last_contact: HashMap<NeighborKey, f64>,
    neighbor_peer_addr: HashMap<NeighborKey, PeerAddr>,
    dirty: HashSet<Dirty>,
    last_prune: f64,
    last_rns: f64,
    last_seen_network_hash: Option<Vec<u8>>,
    network_hash: Vec<u8>,
    network_consistent: Option<bool>,
    outbox: Vec<OutFrame>,
    subscribers: Vec<Box<dyn Subscriber>>,
    metrics: Option<Arc<Metrics>>,
}

impl<P: Profile> Dncp<P> {
    pub fn new(profile: P, node_id: Option<NodeId>, read_only: bool, now: f64, rng: &mut dyn RngCore) -> Self {
        let mut dirty = HashSet::new();
        dirty.insert(Dirty::NetworkHash);
        let mut engine = Dncp {
            profile,
            read_only,
            own_id: Vec::new(),
            nodes: NodeStore::new(),
            endpoints: HashMap::new(),
            name2ep: HashMap::new(),
            next_ep_id: 1,
            local_tlvs: Vec::new(),
            neighbor_trickles: HashMap::new(),
            neighbor_last_contact: HashMap::new(),
            neighbor_peer_addr: HashMap::new(),
            dirty,
            last_prune: 0.0,
            last_rns: 0.0,
            last_seen_network_hash: None,
            network_hash: Vec::new(),
            network_consistent: None,
            outbox: Vec::new(),
            subscribers: Vec::new(),
            metrics: None,
        };
        let id = node_id.unwrap_or_else(|| {
            engine
                .profile
                .random_node_id(&|candidate| engine.nodes.contains(candidate), rng)
        });
        engine.set_node_id(id, now);
        engine
    }

    /// Attach a metrics sink; counters are incremented at their event
    /// sites from then on (network-hash changes, consistency transitions,
    /// Trickle sends/suppressions, decode errors, hash mismatches,
    /// collisions). A no-op default when unset, so tests and the
    /// simulator don't need one.
    pub fn set_metrics(&mut self, metrics: Arc<Metrics>) {
        self.metrics = Some(metrics);
    }

    pub fn add_subscriber(&mut self, s: Box<dyn Subscriber>) {
        self.subscribers.push(s);
    }

    pub fn own_id(&self) -> &NodeId {
        &self.own_id
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn local_tlvs(&self) -> &[Tlv] {
        &self.local_tlvs
    }

    pub fn is_consistent(&self) -> bool {
        self.last_seen_network_hash.as_deref() == Some(self.network_hash.as_slice())
    }

    pub fn network_hash(&mut self, now: f64, rng: &mut dyn RngCore) -> Vec<u8> {
        self.recompute_network_hash(now, rng);
        self.network_hash.clone()
    }

    /// §4.2: nodes with at least one TLV, reached in the most recent
    /// prune, with the own-node-in-read-only-mode suppression rule.
    pub fn valid_sorted_nodes(&self) -> Vec<&Node> {
        self.valid_node_ids()
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .collect()
    }

    /// Profile hash of one node's current TLV set, computing and caching
    /// it if necessary (§4.7's dict view needs this per valid node without
    /// forcing a full `network_hash` recompute).
    pub fn node_hash(&mut self, id: &NodeId) -> Option<Vec<u8>> {
        let profile = &self.profile;
        self.nodes.get_mut(id).map(|n| n.node_hash(|b| profile.hash(b)))
    }

    pub fn valid_node_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for (id, node) in self.nodes.iter() {
            if *id == self.own_id && self.read_only {
                let has_content = node.tlvs.iter().any(|t| !matches!(t, Tlv::Neighbor { .. }));
                if !has_content {
                    continue;
                }
            }
            if !node.tlvs.is_empty() && node.last_reachable == self.last_prune {
                out.push(id.clone());
            }
        }
        out
    }

    pub fn create_ep(&mut self, name: &str, now: f64, rng: &mut dyn RngCore) -> Result<u32, EngineError> {
        if self.name2ep.contains_key(name) {
            return Err(EngineError::DuplicateEndpointName(name.to_string()));
        }
        let ep_id = self.next_ep_id;
        self.next_ep_id += 1;
        let per_endpoint_ka = self.profile.per_endpoint_ka();
        let per_peer_ka = self.profile.per_peer_ka();
        let mut ep = Endpoint::new(name.to_string(), ep_id, per_endpoint_ka, per_peer_ka, now, rng);
        let (imin, imax, k) = (
            self.profile.trickle_imin(),
            self.profile.trickle_imax(),
            self.profile.trickle_k(),
        );
        ep.reset_trickle(now, imin, imax, k, rng);
        self.name2ep.insert(name.to_string(), ep_id);
        self.endpoints.insert(ep_id, ep);
        Ok(ep_id)
    }

    pub fn ep_ready(&mut self, ep_id: u32, enabled: bool) {
        let mut changed = None;
        if let Some(ep) = self.endpoints.get_mut(&ep_id) {
            if ep.enabled != enabled {
                ep.enabled = enabled;
                changed = Some(enabled);
            }
        }
        if let Some(enabled) = changed {
            self.fire_ep_event(ep_id, if enabled { EpEventKind::Add } else { EpEventKind::Remove });
        }
    }

    pub fn set_node_id(&mut self, id: NodeId, now: f64) {
        if !self.own_id.is_empty() && self.nodes.contains(&self.own_id) {
            let old = self.own_id.clone();
            self.remove_node_by_id(&old);
        }
        self.dirty.insert(Dirty::LocalTlv);
        self.own_id = id.clone();
        let mut node = Node::new(id.clone());
        node.origination_time = now;
        self.nodes.insert(node);
        self.fire_node_event(&id, NodeEventKind::Add);
        self.dirty.insert(Dirty::Graph);
    }

    fn profile_collision(&mut self, now: f64, rng: &mut dyn RngCore) {
        let new_id = self
            .profile
            .random_node_id(&|candidate| self.nodes.contains(candidate), rng);
        self.set_node_id(new_id, now);
    }

    pub fn add_tlv(&mut self, t: Tlv, now: f64, rng: &mut dyn RngCore) {
        self.local_tlv_add_inner(t);
        self.run(now, rng);
    }

    pub fn remove_tlv(&mut self, t: &Tlv, now: f64, rng: &mut dyn RngCore) {
        self.local_tlv_remove_inner(t);
        self.run(now, rng);
    }

    fn local_tlv_add_inner(&mut self, t: Tlv) -> bool {
        if self.local_tlvs.contains(&t) {
            return false;
        }
        debug_assert!(matches!(t, Tlv::Neighbor { .. }) || !self.read_only);
        let idx = self.local_tlvs.partition_point(|x| x < &t);
        self.local_tlvs.insert(idx, t.clone());
        self.fire_local_tlv_event(&t, TlvEvent::Add);
        self.dirty.insert(Dirty::LocalTlv);
        true
    }

    fn local_tlv_remove_inner(&mut self, t: &Tlv) -> bool {
        if let Some(idx) = self.local_tlvs.iter().position(|x| x == t) {
            let removed = self.local_tlvs.remove(idx);
            self.fire_local_tlv_event(&removed, TlvEvent::Remove);
            self.dirty.insert(Dirty::LocalTlv);
            true
        } else {
            false
        }
    }

    fn remove_node_by_id(&mut self, id: &NodeId) {
        if self.nodes.remove(id).is_some() {
            self.fire_node_event(id, NodeEventKind::Remove);
            self.dirty.insert(Dirty::Graph);
        }
    }

    pub fn take_outbox(&mut self) -> Vec<OutFrame> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, ep_id: u32, src: Option<PeerAddr>, dst: Option<PeerAddr>, mut tlvs: Vec<Tlv>) {
        if !self.read_only {
            tlvs.insert(
                0,
                Tlv::NodeEp {
                    node_id: self.own_id.clone(),
                    ep_id,
                },
            );
        }
        debug!(ep_id, ?dst, n = tlvs.len(), "send");
        self.outbox.push(OutFrame { ep_id, src, dst, tlvs });
    }

    fn node_state_for(&mut self, id: &NodeId, now: f64, short: bool) -> Option<Tlv> {
        if !short && *id == self.own_id {
            self.flush_local(now);
        }
        let profile = &self.profile;
        let node = self.nodes.get_mut(id)?;
        if node.seqno == 0 {
            return None;
        }
        let hash = node.node_hash(|b| profile.hash(b));
        let age_ms = ((now - node.origination_time) * 1000.0).max(0.0) as u32;
        let body = if short { Vec::new() } else { node.node_data().to_vec() };
        Some(Tlv::NodeState {
            node_id: node.node_id.clone(),
            seqno: node.seqno,
            age_ms,
            hash,
            body,
        })
    }

    fn send_net_state(&mut self, ep_id: u32, src: Option<PeerAddr>, dst: Option<PeerAddr>, req: bool, now: f64) {
        let mut l = vec![Tlv::NetState {
            hash: self.network_hash.clone(),
        }];
        if req {
            l.push(Tlv::ReqNetState);
        } else if dst.is_some() {
            for id in self.valid_node_ids() {
                if let Some(ns) = self.node_state_for(&id, now, true) {
                    l.push(ns);
                }
            }
        }
        self.send(ep_id, src, dst, l);
    }

    /// Wire-path ingress (§4.4 "Inbound handling"). `dst == None` denotes a
    /// multicast frame.
    pub fn ext_received(
        &mut self,
        ep_id: u32,
        src: PeerAddr,
        dst: Option<PeerAddr>,
        tlvs: Vec<Tlv>,
        now: f64,
        rng: &mut dyn RngCore,
    ) {
        let mut ne: Option<NeighborKey> = None;
        let mut want_rns = false;
        for t in tlvs {
            match t {
                Tlv::NodeEp { node_id, ep_id: n_ep } => {
                    let heard = self.heard(ep_id, &src, dst.as_ref(), &node_id, n_ep, now, rng);
                    if dst.is_none() && heard.is_none() {
                        want_rns = true;
                    }
                    ne = heard;
                }
                Tlv::ReqNetState => {
                    self.send_net_state(ep_id, dst.clone(), Some(src.clone()), false, now);
                    if let Some(key) = ne.clone() {
                        if self.endpoints.get(&ep_id).map(|e| e.per_peer_ka).unwrap_or(false) {
                            if let Some(t) = self.neighbor_trickles.get_mut(&key) {
                                t.mark_sent(now);
                            }
                        }
                    }
                }
                Tlv::ReqNodeState { node_id } => {
                    let reachable = self
                        .nodes
                        .get(&node_id)
                        .map(|n| n.last_reachable == self.last_prune)
                        .unwrap_or(false);
                    if reachable {
                        if let Some(ns) = self.node_state_for(&node_id, now, false) {
                            self.send(ep_id, dst.clone(), Some(src.clone()), vec![ns]);
                        }
                    } else {
                        debug!(?node_id, "ignoring ReqNodeState, not up to date");
                    }
                }
                Tlv::NetState { hash } => {
                    self.last_seen_network_hash = Some(hash);
                    let consistent = self.is_consistent();
                    self.update_consistency_flag(consistent);
                    if consistent {
                        if let Some(t) = self.endpoints.get_mut(&ep_id).and_then(|e| e.trickle.as_mut()) {
                            t.note_consistent();
                        }
                        if let Some(key) = ne.clone() {
                            self.neighbor_last_contact.insert(key, now);
                            if let Some(t) = self.neighbor_trickles.get_mut(&key) {
                                t.note_consistent();
                            }
                        }
                    } else {
                        want_rns = true;
                    }
                }
                Tlv::NodeState {
                    node_id,
                    seqno,
                    age_ms,
                    hash,
                    body,
                } => {
                    let want_body = self.update_node_from_ns(&node_id, seqno, age_ms, hash, body, now, rng);
                    if want_body {
                        self.send(
                            ep_id,
                            dst.clone(),
                            Some(src.clone()),
                            vec![Tlv::ReqNodeState { node_id }],
                        );
                    }
                }
                other => {
                    warn!(ty = other.ty(), "unknown top-level TLV");
                }
            }
        }
        if dst.is_some() {
            if let Some(key) = ne {
                self.neighbor_last_contact.insert(key, now);
            }
        }
        if want_rns && self.last_rns + self.profile.trickle_imin() < now {
            self.last_rns = now;
            self.send_net_state(ep_id, dst.clone(), Some(src.clone()), true, now);
        }
        self.run(now, rng);
    }

    fn heard(
        &mut self,
        ep_id: u32,
        src: &PeerAddr,
        dst: Option<&PeerAddr>,
        node_id: &NodeId,
        n_ep_id: u32,
        now: f64,
        rng: &mut dyn RngCore,
    ) -> Option<NeighborKey> {
        if *node_id == self.own_id {
            return None;
        }
        let key: NeighborKey = (node_id.clone(), n_ep_id, ep_id);
        let own_tlv = Tlv::Neighbor {
            n_node_id: node_id.clone(),
            n_ep_id,
            ep_id,
        };
        if self.local_tlvs.contains(&own_tlv) {
            return Some(key);
        }
        if dst.is_none() {
            return None;
        }
        self.neighbor_last_contact.insert(key.clone(), now);
        self.neighbor_peer_addr.insert(key.clone(), src.clone());
        if self.endpoints.get(&ep_id).map(|e| e.per_peer_ka).unwrap_or(false) {
            let (imin, imax, k) = (
                self.profile.trickle_imin(),
                self.profile.trickle_imax(),
                self.profile.trickle_k(),
            );
            let mut trickle = Trickle::new(now, imin, imax, k, rng);
            trickle.mark_sent(now);
            self.neighbor_trickles.insert(key.clone(), trickle);
        }
        self.local_tlv_add_inner(own_tlv);
        Some(key)
    }

    /// §4.5 node update from an accepted NodeState. Returns `true` iff the
    /// caller should follow up with a `ReqNodeState` (the body was empty).
    fn update_node_from_ns(
        &mut self,
        node_id: &NodeId,
        seqno: u32,
        age_ms: u32,
        hash: Vec<u8>,
        body: Vec<u8>,
        now: f64,
        rng: &mut dyn RngCore,
    ) -> bool {
        if !self.nodes.contains(node_id) {
            let t = now - 1.0;
            let t = (t - self.profile.grace_interval() / 2.0).max(t.min(self.last_prune - 1.0));
            let mut node = Node::new(node_id.clone());
            node.last_reachable = t;
            self.nodes.insert(node);
            self.fire_node_event(node_id, NodeEventKind::Add);
            self.dirty.insert(Dirty::Graph);
        }
        let current_seqno = self.nodes.get(node_id).unwrap().seqno;
        if seqno < current_seqno {
            return false;
        }
        let current_hash = {
            let profile = &self.profile;
            self.nodes.get_mut(node_id).unwrap().node_hash(|b| profile.hash(b))
        };
        if seqno == current_seqno && hash == current_hash {
            return false;
        }
        if body.is_empty() {
            return true;
        }
        let computed = self.profile.hash(&body);
        if computed != hash {
            error!(?node_id, "node-state body hash mismatch, dropping");
            if let Some(m) = &self.metrics {
                m.hash_mismatches_total.inc();
            }
            return false;
        }
        if *node_id == self.own_id {
            debug!("node-state from own id: collision");
            if let Some(m) = &self.metrics {
                m.collisions_total.inc();
            }
            let collided_already = self.nodes.get(node_id).unwrap().collided;
            if collided_already {
                self.profile_collision(now, rng);
            } else {
                let n = self.nodes.get_mut(node_id).unwrap();
                n.collided = true;
                n.seqno = seqno.wrapping_add(1000);
                self.dirty.insert(Dirty::LocalTlv);
                self.dirty.insert(Dirty::LocalAlways);
            }
            return false;
        }
        let (decoded, truncated) = decode_tlvs_counted(&body);
        if truncated > 0 {
            if let Some(m) = &self.metrics {
                m.decode_errors_total.inc_by(truncated as u64);
            }
        }
        let n = self.nodes.get_mut(node_id).unwrap();
        n.seqno = seqno;
        n.origination_time = now - (age_ms as f64) / 1000.0;
        let (removed, added) = n.set_tlvs(decoded);
        let node_id_owned = node_id.clone();
        for t in removed {
            self.fire_tlv_event(&node_id_owned, &t, TlvEvent::Remove);
        }
        for t in added {
            self.fire_tlv_event(&node_id_owned, &t, TlvEvent::Add);
        }
        self.dirty.insert(Dirty::NetworkHash);
        self.dirty.insert(Dirty::Graph);
        let profile = &self.profile;
        let recomputed = self.nodes.get_mut(node_id).unwrap().node_hash(|b| profile.hash(b));
        debug_assert_eq!(recomputed, hash, "node hash mismatch after applying node-state");
        false
    }

    fn prune_neighbors(&mut self, now: f64) {
        let own_id = self.own_id.clone();
        let neighbor_tlvs: Vec<Tlv> = match self.nodes.get(&own_id) {
            Some(n) => n
                .tlvs
                .iter()
                .filter(|t| matches!(t, Tlv::Neighbor { .. }))
                .cloned()
                .collect(),
            None => return,
        };
        for t in neighbor_tlvs {
            if let Tlv::Neighbor {
                n_node_id,
                n_ep_id,
                ep_id,
            } = &t
            {
                let mut ka_interval = self.profile.keepalive_interval();
                if let Some(n) = self.nodes.get(n_node_id) {
                    let mut best = None;
                    for kt in n.tlvs.iter() {
                        if let Tlv::KaInterval {
                            ep_id: kep,
                            interval_ms,
                        } = kt
                        {
                            if *kep == *ep_id || *kep == 0 {
                                best = Some(*interval_ms);
                            }
                        }
                    }
                    if let Some(ms) = best {
                        ka_interval = ms as f64 / 1000.0;
                    }
                }
                let dead_interval = ka_interval * self.profile.keepalive_multiplier();
                let key: NeighborKey = (n_node_id.clone(), *n_ep_id, *ep_id);
                let last_contact = *self.neighbor_last_contact.get(&key).unwrap_or(&0.0);
                let ttl = last_contact + dead_interval - now;
                if ttl < 0.0 {
                    self.local_tlv_remove_inner(&t);
                    self.neighbor_last_contact.remove(&key);
                    self.neighbor_trickles.remove(&key);
                    self.neighbor_peer_addr.remove(&key);
                }
            }
        }
    }

    fn bidir_neighbors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let node = match self.nodes.get(id) {
            Some(n) => n,
            None => return out,
        };
        let is_self = *id == self.own_id;
        for t in node.tlvs.iter() {
            if let Tlv::Neighbor {
                n_node_id,
                n_ep_id,
                ep_id,
            } = t
            {
                if !self.nodes.contains(n_node_id) {
                    continue;
                }
                if is_self && self.read_only {
                    out.push(n_node_id.clone());
                    continue;
                }
                if let Some(n) = self.nodes.get(n_node_id) {
                    let reciprocal = n.tlvs.iter().any(|t2| {
                        matches!(t2, Tlv::Neighbor { n_node_id: t2n, n_ep_id: t2e, ep_id: t2ep }
                            if *ep_id == *t2e && *n_ep_id == *t2ep && t2n == id)
                    });
                    if reciprocal {
                        out.push(n_node_id.clone());
                    }
                }
            }
        }
        out
    }

    fn prune_reachability(&mut self, now: f64) {
        if !self.dirty.remove(&Dirty::Graph) {
            return;
        }
        self.last_prune = now;
        let mut stack = vec![self.own_id.clone()];
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            match self.nodes.get_mut(&id) {
                Some(node) => node.last_reachable = self.last_prune,
                None => continue,
            }
            for n in self.bidir_neighbors(&id) {
                stack.push(n);
            }
        }
        let grace = self.profile.grace_interval();
        let mut pending_remove = Vec::new();
        for (id, node) in self.nodes.iter() {
            if node.last_reachable != 0.0 && node.last_reachable + grace < now {
                pending_remove.push(id.clone());
            }
        }
        for id in pending_remove {
            self.remove_node_by_id(&id);
        }
        self.dirty.insert(Dirty::NetworkHash);
    }

    fn flush_local(&mut self, now: f64) {
        if !self.dirty.contains(&Dirty::LocalTlv) {
            return;
        }
        let unchanged = self
            .nodes
            .get(&self.own_id)
            .map(|n| n.tlvs == self.local_tlvs)
            .unwrap_or(false);
        if unchanged && !self.dirty.contains(&Dirty::LocalAlways) {
            self.dirty.remove(&Dirty::LocalTlv);
            return;
        }
        self.dirty.remove(&Dirty::LocalTlv);
        self.dirty.remove(&Dirty::LocalAlways);
        self.fire_republish_event();
        let decoded = if self.local_tlvs.is_empty() {
            Vec::new()
        } else {
            decode_tlvs(&encode_tlvs(&self.local_tlvs))
        };
        let own_id = self.own_id.clone();
        let own = match self.nodes.get_mut(&own_id) {
            Some(n) => n,
            None => return,
        };
        let (removed, added) = own.set_tlvs(decoded);
        for t in removed {
            self.fire_tlv_event(&own_id, &t, TlvEvent::Remove);
        }
        for t in added {
            self.fire_tlv_event(&own_id, &t, TlvEvent::Add);
        }
        if let Some(own) = self.nodes.get_mut(&own_id) {
            own.seqno = own.seqno.wrapping_add(1);
            own.origination_time = now;
        }
        self.dirty.insert(Dirty::NetworkHash);
        self.dirty.insert(Dirty::Graph);
    }

    fn recompute_network_hash(&mut self, now: f64, rng: &mut dyn RngCore) {
        if !self.dirty.remove(&Dirty::NetworkHash) {
            return;
        }
        let ids = self.valid_node_ids();
        let mut data = Vec::new();
        {
            let profile = &self.profile;
            for id in &ids {
                if let Some(node) = self.nodes.get_mut(id) {
                    data.extend_from_slice(&node.seqno.to_be_bytes());
                    data.extend_from_slice(&node.node_hash(|b| profile.hash(b)));
                }
            }
        }
        let new_hash = self.profile.hash(&data);
        if new_hash != self.network_hash {
            self.network_hash = new_hash;
            if let Some(m) = &self.metrics {
                m.network_hash_changes_total.inc();
            }
            let (imin, imax, k) = (
                self.profile.trickle_imin(),
                self.profile.trickle_imax(),
                self.profile.trickle_k(),
            );
            for ep in self.endpoints.values_mut() {
                ep.reset_trickle(now, imin, imax, k, rng);
            }
            for t in self.neighbor_trickles.values_mut() {
                *t = Trickle::new(now, imin, imax, k, rng);
            }
        }
        let consistent = self.is_consistent();
        self.update_consistency_flag(consistent);
    }

    fn update_consistency_flag(&mut self, consistent: bool) {
        if self.network_consistent != Some(consistent) {
            let was_consistent = self.network_consistent == Some(true);
            self.network_consistent = Some(consistent);
            if let Some(m) = &self.metrics {
                if consistent {
                    m.consistency_reached_total.inc();
                } else if was_consistent {
                    m.consistency_lost_total.inc();
                }
            }
            self.fire_network_consistent_event(consistent);
        }
    }

    fn run_endpoint(&mut self, ep_id: u32, now: f64, rng: &mut dyn RngCore) -> Option<f64> {
        let enabled = self.endpoints.get(&ep_id).map(|e| e.enabled).unwrap_or(false);
        if !enabled {
            return None;
        }
        let mut wake: Option<f64> = None;
        let ka = self.profile.keepalive_interval();
        let per_endpoint_ka = self.endpoints.get(&ep_id).map(|e| e.per_endpoint_ka).unwrap_or(false);
        if per_endpoint_ka {
            let result = self
                .endpoints
                .get_mut(&ep_id)
                .and_then(|ep| ep.trickle.as_mut())
                .map(|t| t.run(now, ka, rng));
            if let Some(r) = result {
                for _ in 0..r.sends {
                    self.send_net_state(ep_id, None, None, false, now);
                }
                if let Some(m) = &self.metrics {
                    m.trickle_sends_total.inc_by(r.sends as u64);
                    m.trickle_suppressed_total.inc_by(r.suppressed as u64);
                }
                wake = Some(wake.map_or(r.next_wake, |w| w.min(r.next_wake)));
            }
        }
        let per_peer_ka = self.endpoints.get(&ep_id).map(|e| e.per_peer_ka).unwrap_or(false);
        if per_peer_ka {
            let keys: Vec<NeighborKey> = self
                .neighbor_trickles
                .keys()
                .filter(|(_, _, e)| *e == ep_id)
                .cloned()
                .collect();
            for key in keys {
                let r = match self.neighbor_trickles.get_mut(&key) {
                    Some(t) => t.run(now, ka, rng),
                    None => continue,
                };
                if r.sends > 0 {
                    let addr = self.neighbor_peer_addr.get(&key).cloned();
                    for _ in 0..r.sends {
                        self.send_net_state(ep_id, addr.clone(), addr.clone(), false, now);
                    }
                    if let Some(lc) = self.neighbor_last_contact.get_mut(&key) {
                        *lc = now;
                    }
                }
                if let Some(m) = &self.metrics {
                    m.trickle_sends_total.inc_by(r.sends as u64);
                    m.trickle_suppressed_total.inc_by(r.suppressed as u64);
                }
                wake = Some(wake.map_or(r.next_wake, |w| w.min(r.next_wake)));
            }
        }
        wake
    }

    /// One full run pass (§4.4). Returns the absolute time this engine
    /// should next be run even with no intervening mutation.
    pub fn run(&mut self, now: f64, rng: &mut dyn RngCore) -> f64 {
        let mut next = now + 60.0;
        if let Some(own) = self.nodes.get(&self.own_id) {
            if now - own.origination_time >= (2f64.powi(32) - 2f64.powi(16)) {
                self.dirty.insert(Dirty::LocalTlv);
                self.dirty.insert(Dirty::LocalAlways);
            }
        }
        self.prune_neighbors(now);
        self.prune_reachability(now);
        self.flush_local(now);
        self.recompute_network_hash(now, rng);
        let ep_ids: Vec<u32> = self.endpoints.keys().cloned().collect();
        for ep_id in ep_ids {
            if let Some(w) = self.run_endpoint(ep_id, now, rng) {
                if w < next {
                    next = w;
                }
            }
        }
        next
    }

    fn fire_republish_event(&mut self) {
        for s in self.subscribers.iter_mut() {
            s.republish_event();
        }
    }

    fn fire_local_tlv_event(&mut self, t: &Tlv, e: TlvEvent) {
        for s in self.subscribers.iter_mut() {
            s.local_tlv_event(t, e);
        }
    }

    fn fire_tlv_event(&mut self, node_id: &NodeId, t: &Tlv, e: TlvEvent) {
        for s in self.subscribers.iter_mut() {
            s.tlv_event(node_id, t, e);
        }
    }

    fn fire_node_event(&mut self, node_id: &NodeId, e: NodeEventKind) {
        for s in self.subscribers.iter_mut() {
            s.node_event(node_id, e);
        }
    }

    fn fire_ep_event(&mut self, ep_id: u32, e: EpEventKind) {
        let name = self.endpoints.get(&ep_id).map(|ep| ep.name.clone()).unwrap_or_default();
        for s in self.subscribers.iter_mut() {
            s.ep_event(&name, e);
        }
    }

    fn fire_network_consistent_event(&mut self, c: bool) {
        for s in self.subscribers.iter_mut() {
            s.network_consistent_event(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::hncp::Hncp;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn new_engine_assigns_a_node_id_and_is_inconsistent_until_echoed() {
        let mut r = rng();
        let engine = Dncp::new(Hncp, None, false, 0.0, &mut r);
        assert_eq!(engine.own_id().len(), 4);
        assert!(!engine.is_consistent());
    }

    #[test]
    fn add_tlv_shows_up_in_own_node_after_a_run() {
        let mut r = rng();
        let mut engine = Dncp::new(Hncp, Some(vec![1, 2, 3, 4]), false, 0.0, &mut r);
        engine.create_ep("eth0", 0.0, &mut r).unwrap();
        engine.add_tlv(
            Tlv::Opaque {
                ty: 42,
                body: b"asd".to_vec(),
            },
            1.0,
            &mut r,
        );
        let own_id = engine.own_id().clone();
        let own = engine.node(&own_id).unwrap();
        assert!(own.tlvs.iter().any(|t| matches!(t, Tlv::Opaque { ty: 42, .. })));
    }

    #[test]
    fn two_engines_converge_over_a_simulated_link() {
        let mut r = rng();
        let mut a = Dncp::new(Hncp, Some(vec![1, 0, 0, 0]), false, 0.0, &mut r);
        let mut b = Dncp::new(Hncp, Some(vec![2, 0, 0, 0]), false, 0.0, &mut r);
        let ep_a = a.create_ep("link", 0.0, &mut r).unwrap();
        let ep_b = b.create_ep("link", 0.0, &mut r).unwrap();
        a.ep_ready(ep_a, true);
        b.ep_ready(ep_b, true);
        a.add_tlv(
            Tlv::Opaque {
                ty: 42,
                body: b"asd".to_vec(),
            },
            0.0,
            &mut r,
        );

        let mut now = 0.0;
        for _ in 0..2000 {
            now += 0.05;
            a.run(now, &mut r);
            b.run(now, &mut r);
            for frame in a.take_outbox() {
                if let Some(dst) = frame.dst.clone() {
                    if dst == b"to-b".to_vec() {
                        b.ext_received(ep_b, b"from-a".to_vec(), Some(dst), frame.tlvs, now, &mut r);
                    }
                } else {
                    b.ext_received(ep_b, b"from-a".to_vec(), None, frame.tlvs, now, &mut r);
                }
            }
            for frame in b.take_outbox() {
                if let Some(dst) = frame.dst.clone() {
                    if dst == b"to-a".to_vec() {
                        a.ext_received(ep_a, b"from-b".to_vec(), Some(dst), frame.tlvs, now, &mut r);
                    }
                } else {
                    a.ext_received(ep_a, b"from-b".to_vec(), None, frame.tlvs, now, &mut r);
                }
            }
            if a.is_consistent() && b.is_consistent() {
                break;
            }
        }
        assert!(a.is_consistent());
        assert!(b.is_consistent());
        let b_sees_a = b.valid_sorted_nodes();
        let a_node = b_sees_a.iter().find(|n| n.node_id == vec![1, 0, 0, 0]).unwrap();
        assert!(a_node.tlvs.iter().any(|t| matches!(t, Tlv::Opaque { ty: 42, .. })));
    }
}
