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

#![allow(dead_code)]

//! A deterministic network simulator for convergence tests, a Rust
//! translation of `net_sim.py`'s `DummySystem`/`DummyNode`: a virtual
//! clock, an `ep2ep` connectivity map, and delayed delivery of whatever
//! each node's engine pushes to its outbox.
//!
//! Unlike `net_sim.py`, which drives DNCP through the `Subscriber`/`sys`
//! callback boundary, this drives `Dncp<Hncp>` directly: `now` is threaded
//! explicitly and there is no callback to schedule through.

use std::collections::HashMap;

use dncp::engine::Dncp;
use dncp::profile::hncp::Hncp;
use dncp::tlv::NodeId;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// `net_sim.py`'s fixed link delay for scheduled deliveries.
const LINK_DELAY: f64 = 0.01;

type EpKey = (usize, u32);

struct Delivery {
    at: f64,
    node: usize,
    ep_id: u32,
    src: Vec<u8>,
    dst: Option<Vec<u8>>,
    tlvs: Vec<dncp::tlv::Tlv>,
}

/// One simulated node: its engine plus a name -> ep_id map (`net_sim.py`'s
/// `DummyNode.ep`).
pub struct SimNode {
    pub engine: Dncp<Hncp>,
    eps: HashMap<String, u32>,
    next_wake: f64,
}

/// The simulated network: nodes, their connectivity, and the event queue.
pub struct SimNet {
    pub nodes: Vec<SimNode>,
    ep2ep: HashMap<EpKey, Vec<EpKey>>,
    deliveries: Vec<Delivery>,
    now: f64,
    rng: StdRng,
}

impl SimNet {
    pub fn new(seed: u64) -> Self {
        SimNet {
            nodes: Vec::new(),
            ep2ep: HashMap::new(),
            deliveries: Vec::new(),
            now: 12_345_678.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Add a node with a freshly rolled node-id, in read/write mode.
    pub fn add_node(&mut self) -> usize {
        self.add_node_inner(false, None)
    }

    /// Add a node that never publishes non-Neighbor TLVs (§8 scenario 6).
    pub fn add_node_read_only(&mut self) -> usize {
        self.add_node_inner(true, None)
    }

    /// Add a node with a caller-chosen node-id, to set up id collisions
    /// (§8 scenario 5).
    pub fn add_node_with_id(&mut self, node_id: NodeId) -> usize {
        self.add_node_inner(false, Some(node_id))
    }

    fn add_node_inner(&mut self, read_only: bool, node_id: Option<NodeId>) -> usize {
        let engine = Dncp::new(Hncp, node_id, read_only, self.now, &mut self.rng);
        let idx = self.nodes.len();
        self.nodes.push(SimNode {
            engine,
            eps: HashMap::new(),
            next_wake: self.now,
        });
        idx
    }

    /// Create (or look up) a named, ready endpoint on `node`.
    pub fn ep(&mut self, node: usize, name: &str) -> u32 {
        if let Some(&id) = self.nodes[node].eps.get(name) {
            return id;
        }
        let now = self.now;
        let n = &mut self.nodes[node];
        let ep_id = n.engine.create_ep(name, now, &mut self.rng).expect("unique ep name");
        n.engine.ep_ready(ep_id, true);
        n.eps.insert(name.to_string(), ep_id);
        ep_id
    }

    /// Bidirectionally connect two named endpoints (`net_sim.py`'s
    /// `set_connected`).
    pub fn connect(&mut self, a: (usize, &str), b: (usize, &str)) {
        let ea = self.ep(a.0, a.1);
        let eb = self.ep(b.0, b.1);
        self.ep2ep.entry((a.0, ea)).or_default().push((b.0, eb));
        self.ep2ep.entry((b.0, eb)).or_default().push((a.0, ea));
    }

    /// `net_sim.py`'s `setup_tube`: `n` nodes in a line, node `i`'s `down`
    /// endpoint linked to node `i+1`'s `up` endpoint.
    pub fn setup_tube(n: usize, seed: u64) -> Self {
        let mut net = SimNet::new(seed);
        let idxs: Vec<usize> = (0..n).map(|_| net.add_node()).collect();
        for w in idxs.windows(2) {
            net.connect((w[0], "down"), (w[1], "up"));
        }
        net
    }

    /// The opaque token peers should see for frames from `node` — its own
    /// node-id, since `ext_received`'s `src` is only ever compared back
    /// against later outbound `dst`s, never interpreted (§1 Non-goals).
    fn peer_token(&self, node: usize) -> Vec<u8> {
        self.nodes[node].engine.own_id().clone()
    }

    fn deliver(&mut self, from_node: usize, frame: dncp::engine::OutFrame) {
        let src = self.peer_token(from_node);
        let candidates = self
            .ep2ep
            .get(&(from_node, frame.ep_id))
            .cloned()
            .unwrap_or_default();
        let targets: Vec<EpKey> = match &frame.dst {
            None => candidates,
            Some(dst) => candidates
                .into_iter()
                .filter(|(n, _)| self.peer_token(*n) == *dst)
                .collect(),
        };
        for (tn, tep) in targets {
            self.deliveries.push(Delivery {
                at: self.now + LINK_DELAY,
                node: tn,
                ep_id: tep,
                src: src.clone(),
                dst: frame.dst.clone(),
                tlvs: frame.tlvs.clone(),
            });
        }
    }

    fn step(&mut self) {
        let min_wake = self.nodes.iter().map(|n| n.next_wake).fold(f64::INFINITY, f64::min);
        let min_deliver = self.deliveries.iter().map(|d| d.at).fold(f64::INFINITY, f64::min);
        let t = min_wake.min(min_deliver);
        if !t.is_finite() {
            return;
        }
        self.now = t;

        let (deliver_now, keep): (Vec<Delivery>, Vec<Delivery>) =
            self.deliveries.drain(..).partition(|d| d.at <= self.now + 1e-9);
        self.deliveries = keep;
        for d in deliver_now {
            self.nodes[d.node]
                .engine
                .ext_received(d.ep_id, d.src, d.dst, d.tlvs, self.now, &mut self.rng);
        }

        for idx in 0..self.nodes.len() {
            if self.nodes[idx].next_wake <= self.now + 1e-9 {
                let next = self.nodes[idx].engine.run(self.now, &mut self.rng);
                self.nodes[idx].next_wake = next;
                let frames = self.nodes[idx].engine.take_outbox();
                for frame in frames {
                    self.deliver(idx, frame);
                }
            }
        }
    }

    /// Run until `cond` holds or `max_steps` simulated events pass.
    pub fn run_until(&mut self, max_steps: usize, cond: impl Fn(&mut SimNet) -> bool) -> bool {
        if cond(self) {
            return true;
        }
        for _ in 0..max_steps {
            self.step();
            if cond(self) {
                return true;
            }
        }
        false
    }

    /// Advance the simulation by `seconds` of virtual time, delivering and
    /// running everything scheduled within that window.
    pub fn run_seconds(&mut self, seconds: f64) {
        let end = self.now + seconds;
        while self
            .nodes
            .iter()
            .map(|n| n.next_wake)
            .chain(self.deliveries.iter().map(|d| d.at))
            .fold(f64::INFINITY, f64::min)
            <= end
        {
            self.step();
        }
        self.now = end;
    }

    /// `net_sim.py`'s `is_converged`: every node reports the engine-level
    /// consistency flag and identical network hashes, and every node's
    /// `valid_sorted_nodes()` sees exactly `self.nodes.len()` nodes.
    pub fn is_converged(&mut self) -> bool {
        let n = self.nodes.len();
        if self.nodes.iter().any(|sn| !sn.engine.is_consistent()) {
            return false;
        }
        if self.nodes.iter().any(|sn| sn.engine.valid_sorted_nodes().len() != n) {
            return false;
        }
        let mut hashes: Vec<Vec<u8>> = self
            .nodes
            .iter_mut()
            .map(|sn| sn.engine.network_hash(sn.next_wake, &mut StdRng::seed_from_u64(0)))
            .collect();
        hashes.dedup();
        hashes.len() == 1
    }
}
