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

//! A participant's published state, and the store that owns every node.

use std::collections::BTreeMap;

use crate::tlv::{encode_tlvs, NodeId, Tlv};

/// One node's published TLV set plus the bookkeeping the engine needs to
/// reason about reachability and hash freshness.
#[derive(Debug)]
pub struct Node {
    pub node_id: NodeId,
    pub seqno: u32,
    pub origination_time: f64,
    pub tlvs: Vec<Tlv>,
    /// Tick (as `last_prune` value) at which this node was last reached via
    /// bidirectional-Neighbor traversal from the own node.
    pub last_reachable: f64,
    pub collided: bool,
    node_data: Option<Vec<u8>>,
    node_hash: Option<Vec<u8>>,
}

impl Node {
    pub fn new(node_id: NodeId) -> Self {
        Node {
            node_id,
            seqno: 0,
            origination_time: 0.0,
            tlvs: Vec::new(),
            last_reachable: 0.0,
            collided: false,
            node_data: None,
            node_hash: None,
        }
    }

    /// Concatenation of encoded TLVs, cached until the next `set_tlvs`.
    pub fn node_data(&mut self) -> &[u8] {
        if self.node_data.is_none() {
            self.node_data = Some(encode_tlvs(&self.tlvs));
        }
        self.node_data.as_deref().unwrap()
    }

    /// Profile hash of [`Node::node_data`], cached until the next
    /// `set_tlvs`. `hash_fn` is the profile's hash function (HNCP: first 8
    /// bytes of MD5).
    pub fn node_hash(&mut self, hash_fn: impl Fn(&[u8]) -> Vec<u8>) -> Vec<u8> {
        if self.node_hash.is_none() {
            let data = self.node_data().to_vec();
            self.node_hash = Some(hash_fn(&data));
        }
        self.node_hash.clone().unwrap()
    }

    /// Replace the TLV set, invalidating the caches (§3: "Derived caches
    /// MUST be invalidated on any TLV mutation").
    ///
    /// Returns `(removed, added)` so the caller can fire `tlv_event`
    /// subscriber callbacks for the symmetric difference, matching the
    /// source's diff-then-swap ordering: removals are reported against the
    /// old set before the new set is installed, additions after.
    pub fn set_tlvs(&mut self, mut tlvs: Vec<Tlv>) -> (Vec<Tlv>, Vec<Tlv>) {
        tlvs.sort();
        tlvs.dedup();
        let removed: Vec<Tlv> = self.tlvs.iter().filter(|t| !tlvs.contains(t)).cloned().collect();
        let added: Vec<Tlv> = tlvs.iter().filter(|t| !self.tlvs.contains(t)).cloned().collect();
        self.tlvs = tlvs;
        self.node_data = None;
        self.node_hash = None;
        (removed, added)
    }

    pub fn add_tlv_sorted(&mut self, t: Tlv) {
        if self.tlvs.contains(&t) {
            return;
        }
        let idx = self.tlvs.partition_point(|x| x < &t);
        self.tlvs.insert(idx, t);
        self.node_data = None;
        self.node_hash = None;
    }

    pub fn remove_tlv(&mut self, t: &Tlv) -> bool {
        if let Some(idx) = self.tlvs.iter().position(|x| x == t) {
            self.tlvs.remove(idx);
            self.node_data = None;
            self.node_hash = None;
            true
        } else {
            false
        }
    }

    pub fn tlv_instances<'a>(&'a self, mut pred: impl FnMut(&Tlv) -> bool + 'a) -> impl Iterator<Item = &'a Tlv> + 'a {
        self.tlvs.iter().filter(move |t| pred(t))
    }
}

/// Ordered map from node-id to [`Node`].
///
/// Iteration order is node-id order (TLV-codec byte order for the raw
/// node-id bytes), which is exactly the ordering `network_hash` and
/// `valid_sorted_nodes` require — a `BTreeMap<NodeId, Node>` gives that for
/// free, so there is no separate sorted-id list to maintain by hand.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: BTreeMap<NodeId, Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn insert(&mut self, node: Node) -> &mut Node {
        let id = node.node_id.clone();
        self.nodes.insert(id.clone(), node);
        self.nodes.get_mut(&id).unwrap()
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        self.nodes.remove(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&NodeId, &mut Node)> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hncp_hash(b: &[u8]) -> Vec<u8> {
        md5::compute(b).0[..8].to_vec()
    }

    #[test]
    fn node_hash_is_stable_under_insertion_order() {
        let mut a = Node::new(vec![1, 2, 3, 4]);
        let mut b = Node::new(vec![1, 2, 3, 4]);
        a.set_tlvs(vec![
            Tlv::KaInterval {
                ep_id: 1,
                interval_ms: 10,
            },
            Tlv::ReqNetState,
        ]);
        b.set_tlvs(vec![
            Tlv::ReqNetState,
            Tlv::KaInterval {
                ep_id: 1,
                interval_ms: 10,
            },
        ]);
        assert_eq!(a.node_hash(hncp_hash), b.node_hash(hncp_hash));
    }

    #[test]
    fn set_tlvs_reports_symmetric_difference() {
        let mut n = Node::new(vec![0; 4]);
        n.set_tlvs(vec![Tlv::ReqNetState]);
        let (removed, added) = n.set_tlvs(vec![Tlv::KaInterval {
            ep_id: 0,
            interval_ms: 1,
        }]);
        assert_eq!(removed, vec![Tlv::ReqNetState]);
        assert_eq!(
            added,
            vec![Tlv::KaInterval {
                ep_id: 0,
                interval_ms: 1,
            }]
        );
    }

    #[test]
    fn cache_invalidates_on_mutation() {
        let mut n = Node::new(vec![0; 4]);
        n.add_tlv_sorted(Tlv::ReqNetState);
        let h1 = n.node_hash(hncp_hash);
        n.add_tlv_sorted(Tlv::KaInterval {
            ep_id: 0,
            interval_ms: 5,
        });
        let h2 = n.node_hash(hncp_hash);
        assert_ne!(h1, h2);
    }

    #[test]
    fn store_iterates_in_node_id_order() {
        let mut store = NodeStore::new();
        store.insert(Node::new(vec![2, 0, 0, 0]));
        store.insert(Node::new(vec![1, 0, 0, 0]));
        let ids: Vec<_> = store.ids().cloned().collect();
        assert_eq!(ids, vec![vec![1, 0, 0, 0], vec![2, 0, 0, 0]]);
    }
}
