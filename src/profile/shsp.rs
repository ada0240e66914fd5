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

//! SHSP: a distributed key-value dictionary layered on top of HNCP, with an
//! optional PSK-HMAC-style integrity envelope (§4.7).
//!
//! `SHSPKV` (type 789) and `SHSPAuth` (type 790) are never taught to the
//! core TLV decoder — both are built and read here as plain
//! [`Tlv::Opaque`] bodies, parameterized by an explicit `psk: &[u8]`
//! argument rather than any shared or global state (§9's flagged design
//! smell, deliberately avoided).

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::engine::Dncp;
use crate::profile::hncp::Hncp;
use crate::tlv::{decode_tlvs, encode_tlvs, NodeId, Tlv};

/// TLV type for a single `{k, v, ts}` entry.
pub const TYPE_SHSPKV: u16 = 789;
/// TLV type for the PSK-authenticated container.
pub const TYPE_SHSPAUTH: u16 = 790;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvBody {
    k: String,
    v: Value,
    ts: i64,
}

/// Build a `SHSPKV` TLV from its JSON fields.
fn encode_kv(k: &str, v: &Value, ts: i64) -> Tlv {
    let body = KvBody {
        k: k.to_string(),
        v: v.clone(),
        ts,
    };
    let json = serde_json::to_vec(&body).expect("KvBody always serializes");
    Tlv::Opaque {
        ty: TYPE_SHSPKV,
        body: json,
    }
}

fn decode_kv(body: &[u8]) -> Option<KvBody> {
    match serde_json::from_slice(body) {
        Ok(kv) => Some(kv),
        Err(e) => {
            error!(error = %e, "malformed SHSPKV body");
            None
        }
    }
}

/// Wrap a set of local `SHSPKV` TLVs in a PSK-authenticated `SHSPAuth`
/// container: `hash = MD5(psk ∥ nested-body)`.
fn encode_auth(psk: &[u8], entries: &[Tlv]) -> Tlv {
    let nested = encode_tlvs(entries);
    let mut preimage = Vec::with_capacity(psk.len() + nested.len());
    preimage.extend_from_slice(psk);
    preimage.extend_from_slice(&nested);
    let hash = md5::compute(&preimage).0.to_vec();
    let mut body = hash;
    body.extend_from_slice(&nested);
    Tlv::Opaque {
        ty: TYPE_SHSPAUTH,
        body,
    }
}

/// Verify and unwrap an `SHSPAuth` container, returning its nested TLVs.
/// Returns `None` (discarding the container's children, per §4.7) on a
/// hash mismatch.
fn decode_auth(psk: &[u8], body: &[u8]) -> Option<Vec<Tlv>> {
    if body.len() < 16 {
        return None;
    }
    let (claimed_hash, nested) = body.split_at(16);
    let mut preimage = Vec::with_capacity(psk.len() + nested.len());
    preimage.extend_from_slice(psk);
    preimage.extend_from_slice(nested);
    let expected = md5::compute(&preimage).0;
    if expected.as_slice() != claimed_hash {
        return None;
    }
    Some(decode_tlvs(nested))
}

/// Extract every `SHSPKV` entry from a node's published TLVs, unwrapping
/// any `SHSPAuth` container with `psk` (entries inside a container whose
/// hash fails to verify are dropped).
fn kv_entries<'a>(tlvs: impl Iterator<Item = &'a Tlv>, psk: Option<&[u8]>) -> Vec<KvBody> {
    let mut out = Vec::new();
    for t in tlvs {
        if let Tlv::Opaque { ty, body } = t {
            match *ty {
                TYPE_SHSPKV => {
                    if let Some(kv) = decode_kv(body) {
                        out.push(kv);
                    }
                }
                TYPE_SHSPAUTH => {
                    if let Some(psk) = psk {
                        if let Some(nested) = decode_auth(psk, body) {
                            for n in nested {
                                if let Tlv::Opaque {
                                    ty: TYPE_SHSPKV,
                                    body,
                                } = n
                                {
                                    if let Some(kv) = decode_kv(&body) {
                                        out.push(kv);
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    out
}

/// The SHSP profile: an HNCP engine plus a local dict index and an
/// optional PSK. Composition (rather than the source's subclassing) keeps
/// the underlying [`Dncp`] engine generic and reusable — see `DESIGN.md`.
pub struct Shsp {
    pub engine: Dncp<Hncp>,
    psk: Option<Vec<u8>>,
    local_dict: BTreeMap<String, Tlv>,
    /// The single `SHSPAuth` container currently published, when `psk` is
    /// set (§4.7: a PSK-configured node's `SHSPKV` entries always live
    /// inside one such container, never as bare top-level TLVs).
    published_container: Option<Tlv>,
}

impl Shsp {
    pub fn new(node_id: Option<NodeId>, psk: Option<Vec<u8>>, now: f64, rng: &mut dyn RngCore) -> Self {
        Shsp {
            engine: Dncp::new(Hncp, node_id, false, now, rng),
            psk,
            local_dict: BTreeMap::new(),
            published_container: None,
        }
    }

    /// `{node_hash_hex: {key: value}}` (or `{key: [ts, value]}` when
    /// `include_timestamp`), per §4.7's dict view.
    pub fn get_dict(&mut self, include_timestamp: bool) -> BTreeMap<String, BTreeMap<String, Value>> {
        let psk = self.psk.clone();
        let mut out = BTreeMap::new();
        for id in self.engine.valid_node_ids() {
            let entries = match self.engine.node(&id) {
                Some(node) => kv_entries(node.tlvs.iter(), psk.as_deref()),
                None => continue,
            };
            if entries.is_empty() {
                continue;
            }
            let hash = self.engine.node_hash(&id).unwrap_or_default();
            let mut h = BTreeMap::new();
            for kv in entries {
                let v = if include_timestamp {
                    Value::Array(vec![Value::from(kv.ts), kv.v])
                } else {
                    kv.v
                };
                h.insert(kv.k, v);
            }
            out.insert(hex::encode(hash), h);
        }
        out
    }

    /// Diff `d` against the local index and emit/retract `SHSPKV` entries.
    /// A `null` value retracts the key (§4.7). When a PSK is configured,
    /// entries are never published individually — the single `SHSPAuth`
    /// container is rebuilt and swapped instead, keeping the "always
    /// inside the container" invariant intact on every call.
    pub fn update_dict(&mut self, d: BTreeMap<String, Option<Value>>, now: f64, rng: &mut dyn RngCore) {
        let mut changed = false;
        for (k, v) in d {
            if let Some(old) = self.local_dict.get(&k) {
                if let Tlv::Opaque { body, .. } = old {
                    if let Some(old_kv) = decode_kv(body) {
                        if Some(&old_kv.v) == v.as_ref() {
                            continue;
                        }
                    }
                }
                let old = old.clone();
                if self.psk.is_none() {
                    self.engine.remove_tlv(&old, now, rng);
                }
                self.local_dict.remove(&k);
                changed = true;
            }
            let v = match v {
                Some(v) => v,
                None => continue,
            };
            let ts = now as i64;
            let nt = encode_kv(&k, &v, ts);
            if self.psk.is_none() {
                self.engine.add_tlv(nt.clone(), now, rng);
            }
            self.local_dict.insert(k, nt);
            changed = true;
        }
        if changed && self.psk.is_some() {
            self.reauth(now, rng);
        }
    }

    /// Replace the whole local dict with `d`, retracting any key present
    /// locally but absent from `d`.
    pub fn set_dict(&mut self, d: BTreeMap<String, Value>, now: f64, rng: &mut dyn RngCore) {
        let mut merged: BTreeMap<String, Option<Value>> = d.into_iter().map(|(k, v)| (k, Some(v))).collect();
        for k in self.local_dict.keys() {
            merged.entry(k.clone()).or_insert(None);
        }
        self.update_dict(merged, now, rng);
    }

    /// Re-wrap every currently-local `SHSPKV` entry in a single
    /// `SHSPAuth` container keyed by `psk`, replacing whatever container
    /// was previously published. No-op if no PSK is configured.
    fn reauth(&mut self, now: f64, rng: &mut dyn RngCore) {
        let psk = match &self.psk {
            Some(p) => p.clone(),
            None => return,
        };
        if let Some(old) = self.published_container.take() {
            self.engine.remove_tlv(&old, now, rng);
        }
        let entries: Vec<Tlv> = self.local_dict.values().cloned().collect();
        let container = encode_auth(&psk, &entries);
        self.engine.add_tlv(container.clone(), now, rng);
        self.published_container = Some(container);
    }
}
