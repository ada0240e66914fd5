//! The wire codec: typed-length-value records, big-endian, 4-byte padded.
//!
//! Equality, ordering and hashing of a [`Tlv`] are all defined over its
//! encoded bytes, mirroring the source this engine is modeled on (where a
//! `Blob`'s `__eq__`/`__lt__`/`__hash__` are implemented via `encode()`).
//! That keeps the own node's TLV list's sort order identical to its wire
//! form, which is what makes `node_data`/`node_hash` canonical.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Node-id: a fixed-width opaque token, profile-supplied length (HNCP: 4).
pub type NodeId = Vec<u8>;

pub const TYPE_REQ_NET_STATE: u16 = 1;
pub const TYPE_REQ_NODE_STATE: u16 = 2;
pub const TYPE_NODE_EP: u16 = 3;
pub const TYPE_NET_STATE: u16 = 4;
pub const TYPE_NODE_STATE: u16 = 5;
pub const TYPE_NEIGHBOR: u16 = 8;
pub const TYPE_KA_INTERVAL: u16 = 9;

const HEADER_SIZE: usize = 4;
const PAD_TO: usize = 4;

fn pad_len(len: usize) -> usize {
    (PAD_TO - (len % PAD_TO)) % PAD_TO
}

/// A decoded or to-be-encoded TLV record.
///
/// `Opaque` is the catch-all for any type this crate's core doesn't assign
/// meaning to — unrecognized types round-trip through it verbatim, and
/// profile layers (e.g. SHSP) build/interpret their own types as `Opaque`
/// without the core needing to know about them.
#[derive(Clone, Debug)]
pub enum Tlv {
    ReqNetState,
    ReqNodeState {
        node_id: NodeId,
    },
    NodeEp {
        node_id: NodeId,
        ep_id: u32,
    },
    NetState {
        hash: Vec<u8>,
    },
    NodeState {
        node_id: NodeId,
        seqno: u32,
        age_ms: u32,
        hash: Vec<u8>,
        body: Vec<u8>,
    },
    Neighbor {
        n_node_id: NodeId,
        n_ep_id: u32,
        ep_id: u32,
    },
    KaInterval {
        ep_id: u32,
        interval_ms: u32,
    },
    Opaque {
        ty: u16,
        body: Vec<u8>,
    },
}

impl Tlv {
    pub fn ty(&self) -> u16 {
        match self {
            Tlv::ReqNetState => TYPE_REQ_NET_STATE,
            Tlv::ReqNodeState { .. } => TYPE_REQ_NODE_STATE,
            Tlv::NodeEp { .. } => TYPE_NODE_EP,
            Tlv::NetState { .. } => TYPE_NET_STATE,
            Tlv::NodeState { .. } => TYPE_NODE_STATE,
            Tlv::Neighbor { .. } => TYPE_NEIGHBOR,
            Tlv::KaInterval { .. } => TYPE_KA_INTERVAL,
            Tlv::Opaque { ty, .. } => *ty,
        }
    }

    /// Body bytes, not including the 4-byte header or padding.
    fn body_bytes(&self) -> Vec<u8> {
        match self {
            Tlv::ReqNetState => Vec::new(),
            Tlv::ReqNodeState { node_id } => node_id.clone(),
            Tlv::NodeEp { node_id, ep_id } => {
                let mut v = node_id.clone();
                v.extend_from_slice(&ep_id.to_be_bytes());
                v
            }
            Tlv::NetState { hash } => hash.clone(),
            Tlv::NodeState {
                node_id,
                seqno,
                age_ms,
                hash,
                body,
            } => {
                let mut v = node_id.clone();
                v.extend_from_slice(&seqno.to_be_bytes());
                v.extend_from_slice(&age_ms.to_be_bytes());
                v.extend_from_slice(hash);
                v.extend_from_slice(body);
                v
            }
            Tlv::Neighbor {
                n_node_id,
                n_ep_id,
                ep_id,
            } => {
                let mut v = n_node_id.clone();
                v.extend_from_slice(&n_ep_id.to_be_bytes());
                v.extend_from_slice(&ep_id.to_be_bytes());
                v
            }
            Tlv::KaInterval { ep_id, interval_ms } => {
                let mut v = Vec::with_capacity(8);
                v.extend_from_slice(&ep_id.to_be_bytes());
                v.extend_from_slice(&interval_ms.to_be_bytes());
                v
            }
            Tlv::Opaque { body, .. } => body.clone(),
        }
    }

    /// Encode this TLV, including header and trailing zero padding.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body_bytes();
        let ty = self.ty();
        let len = body.len() as u16;
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + pad_len(body.len()));
        out.extend_from_slice(&ty.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        out.resize(out.len() + pad_len(body.len()), 0);
        out
    }

    /// Wire size of this TLV once encoded (header + body + padding).
    pub fn wire_size(&self) -> usize {
        let len = self.body_bytes().len();
        HEADER_SIZE + len + pad_len(len)
    }

    fn from_header_and_body(ty: u16, body: &[u8]) -> Tlv {
        match ty {
            TYPE_REQ_NET_STATE => Tlv::ReqNetState,
            TYPE_REQ_NODE_STATE if body.len() >= 4 => Tlv::ReqNodeState {
                node_id: body[0..4].to_vec(),
            },
            TYPE_NODE_EP if body.len() >= 8 => Tlv::NodeEp {
                node_id: body[0..4].to_vec(),
                ep_id: u32::from_be_bytes(body[4..8].try_into().unwrap()),
            },
            TYPE_NET_STATE if body.len() >= 8 => Tlv::NetState {
                hash: body[0..8].to_vec(),
            },
            TYPE_NODE_STATE if body.len() >= 20 => Tlv::NodeState {
                node_id: body[0..4].to_vec(),
                seqno: u32::from_be_bytes(body[4..8].try_into().unwrap()),
                age_ms: u32::from_be_bytes(body[8..12].try_into().unwrap()),
                hash: body[12..20].to_vec(),
                body: body[20..].to_vec(),
            },
            TYPE_NEIGHBOR if body.len() >= 12 => Tlv::Neighbor {
                n_node_id: body[0..4].to_vec(),
                n_ep_id: u32::from_be_bytes(body[4..8].try_into().unwrap()),
                ep_id: u32::from_be_bytes(body[8..12].try_into().unwrap()),
            },
            TYPE_KA_INTERVAL if body.len() >= 8 => Tlv::KaInterval {
                ep_id: u32::from_be_bytes(body[0..4].try_into().unwrap()),
                interval_ms: u32::from_be_bytes(body[4..8].try_into().unwrap()),
            },
            // Either an unregistered type, or a registered type whose body
            // is shorter than its fixed prefix (truncated on the wire).
            // Round-trip it verbatim rather than aborting the stream.
            _ => Tlv::Opaque {
                ty,
                body: body.to_vec(),
            },
        }
    }
}

/// Decode a flat sequence of TLVs out of `buf`.
///
/// A trailing fragment shorter than a header is silently dropped. A TLV
/// whose declared `length` runs past the end of `buf` is decoded
/// best-effort against a zero-padded tail, per §4.1/§7 — corruption is
/// caught downstream by hash verification, not by this function.
pub fn decode_tlvs(buf: &[u8]) -> Vec<Tlv> {
    decode_tlvs_counted(buf).0
}

/// Same as [`decode_tlvs`], additionally returning how many records in
/// `buf` were truncated (declared `length` ran past the end of `buf`) so a
/// caller that owns a metrics handle can surface §7's decode-error count
/// without this module needing to know about metrics itself.
pub fn decode_tlvs_counted(buf: &[u8]) -> (Vec<Tlv>, u32) {
    let mut out = Vec::new();
    let mut truncated = 0u32;
    let mut i = 0usize;
    while i + HEADER_SIZE <= buf.len() {
        let ty = u16::from_be_bytes(buf[i..i + 2].try_into().unwrap());
        let len = u16::from_be_bytes(buf[i + 2..i + 4].try_into().unwrap()) as usize;
        let body_start = i + HEADER_SIZE;
        let body_end = body_start + len;
        let body: Vec<u8> = if body_end <= buf.len() {
            buf[body_start..body_end].to_vec()
        } else {
            truncated += 1;
            let mut b = buf.get(body_start..buf.len()).unwrap_or(&[]).to_vec();
            b.resize(len, 0);
            b
        };
        out.push(Tlv::from_header_and_body(ty, &body));
        let pad = pad_len(len);
        let advance = HEADER_SIZE + len + pad;
        // Guard against a zero-size infinite loop on a corrupt header.
        if advance == 0 {
            break;
        }
        i += advance;
    }
    (out, truncated)
}

/// Encode a sequence of TLVs, concatenated in order.
pub fn encode_tlvs(tlvs: &[Tlv]) -> Vec<u8> {
    let mut out = Vec::new();
    for t in tlvs {
        out.extend_from_slice(&t.encode());
    }
    out
}

impl PartialEq for Tlv {
    fn eq(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }
}

impl Eq for Tlv {}

impl PartialOrd for Tlv {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tlv {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encode().cmp(&other.encode())
    }
}

impl Hash for Tlv {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encode().hash(state);
    }
}
