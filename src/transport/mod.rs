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
#![allow(missing_docs)]

//! UDP/IPv6 multicast [`crate::system::SystemInterface`] collaborator
//! (§6), grounded in `pysyma/si.py::SystemInterfaceSocket` and the
//! teacher's `networking::p2p::spawn_p2p` tokio `select!` loop shape.
//!
//! This is a collaborator the engine depends on only through the
//! `ext_received`/`take_outbox` boundary (§1 Non-goals: transport is
//! explicitly out of the core's scope) — building it is ambient-stack
//! polish for a complete repo, not part of the engine's tested surface.
//!
//! `si.py` distinguishes multicast from unicast ingress on one shared
//! socket via `IPV6_RECVPKTINFO`/`recvmsg` ancillary data. Parsing control
//! messages off a raw `recvmsg` call needs `unsafe` FFI this crate forbids
//! crate-wide, so this binds two sockets per node instead: one joined to
//! the multicast group (every inbound datagram on it is multicast, by
//! construction) and one plain unicast listen socket (every inbound
//! datagram on it is unicast). That reproduces `si.py`'s
//! `set_dncp_multicast`/`set_dncp_unicast_listen` split without needing
//! ancillary-data parsing.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::str::FromStr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::PeerAddr;
use crate::error::TransportError;
use crate::tlv::{decode_tlvs, encode_tlvs, Tlv};

const MAX_DATAGRAM: usize = 1 << 16;

/// One inbound frame as observed off the wire, handed to the shell so it
/// can call `Dncp::ext_received`.
#[derive(Debug)]
pub struct InboundFrame {
    /// Which local endpoint received this (multicast ep or the shared
    /// unicast-listen ep).
    pub ep_id: u32,
    /// The opaque peer token this came from.
    pub src: PeerAddr,
    /// `None` for frames off a multicast-joined socket, `Some(local)` for
    /// frames off the unicast-listen socket.
    pub dst: Option<PeerAddr>,
    pub tlvs: Vec<Tlv>,
}

/// Encode a resolved socket address as an opaque [`PeerAddr`] token. The
/// engine never interprets these bytes (§1 Non-goals): this crate's own
/// transport is the only thing that needs to turn them back into a real
/// address, via [`peer_to_addr`].
pub fn addr_to_peer(addr: SocketAddr) -> PeerAddr {
    addr.to_string().into_bytes()
}

/// Inverse of [`addr_to_peer`].
pub fn peer_to_addr(peer: &PeerAddr) -> Option<SocketAddr> {
    std::str::from_utf8(peer).ok().and_then(|s| SocketAddr::from_str(s).ok())
}

fn new_dgram_socket() -> Result<Socket, TransportError> {
    Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).map_err(TransportError::Io)
}

/// Bind a socket joined to `group` on interface `ifindex` (0 lets the OS
/// pick the default multicast-capable interface), with multicast loopback
/// disabled per §6 ("Sender MUST disable multicast loopback").
fn bind_multicast(ifindex: u32, group: Ipv6Addr, port: u16) -> Result<UdpSocket, TransportError> {
    let socket = new_dgram_socket()?;
    socket.set_reuse_address(true).map_err(TransportError::Io)?;
    let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&addr.into()).map_err(TransportError::Io)?;
    socket.join_multicast_v6(&group, ifindex).map_err(TransportError::Io)?;
    socket.set_multicast_loop_v6(false).map_err(TransportError::Io)?;
    socket.set_nonblocking(true).map_err(TransportError::Io)?;
    UdpSocket::from_std(socket.into()).map_err(TransportError::Io)
}

/// Resolve an interface name (e.g. `"eth0"`) to its kernel interface index,
/// for `join_multicast_v6`. `si.py`'s `_if_nametoindex` does the same via
/// `socket.getaddrinfo`; this uses `nix`'s safe wrapper over
/// `if_nametoindex(3)` so no `unsafe` FFI is needed in this crate.
pub fn resolve_ifindex(name: &str) -> Result<u32, TransportError> {
    nix::net::if_::if_nametoindex(name).map_err(|_| TransportError::UnknownInterface(name.to_string()))
}

/// Bind the single shared unicast-listen socket (`si.py`'s
/// `set_dncp_unicast_listen`).
fn bind_unicast(port: u16) -> Result<UdpSocket, TransportError> {
    let socket = new_dgram_socket()?;
    socket.set_nonblocking(true).map_err(TransportError::Io)?;
    let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&addr.into()).map_err(TransportError::Io)?;
    UdpSocket::from_std(socket.into()).map_err(TransportError::Io)
}

/// One configured multicast interface binding.
pub struct MulticastBinding {
    pub ep_id: u32,
    socket: Arc<UdpSocket>,
    group_addr: SocketAddr,
}

/// The UDP/IPv6 multicast transport: one multicast socket per configured
/// interface, plus a single shared unicast-listen socket, all funneling
/// inbound frames into one channel and reading outbound frames off
/// another. This is the concrete thing `src/bin/hncpd.rs` hands frames to
/// and from; `Dncp` itself only ever sees [`InboundFrame`]s and produces
/// `OutFrame`s (`crate::engine::OutFrame`), both transport-agnostic.
pub struct UdpTransport {
    multicast: Vec<MulticastBinding>,
    unicast: Arc<UdpSocket>,
    unicast_ep_id: u32,
    inbound_tx: mpsc::Sender<InboundFrame>,
}

impl UdpTransport {
    /// Bind one multicast socket per `(ep_id, ifindex)` pair plus the
    /// shared unicast-listen socket, and spawn a receive task for each.
    /// `unicast_ep_id` is the endpoint id the engine registered for
    /// unicast-listen traffic.
    pub fn bind(
        multicast_eps: &[(u32, u32)],
        unicast_ep_id: u32,
        group: Ipv6Addr,
        port: u16,
    ) -> Result<(Self, mpsc::Receiver<InboundFrame>), TransportError> {
        if multicast_eps.is_empty() {
            return Err(TransportError::NoInterface);
        }
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let mut multicast = Vec::with_capacity(multicast_eps.len());
        for &(ep_id, ifindex) in multicast_eps {
            let socket = Arc::new(bind_multicast(ifindex, group, port)?);
            multicast.push(MulticastBinding {
                ep_id,
                socket: socket.clone(),
                group_addr: SocketAddr::V6(SocketAddrV6::new(group, port, 0, 0)),
            });
            spawn_reader(socket, ep_id, None, inbound_tx.clone());
        }
        let unicast = Arc::new(bind_unicast(port)?);
        spawn_reader(unicast.clone(), unicast_ep_id, Some(()), inbound_tx.clone());
        Ok((
            Self {
                multicast,
                unicast,
                unicast_ep_id,
                inbound_tx,
            },
            inbound_rx,
        ))
    }

    /// Send one frame, mirroring `crate::engine::OutFrame`'s shape.
    /// `dst == None` means multicast on `ep_id`.
    pub async fn send(&self, ep_id: u32, dst: Option<&PeerAddr>, tlvs: &[Tlv]) -> Result<(), TransportError> {
        let bytes = encode_tlvs(tlvs);
        match dst {
            None => {
                let binding = self
                    .multicast
                    .iter()
                    .find(|b| b.ep_id == ep_id)
                    .ok_or(TransportError::NoInterface)?;
                binding.socket.send_to(&bytes, binding.group_addr).await?;
            }
            Some(peer) => {
                let addr = peer_to_addr(peer).ok_or(TransportError::NoInterface)?;
                let socket = if ep_id == self.unicast_ep_id {
                    &self.unicast
                } else {
                    &self
                        .multicast
                        .iter()
                        .find(|b| b.ep_id == ep_id)
                        .ok_or(TransportError::NoInterface)?
                        .socket
                };
                socket.send_to(&bytes, addr).await?;
            }
        }
        Ok(())
    }

    /// Re-borrow the inbound sender, e.g. to unit-test frame delivery
    /// without a real socket.
    pub fn inbound_tx(&self) -> mpsc::Sender<InboundFrame> {
        self.inbound_tx.clone()
    }
}

fn spawn_reader(socket: Arc<UdpSocket>, ep_id: u32, unicast_marker: Option<()>, tx: mpsc::Sender<InboundFrame>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(ep_id, error = %e, "transport recv failed");
                    continue;
                }
            };
            let tlvs = decode_tlvs(&buf[..n]);
            let src = addr_to_peer(from);
            let dst = unicast_marker.map(|_| src.clone());
            debug!(ep_id, %from, n, "transport recv");
            let frame = InboundFrame { ep_id, src, dst, tlvs };
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    });
}
