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

//! §6 `SystemInterface` contract: the clock, timer scheduler, and opaque
//! per-endpoint transport an application supplies to drive a
//! [`crate::engine::Dncp`].
//!
//! The engine never holds one of these (see `DESIGN.md`'s open-question
//! #6): `Dncp::run`/`ext_received` take `now` explicitly and collect
//! outbound frames into an outbox instead of calling back into a send
//! primitive. A `SystemInterface` implementation is how the owning shell
//! (`crate::transport`, `src/bin/hncpd.rs`, or a test harness) actually
//! decides when to call those methods and where the bytes go.

use crate::engine::PeerAddr;
use crate::tlv::Tlv;

/// A scheduled, cancelable one-shot wake (§5: "Timers are one-shot and
/// cancelable. A cancelled timer must not fire.").
pub trait TimerHandle {
    /// Cancel this timer. A no-op if it already fired.
    fn cancel(self: Box<Self>);
}

/// §6's external collaborator: `time()`, `schedule(dt, ...)`, `send(...)`.
///
/// `schedule` does not carry a callback closure (unlike the source this is
/// modeled on, which stores `cb` on a `Timeout` and invokes it directly):
/// Rust's ownership rules make a scheduler holding a closure that itself
/// re-borrows the engine awkward without interior mutability the rest of
/// this crate avoids. Instead `schedule` tags the wake with `token` and the
/// implementation is responsible for delivering that token back to
/// whatever drives the run loop (a channel, a self-pipe per §5) so the
/// owner can call `Dncp::run` again.
pub trait SystemInterface {
    /// Concrete timer handle type this implementation hands back.
    type Timer: TimerHandle;

    /// Monotonic-ish local clock, in seconds (§6).
    fn now(&self) -> f64;

    /// Schedule a wake `dt` seconds from now, tagged `token`.
    fn schedule(&mut self, dt: f64, token: u64) -> Self::Timer;

    /// Transmit one frame. `dst == None` means multicast on `ep_id`, else
    /// unicast to the opaque endpoint token previously observed as a `src`
    /// (§6).
    fn send(&mut self, ep_id: u32, src: Option<PeerAddr>, dst: Option<PeerAddr>, tlvs: &[Tlv]);
}

#[cfg(test)]
pub(crate) mod sim {
    //! A minimal in-process `SystemInterface` used by `system.rs`'s own
    //! unit tests. The richer deterministic network simulator used by the
    //! integration tests lives in `tests/support/mod.rs` (it drives
    //! `Dncp` directly rather than through this trait, since a test
    //! network needs to inspect delivery between many nodes at once).

    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    pub struct SimTimer {
        cancelled: Rc<Cell<bool>>,
    }

    impl TimerHandle for SimTimer {
        fn cancel(self: Box<Self>) {
            self.cancelled.set(true);
        }
    }

    /// Records every `send` call and every still-pending (token, fire_at);
    /// cancellation flips a shared flag `fire_due` checks.
    pub struct SimSystem {
        pub now: f64,
        pub sent: Vec<(u32, Option<PeerAddr>, Option<PeerAddr>, Vec<Tlv>)>,
        pending: Vec<(f64, u64, Rc<Cell<bool>>)>,
    }

    impl SimSystem {
        pub fn new(now: f64) -> Self {
            SimSystem {
                now,
                sent: Vec::new(),
                pending: Vec::new(),
            }
        }

        /// Tokens whose deadline has passed and whose timer wasn't
        /// cancelled, removing them from the pending set.
        pub fn fire_due(&mut self, now: f64) -> Vec<u64> {
            self.now = now;
            let mut fired = Vec::new();
            self.pending.retain(|(t, token, cancelled)| {
                if *t <= now {
                    if !cancelled.get() {
                        fired.push(*token);
                    }
                    false
                } else {
                    true
                }
            });
            fired
        }
    }

    impl SystemInterface for SimSystem {
        type Timer = SimTimer;

        fn now(&self) -> f64 {
            self.now
        }

        fn schedule(&mut self, dt: f64, token: u64) -> SimTimer {
            let cancelled = Rc::new(Cell::new(false));
            self.pending.push((self.now + dt, token, cancelled.clone()));
            SimTimer { cancelled }
        }

        fn send(&mut self, ep_id: u32, src: Option<PeerAddr>, dst: Option<PeerAddr>, tlvs: &[Tlv]) {
            self.sent.push((ep_id, src, dst, tlvs.to_vec()));
        }
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let mut sys = SimSystem::new(0.0);
        let handle = sys.schedule(1.0, 42);
        handle.cancel();
        assert!(sys.fire_due(2.0).is_empty());
    }

    #[test]
    fn uncancelled_timer_fires_its_token() {
        let mut sys = SimSystem::new(0.0);
        let _handle = sys.schedule(1.0, 7);
        assert_eq!(sys.fire_due(2.0), vec![7]);
        assert!(sys.fire_due(3.0).is_empty());
    }

    #[test]
    fn send_records_the_frame() {
        let mut sys = SimSystem::new(0.0);
        sys.send(1, None, None, &[Tlv::ReqNetState]);
        assert_eq!(sys.sent.len(), 1);
        assert_eq!(sys.sent[0].0, 1);
    }
}
