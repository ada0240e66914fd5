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

//! RFC-6206-flavored adaptive suppression timer (§4.3).

use rand::Rng;

/// One Trickle instance's mutable state.
///
/// Ordering note (§9 open question): when both interval-doubling and
/// keepalive-forcing are due in the same run, this implementation doubles
/// first, then forces the keepalive, then evaluates the consistency-gated
/// send — see `DESIGN.md` for why that ordering was kept.
#[derive(Debug, Clone)]
pub struct Trickle {
    i: f64,
    i_min: f64,
    i_max: f64,
    k: u32,
    c: u32,
    send_time: f64,
    interval_end_time: f64,
    last_sent: f64,
}

/// Outcome of one `Trickle::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrickleRun {
    /// How many times a send was triggered this run (0, 1, or more if a
    /// keepalive force and a gated send both fired in the same pass).
    pub sends: u32,
    /// How many times the consistency-gated send was suppressed (`c >= K`)
    /// this run — a keepalive-forced send never counts as a suppression.
    pub suppressed: u32,
    /// Absolute time at which this timer should next be polled.
    pub next_wake: f64,
}

impl Trickle {
    pub fn new(now: f64, i_min: f64, i_max: f64, k: u32, rng: &mut impl Rng) -> Self {
        let mut t = Trickle {
            i: i_min,
            i_min,
            i_max,
            k,
            c: 0,
            send_time: now,
            interval_end_time: now,
            last_sent: now,
        };
        t.set_i(0.0, now, rng);
        t
    }

    /// Clamp `i` to `[i_min, i_max]`, reroll the random send point within
    /// the new interval, and reset the consistency counter.
    pub fn set_i(&mut self, i: f64, now: f64, rng: &mut impl Rng) {
        self.i = i.max(self.i_min).min(self.i_max);
        let u: f64 = rng.gen_range(0.0..1.0);
        self.send_time = now + self.i * (1.0 + u) / 2.0;
        self.interval_end_time = now + self.i;
        self.c = 0;
    }

    /// A peer reported a NetState hash equal to ours: bump the consistency
    /// counter so a gated send at `send_time` is more likely to suppress.
    pub fn note_consistent(&mut self) {
        self.c += 1;
    }

    /// Record that a send happened outside of `run` (e.g. an immediate
    /// reply to a `ReqNetState`), so the next keepalive isn't forced early.
    pub fn mark_sent(&mut self, now: f64) {
        self.last_sent = now;
    }

    pub fn next_wake(&self) -> f64 {
        self.send_time.min(self.interval_end_time)
    }

    /// Run one tick. `keepalive_interval` is the profile/endpoint's
    /// keepalive interval in the same time base as `now`.
    pub fn run(&mut self, now: f64, keepalive_interval: f64, rng: &mut impl Rng) -> TrickleRun {
        let mut sends = 0u32;
        let mut suppressed = 0u32;
        loop {
            if now >= self.interval_end_time {
                self.set_i(self.i * 2.0, now, rng);
                continue;
            }
            let ka_time = self.last_sent + keepalive_interval;
            if now >= ka_time {
                sends += 1;
                self.last_sent = now;
                continue;
            }
            if now >= self.send_time {
                if self.c < self.k {
                    sends += 1;
                    self.last_sent = now;
                } else {
                    suppressed += 1;
                }
                self.send_time = self.interval_end_time;
            }
            break;
        }
        let next_wake = (self.last_sent + keepalive_interval)
            .min(self.send_time)
            .min(self.interval_end_time);
        TrickleRun {
            sends,
            suppressed,
            next_wake,
        }
    }
}
