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

//! §8 concrete scenario 4: SHSP dict propagation and retraction between
//! two engines.

use std::collections::BTreeMap;

use dncp::profile::shsp::Shsp;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

fn exchange(a: &mut Shsp, ep_a: u32, b: &mut Shsp, ep_b: u32, now: f64, rng: &mut StdRng) {
    for frame in a.engine.take_outbox() {
        b.engine
            .ext_received(ep_b, b"from-a".to_vec(), frame.dst.clone(), frame.tlvs, now, rng);
    }
    for frame in b.engine.take_outbox() {
        a.engine
            .ext_received(ep_a, b"from-b".to_vec(), frame.dst.clone(), frame.tlvs, now, rng);
    }
}

fn run_until_consistent(a: &mut Shsp, ep_a: u32, b: &mut Shsp, ep_b: u32, now: &mut f64, rng: &mut StdRng) -> bool {
    for _ in 0..2000 {
        *now += 0.05;
        a.engine.run(*now, rng);
        b.engine.run(*now, rng);
        exchange(a, ep_a, b, ep_b, *now, rng);
        if a.engine.is_consistent() && b.engine.is_consistent() {
            return true;
        }
    }
    false
}

#[test]
fn dict_entries_propagate_and_retract() {
    let mut r = StdRng::seed_from_u64(5);
    let mut a = Shsp::new(Some(vec![1, 0, 0, 0]), None, 0.0, &mut r);
    let mut b = Shsp::new(Some(vec![2, 0, 0, 0]), None, 0.0, &mut r);
    let ep_a = a.engine.create_ep("link", 0.0, &mut r).unwrap();
    let ep_b = b.engine.create_ep("link", 0.0, &mut r).unwrap();
    a.engine.ep_ready(ep_a, true);
    b.engine.ep_ready(ep_b, true);

    let mut now = 0.0;
    let mut d = BTreeMap::new();
    d.insert("foo".to_string(), Some(Value::from(1)));
    d.insert("bar".to_string(), Some(Value::from("baz")));
    a.update_dict(d, now, &mut r);

    assert!(
        run_until_consistent(&mut a, ep_a, &mut b, ep_b, &mut now, &mut r),
        "A and B failed to converge after A published its dict"
    );

    let seen = b.get_dict(false);
    assert_eq!(seen.len(), 1, "B should see exactly one node's dict");
    let entries = seen.values().next().unwrap();
    assert_eq!(entries.get("foo"), Some(&Value::from(1)));
    assert_eq!(entries.get("bar"), Some(&Value::from("baz")));

    a.set_dict(BTreeMap::new(), now, &mut r);
    assert!(
        run_until_consistent(&mut a, ep_a, &mut b, ep_b, &mut now, &mut r),
        "A and B failed to converge after A cleared its dict"
    );

    let seen_after_clear = b.get_dict(false);
    assert!(seen_after_clear.is_empty(), "B's dict view should be empty after A retracts everything");
}
