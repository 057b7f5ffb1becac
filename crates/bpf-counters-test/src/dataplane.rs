//! Simulated packet path
//!
//! Stands in for the kernel programs: it owns the counter store, attaches
//! per-interface records, evaluates policy on each hook a packet crosses and
//! bumps the fixed and per-rule counters the way the BPF programs would.
//!
//! Policy changes reach the packet path after the programming delay, and
//! rule counter entries that no longer belong to a programmed rule are only
//! removed after a further convergence delay. Both run on Tokio tasks, so
//! callers must poll (see [`crate::eventually`]) rather than assert right
//! after a change. With a zero programming delay, changes apply on return.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use bpf_counters::{
    CounterIndex, CounterKey, CounterResult, CounterStore, CountersMgr, Hook, MemoryStore,
    PolicyRuleCounterKey, RuleAction,
};

use crate::fixtures::{Flow, PolicySpec};

/// Result of sending packets along a flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Packets that crossed both hooks
    pub delivered: u64,
    /// Packets dropped by a deny rule
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct DataplaneState {
    workloads: BTreeSet<String>,
    /// Applied policies by qualified name, evaluated in name order.
    policies: BTreeMap<String, PolicySpec>,
    conntrack: HashSet<Flow>,
    next_replica: usize,
}

impl DataplaneState {
    /// First rule that applies on `hook`, with its policy and index.
    fn first_rule(&self, hook: Hook) -> Option<(&str, u32, RuleAction)> {
        self.policies.iter().find_map(|(name, policy)| {
            policy
                .rules(hook)
                .first()
                .map(|action| (name.as_str(), 0, *action))
        })
    }

    /// Whether `key` belongs to a rule that is currently programmed.
    fn is_programmed(&self, key: &PolicyRuleCounterKey) -> bool {
        if !self.workloads.contains(&key.iface) {
            return false;
        }
        self.policies
            .get(&key.policy)
            .and_then(|policy| policy.rules(key.hook).get(key.rule_index as usize))
            .is_some_and(|action| *action == key.action)
    }
}

#[derive(Debug)]
enum PolicyChange {
    Apply(PolicySpec),
    Delete(String),
}

impl PolicyChange {
    fn commit(self, state: &mut DataplaneState) {
        match self {
            PolicyChange::Apply(policy) => {
                let name = policy.qualified_name();
                info!(policy = %name, "Policy programmed");
                state.policies.insert(name, policy);
            }
            PolicyChange::Delete(name) => {
                info!(policy = %name, "Policy removed");
                state.policies.remove(&name);
            }
        }
    }
}

/// In-process dataplane writing into a [`MemoryStore`]
pub struct SimulatedDataplane {
    store: Arc<MemoryStore>,
    state: Arc<Mutex<DataplaneState>>,
    programming_delay: Duration,
    convergence_delay: Duration,
}

impl SimulatedDataplane {
    /// Create a dataplane with `replicas` execution contexts
    pub fn new(replicas: usize, convergence_delay: Duration) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(replicas)),
            state: Arc::new(Mutex::new(DataplaneState::default())),
            programming_delay: Duration::ZERO,
            convergence_delay,
        }
    }

    /// Delay policy changes by `delay` before they reach the packet path
    pub fn with_programming_delay(mut self, delay: Duration) -> Self {
        self.programming_delay = delay;
        self
    }

    /// The backing store, shared with readers
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Build a counters manager over this dataplane's store and workloads
    pub fn manager(&self) -> CounterResult<CountersMgr> {
        let store: Arc<dyn CounterStore> = self.store();
        let state = Arc::clone(&self.state);
        let interfaces = move || -> CounterResult<Vec<String>> {
            Ok(state.lock().workloads.iter().cloned().collect())
        };
        CountersMgr::new(store, self.store.replicas(), Box::new(interfaces))
    }

    /// Attach the programs, and their counter records, to a workload interface
    pub fn add_workload(&self, iface: &str) {
        for hook in Hook::ALL {
            self.store.attach(CounterKey::new(iface, hook));
        }
        self.state.lock().workloads.insert(iface.to_string());
        debug!(iface, "Workload attached");
    }

    /// Detach a workload; its records and rule counters go with it
    pub fn remove_workload(&self, iface: &str) {
        let mut state = self.state.lock();
        state.workloads.remove(iface);
        state
            .conntrack
            .retain(|flow| flow.src_iface != iface && flow.dst_iface != iface);
        drop(state);

        for hook in Hook::ALL {
            self.store.detach(&CounterKey::new(iface, hook));
        }
        self.store.retain_rules(|key| key.iface != iface);
        debug!(iface, "Workload detached");
    }

    /// Create or replace a policy
    ///
    /// Must be called from within a Tokio runtime.
    pub fn apply_policy(&self, policy: PolicySpec) {
        self.program(PolicyChange::Apply(policy));
    }

    /// Delete a policy by qualified name; false if it is not programmed
    ///
    /// Must be called from within a Tokio runtime.
    pub fn delete_policy(&self, qualified_name: &str) -> bool {
        let known = self.state.lock().policies.contains_key(qualified_name);
        if known {
            self.program(PolicyChange::Delete(qualified_name.to_string()));
        }
        known
    }

    /// Whether the rule behind `key` is programmed on its interface
    pub fn is_programmed(&self, key: &PolicyRuleCounterKey) -> bool {
        self.state.lock().is_programmed(key)
    }

    /// Send `packets` along `flow`: ingress on the source interface, then
    /// egress on the destination interface
    ///
    /// Only packets of a flow without a conntrack entry are checked against
    /// policy; a delivered packet creates the entry.
    pub fn send(&self, flow: &Flow, packets: u64) -> Delivery {
        let mut state = self.state.lock();
        let mut delivery = Delivery::default();
        let path = [
            (flow.src_iface.as_str(), Hook::Ingress),
            (flow.dst_iface.as_str(), Hook::Egress),
        ];

        for _ in 0..packets {
            let replica = state.next_replica;
            state.next_replica = (replica + 1) % self.store.replicas().max(1);
            let established = state.conntrack.contains(flow);

            let mut dropped = false;
            for (iface, hook) in path {
                let key = CounterKey::new(iface, hook);
                if !self.store.increment(&key, replica, CounterIndex::TotalPackets, 1) {
                    continue;
                }
                if established {
                    continue;
                }
                let Some((policy, rule_index, action)) = state.first_rule(hook) else {
                    continue;
                };
                let rule_key = PolicyRuleCounterKey::new(iface, hook, policy, rule_index, action);
                self.store.increment_rule(rule_key, replica, 1);

                match action {
                    RuleAction::Allow => {
                        self.store
                            .increment(&key, replica, CounterIndex::AcceptedByPolicy, 1);
                    }
                    RuleAction::Deny => {
                        self.store
                            .increment(&key, replica, CounterIndex::DroppedByPolicy, 1);
                        dropped = true;
                        break;
                    }
                }
            }

            if dropped {
                delivery.dropped += 1;
            } else {
                delivery.delivered += 1;
                state.conntrack.insert(flow.clone());
            }
        }

        debug!(?flow, ?delivery, "Packets sent");
        delivery
    }

    /// Send `packets` too short to parse into `iface`'s ingress hook
    pub fn send_short(&self, iface: &str, packets: u64) {
        let key = CounterKey::new(iface, Hook::Ingress);
        let mut state = self.state.lock();
        for _ in 0..packets {
            let replica = state.next_replica;
            state.next_replica = (replica + 1) % self.store.replicas().max(1);
            self.store
                .increment(&key, replica, CounterIndex::TotalPackets, 1);
            self.store
                .increment(&key, replica, CounterIndex::ErrShortPacket, 1);
        }
    }

    /// Forget all conntrack entries
    pub fn flush_conntrack(&self) {
        self.state.lock().conntrack.clear();
    }

    fn program(&self, change: PolicyChange) {
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let programming_delay = self.programming_delay;
        let convergence_delay = self.convergence_delay;

        if programming_delay.is_zero() {
            change.commit(&mut state.lock());
            tokio::spawn(remove_stale_rules(store, state, convergence_delay));
            return;
        }

        tokio::spawn(async move {
            tokio::time::sleep(programming_delay).await;
            change.commit(&mut state.lock());
            remove_stale_rules(store, state, convergence_delay).await;
        });
    }
}

async fn remove_stale_rules(
    store: Arc<MemoryStore>,
    state: Arc<Mutex<DataplaneState>>,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let state = state.lock();
    let removed = store.retain_rules(|key| state.is_programmed(key));
    if removed > 0 {
        debug!(removed, "Removed stale rule counters");
    }
}
