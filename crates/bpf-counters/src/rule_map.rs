//! Per-policy-rule counter map.
//!
//! Entries are created by the packet path the first time traffic matches a
//! rule on an interface/hook, and removed when the rule or policy goes
//! away. This module only snapshots whatever is live at the time of a dump.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::{CounterError, CounterResult};
use crate::record::Hook;
use crate::store::CounterStore;

/// Verdict of a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
        }
    }

    /// Returns the numeric action id used in the BPF map key.
    pub fn id(&self) -> u8 {
        match self {
            RuleAction::Allow => 0,
            RuleAction::Deny => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(RuleAction::Allow),
            1 => Some(RuleAction::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(RuleAction::Allow),
            "deny" => Ok(RuleAction::Deny),
            other => Err(format!("unknown rule action '{}'", other)),
        }
    }
}

/// Identifies one rule counter entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PolicyRuleCounterKey {
    /// Interface the rule matched on.
    pub iface: String,
    /// Hook the rule matched on.
    pub hook: Hook,
    /// Namespace-qualified policy name (e.g., "default.policy-test").
    pub policy: String,
    /// Position of the rule within the policy's rules for this hook.
    pub rule_index: u32,
    /// Verdict of the rule.
    pub action: RuleAction,
}

impl PolicyRuleCounterKey {
    /// Creates a new rule counter key.
    pub fn new(
        iface: impl Into<String>,
        hook: Hook,
        policy: impl Into<String>,
        rule_index: u32,
        action: RuleAction,
    ) -> Self {
        Self {
            iface: iface.into(),
            hook,
            policy: policy.into(),
            rule_index,
            action,
        }
    }
}

impl fmt::Display for PolicyRuleCounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}#{} {}",
            self.iface, self.hook, self.policy, self.rule_index, self.action
        )
    }
}

/// Point-in-time snapshot of the rule counter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRuleCounters {
    entries: HashMap<PolicyRuleCounterKey, u64>,
}

impl PolicyRuleCounters {
    /// Returns the packet count for `key`, if the entry was live.
    pub fn get(&self, key: &PolicyRuleCounterKey) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&PolicyRuleCounterKey, &u64)> {
        self.entries.iter()
    }

    /// Returns the entries sorted by key, for stable output.
    pub fn sorted(&self) -> Vec<(&PolicyRuleCounterKey, u64)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(k, v)| (k, *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Returns the entries that matched on `iface`.
    pub fn for_interface(&self, iface: &str) -> Self {
        self.filtered(|key| key.iface == iface)
    }

    /// Returns the entries belonging to `policy`.
    pub fn for_policy(&self, policy: &str) -> Self {
        self.filtered(|key| key.policy == policy)
    }

    /// Sum of all packet counts in the snapshot.
    pub fn total_packets(&self) -> u64 {
        self.entries
            .values()
            .fold(0u64, |acc, v| acc.wrapping_add(*v))
    }

    fn filtered<F>(&self, keep: F) -> Self
    where
        F: Fn(&PolicyRuleCounterKey) -> bool,
    {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

impl FromIterator<(PolicyRuleCounterKey, u64)> for PolicyRuleCounters {
    fn from_iter<I: IntoIterator<Item = (PolicyRuleCounterKey, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PolicyRuleCounters {
    type Item = (PolicyRuleCounterKey, u64);
    type IntoIter = std::collections::hash_map::IntoIter<PolicyRuleCounterKey, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Reader for the rule counter map.
pub struct PolicyRuleCounterMap<S> {
    store: S,
}

impl<S: CounterStore> PolicyRuleCounterMap<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Snapshots every live entry, summing per-context values.
    ///
    /// An empty map is a valid result: no policy has matched traffic, or
    /// every matching policy has been removed.
    pub fn dump(&self) -> CounterResult<PolicyRuleCounters> {
        let entries = self
            .store
            .rule_counter_entries()
            .map_err(|e| CounterError::enumeration("rule counters", e))?;

        let snapshot: PolicyRuleCounters = entries
            .into_iter()
            .map(|(key, replicas)| {
                let total = replicas.iter().fold(0u64, |acc, v| acc.wrapping_add(*v));
                (key, total)
            })
            .collect();

        debug!(entries = snapshot.len(), "Dumped rule counter map");
        Ok(snapshot)
    }
}
