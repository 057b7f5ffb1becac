//! In-process counter store.
//!
//! Besides the [`CounterStore`] view, this exposes the producer-side
//! operations (attach, increment, create and remove rule entries) and fault
//! injection, so the packet path can be simulated without a kernel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::CounterStore;
use crate::error::{StoreError, StoreResult};
use crate::record::{CounterIndex, CounterKey, MAX_COUNTER_NUMBER};
use crate::rule_map::PolicyRuleCounterKey;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<CounterKey, Vec<Vec<u64>>>,
    rules: HashMap<PolicyRuleCounterKey, Vec<u64>>,
    failing_replicas: HashSet<(CounterKey, usize)>,
    fail_enumeration: bool,
}

/// Counter store held in memory, replicated `replicas` times per record.
#[derive(Debug)]
pub struct MemoryStore {
    replicas: usize,
    inner: RwLock<Inner>,
    accesses: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store with the given number of execution contexts.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            inner: RwLock::new(Inner::default()),
            accesses: AtomicUsize::new(0),
        }
    }

    /// Returns the number of replicas new entries are created with.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Creates a zeroed record for `key`, as the producer does on attach.
    pub fn attach(&self, key: CounterKey) {
        let replicas = vec![vec![0; MAX_COUNTER_NUMBER]; self.replicas];
        self.inner.write().records.entry(key).or_insert(replicas);
    }

    /// Removes the record for `key`, as on detach.
    pub fn detach(&self, key: &CounterKey) {
        self.inner.write().records.remove(key);
    }

    /// Replaces the raw replicas stored for `key`.
    pub fn insert_record(&self, key: CounterKey, replicas: Vec<Vec<u64>>) {
        self.inner.write().records.insert(key, replicas);
    }

    /// Increments one counter of one replica. Returns false if the record
    /// or replica does not exist.
    pub fn increment(&self, key: &CounterKey, replica: usize, index: CounterIndex, by: u64) -> bool {
        let mut inner = self.inner.write();
        match inner
            .records
            .get_mut(key)
            .and_then(|replicas| replicas.get_mut(replica))
            .and_then(|values| values.get_mut(index.position()))
        {
            Some(value) => {
                *value = value.wrapping_add(by);
                true
            }
            None => false,
        }
    }

    /// Increments a rule counter on one replica, creating the entry lazily.
    pub fn increment_rule(&self, key: PolicyRuleCounterKey, replica: usize, by: u64) {
        let replicas = self.replicas.max(replica + 1);
        let mut inner = self.inner.write();
        let values = inner
            .rules
            .entry(key)
            .or_insert_with(|| vec![0; replicas]);
        if values.len() <= replica {
            values.resize(replica + 1, 0);
        }
        values[replica] = values[replica].wrapping_add(by);
    }

    /// Removes rule entries for which `keep` returns false. Returns how many
    /// were removed.
    pub fn retain_rules<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&PolicyRuleCounterKey) -> bool,
    {
        let mut inner = self.inner.write();
        let before = inner.rules.len();
        inner.rules.retain(|key, _| keep(key));
        before - inner.rules.len()
    }

    /// Returns the keys of all live rule entries.
    pub fn rule_keys(&self) -> Vec<PolicyRuleCounterKey> {
        self.inner.read().rules.keys().cloned().collect()
    }

    /// Makes zeroing of one replica of `key` fail.
    pub fn fail_zeroing(&self, key: CounterKey, replica: usize) {
        self.inner.write().failing_replicas.insert((key, replica));
    }

    /// Makes rule enumeration fail (or succeed again).
    pub fn fail_enumeration(&self, fail: bool) {
        self.inner.write().fail_enumeration = fail;
    }

    /// Returns how many store calls have been made through [`CounterStore`].
    pub fn access_count(&self) -> usize {
        self.accesses.load(Ordering::Relaxed)
    }
}

impl CounterStore for MemoryStore {
    fn read_record_replicas(&self, key: &CounterKey) -> StoreResult<Vec<Vec<u64>>> {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        self.inner
            .read()
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn zero_record(&self, key: &CounterKey, replicas: usize) -> StoreResult<()> {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let stored = inner
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.len() != replicas {
            return Err(StoreError::Layout(format!(
                "{} has {} replicas, expected {}",
                key,
                stored.len(),
                replicas
            )));
        }

        let mut failed = Vec::new();
        for (idx, values) in stored.iter_mut().enumerate() {
            if inner.failing_replicas.contains(&(key.clone(), idx)) {
                failed.push(idx);
            } else {
                values.iter_mut().for_each(|v| *v = 0);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StoreError::PartialWrite {
                reason: format!("replica {} of {} is read-only", failed[0], key),
                failed_replicas: failed,
                total: replicas,
            })
        }
    }

    fn rule_counter_entries(&self) -> StoreResult<Vec<(PolicyRuleCounterKey, Vec<u64>)>> {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read();
        if inner.fail_enumeration {
            return Err(StoreError::backend("iterate", "rule counter map unavailable"));
        }
        Ok(inner
            .rules
            .iter()
            .map(|(key, values)| (key.clone(), values.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Hook;
    use crate::rule_map::RuleAction;
    use pretty_assertions::assert_eq;

    fn rule_key(action: RuleAction) -> PolicyRuleCounterKey {
        PolicyRuleCounterKey::new("eth0", Hook::Ingress, "default.policy-test", 0, action)
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let store = MemoryStore::new(2);
        let err = store
            .read_record_replicas(&CounterKey::new("eth0", Hook::Ingress))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.access_count(), 1);
    }

    #[test]
    fn test_attach_and_increment() {
        let store = MemoryStore::new(2);
        let key = CounterKey::new("eth0", Hook::Ingress);
        store.attach(key.clone());

        assert!(store.increment(&key, 1, CounterIndex::TotalPackets, 3));
        assert!(!store.increment(&key, 5, CounterIndex::TotalPackets, 1));

        let replicas = store.read_record_replicas(&key).unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0][0], 0);
        assert_eq!(replicas[1][0], 3);
    }

    #[test]
    fn test_zero_record_keeps_width() {
        let store = MemoryStore::new(2);
        let key = CounterKey::new("eth0", Hook::Egress);
        store.insert_record(key.clone(), vec![vec![1; 10], vec![2; 10]]);

        store.zero_record(&key, 2).unwrap();
        assert_eq!(
            store.read_record_replicas(&key).unwrap(),
            vec![vec![0; 10], vec![0; 10]]
        );
    }

    #[test]
    fn test_zero_record_replica_mismatch() {
        let store = MemoryStore::new(2);
        let key = CounterKey::new("eth0", Hook::Egress);
        store.insert_record(key.clone(), vec![vec![5; 8]]);

        let err = store.zero_record(&key, 2).unwrap_err();
        assert!(matches!(err, StoreError::Layout(_)));
        assert_eq!(store.read_record_replicas(&key).unwrap(), vec![vec![5; 8]]);
        assert!(matches!(
            store.zero_record(&CounterKey::new("eth9", Hook::Egress), 2),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_rule_entries_lazy_create_and_retain() {
        let store = MemoryStore::new(2);
        assert!(store.rule_counter_entries().unwrap().is_empty());

        store.increment_rule(rule_key(RuleAction::Deny), 0, 1);
        store.increment_rule(rule_key(RuleAction::Deny), 1, 2);
        store.increment_rule(rule_key(RuleAction::Allow), 0, 1);

        let mut entries = store.rule_counter_entries().unwrap();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, vec![1, 2]);

        let removed = store.retain_rules(|k| k.action != RuleAction::Deny);
        assert_eq!(removed, 1);
        assert_eq!(store.rule_keys(), vec![rule_key(RuleAction::Allow)]);
    }

    #[test]
    fn test_fault_injection() {
        let store = MemoryStore::new(2);
        let key = CounterKey::new("eth0", Hook::Ingress);
        store.attach(key.clone());
        store.increment(&key, 0, CounterIndex::TotalPackets, 4);
        store.increment(&key, 1, CounterIndex::TotalPackets, 6);
        store.fail_zeroing(key.clone(), 1);

        match store.zero_record(&key, 2) {
            Err(StoreError::PartialWrite {
                failed_replicas,
                total,
                ..
            }) => {
                assert_eq!(failed_replicas, vec![1]);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let replicas = store.read_record_replicas(&key).unwrap();
        assert_eq!(replicas[0][0], 0);
        assert_eq!(replicas[1][0], 6);

        store.fail_enumeration(true);
        assert!(store.rule_counter_entries().is_err());
        store.fail_enumeration(false);
        assert!(store.rule_counter_entries().is_ok());
    }
}
