//! Counter store backed by pinned BPF per-CPU hash maps.
//!
//! Maps are reopened from their bpffs pin on every call, so a map re-pinned
//! by the dataplane between calls is picked up, and a value size that does
//! not match the shared layout is reported against the key being read.
//!
//! Pinned records are exactly [`MAX_COUNTER_NUMBER`] counters wide; a map
//! with any other value size fails to open with [`StoreError::Layout`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aya::maps::{Map, MapData, MapError, PerCpuHashMap, PerCpuValues};
use aya::Pod;
use nix::net::if_::{if_nameindex, if_nametoindex};
use tracing::warn;

use super::CounterStore;
use crate::config::CountersConfig;
use crate::error::{StoreError, StoreResult};
use crate::record::{CounterKey, Hook, MAX_COUNTER_NUMBER};
use crate::rule_map::{PolicyRuleCounterKey, RuleAction};

/// Bytes reserved for the namespace-qualified policy name in a rule key.
pub const POLICY_NAME_LEN: usize = 64;

/// Key of the fixed counter map, as laid out by the dataplane.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawCounterKey {
    pub ifindex: u32,
    pub hook: u32,
}

/// Key of the rule counter map, as laid out by the dataplane.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawRuleKey {
    pub ifindex: u32,
    pub hook: u8,
    pub action: u8,
    pub pad: [u8; 2],
    pub rule_index: u32,
    /// NUL-padded policy name.
    pub policy: [u8; POLICY_NAME_LEN],
}

// SAFETY: both keys are repr(C), contain only integers and have no
// implicit padding.
unsafe impl Pod for RawCounterKey {}
unsafe impl Pod for RawRuleKey {}

type CounterValues = [u64; MAX_COUNTER_NUMBER];

/// `BPF_EXIST`: update only if the key is present.
const BPF_EXIST: u64 = 2;

impl RawRuleKey {
    /// Encodes `key` for interface index `ifindex`.
    pub fn encode(key: &PolicyRuleCounterKey, ifindex: u32) -> StoreResult<Self> {
        let name = key.policy.as_bytes();
        if name.len() > POLICY_NAME_LEN {
            return Err(StoreError::Layout(format!(
                "policy name '{}' longer than {} bytes",
                key.policy, POLICY_NAME_LEN
            )));
        }
        let mut policy = [0u8; POLICY_NAME_LEN];
        policy[..name.len()].copy_from_slice(name);
        Ok(Self {
            ifindex,
            hook: key.hook.id(),
            action: key.action.id(),
            pad: [0; 2],
            rule_index: key.rule_index,
            policy,
        })
    }

    /// Decodes into a rule counter key, naming the interface `iface`.
    pub fn decode(&self, iface: String) -> StoreResult<PolicyRuleCounterKey> {
        let hook = Hook::from_id(self.hook)
            .ok_or_else(|| StoreError::Layout(format!("unknown hook id {}", self.hook)))?;
        let action = RuleAction::from_id(self.action)
            .ok_or_else(|| StoreError::Layout(format!("unknown action id {}", self.action)))?;
        let end = self
            .policy
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(POLICY_NAME_LEN);
        Ok(PolicyRuleCounterKey {
            iface,
            hook,
            policy: String::from_utf8_lossy(&self.policy[..end]).into_owned(),
            rule_index: self.rule_index,
            action,
        })
    }
}

/// Store reading the dataplane's pinned counter maps.
#[derive(Debug, Clone)]
pub struct PinnedMapStore {
    counters_path: PathBuf,
    rules_path: PathBuf,
}

impl PinnedMapStore {
    /// Creates a store for the map locations in `config`.
    pub fn new(config: &CountersConfig) -> Self {
        Self {
            counters_path: config.counters_map_path(),
            rules_path: config.rule_counters_map_path(),
        }
    }

    fn raw_counter_key(key: &CounterKey) -> StoreResult<RawCounterKey> {
        let ifindex = if_nametoindex(key.iface.as_str())
            .map_err(|e| StoreError::NotFound(format!("interface {}: {}", key.iface, e)))?;
        Ok(RawCounterKey {
            ifindex,
            hook: u32::from(key.hook.id()),
        })
    }
}

fn open_per_cpu_hash<K: Pod, V: Pod>(path: &Path) -> StoreResult<PerCpuHashMap<MapData, K, V>> {
    let data = MapData::from_pin(path)
        .map_err(|e| StoreError::backend("open", format!("{}: {}", path.display(), e)))?;
    PerCpuHashMap::try_from(Map::PerCpuHashMap(data)).map_err(|e| match e {
        MapError::InvalidKeySize { size, expected } => StoreError::Layout(format!(
            "{}: key size {}, expected {}",
            path.display(),
            size,
            expected
        )),
        MapError::InvalidValueSize { size, expected } => StoreError::Layout(format!(
            "{}: value size {}, expected {}",
            path.display(),
            size,
            expected
        )),
        other => StoreError::backend("open", other),
    })
}

fn interface_names() -> HashMap<u32, String> {
    match if_nameindex() {
        Ok(list) => list
            .iter()
            .map(|iface| (iface.index(), iface.name().to_string_lossy().into_owned()))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to list interfaces, rule keys will use ifindex");
            HashMap::new()
        }
    }
}

fn interface_name(names: &HashMap<u32, String>, ifindex: u32) -> String {
    names
        .get(&ifindex)
        .cloned()
        .unwrap_or_else(|| format!("if{}", ifindex))
}

impl CounterStore for PinnedMapStore {
    fn read_record_replicas(&self, key: &CounterKey) -> StoreResult<Vec<Vec<u64>>> {
        let raw = Self::raw_counter_key(key)?;
        let map = open_per_cpu_hash::<RawCounterKey, CounterValues>(&self.counters_path)?;
        match map.get(&raw, 0) {
            Ok(values) => Ok(values.iter().map(|v| v.to_vec()).collect()),
            Err(MapError::KeyNotFound) => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(StoreError::backend("lookup", e)),
        }
    }

    fn zero_record(&self, key: &CounterKey, replicas: usize) -> StoreResult<()> {
        let raw = Self::raw_counter_key(key)?;
        let mut map = open_per_cpu_hash::<RawCounterKey, CounterValues>(&self.counters_path)?;
        match map.get(&raw, 0) {
            Ok(_) => {}
            Err(MapError::KeyNotFound) => return Err(StoreError::NotFound(key.to_string())),
            Err(e) => return Err(StoreError::backend("lookup", e)),
        }

        // One update with every CPU slot zeroed.
        let zeros = PerCpuValues::try_from(vec![[0u64; MAX_COUNTER_NUMBER]; replicas])
            .map_err(|e| StoreError::Layout(format!("{} replicas: {}", replicas, e)))?;
        map.insert(raw, zeros, BPF_EXIST)
            .map_err(|e| StoreError::backend("update", e))
    }

    fn rule_counter_entries(&self) -> StoreResult<Vec<(PolicyRuleCounterKey, Vec<u64>)>> {
        let map = open_per_cpu_hash::<RawRuleKey, u64>(&self.rules_path)?;
        let names = interface_names();

        let mut entries = Vec::new();
        for item in map.iter() {
            let (raw, values) = match item {
                Ok(item) => item,
                // Deleted between key iteration and lookup.
                Err(MapError::KeyNotFound) => continue,
                Err(e) => return Err(StoreError::backend("iterate", e)),
            };
            entries.push((raw.decode(interface_name(&names, raw.ifindex))?, values.to_vec()));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_raw_key_sizes() {
        assert_eq!(std::mem::size_of::<RawCounterKey>(), 8);
        assert_eq!(std::mem::size_of::<RawRuleKey>(), 12 + POLICY_NAME_LEN);
    }

    #[test]
    fn test_rule_key_encode_decode() {
        let key = PolicyRuleCounterKey::new(
            "cali12345",
            Hook::Egress,
            "default.policy-test",
            3,
            RuleAction::Allow,
        );
        let raw = RawRuleKey::encode(&key, 42).unwrap();
        assert_eq!(raw.ifindex, 42);
        assert_eq!(raw.hook, 1);
        assert_eq!(raw.decode("cali12345".to_string()).unwrap(), key);
    }

    #[test]
    fn test_rule_key_rejects_long_policy_name() {
        let key = PolicyRuleCounterKey::new(
            "eth0",
            Hook::Ingress,
            "x".repeat(POLICY_NAME_LEN + 1),
            0,
            RuleAction::Deny,
        );
        assert!(matches!(
            RawRuleKey::encode(&key, 1),
            Err(StoreError::Layout(_))
        ));
    }

    #[test]
    fn test_rule_key_decode_rejects_unknown_ids() {
        let key = PolicyRuleCounterKey::new("eth0", Hook::Ingress, "default.p", 0, RuleAction::Deny);
        let mut raw = RawRuleKey::encode(&key, 1).unwrap();
        raw.action = 9;
        assert!(raw.decode("eth0".to_string()).is_err());
    }

    #[test]
    fn test_unknown_interface_is_not_found() {
        let store = PinnedMapStore::new(&CountersConfig::default());
        let err = store
            .read_record_replicas(&CounterKey::new("no-such-if0", Hook::Ingress))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_missing_pin_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_per_cpu_hash::<RawCounterKey, CounterValues>(&dir.path().join("absent"))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Backend { .. }), "got {err:?}");
    }

    #[test]
    fn test_flush_without_pinned_map_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = CountersConfig {
            pin_dir: dir.path().to_path_buf(),
            ..CountersConfig::default()
        };
        let store = PinnedMapStore::new(&config);
        let key = CounterKey::new("lo", Hook::Ingress);

        let err = store.zero_record(&key, 1).unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }), "got {err:?}");
        assert!(!config.counters_map_path().exists());
    }

    #[test]
    fn test_unresolved_ifindex_name() {
        let mut names = HashMap::new();
        names.insert(1, "lo".to_string());
        assert_eq!(interface_name(&names, 1), "lo");
        assert_eq!(interface_name(&names, 7), "if7");
    }
}
