//! Backing store abstraction for counter records and rule counters.
//!
//! The store is shared with the packet path, which creates and increments
//! entries concurrently. This crate only reads, enumerates, and zeroes.
//!
//! - [`MemoryStore`]: in-process store used by tests and the simulated dataplane
//! - [`PinnedMapStore`]: pinned BPF per-CPU maps on bpffs (Linux only)

mod memory;
#[cfg(target_os = "linux")]
mod pinned;

pub use memory::MemoryStore;
#[cfg(target_os = "linux")]
pub use pinned::{PinnedMapStore, RawCounterKey, RawRuleKey, POLICY_NAME_LEN};

use crate::error::StoreResult;
use crate::record::CounterKey;
use crate::rule_map::PolicyRuleCounterKey;

/// Key/value interface over replicated counter records and rule counters.
///
/// Implementations must tolerate concurrent mutation by the producer and
/// never assume exclusive access.
pub trait CounterStore: Send + Sync {
    /// Returns every per-context replica of the record for `key`.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if the
    /// store has no entry for the key.
    fn read_record_replicas(&self, key: &CounterKey) -> StoreResult<Vec<Vec<u64>>>;

    /// Zeroes all `replicas` replicas of the record for `key`.
    ///
    /// Only zeroes are ever written; values the producer keeps adding on
    /// other contexts are never written back. A backend that can zero
    /// replicas independently reports a partial flush as
    /// [`StoreError::PartialWrite`](crate::StoreError::PartialWrite).
    fn zero_record(&self, key: &CounterKey, replicas: usize) -> StoreResult<()>;

    /// Lists every live rule counter entry with its per-context values.
    fn rule_counter_entries(&self) -> StoreResult<Vec<(PolicyRuleCounterKey, Vec<u64>)>>;
}

impl<S: CounterStore + ?Sized> CounterStore for std::sync::Arc<S> {
    fn read_record_replicas(&self, key: &CounterKey) -> StoreResult<Vec<Vec<u64>>> {
        (**self).read_record_replicas(key)
    }

    fn zero_record(&self, key: &CounterKey, replicas: usize) -> StoreResult<()> {
        (**self).zero_record(key, replicas)
    }

    fn rule_counter_entries(&self) -> StoreResult<Vec<(PolicyRuleCounterKey, Vec<u64>)>> {
        (**self).rule_counter_entries()
    }
}
