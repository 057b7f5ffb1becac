//! Counter accounting for a BPF packet-filtering dataplane.
//!
//! The dataplane keeps two kinds of counters, both written lock-free by the
//! packet path and only read, enumerated or zeroed here:
//!
//! - fixed-layout records per (interface, hook), replicated once per CPU
//! - per-policy-rule packet counts, created and removed by the dataplane as
//!   policy is programmed
//!
//! This crate provides:
//!
//! - [`record`]: the shared record layout and keys
//! - [`AggregateCounters`]: sums and flushes all replicas of a record
//! - [`PolicyRuleCounterMap`]: point-in-time snapshots of the rule counters
//! - [`CountersMgr`]: dump/flush orchestration over the host's interfaces
//! - [`store`]: the backing store trait, an in-memory store, and (on Linux)
//!   the pinned BPF map store
//!
//! # Consistency
//!
//! Reads race with the packet path. A dump is a snapshot, not a transaction:
//! rule entries may appear or disappear between calls, and counters keep
//! moving while the replicas of one record are being summed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bpf_counters::{
//!     CounterIndex, CounterKey, CountersMgr, Hook, MemoryStore, StaticInterfaces,
//! };
//!
//! let store = Arc::new(MemoryStore::new(2));
//! let key = CounterKey::new("eth0", Hook::Ingress);
//! store.attach(key.clone());
//! store.attach(CounterKey::new("eth0", Hook::Egress));
//! store.increment(&key, 0, CounterIndex::TotalPackets, 3);
//! store.increment(&key, 1, CounterIndex::TotalPackets, 4);
//!
//! let mgr = CountersMgr::new(store, 2, Box::new(StaticInterfaces::new(["eth0"]))).unwrap();
//! let counters = mgr.read_interface("eth0").unwrap();
//! assert_eq!(counters.ingress.get(CounterIndex::TotalPackets), 7);
//! ```

pub mod aggregate;
pub mod config;
pub mod counters_mgr;
pub mod error;
pub mod interfaces;
pub mod record;
pub mod render;
pub mod rule_map;
pub mod store;

pub use aggregate::AggregateCounters;
pub use config::CountersConfig;
pub use counters_mgr::{CountersMgr, DumpSummary};
pub use error::{CounterError, CounterResult, StoreError, StoreResult};
pub use interfaces::{InterfaceSource, StaticInterfaces};
#[cfg(target_os = "linux")]
pub use interfaces::SystemInterfaces;
pub use record::{CounterIndex, CounterKey, CounterRecord, Hook, MAX_COUNTER_NUMBER};
pub use render::{InterfaceCounters, OutputFormat};
pub use rule_map::{PolicyRuleCounterKey, PolicyRuleCounterMap, PolicyRuleCounters, RuleAction};
pub use store::{CounterStore, MemoryStore};
#[cfg(target_os = "linux")]
pub use store::PinnedMapStore;
