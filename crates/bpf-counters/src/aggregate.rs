//! Aggregate reader/writer for replicated counter records.
//!
//! One logical record is backed by one physical replica per execution
//! context. Reads sum every replica; flushes zero every replica.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{CounterError, CounterResult};
use crate::record::{CounterKey, CounterRecord, MAX_COUNTER_NUMBER};
use crate::store::CounterStore;

/// Last aggregate seen per key, for monotonicity diagnostics.
#[derive(Debug, Default)]
struct Baselines {
    /// Bumped by every flush and every dropped baseline. A read only
    /// records its result if the epoch did not move while it was reading.
    epoch: u64,
    records: HashMap<CounterKey, CounterRecord>,
}

/// Reads and flushes fixed counter records across all replicas.
pub struct AggregateCounters<S> {
    store: S,
    replicas: usize,
    baselines: Mutex<Baselines>,
    anomalies: AtomicU64,
}

impl<S: CounterStore> AggregateCounters<S> {
    /// Creates a reader over `store` with `replicas` execution contexts.
    ///
    /// Fails with [`CounterError::InvalidArgument`] if `replicas` is zero.
    pub fn new(store: S, replicas: usize) -> CounterResult<Self> {
        if replicas == 0 {
            return Err(CounterError::invalid_argument(
                "replica count must be at least 1",
            ));
        }
        Ok(Self {
            store,
            replicas,
            baselines: Mutex::new(Baselines::default()),
            anomalies: AtomicU64::new(0),
        })
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of decreases observed between reads without a flush.
    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    /// Reads every replica of `key` and returns their element-wise sum.
    #[instrument(skip_all, fields(key = %key))]
    pub fn read(&self, key: &CounterKey) -> CounterResult<CounterRecord> {
        let epoch = self.baselines.lock().epoch;
        let record = match self.sum_replicas(key) {
            Ok(record) => record,
            Err(e) => {
                if matches!(e, CounterError::Read { .. }) {
                    self.forget(key);
                }
                return Err(e);
            }
        };

        self.check_monotonic(key, epoch, &record);
        Ok(record)
    }

    fn sum_replicas(&self, key: &CounterKey) -> CounterResult<CounterRecord> {
        let replicas = self
            .store
            .read_record_replicas(key)
            .map_err(|e| CounterError::from_store_read(key, e))?;

        if replicas.is_empty() {
            return Err(CounterError::read(key, "store returned no replicas"));
        }
        if replicas.len() != self.replicas {
            return Err(CounterError::layout(
                key,
                format!(
                    "store returned {} replicas, expected {}",
                    replicas.len(),
                    self.replicas
                ),
            ));
        }

        let mut record = CounterRecord::zeroed(MAX_COUNTER_NUMBER);
        for (idx, replica) in replicas.iter().enumerate() {
            if replica.len() < MAX_COUNTER_NUMBER {
                return Err(CounterError::layout(
                    key,
                    format!(
                        "replica {} has {} counters, expected at least {}",
                        idx,
                        replica.len(),
                        MAX_COUNTER_NUMBER
                    ),
                ));
            }
            record.accumulate(replica);
        }

        debug!(replicas = replicas.len(), "Read counters");
        Ok(record)
    }

    /// Zeroes every replica of `key`.
    ///
    /// A partial flush is reported with the replicas left untouched.
    #[instrument(skip_all, fields(key = %key))]
    pub fn flush(&self, key: &CounterKey) -> CounterResult<()> {
        let result = self.store.zero_record(key, self.replicas);

        // Values may have gone down either way.
        self.forget(key);

        if let Err(e) = result {
            debug!(error = %e, "Failed to zero record");
            return Err(CounterError::from_store_write(key, self.replicas, e));
        }

        info!("Flushed {} replicas of {}", self.replicas, key);
        Ok(())
    }

    fn forget(&self, key: &CounterKey) {
        let mut baselines = self.baselines.lock();
        baselines.epoch += 1;
        baselines.records.remove(key);
    }

    fn check_monotonic(&self, key: &CounterKey, epoch: u64, record: &CounterRecord) {
        let mut baselines = self.baselines.lock();
        if baselines.epoch != epoch {
            debug!("Baseline reset during read, not recorded");
            return;
        }
        if let Some(previous) = baselines.records.get(key) {
            let decreased = record.decreased_since(previous);
            if !decreased.is_empty() {
                self.anomalies.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %key,
                    positions = ?decreased,
                    "Counters decreased without a flush"
                );
            }
        }
        baselines.records.insert(key.clone(), record.clone());
    }
}
