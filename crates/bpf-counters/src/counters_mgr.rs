//! CountersMgr - dump and flush orchestration across interfaces and hooks.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::aggregate::AggregateCounters;
use crate::error::{CounterError, CounterResult};
use crate::interfaces::InterfaceSource;
use crate::record::{CounterKey, Hook};
use crate::render::{self, InterfaceCounters, OutputFormat};
use crate::rule_map::{PolicyRuleCounterMap, PolicyRuleCounters};
use crate::store::CounterStore;

/// Outcome of a dump over one or more interfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    /// Interfaces whose counters were written.
    pub dumped: Vec<String>,
    /// Interfaces skipped, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Drives the aggregate reader and the rule counter map for the CLI and tests.
///
/// Every call is single-shot: no retries, no background work.
pub struct CountersMgr {
    counters: AggregateCounters<Arc<dyn CounterStore>>,
    rules: PolicyRuleCounterMap<Arc<dyn CounterStore>>,
    interfaces: Box<dyn InterfaceSource>,
}

impl CountersMgr {
    /// Creates a manager over `store` with `replicas` execution contexts.
    ///
    /// Fails with [`CounterError::InvalidArgument`] if `replicas` is zero.
    pub fn new(
        store: Arc<dyn CounterStore>,
        replicas: usize,
        interfaces: Box<dyn InterfaceSource>,
    ) -> CounterResult<Self> {
        Ok(Self {
            counters: AggregateCounters::new(Arc::clone(&store), replicas)?,
            rules: PolicyRuleCounterMap::new(store),
            interfaces,
        })
    }

    /// Returns the aggregate reader, for monotonicity diagnostics.
    pub fn counters(&self) -> &AggregateCounters<Arc<dyn CounterStore>> {
        &self.counters
    }

    /// Dumps one interface, or every host interface when `target` is empty.
    ///
    /// With a target, a read failure is returned as-is. Without one,
    /// per-interface failures are logged and skipped; only failing to list
    /// the interfaces (or to write output) is fatal.
    pub fn dump_all(
        &self,
        target: Option<&str>,
        format: OutputFormat,
        out: &mut dyn Write,
    ) -> CounterResult<DumpSummary> {
        let mut summary = DumpSummary::default();

        if let Some(iface) = target.filter(|t| !t.is_empty()) {
            self.dump_interface(iface, format, out)?;
            summary.dumped.push(iface.to_string());
            return Ok(summary);
        }

        for iface in self.interfaces.interfaces()? {
            match self.dump_interface(&iface, format, out) {
                Ok(_) => summary.dumped.push(iface),
                Err(e @ CounterError::Output(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to dump {} counters: {}", iface, e);
                    summary.failed.push((iface, e.to_string()));
                }
            }
        }

        debug!(
            dumped = summary.dumped.len(),
            failed = summary.failed.len(),
            "Dump complete"
        );
        Ok(summary)
    }

    /// Reads and writes the ingress and egress counters of `iface`.
    ///
    /// Nothing is written unless both hooks were read successfully.
    pub fn dump_interface(
        &self,
        iface: &str,
        format: OutputFormat,
        out: &mut dyn Write,
    ) -> CounterResult<InterfaceCounters> {
        let counters = self.read_interface(iface)?;
        render::write_interface(out, &counters, format)?;
        Ok(counters)
    }

    /// Reads the aggregated ingress and egress records of `iface`.
    #[instrument(skip(self))]
    pub fn read_interface(&self, iface: &str) -> CounterResult<InterfaceCounters> {
        if iface.is_empty() {
            return Err(CounterError::invalid_argument("empty interface name"));
        }

        let ingress = self.counters.read(&CounterKey::new(iface, Hook::Ingress))?;
        let egress = self.counters.read(&CounterKey::new(iface, Hook::Egress))?;

        Ok(InterfaceCounters {
            iface: iface.to_string(),
            ingress,
            egress,
        })
    }

    /// Zeroes the ingress then egress counters of `iface`.
    ///
    /// Stops at the first hook that fails; the error names that hook.
    #[instrument(skip(self))]
    pub fn flush_interface(&self, iface: &str) -> CounterResult<()> {
        if iface.is_empty() {
            return Err(CounterError::invalid_argument("empty interface name"));
        }

        for hook in Hook::ALL {
            self.counters.flush(&CounterKey::new(iface, hook))?;
            info!(
                "Successfully flushed counters map for interface={} hook={}",
                iface, hook
            );
        }
        Ok(())
    }

    /// Snapshots the rule counter map.
    pub fn rule_counters(&self) -> CounterResult<PolicyRuleCounters> {
        self.rules.dump()
    }

    /// Writes the rule counters, optionally restricted to one interface.
    pub fn dump_rules(
        &self,
        iface: Option<&str>,
        format: OutputFormat,
        out: &mut dyn Write,
    ) -> CounterResult<PolicyRuleCounters> {
        let mut rules = self.rules.dump()?;
        if let Some(iface) = iface.filter(|i| !i.is_empty()) {
            rules = rules.for_interface(iface);
        }
        render::write_rules(out, &rules, format)?;
        Ok(rules)
    }
}
