//! Verification helpers for counter state that converges asynchronously
//!
//! The dataplane removes stale rule counters some time after a policy
//! change, so expectations are polled until they hold ([`eventually`]) or
//! checked to keep holding ([`consistently`]).

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};

use bpf_counters::{CountersMgr, PolicyRuleCounterKey};

/// Time allowed for a policy to be programmed
pub const PROGRAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed for rule counters to converge after a change
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Condition not met after {waited:?}: {last}")]
    Timeout { waited: Duration, last: String },

    #[error("Condition stopped holding after {after:?}: {reason}")]
    Violated { after: Duration, reason: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Poll `check` every `interval` until it succeeds or `timeout` elapses
///
/// The check's last error message is reported on timeout.
pub async fn eventually<T, F>(timeout: Duration, interval: Duration, mut check: F) -> VerifyResult<T>
where
    F: FnMut() -> Result<T, String>,
{
    let start = Instant::now();
    loop {
        match check() {
            Ok(value) => return Ok(value),
            Err(last) if start.elapsed() >= timeout => {
                return Err(VerificationError::Timeout {
                    waited: start.elapsed(),
                    last,
                })
            }
            Err(_) => sleep(interval).await,
        }
    }
}

/// Evaluate `check` every `interval` for `duration`; fail on the first miss
pub async fn consistently<F>(duration: Duration, interval: Duration, mut check: F) -> VerifyResult<()>
where
    F: FnMut() -> Result<(), String>,
{
    let start = Instant::now();
    loop {
        if let Err(reason) = check() {
            return Err(VerificationError::Violated {
                after: start.elapsed(),
                reason,
            });
        }
        if start.elapsed() >= duration {
            return Ok(());
        }
        sleep(interval).await;
    }
}

/// Rule counter expectations against a [`CountersMgr`]
pub struct RuleCounterVerifier<'a> {
    mgr: &'a CountersMgr,
}

impl<'a> RuleCounterVerifier<'a> {
    /// Create a new verifier
    pub fn new(mgr: &'a CountersMgr) -> Self {
        Self { mgr }
    }

    /// Check that the rule counters hold exactly `expected`
    pub fn matches(&self, expected: &[(PolicyRuleCounterKey, u64)]) -> Result<(), String> {
        let snapshot = self.mgr.rule_counters().map_err(|e| e.to_string())?;

        if snapshot.len() != expected.len() {
            return Err(format!(
                "expected {} rule counters, found {}: {:?}",
                expected.len(),
                snapshot.len(),
                snapshot.sorted()
            ));
        }
        for (key, count) in expected {
            match snapshot.get(key) {
                Some(actual) if actual == *count => {}
                Some(actual) => {
                    return Err(format!("{}: expected {}, got {}", key, count, actual));
                }
                None => return Err(format!("{}: missing", key)),
            }
        }
        Ok(())
    }

    /// Wait until the rule counters hold exactly `expected`
    pub async fn wait_for(
        &self,
        expected: &[(PolicyRuleCounterKey, u64)],
        timeout: Duration,
    ) -> VerifyResult<()> {
        eventually(timeout, POLL_INTERVAL, || self.matches(expected)).await
    }

    /// Wait until no rule counters remain
    pub async fn wait_for_empty(&self, timeout: Duration) -> VerifyResult<()> {
        self.wait_for(&[], timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_eventually_succeeds_after_retries() {
        let mut calls = 0;
        let value = eventually(Duration::from_secs(1), Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(format!("call {}", calls))
            } else {
                Ok(calls)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_eventually_times_out_with_last_reason() {
        let err = eventually::<(), _>(Duration::from_millis(20), Duration::from_millis(5), || {
            Err("never".to_string())
        })
        .await
        .unwrap_err();
        match err {
            VerificationError::Timeout { last, .. } => assert_eq!(last, "never"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_consistently_reports_violation() {
        let mut calls = 0;
        let err = consistently(Duration::from_secs(1), Duration::from_millis(1), || {
            calls += 1;
            if calls == 2 {
                Err("changed".to_string())
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, VerificationError::Violated { .. }));
    }
}
