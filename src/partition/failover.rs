//! Admission throttling while partitions are endangered.
//!
//! During failover the service may choose to slow incoming requests instead
//! of serving them against partitions with missing backups. The policy
//! computes a per-request wait that stays zero within a grace threshold,
//! grows along a damped logarithmic curve while the endangered condition
//! persists, and releases entirely once waiting becomes pointless.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;

use super::config::FailoverPolicyConfig;

/// Computes bounded client-request delays while the service is endangered.
#[derive(Debug)]
pub struct FailoverAccessPolicy {
    config: FailoverPolicyConfig,
    endangered_since: Option<Instant>,
}

impl FailoverAccessPolicy {
    /// Construct with the given configuration, validated up front.
    pub fn new(config: FailoverPolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(FailoverAccessPolicy {
            config,
            endangered_since: None,
        })
    }

    /// Note that the service became endangered. Idempotent; the first call
    /// starts the clock.
    pub fn on_endangered(&mut self) {
        if self.endangered_since.is_none() {
            debug!("failover access policy engaged");
            self.endangered_since = Some(Instant::now());
        }
    }

    /// Note that the service is safe again.
    pub fn on_safe(&mut self) {
        if self.endangered_since.take().is_some() {
            debug!("failover access policy released");
        }
    }

    /// True while the endangered clock is running.
    pub fn is_endangered(&self) -> bool {
        self.endangered_since.is_some()
    }

    /// The wait to impose on a request arriving now.
    pub fn wait_time(&self) -> Duration {
        match self.endangered_since {
            Some(since) => self.wait_for_elapsed(since.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// The damped logarithmic curve: zero up to the threshold, rising toward
    /// `max_wait` as the endangered duration approaches the limit, zero
    /// again past the limit (waiting longer will not help).
    ///
    /// The curve is evaluated with the log argument at least 1, so the
    /// near-threshold edge cannot go negative or NaN.
    fn wait_for_elapsed(&self, elapsed: Duration) -> Duration {
        let threshold = self.config.threshold;
        let limit = self.config.limit;

        if elapsed <= threshold || elapsed >= limit {
            return Duration::ZERO;
        }

        let window = (limit - threshold).as_secs_f64();
        let scale = window / 8.0;
        let progress = (elapsed - threshold).as_secs_f64();

        let damped = (1.0 + progress / scale).ln() / (1.0 + window / scale).ln();
        let max_wait = self.config.max_wait.as_secs_f64();

        Duration::from_secs_f64((damped * max_wait).clamp(0.0, max_wait))
    }
}
