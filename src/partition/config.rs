//! Configuration for the assignment strategy and the failover access policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables of [`SimpleAssignmentStrategy`](super::SimpleAssignmentStrategy).
///
/// The defaults reproduce the historically tuned values; none of them is a
/// hard invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Delay applied after members join, damping reactivity to membership
    /// churn. Default: 1s.
    pub member_join_delay: Duration,

    /// Baseline delay between analyses while suggestions are pending.
    /// Default: 60s.
    pub suggestion_delay: Duration,

    /// Time allowed for suggested transfers to complete before re-analysis,
    /// for services at or below `large_partition_threshold`. Default: 60s.
    pub completion_delay_small: Duration,

    /// Completion delay for services above `large_partition_threshold`,
    /// where transfers move more data. Default: 300s.
    pub completion_delay_large: Duration,

    /// Partition count above which `completion_delay_large` applies.
    /// Default: 16384.
    pub large_partition_threshold: u32,

    /// Rounds of backup strong/balance iteration before the escape valve
    /// perturbs the distribution. Default: 10.
    pub max_balance_iterations: u32,

    /// Treat an exactly-two-member, one-backup topology specially: all
    /// primaries on the senior member, all backups on the other. Turns off
    /// permanently once a third member joins. Default: false.
    pub trivial_two_server: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            member_join_delay: Duration::from_millis(1000),
            suggestion_delay: Duration::from_secs(60),
            completion_delay_small: Duration::from_secs(60),
            completion_delay_large: Duration::from_secs(300),
            large_partition_threshold: 1 << 14,
            max_balance_iterations: 10,
            trivial_two_server: false,
        }
    }
}

impl StrategyConfig {
    /// Load the configuration from `TESSERA_*` environment variables,
    /// falling back to defaults for unset values.
    ///
    /// Recognized variables:
    /// - `TESSERA_MEMBER_JOIN_DELAY_MS`
    /// - `TESSERA_SUGGESTION_DELAY_MS`
    /// - `TESSERA_COMPLETION_DELAY_SMALL_MS`
    /// - `TESSERA_COMPLETION_DELAY_LARGE_MS`
    /// - `TESSERA_MAX_BALANCE_ITERATIONS`
    /// - `TESSERA_TRIVIAL_TWO_SERVER` (`true` / `1`)
    pub fn from_env() -> Result<Self> {
        let mut config = StrategyConfig::default();

        if let Some(ms) = env_u64("TESSERA_MEMBER_JOIN_DELAY_MS")? {
            config.member_join_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("TESSERA_SUGGESTION_DELAY_MS")? {
            config.suggestion_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("TESSERA_COMPLETION_DELAY_SMALL_MS")? {
            config.completion_delay_small = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("TESSERA_COMPLETION_DELAY_LARGE_MS")? {
            config.completion_delay_large = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("TESSERA_MAX_BALANCE_ITERATIONS")? {
            config.max_balance_iterations = n as u32;
        }
        if let Ok(raw) = std::env::var("TESSERA_TRIVIAL_TWO_SERVER") {
            config.trivial_two_server = matches!(raw.as_str(), "true" | "TRUE" | "1");
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the suggestion delay.
    pub fn with_suggestion_delay(mut self, delay: Duration) -> Self {
        self.suggestion_delay = delay;
        self
    }

    /// Set the member-join settle delay.
    pub fn with_member_join_delay(mut self, delay: Duration) -> Self {
        self.member_join_delay = delay;
        self
    }

    /// Enable or disable the trivial two-server distribution.
    pub fn with_trivial_two_server(mut self, enabled: bool) -> Self {
        self.trivial_two_server = enabled;
        self
    }

    /// Fail fast on nonsensical settings.
    pub fn validate(&self) -> Result<()> {
        if self.suggestion_delay.is_zero() {
            return Err(Error::Config("suggestion delay must be positive".into()));
        }
        if self.completion_delay_small.is_zero() || self.completion_delay_large.is_zero() {
            return Err(Error::Config("completion delays must be positive".into()));
        }
        if self.max_balance_iterations == 0 {
            return Err(Error::Config(
                "max balance iterations must be at least 1".into(),
            ));
        }
        if self.large_partition_threshold == 0 {
            return Err(Error::Config(
                "large partition threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The completion delay appropriate for the given partition count.
    pub fn suggestion_completion_delay(&self, partition_count: u32) -> Duration {
        if partition_count < self.large_partition_threshold {
            self.completion_delay_small
        } else {
            self.completion_delay_large
        }
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} must be an integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Tunables of [`FailoverAccessPolicy`](super::FailoverAccessPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPolicyConfig {
    /// How long partitions may stay endangered before requests start being
    /// delayed. Default: 5s.
    pub threshold: Duration,

    /// Endangered duration past which delaying requests is considered
    /// pointless and the throttle releases. Default: 60s.
    pub limit: Duration,

    /// Upper bound on any single request delay. Default: 5s.
    pub max_wait: Duration,
}

impl Default for FailoverPolicyConfig {
    fn default() -> Self {
        FailoverPolicyConfig {
            threshold: Duration::from_secs(5),
            limit: Duration::from_secs(60),
            max_wait: Duration::from_secs(5),
        }
    }
}

impl FailoverPolicyConfig {
    /// Fail fast on nonsensical settings.
    pub fn validate(&self) -> Result<()> {
        if self.threshold >= self.limit {
            return Err(Error::Config(format!(
                "failover threshold ({:?}) must be below the limit ({:?})",
                self.threshold, self.limit
            )));
        }
        if self.max_wait.is_zero() {
            return Err(Error::Config("failover max wait must be positive".into()));
        }
        Ok(())
    }
}
