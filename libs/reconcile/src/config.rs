//! Reconciler configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Liveness probing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Overall window a node has to answer in.
    pub window: Duration,

    /// Timeout for a single probe. Never longer than the window.
    pub attempt_timeout: Duration,

    /// Delay between probes.
    pub interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(180),
            attempt_timeout: Duration::from_secs(10),
            interval: Duration::from_secs(2),
        }
    }
}

/// Reconciler configuration (env-driven).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Timeout for a single node call.
    pub node_call_timeout: Duration,

    pub liveness: LivenessConfig,

    /// Minimum free balance required before any action.
    pub min_balance: u128,

    /// Nodes applied concurrently during deploy and cancel.
    pub apply_parallelism: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            node_call_timeout: Duration::from_secs(10),
            liveness: LivenessConfig::default(),
            min_balance: 20_000,
            apply_parallelism: 1,
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let node_call_timeout = parse::<u64, _>(&lookup, "GRID_RMB_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.node_call_timeout);

        let window = parse::<u64, _>(&lookup, "GRID_LIVENESS_WINDOW")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.liveness.window);

        let attempt_timeout = parse::<u64, _>(&lookup, "GRID_LIVENESS_ATTEMPT_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.liveness.attempt_timeout)
            .min(window);

        let interval_ms: u64 = parse(&lookup, "GRID_LIVENESS_INTERVAL_MS")?.unwrap_or(2000);
        let interval = Duration::from_millis(interval_ms.max(50));

        let min_balance = parse(&lookup, "GRID_MIN_BALANCE")?.unwrap_or(defaults.min_balance);

        let apply_parallelism = parse::<usize, _>(&lookup, "GRID_APPLY_PARALLELISM")?
            .unwrap_or(defaults.apply_parallelism)
            .max(1);

        Ok(Self {
            node_call_timeout,
            liveness: LivenessConfig {
                window,
                attempt_timeout,
                interval,
            },
            min_balance,
            apply_parallelism,
        })
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value })
        })
        .transpose()
}
