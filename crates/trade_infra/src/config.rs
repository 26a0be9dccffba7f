//! Runtime configuration with documented defaults.
//!
//! Every tunable has a default. A value that is present but unusable
//! (non-finite, negative or zero) fails closed rather than falling back.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Tunable parameters of the trade engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigParam {
    /// Idle time after which a cached trade record is stale.
    CacheExpiryS,
    /// Period of the background cache sweep.
    CacheSweepIntervalS,
    /// How long shutdown waits for the sweeper before aborting it.
    SweeperShutdownTimeoutS,
}

/// Error for a configuration value that cannot be used.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub param_name: &'static str,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config fail-closed: '{}' rejected ({})",
            self.param_name, self.reason
        )
    }
}

impl std::error::Error for ConfigError {}

/// Default for a parameter, in seconds.
pub fn param_default(param: ConfigParam) -> f64 {
    match param {
        ConfigParam::CacheExpiryS => 1800.0,
        ConfigParam::CacheSweepIntervalS => 900.0,
        ConfigParam::SweeperShutdownTimeoutS => 60.0,
    }
}

pub fn param_name(param: ConfigParam) -> &'static str {
    match param {
        ConfigParam::CacheExpiryS => "trade_cache_expiry_s",
        ConfigParam::CacheSweepIntervalS => "trade_cache_sweep_interval_s",
        ConfigParam::SweeperShutdownTimeoutS => "trade_sweeper_shutdown_timeout_s",
    }
}

/// Environment variable that overrides the parameter.
pub fn env_var(param: ConfigParam) -> &'static str {
    match param {
        ConfigParam::CacheExpiryS => "TRADE_CACHE_EXPIRY_S",
        ConfigParam::CacheSweepIntervalS => "TRADE_CACHE_SWEEP_INTERVAL_S",
        ConfigParam::SweeperShutdownTimeoutS => "TRADE_SWEEPER_SHUTDOWN_TIMEOUT_S",
    }
}

/// Environment variable naming the JSONL trade store. Unset means in-memory.
pub const STORE_PATH_ENV: &str = "TRADE_STORE_PATH";

/// All known `ConfigParam` variants.
pub const ALL_PARAMS: &[ConfigParam] = &[
    ConfigParam::CacheExpiryS,
    ConfigParam::CacheSweepIntervalS,
    ConfigParam::SweeperShutdownTimeoutS,
];

/// Resolve a parameter: the supplied value if usable, else the default.
pub fn resolve_config_value(param: ConfigParam, value: Option<f64>) -> Result<f64, ConfigError> {
    let Some(v) = value else {
        return Ok(param_default(param));
    };
    let reject = |reason: &str| ConfigError {
        param_name: param_name(param),
        reason: reason.to_string(),
    };
    if !v.is_finite() {
        return Err(reject("value is non-finite"));
    }
    if v < 0.0 {
        return Err(reject("value is negative"));
    }
    if v == 0.0 {
        return Err(reject("value must be greater than zero"));
    }
    Ok(v)
}

// ─── Resolved config ────────────────────────────────────────────────────

/// Smallest duration any parameter may resolve to. Timers cannot run on a
/// zero period.
pub const MIN_DURATION: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct TradeConfig {
    pub cache_expiry: Duration,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
    pub store_path: Option<PathBuf>,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            cache_expiry: seconds(param_default(ConfigParam::CacheExpiryS)),
            sweep_interval: seconds(param_default(ConfigParam::CacheSweepIntervalS)),
            shutdown_timeout: seconds(param_default(ConfigParam::SweeperShutdownTimeoutS)),
            store_path: None,
        }
    }
}

impl TradeConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to fetch raw values by environment variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |param: ConfigParam| -> Result<Duration, ConfigError> {
            let raw = match lookup(env_var(param)) {
                Some(s) if !s.trim().is_empty() => {
                    Some(s.trim().parse::<f64>().map_err(|e| ConfigError {
                        param_name: param_name(param),
                        reason: format!("'{s}' is not a number: {e}"),
                    })?)
                }
                _ => None,
            };
            let secs = resolve_config_value(param, raw)?;
            let duration = Duration::try_from_secs_f64(secs).map_err(|e| ConfigError {
                param_name: param_name(param),
                reason: format!("{secs}s is out of range: {e}"),
            })?;
            if duration < MIN_DURATION {
                return Err(ConfigError {
                    param_name: param_name(param),
                    reason: format!("{secs}s is below the {MIN_DURATION:?} minimum"),
                });
            }
            Ok(duration)
        };

        let config = Self {
            cache_expiry: resolve(ConfigParam::CacheExpiryS)?,
            sweep_interval: resolve(ConfigParam::CacheSweepIntervalS)?,
            shutdown_timeout: resolve(ConfigParam::SweeperShutdownTimeoutS)?,
            store_path: lookup(STORE_PATH_ENV)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };
        tracing::debug!(?config, "trade config resolved");
        Ok(config)
    }
}

fn seconds(v: f64) -> Duration {
    Duration::from_secs_f64(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_params_have_unique_names_and_env_vars() {
        let mut names: Vec<_> = ALL_PARAMS.iter().map(|p| param_name(*p)).collect();
        let mut vars: Vec<_> = ALL_PARAMS.iter().map(|p| env_var(*p)).collect();
        names.sort_unstable();
        names.dedup();
        vars.sort_unstable();
        vars.dedup();
        assert_eq!(names.len(), ALL_PARAMS.len());
        assert_eq!(vars.len(), ALL_PARAMS.len());
    }

    #[test]
    fn defaults_resolve_positive() {
        for param in ALL_PARAMS {
            assert!(resolve_config_value(*param, None).unwrap() > 0.0);
        }
    }
}
