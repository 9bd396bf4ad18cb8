//! Stage configuration with environment overrides.
//!
//! Configuration precedence, lowest to highest:
//!
//! 1. Built-in defaults ([`StageConfig::default`])
//! 2. Optional TOML file (`config-file` feature, [`apply_toml_config`])
//! 3. `STAGECRAFT_*` environment variables ([`StageConfig::from_env`])
//!
//! # Environment variables
//!
//! | Variable | Meaning |
//! |---|---|
//! | `STAGECRAFT_IMMEDIATE_BUDGET_MS` | budget for immediate interrupts |
//! | `STAGECRAFT_FAST_BUDGET_MS` | budget for fast (microtask) interrupts |
//! | `STAGECRAFT_NORMAL_BUDGET_MS` | budget for normal (macrotask) interrupts |
//! | `STAGECRAFT_EXCHANGE_CAPACITY` | default exchange capacity |

use serde::Deserialize;
use std::time::Duration;

/// Error produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {variable}: {value}")]
    InvalidEnv {
        /// The offending variable name.
        variable: &'static str,
        /// The value that failed to parse.
        value: String,
    },
    /// The TOML config file failed to parse.
    #[cfg(feature = "config-file")]
    #[error("invalid config file: {0}")]
    InvalidFile(#[from] toml::de::Error),
}

/// Configuration for the stage scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// Time budget for an immediate (synchronous) interrupt.
    pub immediate_budget: Duration,
    /// Time budget for a fast (microtask) interrupt.
    pub fast_budget: Duration,
    /// Time budget for a normal (macrotask) interrupt.
    pub normal_budget: Duration,
    /// Default capacity for `exchange()` when none is given.
    ///
    /// Zero means rendezvous: every `produce` waits for a `consume`.
    pub exchange_capacity: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            immediate_budget: Duration::from_millis(4),
            fast_budget: Duration::from_millis(6),
            normal_budget: Duration::from_millis(10),
            exchange_capacity: 0,
        }
    }
}

impl StageConfig {
    /// Builds a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = env_u64("STAGECRAFT_IMMEDIATE_BUDGET_MS")? {
            config.immediate_budget = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("STAGECRAFT_FAST_BUDGET_MS")? {
            config.fast_budget = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("STAGECRAFT_NORMAL_BUDGET_MS")? {
            config.normal_budget = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("STAGECRAFT_EXCHANGE_CAPACITY")? {
            config.exchange_capacity = usize::try_from(n).unwrap_or(usize::MAX);
        }
        Ok(config)
    }
}

fn env_u64(variable: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(variable) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { variable, value }),
        Err(_) => Ok(None),
    }
}

/// TOML representation of [`StageConfig`].
///
/// ```toml
/// [stage]
/// immediate_budget_ms = 4
/// fast_budget_ms = 6
/// normal_budget_ms = 10
/// exchange_capacity = 0
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct StageToml {
    /// Stage section.
    #[serde(default)]
    pub stage: StageSection,
}

/// The `[stage]` section of the TOML config.
#[derive(Debug, Default, Deserialize)]
pub struct StageSection {
    /// Budget for immediate interrupts, in milliseconds.
    pub immediate_budget_ms: Option<u64>,
    /// Budget for fast interrupts, in milliseconds.
    pub fast_budget_ms: Option<u64>,
    /// Budget for normal interrupts, in milliseconds.
    pub normal_budget_ms: Option<u64>,
    /// Default exchange capacity.
    pub exchange_capacity: Option<usize>,
}

/// Applies a parsed TOML config on top of `config`.
///
/// Only fields present in the TOML override the config.
pub fn apply_toml_config(config: &mut StageConfig, toml: &StageToml) {
    if let Some(ms) = toml.stage.immediate_budget_ms {
        config.immediate_budget = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.stage.fast_budget_ms {
        config.fast_budget = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.stage.normal_budget_ms {
        config.normal_budget = Duration::from_millis(ms);
    }
    if let Some(n) = toml.stage.exchange_capacity {
        config.exchange_capacity = n;
    }
}

/// Parses a TOML string and applies it on top of `config`.
#[cfg(feature = "config-file")]
pub fn apply_toml_str(config: &mut StageConfig, text: &str) -> Result<(), ConfigError> {
    let toml: StageToml = toml::from_str(text)?;
    apply_toml_config(config, &toml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_table() {
        let config = StageConfig::default();
        assert_eq!(config.immediate_budget, Duration::from_millis(4));
        assert_eq!(config.fast_budget, Duration::from_millis(6));
        assert_eq!(config.normal_budget, Duration::from_millis(10));
        assert_eq!(config.exchange_capacity, 0);
    }

    #[test]
    fn toml_overrides_only_present_fields() {
        let mut config = StageConfig::default();
        let toml = StageToml {
            stage: StageSection {
                normal_budget_ms: Some(25),
                ..StageSection::default()
            },
        };
        apply_toml_config(&mut config, &toml);
        assert_eq!(config.normal_budget, Duration::from_millis(25));
        assert_eq!(config.fast_budget, Duration::from_millis(6));
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("STAGECRAFT_FAST_BUDGET_MS", "9");
        let config = StageConfig::from_env().expect("config should load");
        std::env::remove_var("STAGECRAFT_FAST_BUDGET_MS");
        assert_eq!(config.fast_budget, Duration::from_millis(9));
    }

    #[test]
    fn invalid_env_is_reported() {
        std::env::set_var("STAGECRAFT_NORMAL_BUDGET_MS", "soon");
        let result = StageConfig::from_env();
        std::env::remove_var("STAGECRAFT_NORMAL_BUDGET_MS");
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }
}
