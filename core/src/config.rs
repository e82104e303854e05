//! Manager configuration.
//!
//! Values come from defaults merged with whatever [`figment::Provider`] the caller hands
//! in. Nothing here reads files or the environment by itself.
//!
//! ```rust
//! use rollout_sync::config::ShardingConfig;
//! use rollout_sync::rollout::SleepLevel;
//!
//! let config = ShardingConfig::from_json(r#"{ "sleep_level": 2 }"#).unwrap();
//! assert_eq!(config.sleep_level, SleepLevel::Discard);
//! assert_eq!(config.generation_seed_offset, 1000);
//! ```

use crate::error::Result;
use crate::rollout::SleepLevel;
use figment::{
    Figment, Provider,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_GENERATION_SEED_OFFSET: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShardingConfig {
    /// Added to the data-parallel local rank to seed the generation RNG state.
    pub generation_seed_offset: u64,

    /// Level passed to the engine on exit.
    pub sleep_level: SleepLevel,

    /// Emit memory checkpoints while entering and exiting.
    pub log_memory: bool,

    /// When set, the engine's tensor-parallel group must have exactly this size.
    #[validate(range(min = 1))]
    pub expected_tensor_parallel_size: Option<usize>,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            generation_seed_offset: DEFAULT_GENERATION_SEED_OFFSET,
            sleep_level: SleepLevel::default(),
            log_memory: true,
            expected_tensor_parallel_size: None,
        }
    }
}

impl ShardingConfig {
    /// The defaults, as a figment to merge further providers into.
    pub fn figment() -> Figment {
        Figment::new().merge(Serialized::defaults(ShardingConfig::default()))
    }

    /// Extracts and validates a config from the defaults merged with `provider`.
    pub fn extract_from<P: Provider>(provider: P) -> Result<Self> {
        let config: Self = Self::figment().merge(provider).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::extract_from(Json::string(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let config = ShardingConfig::extract_from(Serialized::defaults(ShardingConfig::default())).unwrap();
        assert_eq!(config, ShardingConfig::default());
        assert!(config.log_memory);
        assert_eq!(config.sleep_level, SleepLevel::Offload);
    }

    #[test]
    fn test_json_overrides() {
        let config = ShardingConfig::from_json(
            r#"{ "generation_seed_offset": 7, "log_memory": false, "expected_tensor_parallel_size": 4 }"#,
        )
        .unwrap();
        assert_eq!(config.generation_seed_offset, 7);
        assert!(!config.log_memory);
        assert_eq!(config.expected_tensor_parallel_size, Some(4));
    }

    #[test]
    fn test_validation_rejects_zero_tp() {
        let err = ShardingConfig::from_json(r#"{ "expected_tensor_parallel_size": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }

    #[test]
    fn test_bad_sleep_level() {
        let err = ShardingConfig::from_json(r#"{ "sleep_level": 5 }"#).unwrap_err();
        assert!(matches!(err, Error::ConfigExtraction(_)));
    }
}
