//! # Configuration Validation
//!
//! Field-level checks come from the `validator` derive; this module adds
//! the cross-field rules the derive cannot express.

use crate::config::Config;
use thiserror::Error;
use ::validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Field validation failed: {0}")]
    Field(#[from] validator::ValidationErrors),

    #[error("At least two providers are required, found {count}")]
    TooFewProviders { count: usize },

    #[error("Duplicate provider name: {name}")]
    DuplicateProvider { name: String },

    #[error("min_turns ({min}) must not exceed max_turns ({max})")]
    TurnBoundsInverted { min: u32, max: u32 },

    #[error("similarity_threshold must be in (0, 1], found {value}")]
    SimilarityOutOfRange { value: f64 },

    #[error("ideal turn band inverted: {min} > {max}")]
    IdealBandInverted { min: u32, max: u32 },

    #[error("retry_base_delay_ms ({base}) must not exceed retry_max_delay_ms ({max}) for provider {name}")]
    RetryDelaysInverted { name: String, base: u64, max: u64 },
}

/// Validates the full configuration. Run once at startup, before any
/// component is constructed.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    config.validate()?;

    let providers = &config.providers.list;
    if providers.len() < 2 {
        return Err(ConfigError::TooFewProviders {
            count: providers.len(),
        });
    }
    for (i, spec) in providers.iter().enumerate() {
        if providers[..i].iter().any(|other| other.name == spec.name) {
            return Err(ConfigError::DuplicateProvider {
                name: spec.name.clone(),
            });
        }
        if spec.retry_base_delay_ms > spec.retry_max_delay_ms {
            return Err(ConfigError::RetryDelaysInverted {
                name: spec.name.clone(),
                base: spec.retry_base_delay_ms,
                max: spec.retry_max_delay_ms,
            });
        }
    }

    let conversation = &config.conversation;
    if conversation.min_turns > conversation.max_turns {
        return Err(ConfigError::TurnBoundsInverted {
            min: conversation.min_turns,
            max: conversation.max_turns,
        });
    }
    if conversation.similarity_threshold <= 0.0 || conversation.similarity_threshold > 1.0 {
        return Err(ConfigError::SimilarityOutOfRange {
            value: conversation.similarity_threshold,
        });
    }
    if conversation.ideal_turns_min > conversation.ideal_turns_max {
        return Err(ConfigError::IdealBandInverted {
            min: conversation.ideal_turns_min,
            max: conversation.ideal_turns_max,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSpec;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_single_provider() {
        let mut config = Config::default();
        config.providers.list.truncate(1);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::TooFewProviders { count: 1 })
        ));
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let mut config = Config::default();
        config
            .providers
            .list
            .push(ProviderSpec::named("anthropic", "claude-3-haiku"));
        assert!(matches!(
            validate(&config),
            Err(ConfigError::DuplicateProvider { .. })
        ));
    }

    #[test]
    fn rejects_inverted_turn_bounds() {
        let mut config = Config::default();
        config.conversation.min_turns = 12;
        config.conversation.max_turns = 10;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::TurnBoundsInverted { min: 12, max: 10 })
        ));
    }

    #[test]
    fn rejects_zero_similarity_threshold() {
        let mut config = Config::default();
        config.conversation.similarity_threshold = 0.0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::SimilarityOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_inverted_retry_delays() {
        let mut config = Config::default();
        config.providers.list[0].retry_base_delay_ms = 20_000;
        config.providers.list[0].retry_max_delay_ms = 1_000;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::RetryDelaysInverted { .. })
        ));
    }
}
