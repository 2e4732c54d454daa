use crate::config::Config;
use crate::error::GateError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates process configuration for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), GateError> {
        if url.is_empty() {
            return Err(GateError::Validation("Redis URL cannot be empty".to_string()));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(GateError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates a log level name
    pub fn validate_log_level(level: &str) -> Result<(), GateError> {
        if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(GateError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, LOG_LEVELS
            )));
        }

        Ok(())
    }

    /// Validates a Redis key prefix
    pub fn validate_key_prefix(prefix: &str) -> Result<(), GateError> {
        if prefix.is_empty() || prefix.contains(char::is_whitespace) {
            return Err(GateError::Validation(
                "Redis key prefix must be non-empty and contain no whitespace".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the whole process configuration
    pub fn validate(config: &Config) -> Result<(), GateError> {
        if config.bind_addr.port() == 0 {
            return Err(GateError::Validation(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &config.redis_url {
            Self::validate_redis_url(url)?;
        }
        Self::validate_key_prefix(&config.redis_key_prefix)?;
        Self::validate_log_level(&config.log_level)?;

        Ok(())
    }
}
