use super::{types::CacheConfig, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Database path is not empty
/// - Busy timeout is not 0
/// - Write queue capacity is not 0
pub fn validate_config(config: &CacheConfig) -> Result<(), ConfigError> {
    let database = &config.database;

    if database.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "database.path cannot be empty".to_string(),
        ));
    }

    if database.busy_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "database.busy_timeout_ms cannot be 0".to_string(),
        ));
    }

    if database.write_queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "database.write_queue_capacity cannot be 0".to_string(),
        ));
    }

    Ok(())
}
