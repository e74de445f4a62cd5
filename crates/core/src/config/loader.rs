use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::CacheConfig, ConfigError};

/// Load configuration from file with environment variable overrides
///
/// Variables are prefixed with `CACHEDB_` and nested with `__`,
/// e.g. `CACHEDB_DATABASE__BUSY_TIMEOUT_MS=100`.
pub fn load_config(path: &Path) -> Result<CacheConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: CacheConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("CACHEDB_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<CacheConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[database]
busy_timeout_ms = 100
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.database.busy_timeout_ms, 100);
    }

    #[test]
    fn test_load_config_from_str_wrong_type() {
        let toml = r#"
[database]
busy_timeout_ms = "soon"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/cachedb.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/tmp/cache.sqlite"
write_queue_capacity = 8
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.database.path.to_str(), Some("/tmp/cache.sqlite"));
        assert_eq!(config.database.write_queue_capacity, 8);
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }
}
