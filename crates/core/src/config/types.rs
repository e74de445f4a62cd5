use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Backing store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite file (created if missing)
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long reads keep retrying on lock contention
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Capacity of the write queue; enqueueing blocks when it is full
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
}

impl DatabaseConfig {
    /// Config for a store at `path` with default timings.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            write_queue_capacity: default_write_queue_capacity(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cachedb.sqlite")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_write_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[database]
path = "/var/lib/cachedb/tribler.sqlite"
busy_timeout_ms = 2500
write_queue_capacity = 16
"#;
        let config: CacheConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/cachedb/tribler.sqlite")
        );
        assert_eq!(config.database.busy_timeout_ms, 2500);
        assert_eq!(config.database.write_queue_capacity, 16);
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: CacheConfig = toml::from_str("").unwrap();
        assert_eq!(config.database.path, PathBuf::from("cachedb.sqlite"));
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.database.write_queue_capacity, 1024);
    }

    #[test]
    fn test_database_config_at() {
        let config = DatabaseConfig::at("/tmp/x.sqlite");
        assert_eq!(config.path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(config.busy_timeout_ms, 5000);
    }
}
