pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod peer;
pub mod preference;
pub mod vocabulary;

pub use catalog::{
    IngestOptions, TorrentCatalog, TorrentDescriptor, TorrentOrder, TorrentQuery, TorrentRecord,
    TorrentUpdate,
};
pub use config::{
    load_config, load_config_from_str, validate_config, CacheConfig, ConfigError, DatabaseConfig,
};
pub use context::CacheContext;
pub use db::{CacheDb, CacheError, InfoHash, PermId, Record, Table};
pub use peer::{PeerAttributes, PeerRecord, PeerRegistry};
pub use preference::{CategoryPreferenceStats, PreferenceEntry, PreferenceFields, PreferenceLedger};
pub use vocabulary::{Vocabulary, VocabularyDomain};
