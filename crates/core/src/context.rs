//! Process-level wiring of the cache components.

use std::sync::Arc;

use crate::catalog::TorrentCatalog;
use crate::config::{validate_config, CacheConfig};
use crate::db::{CacheDb, CacheError};
use crate::peer::PeerRegistry;
use crate::preference::PreferenceLedger;
use crate::vocabulary::Vocabulary;

/// One open store with every handler built on top of it.
///
/// Construct once at startup and share by reference or clone. Several
/// contexts may coexist as long as they point at different files.
#[derive(Clone)]
pub struct CacheContext {
    db: Arc<CacheDb>,
    vocabulary: Vocabulary,
    peers: PeerRegistry,
    torrents: TorrentCatalog,
    preferences: PreferenceLedger,
}

impl CacheContext {
    /// Validate `config` and open the store it names.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        validate_config(config).map_err(|e| CacheError::InvalidArgument(e.to_string()))?;
        let db = Arc::new(CacheDb::open(&config.database)?);
        Self::build(db)
    }

    /// Context over a private in-memory store.
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::build(Arc::new(CacheDb::in_memory()?))
    }

    fn build(db: Arc<CacheDb>) -> Result<Self, CacheError> {
        let vocabulary = Vocabulary::load(Arc::clone(&db))?;
        let torrents = TorrentCatalog::new(Arc::clone(&db), vocabulary.clone());
        let preferences = PreferenceLedger::new(Arc::clone(&db), torrents.clone());
        let peers = PeerRegistry::new(Arc::clone(&db));

        Ok(Self {
            db,
            vocabulary,
            peers,
            torrents,
            preferences,
        })
    }

    pub fn db(&self) -> &Arc<CacheDb> {
        &self.db
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn torrents(&self) -> &TorrentCatalog {
        &self.torrents
    }

    pub fn preferences(&self) -> &PreferenceLedger {
        &self.preferences
    }

    /// Drain queued writes and release the store.
    ///
    /// Handlers cloned out of this context fail with `Closed` afterwards.
    pub fn close(&self) -> Result<(), CacheError> {
        self.db.close()
    }
}
