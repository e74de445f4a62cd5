//! Vocabulary cache: name <-> id mappings for categories, statuses and sources.
//!
//! Category and status sets are fixed when the store is created. Sources grow
//! on first use, and only through the write path.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::schema::{CATEGORY_TABLE, SOURCE_TABLE, STATUS_TABLE};
use crate::db::{CacheDb, CacheError};

/// Source recorded for torrents collected without an explicit origin.
pub const DEFAULT_SOURCE: &str = "BC";
/// Status given to freshly ingested torrents.
pub const STATUS_UNKNOWN: &str = "unknown";
pub const STATUS_GOOD: &str = "good";
pub const STATUS_DEAD: &str = "dead";
/// Category used when a descriptor carries none.
pub const CATEGORY_OTHER: &str = "other";
/// Category hidden from default catalog queries.
pub const CATEGORY_XXX: &str = "xxx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyDomain {
    Category,
    Status,
    Source,
}

impl VocabularyDomain {
    pub const ALL: [VocabularyDomain; 3] = [Self::Category, Self::Status, Self::Source];

    fn table(self) -> &'static str {
        match self {
            Self::Category => CATEGORY_TABLE,
            Self::Status => STATUS_TABLE,
            Self::Source => SOURCE_TABLE,
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            Self::Category => "category_id",
            Self::Status => "status_id",
            Self::Source => "source_id",
        }
    }

    /// Fixed domains never gain entries at runtime.
    pub fn is_fixed(self) -> bool {
        !matches!(self, Self::Source)
    }
}

impl fmt::Display for VocabularyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Category => "category",
            Self::Status => "status",
            Self::Source => "source",
        };
        f.write_str(name)
    }
}

/// One domain's mappings. Fixed domains match names case-insensitively.
#[derive(Debug, Default)]
struct DomainMap {
    fold_case: bool,
    by_name: HashMap<String, i64>,
    by_id: BTreeMap<i64, String>,
}

impl DomainMap {
    fn new(fold_case: bool) -> Self {
        Self {
            fold_case,
            ..Default::default()
        }
    }

    fn key(&self, name: &str) -> String {
        if self.fold_case {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn insert(&mut self, id: i64, name: String) {
        self.by_name.insert(self.key(&name), id);
        self.by_id.insert(id, name);
    }

    fn id(&self, name: &str) -> Option<i64> {
        self.by_name.get(&self.key(name)).copied()
    }

    fn name(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }
}

#[derive(Debug)]
struct Maps {
    category: DomainMap,
    status: DomainMap,
    source: DomainMap,
}

impl Maps {
    fn domain(&self, domain: VocabularyDomain) -> &DomainMap {
        match domain {
            VocabularyDomain::Category => &self.category,
            VocabularyDomain::Status => &self.status,
            VocabularyDomain::Source => &self.source,
        }
    }

    fn domain_mut(&mut self, domain: VocabularyDomain) -> &mut DomainMap {
        match domain {
            VocabularyDomain::Category => &mut self.category,
            VocabularyDomain::Status => &mut self.status,
            VocabularyDomain::Source => &mut self.source,
        }
    }
}

/// In-memory mirror of the vocabulary tables. Cheap to clone.
#[derive(Clone)]
pub struct Vocabulary {
    db: Arc<CacheDb>,
    maps: Arc<RwLock<Maps>>,
}

impl Vocabulary {
    /// Load every vocabulary table into memory.
    pub fn load(db: Arc<CacheDb>) -> Result<Self, CacheError> {
        let mut maps = Maps {
            category: DomainMap::new(true),
            status: DomainMap::new(true),
            source: DomainMap::new(false),
        };

        for domain in VocabularyDomain::ALL {
            let sql = format!("SELECT {}, name FROM {}", domain.id_column(), domain.table());
            let rows: Vec<(i64, String)> = db.read(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })?;

            let map = maps.domain_mut(domain);
            for (id, name) in rows {
                map.insert(id, name);
            }
        }

        tracing::debug!(
            categories = maps.category.by_id.len(),
            statuses = maps.status.by_id.len(),
            sources = maps.source.by_id.len(),
            "Loaded vocabulary"
        );

        Ok(Self {
            db,
            maps: Arc::new(RwLock::new(maps)),
        })
    }

    /// Id of `name` in `domain`.
    ///
    /// Unknown sources are created through the write path and are visible to
    /// the caller on return. Unknown categories and statuses are an error.
    pub fn resolve(&self, domain: VocabularyDomain, name: &str) -> Result<i64, CacheError> {
        if let Some(id) = self.lookup(domain, name) {
            return Ok(id);
        }
        if domain.is_fixed() {
            return Err(CacheError::unknown_vocabulary(domain, name));
        }

        let recorder = self.recorder();
        let name = name.to_string();
        self.db.submit(move |conn| {
            let id = source_id_in(conn, &name)?;
            recorder.remember(id, name);
            Ok(id)
        })
    }

    /// Id of `name` if it is already known. Never creates anything.
    pub fn lookup(&self, domain: VocabularyDomain, name: &str) -> Option<i64> {
        self.read_maps().domain(domain).id(name)
    }

    /// Name of `id` in `domain`.
    pub fn reverse(&self, domain: VocabularyDomain, id: i64) -> Result<String, CacheError> {
        self.read_maps()
            .domain(domain)
            .name(id)
            .map(str::to_string)
            .ok_or_else(|| CacheError::unknown_vocabulary(domain, id))
    }

    /// All names of `domain`, in id order.
    pub fn names(&self, domain: VocabularyDomain) -> Vec<String> {
        self.read_maps()
            .domain(domain)
            .by_id
            .values()
            .cloned()
            .collect()
    }

    /// Handle for write-path mutations that create sources.
    pub(crate) fn recorder(&self) -> SourceRecorder {
        SourceRecorder(Arc::clone(&self.maps))
    }

    // Mappings are only ever updated by single inserts, so a poisoned lock
    // still guards consistent data.
    fn read_maps(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Updates the source mapping from inside the write path.
///
/// Holds only the mappings, so a queued mutation never keeps the store alive.
#[derive(Clone)]
pub(crate) struct SourceRecorder(Arc<RwLock<Maps>>);

impl SourceRecorder {
    /// Call only after the row for `id` is committed.
    pub(crate) fn remember(&self, id: i64, name: String) {
        let mut maps: RwLockWriteGuard<'_, Maps> =
            self.0.write().unwrap_or_else(PoisonError::into_inner);
        maps.source.insert(id, name);
    }
}

/// Source id for `name`, inserting the row if needed. Write path only.
pub(crate) fn source_id_in(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT source_id FROM TorrentSource WHERE name = ?",
            params![name],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => Ok(id),
        None => {
            conn.execute("INSERT INTO TorrentSource (name) VALUES (?)", params![name])?;
            Ok(conn.last_insert_rowid())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Table;

    fn vocabulary() -> Vocabulary {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        Vocabulary::load(db).unwrap()
    }

    #[test]
    fn test_fixed_domains_loaded() {
        let vocab = vocabulary();

        assert_eq!(vocab.resolve(VocabularyDomain::Status, "good").unwrap(), 1);
        assert_eq!(vocab.resolve(VocabularyDomain::Status, "unknown").unwrap(), 0);
        assert_eq!(vocab.resolve(VocabularyDomain::Category, "other").unwrap(), 8);
        assert_eq!(vocab.reverse(VocabularyDomain::Category, 2).unwrap(), "VideoClips");
        assert_eq!(vocab.names(VocabularyDomain::Status), vec!["unknown", "good", "dead"]);
    }

    #[test]
    fn test_fixed_domains_match_case_insensitively() {
        let vocab = vocabulary();

        assert_eq!(vocab.resolve(VocabularyDomain::Category, "videoclips").unwrap(), 2);
        assert_eq!(vocab.resolve(VocabularyDomain::Status, "GOOD").unwrap(), 1);
    }

    #[test]
    fn test_unknown_fixed_names_fail() {
        let vocab = vocabulary();

        let err = vocab
            .resolve(VocabularyDomain::Category, "Holograms")
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::UnknownVocabulary {
                domain: VocabularyDomain::Category,
                ..
            }
        ));
        assert!(vocab.resolve(VocabularyDomain::Status, "zombie").is_err());
        assert!(vocab.reverse(VocabularyDomain::Status, 42).is_err());
        assert!(vocab.reverse(VocabularyDomain::Source, 42).is_err());
    }

    #[test]
    fn test_source_created_once() {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let vocab = Vocabulary::load(Arc::clone(&db)).unwrap();
        let sources = Table::new(db, SOURCE_TABLE);
        let before = sources.count().unwrap();

        let first = vocab
            .resolve(VocabularyDomain::Source, "http://www.rss.com/torrent.xml")
            .unwrap();
        let second = vocab
            .resolve(VocabularyDomain::Source, "http://www.rss.com/torrent.xml")
            .unwrap();

        assert_eq!(first, second);
        assert!(first > 1);
        assert_eq!(sources.count().unwrap(), before + 1);
        assert_eq!(
            vocab.reverse(VocabularyDomain::Source, first).unwrap(),
            "http://www.rss.com/torrent.xml"
        );
    }

    #[test]
    fn test_source_names_are_case_sensitive() {
        let vocab = vocabulary();

        let upper = vocab.resolve(VocabularyDomain::Source, "Feed").unwrap();
        let lower = vocab.resolve(VocabularyDomain::Source, "feed").unwrap();
        assert_ne!(upper, lower);
        assert_eq!(vocab.lookup(VocabularyDomain::Source, DEFAULT_SOURCE), Some(1));
    }

    #[test]
    fn test_reload_sees_created_sources() {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let vocab = Vocabulary::load(Arc::clone(&db)).unwrap();
        let id = vocab.resolve(VocabularyDomain::Source, "dht").unwrap();

        let reloaded = Vocabulary::load(db).unwrap();
        assert_eq!(reloaded.lookup(VocabularyDomain::Source, "dht"), Some(id));
    }
}
