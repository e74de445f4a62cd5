//! Preference ledger: the local user's own downloads, one entry per torrent.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::catalog::TorrentCatalog;
use crate::db::schema::PREFERENCE_TABLE;
use crate::db::{unix_now, CacheDb, CacheError, InfoHash, Record, Table};
use crate::vocabulary::{CATEGORY_OTHER, STATUS_DEAD};

const PREFERENCE_COLUMNS: &[&str] = &["torrent_id", "destination_path", "progress", "creation_time"];

/// Fields supplied when adding a preference. Missing values get defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceFields {
    pub destination_path: Option<String>,
    /// Percent complete; defaults to 0.
    pub progress: Option<f64>,
    /// Unix seconds; defaults to now.
    pub creation_time: Option<i64>,
}

impl PreferenceFields {
    pub fn at(destination_path: impl Into<String>) -> Self {
        Self {
            destination_path: Some(destination_path.into()),
            ..Default::default()
        }
    }
}

/// Detached snapshot of a preference row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub torrent_id: i64,
    pub destination_path: Option<String>,
    pub progress: f64,
    pub creation_time: i64,
}

impl TryFrom<Record> for PreferenceEntry {
    type Error = CacheError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        Ok(Self {
            torrent_id: record
                .get_i64("torrent_id")
                .ok_or_else(|| CacheError::Internal("preference row without torrent_id".into()))?,
            destination_path: record.get_text("destination_path").map(str::to_string),
            progress: record.get_f64("progress").unwrap_or_default(),
            creation_time: record.get_i64("creation_time").unwrap_or_default(),
        })
    }
}

/// Per-category totals over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPreferenceStats {
    pub count: u64,
    /// Summed content length in bytes.
    pub total_length: u64,
    pub total_progress: f64,
}

/// Ledger of the torrents the local user has chosen to download.
#[derive(Clone)]
pub struct PreferenceLedger {
    table: Table,
    catalog: TorrentCatalog,
}

impl PreferenceLedger {
    pub fn new(db: Arc<CacheDb>, catalog: TorrentCatalog) -> Self {
        Self {
            table: Table::new(db, PREFERENCE_TABLE),
            catalog,
        }
    }

    pub fn count(&self) -> Result<u64, CacheError> {
        self.table.count()
    }

    pub fn has(&self, torrent_id: i64) -> Result<bool, CacheError> {
        self.table.exists(&[("torrent_id", Value::Integer(torrent_id))])
    }

    pub fn get(&self, torrent_id: i64) -> Result<Option<PreferenceEntry>, CacheError> {
        self.table
            .fetch_one(PREFERENCE_COLUMNS, &[("torrent_id", Value::Integer(torrent_id))])?
            .map(PreferenceEntry::try_from)
            .transpose()
    }

    /// Preference entry of `infohash`, if the torrent is known and preferred.
    pub fn get_by_infohash(&self, infohash: &[u8]) -> Result<Option<PreferenceEntry>, CacheError> {
        match self.catalog.get_id(infohash)? {
            Some(torrent_id) => self.get(torrent_id),
            None => Ok(None),
        }
    }

    /// Record a preference for `torrent_id`.
    ///
    /// Fails with `UnknownTorrent` if the catalog has no such torrent. Returns
    /// `false`, leaving the stored entry alone, if one already exists.
    pub fn add(&self, torrent_id: i64, fields: PreferenceFields) -> Result<bool, CacheError> {
        let progress = fields.progress.unwrap_or(0.0);
        check_progress(progress)?;
        let creation_time = fields.creation_time.unwrap_or_else(unix_now);
        let destination_path = fields.destination_path;

        self.table.db().submit(move |conn| {
            let tx = conn.transaction()?;
            let known = tx
                .query_row(
                    "SELECT 1 FROM Torrent WHERE torrent_id = ?",
                    params![torrent_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !known {
                return Err(CacheError::UnknownTorrent(torrent_id));
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO MyPreference
                    (torrent_id, destination_path, progress, creation_time)
                 VALUES (?, ?, ?, ?)",
                params![torrent_id, destination_path, progress, creation_time],
            )?;
            tx.commit()?;

            if inserted > 0 {
                tracing::debug!(torrent_id, "Added preference");
            }
            Ok(inserted > 0)
        })
    }

    /// Queue a progress update. Unknown entries are left alone.
    pub fn update_progress(&self, torrent_id: i64, progress: f64) -> Result<(), CacheError> {
        check_progress(progress)?;

        self.table.db().enqueue(move |conn| {
            conn.execute(
                "UPDATE MyPreference SET progress = ? WHERE torrent_id = ?",
                params![progress, torrent_id],
            )?;
            Ok(())
        })
    }

    /// Remove the entry for `torrent_id`. The torrent itself stays in the catalog.
    pub fn delete(&self, torrent_id: i64) -> Result<bool, CacheError> {
        self.table.db().submit(move |conn| {
            let removed = conn.execute(
                "DELETE FROM MyPreference WHERE torrent_id = ?",
                params![torrent_id],
            )?;
            if removed > 0 {
                tracing::debug!(torrent_id, "Deleted preference");
            }
            Ok(removed > 0)
        })
    }

    /// Infohashes of live preferred torrents, newest preference first.
    ///
    /// Torrents whose status is dead are left out.
    pub fn list_by_recency(&self, limit: Option<usize>) -> Result<Vec<InfoHash>, CacheError> {
        let limit = limit.map_or(-1, |n| n.min(i64::MAX as usize) as i64);

        let hashes: Vec<Vec<u8>> = self.table.db().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.infohash FROM MyPreference p
                 JOIN Torrent t ON t.torrent_id = p.torrent_id
                 LEFT JOIN Status s ON s.status_id = t.status_id
                 WHERE s.name IS NULL OR s.name != ?
                 ORDER BY p.creation_time DESC, p.torrent_id DESC
                 LIMIT ?",
            )?;
            let rows = stmt.query_map(params![STATUS_DEAD, limit], |row| row.get(0))?;
            rows.collect()
        })?;

        Ok(hashes
            .iter()
            .filter_map(|bytes| InfoHash::from_bytes(bytes))
            .collect())
    }

    /// Infohashes of every preferred torrent, in no particular order.
    pub fn list_infohashes(&self) -> Result<Vec<InfoHash>, CacheError> {
        let hashes: Vec<Vec<u8>> = self.table.db().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.infohash FROM MyPreference p
                 JOIN Torrent t ON t.torrent_id = p.torrent_id",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })?;

        Ok(hashes
            .iter()
            .filter_map(|bytes| InfoHash::from_bytes(bytes))
            .collect())
    }

    /// Totals per category name. Torrents without a category count as `other`.
    pub fn stats(&self) -> Result<BTreeMap<String, CategoryPreferenceStats>, CacheError> {
        let rows: Vec<(String, i64, i64, f64)> = self.table.db().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(c.name, ?), COUNT(*),
                        COALESCE(SUM(t.length), 0), COALESCE(SUM(p.progress), 0.0)
                 FROM MyPreference p
                 JOIN Torrent t ON t.torrent_id = p.torrent_id
                 LEFT JOIN Category c ON c.category_id = t.category_id
                 GROUP BY 1",
            )?;
            let rows = stmt.query_map(params![CATEGORY_OTHER], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect()
        })?;

        Ok(rows
            .into_iter()
            .map(|(category, count, length, progress)| {
                (
                    category,
                    CategoryPreferenceStats {
                        count: count.max(0) as u64,
                        total_length: length.max(0) as u64,
                        total_progress: progress,
                    },
                )
            })
            .collect())
    }
}

fn check_progress(progress: f64) -> Result<(), CacheError> {
    if (0.0..=100.0).contains(&progress) {
        Ok(())
    } else {
        Err(CacheError::InvalidArgument(format!(
            "progress must be between 0 and 100, got {progress}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IngestOptions, TorrentDescriptor, TorrentUpdate};
    use crate::vocabulary::Vocabulary;

    struct Fixture {
        db: Arc<CacheDb>,
        catalog: TorrentCatalog,
        ledger: PreferenceLedger,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let vocabulary = Vocabulary::load(Arc::clone(&db)).unwrap();
        let catalog = TorrentCatalog::new(Arc::clone(&db), vocabulary);
        let ledger = PreferenceLedger::new(Arc::clone(&db), catalog.clone());
        Fixture {
            db,
            catalog,
            ledger,
        }
    }

    fn hash(tag: u8) -> InfoHash {
        InfoHash::new([tag; 20])
    }

    fn ingest(f: &Fixture, tag: u8, category: &str, length: u64) -> i64 {
        let descriptor =
            TorrentDescriptor::new(hash(tag), format!("t{tag}"), length).with_category(category);
        f.catalog
            .ingest(&descriptor, IngestOptions::default())
            .unwrap();
        f.db.barrier().unwrap();
        f.catalog.get_id(hash(tag).as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn test_add_defaults() {
        let f = fixture();
        let id = ingest(&f, 1, "Video", 100);

        assert!(f.ledger.add(id, PreferenceFields::at("/downloads")).unwrap());

        let entry = f.ledger.get(id).unwrap().unwrap();
        assert_eq!(entry.destination_path.as_deref(), Some("/downloads"));
        assert_eq!(entry.progress, 0.0);
        assert!((unix_now() - entry.creation_time).abs() < 10);
        assert!(f.ledger.has(id).unwrap());
    }

    #[test]
    fn test_add_unknown_torrent() {
        let f = fixture();
        let err = f
            .ledger
            .add(
                999,
                PreferenceFields {
                    progress: Some(50.0),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, CacheError::UnknownTorrent(999)));
        assert_eq!(f.ledger.count().unwrap(), 0);
    }

    #[test]
    fn test_add_existing_keeps_entry() {
        let f = fixture();
        let id = ingest(&f, 2, "Video", 100);
        let fields = PreferenceFields {
            destination_path: Some("/a".into()),
            progress: Some(12.5),
            creation_time: Some(1000),
        };

        assert!(f.ledger.add(id, fields).unwrap());
        assert!(!f.ledger.add(id, PreferenceFields::at("/b")).unwrap());

        let entry = f.ledger.get(id).unwrap().unwrap();
        assert_eq!(entry.destination_path.as_deref(), Some("/a"));
        assert_eq!(entry.progress, 12.5);
        assert_eq!(entry.creation_time, 1000);
    }

    #[test]
    fn test_update_progress() {
        let f = fixture();
        let id = ingest(&f, 3, "Video", 100);
        f.ledger.add(id, PreferenceFields::default()).unwrap();

        f.ledger.update_progress(id, 3.14).unwrap();
        f.db.barrier().unwrap();
        assert_eq!(f.ledger.get(id).unwrap().unwrap().progress, 3.14);

        let err = f.ledger.update_progress(id, 101.0).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[test]
    fn test_delete_keeps_torrent() {
        let f = fixture();
        let id = ingest(&f, 4, "Video", 100);
        f.ledger.add(id, PreferenceFields::default()).unwrap();

        assert!(f.ledger.delete(id).unwrap());
        assert!(!f.ledger.delete(id).unwrap());
        assert!(!f.ledger.has(id).unwrap());
        assert!(f.catalog.has_torrent(hash(4).as_bytes()).unwrap());
    }

    #[test]
    fn test_catalog_delete_keeps_preferred_torrent() {
        let f = fixture();
        let id = ingest(&f, 5, "Video", 100);
        f.ledger.add(id, PreferenceFields::at("/downloads")).unwrap();

        assert!(!f.catalog.delete(hash(5).as_bytes(), false).unwrap());
        assert!(f.catalog.has_torrent(hash(5).as_bytes()).unwrap());
        assert!(f.ledger.has(id).unwrap());

        f.ledger.delete(id).unwrap();
        assert!(f.catalog.delete(hash(5).as_bytes(), false).unwrap());
        assert!(!f.catalog.has_torrent(hash(5).as_bytes()).unwrap());
    }

    #[test]
    fn test_catalog_delete_keeps_preferred_torrent_file() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.torrent");
        std::fs::write(&path, b"d4:infod4:name4:keptee").unwrap();
        f.catalog
            .ingest(
                &TorrentDescriptor::new(hash(8), "kept", 1),
                IngestOptions::default().with_filename(path.to_string_lossy()),
            )
            .unwrap();
        f.db.barrier().unwrap();
        let id = f.catalog.get_id(hash(8).as_bytes()).unwrap().unwrap();
        f.ledger.add(id, PreferenceFields::default()).unwrap();

        assert!(!f.catalog.delete(hash(8).as_bytes(), true).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_evict_skips_preferred() {
        let f = fixture();
        let kept = ingest(&f, 6, "Video", 100);
        ingest(&f, 7, "Video", 100);
        f.ledger.add(kept, PreferenceFields::default()).unwrap();

        assert_eq!(f.catalog.evict(0).unwrap(), 1);
        assert!(f.catalog.has_torrent(hash(6).as_bytes()).unwrap());
        assert!(!f.catalog.has_torrent(hash(7).as_bytes()).unwrap());
    }

    #[test]
    fn test_list_by_recency() {
        let f = fixture();
        for (tag, created) in [(10u8, 300), (11, 100), (12, 200), (13, 400)] {
            let id = ingest(&f, tag, "Video", 100);
            f.ledger
                .add(
                    id,
                    PreferenceFields {
                        creation_time: Some(created),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        f.catalog
            .update(
                hash(13).as_bytes(),
                TorrentUpdate {
                    status: Some(STATUS_DEAD.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        f.db.barrier().unwrap();

        assert_eq!(
            f.ledger.list_by_recency(None).unwrap(),
            vec![hash(10), hash(12), hash(11)]
        );
        assert_eq!(f.ledger.list_by_recency(Some(1)).unwrap(), vec![hash(10)]);
        assert_eq!(f.ledger.list_infohashes().unwrap().len(), 4);
    }

    #[test]
    fn test_get_by_infohash() {
        let f = fixture();
        let id = ingest(&f, 14, "Video", 100);
        f.ledger.add(id, PreferenceFields::default()).unwrap();

        let entry = f.ledger.get_by_infohash(hash(14).as_bytes()).unwrap();
        assert_eq!(entry.map(|e| e.torrent_id), Some(id));
        assert!(f.ledger.get_by_infohash(b"short").unwrap().is_none());
    }

    #[test]
    fn test_stats_per_category() {
        let f = fixture();
        let a = ingest(&f, 20, "Video", 100);
        let b = ingest(&f, 21, "Video", 50);
        let c = ingest(&f, 22, "Audio", 7);
        for (id, progress) in [(a, 10.0), (b, 20.0), (c, 100.0)] {
            f.ledger
                .add(
                    id,
                    PreferenceFields {
                        progress: Some(progress),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let stats = f.ledger.stats().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats["Video"],
            CategoryPreferenceStats {
                count: 2,
                total_length: 150,
                total_progress: 30.0,
            }
        );
        assert_eq!(stats["Audio"].count, 1);
        assert_eq!(stats["Audio"].total_length, 7);
    }
}
