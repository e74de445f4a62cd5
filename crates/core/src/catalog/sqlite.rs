//! SQLite-backed torrent catalog implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use serde_json::{Map, Value as JsonValue};

use super::{
    IngestOptions, TorrentDescriptor, TorrentQuery, TorrentRecord, TorrentUpdate, FILENAME_KEY,
};
use crate::db::schema::{TORRENT_TABLE, TRACKER_TABLE};
use crate::db::{unix_now, CacheDb, CacheError, InfoHash, Table};
use crate::peer::parse_extra;
use crate::vocabulary::{
    source_id_in, Vocabulary, VocabularyDomain, CATEGORY_OTHER, CATEGORY_XXX, DEFAULT_SOURCE,
    STATUS_DEAD, STATUS_UNKNOWN,
};

/// Columns readable through [`TorrentCatalog::get_value`].
const TORRENT_COLUMNS: &[&str] = &[
    "torrent_id",
    "infohash",
    "name",
    "torrent_file_name",
    "length",
    "num_files",
    "creation_date",
    "comment",
    "category_id",
    "status_id",
    "source_id",
    "relevance",
    "num_seeders",
    "num_leechers",
    "last_tracker_check",
    "collected",
    "insert_time",
    "extra_info",
];

const SELECT_TORRENT: &str = "SELECT torrent_id, infohash, name, torrent_file_name, length, \
     num_files, creation_date, comment, category_id, status_id, source_id, relevance, \
     num_seeders, num_leechers, last_tracker_check, collected, insert_time, extra_info \
     FROM Torrent";

/// A torrent row before vocabulary ids are turned into names.
struct TorrentRow {
    torrent_id: i64,
    infohash: Vec<u8>,
    name: Option<String>,
    torrent_file_name: Option<String>,
    length: Option<i64>,
    num_files: Option<i64>,
    creation_date: Option<i64>,
    comment: Option<String>,
    category_id: Option<i64>,
    status_id: i64,
    source_id: Option<i64>,
    relevance: f64,
    num_seeders: i64,
    num_leechers: i64,
    last_tracker_check: i64,
    collected: bool,
    insert_time: i64,
    extra_info: Option<String>,
}

/// Catalog of known torrents, their trackers and sources.
#[derive(Clone)]
pub struct TorrentCatalog {
    torrents: Table,
    trackers: Table,
    vocabulary: Vocabulary,
    torrent_dir: Option<PathBuf>,
}

impl TorrentCatalog {
    pub fn new(db: Arc<CacheDb>, vocabulary: Vocabulary) -> Self {
        Self {
            torrents: Table::new(Arc::clone(&db), TORRENT_TABLE),
            trackers: Table::new(db, TRACKER_TABLE),
            vocabulary,
            torrent_dir: None,
        }
    }

    /// Directory that relative torrent file names are resolved against.
    pub fn with_torrent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.torrent_dir = Some(dir.into());
        self
    }

    fn db(&self) -> &Arc<CacheDb> {
        self.torrents.db()
    }

    /// Total number of known torrents, collected or not.
    pub fn count(&self) -> Result<u64, CacheError> {
        self.torrents.count()
    }

    /// Number of torrents whose metadata has been collected.
    pub fn count_collected(&self) -> Result<u64, CacheError> {
        self.torrents
            .count_where(&[("collected", Value::Integer(1))])
    }

    /// Whether `infohash` is known. Malformed hashes are simply unknown.
    pub fn has_torrent(&self, infohash: &[u8]) -> Result<bool, CacheError> {
        let Some(infohash) = InfoHash::from_bytes(infohash) else {
            return Ok(false);
        };
        self.torrents.exists(&[("infohash", blob(&infohash))])
    }

    /// Whether the full descriptor of `infohash` has been collected.
    pub fn has_metadata(&self, infohash: &[u8]) -> Result<bool, CacheError> {
        let Some(infohash) = InfoHash::from_bytes(infohash) else {
            return Ok(false);
        };
        self.torrents
            .exists(&[("infohash", blob(&infohash)), ("collected", Value::Integer(1))])
    }

    /// Surrogate id of `infohash`.
    pub fn get_id(&self, infohash: &[u8]) -> Result<Option<i64>, CacheError> {
        let Some(infohash) = InfoHash::from_bytes(infohash) else {
            return Ok(None);
        };
        Ok(self
            .torrents
            .get_one("torrent_id", &[("infohash", blob(&infohash))])?
            .and_then(integer))
    }

    /// Infohash of surrogate id `torrent_id`.
    pub fn get_infohash(&self, torrent_id: i64) -> Result<Option<InfoHash>, CacheError> {
        Ok(self
            .torrents
            .get_one("infohash", &[("torrent_id", Value::Integer(torrent_id))])?
            .and_then(|value| match value {
                Value::Blob(bytes) => InfoHash::from_bytes(&bytes),
                _ => None,
            }))
    }

    /// Raw value of one column of a torrent row. NULL reads as `None`.
    pub fn get_value(&self, torrent_id: i64, column: &str) -> Result<Option<Value>, CacheError> {
        if !TORRENT_COLUMNS.contains(&column) {
            return Err(CacheError::InvalidArgument(format!(
                "unknown torrent column: {column}"
            )));
        }
        self.torrents
            .get_one(column, &[("torrent_id", Value::Integer(torrent_id))])
    }

    /// Full snapshot of `infohash`, trackers included.
    pub fn get_torrent(&self, infohash: &[u8]) -> Result<Option<TorrentRecord>, CacheError> {
        let Some(infohash) = InfoHash::from_bytes(infohash) else {
            return Ok(None);
        };

        let sql = format!("{SELECT_TORRENT} WHERE infohash = ?");
        let row = self.db().read(|conn| {
            conn.query_row(&sql, params![infohash.as_bytes()], row_to_torrent)
                .optional()
        })?;

        let Some(row) = row else {
            return Ok(None);
        };
        let torrent_id = row.torrent_id;
        let mut record = self.resolve_row(row)?;
        record.trackers = self.trackers_of(torrent_id)?;
        Ok(Some(record))
    }

    /// Announce URLs of `infohash`, in the order they were first recorded.
    pub fn tracker_list(&self, infohash: &[u8]) -> Result<Vec<String>, CacheError> {
        match self.get_id(infohash)? {
            Some(torrent_id) => self.trackers_of(torrent_id),
            None => Ok(Vec::new()),
        }
    }

    fn trackers_of(&self, torrent_id: i64) -> Result<Vec<String>, CacheError> {
        self.db().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tracker FROM TrackerInfo WHERE torrent_id = ? ORDER BY tracker_id",
            )?;
            let rows = stmt.query_map(params![torrent_id], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Number of tracker rows across all torrents.
    pub fn tracker_count(&self) -> Result<u64, CacheError> {
        self.trackers.count()
    }

    /// Register a bare infohash whose metadata has not been collected yet.
    ///
    /// Does nothing if the infohash is already known.
    pub fn add_infohash(&self, infohash: &InfoHash) -> Result<(), CacheError> {
        let status_id = self.fixed_id(VocabularyDomain::Status, STATUS_UNKNOWN)?;
        let infohash = *infohash;

        self.db().enqueue(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO Torrent (infohash, status_id, insert_time) VALUES (?, ?, ?)",
                params![infohash.as_bytes(), status_id, unix_now()],
            )?;
            Ok(())
        })
    }

    /// Queue a descriptor for ingestion.
    ///
    /// Source, torrent row and trackers are written in one transaction. An
    /// already known infohash is updated in place: descriptor fields and the
    /// source are overwritten, extra attributes merged, tracker lists unioned,
    /// and status, swarm counts, relevance and insert time kept.
    ///
    /// Lengths beyond `i64::MAX` are rejected before anything is queued.
    /// Call [`CacheDb::barrier`] before reading the result back.
    pub fn ingest(
        &self,
        descriptor: &TorrentDescriptor,
        options: IngestOptions,
    ) -> Result<(), CacheError> {
        let length = i64::try_from(descriptor.length).map_err(|_| {
            CacheError::InvalidArgument(format!("length {} is too large", descriptor.length))
        })?;
        let category_id = self.primary_category(&descriptor.categories)?;
        let status_id = self.fixed_id(VocabularyDomain::Status, STATUS_UNKNOWN)?;
        let source = options.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let (filename, extra) = split_filename(options.extra);
        let trackers = descriptor.unique_trackers();
        let descriptor = descriptor.clone();
        let recorder = self.vocabulary.recorder();

        self.db().enqueue(move |conn| {
            let tx = conn.transaction()?;
            let source_id = source_id_in(&tx, &source)?;

            let existing: Option<(i64, Option<String>)> = tx
                .query_row(
                    "SELECT torrent_id, extra_info FROM Torrent WHERE infohash = ?",
                    params![descriptor.infohash.as_bytes()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let torrent_id = match existing {
                Some((torrent_id, stored_extra)) => {
                    let mut merged = parse_extra(stored_extra.as_deref())?;
                    merged.extend(extra);
                    tx.execute(
                        "UPDATE Torrent SET name = ?, length = ?, num_files = ?, creation_date = ?,
                            comment = ?, category_id = ?, source_id = ?,
                            torrent_file_name = COALESCE(?, torrent_file_name),
                            collected = 1, extra_info = ?
                         WHERE torrent_id = ?",
                        params![
                            descriptor.name,
                            length,
                            descriptor.num_files,
                            descriptor.creation_date,
                            descriptor.comment,
                            category_id,
                            source_id,
                            filename,
                            serde_json::to_string(&merged)?,
                            torrent_id,
                        ],
                    )?;
                    torrent_id
                }
                None => {
                    tx.execute(
                        "INSERT INTO Torrent (infohash, name, torrent_file_name, length, num_files,
                            creation_date, comment, category_id, status_id, source_id,
                            collected, insert_time, extra_info)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
                        params![
                            descriptor.infohash.as_bytes(),
                            descriptor.name,
                            filename,
                            length,
                            descriptor.num_files,
                            descriptor.creation_date,
                            descriptor.comment,
                            category_id,
                            status_id,
                            source_id,
                            unix_now(),
                            serde_json::to_string(&extra)?,
                        ],
                    )?;
                    tx.last_insert_rowid()
                }
            };

            insert_trackers(&tx, torrent_id, &trackers)?;
            tx.commit()?;
            recorder.remember(source_id, source);

            tracing::debug!(
                torrent_id,
                trackers = trackers.len(),
                "Ingested torrent {}",
                descriptor.infohash
            );
            Ok(())
        })
    }

    /// Queue a partial update of `infohash`.
    ///
    /// Category and status names are checked before anything is queued; an
    /// unknown name fails the whole update. Unknown infohashes are ignored.
    pub fn update(&self, infohash: &[u8], update: TorrentUpdate) -> Result<(), CacheError> {
        let infohash = InfoHash::from_bytes(infohash).ok_or_else(|| {
            CacheError::InvalidArgument(format!("infohash must be 20 bytes, got {}", infohash.len()))
        })?;

        let mut sets: Vec<(&'static str, Value)> = Vec::new();
        if let Some(categories) = &update.category {
            let category_id = self.primary_category(categories)?;
            sets.push(("category_id", Value::Integer(category_id)));
        }
        if let Some(status) = &update.status {
            let status_id = self.fixed_id(VocabularyDomain::Status, status)?;
            sets.push(("status_id", Value::Integer(status_id)));
        }
        if let Some(relevance) = update.relevance {
            sets.push(("relevance", Value::Real(relevance)));
        }
        if let Some(seeders) = update.num_seeders {
            sets.push(("num_seeders", Value::Integer(seeders)));
        }
        if let Some(leechers) = update.num_leechers {
            sets.push(("num_leechers", Value::Integer(leechers)));
        }
        if let Some(checked) = update.last_tracker_check {
            sets.push(("last_tracker_check", Value::Integer(checked)));
        }
        let (filename, extra) = split_filename(update.extra);
        if let Some(filename) = filename {
            sets.push(("torrent_file_name", Value::Text(filename)));
        }

        if sets.is_empty() && extra.is_empty() {
            return Ok(());
        }

        self.db().enqueue(move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<(i64, Option<String>)> = tx
                .query_row(
                    "SELECT torrent_id, extra_info FROM Torrent WHERE infohash = ?",
                    params![infohash.as_bytes()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((torrent_id, stored_extra)) = existing else {
                tracing::debug!("Skipping update of unknown torrent {}", infohash);
                return Ok(());
            };

            if !extra.is_empty() {
                let mut merged = parse_extra(stored_extra.as_deref())?;
                merged.extend(extra);
                sets.push(("extra_info", Value::Text(serde_json::to_string(&merged)?)));
            }

            let assignments: Vec<String> = sets
                .iter()
                .map(|(column, _)| format!("{column} = ?"))
                .collect();
            let sql = format!(
                "UPDATE Torrent SET {} WHERE torrent_id = ?",
                assignments.join(", ")
            );
            let mut values: Vec<Value> = sets.into_iter().map(|(_, value)| value).collect();
            values.push(Value::Integer(torrent_id));

            tx.execute(&sql, params_from_iter(values.iter()))?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Torrents matching `query`.
    pub fn query(&self, query: &TorrentQuery) -> Result<Vec<TorrentRecord>, CacheError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !query.include_all {
            conditions.push("status_id != ?");
            values.push(Value::Integer(
                self.fixed_id(VocabularyDomain::Status, STATUS_DEAD)?,
            ));
            conditions.push("(category_id IS NULL OR category_id != ?)");
            values.push(Value::Integer(
                self.fixed_id(VocabularyDomain::Category, CATEGORY_XXX)?,
            ));
        }
        if query.collected_only {
            conditions.push("collected = 1");
        }
        if let Some(category) = &query.category {
            conditions.push("category_id = ?");
            values.push(Value::Integer(
                self.fixed_id(VocabularyDomain::Category, category)?,
            ));
        }
        if let Some(status) = &query.status {
            conditions.push("status_id = ?");
            values.push(Value::Integer(
                self.fixed_id(VocabularyDomain::Status, status)?,
            ));
        }
        if let Some(fragment) = &query.name_contains {
            conditions.push("name LIKE ?");
            values.push(Value::Text(format!("%{fragment}%")));
        }

        let mut sql = SELECT_TORRENT.to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if let Some(order) = query.order_by {
            sql.push(' ');
            sql.push_str(order.sql());
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = self.db().read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_torrent)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter().map(|row| self.resolve_row(row)).collect()
    }

    /// Remove `infohash` together with its trackers.
    ///
    /// Torrents the local user has a preference for are kept: the call
    /// returns `false` and changes nothing, as it does for unknown or
    /// malformed infohashes. With `delete_file`, the recorded torrent file is
    /// removed after the rows are gone; failing to remove it is logged and
    /// does not undo the deletion.
    pub fn delete(&self, infohash: &[u8], delete_file: bool) -> Result<bool, CacheError> {
        let Some(infohash) = InfoHash::from_bytes(infohash) else {
            return Ok(false);
        };

        let (deleted, file_name) = self.db().submit(move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<(i64, Option<String>)> = tx
                .query_row(
                    "SELECT torrent_id, torrent_file_name FROM Torrent WHERE infohash = ?",
                    params![infohash.as_bytes()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((torrent_id, file_name)) = existing else {
                return Ok((false, None));
            };

            let preferred = tx
                .query_row(
                    "SELECT 1 FROM MyPreference WHERE torrent_id = ?",
                    params![torrent_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if preferred {
                tracing::debug!(torrent_id, "Keeping preferred torrent {}", infohash);
                return Ok((false, None));
            }

            delete_rows(&tx, torrent_id)?;
            tx.commit()?;
            tracing::debug!(torrent_id, "Deleted torrent {}", infohash);
            Ok((true, file_name))
        })?;

        // File removal stays off the writer thread
        if delete_file {
            if let Some(file_name) = file_name {
                remove_torrent_file(&resolve_path(self.torrent_dir.as_deref(), &file_name));
            }
        }
        Ok(deleted)
    }

    /// Evict collected torrents until at most `target` remain.
    ///
    /// Least relevant go first, then oldest, then lowest id. Torrents with a
    /// preference entry are never evicted. Returns how many were removed.
    pub fn evict(&self, target: u64) -> Result<u64, CacheError> {
        self.db().submit(move |conn| {
            let tx = conn.transaction()?;
            let collected: i64 = tx.query_row(
                "SELECT COUNT(*) FROM Torrent WHERE collected = 1",
                [],
                |row| row.get(0),
            )?;
            let excess = collected - target.min(i64::MAX as u64) as i64;
            if excess <= 0 {
                return Ok(0);
            }

            let victims: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT torrent_id FROM Torrent
                     WHERE collected = 1
                       AND torrent_id NOT IN (SELECT torrent_id FROM MyPreference)
                     ORDER BY relevance ASC, insert_time ASC, torrent_id ASC
                     LIMIT ?",
                )?;
                let rows = stmt.query_map(params![excess], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            for torrent_id in &victims {
                delete_rows(&tx, *torrent_id)?;
            }
            tx.commit()?;

            tracing::debug!(evicted = victims.len(), target, "Evicted collected torrents");
            Ok(victims.len() as u64)
        })
    }

    fn fixed_id(&self, domain: VocabularyDomain, name: &str) -> Result<i64, CacheError> {
        self.vocabulary
            .lookup(domain, name)
            .ok_or_else(|| CacheError::unknown_vocabulary(domain, name))
    }

    fn primary_category(&self, categories: &[String]) -> Result<i64, CacheError> {
        let name = categories.first().map(String::as_str).unwrap_or(CATEGORY_OTHER);
        self.fixed_id(VocabularyDomain::Category, name)
    }

    fn resolve_row(&self, row: TorrentRow) -> Result<TorrentRecord, CacheError> {
        let infohash = InfoHash::from_bytes(&row.infohash).ok_or_else(|| {
            CacheError::Internal(format!("torrent {} has a malformed infohash", row.torrent_id))
        })?;
        let category = row
            .category_id
            .map(|id| self.vocabulary.reverse(VocabularyDomain::Category, id))
            .transpose()?
            .into_iter()
            .collect();
        let source = row
            .source_id
            .map(|id| self.vocabulary.reverse(VocabularyDomain::Source, id))
            .transpose()?;

        Ok(TorrentRecord {
            torrent_id: row.torrent_id,
            infohash,
            name: row.name,
            torrent_file_name: row.torrent_file_name,
            length: row.length.unwrap_or_default().max(0) as u64,
            num_files: row.num_files.unwrap_or_default().max(0) as u32,
            creation_date: row.creation_date,
            comment: row.comment,
            category,
            status: self.vocabulary.reverse(VocabularyDomain::Status, row.status_id)?,
            source,
            relevance: row.relevance,
            num_seeders: row.num_seeders,
            num_leechers: row.num_leechers,
            last_tracker_check: row.last_tracker_check,
            collected: row.collected,
            insert_time: row.insert_time,
            extra: parse_extra(row.extra_info.as_deref())?,
            trackers: Vec::new(),
        })
    }
}

fn row_to_torrent(row: &Row) -> rusqlite::Result<TorrentRow> {
    Ok(TorrentRow {
        torrent_id: row.get(0)?,
        infohash: row.get(1)?,
        name: row.get(2)?,
        torrent_file_name: row.get(3)?,
        length: row.get(4)?,
        num_files: row.get(5)?,
        creation_date: row.get(6)?,
        comment: row.get(7)?,
        category_id: row.get(8)?,
        status_id: row.get(9)?,
        source_id: row.get(10)?,
        relevance: row.get(11)?,
        num_seeders: row.get(12)?,
        num_leechers: row.get(13)?,
        last_tracker_check: row.get(14)?,
        collected: row.get(15)?,
        insert_time: row.get(16)?,
        extra_info: row.get(17)?,
    })
}

fn insert_trackers(tx: &Transaction, torrent_id: i64, trackers: &[String]) -> rusqlite::Result<()> {
    let mut stmt =
        tx.prepare("INSERT OR IGNORE INTO TrackerInfo (torrent_id, tracker) VALUES (?, ?)")?;
    for url in trackers {
        stmt.execute(params![torrent_id, url])?;
    }
    Ok(())
}

/// Delete a torrent row and its trackers. Callers skip preferred torrents.
fn delete_rows(tx: &Transaction, torrent_id: i64) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM TrackerInfo WHERE torrent_id = ?", params![torrent_id])?;
    tx.execute("DELETE FROM Torrent WHERE torrent_id = ?", params![torrent_id])?;
    Ok(())
}

/// Pull the file path out of the extra attributes.
fn split_filename(mut extra: Map<String, JsonValue>) -> (Option<String>, Map<String, JsonValue>) {
    let filename = match extra.remove(FILENAME_KEY) {
        Some(JsonValue::String(path)) => Some(path),
        Some(other) => {
            extra.insert(FILENAME_KEY.to_string(), other);
            None
        }
        None => None,
    };
    (filename, extra)
}

fn resolve_path(torrent_dir: Option<&Path>, file_name: &str) -> PathBuf {
    let path = Path::new(file_name);
    match torrent_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Best-effort removal of a torrent file.
fn remove_torrent_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed torrent file {:?}", path),
        Err(e) => tracing::warn!("Failed to remove torrent file {:?}: {}", path, e),
    }
}

fn blob(infohash: &InfoHash) -> Value {
    Value::Blob(infohash.as_bytes().to_vec())
}

fn integer(value: Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(i),
        _ => None,
    }
}
