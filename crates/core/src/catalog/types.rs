//! Types for the torrent catalog.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::db::InfoHash;

/// Extra-attribute key whose value is stored as the torrent's file path.
pub const FILENAME_KEY: &str = "filename";

/// A parsed content descriptor, as handed over by the torrent-file parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentDescriptor {
    pub infohash: InfoHash,
    pub name: String,
    /// Total size in bytes.
    pub length: u64,
    #[serde(default)]
    pub num_files: u32,
    /// Unix seconds, from the descriptor's creation date field.
    #[serde(default)]
    pub creation_date: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Category names; the first one is stored as the primary category.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Announce URLs from the announce field and the announce list.
    #[serde(default)]
    pub trackers: Vec<String>,
}

impl TorrentDescriptor {
    pub fn new(infohash: InfoHash, name: impl Into<String>, length: u64) -> Self {
        Self {
            infohash,
            name: name.into(),
            length,
            num_files: 1,
            creation_date: None,
            comment: None,
            categories: Vec::new(),
            trackers: Vec::new(),
        }
    }

    pub fn with_tracker(mut self, url: impl Into<String>) -> Self {
        self.trackers.push(url.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Announce URLs trimmed, without empties and duplicates, in first-seen order.
    pub(crate) fn unique_trackers(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.trackers.len());
        for url in self.trackers.iter().map(|t| t.trim()) {
            if !url.is_empty() && !seen.iter().any(|s: &String| s == url) {
                seen.push(url.to_string());
            }
        }
        seen
    }
}

/// Options for [`TorrentCatalog::ingest`](super::TorrentCatalog::ingest).
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Where the descriptor came from; defaults to the gossip source.
    pub source: Option<String>,
    /// Attributes merged into the row. `filename` records the backing file.
    pub extra: Map<String, JsonValue>,
}

impl IngestOptions {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, path: impl Into<String>) -> Self {
        self.extra
            .insert(FILENAME_KEY.to_string(), JsonValue::String(path.into()));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Partial update of a torrent's mutable fields. `None` leaves a field as is.
///
/// Download progress lives in the preference ledger and is not updated here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentUpdate {
    pub relevance: Option<f64>,
    /// Category names; the first one becomes the primary category.
    pub category: Option<Vec<String>>,
    pub status: Option<String>,
    pub num_seeders: Option<i64>,
    pub num_leechers: Option<i64>,
    /// Unix seconds of the last tracker scrape.
    pub last_tracker_check: Option<i64>,
    #[serde(default)]
    pub extra: Map<String, JsonValue>,
}

/// Detached snapshot of a torrent row with vocabulary ids resolved to names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentRecord {
    pub torrent_id: i64,
    pub infohash: InfoHash,
    /// `None` until the metadata has been collected.
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torrent_file_name: Option<String>,
    pub length: u64,
    pub num_files: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub category: Vec<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub relevance: f64,
    pub num_seeders: i64,
    pub num_leechers: i64,
    pub last_tracker_check: i64,
    /// Whether the full descriptor has been ingested.
    pub collected: bool,
    pub insert_time: i64,
    pub extra: Map<String, JsonValue>,
    /// Announce URLs; only filled by single-torrent lookups.
    #[serde(default)]
    pub trackers: Vec<String>,
}

/// Sort order for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentOrder {
    /// Highest relevance first.
    Relevance,
    /// Most seeders first.
    Seeders,
    /// Most recently inserted first.
    Newest,
    Name,
}

impl TorrentOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Relevance => "ORDER BY relevance DESC, torrent_id ASC",
            Self::Seeders => "ORDER BY num_seeders DESC, torrent_id ASC",
            Self::Newest => "ORDER BY insert_time DESC, torrent_id DESC",
            Self::Name => "ORDER BY name COLLATE NOCASE ASC, torrent_id ASC",
        }
    }
}

/// Filter for [`TorrentCatalog::query`](super::TorrentCatalog::query).
///
/// By default dead torrents and the `xxx` category are left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentQuery {
    /// Also return rows that are dead or in a hidden category.
    #[serde(default)]
    pub include_all: bool,
    /// Only rows whose metadata has been collected.
    #[serde(default)]
    pub collected_only: bool,
    pub category: Option<String>,
    pub status: Option<String>,
    /// Case-insensitive substring match on the name.
    pub name_contains: Option<String>,
    pub order_by: Option<TorrentOrder>,
    pub limit: Option<u32>,
}
