//! Torrent catalog - every infohash the node knows about.
//!
//! Rows start either as bare infohashes (seen but not downloaded) or as
//! fully ingested descriptors. Reads go straight to the store; writes are
//! queued on the cache writer, so call [`CacheDb::barrier`](crate::db::CacheDb::barrier)
//! before reading back something just written.

mod sqlite;
mod types;

pub use sqlite::TorrentCatalog;
pub use types::*;
