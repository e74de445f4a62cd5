//! Cache core, storage adapter and shared key/error types.

mod cache_db;
mod error;
mod keys;
pub mod schema;
mod table;
mod writer;

pub use cache_db::{is_store_open, CacheDb};
pub use error::CacheError;
pub use keys::{InfoHash, PermId, INFOHASH_LEN};
pub use table::{Predicate, Record, Table};

/// Current time as unix seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
