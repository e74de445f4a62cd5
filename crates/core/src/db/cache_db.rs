//! The cache core: owner of the single store connection and the write path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rusqlite::{Connection, ErrorCode};
use tokio::sync::oneshot;

use super::schema;
use super::writer::{SharedConnection, WriteCommand, WriteQueue};
use super::CacheError;
use crate::config::DatabaseConfig;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Canonical paths of stores currently held open by a `CacheDb`.
static OPEN_STORES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// SQLite-backed cache core.
///
/// Mutations go through [`enqueue`](Self::enqueue) and are applied in
/// submission order by a background writer. Reads run on the calling thread
/// and may not see queued mutations until [`barrier`](Self::barrier) returns.
///
/// All methods block; from async code call them through `spawn_blocking`.
pub struct CacheDb {
    conn: SharedConnection,
    queue: WriteQueue,
    busy_timeout: Duration,
    /// Registry entry released on close. `None` for in-memory stores.
    registered_path: Mutex<Option<PathBuf>>,
}

impl CacheDb {
    /// Open (or create) the store described by `config`.
    pub fn open(config: &DatabaseConfig) -> Result<Self, CacheError> {
        let open_error = |reason: String| CacheError::StoreOpen {
            path: config.path.clone(),
            reason,
        };

        let canonical = canonical_store_path(&config.path).map_err(|e| open_error(e.to_string()))?;

        {
            let mut open = OPEN_STORES
                .lock()
                .map_err(|_| CacheError::Internal("store registry poisoned".to_string()))?;
            if !open.insert(canonical.clone()) {
                return Err(CacheError::AlreadyInitialized { path: canonical });
            }
        }

        let opened = Connection::open(&config.path)
            .map_err(CacheError::from)
            .and_then(|conn| Self::with_connection(conn, config));

        match opened {
            Ok(db) => {
                *db.lock_registration()? = Some(canonical.clone());
                tracing::info!("Opened cache store at {:?}", canonical);
                Ok(db)
            }
            Err(e) => {
                if let Ok(mut open) = OPEN_STORES.lock() {
                    open.remove(&canonical);
                }
                Err(match e {
                    CacheError::Database(reason) => open_error(reason),
                    other => other,
                })
            }
        }
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, CacheError> {
        let config = DatabaseConfig::at(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| CacheError::StoreOpen {
            path: config.path.clone(),
            reason: e.to_string(),
        })?;
        Self::with_connection(conn, &config)
    }

    fn with_connection(conn: Connection, config: &DatabaseConfig) -> Result<Self, CacheError> {
        let busy_timeout = config.busy_timeout();
        conn.busy_timeout(busy_timeout)?;
        schema::initialize_schema(&conn)?;

        let conn: SharedConnection = Arc::new(Mutex::new(Some(conn)));
        let queue = WriteQueue::start(Arc::clone(&conn), config.write_queue_capacity.max(1))?;

        Ok(Self {
            conn,
            queue,
            busy_timeout,
            registered_path: Mutex::new(None),
        })
    }

    /// Queue a mutation and return immediately.
    ///
    /// Failures inside `op` are logged by the writer; callers that need the
    /// outcome use [`submit`](Self::submit) instead.
    pub fn enqueue<F>(&self, op: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut Connection) -> Result<(), CacheError> + Send + 'static,
    {
        self.queue.send(WriteCommand::Apply(Box::new(op)))
    }

    /// Queue a mutation and block until it has been applied, returning its result.
    pub fn submit<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(move |conn| {
            let _ = tx.send(op(conn));
            Ok(())
        })?;
        rx.blocking_recv().map_err(|_| CacheError::Closed)?
    }

    /// Block until every mutation queued before this call has been applied.
    pub fn barrier(&self) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        self.queue.send(WriteCommand::Barrier(tx))?;
        rx.blocking_recv().map_err(|_| CacheError::Closed)
    }

    /// Run a read against the store, retrying on lock contention until the
    /// busy timeout has elapsed.
    pub fn read<T, F>(&self, mut f: F) -> Result<T, CacheError>
    where
        F: FnMut(&Connection) -> rusqlite::Result<T>,
    {
        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let result = {
                let guard = self.lock_conn()?;
                let conn = guard.as_ref().ok_or(CacheError::Closed)?;
                f(conn)
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    let waited = started.elapsed();
                    if waited >= self.busy_timeout {
                        let waited_ms = waited.as_millis() as u64;
                        tracing::warn!("Read gave up after {} ms of lock contention", waited_ms);
                        return Err(CacheError::StoreBusy { waited_ms });
                    }
                    thread::sleep(backoff.min(self.busy_timeout - waited));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Mutations accepted but not yet applied.
    pub fn pending(&self) -> u64 {
        self.queue.pending()
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Drain the write queue, close the connection and release the store path.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn close(&self) -> Result<(), CacheError> {
        self.queue.shutdown();

        let conn = self.lock_conn()?.take();
        let registered = self.lock_registration()?.take();
        if let Some(path) = &registered {
            if let Ok(mut open) = OPEN_STORES.lock() {
                open.remove(path);
            }
        }

        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| CacheError::Database(e.to_string()))?;
            tracing::info!("Closed cache store {:?}", registered.unwrap_or_default());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock_conn().map(|c| c.is_none()).unwrap_or(true)
    }

    /// Path of the backing file, if the store is on disk and still open.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock_registration().ok().and_then(|p| p.clone())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Option<Connection>>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Internal("connection lock poisoned".to_string()))
    }

    fn lock_registration(&self) -> Result<MutexGuard<'_, Option<PathBuf>>, CacheError> {
        self.registered_path
            .lock()
            .map_err(|_| CacheError::Internal("registration lock poisoned".to_string()))
    }
}

impl Drop for CacheDb {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Failed to close cache store: {}", e);
        }
    }
}

/// Whether `path` is currently held open by a live `CacheDb` in this process.
pub fn is_store_open(path: &Path) -> bool {
    let Ok(canonical) = canonical_store_path(path) else {
        return false;
    };
    OPEN_STORES
        .lock()
        .map(|open| open.contains(&canonical))
        .unwrap_or(false)
}

/// Canonical form of a store path, which need not exist yet.
///
/// A missing file resolves through its canonical parent directory.
fn canonical_store_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "store path has no file name")
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(parent.canonicalize()?.join(file_name))
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
