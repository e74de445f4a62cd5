//! The single write path: an ordered queue drained by one background thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use super::CacheError;

/// A queued mutation. It receives the store's only connection and decides
/// its own transaction boundaries.
pub(crate) type Mutation = Box<dyn FnOnce(&mut Connection) -> Result<(), CacheError> + Send>;

pub(crate) type SharedConnection = Arc<Mutex<Option<Connection>>>;

pub(crate) enum WriteCommand {
    Apply(Mutation),
    /// Answered once every command queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

#[derive(Default)]
struct WriteCounters {
    submitted: AtomicU64,
    applied: AtomicU64,
}

/// Background task that receives mutations and applies them in order
struct Writer {
    rx: mpsc::Receiver<WriteCommand>,
    conn: SharedConnection,
    counters: Arc<WriteCounters>,
}

impl Writer {
    /// Run the writer, consuming commands until every sender is gone
    fn run(mut self) {
        tracing::debug!("Cache writer started");

        while let Some(command) = self.rx.blocking_recv() {
            match command {
                WriteCommand::Apply(op) => {
                    if let Err(e) = self.apply(op) {
                        tracing::error!("Failed to apply queued mutation: {}", e);
                    }
                    self.counters.applied.fetch_add(1, Ordering::AcqRel);
                }
                WriteCommand::Barrier(reply) => {
                    // The caller may have given up waiting; nothing to do then.
                    let _ = reply.send(());
                }
            }
        }

        tracing::debug!("Cache writer shutting down");
    }

    fn apply(&self, op: Mutation) -> Result<(), CacheError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| CacheError::Internal("connection lock poisoned".to_string()))?;
        let conn = guard.as_mut().ok_or(CacheError::Closed)?;
        op(conn)
    }
}

/// Sending side of the write path, owned by `CacheDb`.
pub(crate) struct WriteQueue {
    tx: Mutex<Option<mpsc::Sender<WriteCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<WriteCounters>,
}

impl WriteQueue {
    /// Spawn the writer thread over `conn`.
    pub(crate) fn start(conn: SharedConnection, capacity: usize) -> Result<Self, CacheError> {
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(WriteCounters::default());
        let writer = Writer {
            rx,
            conn,
            counters: Arc::clone(&counters),
        };

        let thread = thread::Builder::new()
            .name("cachedb-writer".to_string())
            .spawn(move || writer.run())
            .map_err(|e| CacheError::Internal(format!("failed to spawn writer thread: {e}")))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            counters,
        })
    }

    /// Append a command, blocking while the queue is full.
    pub(crate) fn send(&self, command: WriteCommand) -> Result<(), CacheError> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| CacheError::Internal("write queue lock poisoned".to_string()))?
            .clone()
            .ok_or(CacheError::Closed)?;

        let is_mutation = matches!(command, WriteCommand::Apply(_));
        if is_mutation {
            self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        }
        tx.blocking_send(command).map_err(|_| {
            if is_mutation {
                self.counters.submitted.fetch_sub(1, Ordering::AcqRel);
            }
            CacheError::Closed
        })
    }

    /// Mutations accepted but not yet applied.
    pub(crate) fn pending(&self) -> u64 {
        let applied = self.counters.applied.load(Ordering::Acquire);
        let submitted = self.counters.submitted.load(Ordering::Acquire);
        submitted.saturating_sub(applied)
    }

    /// Close the queue and wait for the writer to drain it. Idempotent.
    pub(crate) fn shutdown(&self) {
        // Dropping the last sender ends the writer loop after the backlog.
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }

        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            // Closing from inside a queued mutation: the loop ends on its own.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Cache writer thread panicked");
            }
        }
    }
}
