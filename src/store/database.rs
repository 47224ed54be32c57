//! The [`Database`] executor.
//!
//! One writer thread owns the write connection and runs every write inside
//! an IMMEDIATE transaction. Reads go through a bounded queue to reader
//! threads backed by a pool of query-only connections; when the queue is
//! full the read runs on the submitting thread over its own connection.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender, TrySendError};
use futures::channel::oneshot;
use parking_lot::{Mutex, RwLock};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, error, info, warn};

use super::completion::{panic_message, CompletionContext, DbFuture};
use super::{DbConfig, DbSchema, DbState, TransactionObserver};
use crate::error::{DbError, Result};
use crate::schema::Mapper;

type ReadPool = Pool<SqliteConnectionManager>;
type WriteJob = Box<dyn FnOnce(&mut Connection) + Send>;
type ReadJob = Box<dyn FnOnce(Result<&Connection>) + Send>;

/// Settings applied to every read connection, pooled or not.
#[derive(Debug, Clone, Copy)]
struct ReadCustomizer {
    busy_timeout_ms: u32,
    foreign_keys: bool,
}

impl ReadCustomizer {
    fn new(config: &DbConfig) -> Self {
        Self {
            busy_timeout_ms: config.busy_timeout_ms,
            foreign_keys: config.foreign_keys,
        }
    }

    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(Duration::from_millis(u64::from(self.busy_timeout_ms)))?;
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(())
    }

    /// A connection outside the pool, for reads that overflow the queue.
    fn open(&self, config: &DbConfig) -> Result<Connection> {
        let conn = Connection::open(&config.path)?;
        self.apply(&conn)?;
        Ok(conn)
    }
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ReadCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        self.apply(conn)
    }
}

/// State reachable from the worker threads.
struct Shared {
    mapper: Arc<Mapper>,
    observer: RwLock<Option<Arc<dyn TransactionObserver>>>,
    next_transaction: AtomicU64,
}

struct Runtime {
    writer: Sender<WriteJob>,
    readers: Sender<ReadJob>,
    completion: Arc<CompletionContext>,
    writer_thread: JoinHandle<()>,
    reader_threads: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// True on the writer, a reader or the completion thread.
    fn owns_current_thread(&self) -> bool {
        let current = thread::current().id();
        self.writer_thread.thread().id() == current
            || self
                .reader_threads
                .iter()
                .any(|handle| handle.thread().id() == current)
            || self.completion.is_current()
    }

    /// Drains the queues, then joins the workers and the completion thread.
    fn shutdown(self) {
        let Runtime {
            writer,
            readers,
            completion,
            writer_thread,
            reader_threads,
        } = self;

        drop(readers);
        for handle in reader_threads {
            join(handle, "reader");
        }
        drop(writer);
        join(writer_thread, "writer");
        completion.shutdown();
    }
}

enum State {
    Unopened,
    Open(Runtime),
    Closing,
    Closed,
}

struct Inner {
    config: DbConfig,
    schema: Box<dyn DbSchema>,
    shared: Arc<Shared>,
    state: Mutex<State>,
}

/// Handle to one database file and its worker threads.
///
/// Cloning is cheap; the store opens on the first submitted operation and
/// closes on [`Database::close`] or when the last handle is dropped.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    pub fn new(config: DbConfig, schema: impl DbSchema, mapper: Arc<Mapper>) -> Result<Self> {
        config.validate()?;
        if schema.version() == 0 {
            return Err(DbError::Configuration(
                "schema version must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                schema: Box::new(schema),
                shared: Arc::new(Shared {
                    mapper,
                    observer: RwLock::new(None),
                    next_transaction: AtomicU64::new(1),
                }),
                state: Mutex::new(State::Unopened),
            }),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.inner.shared.mapper
    }

    pub fn state(&self) -> DbState {
        match &*self.inner.state.lock() {
            State::Unopened => DbState::Unopened,
            State::Open(_) => DbState::Open,
            State::Closing => DbState::Closing,
            State::Closed => DbState::Closed,
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn TransactionObserver>) {
        *self.inner.shared.observer.write() = Some(observer);
    }

    /// Opens the store now instead of on the first operation.
    pub fn open(&self) -> Result<()> {
        self.inner.with_runtime(|_| ())
    }

    /// Runs `work` on a read connection.
    pub fn read<T, F>(&self, work: F) -> Result<DbFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Mapper) -> Result<T> + Send + 'static,
    {
        let (readers, completion) = self
            .inner
            .with_runtime(|rt| (rt.readers.clone(), Arc::clone(&rt.completion)))?;
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::clone(&self.inner.shared);
        let job: ReadJob = Box::new(move |conn: Result<&Connection>| {
            if sender.is_canceled() {
                debug!("read cancelled before it started");
                return;
            }
            let outcome = conn.and_then(|conn| {
                catch_unwind(AssertUnwindSafe(|| work(conn, &shared.mapper)))
                    .unwrap_or_else(|panic| Err(abandoned("read", panic.as_ref())))
            });
            let _ = sender.send(outcome);
        });

        match readers.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                let config = &self.inner.config;
                warn!(
                    capacity = config.read_queue_capacity,
                    "read queue full, running on the caller thread"
                );
                // the pool is sized for the reader threads only
                match ReadCustomizer::new(config).open(config) {
                    Ok(conn) => {
                        job(Ok(&conn));
                        if let Err((_, e)) = conn.close() {
                            warn!(error = %e, "closing an overflow read connection failed");
                        }
                    }
                    Err(e) => job(Err(e)),
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(DbError::Closed),
        }
        Ok(DbFuture::new(receiver, completion))
    }

    /// Runs `work` on the writer thread inside its own transaction.
    ///
    /// An error or panic inside `work` rolls back everything it wrote.
    pub fn write<T, F>(&self, work: F) -> Result<DbFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Mapper) -> Result<T> + Send + 'static,
    {
        let (writer, completion) = self
            .inner
            .with_runtime(|rt| (rt.writer.clone(), Arc::clone(&rt.completion)))?;
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::clone(&self.inner.shared);
        let job: WriteJob = Box::new(move |conn: &mut Connection| {
            if sender.is_canceled() {
                debug!("write cancelled before it started");
                return;
            }
            let outcome = run_in_transaction(conn, &shared, work);
            let _ = sender.send(outcome);
        });
        writer.send(job).map_err(|_| DbError::Closed)?;
        Ok(DbFuture::new(receiver, completion))
    }

    /// Drains and stops every worker. Later submissions fail with [`DbError::Closed`].
    pub fn close(&self) {
        self.inner.close();
    }
}

fn run_in_transaction<T>(
    conn: &mut Connection,
    shared: &Shared,
    work: impl FnOnce(&Connection, &Mapper) -> Result<T>,
) -> Result<T> {
    let id = shared.next_transaction.fetch_add(1, Ordering::SeqCst);
    let observer = shared.observer.read().clone();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if let Some(observer) = &observer {
        observer.on_begin(id);
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| work(&*tx, &shared.mapper)))
        .unwrap_or_else(|panic| Err(abandoned("write", panic.as_ref())));
    let outcome = match outcome {
        Ok(value) => tx.commit().map(|()| value).map_err(DbError::from),
        Err(e) => {
            if let Err(rollback) = tx.rollback() {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    };

    if let Some(observer) = &observer {
        match &outcome {
            Ok(_) => observer.on_commit(id),
            Err(_) => observer.on_rollback(id),
        }
    }
    outcome
}

fn abandoned(kind: &str, panic: &(dyn std::any::Any + Send)) -> DbError {
    DbError::Abandoned(format!("{kind} panicked: {}", panic_message(panic)))
}

impl Inner {
    fn with_runtime<T>(&self, f: impl FnOnce(&Runtime) -> T) -> Result<T> {
        let mut state = self.state.lock();
        if let State::Unopened = *state {
            *state = State::Open(self.start()?);
        }
        match &*state {
            State::Open(runtime) => Ok(f(runtime)),
            _ => Err(DbError::Closed),
        }
    }

    fn start(&self) -> Result<Runtime> {
        let config = &self.config;
        config.ensure_parent_dir()?;
        let mut conn = Connection::open(&config.path)?;
        self.configure_writer(&conn)?;
        self.create_or_upgrade(&mut conn)?;

        let pool: ReadPool = Pool::builder()
            .max_size(u32::try_from(config.read_threads).unwrap_or(u32::MAX))
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(ReadCustomizer::new(config)))
            .build(SqliteConnectionManager::file(&config.path))?;

        let completion = CompletionContext::start(&config.completion_thread_name)?;

        let (writer, write_queue) = channel::unbounded::<WriteJob>();
        let writer_thread = thread::Builder::new()
            .name(config.write_thread_name.clone())
            .spawn(move || {
                for job in write_queue {
                    job(&mut conn);
                }
                if let Err((_, e)) = conn.close() {
                    warn!(error = %e, "closing the write connection failed");
                }
                debug!("writer stopped");
            })?;

        let (readers, read_queue) = channel::bounded::<ReadJob>(config.read_queue_capacity);
        let reader_threads = (1..=config.read_threads)
            .map(|n| {
                let queue = read_queue.clone();
                let pool = pool.clone();
                thread::Builder::new()
                    .name(format!("{}{n}", config.read_thread_name_prefix))
                    .spawn(move || {
                        for job in queue {
                            match pool.get() {
                                Ok(conn) => job(Ok(&*conn)),
                                Err(e) => job(Err(e.into())),
                            }
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        info!(
            path = %config.path.display(),
            version = self.schema.version(),
            journal_mode = %config.effective_journal_mode(),
            read_threads = config.read_threads,
            "database opened"
        );
        Ok(Runtime {
            writer,
            readers,
            completion,
            writer_thread,
            reader_threads,
        })
    }

    fn configure_writer(&self, conn: &Connection) -> Result<()> {
        let config = &self.config;
        conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        let journal: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.effective_journal_mode(),
            |row| row.get(0),
        )?;
        debug!(journal_mode = %journal, "journal mode applied");
        if let Some(mode) = &config.synchronous {
            conn.pragma_update(None, "synchronous", mode.to_ascii_uppercase())?;
        }
        self.schema.on_configure(conn)
    }

    /// Brings the file to the schema version inside one transaction.
    fn create_or_upgrade(&self, conn: &mut Connection) -> Result<()> {
        let target = self.schema.version();
        let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current == target {
            return Ok(());
        }
        if current > target {
            return Err(DbError::Schema(format!(
                "database version {current} is newer than schema version {target}"
            )));
        }

        let mapper = &self.shared.mapper;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if current == 0 {
            info!(version = target, "creating schema");
            self.schema.on_create(&tx, mapper)?;
        } else {
            info!(from = current, to = target, "upgrading schema");
            self.schema.on_upgrade(&tx, mapper, current, target)?;
        }
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        Ok(())
    }

    fn close(&self) {
        let runtime = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Closing) {
                State::Open(runtime) => runtime,
                State::Closing => return,
                State::Unopened | State::Closed => {
                    *state = State::Closed;
                    return;
                }
            }
        };

        info!(path = %self.config.path.display(), "closing database");
        if runtime.owns_current_thread() {
            // The running job's outcome is sent only after this returns, and
            // the completion thread may be waiting on it.
            *self.state.lock() = State::Closed;
            let closer = thread::Builder::new()
                .name(format!("{}-close", self.config.write_thread_name))
                .spawn(move || {
                    runtime.shutdown();
                    info!("database closed");
                });
            if let Err(e) = closer {
                error!(error = %e, "could not start the close thread, workers left detached");
            }
            return;
        }

        runtime.shutdown();
        *self.state.lock() = State::Closed;
        info!("database closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

fn join(handle: JoinHandle<()>, role: &str) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        error!(role, "worker thread panicked");
    }
}
