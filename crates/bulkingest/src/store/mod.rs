//! Durable store for projects, documents and jobs.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Store` handle. Access within a
//! process is serialized through a `Mutex<Connection>`; across processes the
//! write path relies on `BEGIN IMMEDIATE` transactions, so every state
//! transition takes SQLite's write lock before it reads the rows it updates.
//! WAL mode keeps readers consistent while workers write.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod archive_repo;
pub mod document_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod project_repo;
pub mod stats_repo;

pub use error::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Thread-safe store handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). Separate processes open their own
/// `Store` on the same file.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    busy_retries: u32,
    busy_backoff: Duration,
}

impl Store {
    /// Opens (or creates) the store at the given path and applies all
    /// pending migrations. Safe to call repeatedly.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        log::info!("Store opened at {}", path.display());

        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory store for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            busy_retries: 5,
            busy_backoff: Duration::from_millis(50),
        }
    }

    /// Overrides the bounded retry applied when the write lock is contended.
    pub fn with_busy_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.busy_retries = retries;
        self.busy_backoff = backoff;
        self
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an immediate (write-locked) transaction.
    ///
    /// The closure may run more than once: when SQLite reports the database
    /// busy, the transaction is rolled back and retried with exponential
    /// backoff up to the configured retry budget.
    pub fn write_tx<F, T>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut attempt = 0u32;
        loop {
            let result = run_in_tx(&mut conn, TransactionBehavior::Immediate, &mut f);
            match result {
                Err(e) if e.is_busy() && attempt < self.busy_retries => {
                    let delay = self.busy_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    log::debug!(
                        "Store busy, retrying in {:?} (attempt {}/{})",
                        delay,
                        attempt + 1,
                        self.busy_retries
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Runs `f` inside a read transaction so every query sees one snapshot.
    pub fn read_tx<F, T>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        run_in_tx(&mut conn, TransactionBehavior::Deferred, &mut f)
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(|conn| {
            let version: u32 = conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |r| r.get(0),
            )?;
            Ok(version)
        })
    }
}

fn run_in_tx<F, T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    f: &mut F,
) -> Result<T, StoreError>
where
    F: FnMut(&Transaction<'_>) -> Result<T, StoreError>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Milliseconds since the Unix epoch, the unit of every job timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// RFC 3339 timestamp used for project and document rows.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
