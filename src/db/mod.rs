use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use crate::config::Config;
use crate::error::{FraudGraphError, Result};

pub mod migrate;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Database connection handle
///
/// Cheap to clone. Every call to [`Db::with_connection`] opens its own
/// connection for the duration of that one operation and drops it on return.
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
    busy_timeout: Duration,
    operation_timeout: Duration,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Create a handle using the timeouts from `[graph]`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.db_path()).with_timeouts(config.busy_timeout(), config.operation_timeout())
    }

    pub fn with_timeouts(mut self, busy_timeout: Duration, operation_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self.operation_timeout = operation_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas applied
    pub fn open_connection(&self) -> Result<Connection> {
        open(&self.path, self.busy_timeout)
    }

    /// Execute a closure with a database connection in a blocking task
    ///
    /// Fails with `Connectivity` if the database cannot be opened or the
    /// operation does not finish within the operation timeout.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let handle = task::spawn_blocking(move || {
            let mut conn = open(&path, busy_timeout)?;
            f(&mut conn)
        });

        match tokio::time::timeout(self.operation_timeout, handle).await {
            Ok(joined) => joined.map_err(|e| {
                FraudGraphError::Connectivity(format!("database task failed: {}", e))
            })?,
            Err(_) => Err(FraudGraphError::Connectivity(format!(
                "database operation exceeded {:?}",
                self.operation_timeout
            ))),
        }
    }
}

fn open(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(|e| {
        FraudGraphError::Connectivity(format!("cannot open {}: {}", path.display(), e))
    })?;

    conn.busy_timeout(busy_timeout)?;

    // WAL lets investigation reads run alongside ingestion writes;
    // foreign keys drive the edge cascade on reset
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA cache_size = -16384;",
    )?;

    Ok(conn)
}
