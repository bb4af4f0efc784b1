use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("database error: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("database path not configured")]
    MissingStore,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

#[derive(Debug, Clone)]
pub struct SqliteDatabaseBuilder {
    path: Option<PathBuf>,
    create_if_missing: bool,
}

impl Default for SqliteDatabaseBuilder {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
        }
    }
}

impl SqliteDatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteDatabase> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteDatabase { path, flags })
    }
}

/// Location of a sqlite file plus the flags used to open it.
///
/// Every store operation opens its own connection, so the handle is cheap to
/// clone and safe to move into spawned tasks.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteDatabase {
    pub fn builder() -> SqliteDatabaseBuilder {
        SqliteDatabaseBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteDatabaseBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub(crate) fn apply_schema(&self, schema: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(schema)?;
        Ok(())
    }
}

/// True when a row-level failure came from decoding a column rather than from
/// the database itself. Such rows are skipped by list queries.
pub(crate) fn is_conversion_failure(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}
