mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sqlite::StoreError;

pub use store::SqliteChannelStore;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("channel {id} not found")]
    NotFound { id: i64 },
    #[error("channel name must not be blank")]
    BlankName,
    #[error("channel {name} already exists")]
    Duplicate { name: String },
    #[error("invalid channel url: {0}")]
    InvalidUrl(String),
}

impl From<rusqlite::Error> for ChannelError {
    fn from(error: rusqlite::Error) -> Self {
        ChannelError::Store(StoreError::Execute(error))
    }
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// Read-only view over named stream aliases used while validating schedules.
pub trait ChannelDirectory: Send + Sync {
    fn exists(&self, name: &str) -> ChannelResult<bool>;
    fn resolve(&self, name: &str) -> ChannelResult<Option<String>>;
}
