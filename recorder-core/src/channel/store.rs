use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tracing::info;

use crate::schedule::is_valid_url;
use crate::sqlite::{SqliteDatabase, StoreResult};

use super::{Channel, ChannelDirectory, ChannelError, ChannelResult};

const CHANNEL_SCHEMA: &str = include_str!("../../../sql/channels.sql");

#[derive(Debug, Clone)]
pub struct SqliteChannelStore {
    db: SqliteDatabase,
}

impl SqliteChannelStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub fn initialize(&self) -> StoreResult<()> {
        self.db.apply_schema(CHANNEL_SCHEMA)
    }

    pub fn add(&self, name: &str, url: &str) -> ChannelResult<Channel> {
        let (name, url) = validate_channel(name, url)?;
        let conn = self.db.open()?;
        conn.execute(
            "INSERT INTO channel_urls (name, url) VALUES (?1, ?2)",
            params![name, url],
        )
        .map_err(|err| map_unique_violation(err, &name))?;
        let channel = Channel {
            id: conn.last_insert_rowid(),
            name,
            url,
        };
        info!(target: "recorder.channels", channel = %channel.name, "channel added");
        Ok(channel)
    }

    /// Inserts every channel in one transaction; nothing is written if any
    /// entry is rejected.
    pub fn add_many(&self, entries: &[(String, String)]) -> ChannelResult<Vec<Channel>> {
        let validated = entries
            .iter()
            .map(|(name, url)| validate_channel(name, url))
            .collect::<ChannelResult<Vec<_>>>()?;
        let mut conn = self.db.open()?;
        let tx = conn.transaction()?;
        let mut channels = Vec::with_capacity(validated.len());
        for (name, url) in validated {
            tx.execute(
                "INSERT INTO channel_urls (name, url) VALUES (?1, ?2)",
                params![name, url],
            )
            .map_err(|err| map_unique_violation(err, &name))?;
            channels.push(Channel {
                id: tx.last_insert_rowid(),
                name,
                url,
            });
        }
        tx.commit()?;
        Ok(channels)
    }

    pub fn list(&self) -> ChannelResult<Vec<Channel>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare("SELECT id, name, url FROM channel_urls ORDER BY name")?;
        let rows = stmt
            .query_map([], channel_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_by_name(&self, name: &str) -> ChannelResult<Option<Channel>> {
        let conn = self.db.open()?;
        let channel = conn
            .query_row(
                "SELECT id, name, url FROM channel_urls WHERE name = ?1",
                [name],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    pub fn update(&self, id: i64, name: &str, url: &str) -> ChannelResult<Channel> {
        let (name, url) = validate_channel(name, url)?;
        let conn = self.db.open()?;
        let affected = conn
            .execute(
                "UPDATE channel_urls SET name = ?2, url = ?3 WHERE id = ?1",
                params![id, name, url],
            )
            .map_err(|err| map_unique_violation(err, &name))?;
        if affected == 0 {
            return Err(ChannelError::NotFound { id });
        }
        Ok(Channel { id, name, url })
    }

    /// Deletes the channel and returns the name it was registered under.
    pub fn delete(&self, id: i64) -> ChannelResult<String> {
        let conn = self.db.open()?;
        let name: Option<String> = conn
            .query_row("SELECT name FROM channel_urls WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(name) = name else {
            return Err(ChannelError::NotFound { id });
        };
        conn.execute("DELETE FROM channel_urls WHERE id = ?1", [id])?;
        info!(target: "recorder.channels", channel = %name, "channel deleted");
        Ok(name)
    }
}

impl ChannelDirectory for SqliteChannelStore {
    fn exists(&self, name: &str) -> ChannelResult<bool> {
        let conn = self.db.open()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM channel_urls WHERE name = ?1)",
            [name],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn resolve(&self, name: &str) -> ChannelResult<Option<String>> {
        Ok(self.find_by_name(name)?.map(|channel| channel.url))
    }
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
    })
}

fn validate_channel(name: &str, url: &str) -> ChannelResult<(String, String)> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChannelError::BlankName);
    }
    let url = url.trim();
    if !is_valid_url(url) {
        return Err(ChannelError::InvalidUrl(url.to_string()));
    }
    Ok((name.to_string(), url.to_string()))
}

fn map_unique_violation(err: rusqlite::Error, name: &str) -> ChannelError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            ChannelError::Duplicate {
                name: name.to_string(),
            }
        }
        _ => ChannelError::from(err),
    }
}
