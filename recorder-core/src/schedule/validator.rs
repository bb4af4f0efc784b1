use std::sync::Arc;

use chrono::NaiveDateTime;
use url::Url;

use crate::channel::ChannelDirectory;
use crate::time::{parse_timestamp, Window};

use super::error::{ScheduleResult, ValidationError};
use super::models::{Schedule, ScheduleRequest, ValidatedSchedule};
use super::store::SqliteScheduleStore;

const CANONICAL_EXTENSION: &str = ".mkv";
const REPLACED_EXTENSIONS: [&str; 2] = [".ts", ".mp4"];

/// Checks a booking request against the clock, the channel directory and the
/// existing timeline. Nothing is written here.
#[derive(Clone)]
pub struct ScheduleValidator {
    channels: Arc<dyn ChannelDirectory>,
    store: SqliteScheduleStore,
}

impl ScheduleValidator {
    pub fn new(channels: Arc<dyn ChannelDirectory>, store: SqliteScheduleStore) -> Self {
        Self { channels, store }
    }

    /// Runs every check in order and fails on the first one that does not
    /// hold. `exclude` skips the row being updated during the overlap scan.
    pub fn validate(
        &self,
        request: &ScheduleRequest,
        exclude: Option<i64>,
        now: NaiveDateTime,
    ) -> ScheduleResult<ValidatedSchedule> {
        let start = parse_timestamp(&request.start).map_err(ValidationError::from)?;
        let end = parse_timestamp(&request.end).map_err(ValidationError::from)?;
        if start >= end {
            return Err(ValidationError::TimeOrder.into());
        }
        if end <= now {
            return Err(ValidationError::PastEndTime.into());
        }

        let (channel, stream_url) = self.resolve_source(request)?;
        let file_name = normalize_file_name(&request.file_name)?;

        let window = Window::new(start, end);
        let existing = self.store.find_all()?;
        if let Some(conflict) = find_overlap(&window, &existing, exclude) {
            return Err(ValidationError::Overlap {
                file_name: conflict.file_name.clone(),
                schedule_id: conflict.id,
            }
            .into());
        }

        Ok(ValidatedSchedule {
            start,
            end,
            channel,
            stream_url,
            file_name,
        })
    }

    fn resolve_source(
        &self,
        request: &ScheduleRequest,
    ) -> ScheduleResult<(Option<String>, String)> {
        let alias = request
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|alias| !alias.is_empty());

        if let Some(alias) = alias {
            if self.channels.exists(alias)? {
                if let Some(url) = self.channels.resolve(alias)? {
                    return Ok((Some(alias.to_string()), url));
                }
            }
            if is_valid_url(alias) {
                return Ok((None, alias.to_string()));
            }
            return Err(ValidationError::InvalidChannelOrUrl(alias.to_string()).into());
        }

        match request.stream_url.as_deref().map(str::trim) {
            Some(url) if is_valid_url(url) => Ok((None, url.to_string())),
            _ => Err(ValidationError::MissingUrl.into()),
        }
    }
}

/// Absolute URL with a scheme and a host.
pub fn is_valid_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => url.has_host(),
        Err(_) => false,
    }
}

/// Maps a requested file name onto the `.mkv` container.
///
/// `test.ts` and `test.mp4` become `test.mkv`, `test` becomes `test.mkv` and
/// `test.mkv` is kept. Names with path separators are refused.
pub fn normalize_file_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ValidationError::InvalidFileName(raw.to_string()));
    }
    if name.ends_with(CANONICAL_EXTENSION) {
        return Ok(name.to_string());
    }
    for extension in REPLACED_EXTENSIONS {
        if let Some(stem) = name.strip_suffix(extension) {
            if !stem.is_empty() {
                return Ok(format!("{stem}{CANONICAL_EXTENSION}"));
            }
        }
    }
    Ok(format!("{name}{CANONICAL_EXTENSION}"))
}

/// First schedule whose window intersects `window`, ignoring `exclude`.
pub fn find_overlap<'a>(
    window: &Window,
    existing: &'a [Schedule],
    exclude: Option<i64>,
) -> Option<&'a Schedule> {
    existing
        .iter()
        .filter(|schedule| Some(schedule.id) != exclude)
        .find(|schedule| schedule.window().overlaps(window))
}
