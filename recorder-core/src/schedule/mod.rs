//! Booked recordings: the persisted schedule rows, the request validator and
//! the manager that serializes writes through both.

mod error;
mod manager;
mod models;
mod store;
mod validator;

pub use error::{ScheduleError, ScheduleResult, ValidationError};
pub use manager::ScheduleManager;
pub use models::{Schedule, ScheduleRequest, ValidatedSchedule};
pub use store::SqliteScheduleStore;
pub use validator::{find_overlap, is_valid_url, normalize_file_name, ScheduleValidator};
