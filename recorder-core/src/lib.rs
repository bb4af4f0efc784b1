pub mod capture;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod schedule;
pub mod sqlite;
pub mod time;

pub use capture::{
    CaptureError, CaptureExit, CaptureHandle, CaptureRequest, CaptureResult, CommandExecutor,
    Encoder, FfmpegEncoder, FfprobeProber, ProbeOutcome, Prober, ProcessSupervisor,
    StopRequest, StopSignal, SupervisionOutcome, SupervisorSettings, SystemCommandExecutor,
    VideoCodec, WorkerPool,
};
pub use channel::{Channel, ChannelDirectory, ChannelError, ChannelResult, SqliteChannelStore};
pub use config::{load_recorder_config, RecorderConfig};
pub use engine::{
    Dispatch, ForcedStop, Reaper, ReapReport, RecorderError, RecorderResult, RecorderRuntime,
    RecordingDispatcher, RecoveryInitializer, StopOutcome, TriggerLoop, TriggerReport,
    TriggerSettings,
};
pub use error::{ConfigError, Result};
pub use history::{CompletionStatus, HistoryError, HistoryRecord, HistoryResult, SqliteHistoryStore};
pub use schedule::{
    Schedule, ScheduleError, ScheduleManager, ScheduleRequest, ScheduleResult, ScheduleValidator,
    SqliteScheduleStore, ValidatedSchedule, ValidationError,
};
pub use sqlite::{SqliteDatabase, SqliteDatabaseBuilder, StoreError, StoreResult};
