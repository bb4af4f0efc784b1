use std::io;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use recorder_core::time::{format_timestamp, local_now, parse_timestamp, TimestampError};
use recorder_core::{
    load_recorder_config, Channel, ChannelError, HistoryError, HistoryRecord, RecorderConfig,
    RecorderError, RecorderRuntime, Schedule, ScheduleError, ScheduleRequest, StopOutcome,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] recorder_core::ConfigError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Scheduled stream recorder control interface",
    long_about = None
)]
pub struct Cli {
    /// Path to recorder.toml
    #[arg(long, default_value = "configs/recorder.toml")]
    pub config: PathBuf,
    /// Alternative sqlite database (overrides paths.database)
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the trigger loop and reaper until interrupted
    Serve,
    /// Manage booked recordings
    #[command(subcommand)]
    Schedule(ScheduleCommands),
    /// Manage named stream aliases
    #[command(subcommand)]
    Channel(ChannelCommands),
    /// Show archived recordings
    History(HistoryArgs),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// Book a new recording
    Add(ScheduleArgs),
    /// List booked recordings by start time
    List,
    /// Replace the window, source and file of a booking
    Update {
        id: i64,
        #[command(flatten)]
        args: ScheduleArgs,
    },
    /// Delete a booking and archive it
    Delete { id: i64 },
    /// Stop a running recording and archive it
    Stop { id: i64 },
}

#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    /// Start time, HH:mm dd/MM/yyyy
    #[arg(long)]
    pub start: String,
    /// End time, HH:mm dd/MM/yyyy
    #[arg(long)]
    pub end: String,
    /// Channel alias (or a direct stream url)
    #[arg(long)]
    pub channel: Option<String>,
    /// Stream url, used when no channel is given
    #[arg(long)]
    pub url: Option<String>,
    /// Output file name
    #[arg(long = "file")]
    pub file_name: String,
}

impl ScheduleArgs {
    pub fn to_request(&self) -> ScheduleRequest {
        ScheduleRequest {
            start: self.start.clone(),
            end: self.end.clone(),
            channel: self.channel.clone(),
            stream_url: self.url.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommands {
    /// Register a channel alias
    Add { name: String, url: String },
    /// List channel aliases
    List,
    /// Rename or repoint a channel
    Update { id: i64, name: String, url: String },
    /// Remove a channel alias
    Delete { id: i64 },
    /// Register every alias in a JSON list of {"name", "url"}; all or nothing
    Import { file: PathBuf },
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    name: String,
    url: String,
}

fn read_channel_entries(path: &Path) -> Result<Vec<(String, String)>> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<ChannelEntry> = serde_json::from_str(&raw)?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.name, entry.url))
        .collect())
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only recordings of this channel
    #[arg(long)]
    pub channel: Option<String>,
    /// Archived at or after, HH:mm dd/MM/yyyy
    #[arg(long, requires = "until")]
    pub since: Option<String>,
    /// Archived at or before, HH:mm dd/MM/yyyy
    #[arg(long, requires = "since")]
    pub until: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "recorderctl", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config, cli.database.as_deref())?;
    let runtime = RecorderRuntime::new(&config)?;

    match &cli.command {
        Commands::Serve => serve(&runtime).await?,
        Commands::Schedule(command) => run_schedule(&runtime, command, cli.format).await?,
        Commands::Channel(command) => run_channel(&runtime, command, cli.format)?,
        Commands::History(args) => {
            let records = history(&runtime, args)?;
            render(&records, cli.format)?;
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

pub fn load_config(path: &Path, database: Option<&Path>) -> Result<RecorderConfig> {
    let mut config = load_recorder_config(path)?;
    if let Some(database) = database {
        let database = if database.is_absolute() {
            database.to_path_buf()
        } else {
            std::env::current_dir()?.join(database)
        };
        config.paths.database = database.to_string_lossy().into_owned();
    }
    Ok(config)
}

async fn serve(runtime: &RecorderRuntime) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c; shutting down");
        }
        let _ = shutdown_tx.send(true);
    });
    info!(
        database = %runtime.config().database_path().display(),
        output_dir = %runtime.config().output_dir().display(),
        "recorder serving"
    );
    runtime.run(shutdown_rx).await?;
    Ok(())
}

async fn run_schedule(
    runtime: &RecorderRuntime,
    command: &ScheduleCommands,
    format: OutputFormat,
) -> Result<()> {
    let manager = runtime.manager();
    match command {
        ScheduleCommands::Add(args) => {
            let schedule = manager.create(&args.to_request(), local_now())?;
            render(&schedule, format)
        }
        ScheduleCommands::List => render(&manager.list()?, format),
        ScheduleCommands::Update { id, args } => {
            let schedule = manager.update(*id, &args.to_request(), local_now())?;
            render(&schedule, format)
        }
        ScheduleCommands::Delete { id } => {
            let schedule = manager.delete(*id, local_now())?;
            render(
                &ActionReport::new("deleted", schedule.id, schedule.file_name),
                format,
            )
        }
        ScheduleCommands::Stop { id } => {
            let outcome = runtime.force_stop(*id).await?;
            render(&outcome, format)
        }
    }
}

fn run_channel(
    runtime: &RecorderRuntime,
    command: &ChannelCommands,
    format: OutputFormat,
) -> Result<()> {
    let channels = runtime.channels();
    match command {
        ChannelCommands::Add { name, url } => render(&channels.add(name, url)?, format),
        ChannelCommands::List => render(&channels.list()?, format),
        ChannelCommands::Update { id, name, url } => {
            render(&channels.update(*id, name, url)?, format)
        }
        ChannelCommands::Delete { id } => {
            let name = channels.delete(*id)?;
            render(&ActionReport::new("deleted", *id, name), format)
        }
        ChannelCommands::Import { file } => {
            let entries = read_channel_entries(file)?;
            render(&channels.add_many(&entries)?, format)
        }
    }
}

fn history(runtime: &RecorderRuntime, args: &HistoryArgs) -> Result<Vec<HistoryRecord>> {
    let store = runtime.history();
    let records = match (&args.since, &args.until) {
        (Some(since), Some(until)) => {
            store.list_between(parse_timestamp(since)?, parse_timestamp(until)?)?
        }
        _ => match &args.channel {
            Some(channel) => store.list_by_channel(channel)?,
            None => store.list_all()?,
        },
    };
    Ok(match (&args.channel, &args.since) {
        (Some(channel), Some(_)) => records
            .into_iter()
            .filter(|record| record.channel.as_deref() == Some(channel.as_str()))
            .collect(),
        _ => records,
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
struct ActionReport {
    action: &'static str,
    id: i64,
    name: String,
}

impl ActionReport {
    fn new(action: &'static str, id: i64, name: String) -> Self {
        Self { action, id, name }
    }
}

impl DisplayFallback for ActionReport {
    fn display(&self) -> String {
        format!("{} #{} ({})", self.action, self.id, self.name)
    }
}

impl DisplayFallback for Schedule {
    fn display(&self) -> String {
        let state = if self.triggered { "recording" } else { "pending" };
        let source = match &self.channel {
            Some(channel) => format!("{channel} ({})", self.stream_url),
            None => self.stream_url.clone(),
        };
        format!(
            "#{id} [{state}] {start} - {end} {file} <- {source}",
            id = self.id,
            start = format_timestamp(self.start),
            end = format_timestamp(self.end),
            file = self.file_name,
        )
    }
}

impl DisplayFallback for Vec<Schedule> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "No schedules".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Channel {
    fn display(&self) -> String {
        format!("#{} {} -> {}", self.id, self.name, self.url)
    }
}

impl DisplayFallback for Vec<Channel> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "No channels".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for HistoryRecord {
    fn display(&self) -> String {
        format!(
            "{archived} [{status}] {file} {start} - {end}{channel}",
            archived = self.archived_at.format("%Y-%m-%d %H:%M:%S"),
            status = self.status,
            file = self.file_name,
            start = format_timestamp(self.start),
            end = format_timestamp(self.end),
            channel = self
                .channel
                .as_deref()
                .map(|channel| format!(" ({channel})"))
                .unwrap_or_default(),
        )
    }
}

impl DisplayFallback for Vec<HistoryRecord> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "No archived recordings".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for StopOutcome {
    fn display(&self) -> String {
        let mut line = format!("stopped {}", self.record.file_name);
        if !self.handle_found {
            line.push_str(
                " (no capture running in this process; \
                 the serving recorder stops it on its next tick)",
            );
        }
        line
    }
}
