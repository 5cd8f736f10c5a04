//! Session logging CLI
//!
//! Thin wrapper around sessionlog-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Pipe lines into a new logging session
//! my-app 2>&1 | sessionlog run --group App --continuous
//!
//! # Lines may carry a level and a group
//! echo "ERROR [Net] connection lost" | sessionlog run
//!
//! # Print the records of a log file
//! sessionlog read "Logs/2026-01-21 14.13.48.123456/Groups/Net/Log.xml"
//!
//! # List the files to attach to a bug report
//! sessionlog collect --sessions 3
//!
//! # Markdown summary of the latest session
//! sessionlog summary
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionlog_core::{
    collect_report_files, generate_summary, latest_session_dir, read_log_file, session_dirs,
    GroupSettings, Level, Report, Session, SessionConfig, SummaryOptions, DEFAULT_GROUP,
    DEFAULT_REPORT_SESSIONS,
};
use tokio::io::AsyncBufReadExt;

/// Session logging engine
#[derive(Parser)]
#[command(name = "sessionlog")]
#[command(version = "0.1.0")]
#[command(about = "Session logging engine - per-group XML log files")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Logs root directory (default: <data dir>/sessionlog/Logs)
    #[arg(short, long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read reports from stdin into a new session
    Run {
        /// Group for lines that do not name one
        #[arg(short, long, default_value = DEFAULT_GROUP)]
        group: String,

        /// Session config file (JSON); flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write every report as soon as it is read
        #[arg(long)]
        continuous: bool,

        /// Burst interval in milliseconds (0 disables the timer)
        #[arg(long)]
        burst_ms: Option<u64>,

        /// Maximum log file size in bytes (0 = unlimited)
        #[arg(long)]
        max_size: Option<u64>,

        /// Start a new file when the size limit is reached
        #[arg(long)]
        rotate: bool,

        /// Lowest level that gets written
        #[arg(long, default_value = "info")]
        min_level: Level,
    },

    /// Print the records of a log file
    Read {
        /// Path to a Log.xml file
        file: PathBuf,
    },

    /// List recent sessions and the files to attach to a bug report
    Collect {
        /// Number of recent sessions to include
        #[arg(short, long, default_value_t = DEFAULT_REPORT_SESSIONS)]
        sessions: usize,
    },

    /// Print a Markdown summary of a session
    Summary {
        /// Session directory (default: the latest session)
        #[arg(short, long)]
        session: Option<PathBuf>,

        /// Leave out debug-level records
        #[arg(long)]
        no_debug: bool,

        /// Maximum records per group (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_per_group: usize,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default logs directory (<data dir>/sessionlog/Logs)
fn default_logs_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sessionlog")
        .join("Logs")
}

/// Split an input line into level, group and message.
///
/// `ERROR [Net] connection lost` names both; a line without a known level
/// prefix is an info report in `default_group`.
fn parse_line(line: &str, default_group: &str) -> Report {
    let (level, rest) = match line.split_once(' ') {
        Some((first, rest)) => match first.parse::<Level>() {
            Ok(level) => (level, rest.trim_start()),
            Err(_) => (Level::Info, line),
        },
        None => match line.parse::<Level>() {
            Ok(level) => (level, ""),
            Err(_) => (Level::Info, line),
        },
    };

    let (group, message) = rest
        .strip_prefix('[')
        .and_then(|tail| tail.split_once(']'))
        .map(|(group, message)| (group, message.trim_start()))
        .unwrap_or((default_group, rest));

    Report::new(level, group, message)
}

struct RunOptions {
    group: String,
    config: Option<PathBuf>,
    continuous: bool,
    burst_ms: Option<u64>,
    max_size: Option<u64>,
    rotate: bool,
    min_level: Level,
}

fn session_config(logs_dir: &Path, opts: &RunOptions) -> Result<SessionConfig> {
    let mut config = match &opts.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    config.root_dir = logs_dir.to_path_buf();

    let mut settings = config.default_group.clone();
    if opts.continuous {
        settings.continuous_enabled = true;
        settings.burst_enabled = false;
    }
    if let Some(ms) = opts.burst_ms {
        settings.burst_enabled = true;
        settings.burst_interval_ms = ms;
    }
    if let Some(bytes) = opts.max_size {
        settings.max_file_size_bytes = bytes;
    }
    settings.rotate_on_limit |= opts.rotate;
    settings.min_level = opts.min_level;
    config.default_group = settings;

    Ok(config)
}

async fn run(logs_dir: &Path, opts: RunOptions) -> Result<()> {
    let config = session_config(logs_dir, &opts)?;
    let session = Session::open(config).context("Failed to open logging session")?;
    println!("Session: {}", session.directory().display());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut submitted = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if session.submit(parse_line(line, &opts.group)).is_err() {
            break;
        }
        submitted += 1;
    }

    let summary = session.shutdown();
    println!("Submitted: {}", submitted);
    println!("Written: {}", summary.reports_written);
    if summary.reports_discarded > 0 {
        println!("Discarded: {}", summary.reports_discarded);
    }
    println!("Groups: {}", session.groups().join(", "));
    Ok(())
}

fn read(file: &Path) -> Result<()> {
    let records =
        read_log_file(file).with_context(|| format!("Failed to read {}", file.display()))?;

    for record in &records {
        let owner = record
            .owner
            .as_deref()
            .map(|o| format!(" ({o})"))
            .unwrap_or_default();
        println!(
            "#{} {} {:9} [{}]{} {}",
            record.number,
            record.log_time,
            record.level,
            record.group,
            owner,
            record.message()
        );
        if let Some(exception) = &record.exception {
            println!(
                "    {}: {}",
                exception.type_name,
                exception.message.as_deref().unwrap_or_default()
            );
            for frame in &exception.frames {
                println!("      {}", frame);
            }
        }
    }
    println!("{} records", records.len());
    Ok(())
}

fn collect(logs_dir: &Path, sessions: usize) -> Result<()> {
    let dirs = session_dirs(logs_dir)?;
    if dirs.is_empty() {
        println!("No sessions in {}", logs_dir.display());
        return Ok(());
    }

    println!("Sessions:");
    for (started, dir) in dirs.iter().take(sessions) {
        println!("  {}  {}", started.format("%Y-%m-%d %H:%M:%S"), dir.display());
    }
    println!();
    println!("Files:");
    for file in collect_report_files(logs_dir, sessions)? {
        println!("  {}", file.display());
    }
    Ok(())
}

fn summary(logs_dir: &Path, session: Option<PathBuf>, options: &SummaryOptions) -> Result<()> {
    let dir = match session {
        Some(dir) => dir,
        None => latest_session_dir(logs_dir)?
            .ok_or_else(|| anyhow::anyhow!("No sessions in {}", logs_dir.display()))?,
    };
    print!("{}", generate_summary(&dir, options)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let logs_dir = cli.logs_dir.unwrap_or_else(default_logs_dir);

    match cli.command {
        Commands::Run {
            group,
            config,
            continuous,
            burst_ms,
            max_size,
            rotate,
            min_level,
        } => {
            let opts = RunOptions {
                group,
                config,
                continuous,
                burst_ms,
                max_size,
                rotate,
                min_level,
            };
            run(&logs_dir, opts).await?;
        }

        Commands::Read { file } => read(&file)?,

        Commands::Collect { sessions } => collect(&logs_dir, sessions)?,

        Commands::Summary {
            session,
            no_debug,
            max_per_group,
        } => {
            let options = SummaryOptions {
                include_debug: !no_debug,
                max_per_group,
                ..SummaryOptions::default()
            };
            summary(&logs_dir, session, &options)?;
        }
    }

    Ok(())
}
