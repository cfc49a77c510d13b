//! RiM CLI - Command-line interface for the RiM activity tracker
//!
//! Commands:
//! - replay: Drive a tracker from a recorded NDJSON event log (virtual clock)
//! - live: Run the tracker service on the system clock, reading samples from stdin
//! - summary: Print today's live numbers
//! - export: Print the history ledger (CSV)
//! - doctor: Diagnose data directory, configuration and stored state

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rim_tracker::clock::{Clock, SystemClock};
use rim_tracker::history::{FileLedger, HistoryStore, LEDGER_HEADER};
use rim_tracker::replay::{parse_events, ReplayEvent, Replayer};
use rim_tracker::service::TrackerService;
use rim_tracker::storage::{keys, meal_dates, JsonFileStore, KeyValueStore};
use rim_tracker::tracker::{LEDGER_FILE_NAME, STORE_FILE_NAME};
use rim_tracker::types::ActivitySummary;
use rim_tracker::{ActivityTracker, TrackerConfig, TrackerError, PRODUCER_NAME, RIM_VERSION};

/// RiM - On-device activity tracking: steps, sedentary time and sleep
#[derive(Parser)]
#[command(name = "rim")]
#[command(author = "RiM Contributors")]
#[command(version = RIM_VERSION)]
#[command(about = "Classify motion samples into daily activity records", long_about = None)]
struct Cli {
    /// Tracker configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an NDJSON event log on a virtual clock
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Persist into this data directory (in-memory when omitted)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds of virtual time between synthetic ticks (0 disables them)
        #[arg(long, default_value = "60")]
        tick_seconds: i64,

        /// Print the resulting ledger instead of the summary
        #[arg(long)]
        csv: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the tracker on the system clock, reading events from stdin
    Live {
        /// Data directory
        #[arg(long)]
        data_dir: PathBuf,

        /// Seconds between clock ticks
        #[arg(long, default_value = "60")]
        tick_seconds: u64,
    },

    /// Print today's live summary
    Summary {
        /// Data directory
        #[arg(long)]
        data_dir: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the history ledger
    Export {
        /// Data directory
        #[arg(long)]
        data_dir: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Refresh today's row from the live counters first
        #[arg(long)]
        refresh: bool,
    },

    /// Diagnose data directory, configuration and stored state
    Doctor {
        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RimCliError> {
    // Doctor reports a bad config instead of failing on it
    if let Commands::Doctor { data_dir, json } = &cli.command {
        return cmd_doctor(cli.config.as_deref(), data_dir.as_deref(), *json);
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay {
            input,
            data_dir,
            tick_seconds,
            csv,
            json,
        } => cmd_replay(config, &input, data_dir.as_deref(), tick_seconds, csv, json),
        Commands::Live {
            data_dir,
            tick_seconds,
        } => cmd_live(config, &data_dir, tick_seconds),
        Commands::Summary { data_dir, json } => cmd_summary(config, &data_dir, json),
        Commands::Export {
            data_dir,
            output,
            refresh,
        } => cmd_export(config, &data_dir, &output, refresh),
        Commands::Doctor { .. } => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig, RimCliError> {
    match path {
        Some(path) => Ok(TrackerConfig::load(path)?),
        None => Ok(TrackerConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, RimCliError> {
    if input.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_replay(
    config: TrackerConfig,
    input: &Path,
    data_dir: Option<&Path>,
    tick_seconds: i64,
    csv: bool,
    json: bool,
) -> Result<(), RimCliError> {
    let text = read_input(input)?;
    let (events, skipped) = parse_events(BufReader::new(text.as_bytes()))?;

    let start = events
        .iter()
        .find_map(ReplayEvent::timestamp)
        .ok_or(RimCliError::NoEvents)?;

    let tracker = match data_dir {
        Some(dir) => ActivityTracker::open_dir(config, dir, start)?,
        None => ActivityTracker::in_memory(config, start)?,
    };

    let tick_every = (tick_seconds > 0).then(|| chrono::Duration::seconds(tick_seconds));
    let mut replayer = Replayer::new(tracker, start).with_tick_every(tick_every);
    for event in &events {
        replayer.apply(event);
    }
    let (mut tracker, stats) = replayer.finish();

    if csv {
        print!("{}", tracker.export_history());
        return Ok(());
    }

    let summary = tracker.summary();
    if json {
        let report = ReplayReport {
            stats,
            skipped_lines: skipped,
            summary,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Replayed {} events ({} skipped lines)", stats.events, skipped);
        println!(
            "  samples: {}  steps: {}  ticks: {}  triggers: {}",
            stats.samples, stats.steps, stats.ticks, stats.triggers
        );
        print_summary(&summary);
    }

    Ok(())
}

fn cmd_live(config: TrackerConfig, data_dir: &Path, tick_seconds: u64) -> Result<(), RimCliError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tracker = ActivityTracker::open_dir(config, data_dir, clock.now())?;
    let service = TrackerService::new(tracker, clock)
        .with_tick_interval(std::time::Duration::from_secs(tick_seconds.max(1)));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};

        service.start().await;

        let mut lines = AsyncBufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<ReplayEvent>(trimmed) {
                Ok(ReplayEvent::Sample(sample)) => {
                    service.ingest(sample).await;
                }
                Ok(ReplayEvent::Tick { .. }) => {
                    service.tick().await;
                }
                Ok(ReplayEvent::Meals { date, meals }) => service.save_meals(date, meals).await,
                Ok(ReplayEvent::Profile(profile)) => {
                    if let Err(e) = service.set_profile(profile).await {
                        log::warn!("Rejected profile: {}", e);
                    }
                }
                Ok(ReplayEvent::SleepStart { .. }) => service.start_manual_sleep().await,
                Ok(ReplayEvent::SleepStop { .. }) => {
                    service.stop_manual_sleep().await;
                }
                Err(e) => log::warn!("Skipping input line: {}", e),
            }
        }

        service.shutdown().await?;
        print_summary(&service.summary().await);
        Ok::<(), RimCliError>(())
    })
}

fn cmd_summary(config: TrackerConfig, data_dir: &Path, json: bool) -> Result<(), RimCliError> {
    let tracker = ActivityTracker::open_dir(config, data_dir, SystemClock.now())?;
    let summary = tracker.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn cmd_export(
    config: TrackerConfig,
    data_dir: &Path,
    output: &Path,
    refresh: bool,
) -> Result<(), RimCliError> {
    let csv = if refresh {
        let mut tracker = ActivityTracker::open_dir(config, data_dir, SystemClock.now())?;
        tracker.export_history()
    } else {
        let ledger = FileLedger::new(data_dir.join(LEDGER_FILE_NAME));
        HistoryStore::open(Box::new(ledger))?.export()
    };

    if output.as_os_str() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", csv)?;
        stdout.flush()?;
    } else {
        fs::write(output, csv)?;
    }
    Ok(())
}

fn print_summary(summary: &ActivitySummary) {
    println!("Date:           {}", summary.date);
    println!("Steps:          {}", summary.steps);
    println!("Distance:       {:.2} km", summary.distance_km);
    println!("Sedentary:      {:.2} h", summary.sedentary_minutes as f64 / 60.0);
    println!("Sleep:          {:.1} h", summary.sleep_hours);
    if summary.sleep_candidate_minutes > 0 {
        println!("Sleep (open):   {} min", summary.sleep_candidate_minutes);
    }
    if summary.manual_sleep_active {
        println!("Manual sleep session running");
    }
}

fn cmd_doctor(
    config_path: Option<&Path>,
    data_dir: Option<&Path>,
    json: bool,
) -> Result<(), RimCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "rim_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("RiM tracker version {}", RIM_VERSION),
    });

    // Configuration
    match config_path {
        Some(path) => match TrackerConfig::load(path) {
            Ok(config) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (threshold {}, stride {} m, sleep window {}-{})",
                    config.step_threshold,
                    config.stride_length_m,
                    config.sleep_window.start.format("%H:%M"),
                    config.sleep_window.end.format("%H:%M")
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {}", e),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    if let Some(dir) = data_dir {
        checks.extend(check_data_dir(dir));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (live mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: RIM_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("RiM Doctor Report");
        println!("=================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(RimCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_data_dir(dir: &Path) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    if !dir.is_dir() {
        checks.push(DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist yet", dir.display()),
        });
        return checks;
    }

    let writable = fs::metadata(dir)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false);
    checks.push(DoctorCheck {
        name: "data_dir".to_string(),
        status: if writable { CheckStatus::Ok } else { CheckStatus::Error },
        message: if writable {
            format!("{} is writable", dir.display())
        } else {
            format!("{} is read-only", dir.display())
        },
    });

    let store_path = dir.join(STORE_FILE_NAME);
    if store_path.exists() {
        match JsonFileStore::open(&store_path) {
            Ok(store) => {
                let snapshot = store
                    .get(keys::ACTIVITY_STATE)
                    .and_then(|v| v.get("date").and_then(|d| d.as_str().map(str::to_string)));
                checks.push(DoctorCheck {
                    name: "state".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Snapshot for {} ({} stored meal entries)",
                        snapshot.unwrap_or_else(|| "no date".to_string()),
                        meal_dates(&store).len()
                    ),
                });
            }
            Err(e) => checks.push(DoctorCheck {
                name: "state".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read snapshot: {}", e),
            }),
        }
    } else {
        checks.push(DoctorCheck {
            name: "state".to_string(),
            status: CheckStatus::Warning,
            message: "No snapshot yet".to_string(),
        });
    }

    let ledger_path = dir.join(LEDGER_FILE_NAME);
    if ledger_path.exists() {
        let check = match HistoryStore::open(Box::new(FileLedger::new(&ledger_path))) {
            Ok(history) => match history.records() {
                Ok(records) => DoctorCheck {
                    name: "ledger".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} committed days", records.len()),
                },
                Err(e) => DoctorCheck {
                    name: "ledger".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            },
            Err(e) => DoctorCheck {
                name: "ledger".to_string(),
                status: CheckStatus::Error,
                message: format!("{} (expected header '{}')", e, LEDGER_HEADER),
            },
        };
        checks.push(check);
    } else {
        checks.push(DoctorCheck {
            name: "ledger".to_string(),
            status: CheckStatus::Warning,
            message: "No committed days yet".to_string(),
        });
    }

    checks
}

// Error types

#[derive(Debug)]
enum RimCliError {
    Io(io::Error),
    Tracker(TrackerError),
    Json(serde_json::Error),
    NoEvents,
    DoctorFailed,
}

impl From<io::Error> for RimCliError {
    fn from(e: io::Error) -> Self {
        RimCliError::Io(e)
    }
}

impl From<TrackerError> for RimCliError {
    fn from(e: TrackerError) -> Self {
        RimCliError::Tracker(e)
    }
}

impl From<serde_json::Error> for RimCliError {
    fn from(e: serde_json::Error) -> Self {
        RimCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RimCliError> for CliError {
    fn from(e: RimCliError) -> Self {
        match e {
            RimCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RimCliError::Tracker(TrackerError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'rim doctor --config <file>' for details".to_string()),
            },
            RimCliError::Tracker(e @ TrackerError::LedgerFormat { .. }) => CliError {
                code: "LEDGER_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("The history file is not a RiM ledger".to_string()),
            },
            RimCliError::Tracker(e) => CliError {
                code: "TRACKER_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            RimCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RimCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No timestamped events found in input".to_string(),
                hint: Some("Each line must be a JSON event with a \"type\" field".to_string()),
            },
            RimCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ReplayReport {
    stats: rim_tracker::replay::ReplayStats,
    skipped_lines: usize,
    summary: ActivitySummary,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
