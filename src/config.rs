use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    dispatch::DispatchSettings, next_trips::DEFAULT_API_URL, schedule::NormalizeSettings,
    service_day::CalendarRules,
};

/// A tool for analyzing transit arrival times vs scheduled arrival times.
///
/// Every option can also be given through an environment variable named after it with an
/// `EXAMINER_` prefix, e.g. `EXAMINER_ID` or `EXAMINER_DB`.
#[derive(Parser, Debug)]
#[command(name = "examiner", version, about)]
pub struct Cli {
    /// Verbose output
    #[arg(short = 'v', long = "verbose", env = "EXAMINER_V", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Query predictions shortly before every remaining arrival of today and record them.
    Examine(ExamineArgs),
    /// Load a GTFS feed (folder or zip) into an sqlite database.
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub struct ExamineArgs {
    /// Application ID
    #[arg(long, env = "EXAMINER_ID")]
    pub id: String,

    /// Application Key
    #[arg(long, env = "EXAMINER_KEY", hide_env_values = true)]
    pub key: String,

    /// The file path for the sqlite3 db of GTFS data
    #[arg(long, env = "EXAMINER_DB", default_value = "gtfs.db")]
    pub db: PathBuf,

    /// Minutes before the scheduled arrival at which predictions are requested
    #[arg(long, env = "EXAMINER_LEAD_MINUTES", default_value_t = 5)]
    pub lead_minutes: u32,

    /// Seconds a single API call may take
    #[arg(long, env = "EXAMINER_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Maximum number of future API calls to queue
    #[arg(long, env = "EXAMINER_MAX_JOBS", default_value_t = 10_000)]
    pub max_jobs: usize,

    /// Maximum number of API calls running at once
    #[arg(long, env = "EXAMINER_MAX_IN_FLIGHT", default_value_t = 64)]
    pub max_in_flight: usize,

    /// Only examine this many randomly chosen stop times
    #[arg(long, env = "EXAMINER_SAMPLE_SIZE")]
    pub sample_size: Option<usize>,

    /// Seed for choosing stop times, for reproducible runs
    #[arg(long, env = "EXAMINER_SEED")]
    pub seed: Option<u64>,

    /// How results are recorded
    #[arg(long, env = "EXAMINER_OUTPUT", value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    /// Directory for JSON results
    #[arg(long, env = "EXAMINER_OUT_DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Which calendar semantics decide the services running today
    #[arg(long, env = "EXAMINER_CALENDAR_RULES", value_enum, default_value_t = CalendarRules::Legacy)]
    pub calendar_rules: CalendarRules,

    /// Base URL of the next trips API
    #[arg(long, env = "EXAMINER_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// GTFS folder or zip file
    #[arg(long, env = "EXAMINER_GTFS")]
    pub gtfs: PathBuf,

    /// The file path for the sqlite3 db of GTFS data
    #[arg(long, env = "EXAMINER_DB", default_value = "gtfs.db")]
    pub db: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON file per result
    Json,
    /// One tab separated line per result on stdout
    Table,
}

/// Everything one examination run needs besides credentials and output.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunPlan {
    pub calendar_rules: CalendarRules,
    pub sample_size: Option<usize>,
    pub seed: Option<u64>,
    pub normalize: NormalizeSettings,
    pub dispatch: DispatchSettings,
}

/// Resolved once at startup and never changed afterwards.
#[derive(Debug, Clone)]
pub struct ExaminerConfig {
    pub app_id: String,
    pub api_key: String,
    pub api_url: String,
    pub db_path: PathBuf,
    pub output: OutputFormat,
    pub out_dir: PathBuf,
    pub plan: RunPlan,
}

impl ExaminerConfig {
    pub fn from_args(args: ExamineArgs, working_dir: &Path) -> Result<Self> {
        if args.id.trim().is_empty() {
            bail!("An Application ID is required.");
        }
        if args.key.trim().is_empty() {
            bail!("An Application Key is required.");
        }
        if args.timeout_secs == 0 {
            bail!("The API call timeout must be at least one second.");
        }

        Ok(Self {
            app_id: args.id,
            api_key: args.key,
            api_url: args.api_url,
            db_path: absolute(&args.db, working_dir),
            output: args.output,
            out_dir: absolute(&args.out_dir, working_dir),
            plan: RunPlan {
                calendar_rules: args.calendar_rules,
                sample_size: args.sample_size,
                seed: args.seed,
                normalize: NormalizeSettings {
                    lead: chrono::Duration::minutes(i64::from(args.lead_minutes)),
                },
                dispatch: DispatchSettings {
                    call_timeout: std::time::Duration::from_secs(args.timeout_secs),
                    max_jobs: args.max_jobs,
                    max_in_flight: args.max_in_flight,
                },
            },
        })
    }
}

fn absolute(path: &Path, working_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}
