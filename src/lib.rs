//! evdash: concurrent query core for the events analytics dashboard.
//!
//! The library exposes the analytics core ([`analytics`]), the explicit
//! session ([`session`]) and configuration ([`config`]). The `evdash` binary
//! is a thin CLI over them.

pub mod analytics;
pub mod config;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::analytics::{AnalyticsError, FetchError, QuerySource, SqliteBackend, validate_environment};
use crate::config::{ConfigError, DashboardConfig};
use crate::session::{DashboardSession, DeviceDetail, Overview};

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "evdash",
    version,
    about = "Query the events table the way the analytics dashboard does"
)]
pub struct Cli {
    /// SQLite events database
    #[arg(long, env = "EVDASH_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Environment label (letters only)
    #[arg(long = "env", env = "EVDASH_ENV", global = true)]
    pub environment: Option<String>,

    /// Config file (defaults to $XDG_CONFIG_HOME/evdash/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch event totals, session durations and the device matrix
    Overview,
    /// Drill into one device row: latest events and session durations
    Device {
        /// Row index in the device matrix
        #[arg(long, conflicts_with = "token", required_unless_present = "token")]
        row: Option<usize>,
        /// Device token to select
        #[arg(long)]
        token: Option<String>,
    },
    /// Check whether an environment label is acceptable
    CheckEnv {
        label: String,
    },
    /// Print the effective configuration
    Config,
}

/// Parsed command line.
#[derive(Debug)]
pub struct ParsedCli {
    pub cli: Cli,
}

/// Structured CLI failure; printed as JSON in `--json` mode.
#[derive(Debug, Clone)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

impl CliError {
    fn usage(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            code: 2,
            kind: "usage",
            message: message.into(),
            hint: hint.map(str::to_string),
            retryable: false,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\nhint: {hint}")?;
        }
        Ok(())
    }
}

impl From<AnalyticsError> for CliError {
    fn from(err: AnalyticsError) -> Self {
        let (code, kind, hint, retryable) = match &err {
            AnalyticsError::Validation(_) => (2, "validation", None, false),
            AnalyticsError::BatchFailure { .. } => (
                3,
                "batch_failure",
                Some("Failed to fetch data, probably because the connection timed out. Enter credentials again."),
                true,
            ),
            AnalyticsError::Fetch(_) => (1, "fetch", None, true),
            AnalyticsError::Reshape(_) => (1, "internal", None, false),
            AnalyticsError::NotActive | AnalyticsError::CacheCleared => {
                (1, "session", Some("Log in again to reload data."), true)
            }
            AnalyticsError::NoSelection
            | AnalyticsError::TokenNotFound(_)
            | AnalyticsError::RowOutOfRange { .. } => (
                2,
                "selection",
                Some("Run `evdash overview` to list device rows."),
                false,
            ),
        };
        Self {
            code,
            kind,
            message: err.to_string(),
            hint: hint.map(str::to_string),
            retryable,
        }
    }
}

impl From<FetchError> for CliError {
    fn from(err: FetchError) -> Self {
        let hint = match err {
            FetchError::Open { .. } => Some("Check the --db path.".to_string()),
            _ => None,
        };
        Self {
            code: 1,
            kind: "connection",
            message: err.to_string(),
            hint,
            retryable: true,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            code: 1,
            kind: "internal",
            message: format!("failed to serialize output: {err}"),
            hint: None,
            retryable: false,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self {
            code: 2,
            kind: "config",
            message: err.to_string(),
            hint: None,
            retryable: false,
        }
    }
}

/// Parse raw arguments. Help and version requests come back as a
/// `code == 0` error carrying the rendered text.
pub fn parse_cli(raw_args: Vec<String>) -> Result<ParsedCli, CliError> {
    match Cli::try_parse_from(raw_args) {
        Ok(cli) => Ok(ParsedCli { cli }),
        Err(err) => {
            let code = if err.use_stderr() { 2 } else { 0 };
            Err(CliError {
                code,
                kind: "usage",
                message: err.render().to_string(),
                hint: None,
                retryable: false,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn config_file(cli: &Cli) -> Result<PathBuf, CliError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(DashboardConfig::config_path()?),
    }
}

/// Resolve the configuration file and apply CLI overrides on top of it.
pub fn effective_config(cli: &Cli) -> Result<DashboardConfig, CliError> {
    let mut config = DashboardConfig::load_from(&config_file(cli)?)?;
    if let Some(db) = &cli.db {
        config.database = Some(db.clone());
    }
    if let Some(env) = &cli.environment {
        config.environment = env.clone();
    }
    config.validate()?;
    Ok(config)
}

fn login(config: &DashboardConfig) -> Result<DashboardSession, CliError> {
    let queries = config.queries()?;
    let db = config.database.as_ref().ok_or_else(|| {
        CliError::usage(
            "no events database configured",
            Some("Pass --db, set EVDASH_DB, or add `database` to the config file."),
        )
    })?;
    let backend = SqliteBackend::open(db)?;
    let mut session = DashboardSession::new();
    session.login(Arc::new(backend), queries);
    Ok(session)
}

/// Execute a parsed command.
pub fn run_with_parsed(parsed: ParsedCli) -> Result<(), CliError> {
    let cli = parsed.cli;
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::CheckEnv { label } => {
            if !validate_environment(label) {
                return Err(AnalyticsError::Validation(format!(
                    "environment {label:?} may only contain the letters a-z and A-Z"
                ))
                .into());
            }
            if cli.json {
                println!("{}", serde_json::json!({ "environment": label, "valid": true }));
            } else {
                println!("{label}: ok");
            }
            Ok(())
        }
        Commands::Config => {
            let path = config_file(&cli)?;
            let config = effective_config(&cli)?;
            print!("{}", render_config(&config, &path, cli.json)?);
            Ok(())
        }
        Commands::Overview => {
            let config = effective_config(&cli)?;
            let mut session = login(&config)?;
            let overview = session.load_overview()?;
            if cli.json {
                println!("{}", overview.to_json()?);
            } else {
                print!("{}", render_overview(&overview)?);
            }
            Ok(())
        }
        Commands::Device { row, token } => {
            let config = effective_config(&cli)?;
            let mut session = login(&config)?;
            session.load_overview()?;
            match (row, token) {
                (Some(row), _) => {
                    session.select_row(*row)?;
                }
                (None, Some(token)) => {
                    session.select_token(token)?;
                }
                (None, None) => {
                    return Err(CliError::usage("pass --row or --token", None));
                }
            }
            let detail = session.drill_down()?;
            if cli.json {
                println!("{}", detail.to_json()?);
            } else {
                print!("{}", render_device(&detail)?);
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Plain-text output
// ---------------------------------------------------------------------------

/// Left-aligned text table with a header rule.
pub fn render_table(table: &QuerySource) -> String {
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|r| r.iter().map(ToString::to_string).collect())
        .collect();
    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(c.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = pad_line(&table.columns, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&pad_line(&rule, &widths));
    for row in &cells {
        out.push_str(&pad_line(row, &widths));
    }
    out
}

fn pad_line(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(v, w)| format!("{v:<width$}", width = *w))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string();
    line.push('\n');
    line
}

/// Effective configuration as pretty JSON (with its `path`) or as TOML
/// under a path comment.
pub fn render_config(
    config: &DashboardConfig,
    path: &Path,
    json: bool,
) -> Result<String, CliError> {
    if json {
        let mut value = serde_json::to_value(config)?;
        value["path"] = serde_json::Value::String(path.display().to_string());
        Ok(format!("{}\n", serde_json::to_string_pretty(&value)?))
    } else {
        let body = toml::to_string_pretty(config).map_err(ConfigError::from)?;
        Ok(format!("# {}\n{body}", path.display()))
    }
}

fn render_overview(overview: &Overview) -> Result<String, CliError> {
    let mut out = String::new();
    out.push_str("Total events\n");
    out.push_str(&render_table(&overview.totals));

    out.push_str("\nSession duration (minutes)\n");
    match overview.duration_metrics()? {
        Some(m) => out.push_str(&format!(
            "shortest {}  longest {}  average {:.2}  sessions {}\n",
            m.shortest, m.longest, m.average, m.sessions
        )),
        None => out.push_str("no sessions in range\n"),
    }
    for day in overview.daily_averages()? {
        out.push_str(&format!(
            "{}  {:.2}  ({} sessions)\n",
            day.day, day.average_minutes, day.sessions
        ));
    }

    out.push_str("\nEvents by device\n");
    out.push_str(&render_table(&overview.devices.to_query_source()));
    Ok(out)
}

fn render_device(detail: &DeviceDetail) -> Result<String, CliError> {
    let mut out = format!(
        "Device {} ({})\n",
        detail.device.device_name, detail.device.device_token
    );
    for (name, count) in &detail.event_counts {
        out.push_str(&format!("{name:<28}{count}\n"));
    }
    out.push_str("\nLatest event recordings\n");
    out.push_str(&render_table(&detail.latest_timestamps));
    out.push_str("\nSession duration per day (minutes)\n");
    for day in detail.daily_averages()? {
        out.push_str(&format!("{}  {:.2}\n", day.day, day.average_minutes));
    }
    Ok(out)
}
