mod config;

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{ArgAction, Parser};
use history_calendar::{
    decode_history_page, group_by_calendar_month, group_by_day, group_by_iso_week,
    resolve_local_date, shared_upcoming, upcoming, upcoming_within_days, CalendarError,
    CalendarState, HistoryItem, LoadOutcome,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{FileConfig, Settings, View};

/// Materialize history items into calendar events and print a view as JSON.
#[derive(Parser, Debug)]
#[command(name = "histcal", version, about)]
struct Cli {
    /// History JSON (`{"items": [...]}` or a bare array). Use `-` for stdin.
    #[arg(short, long)]
    input: String,

    /// Visible month as YYYY-MM [default: month of --now]
    #[arg(short, long, value_parser = parse_month)]
    month: Option<NaiveDate>,

    /// Reference instant, RFC 3339 or local YYYY-MM-DDTHH:MM [default: current time]
    #[arg(long)]
    now: Option<String>,

    /// IANA timezone for local dates
    #[arg(short = 'z', long, env = "HISTCAL_TIMEZONE")]
    timezone: Option<String>,

    /// View to print
    #[arg(long, value_enum)]
    view: Option<View>,

    /// Window length in days for the `within` view
    #[arg(long)]
    days: Option<u32>,

    /// TOML file with default timezone, view and days
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log more detail to stderr (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(cli.timezone.clone(), cli.view, cli.days, file)?;
    let zone = settings.timezone;

    let now = match &cli.now {
        Some(raw) => resolve_local_date(raw, &zone)
            .with_context(|| format!("cannot parse --now '{raw}'"))?,
        None => Utc::now().with_timezone(&zone),
    };
    let anchor = cli.month.unwrap_or_else(|| now.date_naive());

    let mut state = CalendarState::new(zone, anchor);
    let input = cli.input.clone();
    let source = move || read_history(&input);
    match state.load_from(&source, anchor) {
        LoadOutcome::Applied { events } => info!(events, "loaded history"),
        LoadOutcome::Failed(message) => bail!("failed to load history: {message}"),
        LoadOutcome::Stale => bail!("history load was superseded"),
    }

    let output = render(&state, settings.view, &now, settings.days)?;
    println!("{output}");
    Ok(())
}

fn init_logging(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("failed to set up logging: {e}"))
}

fn parse_month(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d")
        .map_err(|_| format!("expected YYYY-MM, got '{raw}'"))
}

fn read_history(input: &str) -> history_calendar::error::Result<Vec<HistoryItem>> {
    let body = if input == "-" {
        let mut body = String::new();
        io::stdin()
            .read_to_string(&mut body)
            .map_err(|e| CalendarError::Fetch(format!("stdin: {e}")))?;
        body
    } else {
        fs::read_to_string(input).map_err(|e| CalendarError::Fetch(format!("{input}: {e}")))?
    };
    decode_history_page(&body)
}

fn render(
    state: &CalendarState<Tz>,
    view: View,
    now: &DateTime<Tz>,
    days: u32,
) -> Result<String> {
    let events = state.events();
    let zone = state.zone();
    match view {
        View::Day => to_json(&group_by_day(events, zone)),
        View::Week => to_json(&group_by_iso_week(events, zone)),
        View::Month => to_json(&group_by_calendar_month(events, zone)),
        View::Upcoming => to_json(&upcoming(events, now)),
        View::Within => to_json(&upcoming_within_days(events, now, days)),
        View::Shared => to_json(&shared_upcoming(events, now)),
        View::Events => to_json(&events),
        View::Grid => to_json(&state.grid()),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}
