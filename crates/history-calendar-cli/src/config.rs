//! Layered settings: command-line flag, then environment, then config file,
//! then built-in defaults.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::ValueEnum;
use serde::Deserialize;

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_WITHIN_DAYS: u32 = 7;

/// Which projection of the materialized events to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Events bucketed by local day
    Day,
    /// Events grouped by ISO week
    Week,
    /// Events grouped by calendar month
    Month,
    /// Events from the start of today onward
    Upcoming,
    /// Upcoming events within `--days` days
    Within,
    /// Shared events after now
    Shared,
    /// The flat materialized event list
    Events,
    /// The 6x7 month grid
    Grid,
}

/// Contents of a `--config` TOML file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub timezone: Option<String>,
    pub view: Option<View>,
    pub days: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// Settings after all layers are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub timezone: Tz,
    pub view: View,
    pub days: u32,
}

impl Settings {
    /// Merge explicit values (flag or env) over the file config.
    pub fn resolve(
        timezone: Option<String>,
        view: Option<View>,
        days: Option<u32>,
        file: FileConfig,
    ) -> Result<Self> {
        let timezone = timezone
            .or(file.timezone)
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("Invalid timezone: '{timezone}'"))?;

        Ok(Self {
            timezone,
            view: view.or(file.view).unwrap_or(View::Month),
            days: days.or(file.days).unwrap_or(DEFAULT_WITHIN_DAYS),
        })
    }
}
