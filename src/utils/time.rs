use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_english::{parse_date_string, Dialect};

/// Parses human date input for the cli, e.g. "today", "yesterday", "15/03/2025".
pub fn parse_day(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_date_string(input, now, Dialect::Uk)
        .with_context(|| format!("Couldn't interpret \"{input}\" as a date"))
}
