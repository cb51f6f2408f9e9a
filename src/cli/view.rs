use std::collections::BTreeMap;

use ansi_term::Colour;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use clap::Parser;

use crate::{
    api::{DeviceStatus, UsageRow},
    client::config::Config,
    utils::{dir::create_application_default_path, time::parse_day},
};

#[derive(Debug, Parser)]
pub struct ViewArgs {
    #[arg(
        long,
        help = "Server base url. Defaults to the apiBaseUrl of the local client config"
    )]
    server: Option<String>,
}

impl ViewArgs {
    fn base_url(&self) -> Result<String> {
        if let Some(server) = &self.server {
            return Ok(server.trim_end_matches('/').to_string());
        }
        let config = Config::load(&create_application_default_path()?.join("config.json"))?;
        Ok(config.api_base_url.trim_end_matches('/').to_string())
    }
}

pub async fn process_usage_command(
    view: ViewArgs,
    device: Option<String>,
    date: Option<String>,
) -> Result<()> {
    let base = view.base_url()?;
    let mut request = reqwest::Client::new().get(format!("{base}/usage"));
    if let Some(device) = &device {
        request = request.query(&[("deviceName", device.as_str())]);
    }
    if let Some(raw) = &date {
        let day = parse_day(raw, Utc::now())?.date_naive();
        request = request.query(&[("date", day.to_string())]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("Server answered with status {}", response.status()));
    }
    let rows: Vec<UsageRow> = response.json().await?;

    if rows.is_empty() {
        println!("No usage recorded");
        return Ok(());
    }

    let mut per_app: BTreeMap<&str, i64> = BTreeMap::new();
    for row in &rows {
        *per_app.entry(&row.app_name).or_default() += row.duration_seconds;
    }

    println!("{}", Colour::White.bold().paint("Records"));
    for row in &rows {
        println!(
            "  {}  {} - {}  {:>8}  {}",
            row.device_name,
            format_local(row.start_time),
            format_local(row.end_time),
            format_duration(row.duration_seconds),
            row.app_name,
        );
    }

    println!("{}", Colour::White.bold().paint("Per application"));
    for (app, seconds) in per_app {
        println!("  {:>8}  {app}", format_duration(seconds));
    }
    Ok(())
}

pub async fn process_devices_command(view: ViewArgs) -> Result<()> {
    let base = view.base_url()?;
    let client = reqwest::Client::new();

    let devices: Vec<String> = client
        .get(format!("{base}/devices"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if devices.is_empty() {
        println!("No devices registered");
        return Ok(());
    }

    for device in devices {
        let status: Option<DeviceStatus> = match client
            .get(format!("{base}/devices/{device}/status"))
            .send()
            .await
        {
            Ok(v) if v.status().is_success() => v.json().await.ok(),
            _ => None,
        };

        match status {
            Some(status) if status.online => println!(
                "  {device}  {}  {}",
                Colour::Green.paint("online"),
                status.current_app
            ),
            Some(status) => println!(
                "  {device}  {}  last seen {}",
                Colour::Red.paint("offline"),
                status
                    .last_seen
                    .map(format_local)
                    .unwrap_or_else(|| "never".into()),
            ),
            None => println!("  {device}  {}", Colour::Red.paint("unknown")),
        }
    }
    Ok(())
}

fn format_local(moment: DateTime<Utc>) -> String {
    moment
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn format_duration(seconds: i64) -> String {
    if seconds >= 3600 {
        format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m {:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::format_duration;

    #[test]
    fn durations_format_by_magnitude() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 05s");
        assert_eq!(format_duration(7265), "2h 01m");
    }
}
