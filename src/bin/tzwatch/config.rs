use crate::handler::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::PathBuf;
use tzwatch::ZoneDb;

/// Serves the current time, offset and next offset transition of a time zone.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "TZWATCH_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// How far ahead of now to search for the next transition, in seconds.
    #[arg(
        long,
        env = "TZWATCH_HORIZON_SECS",
        default_value_t = 4 * 7 * 24 * 3600,
        value_parser = clap::value_parser!(u32).range(1..),
    )]
    pub horizon_secs: u32,

    /// Report this unix timestamp as the current time instead of the clock.
    #[arg(long, env = "OVERRIDE_CURRENT_TIME", value_parser = parse_unix_seconds)]
    pub override_current_time: Option<DateTime<Utc>>,

    /// Directory of the tz database.
    #[arg(long, env = "TZDIR", default_value = "/usr/share/zoneinfo")]
    pub tzdir: PathBuf,

    /// Maximum log level.
    #[arg(long, env = "TZWATCH_LOG", default_value = "info")]
    pub log_level: LevelFilter,
}

fn parse_unix_seconds(s: &str) -> Result<DateTime<Utc>, String> {
    let seconds = s
        .parse::<i64>()
        .map_err(|e| format!("not a unix timestamp: {}", e))?;
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| format!("timestamp {} out of range", seconds))
}

impl Config {
    pub fn clock(&self) -> Clock {
        match self.override_current_time {
            Some(now) => Clock::Fixed(now),
            None => Clock::System,
        }
    }

    pub fn horizon(&self) -> TimeDelta {
        TimeDelta::seconds(self.horizon_secs.into())
    }

    pub fn zones(&self) -> ZoneDb {
        ZoneDb::new(&self.tzdir)
    }
}
