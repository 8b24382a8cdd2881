//! Cadence slots

use crate::config::SchedulerConfig;
use crate::ConfigError;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use std::fmt;
use std::time::Duration;

/// Parses an `HH:MM` wall-clock time
pub fn parse_daily_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// When the scheduler fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once a day at `at` on a clock `utc_offset_hours` ahead of UTC
    Daily { at: NaiveTime, utc_offset_hours: i32 },

    /// Every `interval`, with slots aligned to the Unix epoch
    Every(Duration),
}

impl Cadence {
    pub fn daily(at: NaiveTime, utc_offset_hours: i32) -> Self {
        Cadence::Daily {
            at,
            utc_offset_hours,
        }
    }

    pub fn every(interval: Duration) -> Self {
        Cadence::Every(interval)
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        match (&config.daily_at, config.interval_secs) {
            (Some(at), None) => parse_daily_time(at)
                .map(|at| Cadence::daily(at, config.utc_offset_hours))
                .ok_or_else(|| {
                    ConfigError::Validation(format!("daily-at must be HH:MM, got '{}'", at))
                }),
            (None, Some(secs)) if secs > 0 => Ok(Cadence::every(Duration::from_secs(secs))),
            _ => Err(ConfigError::Validation(
                "scheduler needs exactly one of daily-at or a positive interval-secs".to_string(),
            )),
        }
    }

    /// The most recent slot at or before `now`
    pub fn latest_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Every(interval) => {
                let secs = interval.as_secs().max(1) as i64;
                let slot = now.timestamp().div_euclid(secs) * secs;
                Utc.timestamp_opt(slot, 0).single().unwrap_or(now)
            }
            Cadence::Daily {
                at,
                utc_offset_hours,
            } => {
                let offset = ChronoDuration::hours(utc_offset_hours as i64);
                let local_now = now.naive_utc() + offset;
                let mut local_slot = local_now.date().and_time(at);
                if local_slot > local_now {
                    local_slot -= ChronoDuration::days(1);
                }
                Utc.from_utc_datetime(&(local_slot - offset))
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily {
                at,
                utc_offset_hours,
            } => write!(f, "daily at {} UTC{:+}", at.format("%H:%M"), utc_offset_hours),
            Cadence::Every(interval) => write!(f, "every {}s", interval.as_secs()),
        }
    }
}
