//! Recurring trigger specs and fire-time computation
//!
//! Three spec shapes are supported: `daily@HH:MM` fires once a day at the
//! given UTC time, `every Nh` and `every Nm` fire on a fixed interval
//! aligned to the Unix epoch. Epoch alignment makes fire times stable
//! across process restarts, which the misfire check relies on.

use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerParseError {
    #[error("unrecognized trigger spec: {0:?}")]
    Unrecognized(String),

    #[error("out-of-range value in trigger spec: {0:?}")]
    OutOfRange(String),
}

/// A parsed recurring trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSpec {
    DailyAt { hour: u32, minute: u32 },
    EveryHours(u32),
    EveryMinutes(u32),
}

impl TriggerSpec {
    /// Parses a trigger spec string
    pub fn parse(spec: &str) -> Result<Self, TriggerParseError> {
        let spec = spec.trim();

        if let Some(time) = spec.strip_prefix("daily@") {
            let (hour, minute) = time
                .split_once(':')
                .ok_or_else(|| TriggerParseError::Unrecognized(spec.to_string()))?;
            let hour: u32 = hour
                .parse()
                .map_err(|_| TriggerParseError::Unrecognized(spec.to_string()))?;
            let minute: u32 = minute
                .parse()
                .map_err(|_| TriggerParseError::Unrecognized(spec.to_string()))?;
            if hour > 23 || minute > 59 {
                return Err(TriggerParseError::OutOfRange(spec.to_string()));
            }
            return Ok(TriggerSpec::DailyAt { hour, minute });
        }

        if let Some(interval) = spec.strip_prefix("every ") {
            let n: u32 = interval
                .strip_suffix(['h', 'm'])
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| TriggerParseError::Unrecognized(spec.to_string()))?;
            if n == 0 {
                return Err(TriggerParseError::OutOfRange(spec.to_string()));
            }
            return if interval.ends_with('h') {
                Ok(TriggerSpec::EveryHours(n))
            } else {
                Ok(TriggerSpec::EveryMinutes(n))
            };
        }

        Err(TriggerParseError::Unrecognized(spec.to_string()))
    }

    fn interval_secs(&self) -> Option<i64> {
        match self {
            TriggerSpec::EveryHours(n) => Some(*n as i64 * 3600),
            TriggerSpec::EveryMinutes(n) => Some(*n as i64 * 60),
            TriggerSpec::DailyAt { .. } => None,
        }
    }

    /// First fire time strictly after the given instant
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TriggerSpec::DailyAt { hour, minute } => {
                let mut candidate = daily_candidate(after, *hour, *minute);
                if candidate <= after {
                    candidate += Duration::days(1);
                }
                candidate
            }
            _ => {
                let period = self.interval_secs().unwrap_or(60);
                let slot = after.timestamp().div_euclid(period) + 1;
                epoch_time(slot * period)
            }
        }
    }

    /// Most recent fire time at or before the given instant
    pub fn prev_fire(&self, before: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TriggerSpec::DailyAt { hour, minute } => {
                let mut candidate = daily_candidate(before, *hour, *minute);
                if candidate > before {
                    candidate -= Duration::days(1);
                }
                candidate
            }
            _ => {
                let period = self.interval_secs().unwrap_or(60);
                let slot = before.timestamp().div_euclid(period);
                epoch_time(slot * period)
            }
        }
    }
}

fn daily_candidate(near: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    near.date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("validated at parse time")
        .and_utc()
}

fn epoch_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
