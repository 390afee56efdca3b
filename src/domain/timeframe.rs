//! Timeframe bucketing: the fixed candle widths the pipeline understands,
//! and the market-timezone-aware floor operation used to assign an event
//! to its bucket-start.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;

/// One of the fixed candle widths supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    pub fn all() -> [Timeframe; 7] {
        [
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::ThirtyMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }

    pub fn to_minutes(self) -> i64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn to_duration(self) -> chrono::Duration {
        chrono::Duration::minutes(self.to_minutes())
    }

    /// How many 1-minute bars compose one bar of this timeframe.
    pub fn native_multiple(self) -> usize {
        self.to_minutes() as usize
    }

    /// Floors `instant` to this timeframe's bucket-start, evaluated in the
    /// given IANA market timezone. DST transitions never double-emit because
    /// the floor always operates on the local wall-clock time-of-day, not on
    /// a raw UTC offset: a bucket boundary is "the same local minute every
    /// day", and that identity survives a changing UTC offset.
    pub fn floor(self, instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let local = instant.with_timezone(&tz);
        let date = local.date_naive();

        let bucket_local = if matches!(self, Timeframe::OneDay) {
            date.and_time(NaiveTime::MIN)
        } else {
            let period_secs = self.to_minutes() * 60;
            let secs_since_midnight = local.num_seconds_from_midnight() as i64;
            let floored = secs_since_midnight - (secs_since_midnight % period_secs);
            date.and_time(NaiveTime::from_num_seconds_from_midnight_opt(floored as u32, 0).expect(
                "floored seconds-of-day is always < 86400 and thus a valid NaiveTime",
            ))
        };

        resolve_local(tz, date, bucket_local)
    }

    /// The end instant (exclusive) of the bucket that `bucket_start` opens.
    pub fn bucket_end(self, bucket_start: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        if matches!(self, Timeframe::OneDay) {
            let local = bucket_start.with_timezone(&tz);
            let next_date = local.date_naive().succ_opt().unwrap_or(local.date_naive());
            resolve_local(tz, next_date, next_date.and_time(NaiveTime::MIN))
        } else {
            bucket_start + self.to_duration()
        }
    }
}

/// Converts a local wall-clock (date, time) pair to a UTC instant, resolving
/// DST ambiguity/gaps by preferring the earliest valid offset — the policy
/// that keeps bucket-starts strictly monotonic across a spring-forward or
/// fall-back transition instead of ever going backwards or being skipped.
fn resolve_local(tz: Tz, date: NaiveDate, time: chrono::NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _latest) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => {
            // The wall-clock time was skipped by a spring-forward transition;
            // step forward minute by minute until we land on a valid instant.
            let mut probe = naive + chrono::Duration::minutes(1);
            loop {
                if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    return dt.with_timezone(&Utc);
                }
                probe += chrono::Duration::minutes(1);
            }
        }
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "30m" | "30min" => Ok(Timeframe::ThirtyMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            other => Err(ConfigError::InvalidValue {
                field: "timeframe",
                reason: format!("unrecognized timeframe '{other}'"),
            }),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::ThirtyMin => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ny() -> Tz {
        chrono_tz::America::New_York
    }

    #[test]
    fn from_str_round_trips_display() {
        for tf in Timeframe::all() {
            assert_eq!(Timeframe::from_str(&tf.to_string()).unwrap(), tf);
        }
    }

    #[test]
    fn floor_aligns_to_five_minute_boundary() {
        // 2024-01-02 09:33:12 ET is within the market's regular session.
        let t = ny()
            .with_ymd_and_hms(2024, 1, 2, 9, 33, 12)
            .unwrap()
            .with_timezone(&Utc);
        let floored = Timeframe::FiveMin.floor(t, ny());
        let expected = ny()
            .with_ymd_and_hms(2024, 1, 2, 9, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(floored, expected);
    }

    #[test]
    fn floor_at_exact_boundary_stays_put() {
        let t = ny()
            .with_ymd_and_hms(2024, 1, 2, 9, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Timeframe::OneMin.floor(t, ny()), t);
    }

    #[test]
    fn daily_floor_is_local_midnight() {
        let t = ny()
            .with_ymd_and_hms(2024, 6, 15, 14, 45, 0)
            .unwrap()
            .with_timezone(&Utc);
        let floored = Timeframe::OneDay.floor(t, ny());
        let expected = ny()
            .with_ymd_and_hms(2024, 6, 15, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(floored, expected);
    }

    #[test]
    fn bucket_starts_are_monotonic_across_spring_forward() {
        // US spring-forward 2024-03-10: 02:00 ET -> 03:00 ET, 2:xx does not exist.
        let base = ny()
            .with_ymd_and_hms(2024, 3, 10, 1, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let mut prev = Timeframe::OneHour.floor(base, ny());
        for minute in 0..240 {
            let t = base + chrono::Duration::minutes(minute);
            let b = Timeframe::OneHour.floor(t, ny());
            assert!(b >= prev, "bucket-start went backwards at +{minute}min");
            prev = b;
        }
    }

    #[test]
    fn bucket_starts_are_monotonic_across_fall_back() {
        // US fall-back 2024-11-03: 02:00 ET repeats as 01:00 ET again.
        let base = ny()
            .with_ymd_and_hms(2024, 11, 3, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let mut prev = Timeframe::FifteenMin.floor(base, ny());
        for minute in 0..240 {
            let t = base + chrono::Duration::minutes(minute);
            let b = Timeframe::FifteenMin.floor(t, ny());
            assert!(b >= prev, "bucket-start went backwards at +{minute}min");
            prev = b;
        }
    }
}
