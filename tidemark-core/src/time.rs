//! Local-date rules. Every date-only field is read with local-midnight
//! semantics in one configured IANA zone; nothing here goes through a
//! UTC-shifted date.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Timelike,
    Utc, Weekday,
};
use chrono_tz::Tz;

use crate::error::{PlannerError, Result};

pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

pub fn parse_zone(name: &str) -> Result<Tz> {
    name.trim()
        .parse()
        .map_err(|_| PlannerError::validation(format!("invalid timezone: {name}")))
}

/// Calendar date of `instant` on the local wall clock.
pub fn local_date(instant: DateTime<Utc>, zone: Tz) -> NaiveDate {
    instant.with_timezone(&zone).date_naive()
}

/// The instant a local wall-clock reading refers to. A missing time means
/// local midnight. Ambiguous readings take the earlier instant; readings
/// inside a DST gap move forward with the clock.
pub fn local_instant(date: NaiveDate, time: Option<NaiveTime>, zone: Tz) -> DateTime<Utc> {
    let ndt = date.and_time(time.unwrap_or(NaiveTime::MIN));
    match zone.from_local_datetime(&ndt) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Read the wall time with the offset in force before the gap.
            let pre_gap = zone
                .from_local_datetime(&(ndt - Duration::days(1)))
                .earliest()
                .map(|t| t.offset().fix())
                .unwrap_or_else(|| zone.offset_from_utc_datetime(&ndt).fix())
                .local_minus_utc();
            Utc.from_utc_datetime(&(ndt - Duration::seconds(pre_gap.into())))
        }
    }
}

pub fn local_midnight(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    local_instant(date, None, zone)
}

/// Canonical `YYYY-MM-DD` bucket key.
pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_KEY_FORMAT).to_string()
}

pub fn parse_day_key(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DAY_KEY_FORMAT)
        .map_err(|e| PlannerError::validation(format!("invalid date '{s}': {e}")))
}

/// Accepts `HH:MM`, `HH:MM:SS` or `HH:MM:SS.fff`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
        .map_err(|e| PlannerError::validation(format!("invalid time '{s}': {e}")))
}

/// `HH:MM` for whole minutes, otherwise `HH:MM:SS` plus any fraction, so
/// `parse_time_of_day` gives back the exact same time.
pub fn format_time_of_day(t: NaiveTime) -> String {
    if t.second() == 0 && t.nanosecond() == 0 {
        t.format("%H:%M").to_string()
    } else {
        t.format("%H:%M:%S%.f").to_string()
    }
}

pub fn parse_weekday(s: &str) -> Result<Weekday> {
    s.trim()
        .parse()
        .map_err(|_| PlannerError::validation(format!("invalid weekday: {s}")))
}

/// First day of the week containing `date`.
pub fn start_of_week(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let back = (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    date - Duration::days(back.into())
}

/// Serde adapter storing an optional time of day as `HH:MM`, with seconds
/// only when the time has them.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&super::format_time_of_day(*t)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => super::parse_time_of_day(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
