//! Sunrise/sunset calculation and the timed theme schedule.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use nightfall_core::{AppConfig, Theme};

/// Official zenith for sunrise and sunset, in degrees.
const ZENITH: f64 = 90.833;

/// Sunrise and sunset in UTC for the given date and position.
///
/// Returns `None` during polar day or polar night.
pub fn sun_times_utc(latitude: f64, longitude: f64, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let rise = sun_event_utc_hours(latitude, longitude, date.ordinal() as f64, true)?;
    let set = sun_event_utc_hours(latitude, longitude, date.ordinal() as f64, false)?;
    Some((at_utc_hours(date, rise), at_utc_hours(date, set)))
}

/// Sunrise and sunset converted to local wall time.
pub fn sun_times_local(latitude: f64, longitude: f64, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let (rise, set) = sun_times_utc(latitude, longitude, date)?;
    Some((
        Local.from_utc_datetime(&rise).naive_local(),
        Local.from_utc_datetime(&set).naive_local(),
    ))
}

fn sun_event_utc_hours(latitude: f64, longitude: f64, day_of_year: f64, rising: bool) -> Option<f64> {
    let lng_hour = longitude / 15.0;
    let t = if rising {
        day_of_year + (6.0 - lng_hour) / 24.0
    } else {
        day_of_year + (18.0 - lng_hour) / 24.0
    };

    let mean_anomaly = 0.9856 * t - 3.289;
    let true_longitude = normalize_degrees(
        mean_anomaly
            + 1.916 * sin_deg(mean_anomaly)
            + 0.020 * sin_deg(2.0 * mean_anomaly)
            + 282.634,
    );

    let mut right_ascension = normalize_degrees((0.91764 * tan_deg(true_longitude)).atan().to_degrees());
    let l_quadrant = (true_longitude / 90.0).floor() * 90.0;
    let ra_quadrant = (right_ascension / 90.0).floor() * 90.0;
    right_ascension = (right_ascension + l_quadrant - ra_quadrant) / 15.0;

    let sin_dec = 0.39782 * sin_deg(true_longitude);
    let cos_dec = sin_dec.asin().cos();
    let cos_h = (cos_deg(ZENITH) - sin_dec * sin_deg(latitude)) / (cos_dec * cos_deg(latitude));
    if !(-1.0..=1.0).contains(&cos_h) {
        return None;
    }

    let hour_angle_deg = if rising {
        360.0 - cos_h.acos().to_degrees()
    } else {
        cos_h.acos().to_degrees()
    };
    let hour_angle = hour_angle_deg / 15.0;

    let local_mean_time = hour_angle + right_ascension - 0.06571 * t - 6.622;
    Some((local_mean_time - lng_hour).rem_euclid(24.0))
}

fn at_utc_hours(date: NaiveDate, hours: f64) -> NaiveDateTime {
    let seconds = (hours * 3600.0).round() as i64;
    date.and_time(NaiveTime::default()) + Duration::seconds(seconds)
}

fn normalize_degrees(value: f64) -> f64 {
    value.rem_euclid(360.0)
}
fn sin_deg(value: f64) -> f64 {
    value.to_radians().sin()
}
fn cos_deg(value: f64) -> f64 {
    value.to_radians().cos()
}
fn tan_deg(value: f64) -> f64 {
    value.to_radians().tan()
}

/// True when `t` lies in `[start, end)`, wrapping over midnight.
pub fn time_between(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

/// Latest instant at or before `now` whose time of day is `t`.
pub fn last_occurrence(now: NaiveDateTime, t: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(t);
    if today <= now {
        today
    } else {
        today - Duration::days(1)
    }
}

/// First instant strictly after `now` whose time of day is `t`.
pub fn next_occurrence(now: NaiveDateTime, t: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(t);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Offset-adjusted sunrise and sunset for today, as times of day.
///
/// Uses the configured location when enabled and falls back to the fixed
/// times when the sun does not rise or set at that latitude.
pub fn adjusted_sun_times(config: &AppConfig, date: NaiveDate) -> (NaiveTime, NaiveTime) {
    if !config.location.enabled {
        return (config.sunrise, config.sunset);
    }
    match sun_times_local(config.location.latitude, config.location.longitude, date) {
        Some((rise, set)) => {
            let rise = rise + Duration::minutes(config.location.sunrise_offset_min as i64);
            let set = set + Duration::minutes(config.location.sunset_offset_min as i64);
            (rise.time(), set.time())
        }
        None => {
            tracing::warn!(
                "No sunrise or sunset at latitude {}, using configured times",
                config.location.latitude
            );
            (config.sunrise, config.sunset)
        }
    }
}

/// Where "now" sits in the daily light/dark schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedThemeState {
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
    /// Theme that should be active now.
    pub target: Theme,
    /// When the target theme became due.
    pub current_switch: NaiveDateTime,
    /// When the next transition is due.
    pub next_switch: NaiveDateTime,
}

impl TimedThemeState {
    pub fn compute(config: &AppConfig, now: NaiveDateTime) -> Self {
        let (sunrise, sunset) = adjusted_sun_times(config, now.date());
        if time_between(now.time(), sunrise, sunset) {
            Self {
                sunrise,
                sunset,
                target: Theme::Light,
                current_switch: last_occurrence(now, sunrise),
                next_switch: next_occurrence(now, sunset),
            }
        } else {
            Self {
                sunrise,
                sunset,
                target: Theme::Dark,
                current_switch: last_occurrence(now, sunset),
                next_switch: next_occurrence(now, sunrise),
            }
        }
    }
}
