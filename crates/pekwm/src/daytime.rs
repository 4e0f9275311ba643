//! Pure sunrise/sunset computation and the `TimeOfDay` classification built
//! on top of it. Ported from the NOAA-derived sunrise equation used by the
//! original daemon: Julian-date reduction, solar mean anomaly, equation of
//! the centre, ecliptic longitude, then the hour angle.

use std::fmt;

const SECONDS_PER_DAY: f64 = 86400.0;
const JULIAN_DATE_EPOCH: f64 = 2440587.5;
const JULIAN_DAY_20010101: f64 = 2451545.0;
const EQUATION_OF_CENTER_DEG_COEFF: f64 = 1.9148;

fn earth_axial_tilt_rad() -> f64 {
    23.4397_f64.to_radians()
}

fn ts_to_julian(ts: f64) -> f64 {
    ts / SECONDS_PER_DAY + JULIAN_DATE_EPOCH
}

fn julian_to_ts(julian: f64) -> i64 {
    ((julian - JULIAN_DATE_EPOCH) * SECONDS_PER_DAY) as i64
}

fn julian_to_julian_day(julian: f64) -> f64 {
    (julian - (JULIAN_DAY_20010101 + 0.0009) + 69.184 / SECONDS_PER_DAY).ceil()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeOfDay {
    Dawn,
    Day,
    Dusk,
    Night,
}

impl TimeOfDay {
    pub fn from_str_loose(s: &str) -> TimeOfDay {
        if s.eq_ignore_ascii_case("dawn") {
            TimeOfDay::Dawn
        } else if s.eq_ignore_ascii_case("day") {
            TimeOfDay::Day
        } else if s.eq_ignore_ascii_case("dusk") {
            TimeOfDay::Dusk
        } else {
            TimeOfDay::Night
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeOfDay::Dawn => "dawn",
            TimeOfDay::Day => "day",
            TimeOfDay::Dusk => "dusk",
            TimeOfDay::Night => "night",
        };
        write!(f, "{s}")
    }
}

/// Sunrise/sunset for a single calendar day at a given location and
/// elevation (metres), computed at construction time.
#[derive(Debug, Clone, Copy)]
pub struct Daytime {
    now: i64,
    sun_rise: i64,
    sun_set: i64,
    day_length_s: i64,
}

impl Daytime {
    pub fn new(ts: i64, latitude: f64, longitude: f64, elevation: f64) -> Daytime {
        let julian = ts_to_julian(ts as f64);
        let julian_day = julian_to_julian_day(julian);

        let mean_solar_time = julian_day + 0.0009 - longitude / 360.0;

        let solar_mean_anomaly_deg = (357.5291 + 0.98560028 * mean_solar_time).rem_euclid(360.0);
        let solar_mean_anomaly = solar_mean_anomaly_deg.to_radians();

        let equation_of_center_deg = EQUATION_OF_CENTER_DEG_COEFF * solar_mean_anomaly.sin()
            + 0.02 * (2.0 * solar_mean_anomaly).sin()
            + 0.0003 * (3.0 * solar_mean_anomaly).sin();

        let ecliptic_longitude_deg =
            (solar_mean_anomaly_deg + equation_of_center_deg + 180.0 + 102.9372).rem_euclid(360.0);
        let ecliptic_longitude = ecliptic_longitude_deg.to_radians();

        let declination_sin = ecliptic_longitude.sin() * earth_axial_tilt_rad().sin();
        let declination_cos = declination_sin.asin().cos();

        let hour_angle_cos = ((-0.833 - 2.076 * elevation.sqrt() / 60.0).to_radians().sin()
            - latitude.to_radians().sin() * declination_sin)
            / (latitude.to_radians().cos() * declination_cos);

        let mut sun_rise = 0i64;
        let mut sun_set = 0i64;
        let mut day_length_s = 0i64;

        if (-1.0..=1.0).contains(&hour_angle_cos) {
            let hour_angle_deg = hour_angle_cos.acos().to_degrees();
            let solar_transit = JULIAN_DAY_20010101
                + mean_solar_time
                + 0.0053 * solar_mean_anomaly.sin()
                - 0.0069 * (2.0 * ecliptic_longitude).sin();
            sun_rise = julian_to_ts(solar_transit - hour_angle_deg / 360.0);
            sun_set = julian_to_ts(solar_transit + hour_angle_deg / 360.0);
            day_length_s = sun_set - sun_rise;
        }

        Daytime {
            now: ts,
            sun_rise,
            sun_set,
            day_length_s,
        }
    }

    pub fn sun_rise(&self) -> i64 {
        self.sun_rise
    }

    pub fn sun_set(&self) -> i64 {
        self.sun_set
    }

    pub fn day_length_s(&self) -> i64 {
        self.day_length_s
    }

    /// `Day` when `sunrise <= ts <= sunset`, otherwise `Night`. A polar
    /// day/night (hour-angle cosine outside `[-1, 1]`) has `sun_rise ==
    /// sun_set == 0`, so every timestamp falls into `Night` — the caller is
    /// responsible for treating that degenerate case as permanent daylight
    /// or permanent darkness if it cares to distinguish them.
    pub fn time_of_day(&self, ts: i64) -> TimeOfDay {
        let ts = if ts == 0 { self.now } else { ts };
        if ts < self.sun_rise || ts > self.sun_set {
            TimeOfDay::Night
        } else {
            TimeOfDay::Day
        }
    }

    /// The instant the current time-of-day state ends: `sun_set` while in
    /// day, `sun_rise` while before it, or `sun_rise + 1 day` once past
    /// sunset (the next day's sunrise, approximated without recomputing the
    /// equation for tomorrow).
    pub fn time_of_day_end(&self, ts: i64) -> i64 {
        let ts = if ts == 0 { self.now } else { ts };
        if ts > self.sun_set {
            self.sun_rise + SECONDS_PER_DAY as i64
        } else if ts > self.sun_rise {
            self.sun_set
        } else {
            self.sun_rise
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-06-21 12:00:00 UTC, Stockholm.
    const NOON: i64 = 1781092800;

    #[test]
    fn sunrise_precedes_noon_precedes_sunset_at_moderate_latitude() {
        let d = Daytime::new(NOON, 59.33, 18.07, 0.0);
        assert!(d.sun_rise() < NOON);
        assert!(NOON < d.sun_set());
        assert!(d.day_length_s() >= 0 && d.day_length_s() <= 86400);
    }

    #[test]
    fn time_of_day_is_day_between_sunrise_and_sunset() {
        let d = Daytime::new(NOON, 59.33, 18.07, 0.0);
        assert_eq!(d.time_of_day(NOON), TimeOfDay::Day);
    }

    #[test]
    fn time_of_day_is_night_before_sunrise() {
        let d = Daytime::new(NOON, 59.33, 18.07, 0.0);
        assert_eq!(d.time_of_day(d.sun_rise() - 3600), TimeOfDay::Night);
    }

    #[test]
    fn time_of_day_end_after_sunset_is_next_day_sunrise() {
        let d = Daytime::new(NOON, 59.33, 18.07, 0.0);
        let end = d.time_of_day_end(d.sun_set() + 1);
        assert_eq!(end, d.sun_rise() + 86400);
    }

    #[test]
    fn time_of_day_end_just_before_sunset_is_sunset() {
        let d = Daytime::new(NOON, 59.33, 18.07, 0.0);
        let end = d.time_of_day_end(d.sun_set() - 10);
        assert_eq!(end, d.sun_set());
    }

    #[test]
    fn from_str_loose_is_case_insensitive_and_defaults_to_night() {
        assert_eq!(TimeOfDay::from_str_loose("DAWN"), TimeOfDay::Dawn);
        assert_eq!(TimeOfDay::from_str_loose("dusk"), TimeOfDay::Dusk);
        assert_eq!(TimeOfDay::from_str_loose("whatever"), TimeOfDay::Night);
    }
}
