//! Civil time in the shop's timezone.
//!
//! Reservation instants are stored as `YYYY-MM-DD HH:MM:SS` strings in the
//! shop's local civil time and every temporal query compares them as text.
//! That only orders correctly because the format is fixed-width and
//! zero-padded, so all formatting goes through [`format_civil`].

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

pub const CIVIL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Projects a [`Clock`] onto one fixed civil timezone, independent of the
/// host's `TZ` setting.
#[derive(Clone)]
pub struct ShopClock {
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl ShopClock {
    pub fn new(clock: Arc<dyn Clock>, tz: Tz) -> Self {
        Self { clock, tz }
    }

    pub fn system(tz: Tz) -> Self {
        Self::new(Arc::new(SystemClock), tz)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Current civil time, truncated to whole seconds.
    pub fn now(&self) -> NaiveDateTime {
        let local = self.clock.now().with_timezone(&self.tz).naive_local();
        local.with_nanosecond(0).unwrap_or(local)
    }

    pub fn now_string(&self) -> String {
        format_civil(&self.now())
    }

    /// `now() + minutes`, as a civil string.
    pub fn offset_string(&self, minutes: i64) -> String {
        format_civil(&add_minutes(self.now(), minutes))
    }
}

/// Civil arithmetic: shifts the wall-clock reading by `n` minutes, rolling
/// over day, month and year boundaries.
pub fn add_minutes(instant: NaiveDateTime, n: i64) -> NaiveDateTime {
    instant + Duration::minutes(n)
}

pub fn format_civil(instant: &NaiveDateTime) -> String {
    instant.format(CIVIL_FORMAT).to_string()
}

pub fn parse_civil(raw: &str) -> Option<NaiveDateTime> {
    // chrono accepts unpadded fields, the store does not
    if raw.len() != 19 {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, CIVIL_FORMAT).ok()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}
