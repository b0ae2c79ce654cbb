//! Bookable slots: a civil date, a time of day on the opening grid, and a
//! service type.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

use crate::clock::format_civil;

/// The daily grid of bookable times, `first..=last` every `step_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpeningHours {
    first: NaiveTime,
    last: NaiveTime,
    step_minutes: u32,
}

impl OpeningHours {
    pub fn new(first: NaiveTime, last: NaiveTime, step_minutes: u32) -> Result<Self, String> {
        if step_minutes == 0 {
            return Err("slot step must be positive".to_string());
        }
        if first > last {
            return Err(format!("first slot {first} is after last slot {last}"));
        }
        if first.second() != 0 || last.second() != 0 {
            return Err("slot boundaries must be whole minutes".to_string());
        }
        let span = (last - first).num_minutes() as u32;
        if span % step_minutes != 0 {
            return Err(format!(
                "slot step of {step_minutes} minutes does not divide {first}..{last}"
            ));
        }
        Ok(Self {
            first,
            last,
            step_minutes,
        })
    }

    pub fn times(&self) -> Vec<NaiveTime> {
        let mut times = Vec::new();
        let mut current = self.first;
        loop {
            times.push(current);
            if current >= self.last {
                break;
            }
            current += chrono::Duration::minutes(i64::from(self.step_minutes));
        }
        times
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if time < self.first || time > self.last || time.second() != 0 {
            return false;
        }
        let offset = (time - self.first).num_minutes() as u32;
        offset % self.step_minutes == 0
    }
}

impl Default for OpeningHours {
    fn default() -> Self {
        Self {
            first: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
            last: NaiveTime::from_hms_opt(19, 30, 0).unwrap_or(NaiveTime::MIN),
            step_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Available,
    Reserved,
    Past,
}

#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub reservation_date: String,
    pub time: String,
    pub state: SlotState,
}

/// Why a requested instant cannot be booked, before looking at the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unbookable {
    OffGrid,
    Past,
}

/// An instant at or before `now` is in the past.
pub fn is_past(instant: NaiveDateTime, now: NaiveDateTime) -> bool {
    instant <= now
}

pub fn check_bookable(
    hours: &OpeningHours,
    instant: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<(), Unbookable> {
    if !hours.contains(instant.time()) {
        return Err(Unbookable::OffGrid);
    }
    if is_past(instant, now) {
        return Err(Unbookable::Past);
    }
    Ok(())
}

/// Lays the opening grid of `date` over the instants already taken for one
/// service type. Past wins over reserved.
pub fn day_slots(
    hours: &OpeningHours,
    date: NaiveDate,
    taken: &[String],
    now: NaiveDateTime,
) -> Vec<Slot> {
    hours
        .times()
        .into_iter()
        .map(|time| {
            let instant = date.and_time(time);
            let key = format_civil(&instant);
            let state = if is_past(instant, now) {
                SlotState::Past
            } else if taken.iter().any(|t| *t == key) {
                SlotState::Reserved
            } else {
                SlotState::Available
            };
            Slot {
                reservation_date: key,
                time: time.format("%H:%M").to_string(),
                state,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_civil;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn default_grid_runs_ten_to_half_past_seven() {
        let times = OpeningHours::default().times();
        assert_eq!(times.len(), 20);
        assert_eq!(times.first(), Some(&t(10, 0)));
        assert_eq!(times.last(), Some(&t(19, 30)));
    }

    #[test]
    fn grid_membership() {
        let hours = OpeningHours::default();
        assert!(hours.contains(t(10, 0)));
        assert!(hours.contains(t(14, 30)));
        assert!(!hours.contains(t(14, 15)));
        assert!(!hours.contains(t(9, 30)));
        assert!(!hours.contains(t(20, 0)));
        assert!(!hours.contains(NaiveTime::from_hms_opt(11, 0, 30).unwrap()));
    }

    #[test]
    fn invalid_grids_are_rejected() {
        assert!(OpeningHours::new(t(10, 0), t(19, 30), 0).is_err());
        assert!(OpeningHours::new(t(19, 0), t(10, 0), 30).is_err());
        assert!(OpeningHours::new(t(10, 0), t(19, 30), 45).is_err());
        assert!(OpeningHours::new(t(8, 0), t(8, 0), 15).is_ok());
    }

    #[test]
    fn bookable_requires_grid_and_future() {
        let hours = OpeningHours::default();
        let now = parse_civil("2025-06-10 11:00:00").unwrap();

        let at = |raw| parse_civil(raw).unwrap();
        assert_eq!(check_bookable(&hours, at("2025-06-10 11:30:00"), now), Ok(()));
        assert_eq!(
            check_bookable(&hours, at("2025-06-10 11:00:00"), now),
            Err(Unbookable::Past)
        );
        assert_eq!(
            check_bookable(&hours, at("2025-06-09 12:00:00"), now),
            Err(Unbookable::Past)
        );
        assert_eq!(
            check_bookable(&hours, at("2025-06-11 07:00:00"), now),
            Err(Unbookable::OffGrid)
        );
    }

    #[test]
    fn day_slots_marks_reserved_and_past() {
        let hours = OpeningHours::default();
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let now = parse_civil("2025-06-10 11:10:00").unwrap();
        let taken = vec!["2025-06-10 12:00:00".to_string()];

        let slots = day_slots(&hours, date, &taken, now);
        let state_at = |time: &str| slots.iter().find(|s| s.time == time).unwrap().state;

        assert_eq!(state_at("10:00"), SlotState::Past);
        assert_eq!(state_at("11:00"), SlotState::Past);
        assert_eq!(state_at("11:30"), SlotState::Available);
        assert_eq!(state_at("12:00"), SlotState::Reserved);
        assert_eq!(state_at("19:30"), SlotState::Available);
        assert_eq!(slots[0].reservation_date, "2025-06-10 10:00:00");
    }
}
