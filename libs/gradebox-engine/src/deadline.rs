//! Deadline arithmetic over the 5-day course week.
//!
//! `day_index` is 1-based: day 1 is the first weekday of week 1. Days 1-5
//! land in week one, 6-10 in week two, and so on. The deadline buffer is one
//! day after the course day, except after the last weekday of a week, where
//! the two non-course days are skipped with a 3-day buffer.

use chrono::{DateTime, Days, NaiveDate, Utc};

/// Deadlines land at a fixed time of day.
pub const DUE_HOUR: u32 = 13;

/// Derive the due timestamp for an assignment. `day_index <= 0` means the
/// assignment has no deadline.
pub fn due_date(course_start: NaiveDate, day_index: i32) -> Option<DateTime<Utc>> {
    if day_index <= 0 {
        return None;
    }
    let adjusted = (day_index - 1) as u64;
    let weeks_elapsed = adjusted / 5;
    let day_of_week = adjusted % 5;
    let buffer = if day_of_week == 4 { 3 } else { 1 };

    let date = course_start.checked_add_days(Days::new(weeks_elapsed * 7 + day_of_week + buffer))?;
    let naive = date.and_hms_opt(DUE_HOUR, 0, 0)?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

pub fn is_late(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    due.is_some_and(|due| now > due)
}
