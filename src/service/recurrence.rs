//! When does the next weekly reminder fire?
//!
//! Everything here is pure: callers pass "now" in, so the results only depend
//! on the calendar rules of `now`'s time zone.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone};

use crate::model::{DayOfWeek, WeeklyRecurrence};

const DAYS_PER_WEEK: i64 = 7;

/// The first instant strictly after `now` at which `recurrence` should remind.
///
/// The target weekday is looked up in the current week first. When it is
/// today and today's reminder instant is at or before `now`, the reminder
/// moves to next week. Lead times that reach back across a day boundary can
/// still land at or before `now`; those are pushed forward by whole weeks.
pub fn next_fire_instant<Tz: TimeZone>(recurrence: &WeeklyRecurrence, now: &DateTime<Tz>) -> DateTime<Tz> {
    let zone = now.timezone();
    let today = now.date_naive();

    let mut days_until_target = recurrence.day_of_week.ordinal() - DayOfWeek::of(now).ordinal();
    if days_until_target < 0 {
        days_until_target += DAYS_PER_WEEK;
    }
    if days_until_target == 0 && fire_on(recurrence, today, &zone) <= *now {
        days_until_target += DAYS_PER_WEEK;
    }

    let mut date = today + Duration::days(days_until_target);
    let mut fire_at = fire_on(recurrence, date, &zone);

    if fire_at <= *now {
        let behind = now.clone().signed_duration_since(fire_at.clone()).num_days();
        date += Duration::days((behind / DAYS_PER_WEEK + 1) * DAYS_PER_WEEK);
        fire_at = fire_on(recurrence, date, &zone);

        // a DST shift can still leave us an hour short
        while fire_at <= *now {
            date += Duration::days(DAYS_PER_WEEK);
            fire_at = fire_on(recurrence, date, &zone);
        }
    }

    fire_at
}

/// The next start of the weekly event itself, ignoring the lead time.
pub fn next_occurrence<Tz: TimeZone>(recurrence: &WeeklyRecurrence, now: &DateTime<Tz>) -> DateTime<Tz> {
    let on_time = WeeklyRecurrence {
        lead_minutes: 0,
        ..*recurrence
    };
    next_fire_instant(&on_time, now)
}

/// The instant a one-time reminder fires: `lead_minutes` before `target`.
pub fn one_shot_fire_instant<Tz: TimeZone>(target: &DateTime<Tz>, lead_minutes: u32) -> DateTime<Tz> {
    target.clone() - Duration::minutes(i64::from(lead_minutes))
}

/// How long until a one-time reminder fires. `None` once that moment is not in the future.
pub fn one_shot_delay<Tz: TimeZone>(
    target: &DateTime<Tz>,
    lead_minutes: u32,
    now: &DateTime<Tz>,
) -> Option<std::time::Duration> {
    crate::time::duration_until(&one_shot_fire_instant(target, lead_minutes), now)
}

/// The reminder instant on `date`: the start time on that day minus the lead.
fn fire_on<Tz: TimeZone>(recurrence: &WeeklyRecurrence, date: NaiveDate, zone: &Tz) -> DateTime<Tz> {
    at_local(zone, date.and_time(recurrence.start_time.to_naive())) - recurrence.lead()
}

/// Resolve a wall-clock time in `zone`. Times skipped by a DST gap move one
/// hour forward, repeated times take the earlier instant.
fn at_local<Tz: TimeZone>(zone: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => zone
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| zone.from_utc_datetime(&local)),
    }
}
