//! Turns weekly quiet-hours rules into a dated calendar of sleep/wake events.

use crate::common::{SECONDS_PER_DAY, SECONDS_PER_WEEK};
use crate::components::event_list::OrderedEventList;
use crate::config::{SleepRule, SleepSchedule};
use crate::events::SleepEvent;
use crate::time::{days_until, midnight_of, weekday_of};
use chrono::Weekday;
use tracing::debug;

/// Builds the sleep calendar for the week starting today (local time).
///
/// Every selected weekday yields a sleep event at the rule's start and a wake
/// event at its end, the end moving to the next day when the window crosses
/// midnight. A rule that matches today is also scheduled one week later, so
/// the calendar never runs dry before the next rebuild. Overlapping rules are
/// interleaved by time and never merged.
///
/// Returns an empty list when the schedule is disabled.
pub fn build(schedule: &SleepSchedule, now_utc: i64, zone_offset: i32) -> OrderedEventList<SleepEvent> {
    let mut events = OrderedEventList::with_capacity(4 * schedule.rules.len());
    if !schedule.enabled {
        return events;
    }

    let local_now = now_utc + zone_offset as i64;
    let midnight = midnight_of(local_now);
    let today = weekday_of(local_now);

    for rule in schedule.rules.iter().filter(|rule| rule.enabled) {
        for weekday in rule.weekdays() {
            schedule_day(&mut events, rule, midnight, today, weekday);
        }
    }
    events
}

fn schedule_day(
    events: &mut OrderedEventList<SleepEvent>,
    rule: &SleepRule,
    midnight: i64,
    today: Weekday,
    weekday: Weekday,
) {
    let day_offset = days_until(today, weekday);
    let day = midnight + day_offset * SECONDS_PER_DAY;
    let sleep = SleepEvent::sleep(day + rule.from_seconds_of_day as i64);
    let wake = SleepEvent::wake(sleep.at + rule.duration());

    debug!(
        "{:?}: display sleeps at {} and wakes at {} (local).",
        weekday, sleep.at, wake.at
    );
    events.insert_ordered_by(sleep, SleepEvent::by_time);
    events.insert_ordered_by(wake, SleepEvent::by_time);

    if day_offset == 0 {
        events.insert_ordered_by(SleepEvent::sleep(sleep.at + SECONDS_PER_WEEK), SleepEvent::by_time);
        events.insert_ordered_by(SleepEvent::wake(wake.at + SECONDS_PER_WEEK), SleepEvent::by_time);
    }
}
