//! Calendar arithmetic on raw second counts, and the host stand-in for the
//! RTC's 1 Hz square wave.
//!
//! The clock keeps UTC seconds and applies the zone offset itself, so all
//! calendar questions (midnight, weekday) are answered on the resulting
//! local second count with plain civil-calendar arithmetic.

use crate::bus::TickSender;
use crate::common::{MAX_TIMESTAMP, SECONDS_PER_DAY};
use chrono::{DateTime, NaiveDateTime, Weekday};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Returns true if `seconds` is a UTC time the clock can hold and display.
pub fn is_valid_timestamp(seconds: i64) -> bool {
    (0..=MAX_TIMESTAMP).contains(&seconds)
}

/// Start of the civil day containing `seconds`.
pub fn midnight_of(seconds: i64) -> i64 {
    seconds - seconds.rem_euclid(SECONDS_PER_DAY)
}

/// Weekday of the civil day containing `seconds`.
pub fn weekday_of(seconds: i64) -> Weekday {
    // 1970-01-01 was a Thursday.
    match (seconds.div_euclid(SECONDS_PER_DAY) + 3).rem_euclid(7) {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Days from `from` forward to the next `to`, 0 when they are the same day.
pub fn days_until(from: Weekday, to: Weekday) -> i64 {
    (to.num_days_from_sunday() as i64 - from.num_days_from_sunday() as i64).rem_euclid(7)
}

/// Broken-down form of a second count, for the RTC registers and the display.
pub fn to_datetime(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

/// Second count of a broken-down time.
pub fn from_datetime(datetime: NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp()
}

/// Emits one tick per period on the non-blocking tick path, like the RTC's
/// square-wave interrupt does on the device.
pub struct PulseGenerator {
    period: Duration,
    ticks: TickSender,
}

impl PulseGenerator {
    pub fn new(period: Duration, ticks: TickSender) -> Self {
        Self { period, ticks }
    }

    /// Runs until a shutdown signal is received.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Pulse generator running every {:?}.", self.period);
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    self.ticks.tick();
                }
            }
        }
        debug!(
            "Pulse generator stopped, {} ticks dropped.",
            self.ticks.dropped()
        );
    }
}
