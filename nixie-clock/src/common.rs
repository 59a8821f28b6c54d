//! Contains common constants and primitive types shared across the clock.
//!
//! The numeric limits here are part of the persisted record layout and of the
//! contract with the web UI, so changing any of them changes the blob format.

use slotmap::new_key_type;

/// Seconds in a civil day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Seconds in a week.
pub const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;

/// Number of upcoming timezone transitions kept in advance.
///
/// Most zones have zero or two (summer time) per year, so three is plenty.
pub const MAX_TRANSITIONS: usize = 3;

/// Maximum number of sleep rules a user can configure.
pub const MAX_SLEEP_RULES: usize = 4;

/// Size of the fixed timezone name buffer, terminator included.
///
/// The longest IANA names ("America/Argentina/Buenos_Aires") are 30 bytes.
pub const TZ_NAME_CAPACITY: usize = 40;

/// Minimum discrepancy, in seconds, before a network time correction is applied.
pub const DEFAULT_DRIFT_THRESHOLD_SECS: i64 = 60;

/// Delay between two transitions refresh checks (15 days).
pub const DEFAULT_TRANSITIONS_RECHECK_SECS: i64 = 15 * SECONDS_PER_DAY;

/// Capacity of the engine's message bus.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Liveness timeout of the engine's receive call, in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 11_001;

/// Bounded wait for the config store lock, in milliseconds.
pub const DEFAULT_STORE_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Latest timestamp the clock accepts from the network (9999-12-31 23:59:59 UTC).
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Largest UTC offset accepted from the network, either way.
pub const MAX_UTC_OFFSET_SECS: i32 = 24 * 3600;

/// Any RTC reading before this year means the clock was never set.
pub const FIRST_VALID_YEAR: i32 = 1971;

new_key_type! {
    /// Identifies a node in the arena backing an `OrderedEventList`.
    pub struct NodeKey;
}
