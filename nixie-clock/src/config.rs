//! Defines the persisted device configuration: timezone and sleep schedule.
//!
//! These structs are stored in the `ConfigStore` as fixed-size binary records
//! and arrive from the web UI as JSON. The binary layout zero-fills every
//! padding byte and the unused tail of the name buffer, so two records
//! describing the same configuration are byte-for-byte identical and change
//! detection can compare encoded records directly.

use crate::common::{MAX_SLEEP_RULES, SECONDS_PER_DAY, TZ_NAME_CAPACITY};
use crate::error::StoreError;
use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Store key of the consolidated configuration record.
pub const CONF_KEY: &str = "conf";
/// Store key of the legacy timezone-only record.
pub const TZ_KEY: &str = "tz";
/// Store key of the legacy sleep-schedule-only record.
pub const SLEEPMODES_KEY: &str = "sleepmodes";

const TIMEZONE_RECORD_LEN: usize = 4 + TZ_NAME_CAPACITY;
const RULE_RECORD_LEN: usize = 12;
const SCHEDULE_RECORD_LEN: usize = 4 + MAX_SLEEP_RULES * RULE_RECORD_LEN;
const CONFIG_RECORD_LEN: usize = TIMEZONE_RECORD_LEN + SCHEDULE_RECORD_LEN;

/// The zone the clock displays, as a readable IANA name and its current UTC offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timezone {
    pub offset_seconds: i32,
    name: String,
}

impl Timezone {
    /// Creates a timezone, truncating `name` so it fits the fixed record buffer.
    pub fn new(name: &str, offset_seconds: i32) -> Self {
        Self {
            offset_seconds,
            name: bounded_name(name).to_owned(),
        }
    }

    pub fn utc() -> Self {
        Self::new("UTC", 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = bounded_name(name).to_owned();
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TIMEZONE_RECORD_LEN);
        self.encode(&mut buf);
        buf
    }

    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        expect_len(key, bytes, TIMEZONE_RECORD_LEN)?;
        Self::decode(key, bytes)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.offset_seconds.to_le_bytes());
        let mut name = [0u8; TZ_NAME_CAPACITY];
        name[..self.name.len()].copy_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&name);
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        let offset_seconds = read_i32(bytes, 0);
        let raw = &bytes[4..TIMEZONE_RECORD_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = std::str::from_utf8(&raw[..end]).map_err(|e| StoreError::Corrupt {
            key: key.to_owned(),
            reason: format!("timezone name is not utf-8: {e}"),
        })?;
        Ok(Self::new(name, offset_seconds))
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self::utc()
    }
}

/// Truncates to at most `TZ_NAME_CAPACITY - 1` bytes on a char boundary.
fn bounded_name(name: &str) -> &str {
    let name = name.split('\0').next().unwrap_or_default();
    if name.len() < TZ_NAME_CAPACITY {
        return name;
    }
    let mut end = TZ_NAME_CAPACITY - 1;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// One weekly quiet-hours window.
///
/// `days` is a 7-bit mask starting on Monday: bit 0 is Monday, bit 5 is
/// Saturday and bit 6 wraps around to Sunday. This mapping is shared with
/// the web UI and must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepRule {
    pub enabled: bool,
    pub days: u8,
    #[serde(rename = "from")]
    pub from_seconds_of_day: i32,
    #[serde(rename = "to")]
    pub to_seconds_of_day: i32,
}

impl SleepRule {
    /// The mask bit selecting `weekday`.
    pub fn day_bit(weekday: Weekday) -> u8 {
        1 << weekday.num_days_from_monday()
    }

    /// Builds an enabled rule covering `weekdays`.
    pub fn on(weekdays: &[Weekday], from_seconds_of_day: i32, to_seconds_of_day: i32) -> Self {
        Self {
            enabled: true,
            days: weekdays.iter().fold(0, |mask, day| mask | Self::day_bit(*day)),
            from_seconds_of_day,
            to_seconds_of_day,
        }
    }

    /// Iterates over the weekdays selected by the mask, in mask order.
    pub fn weekdays(&self) -> impl Iterator<Item = Weekday> + '_ {
        let mut weekday = Weekday::Mon;
        (0..7).filter_map(move |bit| {
            let day = weekday;
            weekday = weekday.succ();
            (self.days & (1 << bit) != 0).then_some(day)
        })
    }

    /// Returns true if the window ends on the day after it starts.
    pub fn crosses_midnight(&self) -> bool {
        self.to_seconds_of_day < self.from_seconds_of_day
    }

    /// Length of the quiet window in seconds.
    pub fn duration(&self) -> i64 {
        let to = self.to_seconds_of_day as i64
            + if self.crosses_midnight() { SECONDS_PER_DAY } else { 0 };
        to - self.from_seconds_of_day as i64
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.enabled as u8);
        buf.push(self.days);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.from_seconds_of_day.to_le_bytes());
        buf.extend_from_slice(&self.to_seconds_of_day.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            enabled: bytes[0] != 0,
            days: bytes[1] & 0x7f,
            from_seconds_of_day: read_i32(bytes, 4),
            to_seconds_of_day: read_i32(bytes, 8),
        }
    }
}

/// The full set of quiet-hours rules and the master switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SleepSchedule {
    pub enabled: bool,
    pub rules: [SleepRule; MAX_SLEEP_RULES],
}

impl SleepSchedule {
    /// A disabled schedule with no rules.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Builds an enabled schedule, keeping at most `MAX_SLEEP_RULES` rules.
    pub fn with_rules(rules: &[SleepRule]) -> Self {
        let mut schedule = Self {
            enabled: true,
            ..Self::default()
        };
        for (slot, rule) in schedule.rules.iter_mut().zip(rules) {
            *slot = *rule;
        }
        schedule
    }

    /// Parses the web UI payload `{"enabled": bool, "data": [rule, ...]}`.
    ///
    /// Rules beyond the fourth are ignored.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SCHEDULE_RECORD_LEN);
        self.encode(&mut buf);
        buf
    }

    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        expect_len(key, bytes, SCHEDULE_RECORD_LEN)?;
        Ok(Self::decode(bytes))
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.enabled as u8);
        buf.extend_from_slice(&[0, 0, 0]);
        for rule in &self.rules {
            rule.encode(buf);
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut schedule = Self {
            enabled: bytes[0] != 0,
            ..Self::default()
        };
        for (i, rule) in schedule.rules.iter_mut().enumerate() {
            let start = 4 + i * RULE_RECORD_LEN;
            *rule = SleepRule::decode(&bytes[start..start + RULE_RECORD_LEN]);
        }
        schedule
    }
}

impl<'de> Deserialize<'de> for SleepSchedule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            enabled: bool,
            #[serde(default)]
            data: Vec<SleepRule>,
        }

        let document = Document::deserialize(deserializer)?;
        let mut schedule = Self::with_rules(&document.data);
        schedule.enabled = document.enabled;
        for rule in schedule.rules.iter_mut() {
            rule.days &= 0x7f;
        }
        Ok(schedule)
    }
}

/// The device configuration owned by the engine and mirrored in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClockConfig {
    pub timezone: Timezone,
    pub sleep_schedule: SleepSchedule,
}

impl ClockConfig {
    /// Encodes the `conf` record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CONFIG_RECORD_LEN);
        self.timezone.encode(&mut buf);
        self.sleep_schedule.encode(&mut buf);
        buf
    }

    /// Decodes a `conf` record.
    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        expect_len(key, bytes, CONFIG_RECORD_LEN)?;
        Ok(Self {
            timezone: Timezone::decode(key, &bytes[..TIMEZONE_RECORD_LEN])?,
            sleep_schedule: SleepSchedule::decode(&bytes[TIMEZONE_RECORD_LEN..]),
        })
    }
}

fn expect_len(key: &str, bytes: &[u8], expected: usize) -> Result<(), StoreError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(StoreError::Corrupt {
            key: key.to_owned(),
            reason: format!("expected {expected} bytes, found {}", bytes.len()),
        })
    }
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    i32::from_le_bytes(raw)
}
