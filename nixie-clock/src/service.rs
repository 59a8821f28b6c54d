//! The network time service: requests going out, and parsing of the JSON
//! responses coming back on the bus.
//!
//! Requests never block the engine. An implementation starts the exchange
//! and later delivers the outcome as a `TimeApiResponse` or
//! `TransitionsApiResponse` message.

use crate::bus::BusSender;
use crate::common::{MAX_TRANSITIONS, MAX_UTC_OFFSET_SECS};
use crate::components::transitions::TransitionEntry;
use crate::config::Timezone;
use crate::error::ServiceError;
use crate::events::Message;
use crate::time::is_valid_timestamp;
use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// The asynchronous collaborator answering time and transitions queries.
pub trait TimeService: Send {
    /// Asks for the current time in the zone called `tz_name`.
    fn request_time(&mut self, tz_name: &str);
    /// Asks for the offset transitions of `tz` between `from` and `to`.
    fn request_transitions(&mut self, tz: &Timezone, from: i64, to: i64);
}

/// The fields of a time response, each one optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeUpdate {
    pub timestamp: Option<i64>,
    pub zone_name: Option<String>,
    pub zone_offset: Option<i32>,
}

/// Reads `{"timestamp": n, "timezone": {"name": s, "offset": n}}`.
///
/// Absent, mistyped or out-of-range fields come back as `None`, the others
/// are kept.
pub fn parse_time_response(payload: &Value) -> TimeUpdate {
    let zone = payload.get("timezone");
    TimeUpdate {
        timestamp: payload.get("timestamp").and_then(as_timestamp),
        zone_name: zone
            .and_then(|zone| zone.get("name"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        zone_offset: zone.and_then(|zone| zone.get("offset")).and_then(as_offset),
    }
}

/// Reads `{"transitions": [{"transitionTimestamp": n, "toOffset": n}, ...]}`.
///
/// Malformed or out-of-range entries are skipped. At most [`MAX_TRANSITIONS`] entries are
/// returned, in the order the server sent them.
pub fn parse_transitions_response(payload: &Value) -> Vec<TransitionEntry> {
    let Some(items) = payload.get("transitions").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let at_utc = item.get("transitionTimestamp").and_then(as_timestamp)?;
            let offset = item.get("toOffset").and_then(as_offset)?;
            Some(TransitionEntry::new(offset, at_utc))
        })
        .take(MAX_TRANSITIONS)
        .collect()
}

fn as_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
}

fn as_timestamp(value: &Value) -> Option<i64> {
    as_seconds(value).filter(|seconds| is_valid_timestamp(*seconds))
}

fn as_offset(value: &Value) -> Option<i32> {
    as_seconds(value)
        .and_then(|offset| i32::try_from(offset).ok())
        .filter(|offset| offset.abs() <= MAX_UTC_OFFSET_SECS)
}

/// Answers from the host clock and the IANA zone database.
///
/// Each request is served by a spawned task which sleeps for `latency`
/// before posting the response, so it must be used inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct TzTimeService {
    bus: BusSender,
    latency: Duration,
}

impl TzTimeService {
    pub fn new(bus: BusSender, latency: Duration) -> Self {
        Self { bus, latency }
    }
}

impl TimeService for TzTimeService {
    fn request_time(&mut self, tz_name: &str) {
        let bus = self.bus.clone();
        let latency = self.latency;
        let tz_name = tz_name.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let payload = time_payload(&tz_name, Utc::now().timestamp());
            if !bus.send(Message::TimeApiResponse(Ok(payload))).await {
                debug!("Engine gone, time response discarded.");
            }
        });
    }

    fn request_transitions(&mut self, tz: &Timezone, from: i64, to: i64) {
        let bus = self.bus.clone();
        let latency = self.latency;
        let tz_name = tz.name().to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let response = transitions_payload(&tz_name, from, to);
            if let Err(e) = &response {
                warn!("Transitions lookup failed: {}", e);
            }
            if !bus.send(Message::TransitionsApiResponse(response)).await {
                debug!("Engine gone, transitions response discarded.");
            }
        });
    }
}

/// The time response for `tz_name` at `now`. An unknown zone yields a
/// timestamp-only answer.
pub fn time_payload(tz_name: &str, now: i64) -> Value {
    match tz_name.parse::<Tz>() {
        Ok(tz) => json!({
            "timestamp": now,
            "timezone": { "name": tz_name, "offset": offset_at(tz, now) },
        }),
        Err(_) => {
            warn!("Unknown timezone {:?}, answering with the time only.", tz_name);
            json!({ "timestamp": now })
        }
    }
}

/// The transitions response for `tz_name` over `[from, to]`.
pub fn transitions_payload(tz_name: &str, from: i64, to: i64) -> Result<Value, ServiceError> {
    let tz = tz_name
        .parse::<Tz>()
        .map_err(|_| ServiceError::UnknownTimezone(tz_name.to_owned()))?;
    let transitions: Vec<Value> = transitions_between(tz, from, to)
        .into_iter()
        .map(|entry| {
            json!({
                "transitionTimestamp": entry.at_utc,
                "toOffset": entry.offset_seconds,
            })
        })
        .collect();
    Ok(json!({ "transitions": transitions }))
}

/// The UTC offset of `tz` at `at`, in seconds.
pub fn offset_at(tz: Tz, at: i64) -> i32 {
    match DateTime::from_timestamp(at, 0) {
        Some(utc) => tz.offset_from_utc_datetime(&utc.naive_utc()).fix().local_minus_utc(),
        None => 0,
    }
}

/// Every offset change of `tz` in `(from, to]`, ascending.
///
/// Zones change offset at most a few times a year and never twice within a
/// day, so the range is scanned a day at a time and each change located to
/// the second by bisection.
pub fn transitions_between(tz: Tz, from: i64, to: i64) -> Vec<TransitionEntry> {
    const STEP: i64 = 86_400;

    let mut found = Vec::new();
    let mut prev_at = from;
    let mut prev_offset = offset_at(tz, from);
    while prev_at < to {
        let at = (prev_at + STEP).min(to);
        let offset = offset_at(tz, at);
        if offset != prev_offset {
            // First second in (prev_at, at] showing the new offset.
            let (mut lo, mut hi) = (prev_at, at);
            while hi - lo > 1 {
                let mid = lo + (hi - lo) / 2;
                if offset_at(tz, mid) == prev_offset {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            found.push(TransitionEntry::new(offset, hi));
            prev_offset = offset;
        }
        prev_at = at;
    }
    found
}
