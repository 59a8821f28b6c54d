//! Defines the messages the engine consumes and the events it publishes.
//!
//! Every payload is an owned value moved through the bus, so the engine is
//! the only party holding it once it has been sent.

use crate::config::{ClockConfig, SleepSchedule, Timezone};
use crate::error::ServiceError;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// A message delivered to the `ClockEngine` through the `MessageBus`.
#[derive(Debug)]
pub enum Message {
    /// One pulse of the RTC square wave. Sent from the interrupt path only.
    Tick,
    /// The station got an IP address.
    NetworkConnected,
    NetworkDisconnected,
    /// Outcome of a `TimeService::request_time` call.
    TimeApiResponse(Result<Value, ServiceError>),
    /// Outcome of a `TimeService::request_transitions` call.
    TransitionsApiResponse(Result<Value, ServiceError>),
    /// Ask the time service for the zone's upcoming transitions.
    RequestTransitions,
    /// New quiet-hours rules from the web UI.
    SleepScheduleUpdate(Box<SleepSchedule>),
    /// The user picked another zone. The config changes only once the time
    /// service confirms it.
    TimezoneOverride(String),
    /// A message tag this firmware does not know, forwarded as-is by a
    /// collaborator speaking a newer protocol.
    Unknown { tag: u32 },
}

impl Message {
    /// A short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Tick => "tick",
            Message::NetworkConnected => "network-connected",
            Message::NetworkDisconnected => "network-disconnected",
            Message::TimeApiResponse(_) => "time-api-response",
            Message::TransitionsApiResponse(_) => "transitions-api-response",
            Message::RequestTransitions => "request-transitions",
            Message::SleepScheduleUpdate(_) => "sleep-schedule-update",
            Message::TimezoneOverride(_) => "timezone-override",
            Message::Unknown { .. } => "unknown",
        }
    }
}

/// What the display should do when a sleep event falls due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SleepAction {
    Sleep,
    Wake,
}

/// One scheduled display transition.
///
/// `at` is on the local timeline (UTC seconds plus the zone offset), the
/// same timeline the engine compares it against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepEvent {
    pub at: i64,
    pub action: SleepAction,
}

impl SleepEvent {
    pub fn sleep(at: i64) -> Self {
        Self {
            at,
            action: SleepAction::Sleep,
        }
    }

    pub fn wake(at: i64) -> Self {
        Self {
            at,
            action: SleepAction::Wake,
        }
    }

    /// Orders events by time only; the action never breaks ties.
    pub fn by_time(a: &Self, b: &Self) -> Ordering {
        a.at.cmp(&b.at)
    }
}

/// Notable state changes, broadcast to any interested task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockEvent {
    /// A network correction moved the clock.
    Realigned { from: i64, to: i64 },
    /// A scheduled transition changed the UTC offset.
    OffsetChanged { from: i32, to: i32 },
    /// The time service reported another zone name or offset.
    TimezoneChanged(Timezone),
    /// A transitions response was loaded into the table.
    TransitionsLoaded { count: usize },
    /// A due sleep event was forwarded to the display.
    SleepActionApplied(SleepAction),
    /// The sleep calendar was regenerated.
    ScheduleRebuilt { events: usize },
}

/// A consistent copy of the engine's state, published after every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockStatus {
    pub utc_seconds: i64,
    pub local_seconds: i64,
    pub time_set: bool,
    pub awake: bool,
    pub config: Arc<ClockConfig>,
}

impl Default for ClockStatus {
    fn default() -> Self {
        Self {
            utc_seconds: 1,
            local_seconds: 1,
            time_set: false,
            awake: true,
            config: Arc::new(ClockConfig::default()),
        }
    }
}
