//! Error types used across modules.
//!
//! Only [`BootError`] is ever fatal. Every other error is logged by whoever
//! meets it and the engine loop carries on with its in-memory state.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// A failure talking to the real-time-clock chip.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The chip did not answer on the register bus.
    #[error("rtc unreachable: {0}")]
    Unreachable(String),
    /// The chip answered with register values that are not a valid date.
    #[error("rtc returned an invalid date: {0}")]
    InvalidTime(String),
}

/// A failure of the persistent key/value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists under this key.
    #[error("no record stored under `{0}`")]
    NotFound(String),
    /// The record exists but could not be decoded.
    #[error("record `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// A failure to save the configuration. The in-memory copy stays current.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Another task held the store lock for longer than the allowed wait.
    #[error("config store busy for more than {0:?}")]
    LockTimeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The blocking write task panicked or was cancelled.
    #[error("store write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A failed time service request. The next sync retries it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,
    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A failure that stops the clock from starting.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("rtc failure during boot: {0}")]
    Hardware(#[from] HardwareError),
    #[error("config store failure during boot: {0}")]
    Store(#[from] StoreError),
}
