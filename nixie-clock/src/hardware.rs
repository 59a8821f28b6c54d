//! Interfaces to the clock's peripherals, and host-side stand-ins for them.
//!
//! The engine talks to the RTC chip and the tubes only through these traits.
//! Register-level protocols (I2C, SPI framing, LED pulse encoding) live
//! behind the implementations.

use crate::error::HardwareError;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use colored::Colorize;
use std::time::Instant;
use tracing::{debug, info};

/// The battery-backed real-time-clock chip.
pub trait HardwareClock: Send {
    /// Reads the current UTC time from the chip's registers.
    fn get_time(&mut self) -> Result<NaiveDateTime, HardwareError>;
    /// Writes a UTC time to the chip's registers.
    fn set_time(&mut self, time: NaiveDateTime) -> Result<(), HardwareError>;
    /// Starts the 1 Hz square wave that drives the tick interrupt.
    fn enable_periodic_signal(&mut self) -> Result<(), HardwareError>;
}

/// The tubes (and their backlight).
pub trait DisplayDriver: Send {
    /// Shows a local time.
    fn write_time(&mut self, local: NaiveDateTime);
    fn turn_on(&mut self);
    fn turn_off(&mut self);
}

/// An RTC kept in memory and advanced by the host's monotonic clock.
#[derive(Debug)]
pub struct SimulatedRtc {
    set_at: Option<(NaiveDateTime, Instant)>,
    square_wave: bool,
}

impl SimulatedRtc {
    /// An RTC holding the host's current UTC time.
    pub fn from_system_clock() -> Self {
        Self {
            set_at: Some((Utc::now().naive_utc(), Instant::now())),
            square_wave: false,
        }
    }

    /// An RTC whose backup battery died: it reads back the epoch.
    pub fn unset() -> Self {
        Self {
            set_at: None,
            square_wave: false,
        }
    }

    pub fn square_wave_enabled(&self) -> bool {
        self.square_wave
    }
}

impl HardwareClock for SimulatedRtc {
    fn get_time(&mut self) -> Result<NaiveDateTime, HardwareError> {
        match self.set_at {
            Some((time, at)) => {
                let elapsed = chrono::Duration::from_std(at.elapsed())
                    .map_err(|e| HardwareError::InvalidTime(e.to_string()))?;
                Ok(time + elapsed)
            }
            None => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .ok_or_else(|| HardwareError::InvalidTime("epoch".to_owned())),
        }
    }

    fn set_time(&mut self, time: NaiveDateTime) -> Result<(), HardwareError> {
        debug!("RTC set to {}.", time);
        self.set_at = Some((time, Instant::now()));
        Ok(())
    }

    fn enable_periodic_signal(&mut self) -> Result<(), HardwareError> {
        self.square_wave = true;
        Ok(())
    }
}

/// Renders the tubes as a log line.
#[derive(Debug)]
pub struct ConsoleDisplay {
    lit: bool,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self { lit: true }
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayDriver for ConsoleDisplay {
    fn write_time(&mut self, local: NaiveDateTime) {
        let digits = local.format("%H:%M:%S").to_string();
        if self.lit {
            info!("[TUBES] {}", digits.cyan().bold());
        } else {
            debug!("[TUBES] {}", digits.dimmed());
        }
    }

    fn turn_on(&mut self) {
        self.lit = true;
        info!("[TUBES] {}", "display on".green());
    }

    fn turn_off(&mut self) {
        self.lit = false;
        info!("[TUBES] {}", "display off (quiet hours)".dimmed());
    }
}
