//! Simulation clock.
//!
//! The clock is the only thing that advances simulated time. Each tick
//! carries the wall-clock time that actually elapsed, which is scaled by
//! the configured time-scale factor. A late tick simply reports a larger
//! elapsed value; nothing downstream samples the wall clock itself.
//!
//! The clock is inert until activated: while no observer is ready, ticks
//! do not advance time and no decision budget is spent.

use std::time::Duration;

use primeval_types::SimTime;
use serde::Serialize;

/// Simulated minutes per simulated day.
const MINUTES_PER_DAY: u64 = 1440;

/// Simulated clock reading at world creation (08:00 on day 1).
const START_MINUTE_OF_DAY: u64 = 8 * 60;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter or simulated time would overflow.
    #[error("clock overflow: cannot advance beyond u64::MAX")]
    Overflow,

    /// Time scale is zero, negative or not finite.
    #[error("invalid time scale {scale}")]
    InvalidScale {
        /// The rejected value.
        scale: f64,
    },
}

/// The result of one clock advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    /// Tick number just entered.
    pub tick: u64,
    /// Simulated time after the advance.
    pub sim_time: SimTime,
    /// Simulated milliseconds added by this tick.
    pub sim_elapsed_ms: u64,
}

/// Day and time of day derived from simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarTime {
    /// Day number, starting at 1.
    pub day: u64,
    /// Hour of day, 0 to 23.
    pub hour: u64,
    /// Minute of hour, 0 to 59.
    pub minute: u64,
}

impl core::fmt::Display for CalendarTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "day {} {:02}:{:02}", self.day, self.hour, self.minute)
    }
}

/// Fixed-rate tick source with an activation gate.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClock {
    tick: u64,
    sim_time: SimTime,
    time_scale: f64,
    active: bool,
    started: bool,
}

impl SimClock {
    /// Create an inactive clock at tick 0.
    pub fn new(time_scale: f64) -> Result<Self, ClockError> {
        if !(time_scale.is_finite() && time_scale > 0.0) {
            return Err(ClockError::InvalidScale { scale: time_scale });
        }
        Ok(Self {
            tick: 0,
            sim_time: SimTime::ZERO,
            time_scale,
            active: false,
            started: false,
        })
    }

    /// Open the activation gate. Returns `true` the very first time the
    /// clock is ever activated.
    pub const fn activate(&mut self) -> bool {
        self.active = true;
        let first = !self.started;
        self.started = true;
        first
    }

    /// Close the activation gate. Time stops advancing until reactivated.
    pub const fn deactivate(&mut self) {
        self.active = false;
    }

    /// Whether ticks currently advance time.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Advance by the reported wall-clock `elapsed`.
    ///
    /// Returns `Ok(None)` without changing anything while inactive.
    pub fn advance(&mut self, elapsed: Duration) -> Result<Option<ClockTick>, ClockError> {
        if !self.active {
            return Ok(None);
        }
        let sim_elapsed_ms = f64_to_millis(elapsed.as_secs_f64() * 1000.0 * self.time_scale);
        let tick = self.tick.checked_add(1).ok_or(ClockError::Overflow)?;
        let sim_time = self
            .sim_time
            .as_millis()
            .checked_add(sim_elapsed_ms)
            .map(SimTime::from_millis)
            .ok_or(ClockError::Overflow)?;
        self.tick = tick;
        self.sim_time = sim_time;
        Ok(Some(ClockTick {
            tick,
            sim_time,
            sim_elapsed_ms,
        }))
    }

    /// Current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Current simulated time.
    pub const fn sim_time(&self) -> SimTime {
        self.sim_time
    }

    /// Configured time scale.
    pub const fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Day and time of day.
    pub const fn calendar(&self) -> CalendarTime {
        let total_minutes = (self.sim_time.as_millis() / primeval_types::MILLIS_PER_MINUTE)
            .saturating_add(START_MINUTE_OF_DAY);
        CalendarTime {
            day: (total_minutes / MINUTES_PER_DAY).saturating_add(1),
            hour: (total_minutes % MINUTES_PER_DAY) / 60,
            minute: total_minutes % 60,
        }
    }
}

/// Round a non-negative float count of milliseconds to `u64`, saturating.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn f64_to_millis(value: f64) -> u64 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= u64::MAX as f64 {
        u64::MAX
    } else {
        value.round() as u64
    }
}
