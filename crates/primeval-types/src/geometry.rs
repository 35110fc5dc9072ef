//! Continuous 2D geometry and simulated time.
//!
//! Positions are `f64` world units. Simulated time is an integer count of
//! simulated milliseconds so that cooldown comparisons are exact.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Milliseconds in one simulated minute.
pub const MILLIS_PER_MINUTE: u64 = 60_000;

/// A point or vector in world units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Vec2 {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Vec2 {
    /// The origin.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a vector from its components.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean length.
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        (other - self).length()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len.is_finite() && len > f64::EPSILON {
            Some(Self::new(self.x / len, self.y / len))
        } else {
            None
        }
    }

    /// Scale both components by `factor`.
    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Linear interpolation from `self` toward `other` by `t` in `[0, 1]`.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        self + (other - self).scale(t)
    }

    /// Whether both components are finite.
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Clamp into the rectangle `[0, width] x [0, height]`.
    pub const fn clamp_to(self, width: f64, height: f64) -> Self {
        Self::new(self.x.clamp(0.0, width), self.y.clamp(0.0, height))
    }

    /// Round both components to the given step (used for delta quantization).
    pub fn quantize(self, step: f64) -> Self {
        Self::new((self.x / step).round() * step, (self.y / step).round() * step)
    }
}

impl core::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl core::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl core::fmt::Display for Vec2 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Axis-aligned extent of a static obstacle, centred on its position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Footprint {
    /// Half of the horizontal extent.
    pub half_width: f64,
    /// Half of the vertical extent.
    pub half_height: f64,
}

impl Footprint {
    /// A square footprint of the given side length.
    pub const fn square(side: f64) -> Self {
        Self {
            half_width: side / 2.0,
            half_height: side / 2.0,
        }
    }

    /// Radius used for circle-vs-obstacle separation.
    pub const fn collision_radius(self) -> f64 {
        self.half_width.max(self.half_height)
    }
}

/// Simulated time in milliseconds since world creation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/", type = "number")]
pub struct SimTime(pub u64);

impl SimTime {
    /// World creation.
    pub const ZERO: Self = Self(0);

    /// Construct from simulated milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Construct from whole simulated minutes.
    pub const fn from_minutes(minutes: u64) -> Self {
        Self(minutes.saturating_mul(MILLIS_PER_MINUTE))
    }

    /// Simulated milliseconds.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Simulated minutes as a float (for rate computations).
    pub fn as_minutes_f64(self) -> f64 {
        self.0 as f64 / MILLIS_PER_MINUTE as f64
    }

    /// Add a span of simulated milliseconds, saturating at `u64::MAX`.
    pub const fn plus_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Milliseconds elapsed since `earlier` (zero if `earlier` is later).
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl core::fmt::Display for SimTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
