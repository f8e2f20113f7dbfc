//! Core physical types and constants.
//!
//! All quantities are SI: metres, seconds, metres per second. Times are
//! seconds since an arbitrary caller-chosen epoch (J2000 in the test
//! fixtures). `f64` vectors are used throughout for accuracy over
//! solar-system scales.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Gravitational constant (m³·kg⁻¹·s⁻²)
pub const G: f64 = 6.67430e-11;

/// Astronomical unit in meters
pub const AU_TO_METERS: f64 = 1.495978707e11;

/// Seconds per day
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Standard gravitational parameter of the Sun (m³/s²)
pub const GM_SUN: f64 = 1.32712440018e20;

/// Position and velocity of a point mass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Position in meters from the system origin.
    pub position: DVec3,
    /// Velocity in meters per second.
    pub velocity: DVec3,
}

impl State {
    pub fn new(position: DVec3, velocity: DVec3) -> Self {
        Self { position, velocity }
    }

    /// Whether every component is finite. Non-finite states mark a
    /// diverged integration.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

/// A timestamped state sample on a trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub state: State,
}

impl Sample {
    pub fn new(time: f64, state: State) -> Self {
        Self { time, state }
    }
}
