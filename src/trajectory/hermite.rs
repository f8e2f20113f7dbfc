//! Cubic Hermite interpolation between trajectory samples.
//!
//! Evaluation packs the three position components into a `wide::f64x4`
//! so one Horner pass covers the whole vector.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use wide::f64x4;

use crate::types::{Sample, State};

/// A cubic Hermite polynomial over `[t0, t1]`, expressed in the
/// normalized variable `s = (t - t0) / (t1 - t0)`. Constructed from the
/// endpoint states; the derivative reproduces the endpoint velocities.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hermite3 {
    t0: f64,
    t1: f64,
    c0: DVec3,
    c1: DVec3,
    c2: DVec3,
    c3: DVec3,
}

impl Hermite3 {
    /// Requires `first.time < last.time`.
    pub fn new(first: Sample, last: Sample) -> Self {
        let h = last.time - first.time;
        debug_assert!(h > 0.0);
        let p0 = first.state.position;
        let p1 = last.state.position;
        // Endpoint tangents in the normalized variable.
        let m0 = first.state.velocity * h;
        let m1 = last.state.velocity * h;
        Self {
            t0: first.time,
            t1: last.time,
            c0: p0,
            c1: m0,
            c2: -3.0 * p0 + 3.0 * p1 - 2.0 * m0 - m1,
            c3: 2.0 * p0 - 2.0 * p1 + m0 + m1,
        }
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn t1(&self) -> f64 {
        self.t1
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.t0 && t <= self.t1
    }

    /// Interpolated state at `t`. `t` is clamped to `[t0, t1]`.
    pub fn evaluate(&self, t: f64) -> State {
        let h = self.t1 - self.t0;
        let s = ((t - self.t0) / h).clamp(0.0, 1.0);

        let c0 = pack(self.c0);
        let c1 = pack(self.c1);
        let c2 = pack(self.c2);
        let c3 = pack(self.c3);
        let sv = f64x4::splat(s);

        // Horner pass for the position and its s-derivative in parallel
        // lanes of one register each.
        let p = ((c3 * sv + c2) * sv + c1) * sv + c0;
        let dp = (f64x4::splat(3.0) * c3 * sv + f64x4::splat(2.0) * c2) * sv + c1;

        State {
            position: unpack(p),
            velocity: unpack(dp) / h,
        }
    }

    /// Maximum position deviation of this polynomial from the given
    /// samples.
    pub fn max_position_error(&self, samples: &[Sample]) -> f64 {
        samples
            .iter()
            .map(|s| (self.evaluate(s.time).position - s.state.position).length())
            .fold(0.0, f64::max)
    }
}

fn pack(v: DVec3) -> f64x4 {
    f64x4::new([v.x, v.y, v.z, 0.0])
}

fn unpack(v: f64x4) -> DVec3 {
    let a = v.to_array();
    DVec3::new(a[0], a[1], a[2])
}
