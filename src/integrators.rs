//! Numerical integrators for orbital mechanics.
//!
//! Two families are provided behind explicit method tables:
//! - Fixed-step symplectic partitioned Runge-Kutta methods, used for the
//!   massive bodies where long-term energy behaviour matters more than
//!   local error.
//! - An embedded explicit Runge-Kutta method with step-size control,
//!   used for massless bodies where the caller specifies position and
//!   speed tolerances instead of a step.
//!
//! Methods are plain `'static` coefficient tables so callers can refer
//! to them by name in serialized parameters.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;
use tracing::trace;

use crate::error::Error;
use crate::types::State;

// =============================================================================
// Fixed-step symplectic methods
// =============================================================================

/// A symplectic partitioned Runge-Kutta method for second-order ODEs
/// q̈ = f(q, t), applied with a fixed step.
///
/// Each stage kicks the velocities with weight `b[i]` and then drifts
/// the positions with weight `a[i]`. Methods with `b[0] == 0` skip the
/// first force evaluation (first-same-as-last in reverse).
#[derive(Clone, Copy, Debug)]
pub struct SymplecticRungeKutta {
    pub name: &'static str,
    pub order: u8,
    a: &'static [f64],
    b: &'static [f64],
}

/// Drift-kick leapfrog, order 2. Cheap and robust; one force
/// evaluation per step.
pub const LEAPFROG: SymplecticRungeKutta = SymplecticRungeKutta {
    name: "LEAPFROG",
    order: 2,
    a: &[0.5, 0.5],
    b: &[0.0, 1.0],
};

/// McLachlan-Atela optimal 4th order method, 4 force evaluations per
/// step. The default for planetary ephemerides.
pub const MCLACHLAN_ATELA_1992_ORDER_4: SymplecticRungeKutta = SymplecticRungeKutta {
    name: "MCLACHLAN_ATELA_1992_ORDER_4",
    order: 4,
    a: &[
        0.5153528374311229364,
        -0.085782019412973646,
        0.4415830236164665242,
        0.1288461583653841854,
    ],
    b: &[
        0.1344961992774310892,
        -0.2248198030794208058,
        0.7563200005156682911,
        0.3340036032863214255,
    ],
};

/// Looks up a fixed-step method by its serialized name.
pub fn symplectic_method_by_name(name: &str) -> Option<&'static SymplecticRungeKutta> {
    match name {
        "LEAPFROG" => Some(&LEAPFROG),
        "MCLACHLAN_ATELA_1992_ORDER_4" => Some(&MCLACHLAN_ATELA_1992_ORDER_4),
        _ => None,
    }
}

impl SymplecticRungeKutta {
    /// Advances all bodies by one step of size `h`, in place.
    ///
    /// `accelerations` is caller-owned scratch, overwritten by each
    /// force evaluation. The callback receives the stage time and the
    /// stage positions and must fill `accelerations` for every body.
    /// Returns the time at the end of the step.
    pub fn step<F>(
        &self,
        t: f64,
        h: f64,
        positions: &mut [DVec3],
        velocities: &mut [DVec3],
        accelerations: &mut [DVec3],
        mut acceleration: F,
    ) -> Result<f64, Error>
    where
        F: FnMut(f64, &[DVec3], &mut [DVec3]) -> Result<(), Error>,
    {
        debug_assert_eq!(positions.len(), velocities.len());
        debug_assert_eq!(positions.len(), accelerations.len());

        let mut c = 0.0;
        for (&a_i, &b_i) in self.a.iter().zip(self.b) {
            if b_i != 0.0 {
                acceleration(t + c * h, positions, accelerations)?;
                for (v, &acc) in velocities.iter_mut().zip(accelerations.iter()) {
                    *v += b_i * h * acc;
                }
            }
            for (q, &v) in positions.iter_mut().zip(velocities.iter()) {
                *q += a_i * h * v;
            }
            c += a_i;
        }

        let t_next = t + h;
        if positions.iter().any(|q| !q.is_finite())
            || velocities.iter().any(|v| !v.is_finite())
        {
            return Err(Error::IntegratorDivergence { time: t_next });
        }
        Ok(t_next)
    }
}

// =============================================================================
// Adaptive embedded methods
// =============================================================================

/// Step-size control for an embedded method.
///
/// The step is accepted when the embedded error estimate is below both
/// tolerances; the next step is scaled by `safety_factor` times the
/// optimal ratio raised to 1/(lower order + 1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdaptiveStepParameters {
    /// First attempted step, seconds. Also the upper bound on growth
    /// is relative to the current step, not to this.
    pub first_step: f64,
    /// In (0, 1); 0.9 is customary.
    pub safety_factor: f64,
    /// Hard cap on accepted steps per flow.
    pub max_steps: u64,
    /// Per-step position error bound, meters.
    pub length_tolerance: f64,
    /// Per-step velocity error bound, m/s.
    pub speed_tolerance: f64,
}

impl AdaptiveStepParameters {
    pub fn new(
        first_step: f64,
        length_tolerance: f64,
        speed_tolerance: f64,
    ) -> Self {
        Self {
            first_step,
            safety_factor: 0.9,
            max_steps: u64::MAX,
            length_tolerance,
            speed_tolerance,
        }
    }
}

/// An embedded explicit Runge-Kutta pair for first-order ODEs over
/// (position, velocity), with local error estimation.
#[derive(Clone, Copy, Debug)]
pub struct EmbeddedExplicitRungeKutta {
    pub name: &'static str,
    pub higher_order: u8,
    pub lower_order: u8,
    c: &'static [f64],
    a: &'static [&'static [f64]],
    b_high: &'static [f64],
    b_low: &'static [f64],
}

/// The Dormand-Prince 5(4) pair, 7 stages, first-same-as-last.
pub const DORMAND_PRINCE_1980_RK_547: EmbeddedExplicitRungeKutta =
    EmbeddedExplicitRungeKutta {
        name: "DORMAND_PRINCE_1980_RK_547",
        higher_order: 5,
        lower_order: 4,
        c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
        a: &[
            &[1.0 / 5.0],
            &[3.0 / 40.0, 9.0 / 40.0],
            &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
            &[
                19372.0 / 6561.0,
                -25360.0 / 2187.0,
                64448.0 / 6561.0,
                -212.0 / 729.0,
            ],
            &[
                9017.0 / 3168.0,
                -355.0 / 33.0,
                46732.0 / 5247.0,
                49.0 / 176.0,
                -5103.0 / 18656.0,
            ],
            &[
                35.0 / 384.0,
                0.0,
                500.0 / 1113.0,
                125.0 / 192.0,
                -2187.0 / 6784.0,
                11.0 / 84.0,
            ],
        ],
        b_high: &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
            0.0,
        ],
        b_low: &[
            5179.0 / 57600.0,
            0.0,
            7571.0 / 16695.0,
            393.0 / 640.0,
            -92097.0 / 339200.0,
            187.0 / 2100.0,
            1.0 / 40.0,
        ],
    };

/// Looks up an adaptive method by its serialized name.
pub fn embedded_method_by_name(name: &str) -> Option<&'static EmbeddedExplicitRungeKutta> {
    match name {
        "DORMAND_PRINCE_1980_RK_547" => Some(&DORMAND_PRINCE_1980_RK_547),
        _ => None,
    }
}

/// One stage derivative: (q̇, v̇).
type Stage = (DVec3, DVec3);

impl EmbeddedExplicitRungeKutta {
    fn stage_count(&self) -> usize {
        self.b_high.len()
    }

    /// Computes one trial step of size `h` from `(t, y)`.
    ///
    /// `stages[0]` must hold the derivative at `(t, y)` on entry (the
    /// first-same-as-last carry-over). On success returns the
    /// higher-order solution, the derivative at its endpoint, and the
    /// per-component error estimates.
    fn trial_step<F>(
        &self,
        t: f64,
        h: f64,
        y: State,
        stages: &mut Vec<Stage>,
        acceleration: &mut F,
    ) -> Result<(State, Stage, f64, f64), Error>
    where
        F: FnMut(f64, DVec3) -> Result<DVec3, Error>,
    {
        for i in 1..self.stage_count() {
            let row = self.a[i - 1];
            let mut q = y.position;
            let mut v = y.velocity;
            for (j, &a_ij) in row.iter().enumerate() {
                q += h * a_ij * stages[j].0;
                v += h * a_ij * stages[j].1;
            }
            let ti = t + self.c[i] * h;
            let slot = (v, acceleration(ti, q)?);
            if i < stages.len() {
                stages[i] = slot;
            } else {
                stages.push(slot);
            }
        }

        let mut q_high = y.position;
        let mut v_high = y.velocity;
        let mut q_err = DVec3::ZERO;
        let mut v_err = DVec3::ZERO;
        for (i, stage) in stages.iter().enumerate() {
            q_high += h * self.b_high[i] * stage.0;
            v_high += h * self.b_high[i] * stage.1;
            let db = self.b_high[i] - self.b_low[i];
            q_err += h * db * stage.0;
            v_err += h * db * stage.1;
        }

        let end = State::new(q_high, v_high);
        // b_high matches the last stage row, so the final stage
        // derivative is the derivative at the accepted endpoint.
        let end_stage = stages[self.stage_count() - 1];
        Ok((end, end_stage, q_err.length(), v_err.length()))
    }

    /// Integrates `initial` from `t_initial` towards `t_final` with
    /// adaptive steps, appending each accepted sample via `append`.
    ///
    /// Returns the time actually reached: `t_final` normally, or
    /// earlier when `parameters.max_steps` accepted steps ran out. The
    /// `cancel` flag is polled between force evaluations; once set the
    /// flow stops with [`Error::CancelledComputation`].
    pub fn flow<F, G>(
        &self,
        parameters: &AdaptiveStepParameters,
        t_initial: f64,
        t_final: f64,
        initial: State,
        mut acceleration: F,
        mut append: G,
        cancel: &AtomicBool,
    ) -> Result<f64, Error>
    where
        F: FnMut(f64, DVec3) -> Result<DVec3, Error>,
        G: FnMut(f64, State) -> Result<(), Error>,
    {
        debug_assert!(parameters.safety_factor > 0.0 && parameters.safety_factor < 1.0);
        debug_assert!(parameters.first_step > 0.0);

        let mut t = t_initial;
        let mut y = initial;
        let mut h = parameters.first_step.min(t_final - t_initial);
        let mut stages: Vec<Stage> = Vec::with_capacity(self.stage_count());
        stages.push((y.velocity, acceleration(t, y.position)?));

        let inv_exponent = 1.0 / f64::from(self.lower_order + 1);
        let mut accepted: u64 = 0;

        while t < t_final {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::CancelledComputation);
            }
            if accepted >= parameters.max_steps {
                trace!(t, t_final, "adaptive flow ran out of steps");
                return Ok(t);
            }
            if t + h == t {
                return Err(Error::IntegratorDivergence { time: t });
            }

            let (end, end_stage, q_error, v_error) =
                self.trial_step(t, h, y, &mut stages, &mut acceleration)?;
            if !end.is_finite() {
                return Err(Error::IntegratorDivergence { time: t });
            }

            // Smallest tolerance-to-error ratio governs both acceptance
            // and the next step size.
            let ratio = (parameters.length_tolerance / q_error)
                .min(parameters.speed_tolerance / v_error);
            let factor = (parameters.safety_factor * ratio.powf(inv_exponent))
                .clamp(0.1, 4.0);

            if ratio >= 1.0 {
                // The last step targets t_final exactly; snap to it so
                // rounding in t + h cannot leave a vanishing remainder.
                t = if h == t_final - t { t_final } else { t + h };
                y = end;
                stages[0] = end_stage;
                append(t, y)?;
                accepted += 1;
            }
            h = (h * factor).min(t_final - t);
        }
        Ok(t_final)
    }
}
