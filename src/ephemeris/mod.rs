//! Continuous trajectories of the massive bodies.
//!
//! An `Ephemeris` owns the system of massive bodies and one trajectory
//! per body, extended on demand by a fixed-step symplectic integrator
//! and compacted to a caller-chosen fitting tolerance. Massless objects
//! are integrated against it with an adaptive method, either directly
//! through [`Ephemeris::flow_with_adaptive_step`] or from a background
//! thread through a [`SharedEphemeris`].
//!
//! Old data is reclaimed cooperatively: readers take [`Guard`]s pinning
//! the times they still need, and [`Ephemeris::eventually_forget_before`]
//! never deletes past the earliest pin.

mod geopotential;

pub use geopotential::{DampedField, HarmonicDamping};

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::body::Body;
use crate::error::Error;
use crate::integrators::{
    symplectic_method_by_name, AdaptiveStepParameters, EmbeddedExplicitRungeKutta,
    SymplecticRungeKutta,
};
use crate::trajectory::{
    DiscreteTrajectory, DownsamplingParameters, SegmentId, TrajectorySnapshot,
};
use crate::types::State;

/// Identifies one massive body within an ephemeris.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyId(usize);

/// Fixed-step integration policy for the massive bodies.
#[derive(Clone, Copy, Debug)]
pub struct FixedStepParameters {
    pub integrator: &'static SymplecticRungeKutta,
    /// Step in seconds.
    pub step: f64,
}

/// Accuracy policy of the ephemeris.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccuracyParameters {
    /// Compaction tolerance of the stored trajectories, meters.
    pub fitting_tolerance: f64,
    /// Relative acceleration error below which a harmonic degree is
    /// faded out; zero keeps every degree exact at all radii.
    pub geopotential_tolerance: f64,
}

/// Extra system-wide acceleration applied to the massive bodies on top
/// of gravity, e.g. a post-Newtonian correction. Receives the stage
/// time and positions and accumulates into the acceleration slice.
pub type ExtraAcceleration =
    Box<dyn Fn(f64, &[DVec3], &mut [DVec3]) -> Result<(), Error> + Send + Sync>;

#[derive(Default)]
struct GuardTable {
    next_key: u64,
    pins: BTreeMap<u64, f64>,
}

impl GuardTable {
    fn floor(&self) -> f64 {
        self.pins.values().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Pins an ephemeris time range against reclamation. The range
/// `[t_min(), t_max]` stays evaluable while the guard lives; dropping
/// the guard releases the pin.
pub struct Guard {
    table: Arc<Mutex<GuardTable>>,
    key: u64,
    pinned: f64,
}

impl Guard {
    /// The earliest time this guard keeps alive.
    pub fn t_min(&self) -> f64 {
        self.pinned
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.pins.remove(&self.key);
    }
}

/// The massive bodies and their integrated trajectories.
pub struct Ephemeris {
    bodies: Vec<Body>,
    /// Damped oblateness field per body; `None` for point masses.
    fields: Vec<Option<DampedField>>,
    trajectories: Vec<DiscreteTrajectory>,
    /// Tip state, ahead of which nothing is known.
    positions: Vec<DVec3>,
    velocities: Vec<DVec3>,
    scratch: Vec<DVec3>,
    t_current: f64,
    fixed: FixedStepParameters,
    accuracy: AccuracyParameters,
    extra: Option<ExtraAcceleration>,
    guards: Arc<Mutex<GuardTable>>,
}

impl Ephemeris {
    /// Builds an ephemeris from bodies and their states at `t_initial`.
    ///
    /// Panics if the two slices disagree in length.
    pub fn new(
        bodies: Vec<Body>,
        initial_states: &[State],
        t_initial: f64,
        fixed: FixedStepParameters,
        accuracy: AccuracyParameters,
    ) -> Self {
        assert_eq!(
            bodies.len(),
            initial_states.len(),
            "one initial state per body"
        );
        assert!(fixed.step > 0.0, "fixed step must be positive");
        let n = bodies.len();
        let fields = bodies
            .iter()
            .map(|b| DampedField::of(b, accuracy.geopotential_tolerance))
            .collect();
        let downsampling = DownsamplingParameters {
            fitting_tolerance: accuracy.fitting_tolerance,
            ..DownsamplingParameters::default()
        };
        let mut trajectories = Vec::with_capacity(n);
        for state in initial_states {
            let mut trajectory = DiscreteTrajectory::new(Some(downsampling));
            let root = trajectory.root();
            // A fresh trajectory accepts any first time.
            trajectory
                .append(root, t_initial, *state)
                .unwrap_or_else(|_| unreachable!());
            trajectories.push(trajectory);
        }
        info!(bodies = n, t_initial, step = fixed.step, "ephemeris created");
        Self {
            bodies,
            fields,
            trajectories,
            positions: initial_states.iter().map(|s| s.position).collect(),
            velocities: initial_states.iter().map(|s| s.velocity).collect(),
            scratch: vec![DVec3::ZERO; n],
            t_current: t_initial,
            fixed,
            accuracy,
            extra: None,
            guards: Arc::new(Mutex::new(GuardTable::default())),
        }
    }

    /// Installs an extra acceleration on the massive bodies. Not
    /// carried by snapshots; reattach after [`Ephemeris::from_snapshot`].
    pub fn with_extra_acceleration(mut self, extra: ExtraAcceleration) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn body_ids(&self) -> impl Iterator<Item = BodyId> {
        (0..self.bodies.len()).map(BodyId)
    }

    pub fn body(&self, id: BodyId) -> Result<&Body, Error> {
        self.bodies
            .get(id.0)
            .ok_or(Error::NoSuchBody { index: id.0 })
    }

    pub fn id_of(&self, name: &str) -> Option<BodyId> {
        self.bodies.iter().position(|b| b.name() == name).map(BodyId)
    }

    /// Latest time the ephemeris covers.
    pub fn t_max(&self) -> f64 {
        self.t_current
    }

    /// Earliest time still evaluable, after any forgetting.
    pub fn t_min(&self) -> f64 {
        self.trajectories
            .first()
            .and_then(|t| t.t_min())
            .unwrap_or(self.t_current)
    }

    pub fn trajectory(&self, id: BodyId) -> Result<&DiscreteTrajectory, Error> {
        self.trajectories
            .get(id.0)
            .ok_or(Error::NoSuchBody { index: id.0 })
    }

    /// Interpolated state of a body at `time`.
    pub fn state(&self, id: BodyId, time: f64) -> Result<State, Error> {
        let trajectory = self.trajectory(id)?;
        trajectory.evaluate(trajectory.root(), time)
    }

    pub fn position(&self, id: BodyId, time: f64) -> Result<DVec3, Error> {
        Ok(self.state(id, time)?.position)
    }

    /// Extends all trajectories to cover `t` with fixed steps. A no-op
    /// when `t` is already covered.
    pub fn prolong(&mut self, t: f64) -> Result<(), Error> {
        let FixedStepParameters { integrator, step } = self.fixed;
        let mut time = self.t_current;
        while time < t {
            {
                let Ephemeris {
                    bodies,
                    fields,
                    extra,
                    positions,
                    velocities,
                    scratch,
                    ..
                } = self;
                time = integrator.step(
                    time,
                    step,
                    positions,
                    velocities,
                    scratch,
                    |stage_time, q, acc| {
                        massive_accelerations(bodies, fields, extra.as_ref(), stage_time, q, acc)
                    },
                )?;
            }
            self.t_current = time;
            for i in 0..self.trajectories.len() {
                let root = self.trajectories[i].root();
                let state = State::new(self.positions[i], self.velocities[i]);
                self.trajectories[i].append(root, time, state)?;
            }
        }
        Ok(())
    }

    /// Gravitational acceleration on a massless point at `position`,
    /// from every body evaluated at `time`: point-mass terms plus the
    /// damped oblateness fields.
    pub fn massless_acceleration(&self, time: f64, position: DVec3) -> Result<DVec3, Error> {
        let mut total = DVec3::ZERO;
        for (i, body) in self.bodies.iter().enumerate() {
            let trajectory = &self.trajectories[i];
            let body_position = trajectory.evaluate(trajectory.root(), time)?.position;
            let d = position - body_position;
            let r2 = d.length_squared();
            total -= body.gravitational_parameter() / (r2 * r2.sqrt()) * d;
            if let (Some(field), Some(rotation)) = (&self.fields[i], body.rotation()) {
                total += field.acceleration(rotation, time, d);
            }
        }
        Ok(total)
    }

    /// Integrates a massless object forward to `t_final` with adaptive
    /// steps, appending accepted samples to `trajectory` at `segment`.
    /// The ephemeris is prolonged first so every force evaluation is
    /// covered. Single-threaded convenience over
    /// [`EmbeddedExplicitRungeKutta::flow`]; background callers go
    /// through [`SharedEphemeris`] instead.
    ///
    /// Returns the time reached, which falls short of `t_final` only
    /// when `parameters.max_steps` ran out.
    pub fn flow_with_adaptive_step(
        &mut self,
        trajectory: &mut DiscreteTrajectory,
        segment: SegmentId,
        method: &EmbeddedExplicitRungeKutta,
        parameters: &AdaptiveStepParameters,
        t_final: f64,
    ) -> Result<f64, Error> {
        self.prolong(t_final)?;
        let initial = trajectory.last(segment).ok_or(Error::OutOfRange {
            time: t_final,
            t_min: f64::NAN,
            t_max: f64::NAN,
        })?;
        let cancel = AtomicBool::new(false);
        let ephemeris = &*self;
        method.flow(
            parameters,
            initial.time,
            t_final,
            initial.state,
            |t, q| ephemeris.massless_acceleration(t, q),
            |t, s| trajectory.append(segment, t, s),
            &cancel,
        )
    }

    /// Registers a pin keeping `[max(t, t_min()), t_max]` evaluable
    /// until the returned guard is dropped.
    pub fn guard(&self, t: f64) -> Guard {
        let pinned = t.max(self.t_min());
        let mut table = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        let key = table.next_key;
        table.next_key += 1;
        table.pins.insert(key, pinned);
        Guard {
            table: Arc::clone(&self.guards),
            key,
            pinned,
        }
    }

    /// Reclaims data before `t`, limited by the earliest live guard
    /// and by the current tip. Forgetting is best-effort: with guards
    /// outstanding the effective bound may be far earlier than `t`.
    pub fn eventually_forget_before(&mut self, t: f64) -> Result<(), Error> {
        let floor = {
            let table = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
            table.floor()
        };
        let t_effective = t.min(floor).min(self.t_current);
        if t_effective <= self.t_min() {
            return Ok(());
        }
        for trajectory in &mut self.trajectories {
            trajectory.forget_before(t_effective)?;
        }
        debug!(requested = t, effective = t_effective, "ephemeris forgot history");
        Ok(())
    }

    pub fn accuracy(&self) -> AccuracyParameters {
        self.accuracy
    }

    pub fn fixed_step_parameters(&self) -> FixedStepParameters {
        self.fixed
    }

    /// Exports bodies, parameters, trajectories and the tip state.
    pub fn snapshot(&self) -> EphemerisSnapshot {
        EphemerisSnapshot {
            bodies: self.bodies.clone(),
            trajectories: self.trajectories.iter().map(|t| t.snapshot()).collect(),
            positions: self.positions.clone(),
            velocities: self.velocities.clone(),
            t_current: self.t_current,
            integrator: self.fixed.integrator.name.to_string(),
            step: self.fixed.step,
            fitting_tolerance: self.accuracy.fitting_tolerance,
            geopotential_tolerance: self.accuracy.geopotential_tolerance,
        }
    }

    /// Rebuilds an ephemeris from a snapshot. Any extra acceleration
    /// must be reattached by the caller.
    pub fn from_snapshot(snapshot: EphemerisSnapshot) -> Result<Self, Error> {
        let n = snapshot.bodies.len();
        if snapshot.trajectories.len() != n
            || snapshot.positions.len() != n
            || snapshot.velocities.len() != n
        {
            return Err(Error::InvalidSnapshot(
                "body, trajectory and state counts disagree".to_string(),
            ));
        }
        let integrator = symplectic_method_by_name(&snapshot.integrator).ok_or_else(|| {
            Error::InvalidSnapshot(format!("unknown integrator {:?}", snapshot.integrator))
        })?;
        if !(snapshot.step > 0.0) {
            return Err(Error::InvalidSnapshot(format!(
                "non-positive step {}",
                snapshot.step
            )));
        }
        let accuracy = AccuracyParameters {
            fitting_tolerance: snapshot.fitting_tolerance,
            geopotential_tolerance: snapshot.geopotential_tolerance,
        };
        let fields = snapshot
            .bodies
            .iter()
            .map(|b| DampedField::of(b, accuracy.geopotential_tolerance))
            .collect();
        let trajectories = snapshot
            .trajectories
            .into_iter()
            .map(DiscreteTrajectory::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            bodies: snapshot.bodies,
            fields,
            trajectories,
            positions: snapshot.positions,
            velocities: snapshot.velocities,
            scratch: vec![DVec3::ZERO; n],
            t_current: snapshot.t_current,
            fixed: FixedStepParameters {
                integrator,
                step: snapshot.step,
            },
            accuracy,
            extra: None,
            guards: Arc::new(Mutex::new(GuardTable::default())),
        })
    }
}

/// Accelerations of the massive bodies on each other: pairwise
/// point-mass gravity, oblateness couplings with their reactions, and
/// the optional extra term.
fn massive_accelerations(
    bodies: &[Body],
    fields: &[Option<DampedField>],
    extra: Option<&ExtraAcceleration>,
    time: f64,
    positions: &[DVec3],
    accelerations: &mut [DVec3],
) -> Result<(), Error> {
    for a in accelerations.iter_mut() {
        *a = DVec3::ZERO;
    }
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let d = positions[j] - positions[i];
            let r2 = d.length_squared();
            let inv_r3 = 1.0 / (r2 * r2.sqrt());
            accelerations[i] += bodies[j].gravitational_parameter() * inv_r3 * d;
            accelerations[j] -= bodies[i].gravitational_parameter() * inv_r3 * d;
        }
    }
    for j in 0..bodies.len() {
        let (Some(field), Some(rotation)) = (&fields[j], bodies[j].rotation()) else {
            continue;
        };
        let mu_j = bodies[j].gravitational_parameter();
        for i in 0..bodies.len() {
            if i == j {
                continue;
            }
            let d = positions[i] - positions[j];
            let harmonic = field.acceleration(rotation, time, d);
            accelerations[i] += harmonic;
            // Reaction on the oblate body.
            accelerations[j] -= bodies[i].gravitational_parameter() / mu_j * harmonic;
        }
    }
    if let Some(extra) = extra {
        extra(time, positions, accelerations)?;
    }
    Ok(())
}

/// A cloneable, thread-safe handle to an ephemeris.
///
/// Writers (prolonging, forgetting) take the write lock; background
/// integrations take the read lock once per force evaluation and never
/// hold it across a whole step, so a foreground `prolong` is delayed by
/// at most one evaluation.
#[derive(Clone)]
pub struct SharedEphemeris(Arc<RwLock<Ephemeris>>);

impl SharedEphemeris {
    pub fn new(ephemeris: Ephemeris) -> Self {
        Self(Arc::new(RwLock::new(ephemeris)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Ephemeris> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Ephemeris> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializable image of an ephemeris.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EphemerisSnapshot {
    bodies: Vec<Body>,
    trajectories: Vec<TrajectorySnapshot>,
    positions: Vec<DVec3>,
    velocities: Vec<DVec3>,
    t_current: f64,
    integrator: String,
    step: f64,
    fitting_tolerance: f64,
    geopotential_tolerance: f64,
}
