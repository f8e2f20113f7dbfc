//! Asynchronous recomputation of massless trajectories.
//!
//! A `Prognosticator` owns one background worker that repeatedly flows
//! a massless object against a [`SharedEphemeris`] and publishes the
//! result. Requests carry complete initial conditions and overwrite one
//! another: only the most recent unstarted request is ever computed,
//! and a request arriving mid-computation cancels the computation in
//! flight. A cancelled run publishes nothing; the previous
//! prognostication stays visible until a newer run succeeds.
//!
//! The worker takes the ephemeris read lock once per force evaluation
//! and never across an integration step, so foreground writers are
//! delayed by at most one evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::ephemeris::SharedEphemeris;
use crate::error::Error;
use crate::integrators::{AdaptiveStepParameters, EmbeddedExplicitRungeKutta};
use crate::trajectory::{DiscreteTrajectory, DownsamplingParameters};
use crate::types::State;

/// Where prognostications are computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// On a dedicated worker thread; requests return immediately.
    Background,
    /// On the requesting thread; requests return when the computation
    /// finishes. Deterministic, intended for tests and replays.
    Inline,
}

/// Observable phase of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    Computing,
    ShutDown,
}

/// A complete, self-contained request: initial conditions, integration
/// policy and horizon. Nothing is read from earlier requests.
#[derive(Clone, Copy, Debug)]
pub struct PrognosticatorParameters {
    pub first_time: f64,
    pub first_state: State,
    pub method: &'static EmbeddedExplicitRungeKutta,
    pub adaptive: AdaptiveStepParameters,
    /// Compaction of the published trajectory; `None` keeps every
    /// accepted step.
    pub downsampling: Option<DownsamplingParameters>,
    pub t_final: f64,
}

struct Slots {
    pending: Option<PrognosticatorParameters>,
    prognostication: Option<Arc<DiscreteTrajectory>>,
    /// Outcome of the last finished run: time reached on success.
    last_status: Option<Result<f64, Error>>,
    state: ProtocolState,
    shutdown: bool,
}

struct Shared {
    slots: Mutex<Slots>,
    wake: Condvar,
    cancel: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the background recomputation of one massless trajectory.
pub struct Prognosticator {
    shared: Arc<Shared>,
    ephemeris: SharedEphemeris,
    mode: ExecutionMode,
    worker: Option<JoinHandle<()>>,
}

impl Prognosticator {
    pub fn new(ephemeris: SharedEphemeris, mode: ExecutionMode) -> Self {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots {
                pending: None,
                prognostication: None,
                last_status: None,
                state: ProtocolState::Idle,
                shutdown: false,
            }),
            wake: Condvar::new(),
            cancel: AtomicBool::new(false),
        });
        let worker = match mode {
            ExecutionMode::Background => {
                let shared = Arc::clone(&shared);
                let ephemeris = ephemeris.clone();
                Some(std::thread::spawn(move || worker_loop(shared, ephemeris)))
            }
            ExecutionMode::Inline => None,
        };
        Self {
            shared,
            ephemeris,
            mode,
            worker,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Submits a request, superseding any unstarted one and cancelling
    /// any computation in flight.
    pub fn request_refresh(&self, parameters: PrognosticatorParameters) -> Result<(), Error> {
        {
            let mut slots = self.shared.lock();
            if slots.shutdown {
                return Err(Error::ProtocolShutDown);
            }
            if slots.pending.replace(parameters).is_some() {
                debug!("superseded an unstarted prognostication request");
            }
            if slots.state == ProtocolState::Computing {
                self.shared.cancel.store(true, Ordering::SeqCst);
            }
        }
        self.shared.wake.notify_all();
        if self.mode == ExecutionMode::Inline {
            self.run_pending();
        }
        Ok(())
    }

    /// Runs queued requests on the calling thread until none is left.
    fn run_pending(&self) {
        loop {
            let parameters = {
                let mut slots = self.shared.lock();
                self.shared.cancel.store(false, Ordering::SeqCst);
                match slots.pending.take() {
                    Some(p) => p,
                    None => return,
                }
            };
            let result = compute(&self.ephemeris, &parameters, &self.shared.cancel);
            publish(&self.shared, result);
        }
    }

    /// The most recently published trajectory, if any run has
    /// succeeded. Cheap to clone; stays valid after newer publications.
    pub fn prognostication(&self) -> Option<Arc<DiscreteTrajectory>> {
        self.shared.lock().prognostication.clone()
    }

    /// Outcome of the last finished run: the time reached on success,
    /// which is short of the requested horizon when `max_steps` ran
    /// out.
    pub fn last_status(&self) -> Option<Result<f64, Error>> {
        self.shared.lock().last_status.clone()
    }

    pub fn state(&self) -> ProtocolState {
        self.shared.lock().state
    }

    /// Blocks until no request is pending and no computation running.
    pub fn wait_until_idle(&self) {
        let mut slots = self.shared.lock();
        while slots.pending.is_some() || slots.state == ProtocolState::Computing {
            slots = self
                .shared
                .wake
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops the worker and rejects all further requests. Idempotent;
    /// also performed on drop.
    pub fn shut_down(&mut self) {
        {
            let mut slots = self.shared.lock();
            slots.shutdown = true;
            slots.pending = None;
            if slots.state == ProtocolState::Computing {
                self.shared.cancel.store(true, Ordering::SeqCst);
            } else {
                slots.state = ProtocolState::ShutDown;
            }
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("prognosticator worker panicked");
            }
        }
        self.shared.lock().state = ProtocolState::ShutDown;
    }
}

impl Drop for Prognosticator {
    fn drop(&mut self) {
        self.shut_down();
    }
}

fn worker_loop(shared: Arc<Shared>, ephemeris: SharedEphemeris) {
    info!("prognosticator worker started");
    loop {
        let parameters = {
            let mut slots = shared.lock();
            loop {
                if slots.shutdown {
                    slots.state = ProtocolState::ShutDown;
                    shared.wake.notify_all();
                    info!("prognosticator worker stopped");
                    return;
                }
                if let Some(p) = slots.pending.take() {
                    slots.state = ProtocolState::Computing;
                    // Cleared under the lock: a cancellation raised by a
                    // later request cannot be lost.
                    shared.cancel.store(false, Ordering::SeqCst);
                    break p;
                }
                slots.state = ProtocolState::Idle;
                shared.wake.notify_all();
                slots = shared
                    .wake
                    .wait(slots)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        let result = compute(&ephemeris, &parameters, &shared.cancel);
        publish(&shared, result);
    }
}

/// Stores a finished run. A cancelled run leaves the previous
/// prognostication in place.
fn publish(shared: &Shared, result: Result<(DiscreteTrajectory, f64), Error>) {
    let mut slots = shared.lock();
    match result {
        Ok((trajectory, reached)) => {
            slots.prognostication = Some(Arc::new(trajectory));
            slots.last_status = Some(Ok(reached));
        }
        Err(Error::CancelledComputation) => {
            debug!("prognostication cancelled, partial result discarded");
            slots.last_status = Some(Err(Error::CancelledComputation));
        }
        Err(error) => {
            warn!(%error, "prognostication failed");
            slots.last_status = Some(Err(error));
        }
    }
    shared.wake.notify_all();
}

/// One full run: pin the history, extend coverage to the horizon, then
/// flow with per-evaluation read locks.
fn compute(
    ephemeris: &SharedEphemeris,
    parameters: &PrognosticatorParameters,
    cancel: &AtomicBool,
) -> Result<(DiscreteTrajectory, f64), Error> {
    let _guard = ephemeris.read().guard(parameters.first_time);
    ephemeris.write().prolong(parameters.t_final)?;

    let mut trajectory = DiscreteTrajectory::new(parameters.downsampling);
    let root = trajectory.root();
    trajectory.append(root, parameters.first_time, parameters.first_state)?;
    let reached = parameters.method.flow(
        &parameters.adaptive,
        parameters.first_time,
        parameters.t_final,
        parameters.first_state,
        |t, q| ephemeris.read().massless_acceleration(t, q),
        |t, s| trajectory.append(root, t, s),
        cancel,
    )?;
    Ok((trajectory, reached))
}
