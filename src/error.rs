//! Crate-wide error kinds, consumed by an external reporting layer.

use thiserror::Error;

/// Outcome of any fallible operation in the crate.
///
/// `CancelledComputation` is a normal termination of a background
/// computation, not a fault; it is carried here so the prognostication
/// protocol can record it as the status of the last run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("sample time {time} does not strictly increase past {last}")]
    NonMonotonicTime { time: f64, last: f64 },

    #[error("no retained sample at time {time} to fork from")]
    NoSuchForkPoint { time: f64 },

    #[error("time {time} outside covered range [{t_min}, {t_max}]")]
    OutOfRange { time: f64, t_min: f64, t_max: f64 },

    #[error("forgetting before {time} would sever a fork attached at {fork_time}")]
    WouldSeverFork { time: f64, fork_time: f64 },

    #[error("no body with index {index}")]
    NoSuchBody { index: usize },

    #[error("integrator diverged at time {time}")]
    IntegratorDivergence { time: f64 },

    #[error("computation was cancelled")]
    CancelledComputation,

    #[error("prognostication protocol has shut down")]
    ProtocolShutDown,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
