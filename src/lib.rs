//! Orrery - N-body Ephemeris and Trajectory Prognostication
//!
//! A library crate maintaining the time-evolving state of a gravitating
//! N-body system, together with speculative future trajectories of
//! massless bodies moving in it, computed in the background so that the
//! interactive loop driving the simulation is never blocked.

pub mod body;
pub mod ephemeris;
pub mod error;
pub mod integrators;
pub mod prognostication;
pub mod trajectory;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use error::Error;
