//! Property-based tests for the trajectory store using proptest.
//!
//! These tests verify the structural invariants of the store (monotone
//! timelines, bounded compaction error, fork isolation) across randomly
//! generated append sequences.

use glam::DVec3;
use proptest::prelude::*;

use super::{DiscreteTrajectory, DownsamplingParameters};
use crate::types::State;

/// A smooth synthetic path with consistent position and velocity, so
/// the Hermite fit sees physically plausible data.
fn path(t: f64, frequency: f64, amplitude: f64) -> State {
    let phase = frequency * t;
    State::new(
        DVec3::new(
            amplitude * phase.cos(),
            amplitude * phase.sin(),
            0.1 * amplitude * phase,
        ),
        DVec3::new(
            -amplitude * frequency * phase.sin(),
            amplitude * frequency * phase.cos(),
            0.1 * amplitude * frequency,
        ),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Iteration visits retained samples in strictly increasing time,
    /// regardless of compaction.
    #[test]
    fn prop_iteration_is_strictly_increasing(
        step in 1.0f64..100.0,
        count in 20usize..200,
        dense in 4usize..32,
    ) {
        let mut trajectory = DiscreteTrajectory::new(Some(DownsamplingParameters {
            dense_interval_count: dense,
            fitting_tolerance: 1.0,
        }));
        let root = trajectory.root();
        for i in 0..count {
            let t = i as f64 * step;
            trajectory.append(root, t, path(t, 1e-3, 1e7)).unwrap();
        }
        let times: Vec<f64> = trajectory.iterate(root).map(|s| s.time).collect();
        prop_assert!(times.windows(2).all(|w| w[1] > w[0]));
        // First and last raw samples always survive compaction.
        prop_assert_eq!(times[0], 0.0);
        prop_assert_eq!(*times.last().unwrap(), (count - 1) as f64 * step);
    }

    /// The compacted representation never deviates from the raw path by
    /// more than the fitting tolerance at the raw sample times.
    #[test]
    fn prop_compaction_error_is_bounded(
        frequency in 1e-4f64..1e-2,
        step in 10.0f64..200.0,
        tolerance in 1.0f64..1000.0,
    ) {
        let amplitude = 1e7;
        let mut trajectory = DiscreteTrajectory::new(Some(DownsamplingParameters {
            dense_interval_count: 16,
            fitting_tolerance: tolerance,
        }));
        let root = trajectory.root();
        let count = 300;
        for i in 0..count {
            let t = i as f64 * step;
            trajectory.append(root, t, path(t, frequency, amplitude)).unwrap();
        }
        for i in 0..count {
            let t = i as f64 * step;
            let stored = trajectory.evaluate(root, t).unwrap();
            let error = (stored.position - path(t, frequency, amplitude).position).length();
            prop_assert!(
                error <= tolerance,
                "stored path off by {error} m at t={t}, tolerance {tolerance} m"
            );
        }
    }

    /// Appending to a fork never perturbs the trunk, and discarding the
    /// fork restores the ability to forget past the fork point.
    #[test]
    fn prop_forks_are_isolated(
        count in 10usize..60,
        fork_index in 1usize..9,
    ) {
        let mut trajectory = DiscreteTrajectory::new(None);
        let root = trajectory.root();
        for i in 0..count {
            let t = i as f64;
            trajectory.append(root, t, path(t, 0.1, 1e6)).unwrap();
        }
        let before: Vec<_> = trajectory.iterate(root).collect();

        let fork_time = (fork_index * count / 10) as f64;
        let fork = trajectory.fork(root, fork_time).unwrap();
        for i in 1..5 {
            let t = fork_time + i as f64 * 0.25;
            trajectory.append(fork, t, path(t, 0.2, 1e6)).unwrap();
        }

        let after: Vec<_> = trajectory.iterate(root).collect();
        prop_assert_eq!(before, after);

        // The trunk is pinned at the fork point while the fork lives.
        if fork_time > 0.0 {
            prop_assert!(trajectory.forget_before(fork_time + 0.5).is_err());
        }
        trajectory.discard(fork);
        prop_assert!(trajectory.forget_before(fork_time + 0.5).is_ok());
        // No span straddles the cut here, so the evaluable range starts
        // at the first surviving raw sample.
        prop_assert_eq!(trajectory.t_min(), Some(fork_time + 1.0));
    }

    /// Snapshot export and import preserve every retained sample and
    /// the evaluable range.
    #[test]
    fn prop_snapshot_preserves_samples(
        count in 10usize..100,
        dense in 4usize..20,
    ) {
        let mut trajectory = DiscreteTrajectory::new(Some(DownsamplingParameters {
            dense_interval_count: dense,
            fitting_tolerance: 100.0,
        }));
        let root = trajectory.root();
        for i in 0..count {
            let t = i as f64 * 10.0;
            trajectory.append(root, t, path(t, 1e-2, 1e7)).unwrap();
        }
        let restored = DiscreteTrajectory::from_snapshot(trajectory.snapshot()).unwrap();
        prop_assert_eq!(
            trajectory.iterate(root).collect::<Vec<_>>(),
            restored.iterate(restored.root()).collect::<Vec<_>>()
        );
        prop_assert_eq!(trajectory.t_min(), restored.t_min());
        prop_assert_eq!(trajectory.t_max(root), restored.t_max(restored.root()));
    }
}
