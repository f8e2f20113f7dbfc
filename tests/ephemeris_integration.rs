//! Integration tests for the ephemeris and the trajectory store.

mod common;

use approx::assert_relative_eq;
use glam::DVec3;
use orrery::ephemeris::Ephemeris;
use orrery::integrators::{AdaptiveStepParameters, DORMAND_PRINCE_1980_RK_547};
use orrery::trajectory::DiscreteTrajectory;
use orrery::types::{State, AU_TO_METERS, SECONDS_PER_DAY};

#[test]
fn test_earth_returns_after_one_year() {
    let mut ephemeris = common::sun_and_earth();
    let period = common::orbital_period(AU_TO_METERS);
    ephemeris.prolong(period).unwrap();

    let earth = ephemeris.id_of("Earth").unwrap();
    let start = ephemeris.state(earth, 0.0).unwrap();
    let end = ephemeris.state(earth, period).unwrap();

    let closure = (end.position - start.position).length() / AU_TO_METERS;
    assert!(
        closure < 1e-3,
        "Earth should close its orbit to within 0.001 AU, got {closure} AU"
    );
}

#[test]
fn test_low_earth_satellite_feels_oblateness() {
    let mut ephemeris = common::sun_and_earth();
    let earth = ephemeris.id_of("Earth").unwrap();
    ephemeris.prolong(2.0 * SECONDS_PER_DAY).unwrap();

    // A satellite in low orbit, slightly inclined so J2 matters.
    let earth_state = ephemeris.state(earth, 0.0).unwrap();
    let altitude_radius = common::EARTH_RADIUS + 8e5;
    let v = (common::GM_EARTH / altitude_radius).sqrt();
    let inclination: f64 = 0.5;
    let satellite = State::new(
        earth_state.position + DVec3::new(altitude_radius, 0.0, 0.0),
        earth_state.velocity
            + DVec3::new(0.0, v * inclination.cos(), v * inclination.sin()),
    );

    let mut trajectory = DiscreteTrajectory::new(None);
    let root = trajectory.root();
    trajectory.append(root, 0.0, satellite).unwrap();
    let t_final = SECONDS_PER_DAY;
    ephemeris
        .flow_with_adaptive_step(
            &mut trajectory,
            root,
            &DORMAND_PRINCE_1980_RK_547,
            &AdaptiveStepParameters::new(60.0, 1e-2, 1e-5),
            t_final,
        )
        .unwrap();

    // The orbit stays bound to the Earth at roughly its radius.
    let orbital_period =
        2.0 * std::f64::consts::PI * (altitude_radius.powi(3) / common::GM_EARTH).sqrt();
    let samples = (1..20).map(|k| t_final * k as f64 / 20.0);
    for t in samples {
        let s = trajectory.evaluate(root, t).unwrap();
        let r = (s.position - ephemeris.position(earth, t).unwrap()).length();
        assert!(
            (r - altitude_radius).abs() / altitude_radius < 0.05,
            "satellite radius drifted to {r} m at t={t}"
        );
    }
    assert!(t_final > 10.0 * orbital_period, "test covers many orbits");
}

#[test]
fn test_forgetting_respects_guards_end_to_end() {
    let mut ephemeris = common::sun_and_earth();
    ephemeris.prolong(30.0 * SECONDS_PER_DAY).unwrap();
    let earth = ephemeris.id_of("Earth").unwrap();

    let guard = ephemeris.guard(10.0 * SECONDS_PER_DAY);
    ephemeris
        .eventually_forget_before(25.0 * SECONDS_PER_DAY)
        .unwrap();
    // Guarded history is still evaluable.
    assert!(ephemeris.state(earth, 11.0 * SECONDS_PER_DAY).is_ok());

    drop(guard);
    ephemeris
        .eventually_forget_before(25.0 * SECONDS_PER_DAY)
        .unwrap();
    assert!(ephemeris.state(earth, 11.0 * SECONDS_PER_DAY).is_err());
    assert!(ephemeris.state(earth, 26.0 * SECONDS_PER_DAY).is_ok());
}

#[test]
fn test_snapshot_survives_json() {
    let mut ephemeris = common::sun_and_earth();
    ephemeris.prolong(10.0 * SECONDS_PER_DAY).unwrap();
    let earth = ephemeris.id_of("Earth").unwrap();

    let json = serde_json::to_string(&ephemeris.snapshot()).unwrap();
    let restored = Ephemeris::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();

    assert_eq!(restored.t_max(), ephemeris.t_max());
    let restored_earth = restored.id_of("Earth").unwrap();
    for k in 0..10 {
        let t = k as f64 * SECONDS_PER_DAY;
        let a = ephemeris.state(earth, t).unwrap();
        let b = restored.state(restored_earth, t).unwrap();
        assert_relative_eq!((a.position - b.position).length(), 0.0, epsilon = 1e-6);
    }
}
