//! Common test utilities for integration tests.
//!
//! Each integration test binary compiles this module separately and
//! uses a different subset of it.
#![allow(dead_code)]

use glam::DVec3;
use orrery::body::{Body, OblatenessField, Rotation};
use orrery::ephemeris::{AccuracyParameters, Ephemeris, FixedStepParameters};
use orrery::integrators::MCLACHLAN_ATELA_1992_ORDER_4;
use orrery::types::{State, AU_TO_METERS, GM_SUN, SECONDS_PER_DAY};

pub const GM_EARTH: f64 = 3.986004418e14;
pub const EARTH_RADIUS: f64 = 6.378137e6;
pub const EARTH_J2: f64 = 1.0826e-3;

/// Circular heliocentric orbit in the xy-plane.
pub fn circular_orbit(distance_au: f64) -> State {
    let r = distance_au * AU_TO_METERS;
    let v = (GM_SUN / r).sqrt();
    State::new(DVec3::new(r, 0.0, 0.0), DVec3::new(0.0, v, 0.0))
}

/// Keplerian period for semi-major axis `a` around the Sun.
pub fn orbital_period(a: f64) -> f64 {
    2.0 * std::f64::consts::PI * (a * a * a / GM_SUN).sqrt()
}

/// Sun at the origin plus an oblate, rotating Earth on a circular
/// orbit at 1 AU.
pub fn sun_and_earth() -> Ephemeris {
    let sun = Body::point_mass("Sun", GM_SUN);
    let earth = Body::builder("Earth", GM_EARTH)
        .rotation(Rotation::new(DVec3::Z, 0.0, 7.292115e-5))
        .field(OblatenessField::j2(EARTH_RADIUS, EARTH_J2))
        .build();
    // Ignore the barycentre offset: GM_EARTH/GM_SUN ~ 3e-6.
    let states = [
        State::new(DVec3::ZERO, DVec3::ZERO),
        circular_orbit(1.0),
    ];
    Ephemeris::new(
        vec![sun, earth],
        &states,
        0.0,
        FixedStepParameters {
            integrator: &MCLACHLAN_ATELA_1992_ORDER_4,
            step: SECONDS_PER_DAY / 4.0,
        },
        AccuracyParameters {
            fitting_tolerance: 10.0,
            geopotential_tolerance: 1e-9,
        },
    )
}
