//! Test utilities for orbital mechanics tests.
//!
//! Provides fixtures for creating test orbits and assertions for
//! verifying physical invariants like energy and angular momentum
//! conservation.

use glam::DVec3;

use crate::types::{State, AU_TO_METERS, GM_SUN};

/// Fixtures for creating test orbital states.
pub mod fixtures {
    use super::*;

    /// A state in a circular heliocentric orbit at the given distance.
    ///
    /// The body is placed on the positive x-axis with velocity in the
    /// +y direction, so the orbit lies in the xy-plane.
    pub fn circular_orbit(distance_au: f64) -> State {
        circular_orbit_around(GM_SUN, distance_au * AU_TO_METERS)
    }

    /// A circular orbit around an arbitrary point mass.
    pub fn circular_orbit_around(mu: f64, radius: f64) -> State {
        let v = (mu / radius).sqrt();
        State::new(DVec3::new(radius, 0.0, 0.0), DVec3::new(0.0, v, 0.0))
    }

    /// A state at the perihelion of a heliocentric elliptical orbit.
    pub fn elliptical_orbit(perihelion_au: f64, eccentricity: f64) -> State {
        assert!(
            (0.0..1.0).contains(&eccentricity),
            "eccentricity must be in [0, 1) for an elliptical orbit"
        );
        let r_p = perihelion_au * AU_TO_METERS;
        let a = r_p / (1.0 - eccentricity);
        // Vis-viva at perihelion.
        let v = (GM_SUN * (2.0 / r_p - 1.0 / a)).sqrt();
        State::new(DVec3::new(r_p, 0.0, 0.0), DVec3::new(0.0, v, 0.0))
    }

    /// A slightly inclined circular orbit, for exercising code that
    /// cares about the third dimension.
    pub fn inclined_circular_orbit(mu: f64, radius: f64, inclination: f64) -> State {
        let v = (mu / radius).sqrt();
        State::new(
            DVec3::new(radius, 0.0, 0.0),
            DVec3::new(0.0, v * inclination.cos(), v * inclination.sin()),
        )
    }
}

/// Assertions for verifying physical invariants.
pub mod assertions {
    use super::*;

    /// Specific orbital energy E = v²/2 - GM/r around the Sun.
    pub fn orbital_energy(position: DVec3, velocity: DVec3) -> f64 {
        orbital_energy_around(GM_SUN, position, velocity)
    }

    pub fn orbital_energy_around(mu: f64, position: DVec3, velocity: DVec3) -> f64 {
        0.5 * velocity.length_squared() - mu / position.length()
    }

    /// Specific angular momentum L = r × v.
    pub fn angular_momentum(position: DVec3, velocity: DVec3) -> DVec3 {
        position.cross(velocity)
    }

    /// Keplerian period of a heliocentric orbit with semi-major axis
    /// `a` in meters.
    pub fn orbital_period(a: f64) -> f64 {
        2.0 * std::f64::consts::PI * (a * a * a / GM_SUN).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_circular_orbit_has_zero_radial_velocity() {
        let state = fixtures::circular_orbit(1.0);
        assert_relative_eq!(state.position.dot(state.velocity), 0.0);
        // E = -GM/2a for a circular orbit of radius a.
        let energy = assertions::orbital_energy(state.position, state.velocity);
        assert_relative_eq!(
            energy,
            -GM_SUN / (2.0 * AU_TO_METERS),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_earth_period_is_about_a_year() {
        let period = assertions::orbital_period(AU_TO_METERS);
        let year = 365.25 * crate::types::SECONDS_PER_DAY;
        assert_relative_eq!(period, year, max_relative = 1e-3);
    }
}
