//! Damped spherical-harmonic gravity.
//!
//! The oblateness contribution of a body is physically meaningful close
//! to the body and numerical noise far from it. Each harmonic degree is
//! therefore faded out over a radial shell chosen so that the truncated
//! acceleration stays within a caller-specified fraction of the
//! point-mass acceleration. The fade uses a cubic sigmoid that is 1 at
//! the inner threshold and 0 at the outer, with zero slope at both, so
//! the total acceleration is continuous everywhere.

use glam::DVec3;

use crate::body::{Body, Rotation};

/// Radial fade of one harmonic contribution.
///
/// Below `inner_threshold` the contribution is exact; beyond three
/// times that radius it vanishes; in between it is scaled by
/// σ(r) = c1·r + c2·r² + c3·r³ with σ(s) = 1, σ(3s) = 0 and
/// σ′(s) = σ′(3s) = 0.
#[derive(Clone, Copy, Debug)]
pub struct HarmonicDamping {
    inner_threshold: f64,
    sigmoid: [f64; 3],
}

impl HarmonicDamping {
    pub fn new(inner_threshold: f64) -> Self {
        let s = inner_threshold;
        let sigmoid = if s.is_finite() {
            [9.0 / (4.0 * s), -3.0 / (2.0 * s * s), 1.0 / (4.0 * s * s * s)]
        } else {
            [0.0; 3]
        };
        Self {
            inner_threshold,
            sigmoid,
        }
    }

    pub fn inner_threshold(&self) -> f64 {
        self.inner_threshold
    }

    pub fn outer_threshold(&self) -> f64 {
        3.0 * self.inner_threshold
    }

    /// σ(r) and σ′(r) for a radius inside the fade shell.
    fn sigmoid_at(&self, r: f64) -> (f64, f64) {
        let [c1, c2, c3] = self.sigmoid;
        let sigma = r * (c1 + r * (c2 + r * c3));
        let sigma_prime = c1 + r * (2.0 * c2 + r * 3.0 * c3);
        (sigma, sigma_prime)
    }

    /// Applies the fade to one contribution at radius `r`, given the
    /// undamped acceleration, the potential it derives from, and the
    /// outward radial unit vector.
    ///
    /// The damped acceleration is −∇(σU) = σ·a − U·σ′·r̂.
    pub fn damped(
        &self,
        r: f64,
        acceleration: DVec3,
        potential: f64,
        r_hat: DVec3,
    ) -> DVec3 {
        if r <= self.inner_threshold {
            acceleration
        } else if r >= self.outer_threshold() {
            DVec3::ZERO
        } else {
            let (sigma, sigma_prime) = self.sigmoid_at(r);
            sigma * acceleration - potential * sigma_prime * r_hat
        }
    }

    /// Whether the contribution is identically zero at radius `r`.
    pub fn vanishes_at(&self, r: f64) -> bool {
        r >= self.outer_threshold()
    }
}

/// Precomputed damped field of one oblate body.
#[derive(Clone, Debug)]
pub struct DampedField {
    mu: f64,
    reference_radius: f64,
    /// `(J_{i+2}, damping)` for each retained zonal degree.
    zonal: Vec<(f64, HarmonicDamping)>,
    /// Degree-2 sectoral pair and its damping.
    sectoral: Option<(f64, f64, HarmonicDamping)>,
}

impl DampedField {
    /// Builds the damped field of `body`, or `None` for a point mass.
    ///
    /// `tolerance` bounds the relative acceleration error introduced by
    /// dropping a degree outside its fade shell: the inner threshold of
    /// degree n is where its acceleration is `tolerance` times the
    /// point-mass acceleration. A zero tolerance disables damping.
    pub fn of(body: &Body, tolerance: f64) -> Option<Self> {
        let field = body.field()?;
        let radius = field.reference_radius();
        let zonal = field
            .zonal()
            .iter()
            .enumerate()
            .map(|(i, &j_n)| {
                let degree = i + 2;
                (j_n, HarmonicDamping::new(zonal_threshold(radius, degree, j_n, tolerance)))
            })
            .collect();
        let c22 = field.c22();
        let s22 = field.s22();
        let sectoral = if c22 != 0.0 || s22 != 0.0 {
            let norm = c22.hypot(s22);
            Some((
                c22,
                s22,
                HarmonicDamping::new(zonal_threshold(radius, 2, norm, tolerance)),
            ))
        } else {
            None
        };
        Some(Self {
            mu: body.gravitational_parameter(),
            reference_radius: radius,
            zonal,
            sectoral,
        })
    }

    /// Largest radius at which any harmonic still contributes.
    pub fn outer_threshold(&self) -> f64 {
        let zonal = self
            .zonal
            .iter()
            .map(|(_, d)| d.outer_threshold())
            .fold(0.0, f64::max);
        let sectoral = self
            .sectoral
            .map(|(_, _, d)| d.outer_threshold())
            .unwrap_or(0.0);
        zonal.max(sectoral)
    }

    /// Harmonic acceleration at `displacement` from the body centre,
    /// excluding the point-mass term. `rotation` supplies the
    /// body-fixed frame at the evaluation time.
    pub fn acceleration(
        &self,
        rotation: &Rotation,
        time: f64,
        displacement: DVec3,
    ) -> DVec3 {
        let r = displacement.length();
        if self.vanishes_at(r) {
            return DVec3::ZERO;
        }
        let r_hat = displacement / r;
        let axis = rotation.axis();
        let u = r_hat.dot(axis);

        let mut total = DVec3::ZERO;

        // Zonal degrees, by the Legendre recurrences
        //   n·P_n  = (2n−1)·u·P_{n−1} − (n−1)·P_{n−2}
        //   P_n′   = P_{n−2}′ + (2n−1)·P_{n−1}.
        let radius_ratio = self.reference_radius / r;
        let mut p_nm2 = 1.0; // P_0
        let mut p_nm1 = u; // P_1
        let mut dp_nm2 = 0.0; // P_0′
        let mut dp_nm1 = 1.0; // P_1′
        let mut ratio_n = radius_ratio; // (R/r)^1
        for (i, &(j_n, damping)) in self.zonal.iter().enumerate() {
            let n = (i + 2) as f64;
            let p_n = ((2.0 * n - 1.0) * u * p_nm1 - (n - 1.0) * p_nm2) / n;
            let dp_n = dp_nm2 + (2.0 * n - 1.0) * p_nm1;
            ratio_n *= radius_ratio;

            if j_n != 0.0 && !damping.vanishes_at(r) {
                let scale = self.mu * j_n * ratio_n / (r * r);
                let acceleration =
                    scale * ((n + 1.0) * p_n * r_hat - dp_n * (axis - u * r_hat));
                let potential = self.mu / r * j_n * ratio_n * p_n;
                total += damping.damped(r, acceleration, potential, r_hat);
            }

            p_nm2 = p_nm1;
            p_nm1 = p_n;
            dp_nm2 = dp_nm1;
            dp_nm1 = dp_n;
        }

        if let Some((c22, s22, damping)) = self.sectoral {
            if !damping.vanishes_at(r) {
                total += damping.damped(
                    r,
                    self.sectoral_acceleration(rotation, time, displacement, c22, s22),
                    self.sectoral_potential(rotation, time, displacement, c22, s22),
                    r_hat,
                );
            }
        }
        total
    }

    fn vanishes_at(&self, r: f64) -> bool {
        r >= self.outer_threshold()
    }

    /// The degree-2 sectoral potential
    /// U = 3μR²·[C22(x²−y²) + 2·S22·x·y]/r⁵ in body-fixed coordinates.
    fn sectoral_potential(
        &self,
        rotation: &Rotation,
        time: f64,
        displacement: DVec3,
        c22: f64,
        s22: f64,
    ) -> f64 {
        let (x_hat, y_hat) = rotation.equatorial_basis_at(time);
        let x = displacement.dot(x_hat);
        let y = displacement.dot(y_hat);
        let r = displacement.length();
        let w = c22 * (x * x - y * y) + 2.0 * s22 * x * y;
        3.0 * self.mu * self.reference_radius * self.reference_radius * w / r.powi(5)
    }

    fn sectoral_acceleration(
        &self,
        rotation: &Rotation,
        time: f64,
        displacement: DVec3,
        c22: f64,
        s22: f64,
    ) -> DVec3 {
        let (x_hat, y_hat) = rotation.equatorial_basis_at(time);
        let z_hat = rotation.axis();
        let x = displacement.dot(x_hat);
        let y = displacement.dot(y_hat);
        let z = displacement.dot(z_hat);
        let r = displacement.length();
        let r5 = r.powi(5);
        let r7 = r5 * r * r;
        let w = c22 * (x * x - y * y) + 2.0 * s22 * x * y;
        let k = 3.0 * self.mu * self.reference_radius * self.reference_radius;

        let du_dx = k * ((2.0 * c22 * x + 2.0 * s22 * y) / r5 - 5.0 * x * w / r7);
        let du_dy = k * ((-2.0 * c22 * y + 2.0 * s22 * x) / r5 - 5.0 * y * w / r7);
        let du_dz = k * (-5.0 * z * w / r7);

        -(du_dx * x_hat + du_dy * y_hat + du_dz * z_hat)
    }
}

/// Inner damping threshold for degree `n` with coefficient `j_n`: the
/// radius where the degree's acceleration is `tolerance` times the
/// point-mass acceleration, never less than the reference radius.
fn zonal_threshold(radius: f64, degree: usize, j_n: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 {
        return f64::INFINITY;
    }
    let n = degree as f64;
    let threshold = radius * ((n + 1.0) * j_n.abs() / tolerance).powf(1.0 / n);
    threshold.max(radius)
}
