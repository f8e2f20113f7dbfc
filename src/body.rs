//! Massive-body descriptions.
//!
//! A body is a gravitational parameter, optionally extended with a
//! rotation (axis, reference angle, spin rate) and an oblateness field
//! (zonal and degree-2 sectoral spherical-harmonic coefficients). Each
//! capability set holds only its own parameters; a field requires a
//! rotation, since the harmonics are expressed in the body-fixed frame.
//! Bodies are immutable after construction.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Rotation of a body about a fixed axis at a constant rate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rotation {
    axis: DVec3,
    reference_angle: f64,
    angular_frequency: f64,
}

impl Rotation {
    /// `axis` need not be normalized; `reference_angle` is the rotation
    /// angle at time 0, `angular_frequency` in rad/s.
    pub fn new(axis: DVec3, reference_angle: f64, angular_frequency: f64) -> Self {
        Self {
            axis: axis.normalize(),
            reference_angle,
            angular_frequency,
        }
    }

    /// Unit rotation axis (the body-fixed ẑ).
    pub fn axis(&self) -> DVec3 {
        self.axis
    }

    pub fn angle_at(&self, time: f64) -> f64 {
        self.reference_angle + self.angular_frequency * time
    }

    /// Body-fixed equatorial basis `(x̂_b, ŷ_b)` at `time`, both
    /// orthogonal to the axis, rotating with the body.
    pub fn equatorial_basis_at(&self, time: f64) -> (DVec3, DVec3) {
        let k = self.axis;
        // A deterministic reference direction orthogonal to the axis.
        let seed = if k.z.abs() < 0.9 { DVec3::Z } else { DVec3::X };
        let x0 = seed.cross(k).normalize();
        let y0 = k.cross(x0);
        let (sin, cos) = self.angle_at(time).sin_cos();
        (x0 * cos + y0 * sin, y0 * cos - x0 * sin)
    }
}

/// Spherical-harmonic description of a body's departure from sphericity.
///
/// `zonal[i]` is the unnormalized coefficient J_{i+2}; the degree-2
/// sectoral pair is carried separately because it is the only tesseral
/// contribution retained in the force model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OblatenessField {
    reference_radius: f64,
    zonal: Vec<f64>,
    c22: f64,
    s22: f64,
}

impl OblatenessField {
    pub fn new(reference_radius: f64, zonal: Vec<f64>, c22: f64, s22: f64) -> Self {
        Self {
            reference_radius,
            zonal,
            c22,
            s22,
        }
    }

    /// A field with only the J2 zonal term.
    pub fn j2(reference_radius: f64, j2: f64) -> Self {
        Self::new(reference_radius, vec![j2], 0.0, 0.0)
    }

    pub fn reference_radius(&self) -> f64 {
        self.reference_radius
    }

    /// Zonal coefficients; `zonal()[i]` is J_{i+2}.
    pub fn zonal(&self) -> &[f64] {
        &self.zonal
    }

    pub fn c22(&self) -> f64 {
        self.c22
    }

    pub fn s22(&self) -> f64 {
        self.s22
    }
}

/// A massive body: gravitational parameter plus optional capabilities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Body {
    name: String,
    gravitational_parameter: f64,
    rotation: Option<Rotation>,
    field: Option<OblatenessField>,
}

impl Body {
    pub fn builder(name: impl Into<String>, gravitational_parameter: f64) -> BodyBuilder {
        BodyBuilder {
            name: name.into(),
            gravitational_parameter,
            rotation: None,
            field: None,
        }
    }

    /// A point mass with no rotation or field.
    pub fn point_mass(name: impl Into<String>, gravitational_parameter: f64) -> Self {
        Self::builder(name, gravitational_parameter).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// μ = G·M in m³/s².
    pub fn gravitational_parameter(&self) -> f64 {
        self.gravitational_parameter
    }

    pub fn rotation(&self) -> Option<&Rotation> {
        self.rotation.as_ref()
    }

    pub fn field(&self) -> Option<&OblatenessField> {
        self.field.as_ref()
    }
}

pub struct BodyBuilder {
    name: String,
    gravitational_parameter: f64,
    rotation: Option<Rotation>,
    field: Option<OblatenessField>,
}

impl BodyBuilder {
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn field(mut self, field: OblatenessField) -> Self {
        self.field = Some(field);
        self
    }

    /// Panics if a field was supplied without a rotation: the harmonics
    /// are meaningless without a body-fixed frame.
    pub fn build(self) -> Body {
        assert!(
            self.field.is_none() || self.rotation.is_some(),
            "an oblateness field requires a rotation"
        );
        Body {
            name: self.name,
            gravitational_parameter: self.gravitational_parameter,
            rotation: self.rotation,
            field: self.field,
        }
    }
}
