//! Shading parameter math
//!
//! Colour linearization and spot cone attenuation coefficients.

use glam::Vec3;

/// Smallest allowed `cos(inner) - cos(outer)` for spot cones.
pub const MIN_CONE_COS_DELTA: f32 = 0.001;

/// Convert one sRGB-encoded channel to linear.
pub fn gamma_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

/// Linear-space light colour: linearized authored colour times intensity.
pub fn linear_color(color: [f32; 3], intensity: f32) -> Vec3 {
    Vec3::new(
        gamma_to_linear(color[0]),
        gamma_to_linear(color[1]),
        gamma_to_linear(color[2]),
    ) * intensity
}

/// Angular attenuation `saturate(cos(angle) * scale + offset)` for spot lights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotAttenuation {
    pub angle_scale: f32,
    pub angle_offset: f32,
}

impl SpotAttenuation {
    /// Coefficients for a cone of `spot_angle` degrees (full aperture)
    /// whose inner cone spans `inner_percent` (0..=1) of the outer one.
    pub fn from_cone(spot_angle: f32, inner_percent: f32) -> Self {
        let half_angle = (spot_angle * 0.5).to_radians();
        let cos_outer = half_angle.cos().clamp(0.0, 1.0);
        let cos_inner = (half_angle * inner_percent.clamp(0.0, 1.0))
            .cos()
            .clamp(0.0, 1.0);

        let angle_scale = 1.0 / (cos_inner - cos_outer).max(MIN_CONE_COS_DELTA);
        Self {
            angle_scale,
            angle_offset: -cos_outer * angle_scale,
        }
    }

    /// Coefficients that leave light unattenuated (point and area lights).
    pub fn none() -> Self {
        Self {
            angle_scale: 0.0,
            angle_offset: 1.0,
        }
    }

    /// Attenuation for a direction at `cos_angle` to the spot axis.
    pub fn evaluate(&self, cos_angle: f32) -> f32 {
        (cos_angle * self.angle_scale + self.angle_offset).clamp(0.0, 1.0)
    }
}

/// `1 / range^2`, or zero for an unbounded range.
pub fn inv_sqr_attenuation_radius(range: f32) -> f32 {
    if range > 0.0 {
        1.0 / (range * range)
    } else {
        0.0
    }
}
