//! Light types
//!
//! Per-frame inputs from the host's culling ([`VisibleLight`],
//! [`VisibleReflectionProbe`]) and the GPU light list built from them.

mod builder;
mod gpu;
mod list;
pub mod shading;

pub use builder::{LightListBuilder, LightListStats};
pub use gpu::{
    DirectionalLightData, EnvLightData, EnvShape, GpuLightType, LightData, INVALID_INDEX,
};
pub use list::LightList;

use glam::{Mat4, Vec3};

use crate::texture_cache::TextureHandle;

/// Light type as authored on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Directional,
    Point,
    Spot,
    Area,
}

/// Shape override carried in the auxiliary light data.
///
/// Point and spot lights with an area archetype are shaded as area lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightArchetype {
    #[default]
    Punctual,
    Rectangle,
    Line,
}

/// Shadow filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadowMode {
    #[default]
    None,
    Hard,
    Soft,
}

/// Per-light settings that live next to the host light component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdditionalLightData {
    /// Shape override.
    pub archetype: LightArchetype,
    /// Contribute to diffuse lighting.
    pub affect_diffuse: bool,
    /// Contribute to specular lighting.
    pub affect_specular: bool,
    /// Shadow strength in 0..=1.
    pub shadow_dimmer: f32,
    /// Inner spot cone as a fraction of the outer cone.
    pub inner_spot_percent: f32,
    /// Area light width (line length for line lights).
    pub area_width: f32,
    /// Area light height.
    pub area_height: f32,
    /// Emit from both faces of an area light.
    pub two_sided: bool,
    /// Requested shadow map resolution per slice.
    pub shadow_resolution: u32,
}

impl Default for AdditionalLightData {
    fn default() -> Self {
        Self {
            archetype: LightArchetype::Punctual,
            affect_diffuse: true,
            affect_specular: true,
            shadow_dimmer: 1.0,
            inner_spot_percent: 0.0,
            area_width: 0.5,
            area_height: 0.5,
            two_sided: false,
            shadow_resolution: 512,
        }
    }
}

/// A light that survived the host's visibility culling this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleLight {
    /// Authored type.
    pub light_type: LightType,
    /// Columns: right, up, forward, position.
    pub local_to_world: Mat4,
    /// Attenuation range.
    pub range: f32,
    /// Authored (sRGB) colour.
    pub color: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
    /// Full spot aperture in degrees.
    pub spot_angle: f32,
    /// Cookie texture.
    pub cookie: Option<TextureHandle>,
    /// Shadow mode; `None` disables shadows.
    pub shadows: ShadowMode,
    /// Depth bias, or `None` for the configured default.
    pub shadow_bias: Option<f32>,
    /// Normal bias, or `None` for the configured default.
    pub shadow_normal_bias: Option<f32>,
    /// Auxiliary settings. Lights without them are skipped.
    pub additional: Option<AdditionalLightData>,
}

impl VisibleLight {
    /// A light of `light_type` at `local_to_world` with default settings.
    pub fn new(light_type: LightType, local_to_world: Mat4) -> Self {
        Self {
            light_type,
            local_to_world,
            range: 10.0,
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            spot_angle: 30.0,
            cookie: None,
            shadows: ShadowMode::None,
            shadow_bias: None,
            shadow_normal_bias: None,
            additional: Some(AdditionalLightData::default()),
        }
    }

    /// World position.
    pub fn position(&self) -> Vec3 {
        self.local_to_world.w_axis.truncate()
    }

    /// Forward axis (normalized).
    pub fn forward(&self) -> Vec3 {
        self.local_to_world.z_axis.truncate().normalize_or_zero()
    }

    /// Up axis (normalized).
    pub fn up(&self) -> Vec3 {
        self.local_to_world.y_axis.truncate().normalize_or_zero()
    }

    /// Right axis (normalized).
    pub fn right(&self) -> Vec3 {
        self.local_to_world.x_axis.truncate().normalize_or_zero()
    }

    /// Whether the light wants shadow maps.
    pub fn casts_shadows(&self) -> bool {
        self.shadows != ShadowMode::None
    }

    /// Shader light type after applying the archetype override.
    pub fn gpu_light_type(&self) -> GpuLightType {
        let archetype = self
            .additional
            .map(|a| a.archetype)
            .unwrap_or_default();
        match (self.light_type, archetype) {
            (LightType::Directional, _) => GpuLightType::Directional,
            (_, LightArchetype::Line) => GpuLightType::Line,
            (_, LightArchetype::Rectangle) | (LightType::Area, _) => GpuLightType::Rectangle,
            (LightType::Point, LightArchetype::Punctual) => GpuLightType::Point,
            (LightType::Spot, LightArchetype::Punctual) => GpuLightType::Spot,
        }
    }

    /// Set the colour and intensity.
    pub fn with_color(mut self, color: [f32; 3], intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    /// Set the range.
    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range;
        self
    }

    /// Set the spot aperture in degrees.
    pub fn with_spot_angle(mut self, spot_angle: f32) -> Self {
        self.spot_angle = spot_angle;
        self
    }

    /// Set the shadow mode.
    pub fn with_shadows(mut self, shadows: ShadowMode) -> Self {
        self.shadows = shadows;
        self
    }

    /// Set the cookie texture.
    pub fn with_cookie(mut self, cookie: TextureHandle) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Replace the auxiliary settings.
    pub fn with_additional(mut self, additional: Option<AdditionalLightData>) -> Self {
        self.additional = additional;
        self
    }
}

/// Reflection probe influence shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProbeShape {
    #[default]
    Box,
    Sphere,
}

/// A reflection probe that survived visibility culling this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleReflectionProbe {
    /// Columns: right, up, forward, position.
    pub local_to_world: Mat4,
    /// Box half extents; `x` is the radius for spheres.
    pub extents: Vec3,
    /// Captured cubemap, if baked or rendered.
    pub texture: Option<TextureHandle>,
    /// Authored blend distance.
    pub blend_distance: f32,
    /// Influence shape.
    pub shape: ProbeShape,
}

impl VisibleReflectionProbe {
    /// Blend distance and inner fully-weighted extents after clamping the
    /// blend inward so it never exceeds the smallest extent.
    pub fn influence(&self) -> (f32, Vec3) {
        let blend = self.blend_distance.max(0.0);
        match self.shape {
            ProbeShape::Box => {
                let extents = self.extents.max(Vec3::ZERO);
                let blend = blend.min(extents.min_element());
                (blend, extents - Vec3::splat(blend))
            }
            ProbeShape::Sphere => {
                let radius = self.extents.x.max(0.0);
                let blend = blend.min(radius);
                (blend, Vec3::new(radius - blend, 0.0, 0.0))
            }
        }
    }
}
