//! GPU light records
//!
//! Layouts match the structs declared in the shading and tile shaders; every
//! record is a multiple of 16 bytes so arrays of them are valid storage
//! buffer contents.

use glam::Vec3;

/// Shader-side light type tag.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuLightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
    Rectangle = 3,
    Line = 4,
}

impl GpuLightType {
    /// Whether the type goes into the area light list.
    pub fn is_area(self) -> bool {
        matches!(self, Self::Rectangle | Self::Line)
    }
}

/// Sentinel for "no shadow" / "no cookie" indices.
pub const INVALID_INDEX: i32 = -1;

/// Punctual or area light data for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightData {
    /// World position.
    pub position_ws: [f32; 3],
    /// `1 / range^2`.
    pub inv_sqr_attenuation_radius: f32,
    /// Linear colour times intensity.
    pub color: [f32; 3],
    /// Spot cone scale.
    pub angle_scale: f32,
    /// Light forward axis.
    pub forward: [f32; 3],
    /// Spot cone offset.
    pub angle_offset: f32,
    /// Light up axis.
    pub up: [f32; 3],
    /// 1 if the light affects diffuse, else 0.
    pub diffuse_scale: f32,
    /// Light right axis.
    pub right: [f32; 3],
    /// 1 if the light affects specular, else 0.
    pub specular_scale: f32,
    /// Shadow strength.
    pub shadow_dimmer: f32,
    /// `ShadowData` slot of the light's first shadow request (a point light
    /// owns six consecutive slots), or -1. Not a count of shadowed lights.
    pub shadow_index: i32,
    /// Cookie array slice, or -1.
    pub cookie_index: i32,
    /// [`GpuLightType`] value.
    pub light_type: u32,
    /// Area light width and height (line lights use x as length).
    pub size: [f32; 2],
    /// 1 for two-sided area lights.
    pub two_sided: u32,
    pub _padding: u32,
}

impl LightData {
    /// Light type tag.
    pub fn gpu_light_type(&self) -> Option<GpuLightType> {
        match self.light_type {
            0 => Some(GpuLightType::Directional),
            1 => Some(GpuLightType::Point),
            2 => Some(GpuLightType::Spot),
            3 => Some(GpuLightType::Rectangle),
            4 => Some(GpuLightType::Line),
            _ => None,
        }
    }

    /// World position as a vector.
    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position_ws)
    }
}

/// Directional light data for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DirectionalLightData {
    pub forward: [f32; 3],
    pub diffuse_scale: f32,
    pub up: [f32; 3],
    pub specular_scale: f32,
    pub right: [f32; 3],
    /// `CascadeShadowData` slot of the light's first cascade, or -1.
    pub shadow_index: i32,
    pub color: [f32; 3],
    /// Cookie array slice, or -1.
    pub cookie_index: i32,
    pub shadow_dimmer: f32,
    pub _padding: [f32; 3],
}

/// Reflection probe shape.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvShape {
    Box = 0,
    Sphere = 1,
}

/// Reflection probe data for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EnvLightData {
    pub position_ws: [f32; 3],
    /// [`EnvShape`] value.
    pub env_shape: u32,
    pub forward: [f32; 3],
    /// Reflection array slice.
    pub env_index: i32,
    pub up: [f32; 3],
    /// Blend distance after clamping to the probe extents.
    pub blend_distance: f32,
    pub right: [f32; 3],
    pub _padding0: f32,
    /// Extents of the fully weighted inner volume (x = radius for spheres).
    pub inner_distance: [f32; 3],
    pub _padding1: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_data_layout() {
        assert_eq!(std::mem::size_of::<LightData>(), 112);
        assert_eq!(std::mem::size_of::<LightData>() % 16, 0);
    }

    #[test]
    fn test_directional_light_data_layout() {
        assert_eq!(std::mem::size_of::<DirectionalLightData>(), 80);
    }

    #[test]
    fn test_env_light_data_layout() {
        assert_eq!(std::mem::size_of::<EnvLightData>(), 80);
    }

    #[test]
    fn test_light_type_round_trip() {
        let mut data: LightData = bytemuck::Zeroable::zeroed();
        data.light_type = GpuLightType::Line as u32;
        assert_eq!(data.gpu_light_type(), Some(GpuLightType::Line));
        data.light_type = 42;
        assert_eq!(data.gpu_light_type(), None);
        assert!(GpuLightType::Rectangle.is_area());
        assert!(!GpuLightType::Spot.is_area());
    }
}
