//! Shadow mapping module
//!
//! Shadow requests are packed into two depth atlases: a resizable general
//! atlas for punctual lights and a fixed cascade atlas for directional
//! lights. After layout every accepted request gets a GPU [`ShadowData`]
//! record whose index is the shadow index lights reference.

mod atlas;
mod manager;

pub use atlas::{AtlasOverflow, LayoutStatus, ShadowAtlas, Viewport};
pub use manager::{ShadowLayoutOutcome, ShadowManager};

use std::collections::HashMap;

use glam::{Mat4, UVec2, Vec3, Vec4};

/// Which atlas a request lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowRequestKind {
    /// Spot map or point cube face, packed in the general atlas.
    Punctual,
    /// Directional cascade, packed in the cascade atlas.
    Cascade,
}

/// One shadow map draw requested for a light.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowRequest {
    /// Index of the light in the frame's visible light list.
    pub light_index: usize,
    /// Cube face or cascade index.
    pub slice: u32,
    /// Atlas routing.
    pub kind: ShadowRequestKind,
    /// World to light view.
    pub view: Mat4,
    /// Light view to clip.
    pub projection: Mat4,
    /// Desired viewport size in texels.
    pub resolution: UVec2,
    /// Whether layout may shrink this request to make everything fit.
    pub allow_resize: bool,
    /// Depth bias.
    pub depth_bias: f32,
    /// Normal offset bias.
    pub normal_bias: f32,
    /// Cascade culling sphere (xyz = center, w = radius); zero for punctual.
    pub split_sphere: Vec4,
    atlas_viewport: Option<Viewport>,
}

impl ShadowRequest {
    /// Request a square punctual shadow map (spot map or one cube face).
    pub fn punctual(
        light_index: usize,
        slice: u32,
        view: Mat4,
        projection: Mat4,
        resolution: u32,
    ) -> Self {
        Self {
            light_index,
            slice,
            kind: ShadowRequestKind::Punctual,
            view,
            projection,
            resolution: UVec2::splat(resolution),
            allow_resize: true,
            depth_bias: 0.0,
            normal_bias: 0.0,
            split_sphere: Vec4::ZERO,
            atlas_viewport: None,
        }
    }

    /// Request one cascade of a directional light.
    pub fn cascade(
        light_index: usize,
        cascade: u32,
        view: Mat4,
        projection: Mat4,
        resolution: u32,
        split_sphere: Vec4,
    ) -> Self {
        Self {
            light_index,
            slice: cascade,
            kind: ShadowRequestKind::Cascade,
            view,
            projection,
            resolution: UVec2::splat(resolution),
            allow_resize: false,
            depth_bias: 0.0,
            normal_bias: 0.0,
            split_sphere,
            atlas_viewport: None,
        }
    }

    /// Set depth and normal bias.
    pub fn with_bias(mut self, depth_bias: f32, normal_bias: f32) -> Self {
        self.depth_bias = depth_bias;
        self.normal_bias = normal_bias;
        self
    }

    /// Placement in the atlas. `None` until layout has placed the request.
    pub fn atlas_viewport(&self) -> Option<Viewport> {
        self.atlas_viewport
    }

    pub(crate) fn set_atlas_viewport(&mut self, viewport: Option<Viewport>) {
        self.atlas_viewport = viewport;
    }

    /// World to light clip space.
    pub fn world_to_shadow(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World-space direction the light's view looks along.
    pub fn view_forward(&self) -> Vec3 {
        let forward = -self.view.inverse().z_axis.truncate();
        forward.normalize_or_zero()
    }
}

/// One shadow slice as produced by the host's shadow culling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSlice {
    /// World to light view.
    pub view: Mat4,
    /// Light view to clip.
    pub projection: Mat4,
    /// Cascade culling sphere; ignored for punctual lights.
    pub split_sphere: Vec4,
}

/// Host query for the shadow slices of visible lights.
pub trait ShadowSliceSource {
    /// Number of slices (cascades or cube faces) the light needs.
    fn shadow_slice_count(&self, light_index: usize) -> u32;

    /// Matrices for one slice, or `None` if culling produced nothing for it.
    fn shadow_slice(&self, light_index: usize, slice: u32) -> Option<ShadowSlice>;
}

/// [`ShadowSliceSource`] over slices computed ahead of time.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedShadowSlices {
    slices: HashMap<usize, Vec<ShadowSlice>>,
}

impl PrecomputedShadowSlices {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the slices of a light, replacing any previous ones.
    pub fn insert(&mut self, light_index: usize, slices: Vec<ShadowSlice>) {
        self.slices.insert(light_index, slices);
    }

    /// Drop all slices.
    pub fn clear(&mut self) {
        self.slices.clear();
    }
}

impl ShadowSliceSource for PrecomputedShadowSlices {
    fn shadow_slice_count(&self, light_index: usize) -> u32 {
        self.slices
            .get(&light_index)
            .map_or(0, |slices| slices.len() as u32)
    }

    fn shadow_slice(&self, light_index: usize, slice: u32) -> Option<ShadowSlice> {
        self.slices
            .get(&light_index)
            .and_then(|slices| slices.get(slice as usize))
            .copied()
    }
}

/// Per-request shadow data for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowData {
    /// World to light clip space.
    pub world_to_shadow: [[f32; 4]; 4],
    /// Viewport in atlas UV space (scale.xy, offset.xy).
    pub scale_offset: [f32; 4],
    /// Viewport size in texels (w, h, 1/w, 1/h).
    pub texture_size: [f32; 4],
    /// Depth bias, normal bias, atlas-placed flag, unused.
    pub bias: [f32; 4],
}

impl ShadowData {
    /// Build the record for a placed request.
    pub fn new(request: &ShadowRequest, viewport: Viewport, atlas_size: UVec2) -> Self {
        let atlas = atlas_size.as_vec2();
        let w = viewport.width as f32;
        let h = viewport.height as f32;
        Self {
            world_to_shadow: request.world_to_shadow().to_cols_array_2d(),
            scale_offset: [
                w / atlas.x,
                h / atlas.y,
                viewport.x as f32 / atlas.x,
                viewport.y as f32 / atlas.y,
            ],
            texture_size: [w, h, 1.0 / w, 1.0 / h],
            bias: [request.depth_bias, request.normal_bias, 1.0, 0.0],
        }
    }

    /// Record for a request layout could not place. Shaders treat it as unshadowed.
    pub fn unplaced(request: &ShadowRequest) -> Self {
        Self {
            world_to_shadow: request.world_to_shadow().to_cols_array_2d(),
            scale_offset: [0.0; 4],
            texture_size: [0.0; 4],
            bias: [request.depth_bias, request.normal_bias, 0.0, 0.0],
        }
    }

    /// Whether the record points at a valid atlas region.
    pub fn is_placed(&self) -> bool {
        self.bias[2] > 0.5
    }

    /// Recover the atlas viewport from the UV scale/offset.
    pub fn atlas_viewport(&self, atlas_size: UVec2) -> Viewport {
        let atlas = atlas_size.as_vec2();
        Viewport {
            x: (self.scale_offset[2] * atlas.x).round() as u32,
            y: (self.scale_offset[3] * atlas.y).round() as u32,
            width: (self.scale_offset[0] * atlas.x).round() as u32,
            height: (self.scale_offset[1] * atlas.y).round() as u32,
        }
    }
}

/// Maximum cascades a directional shadow record holds.
pub const MAX_CASCADES: usize = 4;

/// Cascaded shadow data for one directional light.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DirectionalShadowData {
    /// Cascade culling spheres (xyz = center, w = radius squared).
    pub sphere_cascades: [[f32; 4]; MAX_CASCADES],
    /// Light direction (xyz), w unused.
    pub cascade_direction: [f32; 4],
    /// Number of valid cascades.
    pub cascade_count: u32,
    /// Index of the first cascade in the cascade shadow data array.
    pub first_cascade: u32,
    pub _padding: [u32; 2],
}

impl DirectionalShadowData {
    /// Merge the cascades of one light into a single record.
    ///
    /// `cascades` must be the light's cascade requests in cascade order and
    /// `first_cascade` the index of the first of them in the cascade atlas.
    pub fn from_cascades(cascades: &[ShadowRequest], first_cascade: u32) -> Self {
        let mut sphere_cascades = [[0.0; 4]; MAX_CASCADES];
        for (dst, request) in sphere_cascades.iter_mut().zip(cascades) {
            let sphere = request.split_sphere;
            *dst = [sphere.x, sphere.y, sphere.z, sphere.w * sphere.w];
        }

        let direction = cascades
            .first()
            .map_or(Vec3::ZERO, ShadowRequest::view_forward);

        Self {
            sphere_cascades,
            cascade_direction: [direction.x, direction.y, direction.z, 0.0],
            cascade_count: cascades.len().min(MAX_CASCADES) as u32,
            first_cascade,
            _padding: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot_request(resolution: u32) -> ShadowRequest {
        ShadowRequest::punctual(
            0,
            0,
            Mat4::look_at_rh(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO, Vec3::Z),
            Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 20.0),
            resolution,
        )
    }

    #[test]
    fn test_shadow_data_layout() {
        assert_eq!(std::mem::size_of::<ShadowData>(), 112);
        assert_eq!(std::mem::size_of::<ShadowData>() % 16, 0);
    }

    #[test]
    fn test_directional_shadow_data_layout() {
        assert_eq!(std::mem::size_of::<DirectionalShadowData>(), 96);
        assert_eq!(std::mem::size_of::<DirectionalShadowData>() % 16, 0);
    }

    #[test]
    fn test_shadow_data_round_trips_viewport() {
        let atlas = UVec2::new(4096, 2048);
        let viewport = Viewport {
            x: 1536,
            y: 512,
            width: 512,
            height: 256,
        };
        let data = ShadowData::new(&spot_request(512), viewport, atlas);
        assert!(data.is_placed());
        assert_eq!(data.atlas_viewport(atlas), viewport);
        assert_eq!(data.texture_size[0], 512.0);
        assert!((data.texture_size[3] - 1.0 / 256.0).abs() < 1e-9);
    }

    #[test]
    fn test_unplaced_shadow_data() {
        let data = ShadowData::unplaced(&spot_request(512));
        assert!(!data.is_placed());
        assert_eq!(data.scale_offset, [0.0; 4]);
    }

    #[test]
    fn test_request_defaults() {
        let punctual = spot_request(256);
        assert!(punctual.allow_resize);
        assert_eq!(punctual.atlas_viewport(), None);

        let cascade = ShadowRequest::cascade(1, 2, Mat4::IDENTITY, Mat4::IDENTITY, 1024, Vec4::ONE);
        assert!(!cascade.allow_resize);
        assert_eq!(cascade.kind, ShadowRequestKind::Cascade);
        assert_eq!(cascade.resolution, UVec2::splat(1024));
    }

    #[test]
    fn test_view_forward() {
        let request = spot_request(256);
        let forward = request.view_forward();
        assert!((forward - Vec3::NEG_Y).length() < 1e-5);
    }

    #[test]
    fn test_directional_data_merges_cascades() {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::new(0.0, -1.0, -1.0), Vec3::Y);
        let cascades: Vec<_> = (0..3)
            .map(|i| {
                ShadowRequest::cascade(
                    0,
                    i,
                    view,
                    Mat4::IDENTITY,
                    1024,
                    Vec4::new(0.0, 0.0, -(i as f32) * 10.0, 5.0 + i as f32),
                )
            })
            .collect();

        let data = DirectionalShadowData::from_cascades(&cascades, 4);
        assert_eq!(data.cascade_count, 3);
        assert_eq!(data.first_cascade, 4);
        assert_eq!(data.sphere_cascades[1], [0.0, 0.0, -10.0, 36.0]);
        assert_eq!(data.sphere_cascades[3], [0.0; 4]);
        let dir = Vec3::from_slice(&data.cascade_direction[..3]);
        assert!((dir - Vec3::new(0.0, -1.0, -1.0).normalize()).length() < 1e-5);
    }

    #[test]
    fn test_precomputed_slices() {
        let mut slices = PrecomputedShadowSlices::new();
        let slice = ShadowSlice {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            split_sphere: Vec4::ZERO,
        };
        slices.insert(3, vec![slice; 6]);
        assert_eq!(slices.shadow_slice_count(3), 6);
        assert_eq!(slices.shadow_slice_count(0), 0);
        assert!(slices.shadow_slice(3, 5).is_some());
        assert!(slices.shadow_slice(3, 6).is_none());
    }
}
