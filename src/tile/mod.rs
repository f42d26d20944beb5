//! Tiled and clustered light culling
//!
//! The screen is split into square tiles (and, in clustered mode, into
//! logarithmic view-depth slices). For every tile or cluster a fixed-size
//! record `[count, index0, index1, ...]` of `max_lights_per_tile + 1` words
//! lists the finite lights touching it. Indices address the punctual lights
//! first, then the area lights offset by the punctual count.
//!
//! The CPU side computes one screen-space [`LightBounds`] per finite light;
//! the compute kernels in `shaders/tile_lights.wgsl` intersect them with
//! the tiles. [`TileLightBuilder::build_cpu`] runs the same test on the CPU.

use glam::{Mat4, Vec2, Vec3};

use crate::command::{CommandSink, ComputeKernel, GlobalBuffer};
use crate::compute::compute_workgroup_count;
use crate::config::TileSettings;
use crate::error::Result;
use crate::light::{LightList, VisibleLight};

/// Threads per workgroup side in the tile kernels.
pub const TILE_WORKGROUP_SIZE: u32 = 8;

/// Camera data the tile build needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    /// World to view.
    pub view: Mat4,
    /// View to clip (perspective, depth in 0..1).
    pub projection: Mat4,
    /// Near plane distance.
    pub near: f32,
    /// Far plane distance.
    pub far: f32,
}

impl CameraParams {
    pub fn new(view: Mat4, projection: Mat4, near: f32, far: f32) -> Self {
        Self {
            view,
            projection,
            near,
            far,
        }
    }

    /// Right-handed perspective camera looking from `eye` at `target`.
    pub fn perspective(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::new(
            Mat4::look_at_rh(eye, target, Vec3::Y),
            Mat4::perspective_rh(fov_y, aspect, near, far),
            near,
            far,
        )
    }

    /// `(a, b)` with `1 / view_depth = depth * a + b` for a depth buffer value.
    pub fn depth_params(&self) -> [f32; 2] {
        let m22 = self.projection.z_axis.z;
        let m32 = self.projection.w_axis.z;
        if m32.abs() < f32::EPSILON {
            return [0.0, 1.0 / self.near.max(f32::EPSILON)];
        }
        [1.0 / m32, m22 / m32]
    }
}

/// Screen and depth extent of one finite light, for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightBounds {
    /// Lower-left corner in NDC.
    pub min_ndc: [f32; 2],
    /// Upper-right corner in NDC.
    pub max_ndc: [f32; 2],
    /// Nearest view depth (positive, may be below the near plane).
    pub min_depth: f32,
    /// Farthest view depth.
    pub max_depth: f32,
    /// Index into the combined punctual + area list.
    pub light_index: u32,
    pub _padding: u32,
}

impl LightBounds {
    /// Bounds covering the whole view frustum.
    pub fn full_screen(camera: &CameraParams, light_index: u32) -> Self {
        Self {
            min_ndc: [-1.0, -1.0],
            max_ndc: [1.0, 1.0],
            min_depth: 0.0,
            max_depth: camera.far,
            light_index,
            _padding: 0,
        }
    }

    /// Bounds of a light sphere, or `None` when it is outside the frustum's
    /// depth range or off screen.
    ///
    /// A non-positive radius means an unbounded light. Spheres crossing the
    /// near plane cover the full screen.
    pub fn from_sphere(
        center_ws: Vec3,
        radius: f32,
        camera: &CameraParams,
        light_index: u32,
    ) -> Option<Self> {
        if radius <= 0.0 {
            return Some(Self::full_screen(camera, light_index));
        }

        let center = camera.view.transform_point3(center_ws);
        let depth = -center.z;
        let (min_depth, max_depth) = (depth - radius, depth + radius);
        if max_depth < camera.near || min_depth > camera.far {
            return None;
        }
        if min_depth <= camera.near {
            return Some(Self {
                min_depth,
                max_depth,
                ..Self::full_screen(camera, light_index)
            });
        }

        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        for corner in 0..8u32 {
            let sign = |bit: u32| if corner & bit == 0 { -1.0 } else { 1.0 };
            let p = center + Vec3::new(sign(1), sign(2), sign(4)) * radius;
            let clip = camera.projection * p.extend(1.0);
            let ndc = Vec2::new(clip.x, clip.y) / clip.w;
            min = min.min(ndc);
            max = max.max(ndc);
        }
        let min = min.max(Vec2::NEG_ONE);
        let max = max.min(Vec2::ONE);
        if min.x > max.x || min.y > max.y {
            return None;
        }

        Some(Self {
            min_ndc: min.to_array(),
            max_ndc: max.to_array(),
            min_depth,
            max_depth,
            light_index,
            _padding: 0,
        })
    }

    /// Whether the bounds touch an NDC rectangle and a view-depth range.
    pub fn intersects(&self, min_ndc: Vec2, max_ndc: Vec2, near: f32, far: f32) -> bool {
        self.min_ndc[0] <= max_ndc.x
            && self.max_ndc[0] >= min_ndc.x
            && self.min_ndc[1] <= max_ndc.y
            && self.max_ndc[1] >= min_ndc.y
            && self.min_depth <= far
            && self.max_depth >= near
    }
}

/// Tile kernel parameters, for GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileParams {
    pub screen_size: [u32; 2],
    pub tile_count: [u32; 2],
    pub tile_size: u32,
    pub light_count: u32,
    /// Depth slices; 1 in tiled mode.
    pub cluster_slices: u32,
    pub max_lights_per_tile: u32,
    pub near: f32,
    pub far: f32,
    /// `slice = floor(ln(depth) * scale - bias)`.
    pub log_depth_scale: f32,
    pub log_depth_bias: f32,
    /// See [`CameraParams::depth_params`].
    pub depth_params: [f32; 2],
    pub _padding: [u32; 2],
}

/// Number of tiles covering a screen.
pub fn tile_count(screen_width: u32, screen_height: u32, tile_size: u32) -> (u32, u32) {
    (
        compute_workgroup_count(screen_width, tile_size),
        compute_workgroup_count(screen_height, tile_size),
    )
}

/// View-depth range `[start, end]` of a logarithmic cluster slice.
pub fn cluster_slice_range(slice: u32, slices: u32, near: f32, far: f32) -> (f32, f32) {
    let ratio = far / near;
    let at = |k: u32| near * ratio.powf(k as f32 / slices as f32);
    (at(slice), at(slice + 1))
}

/// Builds the per-tile (or per-cluster) light index lists.
pub struct TileLightBuilder {
    settings: TileSettings,
    max_lights: usize,
    screen_size: Option<(u32, u32)>,
    bounds: Vec<LightBounds>,
    params: TileParams,
    allocated: bool,
}

impl TileLightBuilder {
    /// Create a builder for at most `max_lights` finite lights.
    pub fn new(settings: TileSettings, max_lights: usize) -> Self {
        Self {
            settings,
            max_lights,
            screen_size: None,
            bounds: Vec::with_capacity(max_lights),
            params: TileParams::default(),
            allocated: false,
        }
    }

    pub fn settings(&self) -> &TileSettings {
        &self.settings
    }

    /// Depth slices per tile.
    pub fn depth_slices(&self) -> u32 {
        if self.settings.clustered {
            self.settings.cluster_depth_slices
        } else {
            1
        }
    }

    /// Tiles across the last seen screen size.
    pub fn tile_count(&self) -> (u32, u32) {
        self.screen_size
            .map_or((0, 0), |(w, h)| tile_count(w, h, self.settings.tile_size))
    }

    /// Total tile or cluster records.
    pub fn cell_count(&self) -> usize {
        let (x, y) = self.tile_count();
        x as usize * y as usize * self.depth_slices() as usize
    }

    /// Words per record.
    pub fn record_stride(&self) -> usize {
        self.settings.max_lights_per_tile as usize + 1
    }

    /// Bounds computed by the last [`prepare`](Self::prepare).
    pub fn bounds(&self) -> &[LightBounds] {
        &self.bounds
    }

    /// Parameters computed by the last [`prepare`](Self::prepare).
    pub fn params(&self) -> &TileParams {
        &self.params
    }

    /// Allocate the bounds and parameter buffers on first use.
    pub fn ensure_allocated(&mut self, sink: &mut dyn CommandSink) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        let bounds_size = (self.max_lights.max(1) * std::mem::size_of::<LightBounds>()) as u64;
        sink.allocate_buffer(GlobalBuffer::LightBounds, bounds_size)?;
        sink.allocate_buffer(
            GlobalBuffer::TileParams,
            std::mem::size_of::<TileParams>() as u64,
        )?;
        self.allocated = true;
        Ok(())
    }

    /// Reallocate the tile index buffer if the screen size changed.
    ///
    /// Returns whether a reallocation was recorded.
    pub fn resize_if_needed(
        &mut self,
        width: u32,
        height: u32,
        sink: &mut dyn CommandSink,
    ) -> Result<bool> {
        if self.screen_size == Some((width, height)) {
            return Ok(false);
        }
        let (tiles_x, tiles_y) = tile_count(width, height, self.settings.tile_size);
        let cells = tiles_x as u64 * tiles_y as u64 * self.depth_slices() as u64;
        let size = cells.max(1) * self.record_stride() as u64 * 4;
        sink.allocate_buffer(GlobalBuffer::TileLightIndices, size)?;
        self.screen_size = Some((width, height));
        tracing::info!(width, height, tiles_x, tiles_y, "resized tile light buffer");
        Ok(true)
    }

    /// Compute light bounds and kernel parameters for this frame.
    ///
    /// `lights` are the frame's visible lights; the list's cull indices map
    /// each record back to them. Returns the number of lights on screen.
    pub fn prepare(
        &mut self,
        camera: &CameraParams,
        list: &LightList,
        lights: &[VisibleLight],
    ) -> usize {
        self.bounds.clear();
        let punctual = list.punctual_cull_indices().iter();
        let area = list.area_cull_indices().iter();
        for (index, &cull_index) in punctual.chain(area).enumerate() {
            let Some(light) = lights.get(cull_index) else {
                continue;
            };
            if let Some(bounds) =
                LightBounds::from_sphere(light.position(), light.range, camera, index as u32)
            {
                self.bounds.push(bounds);
            }
        }

        let (width, height) = self.screen_size.unwrap_or((0, 0));
        let (tiles_x, tiles_y) = self.tile_count();
        let slices = self.depth_slices();
        let log_ratio = (camera.far / camera.near).ln();
        let log_depth_scale = slices as f32 / log_ratio;
        self.params = TileParams {
            screen_size: [width, height],
            tile_count: [tiles_x, tiles_y],
            tile_size: self.settings.tile_size,
            light_count: self.bounds.len() as u32,
            cluster_slices: slices,
            max_lights_per_tile: self.settings.max_lights_per_tile,
            near: camera.near,
            far: camera.far,
            log_depth_scale,
            log_depth_bias: camera.near.ln() * log_depth_scale,
            depth_params: camera.depth_params(),
            _padding: [0; 2],
        };
        tracing::trace!(
            lights = self.bounds.len(),
            finite = list.finite_light_count(),
            "light bounds prepared"
        );
        self.bounds.len()
    }

    /// Upload bounds and parameters and dispatch the list build.
    ///
    /// Records nothing for an empty screen.
    pub fn dispatch(&self, sink: &mut dyn CommandSink) -> bool {
        let (tiles_x, tiles_y) = self.tile_count();
        if tiles_x == 0 || tiles_y == 0 {
            return false;
        }
        sink.set_global_buffer(GlobalBuffer::LightBounds, bytemuck::cast_slice(&self.bounds));
        sink.set_global_buffer(GlobalBuffer::TileParams, bytemuck::bytes_of(&self.params));
        let (kernel, slices) = if self.settings.clustered {
            (ComputeKernel::BuildClusterLists, self.depth_slices())
        } else {
            (ComputeKernel::BuildTileLists, 1)
        };
        sink.dispatch_compute(kernel, [tiles_x, tiles_y, slices]);
        true
    }

    /// NDC rectangle of a tile, clipped to the screen.
    fn tile_rect(&self, tx: u32, ty: u32) -> (Vec2, Vec2) {
        let (w, h) = self.screen_size.unwrap_or((1, 1));
        let size = self.settings.tile_size;
        let x0 = (tx * size) as f32 / w as f32 * 2.0 - 1.0;
        let x1 = ((tx + 1) * size).min(w) as f32 / w as f32 * 2.0 - 1.0;
        let y_top = 1.0 - (ty * size) as f32 / h as f32 * 2.0;
        let y_bottom = 1.0 - ((ty + 1) * size).min(h) as f32 / h as f32 * 2.0;
        (Vec2::new(x0, y_bottom), Vec2::new(x1, y_top))
    }

    /// Build the tile index buffer on the CPU.
    ///
    /// In tiled mode `tile_depths` gives the view-depth range of each tile,
    /// row-major; without it every tile spans the full frustum. Clustered
    /// mode uses the slice ranges and ignores it. Lights are listed in
    /// index order.
    pub fn build_cpu(&self, tile_depths: Option<&[(f32, f32)]>) -> Vec<u32> {
        let (tiles_x, tiles_y) = self.tile_count();
        let slices = self.depth_slices();
        let stride = self.record_stride();
        let max = self.settings.max_lights_per_tile as usize;
        let (near, far) = (self.params.near, self.params.far);
        let mut out = vec![0u32; self.cell_count() * stride];

        for slice in 0..slices {
            for ty in 0..tiles_y {
                for tx in 0..tiles_x {
                    let tile = (ty * tiles_x + tx) as usize;
                    let (z0, z1) = if self.settings.clustered {
                        cluster_slice_range(slice, slices, near, far)
                    } else {
                        tile_depths
                            .and_then(|d| d.get(tile).copied())
                            .unwrap_or((near, far))
                    };
                    let (min, max_ndc) = self.tile_rect(tx, ty);

                    let cell = (slice * tiles_y * tiles_x) as usize + tile;
                    let record = &mut out[cell * stride..(cell + 1) * stride];
                    let mut count = 0;
                    for bounds in &self.bounds {
                        if count == max {
                            break;
                        }
                        if bounds.intersects(min, max_ndc, z0, z1) {
                            record[1 + count] = bounds.light_index;
                            count += 1;
                        }
                    }
                    record[0] = count as u32;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandList};
    use crate::config::LightCapacities;
    use crate::light::{LightData, LightType};

    fn camera() -> CameraParams {
        CameraParams::perspective(
            Vec3::ZERO,
            Vec3::NEG_Z,
            90f32.to_radians(),
            1.0,
            0.1,
            100.0,
        )
    }

    fn light_at(z: f32, range: f32) -> VisibleLight {
        VisibleLight::new(LightType::Point, Mat4::from_translation(Vec3::new(0.0, 0.0, z)))
            .with_range(range)
    }

    fn list_of(punctual: usize, area: usize) -> LightList {
        let mut list = LightList::with_capacities(LightCapacities::default());
        let zero: LightData = bytemuck::Zeroable::zeroed();
        for i in 0..punctual {
            list.push_punctual(zero, i);
        }
        for i in 0..area {
            list.push_area(zero, punctual + i);
        }
        list
    }

    fn builder(settings: TileSettings, width: u32, height: u32) -> TileLightBuilder {
        let mut builder = TileLightBuilder::new(settings, 640);
        builder
            .resize_if_needed(width, height, &mut CommandList::new())
            .unwrap();
        builder
    }

    fn cells_with(out: &[u32], stride: usize, light: u32) -> Vec<usize> {
        out.chunks(stride)
            .enumerate()
            .filter(|(_, r)| r[1..=r[0] as usize].contains(&light))
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_layouts() {
        assert_eq!(std::mem::size_of::<LightBounds>(), 32);
        assert_eq!(std::mem::size_of::<TileParams>(), 64);
    }

    #[test]
    fn test_tile_count_rounds_up() {
        assert_eq!(tile_count(1920, 1080, 16), (120, 68));
        assert_eq!(tile_count(64, 64, 16), (4, 4));
        assert_eq!(tile_count(0, 64, 16), (0, 4));
    }

    #[test]
    fn test_depth_params_recover_view_depth() {
        let camera = camera();
        let [a, b] = camera.depth_params();
        for depth in [0.5f32, 7.0, 60.0] {
            let clip = camera.projection * Vec3::new(0.0, 0.0, -depth).extend(1.0);
            let d = clip.z / clip.w;
            assert!((1.0 / (d * a + b) - depth).abs() < depth * 1e-3);
        }
    }

    #[test]
    fn test_sphere_bounds() {
        let camera = camera();
        let bounds = LightBounds::from_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0, &camera, 3).unwrap();
        assert!((bounds.max_ndc[0] - 1.0 / 9.0).abs() < 1e-4);
        assert!((bounds.min_ndc[1] + 1.0 / 9.0).abs() < 1e-4);
        assert_eq!((bounds.min_depth, bounds.max_depth), (9.0, 11.0));
        assert_eq!(bounds.light_index, 3);

        // Crossing the near plane covers the screen.
        let close = LightBounds::from_sphere(Vec3::new(0.0, 0.0, -0.5), 1.0, &camera, 0).unwrap();
        assert_eq!(close.min_ndc, [-1.0, -1.0]);
        assert_eq!(close.max_ndc, [1.0, 1.0]);

        assert!(LightBounds::from_sphere(Vec3::new(0.0, 0.0, 5.0), 1.0, &camera, 0).is_none());
        assert!(LightBounds::from_sphere(Vec3::new(50.0, 0.0, -10.0), 1.0, &camera, 0).is_none());
    }

    #[test]
    fn test_resize_only_on_size_change() {
        let mut builder = TileLightBuilder::new(TileSettings::default(), 16);
        let mut list = CommandList::new();
        assert!(builder.resize_if_needed(64, 32, &mut list).unwrap());
        assert!(!builder.resize_if_needed(64, 32, &mut list).unwrap());
        assert!(builder.resize_if_needed(80, 32, &mut list).unwrap());
        assert_eq!(list.len(), 2);
        assert_eq!(
            list.commands()[0],
            Command::AllocateBuffer {
                buffer: GlobalBuffer::TileLightIndices,
                size: 4 * 2 * 64 * 4,
            }
        );
    }

    #[test]
    fn test_resize_error_propagates() {
        let mut builder = TileLightBuilder::new(TileSettings::default(), 16);
        let mut list = CommandList::with_limits(crate::command::ResourceLimits {
            max_buffer_size: 1024,
            ..Default::default()
        });
        assert!(builder.resize_if_needed(1920, 1080, &mut list).is_err());
        assert_eq!(builder.tile_count(), (0, 0));
    }

    #[test]
    fn test_tiled_build_marks_covered_tiles() {
        let lights = vec![light_at(-10.0, 1.0), light_at(-0.5, 1.0)];
        let list = list_of(2, 0);
        let mut builder = builder(TileSettings::default(), 64, 64);
        assert_eq!(builder.prepare(&camera(), &list, &lights), 2);

        let out = builder.build_cpu(None);
        let stride = builder.record_stride();
        assert_eq!(out.len(), 16 * stride);
        assert_eq!(cells_with(&out, stride, 0), vec![5, 6, 9, 10]);
        assert_eq!(cells_with(&out, stride, 1).len(), 16);
    }

    #[test]
    fn test_tile_depth_range_rejects_lights() {
        let lights = vec![light_at(-10.0, 1.0)];
        let list = list_of(1, 0);
        let mut builder = builder(TileSettings::default(), 64, 64);
        builder.prepare(&camera(), &list, &lights);

        let mut depths = vec![(0.1, 100.0); 16];
        depths[5] = (0.1, 5.0);
        let out = builder.build_cpu(Some(&depths));
        assert_eq!(cells_with(&out, builder.record_stride(), 0), vec![6, 9, 10]);
    }

    #[test]
    fn test_area_indices_follow_punctual() {
        let lights = vec![light_at(-10.0, 1.0), light_at(-10.0, 1.0)];
        let list = list_of(1, 1);
        let mut builder = builder(TileSettings::default(), 64, 64);
        builder.prepare(&camera(), &list, &lights);

        let out = builder.build_cpu(None);
        let stride = builder.record_stride();
        let center = &out[5 * stride..6 * stride];
        assert_eq!(&center[..3], &[2, 0, 1]);
    }

    #[test]
    fn test_records_saturate_at_max_lights() {
        let lights: Vec<_> = (0..4).map(|_| light_at(-0.5, 1.0)).collect();
        let list = list_of(4, 0);
        let settings = TileSettings {
            max_lights_per_tile: 2,
            ..Default::default()
        };
        let mut builder = builder(settings, 32, 32);
        builder.prepare(&camera(), &list, &lights);

        let out = builder.build_cpu(None);
        assert_eq!(builder.record_stride(), 3);
        assert!(out.chunks(3).all(|r| r == [2, 0, 1]));
    }

    #[test]
    fn test_clustered_build_uses_log_slices() {
        let lights = vec![light_at(-10.0, 1.0)];
        let list = list_of(1, 0);
        let settings = TileSettings {
            clustered: true,
            ..Default::default()
        };
        let mut builder = builder(settings, 64, 64);
        builder.prepare(&camera(), &list, &lights);
        assert_eq!(builder.cell_count(), 16 * 16);

        let out = builder.build_cpu(None);
        let cells = cells_with(&out, builder.record_stride(), 0);
        assert_eq!(cells, vec![165, 166, 169, 170]);
        assert!(cells.iter().all(|c| c / 16 == 10));

        let (z0, z1) = cluster_slice_range(10, 16, 0.1, 100.0);
        let params = builder.params();
        for z in [z0 + 1e-3, z1 - 1e-3] {
            let slice = (z.ln() * params.log_depth_scale - params.log_depth_bias).floor();
            assert_eq!(slice, 10.0);
        }
    }

    #[test]
    fn test_dispatch_records_upload_and_kernel() {
        let lights = vec![light_at(-10.0, 1.0)];
        let list = list_of(1, 0);
        let mut builder = builder(
            TileSettings {
                clustered: true,
                cluster_depth_slices: 8,
                ..Default::default()
            },
            100,
            50,
        );
        builder.prepare(&camera(), &list, &lights);

        let mut commands = CommandList::new();
        assert!(builder.dispatch(&mut commands));
        assert_eq!(
            commands.commands().last(),
            Some(&Command::DispatchCompute {
                kernel: ComputeKernel::BuildClusterLists,
                groups: [7, 4, 8],
            })
        );
        assert_eq!(
            commands.last_upload(GlobalBuffer::LightBounds).map(<[u8]>::len),
            Some(32)
        );
    }

    #[test]
    fn test_dispatch_skips_empty_screen() {
        let mut builder = builder(TileSettings::default(), 0, 0);
        builder.prepare(&camera(), &list_of(0, 0), &[]);
        let mut commands = CommandList::new();
        assert!(!builder.dispatch(&mut commands));
        assert!(commands.is_empty());
    }
}
