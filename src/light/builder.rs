//! Light list construction
//!
//! Runs in two phases around shadow layout:
//!
//! 1. [`LightListBuilder::prepare_shadow_requests`] walks the visible lights
//!    with the same classification and capacity rules as the list build and
//!    submits shadow requests for the lights that will end up in the list.
//! 2. After [`ShadowManager::process_shadow_requests`],
//!    [`LightListBuilder::build`] fills the [`LightList`] with GPU records
//!    carrying the shadow indices the requests were given.

use glam::Vec3;

use super::shading::{inv_sqr_attenuation_radius, linear_color, SpotAttenuation};
use super::{
    AdditionalLightData, DirectionalLightData, EnvLightData, EnvShape, GpuLightType, LightData,
    LightList, ProbeShape, VisibleLight, VisibleReflectionProbe, INVALID_INDEX,
};
use crate::config::{LightCapacities, ShadowSettings};
use crate::shadow::{ShadowManager, ShadowRequest, ShadowRequestKind, ShadowSliceSource};
use crate::texture_cache::{LightTextureCaches, TextureHandle};

/// Shadow slices a point light needs, one per cube face.
pub const POINT_LIGHT_SHADOW_SLICES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Directional,
    Punctual,
    Area,
}

impl Category {
    fn of(light_type: GpuLightType) -> Self {
        match light_type {
            GpuLightType::Directional => Self::Directional,
            GpuLightType::Point | GpuLightType::Spot => Self::Punctual,
            GpuLightType::Rectangle | GpuLightType::Line => Self::Area,
        }
    }

    fn capacity(self, capacities: &LightCapacities) -> usize {
        match self {
            Self::Directional => capacities.max_directional_lights,
            Self::Punctual => capacities.max_punctual_lights,
            Self::Area => capacities.max_area_lights,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Directional => "directional",
            Self::Punctual => "punctual",
            Self::Area => "area",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShadowAssignment {
    kind: ShadowRequestKind,
    first: usize,
    count: usize,
}

/// Counts from the last [`LightListBuilder::build`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightListStats {
    pub directional: usize,
    pub punctual: usize,
    pub area: usize,
    pub env: usize,
    /// Lights and probes dropped because their category was full.
    pub dropped_over_capacity: usize,
    /// Lights without auxiliary data.
    pub skipped_missing_data: usize,
    /// Shadow-casting lights that got a shadow index.
    pub shadowed: usize,
    /// Shadow-casting lights left unshadowed (budget, culling or packing).
    pub unshadowed: usize,
    /// Cookies or probe textures the caches had no slice for.
    pub texture_cache_misses: usize,
}

/// Builds the frame's [`LightList`] from the visible lights and probes.
pub struct LightListBuilder {
    list: LightList,
    assignments: Vec<Option<ShadowAssignment>>,
    stats: LightListStats,
}

impl LightListBuilder {
    pub fn new(capacities: LightCapacities) -> Self {
        Self {
            list: LightList::with_capacities(capacities),
            assignments: Vec::new(),
            stats: LightListStats::default(),
        }
    }

    /// The list filled by the last build.
    pub fn list(&self) -> &LightList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut LightList {
        &mut self.list
    }

    /// Counts from the last build.
    pub fn stats(&self) -> LightListStats {
        self.stats
    }

    /// Submit shadow requests for every shadow-casting light that will make
    /// it into the list.
    ///
    /// Point lights need all 6 cube faces, spot lights one map, directional
    /// lights one request per cascade. A light whose slices do not all fit
    /// the per-category budget or the manager's request budget gets none.
    /// Returns the number of lights that were given shadow requests.
    pub fn prepare_shadow_requests(
        &mut self,
        lights: &[VisibleLight],
        slices: &dyn ShadowSliceSource,
        shadows: &mut ShadowManager,
    ) -> usize {
        self.assignments.clear();
        self.assignments.resize(lights.len(), None);

        let settings = *shadows.settings();
        let capacities = *self.list.capacities();
        let mut admitted = [0usize; 3];
        let mut punctual_slices = 0usize;
        let mut directional_shadows = 0usize;
        let mut accepted = 0;

        for (index, light) in lights.iter().enumerate() {
            let Some(additional) = light.additional else {
                continue;
            };
            let light_type = light.gpu_light_type();
            let category = Category::of(light_type);
            let slot = &mut admitted[category as usize];
            if *slot >= category.capacity(&capacities) {
                continue;
            }
            *slot += 1;
            if !light.casts_shadows() {
                continue;
            }

            let available = slices.shadow_slice_count(index);
            let (kind, count) = match light_type {
                GpuLightType::Directional => (
                    ShadowRequestKind::Cascade,
                    available.min(settings.max_cascades),
                ),
                GpuLightType::Point => (ShadowRequestKind::Punctual, POINT_LIGHT_SHADOW_SLICES),
                GpuLightType::Spot => (ShadowRequestKind::Punctual, 1),
                GpuLightType::Rectangle | GpuLightType::Line => continue,
            };
            if count == 0 || available < count {
                tracing::debug!(
                    light = index,
                    available,
                    needed = count,
                    "shadow culling produced too few slices; light renders unshadowed"
                );
                continue;
            }

            let within_budget = match kind {
                ShadowRequestKind::Punctual => {
                    punctual_slices + count as usize <= settings.max_punctual_shadow_slices
                }
                ShadowRequestKind::Cascade => {
                    directional_shadows < settings.max_directional_shadows
                }
            };
            if !within_budget {
                tracing::warn!(
                    light = index,
                    kind = ?kind,
                    "shadow budget for light category exhausted; light renders unshadowed"
                );
                continue;
            }

            let requests =
                build_requests(index, light, &additional, slices, kind, count, &settings);
            let Some(requests) = requests else {
                tracing::warn!(
                    light = index,
                    "missing shadow slice matrices; light renders unshadowed"
                );
                continue;
            };
            let Some(first) = shadows.add_shadow_requests(requests) else {
                continue;
            };

            match kind {
                ShadowRequestKind::Punctual => punctual_slices += count as usize,
                ShadowRequestKind::Cascade => directional_shadows += 1,
            }
            self.assignments[index] = Some(ShadowAssignment {
                kind,
                first,
                count: count as usize,
            });
            accepted += 1;
        }

        tracing::trace!(accepted, punctual_slices, directional_shadows, "shadow requests prepared");
        accepted
    }

    /// Shadow index for a visible light: the first of its requests if every
    /// one of them was placed in the atlas, else [`INVALID_INDEX`].
    fn shadow_index(&self, light_index: usize, shadows: &ShadowManager) -> i32 {
        match self.assignments.get(light_index).copied().flatten() {
            Some(a) if shadows.all_placed(a.kind, a.first, a.count) => a.first as i32,
            _ => INVALID_INDEX,
        }
    }

    /// Fill the light list for this frame.
    ///
    /// Lights are taken in input order; once a category is full the rest of
    /// that category is dropped.
    pub fn build(
        &mut self,
        lights: &[VisibleLight],
        probes: &[VisibleReflectionProbe],
        shadows: &ShadowManager,
        caches: &mut LightTextureCaches,
    ) -> &LightList {
        self.list.clear();
        let mut stats = LightListStats::default();
        let mut dropped = [0usize; 3];

        for (index, light) in lights.iter().enumerate() {
            let Some(additional) = light.additional else {
                tracing::warn!(light = index, "light has no additional light data; skipped");
                stats.skipped_missing_data += 1;
                continue;
            };

            let light_type = light.gpu_light_type();
            let category = Category::of(light_type);
            let has_room = match category {
                Category::Directional => self.list.has_directional_room(),
                Category::Punctual => self.list.has_punctual_room(),
                Category::Area => self.list.has_area_room(),
            };
            if !has_room {
                dropped[category as usize] += 1;
                continue;
            }

            let shadow_index = self.shadow_index(index, shadows);
            if light.casts_shadows() {
                if shadow_index == INVALID_INDEX {
                    stats.unshadowed += 1;
                } else {
                    stats.shadowed += 1;
                }
            }

            let cookie_index = match light.cookie {
                Some(cookie) => {
                    let slice = fetch_cookie(caches, light_type, cookie);
                    if slice.is_none() {
                        tracing::warn!(light = index, ?cookie, "cookie cache full; cookie skipped");
                        stats.texture_cache_misses += 1;
                    }
                    slice.map_or(INVALID_INDEX, |s| s as i32)
                }
                None => INVALID_INDEX,
            };

            match category {
                Category::Directional => {
                    let data =
                        directional_light_data(light, &additional, shadow_index, cookie_index);
                    self.list.push_directional(data, index);
                    stats.directional += 1;
                }
                Category::Punctual => {
                    let data =
                        light_data(light, light_type, &additional, shadow_index, cookie_index);
                    self.list.push_punctual(data, index);
                    stats.punctual += 1;
                }
                Category::Area => {
                    // Area lights are never shadowed.
                    let data =
                        light_data(light, light_type, &additional, INVALID_INDEX, cookie_index);
                    self.list.push_area(data, index);
                    stats.area += 1;
                }
            }
        }

        for category in [Category::Directional, Category::Punctual, Category::Area] {
            let count = dropped[category as usize];
            if count > 0 {
                tracing::warn!(
                    category = category.name(),
                    dropped = count,
                    capacity = category.capacity(self.list.capacities()),
                    "light list category full; lights dropped"
                );
                stats.dropped_over_capacity += count;
            }
        }

        let mut dropped_probes = 0;
        for (index, probe) in probes.iter().enumerate() {
            let Some(texture) = probe.texture else {
                tracing::trace!(probe = index, "reflection probe has no texture; skipped");
                continue;
            };
            if !self.list.has_env_room() {
                dropped_probes += 1;
                continue;
            }
            let Some(slice) = caches.reflection_probes.fetch_slice(texture) else {
                tracing::warn!(probe = index, ?texture, "reflection probe cache full; probe skipped");
                stats.texture_cache_misses += 1;
                continue;
            };
            self.list.push_env(env_light_data(probe, slice), index);
            stats.env += 1;
        }
        if dropped_probes > 0 {
            tracing::warn!(
                dropped = dropped_probes,
                capacity = self.list.capacities().max_env_lights,
                "reflection probe list full; probes dropped"
            );
            stats.dropped_over_capacity += dropped_probes;
        }

        self.stats = stats;
        &self.list
    }
}

fn build_requests(
    index: usize,
    light: &VisibleLight,
    additional: &AdditionalLightData,
    slices: &dyn ShadowSliceSource,
    kind: ShadowRequestKind,
    count: u32,
    settings: &ShadowSettings,
) -> Option<Vec<ShadowRequest>> {
    let depth_bias = light.shadow_bias.unwrap_or(settings.depth_bias);
    let normal_bias = light.shadow_normal_bias.unwrap_or(settings.normal_bias);
    let resolution = additional
        .shadow_resolution
        .max(settings.min_shadow_resolution);

    (0..count)
        .map(|slice| {
            let s = slices.shadow_slice(index, slice)?;
            let request = match kind {
                ShadowRequestKind::Punctual => {
                    ShadowRequest::punctual(index, slice, s.view, s.projection, resolution)
                }
                ShadowRequestKind::Cascade => ShadowRequest::cascade(
                    index,
                    slice,
                    s.view,
                    s.projection,
                    resolution,
                    s.split_sphere,
                ),
            };
            Some(request.with_bias(depth_bias, normal_bias))
        })
        .collect()
}

fn fetch_cookie(
    caches: &mut LightTextureCaches,
    light_type: GpuLightType,
    cookie: TextureHandle,
) -> Option<u32> {
    match light_type {
        GpuLightType::Point => caches.cube_cookies.fetch_slice(cookie),
        _ => caches.cookies.fetch_slice(cookie),
    }
}

fn scale(enabled: bool) -> f32 {
    if enabled {
        1.0
    } else {
        0.0
    }
}

fn directional_light_data(
    light: &VisibleLight,
    additional: &AdditionalLightData,
    shadow_index: i32,
    cookie_index: i32,
) -> DirectionalLightData {
    DirectionalLightData {
        forward: light.forward().to_array(),
        diffuse_scale: scale(additional.affect_diffuse),
        up: light.up().to_array(),
        specular_scale: scale(additional.affect_specular),
        right: light.right().to_array(),
        shadow_index,
        color: linear_color(light.color, light.intensity).to_array(),
        cookie_index,
        shadow_dimmer: additional.shadow_dimmer.clamp(0.0, 1.0),
        _padding: [0.0; 3],
    }
}

fn light_data(
    light: &VisibleLight,
    light_type: GpuLightType,
    additional: &AdditionalLightData,
    shadow_index: i32,
    cookie_index: i32,
) -> LightData {
    let spot = match light_type {
        GpuLightType::Spot => {
            SpotAttenuation::from_cone(light.spot_angle, additional.inner_spot_percent)
        }
        _ => SpotAttenuation::none(),
    };
    let size = match light_type {
        GpuLightType::Rectangle => [additional.area_width, additional.area_height],
        GpuLightType::Line => [additional.area_width, 0.0],
        _ => [0.0, 0.0],
    };

    LightData {
        position_ws: light.position().to_array(),
        inv_sqr_attenuation_radius: inv_sqr_attenuation_radius(light.range),
        color: linear_color(light.color, light.intensity).to_array(),
        angle_scale: spot.angle_scale,
        forward: light.forward().to_array(),
        angle_offset: spot.angle_offset,
        up: light.up().to_array(),
        diffuse_scale: scale(additional.affect_diffuse),
        right: light.right().to_array(),
        specular_scale: scale(additional.affect_specular),
        shadow_dimmer: additional.shadow_dimmer.clamp(0.0, 1.0),
        shadow_index,
        cookie_index,
        light_type: light_type as u32,
        size,
        two_sided: u32::from(light_type.is_area() && additional.two_sided),
        _padding: 0,
    }
}

fn env_light_data(probe: &VisibleReflectionProbe, slice: u32) -> EnvLightData {
    let (blend_distance, inner) = probe.influence();
    let shape = match probe.shape {
        ProbeShape::Box => EnvShape::Box,
        ProbeShape::Sphere => EnvShape::Sphere,
    };
    let axis = |v: glam::Vec4| v.truncate().normalize_or_zero().to_array();
    EnvLightData {
        position_ws: probe.local_to_world.w_axis.truncate().to_array(),
        env_shape: shape as u32,
        forward: axis(probe.local_to_world.z_axis),
        env_index: slice as i32,
        up: axis(probe.local_to_world.y_axis),
        blend_distance,
        right: axis(probe.local_to_world.x_axis),
        _padding0: 0.0,
        inner_distance: inner.max(Vec3::ZERO).to_array(),
        _padding1: 0.0,
    }
}
