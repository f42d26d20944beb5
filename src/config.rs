//! Light loop settings
//!
//! Capacity limits, atlas resolutions, bias defaults and tiling parameters.
//! These are policy values supplied by the host's settings asset; the
//! defaults are the reference configuration.

use crate::error::{LightLoopError, Result};

/// Fixed per-category capacities of the GPU light list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightCapacities {
    /// Maximum directional lights.
    pub max_directional_lights: usize,
    /// Maximum point and spot lights.
    pub max_punctual_lights: usize,
    /// Maximum rectangle and line lights.
    pub max_area_lights: usize,
    /// Maximum reflection probes.
    pub max_env_lights: usize,
}

impl Default for LightCapacities {
    fn default() -> Self {
        Self {
            max_directional_lights: 2,
            max_punctual_lights: 512,
            max_area_lights: 128,
            max_env_lights: 64,
        }
    }
}

/// Shadow atlas and shadow budget configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    /// General (resizable) atlas size in texels.
    pub atlas_size: (u32, u32),
    /// Cascade atlas size in texels.
    pub cascade_atlas_size: (u32, u32),
    /// Maximum shadow requests accepted per frame, across both atlases.
    pub max_shadow_requests: usize,
    /// Maximum shadow slices for punctual lights (a point light takes 6).
    pub max_punctual_shadow_slices: usize,
    /// Maximum shadowed directional lights.
    pub max_directional_shadows: usize,
    /// Maximum cascades per directional light.
    pub max_cascades: u32,
    /// Smallest viewport the resize retry may shrink a request to.
    pub min_shadow_resolution: u32,
    /// Default depth bias.
    pub depth_bias: f32,
    /// Default normal offset bias.
    pub normal_bias: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            atlas_size: (4096, 4096),
            cascade_atlas_size: (4096, 4096),
            max_shadow_requests: 256,
            max_punctual_shadow_slices: 128,
            max_directional_shadows: 1,
            max_cascades: 4,
            min_shadow_resolution: 16,
            depth_bias: 0.005,
            normal_bias: 0.02,
        }
    }
}

/// Texture-array cache sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCacheSettings {
    /// Resolution of 2D cookie slices.
    pub cookie_size: u32,
    /// Number of 2D cookie slices.
    pub cookie_slices: u32,
    /// Face resolution of point-light cube cookies.
    pub cube_cookie_size: u32,
    /// Number of cube cookie slices.
    pub cube_cookie_slices: u32,
    /// Face resolution of reflection probe cubemaps.
    pub reflection_size: u32,
    /// Number of reflection probe slices.
    pub reflection_slices: u32,
}

impl Default for TextureCacheSettings {
    fn default() -> Self {
        Self {
            cookie_size: 128,
            cookie_slices: 16,
            cube_cookie_size: 128,
            cube_cookie_slices: 4,
            reflection_size: 128,
            reflection_slices: 32,
        }
    }
}

/// Screen tiling configuration for light culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSettings {
    /// Tile edge in pixels. Must be a multiple of 8 no larger than 64.
    pub tile_size: u32,
    /// Build per-cluster lists (tile x depth slice) instead of per-tile.
    pub clustered: bool,
    /// Logarithmic view-depth slices in clustered mode.
    pub cluster_depth_slices: u32,
    /// Light indices stored per tile or cluster; extra lights are dropped.
    pub max_lights_per_tile: u32,
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            tile_size: 16,
            clustered: false,
            cluster_depth_slices: 16,
            max_lights_per_tile: 63,
        }
    }
}

/// Complete light loop configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightLoopSettings {
    /// Light list capacities.
    pub capacities: LightCapacities,
    /// Shadow configuration.
    pub shadows: ShadowSettings,
    /// Cookie and reflection caches.
    pub textures: TextureCacheSettings,
    /// Tile/cluster configuration.
    pub tiles: TileSettings,
}

impl LightLoopSettings {
    /// Create settings with the reference configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the light list capacities.
    pub fn capacities(mut self, capacities: LightCapacities) -> Self {
        self.capacities = capacities;
        self
    }

    /// Set the general shadow atlas size.
    pub fn atlas_size(mut self, width: u32, height: u32) -> Self {
        self.shadows.atlas_size = (width, height);
        self
    }

    /// Set the cascade shadow atlas size.
    pub fn cascade_atlas_size(mut self, width: u32, height: u32) -> Self {
        self.shadows.cascade_atlas_size = (width, height);
        self
    }

    /// Set the per-frame shadow request budget.
    pub fn max_shadow_requests(mut self, max: usize) -> Self {
        self.shadows.max_shadow_requests = max;
        self
    }

    /// Set the texture cache configuration.
    pub fn textures(mut self, textures: TextureCacheSettings) -> Self {
        self.textures = textures;
        self
    }

    /// Set the tile size in pixels.
    pub fn tile_size(mut self, tile_size: u32) -> Self {
        self.tiles.tile_size = tile_size;
        self
    }

    /// Enable or disable clustered light lists.
    pub fn clustered(mut self, clustered: bool) -> Self {
        self.tiles.clustered = clustered;
        self
    }

    /// Check the settings for values no frame could work with.
    pub fn validate(&self) -> Result<()> {
        let caps = &self.capacities;
        if caps.max_punctual_lights + caps.max_area_lights > u32::MAX as usize {
            return Err(LightLoopError::InvalidSettings(
                "finite light capacity does not fit a u32 index".into(),
            ));
        }

        let shadows = &self.shadows;
        for (name, (w, h)) in [
            ("atlas", shadows.atlas_size),
            ("cascade atlas", shadows.cascade_atlas_size),
        ] {
            if w == 0 || h == 0 {
                return Err(LightLoopError::InvalidSettings(format!(
                    "{name} size must be non-zero, got {w}x{h}"
                )));
            }
            if shadows.min_shadow_resolution > w.min(h) {
                return Err(LightLoopError::InvalidSettings(format!(
                    "minimum shadow resolution {} exceeds {name} size {w}x{h}",
                    shadows.min_shadow_resolution
                )));
            }
        }
        if shadows.min_shadow_resolution == 0 {
            return Err(LightLoopError::InvalidSettings(
                "minimum shadow resolution must be non-zero".into(),
            ));
        }
        if shadows.max_cascades == 0 || shadows.max_cascades > 4 {
            return Err(LightLoopError::InvalidSettings(format!(
                "cascade count must be in 1..=4, got {}",
                shadows.max_cascades
            )));
        }

        let textures = &self.textures;
        if textures.cookie_size == 0
            || textures.cube_cookie_size == 0
            || textures.reflection_size == 0
        {
            return Err(LightLoopError::InvalidSettings(
                "texture cache resolutions must be non-zero".into(),
            ));
        }

        let tiles = &self.tiles;
        if tiles.tile_size == 0 || tiles.tile_size % 8 != 0 || tiles.tile_size > 64 {
            return Err(LightLoopError::InvalidSettings(format!(
                "tile size must be a multiple of 8 in 8..=64, got {}",
                tiles.tile_size
            )));
        }
        if tiles.clustered && tiles.cluster_depth_slices == 0 {
            return Err(LightLoopError::InvalidSettings(
                "clustered mode needs at least one depth slice".into(),
            ));
        }
        if tiles.max_lights_per_tile == 0 {
            return Err(LightLoopError::InvalidSettings(
                "tiles must hold at least one light".into(),
            ));
        }

        Ok(())
    }
}
