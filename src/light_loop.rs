//! Frame orchestration
//!
//! [`LightLoop`] runs the per-camera stages in a fixed order:
//!
//! 1. clear last frame's requests and advance the texture caches
//! 2. shadow requests from the visible lights, atlas layout, shadow draws
//! 3. light list build (shadow and cookie indices resolved)
//! 4. tile/cluster light lists (reallocating on resize)
//! 5. global buffer uploads and texture bindings for shading
//!
//! Everything is recorded into a [`CommandSink`]; nothing waits on the GPU.

use crate::command::CommandSink;
use crate::config::LightLoopSettings;
use crate::error::{LightLoopError, Result};
use crate::light::{
    LightList, LightListBuilder, LightListStats, VisibleLight, VisibleReflectionProbe,
};
use crate::shadow::{ShadowLayoutOutcome, ShadowManager, ShadowSliceSource};
use crate::texture_cache::{LightTextureCaches, SliceUploadFailure};
use crate::tile::{CameraParams, TileLightBuilder};

/// Everything the host supplies for one camera's frame.
pub struct FrameInput<'a> {
    pub camera: CameraParams,
    /// Visible lights in culling order.
    pub lights: &'a [VisibleLight],
    /// Visible reflection probes in culling order.
    pub probes: &'a [VisibleReflectionProbe],
    /// Shadow slice matrices for the visible lights.
    pub shadow_slices: &'a dyn ShadowSliceSource,
    /// Render target size in pixels.
    pub screen_size: (u32, u32),
}

/// Summary of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub lights: LightListStats,
    /// Lights that were given shadow requests.
    pub shadow_lights: usize,
    /// Shadow requests accepted across both atlases.
    pub shadow_requests: usize,
    pub shadow_layout: ShadowLayoutOutcome,
    pub shadow_slices_drawn: usize,
    pub texture_uploads: usize,
    /// Finite lights on screen given to the tile build.
    pub tile_lights: usize,
    /// Whether the tile buffer was reallocated this frame.
    pub tile_buffer_resized: bool,
}

/// Per-camera light loop: shadows, light list and tile lists.
pub struct LightLoop {
    settings: LightLoopSettings,
    shadows: ShadowManager,
    builder: LightListBuilder,
    textures: LightTextureCaches,
    tiles: TileLightBuilder,
    frame: u64,
}

impl LightLoop {
    /// Create a light loop. Fails on settings no frame could work with.
    pub fn new(settings: LightLoopSettings) -> Result<Self> {
        settings.validate()?;
        let caps = settings.capacities;
        Ok(Self {
            shadows: ShadowManager::new(settings.shadows),
            builder: LightListBuilder::new(caps),
            textures: LightTextureCaches::new(settings.textures),
            tiles: TileLightBuilder::new(
                settings.tiles,
                caps.max_punctual_lights + caps.max_area_lights,
            ),
            frame: 0,
            settings,
        })
    }

    pub fn settings(&self) -> &LightLoopSettings {
        &self.settings
    }

    /// The light list built by the last frame.
    pub fn light_list(&self) -> &LightList {
        self.builder.list()
    }

    pub fn shadows(&self) -> &ShadowManager {
        &self.shadows
    }

    pub fn textures(&self) -> &LightTextureCaches {
        &self.textures
    }

    pub fn tiles(&self) -> &TileLightBuilder {
        &self.tiles
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Feed back slice copies the backend could not perform. The affected
    /// textures are assigned and uploaded again by the next frame.
    pub fn report_failed_uploads(&mut self, failures: &[SliceUploadFailure]) {
        if !failures.is_empty() {
            tracing::warn!(count = failures.len(), "texture slice uploads failed");
        }
        self.textures.report_failed_uploads(failures);
    }

    /// Record one frame of light loop work.
    ///
    /// An error aborts the frame; whatever was recorded before it should be
    /// discarded. The next frame starts from cleared state either way.
    pub fn render_frame(
        &mut self,
        input: &FrameInput<'_>,
        sink: &mut dyn CommandSink,
    ) -> Result<FrameStats> {
        let camera = &input.camera;
        if !(camera.near > 0.0 && camera.far > camera.near) {
            return Err(LightLoopError::InvalidCamera {
                near: camera.near,
                far: camera.far,
            });
        }

        self.frame += 1;
        self.shadows.clear();
        self.textures.new_frame();

        self.shadows.ensure_allocated(sink)?;
        self.builder.list_mut().ensure_allocated(sink)?;
        self.textures.ensure_allocated(sink)?;
        self.tiles.ensure_allocated(sink)?;

        // Shadows
        let shadow_lights =
            self.builder
                .prepare_shadow_requests(input.lights, input.shadow_slices, &mut self.shadows);
        let shadow_layout = self.shadows.process_shadow_requests();
        let shadow_slices_drawn = self.shadows.render_shadows(sink);

        // Light list
        self.builder
            .build(input.lights, input.probes, &self.shadows, &mut self.textures);
        let texture_uploads = self.textures.flush_uploads(sink);

        // Tiles
        let (width, height) = input.screen_size;
        let tile_buffer_resized = self.tiles.resize_if_needed(width, height, sink)?;
        let tile_lights = self
            .tiles
            .prepare(camera, self.builder.list(), input.lights);
        self.tiles.dispatch(sink);

        // Globals
        self.builder.list().upload(sink);
        self.shadows.push_global_params(sink);
        self.textures.bind(sink);

        let stats = FrameStats {
            frame: self.frame,
            lights: self.builder.stats(),
            shadow_lights,
            shadow_requests: self.shadows.request_count(),
            shadow_layout,
            shadow_slices_drawn,
            texture_uploads,
            tile_lights,
            tile_buffer_resized,
        };
        tracing::debug!(?stats, "light loop frame");
        Ok(stats)
    }
}
