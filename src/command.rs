//! Command recording
//!
//! The light loop never talks to the GPU directly. It sequences calls into a
//! [`CommandSink`], and a backend (see [`crate::gpu::WgpuBackend`]) turns the
//! recorded [`CommandList`] into real GPU work. Submission order is execution
//! order.

use glam::Mat4;

use crate::error::{LightLoopError, Result};
use crate::shadow::Viewport;
use crate::texture_cache::TextureHandle;

/// GPU buffers owned by the light loop and bound globally for shading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalBuffer {
    DirectionalLights,
    PunctualLights,
    AreaLights,
    EnvLights,
    ShadowData,
    CascadeShadowData,
    DirectionalShadowData,
    LightBounds,
    TileParams,
    TileLightIndices,
}

impl GlobalBuffer {
    /// Debug label used for the GPU object.
    pub fn label(self) -> &'static str {
        match self {
            Self::DirectionalLights => "directional light data",
            Self::PunctualLights => "punctual light data",
            Self::AreaLights => "area light data",
            Self::EnvLights => "env light data",
            Self::ShadowData => "shadow data",
            Self::CascadeShadowData => "cascade shadow data",
            Self::DirectionalShadowData => "directional shadow data",
            Self::LightBounds => "light bounds",
            Self::TileParams => "tile params",
            Self::TileLightIndices => "tile light indices",
        }
    }
}

/// Depth render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTargetId {
    /// General atlas holding punctual light shadows.
    ShadowAtlas,
    /// Atlas holding directional cascades.
    CascadeShadowAtlas,
}

/// Texture arrays filled slice by slice from host textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureArrayId {
    Cookies,
    CubeCookies,
    ReflectionProbes,
}

/// A texture made visible to the shading passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalTexture {
    Atlas(RenderTargetId),
    Array(TextureArrayId),
}

/// Compute kernels the light loop dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeKernel {
    /// One light list per screen tile, bounded by the tile's depth range.
    BuildTileLists,
    /// One light list per tile and view-depth slice.
    BuildClusterLists,
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AllocateBuffer {
        buffer: GlobalBuffer,
        size: u64,
    },
    AllocateDepthTarget {
        target: RenderTargetId,
        width: u32,
        height: u32,
    },
    AllocateTextureArray {
        array: TextureArrayId,
        size: u32,
        slices: u32,
        cube: bool,
    },
    ClearDepth(RenderTargetId),
    SetViewport(Viewport),
    ResetViewport,
    SetViewProjection {
        view: Mat4,
        projection: Mat4,
    },
    DrawShadows {
        light_index: usize,
        slice: u32,
    },
    UploadTextureSlice {
        array: TextureArrayId,
        slice: u32,
        texture: TextureHandle,
    },
    SetGlobalBuffer {
        buffer: GlobalBuffer,
        data: Vec<u8>,
    },
    BindGlobalTexture(GlobalTexture),
    DispatchCompute {
        kernel: ComputeKernel,
        groups: [u32; 3],
    },
}

/// Receiver for the light loop's GPU work.
///
/// Allocation calls are the only fallible ones: they fail when the device
/// cannot hold the resource, which aborts the current frame.
pub trait CommandSink {
    /// (Re)allocate a global buffer with at least `size` bytes.
    fn allocate_buffer(&mut self, buffer: GlobalBuffer, size: u64) -> Result<()>;

    /// (Re)allocate a depth render target.
    fn allocate_depth_target(&mut self, target: RenderTargetId, width: u32, height: u32)
        -> Result<()>;

    /// (Re)allocate a texture array of `slices` square slices.
    fn allocate_texture_array(
        &mut self,
        array: TextureArrayId,
        size: u32,
        slices: u32,
        cube: bool,
    ) -> Result<()>;

    /// Clear a depth target to the far plane.
    fn clear_depth(&mut self, target: RenderTargetId);

    /// Restrict rasterization to a viewport of the current target.
    fn set_viewport(&mut self, viewport: Viewport);

    /// Remove any viewport restriction.
    fn reset_viewport(&mut self);

    /// Set the view and projection used by the next draws.
    fn set_view_projection(&mut self, view: Mat4, projection: Mat4);

    /// Draw the shadow casters of one shadow slice of a visible light.
    fn draw_shadows(&mut self, light_index: usize, slice: u32);

    /// Copy a host texture into a texture array slice.
    fn upload_texture_slice(&mut self, array: TextureArrayId, slice: u32, texture: TextureHandle);

    /// Upload the contents of a global buffer.
    fn set_global_buffer(&mut self, buffer: GlobalBuffer, data: &[u8]);

    /// Make a texture visible to shading.
    fn bind_global_texture(&mut self, texture: GlobalTexture);

    /// Dispatch a compute kernel.
    fn dispatch_compute(&mut self, kernel: ComputeKernel, groups: [u32; 3]);
}

/// Device limits used to validate allocations at record time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Largest buffer that can be bound as storage.
    pub max_buffer_size: u64,
    /// Largest 2D texture edge.
    pub max_texture_dimension_2d: u32,
    /// Largest texture array layer count.
    pub max_texture_array_layers: u32,
}

impl From<&wgpu::Limits> for ResourceLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_buffer_size: limits
                .max_buffer_size
                .min(u64::from(limits.max_storage_buffer_binding_size)),
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_array_layers: limits.max_texture_array_layers,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from(&wgpu::Limits::default())
    }
}

/// Recording [`CommandSink`].
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<Command>,
    limits: ResourceLimits,
}

impl CommandList {
    /// Create an empty list validated against the default wgpu limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list validated against specific limits.
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            commands: Vec::new(),
            limits,
        }
    }

    /// The limits allocations are checked against.
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Recorded commands in submission order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all recorded commands, keeping the allocation.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Take the recorded commands, leaving the list empty.
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Latest uploaded contents of a global buffer, if any.
    pub fn last_upload(&self, buffer: GlobalBuffer) -> Option<&[u8]> {
        self.commands.iter().rev().find_map(|command| match command {
            Command::SetGlobalBuffer { buffer: b, data } if *b == buffer => Some(data.as_slice()),
            _ => None,
        })
    }
}

impl CommandSink for CommandList {
    fn allocate_buffer(&mut self, buffer: GlobalBuffer, size: u64) -> Result<()> {
        if size > self.limits.max_buffer_size {
            return Err(LightLoopError::BufferTooLarge {
                buffer,
                requested: size,
                limit: self.limits.max_buffer_size,
            });
        }
        self.commands.push(Command::AllocateBuffer { buffer, size });
        Ok(())
    }

    fn allocate_depth_target(
        &mut self,
        target: RenderTargetId,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let limit = self.limits.max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(LightLoopError::TextureTooLarge {
                target,
                width,
                height,
                limit,
            });
        }
        self.commands.push(Command::AllocateDepthTarget {
            target,
            width,
            height,
        });
        Ok(())
    }

    fn allocate_texture_array(
        &mut self,
        array: TextureArrayId,
        size: u32,
        slices: u32,
        cube: bool,
    ) -> Result<()> {
        let layers = if cube { slices.saturating_mul(6) } else { slices };
        if size > self.limits.max_texture_dimension_2d
            || layers > self.limits.max_texture_array_layers
        {
            return Err(LightLoopError::TextureArrayTooLarge {
                array,
                size,
                layers,
            });
        }
        self.commands.push(Command::AllocateTextureArray {
            array,
            size,
            slices,
            cube,
        });
        Ok(())
    }

    fn clear_depth(&mut self, target: RenderTargetId) {
        self.commands.push(Command::ClearDepth(target));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::SetViewport(viewport));
    }

    fn reset_viewport(&mut self) {
        self.commands.push(Command::ResetViewport);
    }

    fn set_view_projection(&mut self, view: Mat4, projection: Mat4) {
        self.commands
            .push(Command::SetViewProjection { view, projection });
    }

    fn draw_shadows(&mut self, light_index: usize, slice: u32) {
        self.commands
            .push(Command::DrawShadows { light_index, slice });
    }

    fn upload_texture_slice(&mut self, array: TextureArrayId, slice: u32, texture: TextureHandle) {
        self.commands.push(Command::UploadTextureSlice {
            array,
            slice,
            texture,
        });
    }

    fn set_global_buffer(&mut self, buffer: GlobalBuffer, data: &[u8]) {
        self.commands.push(Command::SetGlobalBuffer {
            buffer,
            data: data.to_vec(),
        });
    }

    fn bind_global_texture(&mut self, texture: GlobalTexture) {
        self.commands.push(Command::BindGlobalTexture(texture));
    }

    fn dispatch_compute(&mut self, kernel: ComputeKernel, groups: [u32; 3]) {
        self.commands
            .push(Command::DispatchCompute { kernel, groups });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> ResourceLimits {
        ResourceLimits {
            max_buffer_size: 1024,
            max_texture_dimension_2d: 2048,
            max_texture_array_layers: 16,
        }
    }

    #[test]
    fn test_records_in_submission_order() {
        let mut list = CommandList::new();
        list.clear_depth(RenderTargetId::ShadowAtlas);
        list.draw_shadows(3, 0);
        list.reset_viewport();

        assert_eq!(
            list.commands(),
            &[
                Command::ClearDepth(RenderTargetId::ShadowAtlas),
                Command::DrawShadows {
                    light_index: 3,
                    slice: 0
                },
                Command::ResetViewport,
            ]
        );
    }

    #[test]
    fn test_buffer_over_limit_is_an_error() {
        let mut list = CommandList::with_limits(small_limits());
        assert!(list.allocate_buffer(GlobalBuffer::LightBounds, 1024).is_ok());
        let err = list
            .allocate_buffer(GlobalBuffer::TileLightIndices, 4096)
            .unwrap_err();
        assert!(matches!(
            err,
            LightLoopError::BufferTooLarge {
                buffer: GlobalBuffer::TileLightIndices,
                requested: 4096,
                limit: 1024,
            }
        ));
        // The failed allocation is not recorded.
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_cube_arrays_count_six_layers_per_slice() {
        let mut list = CommandList::with_limits(small_limits());
        assert!(list
            .allocate_texture_array(TextureArrayId::CubeCookies, 128, 2, true)
            .is_ok());
        assert!(list
            .allocate_texture_array(TextureArrayId::ReflectionProbes, 128, 3, true)
            .is_err());
        assert!(list
            .allocate_texture_array(TextureArrayId::Cookies, 128, 16, false)
            .is_ok());
    }

    #[test]
    fn test_depth_target_over_limit() {
        let mut list = CommandList::with_limits(small_limits());
        assert!(list
            .allocate_depth_target(RenderTargetId::ShadowAtlas, 4096, 4096)
            .is_err());
    }

    #[test]
    fn test_last_upload() {
        let mut list = CommandList::new();
        list.set_global_buffer(GlobalBuffer::ShadowData, &[1, 2]);
        list.set_global_buffer(GlobalBuffer::ShadowData, &[3]);
        assert_eq!(list.last_upload(GlobalBuffer::ShadowData), Some(&[3u8][..]));
        assert_eq!(list.last_upload(GlobalBuffer::EnvLights), None);
    }
}
