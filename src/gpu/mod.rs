//! wgpu backend
//!
//! [`WgpuBackend`] owns the GPU side of the light loop: the global storage
//! buffers, the two shadow atlases, the cookie and reflection arrays and the
//! tile kernels. It replays a recorded [`CommandList`](crate::command::CommandList)
//! into one command buffer.
//!
//! Every `clear_depth` .. `reset_viewport` span becomes one depth-only render
//! pass on the cleared atlas. Shadow casters are drawn by the host through
//! [`ShadowCasterSource`]; host textures copied into the arrays come from a
//! [`TextureSource`].

use std::collections::HashMap;

use glam::Mat4;

use crate::command::{
    Command, ComputeKernel, GlobalBuffer, GlobalTexture, RenderTargetId, ResourceLimits,
    TextureArrayId,
};
use crate::compute::read_back;
use crate::context::WgpuContext;
use crate::core::{
    ComputePipelineBuilder, DepthTexture, DynamicUniformBuffer, ShadowCasterPipelineBuilder,
    StorageBuffer, Texture2DArray,
};
use crate::error::{LightLoopError, Result};
use crate::shadow::Viewport;
use crate::texture_cache::{SliceUploadFailure, TextureHandle};

/// Draws shadow casters for one shadow slice.
///
/// The backend has already bound the atlas, the viewport and group 0 (the
/// slice's view-projection, see [`WgpuBackend::view_projection_layout`]).
pub trait ShadowCasterSource {
    fn draw_casters(&self, pass: &mut wgpu::RenderPass<'_>, light_index: usize, slice: u32);
}

/// Resolves texture handles to host textures for slice uploads.
pub trait TextureSource {
    fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture>;
}

/// Group 0 contents of a shadow caster draw.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowViewUniform {
    pub view_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
}

impl ShadowViewUniform {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view_projection: (projection * view).to_cols_array_2d(),
            view: view.to_cols_array_2d(),
        }
    }
}

/// One caster draw inside a shadow pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowDraw {
    /// Atlas region, `None` for the whole target.
    pub viewport: Option<Viewport>,
    /// Slot in [`ReplayPlan::view_projections`].
    pub view_projection: usize,
    pub light_index: usize,
    pub slice: u32,
}

/// A depth-only render pass on one atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowPass {
    pub target: RenderTargetId,
    pub draws: Vec<ShadowDraw>,
}

/// A command list grouped into encoder-level steps.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep {
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
    ShadowPass(ShadowPass),
    UploadTextureSlice {
        array: TextureArrayId,
        slice: u32,
        texture: TextureHandle,
    },
    /// Index of the `SetGlobalBuffer` command in the source list.
    WriteBuffer { buffer: GlobalBuffer, command: usize },
    Bind(GlobalTexture),
    Dispatch {
        kernel: ComputeKernel,
        groups: [u32; 3],
    },
}

/// Result of [`plan_replay`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayPlan {
    pub steps: Vec<ReplayStep>,
    pub view_projections: Vec<ShadowViewUniform>,
}

impl ReplayPlan {
    /// Shadow passes in submission order.
    pub fn shadow_passes(&self) -> impl Iterator<Item = &ShadowPass> {
        self.steps.iter().filter_map(|step| match step {
            ReplayStep::ShadowPass(pass) => Some(pass),
            _ => None,
        })
    }
}

/// Group recorded commands into passes and steps.
///
/// Viewport and draw commands must sit between a `ClearDepth` and the next
/// `ResetViewport`. Any other command closes an open pass.
pub fn plan_replay(commands: &[Command]) -> Result<ReplayPlan> {
    let mut plan = ReplayPlan::default();
    let mut open: Option<ShadowPass> = None;
    let mut viewport = None;
    let mut view_projection = None;

    fn close(plan: &mut ReplayPlan, open: &mut Option<ShadowPass>) {
        if let Some(pass) = open.take() {
            plan.steps.push(ReplayStep::ShadowPass(pass));
        }
    }

    for (index, command) in commands.iter().enumerate() {
        let step = match command {
            Command::ClearDepth(target) => {
                close(&mut plan, &mut open);
                open = Some(ShadowPass {
                    target: *target,
                    draws: Vec::new(),
                });
                viewport = None;
                continue;
            }
            Command::SetViewport(v) => {
                if open.is_none() {
                    return Err(LightLoopError::OutsideShadowPass("set_viewport"));
                }
                viewport = Some(*v);
                continue;
            }
            Command::ResetViewport => {
                viewport = None;
                close(&mut plan, &mut open);
                continue;
            }
            Command::SetViewProjection { view, projection } => {
                plan.view_projections
                    .push(ShadowViewUniform::new(*view, *projection));
                view_projection = Some(plan.view_projections.len() - 1);
                continue;
            }
            Command::DrawShadows { light_index, slice } => {
                let pass = open
                    .as_mut()
                    .ok_or(LightLoopError::OutsideShadowPass("draw_shadows"))?;
                let view_projection = view_projection.ok_or_else(|| {
                    LightLoopError::MissingResource("shadow view-projection".to_string())
                })?;
                pass.draws.push(ShadowDraw {
                    viewport,
                    view_projection,
                    light_index: *light_index,
                    slice: *slice,
                });
                continue;
            }
            Command::AllocateBuffer { buffer, size } => ReplayStep::AllocateBuffer {
                buffer: *buffer,
                size: *size,
            },
            Command::AllocateDepthTarget {
                target,
                width,
                height,
            } => ReplayStep::AllocateDepthTarget {
                target: *target,
                width: *width,
                height: *height,
            },
            Command::AllocateTextureArray {
                array,
                size,
                slices,
                cube,
            } => ReplayStep::AllocateTextureArray {
                array: *array,
                size: *size,
                slices: *slices,
                cube: *cube,
            },
            Command::UploadTextureSlice {
                array,
                slice,
                texture,
            } => ReplayStep::UploadTextureSlice {
                array: *array,
                slice: *slice,
                texture: *texture,
            },
            Command::SetGlobalBuffer { buffer, .. } => ReplayStep::WriteBuffer {
                buffer: *buffer,
                command: index,
            },
            Command::BindGlobalTexture(texture) => ReplayStep::Bind(*texture),
            Command::DispatchCompute { kernel, groups } => ReplayStep::Dispatch {
                kernel: *kernel,
                groups: *groups,
            },
        };
        close(&mut plan, &mut open);
        plan.steps.push(step);
    }
    close(&mut plan, &mut open);
    Ok(plan)
}

/// Reject uploads larger than the buffer they were recorded for.
fn check_upload(buffer: GlobalBuffer, len: usize, capacity: u64) -> Result<()> {
    let len = len as u64;
    if len > capacity {
        return Err(LightLoopError::UploadTooLarge {
            buffer,
            len,
            capacity,
        });
    }
    Ok(())
}

const TILE_SHADER: &str = include_str!("../shaders/tile_lights.wgsl");

/// GPU resources and pipelines of the light loop.
pub struct WgpuBackend {
    ctx: WgpuContext,
    buffers: HashMap<GlobalBuffer, StorageBuffer>,
    atlases: HashMap<RenderTargetId, DepthTexture>,
    arrays: HashMap<TextureArrayId, Texture2DArray>,
    bound: Vec<GlobalTexture>,
    failed_uploads: Vec<SliceUploadFailure>,
    view_projection_layout: wgpu::BindGroupLayout,
    view_projections: DynamicUniformBuffer,
    view_projection_bind_group: wgpu::BindGroup,
    tile_layout: wgpu::BindGroupLayout,
    tile_pipeline: wgpu::ComputePipeline,
    cluster_pipeline: wgpu::ComputePipeline,
    comparison_sampler: wgpu::Sampler,
}

impl WgpuBackend {
    /// Create the layouts and tile pipelines. Resources are allocated later
    /// by replayed allocation commands.
    pub fn new(ctx: &WgpuContext) -> Result<Self> {
        let view_projection_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("shadow view-projection layout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: wgpu::BufferSize::new(
                                std::mem::size_of::<ShadowViewUniform>() as u64,
                            ),
                        },
                        count: None,
                    }],
                });

        let view_projections = DynamicUniformBuffer::new(
            ctx,
            std::mem::size_of::<ShadowViewUniform>() as u64,
            16,
            Some("shadow view-projections"),
        );
        let view_projection_bind_group =
            Self::create_view_projection_bind_group(ctx, &view_projection_layout, &view_projections);

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        // Both entry points share this layout; the cluster kernel never
        // reads the depth texture.
        let tile_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("tile lights layout"),
                entries: &[
                    storage(0, true),
                    storage(1, true),
                    storage(2, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                ],
            });

        let tile_pipeline = ComputePipelineBuilder::new(ctx)
            .label("build tile lists")
            .shader(TILE_SHADER)
            .entry_point("cs_build_tiles")
            .bind_group_layout(&tile_layout)
            .build()?;
        let cluster_pipeline = ComputePipelineBuilder::new(ctx)
            .label("build cluster lists")
            .shader(TILE_SHADER)
            .entry_point("cs_build_clusters")
            .bind_group_layout(&tile_layout)
            .build()?;

        Ok(Self {
            ctx: ctx.clone(),
            buffers: HashMap::new(),
            atlases: HashMap::new(),
            arrays: HashMap::new(),
            bound: Vec::new(),
            failed_uploads: Vec::new(),
            view_projection_layout,
            view_projections,
            view_projection_bind_group,
            tile_layout,
            tile_pipeline,
            cluster_pipeline,
            comparison_sampler: DepthTexture::create_comparison_sampler(ctx),
        })
    }

    fn create_view_projection_bind_group(
        ctx: &WgpuContext,
        layout: &wgpu::BindGroupLayout,
        uniforms: &DynamicUniformBuffer,
    ) -> wgpu::BindGroup {
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow view-projection bind group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: uniforms.buffer(),
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<ShadowViewUniform>() as u64),
                }),
            }],
        })
    }

    /// Device limits to record against.
    pub fn limits(&self) -> ResourceLimits {
        self.ctx.resource_limits()
    }

    /// Layout caster pipelines must use as group 0.
    pub fn view_projection_layout(&self) -> &wgpu::BindGroupLayout {
        &self.view_projection_layout
    }

    /// Start a caster pipeline whose group 0 matches the replayed passes.
    pub fn shadow_caster_pipeline(&self) -> ShadowCasterPipelineBuilder<'_> {
        ShadowCasterPipelineBuilder::new(&self.ctx, &self.view_projection_layout)
    }

    /// Comparison sampler for atlas lookups.
    pub fn comparison_sampler(&self) -> &wgpu::Sampler {
        &self.comparison_sampler
    }

    pub fn buffer(&self, buffer: GlobalBuffer) -> Option<&StorageBuffer> {
        self.buffers.get(&buffer)
    }

    pub fn atlas(&self, target: RenderTargetId) -> Option<&DepthTexture> {
        self.atlases.get(&target)
    }

    pub fn texture_array(&self, array: TextureArrayId) -> Option<&Texture2DArray> {
        self.arrays.get(&array)
    }

    /// Textures bound by the last replay, in bind order.
    pub fn bound_textures(&self) -> &[GlobalTexture] {
        &self.bound
    }

    /// Read the tile light records back. Blocks until the GPU is done.
    pub fn read_tile_lists(&self) -> Result<Vec<u32>> {
        let buffer = self.storage(GlobalBuffer::TileLightIndices)?;
        Ok(read_back(&self.ctx, buffer)?)
    }

    /// Slice copies the last replay had to skip. Pass them to
    /// [`LightLoop::report_failed_uploads`](crate::light_loop::LightLoop::report_failed_uploads)
    /// so the next frame uploads them again.
    pub fn failed_uploads(&self) -> &[SliceUploadFailure] {
        &self.failed_uploads
    }

    fn storage(&self, buffer: GlobalBuffer) -> Result<&StorageBuffer> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| LightLoopError::MissingResource(buffer.label().to_string()))
    }

    fn ensure_view_projection_capacity(&mut self, count: usize) {
        if count as u32 <= self.view_projections.count() {
            return;
        }
        let capacity = (count as u32).next_power_of_two();
        tracing::debug!(capacity, "growing shadow view-projection uniforms");
        self.view_projections = DynamicUniformBuffer::new(
            &self.ctx,
            std::mem::size_of::<ShadowViewUniform>() as u64,
            capacity,
            Some("shadow view-projections"),
        );
        self.view_projection_bind_group = Self::create_view_projection_bind_group(
            &self.ctx,
            &self.view_projection_layout,
            &self.view_projections,
        );
    }

    /// Replay a recorded frame into a command buffer.
    ///
    /// Allocations and buffer uploads take effect on the device and queue
    /// right away; passes, copies and dispatches are encoded in order.
    /// A slice copy that cannot be performed is skipped with a warning and
    /// listed in [`failed_uploads`](Self::failed_uploads).
    /// `scene_depth` is the camera's depth buffer (depth aspect only) read by
    /// the tile kernel.
    pub fn replay(
        &mut self,
        commands: &[Command],
        casters: &dyn ShadowCasterSource,
        textures: &dyn TextureSource,
        scene_depth: &wgpu::TextureView,
    ) -> Result<wgpu::CommandBuffer> {
        let plan = plan_replay(commands)?;

        self.ensure_view_projection_capacity(plan.view_projections.len());
        for (slot, uniform) in plan.view_projections.iter().enumerate() {
            self.view_projections.write(&self.ctx, slot as u32, uniform);
        }

        self.bound.clear();
        self.failed_uploads.clear();
        let mut encoder = self.ctx.create_encoder(Some("light loop"));

        for step in &plan.steps {
            match step {
                ReplayStep::AllocateBuffer { buffer, size } => {
                    self.buffers.insert(
                        *buffer,
                        StorageBuffer::new(&self.ctx, *size, Some(buffer.label())),
                    );
                }
                ReplayStep::AllocateDepthTarget {
                    target,
                    width,
                    height,
                } => {
                    let label = atlas_label(*target);
                    match self.atlases.get_mut(target) {
                        Some(atlas) => atlas.resize(&self.ctx, *width, *height, Some(label)),
                        None => {
                            self.atlases.insert(
                                *target,
                                DepthTexture::new(&self.ctx, *width, *height, Some(label)),
                            );
                        }
                    }
                }
                ReplayStep::AllocateTextureArray {
                    array,
                    size,
                    slices,
                    cube,
                } => {
                    let label = array_label(*array);
                    let texture = if *cube {
                        Texture2DArray::new_cube(&self.ctx, *size, *slices, Some(label))
                    } else {
                        Texture2DArray::new(&self.ctx, *size, *slices, Some(label))
                    };
                    self.arrays.insert(*array, texture);
                }
                ReplayStep::ShadowPass(pass) => self.encode_shadow_pass(&mut encoder, pass, casters)?,
                ReplayStep::UploadTextureSlice {
                    array,
                    slice,
                    texture,
                } => {
                    let target = self
                        .arrays
                        .get(array)
                        .ok_or_else(|| LightLoopError::MissingResource(array_label(*array).into()))?;
                    let copied = match textures.texture(*texture) {
                        Some(source) => target.copy_slice(&mut encoder, source, *slice),
                        None => Err(anyhow::anyhow!("texture not provided by the host")),
                    };
                    if let Err(err) = copied {
                        tracing::warn!(?texture, ?array, slice, "slice upload skipped: {err:#}");
                        self.failed_uploads.push(SliceUploadFailure {
                            array: *array,
                            slice: *slice,
                            texture: *texture,
                        });
                    }
                }
                ReplayStep::WriteBuffer { buffer, command } => {
                    if let Some(Command::SetGlobalBuffer { data, .. }) = commands.get(*command) {
                        let storage = self.storage(*buffer)?;
                        check_upload(*buffer, data.len(), storage.size())?;
                        storage.write(&self.ctx, data)?;
                    }
                }
                ReplayStep::Bind(texture) => {
                    self.check_bound(*texture)?;
                    self.bound.push(*texture);
                }
                ReplayStep::Dispatch { kernel, groups } => {
                    self.encode_dispatch(&mut encoder, *kernel, *groups, scene_depth)?
                }
            }
        }

        Ok(encoder.finish())
    }

    fn check_bound(&self, texture: GlobalTexture) -> Result<()> {
        let present = match texture {
            GlobalTexture::Atlas(target) => self.atlases.contains_key(&target),
            GlobalTexture::Array(array) => self.arrays.contains_key(&array),
        };
        if present {
            Ok(())
        } else {
            Err(LightLoopError::MissingResource(format!("{texture:?}")))
        }
    }

    fn encode_shadow_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &ShadowPass,
        casters: &dyn ShadowCasterSource,
    ) -> Result<()> {
        let atlas = self
            .atlases
            .get(&pass.target)
            .ok_or_else(|| LightLoopError::MissingResource(atlas_label(pass.target).into()))?;
        let (width, height) = atlas.size();

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(atlas_label(pass.target)),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: atlas.view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        for draw in &pass.draws {
            let v = draw
                .viewport
                .unwrap_or_else(|| Viewport::new(0, 0, width, height));
            render_pass.set_viewport(
                v.x as f32,
                v.y as f32,
                v.width as f32,
                v.height as f32,
                0.0,
                1.0,
            );
            render_pass.set_bind_group(
                0,
                &self.view_projection_bind_group,
                &[self.view_projections.offset(draw.view_projection as u32)],
            );
            casters.draw_casters(&mut render_pass, draw.light_index, draw.slice);
        }
        Ok(())
    }

    fn encode_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: ComputeKernel,
        groups: [u32; 3],
        scene_depth: &wgpu::TextureView,
    ) -> Result<()> {
        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tile lights bind group"),
            layout: &self.tile_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.storage(GlobalBuffer::TileParams)?.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.storage(GlobalBuffer::LightBounds)?.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.storage(GlobalBuffer::TileLightIndices)?.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(scene_depth),
                },
            ],
        });

        let pipeline = match kernel {
            ComputeKernel::BuildTileLists => &self.tile_pipeline,
            ComputeKernel::BuildClusterLists => &self.cluster_pipeline,
        };

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("build light lists"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }
}

fn atlas_label(target: RenderTargetId) -> &'static str {
    match target {
        RenderTargetId::ShadowAtlas => "shadow atlas",
        RenderTargetId::CascadeShadowAtlas => "cascade shadow atlas",
    }
}

fn array_label(array: TextureArrayId) -> &'static str {
    match array {
        TextureArrayId::Cookies => "cookie array",
        TextureArrayId::CubeCookies => "cube cookie array",
        TextureArrayId::ReflectionProbes => "reflection probe array",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandList, CommandSink};
    use crate::config::LightLoopSettings;
    use crate::light::{LightType, ShadowMode, VisibleLight};
    use crate::light_loop::{FrameInput, LightLoop};
    use crate::shadow::{PrecomputedShadowSlices, ShadowSlice};
    use crate::tile::CameraParams;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_oversized_upload_is_an_error() {
        assert!(check_upload(GlobalBuffer::ShadowData, 64, 64).is_ok());
        assert!(check_upload(GlobalBuffer::ShadowData, 0, 4).is_ok());
        assert!(matches!(
            check_upload(GlobalBuffer::ShadowData, 65, 64),
            Err(LightLoopError::UploadTooLarge {
                buffer: GlobalBuffer::ShadowData,
                len: 65,
                capacity: 64,
            })
        ));
    }

    #[test]
    fn test_shadow_view_uniform_layout() {
        assert_eq!(std::mem::size_of::<ShadowViewUniform>(), 128);
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let uniform = ShadowViewUniform::new(view, Mat4::IDENTITY);
        assert_eq!(uniform.view_projection, view.to_cols_array_2d());
    }

    #[test]
    fn test_clear_to_reset_is_one_pass() {
        let mut list = CommandList::new();
        list.clear_depth(RenderTargetId::ShadowAtlas);
        list.set_viewport(Viewport::new(0, 0, 256, 256));
        list.set_view_projection(Mat4::IDENTITY, Mat4::IDENTITY);
        list.draw_shadows(0, 0);
        list.set_viewport(Viewport::new(256, 0, 256, 256));
        list.set_view_projection(Mat4::IDENTITY, Mat4::IDENTITY);
        list.draw_shadows(1, 0);
        list.reset_viewport();

        let plan = plan_replay(list.commands()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.view_projections.len(), 2);

        let pass = plan.shadow_passes().next().unwrap();
        assert_eq!(pass.target, RenderTargetId::ShadowAtlas);
        assert_eq!(
            pass.draws,
            vec![
                ShadowDraw {
                    viewport: Some(Viewport::new(0, 0, 256, 256)),
                    view_projection: 0,
                    light_index: 0,
                    slice: 0,
                },
                ShadowDraw {
                    viewport: Some(Viewport::new(256, 0, 256, 256)),
                    view_projection: 1,
                    light_index: 1,
                    slice: 0,
                },
            ]
        );
    }

    #[test]
    fn test_draw_outside_pass_is_rejected() {
        let mut list = CommandList::new();
        list.set_view_projection(Mat4::IDENTITY, Mat4::IDENTITY);
        list.draw_shadows(0, 0);
        assert!(matches!(
            plan_replay(list.commands()),
            Err(LightLoopError::OutsideShadowPass("draw_shadows"))
        ));
    }

    #[test]
    fn test_draw_without_view_projection_is_rejected() {
        let mut list = CommandList::new();
        list.clear_depth(RenderTargetId::ShadowAtlas);
        list.draw_shadows(0, 0);
        assert!(matches!(
            plan_replay(list.commands()),
            Err(LightLoopError::MissingResource(_))
        ));
    }

    #[test]
    fn test_other_commands_close_an_open_pass() {
        let mut list = CommandList::new();
        list.clear_depth(RenderTargetId::CascadeShadowAtlas);
        list.set_global_buffer(GlobalBuffer::ShadowData, &[0; 4]);
        list.dispatch_compute(ComputeKernel::BuildTileLists, [2, 2, 1]);

        let plan = plan_replay(list.commands()).unwrap();
        assert_eq!(
            plan.steps,
            vec![
                ReplayStep::ShadowPass(ShadowPass {
                    target: RenderTargetId::CascadeShadowAtlas,
                    draws: Vec::new(),
                }),
                ReplayStep::WriteBuffer {
                    buffer: GlobalBuffer::ShadowData,
                    command: 1,
                },
                ReplayStep::Dispatch {
                    kernel: ComputeKernel::BuildTileLists,
                    groups: [2, 2, 1],
                },
            ]
        );
    }

    #[test]
    fn test_light_loop_frame_plans_one_pass_per_atlas() {
        let lights = vec![
            VisibleLight::new(LightType::Directional, Mat4::IDENTITY).with_shadows(ShadowMode::Soft),
            VisibleLight::new(LightType::Point, Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)))
                .with_shadows(ShadowMode::Hard),
        ];
        let slice = ShadowSlice {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            split_sphere: Vec4::new(0.0, 0.0, 0.0, 10.0),
        };
        let mut slices = PrecomputedShadowSlices::new();
        slices.insert(0, vec![slice; 4]);
        slices.insert(1, vec![slice; 6]);

        let mut light_loop = LightLoop::new(LightLoopSettings::default()).unwrap();
        let mut list = CommandList::new();
        let input = FrameInput {
            camera: CameraParams::perspective(
                Vec3::new(0.0, 0.0, 10.0),
                Vec3::ZERO,
                1.0,
                1.0,
                0.1,
                100.0,
            ),
            lights: &lights,
            probes: &[],
            shadow_slices: &slices,
            screen_size: (640, 480),
        };
        let stats = light_loop.render_frame(&input, &mut list).unwrap();

        let plan = plan_replay(list.commands()).unwrap();
        let passes: Vec<_> = plan.shadow_passes().collect();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].target, RenderTargetId::ShadowAtlas);
        assert_eq!(passes[1].target, RenderTargetId::CascadeShadowAtlas);

        let draws: usize = passes.iter().map(|p| p.draws.len()).sum();
        assert_eq!(draws, stats.shadow_slices_drawn);
        assert_eq!(plan.view_projections.len(), stats.shadow_slices_drawn);
        assert!(plan
            .steps
            .iter()
            .any(|s| matches!(s, ReplayStep::Dispatch { .. })));
    }
}
