//! Rein light loop
//!
//! Per-frame lighting preparation for the rein 3D engine on wgpu: GPU light
//! lists, shadow atlas packing, cookie and reflection texture caches, and
//! tiled or clustered light culling.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **context** - Core wgpu wrapper (Device, Queue)
//! 2. **core** - GPU primitives (buffers, textures, pipelines)
//! 3. **compute** - Compute dispatch and read-back utilities
//! 4. **command** - Recorded GPU work the CPU side emits
//! 5. **light** - Visible lights and the GPU light list builder
//! 6. **shadow** - Shadow atlas packing and shadow records
//! 7. **texture_cache** - Slice caches for cookies and reflection probes
//! 8. **tile** - Screen-space light bounds and tile / cluster lists
//! 9. **light_loop** - Frame orchestration
//! 10. **gpu** - wgpu backend replaying recorded frames
//!
//! Everything above **gpu** runs without a device: a frame records into a
//! [`CommandList`], which [`WgpuBackend::replay`] turns into a command buffer.

pub mod command;
pub mod compute;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod gpu;
pub mod light;
pub mod light_loop;
pub mod shadow;
pub mod texture_cache;
pub mod tile;

// Re-export commonly used types
pub use context::WgpuContext;

pub use core::{
    ComputePipelineBuilder, DepthTexture, DynamicUniformBuffer, ShadowCasterPipelineBuilder,
    SliceShape, StorageBuffer, Texture2DArray,
};

pub use command::{
    Command, CommandList, CommandSink, ComputeKernel, GlobalBuffer, GlobalTexture,
    RenderTargetId, ResourceLimits, TextureArrayId,
};

pub use config::{
    LightCapacities, LightLoopSettings, ShadowSettings, TextureCacheSettings, TileSettings,
};

pub use error::{LightLoopError, Result};

pub use light::{
    AdditionalLightData, DirectionalLightData, EnvLightData, EnvShape, GpuLightType,
    LightArchetype, LightData, LightList, LightListBuilder, LightListStats, LightType,
    ProbeShape, ShadowMode, VisibleLight, VisibleReflectionProbe, INVALID_INDEX,
};

pub use shadow::{
    DirectionalShadowData, LayoutStatus, PrecomputedShadowSlices, ShadowAtlas, ShadowData,
    ShadowLayoutOutcome, ShadowManager, ShadowRequest, ShadowRequestKind, ShadowSlice,
    ShadowSliceSource, Viewport,
};

pub use texture_cache::{
    LightTextureCaches, SliceUploadFailure, TextureHandle, TextureSliceCache,
};

pub use tile::{CameraParams, LightBounds, TileLightBuilder, TileParams};

pub use light_loop::{FrameInput, FrameStats, LightLoop};

pub use gpu::{ShadowCasterSource, TextureSource, WgpuBackend};

pub use compute::{compute_workgroup_count, read_back};

// Re-export glam for convenience
pub use glam;
