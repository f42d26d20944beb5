//! Core GPU abstractions
//!
//! This module provides mid-level abstractions over wgpu primitives.

pub mod buffer;
pub mod pipeline;
pub mod texture;

pub use buffer::{DynamicUniformBuffer, StorageBuffer};
pub use pipeline::{ComputePipelineBuilder, ShadowCasterPipelineBuilder};
pub use texture::{DepthTexture, SliceShape, Texture2DArray};
