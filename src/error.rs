//! Error types
//!
//! Only conditions that abort the current frame are errors. Capacity
//! saturation, packing failure and missing per-light data are reported
//! through `tracing` and degrade the frame instead.

use crate::command::{GlobalBuffer, RenderTargetId, TextureArrayId};

/// Fatal light loop errors.
#[derive(Debug, thiserror::Error)]
pub enum LightLoopError {
    /// A buffer (re)allocation exceeds what the device can hold.
    #[error("buffer {buffer:?} needs {requested} bytes, device limit is {limit}")]
    BufferTooLarge {
        buffer: GlobalBuffer,
        requested: u64,
        limit: u64,
    },

    /// An upload is larger than the buffer it targets.
    #[error("upload of {len} bytes to {buffer:?} exceeds its {capacity}-byte allocation")]
    UploadTooLarge {
        buffer: GlobalBuffer,
        len: u64,
        capacity: u64,
    },

    /// A render target exceeds the maximum texture dimension.
    #[error("render target {target:?} of {width}x{height} exceeds the {limit} texel limit")]
    TextureTooLarge {
        target: RenderTargetId,
        width: u32,
        height: u32,
        limit: u32,
    },

    /// A texture array exceeds the maximum size or layer count.
    #[error("texture array {array:?} with {layers} layers of {size}px exceeds device limits")]
    TextureArrayTooLarge {
        array: TextureArrayId,
        size: u32,
        layers: u32,
    },

    /// Settings that cannot produce a working configuration.
    #[error("invalid light loop settings: {0}")]
    InvalidSettings(String),

    /// Camera planes the tile build cannot slice.
    #[error("camera planes must satisfy 0 < near < far, got near {near} far {far}")]
    InvalidCamera { near: f32, far: f32 },

    /// A command referenced a resource that was never allocated.
    #[error("resource {0} used before allocation")]
    MissingResource(String),

    /// A shadow draw command arrived outside a `clear_depth` .. `reset_viewport` span.
    #[error("{0} recorded outside a shadow pass")]
    OutsideShadowPass(&'static str),

    /// A wgpu operation failed (pipeline creation, copies, read-back).
    #[error("gpu backend error: {0}")]
    Gpu(#[from] anyhow::Error),
}

/// Result alias for fallible light loop operations.
pub type Result<T> = std::result::Result<T, LightLoopError>;
