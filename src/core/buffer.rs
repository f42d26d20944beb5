//! GPU buffer abstractions
//!
//! Untyped storage buffers for the light loop's global data and a uniform
//! buffer addressed with dynamic offsets.

use crate::context::WgpuContext;
use bytemuck::Pod;

/// A GPU storage buffer of fixed size.
pub struct StorageBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) size: u64,
}

impl StorageBuffer {
    /// Usages every storage buffer gets: shader access, uploads and read-back.
    pub const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
        .union(wgpu::BufferUsages::COPY_DST)
        .union(wgpu::BufferUsages::COPY_SRC);

    /// Create a zero-initialized buffer of `size` bytes (rounded up to 4).
    pub fn new(ctx: &WgpuContext, size: u64, label: Option<&str>) -> Self {
        let size = size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: Self::USAGE,
            mapped_at_creation: false,
        });
        Self { buffer, size }
    }

    /// Write bytes at the start of the buffer.
    ///
    /// Fails if `data` is longer than the buffer. A short tail is padded to
    /// the copy alignment.
    pub fn write(&self, ctx: &WgpuContext, data: &[u8]) -> anyhow::Result<()> {
        let len = data.len() as u64;
        anyhow::ensure!(
            len <= self.size,
            "write of {len} bytes exceeds the {}-byte buffer",
            self.size
        );
        if len == 0 {
            return Ok(());
        }
        let aligned = len.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if aligned == len {
            ctx.queue.write_buffer(&self.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(aligned as usize, 0);
            ctx.queue.write_buffer(&self.buffer, 0, &padded);
        }
        Ok(())
    }

    /// Get the raw wgpu buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Binding covering the whole buffer.
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

/// Uniform buffer holding `count` entries of `stride` bytes, bound one
/// entry at a time with a dynamic offset.
pub struct DynamicUniformBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) stride: u64,
    pub(crate) count: u32,
}

impl DynamicUniformBuffer {
    /// Create a buffer for `count` entries of `entry_size` bytes, each
    /// aligned to the device's dynamic offset alignment.
    pub fn new(ctx: &WgpuContext, entry_size: u64, count: u32, label: Option<&str>) -> Self {
        let alignment = u64::from(ctx.device.limits().min_uniform_buffer_offset_alignment);
        let stride = entry_size.next_multiple_of(alignment);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size: stride * u64::from(count.max(1)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            stride,
            count: count.max(1),
        }
    }

    /// Write one entry.
    pub fn write<T: Pod>(&self, ctx: &WgpuContext, index: u32, data: &T) {
        debug_assert!(index < self.count);
        ctx.queue
            .write_buffer(&self.buffer, self.offset(index) as u64, bytemuck::bytes_of(data));
    }

    /// Dynamic offset of an entry.
    pub fn offset(&self, index: u32) -> u32 {
        (u64::from(index) * self.stride) as u32
    }

    /// Get the raw wgpu buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Number of entries.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Bytes between entries.
    pub fn stride(&self) -> u64 {
        self.stride
    }
}
