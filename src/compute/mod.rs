//! Compute dispatch utilities.
//!
//! Workgroup math for the tile kernels and read-back of storage buffers,
//! used to inspect GPU-built light lists on the CPU.

use anyhow::Context;

use crate::context::WgpuContext;
use crate::core::StorageBuffer;

/// Calculate the number of workgroups needed to cover `total_items`
/// with a given `workgroup_size`. Rounds up.
pub fn compute_workgroup_count(total_items: u32, workgroup_size: u32) -> u32 {
    total_items.div_ceil(workgroup_size)
}

/// Read data back from a raw `wgpu::Buffer` to the CPU synchronously.
///
/// Creates a staging buffer, copies `size` bytes from the source buffer,
/// maps it and returns the result as a `Vec<T>`. Blocks until the data is
/// available.
pub fn read_buffer_sync<T: bytemuck::Pod>(
    ctx: &WgpuContext,
    source: &wgpu::Buffer,
    size: u64,
) -> anyhow::Result<Vec<T>> {
    let staging = copy_to_staging(ctx, source, size);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device
        .poll(wgpu::PollType::wait_indefinitely())
        .context("device poll failed during read-back")?;
    rx.recv()
        .context("map callback dropped")?
        .context("failed to map staging buffer")?;

    Ok(collect_mapped(&staging))
}

/// Read data back from a `StorageBuffer` to the CPU synchronously.
///
/// Convenience wrapper around [`read_buffer_sync`] for `StorageBuffer`.
pub fn read_back<T: bytemuck::Pod>(
    ctx: &WgpuContext,
    buffer: &StorageBuffer,
) -> anyhow::Result<Vec<T>> {
    read_buffer_sync(ctx, buffer.buffer(), buffer.size())
}

fn copy_to_staging(ctx: &WgpuContext, source: &wgpu::Buffer, size: u64) -> wgpu::Buffer {
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx.create_encoder(Some("readback copy"));
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    ctx.submit([encoder.finish()]);
    staging
}

fn collect_mapped<T: bytemuck::Pod>(staging: &wgpu::Buffer) -> Vec<T> {
    let data = staging.slice(..).get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    result
}
