use crate::error::{RenderError, RenderResult};

pub fn create_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}

/// Creates a `MAP_WRITE | COPY_SRC` buffer already holding `data`. Used as
/// the source of a one-shot upload copy and dropped once the copy completed.
pub fn create_staging_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    label: &str,
    data: &[T],
) -> wgpu::Buffer {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes.len() as u64,
        usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    buffer
        .slice(..)
        .get_mapped_range_mut()
        .copy_from_slice(bytes);
    buffer.unmap();
    buffer
}

/// Row pitch of a texture-to-buffer copy, padded to
/// `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn get_padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded_bytes_per_row = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padding = (align - unpadded_bytes_per_row % align) % align;
    unpadded_bytes_per_row + padding
}

pub fn begin_one_shot(device: &wgpu::Device, label: &str) -> wgpu::CommandEncoder {
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
}

/// Finishes `encoder`, submits it and blocks until the queue is idle.
pub fn submit_and_wait(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    encoder: wgpu::CommandEncoder,
) -> RenderResult<()> {
    queue.submit(std::iter::once(encoder.finish()));
    wait_idle(device)
}

pub fn wait_idle(device: &wgpu::Device) -> RenderResult<()> {
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map(|_| ())
        .map_err(|e| RenderError::submission(format!("waiting for the GPU failed: {e}")))
}

/// Runs `f` inside out-of-memory and validation error scopes. An error the
/// device reports while `f` runs is turned into a [`RenderError`] by
/// `on_error` instead of reaching the uncaptured-error handler.
pub fn capture_device_errors<T>(
    device: &wgpu::Device,
    on_error: impl FnOnce(String) -> RenderError,
    f: impl FnOnce() -> RenderResult<T>,
) -> RenderResult<T> {
    let oom_scope = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let validation_scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = f();
    // Scopes pop innermost first.
    let validation = pollster::block_on(validation_scope.pop());
    let oom = pollster::block_on(oom_scope.pop());

    let value = result?;
    match validation.or(oom) {
        Some(err) => Err(on_error(err.to_string())),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_row_is_aligned_and_large_enough() {
        for width in [1, 3, 16, 63, 64, 65, 800] {
            for bpp in [4, 12, 16] {
                let padded = get_padded_bytes_per_row(width, bpp);
                assert_eq!(padded % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
                assert!(padded >= width * bpp);
                assert!(padded - width * bpp < wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
            }
        }
    }

    #[test]
    fn aligned_rows_are_not_padded() {
        assert_eq!(get_padded_bytes_per_row(64, 16), 1024);
    }
}
