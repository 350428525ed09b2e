use log::debug;

use crate::config::{OutputKind, RenderConfig};
use crate::wgpu_utils::{create_buffer, get_padded_bytes_per_row};

const BYTES_PER_FLOAT: u32 = std::mem::size_of::<f32>() as u32;

pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Layout of the rows inside the host-readable buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RowLayout {
    /// Distance between row starts in bytes.
    pub padded_bytes_per_row: u32,
    /// Meaningful bytes at the start of each row.
    pub bytes_per_row: u32,
}

enum Storage {
    Buffer(wgpu::Buffer),
    Image {
        view: wgpu::TextureView,
        texture: wgpu::Texture,
    },
}

/// The resource the kernel accumulates into, plus the `MAP_READ` buffer the
/// final pass copies it to.
pub struct OutputTarget {
    pub width: u32,
    pub height: u32,
    channels: u32,
    // Created last, released first.
    readback: wgpu::Buffer,
    storage: Storage,
}

impl OutputTarget {
    pub fn new(device: &wgpu::Device, config: &RenderConfig) -> Self {
        let (width, height) = (config.width, config.height);
        let channels = config.channels();

        let storage = match config.output {
            OutputKind::Buffer => Storage::Buffer(create_buffer(
                device,
                "Accumulation Buffer",
                config.image_byte_size(),
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            )),
            OutputKind::Image => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Accumulation Texture"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: IMAGE_FORMAT,
                    usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });
                let view = texture.create_view(&Default::default());
                Storage::Image { view, texture }
            }
        };

        let layout = row_layout(config.output, width, channels);
        let readback_size = layout.padded_bytes_per_row as u64 * height as u64;
        let readback = create_buffer(
            device,
            "Readback Buffer",
            readback_size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        debug!(
            "Output target {}x{} ({:?}), readback {} bytes",
            width, height, config.output, readback_size
        );

        Self {
            width,
            height,
            channels,
            readback,
            storage,
        }
    }

    pub fn kind(&self) -> OutputKind {
        match self.storage {
            Storage::Buffer(_) => OutputKind::Buffer,
            Storage::Image { .. } => OutputKind::Image,
        }
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn row_layout(&self) -> RowLayout {
        row_layout(self.kind(), self.width, self.channels)
    }

    pub fn binding_resource(&self) -> wgpu::BindingResource<'_> {
        match &self.storage {
            Storage::Buffer(buffer) => buffer.as_entire_binding(),
            Storage::Image { view, .. } => wgpu::BindingResource::TextureView(view),
        }
    }

    pub fn readback_buffer(&self) -> &wgpu::Buffer {
        &self.readback
    }

    /// Records the hand-off from kernel writes to host reads: a copy of the
    /// accumulated result into the mappable buffer. wgpu orders it after the
    /// dispatch recorded before it in the same encoder.
    pub fn encode_host_visibility(&self, encoder: &mut wgpu::CommandEncoder) {
        match &self.storage {
            Storage::Buffer(buffer) => {
                encoder.copy_buffer_to_buffer(buffer, 0, &self.readback, 0, buffer.size());
            }
            Storage::Image { texture, .. } => {
                let layout = self.row_layout();
                encoder.copy_texture_to_buffer(
                    wgpu::TexelCopyTextureInfo {
                        texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::TexelCopyBufferInfo {
                        buffer: &self.readback,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(layout.padded_bytes_per_row),
                            rows_per_image: Some(self.height),
                        },
                    },
                    wgpu::Extent3d {
                        width: self.width,
                        height: self.height,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }
    }
}

/// Buffers are tightly packed; texture copies pad each row to the copy
/// alignment.
pub fn row_layout(kind: OutputKind, width: u32, channels: u32) -> RowLayout {
    let bytes_per_row = width * channels * BYTES_PER_FLOAT;
    let padded_bytes_per_row = match kind {
        OutputKind::Buffer => bytes_per_row,
        OutputKind::Image => get_padded_bytes_per_row(width, channels * BYTES_PER_FLOAT),
    };
    RowLayout {
        padded_bytes_per_row,
        bytes_per_row,
    }
}

/// Binding declared for the output slot.
pub fn binding_type(kind: OutputKind) -> wgpu::BindingType {
    match kind {
        OutputKind::Buffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        OutputKind::Image => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::ReadWrite,
            format: IMAGE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_rows_are_tight() {
        let layout = row_layout(OutputKind::Buffer, 800, 3);
        assert_eq!(layout.bytes_per_row, 800 * 12);
        assert_eq!(layout.padded_bytes_per_row, layout.bytes_per_row);
    }

    #[test]
    fn image_rows_are_padded_for_copies() {
        let layout = row_layout(OutputKind::Image, 5, 4);
        assert_eq!(layout.bytes_per_row, 80);
        assert_eq!(layout.padded_bytes_per_row, 256);
    }

    #[test]
    fn output_slot_is_writable() {
        assert!(matches!(
            binding_type(OutputKind::Buffer),
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                ..
            }
        ));
        assert!(matches!(
            binding_type(OutputKind::Image),
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::ReadWrite,
                ..
            }
        ));
    }
}
