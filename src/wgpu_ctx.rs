use log::{info, warn};

use crate::config::{OutputKind, RenderConfig};
use crate::error::{RenderError, RenderResult};
use crate::geometry::Mesh;
use crate::target::row_layout;

/// What the render needs from the adapter. Checked once, before any
/// resource is created.
#[derive(Copy, Clone, Debug)]
pub struct DeviceRequirements {
    /// Bytes of immediate (push constant) data the pipeline pushes per pass.
    pub immediate_size: u32,
    /// Render into a read-write `Rgba32Float` storage texture.
    pub image_target: bool,
}

pub struct WgpuContext {
    pub _instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WgpuContext {
    /// Blocking wrapper around [`WgpuContext::new`].
    pub fn headless(requirements: &DeviceRequirements) -> RenderResult<Self> {
        pollster::block_on(Self::new(requirements))
    }

    pub async fn new(requirements: &DeviceRequirements) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::from_env().unwrap_or(wgpu::Backends::VULKAN),
            flags: wgpu::InstanceFlags::from_env_or_default(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::capability(format!("no suitable adapter: {e}")))?;

        let info = adapter.get_info();
        info!("Adapter: {} ({:?})", info.name, info.backend);
        info!("Driver: {}", info.driver_info);

        let required_features = check_capabilities(&adapter, requirements)?;

        // Size limits follow the adapter so large renders are not capped at
        // the WebGPU defaults; `check_limits` validates against them.
        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_immediate_size: requirements.immediate_size,
            max_texture_dimension_2d: adapter_limits.max_texture_dimension_2d,
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..wgpu::Limits::default().using_minimum_supported_acceleration_structure_values()
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Path Tracer Device"),
                required_features,
                required_limits,
                experimental_features: unsafe { wgpu::ExperimentalFeatures::enabled() },
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::capability(format!("device request failed: {e}")))?;

        Ok(Self {
            _instance: instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}

fn check_capabilities(
    adapter: &wgpu::Adapter,
    requirements: &DeviceRequirements,
) -> RenderResult<wgpu::Features> {
    let features = adapter.features();

    if !features.contains(wgpu::Features::EXPERIMENTAL_RAY_QUERY) {
        return Err(RenderError::capability(
            "hardware ray tracing (ray query / acceleration structures) is not supported",
        ));
    }
    if !features.contains(wgpu::Features::IMMEDIATES) {
        return Err(RenderError::capability(
            "immediate data (push constants) is not supported",
        ));
    }

    let max_immediate_size = adapter.limits().max_immediate_size;
    if max_immediate_size < requirements.immediate_size {
        return Err(RenderError::capability(format!(
            "adapter allows {max_immediate_size} bytes of immediate data, {} required",
            requirements.immediate_size
        )));
    }

    let mut required = wgpu::Features::EXPERIMENTAL_RAY_QUERY | wgpu::Features::IMMEDIATES;

    if requirements.image_target {
        let format_features = adapter.get_texture_format_features(wgpu::TextureFormat::Rgba32Float);
        let read_write = format_features
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE);
        if !read_write
            || !features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            return Err(RenderError::capability(
                "read-write Rgba32Float storage textures are not supported; use the buffer target",
            ));
        }
        required |= wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
    }

    if is_software_adapter(adapter) {
        warn!("Adapter is a software rasterizer; rendering will be slow");
    }

    Ok(required)
}

fn is_software_adapter(adapter: &wgpu::Adapter) -> bool {
    adapter.get_info().device_type == wgpu::DeviceType::Cpu
}

fn exceeds(what: &str, needed: u64, limit: u64) -> RenderResult<()> {
    if needed > limit {
        return Err(RenderError::capability(format!(
            "{what} needs {needed}, the device allows {limit}"
        )));
    }
    Ok(())
}

/// Checks that every resource a render of `mesh` at `config` creates fits the
/// device `limits`. Runs before anything is allocated.
pub fn check_limits(
    config: &RenderConfig,
    mesh: &Mesh,
    limits: &wgpu::Limits,
) -> RenderResult<()> {
    let binding = limits.max_storage_buffer_binding_size as u64;
    let buffer = limits.max_buffer_size;

    match config.output {
        OutputKind::Buffer => {
            exceeds("output buffer binding (bytes)", config.image_byte_size(), binding)?;
        }
        OutputKind::Image => {
            let max_dim = limits.max_texture_dimension_2d as u64;
            exceeds("output texture width", config.width as u64, max_dim)?;
            exceeds("output texture height", config.height as u64, max_dim)?;
        }
    }
    let readback = row_layout(config.output, config.width, config.channels());
    exceeds(
        "readback buffer (bytes)",
        readback.padded_bytes_per_row as u64 * config.height as u64,
        buffer,
    )?;

    let grid = config.dispatch_grid();
    let max_groups = limits.max_compute_workgroups_per_dimension as u64;
    exceeds("dispatch grid width", grid[0] as u64, max_groups)?;
    exceeds("dispatch grid height", grid[1] as u64, max_groups)?;

    let wg = config.workgroup;
    exceeds("workgroup width", wg.width as u64, limits.max_compute_workgroup_size_x as u64)?;
    exceeds("workgroup height", wg.height as u64, limits.max_compute_workgroup_size_y as u64)?;
    exceeds(
        "workgroup invocations",
        wg.width as u64 * wg.height as u64,
        limits.max_compute_invocations_per_workgroup as u64,
    )?;

    let vertex_bytes = std::mem::size_of_val(mesh.positions()) as u64;
    let index_bytes = std::mem::size_of_val(mesh.indices()) as u64;
    exceeds("vertex buffer binding (bytes)", vertex_bytes, binding.min(buffer))?;
    exceeds("index buffer binding (bytes)", index_bytes, binding.min(buffer))?;
    exceeds(
        "BLAS triangles",
        mesh.triangle_count() as u64,
        limits.max_blas_primitive_count as u64,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkgroupSize;

    fn default_limits() -> wgpu::Limits {
        wgpu::Limits::default().using_minimum_supported_acceleration_structure_values()
    }

    #[test]
    fn default_render_fits_default_limits() {
        let config = RenderConfig::default();
        assert!(check_limits(&config, &Mesh::cube(), &default_limits()).is_ok());
        let image = RenderConfig::default().output(OutputKind::Image);
        assert!(check_limits(&image, &Mesh::cube(), &default_limits()).is_ok());
    }

    #[test]
    fn oversized_output_buffer_is_a_capability_error() {
        // 4096 * 4096 * 12 bytes = 192 MiB against a 128 MiB binding.
        let config = RenderConfig::new(4096, 4096);
        assert!(config.validate().is_ok());
        let err = check_limits(&config, &Mesh::cube(), &default_limits()).unwrap_err();
        assert!(matches!(err, RenderError::DeviceCapability(_)));
    }

    #[test]
    fn wide_image_target_is_a_capability_error() {
        let config = RenderConfig::new(9000, 16).output(OutputKind::Image);
        assert!(config.validate().is_ok());
        let err = check_limits(&config, &Mesh::cube(), &default_limits()).unwrap_err();
        assert!(matches!(err, RenderError::DeviceCapability(_)));
    }

    #[test]
    fn larger_adapter_limits_admit_large_renders() {
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 30,
            max_buffer_size: 1 << 30,
            ..default_limits()
        };
        let config = RenderConfig::new(4096, 4096);
        assert!(check_limits(&config, &Mesh::cube(), &limits).is_ok());
    }

    #[test]
    fn oversized_workgroup_is_rejected() {
        let config = RenderConfig::new(64, 64).workgroup(WorkgroupSize::new(32, 32));
        assert!(check_limits(&config, &Mesh::cube(), &default_limits()).is_err());
    }

    #[test]
    fn meshes_need_acceleration_structure_limits() {
        let no_ray_tracing = wgpu::Limits::default();
        let err = check_limits(&RenderConfig::default(), &Mesh::cube(), &no_ray_tracing)
            .unwrap_err();
        assert!(matches!(err, RenderError::DeviceCapability(_)));
    }
}
