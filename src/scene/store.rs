use log::debug;

use crate::error::{RenderError, RenderResult};
use crate::geometry::Mesh;
use crate::wgpu_ctx::WgpuContext;
use crate::wgpu_utils::{
    begin_one_shot, capture_device_errors, create_buffer, create_staging_buffer, submit_and_wait,
};

/// Usage shared by both geometry buffers: read by the kernel, consumed by
/// BLAS builds, filled by the upload copy.
pub const GEOMETRY_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::BLAS_INPUT)
    .union(wgpu::BufferUsages::COPY_DST);

/// Device-local vertex and index buffers of the scene mesh.
pub struct SceneStore {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_vertices: u32,
    pub num_indices: u32,
}

impl SceneStore {
    /// Uploads `mesh` with a single copy submission. The staging buffers are
    /// released as soon as the copy has completed.
    pub fn upload(ctx: &WgpuContext, mesh: &Mesh) -> RenderResult<Self> {
        let (vertex_buffer, index_buffer) = capture_device_errors(
            &ctx.device,
            |e| RenderError::submission(format!("scene upload: {e}")),
            || {
                let vertex_staging =
                    create_staging_buffer(&ctx.device, "Vertex Staging", mesh.positions());
                let index_staging =
                    create_staging_buffer(&ctx.device, "Index Staging", mesh.indices());

                let vertex_buffer = create_buffer(
                    &ctx.device,
                    "Scene Vertex Buffer",
                    vertex_staging.size(),
                    GEOMETRY_USAGE,
                );
                let index_buffer = create_buffer(
                    &ctx.device,
                    "Scene Index Buffer",
                    index_staging.size(),
                    GEOMETRY_USAGE,
                );

                let mut encoder = begin_one_shot(&ctx.device, "Scene Upload");
                let (vertex_bytes, index_bytes) = (vertex_staging.size(), index_staging.size());
                encoder.copy_buffer_to_buffer(&vertex_staging, 0, &vertex_buffer, 0, vertex_bytes);
                encoder.copy_buffer_to_buffer(&index_staging, 0, &index_buffer, 0, index_bytes);
                submit_and_wait(&ctx.device, &ctx.queue, encoder)?;

                debug!("Uploaded {vertex_bytes} vertex bytes, {index_bytes} index bytes");
                vertex_staging.destroy();
                index_staging.destroy();
                Ok((vertex_buffer, index_buffer))
            },
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            num_vertices: mesh.vertex_count(),
            num_indices: mesh.index_count(),
        })
    }

    pub fn triangle_count(&self) -> u32 {
        self.num_indices / 3
    }
}
