use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};

use super::instancing::Instance;
use super::store::SceneStore;
use crate::error::{RenderError, RenderResult};
use crate::wgpu_ctx::WgpuContext;
use crate::wgpu_utils::{begin_one_shot, capture_device_errors, submit_and_wait};

/// Instance custom data is 24 bits wide, and Vulkan only guarantees
/// `2^24 - 1` TLAS instances.
pub const MAX_INSTANCES: usize = (1 << 24) - 1;

static NEXT_BUILDER_ID: AtomicU32 = AtomicU32::new(1);

/// A BLAS owned by one [`AccelerationBuilder`]. Only handed out once the
/// build has completed, and only valid with the builder that made it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlasHandle {
    builder: u32,
    index: u32,
}

impl BlasHandle {
    pub(crate) fn new(builder: u32, index: u32) -> Self {
        Self { builder, index }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

pub struct TopLevel {
    pub tlas: wgpu::Tlas,
    instance_count: u32,
}

impl TopLevel {
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Shader-visible identity of instance `index`, i.e. its input position.
    pub fn custom_index(&self, index: usize) -> Option<u32> {
        if index >= self.instance_count as usize {
            return None;
        }
        self.tlas[index].as_ref().map(|inst| inst.custom_data)
    }
}

/// Owns every BLAS and builds the TLAS over them.
pub struct AccelerationBuilder {
    id: u32,
    blases: Vec<wgpu::Blas>,
}

impl Default for AccelerationBuilder {
    fn default() -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            blases: Vec::new(),
        }
    }
}

impl AccelerationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blas_count(&self) -> usize {
        self.blases.len()
    }

    /// Builds one BLAS over the store's triangles and waits for it.
    pub fn build_bottom_level(
        &mut self,
        ctx: &WgpuContext,
        store: &SceneStore,
    ) -> RenderResult<BlasHandle> {
        let triangle_count = store.triangle_count();
        if triangle_count == 0 {
            return Err(RenderError::accel("cannot build a BLAS over zero triangles"));
        }

        let desc = wgpu::BlasTriangleGeometrySizeDescriptor {
            vertex_format: wgpu::VertexFormat::Float32x3,
            vertex_count: store.num_vertices,
            index_format: Some(wgpu::IndexFormat::Uint32),
            index_count: Some(store.num_indices),
            flags: wgpu::AccelerationStructureGeometryFlags::OPAQUE,
        };

        let handle = BlasHandle::new(self.id, self.blases.len() as u32);
        let blas = capture_device_errors(
            &ctx.device,
            |e| RenderError::accel(format!("BLAS build: {e}")),
            || {
                let blas = ctx.device.create_blas(
                    &wgpu::CreateBlasDescriptor {
                        label: Some(&format!("Mesh BLAS {}", handle.index)),
                        flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE
                            | wgpu::AccelerationStructureFlags::ALLOW_COMPACTION,
                        update_mode: wgpu::AccelerationStructureUpdateMode::Build,
                    },
                    wgpu::BlasGeometrySizeDescriptors::Triangles {
                        descriptors: vec![desc.clone()],
                    },
                );

                let mut encoder = begin_one_shot(&ctx.device, "BLAS Build");
                encoder.build_acceleration_structures(
                    std::iter::once(&wgpu::BlasBuildEntry {
                        blas: &blas,
                        geometry: wgpu::BlasGeometries::TriangleGeometries(vec![
                            wgpu::BlasTriangleGeometry {
                                size: &desc,
                                vertex_buffer: &store.vertex_buffer,
                                first_vertex: 0,
                                vertex_stride: std::mem::size_of::<[f32; 3]>() as u64,
                                index_buffer: Some(&store.index_buffer),
                                first_index: Some(0),
                                transform_buffer: None,
                                transform_buffer_offset: None,
                            },
                        ]),
                    }),
                    None,
                );
                submit_and_wait(&ctx.device, &ctx.queue, encoder)
                    .map_err(|e| RenderError::accel(format!("BLAS build: {e}")))?;
                Ok(blas)
            },
        )?;

        info!("Built BLAS {} ({} triangles)", handle.index, triangle_count);
        self.blases.push(blas);
        Ok(handle)
    }

    /// Builds the TLAS from `instances` in order. Every referenced BLAS must
    /// already have been built by this builder.
    pub fn build_top_level(
        &self,
        ctx: &WgpuContext,
        instances: &[Instance],
    ) -> RenderResult<TopLevel> {
        let max_instances =
            MAX_INSTANCES.min(ctx.device.limits().max_tlas_instance_count as usize);
        check_build_order(instances, self.id, self.blases.len(), max_instances)?;

        let tlas = capture_device_errors(
            &ctx.device,
            |e| RenderError::accel(format!("TLAS build: {e}")),
            || {
                let mut tlas = ctx.device.create_tlas(&wgpu::CreateTlasDescriptor {
                    label: Some("Scene TLAS"),
                    max_instances: (instances.len() as u32).max(1),
                    flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
                    update_mode: wgpu::AccelerationStructureUpdateMode::Build,
                });

                for (i, instance) in instances.iter().enumerate() {
                    tlas[i] = Some(wgpu::TlasInstance::new(
                        &self.blases[instance.blas.index()],
                        instance.transform_rows(),
                        i as u32,
                        instance.mask,
                    ));
                }

                let mut encoder = begin_one_shot(&ctx.device, "TLAS Build");
                encoder.build_acceleration_structures(None, Some(&tlas));
                submit_and_wait(&ctx.device, &ctx.queue, encoder)
                    .map_err(|e| RenderError::accel(format!("TLAS build: {e}")))?;
                Ok(tlas)
            },
        )?;

        info!("Built TLAS with {} instances", instances.len());
        debug!(
            "Instances without culling: {}",
            instances
                .iter()
                .filter(|i| i.flags.contains(super::InstanceFlags::TRIANGLE_CULL_DISABLE))
                .count()
        );

        Ok(TopLevel {
            tlas,
            instance_count: instances.len() as u32,
        })
    }
}

/// Rejects instance counts above `max_instances`. Custom indices stay
/// below `2^24` as long as `max_instances <= MAX_INSTANCES`.
pub(crate) fn check_instance_count(count: usize, max_instances: usize) -> RenderResult<()> {
    if count > max_instances {
        return Err(RenderError::accel(format!(
            "{count} instances exceed the limit of {max_instances}"
        )));
    }
    Ok(())
}

/// Rejects instance lists that reference a BLAS which has not finished
/// building or belongs to another builder, or that hold too many instances.
pub(crate) fn check_build_order(
    instances: &[Instance],
    builder: u32,
    built_blases: usize,
    max_instances: usize,
) -> RenderResult<()> {
    check_instance_count(instances.len(), max_instances)?;
    for (i, instance) in instances.iter().enumerate() {
        if instance.blas.builder != builder {
            return Err(RenderError::accel(format!(
                "instance {i} references a BLAS from another acceleration builder"
            )));
        }
        if instance.blas.index() >= built_blases {
            return Err(RenderError::accel(format!(
                "instance {i} references BLAS {} which has not been built ({built_blases} built)",
                instance.blas.index()
            )));
        }
    }
    Ok(())
}
