use bytemuck::{Pod, Zeroable};
use log::info;

use crate::config::{OutputKind, WorkgroupSize};
use crate::error::{RenderError, RenderResult};
use crate::kernel::KernelBinary;
use crate::scene::{SceneStore, TopLevel};
use crate::target::{self, OutputTarget};
use crate::wgpu_ctx::WgpuContext;
use crate::wgpu_utils::capture_device_errors;

/// Per-pass parameters pushed as immediate data.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PushConstants {
    pub render_width: u32,
    pub render_height: u32,
    pub sample_batch: u32,
}

// Immediate data ranges are sized in multiples of 4 bytes.
const _: () = assert!(std::mem::size_of::<PushConstants>() % 4 == 0);

pub const PUSH_CONSTANTS_SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;

impl PushConstants {
    pub fn new(render_width: u32, render_height: u32, sample_batch: u32) -> Self {
        Self {
            render_width,
            render_height,
            sample_batch,
        }
    }
}

pub fn validate_push_constant_size(size: u32) -> RenderResult<()> {
    if size == 0 || size % 4 != 0 {
        return Err(RenderError::pipeline(format!(
            "push constant block of {size} bytes is not a non-zero multiple of 4"
        )));
    }
    Ok(())
}

/// Kernel-visible resource slots of bind group 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingSlot {
    OutputTarget = 0,
    Tlas = 1,
    Vertices = 2,
    Indices = 3,
}

impl BindingSlot {
    pub const ALL: [BindingSlot; 4] = [
        BindingSlot::OutputTarget,
        BindingSlot::Tlas,
        BindingSlot::Vertices,
        BindingSlot::Indices,
    ];

    pub fn binding(self) -> u32 {
        self as u32
    }
}

fn read_only_storage() -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only: true },
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

/// The four fixed slots, all compute-only.
pub fn declare_bindings(output: OutputKind) -> [wgpu::BindGroupLayoutEntry; 4] {
    BindingSlot::ALL.map(|slot| wgpu::BindGroupLayoutEntry {
        binding: slot.binding(),
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: match slot {
            BindingSlot::OutputTarget => target::binding_type(output),
            BindingSlot::Tlas => wgpu::BindingType::AccelerationStructure {
                vertex_return: false,
            },
            BindingSlot::Vertices | BindingSlot::Indices => read_only_storage(),
        },
        count: None,
    })
}

/// Compute pipeline running the path-tracing kernel, its layout and the
/// bind group tying the slots to scene resources.
pub struct RaytracePass {
    bind_group: Option<wgpu::BindGroup>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    output: OutputKind,
    workgroup: WorkgroupSize,
    push_constant_size: u32,
}

impl RaytracePass {
    pub fn new(
        ctx: &WgpuContext,
        output: OutputKind,
        kernel: &KernelBinary,
        push_constant_size: u32,
    ) -> RenderResult<Self> {
        validate_push_constant_size(push_constant_size)?;

        let entries = declare_bindings(output);
        let (bind_group_layout, pipeline) = capture_device_errors(
            &ctx.device,
            |e| RenderError::pipeline(format!("kernel '{}': {e}", kernel.entry_point())),
            || {
                let bind_group_layout =
                    ctx.device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some("Raytrace Bind Group Layout"),
                            entries: &entries,
                        });

                let pipeline_layout =
                    ctx.device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some("Raytrace Pipeline Layout"),
                            bind_group_layouts: &[&bind_group_layout],
                            immediate_size: push_constant_size,
                        });

                let shader = ctx
                    .device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some("Raytrace Kernel"),
                        source: kernel.shader_source(),
                    });

                let pipeline =
                    ctx.device
                        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some("Raytrace Pipeline"),
                            layout: Some(&pipeline_layout),
                            module: &shader,
                            entry_point: Some(kernel.entry_point()),
                            compilation_options: Default::default(),
                            cache: None,
                        });
                Ok((bind_group_layout, pipeline))
            },
        )?;

        info!(
            "Built compute pipeline '{}' ({} byte immediates, {:?} output)",
            kernel.entry_point(),
            push_constant_size,
            output
        );

        Ok(Self {
            bind_group: None,
            pipeline,
            bind_group_layout,
            output,
            workgroup: kernel.workgroup(),
            push_constant_size,
        })
    }

    pub fn workgroup(&self) -> WorkgroupSize {
        self.workgroup
    }

    /// Points all four slots at their resources in one update. Calling it
    /// again replaces the previous bind group.
    pub fn write_bindings(
        &mut self,
        ctx: &WgpuContext,
        target: &OutputTarget,
        tlas: &TopLevel,
        store: &SceneStore,
    ) -> RenderResult<()> {
        if target.kind() != self.output {
            return Err(RenderError::pipeline(format!(
                "output target is {:?} but the layout declares {:?}",
                target.kind(),
                self.output
            )));
        }

        let bind_group = capture_device_errors(
            &ctx.device,
            |e| RenderError::pipeline(format!("binding update: {e}")),
            || {
                Ok(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Raytrace Bind Group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: BindingSlot::OutputTarget.binding(),
                            resource: target.binding_resource(),
                        },
                        wgpu::BindGroupEntry {
                            binding: BindingSlot::Tlas.binding(),
                            resource: wgpu::BindingResource::AccelerationStructure(&tlas.tlas),
                        },
                        wgpu::BindGroupEntry {
                            binding: BindingSlot::Vertices.binding(),
                            resource: store.vertex_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: BindingSlot::Indices.binding(),
                            resource: store.index_buffer.as_entire_binding(),
                        },
                    ],
                }))
            },
        )?;
        self.bind_group = Some(bind_group);
        Ok(())
    }

    /// Records one dispatch of the kernel over `grid` workgroups.
    pub fn execute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        push_constants: &PushConstants,
        grid: [u32; 3],
    ) -> RenderResult<()> {
        let bind_group = self
            .bind_group
            .as_ref()
            .ok_or_else(|| RenderError::pipeline("bindings were not written before dispatch"))?;
        let bytes = bytemuck::bytes_of(push_constants);
        if bytes.len() as u32 != self.push_constant_size {
            return Err(RenderError::pipeline(format!(
                "pushing {} bytes into a {} byte immediate range",
                bytes.len(),
                self.push_constant_size
            )));
        }

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Raytrace Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, bind_group, &[]);
        cpass.set_immediates(0, bytes);
        cpass.dispatch_workgroups(grid[0], grid[1], grid[2]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_are_word_aligned() {
        assert_eq!(PUSH_CONSTANTS_SIZE, 12);
        assert!(validate_push_constant_size(PUSH_CONSTANTS_SIZE).is_ok());
    }

    #[test]
    fn misaligned_push_constant_size_is_rejected() {
        for size in [0, 1, 6, 13] {
            let err = validate_push_constant_size(size).unwrap_err();
            assert!(matches!(err, RenderError::PipelineBuild(_)));
        }
    }

    #[test]
    fn push_constant_bytes_follow_field_order() {
        let pc = PushConstants::new(800, 600, 31);
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&pc));
        assert_eq!(words, &[800, 600, 31]);
    }

    #[test]
    fn four_compute_only_slots() {
        let entries = declare_bindings(OutputKind::Buffer);
        assert_eq!(entries.len(), 4);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.binding, i as u32);
            assert_eq!(entry.visibility, wgpu::ShaderStages::COMPUTE);
            assert_eq!(entry.count, None);
        }
        assert!(matches!(
            entries[BindingSlot::Tlas.binding() as usize].ty,
            wgpu::BindingType::AccelerationStructure { .. }
        ));
        for slot in [BindingSlot::Vertices, BindingSlot::Indices] {
            assert!(matches!(
                entries[slot.binding() as usize].ty,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    ..
                }
            ));
        }
    }

    #[test]
    fn image_output_changes_only_slot_zero() {
        let buffer = declare_bindings(OutputKind::Buffer);
        let image = declare_bindings(OutputKind::Image);
        assert_ne!(buffer[0], image[0]);
        assert_eq!(buffer[1..], image[1..]);
    }
}
