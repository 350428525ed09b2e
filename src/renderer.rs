use log::info;

use crate::config::{OutputKind, RenderConfig};
use crate::dispatch::{DispatchLoop, GpuPassSubmitter};
use crate::error::{RenderError, RenderResult};
use crate::geometry::Mesh;
use crate::kernel::KernelBinary;
use crate::passes::{PUSH_CONSTANTS_SIZE, RaytracePass};
use crate::readback::{PixelBuffer, extract_pixels};
use crate::scene::{AccelerationBuilder, InstanceTable, SceneStore, TopLevel};
use crate::target::OutputTarget;
use crate::wgpu_ctx::{DeviceRequirements, WgpuContext, check_limits};
use crate::wgpu_utils::capture_device_errors;

/// How the mesh is placed in the top-level structure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum InstanceLayout {
    /// One instance with the identity transform.
    #[default]
    Single,
    /// `count` randomly transformed copies sharing one BLAS.
    Scattered { count: u32, seed: u64 },
}

/// Device features and limits needed to render `config`.
pub fn device_requirements(config: &RenderConfig) -> DeviceRequirements {
    DeviceRequirements {
        immediate_size: PUSH_CONSTANTS_SIZE,
        image_target: config.output == OutputKind::Image,
    }
}

/// Owns every GPU resource of a render.
///
/// Fields are declared newest first so they are released in reverse order of
/// acquisition. A failure half-way through [`Renderer::new`] drops the
/// resources created so far the same way.
pub struct Renderer {
    pass: RaytracePass,
    target: OutputTarget,
    tlas: TopLevel,
    accel: AccelerationBuilder,
    store: SceneStore,
    config: RenderConfig,
}

impl Renderer {
    pub fn new(
        ctx: &WgpuContext,
        config: RenderConfig,
        mesh: &Mesh,
        layout: InstanceLayout,
        kernel: &KernelBinary,
    ) -> RenderResult<Self> {
        Self::preflight(&config, mesh, kernel)?;
        check_limits(&config, mesh, &ctx.limits())?;

        let store = SceneStore::upload(ctx, mesh)?;

        let mut accel = AccelerationBuilder::new();
        let blas = accel.build_bottom_level(ctx, &store)?;
        let table = match layout {
            InstanceLayout::Single => InstanceTable::single(blas),
            InstanceLayout::Scattered { count, seed } => {
                InstanceTable::scattered(blas, count, seed)
            }
        };
        let tlas = accel.build_top_level(ctx, &table.instances())?;

        let target = capture_device_errors(&ctx.device, RenderError::DeviceCapability, || {
            Ok(OutputTarget::new(&ctx.device, &config))
        })?;

        let mut pass = RaytracePass::new(ctx, config.output, kernel, PUSH_CONSTANTS_SIZE)?;
        pass.write_bindings(ctx, &target, &tlas, &store)?;

        info!(
            "Renderer ready: {}x{}, {} sample batches, {} instances",
            config.width,
            config.height,
            config.sample_batches,
            tlas.instance_count()
        );

        Ok(Self {
            pass,
            target,
            tlas,
            accel,
            store,
            config,
        })
    }

    /// Checks that need no device: resolution, batch count, mesh and the
    /// kernel's workgroup against the dispatch workgroup.
    pub fn preflight(
        config: &RenderConfig,
        mesh: &Mesh,
        kernel: &KernelBinary,
    ) -> RenderResult<()> {
        config.validate()?;
        if mesh.triangle_count() == 0 {
            return Err(RenderError::scene("mesh has no triangles"));
        }
        if kernel.workgroup() != config.workgroup {
            return Err(RenderError::pipeline(format!(
                "kernel declares a {}x{} workgroup but dispatch uses {}x{}",
                kernel.workgroup().width,
                kernel.workgroup().height,
                config.workgroup.width,
                config.workgroup.height
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn top_level(&self) -> &TopLevel {
        &self.tlas
    }

    pub fn blas_count(&self) -> usize {
        self.accel.blas_count()
    }

    pub fn triangle_count(&self) -> u32 {
        self.store.triangle_count()
    }

    /// Runs every sample batch and reads the accumulated image back.
    pub fn render(&self, ctx: &WgpuContext) -> RenderResult<PixelBuffer> {
        let render_start = chrono::Local::now();

        let mut dispatch = DispatchLoop::new(&self.config);
        let mut submitter = GpuPassSubmitter::new(ctx, &self.pass, &self.target);
        dispatch.run(&mut submitter)?;

        let pixels = extract_pixels(ctx, &self.target)?;
        info!(
            "Rendered {} sample batches in {}ms",
            dispatch.completed(),
            chrono::Local::now().timestamp_millis() - render_start.timestamp_millis()
        );
        Ok(pixels)
    }
}
