use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use mini_path_tracer::scene::load_mesh;
use mini_path_tracer::{
    InstanceLayout, KernelBinary, Mesh, OutputKind, RenderConfig, Renderer, WgpuContext,
    WorkgroupSize, device_requirements, save_hdr,
};

#[derive(Parser, Debug)]
#[command(name = "mini-path-tracer")]
#[command(about = "Progressive GPU path tracer writing a Radiance HDR image")]
struct Cli {
    /// Mesh to render (.obj, .gltf or .glb); a unit cube when omitted
    #[arg(short, long)]
    mesh: Option<PathBuf>,

    /// Compute kernel (SPIR-V or WGSL); the bundled path tracer when omitted
    #[arg(short, long)]
    kernel: Option<PathBuf>,

    /// Kernel entry point
    #[arg(long, default_value = "main")]
    entry_point: String,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Number of sample batches accumulated into the image
    #[arg(short, long, default_value_t = 32)]
    batches: u32,

    /// Local workgroup size declared by the kernel, as WxH
    #[arg(long, default_value = "16x8")]
    workgroup: WorkgroupSize,

    /// Output file
    #[arg(short, long, default_value = "out.hdr")]
    output: PathBuf,

    /// Accumulate into a storage texture instead of a storage buffer
    #[arg(long)]
    image_target: bool,

    /// Scatter this many randomly transformed copies of the mesh
    #[arg(long)]
    instances: Option<u32>,

    /// Seed for the instance transforms
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Cli {
    fn render_config(&self) -> RenderConfig {
        let output = if self.image_target {
            OutputKind::Image
        } else {
            OutputKind::Buffer
        };
        RenderConfig::new(self.width, self.height)
            .sample_batches(self.batches)
            .workgroup(self.workgroup)
            .output(output)
    }

    fn instance_layout(&self) -> InstanceLayout {
        match self.instances {
            Some(count) => InstanceLayout::Scattered {
                count,
                seed: self.seed,
            },
            None => InstanceLayout::Single,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.render_config();

    let mesh = match &cli.mesh {
        Some(path) => {
            load_mesh(path).with_context(|| format!("failed to load mesh {}", path.display()))?
        }
        None => Mesh::cube(),
    };
    info!(
        "Mesh: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    );

    let kernel = match &cli.kernel {
        Some(path) => KernelBinary::from_file(path, &cli.entry_point, cli.workgroup)
            .with_context(|| format!("failed to read kernel {}", path.display()))?,
        None => KernelBinary::builtin(config.output),
    };

    Renderer::preflight(&config, &mesh, &kernel).context("invalid render configuration")?;

    let ctx = WgpuContext::headless(&device_requirements(&config))
        .context("failed to initialise the GPU")?;

    let renderer = Renderer::new(&ctx, config, &mesh, cli.instance_layout(), &kernel)
        .context("failed to set up the renderer")?;
    let image = renderer.render(&ctx).context("rendering failed")?;

    save_hdr(&image, &cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    Ok(())
}
