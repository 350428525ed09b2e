use std::borrow::Cow;
use std::path::Path;

use log::debug;

use crate::config::{OutputKind, WorkgroupSize};
use crate::error::{RenderError, RenderResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Ray-query kernel bundled with the crate. Declares `@workgroup_size(16, 8)`
/// and expects the output slot declarations below appended to it.
pub const BUILTIN_WGSL: &str = include_str!("../shaders/raytrace.wgsl");

const BUFFER_OUTPUT_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> image_data: array<f32>;

fn load_previous(pixel: vec2<u32>) -> vec3<f32> {
    let i = 3u * (pixel.y * pc.render_width + pixel.x);
    return vec3<f32>(image_data[i], image_data[i + 1u], image_data[i + 2u]);
}

fn store_pixel(pixel: vec2<u32>, color: vec3<f32>) {
    let i = 3u * (pixel.y * pc.render_width + pixel.x);
    image_data[i] = color.r;
    image_data[i + 1u] = color.g;
    image_data[i + 2u] = color.b;
}
"#;

const IMAGE_OUTPUT_WGSL: &str = r#"
@group(0) @binding(0) var image_data: texture_storage_2d<rgba32float, read_write>;

fn load_previous(pixel: vec2<u32>) -> vec3<f32> {
    return textureLoad(image_data, vec2<i32>(pixel)).rgb;
}

fn store_pixel(pixel: vec2<u32>, color: vec3<f32>) {
    textureStore(image_data, vec2<i32>(pixel), vec4<f32>(color, 1.0));
}
"#;

#[derive(Clone, Debug, PartialEq, Eq)]
enum KernelCode {
    SpirV(Vec<u8>),
    Wgsl(String),
}

/// Compiled (SPIR-V) or source (WGSL) compute kernel. Its contents are opaque
/// to the renderer; only the entry point and declared local size matter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelBinary {
    code: KernelCode,
    entry_point: String,
    workgroup: WorkgroupSize,
}

impl KernelBinary {
    /// The bundled path tracer, wired for `output`.
    pub fn builtin(output: OutputKind) -> Self {
        let slot = match output {
            OutputKind::Buffer => BUFFER_OUTPUT_WGSL,
            OutputKind::Image => IMAGE_OUTPUT_WGSL,
        };
        Self::wgsl(format!("{BUILTIN_WGSL}{slot}"), "main", WorkgroupSize::new(16, 8))
    }

    pub fn wgsl(source: impl Into<String>, entry_point: &str, workgroup: WorkgroupSize) -> Self {
        Self {
            code: KernelCode::Wgsl(source.into()),
            entry_point: entry_point.to_owned(),
            workgroup,
        }
    }

    /// SPIR-V is recognised by its magic number; anything else must be
    /// UTF-8 WGSL.
    pub fn from_bytes(
        bytes: Vec<u8>,
        entry_point: &str,
        workgroup: WorkgroupSize,
    ) -> RenderResult<Self> {
        let code = if is_spirv(&bytes) {
            if bytes.len() % 4 != 0 {
                return Err(RenderError::pipeline(format!(
                    "SPIR-V module length {} is not a multiple of 4",
                    bytes.len()
                )));
            }
            KernelCode::SpirV(bytes)
        } else {
            let source = String::from_utf8(bytes).map_err(|_| {
                RenderError::pipeline("kernel is neither SPIR-V nor UTF-8 WGSL source")
            })?;
            KernelCode::Wgsl(source)
        };
        Ok(Self {
            code,
            entry_point: entry_point.to_owned(),
            workgroup,
        })
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        entry_point: &str,
        workgroup: WorkgroupSize,
    ) -> RenderResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        debug!("Read kernel {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(bytes, entry_point, workgroup)
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn workgroup(&self) -> WorkgroupSize {
        self.workgroup
    }

    pub fn is_spirv(&self) -> bool {
        matches!(self.code, KernelCode::SpirV(_))
    }

    pub fn shader_source(&self) -> wgpu::ShaderSource<'_> {
        match &self.code {
            KernelCode::SpirV(bytes) => wgpu::util::make_spirv(bytes),
            KernelCode::Wgsl(source) => wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.as_str())),
        }
    }
}

fn is_spirv(bytes: &[u8]) -> bool {
    let Some(head) = bytes.get(..4) else {
        return false;
    };
    let word = [head[0], head[1], head[2], head[3]];
    u32::from_le_bytes(word) == SPIRV_MAGIC || u32::from_be_bytes(word) == SPIRV_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_header() -> Vec<u8> {
        let words = [SPIRV_MAGIC, 0x0001_0500, 0, 8, 0];
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn detects_spirv_by_magic() {
        let kernel = KernelBinary::from_bytes(spirv_header(), "main", WorkgroupSize::default())
            .unwrap();
        assert!(kernel.is_spirv());
    }

    #[test]
    fn truncated_spirv_is_rejected() {
        let mut bytes = spirv_header();
        bytes.pop();
        let err = KernelBinary::from_bytes(bytes, "main", WorkgroupSize::default()).unwrap_err();
        assert!(matches!(err, RenderError::PipelineBuild(_)));
    }

    #[test]
    fn text_is_treated_as_wgsl() {
        let kernel = KernelBinary::from_bytes(
            b"@compute @workgroup_size(16, 8) fn main() {}".to_vec(),
            "main",
            WorkgroupSize::default(),
        )
        .unwrap();
        assert!(!kernel.is_spirv());
        assert!(matches!(kernel.shader_source(), wgpu::ShaderSource::Wgsl(_)));
    }

    #[test]
    fn binary_garbage_is_rejected() {
        let bytes = vec![0xff, 0xfe, 0x00, 0x80, 0x01];
        let err = KernelBinary::from_bytes(bytes, "main", WorkgroupSize::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::PipelineBuild(_)));
    }

    #[test]
    fn builtin_kernel_matches_default_workgroup() {
        let kernel = KernelBinary::builtin(OutputKind::Buffer);
        assert_eq!(kernel.workgroup(), WorkgroupSize::default());
        assert_eq!(kernel.entry_point(), "main");
        assert!(BUILTIN_WGSL.contains("@workgroup_size(16, 8"));
    }

    #[test]
    fn builtin_kernel_declares_the_requested_output() {
        let wgsl = |kernel: KernelBinary| match kernel.code {
            KernelCode::Wgsl(source) => source,
            KernelCode::SpirV(_) => unreachable!(),
        };
        let buffer = wgsl(KernelBinary::builtin(OutputKind::Buffer));
        assert!(buffer.starts_with("enable wgpu_ray_query;"));
        assert!(buffer.contains("var<storage, read_write> image_data"));
        let image = wgsl(KernelBinary::builtin(OutputKind::Image));
        assert!(image.contains("texture_storage_2d<rgba32float, read_write>"));
    }
}
