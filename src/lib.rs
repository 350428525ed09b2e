//! Headless GPU path tracer built on wgpu ray queries.
//!
//! [`Renderer`] uploads a mesh, builds the acceleration structures, binds the
//! compute kernel and accumulates a fixed number of sample batches into an
//! output target that is read back as a [`PixelBuffer`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod hdr_output;
pub mod kernel;
pub mod passes;
pub mod readback;
pub mod renderer;
pub mod scene;
pub mod target;
pub mod wgpu_ctx;
pub mod wgpu_utils;

pub use config::{OutputKind, RenderConfig, WorkgroupSize};
pub use error::{RenderError, RenderResult};
pub use geometry::Mesh;
pub use hdr_output::save_hdr;
pub use kernel::KernelBinary;
pub use readback::PixelBuffer;
pub use renderer::{InstanceLayout, Renderer, device_requirements};
pub use wgpu_ctx::{DeviceRequirements, WgpuContext};
