pub mod raytrace;

pub use raytrace::{BindingSlot, PUSH_CONSTANTS_SIZE, PushConstants, RaytracePass};
