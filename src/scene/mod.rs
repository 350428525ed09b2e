pub mod accel;
pub mod instancing;
pub mod loader;
pub mod store;

pub use accel::{AccelerationBuilder, BlasHandle, TopLevel};
pub use instancing::{Instance, InstanceFlags, InstanceTable};
pub use loader::load_mesh;
pub use store::SceneStore;
