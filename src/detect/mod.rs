mod backend;
mod backends;
mod registry;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{registry_from_config, BackendRegistry, SharedBackend};
pub use result::{BoundingBox, DetectParams, Detection};
