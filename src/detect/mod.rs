mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, CpuBackendConfig, StubBackend};
pub use registry::BackendRegistry;
pub use result::Detection;
