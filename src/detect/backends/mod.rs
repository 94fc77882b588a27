pub mod cpu;
pub mod stub;

pub use cpu::{CpuBackend, CpuBackendConfig};
pub use stub::StubBackend;
