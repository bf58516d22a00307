use thiserror::Error;
use wgpu::TextureFormat;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("No usable GPU adapter found")]
    NoAdapter,
    #[error("Failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("Required texture format {0:?} is not supported: {1}")]
    MissingFormat(TextureFormat, &'static str),
    #[error("{0} requires compute shader support")]
    ComputeUnsupported(&'static str),
    #[error("Failed to record shader: {0}")]
    Record(String),
    #[error("Device reported an error: {0}")]
    Device(String),
    #[error("Texture transfer failed: {0}")]
    Transfer(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BenchError {
    /// Conditions that reflect device capability rather than a broken run.
    /// Callers skip the affected benchmark and carry on.
    pub fn is_skip(&self) -> bool {
        matches!(self, BenchError::ComputeUnsupported(_))
    }
}
