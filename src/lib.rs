//! Steady-state throughput benchmarks for GPU image processing on `wgpu`.

pub mod benchmarks;
pub mod config;
pub mod error;
pub mod gpu;
pub mod measure;
pub mod report;
pub mod shaders;
