pub mod soft;
#[cfg(feature = "gpu")]
pub mod wgpu;
