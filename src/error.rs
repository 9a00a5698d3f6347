//! Crate-level error types.

use std::fmt;

use crate::gpu::error::ResourceError;
use crate::gpu::render_context::RenderContextError;

/// Errors produced by the simulation crate.
#[derive(Debug)]
pub enum SimError {
    /// GPU context initialization failure.
    Gpu(RenderContextError),
    /// Buffer or image transfer, or binding, failure.
    Resource(ResourceError),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
    /// Swapchain acquisition failure while presenting.
    Surface(wgpu::SurfaceError),
    /// Viewer event-loop failure.
    Viewer(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu(e) => write!(f, "GPU error: {e}"),
            Self::Resource(e) => write!(f, "resource error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
            Self::Surface(e) => write!(f, "surface error: {e}"),
            Self::Viewer(msg) => write!(f, "viewer error: {msg}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Gpu(e) => Some(e),
            Self::Resource(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Surface(e) => Some(e),
            Self::OptionsParse(_) | Self::Viewer(_) => None,
        }
    }
}

impl From<RenderContextError> for SimError {
    fn from(e: RenderContextError) -> Self {
        Self::Gpu(e)
    }
}

impl From<ResourceError> for SimError {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<wgpu::SurfaceError> for SimError {
    fn from(e: wgpu::SurfaceError) -> Self {
        Self::Surface(e)
    }
}
