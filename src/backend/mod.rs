//! Native backends
//!
//! The runtime drives a backend through the traits in [`traits`]. Two
//! implementations exist: [`host`], a CPU interpreter that is always
//! available, and [`metal`], which renders Metal Shading Language and (on
//! macOS with the `metal` feature) runs it on the GPU.

pub mod host;
pub mod metal;
pub mod traits;

pub use host::HostBackend;
pub use traits::{
    Backend, BackendError, Binding, ComputePipeline, DeviceDescriptor, DeviceType, DispatchGrid,
    NativeBuffer, NativeDevice, NativeLibrary, NativeQueue, StorageMode,
};

use std::sync::Arc;

use log::info;

use crate::config::{BackendSelection, RuntimeConfig};
use crate::error::{ClError, Result};

/// Instantiate the backend named by `config.backend`
///
/// `Auto` prefers Metal when it is compiled in and a device is present.
/// Asking for Metal explicitly on a build or machine without it is
/// `DeviceNotFound`.
pub fn select(config: &RuntimeConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendSelection::Host => Arc::new(HostBackend::new(config)),
        BackendSelection::Metal => metal_backend()?,
        BackendSelection::Auto if metal::is_available() => metal_backend()?,
        BackendSelection::Auto => Arc::new(HostBackend::new(config)),
    };
    info!("Using the {} backend", backend.name());
    Ok(backend)
}

#[cfg(all(feature = "metal", target_os = "macos"))]
fn metal_backend() -> Result<Arc<dyn Backend>> {
    metal::MetalBackend::new()
        .map(|b| Arc::new(b) as Arc<dyn Backend>)
        .map_err(|e| {
            log::warn!("Metal backend unavailable: {}", e);
            ClError::DeviceNotFound
        })
}

#[cfg(not(all(feature = "metal", target_os = "macos")))]
fn metal_backend() -> Result<Arc<dyn Backend>> {
    log::warn!("Metal backend requested but not compiled in");
    Err(ClError::DeviceNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_host() {
        let config = RuntimeConfig::builder()
            .backend(BackendSelection::Host)
            .build();
        let backend = select(&config).unwrap();
        assert_eq!(backend.name(), "host");
        assert_eq!(backend.devices().len(), 1);
    }

    #[test]
    fn test_auto_always_yields_a_backend() {
        let backend = select(&RuntimeConfig::default()).unwrap();
        assert!(!backend.devices().is_empty());
    }

    #[cfg(not(all(feature = "metal", target_os = "macos")))]
    #[test]
    fn test_metal_without_support_is_device_not_found() {
        let config = RuntimeConfig::builder()
            .backend(BackendSelection::Metal)
            .build();
        assert_eq!(select(&config).err(), Some(ClError::DeviceNotFound));
    }
}
