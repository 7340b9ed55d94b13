//! Metal backend
//!
//! The MSL [`renderer`] is plain Rust and always available, which keeps it
//! testable everywhere. The native half (device enumeration, library
//! compilation and dispatch through `metal`) is only built on macOS with the
//! `metal` feature.

pub mod renderer;

pub use renderer::{MetalCode, MetalRenderer, render};

#[cfg(all(feature = "metal", target_os = "macos"))]
mod buffer;
#[cfg(all(feature = "metal", target_os = "macos"))]
mod compiler;
#[cfg(all(feature = "metal", target_os = "macos"))]
mod device;
#[cfg(all(feature = "metal", target_os = "macos"))]
mod kernel;

#[cfg(all(feature = "metal", target_os = "macos"))]
pub use buffer::MetalBuffer;
#[cfg(all(feature = "metal", target_os = "macos"))]
pub use compiler::{MetalLibrary, MetalPipeline};
#[cfg(all(feature = "metal", target_os = "macos"))]
pub use device::{MetalBackend, MetalDevice};
#[cfg(all(feature = "metal", target_os = "macos"))]
pub use kernel::MetalQueue;

/// Whether a native Metal device can be used by this build
pub fn is_available() -> bool {
    #[cfg(all(feature = "metal", target_os = "macos"))]
    {
        device::MetalBackend::is_available()
    }
    #[cfg(not(all(feature = "metal", target_os = "macos")))]
    {
        false
    }
}
