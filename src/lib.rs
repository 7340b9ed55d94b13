//! clmetal: OpenCL 1.2 host API on a Metal-style compute backend
//!
//! clmetal lets an application written against the OpenCL 1.2 host API run
//! on a GPU stack that only speaks Metal. It manages the OpenCL object model
//! (platforms, devices, contexts, queues, buffers, programs, kernels, events),
//! compiles OpenCL C kernels and executes them on a native backend.
//!
//! # Architecture
//!
//! - **runtime**: the [`Runtime`] and every OpenCL operation
//! - **compiler**: OpenCL C preprocessing, parsing and checking
//! - **backend**: the native device seam with a host interpreter and Metal
//! - **capi**: the legacy `clXxx` entry points (feature: capi)
//!
//! # Feature Flags
//!
//! - `capi`: export the C entry points (default)
//! - `metal`: execute on the GPU through Metal (macOS only)

// ============================================================================
// Core Modules
// ============================================================================

pub mod backend;
pub mod compiler;
pub mod config;
pub mod error;
pub mod handle;
pub mod info;
mod registry;
pub mod runtime;
pub mod types;

#[cfg(feature = "capi")]
pub mod capi;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{BackendSelection, ContextReleasePolicy, RuntimeConfig};
pub use error::{ClError, Result};
pub use handle::{
    ContextId, DeviceId, EventId, Handle, HandleKind, KernelId, MemId, PlatformId, ProgramId,
    QueueId,
};
pub use info::InfoValue;
pub use runtime::{EventStatus, KernelArg, PendingRead, Runtime, ScalarArg};
pub use types::*;
