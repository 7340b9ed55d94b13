//! CPU reference backend
//!
//! Runs translated kernels with a tree-walking interpreter. Work-groups are
//! spread across `host_threads` workers; kernels that call `barrier` run each
//! work-item of a group on its own thread instead.

mod barrier;
mod buffer;
mod device;
mod interpreter;
mod kernel;
mod memory;

pub use buffer::HostBuffer;
pub use device::HostDevice;
pub use kernel::{HostLibrary, HostPipeline, HostQueue};

use std::sync::Arc;

use crate::backend::traits::{Backend, NativeDevice};
use crate::config::RuntimeConfig;

/// Backend exposing a single [`HostDevice`]
pub struct HostBackend {
    device: Arc<HostDevice>,
}

impl HostBackend {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            device: Arc::new(HostDevice::new(config)),
        }
    }
}

impl Backend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn devices(&self) -> Vec<Arc<dyn NativeDevice>> {
        vec![self.device.clone()]
    }
}
