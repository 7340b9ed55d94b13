//! MSL compilation into libraries and pipelines

use std::sync::Arc;

use log::{debug, warn};
use metal::{CompileOptions, ComputePipelineState, Device as MtlDevice, Library};

use super::renderer::MetalCode;
use crate::backend::traits::{BackendError, ComputePipeline, NativeLibrary};
use crate::compiler::BuildOptions;

/// Compile rendered MSL on `device`
pub(crate) fn compile(
    device: &MtlDevice,
    code: &MetalCode,
    options: &BuildOptions,
) -> Result<Library, BackendError> {
    let compile_options = CompileOptions::new();
    compile_options.set_fast_math_enabled(options.fast_math());
    device
        .new_library_with_source(code.as_str(), &compile_options)
        .map_err(|e| {
            warn!("Metal rejected generated source: {}", e);
            BackendError::Compilation(e)
        })
}

/// A compiled Metal library
pub struct MetalLibrary {
    device: MtlDevice,
    library: Library,
}

impl MetalLibrary {
    pub(crate) fn new(device: MtlDevice, library: Library) -> Self {
        Self { device, library }
    }
}

impl NativeLibrary for MetalLibrary {
    fn new_pipeline(&self, entry_point: &str) -> Result<Arc<dyn ComputePipeline>, BackendError> {
        let function = self
            .library
            .get_function(entry_point, None)
            .map_err(BackendError::Compilation)?;
        let state = self
            .device
            .new_compute_pipeline_state_with_function(&function)
            .map_err(BackendError::Compilation)?;
        debug!(
            "Pipeline '{}': up to {} threads per threadgroup",
            entry_point,
            state.max_total_threads_per_threadgroup()
        );
        Ok(Arc::new(MetalPipeline { state }))
    }
}

/// Compute pipeline state of one kernel
pub struct MetalPipeline {
    state: ComputePipelineState,
}

impl MetalPipeline {
    pub(crate) fn state(&self) -> &ComputePipelineState {
        &self.state
    }
}

impl ComputePipeline for MetalPipeline {
    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.state.max_total_threads_per_threadgroup() as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// Safety: Metal libraries and pipeline states are immutable and thread-safe
unsafe impl Send for MetalLibrary {}
unsafe impl Sync for MetalLibrary {}
unsafe impl Send for MetalPipeline {}
unsafe impl Sync for MetalPipeline {}
