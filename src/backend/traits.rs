//! Native backend trait definitions
//!
//! These traits describe the object model of a Metal-style compute API: a
//! device that allocates buffers and compiles libraries, a library that
//! produces compute pipelines, and a command queue that dispatches a pipeline
//! over a threadgroup grid. The runtime only ever talks to these traits.

use crate::compiler::Artifact;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Error reported by a native backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend refused an allocation
    #[error("allocation of {0} bytes failed")]
    Allocation(usize),
    /// The library or pipeline could not be created
    #[error("compilation failed: {0}")]
    Compilation(String),
    /// A kernel faulted while running (out-of-bounds access and the like)
    #[error("kernel fault: {0}")]
    KernelFault(String),
    /// The command buffer or dispatch failed
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("{0}")]
    Other(String),
}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError::Other(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError::Other(s.to_string())
    }
}

impl From<BackendError> for crate::ClError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Allocation(_) => crate::ClError::MemObjectAllocationFailure(e.to_string()),
            other => crate::ClError::OutOfResources(other.to_string()),
        }
    }
}

/// Device type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    Cpu,
    #[default]
    Gpu,
    Accelerator,
}

/// Static description of a native device, captured at enumeration time
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    pub vendor: String,
    pub vendor_id: u32,
    pub device_type: DeviceType,
    pub driver_version: String,
    pub max_compute_units: u32,
    pub max_clock_frequency: u32,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub max_constant_buffer_size: u64,
    pub supports_double: bool,
}

/// Where a buffer's storage lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Visible to both host and device
    Shared,
    /// Device-only storage
    Private,
}

/// Threadgroup/grid parameters of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub work_dim: u32,
    pub global_offset: [usize; 3],
    pub global_size: [usize; 3],
    /// Threadgroup size; divides `global_size` in every dimension
    pub local_size: [usize; 3],
}

impl DispatchGrid {
    /// Number of threadgroups per dimension
    pub fn num_groups(&self) -> [usize; 3] {
        [
            self.global_size[0] / self.local_size[0],
            self.global_size[1] / self.local_size[1],
            self.global_size[2] / self.local_size[2],
        ]
    }

    pub fn group_len(&self) -> usize {
        self.local_size.iter().product()
    }
}

/// One bound kernel argument, in parameter order
#[derive(Clone)]
pub enum Binding {
    Buffer(Arc<dyn NativeBuffer>),
    /// Scalar argument bytes
    Bytes(Vec<u8>),
    /// Threadgroup memory of the given length in bytes
    Threadgroup(usize),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            Binding::Bytes(bytes) => write!(f, "Bytes({:?})", bytes),
            Binding::Threadgroup(len) => write!(f, "Threadgroup({})", len),
        }
    }
}

/// Native backend: the source of devices
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn devices(&self) -> Vec<Arc<dyn NativeDevice>>;
}

/// Native compute device
pub trait NativeDevice: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Allocate a buffer, optionally initialised with `init` (same length)
    fn new_buffer(
        &self,
        len: usize,
        storage: StorageMode,
        init: Option<&[u8]>,
    ) -> Result<Arc<dyn NativeBuffer>, BackendError>;

    /// Wrap caller memory without copying
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the returned buffer is alive.
    unsafe fn new_buffer_no_copy(
        &self,
        ptr: *mut u8,
        len: usize,
    ) -> Result<Arc<dyn NativeBuffer>, BackendError>;

    /// Compile a translated program into a native library
    ///
    /// Returns the library together with the backend's own compile log.
    fn new_library(
        &self,
        artifact: &Arc<Artifact>,
    ) -> Result<(Arc<dyn NativeLibrary>, String), BackendError>;

    fn new_command_queue(&self) -> Result<Arc<dyn NativeQueue>, BackendError>;
}

/// Native buffer
pub trait NativeBuffer: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), BackendError>;

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), BackendError>;

    fn as_any(&self) -> &dyn Any;
}

/// Compiled native library
pub trait NativeLibrary: Send + Sync {
    fn new_pipeline(&self, entry_point: &str) -> Result<Arc<dyn ComputePipeline>, BackendError>;
}

/// Compute pipeline state of one kernel entry point
pub trait ComputePipeline: Send + Sync {
    fn max_total_threads_per_threadgroup(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

/// Native command queue
pub trait NativeQueue: Send + Sync {
    /// Run `pipeline` over `grid` and wait for completion
    fn dispatch(
        &self,
        pipeline: &dyn ComputePipeline,
        bindings: &[Binding],
        grid: &DispatchGrid,
    ) -> Result<(), BackendError>;
}

/// Check that `offset..offset + len` lies within a buffer of `size` bytes
pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> Result<(), BackendError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BackendError::Execution(format!(
            "range {}..{} exceeds buffer of {} bytes",
            offset,
            offset.saturating_add(len),
            size
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClError;

    #[test]
    fn test_backend_error_conversion() {
        let e: ClError = BackendError::Allocation(16).into();
        assert!(matches!(e, ClError::MemObjectAllocationFailure(_)));
        let e: ClError = BackendError::KernelFault("oob".into()).into();
        assert!(matches!(e, ClError::OutOfResources(_)));
    }

    #[test]
    fn test_dispatch_grid_groups() {
        let grid = DispatchGrid {
            work_dim: 2,
            global_offset: [0; 3],
            global_size: [64, 8, 1],
            local_size: [16, 4, 1],
        };
        assert_eq!(grid.num_groups(), [4, 2, 1]);
        assert_eq!(grid.group_len(), 64);
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(check_range(8, 9, 16).is_err());
        assert!(check_range(usize::MAX, 2, 16).is_err());
    }
}
