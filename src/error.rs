//! Error types for the runtime
//!
//! [`ClError`] is the single error type returned by every [`Runtime`](crate::Runtime)
//! operation. Each variant maps to a fixed legacy status code through
//! [`ClError::code`], so the same failure always produces the same code.

use crate::handle::HandleKind;
use crate::types::*;
use thiserror::Error;

/// Main error type for runtime operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClError {
    /// Handle is null, was never issued, was released, or names another kind
    #[error("invalid {0} handle")]
    InvalidHandle(HandleKind),

    #[error("invalid platform")]
    InvalidPlatform,

    #[error("invalid device")]
    InvalidDevice,

    #[error("invalid device type mask")]
    InvalidDeviceType,

    #[error("no device matches the requested type")]
    DeviceNotFound,

    #[error("objects belong to different contexts")]
    InvalidContext,

    /// Last context reference released while children are still alive
    #[error("context still has {0} live child object(s)")]
    ContextInUse(usize),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("attribute {0:#06x} is not supported")]
    AttributeNotSupported(u32),

    #[error("unsupported command queue properties")]
    InvalidQueueProperties,

    #[error("invalid host pointer")]
    InvalidHostPtr,

    #[error("invalid memory object")]
    InvalidMemObject,

    #[error("invalid buffer size {0}")]
    InvalidBufferSize(usize),

    #[error("source and destination regions overlap")]
    MemCopyOverlap,

    #[error("invalid build options: {0}")]
    InvalidBuildOptions(String),

    #[error("program build failed")]
    BuildProgramFailure,

    #[error("program has no successfully built executable")]
    InvalidProgramExecutable,

    #[error("no kernel named '{0}' in program")]
    InvalidKernelName(String),

    #[error("argument index {0} is out of range")]
    InvalidArgIndex(u32),

    #[error("invalid argument value for index {0}")]
    InvalidArgValue(u32),

    #[error("argument {index} expects {expected} bytes, got {actual}")]
    InvalidArgSize {
        index: u32,
        expected: usize,
        actual: usize,
    },

    #[error("kernel argument {0} is not set")]
    InvalidKernelArgs(u32),

    #[error("invalid work dimension")]
    InvalidWorkDimension,

    #[error("invalid work-group size")]
    InvalidWorkGroupSize,

    #[error("invalid work-item size")]
    InvalidWorkItemSize,

    #[error("invalid global offset")]
    InvalidGlobalOffset,

    #[error("invalid global work size")]
    InvalidGlobalWorkSize,

    #[error("invalid event wait list")]
    InvalidEventWaitList,

    #[error("an event in the wait list terminated with an error")]
    ExecStatusErrorForEventsInWaitList,

    #[error("profiling information is not available")]
    ProfilingInfoNotAvailable,

    #[error("memory object allocation failed: {0}")]
    MemObjectAllocationFailure(String),

    #[error("out of resources: {0}")]
    OutOfResources(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl ClError {
    /// Stable legacy status code of this error
    pub fn code(&self) -> cl_int {
        match self {
            ClError::InvalidHandle(kind) => match kind {
                HandleKind::Platform => CL_INVALID_PLATFORM,
                HandleKind::Device => CL_INVALID_DEVICE,
                HandleKind::Context => CL_INVALID_CONTEXT,
                HandleKind::Queue => CL_INVALID_COMMAND_QUEUE,
                HandleKind::Mem => CL_INVALID_MEM_OBJECT,
                HandleKind::Program => CL_INVALID_PROGRAM,
                HandleKind::Kernel => CL_INVALID_KERNEL,
                HandleKind::Event => CL_INVALID_EVENT,
            },
            ClError::InvalidPlatform => CL_INVALID_PLATFORM,
            ClError::InvalidDevice => CL_INVALID_DEVICE,
            ClError::InvalidDeviceType => CL_INVALID_DEVICE_TYPE,
            ClError::DeviceNotFound => CL_DEVICE_NOT_FOUND,
            ClError::InvalidContext => CL_INVALID_CONTEXT,
            ClError::ContextInUse(_) => CL_INVALID_OPERATION,
            ClError::InvalidValue(_) => CL_INVALID_VALUE,
            ClError::AttributeNotSupported(_) => CL_INVALID_VALUE,
            ClError::InvalidQueueProperties => CL_INVALID_QUEUE_PROPERTIES,
            ClError::InvalidHostPtr => CL_INVALID_HOST_PTR,
            ClError::InvalidMemObject => CL_INVALID_MEM_OBJECT,
            ClError::InvalidBufferSize(_) => CL_INVALID_BUFFER_SIZE,
            ClError::MemCopyOverlap => CL_MEM_COPY_OVERLAP,
            ClError::InvalidBuildOptions(_) => CL_INVALID_BUILD_OPTIONS,
            ClError::BuildProgramFailure => CL_BUILD_PROGRAM_FAILURE,
            ClError::InvalidProgramExecutable => CL_INVALID_PROGRAM_EXECUTABLE,
            ClError::InvalidKernelName(_) => CL_INVALID_KERNEL_NAME,
            ClError::InvalidArgIndex(_) => CL_INVALID_ARG_INDEX,
            ClError::InvalidArgValue(_) => CL_INVALID_ARG_VALUE,
            ClError::InvalidArgSize { .. } => CL_INVALID_ARG_SIZE,
            ClError::InvalidKernelArgs(_) => CL_INVALID_KERNEL_ARGS,
            ClError::InvalidWorkDimension => CL_INVALID_WORK_DIMENSION,
            ClError::InvalidWorkGroupSize => CL_INVALID_WORK_GROUP_SIZE,
            ClError::InvalidWorkItemSize => CL_INVALID_WORK_ITEM_SIZE,
            ClError::InvalidGlobalOffset => CL_INVALID_GLOBAL_OFFSET,
            ClError::InvalidGlobalWorkSize => CL_INVALID_GLOBAL_WORK_SIZE,
            ClError::InvalidEventWaitList => CL_INVALID_EVENT_WAIT_LIST,
            ClError::ExecStatusErrorForEventsInWaitList => {
                CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
            }
            ClError::ProfilingInfoNotAvailable => CL_PROFILING_INFO_NOT_AVAILABLE,
            ClError::MemObjectAllocationFailure(_) => CL_MEM_OBJECT_ALLOCATION_FAILURE,
            ClError::OutOfResources(_) => CL_OUT_OF_RESOURCES,
            ClError::InvalidOperation(_) => CL_INVALID_OPERATION,
        }
    }

    pub(crate) fn invalid_value(message: impl Into<String>) -> Self {
        ClError::InvalidValue(message.into())
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        ClError::InvalidOperation(message.into())
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ClError>;
