//! Legacy C entry points
//!
//! Every `clXxx` function resolves its handles against the process-scope
//! [`Runtime`] held by [`ProcessScope`] and maps the [`ClError`] of the safe
//! call to its status code. Handles cross the boundary as opaque pointers
//! whose address is the handle value; they are never dereferenced.
//!
//! Out-parameters are written only when the call succeeds, and no panic
//! unwinds into the caller: a caught panic is reported as
//! `CL_OUT_OF_RESOURCES`.

#![allow(non_snake_case, non_camel_case_types)]

use std::ffi::{CStr, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, error};

use crate::config::RuntimeConfig;
use crate::error::{ClError, Result};
use crate::handle::*;
use crate::info::InfoValue;
use crate::runtime::Runtime;
use crate::types::*;

pub type cl_platform_id = *mut c_void;
pub type cl_device_id = *mut c_void;
pub type cl_context = *mut c_void;
pub type cl_command_queue = *mut c_void;
pub type cl_mem = *mut c_void;
pub type cl_program = *mut c_void;
pub type cl_kernel = *mut c_void;
pub type cl_event = *mut c_void;
pub type cl_context_properties = isize;

/// Context error callback; accepted but never invoked
pub type ContextNotify =
    Option<unsafe extern "C" fn(*const c_char, *const c_void, usize, *mut c_void)>;
/// Called once the build finished
pub type BuildNotify = Option<unsafe extern "C" fn(cl_program, *mut c_void)>;

static RUNTIME: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

/// Holder of the runtime the C entry points operate on
///
/// The runtime is created from the environment on first use unless one was
/// installed before. Handles from one runtime are meaningless in another, so
/// replacing the runtime invalidates every handle the C side holds.
pub struct ProcessScope;

impl ProcessScope {
    /// Make `runtime` the process-scope runtime, returning the previous one
    pub fn install(runtime: Runtime) -> Option<Arc<Runtime>> {
        let mut slot = RUNTIME.write().unwrap_or_else(PoisonError::into_inner);
        debug!("Installing process-scope runtime ({})", runtime.backend_name());
        slot.replace(Arc::new(runtime))
    }

    /// Remove the process-scope runtime
    pub fn uninstall() -> Option<Arc<Runtime>> {
        RUNTIME
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The process-scope runtime, created from the environment if needed
    pub fn current() -> Result<Arc<Runtime>> {
        if let Some(runtime) = RUNTIME
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(runtime.clone());
        }
        let mut slot = RUNTIME.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = slot.as_ref() {
            return Ok(runtime.clone());
        }
        let runtime = Arc::new(Runtime::new(RuntimeConfig::from_env())?);
        *slot = Some(runtime.clone());
        Ok(runtime)
    }
}

// ============================================================================
// Boundary helpers
// ============================================================================

fn id<I: Handle>(ptr: *mut c_void) -> Result<I> {
    I::from_raw(ptr.addr() as u64).ok_or(ClError::InvalidHandle(I::KIND))
}

fn to_ptr<I: Handle>(id: I) -> *mut c_void {
    std::ptr::without_provenance_mut(id.raw() as usize)
}

/// Run `f` with the process runtime and return its status code
fn status(f: impl FnOnce(&Runtime) -> Result<()>) -> cl_int {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let runtime = ProcessScope::current()?;
        f(&runtime)
    }));
    match outcome {
        Ok(Ok(())) => CL_SUCCESS,
        Ok(Err(e)) => {
            debug!("call failed: {}", e);
            e.code()
        }
        Err(_) => {
            error!("panic caught at the C boundary");
            CL_OUT_OF_RESOURCES
        }
    }
}

/// Run a creating call, reporting its status through `errcode_ret`
///
/// # Safety
///
/// `errcode_ret` must be null or valid for writes.
unsafe fn create<I: Handle>(
    errcode_ret: *mut cl_int,
    f: impl FnOnce(&Runtime) -> Result<I>,
) -> *mut c_void {
    let mut handle = std::ptr::null_mut();
    let code = status(|rt| {
        handle = to_ptr(f(rt)?);
        Ok(())
    });
    if !errcode_ret.is_null() {
        // Safety: checked non-null; validity is the caller's contract.
        unsafe { *errcode_ret = code };
    }
    handle
}

/// Borrow `len` elements; a null pointer is only valid for an empty slice
///
/// # Safety
///
/// A non-null `ptr` must be valid for reads of `len` elements.
unsafe fn slice<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T]> {
    match (ptr.is_null(), len) {
        (_, 0) => Ok(&[]),
        (true, _) => Err(ClError::invalid_value("null array with non-zero length")),
        // Safety: forwarded from this function's contract.
        (false, _) => Ok(unsafe { std::slice::from_raw_parts(ptr, len) }),
    }
}

/// # Safety
///
/// `list` must be null or valid for reads of `count` handles.
unsafe fn handles<I: Handle>(list: *const *mut c_void, count: cl_uint) -> Result<Vec<I>> {
    // Safety: forwarded.
    unsafe { slice(list, count as usize) }?
        .iter()
        .map(|p| id::<I>(*p))
        .collect()
}

/// # Safety
///
/// `list` must be null or valid for reads of `count` events.
unsafe fn wait_list(count: cl_uint, list: *const cl_event) -> Result<Vec<EventId>> {
    if (count == 0) != list.is_null() {
        return Err(ClError::InvalidEventWaitList);
    }
    // Safety: forwarded.
    unsafe { handles::<EventId>(list, count) }.map_err(|_| ClError::InvalidEventWaitList)
}

/// Hand an enqueue event to the caller, or drop it when not wanted
///
/// # Safety
///
/// `out` must be null or valid for writes.
unsafe fn deliver_event(rt: &Runtime, event: EventId, out: *mut cl_event) -> Result<()> {
    if out.is_null() {
        return rt.release_event(event);
    }
    // Safety: checked non-null.
    unsafe { *out = to_ptr(event) };
    Ok(())
}

/// Size/value/size-ret convention of the info queries
///
/// # Safety
///
/// `value` must be null or valid for writes of `size` bytes; `size_ret` must
/// be null or valid for writes.
unsafe fn write_info(
    info: InfoValue,
    size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> Result<()> {
    let bytes = info.to_bytes();
    if !value.is_null() {
        if size < bytes.len() {
            return Err(ClError::invalid_value(format!(
                "buffer of {} bytes, {} needed",
                size,
                bytes.len()
            )));
        }
        // Safety: `value` holds at least `bytes.len()` bytes.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), value.cast::<u8>(), bytes.len()) };
    }
    if !size_ret.is_null() {
        // Safety: checked non-null.
        unsafe { *size_ret = bytes.len() };
    }
    Ok(())
}

/// Write up to `capacity` handles and the total count
///
/// # Safety
///
/// `out` must be null or valid for `capacity` writes; `count` null or valid.
unsafe fn write_handles<I: Handle>(
    ids: &[I],
    capacity: cl_uint,
    out: *mut *mut c_void,
    count: *mut cl_uint,
) -> Result<()> {
    if (capacity == 0 && !out.is_null()) || (out.is_null() && count.is_null()) {
        return Err(ClError::invalid_value("no room for results"));
    }
    if !out.is_null() {
        for (i, handle) in ids.iter().take(capacity as usize).enumerate() {
            // Safety: `i < capacity`.
            unsafe { *out.add(i) = to_ptr(*handle) };
        }
    }
    if !count.is_null() {
        // Safety: checked non-null.
        unsafe { *count = ids.len() as cl_uint };
    }
    Ok(())
}

/// # Safety
///
/// `properties` must be null or a zero-terminated list of key/value pairs.
unsafe fn context_properties(
    properties: *const cl_context_properties,
) -> Result<Vec<(isize, isize)>> {
    let mut pairs = Vec::new();
    if properties.is_null() {
        return Ok(pairs);
    }
    let mut cursor = properties;
    loop {
        // Safety: the list is zero-terminated and made of whole pairs.
        let key = unsafe { *cursor };
        if key == 0 {
            return Ok(pairs);
        }
        let value = unsafe { *cursor.add(1) };
        pairs.push((key, value));
        cursor = unsafe { cursor.add(2) };
    }
}

/// # Safety
///
/// `ptr` must be null or a NUL-terminated string.
unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(ClError::invalid_value("null string"));
    }
    // Safety: forwarded.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| ClError::invalid_value("string is not valid UTF-8"))
}

// ============================================================================
// Platforms and devices
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetPlatformIDs(
    num_entries: cl_uint,
    platforms: *mut cl_platform_id,
    num_platforms: *mut cl_uint,
) -> cl_int {
    status(|rt| unsafe { write_handles(&rt.platform_ids(), num_entries, platforms, num_platforms) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetPlatformInfo(
    platform: cl_platform_id,
    param_name: cl_platform_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.platform_info(id(platform)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

/// A null platform selects the runtime's only platform
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetDeviceIDs(
    platform: cl_platform_id,
    device_type: cl_device_type,
    num_entries: cl_uint,
    devices: *mut cl_device_id,
    num_devices: *mut cl_uint,
) -> cl_int {
    status(|rt| {
        let platform = if platform.is_null() {
            rt.platform_ids()[0]
        } else {
            id(platform)?
        };
        let ids = rt.device_ids(platform, device_type)?;
        unsafe { write_handles(&ids, num_entries, devices, num_devices) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetDeviceInfo(
    device: cl_device_id,
    param_name: cl_device_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.device_info(id(device)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

// ============================================================================
// Contexts
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateContext(
    properties: *const cl_context_properties,
    num_devices: cl_uint,
    devices: *const cl_device_id,
    pfn_notify: ContextNotify,
    user_data: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_context {
    unsafe {
        create(errcode_ret, |rt| {
            if pfn_notify.is_none() && !user_data.is_null() {
                return Err(ClError::invalid_value("user data without a callback"));
            }
            if num_devices == 0 || devices.is_null() {
                return Err(ClError::invalid_value("empty device list"));
            }
            let devices = handles::<DeviceId>(devices, num_devices).map_err(|e| match e {
                ClError::InvalidHandle(_) => ClError::InvalidDevice,
                other => other,
            })?;
            rt.create_context_with_properties(&context_properties(properties)?, &devices)
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateContextFromType(
    properties: *const cl_context_properties,
    device_type: cl_device_type,
    pfn_notify: ContextNotify,
    user_data: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_context {
    unsafe {
        create(errcode_ret, |rt| {
            if pfn_notify.is_none() && !user_data.is_null() {
                return Err(ClError::invalid_value("user data without a callback"));
            }
            let devices = rt.devices_of_type(device_type)?;
            rt.create_context_with_properties(&context_properties(properties)?, &devices)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn clRetainContext(context: cl_context) -> cl_int {
    status(|rt| rt.retain_context(id(context)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clReleaseContext(context: cl_context) -> cl_int {
    status(|rt| rt.release_context(id(context)?))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetContextInfo(
    context: cl_context,
    param_name: cl_context_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.context_info(id(context)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

// ============================================================================
// Command queues
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateCommandQueue(
    context: cl_context,
    device: cl_device_id,
    properties: cl_command_queue_properties,
    errcode_ret: *mut cl_int,
) -> cl_command_queue {
    unsafe {
        create(errcode_ret, |rt| {
            let context = id::<ContextId>(context)?;
            let device = id::<DeviceId>(device).map_err(|_| ClError::InvalidDevice)?;
            rt.create_command_queue(context, device, properties)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn clRetainCommandQueue(queue: cl_command_queue) -> cl_int {
    status(|rt| rt.retain_command_queue(id(queue)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clReleaseCommandQueue(queue: cl_command_queue) -> cl_int {
    status(|rt| rt.release_command_queue(id(queue)?))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetCommandQueueInfo(
    queue: cl_command_queue,
    param_name: cl_command_queue_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.queue_info(id(queue)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn clFlush(queue: cl_command_queue) -> cl_int {
    status(|rt| rt.flush(id(queue)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clFinish(queue: cl_command_queue) -> cl_int {
    status(|rt| rt.finish(id(queue)?))
}

// ============================================================================
// Buffers and transfers
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateBuffer(
    context: cl_context,
    flags: cl_mem_flags,
    size: usize,
    host_ptr: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_mem {
    unsafe {
        create(errcode_ret, |rt| {
            rt.create_buffer_raw(id(context)?, flags, size, host_ptr.cast())
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn clRetainMemObject(mem: cl_mem) -> cl_int {
    status(|rt| rt.retain_mem_object(id(mem)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clReleaseMemObject(mem: cl_mem) -> cl_int {
    status(|rt| rt.release_mem_object(id(mem)?))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetMemObjectInfo(
    mem: cl_mem,
    param_name: cl_mem_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.mem_info(id(mem)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueReadBuffer(
    queue: cl_command_queue,
    buffer: cl_mem,
    blocking_read: cl_bool,
    offset: usize,
    size: usize,
    ptr: *mut c_void,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let done = rt.enqueue_read_buffer_raw(
            id(queue)?,
            id(buffer)?,
            blocking_read != CL_FALSE,
            offset,
            size,
            ptr.cast(),
            &wait,
        )?;
        deliver_event(rt, done, event)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueWriteBuffer(
    queue: cl_command_queue,
    buffer: cl_mem,
    blocking_write: cl_bool,
    offset: usize,
    size: usize,
    ptr: *const c_void,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        if ptr.is_null() {
            return Err(ClError::invalid_value("null source pointer"));
        }
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let data = slice(ptr.cast::<u8>(), size)?;
        let done = rt.enqueue_write_buffer(
            id(queue)?,
            id(buffer)?,
            blocking_write != CL_FALSE,
            offset,
            data,
            &wait,
        )?;
        deliver_event(rt, done, event)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueCopyBuffer(
    queue: cl_command_queue,
    src_buffer: cl_mem,
    dst_buffer: cl_mem,
    src_offset: usize,
    dst_offset: usize,
    size: usize,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let done = rt.enqueue_copy_buffer(
            id(queue)?,
            id(src_buffer)?,
            id(dst_buffer)?,
            src_offset,
            dst_offset,
            size,
            &wait,
        )?;
        deliver_event(rt, done, event)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueFillBuffer(
    queue: cl_command_queue,
    buffer: cl_mem,
    pattern: *const c_void,
    pattern_size: usize,
    offset: usize,
    size: usize,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        if pattern.is_null() {
            return Err(ClError::invalid_value("null fill pattern"));
        }
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let pattern = slice(pattern.cast::<u8>(), pattern_size)?;
        let done = rt.enqueue_fill_buffer(id(queue)?, id(buffer)?, pattern, offset, size, &wait)?;
        deliver_event(rt, done, event)
    })
}

// ============================================================================
// Programs
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateProgramWithSource(
    context: cl_context,
    count: cl_uint,
    strings: *const *const c_char,
    lengths: *const usize,
    errcode_ret: *mut cl_int,
) -> cl_program {
    unsafe {
        create(errcode_ret, |rt| {
            if count == 0 || strings.is_null() {
                return Err(ClError::invalid_value("no source strings"));
            }
            let strings = slice(strings, count as usize)?;
            let lengths = if lengths.is_null() {
                None
            } else {
                Some(slice(lengths, count as usize)?)
            };
            let mut fragments = Vec::with_capacity(strings.len());
            for (i, &ptr) in strings.iter().enumerate() {
                let len = lengths.map_or(0, |l| l[i]);
                let fragment = if len == 0 {
                    c_str(ptr)?
                } else {
                    std::str::from_utf8(slice(ptr.cast::<u8>(), len)?)
                        .map_err(|_| ClError::invalid_value("source is not valid UTF-8"))?
                };
                fragments.push(fragment);
            }
            rt.create_program_with_source(id(context)?, &fragments)
        })
    }
}

/// Builds synchronously; `pfn_notify` runs before this returns
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clBuildProgram(
    program: cl_program,
    num_devices: cl_uint,
    device_list: *const cl_device_id,
    options: *const c_char,
    pfn_notify: BuildNotify,
    user_data: *mut c_void,
) -> cl_int {
    status(|rt| unsafe {
        if (num_devices == 0) != device_list.is_null() {
            return Err(ClError::invalid_value("device count and list disagree"));
        }
        if pfn_notify.is_none() && !user_data.is_null() {
            return Err(ClError::invalid_value("user data without a callback"));
        }
        let devices = handles::<DeviceId>(device_list, num_devices)
            .map_err(|_| ClError::InvalidDevice)?;
        let options = if options.is_null() { "" } else { c_str(options)? };
        let result = rt.build_program(id(program)?, &devices, options);
        if let Some(notify) = pfn_notify {
            notify(program, user_data);
        }
        result
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn clRetainProgram(program: cl_program) -> cl_int {
    status(|rt| rt.retain_program(id(program)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clReleaseProgram(program: cl_program) -> cl_int {
    status(|rt| rt.release_program(id(program)?))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetProgramInfo(
    program: cl_program,
    param_name: cl_program_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.program_info(id(program)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetProgramBuildInfo(
    program: cl_program,
    device: cl_device_id,
    param_name: cl_program_build_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let device = id::<DeviceId>(device).map_err(|_| ClError::InvalidDevice)?;
        let info = rt.program_build_info(id(program)?, device, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

// ============================================================================
// Kernels
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateKernel(
    program: cl_program,
    kernel_name: *const c_char,
    errcode_ret: *mut cl_int,
) -> cl_kernel {
    unsafe { create(errcode_ret, |rt| rt.create_kernel(id(program)?, c_str(kernel_name)?)) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateKernelsInProgram(
    program: cl_program,
    num_kernels: cl_uint,
    kernels: *mut cl_kernel,
    num_kernels_ret: *mut cl_uint,
) -> cl_int {
    status(|rt| {
        let program = id::<ProgramId>(program)?;
        let count = rt
            .program_info(program, CL_PROGRAM_NUM_KERNELS)?
            .as_size()
            .unwrap_or(0);
        if !kernels.is_null() {
            if (num_kernels as usize) < count {
                return Err(ClError::invalid_value(format!(
                    "room for {} kernel(s), program has {}",
                    num_kernels, count
                )));
            }
            for (i, kernel) in rt.create_kernels_in_program(program)?.into_iter().enumerate() {
                // Safety: `i < count <= num_kernels`.
                unsafe { *kernels.add(i) = to_ptr(kernel) };
            }
        }
        if !num_kernels_ret.is_null() {
            // Safety: checked non-null.
            unsafe { *num_kernels_ret = count as cl_uint };
        }
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clSetKernelArg(
    kernel: cl_kernel,
    arg_index: cl_uint,
    arg_size: usize,
    arg_value: *const c_void,
) -> cl_int {
    status(|rt| {
        let value = if arg_value.is_null() {
            None
        } else {
            // Safety: the caller passes `arg_size` readable bytes.
            Some(unsafe { std::slice::from_raw_parts(arg_value.cast::<u8>(), arg_size) })
        };
        rt.set_kernel_arg_raw(id(kernel)?, arg_index, arg_size, value)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn clRetainKernel(kernel: cl_kernel) -> cl_int {
    status(|rt| rt.retain_kernel(id(kernel)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clReleaseKernel(kernel: cl_kernel) -> cl_int {
    status(|rt| rt.release_kernel(id(kernel)?))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetKernelInfo(
    kernel: cl_kernel,
    param_name: cl_kernel_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.kernel_info(id(kernel)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetKernelArgInfo(
    kernel: cl_kernel,
    arg_index: cl_uint,
    param_name: cl_kernel_arg_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.kernel_arg_info(id(kernel)?, arg_index, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetKernelWorkGroupInfo(
    kernel: cl_kernel,
    device: cl_device_id,
    param_name: cl_kernel_work_group_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let device = if device.is_null() {
            None
        } else {
            Some(id::<DeviceId>(device).map_err(|_| ClError::InvalidDevice)?)
        };
        let info = rt.kernel_work_group_info(id(kernel)?, device, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueNDRangeKernel(
    queue: cl_command_queue,
    kernel: cl_kernel,
    work_dim: cl_uint,
    global_work_offset: *const usize,
    global_work_size: *const usize,
    local_work_size: *const usize,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        let (queue, kernel) = (id(queue)?, id(kernel)?);
        if !(1..=3).contains(&work_dim) {
            return Err(ClError::InvalidWorkDimension);
        }
        if global_work_size.is_null() {
            return Err(ClError::InvalidGlobalWorkSize);
        }
        let dims = work_dim as usize;
        let global = slice(global_work_size, dims)?;
        let offset = if global_work_offset.is_null() {
            None
        } else {
            Some(slice(global_work_offset, dims)?)
        };
        let local = if local_work_size.is_null() {
            None
        } else {
            Some(slice(local_work_size, dims)?)
        };
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let done = rt.enqueue_nd_range_kernel(queue, kernel, work_dim, offset, global, local, &wait)?;
        deliver_event(rt, done, event)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueTask(
    queue: cl_command_queue,
    kernel: cl_kernel,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        let (queue, kernel) = (id(queue)?, id(kernel)?);
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let done = rt.enqueue_task(queue, kernel, &wait)?;
        deliver_event(rt, done, event)
    })
}

// ============================================================================
// Events
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueMarkerWithWaitList(
    queue: cl_command_queue,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        let queue = id(queue)?;
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let done = rt.enqueue_marker_with_wait_list(queue, &wait)?;
        deliver_event(rt, done, event)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clEnqueueBarrierWithWaitList(
    queue: cl_command_queue,
    num_events_in_wait_list: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    status(|rt| unsafe {
        let queue = id(queue)?;
        let wait = wait_list(num_events_in_wait_list, event_wait_list)?;
        let done = rt.enqueue_barrier_with_wait_list(queue, &wait)?;
        deliver_event(rt, done, event)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clWaitForEvents(num_events: cl_uint, event_list: *const cl_event) -> cl_int {
    status(|rt| {
        if num_events == 0 || event_list.is_null() {
            return Err(ClError::invalid_value("empty event list"));
        }
        let events = unsafe { handles::<EventId>(event_list, num_events) }?;
        rt.wait_for_events(&events)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetEventInfo(
    event: cl_event,
    param_name: cl_event_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let info = rt.event_info(id(event)?, param_name)?;
        unsafe { write_info(info, param_value_size, param_value, param_value_size_ret) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clGetEventProfilingInfo(
    event: cl_event,
    param_name: cl_profiling_info,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int {
    status(|rt| {
        let nanos = rt.event_profiling_info(id(event)?, param_name)?;
        unsafe {
            write_info(
                InfoValue::Ulong(nanos),
                param_value_size,
                param_value,
                param_value_size_ret,
            )
        }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clCreateUserEvent(context: cl_context, errcode_ret: *mut cl_int) -> cl_event {
    unsafe { create(errcode_ret, |rt| rt.create_user_event(id(context)?)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn clSetUserEventStatus(event: cl_event, execution_status: cl_int) -> cl_int {
    status(|rt| rt.set_user_event_status(id(event)?, execution_status))
}

#[unsafe(no_mangle)]
pub extern "C" fn clRetainEvent(event: cl_event) -> cl_int {
    status(|rt| rt.retain_event(id(event)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn clReleaseEvent(event: cl_event) -> cl_int {
    status(|rt| rt.release_event(id(event)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_pointers_round_trip() {
        let context = ContextId::from_raw(42).unwrap();
        let ptr = to_ptr(context);
        assert_eq!(id::<ContextId>(ptr).unwrap(), context);
        assert_eq!(
            id::<ContextId>(std::ptr::null_mut()).err(),
            Some(ClError::InvalidHandle(HandleKind::Context))
        );
    }

    #[test]
    fn test_write_info_checks_room() {
        let mut small = [0u8; 2];
        let mut needed = 0usize;
        let result = unsafe {
            write_info(
                InfoValue::Uint(7),
                small.len(),
                small.as_mut_ptr().cast(),
                &mut needed,
            )
        };
        assert_eq!(result.unwrap_err().code(), CL_INVALID_VALUE);
        assert_eq!(needed, 0);

        let mut value = [0u8; 4];
        unsafe { write_info(InfoValue::Uint(7), 4, value.as_mut_ptr().cast(), &mut needed) }
            .unwrap();
        assert_eq!(u32::from_ne_bytes(value), 7);
        assert_eq!(needed, 4);
    }

    #[test]
    fn test_wait_list_shape() {
        let events = [to_ptr(EventId::from_raw(3).unwrap())];
        assert!(unsafe { wait_list(0, std::ptr::null()) }.unwrap().is_empty());
        assert_eq!(
            unsafe { wait_list(1, std::ptr::null()) }.err(),
            Some(ClError::InvalidEventWaitList)
        );
        assert_eq!(
            unsafe { wait_list(0, events.as_ptr()) }.err(),
            Some(ClError::InvalidEventWaitList)
        );
        assert_eq!(unsafe { wait_list(1, events.as_ptr()) }.unwrap().len(), 1);
    }

    #[test]
    fn test_context_properties_are_zero_terminated() {
        let props: [cl_context_properties; 3] = [CL_CONTEXT_PLATFORM, 7, 0];
        assert_eq!(
            unsafe { context_properties(props.as_ptr()) }.unwrap(),
            vec![(CL_CONTEXT_PLATFORM, 7)]
        );
        assert!(unsafe { context_properties(std::ptr::null()) }.unwrap().is_empty());
    }
}
