//! Buffer objects

use std::sync::Arc;

use log::{debug, info};

use super::Runtime;
use super::context::Context;
use crate::backend::{NativeBuffer, StorageMode};
use crate::error::{ClError, Result};
use crate::handle::{ContextId, Handle, MemId};
use crate::info::InfoValue;
use crate::types::*;

const ACCESS_FLAGS: cl_mem_flags = CL_MEM_READ_WRITE | CL_MEM_WRITE_ONLY | CL_MEM_READ_ONLY;
const HOST_PTR_FLAGS: cl_mem_flags =
    CL_MEM_USE_HOST_PTR | CL_MEM_ALLOC_HOST_PTR | CL_MEM_COPY_HOST_PTR;

/// A linear memory object
pub struct Buffer {
    context_id: ContextId,
    flags: cl_mem_flags,
    size: usize,
    /// Caller memory aliased through `CL_MEM_USE_HOST_PTR`
    host_ptr: Option<usize>,
    native: Arc<dyn NativeBuffer>,
}

impl Buffer {
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn flags(&self) -> cl_mem_flags {
        self.flags
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeBuffer> {
        &self.native
    }

    /// Check that `offset..offset + len` lies inside the buffer
    pub(crate) fn check_region(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ClError::invalid_value(format!(
                "region {}+{} exceeds buffer of {} bytes",
                offset, len, self.size
            ))),
        }
    }
}

/// Validate flags and the presence of host memory
fn check_flags(flags: cl_mem_flags, has_host_ptr: bool) -> Result<()> {
    if flags & !(ACCESS_FLAGS | HOST_PTR_FLAGS) != 0 {
        return Err(ClError::invalid_value(format!(
            "unknown memory flags {:#x}",
            flags
        )));
    }
    if (flags & ACCESS_FLAGS).count_ones() > 1 {
        return Err(ClError::invalid_value(
            "at most one access flag may be given",
        ));
    }
    if flags & CL_MEM_USE_HOST_PTR != 0
        && flags & (CL_MEM_ALLOC_HOST_PTR | CL_MEM_COPY_HOST_PTR) != 0
    {
        return Err(ClError::invalid_value(
            "CL_MEM_USE_HOST_PTR excludes CL_MEM_ALLOC_HOST_PTR and CL_MEM_COPY_HOST_PTR",
        ));
    }
    let needs_host_ptr = flags & (CL_MEM_USE_HOST_PTR | CL_MEM_COPY_HOST_PTR) != 0;
    if needs_host_ptr != has_host_ptr {
        return Err(ClError::InvalidHostPtr);
    }
    Ok(())
}

fn storage_mode(flags: cl_mem_flags) -> StorageMode {
    if flags & HOST_PTR_FLAGS != 0 {
        StorageMode::Shared
    } else {
        StorageMode::Private
    }
}

impl Runtime {
    fn check_buffer_size(&self, context: &Context, size: usize) -> Result<()> {
        let max = context.primary().descriptor().max_mem_alloc_size;
        if size == 0 || size as u64 > max {
            return Err(ClError::InvalidBufferSize(size));
        }
        Ok(())
    }

    fn register_buffer(&self, buffer: Buffer) -> Result<MemId> {
        let (size, flags) = (buffer.size, buffer.flags);
        let id = self.registry.insert_child(Arc::new(buffer))?;
        info!("Created buffer {:?}: {} bytes, flags {:#x}", id, size, flags);
        Ok(id)
    }

    /// Create a buffer of `size` bytes
    ///
    /// `host_data` is required with `CL_MEM_COPY_HOST_PTR` and must hold at
    /// least `size` bytes. `CL_MEM_USE_HOST_PTR` needs caller memory that
    /// outlives the buffer and is only available through
    /// [`Runtime::create_buffer_raw`].
    pub fn create_buffer(
        &self,
        context: ContextId,
        flags: cl_mem_flags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<MemId> {
        let ctx = self.resolve::<Context>(context)?;
        if flags & CL_MEM_USE_HOST_PTR != 0 {
            return Err(ClError::invalid_value(
                "CL_MEM_USE_HOST_PTR requires create_buffer_raw",
            ));
        }
        check_flags(flags, host_data.is_some())?;
        self.check_buffer_size(&ctx, size)?;
        let init = match host_data {
            Some(data) if data.len() < size => return Err(ClError::InvalidHostPtr),
            Some(data) => Some(&data[..size]),
            None => None,
        };
        let native = ctx
            .primary()
            .native()
            .new_buffer(size, storage_mode(flags), init)?;
        self.register_buffer(Buffer {
            context_id: context,
            flags,
            size,
            host_ptr: None,
            native,
        })
    }

    /// Create a buffer from a raw host pointer, as the C API does
    ///
    /// # Safety
    ///
    /// With `CL_MEM_COPY_HOST_PTR`, `host_ptr` must be valid for reads of
    /// `size` bytes. With `CL_MEM_USE_HOST_PTR` it must stay valid for reads
    /// and writes of `size` bytes until the buffer is destroyed; keeping the
    /// memory synchronized with device work is the caller's responsibility.
    pub unsafe fn create_buffer_raw(
        &self,
        context: ContextId,
        flags: cl_mem_flags,
        size: usize,
        host_ptr: *mut u8,
    ) -> Result<MemId> {
        let ctx = self.resolve::<Context>(context)?;
        check_flags(flags, !host_ptr.is_null())?;
        self.check_buffer_size(&ctx, size)?;
        let device = ctx.primary().native();
        let (native, aliased) = if flags & CL_MEM_USE_HOST_PTR != 0 {
            debug!("Aliasing {} bytes of host memory at {:p}", size, host_ptr);
            // Safety: forwarded from this function's contract.
            let native = unsafe { device.new_buffer_no_copy(host_ptr, size) }?;
            (native, Some(host_ptr as usize))
        } else if flags & CL_MEM_COPY_HOST_PTR != 0 {
            // Safety: the caller guarantees `size` readable bytes.
            let data = unsafe { std::slice::from_raw_parts(host_ptr as *const u8, size) };
            (device.new_buffer(size, storage_mode(flags), Some(data))?, None)
        } else {
            (device.new_buffer(size, storage_mode(flags), None)?, None)
        };
        self.register_buffer(Buffer {
            context_id: context,
            flags,
            size,
            host_ptr: aliased,
            native,
        })
    }

    pub fn retain_mem_object(&self, mem: MemId) -> Result<()> {
        self.registry.retain::<Buffer>(mem)
    }

    pub fn release_mem_object(&self, mem: MemId) -> Result<()> {
        self.release::<Buffer>(mem)
    }

    pub fn mem_info(&self, mem: MemId, param: cl_mem_info) -> Result<InfoValue> {
        let buffer = self.resolve::<Buffer>(mem)?;
        Ok(match param {
            CL_MEM_TYPE => InfoValue::Uint(CL_MEM_OBJECT_BUFFER),
            CL_MEM_FLAGS => InfoValue::Bitfield(buffer.flags),
            CL_MEM_SIZE => InfoValue::Size(buffer.size),
            CL_MEM_HOST_PTR => InfoValue::Handle(buffer.host_ptr.unwrap_or(0) as u64),
            CL_MEM_MAP_COUNT => InfoValue::Uint(0),
            CL_MEM_REFERENCE_COUNT => InfoValue::Uint(self.registry.ref_count::<Buffer>(mem)?),
            CL_MEM_CONTEXT => InfoValue::Handle(buffer.context_id.raw()),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::host_runtime;
    use rstest::rstest;

    #[rstest]
    #[case(CL_MEM_READ_WRITE, false, Ok(()))]
    #[case(0, false, Ok(()))]
    #[case(CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR, true, Ok(()))]
    #[case(CL_MEM_READ_ONLY | CL_MEM_WRITE_ONLY, false, Err(CL_INVALID_VALUE))]
    #[case(CL_MEM_USE_HOST_PTR | CL_MEM_COPY_HOST_PTR, true, Err(CL_INVALID_VALUE))]
    #[case(1 << 12, false, Err(CL_INVALID_VALUE))]
    #[case(CL_MEM_COPY_HOST_PTR, false, Err(CL_INVALID_HOST_PTR))]
    #[case(CL_MEM_READ_WRITE, true, Err(CL_INVALID_HOST_PTR))]
    #[case(CL_MEM_ALLOC_HOST_PTR, false, Ok(()))]
    fn test_flag_rules(
        #[case] flags: cl_mem_flags,
        #[case] has_host_ptr: bool,
        #[case] expected: std::result::Result<(), cl_int>,
    ) {
        assert_eq!(check_flags(flags, has_host_ptr).map_err(|e| e.code()), expected);
    }

    #[test]
    fn test_storage_modes() {
        assert_eq!(storage_mode(CL_MEM_READ_WRITE), StorageMode::Private);
        assert_eq!(storage_mode(CL_MEM_ALLOC_HOST_PTR), StorageMode::Shared);
    }

    #[test]
    fn test_create_buffer_and_info() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let data = [7u8; 32];
        let mem = runtime
            .create_buffer(context, CL_MEM_COPY_HOST_PTR, 32, Some(&data))
            .unwrap();
        assert_eq!(runtime.mem_info(mem, CL_MEM_SIZE).unwrap().as_size(), Some(32));
        assert_eq!(
            runtime.mem_info(mem, CL_MEM_CONTEXT).unwrap().as_handle(),
            Some(context.raw())
        );
        assert_eq!(
            runtime.mem_info(mem, CL_MEM_HOST_PTR).unwrap().as_handle(),
            Some(0)
        );
        runtime.release_mem_object(mem).unwrap();
        assert!(runtime.mem_info(mem, CL_MEM_SIZE).is_err());
    }

    #[test]
    fn test_buffer_size_limits() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        assert_eq!(
            runtime.create_buffer(context, 0, 0, None).err(),
            Some(ClError::InvalidBufferSize(0))
        );
        assert_eq!(
            runtime.create_buffer(context, 0, usize::MAX, None).err(),
            Some(ClError::InvalidBufferSize(usize::MAX))
        );
        assert_eq!(
            runtime
                .create_buffer(context, CL_MEM_COPY_HOST_PTR, 8, Some(&[0; 4]))
                .err(),
            Some(ClError::InvalidHostPtr)
        );
    }

    #[test]
    fn test_use_host_ptr_records_pointer() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let mut storage = vec![0u8; 64];
        let ptr = storage.as_mut_ptr();
        // Safety: `storage` outlives the buffer, which is released below.
        let mem = unsafe { runtime.create_buffer_raw(context, CL_MEM_USE_HOST_PTR, 64, ptr) }
            .unwrap();
        assert_eq!(
            runtime.mem_info(mem, CL_MEM_HOST_PTR).unwrap().as_handle(),
            Some(ptr as u64)
        );
        runtime.release_mem_object(mem).unwrap();
        drop(storage);
    }
}
