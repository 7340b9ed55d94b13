//! Metal native buffer

use std::any::Any;

use metal::{Buffer as MtlBuffer, BufferRef};

use crate::backend::traits::{BackendError, NativeBuffer, check_range};

/// Metal buffer in shared storage
///
/// Host reads and writes go straight through `contents()`.
pub struct MetalBuffer {
    buffer: MtlBuffer,
    len: usize,
}

impl MetalBuffer {
    pub(crate) fn new(buffer: MtlBuffer, len: usize) -> Self {
        Self { buffer, len }
    }

    pub fn mtl_buffer(&self) -> &BufferRef {
        &self.buffer
    }
}

impl NativeBuffer for MetalBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), BackendError> {
        check_range(offset, dst.len(), self.len)?;
        let base = self.buffer.contents() as *const u8;
        // Safety: the range was checked against the buffer length and shared
        // storage is host-visible.
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), BackendError> {
        check_range(offset, src.len(), self.len)?;
        let base = self.buffer.contents() as *mut u8;
        // Safety: as in `read`.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), src.len());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// Safety: MTLBuffer is thread-safe; concurrent access to its contents is
// serialized by the owning command queue.
unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}
