//! Byte storage shared by host buffers, `__local` memory, and private arrays

use std::sync::{Mutex, PoisonError};

use crate::backend::traits::BackendError;

/// A kernel fault: invalid memory access or similar
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault(pub String);

impl From<Fault> for BackendError {
    fn from(f: Fault) -> Self {
        BackendError::KernelFault(f.0)
    }
}

enum Storage {
    Owned(Mutex<Vec<u8>>),
    /// Caller memory wrapped without copying
    Aliased {
        ptr: *mut u8,
        len: usize,
        lock: Mutex<()>,
    },
}

pub(crate) struct Memory {
    storage: Storage,
}

// Safety: owned storage is behind a mutex. Aliased storage is only touched
// while holding `lock`, and the creator of an aliased memory guarantees that
// the pointer stays valid for reads and writes for the memory's lifetime.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.storage {
            Storage::Owned(_) => "owned",
            Storage::Aliased { .. } => "aliased",
        };
        write!(f, "Memory({} bytes, {})", self.len(), kind)
    }
}

impl Memory {
    /// Zero-initialised memory; fails instead of aborting when the allocator refuses
    pub fn zeroed(len: usize) -> Result<Self, BackendError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| BackendError::Allocation(len))?;
        bytes.resize(len, 0);
        Ok(Self::from_bytes(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            storage: Storage::Owned(Mutex::new(bytes)),
        }
    }

    /// Wrap caller memory
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the whole
    /// lifetime of the returned value.
    pub unsafe fn aliased(ptr: *mut u8, len: usize) -> Self {
        Self {
            storage: Storage::Aliased {
                ptr,
                len,
                lock: Mutex::new(()),
            },
        }
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Owned(bytes) => bytes.lock().unwrap_or_else(PoisonError::into_inner).len(),
            Storage::Aliased { len, .. } => *len,
        }
    }

    /// Run `f` on `len` bytes at `offset` while holding the memory lock
    pub fn access<R>(
        &self,
        offset: isize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, Fault> {
        let out_of_bounds = |size: usize| {
            Fault(format!(
                "out-of-bounds access of {} byte(s) at offset {} in a {}-byte allocation",
                len, offset, size
            ))
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds(self.len()))?;
        match &self.storage {
            Storage::Owned(bytes) => {
                let mut bytes = bytes.lock().unwrap_or_else(PoisonError::into_inner);
                let size = bytes.len();
                let slot = start
                    .checked_add(len)
                    .and_then(|end| bytes.get_mut(start..end))
                    .ok_or_else(|| out_of_bounds(size))?;
                Ok(f(slot))
            }
            Storage::Aliased { ptr, len: size, lock } => {
                match start.checked_add(len) {
                    Some(end) if end <= *size => {}
                    _ => return Err(out_of_bounds(*size)),
                }
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                // Safety: the range was checked against the aliased length and
                // the pointer is valid per the contract of `aliased`.
                let slot = unsafe { std::slice::from_raw_parts_mut(ptr.add(start), len) };
                Ok(f(slot))
            }
        }
    }

    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), Fault> {
        let offset = isize::try_from(offset).map_err(|_| Fault("offset overflow".into()))?;
        self.access(offset, dst.len(), |src| dst.copy_from_slice(src))
    }

    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), Fault> {
        let offset = isize::try_from(offset).map_err(|_| Fault("offset overflow".into()))?;
        self.access(offset, src.len(), |dst| dst.copy_from_slice(src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_read_write() {
        let mem = Memory::zeroed(8).unwrap();
        mem.write(2, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 4];
        mem.read(1, &mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3]);
    }

    #[test]
    fn test_out_of_bounds_is_a_fault() {
        let mem = Memory::zeroed(4).unwrap();
        assert!(mem.access(2, 4, |_| ()).is_err());
        assert!(mem.access(-1, 1, |_| ()).is_err());
        assert!(mem.access(isize::MAX, 2, |_| ()).is_err());
    }

    #[test]
    fn test_aliased_memory_sees_caller_bytes() {
        let mut backing = vec![7u8; 4];
        let mem = unsafe { Memory::aliased(backing.as_mut_ptr(), backing.len()) };
        mem.write(0, &[9]).unwrap();
        let mut out = [0u8; 2];
        mem.read(0, &mut out).unwrap();
        assert_eq!(out, [9, 7]);
        drop(mem);
        assert_eq!(backing[0], 9);
    }
}
