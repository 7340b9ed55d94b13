//! Host buffer

use std::any::Any;
use std::sync::Arc;

use super::memory::Memory;
use crate::backend::traits::{BackendError, NativeBuffer, check_range};

/// Buffer backed by host memory
#[derive(Debug, Clone)]
pub struct HostBuffer {
    memory: Arc<Memory>,
    len: usize,
}

impl HostBuffer {
    pub(crate) fn new(memory: Memory) -> Self {
        let len = memory.len();
        Self {
            memory: Arc::new(memory),
            len,
        }
    }

    pub(crate) fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }
}

impl NativeBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), BackendError> {
        check_range(offset, dst.len(), self.len)?;
        self.memory.read(offset, dst)?;
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), BackendError> {
        check_range(offset, src.len(), self.len)?;
        self.memory.write(offset, src)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_buffer_transfer() {
        let buffer = HostBuffer::new(Memory::zeroed(16).unwrap());
        let data: Vec<u8> = (0..8).collect();
        buffer.write(4, &data).unwrap();
        let mut out = vec![0u8; 16];
        buffer.read(0, &mut out).unwrap();
        assert_eq!(&out[4..12], &data[..]);
        assert!(buffer.read(12, &mut [0u8; 8]).is_err());
    }
}
