//! Host device
//!
//! A CPU device that executes kernels with the interpreter. It reports
//! itself as a GPU so that applications asking for GPU devices find it.

use std::sync::Arc;

use log::debug;

use super::buffer::HostBuffer;
use super::kernel::{HostLibrary, HostQueue};
use super::memory::Memory;
use crate::backend::traits::{
    BackendError, DeviceDescriptor, DeviceType, NativeBuffer, NativeDevice, NativeLibrary,
    NativeQueue, StorageMode,
};
use crate::compiler::Artifact;
use crate::config::RuntimeConfig;

const GLOBAL_MEM_SIZE: u64 = 1 << 30;
const LOCAL_MEM_SIZE: u64 = 32 << 10;
const MAX_CONSTANT_BUFFER_SIZE: u64 = 64 << 10;

#[derive(Debug, Clone)]
pub struct HostDevice {
    descriptor: DeviceDescriptor,
    /// Worker threads for non-barrier dispatches
    num_threads: usize,
}

impl HostDevice {
    pub fn new(config: &RuntimeConfig) -> Self {
        let num_threads = config.host_threads.max(1);
        let wg = config.max_work_group_size.max(1);
        let descriptor = DeviceDescriptor {
            name: "clmetal host device".to_string(),
            vendor: "clmetal".to_string(),
            vendor_id: 0,
            device_type: DeviceType::Gpu,
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            max_compute_units: u32::try_from(num_threads).unwrap_or(u32::MAX),
            max_clock_frequency: 1000,
            max_work_group_size: wg,
            max_work_item_sizes: [wg; 3],
            global_mem_size: GLOBAL_MEM_SIZE,
            local_mem_size: LOCAL_MEM_SIZE,
            max_mem_alloc_size: GLOBAL_MEM_SIZE / 4,
            max_constant_buffer_size: MAX_CONSTANT_BUFFER_SIZE,
            supports_double: true,
        };
        Self {
            descriptor,
            num_threads,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl NativeDevice for HostDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn new_buffer(
        &self,
        len: usize,
        _storage: StorageMode,
        init: Option<&[u8]>,
    ) -> Result<Arc<dyn NativeBuffer>, BackendError> {
        if len as u64 > self.descriptor.max_mem_alloc_size {
            return Err(BackendError::Allocation(len));
        }
        let memory = match init {
            Some(bytes) if bytes.len() == len => Memory::from_bytes(bytes.to_vec()),
            Some(bytes) => {
                return Err(BackendError::Other(format!(
                    "initial data of {} bytes for a {}-byte buffer",
                    bytes.len(),
                    len
                )));
            }
            None => Memory::zeroed(len)?,
        };
        Ok(Arc::new(HostBuffer::new(memory)))
    }

    unsafe fn new_buffer_no_copy(
        &self,
        ptr: *mut u8,
        len: usize,
    ) -> Result<Arc<dyn NativeBuffer>, BackendError> {
        if ptr.is_null() {
            return Err(BackendError::Other("null host pointer".to_string()));
        }
        // Safety: forwarded from the caller's contract.
        let memory = unsafe { Memory::aliased(ptr, len) };
        Ok(Arc::new(HostBuffer::new(memory)))
    }

    fn new_library(
        &self,
        artifact: &Arc<Artifact>,
    ) -> Result<(Arc<dyn NativeLibrary>, String), BackendError> {
        let library = HostLibrary::new(artifact.clone(), self.descriptor.max_work_group_size)?;
        debug!(
            "Host library ready: {} kernel(s)",
            artifact.kernels.len()
        );
        Ok((Arc::new(library), String::new()))
    }

    fn new_command_queue(&self) -> Result<Arc<dyn NativeQueue>, BackendError> {
        Ok(Arc::new(HostQueue::new(self.num_threads)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_follows_config() {
        let config = RuntimeConfig::builder()
            .host_threads(3)
            .max_work_group_size(64)
            .build();
        let device = HostDevice::new(&config);
        let desc = device.descriptor();
        assert_eq!(desc.device_type, DeviceType::Gpu);
        assert_eq!(desc.max_compute_units, 3);
        assert_eq!(desc.max_work_group_size, 64);
        assert_eq!(desc.max_work_item_sizes, [64; 3]);
        assert!(desc.supports_double);
    }

    #[test]
    fn test_buffer_allocation() {
        let device = HostDevice::new(&RuntimeConfig::default());
        let buffer = device
            .new_buffer(4, StorageMode::Shared, Some(&[1, 2, 3, 4]))
            .unwrap();
        let mut out = [0u8; 4];
        buffer.read(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(matches!(
            device.new_buffer(usize::MAX, StorageMode::Private, None),
            Err(BackendError::Allocation(_))
        ));
    }
}
