//! Metal device enumeration

use std::sync::Arc;

use log::{debug, info, warn};
use metal::{Device as MtlDevice, MTLResourceOptions};

use super::buffer::MetalBuffer;
use super::compiler::{MetalLibrary, compile};
use super::kernel::MetalQueue;
use super::renderer::render;
use crate::backend::traits::{
    Backend, BackendError, DeviceDescriptor, DeviceType, NativeBuffer, NativeDevice,
    NativeLibrary, NativeQueue, StorageMode,
};
use crate::compiler::Artifact;

/// `newBufferWithBytesNoCopy` needs page-aligned memory
const PAGE_SIZE: usize = 16384;

/// Backend over every Metal device in the system
pub struct MetalBackend {
    devices: Vec<Arc<MetalDevice>>,
}

impl MetalBackend {
    pub fn is_available() -> bool {
        !MtlDevice::all().is_empty()
    }

    pub fn new() -> Result<Self, BackendError> {
        let devices: Vec<Arc<MetalDevice>> = MtlDevice::all()
            .into_iter()
            .map(|d| Arc::new(MetalDevice::new(d)))
            .collect();
        if devices.is_empty() {
            return Err(BackendError::Other("no Metal device found".to_string()));
        }
        info!("Metal backend: {} device(s)", devices.len());
        Ok(Self { devices })
    }
}

impl Backend for MetalBackend {
    fn name(&self) -> &str {
        "metal"
    }

    fn devices(&self) -> Vec<Arc<dyn NativeDevice>> {
        self.devices
            .iter()
            .map(|d| d.clone() as Arc<dyn NativeDevice>)
            .collect()
    }
}

pub struct MetalDevice {
    device: MtlDevice,
    descriptor: DeviceDescriptor,
}

impl MetalDevice {
    fn new(device: MtlDevice) -> Self {
        let max_threads = device.max_threads_per_threadgroup();
        let working_set = device.recommended_max_working_set_size();
        let descriptor = DeviceDescriptor {
            name: device.name().to_string(),
            vendor: "Apple".to_string(),
            vendor_id: 0x1027f00,
            device_type: DeviceType::Gpu,
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            max_compute_units: 8,
            max_clock_frequency: 1000,
            max_work_group_size: max_threads.width as usize,
            max_work_item_sizes: [
                max_threads.width as usize,
                max_threads.height as usize,
                max_threads.depth as usize,
            ],
            global_mem_size: working_set,
            local_mem_size: device.max_threadgroup_memory_length(),
            max_mem_alloc_size: device.max_buffer_length().min(working_set),
            max_constant_buffer_size: 64 << 10,
            supports_double: false,
        };
        debug!("Metal device '{}': {:?}", descriptor.name, descriptor);
        Self { device, descriptor }
    }
}

impl NativeDevice for MetalDevice {
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
        // Shared storage keeps host transfers a plain memcpy
        let options = MTLResourceOptions::StorageModeShared;
        let buffer = match init {
            Some(bytes) => self.device.new_buffer_with_data(
                bytes.as_ptr() as *const std::ffi::c_void,
                len as u64,
                options,
            ),
            None => self.device.new_buffer(len as u64, options),
        };
        Ok(Arc::new(MetalBuffer::new(buffer, len)))
    }

    unsafe fn new_buffer_no_copy(
        &self,
        ptr: *mut u8,
        len: usize,
    ) -> Result<Arc<dyn NativeBuffer>, BackendError> {
        if ptr.is_null() || (ptr as usize) % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(BackendError::Other(format!(
                "host pointer must be page aligned ({} bytes) with a page-multiple length",
                PAGE_SIZE
            )));
        }
        let buffer = self.device.new_buffer_with_bytes_no_copy(
            ptr as *const std::ffi::c_void,
            len as u64,
            MTLResourceOptions::StorageModeShared,
            None,
        );
        Ok(Arc::new(MetalBuffer::new(buffer, len)))
    }

    fn new_library(
        &self,
        artifact: &Arc<Artifact>,
    ) -> Result<(Arc<dyn NativeLibrary>, String), BackendError> {
        let (code, warnings) = render(&artifact.module).map_err(BackendError::Compilation)?;
        for w in &warnings {
            warn!("{}", w);
        }
        let library = compile(&self.device, &code, &artifact.options)?;
        let log = warnings
            .iter()
            .map(|w| format!("warning: {}", w))
            .collect::<Vec<_>>()
            .join("\n");
        Ok((
            Arc::new(MetalLibrary::new(self.device.clone(), library)),
            log,
        ))
    }

    fn new_command_queue(&self) -> Result<Arc<dyn NativeQueue>, BackendError> {
        Ok(Arc::new(MetalQueue::new(self.device.new_command_queue())))
    }
}

// Safety: MTLDevice is thread-safe
unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_devices() {
        if !MetalBackend::is_available() {
            eprintln!("Metal not available, skipping test");
            return;
        }
        let backend = MetalBackend::new().unwrap();
        let devices = backend.devices();
        assert!(!devices.is_empty());
        assert!(devices[0].descriptor().max_work_group_size > 0);
        assert!(!devices[0].descriptor().supports_double);
    }

    #[test]
    fn test_shared_buffer_round_trip() {
        if !MetalBackend::is_available() {
            eprintln!("Metal not available, skipping test");
            return;
        }
        let backend = MetalBackend::new().unwrap();
        let device = &backend.devices()[0];
        let buffer = device
            .new_buffer(8, StorageMode::Shared, Some(&[0; 8]))
            .unwrap();
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 8];
        buffer.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(buffer.read(6, &mut [0u8; 4]).is_err());
    }
}
