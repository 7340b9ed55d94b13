//! Platform and device enumeration

use std::sync::Arc;

use log::debug;

use super::{Enumeration, Runtime};
use crate::backend::{DeviceDescriptor, DeviceType, NativeDevice};
use crate::error::{ClError, Result};
use crate::handle::{DeviceId, Handle, PlatformId};
use crate::info::InfoValue;
use crate::types::*;

const PROFILE: &str = "FULL_PROFILE";
const VENDOR: &str = "clmetal";
const EXTENSIONS: &str = "cl_khr_byte_addressable_store cl_khr_global_int32_base_atomics \
                          cl_khr_global_int32_extended_atomics cl_khr_local_int32_base_atomics \
                          cl_khr_local_int32_extended_atomics";

const KNOWN_TYPE_BITS: cl_device_type = CL_DEVICE_TYPE_DEFAULT
    | CL_DEVICE_TYPE_CPU
    | CL_DEVICE_TYPE_GPU
    | CL_DEVICE_TYPE_ACCELERATOR;

/// The single platform of a runtime
#[derive(Debug, Clone)]
pub struct Platform {
    name: String,
    version: String,
}

impl Platform {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: format!("OpenCL 1.2 clmetal {}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// A compute device of the platform
pub struct Device {
    platform: PlatformId,
    native: Arc<dyn NativeDevice>,
}

impl Device {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.native.descriptor()
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    fn type_bits(&self) -> cl_device_type {
        match self.descriptor().device_type {
            DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        }
    }

    fn extensions(&self) -> String {
        if self.descriptor().supports_double {
            format!("{} cl_khr_fp64", EXTENSIONS)
        } else {
            EXTENSIONS.to_string()
        }
    }
}

impl Runtime {
    fn enumeration(&self) -> &Enumeration {
        self.enumeration.get_or_init(|| {
            let platform = self
                .registry
                .insert(Arc::new(Platform::new(&self.config.platform_name)));
            let devices: Vec<DeviceId> = self
                .backend
                .devices()
                .into_iter()
                .map(|native| self.registry.insert(Arc::new(Device { platform, native })))
                .collect();
            debug!(
                "Enumerated platform {:?} with {} device(s)",
                platform,
                devices.len()
            );
            Enumeration { platform, devices }
        })
    }

    /// The platforms of this runtime (always exactly one)
    pub fn platform_ids(&self) -> Vec<PlatformId> {
        vec![self.enumeration().platform]
    }

    /// Devices of `platform` matching `device_type`
    ///
    /// `CL_DEVICE_TYPE_DEFAULT` selects the first device.
    pub fn device_ids(
        &self,
        platform: PlatformId,
        device_type: cl_device_type,
    ) -> Result<Vec<DeviceId>> {
        self.resolve::<Platform>(platform)?;
        self.devices_of_type(device_type)
    }

    pub(crate) fn devices_of_type(&self, device_type: cl_device_type) -> Result<Vec<DeviceId>> {
        if device_type == 0
            || (device_type != CL_DEVICE_TYPE_ALL && device_type & !KNOWN_TYPE_BITS != 0)
        {
            return Err(ClError::InvalidDeviceType);
        }
        let all = &self.enumeration().devices;
        let matching: Vec<DeviceId> = if device_type == CL_DEVICE_TYPE_ALL {
            all.clone()
        } else {
            all.iter()
                .enumerate()
                .filter(|(i, id)| {
                    let default = *i == 0 && device_type & CL_DEVICE_TYPE_DEFAULT != 0;
                    default
                        || self
                            .resolve::<Device>(**id)
                            .is_ok_and(|d| d.type_bits() & device_type != 0)
                })
                .map(|(_, id)| *id)
                .collect()
        };
        if matching.is_empty() {
            return Err(ClError::DeviceNotFound);
        }
        Ok(matching)
    }

    /// Whether `device` is one of the root devices of this runtime
    pub(crate) fn check_device(&self, device: DeviceId) -> Result<Arc<Device>> {
        if !self.enumeration().devices.contains(&device) {
            return Err(ClError::InvalidDevice);
        }
        self.resolve::<Device>(device)
    }

    pub fn platform_info(&self, platform: PlatformId, param: cl_platform_info) -> Result<InfoValue> {
        let p = self.resolve::<Platform>(platform)?;
        Ok(match param {
            CL_PLATFORM_PROFILE => InfoValue::String(PROFILE.to_string()),
            CL_PLATFORM_VERSION => InfoValue::String(p.version.clone()),
            CL_PLATFORM_NAME => InfoValue::String(p.name.clone()),
            CL_PLATFORM_VENDOR => InfoValue::String(VENDOR.to_string()),
            CL_PLATFORM_EXTENSIONS => InfoValue::String(EXTENSIONS.to_string()),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }

    pub fn device_info(&self, device: DeviceId, param: cl_device_info) -> Result<InfoValue> {
        let d = self.resolve::<Device>(device)?;
        let desc = d.descriptor();
        Ok(match param {
            CL_DEVICE_TYPE => InfoValue::Bitfield(d.type_bits()),
            CL_DEVICE_VENDOR_ID => InfoValue::Uint(desc.vendor_id),
            CL_DEVICE_MAX_COMPUTE_UNITS => InfoValue::Uint(desc.max_compute_units),
            CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS => InfoValue::Uint(3),
            CL_DEVICE_MAX_WORK_GROUP_SIZE => InfoValue::Size(desc.max_work_group_size),
            CL_DEVICE_MAX_WORK_ITEM_SIZES => {
                InfoValue::SizeArray(desc.max_work_item_sizes.to_vec())
            }
            CL_DEVICE_MAX_CLOCK_FREQUENCY => InfoValue::Uint(desc.max_clock_frequency),
            CL_DEVICE_ADDRESS_BITS => InfoValue::Uint(64),
            CL_DEVICE_MAX_MEM_ALLOC_SIZE => InfoValue::Ulong(desc.max_mem_alloc_size),
            CL_DEVICE_IMAGE_SUPPORT => InfoValue::Bool(false),
            // in bits
            CL_DEVICE_MEM_BASE_ADDR_ALIGN => InfoValue::Uint(1024),
            CL_DEVICE_GLOBAL_MEM_SIZE => InfoValue::Ulong(desc.global_mem_size),
            CL_DEVICE_MAX_CONSTANT_BUFFER_SIZE => InfoValue::Ulong(desc.max_constant_buffer_size),
            CL_DEVICE_LOCAL_MEM_TYPE => InfoValue::Uint(CL_LOCAL),
            CL_DEVICE_LOCAL_MEM_SIZE => InfoValue::Ulong(desc.local_mem_size),
            CL_DEVICE_ENDIAN_LITTLE => InfoValue::Bool(cfg!(target_endian = "little")),
            CL_DEVICE_AVAILABLE | CL_DEVICE_COMPILER_AVAILABLE => InfoValue::Bool(true),
            CL_DEVICE_LINKER_AVAILABLE => InfoValue::Bool(false),
            CL_DEVICE_QUEUE_PROPERTIES => InfoValue::Bitfield(CL_QUEUE_PROFILING_ENABLE),
            CL_DEVICE_NAME => InfoValue::String(desc.name.clone()),
            CL_DEVICE_VENDOR => InfoValue::String(desc.vendor.clone()),
            CL_DRIVER_VERSION => InfoValue::String(desc.driver_version.clone()),
            CL_DEVICE_PROFILE => InfoValue::String(PROFILE.to_string()),
            CL_DEVICE_VERSION => InfoValue::String("OpenCL 1.2 clmetal".to_string()),
            CL_DEVICE_OPENCL_C_VERSION => InfoValue::String("OpenCL C 1.2 ".to_string()),
            CL_DEVICE_EXTENSIONS => InfoValue::String(d.extensions()),
            CL_DEVICE_PLATFORM => InfoValue::Handle(d.platform.raw()),
            CL_DEVICE_DOUBLE_FP_CONFIG => InfoValue::Bitfield(if desc.supports_double {
                CL_FP_FMA
                    | CL_FP_ROUND_TO_NEAREST
                    | CL_FP_ROUND_TO_ZERO
                    | CL_FP_ROUND_TO_INF
                    | CL_FP_INF_NAN
                    | CL_FP_DENORM
            } else {
                0
            }),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::tests::host_runtime;
    use crate::types::*;
    use crate::{ClError, HandleKind, PlatformId};
    use rstest::rstest;

    #[test]
    fn test_enumeration_is_idempotent() {
        let runtime = host_runtime();
        let first = runtime.platform_ids();
        assert_eq!(first, runtime.platform_ids());
        let devices = runtime.device_ids(first[0], CL_DEVICE_TYPE_ALL).unwrap();
        assert_eq!(devices, runtime.device_ids(first[0], CL_DEVICE_TYPE_ALL).unwrap());
        assert_eq!(devices.len(), 1);
    }

    #[rstest]
    #[case(CL_DEVICE_TYPE_GPU, Ok(1))]
    #[case(CL_DEVICE_TYPE_DEFAULT, Ok(1))]
    #[case(CL_DEVICE_TYPE_CPU, Err(CL_DEVICE_NOT_FOUND))]
    #[case(CL_DEVICE_TYPE_ACCELERATOR, Err(CL_DEVICE_NOT_FOUND))]
    #[case(0, Err(CL_INVALID_DEVICE_TYPE))]
    #[case(1 << 20, Err(CL_INVALID_DEVICE_TYPE))]
    fn test_device_type_masks(#[case] mask: cl_device_type, #[case] expected: Result<usize, cl_int>) {
        let runtime = host_runtime();
        let platform = runtime.platform_ids()[0];
        let result = runtime
            .device_ids(platform, mask)
            .map(|d| d.len())
            .map_err(|e| e.code());
        assert_eq!(result, expected);
    }

    #[test]
    fn test_unknown_platform() {
        let runtime = host_runtime();
        let bogus = <PlatformId as crate::Handle>::from_raw(4242).unwrap();
        assert_eq!(
            runtime.device_ids(bogus, CL_DEVICE_TYPE_ALL).err(),
            Some(ClError::InvalidHandle(HandleKind::Platform))
        );
    }

    #[test]
    fn test_info_tables() {
        let runtime = host_runtime();
        let platform = runtime.platform_ids()[0];
        assert_eq!(
            runtime
                .platform_info(platform, CL_PLATFORM_PROFILE)
                .unwrap()
                .as_str(),
            Some("FULL_PROFILE")
        );
        assert_eq!(
            runtime
                .platform_info(platform, CL_PLATFORM_NAME)
                .unwrap()
                .as_str(),
            Some("clmetal")
        );
        let device = runtime.device_ids(platform, CL_DEVICE_TYPE_ALL).unwrap()[0];
        assert_eq!(
            runtime
                .device_info(device, CL_DEVICE_TYPE)
                .unwrap()
                .as_bitfield(),
            Some(CL_DEVICE_TYPE_GPU)
        );
        assert_eq!(
            runtime
                .device_info(device, CL_DEVICE_PLATFORM)
                .unwrap()
                .as_handle(),
            Some(crate::Handle::raw(platform))
        );
        assert_eq!(
            runtime.device_info(device, 0x9999).unwrap_err().code(),
            CL_INVALID_VALUE
        );
    }
}
