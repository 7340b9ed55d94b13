//! Contexts

use std::sync::Arc;

use log::{debug, info};

use super::Runtime;
use super::platform::{Device, Platform};
use crate::error::{ClError, Result};
use crate::handle::{ContextId, DeviceId, Handle, PlatformId};
use crate::info::InfoValue;
use crate::registry::Released;
use crate::types::*;

/// A set of devices and the objects created against them
pub struct Context {
    device_ids: Vec<DeviceId>,
    devices: Vec<Arc<Device>>,
    /// Flattened `(key, value)` property pairs
    properties: Vec<isize>,
}

impl Context {
    pub fn device_ids(&self) -> &[DeviceId] {
        &self.device_ids
    }

    /// Device that hosts the context's buffers
    pub(crate) fn primary(&self) -> &Arc<Device> {
        &self.devices[0]
    }

    pub(crate) fn device(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.device_ids
            .iter()
            .position(|d| *d == id)
            .map(|i| &self.devices[i])
    }

    pub(crate) fn devices(&self) -> impl Iterator<Item = (DeviceId, &Arc<Device>)> {
        self.device_ids.iter().copied().zip(self.devices.iter())
    }
}

impl Runtime {
    /// Create a context on `devices`
    pub fn create_context(&self, devices: &[DeviceId]) -> Result<ContextId> {
        self.create_context_with_properties(&[], devices)
    }

    /// Create a context with `(key, value)` properties
    ///
    /// The only supported key is `CL_CONTEXT_PLATFORM`, whose value must be
    /// this runtime's platform.
    pub fn create_context_with_properties(
        &self,
        properties: &[(isize, isize)],
        devices: &[DeviceId],
    ) -> Result<ContextId> {
        if devices.is_empty() {
            return Err(ClError::invalid_value("empty device list"));
        }
        let mut flat = Vec::with_capacity(properties.len() * 2);
        for (key, value) in properties {
            match *key {
                CL_CONTEXT_PLATFORM => {
                    let platform = PlatformId::from_raw(*value as u64)
                        .ok_or(ClError::InvalidPlatform)?;
                    self.resolve::<Platform>(platform)
                        .map_err(|_| ClError::InvalidPlatform)?;
                }
                other => {
                    return Err(ClError::invalid_value(format!(
                        "unsupported context property {:#x}",
                        other
                    )));
                }
            }
            flat.extend([*key, *value]);
        }

        let mut device_ids: Vec<DeviceId> = Vec::with_capacity(devices.len());
        let mut resolved = Vec::with_capacity(devices.len());
        for &id in devices {
            let device = self.check_device(id)?;
            if !device_ids.contains(&id) {
                device_ids.push(id);
                resolved.push(device);
            }
        }

        let context = Arc::new(Context {
            device_ids,
            devices: resolved,
            properties: flat,
        });
        let names: Vec<&str> = context
            .devices
            .iter()
            .map(|d| d.descriptor().name.as_str())
            .collect();
        let id = self.registry.insert(context.clone());
        info!("Created context {:?} on {:?}", id, names);
        Ok(id)
    }

    /// Create a context on every device matching `device_type`
    pub fn create_context_from_type(&self, device_type: cl_device_type) -> Result<ContextId> {
        let devices = self.devices_of_type(device_type)?;
        self.create_context(&devices)
    }

    pub fn retain_context(&self, context: ContextId) -> Result<()> {
        self.registry.retain::<Context>(context)
    }

    /// Release one reference of `context`
    ///
    /// When the last explicit reference goes while child objects are alive,
    /// the configured [`ContextReleasePolicy`](crate::ContextReleasePolicy)
    /// decides between refusing (`ContextInUse`) and cascading.
    pub fn release_context(&self, context: ContextId) -> Result<()> {
        match self
            .registry
            .release_context(context, self.config.context_release)?
        {
            Released::Alive(count) => {
                debug!("Context {:?} released, {} reference(s) left", context, count);
            }
            Released::Destroyed(objects) => {
                info!(
                    "Destroyed context {:?} ({} object(s) torn down)",
                    context,
                    objects.len()
                );
                for object in objects {
                    object.destroy();
                }
            }
        }
        Ok(())
    }

    pub fn context_info(&self, context: ContextId, param: cl_context_info) -> Result<InfoValue> {
        let ctx = self.resolve::<Context>(context)?;
        Ok(match param {
            CL_CONTEXT_REFERENCE_COUNT => {
                InfoValue::Uint(self.registry.ref_count::<Context>(context)?)
            }
            CL_CONTEXT_DEVICES => {
                InfoValue::Handles(ctx.device_ids.iter().map(|d| d.raw()).collect())
            }
            CL_CONTEXT_NUM_DEVICES => InfoValue::Uint(ctx.device_ids.len() as cl_uint),
            CL_CONTEXT_PROPERTIES => InfoValue::Properties(ctx.properties.clone()),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::tests::host_runtime;
    use crate::types::*;
    use crate::{ClError, DeviceId, Handle, HandleKind};

    #[test]
    fn test_create_and_release() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        runtime.retain_context(context).unwrap();
        let count = runtime
            .context_info(context, CL_CONTEXT_REFERENCE_COUNT)
            .unwrap();
        assert_eq!(count.as_uint(), Some(2));
        runtime.release_context(context).unwrap();
        runtime.release_context(context).unwrap();
        assert_eq!(
            runtime.release_context(context).err(),
            Some(ClError::InvalidHandle(HandleKind::Context))
        );
    }

    #[test]
    fn test_invalid_devices() {
        let runtime = host_runtime();
        assert_eq!(runtime.create_context(&[]).unwrap_err().code(), CL_INVALID_VALUE);
        let bogus = DeviceId::from_raw(77).unwrap();
        assert_eq!(
            runtime.create_context(&[bogus]).err(),
            Some(ClError::InvalidDevice)
        );
    }

    #[test]
    fn test_platform_property() {
        let runtime = host_runtime();
        let platform = runtime.platform_ids()[0];
        let devices = runtime.device_ids(platform, CL_DEVICE_TYPE_ALL).unwrap();
        let context = runtime
            .create_context_with_properties(
                &[(CL_CONTEXT_PLATFORM, platform.raw() as isize)],
                &devices,
            )
            .unwrap();
        let props = runtime.context_info(context, CL_CONTEXT_PROPERTIES).unwrap();
        assert_eq!(
            props,
            crate::InfoValue::Properties(vec![CL_CONTEXT_PLATFORM, platform.raw() as isize])
        );
        assert_eq!(
            runtime
                .create_context_with_properties(&[(CL_CONTEXT_PLATFORM, 999)], &devices)
                .err(),
            Some(ClError::InvalidPlatform)
        );
    }

    #[test]
    fn test_context_handle_is_not_a_device() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_GPU).unwrap();
        let as_device = DeviceId::from_raw(context.raw()).unwrap();
        assert!(runtime.device_info(as_device, CL_DEVICE_NAME).is_err());
    }
}
