//! The runtime: every OpenCL object and operation
//!
//! A [`Runtime`] owns the handle registry, the selected backend and the
//! program translator. It is constructed explicitly, so tests can run any
//! number of independent runtimes side by side. The operations are spread
//! over one submodule per object kind.

mod context;
mod dispatch;
mod event;
mod kernel;
mod memory;
mod platform;
mod program;
mod queue;

pub use context::Context;
pub use event::{Event, EventStatus};
pub use kernel::{Kernel, KernelArg, ScalarArg};
pub use memory::Buffer;
pub use platform::{Device, Platform};
pub use program::{BuildState, BuildStatus, Program};
pub use queue::{PendingRead, Queue};

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use log::info;

use crate::backend::{self, Backend};
use crate::compiler::{ClcTranslator, Translator};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::handle::{DeviceId, Handle, PlatformId};
use crate::registry::{Registered, Registry, Released};

/// The root platform and its devices, registered on first use
struct Enumeration {
    platform: PlatformId,
    devices: Vec<DeviceId>,
}

/// An OpenCL runtime instance
///
/// # Example
///
/// ```
/// use clmetal::{BackendSelection, Runtime, RuntimeConfig, CL_DEVICE_TYPE_ALL};
///
/// let runtime = Runtime::new(
///     RuntimeConfig::builder().backend(BackendSelection::Host).build(),
/// )?;
/// let platform = runtime.platform_ids()[0];
/// let devices = runtime.device_ids(platform, CL_DEVICE_TYPE_ALL)?;
/// let context = runtime.create_context(&devices)?;
/// runtime.release_context(context)?;
/// # Ok::<(), clmetal::ClError>(())
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    backend: Arc<dyn Backend>,
    translator: Arc<dyn Translator>,
    registry: Registry,
    /// Zero point of profiling timestamps
    epoch: Instant,
    enumeration: OnceLock<Enumeration>,
}

impl Runtime {
    /// Create a runtime on the backend chosen by `config`
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let backend = backend::select(&config)?;
        Ok(Self::with_backend(config, backend, Arc::new(ClcTranslator)))
    }

    /// Create a runtime on an explicit backend and translator
    pub fn with_backend(
        config: RuntimeConfig,
        backend: Arc<dyn Backend>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        info!(
            "Runtime created: backend '{}', context release policy {:?}",
            backend.name(),
            config.context_release
        );
        Self {
            config,
            backend,
            translator,
            registry: Registry::new(),
            epoch: Instant::now(),
            enumeration: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Name of the backend executing the work
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn resolve<T: Registered>(&self, id: T::Id) -> Result<Arc<T>> {
        self.registry.resolve::<T>(id)
    }

    /// Drop one reference; tears the object down once it leaves the registry
    fn release<T: Registered>(&self, id: T::Id) -> Result<()> {
        if let Released::Destroyed(objects) = self.registry.release::<T>(id)? {
            for object in objects {
                object.destroy();
            }
        }
        Ok(())
    }

    fn nanos_since_epoch(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    /// Whether `id` still names a live object of its kind
    pub fn is_live<I: Handle>(&self, id: I) -> bool {
        use crate::handle::HandleKind;
        let raw = id.raw();
        match I::KIND {
            HandleKind::Platform => self.registry.resolve_raw::<Platform>(raw).is_ok(),
            HandleKind::Device => self.registry.resolve_raw::<Device>(raw).is_ok(),
            HandleKind::Context => self.registry.resolve_raw::<Context>(raw).is_ok(),
            HandleKind::Queue => self.registry.resolve_raw::<Queue>(raw).is_ok(),
            HandleKind::Mem => self.registry.resolve_raw::<Buffer>(raw).is_ok(),
            HandleKind::Program => self.registry.resolve_raw::<Program>(raw).is_ok(),
            HandleKind::Kernel => self.registry.resolve_raw::<Kernel>(raw).is_ok(),
            HandleKind::Event => self.registry.resolve_raw::<Event>(raw).is_ok(),
        }
    }
}
