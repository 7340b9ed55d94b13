//! Programs and their builds

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, info, warn};

use super::Runtime;
use super::context::Context;
use crate::backend::NativeLibrary;
use crate::compiler::{Artifact, BuildOptions, format_log};
use crate::error::{ClError, Result};
use crate::handle::{ContextId, DeviceId, Handle, ProgramId};
use crate::info::InfoValue;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    None,
    Error,
    Success,
    InProgress,
}

impl BuildStatus {
    pub fn code(self) -> cl_build_status {
        match self {
            BuildStatus::None => CL_BUILD_NONE,
            BuildStatus::Error => CL_BUILD_ERROR,
            BuildStatus::Success => CL_BUILD_SUCCESS,
            BuildStatus::InProgress => CL_BUILD_IN_PROGRESS,
        }
    }
}

/// Everything one build produced
///
/// A build swaps in a whole new state, so readers see either the previous
/// build or the new one.
pub struct BuildState {
    pub status: BuildStatus,
    pub options: String,
    pub log: String,
    pub artifact: Option<Arc<Artifact>>,
    pub(crate) libraries: Vec<(DeviceId, Arc<dyn NativeLibrary>)>,
}

impl BuildState {
    fn empty(status: BuildStatus, options: &str) -> Self {
        Self {
            status,
            options: options.to_string(),
            log: String::new(),
            artifact: None,
            libraries: Vec::new(),
        }
    }

    fn failed(options: &str, log: String) -> Self {
        Self {
            log,
            ..Self::empty(BuildStatus::Error, options)
        }
    }

    /// The artifact of a successful build
    pub(crate) fn executable(&self) -> Result<&Arc<Artifact>> {
        match (&self.status, &self.artifact) {
            (BuildStatus::Success, Some(artifact)) => Ok(artifact),
            _ => Err(ClError::InvalidProgramExecutable),
        }
    }
}

pub struct Program {
    context_id: ContextId,
    context: Arc<Context>,
    source: String,
    build: RwLock<Arc<BuildState>>,
    /// Live kernels; held for the whole duration of a build
    kernels: Mutex<usize>,
    /// Set while a build runs; the previous state stays readable meanwhile
    building: AtomicBool,
}

/// Marks a program as building until dropped
struct Building<'a>(&'a AtomicBool);

impl<'a> Building<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for Building<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Program {
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Snapshot of the current build
    pub fn state(&self) -> Arc<BuildState> {
        self.build
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build status as reported to callers
    pub fn build_status(&self) -> BuildStatus {
        if self.building.load(Ordering::Acquire) {
            return BuildStatus::InProgress;
        }
        self.state().status
    }

    fn replace_state(&self, state: BuildState) {
        *self.build.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
    }

    pub(crate) fn kernel_count(&self) -> MutexGuard<'_, usize> {
        self.kernels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

impl Runtime {
    /// Create a program from source fragments, concatenated in order
    pub fn create_program_with_source(
        &self,
        context: ContextId,
        fragments: &[&str],
    ) -> Result<ProgramId> {
        let ctx = self.resolve::<Context>(context)?;
        let source = fragments.concat();
        if source.is_empty() {
            return Err(ClError::invalid_value("empty program source"));
        }
        let id = self.registry.insert_child(Arc::new(Program {
            context_id: context,
            context: ctx,
            source,
            build: RwLock::new(Arc::new(BuildState::empty(BuildStatus::None, ""))),
            kernels: Mutex::new(0),
            building: AtomicBool::new(false),
        }))?;
        info!("Created program {:?} from {} fragment(s)", id, fragments.len());
        Ok(id)
    }

    /// Compile `program` for `devices` (all of the context's when empty)
    ///
    /// A translation failure leaves the program queryable with status
    /// `CL_BUILD_ERROR` and the diagnostics in its log.
    pub fn build_program(
        &self,
        program: ProgramId,
        devices: &[DeviceId],
        options: &str,
    ) -> Result<()> {
        let p = self.resolve::<Program>(program)?;
        let targets: Vec<DeviceId> = if devices.is_empty() {
            p.context.device_ids().to_vec()
        } else {
            for device in devices {
                if p.context.device(*device).is_none() {
                    return Err(ClError::InvalidDevice);
                }
            }
            devices.to_vec()
        };
        let parsed = BuildOptions::parse(options).map_err(ClError::InvalidBuildOptions)?;

        let kernels = p.kernel_count();
        if *kernels > 0 {
            return Err(ClError::invalid_operation(format!(
                "program has {} live kernel(s)",
                *kernels
            )));
        }
        let _building = Building::enter(&p.building);

        let translation = match self.translator.translate(&p.source, &parsed) {
            Ok(t) => t,
            Err(e) => {
                let log = format_log(&e.diagnostics);
                warn!("Build of program {:?} failed:\n{}", program, log);
                p.replace_state(BuildState::failed(options, log));
                return Err(ClError::BuildProgramFailure);
            }
        };

        let mut logs = vec![format_log(&translation.diagnostics)];
        let mut libraries = Vec::with_capacity(targets.len());
        for device in targets {
            let Some(dev) = p.context.device(device) else {
                continue;
            };
            match dev.native().new_library(&translation.artifact) {
                Ok((library, log)) => {
                    logs.push(log);
                    libraries.push((device, library));
                }
                Err(e) => {
                    let log = format!("error: {}", e);
                    warn!("Backend rejected program {:?}: {}", program, e);
                    p.replace_state(BuildState::failed(options, log));
                    return Err(ClError::BuildProgramFailure);
                }
            }
        }
        logs.retain(|l| !l.is_empty());

        let names: Vec<&str> = translation
            .artifact
            .kernels
            .iter()
            .map(|k| k.name.as_str())
            .collect();
        debug!("Program {:?} built, kernels {:?}", program, names);
        p.replace_state(BuildState {
            status: BuildStatus::Success,
            options: options.to_string(),
            log: logs.join("\n"),
            artifact: Some(translation.artifact.clone()),
            libraries,
        });
        drop(kernels);
        Ok(())
    }

    pub fn retain_program(&self, program: ProgramId) -> Result<()> {
        self.registry.retain::<Program>(program)
    }

    pub fn release_program(&self, program: ProgramId) -> Result<()> {
        self.release::<Program>(program)
    }

    pub fn program_info(&self, program: ProgramId, param: cl_program_info) -> Result<InfoValue> {
        let p = self.resolve::<Program>(program)?;
        Ok(match param {
            CL_PROGRAM_REFERENCE_COUNT => {
                InfoValue::Uint(self.registry.ref_count::<Program>(program)?)
            }
            CL_PROGRAM_CONTEXT => InfoValue::Handle(p.context_id.raw()),
            CL_PROGRAM_NUM_DEVICES => InfoValue::Uint(p.context.device_ids().len() as cl_uint),
            CL_PROGRAM_DEVICES => {
                InfoValue::Handles(p.context.device_ids().iter().map(|d| d.raw()).collect())
            }
            CL_PROGRAM_SOURCE => InfoValue::String(p.source.clone()),
            CL_PROGRAM_NUM_KERNELS => {
                InfoValue::Size(p.state().executable()?.kernels.len())
            }
            CL_PROGRAM_KERNEL_NAMES => {
                let state = p.state();
                let names: Vec<&str> = state
                    .executable()?
                    .kernels
                    .iter()
                    .map(|k| k.name.as_str())
                    .collect();
                InfoValue::String(names.join(";"))
            }
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }

    pub fn program_build_info(
        &self,
        program: ProgramId,
        device: DeviceId,
        param: cl_program_build_info,
    ) -> Result<InfoValue> {
        let p = self.resolve::<Program>(program)?;
        if p.context.device(device).is_none() {
            return Err(ClError::InvalidDevice);
        }
        let state = p.state();
        Ok(match param {
            CL_PROGRAM_BUILD_STATUS => InfoValue::Int(p.build_status().code()),
            CL_PROGRAM_BUILD_OPTIONS => InfoValue::String(state.options.clone()),
            CL_PROGRAM_BUILD_LOG => InfoValue::String(state.log.clone()),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::host_runtime;

    const ADD: &str = "__kernel void add(__global const float* a, __global const float* b, \
                       __global float* c) {\n\
                           size_t i = get_global_id(0);\n\
                           c[i] = a[i] + b[i];\n\
                       }\n";

    fn setup() -> (Runtime, ContextId, DeviceId) {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let device = runtime.context_info(context, CL_CONTEXT_DEVICES).unwrap();
        let device = DeviceId::from_raw(device.as_handles().unwrap()[0]).unwrap();
        (runtime, context, device)
    }

    #[test]
    fn test_fragments_are_concatenated() {
        let (runtime, context, _) = setup();
        let program = runtime
            .create_program_with_source(context, &["__kernel void ", "k() {}"])
            .unwrap();
        assert_eq!(
            runtime
                .program_info(program, CL_PROGRAM_SOURCE)
                .unwrap()
                .as_str(),
            Some("__kernel void k() {}")
        );
        assert_eq!(
            runtime
                .create_program_with_source(context, &["", ""])
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
        assert_eq!(
            runtime
                .create_program_with_source(context, &[])
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
    }

    #[test]
    fn test_successful_build() {
        let (runtime, context, device) = setup();
        let program = runtime.create_program_with_source(context, &[ADD]).unwrap();
        assert_eq!(
            runtime.program_info(program, CL_PROGRAM_NUM_KERNELS).err(),
            Some(ClError::InvalidProgramExecutable)
        );
        runtime.build_program(program, &[], "-cl-mad-enable").unwrap();
        let status = runtime
            .program_build_info(program, device, CL_PROGRAM_BUILD_STATUS)
            .unwrap();
        assert_eq!(status, InfoValue::Int(CL_BUILD_SUCCESS));
        assert_eq!(
            runtime
                .program_build_info(program, device, CL_PROGRAM_BUILD_OPTIONS)
                .unwrap()
                .as_str(),
            Some("-cl-mad-enable")
        );
        assert_eq!(
            runtime
                .program_info(program, CL_PROGRAM_KERNEL_NAMES)
                .unwrap()
                .as_str(),
            Some("add")
        );
        assert_eq!(
            runtime
                .program_info(program, CL_PROGRAM_NUM_KERNELS)
                .unwrap()
                .as_size(),
            Some(1)
        );
    }

    #[test]
    fn test_failed_build_keeps_log() {
        let (runtime, context, device) = setup();
        let program = runtime
            .create_program_with_source(context, &["__kernel void k() { int x = ; }"])
            .unwrap();
        assert_eq!(
            runtime.build_program(program, &[], "").err(),
            Some(ClError::BuildProgramFailure)
        );
        let log = runtime
            .program_build_info(program, device, CL_PROGRAM_BUILD_LOG)
            .unwrap();
        let log = log.as_str().unwrap();
        assert!(log.starts_with("1:"), "{}", log);
        assert!(log.contains("error"), "{}", log);
        assert_eq!(
            runtime
                .program_build_info(program, device, CL_PROGRAM_BUILD_STATUS)
                .unwrap(),
            InfoValue::Int(CL_BUILD_ERROR)
        );
    }

    #[test]
    fn test_invalid_options_and_devices() {
        let (runtime, context, _) = setup();
        let program = runtime.create_program_with_source(context, &[ADD]).unwrap();
        assert_eq!(
            runtime
                .build_program(program, &[], "-O2")
                .unwrap_err()
                .code(),
            CL_INVALID_BUILD_OPTIONS
        );
        let not_a_device = DeviceId::from_raw(program.raw()).unwrap();
        assert_eq!(
            runtime.build_program(program, &[not_a_device], "").err(),
            Some(ClError::InvalidDevice)
        );
        // nothing was attempted
        let state = runtime.resolve::<Program>(program).unwrap().state();
        assert_eq!(state.status, BuildStatus::None);
    }

    #[test]
    fn test_rebuild_replaces_log() {
        let (runtime, context, device) = setup();
        let program = runtime
            .create_program_with_source(context, &["#ifndef OK\n#error broken\n#endif\n", ADD])
            .unwrap();
        assert!(runtime.build_program(program, &[], "").is_err());
        runtime.build_program(program, &[], "-D OK").unwrap();
        let log = runtime
            .program_build_info(program, device, CL_PROGRAM_BUILD_LOG)
            .unwrap();
        assert!(!log.as_str().unwrap().contains("error"));
    }

    #[test]
    fn test_previous_build_stays_visible_while_building() {
        let (runtime, context, device) = setup();
        let program = runtime
            .create_program_with_source(context, &["#error broken
"])
            .unwrap();
        assert!(runtime.build_program(program, &[], "-D A").is_err());
        let info = |param| runtime.program_build_info(program, device, param).unwrap();
        let log = info(CL_PROGRAM_BUILD_LOG);

        let p = runtime.resolve::<Program>(program).unwrap();
        let building = Building::enter(&p.building);
        assert_eq!(info(CL_PROGRAM_BUILD_STATUS).as_int(), Some(CL_BUILD_IN_PROGRESS));
        assert_eq!(info(CL_PROGRAM_BUILD_LOG), log);
        assert_eq!(info(CL_PROGRAM_BUILD_OPTIONS).as_str(), Some("-D A"));
        drop(building);
        assert_eq!(info(CL_PROGRAM_BUILD_STATUS).as_int(), Some(CL_BUILD_ERROR));
    }
}
