//! Host libraries, pipelines, and kernel dispatch

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, trace};
use rustc_hash::FxHashMap;

use super::barrier::{Departure, GroupBarrier};
use super::buffer::HostBuffer;
use super::interpreter::{self, Invocation, Pointer, Value, WorkItem};
use super::memory::{Fault, Memory};
use crate::backend::traits::{
    BackendError, Binding, ComputePipeline, DispatchGrid, NativeLibrary, NativeQueue,
};
use crate::compiler::Artifact;
use crate::compiler::ast::{Function, Type};

/// A translated program prepared for interpretation
#[derive(Debug)]
pub(crate) struct HostProgram {
    artifact: Arc<Artifact>,
    constants: FxHashMap<String, Value>,
}

pub struct HostLibrary {
    program: Arc<HostProgram>,
    max_threads: usize,
}

impl HostLibrary {
    pub(crate) fn new(artifact: Arc<Artifact>, max_threads: usize) -> Result<Self, BackendError> {
        let constants = interpreter::program_constants(&artifact.module)?;
        Ok(Self {
            program: Arc::new(HostProgram {
                artifact,
                constants,
            }),
            max_threads,
        })
    }
}

impl NativeLibrary for HostLibrary {
    fn new_pipeline(&self, entry_point: &str) -> Result<Arc<dyn ComputePipeline>, BackendError> {
        let (index, _) = self
            .program
            .artifact
            .module
            .function(entry_point)
            .filter(|(_, f)| f.is_kernel)
            .ok_or_else(|| {
                BackendError::Compilation(format!("kernel '{}' not found in library", entry_point))
            })?;
        Ok(Arc::new(HostPipeline {
            program: self.program.clone(),
            kernel: index,
            max_threads: self.max_threads,
        }))
    }
}

pub struct HostPipeline {
    program: Arc<HostProgram>,
    /// Index into the module's functions
    kernel: usize,
    max_threads: usize,
}

impl HostPipeline {
    fn function(&self) -> Result<&Function, BackendError> {
        self.program
            .artifact
            .module
            .functions
            .get(self.kernel)
            .ok_or_else(|| BackendError::Execution("pipeline kernel is missing".to_string()))
    }
}

impl ComputePipeline for HostPipeline {
    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.max_threads
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Kernel argument before per-group memory is attached
enum ArgSource {
    Value(Value),
    /// `__local` pointer parameter: fresh memory per work-group
    Local { len: usize, param: Type },
}

pub struct HostQueue {
    num_threads: usize,
}

impl HostQueue {
    pub(crate) fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }
}

impl NativeQueue for HostQueue {
    fn dispatch(
        &self,
        pipeline: &dyn ComputePipeline,
        bindings: &[Binding],
        grid: &DispatchGrid,
    ) -> Result<(), BackendError> {
        let pipeline = pipeline
            .as_any()
            .downcast_ref::<HostPipeline>()
            .ok_or_else(|| {
                BackendError::Execution("pipeline was not created by the host backend".into())
            })?;
        let kernel = pipeline.function()?;
        let sources = bind_arguments(kernel, bindings)?;
        let launch = Launch {
            program: &pipeline.program,
            kernel,
            sources: &sources,
            grid,
        };
        debug!(
            "Dispatching '{}' over {:?} in groups of {:?}",
            kernel.name, grid.global_size, grid.local_size
        );
        launch.run(self.num_threads).map_err(BackendError::from)
    }
}

fn bind_arguments(kernel: &Function, bindings: &[Binding]) -> Result<Vec<ArgSource>, BackendError> {
    if kernel.params.len() != bindings.len() {
        return Err(BackendError::Execution(format!(
            "kernel '{}' takes {} argument(s), {} bound",
            kernel.name,
            kernel.params.len(),
            bindings.len()
        )));
    }
    kernel
        .params
        .iter()
        .zip(bindings)
        .map(|(param, binding)| {
            let mismatch = || {
                BackendError::Execution(format!(
                    "argument '{}' of type '{}' cannot take {:?}",
                    param.name, param.ty, binding
                ))
            };
            match (param.ty, binding) {
                (Type::Pointer(ptr), Binding::Buffer(buffer)) => {
                    let host = buffer
                        .as_any()
                        .downcast_ref::<HostBuffer>()
                        .ok_or_else(mismatch)?;
                    Ok(ArgSource::Value(Value::Ptr(Pointer::new(
                        host.memory().clone(),
                        ptr.elem,
                    ))))
                }
                (Type::Pointer(_), Binding::Threadgroup(len)) => Ok(ArgSource::Local {
                    len: *len,
                    param: param.ty,
                }),
                (Type::Scalar(ty), Binding::Bytes(bytes)) => interpreter::scalar_arg(bytes, ty)
                    .map(ArgSource::Value)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            }
        })
        .collect()
}

struct Launch<'a> {
    program: &'a HostProgram,
    kernel: &'a Function,
    sources: &'a [ArgSource],
    grid: &'a DispatchGrid,
}

impl Launch<'_> {
    fn run(&self, num_threads: usize) -> Result<(), Fault> {
        let groups = self.grid.num_groups();
        let total: usize = groups.iter().product();
        let coords = |index: usize| {
            [
                index % groups[0],
                (index / groups[0]) % groups[1],
                index / (groups[0] * groups[1]),
            ]
        };

        // Barrier kernels already use one thread per work-item
        if self.kernel.uses_barrier && self.grid.group_len() > 1 {
            return (0..total).try_for_each(|g| self.run_group(coords(g)));
        }

        let workers = num_threads.min(total).max(1);
        if workers == 1 {
            return (0..total).try_for_each(|g| self.run_group(coords(g)));
        }

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let failure: Mutex<Option<Fault>> = Mutex::new(None);
        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        let g = next.fetch_add(1, Ordering::Relaxed);
                        if g >= total {
                            break;
                        }
                        if let Err(fault) = self.run_group(coords(g)) {
                            stop.store(true, Ordering::Relaxed);
                            failure
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(fault);
                        }
                    }
                });
            }
        });
        match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn arguments(&self) -> Result<Vec<Value>, Fault> {
        self.sources
            .iter()
            .map(|source| match source {
                ArgSource::Value(v) => Ok(v.clone()),
                ArgSource::Local { len, param } => {
                    let mem = Memory::zeroed(*len).map_err(|e| Fault(e.to_string()))?;
                    let elem = param
                        .pointer()
                        .map(|p| p.elem)
                        .ok_or_else(|| Fault("__local argument is not a pointer".into()))?;
                    Ok(Value::Ptr(Pointer::new(Arc::new(mem), elem)))
                }
            })
            .collect()
    }

    fn run_group(&self, group_id: [usize; 3]) -> Result<(), Fault> {
        let grid = self.grid;
        let local_arrays = self
            .kernel
            .local_arrays
            .iter()
            .map(|a| {
                Memory::zeroed(a.len * a.elem.size())
                    .map(Arc::new)
                    .map_err(|e| Fault(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let args = self.arguments()?;

        let items = (0..grid.group_len()).map(|i| {
            let l = grid.local_size;
            let local_id = [i % l[0], (i / l[0]) % l[1], i / (l[0] * l[1])];
            let global_id =
                std::array::from_fn(|d| grid.global_offset[d] + group_id[d] * l[d] + local_id[d]);
            WorkItem {
                global_id,
                local_id,
                group_id,
            }
        });

        let module = &self.program.artifact.module;
        let constants = &self.program.constants;

        if !(self.kernel.uses_barrier && grid.group_len() > 1) {
            for item in items {
                Invocation::new(module, constants, grid, item, &local_arrays, None)
                    .run(self.kernel, args.clone())?;
            }
            return Ok(());
        }

        trace!("Group {:?}: {} threads with barrier", group_id, grid.group_len());
        let barrier = GroupBarrier::new(grid.group_len());
        thread::scope(|s| {
            let handles = items
                .map(|item| {
                    let (barrier, local_arrays, args) = (&barrier, &local_arrays, args.clone());
                    thread::Builder::new()
                        .name(format!("work-item-{:?}", item.local_id))
                        .spawn_scoped(s, move || {
                            let _exit = Departure(barrier);
                            Invocation::new(module, constants, grid, item, local_arrays, Some(barrier))
                                .run(self.kernel, args)
                        })
                })
                .collect::<Vec<_>>();
            let mut result = Ok(());
            for handle in handles {
                let outcome = match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(Fault("work-item panicked".into()))),
                    Err(e) => {
                        // the missing work-item never arrives at the barrier
                        barrier.leave();
                        Err(Fault(format!("cannot spawn work-item thread: {}", e)))
                    }
                };
                if result.is_ok() {
                    result = outcome;
                }
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::{NativeBuffer, NativeDevice, StorageMode};
    use crate::backend::host::HostDevice;
    use crate::compiler::{BuildOptions, ClcTranslator, Translator};
    use crate::config::RuntimeConfig;

    fn build(source: &str, kernel: &str) -> (HostDevice, Arc<dyn ComputePipeline>) {
        let device = HostDevice::new(&RuntimeConfig::builder().host_threads(2).build());
        let translation = ClcTranslator
            .translate(source, &BuildOptions::default())
            .unwrap();
        let (library, _) = device.new_library(&translation.artifact).unwrap();
        let pipeline = library.new_pipeline(kernel).unwrap();
        (device, pipeline)
    }

    fn floats(buffer: &Arc<dyn NativeBuffer>, n: usize) -> Vec<f32> {
        let mut bytes = vec![0u8; n * 4];
        buffer.read(0, &mut bytes).unwrap();
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn grid(global: usize, local: usize) -> DispatchGrid {
        DispatchGrid {
            work_dim: 1,
            global_offset: [0; 3],
            global_size: [global, 1, 1],
            local_size: [local, 1, 1],
        }
    }

    #[test]
    fn test_scale_kernel() {
        let (device, pipeline) = build(
            "__kernel void scale(__global float* x, float k) { size_t i = get_global_id(0); x[i] = x[i] * k; }",
            "scale",
        );
        let init: Vec<u8> = (0..8).flat_map(|i| (i as f32).to_ne_bytes()).collect();
        let buffer = device.new_buffer(32, StorageMode::Shared, Some(&init)).unwrap();
        let queue = device.new_command_queue().unwrap();
        let bindings = [
            Binding::Buffer(buffer.clone()),
            Binding::Bytes(2.5f32.to_ne_bytes().to_vec()),
        ];
        queue.dispatch(pipeline.as_ref(), &bindings, &grid(8, 2)).unwrap();
        assert_eq!(floats(&buffer, 8), vec![0.0, 2.5, 5.0, 7.5, 10.0, 12.5, 15.0, 17.5]);
    }

    #[test]
    fn test_local_reduction_with_barrier() {
        let source = r#"
            __kernel void sum(__global const float* in, __global float* out, __local float* scratch) {
                size_t lid = get_local_id(0);
                scratch[lid] = in[get_global_id(0)];
                barrier(CLK_LOCAL_MEM_FENCE);
                for (size_t s = get_local_size(0) / 2; s > 0; s >>= 1) {
                    if (lid < s) scratch[lid] += scratch[lid + s];
                    barrier(CLK_LOCAL_MEM_FENCE);
                }
                if (lid == 0) out[get_group_id(0)] = scratch[0];
            }
        "#;
        let (device, pipeline) = build(source, "sum");
        let init: Vec<u8> = (1..=16).flat_map(|i| (i as f32).to_ne_bytes()).collect();
        let input = device.new_buffer(64, StorageMode::Shared, Some(&init)).unwrap();
        let output = device.new_buffer(8, StorageMode::Shared, None).unwrap();
        let queue = device.new_command_queue().unwrap();
        let bindings = [
            Binding::Buffer(input),
            Binding::Buffer(output.clone()),
            Binding::Threadgroup(8 * 4),
        ];
        queue.dispatch(pipeline.as_ref(), &bindings, &grid(16, 8)).unwrap();
        assert_eq!(floats(&output, 2), vec![36.0, 100.0]);
    }

    #[test]
    fn test_out_of_bounds_write_faults() {
        let (device, pipeline) = build(
            "__kernel void oob(__global int* x) { x[get_global_id(0) + 4] = 1; }",
            "oob",
        );
        let buffer = device.new_buffer(16, StorageMode::Shared, None).unwrap();
        let queue = device.new_command_queue().unwrap();
        let err = queue
            .dispatch(pipeline.as_ref(), &[Binding::Buffer(buffer)], &grid(4, 1))
            .unwrap_err();
        assert!(matches!(err, BackendError::KernelFault(_)));
    }

    #[test]
    fn test_missing_kernel_is_a_compilation_error() {
        let device = HostDevice::new(&RuntimeConfig::default());
        let translation = ClcTranslator
            .translate("__kernel void k(__global int* x) { x[0] = 1; }", &BuildOptions::default())
            .unwrap();
        let (library, _) = device.new_library(&translation.artifact).unwrap();
        assert!(matches!(
            library.new_pipeline("nope"),
            Err(BackendError::Compilation(_))
        ));
    }
}
